use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use teloxide::{error_handlers::LoggingErrorHandler, prelude::*, update_listeners::webhooks};
use tokio::net::TcpListener;

use crate::app::App;
use crate::config::Config;
use crate::db::DbService;
use crate::keyboards::CLOSE_CALLBACK;
use crate::message_handler::{close_handler, command_handler, upload_handler, Command};
use crate::registry::StoredFile;

mod access;
mod app;
mod config;
mod db;
mod delivery;
mod dto;
mod gate;
mod helpers;
mod keyboards;
mod message_handler;
mod registry;
#[cfg(test)]
mod testing;
mod transport;
mod web;
mod webhook;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    pretty_env_logger::formatted_builder()
        .parse_filters(&std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(DbService::new_sqlite(&config.database_url).await?);
    info!("Migrating database...");
    db.migrate().await?;
    info!("Database migrated");

    let bot = Bot::new(&config.bot_token);
    let me = bot.get_me().await?;
    let bot_username = me.username().to_string();
    info!("Starting media gate bot @{}", bot_username);

    let app = Arc::new(App::new(
        &config,
        db,
        Arc::new(bot.clone()),
        bot_username,
    ));

    let webhook_url = config.webhook_url()?;
    let (listener, stop_flag, router) = web::with_webhook(
        app.clone(),
        webhooks::Options::new(config.listen_addr, webhook_url.clone()),
    );

    let tcp = TcpListener::bind(config.listen_addr).await?;
    info!("Listening on {}", config.listen_addr);
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(tcp, router)
            .with_graceful_shutdown(stop_flag)
            .await
        {
            error!("HTTP server error: {}", e);
        }
    });

    if !webhook::register(&bot, webhook_url, config.webhook_max_attempts).await {
        error!("Webhook is not registered, updates will not arrive until it is set");
    }

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(command_handler),
        )
        .branch(
            Update::filter_message()
                .filter(|msg: Message, app: Arc<App>| {
                    let uploader = msg.from.as_ref().map(|u| u.id);
                    app.access.may_upload(msg.chat.id, uploader)
                        && StoredFile::from_message(&msg).is_some()
                })
                .endpoint(upload_handler),
        )
        .branch(
            Update::filter_callback_query()
                .filter(|q: CallbackQuery| q.data.as_deref() == Some(CLOSE_CALLBACK))
                .endpoint(close_handler),
        );

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![app])
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("An error from the update listener"),
        )
        .await;

    server.await?;

    Ok(())
}
