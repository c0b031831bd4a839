//! The three-page ad-verification flow and its finalize endpoint, served on
//! the same listener as the Telegram webhook.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use log::error;
use serde::{Deserialize, Serialize};
use teloxide::update_listeners::{webhooks, UpdateListener};

use crate::app::App;
use crate::gate::GateError;
use crate::message_handler::complete_verification;

const VERIFY_PAGE: &str = include_str!("../templates/verify.html");
const CONTINUE_PAGE: &str = include_str!("../templates/verify_continue.html");
const COMPLETE_PAGE: &str = include_str!("../templates/complete_subscription.html");

/// Seconds the interstitial page holds the user before moving on.
const DWELL_SECS: u32 = 5;

const INVALID_TOKEN_PAGE: &str = "<h1>Invalid or expired token. Please try again.</h1>";

#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    file_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

fn message(status: StatusCode, text: &str) -> (StatusCode, Json<MessageBody>) {
    (
        status,
        Json(MessageBody {
            message: text.to_string(),
        }),
    )
}

pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/", get(live_handler))
        .route("/verify/{token}", get(verify))
        .route("/verify_continue/{token}", get(verify_continue))
        .route("/verify_final/{token}", get(verify_final))
        .route("/verify_success/{token}", post(verify_success))
        .with_state(app)
}

/// Builds the webhook update listener and merges its route with the
/// verification routes, so one server answers both.
pub fn with_webhook(
    app: Arc<App>,
    options: webhooks::Options,
) -> (
    impl UpdateListener<Err = Infallible>,
    impl Future<Output = ()> + Send,
    Router,
) {
    let (listener, stop_flag, bot_router) = webhooks::axum_no_setup(options);

    (listener, stop_flag, bot_router.merge(router(app)))
}

async fn live_handler() -> StatusCode {
    StatusCode::OK
}

/// Substitutes `{{key}}` placeholders with attribute-safe values.
fn render(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |page, (key, value)| {
        page.replace(
            &format!("{{{{{}}}}}", key),
            &html_escape::encode_double_quoted_attribute(value),
        )
    })
}

fn page_url(
    app: &App,
    page: &str,
    token: &str,
    query: &VerifyQuery,
) -> Result<String, (StatusCode, Html<String>)> {
    app.verify_page(page, token, query.file_token.as_deref())
        .map(String::from)
        .map_err(|e| {
            error!("Failed to build {} url: {}", page, e);
            (
                StatusCode::BAD_REQUEST,
                Html(INVALID_TOKEN_PAGE.to_string()),
            )
        })
}

async fn verify(
    State(app): State<Arc<App>>,
    Path(token): Path<String>,
    Query(query): Query<VerifyQuery>,
) -> Result<Html<String>, (StatusCode, Html<String>)> {
    let next_url = page_url(&app, "verify_continue", &token, &query)?;

    Ok(Html(render(VERIFY_PAGE, &[("next_url", &next_url)])))
}

async fn verify_continue(
    State(app): State<Arc<App>>,
    Path(token): Path<String>,
    Query(query): Query<VerifyQuery>,
) -> Result<Html<String>, (StatusCode, Html<String>)> {
    let next_url = page_url(&app, "verify_final", &token, &query)?;

    Ok(Html(render(
        CONTINUE_PAGE,
        &[
            ("next_url", &next_url),
            ("dwell_secs", &DWELL_SECS.to_string()),
        ],
    )))
}

async fn verify_final(
    State(app): State<Arc<App>>,
    Path(token): Path<String>,
    Query(query): Query<VerifyQuery>,
) -> Result<Html<String>, (StatusCode, Html<String>)> {
    match app.gate.token_owner(&token).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Html(INVALID_TOKEN_PAGE.to_string()),
            ))
        }
        Err(e) => {
            error!("Failed to look up subscription token: {}", e);
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Html("<h1>Something went wrong. Please try again later.</h1>".to_string()),
            ));
        }
    }

    let action_url = page_url(&app, "verify_success", &token, &query)?;

    Ok(Html(render(COMPLETE_PAGE, &[("action_url", &action_url)])))
}

async fn verify_success(
    State(app): State<Arc<App>>,
    Path(token): Path<String>,
    Query(query): Query<VerifyQuery>,
) -> (StatusCode, Json<MessageBody>) {
    let chat_id = match app.gate.finalize(&token, app.grant).await {
        Ok(chat_id) => chat_id,
        Err(GateError::NotFound) => {
            return message(StatusCode::BAD_REQUEST, "Invalid or expired token.")
        }
        Err(e) => {
            error!("Failed to finalize subscription: {}", e);
            return message(StatusCode::INTERNAL_SERVER_ERROR, "An error occurred.");
        }
    };

    complete_verification(&app, chat_id, query.file_token.as_deref()).await;

    message(StatusCode::OK, "Subscription verified successfully!")
}
