use std::sync::Arc;

use teloxide::types::Recipient;
use url::Url;

use crate::access::AccessPolicy;
use crate::config::Config;
use crate::db::DbService;
use crate::delivery::Delivery;
use crate::gate::SubscriptionGate;
use crate::registry::FileRegistry;
use crate::transport::Transport;

/// Shared state handed to both the update handlers and the verification web
/// routes.
pub struct App {
    pub gate: SubscriptionGate,
    pub registry: FileRegistry,
    pub delivery: Delivery,
    pub transport: Arc<dyn Transport>,
    pub access: AccessPolicy,
    pub bot_username: String,
    pub channel: Recipient,
    pub channel_url: Option<Url>,
    pub verify_url: Url,
    pub community_url: Option<Url>,
    pub token_timeout: chrono::Duration,
    pub grant: chrono::Duration,
}

impl App {
    pub fn new(
        config: &Config,
        db: Arc<DbService>,
        transport: Arc<dyn Transport>,
        bot_username: String,
    ) -> Self {
        Self {
            gate: SubscriptionGate::new(db.clone()),
            registry: FileRegistry::new(db),
            delivery: Delivery::new(transport.clone(), config.delete_after),
            transport,
            access: AccessPolicy::from_config(config),
            bot_username,
            channel: config.channel.clone(),
            channel_url: config.channel_url.clone(),
            verify_url: config.verify_url.clone(),
            community_url: config.community_url.clone(),
            token_timeout: config.token_timeout,
            grant: config.grant,
        }
    }

    /// Entry point of the ad-verification flow for `token`, carrying the
    /// requested file along when there is one.
    pub fn verification_link(
        &self,
        token: &str,
        file_token: Option<&str>,
    ) -> Result<Url, url::ParseError> {
        self.verify_page("verify", token, file_token)
    }

    pub fn verify_page(
        &self,
        page: &str,
        token: &str,
        file_token: Option<&str>,
    ) -> Result<Url, url::ParseError> {
        let mut url = self.verify_url.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .push(page)
            .push(token);
        if let Some(file_token) = file_token {
            url.query_pairs_mut().append_pair("file_token", file_token);
        }

        Ok(url)
    }
}
