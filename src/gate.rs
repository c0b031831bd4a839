use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::info;
use teloxide::types::ChatId;
use thiserror::Error;

use crate::db::DbService;
use crate::dto::SubscriptionDto;
use crate::helpers::generate_subscription_token;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("GateError.NotFound")]
    NotFound,
    #[error("GateError.Database: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub chat_id: ChatId,
    pub token: String,
    pub subscribed_until: Option<DateTime<Utc>>,
    pub verified: bool,
}

impl Subscription {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.subscribed_until.is_some_and(|until| now < until)
    }
}

impl From<SubscriptionDto> for Subscription {
    fn from(dto: SubscriptionDto) -> Self {
        Self {
            chat_id: ChatId(dto.chat_id),
            token: dto.unique_id,
            subscribed_until: dto
                .subscribed_until
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            verified: dto.verified,
        }
    }
}

/// Decides whether a chat currently holds a subscription and drives the
/// issued -> verified transition of its record.
pub struct SubscriptionGate {
    db: Arc<DbService>,
}

impl SubscriptionGate {
    pub fn new(db: Arc<DbService>) -> Self {
        Self { db }
    }

    pub async fn subscription(&self, chat_id: ChatId) -> Result<Option<Subscription>, GateError> {
        let dto = self.db.get_subscription_by_chat_id(chat_id.0).await?;
        Ok(dto.map(Subscription::from))
    }

    pub async fn is_active(&self, chat_id: ChatId) -> Result<bool, GateError> {
        self.is_active_at(chat_id, Utc::now()).await
    }

    pub async fn is_active_at(&self, chat_id: ChatId, now: DateTime<Utc>) -> Result<bool, GateError> {
        let subscription = self.subscription(chat_id).await?;
        Ok(subscription.is_some_and(|s| s.is_active_at(now)))
    }

    /// Resets the chat's record to a fresh, unverified token. Callers only
    /// reach this on the "not active" branch; an active grant is discarded.
    pub async fn issue_token(&self, chat_id: ChatId) -> Result<String, GateError> {
        let token = generate_subscription_token(chat_id.0);
        self.db.upsert_subscription_token(chat_id.0, &token).await?;

        info!("Issued subscription token for chat_id: {}", chat_id);
        Ok(token)
    }

    pub async fn token_owner(&self, token: &str) -> Result<Option<ChatId>, GateError> {
        let dto = self.db.get_subscription_by_unique_id(token).await?;
        Ok(dto.map(|s| ChatId(s.chat_id)))
    }

    /// Completes verification for `token`, granting `grant` from now on.
    /// A second call re-grants from the new "now".
    pub async fn finalize(&self, token: &str, grant: Duration) -> Result<ChatId, GateError> {
        let until = Utc::now() + grant;
        let chat_id = self
            .db
            .verify_subscription(token, until.timestamp())
            .await?
            .ok_or(GateError::NotFound)?;

        info!("Subscription verified for chat_id: {} until {}", chat_id, until);
        Ok(ChatId(chat_id))
    }
}
