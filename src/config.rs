use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use teloxide::types::{ChatId, Recipient, UserId};
use url::Url;

use crate::helpers::parse_id_list;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_TOKEN_TIMEOUT_MINUTES: i64 = 2;
const DEFAULT_GRANT_MINUTES: i64 = 10;
const DEFAULT_DELETE_AFTER_SECS: u64 = 1200;
const DEFAULT_WEBHOOK_MAX_ATTEMPTS: u32 = 3;

/// Everything the service reads from its environment, resolved once at startup.
#[derive(Clone)]
pub struct Config {
    pub bot_token: String,
    pub database_url: String,
    pub public_url: Url,
    pub verify_url: Url,
    pub listen_addr: SocketAddr,
    pub channel: Recipient,
    pub channel_url: Option<Url>,
    pub owner_id: UserId,
    pub trusted_users: Vec<UserId>,
    pub membership_bypass_chats: Vec<ChatId>,
    pub upload_chat: Option<ChatId>,
    pub admins: Vec<UserId>,
    pub community_url: Option<Url>,
    /// Probation advertised in the subscription prompt.
    pub token_timeout: chrono::Duration,
    /// Granted once the verification web flow completes.
    pub grant: chrono::Duration,
    pub delete_after: Duration,
    pub webhook_max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| var(key).ok_or_else(|| anyhow!("{} must be set", key));

        let public_url = parse_base_url(&required("PUBLIC_URL")?).context("PUBLIC_URL")?;
        let verify_url = match var("VERIFY_URL") {
            Some(raw) => parse_base_url(&raw).context("VERIFY_URL")?,
            None => public_url.clone(),
        };

        let owner_id = parse_user_id(&required("OWNER_ID")?).context("OWNER_ID")?;

        let user_list = |key: &str| -> Result<Vec<UserId>> {
            let ids = parse_id_list(&var(key).unwrap_or_default()).with_context(|| key.to_string())?;
            ids.into_iter().map(to_user_id).collect::<Result<Vec<_>>>().with_context(|| key.to_string())
        };
        let chat_list = |key: &str| -> Result<Vec<ChatId>> {
            let ids = parse_id_list(&var(key).unwrap_or_default()).with_context(|| key.to_string())?;
            Ok(ids.into_iter().map(ChatId).collect())
        };

        let upload_chat = var("PRIVATE_GROUP_ID")
            .map(|raw| raw.trim().parse::<i64>().map(ChatId))
            .transpose()
            .context("PRIVATE_GROUP_ID")?;

        let number = |key: &str, default: i64| -> Result<i64> {
            match var(key) {
                Some(raw) => {
                    let value: i64 = raw.trim().parse().with_context(|| key.to_string())?;
                    if value <= 0 {
                        return Err(anyhow!("{} must be positive, got {}", key, value));
                    }
                    Ok(value)
                }
                None => Ok(default),
            }
        };

        let token_timeout = chrono::Duration::try_minutes(number(
            "TOKEN_TIMEOUT_MINUTES",
            DEFAULT_TOKEN_TIMEOUT_MINUTES,
        )?)
        .ok_or(anyhow!("TOKEN_TIMEOUT_MINUTES out of range"))?;
        let grant = chrono::Duration::try_minutes(number("GRANT_MINUTES", DEFAULT_GRANT_MINUTES)?)
            .ok_or(anyhow!("GRANT_MINUTES out of range"))?;
        let delete_after = Duration::from_secs(
            number("DELETE_AFTER_SECS", DEFAULT_DELETE_AFTER_SECS as i64)? as u64,
        );
        let webhook_max_attempts = u32::try_from(number(
            "WEBHOOK_MAX_ATTEMPTS",
            DEFAULT_WEBHOOK_MAX_ATTEMPTS as i64,
        )?)
        .context("WEBHOOK_MAX_ATTEMPTS")?;

        let listen_addr = var("LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .context("LISTEN_ADDR")?;

        Ok(Self {
            bot_token: required("BOT_TOKEN")?,
            database_url: required("DATABASE_URL")?,
            public_url,
            verify_url,
            listen_addr,
            channel: parse_recipient(&required("CHANNEL_ID")?).context("CHANNEL_ID")?,
            channel_url: optional_url(var("CHANNEL_URL")).context("CHANNEL_URL")?,
            owner_id,
            trusted_users: user_list("TRUSTED_USERS")?,
            membership_bypass_chats: chat_list("MEMBERSHIP_BYPASS_CHATS")?,
            upload_chat,
            admins: user_list("ADMINS")?,
            community_url: optional_url(var("COMMUNITY_URL")).context("COMMUNITY_URL")?,
            token_timeout,
            grant,
            delete_after,
            webhook_max_attempts,
        })
    }

    /// Where Telegram posts updates: the public base URL scoped by the bot token.
    pub fn webhook_url(&self) -> Result<Url> {
        Ok(self.public_url.join(&self.bot_token)?)
    }
}

/// Parses a base URL and makes sure it ends with a slash so `join` appends
/// to it instead of replacing the last path segment.
fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    Ok(Url::parse(&format!("{}/", trimmed))?)
}

fn optional_url(raw: Option<String>) -> Result<Option<Url>> {
    Ok(raw.map(|raw| Url::parse(raw.trim())).transpose()?)
}

fn parse_user_id(raw: &str) -> Result<UserId> {
    to_user_id(raw.trim().parse()?)
}

fn to_user_id(id: i64) -> Result<UserId> {
    let id = u64::try_from(id).map_err(|_| anyhow!("user id {} must not be negative", id))?;
    Ok(UserId(id))
}

fn parse_recipient(raw: &str) -> Result<Recipient> {
    let raw = raw.trim();
    if raw.starts_with('@') {
        Ok(Recipient::ChannelUsername(raw.to_string()))
    } else {
        Ok(Recipient::Id(ChatId(raw.parse()?)))
    }
}
