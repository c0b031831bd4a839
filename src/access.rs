use std::collections::HashSet;

use teloxide::types::{ChatId, Recipient, UserId};

use crate::config::Config;

/// Identity-based capability checks: who skips the channel-membership
/// requirement and who may register uploads.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    trusted: HashSet<UserId>,
    bypassed_channels: HashSet<ChatId>,
    upload_chat: Option<ChatId>,
    admins: HashSet<UserId>,
}

impl AccessPolicy {
    pub fn new(
        trusted: impl IntoIterator<Item = UserId>,
        bypassed_channels: impl IntoIterator<Item = ChatId>,
        upload_chat: Option<ChatId>,
        admins: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            trusted: trusted.into_iter().collect(),
            bypassed_channels: bypassed_channels.into_iter().collect(),
            upload_chat,
            admins: admins.into_iter().collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let trusted = std::iter::once(config.owner_id).chain(config.trusted_users.iter().copied());

        Self::new(
            trusted,
            config.membership_bypass_chats.iter().copied(),
            config.upload_chat,
            config.admins.iter().copied(),
        )
    }

    /// Trusted identities never need to prove channel membership.
    pub fn skips_membership(&self, user: UserId) -> bool {
        self.trusted.contains(&user)
    }

    /// Membership in a bypassed channel is assumed without asking Telegram.
    pub fn channel_bypassed(&self, channel: &Recipient) -> bool {
        match channel {
            Recipient::Id(chat_id) => self.bypassed_channels.contains(chat_id),
            Recipient::ChannelUsername(_) => false,
        }
    }

    pub fn may_upload(&self, chat: ChatId, user: Option<UserId>) -> bool {
        match (self.upload_chat, user) {
            (Some(upload_chat), Some(user)) => upload_chat == chat && self.admins.contains(&user),
            _ => false,
        }
    }
}
