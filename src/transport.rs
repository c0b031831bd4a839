use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use teloxide::payloads::{
    EditMessageTextSetters, SendAudioSetters, SendDocumentSetters, SendMessageSetters,
    SendPhotoSetters, SendVideoSetters, SendVoiceSetters,
};
use teloxide::requests::Requester;
use teloxide::types::{
    ChatId, ChatMemberStatus, FileId, InlineKeyboardMarkup, InputFile, MessageId, ParseMode,
    Recipient, UserId,
};
use teloxide::{ApiError, Bot, RequestError};
use thiserror::Error;

use crate::registry::{FileKind, StoredFile};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("TransportError.RateLimited: retry after {0:?}")]
    RateLimited(Option<Duration>),
    #[error("TransportError.BotBlocked")]
    BotBlocked,
    #[error("TransportError.Telegram: {0}")]
    Telegram(RequestError),
}

impl From<RequestError> for TransportError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::RetryAfter(seconds) => TransportError::RateLimited(Some(seconds.duration())),
            RequestError::Api(ApiError::BotBlocked) => TransportError::BotBlocked,
            RequestError::Api(ApiError::Unknown(ref description))
                if description.contains("Too Many Requests") =>
            {
                debug!("Rate limited without a retry hint: {}", description);
                TransportError::RateLimited(None)
            }
            other => TransportError::Telegram(other),
        }
    }
}

/// The slice of the Bot API this service talks to. Formatted text is HTML.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<MessageId, TransportError>;

    /// Sends `text` verbatim, without any parse mode.
    async fn send_plain(&self, chat_id: ChatId, text: &str) -> Result<MessageId, TransportError>;

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), TransportError>;

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), TransportError>;

    /// Sends a stored file with content protection on.
    async fn send_file(&self, chat_id: ChatId, file: &StoredFile) -> Result<MessageId, TransportError>;

    async fn is_member(&self, channel: &Recipient, user: UserId) -> Result<bool, TransportError>;

    /// A link users can follow to join `channel`.
    async fn channel_link(&self, channel: &Recipient) -> Result<String, TransportError>;
}

#[async_trait]
impl Transport for Bot {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<MessageId, TransportError> {
        let mut request = self.send_message(chat_id, text).parse_mode(ParseMode::Html);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(keyboard);
        }

        Ok(request.await?.id)
    }

    async fn send_plain(&self, chat_id: ChatId, text: &str) -> Result<MessageId, TransportError> {
        Ok(self.send_message(chat_id, text).await?.id)
    }

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), TransportError> {
        self.edit_message_text(chat_id, message_id, text)
            .parse_mode(ParseMode::Html)
            .await?;

        Ok(())
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), TransportError> {
        Requester::delete_message(self, chat_id, message_id).await?;

        Ok(())
    }

    async fn send_file(&self, chat_id: ChatId, file: &StoredFile) -> Result<MessageId, TransportError> {
        let input = InputFile::file_id(FileId(file.file_id.clone()));

        let sent = match file.kind {
            FileKind::Photo => self.send_photo(chat_id, input).protect_content(true).await?,
            FileKind::Video => self.send_video(chat_id, input).protect_content(true).await?,
            FileKind::Document => self.send_document(chat_id, input).protect_content(true).await?,
            FileKind::Audio => self.send_audio(chat_id, input).protect_content(true).await?,
            FileKind::Voice => self.send_voice(chat_id, input).protect_content(true).await?,
        };

        Ok(sent.id)
    }

    async fn is_member(&self, channel: &Recipient, user: UserId) -> Result<bool, TransportError> {
        let member = self.get_chat_member(channel.clone(), user).await?;

        Ok(matches!(
            member.status(),
            ChatMemberStatus::Owner | ChatMemberStatus::Administrator | ChatMemberStatus::Member
        ))
    }

    async fn channel_link(&self, channel: &Recipient) -> Result<String, TransportError> {
        match channel {
            Recipient::ChannelUsername(name) => {
                Ok(format!("https://t.me/{}", name.trim_start_matches('@')))
            }
            Recipient::Id(_) => Ok(self.export_chat_invite_link(channel.clone()).await?),
        }
    }
}
