//! In-process stand-ins for the Bot API used by the handler and web tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use teloxide::types::{
    ChatId, InlineKeyboardButtonKind, InlineKeyboardMarkup, MessageId, Recipient, UserId,
};

use crate::app::App;
use crate::config::Config;
use crate::db::DbService;
use crate::registry::StoredFile;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text {
        chat_id: ChatId,
        text: String,
        keyboard: Option<InlineKeyboardMarkup>,
    },
    Plain {
        chat_id: ChatId,
        text: String,
    },
    Edit {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
    },
    File {
        chat_id: ChatId,
        file: StoredFile,
    },
}

impl Sent {
    pub fn text(&self) -> Option<&str> {
        match self {
            Sent::Text { text, .. } | Sent::Plain { text, .. } | Sent::Edit { text, .. } => {
                Some(text.as_str())
            }
            Sent::File { .. } => None,
        }
    }

    pub fn urls(&self) -> Vec<String> {
        let Sent::Text {
            keyboard: Some(keyboard),
            ..
        } = self
        else {
            return vec![];
        };

        keyboard
            .inline_keyboard
            .iter()
            .flatten()
            .filter_map(|button| match &button.kind {
                InlineKeyboardButtonKind::Url(url) => Some(url.to_string()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Default)]
pub struct StubTransport {
    sent: Mutex<Vec<Sent>>,
    deleted: Mutex<Vec<(ChatId, MessageId)>>,
    members: Mutex<HashSet<UserId>>,
    next_id: AtomicI32,
    membership_fails: AtomicBool,
    sends_fail: AtomicBool,
    deletes_fail: AtomicBool,
}

impl StubTransport {
    pub fn add_member(&self, user: UserId) {
        self.members.lock().unwrap().insert(user);
    }

    pub fn fail_membership(&self) {
        self.membership_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_sends(&self) {
        self.sends_fail.store(true, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self) {
        self.deletes_fail.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<(ChatId, MessageId)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn files_sent(&self) -> Vec<(ChatId, StoredFile)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::File { chat_id, file } => Some((chat_id, file)),
                _ => None,
            })
            .collect()
    }

    pub fn last_message_id(&self) -> MessageId {
        MessageId(self.next_id.load(Ordering::SeqCst))
    }

    fn record(&self, sent: Sent) -> Result<MessageId, TransportError> {
        if self.sends_fail.load(Ordering::SeqCst) {
            return Err(TransportError::BotBlocked);
        }
        self.sent.lock().unwrap().push(sent);
        Ok(MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<MessageId, TransportError> {
        self.record(Sent::Text {
            chat_id,
            text: text.to_string(),
            keyboard,
        })
    }

    async fn send_plain(&self, chat_id: ChatId, text: &str) -> Result<MessageId, TransportError> {
        self.record(Sent::Plain {
            chat_id,
            text: text.to_string(),
        })
    }

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<(), TransportError> {
        self.record(Sent::Edit {
            chat_id,
            message_id,
            text: text.to_string(),
        })
        .map(|_| ())
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), TransportError> {
        if self.deletes_fail.load(Ordering::SeqCst) {
            return Err(TransportError::BotBlocked);
        }
        self.deleted.lock().unwrap().push((chat_id, message_id));
        Ok(())
    }

    async fn send_file(&self, chat_id: ChatId, file: &StoredFile) -> Result<MessageId, TransportError> {
        self.record(Sent::File {
            chat_id,
            file: file.clone(),
        })
    }

    async fn is_member(&self, _channel: &Recipient, user: UserId) -> Result<bool, TransportError> {
        if self.membership_fails.load(Ordering::SeqCst) {
            return Err(TransportError::RateLimited(None));
        }
        Ok(self.members.lock().unwrap().contains(&user))
    }

    async fn channel_link(&self, channel: &Recipient) -> Result<String, TransportError> {
        match channel {
            Recipient::ChannelUsername(name) => {
                Ok(format!("https://t.me/{}", name.trim_start_matches('@')))
            }
            Recipient::Id(_) => Ok("https://t.me/+invite".to_string()),
        }
    }
}

pub const OWNER: UserId = UserId(42);
pub const ADMIN: UserId = UserId(7);
pub const UPLOAD_CHAT: ChatId = ChatId(-100500);

pub fn test_config() -> Config {
    let vars = [
        ("BOT_TOKEN", "123:abc"),
        ("DATABASE_URL", "sqlite::memory:"),
        ("PUBLIC_URL", "https://gate.example.com"),
        ("CHANNEL_ID", "@examplechannel"),
        ("OWNER_ID", "42"),
        ("PRIVATE_GROUP_ID", "-100500"),
        ("ADMINS", "7"),
    ];

    Config::from_lookup(|key| {
        vars.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    })
    .unwrap()
}

pub async fn test_app() -> (Arc<App>, Arc<StubTransport>) {
    let transport = Arc::new(StubTransport::default());
    let db = Arc::new(DbService::new_in_memory().await.unwrap());
    let app = App::new(&test_config(), db, transport.clone(), "media_gate_bot".to_string());

    (Arc::new(app), transport)
}
