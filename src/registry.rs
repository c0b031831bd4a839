use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info};
use teloxide::types::Message;
use thiserror::Error;

use crate::db::DbService;
use crate::dto::StoredFileDto;
use crate::helpers::generate_file_token;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("RegistryError.Database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("RegistryError.CorruptRecord: unknown file type {0:?}")]
    CorruptRecord(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Photo => "photo",
            FileKind::Video => "video",
            FileKind::Document => "document",
            FileKind::Audio => "audio",
            FileKind::Voice => "voice",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(FileKind::Photo),
            "video" => Ok(FileKind::Video),
            "document" => Ok(FileKind::Document),
            "audio" => Ok(FileKind::Audio),
            "voice" => Ok(FileKind::Voice),
            other => Err(RegistryError::CorruptRecord(other.to_string())),
        }
    }
}

/// A media reference issued by Telegram. The `file_id` is opaque to us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub file_id: String,
    pub kind: FileKind,
}

impl StoredFile {
    pub fn new(file_id: impl Into<String>, kind: FileKind) -> Self {
        Self {
            file_id: file_id.into(),
            kind,
        }
    }

    /// Picks the media attachment of an uploaded message; for photos the
    /// largest size Telegram offers.
    pub fn from_message(msg: &Message) -> Option<Self> {
        if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
            return Some(Self::new(photo.file.id.0.clone(), FileKind::Photo));
        }
        if let Some(video) = msg.video() {
            return Some(Self::new(video.file.id.0.clone(), FileKind::Video));
        }
        if let Some(document) = msg.document() {
            return Some(Self::new(document.file.id.0.clone(), FileKind::Document));
        }
        if let Some(audio) = msg.audio() {
            return Some(Self::new(audio.file.id.0.clone(), FileKind::Audio));
        }
        msg.voice()
            .map(|voice| Self::new(voice.file.id.0.clone(), FileKind::Voice))
    }
}

impl TryFrom<StoredFileDto> for StoredFile {
    type Error = RegistryError;

    fn try_from(dto: StoredFileDto) -> Result<Self, Self::Error> {
        Ok(Self {
            file_id: dto.file_id,
            kind: dto.file_type.parse()?,
        })
    }
}

/// Append-only mapping from share tokens to stored media.
pub struct FileRegistry {
    db: Arc<DbService>,
}

impl FileRegistry {
    pub fn new(db: Arc<DbService>) -> Self {
        Self { db }
    }

    pub async fn store(&self, file: &StoredFile) -> Result<String, RegistryError> {
        self.store_with(file, generate_file_token).await
    }

    /// Stores `file` under the first token from `next_token` not already taken.
    pub async fn store_with<F>(&self, file: &StoredFile, mut next_token: F) -> Result<String, RegistryError>
    where
        F: FnMut() -> String,
    {
        let mut token = next_token();
        while self.db.file_exists(&token).await? {
            debug!("File token collision on {}, drawing again", token);
            token = next_token();
        }

        self.db
            .insert_file(&token, &file.file_id, file.kind.as_str())
            .await?;

        info!("Stored {} under token {}", file.kind, token);
        Ok(token)
    }

    #[cfg(test)]
    pub fn db(&self) -> &DbService {
        &self.db
    }

    pub async fn lookup(&self, token: &str) -> Result<Option<StoredFile>, RegistryError> {
        match self.db.get_file(token).await? {
            Some(dto) => Ok(Some(StoredFile::try_from(dto)?)),
            None => Ok(None),
        }
    }
}

pub fn build_share_link(bot_username: &str, token: &str) -> String {
    format!("https://t.me/{}?start={}", bot_username, token)
}
