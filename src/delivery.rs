use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use teloxide::types::{ChatId, MessageId};
use tokio::task::AbortHandle;
use tokio::time::sleep;

use crate::registry::StoredFile;
use crate::transport::{Transport, TransportError};

/// Handle to a pending self-destruct of a delivered message. Dropping it
/// leaves the deletion scheduled; only `cancel` stops it.
#[derive(Debug)]
pub struct ScheduledDeletion {
    handle: AbortHandle,
}

// Delivery callers drop the handle; the deletion then always fires.
#[allow(dead_code)]
impl ScheduledDeletion {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Sends stored files and owns the timers that remove them again. Pending
/// timers live only in this process; a restart loses them.
pub struct Delivery {
    transport: Arc<dyn Transport>,
    delete_after: Duration,
}

impl Delivery {
    pub fn new(transport: Arc<dyn Transport>, delete_after: Duration) -> Self {
        Self {
            transport,
            delete_after,
        }
    }

    pub async fn deliver(
        &self,
        chat_id: ChatId,
        file: &StoredFile,
    ) -> Result<ScheduledDeletion, TransportError> {
        let message_id = self.transport.send_file(chat_id, file).await?;
        info!("Delivered {} to chat_id: {}", file.kind, chat_id);

        Ok(self.schedule_deletion(chat_id, message_id))
    }

    pub fn schedule_deletion(&self, chat_id: ChatId, message_id: MessageId) -> ScheduledDeletion {
        let transport = self.transport.clone();
        let delay = self.delete_after;

        let task = tokio::spawn(async move {
            sleep(delay).await;
            match transport.delete_message(chat_id, message_id).await {
                Ok(()) => info!("Message {} deleted from chat {}", message_id.0, chat_id),
                Err(e) => error!("Failed to delete message {}: {}", message_id.0, e),
            }
        });

        ScheduledDeletion {
            handle: task.abort_handle(),
        }
    }
}
