use parking_lot::Mutex;

use crate::models::{ArcEventTx, ConversationMeta, Event, publish};
use crate::notice_error;
use crate::storage::ArcStorage;

/// The saved conversations, most recently updated first.
pub struct Conversations {
    list: Mutex<Vec<ConversationMeta>>,
    storage: ArcStorage,
    event_tx: ArcEventTx,
}

impl Conversations {
    pub fn new(storage: ArcStorage, event_tx: ArcEventTx) -> Self {
        Self {
            list: Mutex::new(vec![]),
            storage,
            event_tx,
        }
    }

    pub fn list(&self) -> Vec<ConversationMeta> {
        self.list.lock().clone()
    }

    pub async fn refresh(&self) {
        match self.storage.list_conversations().await {
            Ok(list) => {
                *self.list.lock() = list.clone();
                publish(&self.event_tx, Event::ConversationsUpdated(list)).await;
            }
            Err(err) => {
                log::error!("Failed to list conversations: {:?}", err);
                publish(
                    &self.event_tx,
                    notice_error!("Failed to list conversations", err.to_string()),
                )
                .await;
            }
        }
    }
}
