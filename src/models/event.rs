use std::sync::Arc;

use tokio::sync::mpsc;

use crate::chat::GenerationStatus;

use super::{ConversationMeta, NoticeMessage};

/// Events published to whatever renders the chat.
#[derive(Debug, Clone)]
pub enum Event {
    Notice(NoticeMessage),

    StatusChanged(GenerationStatus),
    /// The displayed message list of the conversation changed.
    MessagesUpdated(String),
    ConversationsUpdated(Vec<ConversationMeta>),
}

#[macro_export]
macro_rules! notice_info {
    ($msg:expr) => {
        $crate::models::Event::Notice($crate::models::NoticeMessage::info($msg))
    };
    ($msg:expr, $description:expr) => {
        $crate::models::Event::Notice(
            $crate::models::NoticeMessage::info($msg).with_description($description),
        )
    };
}

#[macro_export]
macro_rules! notice_warning {
    ($msg:expr) => {
        $crate::models::Event::Notice($crate::models::NoticeMessage::warning($msg))
    };
    ($msg:expr, $description:expr) => {
        $crate::models::Event::Notice(
            $crate::models::NoticeMessage::warning($msg).with_description($description),
        )
    };
}

#[macro_export]
macro_rules! notice_error {
    ($msg:expr) => {
        $crate::models::Event::Notice($crate::models::NoticeMessage::error($msg))
    };
    ($msg:expr, $description:expr) => {
        $crate::models::Event::Notice(
            $crate::models::NoticeMessage::error($msg).with_description($description),
        )
    };
}

#[async_trait::async_trait]
pub trait EventTx {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>>;
}

#[async_trait::async_trait]
impl EventTx for mpsc::Sender<Event> {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.send(event).await
    }
}

#[async_trait::async_trait]
impl EventTx for mpsc::UnboundedSender<Event> {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.send(event)
    }
}

pub type ArcEventTx = Arc<dyn EventTx + Send + Sync>;

/// Send an event, logging instead of failing when nobody listens anymore.
pub async fn publish(event_tx: &ArcEventTx, event: Event) {
    event_tx.send(event).await.unwrap_or_else(|err| {
        log::error!("Failed to publish event: {}", err);
    });
}
