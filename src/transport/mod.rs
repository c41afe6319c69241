#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;

pub mod convert;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::Result;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::backend::ArcBackend;
use crate::chat::Conversations;
use crate::models::{
    ArcEventTx, CompletionEvent, CompletionRequest, DisplayMessage, Part, Persona, ToolCall,
    ToolState, TransportError, Usage, publish,
};
use crate::session::Session;
use crate::storage::ArcStorage;
use crate::{notice_info, notice_warning};

/// Increments of a generation as seen by the chat.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Start { message_id: String },
    TextDelta(String),
    ReasoningDelta(String),
    ToolCall(ToolCall),
    Usage(Usage),
    Finish { finish_reason: Option<String> },
    Abort,
    Error(String),
}

pub type ChunkStream = BoxStream<'static, Chunk>;

pub struct SendRequest {
    pub conversation_id: String,
    pub persona: Arc<Persona>,
    /// The full transcript, ending with the new user message.
    pub messages: Vec<DisplayMessage>,
    pub cancel: CancellationToken,
}

/// Bridges a transcript to the model and the answer back to the chat.
#[derive(Clone)]
pub struct Transport {
    session: Arc<Session>,
    storage: ArcStorage,
    backend: ArcBackend,
    conversations: Arc<Conversations>,
    event_tx: ArcEventTx,
}

impl Transport {
    pub fn new(
        session: Arc<Session>,
        storage: ArcStorage,
        backend: ArcBackend,
        conversations: Arc<Conversations>,
        event_tx: ArcEventTx,
    ) -> Self {
        Self {
            session,
            storage,
            backend,
            conversations,
            event_tx,
        }
    }

    /// Start a generation for `request.conversation_id`. The returned stream
    /// is lazy and ends with exactly one of `Finish`, `Abort` or `Error`. A
    /// finished generation is saved once, together with the history it
    /// answered.
    pub async fn send_messages(&self, request: SendRequest) -> Result<ChunkStream> {
        let SendRequest {
            conversation_id,
            persona,
            messages,
            cancel,
        } = request;

        if !self.session.is_active(&conversation_id) {
            return Err(TransportError::ConversationChanged {
                expected: conversation_id,
                current: self.session.id(),
            }
            .into());
        }

        let converted =
            convert::convert_messages(&self.session, &self.storage, &conversation_id, &messages)
                .await?;

        let completion_req = CompletionRequest::new(persona.provider(), persona.model())
            .with_system_prompt(persona.system_prompt())
            .with_sampling(persona.sampling().clone())
            .with_messages(converted);

        log::debug!(
            "sending {} messages of {} to {}/{}",
            messages.len(),
            conversation_id,
            persona.provider(),
            persona.model()
        );

        let mut completion = self
            .backend
            .stream_completion(completion_req, cancel.clone())
            .await?;

        let this = self.clone();
        let saved = AtomicBool::new(false);
        let stream = async_stream::stream! {
            let mut assistant = DisplayMessage::new_assistant();
            yield Chunk::Start { message_id: assistant.id().to_string() };

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    event = completion.next() => Some(event),
                };

                let event = match next {
                    Some(Some(event)) => event,
                    Some(None) if !cancel.is_cancelled() => {
                        yield Chunk::Error("model stream ended before finishing".to_string());
                        break;
                    }
                    _ => {
                        log::debug!("generation of {} aborted", conversation_id);
                        yield Chunk::Abort;
                        break;
                    }
                };

                match event {
                    Ok(CompletionEvent::TextDelta(text)) => {
                        assistant.append_text(&text);
                        yield Chunk::TextDelta(text);
                    }
                    Ok(CompletionEvent::ReasoningDelta(text)) => {
                        assistant.append_reasoning(&text);
                        yield Chunk::ReasoningDelta(text);
                    }
                    Ok(CompletionEvent::ToolCall(call)) => {
                        assistant.push_part(tool_part(&call));
                        yield Chunk::ToolCall(call);
                    }
                    Ok(CompletionEvent::StepFinish { usage, .. }) => {
                        if let Some(usage) = usage {
                            this.session.update_usage(&conversation_id, usage.clone());
                            yield Chunk::Usage(usage);
                        }
                    }
                    Ok(CompletionEvent::Finish { finish_reason, .. }) => {
                        this.persist(&saved, &conversation_id, &messages, assistant.clone())
                            .await;
                        yield Chunk::Finish { finish_reason };
                        break;
                    }
                    Err(err) => {
                        log::error!("generation of {} failed: {:?}", conversation_id, err);
                        yield Chunk::Error(err.to_string());
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Generations are not resumable.
    pub async fn reconnect_to_stream(&self, _conversation_id: &str) -> Option<ChunkStream> {
        None
    }

    async fn persist(
        &self,
        saved: &AtomicBool,
        conversation_id: &str,
        history: &[DisplayMessage],
        assistant: DisplayMessage,
    ) {
        if saved.swap(true, Ordering::SeqCst) {
            log::debug!("transcript of {} already saved", conversation_id);
            return;
        }

        let mut transcript = history.to_vec();
        transcript.push(assistant);

        if self.session.is_active(conversation_id) && transcript.len() <= self.session.checkpoint()
        {
            log::debug!("transcript of {} is not ahead of its checkpoint", conversation_id);
            return;
        }

        match self
            .storage
            .save_transcript(conversation_id, &transcript)
            .await
        {
            Ok(()) => {
                log::info!(
                    "saved {} messages of {}",
                    transcript.len(),
                    conversation_id
                );
                self.session
                    .update_checkpoint(conversation_id, transcript.len());
                if self.session.is_active(conversation_id) {
                    publish(&self.event_tx, notice_info!("Conversation saved")).await;
                }
                self.conversations.refresh().await;
            }
            Err(err) => {
                log::error!("Failed to save {}: {:?}", conversation_id, err);
                if self.session.is_active(conversation_id) {
                    publish(
                        &self.event_tx,
                        notice_warning!("Failed to save conversation", err.to_string()),
                    )
                    .await;
                }
            }
        }
    }
}

/// Display form of a tool call requested by the model.
pub fn tool_part(call: &ToolCall) -> Part {
    let input = serde_json::from_str(&call.arguments)
        .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone()));
    Part::ToolInvocation {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        input,
        output: None,
        state: ToolState::InputAvailable,
    }
}
