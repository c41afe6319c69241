#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;

pub mod conversations;
pub mod status;

pub use conversations::Conversations;
pub use status::{GenerationStatus, IllegalTransition, StatusEvent, SubmitAction};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use eyre::Result;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::{ArcEventTx, DisplayMessage, Event, Usage, ValidationError, publish};
use crate::notice_warning;
use crate::prompt::{Prompt, Submitted};
use crate::session::Session;
use crate::transport::{Chunk, SendRequest, Transport, tool_part};

struct Generation {
    id: u64,
    conversation_id: String,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ChatState {
    status: GenerationStatus,
    messages: Vec<DisplayMessage>,
    generation: Option<Generation>,
    next_generation: u64,
}

impl ChatState {
    fn reset(&mut self) {
        self.status = GenerationStatus::Ready;
        self.messages.clear();
        // A running generation keeps going but no longer owns the view
        self.generation = None;
    }
}

/// The conversation on screen: its messages, the generation status and the
/// actions of the input area.
#[derive(Clone)]
pub struct Chat {
    state: Arc<Mutex<ChatState>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    session: Arc<Session>,
    prompt: Arc<Prompt>,
    transport: Transport,
    conversations: Arc<Conversations>,
    event_tx: ArcEventTx,
}

impl Chat {
    pub fn new(
        session: Arc<Session>,
        prompt: Arc<Prompt>,
        transport: Transport,
        conversations: Arc<Conversations>,
        event_tx: ArcEventTx,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChatState::default())),
            tasks: Arc::new(Mutex::new(vec![])),
            session,
            prompt,
            transport,
            conversations,
            event_tx,
        }
    }

    pub fn status(&self) -> GenerationStatus {
        self.state.lock().status.clone()
    }

    pub fn messages(&self) -> Vec<DisplayMessage> {
        self.state.lock().messages.clone()
    }

    pub fn error(&self) -> Option<String> {
        match &self.state.lock().status {
            GenerationStatus::Error(msg) => Some(msg.clone()),
            _ => None,
        }
    }

    /// Token usage of the last step of the displayed conversation.
    pub fn usage(&self) -> Option<Usage> {
        self.session.usage()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn prompt(&self) -> &Arc<Prompt> {
        &self.prompt
    }

    pub fn conversations(&self) -> &Arc<Conversations> {
        &self.conversations
    }

    /// The single submit control: stops a running generation, dismisses an
    /// error, otherwise submits the staged prompt.
    pub async fn handle_submit(&self) -> Result<()> {
        match self.status().submit_action() {
            SubmitAction::Stop => {
                self.stop();
                return Ok(());
            }
            SubmitAction::Dismiss => {
                self.clear_error().await;
                return Ok(());
            }
            SubmitAction::Submit => {}
        }

        let conversation_id = self.session.id();
        let submitted = match self.submit_prompt(&conversation_id).await {
            Ok(Some(submitted)) => submitted,
            Ok(None) => return Ok(()),
            Err(err) => {
                log::warn!("Failed to submit: {:?}", err);
                publish(
                    &self.event_tx,
                    notice_warning!("Failed to submit", err.to_string()),
                )
                .await;
                return Err(err);
            }
        };

        let persona = submitted.options.persona.clone();
        let user_message = submitted.message.into_display_message();
        let cancel = CancellationToken::new();

        let (generation_id, messages, status) = {
            let mut state = self.state.lock();
            let status = match state.status.transition(StatusEvent::Submit) {
                Ok(status) => status,
                Err(err) => {
                    log::warn!("dropping submission: {}", err);
                    return Ok(());
                }
            };
            state.status = status.clone();
            state.messages.push(user_message);
            state.next_generation += 1;
            let generation_id = state.next_generation;
            state.generation = Some(Generation {
                id: generation_id,
                conversation_id: conversation_id.clone(),
                cancel: cancel.clone(),
            });
            (generation_id, state.messages.clone(), status)
        };

        publish(&self.event_tx, Event::StatusChanged(status)).await;
        publish(
            &self.event_tx,
            Event::MessagesUpdated(conversation_id.clone()),
        )
        .await;

        let request = SendRequest {
            conversation_id,
            persona,
            messages,
            cancel,
        };
        let chat = self.clone();
        let handle = tokio::spawn(async move { chat.run_generation(generation_id, request).await });
        self.tasks.lock().push(handle);
        Ok(())
    }

    /// A transcript that is not loaded would be replaced by the next save, so
    /// the prompt stays staged until the load succeeds.
    async fn submit_prompt(&self, conversation_id: &str) -> Result<Option<Submitted>> {
        if self.session.require_loading()
            || self.session.loading()
            || self.session.load_error().is_some()
        {
            return Err(ValidationError::NotLoaded {
                id: conversation_id.to_string(),
            }
            .into());
        }
        self.prompt.submit(conversation_id).await
    }

    /// Cancel the running generation. Stopping twice is harmless.
    pub fn stop(&self) {
        if let Some(generation) = &self.state.lock().generation {
            log::debug!("stopping generation {}", generation.id);
            generation.cancel.cancel();
        }
    }

    pub async fn clear_error(&self) {
        let status = {
            let mut state = self.state.lock();
            match state.status.transition(StatusEvent::Dismiss) {
                Ok(status) => {
                    state.status = status.clone();
                    status
                }
                Err(_) => return,
            }
        };
        publish(&self.event_tx, Event::StatusChanged(status)).await;
    }

    /// Fetch the transcript after navigation. Only applied while the
    /// conversation is still active.
    pub async fn load_messages(&self) {
        let loaded = Arc::new(AtomicBool::new(false));
        self.session
            .load_messages(transcript_applier(self.state.clone(), loaded.clone()))
            .await;
        self.publish_loaded(&loaded).await;
    }

    pub async fn retry_loading(&self) {
        let loaded = Arc::new(AtomicBool::new(false));
        self.session
            .retry_loading(transcript_applier(self.state.clone(), loaded.clone()))
            .await;
        self.publish_loaded(&loaded).await;
    }

    async fn publish_loaded(&self, loaded: &AtomicBool) {
        if loaded.load(Ordering::SeqCst) {
            publish(&self.event_tx, Event::MessagesUpdated(self.session.id())).await;
        }
    }

    pub async fn new_conversation(&self) -> String {
        let id = self.session.new_conversation();
        self.reset_view(&id).await;
        id
    }

    pub async fn navigate_to(&self, id: &str) {
        self.session.navigate_to(id);
        self.reset_view(id).await;
    }

    async fn reset_view(&self, id: &str) {
        self.state.lock().reset();
        publish(&self.event_tx, Event::StatusChanged(GenerationStatus::Ready)).await;
        publish(&self.event_tx, Event::MessagesUpdated(id.to_string())).await;
    }

    /// Wait until every generation started so far has ended.
    pub async fn wait(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                log::error!("generation task failed: {}", err);
            }
        }
    }

    async fn run_generation(&self, generation_id: u64, request: SendRequest) {
        let conversation_id = request.conversation_id.clone();
        let mut stream = match self.transport.send_messages(request).await {
            Ok(stream) => stream,
            Err(err) => {
                log::error!("Failed to start generation: {:?}", err);
                self.apply_status(generation_id, StatusEvent::Fail(err.to_string()))
                    .await;
                return;
            }
        };

        while let Some(chunk) = stream.next().await {
            log::trace!("chunk of {}: {:?}", conversation_id, chunk);
            match chunk {
                Chunk::Start { message_id } => {
                    self.update_messages(generation_id, |messages| {
                        messages.push(DisplayMessage::new_assistant().with_id(message_id));
                    })
                    .await;
                    self.apply_status(generation_id, StatusEvent::FirstChunk)
                        .await;
                }
                Chunk::TextDelta(text) => {
                    self.update_assistant(generation_id, |m| m.append_text(&text))
                        .await;
                }
                Chunk::ReasoningDelta(text) => {
                    self.update_assistant(generation_id, |m| m.append_reasoning(&text))
                        .await;
                }
                Chunk::ToolCall(call) => {
                    self.update_assistant(generation_id, |m| m.push_part(tool_part(&call)))
                        .await;
                }
                Chunk::Usage(usage) => log::debug!("usage of {}: {}", conversation_id, usage),
                Chunk::Finish { .. } => {
                    self.apply_status(generation_id, StatusEvent::Finish).await;
                }
                Chunk::Abort => {
                    self.apply_status(generation_id, StatusEvent::Abort).await;
                }
                Chunk::Error(msg) => {
                    self.apply_status(generation_id, StatusEvent::Fail(msg)).await;
                }
            }
        }
    }

    async fn apply_status(&self, generation_id: u64, event: StatusEvent) {
        let status = {
            let mut state = self.state.lock();
            if !owns_view(&state, generation_id) {
                log::debug!("generation {} no longer displayed", generation_id);
                return;
            }
            match state.status.transition(event) {
                Ok(status) => {
                    if !status.is_busy() {
                        state.generation = None;
                    }
                    state.status = status.clone();
                    status
                }
                Err(err) => {
                    log::warn!("{}", err);
                    return;
                }
            }
        };
        publish(&self.event_tx, Event::StatusChanged(status)).await;
    }

    async fn update_messages(&self, generation_id: u64, f: impl FnOnce(&mut Vec<DisplayMessage>)) {
        let conversation_id = {
            let mut state = self.state.lock();
            let conversation_id = match &state.generation {
                Some(g) if g.id == generation_id => g.conversation_id.clone(),
                _ => return,
            };
            f(&mut state.messages);
            conversation_id
        };
        publish(&self.event_tx, Event::MessagesUpdated(conversation_id)).await;
    }

    async fn update_assistant(&self, generation_id: u64, f: impl FnOnce(&mut DisplayMessage)) {
        self.update_messages(generation_id, |messages| {
            if let Some(last) = messages.last_mut().filter(|m| m.is_assistant()) {
                f(last);
            }
        })
        .await;
    }
}

fn transcript_applier(
    state: Arc<Mutex<ChatState>>,
    loaded: Arc<AtomicBool>,
) -> impl FnOnce(Vec<DisplayMessage>) + Send {
    move |messages| {
        state.lock().messages = messages;
        loaded.store(true, Ordering::SeqCst);
    }
}

fn owns_view(state: &ChatState, generation_id: u64) -> bool {
    matches!(&state.generation, Some(g) if g.id == generation_id)
}
