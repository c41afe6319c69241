#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::models::{
    ArcEventTx, DisplayMessage, FileContent, Usage, new_conversation_id, publish,
};
use crate::notice_error;
use crate::storage::ArcStorage;

/// Ephemeral state of the conversation currently shown. Everything besides
/// `id` is reset whenever the active conversation changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub id: String,
    pub require_loading: bool,
    pub loading: bool,
    pub load_error: Option<String>,
    pub usage: Option<Usage>,
    pub file_cache: HashMap<String, FileContent>,
    pub checkpoint: usize,
}

impl SessionState {
    fn reset(&mut self, id: String, require_loading: bool) {
        *self = SessionState {
            id,
            require_loading,
            ..Default::default()
        };
    }
}

/// Tracks which conversation is active. Every mutator that originates from
/// asynchronous work takes the id it was started for and is ignored once
/// that conversation is no longer active.
pub struct Session {
    state: Mutex<SessionState>,
    storage: ArcStorage,
    event_tx: ArcEventTx,
}

impl Session {
    pub fn new(storage: ArcStorage, event_tx: ArcEventTx) -> Self {
        let mut state = SessionState::default();
        state.reset(new_conversation_id(), false);
        Self {
            state: Mutex::new(state),
            storage,
            event_tx,
        }
    }

    /// Start a blank conversation and return its id.
    pub fn new_conversation(&self) -> String {
        let id = new_conversation_id();
        self.state.lock().reset(id.clone(), false);
        log::debug!("started conversation {}", id);
        id
    }

    /// Make `id` active. The transcript is fetched by the next
    /// [`Session::load_messages`].
    pub fn navigate_to(&self, id: &str) {
        self.state.lock().reset(id.to_string(), true);
        log::debug!("navigated to conversation {}", id);
    }

    /// Fetch the transcript of the active conversation if it still needs
    /// loading. `apply` receives the messages only when the conversation is
    /// still active once the fetch completes; it runs while the session is
    /// locked and must not call back into the session.
    pub async fn load_messages<F>(&self, apply: F)
    where
        F: FnOnce(Vec<DisplayMessage>) + Send,
    {
        let id = {
            let mut state = self.state.lock();
            if !state.require_loading || state.loading {
                return;
            }
            state.loading = true;
            state.require_loading = false;
            state.load_error = None;
            state.id.clone()
        };

        log::debug!("loading transcript of {}", id);
        let result = self.storage.load_transcript(&id).await;

        let failure = {
            let mut state = self.state.lock();
            let active = state.id == id;
            if active {
                state.loading = false;
            }

            match result {
                Ok(messages) if active => {
                    log::debug!("loaded {} messages of {}", messages.len(), id);
                    state.checkpoint = messages.len();
                    apply(messages);
                    None
                }
                Ok(_) => {
                    log::debug!("discarding stale transcript of {}", id);
                    None
                }
                Err(err) => {
                    log::error!("Failed to load conversation {}: {:?}", id, err);
                    if active {
                        state.load_error = Some(err.to_string());
                        Some(err)
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(err) = failure {
            publish(
                &self.event_tx,
                notice_error!("Failed to load conversation", err.to_string()),
            )
            .await;
        }
    }

    /// Explicit retry after a failed load.
    pub async fn retry_loading<F>(&self, apply: F)
    where
        F: FnOnce(Vec<DisplayMessage>) + Send,
    {
        {
            let mut state = self.state.lock();
            if state.loading {
                return;
            }
            state.require_loading = true;
        }
        self.load_messages(apply).await;
    }

    pub fn update_usage(&self, id: &str, usage: Usage) -> bool {
        self.update(id, |state| state.usage = Some(usage))
    }

    pub fn update_file_cache_entry(&self, id: &str, url: &str, content: FileContent) -> bool {
        self.update(id, |state| {
            state.file_cache.insert(url.to_string(), content);
        })
    }

    pub fn update_checkpoint(&self, id: &str, checkpoint: usize) -> bool {
        self.update(id, |state| state.checkpoint = checkpoint)
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut SessionState)) -> bool {
        let mut state = self.state.lock();
        if state.id != id {
            log::debug!("ignoring update for inactive conversation {}", id);
            return false;
        }
        f(&mut state);
        true
    }

    pub fn id(&self) -> String {
        self.state.lock().id.clone()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.state.lock().id == id
    }

    pub fn loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn require_loading(&self) -> bool {
        self.state.lock().require_loading
    }

    pub fn load_error(&self) -> Option<String> {
        self.state.lock().load_error.clone()
    }

    pub fn usage(&self) -> Option<Usage> {
        self.state.lock().usage.clone()
    }

    pub fn checkpoint(&self) -> usize {
        self.state.lock().checkpoint
    }

    /// Cached content of a file reference, only for `id` while it is active.
    pub fn cached_file(&self, id: &str, url: &str) -> Option<FileContent> {
        let state = self.state.lock();
        if state.id != id {
            return None;
        }
        state.file_cache.get(url).cloned()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn storage(&self) -> &ArcStorage {
        &self.storage
    }
}
