#[cfg(test)]
#[path = "prompt_test.rs"]
mod tests;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Context, Result};
use futures::future::try_join_all;
use parking_lot::Mutex;

use crate::models::{
    ArcEventTx, Attachment, DisplayMessage, Part, Persona, Role, SourceFile, ValidationError,
    guess_media_type, publish,
};
use crate::notice_error;
use crate::session::Session;
use crate::storage::ArcStorage;

/// What a submission sends to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmittedMessage {
    Text {
        text: String,
        files: Option<Vec<Part>>,
    },
    Files {
        files: Vec<Part>,
    },
}

impl SubmittedMessage {
    /// The user message shown in the transcript: files first, then text.
    pub fn into_display_message(self) -> DisplayMessage {
        let (text, files) = match self {
            SubmittedMessage::Text { text, files } => (Some(text), files.unwrap_or_default()),
            SubmittedMessage::Files { files } => (None, files),
        };
        let mut message = DisplayMessage::new(Role::User).with_parts(files);
        if let Some(text) = text {
            message.push_part(Part::text(text));
        }
        message
    }
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub conversation_id: String,
    pub persona: Arc<Persona>,
}

#[derive(Debug, Clone)]
pub struct Submitted {
    pub message: SubmittedMessage,
    pub options: RequestOptions,
}

#[derive(Default)]
struct PromptState {
    text: String,
    attachments: Vec<Attachment>,
    persona: Option<Arc<Persona>>,
    submitting: bool,
}

/// Clears the in-flight flag however the submission ends.
struct SubmitGuard<'a>(&'a Mutex<PromptState>);

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().submitting = false;
    }
}

/// Staging area of the next user message.
pub struct Prompt {
    state: Mutex<PromptState>,
    session: Arc<Session>,
    storage: ArcStorage,
    event_tx: ArcEventTx,
}

impl Prompt {
    pub fn new(session: Arc<Session>, storage: ArcStorage, event_tx: ArcEventTx) -> Self {
        Self {
            state: Mutex::new(PromptState::default()),
            session,
            storage,
            event_tx,
        }
    }

    pub fn select_persona(&self, persona: Arc<Persona>) {
        log::debug!("selected persona {}", persona.id());
        self.state.lock().persona = Some(persona);
    }

    pub fn change_text(&self, text: impl Into<String>) {
        self.state.lock().text = text.into();
    }

    /// Read and stage files from disk. Either every file is staged or none.
    pub async fn add_files(&self, paths: Vec<PathBuf>) -> Result<Vec<String>> {
        let files = try_join_all(paths.iter().map(|p| read_source_file(p))).await;
        match files {
            Ok(files) => Ok(self.add_sources(files)),
            Err(err) => {
                log::error!("Failed to read files: {:?}", err);
                publish(
                    &self.event_tx,
                    notice_error!("Failed to read files", err.to_string()),
                )
                .await;
                Err(err)
            }
        }
    }

    pub fn add_sources(&self, files: Vec<SourceFile>) -> Vec<String> {
        let attachments = files.into_iter().map(Attachment::new).collect::<Vec<_>>();
        let ids = attachments
            .iter()
            .map(|a| a.id().to_string())
            .collect::<Vec<_>>();
        self.state.lock().attachments.extend(attachments);
        ids
    }

    /// Stage a note as a markdown attachment named after its title.
    pub fn add_note(&self, title: &str, content: &str) -> String {
        let file = SourceFile::new(
            format!("{}.md", title),
            "text/markdown",
            content.as_bytes().to_vec(),
        );
        let mut ids = self.add_sources(vec![file]);
        ids.pop().unwrap_or_default()
    }

    pub fn remove_file(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let len = state.attachments.len();
        state.attachments.retain(|a| a.id() != id);
        len != state.attachments.len()
    }

    pub fn text(&self) -> String {
        self.state.lock().text.clone()
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.state.lock().attachments.clone()
    }

    pub fn persona(&self) -> Option<Arc<Persona>> {
        self.state.lock().persona.clone()
    }

    pub fn is_submitting(&self) -> bool {
        self.state.lock().submitting
    }

    /// Validate, upload and package the staged content for
    /// `conversation_id`. Returns `Ok(None)` when there is nothing to send,
    /// when another submission is in flight, or when the conversation is no
    /// longer active once the uploads finish.
    pub async fn submit(&self, conversation_id: &str) -> Result<Option<Submitted>> {
        let (text, attachments, persona) = {
            let mut state = self.state.lock();
            if state.submitting {
                log::debug!("submission already in flight");
                return Ok(None);
            }

            let persona = match &state.persona {
                Some(persona) => persona.clone(),
                None => return Err(ValidationError::NoPersona.into()),
            };

            if let Some(unsupported) = state
                .attachments
                .iter()
                .find(|a| !persona.supports_file(a.media_type()))
            {
                return Err(ValidationError::UnsupportedFile {
                    filename: unsupported.name().to_string(),
                }
                .into());
            }

            if state.text.is_empty() && state.attachments.is_empty() {
                return Ok(None);
            }

            state.submitting = true;
            (state.text.clone(), state.attachments.clone(), persona)
        };
        let _guard = SubmitGuard(&self.state);

        let uploads = attachments.iter().map(|a| async move {
            let url = self
                .storage
                .upload_file(conversation_id, a.id(), a.file())
                .await
                .wrap_err(format!("uploading file {}", a.name()))?;
            Ok::<_, eyre::Report>(Part::file(url, a.media_type(), Some(a.name().to_string())))
        });
        let files = try_join_all(uploads).await?;

        // Lock order: prompt, then session
        let mut state = self.state.lock();
        if !self.session.is_active(conversation_id) {
            log::debug!(
                "conversation {} changed during upload, dropping submission",
                conversation_id
            );
            return Ok(None);
        }

        let message = if !text.is_empty() {
            SubmittedMessage::Text {
                text,
                files: if files.is_empty() { None } else { Some(files) },
            }
        } else {
            SubmittedMessage::Files { files }
        };

        let submitted = attachments.iter().map(|a| a.id()).collect::<HashSet<_>>();
        state.text.clear();
        state.attachments.retain(|a| !submitted.contains(a.id()));

        Ok(Some(Submitted {
            message,
            options: RequestOptions {
                conversation_id: conversation_id.to_string(),
                persona,
            },
        }))
    }
}

async fn read_source_file(path: &Path) -> Result<SourceFile> {
    let data = tokio::fs::read(path)
        .await
        .wrap_err(format!("reading file {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| eyre::eyre!("invalid file path: {}", path.display()))?;
    let media_type = guess_media_type(&name);
    Ok(SourceFile::new(name, media_type, data))
}
