pub mod sqlite;

use std::sync::Arc;

use crate::{
    config::StorageConfig,
    models::{ConversationMeta, DisplayMessage, RawFile, SourceFile},
};
use async_trait::async_trait;
use eyre::Result;
use sqlite::Sqlite;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, Error, PartialEq)]
pub enum StorageError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid file url: {0}")]
    InvalidFileUrl(String),
}

/// Durable home of transcripts and uploaded files.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Storage {
    /// Full transcript of a conversation. Fails with
    /// [`StorageError::NotFound`] when nothing was saved under the id.
    async fn load_transcript(&self, conversation_id: &str) -> Result<Vec<DisplayMessage>>;

    /// Replace the transcript of a conversation.
    async fn save_transcript(
        &self,
        conversation_id: &str,
        messages: &[DisplayMessage],
    ) -> Result<()>;

    /// Most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<ConversationMeta>>;

    /// Store an attachment and return the internal URL referencing it.
    async fn upload_file(
        &self,
        conversation_id: &str,
        file_id: &str,
        file: &SourceFile,
    ) -> Result<String>;

    async fn fetch_file(&self, url: &str) -> Result<RawFile>;
}

pub type ArcStorage = Arc<dyn Storage + Send + Sync>;

pub async fn new_storage(config: &StorageConfig) -> Result<ArcStorage> {
    let storage = match config {
        StorageConfig::Sqlite(sqlite_config) => {
            Arc::new(Sqlite::new(sqlite_config.path.as_deref()).await?)
        }
    };
    Ok(storage)
}
