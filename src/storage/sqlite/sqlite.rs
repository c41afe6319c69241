#[cfg(test)]
#[path = "sqlite_test.rs"]
mod tests;

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio_rusqlite::{Connection, OpenFlags, params};

use crate::models::{
    ConversationMeta, DisplayMessage, INTERNAL_FILE_PREFIX, RawFile, SourceFile, title_of,
};
use crate::storage::{Storage, StorageError};

use super::migration::MIGRATION;

pub struct Sqlite {
    conn: Connection,
}

impl Sqlite {
    pub async fn new(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(path) => Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            )
            .await
            .wrap_err(format!("opening database path: {}", path))?,
            None => Connection::open_in_memory()
                .await
                .wrap_err("opening in-memory database")?,
        };

        let ret = Self { conn };
        ret.run_migration().await.wrap_err("running migration")?;
        Ok(ret)
    }

    async fn run_migration(&self) -> Result<()> {
        self.conn
            .call(|conn| Ok(conn.execute_batch(MIGRATION)?))
            .await
            .wrap_err("executing migration")?;
        Ok(())
    }
}

#[async_trait]
impl Storage for Sqlite {
    async fn load_transcript(&self, conversation_id: &str) -> Result<Vec<DisplayMessage>> {
        let id = conversation_id.to_string();
        let raw = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT messages FROM conversations WHERE id = ?")?;
                let mut rows = stmt.query(params![id])?;
                let raw = match rows.next()? {
                    Some(row) => Some(row.get::<_, String>(0)?),
                    None => None,
                };
                Ok(raw)
            })
            .await
            .wrap_err("querying transcript")?;

        let raw = raw.ok_or_else(|| StorageError::NotFound {
            kind: "conversation",
            id: conversation_id.to_string(),
        })?;

        let messages: Vec<DisplayMessage> =
            serde_json::from_str(&raw).wrap_err("parsing transcript")?;
        Ok(messages)
    }

    async fn save_transcript(
        &self,
        conversation_id: &str,
        messages: &[DisplayMessage],
    ) -> Result<()> {
        let id = conversation_id.to_string();
        let title = title_of(messages);
        let raw = serde_json::to_string(messages).wrap_err("serializing transcript")?;
        let now = chrono::Utc::now().timestamp_millis();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO conversations (id, title, messages, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?4)
                    ON CONFLICT(id) DO UPDATE SET
                        title = excluded.title,
                        messages = excluded.messages,
                        updated_at = excluded.updated_at",
                    params![id, title, raw, now],
                )?;
                Ok(())
            })
            .await
            .wrap_err("saving transcript")?;
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationMeta>> {
        let conversations = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, title FROM conversations ORDER BY updated_at DESC, created_at DESC",
                )?;
                let mut rows = stmt.query([])?;
                let mut conversations = vec![];
                while let Some(row) = rows.next()? {
                    let id: String = row.get(0)?;
                    let title: String = row.get(1)?;
                    conversations.push(ConversationMeta::new(id, title));
                }
                Ok(conversations)
            })
            .await
            .wrap_err("listing conversations")?;
        Ok(conversations)
    }

    async fn upload_file(
        &self,
        conversation_id: &str,
        file_id: &str,
        file: &SourceFile,
    ) -> Result<String> {
        let url = file_url(conversation_id, file_id);
        let conversation_id = conversation_id.to_string();
        let file_id = file_id.to_string();
        let file = file.clone();
        let now = chrono::Utc::now().timestamp_millis();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO files (conversation_id, file_id, name, media_type, data, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![conversation_id, file_id, file.name, file.media_type, file.data, now],
                )?;
                Ok(())
            })
            .await
            .wrap_err(format!("uploading file {}", url))?;
        Ok(url)
    }

    async fn fetch_file(&self, url: &str) -> Result<RawFile> {
        let (conversation_id, file_id) = parse_file_url(url)?;
        let file = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT media_type, data FROM files WHERE conversation_id = ?1 AND file_id = ?2",
                )?;
                let mut rows = stmt.query(params![conversation_id, file_id])?;
                let file = match rows.next()? {
                    Some(row) => Some(RawFile {
                        media_type: row.get(0)?,
                        data: row.get(1)?,
                    }),
                    None => None,
                };
                Ok(file)
            })
            .await
            .wrap_err(format!("fetching file {}", url))?;

        let file = file.ok_or_else(|| StorageError::NotFound {
            kind: "file",
            id: url.to_string(),
        })?;
        Ok(file)
    }
}

pub fn file_url(conversation_id: &str, file_id: &str) -> String {
    format!("{}{}/{}", INTERNAL_FILE_PREFIX, conversation_id, file_id)
}

/// Split `/api/files/<conversation>/<file>` into its two ids.
pub fn parse_file_url(url: &str) -> Result<(String, String), StorageError> {
    let invalid = || StorageError::InvalidFileUrl(url.to_string());
    let rest = url.strip_prefix(INTERNAL_FILE_PREFIX).ok_or_else(invalid)?;
    let (conversation_id, file_id) = rest.split_once('/').ok_or_else(invalid)?;
    if conversation_id.is_empty() || file_id.is_empty() || file_id.contains('/') {
        return Err(invalid());
    }
    Ok((conversation_id.to_string(), file_id.to_string()))
}
