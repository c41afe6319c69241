#[cfg(test)]
#[path = "convert_test.rs"]
mod tests;

use eyre::{Context, Result};
use serde_json::Value;

use crate::models::{
    DisplayMessage, FileContent, ModelContent, ModelMessage, ModelRole, Part, Role, ToolCall,
    is_internal_file,
};
use crate::session::Session;
use crate::storage::ArcStorage;

/// Text sent in place of a textual file so models without file support can
/// still read it.
pub fn summary_text(filename: Option<&str>, content: &str) -> String {
    let filename = filename.map(|f| format!(" '{}'", f)).unwrap_or_default();
    format!(
        "Summarized by AI, the content of file{} is:\n\n{}",
        filename, content
    )
}

/// Convert a transcript into model messages. Files stored by this client are
/// resolved through the session file cache, fetching and caching on a miss.
pub async fn convert_messages(
    session: &Session,
    storage: &ArcStorage,
    conversation_id: &str,
    messages: &[DisplayMessage],
) -> Result<Vec<ModelMessage>> {
    let mut converted = vec![];
    for message in messages {
        match message.role() {
            Role::User => {
                let mut content = vec![];
                for part in message.parts() {
                    if let Some(c) = convert_part(session, storage, conversation_id, part).await? {
                        content.push(c);
                    }
                }
                if !content.is_empty() {
                    converted.push(ModelMessage::new(ModelRole::User, content));
                }
            }
            Role::Assistant => {
                let mut step = AssistantStep::default();
                for part in message.parts() {
                    match part {
                        Part::ToolInvocation {
                            tool_call_id,
                            tool_name,
                            input,
                            output,
                            ..
                        } => step.tool_invocation(tool_call_id, tool_name, input, output.as_ref()),
                        part => {
                            if let Some(c) =
                                convert_part(session, storage, conversation_id, part).await?
                            {
                                step.content(c, &mut converted);
                            }
                        }
                    }
                }
                step.flush(&mut converted);
            }
            Role::System => log::debug!("skipping system message {}", message.id()),
        }
    }
    Ok(converted)
}

async fn convert_part(
    session: &Session,
    storage: &ArcStorage,
    conversation_id: &str,
    part: &Part,
) -> Result<Option<ModelContent>> {
    let content = match part {
        Part::Text { text } => ModelContent::Text(text.clone()),
        Part::Reasoning { text } => ModelContent::Reasoning(text.clone()),
        Part::File {
            url,
            media_type,
            filename,
        } if is_internal_file(url) => {
            match resolve_file(session, storage, conversation_id, url).await? {
                FileContent::Text(text) => {
                    ModelContent::Text(summary_text(filename.as_deref(), &text))
                }
                FileContent::Binary(data) => ModelContent::File {
                    data,
                    media_type: media_type.clone(),
                    filename: filename.clone(),
                },
            }
        }
        Part::File {
            url, media_type, ..
        } => ModelContent::FileUrl {
            url: url.clone(),
            media_type: media_type.clone(),
        },
        // Citations are for the reader only
        Part::SourceUrl { .. } => return Ok(None),
        Part::ToolInvocation { .. } => return Ok(None),
    };
    Ok(Some(content))
}

/// Content of a stored file, from the cache when possible.
pub async fn resolve_file(
    session: &Session,
    storage: &ArcStorage,
    conversation_id: &str,
    url: &str,
) -> Result<FileContent> {
    if let Some(content) = session.cached_file(conversation_id, url) {
        log::trace!("file cache hit: {}", url);
        return Ok(content);
    }

    let raw = storage
        .fetch_file(url)
        .await
        .wrap_err(format!("fetching file {}", url))?;
    let content = FileContent::from(raw);
    session.update_file_cache_entry(conversation_id, url, content.clone());
    Ok(content)
}

/// Splits an assistant message into model steps: the calls of a step are
/// followed by a tool message carrying their results.
#[derive(Default)]
struct AssistantStep {
    content: Vec<ModelContent>,
    results: Vec<ModelContent>,
}

impl AssistantStep {
    fn content(&mut self, content: ModelContent, out: &mut Vec<ModelMessage>) {
        if !self.results.is_empty() {
            self.flush(out);
        }
        self.content.push(content);
    }

    fn tool_invocation(
        &mut self,
        tool_call_id: &str,
        tool_name: &str,
        input: &Value,
        output: Option<&Value>,
    ) {
        // Calls without a result cannot be replayed
        let output = match output {
            Some(output) => output.clone(),
            None => {
                log::debug!("skipping unfinished tool call {}", tool_call_id);
                return;
            }
        };

        self.content.push(ModelContent::ToolCall(ToolCall {
            id: tool_call_id.to_string(),
            name: tool_name.to_string(),
            arguments: input.to_string(),
        }));
        self.results.push(ModelContent::ToolResult {
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            output,
        });
    }

    fn flush(&mut self, out: &mut Vec<ModelMessage>) {
        if !self.content.is_empty() {
            out.push(ModelMessage::new(
                ModelRole::Assistant,
                std::mem::take(&mut self.content),
            ));
        }
        if !self.results.is_empty() {
            out.push(ModelMessage::new(
                ModelRole::Tool,
                std::mem::take(&mut self.results),
            ));
        }
    }
}
