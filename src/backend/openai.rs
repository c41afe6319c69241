#[cfg(test)]
#[path = "openai_test.rs"]
mod tests;

use crate::backend::{ArcBackend, Backend, CompletionStream};
use crate::config::user_agent;
use crate::models::{
    BackendConnection, CompletionEvent, CompletionRequest, ModelContent, ModelMessage, ModelRole,
    ToolCall, Usage,
};
use async_trait::async_trait;
use base64::Engine;
use eyre::{Context, Result, bail};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::{fmt::Display, time};
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

/// Client for OpenAI compatible chat completion endpoints. DeepSeek speaks
/// the same protocol and is served by this client too.
pub struct OpenAI {
    alias: String,
    endpoint: String,
    api_key: Option<String>,
    timeout: Option<time::Duration>,
}

#[async_trait]
impl Backend for OpenAI {
    fn name(&self) -> &str {
        &self.alias
    }

    async fn stream_completion(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionStream> {
        if request.model().is_empty() {
            bail!("no model is set");
        }

        let completion_req = ChatCompletionRequest::from(&request);

        let mut req = reqwest::Client::new()
            .post(format!("{}/v1/chat/completions", self.endpoint))
            .header("Content-Type", "application/json")
            .header("User-Agent", user_agent());

        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        if let Some(token) = &self.api_key {
            req = req.bearer_auth(token);
        }

        log::trace!("Sending completion request: {:?}", completion_req);

        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("completion cancelled before the response arrived");
                return Ok(Box::pin(futures::stream::empty()));
            }
            res = req.json(&completion_req).send() => res.wrap_err("sending completion request")?,
        };

        if !res.status().is_success() {
            let http_code = res.status().as_u16();
            let resp = res.text().await.wrap_err("parsing error response")?;
            log::error!("Error response: {}", resp);
            let err = serde_json::from_str::<ErrorResponse>(&resp)
                .wrap_err(format!("parsing error response: {}", resp))?;
            let mut err = err.error;
            err.http_code = http_code;
            return Err(err.into());
        }

        let stream = res
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()));
        let mut line_readers = StreamReader::new(stream).lines();

        let stream = async_stream::try_stream! {
            let mut state = StreamState::default();
            let mut cancelled = false;
            while !state.done {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    line = line_readers.next_line() => Some(line),
                };

                let line = match next {
                    Some(line) => line.wrap_err("reading completion stream")?,
                    None => {
                        cancelled = true;
                        break;
                    }
                };

                let line = match line {
                    Some(line) => line,
                    None => break,
                };

                for event in state.handle_line(&line)? {
                    yield event;
                }
            }

            if cancelled {
                log::debug!("completion stream cancelled");
            } else if !state.is_complete() {
                log::error!("completion stream closed before [DONE]");
                Err::<(), _>(eyre::eyre!("completion stream closed before [DONE]"))?;
            } else {
                for event in state.finish() {
                    yield event;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

impl From<OpenAI> for ArcBackend {
    fn from(value: OpenAI) -> Self {
        Arc::new(value)
    }
}

impl From<&BackendConnection> for OpenAI {
    fn from(value: &BackendConnection) -> Self {
        let endpoint = if value.endpoint().is_empty() {
            value.kind().default_endpoint()
        } else {
            value.endpoint()
        };
        let mut openai = OpenAI::default().with_endpoint(endpoint);
        openai.alias = value.name();

        if let Some(api_key) = value.api_key() {
            openai.api_key = Some(api_key.to_string());
        }

        if let Some(timeout) = value.timeout() {
            openai.timeout = Some(timeout);
        }

        openai
    }
}

impl OpenAI {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = alias.to_string();
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.trim_end_matches('/').to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn timeout(&self) -> Option<time::Duration> {
        self.timeout
    }
}

impl Default for OpenAI {
    fn default() -> Self {
        Self {
            alias: "openai".to_string(),
            endpoint: "https://api.openai.com".to_string(),
            api_key: None,
            timeout: None,
        }
    }
}

/// Accumulates server-sent chunks into completion events.
#[derive(Default)]
struct StreamState {
    tool_calls: BTreeMap<usize, ToolCallResponse>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    done: bool,
}

impl StreamState {
    /// A body cut off before `[DONE]` and without a finish reason is a
    /// dropped connection, not an answer.
    fn is_complete(&self) -> bool {
        self.done || self.finish_reason.is_some()
    }

    fn handle_line(&mut self, line: &str) -> Result<Vec<CompletionEvent>> {
        let line = line.trim();
        log::trace!("streaming response: {}", line);
        let data = match line.strip_prefix("data:") {
            Some(data) => data.trim_start(),
            None => return Ok(vec![]),
        };

        if data == "[DONE]" {
            self.done = true;
            return Ok(vec![]);
        }

        let data = serde_json::from_str::<CompletionResponse>(data)
            .wrap_err(format!("parsing completion response line: {}", data))?;

        if let Some(usage) = data.usage {
            self.usage = Some(usage.into());
        }

        let mut events = vec![];
        for choice in data.choices {
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
            }

            let delta = choice.delta;
            if let Some(text) = delta.reasoning_content.filter(|t| !t.is_empty()) {
                events.push(CompletionEvent::ReasoningDelta(text));
            }
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                events.push(CompletionEvent::TextDelta(text));
            }

            for call in delta.tool_calls {
                match self.tool_calls.get_mut(&call.index) {
                    Some(tool) => {
                        let args = call.function.arguments.unwrap_or_default();
                        tool.function
                            .arguments
                            .get_or_insert_with(String::new)
                            .push_str(&args);
                    }
                    None => {
                        self.tool_calls.insert(call.index, call);
                    }
                }
            }
        }
        Ok(events)
    }

    fn finish(&mut self) -> Vec<CompletionEvent> {
        let mut events = std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|call| {
                CompletionEvent::ToolCall(ToolCall {
                    id: call.id.unwrap_or_default(),
                    name: call.function.name.unwrap_or_default(),
                    arguments: call.function.arguments.unwrap_or_default(),
                })
            })
            .collect::<Vec<_>>();

        events.push(CompletionEvent::StepFinish {
            usage: self.usage.clone(),
            finish_reason: self.finish_reason.clone(),
        });
        events.push(CompletionEvent::Finish {
            usage: self.usage.take(),
            finish_reason: self.finish_reason.take(),
        });
        events
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    File { file: FileData },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FileData {
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    file_data: String,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
struct MessageRequest {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    tool_calls: Vec<ToolCallResponse>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<MessageRequest>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct CompletionDeltaResponse {
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    tool_calls: Vec<ToolCallResponse>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct CompletionChoiceResponse {
    delta: CompletionDeltaResponse,
    finish_reason: Option<String>,
}

#[derive(Default, Debug, Serialize, Deserialize, Clone)]
struct ToolCallResponse {
    #[serde(default)]
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    tool_type: Option<String>,
    function: FunctionResponse,
}

#[derive(Default, Debug, Serialize, Deserialize, Clone)]
struct FunctionResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    choices: Vec<CompletionChoiceResponse>,
    usage: Option<CompletionUsageResponse>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct CompletionUsageResponse {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completion_tokens_details: Option<CompletionTokensDetails>,
    // DeepSeek reports cache hits at the top level
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt_cache_hit_tokens: Option<usize>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct PromptTokensDetails {
    cached_tokens: Option<usize>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct CompletionTokensDetails {
    reasoning_tokens: Option<usize>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: OpenAIError,
}

#[derive(Default, Error, Debug, Serialize, Deserialize)]
pub struct OpenAIError {
    #[serde(skip)]
    pub http_code: u16,
    pub message: String,
    #[serde(rename = "type", default)]
    pub err_type: String,
    pub param: Option<String>,
    pub code: Option<String>,
}

impl Display for OpenAIError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OpenAI error ({}): {}", self.http_code, self.message)
    }
}

impl From<CompletionUsageResponse> for Usage {
    fn from(value: CompletionUsageResponse) -> Self {
        let cached = value
            .prompt_tokens_details
            .and_then(|d| d.cached_tokens)
            .or(value.prompt_cache_hit_tokens);
        Usage {
            input_tokens: Some(value.prompt_tokens),
            output_tokens: Some(value.completion_tokens),
            total_tokens: Some(value.total_tokens),
            cached_input_tokens: cached,
            reasoning_tokens: value
                .completion_tokens_details
                .and_then(|d| d.reasoning_tokens),
        }
    }
}

impl From<&CompletionRequest> for ChatCompletionRequest {
    fn from(request: &CompletionRequest) -> Self {
        let mut messages = vec![];
        if !request.system_prompt().is_empty() {
            messages.push(MessageRequest {
                role: "system".to_string(),
                content: Some(MessageContent::Text(request.system_prompt().to_string())),
                ..Default::default()
            });
        }
        messages.extend(request.messages().iter().flat_map(message_requests));

        let sampling = request.sampling();
        if sampling.top_k.is_some() {
            log::debug!("top_k is not supported by the chat completions API, skipping");
        }

        Self {
            model: request.model().to_string(),
            messages,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            max_completion_tokens: sampling.max_output_tokens,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            presence_penalty: sampling.presence_penalty,
            frequency_penalty: sampling.frequency_penalty,
        }
    }
}

fn message_requests(msg: &ModelMessage) -> Vec<MessageRequest> {
    match msg.role {
        ModelRole::User => {
            let parts = msg
                .content
                .iter()
                .filter_map(content_part)
                .collect::<Vec<_>>();
            let content = match parts.as_slice() {
                [ContentPart::Text { text }] => MessageContent::Text(text.clone()),
                _ => MessageContent::Parts(parts),
            };
            vec![MessageRequest {
                role: "user".to_string(),
                content: Some(content),
                ..Default::default()
            }]
        }
        ModelRole::Assistant => {
            let mut text = String::new();
            let mut tool_calls = vec![];
            for content in &msg.content {
                match content {
                    ModelContent::Text(t) => text.push_str(t),
                    ModelContent::ToolCall(call) => tool_calls.push(ToolCallResponse {
                        index: tool_calls.len(),
                        id: Some(call.id.clone()),
                        tool_type: Some("function".to_string()),
                        function: FunctionResponse {
                            name: Some(call.name.clone()),
                            arguments: Some(call.arguments.clone()),
                        },
                    }),
                    _ => {}
                }
            }
            vec![MessageRequest {
                role: "assistant".to_string(),
                content: if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(MessageContent::Text(text))
                },
                tool_calls,
                ..Default::default()
            }]
        }
        ModelRole::Tool => msg
            .content
            .iter()
            .filter_map(|content| match content {
                ModelContent::ToolResult {
                    tool_call_id,
                    output,
                    ..
                } => Some(MessageRequest {
                    role: "tool".to_string(),
                    content: Some(MessageContent::Text(match output {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })),
                    tool_call_id: Some(tool_call_id.clone()),
                    ..Default::default()
                }),
                _ => None,
            })
            .collect(),
    }
}

fn content_part(content: &ModelContent) -> Option<ContentPart> {
    match content {
        ModelContent::Text(text) => Some(ContentPart::Text { text: text.clone() }),
        ModelContent::File {
            data,
            media_type,
            filename,
        } => {
            let url = data_url(media_type, data);
            if media_type.starts_with("image/") {
                Some(ContentPart::ImageUrl {
                    image_url: ImageUrl { url },
                })
            } else {
                Some(ContentPart::File {
                    file: FileData {
                        filename: filename.clone(),
                        file_data: url,
                    },
                })
            }
        }
        ModelContent::FileUrl { url, media_type } if media_type.starts_with("image/") => {
            Some(ContentPart::ImageUrl {
                image_url: ImageUrl { url: url.clone() },
            })
        }
        ModelContent::FileUrl { url, .. } => Some(ContentPart::Text { text: url.clone() }),
        _ => None,
    }
}

fn data_url(media_type: &str, data: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        media_type,
        base64::engine::general_purpose::STANDARD.encode(data)
    )
}
