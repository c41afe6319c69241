use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt::Display, time};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub max_output_tokens: Option<usize>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<usize>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
}

/// Token accounting reported by the model.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<usize>,
    pub output_tokens: Option<usize>,
    pub total_tokens: Option<usize>,
    pub cached_input_tokens: Option<usize>,
    pub reasoning_tokens: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelContent {
    Text(String),
    Reasoning(String),
    File {
        data: Vec<u8>,
        media_type: String,
        filename: Option<String>,
    },
    /// A file the model fetches by itself.
    FileUrl {
        url: String,
        media_type: String,
    },
    ToolCall(ToolCall),
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: Value,
    },
}

/// A message in the shape the backend consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMessage {
    pub role: ModelRole,
    pub content: Vec<ModelContent>,
}

impl ModelMessage {
    pub fn new(role: ModelRole, content: Vec<ModelContent>) -> Self {
        Self { role, content }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(ModelRole::User, vec![ModelContent::Text(text.into())])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    provider: String,
    model: String,
    system_prompt: String,
    sampling: SamplingParams,
    messages: Vec<ModelMessage>,
}

impl CompletionRequest {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            system_prompt: String::new(),
            sampling: SamplingParams::default(),
            messages: vec![],
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_messages(mut self, messages: Vec<ModelMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }

    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }
}

/// Incremental output of the streaming completion primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    TextDelta(String),
    ReasoningDelta(String),
    ToolCall(ToolCall),
    StepFinish {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },
    Finish {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BackendConnection {
    #[serde(default)]
    enabled: bool,
    kind: BackendKind,
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    timeout: Option<time::Duration>,
}

impl BackendConnection {
    pub fn new(kind: BackendKind, endpoint: impl Into<String>) -> Self {
        Self {
            enabled: false,
            kind,
            alias: None,
            endpoint: endpoint.into(),
            api_key: None,
            timeout: None,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<time::Duration>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn kind(&self) -> &BackendKind {
        &self.kind
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// The name personas use to refer to this connection.
    pub fn name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| self.kind.to_string())
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

    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

#[derive(Hash, PartialEq, Eq, Deserialize, Serialize, Debug, Clone)]
pub enum BackendKind {
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "deepseek")]
    DeepSeek,
}

impl BackendKind {
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            BackendKind::OpenAI => "https://api.openai.com",
            BackendKind::DeepSeek => "https://api.deepseek.com",
        }
    }

    /// File types the provider's chat endpoint accepts natively.
    pub fn default_media_types(&self) -> Vec<String> {
        match self {
            BackendKind::OpenAI => vec!["image/*".to_string(), "application/pdf".to_string()],
            BackendKind::DeepSeek => vec![],
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::OpenAI => write!(f, "openai"),
            BackendKind::DeepSeek => write!(f, "deepseek"),
        }
    }
}

impl Display for Usage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Input Tokens: {} (cached {}), Output Tokens: {}, Total: {}",
            self.input_tokens.unwrap_or_default(),
            self.cached_input_tokens.unwrap_or_default(),
            self.output_tokens.unwrap_or_default(),
            self.total_tokens.unwrap_or_default()
        )
    }
}
