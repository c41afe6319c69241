#[cfg(test)]
#[path = "persona_test.rs"]
mod tests;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::{BackendKind, SamplingParams, ValidationError};

const SYSTEM_PROMPT_PREFIX: &str = r#"Output must follow GitHub Flavored Markdown. Some output is rendered with these conventions:

1. Inline math: wrap formulas in double dollar signs $$...$$ without line breaks around them.
   Example: the mass-energy equation $$E = mc^{2}$$ applies here.

2. Block math: wrap formulas in double dollar signs $$...$$ on their own lines.
   Example:
   $$
   E = mc^{2}
   $$

3. Diagrams: use Mermaid code blocks (```mermaid ... ```).

4. GitHub alerts: NOTE, TIP, IMPORTANT, WARNING and CAUTION are supported. Separate the
   title and the body with an empty line. Only top level alerts are supported.
   Example:
   > [!NOTE] title
   >
   > Content

Follow this format strictly in every answer so the output renders correctly.

---
"#;

/// Persona parameters as written in the configuration file. The persona id is
/// the table key.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct PersonaParams {
    /// Alias of the backend connection serving this persona.
    pub provider: String,
    pub model: String,
    pub max_tokens: usize,

    #[serde(default)]
    pub max_output_tokens: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,

    #[serde(default)]
    pub system_prompt: String,

    /// MIME patterns the model accepts as file input. Falls back to the
    /// defaults of the provider kind when absent.
    #[serde(default)]
    pub supported_media_types: Option<Vec<String>>,
}

impl PersonaParams {
    pub fn validate(&self, id: &str) -> Result<(), ValidationError> {
        let empty = |field| ValidationError::EmptyField {
            persona: id.to_string(),
            field,
        };
        if id.trim().is_empty() {
            return Err(empty("id"));
        }
        if self.provider.trim().is_empty() {
            return Err(empty("provider"));
        }
        if self.model.trim().is_empty() {
            return Err(empty("model"));
        }

        check_range(id, "max_tokens", Some(self.max_tokens as f64), 1.0, f64::MAX)?;
        check_range(
            id,
            "max_output_tokens",
            self.max_output_tokens.map(|v| v as f64),
            1.0,
            f64::MAX,
        )?;
        check_range(id, "temperature", self.temperature, 0.0, 2.0)?;
        check_range(id, "top_p", self.top_p, 0.0, 1.0)?;
        check_range(id, "top_k", self.top_k.map(|v| v as f64), 1.0, 100.0)?;
        check_range(id, "presence_penalty", self.presence_penalty, -2.0, 2.0)?;
        check_range(id, "frequency_penalty", self.frequency_penalty, -2.0, 2.0)?;
        Ok(())
    }
}

fn check_range(
    persona: &str,
    field: &'static str,
    value: Option<f64>,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    match value {
        Some(value) if value < min || value > max => Err(ValidationError::OutOfRange {
            persona: persona.to_string(),
            field,
            min,
            max,
            value,
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MediaPattern {
    Any,
    Prefix(String),
    Exact(String),
}

impl MediaPattern {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim().to_ascii_lowercase();
        if raw.is_empty() || raw == "*/*" {
            return MediaPattern::Any;
        }
        match raw.strip_suffix('*') {
            // image/* -> image/
            Some(prefix) if prefix.ends_with('/') => MediaPattern::Prefix(prefix.to_string()),
            _ => MediaPattern::Exact(raw),
        }
    }

    fn matches(&self, media_type: &str) -> bool {
        match self {
            MediaPattern::Any => true,
            MediaPattern::Prefix(prefix) => media_type.starts_with(prefix.as_str()),
            MediaPattern::Exact(exact) => media_type == exact,
        }
    }
}

/// A named model configuration. Immutable once built.
#[derive(Debug)]
pub struct Persona {
    id: String,
    provider: String,
    model: String,
    max_tokens: usize,
    sampling: SamplingParams,
    system_prompt: String,
    media_types: Vec<String>,

    patterns: OnceCell<Vec<MediaPattern>>,
}

impl Persona {
    pub fn new(id: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            model: model.into(),
            max_tokens: 0,
            sampling: SamplingParams::default(),
            system_prompt: SYSTEM_PROMPT_PREFIX.to_string(),
            media_types: vec![],
            patterns: OnceCell::new(),
        }
    }

    /// Build a persona from its configuration. `kind` supplies the default
    /// media types when the configuration does not list any.
    pub fn from_params(
        id: &str,
        params: &PersonaParams,
        kind: Option<&BackendKind>,
    ) -> Result<Self, ValidationError> {
        params.validate(id)?;

        let media_types = match (&params.supported_media_types, kind) {
            (Some(types), _) => types.clone(),
            (None, Some(kind)) => kind.default_media_types(),
            (None, None) => vec![],
        };

        Ok(Persona::new(id, &params.provider, &params.model)
            .with_max_tokens(params.max_tokens)
            .with_sampling(SamplingParams {
                max_output_tokens: params.max_output_tokens,
                temperature: params.temperature,
                top_p: params.top_p,
                top_k: params.top_k,
                presence_penalty: params.presence_penalty,
                frequency_penalty: params.frequency_penalty,
            })
            .with_system_prompt(&params.system_prompt)
            .with_media_types(media_types))
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = format!("{}\n{}", SYSTEM_PROMPT_PREFIX, prompt);
        self
    }

    pub fn with_media_types<S: Into<String>>(mut self, types: impl IntoIterator<Item = S>) -> Self {
        self.media_types = types.into_iter().map(Into::into).collect();
        self.patterns = OnceCell::new();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn media_types(&self) -> &[String] {
        &self.media_types
    }

    /// Whether a file of the given MIME type can be sent to the model. This is
    /// pattern matching only, the patterns are compiled on first use.
    pub fn supports_file(&self, media_type: &str) -> bool {
        let patterns = self
            .patterns
            .get_or_init(|| self.media_types.iter().map(|t| MediaPattern::parse(t)).collect());
        let media_type = media_type.trim().to_ascii_lowercase();
        patterns.iter().any(|p| p.matches(&media_type))
    }
}
