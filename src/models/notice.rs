use crate::config::constants::NOTICE_DURATION;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum NoticeKind {
    #[default]
    Info,
    Warning,
    Error,
}

/// A transient notification, rendered as a toast by the UI.
#[derive(Debug, Clone)]
pub struct NoticeMessage {
    message: String,
    description: Option<String>,
    kind: NoticeKind,
    duration: Option<std::time::Duration>,
}

impl NoticeMessage {
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(message)
            .with_kind(NoticeKind::Info)
            .with_duration(NOTICE_DURATION)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(NoticeKind::Warning)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(NoticeKind::Error)
    }

    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            description: None,
            kind: NoticeKind::Info,
            duration: None,
        }
    }

    pub fn with_kind(mut self, kind: NoticeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn kind(&self) -> &NoticeKind {
        &self.kind
    }

    pub fn duration(&self) -> Option<std::time::Duration> {
        self.duration
    }
}
