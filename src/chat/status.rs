#[cfg(test)]
#[path = "status_test.rs"]
mod tests;

use std::fmt::Display;

use thiserror::Error;

/// Lifecycle of a generation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GenerationStatus {
    #[default]
    Ready,
    Submitted,
    Streaming,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Submit,
    FirstChunk,
    Finish,
    Abort,
    Fail(String),
    Dismiss,
}

/// What the single submit control does in a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAction {
    Submit,
    Stop,
    Dismiss,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal transition from {from} on {event:?}")]
pub struct IllegalTransition {
    pub from: GenerationStatus,
    pub event: StatusEvent,
}

impl GenerationStatus {
    pub fn transition(&self, event: StatusEvent) -> Result<GenerationStatus, IllegalTransition> {
        use GenerationStatus::*;
        use StatusEvent::*;

        let next = match (self, &event) {
            (Ready, Submit) => Submitted,
            (Submitted, FirstChunk) | (Streaming, FirstChunk) => Streaming,
            (Submitted | Streaming, Finish | Abort) => Ready,
            (Submitted | Streaming, Fail(msg)) => Error(msg.clone()),
            (Error(_), Dismiss) => Ready,
            _ => {
                return Err(IllegalTransition {
                    from: self.clone(),
                    event,
                });
            }
        };
        Ok(next)
    }

    pub fn submit_action(&self) -> SubmitAction {
        match self {
            GenerationStatus::Ready => SubmitAction::Submit,
            GenerationStatus::Submitted | GenerationStatus::Streaming => SubmitAction::Stop,
            GenerationStatus::Error(_) => SubmitAction::Dismiss,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            GenerationStatus::Submitted | GenerationStatus::Streaming
        )
    }
}

impl Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationStatus::Ready => write!(f, "ready"),
            GenerationStatus::Submitted => write!(f, "submitted"),
            GenerationStatus::Streaming => write!(f, "streaming"),
            GenerationStatus::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}
