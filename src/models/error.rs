use thiserror::Error;

/// Errors that block a submission before anything leaves the client.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("no persona is selected")]
    NoPersona,

    #[error("the model does not support '{filename}' and it cannot be converted to a text summary")]
    UnsupportedFile { filename: String },

    #[error("persona {persona}: {field} must not be empty")]
    EmptyField {
        persona: String,
        field: &'static str,
    },

    #[error("persona {persona}: {field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        persona: String,
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("at least one persona must be defined")]
    NoPersonas,

    #[error("conversation {id} is not loaded")]
    NotLoaded { id: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum TransportError {
    #[error("conversation changed from {expected} to {current}")]
    ConversationChanged { expected: String, current: String },
}
