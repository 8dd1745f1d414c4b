use serde::Serialize;
use thiserror::Error;

/// Per-file intake problems. Never fatal to the batch they belong to.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntakeWarning {
    #[error("{name} is {size} bytes, larger than the {limit} byte limit")]
    FileTooLarge { name: String, size: u64, limit: u64 },
    #[error("could not read {name}: {reason}")]
    FileUnreadable { name: String, reason: String },
}

impl IntakeWarning {
    pub fn file_name(&self) -> &str {
        match self {
            IntakeWarning::FileTooLarge { name, .. } | IntakeWarning::FileUnreadable { name, .. } => name,
        }
    }
}

/// A single attempt failed before any response came back.
#[derive(Debug, Clone, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

#[derive(Debug, Clone, Error)]
pub enum BackoffError {
    #[error("request failed after {attempts} attempt(s): {last_error}")]
    RequestFailed { attempts: u32, last_error: String },
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("missing input: enter a prompt or add at least one image")]
    Validation,
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] BackoffError),
    #[error("no image data received: {0}")]
    EmptyResponse(String),
}

/// Machine-readable failure category exposed to observers.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transport,
    EmptyResponse,
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            // encoding never reaches the network, so it is reported like bad input
            GenerationError::Validation | GenerationError::Encode(_) => ErrorKind::Validation,
            GenerationError::Transport(_) => ErrorKind::Transport,
            GenerationError::EmptyResponse(_) => ErrorKind::EmptyResponse,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&GenerationError> for SessionFailure {
    fn from(err: &GenerationError) -> Self {
        Self { kind: err.kind(), message: err.to_string() }
    }
}
