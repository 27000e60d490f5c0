use std::time::Duration;

use thiserror::Error;

/// Failure reading a document snapshot.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("document is not valid UTF-8: {0}")]
    InvalidUtf8(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("diff computation exceeded {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("diff worker failed: {0}")]
    Worker(String),
}

/// Errors while computing a single file's delta. These never escape the delta computer; they
/// select the fallback path instead.
#[derive(Debug, Error)]
pub enum DeltaError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Diff(#[from] DiffError),
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("policy service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to parse policy response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid policy url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write record: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to post record: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0} is not a valid setting")]
    InvalidSetting(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error("remote discovery task failed: {0}")]
    Worker(String),
}
