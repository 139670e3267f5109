//! Error type shared by every backend.
//!
//! Backends collapse their native failures (COM HRESULTs, mtp-rs errors, I/O errors) into
//! [`AccessError::Backend`] with a human-readable message. "Not found" is never an error:
//! lookups return `Ok(None)` instead.

/// Failure of a device or content operation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum AccessError {
    /// A native call failed. The message carries whatever detail the backend had.
    Backend { message: String },
    /// A directory or file with this name already exists under the parent.
    AlreadyExists { path: String },
}

impl AccessError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Prefixes the message with the operation that failed. `AlreadyExists` is left alone.
    pub(crate) fn context(self, operation: &str) -> Self {
        match self {
            Self::Backend { message } => Self::Backend {
                message: format!("{operation}: {message}"),
            },
            other => other,
        }
    }
}

impl std::fmt::Display for AccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend { message } => write!(f, "Backend failure: {message}"),
            Self::AlreadyExists { path } => write!(f, "Already exists: {path}"),
        }
    }
}

impl std::error::Error for AccessError {}

impl From<std::io::Error> for AccessError {
    fn from(e: std::io::Error) -> Self {
        Self::backend(format!("I/O error: {e}"))
    }
}
