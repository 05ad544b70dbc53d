use crate::firestore::FirestoreError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Closed failure taxonomy of the service layer. Every backend-native error
/// is funneled into one of these kinds before reaching a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    PermissionDenied,
    Unavailable,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A classified service failure: a kind from the closed taxonomy plus a
/// human-readable message.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }
}

/// Total mapping from client-layer errors. HTTP statuses carry the
/// classification; transport failures count as unavailability.
impl From<FirestoreError> for ServiceError {
    fn from(err: FirestoreError) -> Self {
        match err {
            FirestoreError::Api { status, message } => {
                let kind = match status {
                    404 => ErrorKind::NotFound,
                    400 => ErrorKind::InvalidArgument,
                    401 | 403 => ErrorKind::PermissionDenied,
                    429 | 500..=504 => ErrorKind::Unavailable,
                    _ => ErrorKind::Unknown,
                };
                Self::new(kind, message)
            }
            FirestoreError::Request(e) => {
                if e.is_connect() || e.is_timeout() {
                    Self::unavailable(e.to_string())
                } else {
                    Self::unknown(e.to_string())
                }
            }
            FirestoreError::Middleware(e) => Self::unknown(e.to_string()),
            FirestoreError::Serialization(e) => Self::unknown(e.to_string()),
        }
    }
}
