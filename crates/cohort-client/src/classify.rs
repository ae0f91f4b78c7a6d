//! Classification of errors reported by the data service.
//!
//! The service encodes the error category as a prefix of the error message,
//! e.g. `NOT_FOUND: dataset does not exist`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Authentication,
    Authorization,
    ServerError,
}

impl ErrorKind {
    const PREFIXES: [(&'static str, ErrorKind); 4] = [
        ("VALIDATION_ERROR:", ErrorKind::Validation),
        ("NOT_FOUND:", ErrorKind::NotFound),
        ("AUTHENTICATION_ERROR:", ErrorKind::Authentication),
        ("AUTHORIZATION_ERROR:", ErrorKind::Authorization),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Authentication => "AUTHENTICATION",
            ErrorKind::Authorization => "AUTHORIZATION",
            ErrorKind::ServerError => "SERVER_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the kind of a raw error message. Unknown messages are server errors.
pub fn classify(message: &str) -> ErrorKind {
    split_prefix(message).0
}

fn split_prefix(message: &str) -> (ErrorKind, &str) {
    let trimmed = message.trim_start();
    ErrorKind::PREFIXES
        .iter()
        .find_map(|(prefix, kind)| {
            trimmed
                .strip_prefix(prefix)
                .map(|rest| (*kind, rest.trim_start()))
        })
        .unwrap_or((ErrorKind::ServerError, message))
}

/// A remote failure in the shape returned to callers of publish operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub error_type: ErrorKind,
    /// The message without the category prefix.
    pub error_message: String,
    /// The message as reported.
    pub original_error: String,
}

impl ClassifiedError {
    pub fn from_message(message: impl Into<String>) -> Self {
        let original_error = message.into();
        let (error_type, error_message) = split_prefix(&original_error);
        let error_message = error_message.to_string();
        Self {
            error_type,
            error_message,
            original_error,
        }
    }
}

impl From<&ClientError> for ClassifiedError {
    fn from(error: &ClientError) -> Self {
        Self::from_message(error.remote_message())
    }
}
