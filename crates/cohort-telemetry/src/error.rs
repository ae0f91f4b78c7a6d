use thiserror::Error;

pub type TelemetryResult<T> = Result<T, TelemetryError>;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl TelemetryError {
    pub fn invalid(message: impl Into<String>) -> Self {
        TelemetryError::InvalidArgument(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        TelemetryError::InternalError(message.into())
    }
}

impl From<log::SetLoggerError> for TelemetryError {
    fn from(error: log::SetLoggerError) -> Self {
        TelemetryError::InternalError(error.to_string())
    }
}
