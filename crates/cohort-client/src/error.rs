use arrow::error::ArrowError;
use arrow_flight::error::FlightError;
use cohort_common::error::CommonError;
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("missing argument: {0}")]
    MissingArgument(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("key columns not found in data: {}", .0.join(", "))]
    KeyColumnsNotFound(Vec<String>),
    #[error("error in Arrow: {0}")]
    ArrowError(#[from] ArrowError),
    #[error("error in JSON serde: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("error in Arrow serde: {0}")]
    ArrowSerdeError(#[from] serde_arrow::Error),
    #[error("error in Arrow Flight: {0}")]
    FlightError(#[from] FlightError),
    #[error("error in Tonic transport: {0}")]
    TonicTransportError(#[from] tonic::transport::Error),
    #[error("error in Tonic status: {0}")]
    TonicStatusError(#[from] tonic::Status),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl ClientError {
    pub fn missing(message: impl Into<String>) -> Self {
        ClientError::MissingArgument(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ClientError::InvalidArgument(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ClientError::InternalError(message.into())
    }

    /// Returns the message reported by the remote service, if the error came from it.
    /// Otherwise returns the display text of the error.
    pub fn remote_message(&self) -> String {
        match self {
            ClientError::TonicStatusError(status) => status.message().to_string(),
            ClientError::FlightError(FlightError::Tonic(status)) => status.message().to_string(),
            x => x.to_string(),
        }
    }
}

impl From<CommonError> for ClientError {
    fn from(error: CommonError) -> Self {
        match error {
            CommonError::MissingArgument(message) => ClientError::MissingArgument(message),
            CommonError::InvalidArgument(message) => ClientError::InvalidArgument(message),
            CommonError::InternalError(message) => ClientError::InternalError(message),
        }
    }
}
