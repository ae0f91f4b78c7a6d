use arrow_flight::Ticket;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// A locator of a dataset that the service can resolve into rows.
///
/// The identifiers are opaque to the client and only validated by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetTicket {
    pub study_uuid: String,
    pub study_environment_uuid: String,
    pub dataset_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl DatasetTicket {
    pub fn new(
        study_uuid: impl Into<String>,
        study_environment_uuid: impl Into<String>,
        dataset_uuid: impl Into<String>,
    ) -> Self {
        Self {
            study_uuid: study_uuid.into(),
            study_environment_uuid: study_environment_uuid.into(),
            dataset_uuid: dataset_uuid.into(),
            dataset_name: None,
            limit: None,
        }
    }

    pub fn with_dataset_name(self, name: impl Into<String>) -> Self {
        Self {
            dataset_name: Some(name.into()),
            ..self
        }
    }

    /// Returns a copy of this ticket capped at `limit` rows.
    pub fn with_limit(&self, limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..self.clone()
        }
    }

    pub fn to_flight_ticket(&self) -> ClientResult<Ticket> {
        Ok(Ticket::new(serde_json::to_vec(self)?))
    }

    pub fn from_flight_ticket(ticket: &Ticket) -> ClientResult<Self> {
        let text = std::str::from_utf8(&ticket.ticket)
            .map_err(|e| ClientError::invalid(format!("ticket is not valid UTF-8: {e}")))?;
        Ok(serde_json::from_str(text)?)
    }
}
