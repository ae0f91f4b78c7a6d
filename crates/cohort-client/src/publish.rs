//! Dry-run validation and upload of tabular datasets.
//!
//! Both operations return a [PublishOutcome]. Missing or malformed arguments are
//! returned as errors before any request is sent, while failures reported by the
//! service are classified and returned as [PublishOutcome::Failure].

use std::fmt;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use arrow_flight::FlightDescriptor;
use bytes::{BufMut, Bytes, BytesMut};
use cohort_telemetry::common::SpanAttribute;
use fastrace::future::FutureExt;
use fastrace::Span;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::classify::ClassifiedError;
use crate::error::{ClientError, ClientResult};
use crate::executor::{try_execute, ActionOutput};
use crate::table::{schema_to_ipc, Table};
use crate::transport::FlightTransport;
use crate::validation::{validate_keys, KeyColumns, KeyValidation};

pub const DRY_PUBLISH_COMMAND: &str = "dry_publish";
pub const PUBLISH_COMMAND: &str = "publish";

pub const PAYLOAD_SEPARATOR: &[u8] = b"\n\n";
const DATASET_NAME_MAX_LENGTH: usize = 15;

/// The description of a dataset to publish, sent to the service as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConfig {
    pub project_token: String,
    pub dataset_name: String,
    pub dataset_description: String,
    pub key_columns: KeyColumns,
    #[serde(default)]
    pub source_datasets: Vec<String>,
}

impl PublishConfig {
    pub fn new(
        project_token: impl Into<String>,
        dataset_name: impl Into<String>,
        dataset_description: impl Into<String>,
        key_columns: impl Into<KeyColumns>,
    ) -> Self {
        Self {
            project_token: project_token.into(),
            dataset_name: dataset_name.into(),
            dataset_description: dataset_description.into(),
            key_columns: key_columns.into(),
            source_datasets: vec![],
        }
    }

    pub fn with_source_datasets<I, S>(self, source_datasets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source_datasets: source_datasets.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Checks the dataset name the way the service does.
    /// The publish operations leave this check to the service.
    pub fn validate_dataset_name(&self) -> ClientResult<()> {
        let name = &self.dataset_name;
        if name.is_empty() || name.chars().count() > DATASET_NAME_MAX_LENGTH {
            return Err(ClientError::invalid(format!(
                "dataset name must have 1 to {DATASET_NAME_MAX_LENGTH} characters: {name}"
            )));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ClientError::invalid(format!(
                "dataset name must only contain letters, digits and underscores: {name}"
            )));
        }
        Ok(())
    }

    pub fn to_json_bytes(&self) -> ClientResult<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// The data to publish.
#[derive(Debug, Clone)]
pub enum PublishData {
    Table(Table),
    Batches(Vec<RecordBatch>),
    /// An array of row objects.
    Json(Value),
}

impl PublishData {
    fn into_table(self) -> ClientResult<Table> {
        match self {
            PublishData::Table(table) => Ok(table),
            PublishData::Batches(batches) => Table::from_batches(batches),
            PublishData::Json(value) => Table::from_json_rows(&value),
        }
    }
}

impl From<Table> for PublishData {
    fn from(value: Table) -> Self {
        PublishData::Table(value)
    }
}

impl From<RecordBatch> for PublishData {
    fn from(value: RecordBatch) -> Self {
        PublishData::Table(Table::from(value))
    }
}

impl From<Vec<RecordBatch>> for PublishData {
    fn from(value: Vec<RecordBatch>) -> Self {
        PublishData::Batches(value)
    }
}

impl From<Value> for PublishData {
    fn from(value: Value) -> Self {
        PublishData::Json(value)
    }
}

/// The arguments of a publish operation.
/// Every argument is required, and a missing one is reported by name.
#[derive(Default, Clone)]
pub struct PublishRequest {
    client: Option<Arc<dyn FlightTransport>>,
    config: Option<PublishConfig>,
    data: Option<PublishData>,
}

impl fmt::Debug for PublishRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishRequest")
            .field("client", &self.client.is_some())
            .field("config", &self.config)
            .field("data", &self.data)
            .finish()
    }
}

impl PublishRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(self, client: Arc<dyn FlightTransport>) -> Self {
        Self {
            client: Some(client),
            ..self
        }
    }

    pub fn config(self, config: PublishConfig) -> Self {
        Self {
            config: Some(config),
            ..self
        }
    }

    pub fn data(self, data: impl Into<PublishData>) -> Self {
        Self {
            data: Some(data.into()),
            ..self
        }
    }

    fn prepare(self) -> ClientResult<PreparedPublish> {
        let Some(transport) = self.client else {
            return Err(ClientError::missing("client"));
        };
        let Some(config) = self.config else {
            return Err(ClientError::missing("config"));
        };
        let Some(data) = self.data else {
            return Err(ClientError::missing("data"));
        };
        if config.key_columns.is_empty() {
            return Err(ClientError::invalid("config key_columns must not be empty"));
        }
        let table = data.into_table()?;
        Ok(PreparedPublish {
            transport,
            config,
            table,
        })
    }
}

struct PreparedPublish {
    transport: Arc<dyn FlightTransport>,
    config: PublishConfig,
    table: Table,
}

impl PreparedPublish {
    /// Attaches the row counts to the response.
    /// A key validation failure only withholds the counts.
    fn annotate(&self, mut response: PublishResponse) -> PublishResponse {
        if response.reports_failure() {
            return response;
        }
        match validate_keys(&self.table, &self.config.key_columns) {
            Ok(validation) => response.key_validation = Some(validation),
            Err(e) => warn!(
                "skipping duplicate detection for dataset {}: {e}",
                self.config.dataset_name
            ),
        }
        response
    }
}

/// The response of a successful publish operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishResponse {
    /// The fields returned by the service.
    pub body: Map<String, Value>,
    pub key_validation: Option<KeyValidation>,
}

impl PublishResponse {
    fn reports_failure(&self) -> bool {
        matches!(self.body.get("success"), Some(Value::Bool(false)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Success(PublishResponse),
    Failure(ClassifiedError),
}

impl PublishOutcome {
    /// Returns whether the operation succeeded.
    /// A response body with `"success": false` counts as a failure.
    pub fn is_success(&self) -> bool {
        match self {
            PublishOutcome::Success(response) => !response.reports_failure(),
            PublishOutcome::Failure(_) => false,
        }
    }

    pub fn valid_rows(&self) -> Option<usize> {
        self.key_validation().map(|v| v.valid_rows)
    }

    pub fn duplicate_rows_based_on_keys(&self) -> Option<usize> {
        self.key_validation().map(|v| v.duplicate_rows_based_on_keys)
    }

    fn key_validation(&self) -> Option<&KeyValidation> {
        match self {
            PublishOutcome::Success(response) => response.key_validation.as_ref(),
            PublishOutcome::Failure(_) => None,
        }
    }

    /// Returns the outcome as a flat JSON object with a `success` flag.
    pub fn to_json(&self) -> Value {
        let mut output = Map::new();
        match self {
            PublishOutcome::Success(response) => {
                output.extend(response.body.clone());
                output.insert(
                    "success".to_string(),
                    Value::Bool(!response.reports_failure()),
                );
                if let Some(validation) = &response.key_validation {
                    output.insert("valid_rows".to_string(), validation.valid_rows.into());
                    output.insert(
                        "duplicate_rows_based_on_keys".to_string(),
                        validation.duplicate_rows_based_on_keys.into(),
                    );
                }
            }
            PublishOutcome::Failure(error) => {
                output.insert("success".to_string(), Value::Bool(false));
                output.insert(
                    "error_type".to_string(),
                    Value::String(error.error_type.to_string()),
                );
                output.insert(
                    "error_message".to_string(),
                    Value::String(error.error_message.clone()),
                );
                output.insert(
                    "original_error".to_string(),
                    Value::String(error.original_error.clone()),
                );
            }
        }
        Value::Object(output)
    }
}

/// Builds the body of the dry-run command: the config JSON and the IPC schema
/// message, separated by a blank line.
pub fn dry_publish_payload(config: &PublishConfig, table: &Table) -> ClientResult<Bytes> {
    let config = config.to_json_bytes()?;
    let schema = schema_to_ipc(table.schema())?;
    let mut payload = BytesMut::with_capacity(config.len() + PAYLOAD_SEPARATOR.len() + schema.len());
    payload.put_slice(&config);
    payload.put_slice(PAYLOAD_SEPARATOR);
    payload.put_slice(&schema);
    Ok(payload.freeze())
}

/// Asks the service to validate the config and the schema of the data without uploading rows.
pub async fn dry_publish(request: PublishRequest) -> ClientResult<PublishOutcome> {
    let prepared = request.prepare()?;
    let payload = dry_publish_payload(&prepared.config, &prepared.table)?;
    let span = Span::enter_with_local_parent("dry_publish")
        .with_property(|| (SpanAttribute::PUBLISH_COMMAND, DRY_PUBLISH_COMMAND));
    let outputs = match try_execute(prepared.transport.as_ref(), DRY_PUBLISH_COMMAND, payload)
        .in_span(span)
        .await
    {
        Ok(outputs) => outputs,
        Err(e) => {
            warn!("dry publish of dataset {} failed: {e}", prepared.config.dataset_name);
            return Ok(PublishOutcome::Failure(ClassifiedError::from(&e)));
        }
    };
    let response = PublishResponse {
        body: dry_publish_body(outputs),
        key_validation: None,
    };
    Ok(PublishOutcome::Success(prepared.annotate(response)))
}

fn dry_publish_body(outputs: Vec<ActionOutput>) -> Map<String, Value> {
    if let Some(body) = outputs.iter().find_map(|output| match output.as_json() {
        Some(Value::Object(body)) => Some(body.clone()),
        _ => None,
    }) {
        return body;
    }
    warn!(
        "dry publish returned no JSON object among {} result(s)",
        outputs.len()
    );
    let results = outputs
        .into_iter()
        .map(|output| match output {
            ActionOutput::Json(value) => value,
            ActionOutput::Raw(body) => Value::String(String::from_utf8_lossy(&body).into_owned()),
        })
        .collect();
    let mut body = Map::new();
    body.insert("results".to_string(), Value::Array(results));
    body
}

/// Uploads the data under the config.
pub async fn publish(request: PublishRequest) -> ClientResult<PublishOutcome> {
    let prepared = request.prepare()?;
    let rows = prepared.table.num_rows();
    if rows == 0 {
        warn!("uploading empty dataset {}", prepared.config.dataset_name);
    }
    let descriptor = FlightDescriptor::new_cmd(prepared.config.to_json_bytes()?);
    let span = Span::enter_with_local_parent("publish")
        .with_property(|| (SpanAttribute::PUBLISH_COMMAND, PUBLISH_COMMAND));
    let results = match prepared
        .transport
        .do_put(
            descriptor,
            Arc::clone(prepared.table.schema()),
            prepared.table.batches().to_vec(),
        )
        .in_span(span)
        .await
    {
        Ok(results) => results,
        Err(e) => {
            warn!("publish of dataset {} failed: {e}", prepared.config.dataset_name);
            return Ok(PublishOutcome::Failure(ClassifiedError::from(&e)));
        }
    };
    debug!(
        "published {rows} row(s) of dataset {} with {} result(s)",
        prepared.config.dataset_name,
        results.len()
    );
    let mut body = Map::new();
    for result in results {
        if result.app_metadata.is_empty() {
            continue;
        }
        match serde_json::from_slice::<Value>(&result.app_metadata) {
            Ok(Value::Object(fields)) => body.extend(fields),
            Ok(_) | Err(_) => debug!("ignoring put result metadata that is not a JSON object"),
        }
    }
    let response = PublishResponse {
        body,
        key_validation: None,
    };
    Ok(PublishOutcome::Success(prepared.annotate(response)))
}
