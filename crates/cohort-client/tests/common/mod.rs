//! An in-memory data service for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow_flight::{
    Action, Criteria, FlightDescriptor, FlightEndpoint, FlightInfo, PutResult, Ticket,
};
use bytes::Bytes;
use cohort_client::error::{ClientError, ClientResult};
use cohort_client::transport::{FlightStream, FlightTransport};
use cohort_telemetry::telemetry::init_logger;
use futures::{stream, StreamExt};
use serde_json::{json, Value};

fn remote_error(message: &str) -> ClientError {
    ClientError::TonicStatusError(tonic::Status::internal(message))
}

/// A recorded `do_put` call.
#[derive(Debug, Clone)]
pub struct PutCall {
    pub descriptor: FlightDescriptor,
    pub schema: SchemaRef,
    pub rows: usize,
}

#[derive(Debug, Default)]
struct Requests {
    criteria: Vec<Value>,
    actions: Vec<Action>,
    tickets: Vec<Value>,
    puts: Vec<PutCall>,
}

/// A [FlightTransport] that serves canned responses and records every request.
#[derive(Debug, Default)]
pub struct MockTransport {
    pages: Vec<Vec<Value>>,
    infinite_pages: bool,
    total_records: Option<i64>,
    failing_page: Option<u64>,
    action_results: Option<Vec<Bytes>>,
    action_error: Option<String>,
    chunks: Vec<RecordBatch>,
    failing_chunk: Option<usize>,
    get_error: Option<String>,
    put_results: Vec<PutResult>,
    put_error: Option<String>,
    requests: Mutex<Requests>,
}

impl MockTransport {
    pub fn new() -> Self {
        // The logger can only be installed once per test binary.
        let _ = init_logger("debug");
        Self::default()
    }

    /// Serves the pages in order, then empty pages.
    pub fn with_pages(self, pages: Vec<Vec<Value>>) -> Self {
        Self { pages, ..self }
    }

    /// Serves a non-empty page for every page number.
    pub fn with_infinite_pages(self) -> Self {
        Self {
            infinite_pages: true,
            ..self
        }
    }

    pub fn with_total_records(self, total: i64) -> Self {
        Self {
            total_records: Some(total),
            ..self
        }
    }

    /// Fails the listing request for the given 1-based page.
    pub fn with_failing_page(self, page: u64) -> Self {
        Self {
            failing_page: Some(page),
            ..self
        }
    }

    pub fn with_action_results(self, results: Vec<&'static str>) -> Self {
        Self {
            action_results: Some(
                results
                    .into_iter()
                    .map(|r| Bytes::from_static(r.as_bytes()))
                    .collect(),
            ),
            ..self
        }
    }

    pub fn with_action_error(self, message: &str) -> Self {
        Self {
            action_error: Some(message.to_string()),
            ..self
        }
    }

    pub fn with_chunks(self, chunks: Vec<RecordBatch>) -> Self {
        Self { chunks, ..self }
    }

    /// Fails the read of the chunk at the 0-based position.
    pub fn with_failing_chunk(self, position: usize) -> Self {
        Self {
            failing_chunk: Some(position),
            ..self
        }
    }

    pub fn with_get_error(self, message: &str) -> Self {
        Self {
            get_error: Some(message.to_string()),
            ..self
        }
    }

    pub fn with_put_metadata(self, metadata: Value) -> Self {
        let result = PutResult {
            app_metadata: Bytes::from(metadata.to_string()),
        };
        Self {
            put_results: vec![result],
            ..self
        }
    }

    pub fn with_put_error(self, message: &str) -> Self {
        Self {
            put_error: Some(message.to_string()),
            ..self
        }
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn criteria(&self) -> Vec<Value> {
        self.lock().criteria.clone()
    }

    pub fn list_requests(&self) -> usize {
        self.lock().criteria.len()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.lock().actions.clone()
    }

    pub fn tickets(&self) -> Vec<Value> {
        self.lock().tickets.clone()
    }

    pub fn puts(&self) -> Vec<PutCall> {
        self.lock().puts.clone()
    }

    pub fn total_requests(&self) -> usize {
        let requests = self.lock();
        requests.criteria.len()
            + requests.actions.len()
            + requests.tickets.len()
            + requests.puts.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Requests> {
        self.requests.lock().unwrap()
    }

    fn flight_info(&self, item: &Value) -> FlightInfo {
        let ticket = Ticket::new(item.to_string());
        FlightInfo::new()
            .with_endpoint(FlightEndpoint::new().with_ticket(ticket))
            .with_total_records(self.total_records.unwrap_or(-1))
    }
}

#[tonic::async_trait]
impl FlightTransport for MockTransport {
    async fn do_action(&self, action: Action) -> ClientResult<FlightStream<Bytes>> {
        self.lock().actions.push(action);
        if let Some(message) = &self.action_error {
            return Err(remote_error(message));
        }
        let results = self.action_results.clone().unwrap_or_default();
        Ok(stream::iter(results.into_iter().map(Ok::<_, ClientError>)).boxed())
    }

    async fn list_flights(&self, criteria: Criteria) -> ClientResult<FlightStream<FlightInfo>> {
        let criteria: Value = serde_json::from_slice(&criteria.expression).unwrap();
        let page = criteria["page"].as_u64().unwrap();
        self.lock().criteria.push(criteria);
        if self.failing_page == Some(page) {
            return Err(remote_error("SERVER_ERROR: listing unavailable"));
        }
        let items = if self.infinite_pages {
            vec![json!({"study_uuid": "s1", "name": format!("page-{page}")})]
        } else {
            usize::try_from(page - 1)
                .ok()
                .and_then(|i| self.pages.get(i))
                .cloned()
                .unwrap_or_default()
        };
        let infos: Vec<ClientResult<FlightInfo>> =
            items.iter().map(|item| Ok(self.flight_info(item))).collect();
        Ok(stream::iter(infos).boxed())
    }

    async fn do_get(&self, ticket: Ticket) -> ClientResult<FlightStream<RecordBatch>> {
        let ticket: Value = serde_json::from_slice(&ticket.ticket).unwrap();
        let limit = ticket["limit"].as_u64().map(|n| n as usize);
        self.lock().tickets.push(ticket);
        if let Some(message) = &self.get_error {
            return Err(remote_error(message));
        }
        let mut remaining = limit.unwrap_or(usize::MAX);
        let mut chunks: Vec<ClientResult<RecordBatch>> = vec![];
        for (position, chunk) in self.chunks.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            if self.failing_chunk == Some(position) {
                chunks.push(Err(remote_error("chunk read failed")));
                break;
            }
            let chunk = chunk.slice(0, chunk.num_rows().min(remaining));
            remaining -= chunk.num_rows();
            chunks.push(Ok(chunk));
        }
        Ok(stream::iter(chunks).boxed())
    }

    async fn do_put(
        &self,
        descriptor: FlightDescriptor,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> ClientResult<Vec<PutResult>> {
        let rows = batches.iter().map(|b| b.num_rows()).sum();
        self.lock().puts.push(PutCall {
            descriptor,
            schema,
            rows,
        });
        if let Some(message) = &self.put_error {
            return Err(remote_error(message));
        }
        Ok(self.put_results.clone())
    }
}

pub fn dataset_item(name: &str) -> Value {
    json!({
        "study_uuid": "s1",
        "study_environment_uuid": "e1",
        "dataset_uuid": format!("uuid-{name}"),
        "dataset_name": name,
    })
}

/// The visits of three subjects, with two repeated rows.
pub fn visits_batch() -> RecordBatch {
    let schema = Schema::new(vec![
        Field::new("SUBJID", DataType::Utf8, false),
        Field::new("VISIT", DataType::Utf8, false),
        Field::new("WEIGHT", DataType::Int64, true),
    ]);
    RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(StringArray::from(vec!["001", "002", "003", "001", "002"])),
            Arc::new(StringArray::from(vec!["V1", "V1", "V2", "V1", "V1"])),
            Arc::new(Int64Array::from(vec![Some(70), Some(82), None, Some(71), Some(80)])),
        ],
    )
    .unwrap()
}
