use std::fmt;
use std::sync::Arc;

use arrow::datatypes::Schema;
use arrow::json::ArrayWriter;
use arrow::record_batch::RecordBatch;
use cohort_telemetry::common::SpanAttribute;
use fastrace::future::FutureExt;
use fastrace::Span;
use futures::StreamExt;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ClientResult;
use crate::table::Table;
use crate::ticket::DatasetTicket;
use crate::transport::{FlightStream, FlightTransport};

/// A deferred query against one dataset.
///
/// Setting a limit never talks to the service. Only the materializing methods
/// ([DatasetRef::collect] and the methods built on it) fetch rows, and each call
/// fetches again since results are not cached.
#[derive(Clone)]
pub struct DatasetRef {
    transport: Arc<dyn FlightTransport>,
    ticket: DatasetTicket,
    limit: Option<usize>,
}

impl fmt::Debug for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetRef")
            .field("ticket", &self.ticket)
            .field("limit", &self.limit)
            .finish()
    }
}

impl DatasetRef {
    pub fn new(transport: Arc<dyn FlightTransport>, ticket: DatasetTicket) -> Self {
        Self {
            transport,
            ticket,
            limit: None,
        }
    }

    pub fn ticket(&self) -> &DatasetTicket {
        &self.ticket
    }

    pub fn current_limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn set_limit(&mut self, n: usize) -> &mut Self {
        self.limit = Some(n);
        self
    }

    /// Returns the ticket sent to the service when the dataset is materialized.
    pub fn effective_ticket(&self, ignore_limit: bool) -> DatasetTicket {
        match self.limit {
            Some(n) if !ignore_limit => self.ticket.with_limit(n),
            _ => self.ticket.clone(),
        }
    }

    /// Opens the chunk stream of the dataset.
    /// The caller may stop reading at any chunk boundary.
    pub async fn chunks(&self, ignore_limit: bool) -> ClientResult<FlightStream<RecordBatch>> {
        let ticket = self.effective_ticket(ignore_limit).to_flight_ticket()?;
        self.transport.do_get(ticket).await
    }

    /// Fetches all chunks and concatenates them into one batch.
    ///
    /// A failure while reading is logged and the chunks read so far are returned.
    /// If nothing could be read, the result is an empty batch without columns.
    pub async fn collect(&self, ignore_limit: bool) -> ClientResult<RecordBatch> {
        let span = Span::enter_with_local_parent("DatasetRef::collect").with_property(|| {
            (
                SpanAttribute::DATASET_UUID,
                self.ticket.dataset_uuid.clone(),
            )
        });
        let batches = self.read_chunks(ignore_limit).in_span(span).await?;
        let Some(schema) = batches.first().map(|b| b.schema()) else {
            return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
        };
        Table::try_new(schema, batches)?.concat()
    }

    async fn read_chunks(&self, ignore_limit: bool) -> ClientResult<Vec<RecordBatch>> {
        let mut stream = match self.chunks(ignore_limit).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    "failed to read dataset {}: {e}",
                    self.ticket.dataset_uuid
                );
                return Ok(vec![]);
            }
        };
        let mut batches = vec![];
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(batch) => batches.push(batch),
                Err(e) => {
                    warn!(
                        "failed to read chunk {} of dataset {}: {e}",
                        batches.len() + 1,
                        self.ticket.dataset_uuid
                    );
                    break;
                }
            }
        }
        debug!(
            "read {} chunk(s) of dataset {}",
            batches.len(),
            self.ticket.dataset_uuid
        );
        Ok(batches)
    }

    /// Limits the dataset to `n` rows and materializes it.
    pub async fn head(&mut self, n: usize) -> ClientResult<RecordBatch> {
        self.set_limit(n);
        self.collect(false).await
    }

    /// Materializes the dataset as rows of type `T`.
    pub async fn to_rows<T: DeserializeOwned>(&self, ignore_limit: bool) -> ClientResult<Vec<T>> {
        let batch = self.collect(ignore_limit).await?;
        if batch.num_rows() == 0 {
            return Ok(vec![]);
        }
        Ok(serde_arrow::from_record_batch(&batch)?)
    }

    /// Materializes the dataset as JSON row objects.
    pub async fn to_json_rows(&self, ignore_limit: bool) -> ClientResult<Vec<Map<String, Value>>> {
        let batch = self.collect(ignore_limit).await?;
        record_batch_to_json_rows(&batch)
    }
}

pub fn record_batch_to_json_rows(batch: &RecordBatch) -> ClientResult<Vec<Map<String, Value>>> {
    if batch.num_rows() == 0 {
        return Ok(vec![]);
    }
    let mut writer = ArrayWriter::new(Vec::new());
    writer.write(batch)?;
    writer.finish()?;
    Ok(serde_json::from_slice(&writer.into_inner())?)
}
