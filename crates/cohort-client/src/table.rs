use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::{FieldRef, Schema, SchemaRef};
use arrow::ipc::writer::IpcWriteOptions;
use arrow::record_batch::RecordBatch;
use arrow_flight::{IpcMessage, SchemaAsIpc};
use bytes::Bytes;
use serde_arrow::schema::{SchemaLike, TracingOptions};
use serde_json::Value;

use crate::error::{ClientError, ClientResult};

/// An in-memory table made of record batches that share one schema.
#[derive(Debug, Clone)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> ClientResult<Self> {
        if let Some(batch) = batches.iter().find(|b| b.schema().fields() != schema.fields()) {
            return Err(ClientError::invalid(format!(
                "record batch schema does not match the table schema: {:?}",
                batch.schema()
            )));
        }
        Ok(Self { schema, batches })
    }

    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: vec![],
        }
    }

    /// Builds a table from batches, taking the schema from the first batch.
    pub fn from_batches(batches: Vec<RecordBatch>) -> ClientResult<Self> {
        let schema = batches
            .first()
            .map(|b| b.schema())
            .ok_or_else(|| ClientError::invalid("data must contain at least one record batch"))?;
        Self::try_new(schema, batches)
    }

    /// Builds a table from a JSON array of row objects.
    /// The schema is inferred from the rows.
    pub fn from_json_rows(value: &Value) -> ClientResult<Self> {
        let Value::Array(rows) = value else {
            return Err(ClientError::invalid(
                "data must be a tabular record set, i.e. an array of row objects",
            ));
        };
        if let Some(position) = rows.iter().position(|row| !row.is_object()) {
            return Err(ClientError::invalid(format!(
                "data must be a tabular record set, but row {position} is not an object"
            )));
        }
        if rows.is_empty() {
            return Ok(Self::empty(Arc::new(Schema::empty())));
        }
        let options = TracingOptions::default()
            .allow_null_fields(true)
            .coerce_numbers(true);
        let fields = Vec::<FieldRef>::from_samples(rows, options)?;
        let batch = serde_arrow::to_record_batch(&fields, rows)?;
        Self::from_batches(vec![batch])
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    pub fn concat(&self) -> ClientResult<RecordBatch> {
        Ok(concat_batches(&self.schema, &self.batches)?)
    }
}

impl From<RecordBatch> for Table {
    fn from(batch: RecordBatch) -> Self {
        Self {
            schema: batch.schema(),
            batches: vec![batch],
        }
    }
}

/// Encodes the schema as an Arrow IPC schema message.
pub fn schema_to_ipc(schema: &Schema) -> ClientResult<Bytes> {
    let options = IpcWriteOptions::default();
    let IpcMessage(message) = IpcMessage::try_from(SchemaAsIpc::new(schema, &options))?;
    Ok(message)
}
