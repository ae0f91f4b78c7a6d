//! A synchronous wrapper around [Client].

use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use cohort_common::config::{AppConfig, ListingConfig};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::runtime::{Builder, Runtime};

use crate::client::Client;
use crate::dataset::DatasetRef;
use crate::error::ClientResult;
use crate::executor::{ActionOutput, CommandBody};
use crate::listing::{FlightRecord, ListSpec};
use crate::options::ClientIdentity;
use crate::publish::{PublishConfig, PublishData, PublishOutcome};
use crate::transport::FlightTransport;

/// Runs every operation of a [Client] to completion on a current-thread runtime.
/// Must not be used from within an async context.
#[derive(Debug)]
pub struct BlockingClient {
    runtime: Runtime,
    inner: Client,
}

impl BlockingClient {
    pub fn connect(config: &AppConfig) -> ClientResult<Self> {
        Self::connect_with_identity(config, ClientIdentity::default())
    }

    pub fn connect_with_identity(config: &AppConfig, identity: ClientIdentity) -> ClientResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        // The lazy connection is created inside the runtime on first use.
        let inner = Client::connect_with_identity(config, identity);
        Ok(Self { runtime, inner })
    }

    pub fn with_transport(
        transport: Arc<dyn FlightTransport>,
        listing: ListingConfig,
    ) -> ClientResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            runtime,
            inner: Client::with_transport(transport, listing),
        })
    }

    pub fn client(&self) -> &Client {
        &self.inner
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.inner.set_token(token);
    }

    pub fn token(&self) -> Option<&str> {
        self.inner.token()
    }

    pub fn list_study_environments(&self, study_uuid: &str) -> Vec<FlightRecord> {
        self.runtime
            .block_on(self.inner.list_study_environments(study_uuid))
    }

    pub fn list_datasets(
        &self,
        study_uuid: &str,
        study_environment_uuid: &str,
        search_dataset_name: Option<&str>,
    ) -> Vec<FlightRecord> {
        self.runtime.block_on(self.inner.list_datasets(
            study_uuid,
            study_environment_uuid,
            search_dataset_name,
        ))
    }

    pub fn list_dataset_versions(
        &self,
        study_uuid: &str,
        study_environment_uuid: &str,
        dataset_uuid: &str,
    ) -> Vec<FlightRecord> {
        self.runtime.block_on(self.inner.list_dataset_versions(
            study_uuid,
            study_environment_uuid,
            dataset_uuid,
        ))
    }

    /// Runs a listing spec built from [Client], keeping at most `limit` mapped records.
    pub fn filter_map<T, F>(&self, spec: &ListSpec, limit: Option<usize>, f: F) -> Vec<T>
    where
        F: FnMut(FlightRecord) -> Option<T>,
    {
        self.runtime.block_on(spec.filter_map(limit, f))
    }

    pub fn dataset(
        &self,
        study_uuid: &str,
        study_environment_uuid: &str,
        dataset_uuid: &str,
    ) -> DatasetRef {
        self.inner
            .dataset(study_uuid, study_environment_uuid, dataset_uuid)
    }

    pub fn collect(&self, dataset: &DatasetRef, ignore_limit: bool) -> ClientResult<RecordBatch> {
        self.runtime.block_on(dataset.collect(ignore_limit))
    }

    pub fn head(&self, dataset: &mut DatasetRef, n: usize) -> ClientResult<RecordBatch> {
        self.runtime.block_on(dataset.head(n))
    }

    pub fn to_rows<T: DeserializeOwned>(
        &self,
        dataset: &DatasetRef,
        ignore_limit: bool,
    ) -> ClientResult<Vec<T>> {
        self.runtime.block_on(dataset.to_rows(ignore_limit))
    }

    pub fn to_json_rows(
        &self,
        dataset: &DatasetRef,
        ignore_limit: bool,
    ) -> ClientResult<Vec<Map<String, Value>>> {
        self.runtime.block_on(dataset.to_json_rows(ignore_limit))
    }

    pub fn execute(
        &self,
        command: &str,
        body: impl Into<CommandBody>,
    ) -> ClientResult<Option<Vec<ActionOutput>>> {
        self.runtime.block_on(self.inner.execute(command, body))
    }

    pub fn dry_publish(
        &self,
        config: PublishConfig,
        data: impl Into<PublishData>,
    ) -> ClientResult<PublishOutcome> {
        self.runtime.block_on(self.inner.dry_publish(config, data))
    }

    pub fn publish(
        &self,
        config: PublishConfig,
        data: impl Into<PublishData>,
    ) -> ClientResult<PublishOutcome> {
        self.runtime.block_on(self.inner.publish(config, data))
    }
}
