//! The RPC primitives the client is built on.
//!
//! [FlightTransport] is the seam between the dataset pipeline and the network.
//! [FlightClientTransport] implements it over an Arrow Flight gRPC connection.

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::{Action, Criteria, FlightData, FlightDescriptor, FlightInfo, PutResult, Ticket};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{stream, StreamExt, TryStreamExt};
use log::debug;

use crate::error::{ClientError, ClientResult};
use crate::options::{CallOptions, ClientIdentity};
use crate::rpc::{ClientHandle, ClientOptions, ClientService};

pub type FlightStream<T> = BoxStream<'static, ClientResult<T>>;

#[tonic::async_trait]
pub trait FlightTransport: Send + Sync {
    /// Invokes a named action and returns the bodies of the results in arrival order.
    async fn do_action(&self, action: Action) -> ClientResult<FlightStream<Bytes>>;

    /// Lists the flights matching the criteria.
    async fn list_flights(&self, criteria: Criteria) -> ClientResult<FlightStream<FlightInfo>>;

    /// Reads the record batches behind a ticket, one chunk at a time.
    async fn do_get(&self, ticket: Ticket) -> ClientResult<FlightStream<RecordBatch>>;

    /// Uploads the batches under the descriptor and closes the upload stream.
    /// Returns the results acknowledged by the service.
    async fn do_put(
        &self,
        descriptor: FlightDescriptor,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> ClientResult<Vec<PutResult>>;
}

/// A [FlightTransport] backed by a lazily connected Arrow Flight client.
#[derive(Debug, Clone)]
pub struct FlightClientTransport {
    inner: ClientHandle<FlightServiceClient<ClientService>>,
    identity: ClientIdentity,
}

impl FlightClientTransport {
    pub fn new(options: ClientOptions, identity: ClientIdentity) -> Self {
        Self {
            inner: ClientHandle::new(options),
            identity,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        self.inner.options()
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        CallOptions::current(&self.identity).to_request(message)
    }
}

#[tonic::async_trait]
impl FlightTransport for FlightClientTransport {
    async fn do_action(&self, action: Action) -> ClientResult<FlightStream<Bytes>> {
        debug!("do_action: {}", action.r#type);
        let response = self
            .inner
            .get()
            .await?
            .do_action(self.request(action))
            .await?;
        let stream = response
            .into_inner()
            .map_ok(|result| result.body)
            .map_err(ClientError::from);
        Ok(stream.boxed())
    }

    async fn list_flights(&self, criteria: Criteria) -> ClientResult<FlightStream<FlightInfo>> {
        let response = self
            .inner
            .get()
            .await?
            .list_flights(self.request(criteria))
            .await?;
        Ok(response.into_inner().map_err(ClientError::from).boxed())
    }

    async fn do_get(&self, ticket: Ticket) -> ClientResult<FlightStream<RecordBatch>> {
        let response = self.inner.get().await?.do_get(self.request(ticket)).await?;
        let stream = response.into_inner().map_err(FlightError::from);
        let stream = FlightRecordBatchStream::new_from_flight_data(stream).map_err(ClientError::from);
        Ok(stream.boxed())
    }

    async fn do_put(
        &self,
        descriptor: FlightDescriptor,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> ClientResult<Vec<PutResult>> {
        // Encoding errors surface before the upload starts.
        let data: Vec<FlightData> = FlightDataEncoderBuilder::new()
            .with_schema(schema)
            .with_flight_descriptor(Some(descriptor))
            .build(stream::iter(batches.into_iter().map(Ok)))
            .try_collect()
            .await?;
        debug!("do_put: sending {} flight data messages", data.len());
        let response = self
            .inner
            .get()
            .await?
            .do_put(self.request(stream::iter(data)))
            .await?;
        let results = response.into_inner().try_collect().await?;
        Ok(results)
    }
}
