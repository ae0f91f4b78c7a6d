#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::pin::Pin;
use std::sync::{Arc, Mutex};

use arrow::datatypes::SchemaRef;
use arrow::ipc::convert::try_schema_from_ipc_buffer;
use arrow::record_batch::RecordBatch;
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::flight_service_server::{FlightService, FlightServiceServer};
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightEndpoint, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaResult, Ticket,
};
use bytes::Bytes;
use cohort_client::classify::ErrorKind;
use cohort_client::options::{CallHeader, ClientIdentity};
use cohort_client::publish::{PublishConfig, PublishOutcome, PAYLOAD_SEPARATOR};
use cohort_client::Client;
use cohort_common::config::AppConfig;
use common::{dataset_item, visits_batch};
use futures::{stream, Stream, TryStreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tonic::metadata::MetadataMap;
use tonic::transport::server::TcpIncoming;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

type BoxedFlightStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

#[derive(Debug, Clone)]
struct ReceivedPut {
    descriptor: Option<FlightDescriptor>,
    schema: SchemaRef,
    rows: usize,
}

#[derive(Debug, Default)]
struct Received {
    headers: Vec<MetadataMap>,
    actions: Vec<Action>,
    tickets: Vec<Value>,
    puts: Vec<ReceivedPut>,
}

/// A Flight service that answers like the data service and keeps every request it receives.
#[derive(Debug, Clone, Default)]
struct RecordingFlightService {
    received: Arc<Mutex<Received>>,
    action_error: Option<String>,
}

impl RecordingFlightService {
    fn with_action_error(message: &str) -> Self {
        Self {
            action_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    fn received(&self) -> std::sync::MutexGuard<'_, Received> {
        self.received.lock().unwrap()
    }

    fn record_headers(&self, metadata: &MetadataMap) {
        self.received().headers.push(metadata.clone());
    }

    fn header(&self, index: usize, name: &str) -> Option<String> {
        self.received().headers[index]
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

#[tonic::async_trait]
impl FlightService for RecordingFlightService {
    type HandshakeStream = BoxedFlightStream<HandshakeResponse>;

    async fn handshake(
        &self,
        _request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<Response<Self::HandshakeStream>, Status> {
        Err(Status::unimplemented("handshake"))
    }

    type ListFlightsStream = BoxedFlightStream<FlightInfo>;

    async fn list_flights(
        &self,
        request: Request<Criteria>,
    ) -> Result<Response<Self::ListFlightsStream>, Status> {
        self.record_headers(request.metadata());
        let criteria: Value = serde_json::from_slice(&request.into_inner().expression)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        let items = if criteria["page"] == json!(1) {
            vec![dataset_item("DM"), dataset_item("VS")]
        } else {
            vec![]
        };
        let infos: Vec<Result<FlightInfo, Status>> = items
            .iter()
            .map(|item| {
                Ok(FlightInfo::new()
                    .with_endpoint(FlightEndpoint::new().with_ticket(Ticket::new(item.to_string())))
                    .with_total_records(2))
            })
            .collect();
        Ok(Response::new(
            Box::pin(stream::iter(infos)) as Self::ListFlightsStream
        ))
    }

    async fn get_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        Err(Status::unimplemented("get_flight_info"))
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("poll_flight_info"))
    }

    async fn get_schema(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<SchemaResult>, Status> {
        Err(Status::unimplemented("get_schema"))
    }

    type DoGetStream = BoxedFlightStream<FlightData>;

    async fn do_get(
        &self,
        request: Request<Ticket>,
    ) -> Result<Response<Self::DoGetStream>, Status> {
        self.record_headers(request.metadata());
        let Ticket { ticket } = request.into_inner();
        let ticket: Value =
            serde_json::from_slice(&ticket).map_err(|e| Status::invalid_argument(e.to_string()))?;
        let limit = ticket["limit"].as_u64().map(|n| n as usize);
        self.received().tickets.push(ticket);
        let batch = visits_batch();
        let batches = match limit {
            Some(n) => vec![batch.slice(0, n.min(batch.num_rows()))],
            None => vec![batch.clone(), batch],
        };
        let stream = FlightDataEncoderBuilder::new()
            .build(stream::iter(batches.into_iter().map(Ok)))
            .map_err(|e| Status::from_error(Box::new(e)));
        Ok(Response::new(Box::pin(stream) as Self::DoGetStream))
    }

    type DoPutStream = BoxedFlightStream<PutResult>;

    async fn do_put(
        &self,
        request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoPutStream>, Status> {
        self.record_headers(request.metadata());
        let data: Vec<FlightData> = request.into_inner().try_collect().await?;
        let descriptor = data.first().and_then(|d| d.flight_descriptor.clone());
        let mut decoder = FlightRecordBatchStream::new_from_flight_data(stream::iter(
            data.into_iter().map(Ok::<_, FlightError>),
        ));
        let mut batches: Vec<RecordBatch> = vec![];
        while let Some(batch) = decoder
            .try_next()
            .await
            .map_err(|e| Status::invalid_argument(e.to_string()))?
        {
            batches.push(batch);
        }
        let schema = decoder
            .schema()
            .cloned()
            .ok_or_else(|| Status::invalid_argument("upload has no schema"))?;
        let rows = batches.iter().map(|b| b.num_rows()).sum();
        self.received().puts.push(ReceivedPut {
            descriptor,
            schema,
            rows,
        });
        let result = PutResult {
            app_metadata: Bytes::from(json!({"dataset_uuid": "d9", "rows": rows}).to_string()),
        };
        let results: Vec<Result<PutResult, Status>> = vec![Ok(result)];
        Ok(Response::new(
            Box::pin(stream::iter(results)) as Self::DoPutStream
        ))
    }

    type DoExchangeStream = BoxedFlightStream<FlightData>;

    async fn do_exchange(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("do_exchange"))
    }

    type DoActionStream = BoxedFlightStream<arrow_flight::Result>;

    async fn do_action(
        &self,
        request: Request<Action>,
    ) -> Result<Response<Self::DoActionStream>, Status> {
        self.record_headers(request.metadata());
        self.received().actions.push(request.into_inner());
        if let Some(message) = &self.action_error {
            return Err(Status::invalid_argument(message.clone()));
        }
        let result = arrow_flight::Result {
            body: Bytes::from_static(b"{\"message\": \"valid\"}"),
        };
        let results: Vec<Result<arrow_flight::Result, Status>> = vec![Ok(result)];
        Ok(Response::new(
            Box::pin(stream::iter(results)) as Self::DoActionStream
        ))
    }

    type ListActionsStream = BoxedFlightStream<ActionType>;

    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        Err(Status::unimplemented("list_actions"))
    }
}

/// Serves the service on an ephemeral local port and returns a client for it.
async fn serve(service: RecordingFlightService, identity: ClientIdentity) -> Client {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let incoming = TcpIncoming::from_listener(listener, true, None).unwrap();
    tokio::spawn(
        Server::builder()
            .add_service(FlightServiceServer::new(service))
            .serve_with_incoming(incoming),
    );
    let mut config = AppConfig::defaults().unwrap();
    config.client.port = port;
    config.client.version = Some("7.1.0".to_string());
    Client::connect_with_identity(&config, identity)
}

fn config() -> PublishConfig {
    PublishConfig::new("p1", "vs_clean", "vital signs", vec!["SUBJID", "VISIT"])
        .with_source_datasets(["d1"])
}

#[tokio::test]
async fn test_listing_headers_follow_current_token() {
    let service = RecordingFlightService::default();
    let identity = ClientIdentity {
        local_ip: Some("10.0.0.2".to_string()),
        ..Default::default()
    };
    let mut client = serve(service.clone(), identity).await;

    let records = client.list_datasets("s1", "e1", None).await;
    let names: Vec<_> = records
        .iter()
        .map(|r| r.get_str("dataset_name").unwrap())
        .collect();
    assert_eq!(names, ["DM", "VS"]);
    assert_eq!(records[0].total_records, Some(2));
    assert_eq!(
        records[1].dataset.as_ref().unwrap().ticket().dataset_uuid,
        "uuid-VS"
    );
    assert_eq!(service.received().headers.len(), 1);
    assert_eq!(service.header(0, CallHeader::AUTHORIZATION), None);
    assert_eq!(
        service.header(0, CallHeader::CLIENT_VERSION).as_deref(),
        Some("7.1.0")
    );
    assert_eq!(
        service.header(0, CallHeader::CLIENT_IP).as_deref(),
        Some("10.0.0.2")
    );

    // The token is set after the transport was created.
    client.set_token("secret");
    client.list_datasets("s1", "e1", None).await;
    client.set_token("");

    assert_eq!(
        service.header(1, CallHeader::AUTHORIZATION).as_deref(),
        Some("Bearer secret")
    );
}

#[tokio::test]
async fn test_dataset_chunks_decode_from_flight_data() {
    let service = RecordingFlightService::default();
    let client = serve(service.clone(), ClientIdentity::default()).await;
    let mut dataset = client.dataset("s1", "e1", "d1");

    let batch = dataset.collect(false).await.unwrap();
    assert_eq!(batch.num_rows(), 10);
    assert_eq!(batch.schema().fields(), visits_batch().schema().fields());

    let head = dataset.head(2).await.unwrap();
    assert_eq!(head.num_rows(), 2);

    let tickets = service.received().tickets.clone();
    assert_eq!(tickets[0]["dataset_uuid"], json!("d1"));
    assert_eq!(tickets[1]["limit"], json!(2));
}

#[tokio::test]
async fn test_publish_descriptor_rides_first_message() {
    let service = RecordingFlightService::default();
    let client = serve(service.clone(), ClientIdentity::default()).await;

    let outcome = client.publish(config(), visits_batch()).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.to_json()["dataset_uuid"], json!("d9"));
    assert_eq!(outcome.to_json()["rows"], json!(5));
    assert_eq!(outcome.valid_rows(), Some(3));
    assert_eq!(outcome.duplicate_rows_based_on_keys(), Some(2));

    let put = service.received().puts[0].clone();
    let descriptor = put.descriptor.unwrap();
    assert_eq!(descriptor.cmd, config().to_json_bytes().unwrap());
    assert_eq!(put.schema.fields(), visits_batch().schema().fields());
    assert_eq!(put.rows, 5);
}

#[tokio::test]
async fn test_dry_publish_sends_config_and_schema() {
    let service = RecordingFlightService::default();
    let client = serve(service.clone(), ClientIdentity::default()).await;

    let outcome = client.dry_publish(config(), visits_batch()).await.unwrap();
    assert_eq!(
        outcome.to_json(),
        json!({
            "success": true,
            "message": "valid",
            "valid_rows": 3,
            "duplicate_rows_based_on_keys": 2,
        })
    );

    let action = service.received().actions[0].clone();
    assert_eq!(action.r#type, "dry_publish");
    let config_json = config().to_json_bytes().unwrap();
    let body = action.body;
    assert_eq!(&body[..config_json.len()], &config_json[..]);
    let schema_start = config_json.len() + PAYLOAD_SEPARATOR.len();
    assert_eq!(&body[config_json.len()..schema_start], PAYLOAD_SEPARATOR);
    let schema = try_schema_from_ipc_buffer(&body[schema_start..]).unwrap();
    assert_eq!(schema.fields(), visits_batch().schema().fields());
}

#[tokio::test]
async fn test_remote_status_is_classified() {
    let service =
        RecordingFlightService::with_action_error("VALIDATION_ERROR: unknown source dataset");
    let client = serve(service, ClientIdentity::default()).await;

    let outcome = client.dry_publish(config(), visits_batch()).await.unwrap();
    let PublishOutcome::Failure(error) = outcome else {
        panic!("expected a failure, got {outcome:?}");
    };
    assert_eq!(error.error_type, ErrorKind::Validation);
    assert_eq!(error.error_message, "unknown source dataset");
}
