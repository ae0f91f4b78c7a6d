use std::sync::Arc;

use arrow_flight::flight_service_client::FlightServiceClient;
use cohort_common::config::ClientConfig;
use cohort_telemetry::layers::{TracingClientLayer, TracingClientService};
use log::debug;
use tokio::sync::OnceCell;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tower::ServiceBuilder;

use crate::error::ClientResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub enable_tls: bool,
    pub host: String,
    pub port: u16,
}

impl ClientOptions {
    pub fn to_url_string(&self) -> String {
        let scheme = if self.enable_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            enable_tls: config.enable_tls,
            host: config.host.clone(),
            port: config.port,
        }
    }
}

#[tonic::async_trait]
pub trait ClientBuilder: Sized {
    async fn connect(options: &ClientOptions) -> ClientResult<Self>;
}

/// Maximum header list size for gRPC clients.
/// The value here is larger than the default, so that the client can receive long error
/// messages from the service via HTTP headers.
/// If the header list size is larger than the allowed size, the error details would be
/// dropped silently.
const CLIENT_MAX_HEADER_LIST_SIZE: u32 = 1024 * 1024;

pub type ClientService = TracingClientService<Channel>;

#[tonic::async_trait]
impl ClientBuilder for FlightServiceClient<ClientService> {
    async fn connect(options: &ClientOptions) -> ClientResult<Self> {
        let url = options.to_url_string();
        debug!("connecting to data service at {url}");
        let mut endpoint =
            Endpoint::new(url)?.http2_max_header_list_size(CLIENT_MAX_HEADER_LIST_SIZE);
        if options.enable_tls {
            endpoint = endpoint.tls_config(ClientTlsConfig::new().with_enabled_roots())?;
        }
        let channel = endpoint.connect().await?;
        let channel = ServiceBuilder::new()
            .layer(TracingClientLayer)
            .service(channel);
        Ok(FlightServiceClient::new(channel)
            .max_decoding_message_size(usize::MAX)
            .max_encoding_message_size(usize::MAX))
    }
}

/// A handle to a gRPC client to support connection reuse.
/// The handle can be cheaply cloned and the underlying connection is shared.
#[derive(Debug, Clone)]
pub struct ClientHandle<T> {
    options: Arc<ClientOptions>,
    /// The shared gRPC client which is lazily initialized.
    /// This must be `Arc<OnceCell<T>>` instead of `OnceCell<Arc<T>>` so that clones
    /// made before the first call share one connection.
    inner: Arc<OnceCell<T>>,
}

impl<T: ClientBuilder + Clone> ClientHandle<T> {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options: Arc::new(options),
            inner: Arc::new(OnceCell::new()),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Returns a clone of the RPC client, connecting on first use.
    /// The client requires `&mut self` when making RPC requests,
    /// and cloning it is cheap since the underlying [Channel] is shared.
    pub async fn get(&self) -> ClientResult<T> {
        let options = Arc::clone(&self.options);
        self.inner
            .get_or_try_init(|| T::connect(&options))
            .await
            .cloned()
    }
}
