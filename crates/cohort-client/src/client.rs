use std::fmt;
use std::sync::Arc;

use cohort_common::auth::set_auth_token;
use cohort_common::config::{AppConfig, ListingConfig};

use crate::dataset::DatasetRef;
use crate::error::ClientResult;
use crate::executor::{self, ActionOutput, CommandBody};
use crate::listing::{FlightRecord, ListCriteria, ListSpec};
use crate::options::ClientIdentity;
use crate::publish::{self, PublishConfig, PublishData, PublishOutcome, PublishRequest};
use crate::rpc::ClientOptions;
use crate::ticket::DatasetTicket;
use crate::transport::{FlightClientTransport, FlightTransport};

/// A session with the data service.
///
/// The connection is opened on the first request. Operations on one client run
/// one at a time; clone the client to share the connection.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn FlightTransport>,
    token: Option<String>,
    listing: ListingConfig,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("listing", &self.listing)
            .finish()
    }
}

impl Client {
    pub fn connect(config: &AppConfig) -> Self {
        Self::connect_with_identity(config, ClientIdentity::default())
    }

    /// Creates a client that reports the given identity in its request headers.
    /// The version from the config takes precedence over the identity version.
    pub fn connect_with_identity(config: &AppConfig, identity: ClientIdentity) -> Self {
        let identity = ClientIdentity {
            version: config.client.version.clone().or(identity.version),
            ..identity
        };
        let transport = FlightClientTransport::new(ClientOptions::from(&config.client), identity);
        Self::with_transport(Arc::new(transport), config.listing.clone())
    }

    pub fn with_transport(transport: Arc<dyn FlightTransport>, listing: ListingConfig) -> Self {
        Self {
            transport,
            token: None,
            listing,
        }
    }

    pub fn transport(&self) -> &Arc<dyn FlightTransport> {
        &self.transport
    }

    /// Sets the bearer token of the session.
    /// The token becomes the process-wide token used by every request.
    pub fn set_token(&mut self, token: impl Into<String>) {
        let token = token.into();
        set_auth_token(token.clone());
        self.token = if token.is_empty() { None } else { Some(token) };
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn list_spec(&self, criteria: ListCriteria) -> ListSpec {
        let criteria = criteria.with_page_size(self.listing.page_size);
        ListSpec::new(Arc::clone(&self.transport), criteria).with_max_pages(self.listing.max_pages)
    }

    pub fn study_environments_spec(&self, study_uuid: &str) -> ListSpec {
        self.list_spec(ListCriteria::study_environments(study_uuid))
    }

    pub fn datasets_spec(
        &self,
        study_uuid: &str,
        study_environment_uuid: &str,
        search_dataset_name: Option<&str>,
    ) -> ListSpec {
        let mut criteria = ListCriteria::datasets(study_uuid, study_environment_uuid);
        if let Some(name) = search_dataset_name {
            criteria = criteria.with_search_dataset_name(name);
        }
        self.list_spec(criteria)
    }

    pub fn dataset_versions_spec(
        &self,
        study_uuid: &str,
        study_environment_uuid: &str,
        dataset_uuid: &str,
    ) -> ListSpec {
        self.list_spec(ListCriteria::versions(
            study_uuid,
            study_environment_uuid,
            dataset_uuid,
        ))
    }

    pub async fn list_study_environments(&self, study_uuid: &str) -> Vec<FlightRecord> {
        self.study_environments_spec(study_uuid).collect().await
    }

    pub async fn list_datasets(
        &self,
        study_uuid: &str,
        study_environment_uuid: &str,
        search_dataset_name: Option<&str>,
    ) -> Vec<FlightRecord> {
        self.datasets_spec(study_uuid, study_environment_uuid, search_dataset_name)
            .collect()
            .await
    }

    pub async fn list_dataset_versions(
        &self,
        study_uuid: &str,
        study_environment_uuid: &str,
        dataset_uuid: &str,
    ) -> Vec<FlightRecord> {
        self.dataset_versions_spec(study_uuid, study_environment_uuid, dataset_uuid)
            .collect()
            .await
    }

    /// Returns a reference to a dataset with known identifiers. No request is sent.
    pub fn dataset(
        &self,
        study_uuid: &str,
        study_environment_uuid: &str,
        dataset_uuid: &str,
    ) -> DatasetRef {
        let ticket = DatasetTicket::new(study_uuid, study_environment_uuid, dataset_uuid);
        DatasetRef::new(Arc::clone(&self.transport), ticket)
    }

    /// Runs a generic command. See [executor::execute].
    pub async fn execute(
        &self,
        command: &str,
        body: impl Into<CommandBody>,
    ) -> ClientResult<Option<Vec<ActionOutput>>> {
        let body = body.into().encode()?;
        executor::execute(self.transport.as_ref(), command, body).await
    }

    /// Returns a publish request bound to this client.
    pub fn publish_request(&self) -> PublishRequest {
        PublishRequest::new().client(Arc::clone(&self.transport))
    }

    pub async fn dry_publish(
        &self,
        config: PublishConfig,
        data: impl Into<PublishData>,
    ) -> ClientResult<PublishOutcome> {
        publish::dry_publish(self.publish_request().config(config).data(data)).await
    }

    pub async fn publish(
        &self,
        config: PublishConfig,
        data: impl Into<PublishData>,
    ) -> ClientResult<PublishOutcome> {
        publish::publish(self.publish_request().config(config).data(data)).await
    }
}
