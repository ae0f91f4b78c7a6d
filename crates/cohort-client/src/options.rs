use cohort_common::auth::auth_token;
use log::warn;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};

/// The version reported to the service when no version is configured.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct CallHeader;

impl CallHeader {
    pub const AUTHORIZATION: &'static str = "authorization";
    pub const CLIENT_VERSION: &'static str = "x-client-version";
    pub const CLIENT_IP: &'static str = "x-client-ip";
    pub const CLIENT_PUBLIC_IP: &'static str = "x-client-public-ip";
    pub const CLIENT_MAC: &'static str = "x-client-mac";
}

/// Information about the calling machine attached to every request.
/// The addresses are supplied by the caller; the client never looks them up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    pub version: Option<String>,
    pub local_ip: Option<String>,
    pub public_ip: Option<String>,
    pub mac_address: Option<String>,
}

/// The headers of a single RPC call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOptions {
    headers: Vec<(&'static str, String)>,
}

impl CallOptions {
    /// Builds the call options from the identity and the process-wide auth token.
    pub fn current(identity: &ClientIdentity) -> Self {
        Self::with_token(identity, auth_token())
    }

    pub fn with_token(identity: &ClientIdentity, token: Option<String>) -> Self {
        let mut headers = vec![(
            CallHeader::CLIENT_VERSION,
            identity
                .version
                .clone()
                .unwrap_or_else(|| CLIENT_VERSION.to_string()),
        )];
        let optional = [
            (CallHeader::CLIENT_IP, &identity.local_ip),
            (CallHeader::CLIENT_PUBLIC_IP, &identity.public_ip),
            (CallHeader::CLIENT_MAC, &identity.mac_address),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                headers.push((name, value.clone()));
            }
        }
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            headers.push((CallHeader::AUTHORIZATION, format!("Bearer {token}")));
        }
        Self { headers }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(&'static str, String)] {
        &self.headers
    }

    /// Copies the headers into the request metadata.
    /// Values that are not valid ASCII metadata are dropped with a warning.
    pub fn apply(&self, metadata: &mut MetadataMap) {
        for (name, value) in &self.headers {
            match value.parse::<AsciiMetadataValue>() {
                Ok(value) => {
                    metadata.insert(*name, value);
                }
                Err(_) => warn!("dropping invalid value for request header {name}"),
            }
        }
    }

    pub fn to_request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        self.apply(request.metadata_mut());
        request
    }
}
