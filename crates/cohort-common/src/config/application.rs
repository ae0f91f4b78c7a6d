use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::config::loader::{deserialize_non_empty_string, deserialize_non_zero};
use crate::error::{CommonError, CommonResult};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// The prefix of environment variables that override the default configuration.
/// Nested keys are separated by `__`, e.g. `COHORT__CLIENT__HOST`.
pub const CONFIG_ENV_PREFIX: &str = "COHORT__";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub listing: ListingConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load() -> CommonResult<Self> {
        Self::figment()
            .admerge(Env::prefixed(CONFIG_ENV_PREFIX).map(|p| p.as_str().replace("__", ".").into()))
            .extract()
            .map_err(|e| CommonError::InvalidArgument(e.to_string()))
    }

    /// Loads the built-in defaults without looking at the environment.
    pub fn defaults() -> CommonResult<Self> {
        Self::figment()
            .extract()
            .map_err(|e| CommonError::InvalidArgument(e.to_string()))
    }

    fn figment() -> Figment {
        Figment::from(Toml::string(DEFAULT_CONFIG))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub enable_tls: bool,
    /// The value of the client version header.
    #[serde(deserialize_with = "deserialize_non_empty_string")]
    pub version: Option<String>,
}

impl ClientConfig {
    pub fn to_url_string(&self) -> String {
        let scheme = if self.enable_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingConfig {
    pub page_size: i64,
    #[serde(deserialize_with = "deserialize_non_zero")]
    pub max_pages: Option<usize>,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            page_size: super::LIST_PAGE_SIZE_DEFAULT,
            max_pages: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_filter: String,
    pub print_spans: bool,
}
