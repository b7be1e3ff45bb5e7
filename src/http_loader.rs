//! An HTTP client that fetches campaigns and targeting rules from a remote store.
use std::{collections::HashMap, time::Duration};

use reqwest::Url;

use crate::{
    data_loader::{group_rules, index_campaigns},
    models::{Campaign, TargetingRule},
    DataLoader, LoaderError,
};

const CAMPAIGNS_ENDPOINT: &str = "campaigns";
const TARGETING_RULES_ENDPOINT: &str = "targeting-rules";

/// Configuration for [`HttpLoader`].
pub struct HttpLoaderConfig {
    /// Base URL of the store. Endpoints are resolved relative to it.
    pub base_url: String,
    /// Timeout for a single request. The cache itself never times out a refresh.
    pub timeout: Duration,
}

impl HttpLoaderConfig {
    /// Default value for [`HttpLoaderConfig::timeout`].
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a config for the store at `base_url` with the default timeout.
    pub fn new(base_url: impl Into<String>) -> HttpLoaderConfig {
        HttpLoaderConfig {
            base_url: base_url.into(),
            timeout: HttpLoaderConfig::DEFAULT_TIMEOUT,
        }
    }

    /// Set [`HttpLoaderConfig::timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> HttpLoaderConfig {
        self.timeout = timeout;
        self
    }
}

/// A [`DataLoader`] that fetches JSON arrays from `{base_url}/campaigns` and
/// `{base_url}/targeting-rules`.
///
/// Uses a blocking client, so it must not be called from within an async runtime thread.
pub struct HttpLoader {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    base_url: Url,
}

impl HttpLoader {
    /// Create a loader.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::InvalidBaseUrl`] if the base URL does not parse, or
    /// [`LoaderError::Network`] if the HTTP client cannot be built.
    pub fn new(config: HttpLoaderConfig) -> Result<HttpLoader, LoaderError> {
        let base_url = parse_base_url(&config.base_url)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(HttpLoader { client, base_url })
    }

    fn fetch<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<T, LoaderError> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(LoaderError::InvalidBaseUrl)?;

        log::debug!(target: "targeting", endpoint; "fetching targeting data");
        let response = self.client.get(url).send()?;

        let response = response.error_for_status().map_err(|err| {
            log::warn!(target: "targeting", endpoint; "received non-200 response while fetching targeting data: {:?}", err);
            LoaderError::from(err)
        })?;

        Ok(response.json()?)
    }
}

/// Parse `base_url`, making sure it ends with a slash so endpoints are joined below it rather than
/// replacing its last path segment.
fn parse_base_url(base_url: &str) -> Result<Url, LoaderError> {
    let normalized = if base_url.ends_with('/') {
        base_url.to_owned()
    } else {
        format!("{base_url}/")
    };
    Url::parse(&normalized).map_err(LoaderError::InvalidBaseUrl)
}

impl DataLoader for HttpLoader {
    fn load_campaigns(&self) -> Result<HashMap<String, Campaign>, LoaderError> {
        index_campaigns(self.fetch(CAMPAIGNS_ENDPOINT)?)
    }

    fn load_targeting_rules(&self) -> Result<HashMap<String, Vec<TargetingRule>>, LoaderError> {
        Ok(group_rules(self.fetch(TARGETING_RULES_ENDPOINT)?))
    }
}
