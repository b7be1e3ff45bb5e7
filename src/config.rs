use std::{sync::Arc, time::Duration};

use crate::{DataLoader, DeliveryService, Result};

/// Refresh schedule of the targeting cache.
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Maximum age of a snapshot before requests trigger a refresh, and the period of the
    /// background refresh thread.
    ///
    /// Defaults to [`RefreshConfig::DEFAULT_INTERVAL`].
    pub interval: Duration,
    /// Randomized duration subtracted from each wait of the background refresh thread. This helps
    /// to avoid multiple instances hitting the backing store at the same moment.
    ///
    /// Defaults to [`RefreshConfig::DEFAULT_JITTER`].
    pub jitter: Duration,
}

impl RefreshConfig {
    /// Default value for [`RefreshConfig::interval`].
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
    /// Default value for [`RefreshConfig::jitter`].
    pub const DEFAULT_JITTER: Duration = Duration::ZERO;

    /// Create a config with default values.
    pub fn new() -> RefreshConfig {
        RefreshConfig::default()
    }

    /// Set [`RefreshConfig::interval`].
    pub fn with_interval(mut self, interval: Duration) -> RefreshConfig {
        self.interval = interval;
        self
    }

    /// Set [`RefreshConfig::jitter`].
    pub fn with_jitter(mut self, jitter: Duration) -> RefreshConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for RefreshConfig {
    fn default() -> RefreshConfig {
        RefreshConfig {
            interval: RefreshConfig::DEFAULT_INTERVAL,
            jitter: RefreshConfig::DEFAULT_JITTER,
        }
    }
}

/// Configuration for [`DeliveryService`].
pub struct ServiceConfig {
    pub(crate) loader: Arc<dyn DataLoader>,
    pub(crate) refresh: RefreshConfig,
    pub(crate) background_refresh: bool,
}

impl ServiceConfig {
    /// Create a default configuration reading data from `loader`.
    ///
    /// ```
    /// # use targeting_engine::{JsonFileLoader, ServiceConfig};
    /// let config = ServiceConfig::new(JsonFileLoader::new("data/campaigns.json"));
    /// ```
    pub fn new(loader: impl DataLoader + 'static) -> ServiceConfig {
        ServiceConfig::from_shared_loader(Arc::new(loader))
    }

    /// Same as [`ServiceConfig::new`], for a loader the caller keeps a handle to.
    pub fn from_shared_loader(loader: Arc<dyn DataLoader>) -> ServiceConfig {
        ServiceConfig {
            loader,
            refresh: RefreshConfig::default(),
            background_refresh: true,
        }
    }

    /// Override the refresh schedule.
    pub fn refresh(mut self, refresh: RefreshConfig) -> ServiceConfig {
        self.refresh = refresh;
        self
    }

    /// Whether to run the periodic background refresh thread. Enabled by default. Requests still
    /// trigger refreshes of stale data when it is disabled.
    pub fn background_refresh(mut self, enabled: bool) -> ServiceConfig {
        self.background_refresh = enabled;
        self
    }

    /// Load the initial snapshot and start the service.
    ///
    /// # Errors
    ///
    /// - [`Error::Startup`](crate::Error::Startup) if the initial load fails.
    /// - [`Error::Io`](crate::Error::Io) if the refresh thread cannot be spawned.
    pub fn start(self) -> Result<DeliveryService> {
        DeliveryService::start(self)
    }
}
