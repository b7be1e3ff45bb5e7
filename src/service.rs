use std::sync::Arc;

use crate::{
    models::{Campaign, DeliveryRequest},
    refresh_thread::RefreshThread,
    targeting_cache::TargetingCache,
    DeliveryEvaluator, LoaderError, Result, ServiceConfig,
};

/// The delivery service: a targeting cache, an evaluator on top of it, and the background thread
/// keeping the cache current.
///
/// In order to create a service, first create a [`ServiceConfig`].
///
/// # Examples
/// ```no_run
/// # use targeting_engine::{DeliveryRequest, JsonFileLoader, ServiceConfig};
/// let service = ServiceConfig::new(JsonFileLoader::new("data/campaigns.json")).start()?;
/// let request = DeliveryRequest::from_params(
///     Some("com.abc.xyz".into()),
///     Some("germany".into()),
///     Some("android".into()),
/// )?;
/// let campaigns = service.evaluate(&request)?;
/// service.shutdown()?;
/// # Ok::<(), targeting_engine::Error>(())
/// ```
pub struct DeliveryService {
    cache: Arc<TargetingCache>,
    evaluator: DeliveryEvaluator,
    refresh_thread: Option<RefreshThread>,
}

impl DeliveryService {
    pub(crate) fn start(config: ServiceConfig) -> Result<DeliveryService> {
        let cache = TargetingCache::initialize(config.loader, config.refresh.interval)?;

        let refresh_thread = if config.background_refresh {
            Some(RefreshThread::start(Arc::clone(&cache), config.refresh)?)
        } else {
            None
        };

        Ok(DeliveryService {
            evaluator: DeliveryEvaluator::new(Arc::clone(&cache)),
            cache,
            refresh_thread,
        })
    }

    /// Return the active campaigns matching `request`.
    pub fn evaluate(&self, request: &DeliveryRequest) -> Result<Vec<Campaign>> {
        self.evaluator.evaluate(request)
    }

    /// The evaluator serving [`DeliveryService::evaluate`]. Cheap to clone.
    pub fn evaluator(&self) -> &DeliveryEvaluator {
        &self.evaluator
    }

    /// The underlying cache.
    pub fn cache(&self) -> &Arc<TargetingCache> {
        &self.cache
    }

    /// Reload targeting data now.
    pub fn refresh(&self) -> std::result::Result<(), LoaderError> {
        self.cache.refresh()
    }

    /// Drop all cached data. The next request reloads synchronously.
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    /// Stop the background refresh thread and wait for it to exit.
    pub fn shutdown(self) -> Result<()> {
        match self.refresh_thread {
            Some(thread) => thread.shutdown(),
            None => Ok(()),
        }
    }
}
