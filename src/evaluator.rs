use std::sync::Arc;

use crate::{
    models::{Campaign, DeliveryRequest},
    rules,
    targeting_cache::TargetingCache,
    Result,
};

/// Selects the campaigns to deliver for a request.
#[derive(Clone)]
pub struct DeliveryEvaluator {
    cache: Arc<TargetingCache>,
}

impl DeliveryEvaluator {
    /// Create an evaluator reading from `cache`.
    pub fn new(cache: Arc<TargetingCache>) -> DeliveryEvaluator {
        DeliveryEvaluator { cache }
    }

    /// Return all active campaigns whose targeting rules match `request`, in campaign id order.
    ///
    /// A stale cache triggers a background refresh but evaluation always proceeds against the
    /// snapshot that is currently readable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SnapshotUnavailable`](crate::Error::SnapshotUnavailable) only if there is
    /// no snapshot at all and reloading it fails.
    pub fn evaluate(&self, request: &DeliveryRequest) -> Result<Vec<Campaign>> {
        self.cache.ensure_fresh();
        let snapshot = self.cache.read()?;

        let matching: Vec<Campaign> = snapshot
            .campaigns()
            .filter(|campaign| campaign.is_active())
            .filter(|campaign| rules::matches(snapshot.rules_for(&campaign.id), request))
            .cloned()
            .collect();

        log::trace!(target: "targeting",
                    app = request.app.as_str(),
                    country = request.country.as_str(),
                    os = request.os.as_str(),
                    generation = snapshot.generation,
                    matched = matching.len();
                    "evaluated delivery request");

        Ok(matching)
    }
}
