//! A thread-safe in-memory cache of targeting data. [`TargetingCache`] provides concurrent access
//! for readers (delivery evaluation) and writers (periodic and on-demand refreshes).
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
    time::Duration,
};

use crate::{snapshot::Snapshot, DataLoader, Error, LoaderError, Result};

/// Holds the current [`Snapshot`] and knows how to replace it.
///
/// The snapshot itself is never mutated. Refreshes load a complete new one from the
/// [`DataLoader`] without holding any lock, then swap the pointer. Readers only hold the lock long
/// enough to clone the `Arc`.
pub struct TargetingCache {
    loader: Arc<dyn DataLoader>,
    refresh_interval: Duration,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    generation: AtomicU64,
    /// Set while a refresh triggered by [`TargetingCache::ensure_fresh`] is running.
    refresh_in_flight: AtomicBool,
    /// Serializes synchronous reloads after invalidation.
    reload_lock: Mutex<()>,
}

impl TargetingCache {
    /// Create an empty cache. The first [`TargetingCache::read`] loads data synchronously.
    pub fn new(loader: Arc<dyn DataLoader>, refresh_interval: Duration) -> TargetingCache {
        TargetingCache {
            loader,
            refresh_interval,
            snapshot: RwLock::new(None),
            generation: AtomicU64::new(0),
            refresh_in_flight: AtomicBool::new(false),
            reload_lock: Mutex::new(()),
        }
    }

    /// Create a cache and load the initial snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Startup`] if the initial load fails.
    pub fn initialize(
        loader: Arc<dyn DataLoader>,
        refresh_interval: Duration,
    ) -> Result<Arc<TargetingCache>> {
        let cache = TargetingCache::new(loader, refresh_interval);
        cache.refresh().map_err(|err| {
            log::error!(target: "targeting", "initial targeting data load failed: {}", err);
            Error::Startup(err)
        })?;
        Ok(Arc::new(cache))
    }

    /// Maximum age of a snapshot before it is considered stale.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Get the current snapshot without loading anything. Returns `None` after invalidation until
    /// the next successful refresh.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get a consistent snapshot of campaigns and rules.
    ///
    /// Never waits for a background refresh. If there is no snapshot at all (the cache was
    /// invalidated), loads one synchronously; concurrent readers wait for a single reload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SnapshotUnavailable`] if there is no snapshot and reloading fails.
    pub fn read(&self) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }

        let _guard = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Another reader may have finished reloading while we waited for the lock.
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }

        log::info!(target: "targeting", "no targeting snapshot available, reloading synchronously");
        let snapshot = self.load().map_err(|err| {
            log::error!(target: "targeting", "synchronous reload of targeting data failed: {}", err);
            Error::SnapshotUnavailable(err)
        })?;
        self.store(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Load a complete new snapshot and make it current.
    ///
    /// On failure the current snapshot is kept unchanged and the error is logged. Concurrent
    /// refreshes are allowed; whichever finishes last wins.
    pub fn refresh(&self) -> std::result::Result<(), LoaderError> {
        match self.load() {
            Ok(snapshot) => {
                self.store(snapshot);
                Ok(())
            }
            Err(err) => {
                log::warn!(target: "targeting", "failed to refresh targeting data, keeping previous snapshot: {}", err);
                Err(err)
            }
        }
    }

    /// Return `true` if the current snapshot is older than the refresh interval.
    pub fn is_stale(&self) -> bool {
        self.current()
            .is_some_and(|snapshot| snapshot.refreshed_at.elapsed() > self.refresh_interval)
    }

    /// Trigger a background refresh if the current snapshot is stale.
    ///
    /// Returns immediately. Readers keep using the stale snapshot until the refresh lands. At most
    /// one triggered refresh runs at a time. Does nothing when there is no snapshot, as
    /// [`TargetingCache::read`] reloads synchronously in that case.
    pub fn ensure_fresh(self: &Arc<Self>) {
        if !self.is_stale() {
            return;
        }
        if self.refresh_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }

        let cache = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("targeting-refresh".to_owned())
            .spawn(move || {
                let _in_flight = InFlight(&cache.refresh_in_flight);
                log::debug!(target: "targeting", "targeting data is stale, refreshing");
                // Errors are logged by refresh() and the stale snapshot stays in place.
                let _ = cache.refresh();
            });

        if let Err(err) = spawned {
            log::warn!(target: "targeting", "failed to spawn refresh thread: {}", err);
            self.refresh_in_flight.store(false, Ordering::Release);
        }
    }

    /// Drop the current snapshot. The next [`TargetingCache::read`] reloads synchronously.
    pub fn invalidate(&self) {
        let previous = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        log::info!(target: "targeting",
                   generation:? = previous.map(|snapshot| snapshot.generation);
                   "targeting cache invalidated");
    }

    fn load(&self) -> std::result::Result<Arc<Snapshot>, LoaderError> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!(target: "targeting", generation; "loading targeting data");

        let (campaigns, rules) = self.loader.load()?;
        let snapshot = Snapshot::new(generation, campaigns, rules);

        log::info!(target: "targeting",
                   generation,
                   campaigns = snapshot.campaign_count(),
                   rules = snapshot.rule_count(),
                   loaded_at:display = snapshot.loaded_at;
                   "targeting data refreshed");
        Ok(Arc::new(snapshot))
    }

    fn store(&self, snapshot: Arc<Snapshot>) {
        let mut slot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(snapshot);
    }
}

/// Clears the in-flight flag when a triggered refresh ends, even if it panics.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
