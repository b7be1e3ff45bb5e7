//! A background thread that periodically refreshes the targeting cache.
use std::{
    sync::{mpsc::RecvTimeoutError, Arc},
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{targeting_cache::TargetingCache, Error, RefreshConfig, Result};

/// A targeting data refresh thread.
///
/// The thread calls [`TargetingCache::refresh`] unconditionally every interval, so data stays
/// current even when no requests arrive. Dropping the handle stops the thread at its next wakeup;
/// use [`RefreshThread::shutdown`] to stop it deterministically.
pub struct RefreshThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the refresh thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,
}

impl RefreshThread {
    /// Starts the refresh thread. The first refresh happens one interval after start, as the
    /// cache is expected to hold an initial snapshot already.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the thread failed to start.
    pub fn start(
        cache: Arc<TargetingCache>,
        config: RefreshConfig,
    ) -> std::io::Result<RefreshThread> {
        // Using `sync_channel` here as it makes `stop_sender` `Sync`. Buffer size of 1 is enough:
        // a stop command is sent with `try_send()` and a full buffer means one is already queued.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let join_handle = std::thread::Builder::new()
            .name("targeting-refresher".to_owned())
            .spawn(move || loop {
                let timeout = jitter(config.interval, config.jitter);
                match stop_receiver.recv_timeout(timeout) {
                    Err(RecvTimeoutError::Timeout) => {
                        log::debug!(target: "targeting", "scheduled refresh of targeting data");
                        // Failures are logged by the cache, which keeps serving the last good
                        // snapshot. We simply try again next interval.
                        let _ = cache.refresh();
                    }
                    Ok(()) => {
                        log::debug!(target: "targeting", "refresh thread received stop command");
                        return;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        log::debug!(target: "targeting", "refresh thread handle dropped, stopping");
                        return;
                    }
                }
            })?;

        Ok(RefreshThread {
            join_handle,
            stop_sender,
        })
    }

    /// Stop the refresh thread.
    ///
    /// This function does not wait for the thread to actually stop. A refresh that is already
    /// running completes first.
    pub fn stop(&self) {
        // Error means that the receiver was dropped (thread exited) or the buffer is full (a stop
        // command is already queued). Either way the thread stops.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the refresh thread and block waiting for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RefreshThreadPanicked`] if the thread has panicked.
    pub fn shutdown(self) -> Result<()> {
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::RefreshThreadPanicked)?;

        Ok(())
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
