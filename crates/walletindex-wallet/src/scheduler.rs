//! SyncScheduler: serializes sync cycles and drives background auto-sync.
//!
//! # Cycle
//! 1. Take the sync lock (one refresh in flight, manual or background).
//! 2. Consume the rescan flag; if set, ask the substrate to rescan.
//! 3. Start at `max(requested or wallet height, restore height)`, lowering
//!    the restore height if the caller asked for an earlier start.
//! 4. Refresh, reporting blocks to the [`ProgressTracker`].
//! 5. If a rescan was requested while refreshing (and this cycle did not
//!    rescan), run once more.
//!
//! # Background loop
//! One spawned task. With auto-sync enabled it sleeps for the sync interval
//! between cycles; otherwise it parks until woken by `start_syncing`,
//! `stop_syncing` or teardown.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use walletindex_core::{ChainSubstrate, SyncListener, SyncResult, WalletError};

use crate::config::WalletConfig;
use crate::progress::ProgressTracker;

/// State shared between the scheduler handle and its background task.
struct Shared {
    substrate: Arc<dyn ChainSubstrate>,
    progress: Arc<ProgressTracker>,
    trusted_daemon: Option<bool>,
    connection_timeout: Duration,
    sync_lock: tokio::sync::Mutex<()>,
    wake: Notify,
    auto_sync: AtomicBool,
    rescan_requested: AtomicBool,
    shutdown: AtomicBool,
    synced: AtomicBool,
    interval_ms: AtomicU64,
}

impl Shared {
    async fn check_connection(&self) -> Result<bool, WalletError> {
        match tokio::time::timeout(self.connection_timeout, self.substrate.check_connection()).await
        {
            Ok(result) => result,
            Err(_) => Err(WalletError::Timeout {
                ms: saturating_millis(self.connection_timeout),
            }),
        }
    }

    async fn ensure_connected(&self) -> Result<(), WalletError> {
        if self.check_connection().await? {
            Ok(())
        } else {
            Err(WalletError::NotConnected)
        }
    }

    async fn lock_and_sync(
        &self,
        start_height: Option<u64>,
        listener: Option<Arc<dyn SyncListener>>,
    ) -> Result<SyncResult, WalletError> {
        let _guard = self.sync_lock.lock().await;
        let mut rescan = self.rescan_requested.swap(false, Ordering::SeqCst);
        loop {
            if rescan {
                tracing::info!("Rescanning blockchain");
                if let Err(e) = self.substrate.rescan().await {
                    self.rescan_requested.store(true, Ordering::SeqCst);
                    return Err(e);
                }
            }
            let result = self.sync_cycle(start_height, listener.clone()).await?;
            if rescan {
                return Ok(result);
            }
            rescan = self.rescan_requested.swap(false, Ordering::SeqCst);
            if !rescan {
                return Ok(result);
            }
        }
    }

    /// One refresh. Caller holds the sync lock.
    async fn sync_cycle(
        &self,
        start_height: Option<u64>,
        listener: Option<Arc<dyn SyncListener>>,
    ) -> Result<SyncResult, WalletError> {
        let restore_height = self.substrate.restore_height();
        let start = start_height.unwrap_or_else(|| self.substrate.height().max(restore_height));
        if start < restore_height {
            self.substrate.set_restore_height(start);
        }
        let end = self.substrate.daemon_height().await?;
        let trusted = self
            .trusted_daemon
            .unwrap_or_else(|| self.substrate.is_trusted_daemon());

        self.progress.begin(start, end, listener)?;
        let outcome = self
            .substrate
            .refresh(trusted, start, self.progress.as_ref())
            .await;
        self.progress.end();
        let result = outcome?;

        self.synced.store(true, Ordering::SeqCst);
        tracing::info!(
            start_height = start,
            end_height = end,
            blocks = result.num_blocks_fetched,
            received_money = result.received_money,
            "Sync cycle complete"
        );
        Ok(result)
    }

    /// Background cycles only run against a reachable, synced daemon.
    async fn background_cycle(&self) -> Result<SyncResult, WalletError> {
        self.ensure_connected().await?;
        let height = self.substrate.daemon_height().await?;
        let target = match self.substrate.daemon_target_height().await? {
            0 => height,
            t => t,
        };
        if height < target || height <= 1 {
            return Err(WalletError::DaemonNotSynced { height, target });
        }
        self.lock_and_sync(None, None).await
    }
}

fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

async fn run_loop(shared: Arc<Shared>) {
    tracing::debug!("Sync loop started");
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        if shared.auto_sync.load(Ordering::SeqCst) {
            let interval = Duration::from_millis(shared.interval_ms.load(Ordering::SeqCst));
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shared.wake.notified() => {}
            }
        } else {
            shared.wake.notified().await;
        }

        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        if !shared.auto_sync.load(Ordering::SeqCst) {
            continue;
        }

        match shared.background_cycle().await {
            Ok(_) => {}
            Err(e @ (WalletError::NotConnected | WalletError::DaemonNotSynced { .. })) => {
                tracing::debug!(reason = %e, "Skipping background sync");
            }
            Err(e) => {
                tracing::error!(error = %e, "Background sync failed");
            }
        }
    }
    tracing::debug!("Sync loop stopped");
}

/// Handle to the sync lock and the background loop.
pub struct SyncScheduler {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    /// Spawn the background loop on the current tokio runtime.
    pub fn spawn(
        substrate: Arc<dyn ChainSubstrate>,
        progress: Arc<ProgressTracker>,
        config: &WalletConfig,
    ) -> Result<Self, WalletError> {
        let handle = Handle::try_current().map_err(|_| {
            WalletError::Invariant("sync scheduler must be created inside a tokio runtime".into())
        })?;
        let shared = Arc::new(Shared {
            substrate,
            progress,
            trusted_daemon: config.trusted_daemon,
            connection_timeout: config.connection_timeout(),
            sync_lock: tokio::sync::Mutex::new(()),
            wake: Notify::new(),
            auto_sync: AtomicBool::new(config.auto_sync),
            rescan_requested: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            synced: AtomicBool::new(false),
            interval_ms: AtomicU64::new(config.sync_interval_ms),
        });
        if config.auto_sync {
            shared.wake.notify_one();
        }
        let task = handle.spawn(run_loop(shared.clone()));
        Ok(Self {
            shared,
            task: Mutex::new(Some(task)),
        })
    }

    fn ensure_open(&self) -> Result<(), WalletError> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            Err(WalletError::Closed)
        } else {
            Ok(())
        }
    }

    /// Probe the daemon, bounded by the connection timeout.
    pub async fn check_connection(&self) -> Result<bool, WalletError> {
        self.shared.check_connection().await
    }

    /// Run one sync cycle now, waiting for any cycle in flight.
    pub async fn sync(
        &self,
        start_height: Option<u64>,
        listener: Option<Arc<dyn SyncListener>>,
    ) -> Result<SyncResult, WalletError> {
        self.ensure_open()?;
        self.shared.ensure_connected().await?;
        self.shared.lock_and_sync(start_height, listener).await
    }

    /// Enable background sync, optionally changing the interval.
    pub async fn start_syncing(&self, interval_ms: Option<u64>) -> Result<(), WalletError> {
        self.ensure_open()?;
        self.shared.ensure_connected().await?;
        if let Some(ms) = interval_ms {
            self.shared.interval_ms.store(ms, Ordering::SeqCst);
        }
        self.shared.auto_sync.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
        tracing::info!(
            interval_ms = self.shared.interval_ms.load(Ordering::SeqCst),
            "Auto-sync enabled"
        );
        Ok(())
    }

    /// Disable background sync. A cycle already running is not interrupted.
    pub fn stop_syncing(&self) {
        self.shared.auto_sync.store(false, Ordering::SeqCst);
        self.shared.wake.notify_one();
        tracing::info!("Auto-sync disabled");
    }

    /// Rescan from the restore height, coalescing with concurrent requests.
    pub async fn rescan_blockchain(&self) -> Result<(), WalletError> {
        self.ensure_open()?;
        self.shared.ensure_connected().await?;
        self.shared.rescan_requested.store(true, Ordering::SeqCst);
        self.shared.lock_and_sync(None, None).await?;
        Ok(())
    }

    pub fn is_auto_syncing(&self) -> bool {
        self.shared.auto_sync.load(Ordering::SeqCst)
    }

    /// `true` once a sync cycle has completed.
    pub fn is_synced(&self) -> bool {
        self.shared.synced.load(Ordering::SeqCst)
    }

    pub fn sync_interval_ms(&self) -> u64 {
        self.shared.interval_ms.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// Disable auto-sync, wake the loop, wait for its current cycle, then
    /// release the substrate. Later calls are no-ops.
    pub async fn close(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.auto_sync.store(false, Ordering::SeqCst);
        self.shared.wake.notify_one();

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Sync loop ended abnormally");
            }
        }
        self.shared.substrate.stop().await;
        tracing::info!("Wallet closed");
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.shared.auto_sync.store(false, Ordering::SeqCst);
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walletindex_memory::MemorySubstrate;

    fn scheduler(substrate: Arc<MemorySubstrate>, config: &WalletConfig) -> SyncScheduler {
        SyncScheduler::spawn(substrate, Arc::new(ProgressTracker::new()), config).unwrap()
    }

    #[test]
    fn spawn_requires_runtime() {
        let err = SyncScheduler::spawn(
            Arc::new(MemorySubstrate::new()),
            Arc::new(ProgressTracker::new()),
            &WalletConfig::default(),
        )
        .err()
        .unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn sync_starts_at_restore_height() {
        let substrate = Arc::new(MemorySubstrate::new());
        substrate.set_daemon_height(50);
        substrate.set_restore_height(20);
        let s = scheduler(substrate.clone(), &WalletConfig::default());

        s.sync(None, None).await.unwrap();
        assert_eq!(substrate.refreshes(), vec![(false, 20)]);
        assert!(s.is_synced());

        // An earlier explicit start lowers the restore height.
        s.sync(Some(5), None).await.unwrap();
        assert_eq!(substrate.restore_height(), 5);
        assert_eq!(substrate.refreshes()[1], (false, 5));
    }

    #[tokio::test]
    async fn trusted_override_is_passed_to_refresh() {
        let substrate = Arc::new(MemorySubstrate::new());
        substrate.set_daemon_height(3);
        let config = WalletConfig {
            trusted_daemon: Some(true),
            ..Default::default()
        };
        let s = scheduler(substrate.clone(), &config);
        s.sync(None, None).await.unwrap();
        assert_eq!(substrate.refreshes(), vec![(true, 1)]);
    }

    #[tokio::test]
    async fn closed_scheduler_refuses_work() {
        let substrate = Arc::new(MemorySubstrate::new());
        let s = scheduler(substrate.clone(), &WalletConfig::default());
        s.close().await;
        s.close().await;
        assert!(s.is_closed());
        assert!(substrate.is_stopped());
        assert_eq!(s.sync(None, None).await.unwrap_err(), WalletError::Closed);
        assert_eq!(
            s.start_syncing(None).await.unwrap_err(),
            WalletError::Closed
        );
    }

    #[tokio::test]
    async fn slow_connection_check_times_out() {
        let substrate = Arc::new(MemorySubstrate::new());
        substrate.set_connection_delay(Duration::from_millis(200));
        let config = WalletConfig {
            connection_timeout_ms: 20,
            ..Default::default()
        };
        let s = scheduler(substrate, &config);
        assert_eq!(
            s.check_connection().await.unwrap_err(),
            WalletError::Timeout { ms: 20 }
        );
    }

    #[test]
    fn timeout_millis_saturate() {
        assert_eq!(saturating_millis(Duration::from_millis(20)), 20);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
    }
}
