//! The `Wallet` facade: queries, sync control, notes and listeners over one
//! [`ChainSubstrate`].

use std::sync::Arc;

use walletindex_core::{
    ChainSubstrate, OutputQuery, SyncListener, SyncResult, Transfer, TransferQuery, Tx, TxGraph,
    TxQuery, WalletError, WalletListener, WalletOutput,
};

use crate::config::WalletConfig;
use crate::history::TxHistory;
use crate::progress::ProgressTracker;
use crate::scheduler::SyncScheduler;

fn validate_tx_id(id: &str) -> Result<(), WalletError> {
    if id.len() == 64 && id.bytes().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(WalletError::invalid(
            "tx_id",
            format!("expected 64 hex characters, got {id:?}"),
        ))
    }
}

/// A wallet over a chain substrate.
///
/// Must be created inside a tokio runtime; the background sync loop is
/// spawned on construction.
pub struct Wallet {
    substrate: Arc<dyn ChainSubstrate>,
    config: WalletConfig,
    history: TxHistory,
    progress: Arc<ProgressTracker>,
    scheduler: SyncScheduler,
}

impl Wallet {
    pub fn new(substrate: Arc<dyn ChainSubstrate>, config: WalletConfig) -> Result<Self, WalletError> {
        let progress = Arc::new(ProgressTracker::new());
        let scheduler = SyncScheduler::spawn(substrate.clone(), progress.clone(), &config)?;
        let history = TxHistory::new(substrate.clone(), &config);
        tracing::info!(
            auto_sync = config.auto_sync,
            sync_interval_ms = config.sync_interval_ms,
            "Wallet opened"
        );
        Ok(Self {
            substrate,
            config,
            history,
            progress,
            scheduler,
        })
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<(), WalletError> {
        if self.scheduler.is_closed() {
            Err(WalletError::Closed)
        } else {
            Ok(())
        }
    }

    // ─── Daemon ──────────────────────────────────────────────────────────────

    /// Whether the daemon answers within the connection timeout.
    pub async fn is_connected(&self) -> bool {
        match self.scheduler.check_connection().await {
            Ok(connected) => connected,
            Err(e) => {
                tracing::debug!(error = %e, "Connection check failed");
                false
            }
        }
    }

    pub async fn daemon_height(&self) -> Result<u64, WalletError> {
        self.substrate.daemon_height().await
    }

    /// Height the daemon is syncing towards, or its height once synced.
    pub async fn daemon_target_height(&self) -> Result<u64, WalletError> {
        match self.substrate.daemon_target_height().await? {
            0 => self.substrate.daemon_height().await,
            target => Ok(target),
        }
    }

    pub async fn is_daemon_synced(&self) -> Result<bool, WalletError> {
        let height = self.substrate.daemon_height().await?;
        let target = self.daemon_target_height().await?;
        Ok(height >= target && height > 1)
    }

    /// `true` once a sync cycle has completed.
    pub fn is_synced(&self) -> bool {
        self.scheduler.is_synced()
    }

    // ─── Heights & balances ──────────────────────────────────────────────────

    pub fn height(&self) -> u64 {
        self.substrate.height()
    }

    /// Daemon chain height; fails when the daemon is unreachable.
    pub async fn chain_height(&self) -> Result<u64, WalletError> {
        if !self.is_connected().await {
            return Err(WalletError::NotConnected);
        }
        self.substrate.daemon_height().await
    }

    pub fn restore_height(&self) -> u64 {
        self.substrate.restore_height()
    }

    pub fn set_restore_height(&self, height: u64) {
        self.substrate.set_restore_height(height);
    }

    pub fn balance(&self, account: Option<u32>, subaddress: Option<u32>) -> u64 {
        self.substrate.balance(account, subaddress)
    }

    pub fn unlocked_balance(&self, account: Option<u32>, subaddress: Option<u32>) -> u64 {
        self.substrate.unlocked_balance(account, subaddress)
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    pub async fn get_txs(&self, query: &TxQuery) -> Result<Vec<Tx>, WalletError> {
        self.ensure_open()?;
        self.history.get_txs(query).await
    }

    pub async fn get_tx_graph(&self, query: &TxQuery) -> Result<TxGraph, WalletError> {
        self.ensure_open()?;
        self.history.get_tx_graph(query).await
    }

    pub async fn get_transfers(&self, query: &TransferQuery) -> Result<Vec<Transfer>, WalletError> {
        self.ensure_open()?;
        self.history.get_transfers(query).await
    }

    pub async fn get_outputs(&self, query: &OutputQuery) -> Result<Vec<WalletOutput>, WalletError> {
        self.ensure_open()?;
        self.history.get_outputs(query).await
    }

    // ─── Notes ───────────────────────────────────────────────────────────────

    pub fn tx_note(&self, tx_id: &str) -> Result<Option<String>, WalletError> {
        validate_tx_id(tx_id)?;
        Ok(self.substrate.tx_note(tx_id).filter(|n| !n.is_empty()))
    }

    pub fn tx_notes(&self, tx_ids: &[String]) -> Result<Vec<Option<String>>, WalletError> {
        for id in tx_ids {
            validate_tx_id(id)?;
        }
        Ok(tx_ids
            .iter()
            .map(|id| self.substrate.tx_note(id).filter(|n| !n.is_empty()))
            .collect())
    }

    pub fn set_tx_note(&self, tx_id: &str, note: &str) -> Result<(), WalletError> {
        validate_tx_id(tx_id)?;
        self.substrate.set_tx_note(tx_id, note)
    }

    /// Set one note per id. Both lists must have the same length.
    pub fn set_tx_notes(&self, tx_ids: &[String], notes: &[String]) -> Result<(), WalletError> {
        if tx_ids.len() != notes.len() {
            return Err(WalletError::invalid(
                "notes",
                format!("{} tx ids but {} notes", tx_ids.len(), notes.len()),
            ));
        }
        for id in tx_ids {
            validate_tx_id(id)?;
        }
        for (id, note) in tx_ids.iter().zip(notes) {
            self.substrate.set_tx_note(id, note)?;
        }
        Ok(())
    }

    // ─── Listeners ───────────────────────────────────────────────────────────

    pub fn add_listener(&self, listener: Arc<dyn WalletListener>) {
        self.progress.add_listener(listener);
    }

    /// Returns `false` if `listener` was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn WalletListener>) -> bool {
        self.progress.remove_listener(listener)
    }

    pub fn listeners(&self) -> Vec<Arc<dyn WalletListener>> {
        self.progress.listeners()
    }

    // ─── Sync ────────────────────────────────────────────────────────────────

    /// Sync now from `start_height` (default: wallet height or restore
    /// height, whichever is higher). Waits for a cycle already in flight.
    pub async fn sync(
        &self,
        start_height: Option<u64>,
        listener: Option<Arc<dyn SyncListener>>,
    ) -> Result<SyncResult, WalletError> {
        self.scheduler.sync(start_height, listener).await
    }

    /// Enable background sync every `interval_ms` (default: configured).
    pub async fn start_syncing(&self, interval_ms: Option<u64>) -> Result<(), WalletError> {
        self.scheduler.start_syncing(interval_ms).await
    }

    pub fn stop_syncing(&self) {
        self.scheduler.stop_syncing();
    }

    pub fn is_auto_syncing(&self) -> bool {
        self.scheduler.is_auto_syncing()
    }

    pub async fn rescan_blockchain(&self) -> Result<(), WalletError> {
        self.scheduler.rescan_blockchain().await
    }

    pub fn is_closed(&self) -> bool {
        self.scheduler.is_closed()
    }

    /// Stop background sync, wait for the cycle in flight and release the
    /// substrate.
    pub async fn close(&self) {
        self.scheduler.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walletindex_memory::MemorySubstrate;

    const ID_A: &str = "aa11aa11aa11aa11aa11aa11aa11aa11aa11aa11aa11aa11aa11aa11aa11aa11";
    const ID_B: &str = "bb22bb22bb22bb22bb22bb22bb22bb22bb22bb22bb22bb22bb22bb22bb22bb22";

    fn wallet(substrate: Arc<MemorySubstrate>) -> Wallet {
        Wallet::new(substrate, WalletConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn notes_round_trip_and_validate() {
        let w = wallet(Arc::new(MemorySubstrate::new()));
        w.set_tx_note(ID_A, "rent").unwrap();
        assert_eq!(w.tx_note(ID_A).unwrap().as_deref(), Some("rent"));

        w.set_tx_notes(&[ID_A.into(), ID_B.into()], &["a".into(), String::new()])
            .unwrap();
        assert_eq!(
            w.tx_notes(&[ID_A.into(), ID_B.into()]).unwrap(),
            vec![Some("a".to_string()), None]
        );

        assert!(matches!(
            w.set_tx_note("aa11", "x"),
            Err(WalletError::InvalidInput { .. })
        ));
        assert!(matches!(
            w.set_tx_notes(&[ID_A.into()], &[]),
            Err(WalletError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn daemon_status() {
        let substrate = Arc::new(MemorySubstrate::new());
        let w = wallet(substrate.clone());
        assert!(w.is_connected().await);
        assert!(!w.is_daemon_synced().await.unwrap());

        substrate.set_daemon_height(100);
        assert_eq!(w.daemon_target_height().await.unwrap(), 100);
        assert!(w.is_daemon_synced().await.unwrap());

        substrate.set_daemon_target_height(200);
        assert!(!w.is_daemon_synced().await.unwrap());

        substrate.set_connected(false);
        assert!(!w.is_connected().await);
        assert_eq!(w.chain_height().await.unwrap_err(), WalletError::NotConnected);
    }

    #[tokio::test]
    async fn heights_and_balances_pass_through() {
        let substrate = Arc::new(MemorySubstrate::new());
        substrate.set_height(42);
        let w = wallet(substrate);
        assert_eq!(w.height(), 42);
        w.set_restore_height(7);
        assert_eq!(w.restore_height(), 7);
        assert_eq!(w.balance(None, None), 0);
        assert_eq!(w.unlocked_balance(Some(0), None), 0);
    }

    #[tokio::test]
    async fn queries_fail_after_close() {
        let w = wallet(Arc::new(MemorySubstrate::new()));
        w.close().await;
        assert!(w.is_closed());
        assert_eq!(
            w.get_txs(&TxQuery::new()).await.unwrap_err(),
            WalletError::Closed
        );
    }

    #[tokio::test]
    async fn listener_registry() {
        struct Quiet;
        impl WalletListener for Quiet {}

        let w = wallet(Arc::new(MemorySubstrate::new()));
        let a: Arc<dyn WalletListener> = Arc::new(Quiet);
        let b: Arc<dyn WalletListener> = Arc::new(Quiet);
        w.add_listener(a.clone());
        w.add_listener(b.clone());
        assert_eq!(w.listeners().len(), 2);
        assert!(w.remove_listener(&a));
        assert_eq!(w.listeners().len(), 1);
        assert!(Arc::ptr_eq(&w.listeners()[0], &b));
    }
}
