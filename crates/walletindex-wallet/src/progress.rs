//! Listener registry and sync progress fan-out.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use walletindex_core::{
    IncomingTransfer, OutgoingTransfer, SubaddressIndex, SubstrateObserver, SyncListener,
    SyncProgress, Tx, WalletError, WalletListener,
};

const SYNC_MESSAGE: &str = "Synchronizing";

/// Bookkeeping for the sync currently in flight.
struct SyncWindow {
    start: u64,
    /// Exclusive.
    end: u64,
    listener: Option<Arc<dyn SyncListener>>,
}

#[derive(Default)]
struct State {
    listeners: Vec<Arc<dyn WalletListener>>,
    window: Option<SyncWindow>,
}

/// Registered wallet listeners plus the live sync window.
///
/// The lock is held only to snapshot or mutate bookkeeping; listeners are
/// always called after it is released.
#[derive(Default)]
pub struct ProgressTracker {
    state: Mutex<State>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_listener(&self, listener: Arc<dyn WalletListener>) {
        self.state().listeners.push(listener);
    }

    /// Returns `true` if the listener was registered.
    pub fn remove_listener(&self, listener: &Arc<dyn WalletListener>) -> bool {
        let mut state = self.state();
        let before = state.listeners.len();
        state.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        state.listeners.len() != before
    }

    pub fn listeners(&self) -> Vec<Arc<dyn WalletListener>> {
        self.state().listeners.clone()
    }

    /// Open the window for a sync covering `start..end`.
    pub fn begin(
        &self,
        start: u64,
        end: u64,
        listener: Option<Arc<dyn SyncListener>>,
    ) -> Result<(), WalletError> {
        let mut state = self.state();
        if state.window.is_some() {
            return Err(WalletError::Invariant(
                "sync progress is already allocated".into(),
            ));
        }
        state.window = Some(SyncWindow {
            start,
            end,
            listener,
        });
        Ok(())
    }

    pub fn end(&self) {
        self.state().window = None;
    }

    pub fn is_syncing(&self) -> bool {
        self.state().window.is_some()
    }
}

/// Progress for `height` within `window`, extending the window if the chain
/// grew past it.
fn advance(window: &mut SyncWindow, height: u64) -> Option<SyncProgress> {
    if height < window.start {
        return None;
    }
    if height >= window.end {
        window.end = height + 1;
    }
    let done = (height - window.start + 1) as f64;
    let total = (window.end - window.start) as f64;
    Some(SyncProgress {
        height,
        start_height: window.start,
        end_height: window.end,
        percent_done: done / total,
        message: SYNC_MESSAGE.to_string(),
    })
}

impl SubstrateObserver for ProgressTracker {
    fn on_new_block(&self, height: u64) {
        let (listeners, progress, sync_listener) = {
            let mut state = self.state();
            let (progress, sync_listener) = match state.window.as_mut() {
                Some(window) => (advance(window, height), window.listener.clone()),
                None => (None, None),
            };
            (state.listeners.clone(), progress, sync_listener)
        };

        for listener in &listeners {
            listener.on_new_block(height);
        }
        if let Some(progress) = progress {
            debug!(
                height,
                percent_done = progress.percent_done,
                "sync progress"
            );
            for listener in &listeners {
                listener.on_sync_progress(&progress);
            }
            if let Some(listener) = sync_listener {
                listener.on_sync_progress(&progress);
            }
        }
    }

    fn on_money_received(
        &self,
        height: u64,
        tx_id: &str,
        amount: u64,
        subaddress: SubaddressIndex,
        unlock_time: u64,
    ) {
        let listeners = self.listeners();
        if listeners.is_empty() {
            return;
        }
        let transfer = IncomingTransfer {
            tx_id: tx_id.to_string(),
            amount,
            account_index: subaddress.account,
            subaddress_index: subaddress.index,
            address: None,
            num_suggested_confirmations: None,
        };
        let mut tx = Tx::new(tx_id);
        tx.height = Some(height);
        tx.unlock_time = Some(unlock_time);
        tx.incoming_transfers.push(transfer.clone());
        for listener in &listeners {
            listener.on_incoming_transfer(&tx, &transfer);
        }
    }

    fn on_money_spent(&self, height: u64, tx_id: &str, amount: u64, subaddress: SubaddressIndex) {
        let listeners = self.listeners();
        if listeners.is_empty() {
            return;
        }
        let transfer = OutgoingTransfer {
            tx_id: tx_id.to_string(),
            amount,
            account_index: subaddress.account,
            subaddress_indices: vec![subaddress.index],
            addresses: Vec::new(),
            destinations: Vec::new(),
            num_suggested_confirmations: None,
        };
        let mut tx = Tx::new(tx_id);
        tx.height = Some(height);
        tx.outgoing_transfer = Some(transfer.clone());
        for listener in &listeners {
            listener.on_outgoing_transfer(&tx, &transfer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        blocks: Mutex<Vec<u64>>,
        progress: Mutex<Vec<SyncProgress>>,
        incoming: Mutex<Vec<(String, u64)>>,
        outgoing: Mutex<Vec<(String, Vec<u32>)>>,
    }

    impl WalletListener for Recorder {
        fn on_new_block(&self, height: u64) {
            self.blocks.lock().unwrap().push(height);
        }

        fn on_sync_progress(&self, progress: &SyncProgress) {
            self.progress.lock().unwrap().push(progress.clone());
        }

        fn on_incoming_transfer(&self, tx: &Tx, transfer: &IncomingTransfer) {
            assert_eq!(tx.incoming_transfers.len(), 1);
            self.incoming
                .lock()
                .unwrap()
                .push((tx.id.clone(), transfer.amount));
        }

        fn on_outgoing_transfer(&self, tx: &Tx, transfer: &OutgoingTransfer) {
            assert!(tx.is_outgoing());
            self.outgoing
                .lock()
                .unwrap()
                .push((tx.id.clone(), transfer.subaddress_indices.clone()));
        }
    }

    impl SyncListener for Recorder {
        fn on_sync_progress(&self, progress: &SyncProgress) {
            self.progress.lock().unwrap().push(progress.clone());
        }
    }

    #[test]
    fn progress_extends_end_height() {
        let tracker = ProgressTracker::new();
        let recorder = Arc::new(Recorder::default());
        tracker.add_listener(recorder.clone());
        tracker.begin(10, 12, None).unwrap();

        tracker.on_new_block(9);
        tracker.on_new_block(10);
        tracker.on_new_block(11);
        tracker.on_new_block(12);
        tracker.end();

        assert_eq!(*recorder.blocks.lock().unwrap(), vec![9, 10, 11, 12]);
        let progress = recorder.progress.lock().unwrap();
        assert_eq!(progress.len(), 3);
        assert_eq!(progress[0].percent_done, 0.5);
        assert_eq!(progress[1].percent_done, 1.0);
        assert_eq!(progress[2].end_height, 13);
        assert_eq!(progress[2].percent_done, 1.0);
        assert_eq!(progress[2].message, "Synchronizing");
    }

    #[test]
    fn call_scoped_listener_gets_progress_only_while_syncing() {
        let tracker = ProgressTracker::new();
        let scoped = Arc::new(Recorder::default());
        tracker.begin(0, 4, Some(scoped.clone())).unwrap();
        tracker.on_new_block(1);
        tracker.end();
        tracker.on_new_block(2);

        assert_eq!(scoped.progress.lock().unwrap().len(), 1);
        assert!(scoped.blocks.lock().unwrap().is_empty());
    }

    #[test]
    fn double_allocation_is_an_invariant_error() {
        let tracker = ProgressTracker::new();
        tracker.begin(0, 1, None).unwrap();
        assert!(tracker.is_syncing());
        let err = tracker.begin(0, 1, None).unwrap_err();
        assert!(err.is_fatal());
        tracker.end();
        assert!(tracker.begin(0, 1, None).is_ok());
    }

    #[test]
    fn transfer_notifications_are_synthesized() {
        let tracker = ProgressTracker::new();
        let recorder = Arc::new(Recorder::default());
        let as_listener: Arc<dyn WalletListener> = recorder.clone();
        tracker.add_listener(as_listener.clone());

        tracker.on_money_received(100, "aa11", 5_000_000, SubaddressIndex::new(0, 1), 0);
        tracker.on_money_spent(101, "bb22", 700, SubaddressIndex::new(0, 2));

        assert_eq!(
            *recorder.incoming.lock().unwrap(),
            vec![("aa11".to_string(), 5_000_000)]
        );
        assert_eq!(
            *recorder.outgoing.lock().unwrap(),
            vec![("bb22".to_string(), vec![2])]
        );

        assert!(tracker.remove_listener(&as_listener));
        assert!(!tracker.remove_listener(&as_listener));
        assert!(tracker.listeners().is_empty());
    }
}
