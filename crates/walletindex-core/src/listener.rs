//! Wallet and sync listener traits.

use serde::{Deserialize, Serialize};

use crate::types::{IncomingTransfer, OutgoingTransfer, Tx};

/// Progress of a running sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Block just processed.
    pub height: u64,
    pub start_height: u64,
    /// Exclusive end; grows if the chain grows during the sync.
    pub end_height: u64,
    /// In `(0, 1]`.
    pub percent_done: f64,
    pub message: String,
}

/// Receives wallet notifications for as long as it stays registered.
///
/// All methods default to no-ops so listeners implement only what they need.
pub trait WalletListener: Send + Sync {
    fn on_new_block(&self, _height: u64) {}

    fn on_sync_progress(&self, _progress: &SyncProgress) {}

    /// `tx` is a transient fragment synthesized for this notification.
    fn on_incoming_transfer(&self, _tx: &Tx, _transfer: &IncomingTransfer) {}

    /// `tx` is a transient fragment synthesized for this notification.
    fn on_outgoing_transfer(&self, _tx: &Tx, _transfer: &OutgoingTransfer) {}
}

/// Receives progress for a single `sync` call.
pub trait SyncListener: Send + Sync {
    fn on_sync_progress(&self, progress: &SyncProgress);
}
