//! Raw record shapes as delivered by a [`ChainSubstrate`](crate::substrate::ChainSubstrate).
//!
//! Each stream exposes a partial view of the wallet's history. None of them
//! is complete on its own; [`crate::fragment`] turns each record into a
//! canonical tx fragment and [`crate::merge`] reconciles the fragments.

use serde::{Deserialize, Serialize};

use crate::types::SubaddressIndex;

/// Change amount reported when the substrate does not know it.
pub const UNKNOWN_CHANGE: u64 = u64::MAX;

/// A destination as recorded by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDestination {
    pub address: String,
    pub amount: u64,
}

/// A confirmed incoming payment (one per receiving subaddress per tx).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingPayment {
    /// Hex tx hash.
    pub tx_hash: String,
    /// Raw 8 or 32 byte payment id.
    pub payment_id: Vec<u8>,
    pub block_height: u64,
    pub timestamp: u64,
    pub amount: u64,
    pub fee: u64,
    pub unlock_time: u64,
    pub subaddress: SubaddressIndex,
    pub coinbase: bool,
}

/// An incoming payment seen in the tx pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPayment {
    pub payment: IncomingPayment,
    pub double_spend_seen: bool,
}

/// A confirmed outgoing transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedOutgoing {
    pub tx_hash: String,
    pub payment_id: Vec<u8>,
    pub block_height: u64,
    pub timestamp: u64,
    pub amount_in: u64,
    pub amount_out: u64,
    /// [`UNKNOWN_CHANGE`] when not known.
    pub change: u64,
    pub unlock_time: u64,
    pub account: u32,
    pub subaddress_indices: Vec<u32>,
    pub destinations: Vec<RawDestination>,
}

/// Lifecycle state of an outgoing transfer that is not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingState {
    /// Relayed and waiting in the pool.
    Pending,
    /// Relayed, but no longer seen in the pool.
    PendingNotInPool,
    /// Rejected by the daemon.
    Failed,
}

/// An outgoing transfer that is pending or failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnconfirmedOutgoing {
    pub tx_hash: String,
    pub payment_id: Vec<u8>,
    pub amount_in: u64,
    pub amount_out: u64,
    /// [`UNKNOWN_CHANGE`] when not known.
    pub change: u64,
    pub unlock_time: u64,
    pub account: u32,
    pub subaddress_indices: Vec<u32>,
    pub destinations: Vec<RawDestination>,
    pub state: PendingState,
}

impl UnconfirmedOutgoing {
    pub fn is_failed(&self) -> bool {
        self.state == PendingState::Failed
    }
}

/// A spendable (or spent) output owned by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendableOutput {
    pub tx_hash: String,
    pub block_height: u64,
    pub amount: u64,
    pub global_index: u64,
    pub subaddress: SubaddressIndex,
    pub spent: bool,
    pub unlocked: bool,
    pub frozen: bool,
    /// Hex key image, when known.
    pub key_image: Option<String>,
}
