//! The `ChainSubstrate` trait: wallet primitives the history and sync
//! layers are built on.
//!
//! A substrate owns keys, the scanned chain state and the daemon
//! connection. Everything here treats it as an opaque collaborator.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WalletError;
use crate::record::{
    ConfirmedOutgoing, IncomingPayment, PoolPayment, SpendableOutput, UnconfirmedOutgoing,
};
use crate::types::{SubaddressIndex, SyncResult};

/// Inclusive block height range for confirmed record streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightRange {
    pub min: u64,
    pub max: u64,
}

impl HeightRange {
    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, height: u64) -> bool {
        height >= self.min && height <= self.max
    }
}

/// Account / subaddress restriction passed to record streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubaddressFilter {
    /// `None` = all accounts.
    pub account: Option<u32>,
    /// Empty = all subaddresses of the account.
    pub indices: BTreeSet<u32>,
}

impl SubaddressFilter {
    pub fn matches(&self, subaddress: SubaddressIndex) -> bool {
        self.account.map_or(true, |a| a == subaddress.account)
            && (self.indices.is_empty() || self.indices.contains(&subaddress.index))
    }

    /// Matches a record spending from `account` out of `indices`.
    pub fn matches_any(&self, account: u32, indices: &[u32]) -> bool {
        self.account.map_or(true, |a| a == account)
            && (self.indices.is_empty() || indices.iter().any(|i| self.indices.contains(i)))
    }
}

/// Local lookups the record builders need while normalizing records.
pub trait RecordLookup: Send + Sync {
    /// Encoded address of a subaddress, if the wallet knows it.
    fn subaddress_address(&self, index: SubaddressIndex) -> Option<String>;

    /// Note attached to a tx; empty or absent notes yield `None`.
    fn tx_note(&self, tx_id: &str) -> Option<String>;
}

/// Callbacks the substrate raises while refreshing.
///
/// Implementations must return quickly; they run inside `refresh`.
pub trait SubstrateObserver: Send + Sync {
    fn on_new_block(&self, height: u64);

    fn on_money_received(
        &self,
        height: u64,
        tx_id: &str,
        amount: u64,
        subaddress: SubaddressIndex,
        unlock_time: u64,
    );

    fn on_money_spent(&self, height: u64, tx_id: &str, amount: u64, subaddress: SubaddressIndex);
}

/// Wallet primitives consumed by the history and sync layers.
#[async_trait]
pub trait ChainSubstrate: RecordLookup {
    /// Probe the daemon connection.
    async fn check_connection(&self) -> Result<bool, WalletError>;

    /// Current daemon chain height.
    async fn daemon_height(&self) -> Result<u64, WalletError>;

    /// Height the daemon is syncing towards; `0` when already synced.
    async fn daemon_target_height(&self) -> Result<u64, WalletError>;

    /// Whether the daemon is trusted by default.
    fn is_trusted_daemon(&self) -> bool;

    /// Height the wallet has scanned up to.
    fn height(&self) -> u64;

    fn restore_height(&self) -> u64;

    fn set_restore_height(&self, height: u64);

    /// Reward of the last block, used to suggest confirmation counts.
    fn last_block_reward(&self) -> u64;

    fn balance(&self, account: Option<u32>, subaddress: Option<u32>) -> u64;

    fn unlocked_balance(&self, account: Option<u32>, subaddress: Option<u32>) -> u64;

    fn set_tx_note(&self, tx_id: &str, note: &str) -> Result<(), WalletError>;

    async fn confirmed_incoming(
        &self,
        range: HeightRange,
        filter: &SubaddressFilter,
    ) -> Result<Vec<IncomingPayment>, WalletError>;

    async fn confirmed_outgoing(
        &self,
        range: HeightRange,
        filter: &SubaddressFilter,
    ) -> Result<Vec<ConfirmedOutgoing>, WalletError>;

    async fn unconfirmed_outgoing(
        &self,
        filter: &SubaddressFilter,
    ) -> Result<Vec<UnconfirmedOutgoing>, WalletError>;

    /// Refresh the view of the tx pool. Required before [`Self::unconfirmed_incoming`].
    async fn refresh_pool(&self) -> Result<(), WalletError>;

    async fn unconfirmed_incoming(
        &self,
        filter: &SubaddressFilter,
    ) -> Result<Vec<PoolPayment>, WalletError>;

    async fn outputs(&self) -> Result<Vec<SpendableOutput>, WalletError>;

    /// Scan the chain from `start_height`, reporting blocks and transfers to
    /// `observer` as they are found.
    async fn refresh(
        &self,
        trusted: bool,
        start_height: u64,
        observer: &dyn SubstrateObserver,
    ) -> Result<SyncResult, WalletError>;

    /// Discard scanned state so the next refresh starts over.
    async fn rescan(&self) -> Result<(), WalletError>;

    /// Release daemon resources. Called once, at wallet teardown.
    async fn stop(&self) {}
}
