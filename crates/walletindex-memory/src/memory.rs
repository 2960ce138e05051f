//! In-memory chain substrate.
//!
//! Holds raw wallet records in RAM and serves them through
//! [`ChainSubstrate`]. `refresh` replays the stored records block by block
//! through the observer, so sync progress and transfer notifications can be
//! exercised without a daemon.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use walletindex_core::error::WalletError;
use walletindex_core::record::{
    ConfirmedOutgoing, IncomingPayment, PoolPayment, SpendableOutput, UnconfirmedOutgoing,
    UNKNOWN_CHANGE,
};
use walletindex_core::substrate::{
    ChainSubstrate, HeightRange, RecordLookup, SubaddressFilter, SubstrateObserver,
};
use walletindex_core::types::{SubaddressIndex, SyncResult};

#[derive(Default)]
struct State {
    connected: bool,
    trusted: bool,
    daemon_height: u64,
    daemon_target_height: u64,
    height: u64,
    restore_height: u64,
    last_block_reward: u64,
    incoming: Vec<IncomingPayment>,
    outgoing: Vec<ConfirmedOutgoing>,
    unconfirmed_outgoing: Vec<UnconfirmedOutgoing>,
    pool: Vec<PoolPayment>,
    /// Pool as of the last `refresh_pool`.
    pool_view: Vec<PoolPayment>,
    outputs: Vec<SpendableOutput>,
    addresses: BTreeMap<SubaddressIndex, String>,
    notes: BTreeMap<String, String>,
    refresh_delay: Option<Duration>,
    connection_delay: Option<Duration>,
    refreshes: Vec<(bool, u64)>,
    rescans: u64,
    pool_refreshes: u64,
    stopped: bool,
}

/// In-memory [`ChainSubstrate`].
///
/// All state is lost when the value is dropped.
pub struct MemorySubstrate {
    state: Mutex<State>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MemorySubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySubstrate {
    /// A connected substrate whose daemon is at height 1.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                connected: true,
                daemon_height: 1,
                height: 1,
                ..Default::default()
            }),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Records ─────────────────────────────────────────────────────────────

    pub fn add_incoming(&self, payment: IncomingPayment) {
        self.state().incoming.push(payment);
    }

    pub fn add_outgoing(&self, transfer: ConfirmedOutgoing) {
        self.state().outgoing.push(transfer);
    }

    pub fn add_unconfirmed_outgoing(&self, transfer: UnconfirmedOutgoing) {
        self.state().unconfirmed_outgoing.push(transfer);
    }

    /// Add a payment to the pool. Visible after the next `refresh_pool`.
    pub fn add_pool_payment(&self, payment: PoolPayment) {
        self.state().pool.push(payment);
    }

    pub fn add_output(&self, output: SpendableOutput) {
        self.state().outputs.push(output);
    }

    /// Move every output of `tx_hash` to `height`.
    pub fn move_outputs(&self, tx_hash: &str, height: u64) {
        for o in self.state().outputs.iter_mut().filter(|o| o.tx_hash == tx_hash) {
            o.block_height = height;
        }
    }

    pub fn set_address(&self, index: SubaddressIndex, address: impl Into<String>) {
        self.state().addresses.insert(index, address.into());
    }

    // ─── Chain / daemon state ────────────────────────────────────────────────

    pub fn set_connected(&self, connected: bool) {
        self.state().connected = connected;
    }

    pub fn set_trusted(&self, trusted: bool) {
        self.state().trusted = trusted;
    }

    pub fn set_daemon_height(&self, height: u64) {
        self.state().daemon_height = height;
    }

    pub fn set_daemon_target_height(&self, height: u64) {
        self.state().daemon_target_height = height;
    }

    pub fn set_height(&self, height: u64) {
        self.state().height = height;
    }

    pub fn set_last_block_reward(&self, reward: u64) {
        self.state().last_block_reward = reward;
    }

    /// Make every `refresh` take at least `delay`.
    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state().refresh_delay = Some(delay);
    }

    /// Make every connection check take at least `delay`.
    pub fn set_connection_delay(&self, delay: Duration) {
        self.state().connection_delay = Some(delay);
    }

    // ─── Observations ────────────────────────────────────────────────────────

    /// `(trusted, start_height)` of every refresh so far.
    pub fn refreshes(&self) -> Vec<(bool, u64)> {
        self.state().refreshes.clone()
    }

    pub fn rescan_count(&self) -> u64 {
        self.state().rescans
    }

    pub fn pool_refresh_count(&self) -> u64 {
        self.state().pool_refreshes
    }

    pub fn is_stopped(&self) -> bool {
        self.state().stopped
    }

    /// Highest number of refreshes ever observed running at once.
    pub fn max_concurrent_refreshes(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn require_connection(&self) -> Result<(), WalletError> {
        if self.state().connected {
            Ok(())
        } else {
            Err(WalletError::NotConnected)
        }
    }

    fn sum_outputs(&self, account: Option<u32>, subaddress: Option<u32>, unlocked_only: bool) -> u64 {
        self.state()
            .outputs
            .iter()
            .filter(|o| !o.spent && (!unlocked_only || o.unlocked))
            .filter(|o| account.map_or(true, |a| a == o.subaddress.account))
            .filter(|o| subaddress.map_or(true, |i| i == o.subaddress.index))
            .map(|o| o.amount)
            .sum()
    }
}

impl RecordLookup for MemorySubstrate {
    fn subaddress_address(&self, index: SubaddressIndex) -> Option<String> {
        self.state().addresses.get(&index).cloned()
    }

    fn tx_note(&self, tx_id: &str) -> Option<String> {
        self.state().notes.get(tx_id).cloned()
    }
}

#[async_trait]
impl ChainSubstrate for MemorySubstrate {
    async fn check_connection(&self) -> Result<bool, WalletError> {
        let delay = self.state().connection_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state().connected)
    }

    async fn daemon_height(&self) -> Result<u64, WalletError> {
        self.require_connection()?;
        Ok(self.state().daemon_height)
    }

    async fn daemon_target_height(&self) -> Result<u64, WalletError> {
        self.require_connection()?;
        Ok(self.state().daemon_target_height)
    }

    fn is_trusted_daemon(&self) -> bool {
        self.state().trusted
    }

    fn height(&self) -> u64 {
        self.state().height
    }

    fn restore_height(&self) -> u64 {
        self.state().restore_height
    }

    fn set_restore_height(&self, height: u64) {
        self.state().restore_height = height;
    }

    fn last_block_reward(&self) -> u64 {
        self.state().last_block_reward
    }

    fn balance(&self, account: Option<u32>, subaddress: Option<u32>) -> u64 {
        self.sum_outputs(account, subaddress, false)
    }

    fn unlocked_balance(&self, account: Option<u32>, subaddress: Option<u32>) -> u64 {
        self.sum_outputs(account, subaddress, true)
    }

    fn set_tx_note(&self, tx_id: &str, note: &str) -> Result<(), WalletError> {
        self.state().notes.insert(tx_id.to_string(), note.to_string());
        Ok(())
    }

    async fn confirmed_incoming(
        &self,
        range: HeightRange,
        filter: &SubaddressFilter,
    ) -> Result<Vec<IncomingPayment>, WalletError> {
        Ok(self
            .state()
            .incoming
            .iter()
            .filter(|p| range.contains(p.block_height) && filter.matches(p.subaddress))
            .cloned()
            .collect())
    }

    async fn confirmed_outgoing(
        &self,
        range: HeightRange,
        filter: &SubaddressFilter,
    ) -> Result<Vec<ConfirmedOutgoing>, WalletError> {
        Ok(self
            .state()
            .outgoing
            .iter()
            .filter(|t| {
                range.contains(t.block_height) && filter.matches_any(t.account, &t.subaddress_indices)
            })
            .cloned()
            .collect())
    }

    async fn unconfirmed_outgoing(
        &self,
        filter: &SubaddressFilter,
    ) -> Result<Vec<UnconfirmedOutgoing>, WalletError> {
        Ok(self
            .state()
            .unconfirmed_outgoing
            .iter()
            .filter(|t| filter.matches_any(t.account, &t.subaddress_indices))
            .cloned()
            .collect())
    }

    async fn refresh_pool(&self) -> Result<(), WalletError> {
        let mut state = self.state();
        state.pool_view = state.pool.clone();
        state.pool_refreshes += 1;
        Ok(())
    }

    async fn unconfirmed_incoming(
        &self,
        filter: &SubaddressFilter,
    ) -> Result<Vec<PoolPayment>, WalletError> {
        Ok(self
            .state()
            .pool_view
            .iter()
            .filter(|p| filter.matches(p.payment.subaddress))
            .cloned()
            .collect())
    }

    async fn outputs(&self) -> Result<Vec<SpendableOutput>, WalletError> {
        Ok(self.state().outputs.clone())
    }

    async fn refresh(
        &self,
        trusted: bool,
        start_height: u64,
        observer: &dyn SubstrateObserver,
    ) -> Result<SyncResult, WalletError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let result = self.replay(trusted, start_height, observer).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn rescan(&self) -> Result<(), WalletError> {
        self.require_connection()?;
        let mut state = self.state();
        state.height = state.restore_height;
        state.rescans += 1;
        Ok(())
    }

    async fn stop(&self) {
        self.state().stopped = true;
    }
}

impl MemorySubstrate {
    async fn replay(
        &self,
        trusted: bool,
        start_height: u64,
        observer: &dyn SubstrateObserver,
    ) -> Result<SyncResult, WalletError> {
        let (delay, end, incoming, outgoing) = {
            let mut state = self.state();
            if !state.connected {
                return Err(WalletError::NotConnected);
            }
            state.refreshes.push((trusted, start_height));
            (
                state.refresh_delay,
                state.daemon_height,
                state.incoming.clone(),
                state.outgoing.clone(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut received_money = false;
        for height in start_height..end {
            for p in incoming.iter().filter(|p| p.block_height == height) {
                observer.on_money_received(height, &p.tx_hash, p.amount, p.subaddress, p.unlock_time);
                received_money = true;
            }
            for t in outgoing.iter().filter(|t| t.block_height == height) {
                let change = if t.change == UNKNOWN_CHANGE { 0 } else { t.change };
                let index = t.subaddress_indices.first().copied().unwrap_or_default();
                observer.on_money_spent(
                    height,
                    &t.tx_hash,
                    t.amount_in.saturating_sub(change),
                    SubaddressIndex::new(t.account, index),
                );
            }
            observer.on_new_block(height);
        }

        let num_blocks_fetched = end.saturating_sub(start_height);
        {
            let mut state = self.state();
            state.height = state.height.max(end);
        }
        debug!(start_height, end, num_blocks_fetched, "memory substrate refreshed");
        Ok(SyncResult {
            num_blocks_fetched,
            received_money,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(tx_hash: &str, height: u64, account: u32, index: u32) -> IncomingPayment {
        IncomingPayment {
            tx_hash: tx_hash.into(),
            payment_id: vec![0; 8],
            block_height: height,
            timestamp: 0,
            amount: 100,
            fee: 1,
            unlock_time: 0,
            subaddress: SubaddressIndex::new(account, index),
            coinbase: false,
        }
    }

    #[derive(Default)]
    struct Recorder {
        blocks: Mutex<Vec<u64>>,
        received: Mutex<Vec<String>>,
    }

    impl SubstrateObserver for Recorder {
        fn on_new_block(&self, height: u64) {
            self.blocks.lock().unwrap().push(height);
        }

        fn on_money_received(&self, _h: u64, tx_id: &str, _a: u64, _s: SubaddressIndex, _u: u64) {
            self.received.lock().unwrap().push(tx_id.to_string());
        }

        fn on_money_spent(&self, _h: u64, _tx_id: &str, _a: u64, _s: SubaddressIndex) {}
    }

    #[tokio::test]
    async fn incoming_filtered_by_range_and_subaddress() {
        let sub = MemorySubstrate::new();
        sub.add_incoming(payment("aa", 10, 0, 0));
        sub.add_incoming(payment("bb", 20, 0, 1));
        sub.add_incoming(payment("cc", 30, 1, 0));

        let all = sub
            .confirmed_incoming(HeightRange::new(0, 100), &SubaddressFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let ranged = sub
            .confirmed_incoming(HeightRange::new(15, 30), &SubaddressFilter::default())
            .await
            .unwrap();
        assert_eq!(ranged.len(), 2);

        let account0 = SubaddressFilter {
            account: Some(0),
            indices: [1].into_iter().collect(),
        };
        let filtered = sub
            .confirmed_incoming(HeightRange::new(0, 100), &account0)
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].tx_hash, "bb");
    }

    #[tokio::test]
    async fn pool_visible_after_refresh_pool() {
        let sub = MemorySubstrate::new();
        sub.add_pool_payment(PoolPayment {
            payment: payment("dd", 0, 0, 0),
            double_spend_seen: false,
        });
        let f = SubaddressFilter::default();
        assert!(sub.unconfirmed_incoming(&f).await.unwrap().is_empty());
        sub.refresh_pool().await.unwrap();
        assert_eq!(sub.unconfirmed_incoming(&f).await.unwrap().len(), 1);
        assert_eq!(sub.pool_refresh_count(), 1);
    }

    #[tokio::test]
    async fn refresh_replays_blocks() {
        let sub = MemorySubstrate::new();
        sub.set_daemon_height(15);
        sub.add_incoming(payment("aa", 12, 0, 0));

        let rec = Recorder::default();
        let result = sub.refresh(false, 10, &rec).await.unwrap();
        assert_eq!(result.num_blocks_fetched, 5);
        assert!(result.received_money);
        assert_eq!(*rec.blocks.lock().unwrap(), vec![10, 11, 12, 13, 14]);
        assert_eq!(*rec.received.lock().unwrap(), vec!["aa".to_string()]);
        assert_eq!(sub.height(), 15);
        assert_eq!(sub.refreshes(), vec![(false, 10)]);
    }

    #[tokio::test]
    async fn disconnected_substrate_refuses_daemon_calls() {
        let sub = MemorySubstrate::new();
        sub.set_connected(false);
        assert!(!sub.check_connection().await.unwrap());
        assert_eq!(sub.daemon_height().await.unwrap_err(), WalletError::NotConnected);
    }

    #[test]
    fn balances_sum_unspent_outputs() {
        let sub = MemorySubstrate::new();
        let out = |index, amount, spent, unlocked| SpendableOutput {
            tx_hash: "aa".into(),
            block_height: 5,
            amount,
            global_index: index,
            subaddress: SubaddressIndex::new(0, 0),
            spent,
            unlocked,
            frozen: false,
            key_image: None,
        };
        sub.add_output(out(1, 10, false, true));
        sub.add_output(out(2, 20, false, false));
        sub.add_output(out(3, 40, true, true));
        assert_eq!(sub.balance(None, None), 30);
        assert_eq!(sub.unlocked_balance(Some(0), None), 10);
        assert_eq!(sub.balance(Some(1), None), 0);
    }
}
