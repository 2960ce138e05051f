//! Record builders: one raw substrate record in, one canonical tx fragment out.
//!
//! Builders are pure apart from the [`RecordLookup`] accessors. Each sets the
//! state flags its source can vouch for:
//!
//! ```text
//! source               confirmed  in_pool    failed  relayed
//! confirmed in/out     true       false      false   true
//! pool incoming        false      true       false   true
//! pending/failed out   false      !failed    state   !failed
//! spendable output     true       false      false   true
//! ```

use crate::record::{
    ConfirmedOutgoing, IncomingPayment, PoolPayment, RawDestination, SpendableOutput,
    UnconfirmedOutgoing, UNKNOWN_CHANGE,
};
use crate::substrate::RecordLookup;
use crate::types::{
    Block, Destination, IncomingTransfer, KeyImage, OutgoingTransfer, SubaddressIndex, Tx,
    WalletOutput, DEFAULT_PAYMENT_ID,
};

/// One canonical tx plus the block it was seen in (confirmed sources only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxFragment {
    pub tx: Tx,
    pub block: Option<Block>,
}

impl TxFragment {
    pub fn unconfirmed(tx: Tx) -> Self {
        Self { tx, block: None }
    }

    /// Wrap `tx` with a block at `height`, recording the tx in the block.
    pub fn confirmed(mut tx: Tx, height: u64, timestamp: Option<u64>) -> Self {
        tx.height = Some(height);
        let mut block = Block::new(height).with_tx(tx.id.clone());
        block.timestamp = timestamp;
        Self {
            tx,
            block: Some(block),
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Hex-encode a raw payment id, shortening long ids padded with zeros and
/// clearing the default id.
pub fn normalize_payment_id(raw: &[u8]) -> Option<String> {
    let mut id = hex::encode(raw);
    if id.len() > 16 && id[16..].bytes().all(|c| c == b'0') {
        id.truncate(16);
    }
    if id.is_empty() || id == DEFAULT_PAYMENT_ID {
        None
    } else {
        Some(id)
    }
}

/// Confirmations of a tx in block `block_height` at chain height `current`.
pub fn num_confirmations(block_height: u64, current: u64, in_tx_pool: bool) -> u64 {
    if block_height >= current || (block_height == 0 && !in_tx_pool) {
        0
    } else {
        current - block_height
    }
}

/// Blocks to wait before `amount` is safe, given the last block reward.
pub fn num_suggested_confirmations(amount: u64, last_block_reward: u64) -> u64 {
    if last_block_reward == 0 {
        0
    } else {
        amount.div_ceil(last_block_reward)
    }
}

/// Net amount of an outgoing transfer.
///
/// A self-transfer nets to zero; its destinations then carry the amount.
pub fn outgoing_amount(amount_in: u64, change: u64, fee: u64, destinations: &[Destination]) -> u64 {
    let change = if change == UNKNOWN_CHANGE { 0 } else { change };
    let amount = amount_in.saturating_sub(change).saturating_sub(fee);
    if amount == 0 && !destinations.is_empty() {
        destinations.iter().map(|d| d.amount).sum()
    } else {
        amount
    }
}

fn destinations(raw: &[RawDestination]) -> Vec<Destination> {
    raw.iter()
        .map(|d| Destination {
            address: d.address.clone(),
            amount: d.amount,
        })
        .collect()
}

// ─── BuildContext ────────────────────────────────────────────────────────────

/// Chain context shared by every builder during one query.
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    /// Wallet height at query time.
    pub height: u64,
    pub last_block_reward: u64,
    pub lookup: &'a dyn RecordLookup,
}

impl<'a> BuildContext<'a> {
    pub fn new(height: u64, last_block_reward: u64, lookup: &'a dyn RecordLookup) -> Self {
        Self {
            height,
            last_block_reward,
            lookup,
        }
    }

    pub fn confirmed_incoming(&self, rec: &IncomingPayment) -> TxFragment {
        let mut tx = self.base_tx(&rec.tx_hash, &rec.payment_id);
        tx.fee = Some(rec.fee);
        tx.unlock_time = Some(rec.unlock_time);
        tx.is_coinbase = Some(rec.coinbase);
        set_confirmed_flags(&mut tx);
        tx.num_confirmations = Some(num_confirmations(rec.block_height, self.height, false));
        tx.incoming_transfers.push(self.incoming_transfer(rec));
        TxFragment::confirmed(tx, rec.block_height, Some(rec.timestamp))
    }

    pub fn confirmed_outgoing(&self, rec: &ConfirmedOutgoing) -> TxFragment {
        let mut tx = self.base_tx(&rec.tx_hash, &rec.payment_id);
        let fee = rec.amount_in.saturating_sub(rec.amount_out);
        tx.fee = Some(fee);
        tx.unlock_time = Some(rec.unlock_time);
        tx.is_coinbase = Some(false);
        set_confirmed_flags(&mut tx);
        tx.num_confirmations = Some(num_confirmations(rec.block_height, self.height, false));
        tx.outgoing_transfer = Some(self.outgoing_transfer(
            &rec.tx_hash,
            rec.amount_in,
            rec.change,
            fee,
            rec.account,
            &rec.subaddress_indices,
            &rec.destinations,
        ));
        TxFragment::confirmed(tx, rec.block_height, Some(rec.timestamp))
    }

    pub fn pool_incoming(&self, rec: &PoolPayment) -> TxFragment {
        let pd = &rec.payment;
        let mut tx = self.base_tx(&pd.tx_hash, &pd.payment_id);
        tx.fee = Some(pd.fee);
        tx.unlock_time = Some(pd.unlock_time);
        tx.is_coinbase = Some(false);
        tx.is_confirmed = Some(false);
        tx.is_failed = Some(false);
        tx.is_relayed = Some(true);
        tx.in_tx_pool = Some(true);
        tx.do_not_relay = Some(false);
        tx.is_double_spend_seen = Some(rec.double_spend_seen);
        tx.num_confirmations = Some(0);
        tx.incoming_transfers.push(self.incoming_transfer(pd));
        TxFragment::unconfirmed(tx)
    }

    pub fn unconfirmed_outgoing(&self, rec: &UnconfirmedOutgoing) -> TxFragment {
        let failed = rec.is_failed();
        let mut tx = self.base_tx(&rec.tx_hash, &rec.payment_id);
        let fee = rec.amount_in.saturating_sub(rec.amount_out);
        tx.fee = Some(fee);
        tx.unlock_time = Some(rec.unlock_time);
        tx.is_coinbase = Some(false);
        tx.is_confirmed = Some(false);
        tx.is_failed = Some(failed);
        tx.is_relayed = Some(!failed);
        tx.in_tx_pool = Some(!failed);
        tx.do_not_relay = Some(false);
        if !failed {
            tx.is_double_spend_seen = Some(false);
        }
        tx.num_confirmations = Some(0);
        tx.outgoing_transfer = Some(self.outgoing_transfer(
            &rec.tx_hash,
            rec.amount_in,
            rec.change,
            fee,
            rec.account,
            &rec.subaddress_indices,
            &rec.destinations,
        ));
        TxFragment::unconfirmed(tx)
    }

    pub fn spendable_output(&self, rec: &SpendableOutput) -> TxFragment {
        let mut tx = Tx::new(rec.tx_hash.clone());
        set_confirmed_flags(&mut tx);
        tx.outputs.push(WalletOutput {
            tx_id: rec.tx_hash.clone(),
            amount: rec.amount,
            index: rec.global_index,
            account_index: rec.subaddress.account,
            subaddress_index: rec.subaddress.index,
            is_spent: rec.spent,
            is_unlocked: rec.unlocked,
            is_frozen: rec.frozen,
            key_image: rec.key_image.as_ref().map(|hex| KeyImage {
                hex: hex.clone(),
                signature: None,
            }),
        });
        TxFragment::confirmed(tx, rec.block_height, None)
    }

    // ─── Internal ────────────────────────────────────────────────────────────

    fn base_tx(&self, tx_hash: &str, payment_id: &[u8]) -> Tx {
        let mut tx = Tx::new(tx_hash);
        tx.payment_id = normalize_payment_id(payment_id);
        tx.note = self.lookup.tx_note(tx_hash).filter(|n| !n.is_empty());
        tx
    }

    fn incoming_transfer(&self, pd: &IncomingPayment) -> IncomingTransfer {
        IncomingTransfer {
            tx_id: pd.tx_hash.clone(),
            amount: pd.amount,
            account_index: pd.subaddress.account,
            subaddress_index: pd.subaddress.index,
            address: self.lookup.subaddress_address(pd.subaddress),
            num_suggested_confirmations: Some(num_suggested_confirmations(
                pd.amount,
                self.last_block_reward,
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn outgoing_transfer(
        &self,
        tx_hash: &str,
        amount_in: u64,
        change: u64,
        fee: u64,
        account: u32,
        subaddress_indices: &[u32],
        raw_destinations: &[RawDestination],
    ) -> OutgoingTransfer {
        let destinations = destinations(raw_destinations);
        let amount = outgoing_amount(amount_in, change, fee, &destinations);
        let addresses = subaddress_indices
            .iter()
            .filter_map(|&i| {
                self.lookup
                    .subaddress_address(SubaddressIndex::new(account, i))
            })
            .collect();
        OutgoingTransfer {
            tx_id: tx_hash.to_string(),
            amount,
            account_index: account,
            subaddress_indices: subaddress_indices.to_vec(),
            addresses,
            destinations,
            num_suggested_confirmations: Some(num_suggested_confirmations(
                amount,
                self.last_block_reward,
            )),
        }
    }
}

fn set_confirmed_flags(tx: &mut Tx) {
    tx.is_confirmed = Some(true);
    tx.is_failed = Some(false);
    tx.is_relayed = Some(true);
    tx.in_tx_pool = Some(false);
    tx.do_not_relay = Some(false);
    tx.is_double_spend_seen = Some(false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PendingState;

    struct Lookup;

    impl RecordLookup for Lookup {
        fn subaddress_address(&self, index: SubaddressIndex) -> Option<String> {
            Some(format!("addr-{}-{}", index.account, index.index))
        }

        fn tx_note(&self, tx_id: &str) -> Option<String> {
            if tx_id == "aa11" {
                Some("rent".into())
            } else {
                Some(String::new())
            }
        }
    }

    fn payment(tx_hash: &str, height: u64, amount: u64) -> IncomingPayment {
        IncomingPayment {
            tx_hash: tx_hash.into(),
            payment_id: vec![0; 32],
            block_height: height,
            timestamp: 1_600_000_000,
            amount,
            fee: 20,
            unlock_time: 0,
            subaddress: SubaddressIndex::new(0, 1),
            coinbase: false,
        }
    }

    fn unconfirmed(state: PendingState) -> UnconfirmedOutgoing {
        UnconfirmedOutgoing {
            tx_hash: "cc33".into(),
            payment_id: vec![0; 8],
            amount_in: 1_000,
            amount_out: 990,
            change: 400,
            unlock_time: 0,
            account: 0,
            subaddress_indices: vec![0],
            destinations: vec![],
            state,
        }
    }

    #[test]
    fn payment_id_normalization() {
        let mut raw = vec![0xab, 0xc0, 0, 0, 0, 0, 0, 1];
        raw.extend_from_slice(&[0; 24]);
        assert_eq!(normalize_payment_id(&raw).as_deref(), Some("abc0000000000001"));

        assert_eq!(normalize_payment_id(&[0; 32]), None);
        assert_eq!(normalize_payment_id(&[0; 8]), None);

        let long: Vec<u8> = (1..=32).collect();
        assert_eq!(normalize_payment_id(&long).map(|s| s.len()), Some(64));
    }

    #[test]
    fn confirmations_are_monotonic() {
        assert_eq!(num_confirmations(100, 100, false), 0);
        assert_eq!(num_confirmations(100, 99, false), 0);
        let counts: Vec<u64> = (100..105).map(|h| num_confirmations(100, h, false)).collect();
        assert_eq!(counts, vec![0, 1, 2, 3, 4]);
        assert_eq!(num_confirmations(0, 50, false), 0);
        assert_eq!(num_confirmations(0, 50, true), 50);
    }

    #[test]
    fn suggested_confirmations_round_up() {
        assert_eq!(num_suggested_confirmations(5, 0), 0);
        assert_eq!(num_suggested_confirmations(10, 5), 2);
        assert_eq!(num_suggested_confirmations(11, 5), 3);
    }

    #[test]
    fn outgoing_amount_falls_back_to_destinations() {
        assert_eq!(outgoing_amount(1_000, UNKNOWN_CHANGE, 10, &[]), 990);
        assert_eq!(outgoing_amount(1_000, 300, 10, &[]), 690);
        let dests = vec![
            Destination { address: "a".into(), amount: 40 },
            Destination { address: "b".into(), amount: 60 },
        ];
        assert_eq!(outgoing_amount(1_000, 990, 10, &dests), 100);
    }

    #[test]
    fn confirmed_incoming_fragment() {
        let ctx = BuildContext::new(110, 3, &Lookup);
        let frag = ctx.confirmed_incoming(&payment("aa11", 100, 10));

        let tx = &frag.tx;
        assert_eq!(tx.id, "aa11");
        assert_eq!(tx.height, Some(100));
        assert_eq!(tx.payment_id, None);
        assert_eq!(tx.note.as_deref(), Some("rent"));
        assert_eq!(tx.is_confirmed, Some(true));
        assert_eq!(tx.in_tx_pool, Some(false));
        assert_eq!(tx.num_confirmations, Some(10));

        let transfer = &tx.incoming_transfers[0];
        assert_eq!(transfer.address.as_deref(), Some("addr-0-1"));
        assert_eq!(transfer.num_suggested_confirmations, Some(4));

        let block = frag.block.unwrap();
        assert_eq!(block.height, 100);
        assert_eq!(block.timestamp, Some(1_600_000_000));
        assert!(block.tx_ids.contains("aa11"));
    }

    #[test]
    fn empty_note_is_cleared() {
        let ctx = BuildContext::new(110, 0, &Lookup);
        let frag = ctx.confirmed_incoming(&payment("bb22", 100, 10));
        assert_eq!(frag.tx.note, None);
    }

    #[test]
    fn pending_and_failed_flags() {
        let ctx = BuildContext::new(110, 0, &Lookup);

        let pending = ctx.unconfirmed_outgoing(&unconfirmed(PendingState::Pending)).tx;
        assert_eq!(pending.is_failed, Some(false));
        assert_eq!(pending.in_tx_pool, Some(true));
        assert_eq!(pending.is_relayed, Some(true));
        assert_eq!(pending.is_double_spend_seen, Some(false));
        assert_eq!(pending.fee, Some(10));
        assert_eq!(pending.outgoing_transfer.as_ref().map(|t| t.amount), Some(590));

        let failed = ctx.unconfirmed_outgoing(&unconfirmed(PendingState::Failed)).tx;
        assert_eq!(failed.is_failed, Some(true));
        assert_eq!(failed.in_tx_pool, Some(false));
        assert_eq!(failed.is_relayed, Some(false));
        assert_eq!(failed.is_double_spend_seen, None);
        assert!(failed.height.is_none());
    }

    #[test]
    fn spendable_output_fragment() {
        let ctx = BuildContext::new(110, 0, &Lookup);
        let frag = ctx.spendable_output(&SpendableOutput {
            tx_hash: "aa11".into(),
            block_height: 100,
            amount: 5_000_000,
            global_index: 3,
            subaddress: SubaddressIndex::new(0, 1),
            spent: false,
            unlocked: true,
            frozen: false,
            key_image: Some("ff".into()),
        });
        assert_eq!(frag.tx.height, Some(100));
        assert_eq!(frag.tx.is_confirmed, Some(true));
        assert_eq!(frag.tx.outputs[0].index, 3);
        assert_eq!(frag.tx.outputs[0].key_image.as_ref().map(|k| k.hex.as_str()), Some("ff"));
        assert_eq!(frag.block.map(|b| b.timestamp), Some(None));
    }
}
