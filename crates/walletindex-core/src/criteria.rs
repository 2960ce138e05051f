//! CriteriaEngine: filters over txs, transfers and outputs.
//!
//! Every field is optional; an unset field imposes no constraint and all
//! set fields must match. A [`TxQuery`] may embed a [`TransferQuery`] and an
//! [`OutputQuery`], each of which may point back at a tx query. A back link
//! must describe the same query as its parent, and it is never followed
//! while matching: a sub-query is always evaluated with its link to the
//! parent detached.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::WalletError;
use crate::types::{Tx, TransferRef, WalletOutput};

fn bool_eq(value: bool, opt: Option<bool>) -> bool {
    opt == Some(value)
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|c| c.is_ascii_hexdigit())
}

/// Links already being evaluated higher up the recursion.
#[derive(Debug, Clone, Copy, Default)]
struct Detached {
    transfer: bool,
    output: bool,
}

// ─── TxQuery ─────────────────────────────────────────────────────────────────

/// Filter over reconciled txs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxQuery {
    /// Empty = any id.
    pub tx_ids: Vec<String>,
    /// Empty = any payment id.
    pub payment_ids: Vec<String>,
    pub has_payment_id: Option<bool>,
    pub height: Option<u64>,
    pub min_height: Option<u64>,
    pub max_height: Option<u64>,
    pub is_confirmed: Option<bool>,
    pub in_tx_pool: Option<bool>,
    pub is_failed: Option<bool>,
    pub is_relayed: Option<bool>,
    pub is_coinbase: Option<bool>,
    pub is_double_spend_seen: Option<bool>,
    pub is_incoming: Option<bool>,
    pub is_outgoing: Option<bool>,
    /// Merge owned outputs into the returned txs. Defaults to `true`.
    pub include_outputs: Option<bool>,
    /// At least one transfer of the tx must match.
    pub transfer_query: Option<Box<TransferQuery>>,
    /// At least one output of the tx must match.
    pub output_query: Option<Box<OutputQuery>>,
}

impl TxQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tx_id(mut self, id: impl Into<String>) -> Self {
        self.tx_ids.push(id.into());
        self
    }

    pub fn payment_id(mut self, id: impl Into<String>) -> Self {
        self.payment_ids.push(id.into());
        self
    }

    pub fn has_payment_id(mut self, v: bool) -> Self {
        self.has_payment_id = Some(v);
        self
    }

    pub fn height(mut self, h: u64) -> Self {
        self.height = Some(h);
        self
    }

    pub fn min_height(mut self, h: u64) -> Self {
        self.min_height = Some(h);
        self
    }

    pub fn max_height(mut self, h: u64) -> Self {
        self.max_height = Some(h);
        self
    }

    pub fn confirmed(mut self, v: bool) -> Self {
        self.is_confirmed = Some(v);
        self
    }

    pub fn in_pool(mut self, v: bool) -> Self {
        self.in_tx_pool = Some(v);
        self
    }

    pub fn failed(mut self, v: bool) -> Self {
        self.is_failed = Some(v);
        self
    }

    pub fn relayed(mut self, v: bool) -> Self {
        self.is_relayed = Some(v);
        self
    }

    pub fn coinbase(mut self, v: bool) -> Self {
        self.is_coinbase = Some(v);
        self
    }

    pub fn incoming(mut self, v: bool) -> Self {
        self.is_incoming = Some(v);
        self
    }

    pub fn outgoing(mut self, v: bool) -> Self {
        self.is_outgoing = Some(v);
        self
    }

    pub fn include_outputs(mut self, v: bool) -> Self {
        self.include_outputs = Some(v);
        self
    }

    pub fn transfer_query(mut self, query: TransferQuery) -> Self {
        self.transfer_query = Some(Box::new(query.detached()));
        self
    }

    pub fn output_query(mut self, query: OutputQuery) -> Self {
        self.output_query = Some(Box::new(query.detached()));
        self
    }

    /// A copy with both sub-query links removed.
    pub fn detached(&self) -> Self {
        Self {
            transfer_query: None,
            output_query: None,
            ..self.clone()
        }
    }

    /// Returns `true` if no field is set (sub-queries included).
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether outputs should be merged into txs.
    pub fn wants_outputs(&self) -> bool {
        self.include_outputs != Some(false)
    }

    pub fn meets(&self, tx: &Tx) -> bool {
        self.meets_with(tx, Detached::default())
    }

    fn meets_with(&self, tx: &Tx, skip: Detached) -> bool {
        if !self.meets_fields(tx) {
            return false;
        }

        if !skip.transfer {
            if let Some(q) = self.transfer_query.as_deref().filter(|q| !q.is_empty()) {
                if !tx.transfers().any(|t| q.meets_with(t, tx, true)) {
                    return false;
                }
            }
        }

        if !skip.output {
            if let Some(q) = self.output_query.as_deref().filter(|q| !q.is_empty()) {
                if !tx.outputs.iter().any(|o| q.meets_with(o, tx, true)) {
                    return false;
                }
            }
        }
        true
    }

    fn meets_fields(&self, tx: &Tx) -> bool {
        let flags = [
            (self.is_confirmed, tx.is_confirmed),
            (self.in_tx_pool, tx.in_tx_pool),
            (self.is_failed, tx.is_failed),
            (self.is_relayed, tx.is_relayed),
            (self.is_coinbase, tx.is_coinbase),
            (self.is_double_spend_seen, tx.is_double_spend_seen),
        ];
        if flags.iter().any(|(want, have)| want.is_some() && want != have) {
            return false;
        }

        if let Some(want) = self.has_payment_id {
            if want != tx.payment_id.is_some() {
                return false;
            }
        }
        if let Some(want) = self.is_incoming {
            if want != tx.is_incoming() {
                return false;
            }
        }
        if let Some(want) = self.is_outgoing {
            if want != tx.is_outgoing() {
                return false;
            }
        }

        if !self.tx_ids.is_empty() && !self.tx_ids.iter().any(|id| *id == tx.id) {
            return false;
        }
        if !self.payment_ids.is_empty() {
            match &tx.payment_id {
                Some(pid) if self.payment_ids.contains(pid) => {}
                _ => return false,
            }
        }

        let height = tx.height;
        if self.height.is_some() && (height.is_none() || height != self.height) {
            return false;
        }
        if let Some(min) = self.min_height {
            if height.map_or(true, |h| h < min) {
                return false;
            }
        }
        if let Some(max) = self.max_height {
            if height.map_or(true, |h| h > max) {
                return false;
            }
        }
        true
    }

    // ─── Stream classification ───────────────────────────────────────────────

    pub fn can_be_confirmed(&self) -> bool {
        !bool_eq(false, self.is_confirmed)
            && !bool_eq(true, self.in_tx_pool)
            && !bool_eq(true, self.is_failed)
            && !bool_eq(false, self.is_relayed)
    }

    pub fn can_be_in_tx_pool(&self) -> bool {
        !bool_eq(true, self.is_confirmed)
            && !bool_eq(false, self.in_tx_pool)
            && !bool_eq(true, self.is_failed)
            && !bool_eq(false, self.is_relayed)
            && self.height.is_none()
            && self.min_height.is_none()
    }

    pub fn can_be_failed(&self) -> bool {
        !bool_eq(false, self.is_failed)
            && !bool_eq(true, self.is_confirmed)
            && !bool_eq(true, self.in_tx_pool)
    }

    // ─── Validation ──────────────────────────────────────────────────────────

    /// Reject malformed ids, inverted ranges and foreign back links.
    pub fn validate(&self) -> Result<(), WalletError> {
        self.validate_fields()?;
        if let Some(q) = &self.transfer_query {
            q.validate_fields()?;
            if let Some(back) = &q.tx_query {
                if back.detached() != self.detached() {
                    return Err(WalletError::invalid(
                        "tx_query.transfer_query",
                        "transfer query must link back to the same tx query or carry none",
                    ));
                }
            }
        }
        if let Some(q) = &self.output_query {
            q.validate_fields()?;
            if let Some(back) = &q.tx_query {
                if back.detached() != self.detached() {
                    return Err(WalletError::invalid(
                        "tx_query.output_query",
                        "output query must link back to the same tx query or carry none",
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_fields(&self) -> Result<(), WalletError> {
        if let Some(id) = self.tx_ids.iter().find(|id| !is_hex(id)) {
            return Err(WalletError::invalid("tx_ids", format!("not a hex tx id: {id:?}")));
        }
        if let Some(pid) = self
            .payment_ids
            .iter()
            .find(|p| !is_hex(p) || (p.len() != 16 && p.len() != 64))
        {
            return Err(WalletError::invalid(
                "payment_ids",
                format!("payment id must be 16 or 64 hex chars: {pid:?}"),
            ));
        }
        if let (Some(min), Some(max)) = (self.min_height, self.max_height) {
            if min > max {
                return Err(WalletError::invalid(
                    "min_height",
                    format!("min height {min} exceeds max height {max}"),
                ));
            }
        }
        Ok(())
    }
}

// ─── TransferQuery ───────────────────────────────────────────────────────────

/// Filter over incoming and outgoing transfers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferQuery {
    /// `Some(false)` selects outgoing transfers.
    pub is_incoming: Option<bool>,
    pub amount: Option<u64>,
    pub account_index: Option<u32>,
    pub subaddress_index: Option<u32>,
    pub subaddress_indices: Vec<u32>,
    pub address: Option<String>,
    pub addresses: Vec<String>,
    /// Outgoing only; any incoming transfer fails a set value.
    pub has_destinations: Option<bool>,
    /// Constraint on the owning tx.
    pub tx_query: Option<Box<TxQuery>>,
}

impl TransferQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incoming(mut self, v: bool) -> Self {
        self.is_incoming = Some(v);
        self
    }

    pub fn outgoing(mut self, v: bool) -> Self {
        self.is_incoming = Some(!v);
        self
    }

    pub fn amount(mut self, amount: u64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn account(mut self, index: u32) -> Self {
        self.account_index = Some(index);
        self
    }

    pub fn subaddress(mut self, index: u32) -> Self {
        self.subaddress_index = Some(index);
        self
    }

    pub fn subaddresses(mut self, indices: impl IntoIterator<Item = u32>) -> Self {
        self.subaddress_indices.extend(indices);
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn has_destinations(mut self, v: bool) -> Self {
        self.has_destinations = Some(v);
        self
    }

    /// Constrain the owning tx.
    pub fn tx_query(mut self, mut query: TxQuery) -> Self {
        query.transfer_query = None;
        self.tx_query = Some(Box::new(query));
        self
    }

    /// Derived from `is_incoming`.
    pub fn is_outgoing(&self) -> Option<bool> {
        self.is_incoming.map(|v| !v)
    }

    pub fn detached(&self) -> Self {
        Self {
            tx_query: None,
            ..self.clone()
        }
    }

    /// Returns `true` if no transfer field is set. The tx link is ignored.
    pub fn is_empty(&self) -> bool {
        self.detached() == Self::default()
    }

    /// Account / subaddress restriction for record streams.
    pub fn subaddress_set(&self) -> BTreeSet<u32> {
        self.subaddress_indices
            .iter()
            .copied()
            .chain(self.subaddress_index)
            .collect()
    }

    pub fn can_be_incoming(&self) -> bool {
        !bool_eq(false, self.is_incoming)
            && !bool_eq(true, self.is_outgoing())
            && !bool_eq(true, self.has_destinations)
    }

    pub fn can_be_outgoing(&self) -> bool {
        !bool_eq(false, self.is_outgoing()) && !bool_eq(true, self.is_incoming)
    }

    pub fn meets(&self, transfer: TransferRef<'_>, tx: &Tx) -> bool {
        self.meets_with(transfer, tx, false)
    }

    fn meets_with(&self, transfer: TransferRef<'_>, tx: &Tx, skip_tx: bool) -> bool {
        if let Some(want) = self.is_incoming {
            if want != transfer.is_incoming() {
                return false;
            }
        }
        if self.amount.map_or(false, |a| a != transfer.amount()) {
            return false;
        }
        if self
            .account_index
            .map_or(false, |a| a != transfer.account_index())
        {
            return false;
        }

        let fields_ok = match transfer {
            TransferRef::Incoming(t) => {
                self.has_destinations.is_none()
                    && self
                        .address
                        .as_ref()
                        .map_or(true, |a| t.address.as_ref() == Some(a))
                    && (self.addresses.is_empty()
                        || t.address.as_ref().map_or(false, |a| self.addresses.contains(a)))
                    && self
                        .subaddress_index
                        .map_or(true, |i| i == t.subaddress_index)
                    && (self.subaddress_indices.is_empty()
                        || self.subaddress_indices.contains(&t.subaddress_index))
            }
            TransferRef::Outgoing(t) => {
                self.address
                    .as_ref()
                    .map_or(true, |a| t.addresses.contains(a))
                    && (self.addresses.is_empty()
                        || self.addresses.iter().any(|a| t.addresses.contains(a)))
                    && self
                        .subaddress_index
                        .map_or(true, |i| t.subaddress_indices.contains(&i))
                    && (self.subaddress_indices.is_empty()
                        || self
                            .subaddress_indices
                            .iter()
                            .any(|i| t.subaddress_indices.contains(i)))
                    && self
                        .has_destinations
                        .map_or(true, |want| want != t.destinations.is_empty())
            }
        };
        if !fields_ok {
            return false;
        }

        if skip_tx {
            return true;
        }
        match &self.tx_query {
            Some(q) => q.meets_with(
                tx,
                Detached {
                    transfer: true,
                    output: false,
                },
            ),
            None => true,
        }
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        self.validate_fields()?;
        if let Some(q) = &self.tx_query {
            q.validate_fields()?;
            if let Some(back) = &q.transfer_query {
                if back.detached() != self.detached() {
                    return Err(WalletError::invalid(
                        "transfer_query.tx_query",
                        "tx query must link back to the same transfer query or carry none",
                    ));
                }
            }
            if let Some(o) = &q.output_query {
                o.validate_fields()?;
            }
        }
        Ok(())
    }

    fn validate_fields(&self) -> Result<(), WalletError> {
        if self.address.as_deref() == Some("") || self.addresses.iter().any(String::is_empty) {
            return Err(WalletError::invalid("address", "address must not be empty"));
        }
        Ok(())
    }
}

// ─── OutputQuery ─────────────────────────────────────────────────────────────

/// Key image constraint; unset parts match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyImageQuery {
    pub hex: Option<String>,
    pub signature: Option<String>,
}

/// Filter over wallet outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputQuery {
    pub account_index: Option<u32>,
    pub subaddress_index: Option<u32>,
    pub subaddress_indices: Vec<u32>,
    pub amount: Option<u64>,
    pub index: Option<u64>,
    pub is_spent: Option<bool>,
    pub is_unlocked: Option<bool>,
    pub is_frozen: Option<bool>,
    pub key_image: Option<KeyImageQuery>,
    /// Constraint on the owning tx.
    pub tx_query: Option<Box<TxQuery>>,
}

impl OutputQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(mut self, index: u32) -> Self {
        self.account_index = Some(index);
        self
    }

    pub fn subaddress(mut self, index: u32) -> Self {
        self.subaddress_index = Some(index);
        self
    }

    pub fn amount(mut self, amount: u64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn index(mut self, index: u64) -> Self {
        self.index = Some(index);
        self
    }

    pub fn spent(mut self, v: bool) -> Self {
        self.is_spent = Some(v);
        self
    }

    pub fn unlocked(mut self, v: bool) -> Self {
        self.is_unlocked = Some(v);
        self
    }

    pub fn frozen(mut self, v: bool) -> Self {
        self.is_frozen = Some(v);
        self
    }

    pub fn key_image(mut self, hex: impl Into<String>) -> Self {
        self.key_image = Some(KeyImageQuery {
            hex: Some(hex.into()),
            signature: None,
        });
        self
    }

    /// Constrain the owning tx.
    pub fn tx_query(mut self, mut query: TxQuery) -> Self {
        query.output_query = None;
        self.tx_query = Some(Box::new(query));
        self
    }

    pub fn detached(&self) -> Self {
        Self {
            tx_query: None,
            ..self.clone()
        }
    }

    /// Returns `true` if no output field is set. The tx link is ignored.
    pub fn is_empty(&self) -> bool {
        self.detached() == Self::default()
    }

    pub fn meets(&self, output: &WalletOutput, tx: &Tx) -> bool {
        self.meets_with(output, tx, false)
    }

    fn meets_with(&self, output: &WalletOutput, tx: &Tx, skip_tx: bool) -> bool {
        let fields_ok = self.account_index.map_or(true, |a| a == output.account_index)
            && self
                .subaddress_index
                .map_or(true, |i| i == output.subaddress_index)
            && (self.subaddress_indices.is_empty()
                || self.subaddress_indices.contains(&output.subaddress_index))
            && self.amount.map_or(true, |a| a == output.amount)
            && self.index.map_or(true, |i| i == output.index)
            && self.is_spent.map_or(true, |v| v == output.is_spent)
            && self.is_unlocked.map_or(true, |v| v == output.is_unlocked)
            && self.is_frozen.map_or(true, |v| v == output.is_frozen);
        if !fields_ok {
            return false;
        }

        if let Some(want) = &self.key_image {
            let Some(have) = &output.key_image else {
                return false;
            };
            if want.hex.as_ref().map_or(false, |h| *h != have.hex) {
                return false;
            }
            if want.signature.is_some() && want.signature != have.signature {
                return false;
            }
        }

        if skip_tx {
            return true;
        }
        match &self.tx_query {
            Some(q) => q.meets_with(
                tx,
                Detached {
                    transfer: false,
                    output: true,
                },
            ),
            None => true,
        }
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        self.validate_fields()?;
        if let Some(q) = &self.tx_query {
            q.validate_fields()?;
            if let Some(back) = &q.output_query {
                if back.detached() != self.detached() {
                    return Err(WalletError::invalid(
                        "output_query.tx_query",
                        "tx query must link back to the same output query or carry none",
                    ));
                }
            }
            if let Some(t) = &q.transfer_query {
                t.validate_fields()?;
            }
        }
        Ok(())
    }

    fn validate_fields(&self) -> Result<(), WalletError> {
        if let Some(ki) = &self.key_image {
            if ki.hex.as_deref().map_or(false, |h| !is_hex(h)) {
                return Err(WalletError::invalid("key_image", "key image must be hex"));
            }
        }
        Ok(())
    }
}

// ─── StreamPlan ──────────────────────────────────────────────────────────────

/// Which raw record streams a transfer query needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamPlan {
    pub confirmed_incoming: bool,
    pub confirmed_outgoing: bool,
    pub pending_outgoing: bool,
    pub pool_incoming: bool,
    pub failed_outgoing: bool,
}

impl StreamPlan {
    pub fn classify(transfer: &TransferQuery, tx: &TxQuery) -> Self {
        let confirmed = tx.can_be_confirmed();
        let pool = tx.can_be_in_tx_pool();
        let incoming = transfer.can_be_incoming();
        let outgoing = transfer.can_be_outgoing();
        Self {
            confirmed_incoming: incoming && confirmed,
            confirmed_outgoing: outgoing && confirmed,
            pending_outgoing: outgoing && pool,
            pool_incoming: incoming && pool,
            failed_outgoing: outgoing && tx.can_be_failed(),
        }
    }

    /// The pending/failed stream serves both pending and failed sends.
    pub fn unconfirmed_outgoing(&self) -> bool {
        self.pending_outgoing || self.failed_outgoing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Destination, IncomingTransfer, KeyImage, OutgoingTransfer};

    fn confirmed_tx() -> Tx {
        let mut tx = Tx::new("aa11");
        tx.height = Some(100);
        tx.is_confirmed = Some(true);
        tx.in_tx_pool = Some(false);
        tx.is_failed = Some(false);
        tx.is_relayed = Some(true);
        tx.payment_id = Some("abc0000000000001".into());
        tx.incoming_transfers.push(IncomingTransfer {
            tx_id: "aa11".into(),
            amount: 5_000_000,
            account_index: 0,
            subaddress_index: 1,
            address: Some("addr-0-1".into()),
            num_suggested_confirmations: Some(1),
        });
        tx.outputs.push(WalletOutput {
            tx_id: "aa11".into(),
            amount: 5_000_000,
            index: 3,
            account_index: 0,
            subaddress_index: 1,
            is_spent: false,
            is_unlocked: true,
            is_frozen: false,
            key_image: Some(KeyImage {
                hex: "beef".into(),
                signature: None,
            }),
        });
        tx
    }

    fn outgoing_tx() -> Tx {
        let mut tx = Tx::new("bb22");
        tx.is_confirmed = Some(false);
        tx.in_tx_pool = Some(true);
        tx.outgoing_transfer = Some(OutgoingTransfer {
            tx_id: "bb22".into(),
            amount: 700,
            account_index: 1,
            subaddress_indices: vec![0, 2],
            addresses: vec!["addr-1-0".into(), "addr-1-2".into()],
            destinations: vec![Destination {
                address: "dest".into(),
                amount: 700,
            }],
            num_suggested_confirmations: None,
        });
        tx
    }

    #[test]
    fn empty_query_matches_everything() {
        let tx = confirmed_tx();
        assert!(TxQuery::new().meets(&tx));
        assert!(TxQuery::new().meets(&outgoing_tx()));
        let transfer = tx.transfers().next().unwrap();
        assert!(TransferQuery::new().meets(transfer, &tx));
        assert!(OutputQuery::new().meets(&tx.outputs[0], &tx));
    }

    #[test]
    fn any_mismatching_field_rejects() {
        let tx = confirmed_tx();
        let rejecting = [
            TxQuery::new().confirmed(false),
            TxQuery::new().in_pool(true),
            TxQuery::new().tx_id("ffff"),
            TxQuery::new().height(99),
            TxQuery::new().min_height(101),
            TxQuery::new().max_height(99),
            TxQuery::new().has_payment_id(false),
            TxQuery::new().payment_id("0000000000000001"),
            TxQuery::new().outgoing(true),
        ];
        for q in rejecting {
            assert!(!q.meets(&tx), "{q:?}");
        }
        assert!(TxQuery::new().min_height(100).max_height(100).meets(&tx));
    }

    #[test]
    fn height_criteria_reject_unconfirmed() {
        let tx = outgoing_tx();
        assert!(!TxQuery::new().min_height(1).meets(&tx));
        assert!(!TxQuery::new().max_height(1_000).meets(&tx));
        assert!(TxQuery::new().in_pool(true).meets(&tx));
    }

    #[test]
    fn transfer_direction_and_addresses() {
        let tx = outgoing_tx();
        let out = tx.transfers().next().unwrap();
        assert!(TransferQuery::new().outgoing(true).meets(out, &tx));
        assert!(!TransferQuery::new().incoming(true).meets(out, &tx));
        assert!(TransferQuery::new().address("addr-1-2").meets(out, &tx));
        assert!(!TransferQuery::new().address("addr-0-0").meets(out, &tx));
        assert!(TransferQuery::new().subaddresses([2, 9]).meets(out, &tx));
        assert!(!TransferQuery::new().subaddress(1).meets(out, &tx));
        assert!(TransferQuery::new().has_destinations(true).meets(out, &tx));

        let tx = confirmed_tx();
        let inc = tx.transfers().next().unwrap();
        assert!(!TransferQuery::new().has_destinations(false).meets(inc, &tx));
        assert!(TransferQuery::new().subaddress(1).account(0).meets(inc, &tx));
    }

    #[test]
    fn transfer_query_checks_owning_tx() {
        let tx = confirmed_tx();
        let t = tx.transfers().next().unwrap();
        let q = TransferQuery::new().incoming(true).tx_query(TxQuery::new().confirmed(true));
        assert!(q.meets(t, &tx));
        let q = TransferQuery::new().tx_query(TxQuery::new().confirmed(false));
        assert!(!q.meets(t, &tx));
    }

    #[test]
    fn linked_queries_do_not_recurse() {
        let tx = confirmed_tx();
        let q = TxQuery::new()
            .confirmed(true)
            .transfer_query(TransferQuery::new().amount(5_000_000))
            .output_query(OutputQuery::new().index(3));
        assert!(q.meets(&tx));
        q.validate().unwrap();

        let q = TxQuery::new().transfer_query(TransferQuery::new().amount(1));
        assert!(!q.meets(&tx));

        let q = TxQuery::new().output_query(OutputQuery::new().spent(true));
        assert!(!q.meets(&tx));
    }

    #[test]
    fn foreign_back_link_is_rejected() {
        let mut q = TransferQuery::new().incoming(true).tx_query(TxQuery::new());
        q.validate().unwrap();
        if let Some(tx_query) = q.tx_query.as_mut() {
            tx_query.transfer_query = Some(Box::new(TransferQuery::new().amount(7)));
        }
        let err = q.validate().unwrap_err();
        assert!(matches!(err, WalletError::InvalidInput { .. }));

        let detached = q.detached();
        if let Some(tx_query) = q.tx_query.as_mut() {
            tx_query.transfer_query = Some(Box::new(detached));
        }
        q.validate().unwrap();
    }

    #[test]
    fn output_key_image_matching() {
        let tx = confirmed_tx();
        let o = &tx.outputs[0];
        assert!(OutputQuery::new().key_image("beef").meets(o, &tx));
        assert!(!OutputQuery::new().key_image("dead").meets(o, &tx));
        let q = OutputQuery {
            key_image: Some(KeyImageQuery {
                hex: None,
                signature: Some("sig".into()),
            }),
            ..Default::default()
        };
        assert!(!q.meets(o, &tx));
        assert!(OutputQuery::new().spent(false).unlocked(true).meets(o, &tx));
    }

    #[test]
    fn validation_rejects_malformed_input() {
        assert!(TxQuery::new().tx_id("xyz").validate().is_err());
        assert!(TxQuery::new().payment_id("abcd").validate().is_err());
        assert!(TxQuery::new().min_height(10).max_height(5).validate().is_err());
        assert!(TxQuery::new().payment_id("abc0000000000001").validate().is_ok());
        assert!(OutputQuery::new().key_image("zz").validate().is_err());
    }

    #[test]
    fn stream_classification() {
        let all = StreamPlan::classify(&TransferQuery::new(), &TxQuery::new());
        assert!(all.confirmed_incoming && all.confirmed_outgoing);
        assert!(all.pool_incoming && all.pending_outgoing && all.failed_outgoing);

        let plan = StreamPlan::classify(&TransferQuery::new().incoming(true), &TxQuery::new().confirmed(true));
        assert_eq!(
            plan,
            StreamPlan {
                confirmed_incoming: true,
                ..Default::default()
            }
        );

        let plan = StreamPlan::classify(&TransferQuery::new(), &TxQuery::new().min_height(10));
        assert!(!plan.pool_incoming && !plan.pending_outgoing);
        assert!(plan.failed_outgoing);

        let plan = StreamPlan::classify(&TransferQuery::new(), &TxQuery::new().failed(true));
        assert!(plan.unconfirmed_outgoing());
        assert!(!plan.confirmed_incoming && !plan.pool_incoming);

        let plan = StreamPlan::classify(&TransferQuery::new().has_destinations(true), &TxQuery::new());
        assert!(!plan.confirmed_incoming && plan.confirmed_outgoing);
    }
}
