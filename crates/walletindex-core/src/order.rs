//! Total orderings over txs, incoming transfers and outputs.

use std::cmp::Ordering;

use crate::types::{IncomingTransfer, Tx, WalletOutput};

/// Sort key of a tx: confirmed by height, unconfirmed after all confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HeightKey {
    Confirmed(u64),
    Unconfirmed,
}

impl HeightKey {
    pub fn of(tx: &Tx) -> Self {
        tx.height.map_or(Self::Unconfirmed, Self::Confirmed)
    }
}

/// Order txs by height, unconfirmed after all confirmed.
pub fn cmp_tx_height(a: &Tx, b: &Tx) -> Ordering {
    HeightKey::of(a).cmp(&HeightKey::of(b))
}

/// Order incoming transfers by owning tx height, then account and subaddress.
pub fn cmp_incoming_transfers(
    a: (&Tx, &IncomingTransfer),
    b: (&Tx, &IncomingTransfer),
) -> Ordering {
    cmp_tx_height(a.0, b.0)
        .then(a.1.account_index.cmp(&b.1.account_index))
        .then(a.1.subaddress_index.cmp(&b.1.subaddress_index))
}

/// Order outputs by owning tx height, then account, subaddress and index.
pub fn cmp_outputs(a: (&Tx, &WalletOutput), b: (&Tx, &WalletOutput)) -> Ordering {
    cmp_tx_height(a.0, b.0)
        .then(a.1.account_index.cmp(&b.1.account_index))
        .then(a.1.subaddress_index.cmp(&b.1.subaddress_index))
        .then(a.1.index.cmp(&b.1.index))
}
