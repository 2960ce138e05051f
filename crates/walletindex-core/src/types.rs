//! Reconciled wallet entities: blocks, txs, transfers and outputs.
//!
//! The graph is held in indexes rather than shared pointers. A [`Tx`] refers
//! to its block by height, a [`Block`] lists the ids of its txs, and every
//! transfer or output carries the id of its owning tx.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Payment id reported by the substrate when none was attached.
pub const DEFAULT_PAYMENT_ID: &str = "0000000000000000";

// ─── SubaddressIndex ─────────────────────────────────────────────────────────

/// A `(account, subaddress)` index pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SubaddressIndex {
    pub account: u32,
    pub index: u32,
}

impl SubaddressIndex {
    pub fn new(account: u32, index: u32) -> Self {
        Self { account, index }
    }
}

// ─── Block ───────────────────────────────────────────────────────────────────

/// A confirmed block as seen by the wallet.
///
/// Unconfirmed txs have no block; they are never listed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    /// Unix timestamp (seconds). Not every record stream reports it.
    pub timestamp: Option<u64>,
    /// Ids of the wallet txs contained in this block.
    pub tx_ids: BTreeSet<String>,
}

impl Block {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            timestamp: None,
            tx_ids: BTreeSet::new(),
        }
    }

    pub fn with_tx(mut self, tx_id: impl Into<String>) -> Self {
        self.tx_ids.insert(tx_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

// ─── Tx ──────────────────────────────────────────────────────────────────────

/// A wallet transaction, reconciled from one or more record streams.
///
/// Flags are optional because some streams do not know them; a fully built
/// fragment sets every flag its source can vouch for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    /// Hex transaction hash.
    pub id: String,
    /// Height of the owning block; `None` while unconfirmed.
    pub height: Option<u64>,
    /// 16 or 64 hex characters; `None` when absent or the default id.
    pub payment_id: Option<String>,
    pub fee: Option<u64>,
    pub unlock_time: Option<u64>,
    pub note: Option<String>,
    pub is_confirmed: Option<bool>,
    pub is_failed: Option<bool>,
    pub is_relayed: Option<bool>,
    pub in_tx_pool: Option<bool>,
    pub do_not_relay: Option<bool>,
    pub is_double_spend_seen: Option<bool>,
    pub is_coinbase: Option<bool>,
    pub num_confirmations: Option<u64>,
    /// Present only on freshly created sends.
    pub key: Option<String>,
    pub full_hex: Option<String>,
    pub metadata: Option<String>,
    pub outgoing_transfer: Option<OutgoingTransfer>,
    pub incoming_transfers: Vec<IncomingTransfer>,
    pub outputs: Vec<WalletOutput>,
}

impl Tx {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Returns `true` if the wallet received funds in this tx.
    pub fn is_incoming(&self) -> bool {
        !self.incoming_transfers.is_empty()
    }

    /// Returns `true` if the wallet spent funds in this tx.
    pub fn is_outgoing(&self) -> bool {
        self.outgoing_transfer.is_some()
    }

    /// A reconciled tx must own at least one transfer or output.
    pub fn has_content(&self) -> bool {
        self.is_outgoing() || self.is_incoming() || !self.outputs.is_empty()
    }

    /// All transfers of this tx, outgoing first.
    pub fn transfers(&self) -> impl Iterator<Item = TransferRef<'_>> {
        self.outgoing_transfer
            .iter()
            .map(TransferRef::Outgoing)
            .chain(self.incoming_transfers.iter().map(TransferRef::Incoming))
    }
}

// ─── Transfers ───────────────────────────────────────────────────────────────

/// Funds received by one subaddress of the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingTransfer {
    /// Owning tx.
    pub tx_id: String,
    pub amount: u64,
    pub account_index: u32,
    pub subaddress_index: u32,
    pub address: Option<String>,
    pub num_suggested_confirmations: Option<u64>,
}

/// One recipient of an outgoing transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub address: String,
    pub amount: u64,
}

/// Funds spent from one account of the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingTransfer {
    /// Owning tx.
    pub tx_id: String,
    pub amount: u64,
    pub account_index: u32,
    pub subaddress_indices: Vec<u32>,
    pub addresses: Vec<String>,
    pub destinations: Vec<Destination>,
    pub num_suggested_confirmations: Option<u64>,
}

/// An owned transfer of either direction, as returned by transfer queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "direction", rename_all = "snake_case")]
pub enum Transfer {
    Incoming(IncomingTransfer),
    Outgoing(OutgoingTransfer),
}

impl Transfer {
    pub fn borrowed(&self) -> TransferRef<'_> {
        match self {
            Self::Incoming(t) => TransferRef::Incoming(t),
            Self::Outgoing(t) => TransferRef::Outgoing(t),
        }
    }

    pub fn tx_id(&self) -> &str {
        self.borrowed().tx_id()
    }

    pub fn amount(&self) -> u64 {
        self.borrowed().amount()
    }

    pub fn account_index(&self) -> u32 {
        self.borrowed().account_index()
    }

    pub fn is_incoming(&self) -> bool {
        matches!(self, Self::Incoming(_))
    }

    pub fn is_outgoing(&self) -> bool {
        matches!(self, Self::Outgoing(_))
    }
}

/// A borrowed transfer, used when matching transfers in place.
#[derive(Debug, Clone, Copy)]
pub enum TransferRef<'a> {
    Incoming(&'a IncomingTransfer),
    Outgoing(&'a OutgoingTransfer),
}

impl<'a> TransferRef<'a> {
    pub fn tx_id(&self) -> &'a str {
        match self {
            Self::Incoming(t) => &t.tx_id,
            Self::Outgoing(t) => &t.tx_id,
        }
    }

    pub fn amount(&self) -> u64 {
        match self {
            Self::Incoming(t) => t.amount,
            Self::Outgoing(t) => t.amount,
        }
    }

    pub fn account_index(&self) -> u32 {
        match self {
            Self::Incoming(t) => t.account_index,
            Self::Outgoing(t) => t.account_index,
        }
    }

    pub fn is_incoming(&self) -> bool {
        matches!(self, Self::Incoming(_))
    }

    pub fn to_transfer(self) -> Transfer {
        match self {
            Self::Incoming(t) => Transfer::Incoming(t.clone()),
            Self::Outgoing(t) => Transfer::Outgoing(t.clone()),
        }
    }
}

// ─── Outputs ─────────────────────────────────────────────────────────────────

/// A key image, optionally with its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyImage {
    pub hex: String,
    pub signature: Option<String>,
}

/// An output owned by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletOutput {
    /// Owning tx.
    pub tx_id: String,
    pub amount: u64,
    /// Global output index; identifies the output within the chain.
    pub index: u64,
    pub account_index: u32,
    pub subaddress_index: u32,
    pub is_spent: bool,
    pub is_unlocked: bool,
    pub is_frozen: bool,
    pub key_image: Option<KeyImage>,
}

// ─── SyncResult ──────────────────────────────────────────────────────────────

/// Outcome of one refresh against the substrate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub num_blocks_fetched: u64,
    pub received_money: bool,
}
