//! walletindex-core: the reconciled transaction model of a wallet.
//!
//! # Architecture
//!
//! ```text
//! ChainSubstrate record streams
//!     ├── confirmed incoming ─┐
//!     ├── confirmed outgoing ─┤
//!     ├── pending / failed   ─┼─► BuildContext ─► TxFragment ─► TxGraph::merge
//!     ├── pool incoming      ─┤     (fragment)                    (merge)
//!     └── spendable outputs  ─┘
//!
//! TxGraph ─► TxQuery / TransferQuery / OutputQuery ─► caller
//!                         (criteria, order)
//! ```

pub mod criteria;
pub mod error;
pub mod fragment;
pub mod listener;
pub mod merge;
pub mod order;
pub mod record;
pub mod substrate;
pub mod types;

pub use criteria::{KeyImageQuery, OutputQuery, StreamPlan, TransferQuery, TxQuery};
pub use error::WalletError;
pub use fragment::{BuildContext, TxFragment};
pub use listener::{SyncListener, SyncProgress, WalletListener};
pub use merge::{MergeOutcome, TxGraph};
pub use order::{cmp_incoming_transfers, cmp_outputs, cmp_tx_height, HeightKey};
pub use record::{
    ConfirmedOutgoing, IncomingPayment, PendingState, PoolPayment, RawDestination,
    SpendableOutput, UnconfirmedOutgoing, UNKNOWN_CHANGE,
};
pub use substrate::{ChainSubstrate, HeightRange, RecordLookup, SubaddressFilter, SubstrateObserver};
pub use types::{
    Block, Destination, IncomingTransfer, KeyImage, OutgoingTransfer, SubaddressIndex, SyncResult,
    Transfer, TransferRef, Tx, WalletOutput, DEFAULT_PAYMENT_ID,
};
