//! MergeEngine: folds tx fragments into a deduplicated tx graph.
//!
//! The graph keeps two indexes, txs by id and blocks by height. Merging is
//! idempotent and commutative: fields missing on one side are filled from
//! the other, flags resolve by fixed precedence, and transfer/output lists
//! are unioned then kept in canonical order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::WalletError;
use crate::fragment::TxFragment;
use crate::order::{cmp_incoming_transfers, cmp_outputs, cmp_tx_height};
use crate::types::{Block, IncomingTransfer, OutgoingTransfer, Tx, WalletOutput};

/// What happened to a fragment passed to [`TxGraph::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The tx was not known yet and was added.
    Inserted,
    /// The tx was known and the fragment was folded into it.
    Merged,
    /// The tx was not known and the caller asked to skip absent txs.
    Skipped,
}

/// Reconciled blocks and txs, related by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxGraph {
    txs: BTreeMap<String, Tx>,
    blocks: BTreeMap<u64, Block>,
}

impl TxGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `fragment` into the graph.
    ///
    /// With `skip_if_absent`, a fragment for an unknown tx is dropped (with a
    /// warning) instead of inserted, and its block is left alone.
    pub fn merge(
        &mut self,
        fragment: TxFragment,
        skip_if_absent: bool,
    ) -> Result<MergeOutcome, WalletError> {
        let TxFragment { tx, block } = fragment;
        if tx.id.is_empty() {
            return Err(WalletError::MissingTxId);
        }
        let block = match (block, tx.height) {
            (Some(b), Some(h)) if b.height == h => Some(b),
            (Some(b), h) => {
                return Err(WalletError::Invariant(format!(
                    "fragment for tx {} carries block {} but tx height is {:?}",
                    tx.id, b.height, h
                )))
            }
            (None, Some(h)) => Some(Block::new(h).with_tx(tx.id.clone())),
            (None, None) => None,
        };

        let tx_id = tx.id.clone();
        let outcome = match self.txs.get(&tx_id) {
            None if skip_if_absent => {
                warn!(tx_id = %tx_id, "tx does not already exist, skipping fragment");
                return Ok(MergeOutcome::Skipped);
            }
            None => {
                let mut tx = tx;
                canonicalize(&mut tx);
                self.txs.insert(tx_id.clone(), tx);
                MergeOutcome::Inserted
            }
            Some(existing) => {
                let merged = merge_tx(existing, &tx)?;
                self.txs.insert(tx_id.clone(), merged);
                MergeOutcome::Merged
            }
        };

        if let Some(block) = block {
            let merged = match self.blocks.get(&block.height) {
                Some(existing) => merge_block(existing, block, &tx_id)?,
                None => block,
            };
            self.blocks.insert(merged.height, merged);
        }
        Ok(outcome)
    }

    // ─── Lookups ─────────────────────────────────────────────────────────────

    pub fn tx(&self, id: &str) -> Option<&Tx> {
        self.txs.get(id)
    }

    pub fn block(&self, height: u64) -> Option<&Block> {
        self.blocks.get(&height)
    }

    /// Block owning `tx`, if confirmed.
    pub fn block_of(&self, tx: &Tx) -> Option<&Block> {
        tx.height.and_then(|h| self.blocks.get(&h))
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn txs(&self) -> impl Iterator<Item = &Tx> {
        self.txs.values()
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    /// Txs of the block at `height`, in id order.
    pub fn block_txs(&self, height: u64) -> Vec<&Tx> {
        self.blocks
            .get(&height)
            .map(|b| b.tx_ids.iter().filter_map(|id| self.txs.get(id)).collect())
            .unwrap_or_default()
    }

    /// Ids of all txs, confirmed by ascending height first, then unconfirmed.
    pub fn sorted_ids(&self) -> Vec<String> {
        let mut txs: Vec<&Tx> = self.txs.values().collect();
        txs.sort_by(|a, b| cmp_tx_height(a, b));
        txs.into_iter().map(|t| t.id.clone()).collect()
    }

    pub fn tx_mut(&mut self, id: &str) -> Option<&mut Tx> {
        self.txs.get_mut(id)
    }

    // ─── Pruning ─────────────────────────────────────────────────────────────

    /// Remove a tx and unlink it from its block. Empty blocks are dropped.
    pub fn remove_tx(&mut self, id: &str) -> Option<Tx> {
        let tx = self.txs.remove(id)?;
        if let Some(h) = tx.height {
            let empty = match self.blocks.get_mut(&h) {
                Some(block) => {
                    block.tx_ids.remove(id);
                    block.tx_ids.is_empty()
                }
                None => false,
            };
            if empty {
                self.blocks.remove(&h);
            }
        }
        Some(tx)
    }

    /// Keep only the txs for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&Tx) -> bool) {
        let dropped: Vec<String> = self
            .txs
            .values()
            .filter(|t| !keep(t))
            .map(|t| t.id.clone())
            .collect();
        for id in dropped {
            self.remove_tx(&id);
        }
    }

    /// Consume the graph, returning txs ordered by height (unconfirmed last).
    pub fn into_sorted_txs(self) -> Vec<Tx> {
        let mut txs: Vec<Tx> = self.txs.into_values().collect();
        txs.sort_by(cmp_tx_height);
        txs
    }

    /// Fail if a confirmed tx has no resolvable block.
    ///
    /// Seen when two substrate reads straddle a refresh.
    pub fn check_consistency(&self) -> Result<(), WalletError> {
        for tx in self.txs.values() {
            if tx.is_confirmed != Some(true) {
                continue;
            }
            let reason = match tx.height {
                None => "tx is confirmed but has no block",
                Some(h) => match self.blocks.get(&h) {
                    Some(b) if b.tx_ids.contains(&tx.id) => continue,
                    Some(_) => "tx is not listed in its block",
                    None => "tx is confirmed but its block is missing",
                },
            };
            return Err(WalletError::Inconsistent {
                tx_id: tx.id.clone(),
                reason: reason.into(),
            });
        }
        Ok(())
    }
}

// ─── Field reconciliation ────────────────────────────────────────────────────

fn reconcile<T: PartialEq + Clone>(
    tx_id: &str,
    field: &str,
    a: &Option<T>,
    b: &Option<T>,
) -> Result<Option<T>, WalletError> {
    match (a, b) {
        (Some(x), Some(y)) if x != y => Err(WalletError::MergeConflict {
            tx_id: tx_id.to_string(),
            field: field.to_string(),
        }),
        (Some(x), _) => Ok(Some(x.clone())),
        (None, y) => Ok(y.clone()),
    }
}

/// Either side being `winner` decides the flag; otherwise fill from whichever is set.
fn resolve_flag(a: Option<bool>, b: Option<bool>, winner: bool) -> Option<bool> {
    if a == Some(winner) || b == Some(winner) {
        Some(winner)
    } else {
        a.or(b)
    }
}

fn max_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}

fn union_sorted<T: Ord + Clone>(a: &[T], b: &[T]) -> Vec<T> {
    let mut out: Vec<T> = a.iter().chain(b).cloned().collect();
    out.sort();
    out.dedup();
    out
}

fn canonicalize(tx: &mut Tx) {
    let mut incoming = std::mem::take(&mut tx.incoming_transfers);
    let mut outputs = std::mem::take(&mut tx.outputs);
    let owner: &Tx = tx;
    incoming.sort_by(|a, b| cmp_incoming_transfers((owner, a), (owner, b)));
    outputs.sort_by(|a, b| cmp_outputs((owner, a), (owner, b)));
    tx.incoming_transfers = incoming;
    tx.outputs = outputs;
    if let Some(out) = tx.outgoing_transfer.as_mut() {
        out.subaddress_indices.sort();
        out.subaddress_indices.dedup();
        out.addresses.sort();
        out.addresses.dedup();
    }
}

fn merge_tx(a: &Tx, b: &Tx) -> Result<Tx, WalletError> {
    let id = a.id.as_str();
    let height = match (a.height, b.height) {
        (Some(x), Some(y)) if x != y => {
            return Err(WalletError::Inconsistent {
                tx_id: id.to_string(),
                reason: format!("reported at heights {x} and {y}"),
            })
        }
        (x, y) => x.or(y),
    };

    // A confirmed view outranks a pool view of the same tx.
    let is_confirmed = resolve_flag(a.is_confirmed, b.is_confirmed, true);
    let in_tx_pool = resolve_flag(a.in_tx_pool, b.in_tx_pool, false);

    let mut tx = Tx {
        id: a.id.clone(),
        height,
        payment_id: reconcile(id, "payment_id", &a.payment_id, &b.payment_id)?,
        fee: reconcile(id, "fee", &a.fee, &b.fee)?,
        unlock_time: reconcile(id, "unlock_time", &a.unlock_time, &b.unlock_time)?,
        note: reconcile(id, "note", &a.note, &b.note)?,
        is_confirmed,
        is_failed: resolve_flag(a.is_failed, b.is_failed, true),
        is_relayed: resolve_flag(a.is_relayed, b.is_relayed, true),
        in_tx_pool,
        do_not_relay: resolve_flag(a.do_not_relay, b.do_not_relay, false),
        is_double_spend_seen: resolve_flag(a.is_double_spend_seen, b.is_double_spend_seen, true),
        is_coinbase: reconcile(id, "is_coinbase", &a.is_coinbase, &b.is_coinbase)?,
        num_confirmations: max_opt(a.num_confirmations, b.num_confirmations),
        key: reconcile(id, "key", &a.key, &b.key)?,
        full_hex: reconcile(id, "full_hex", &a.full_hex, &b.full_hex)?,
        metadata: reconcile(id, "metadata", &a.metadata, &b.metadata)?,
        outgoing_transfer: match (&a.outgoing_transfer, &b.outgoing_transfer) {
            (Some(x), Some(y)) => Some(merge_outgoing(id, x, y)?),
            (x, y) => x.clone().or_else(|| y.clone()),
        },
        incoming_transfers: merge_incoming(id, &a.incoming_transfers, &b.incoming_transfers)?,
        outputs: merge_outputs(id, &a.outputs, &b.outputs)?,
    };
    canonicalize(&mut tx);
    Ok(tx)
}

fn merge_incoming(
    tx_id: &str,
    a: &[IncomingTransfer],
    b: &[IncomingTransfer],
) -> Result<Vec<IncomingTransfer>, WalletError> {
    let mut by_key: BTreeMap<(u32, u32), IncomingTransfer> = BTreeMap::new();
    for t in a.iter().chain(b) {
        let key = (t.account_index, t.subaddress_index);
        let merged = match by_key.get(&key) {
            None => t.clone(),
            Some(existing) => {
                if existing.amount != t.amount {
                    return Err(WalletError::MergeConflict {
                        tx_id: tx_id.to_string(),
                        field: "incoming_transfer.amount".into(),
                    });
                }
                IncomingTransfer {
                    address: reconcile(tx_id, "incoming_transfer.address", &existing.address, &t.address)?,
                    num_suggested_confirmations: max_opt(
                        existing.num_suggested_confirmations,
                        t.num_suggested_confirmations,
                    ),
                    ..existing.clone()
                }
            }
        };
        by_key.insert(key, merged);
    }
    Ok(by_key.into_values().collect())
}

fn merge_outgoing(
    tx_id: &str,
    a: &OutgoingTransfer,
    b: &OutgoingTransfer,
) -> Result<OutgoingTransfer, WalletError> {
    let conflict = |field: &str| WalletError::MergeConflict {
        tx_id: tx_id.to_string(),
        field: format!("outgoing_transfer.{field}"),
    };
    if a.amount != b.amount {
        return Err(conflict("amount"));
    }
    if a.account_index != b.account_index {
        return Err(conflict("account_index"));
    }
    let destinations = match (a.destinations.is_empty(), b.destinations.is_empty()) {
        (true, _) => b.destinations.clone(),
        (_, true) => a.destinations.clone(),
        _ if a.destinations == b.destinations => a.destinations.clone(),
        _ => return Err(conflict("destinations")),
    };
    Ok(OutgoingTransfer {
        tx_id: a.tx_id.clone(),
        amount: a.amount,
        account_index: a.account_index,
        subaddress_indices: union_sorted(&a.subaddress_indices, &b.subaddress_indices),
        addresses: union_sorted(&a.addresses, &b.addresses),
        destinations,
        num_suggested_confirmations: max_opt(
            a.num_suggested_confirmations,
            b.num_suggested_confirmations,
        ),
    })
}

fn merge_outputs(
    tx_id: &str,
    a: &[WalletOutput],
    b: &[WalletOutput],
) -> Result<Vec<WalletOutput>, WalletError> {
    let mut by_index: BTreeMap<u64, WalletOutput> = BTreeMap::new();
    for o in a.iter().chain(b) {
        let merged = match by_index.get(&o.index) {
            None => o.clone(),
            Some(existing) => {
                if existing.amount != o.amount
                    || existing.account_index != o.account_index
                    || existing.subaddress_index != o.subaddress_index
                {
                    return Err(WalletError::MergeConflict {
                        tx_id: tx_id.to_string(),
                        field: format!("output[{}]", o.index),
                    });
                }
                WalletOutput {
                    is_spent: existing.is_spent || o.is_spent,
                    is_unlocked: existing.is_unlocked || o.is_unlocked,
                    is_frozen: existing.is_frozen || o.is_frozen,
                    key_image: reconcile(tx_id, "output.key_image", &existing.key_image, &o.key_image)?,
                    ..existing.clone()
                }
            }
        };
        by_index.insert(o.index, merged);
    }
    Ok(by_index.into_values().collect())
}

fn merge_block(a: &Block, b: Block, tx_id: &str) -> Result<Block, WalletError> {
    let timestamp = reconcile(tx_id, "block.timestamp", &a.timestamp, &b.timestamp)?;
    let mut tx_ids = a.tx_ids.clone();
    tx_ids.extend(b.tx_ids);
    Ok(Block {
        height: a.height,
        timestamp,
        tx_ids,
    })
}
