//! TxHistory: answers tx, transfer and output queries by pulling raw
//! substrate streams, building fragments and reconciling them in a
//! [`TxGraph`].
//!
//! Queries never take the sync lock. Two streams read during a refresh may
//! disagree about a tx; such reads surface as a consistency error and the
//! whole query is re-run (see [`WalletConfig::consistency_retries`]).

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace, warn};

use walletindex_core::{
    cmp_outputs, Block, BuildContext, ChainSubstrate, HeightRange, OutputQuery, RecordLookup,
    StreamPlan, SubaddressFilter, SubaddressIndex, Transfer, TransferQuery, TransferRef, Tx,
    TxFragment, TxGraph, TxQuery, WalletError, WalletOutput,
};

use crate::config::WalletConfig;

/// Delegates record lookups to the substrate.
struct SubstrateLookup<'a>(&'a dyn ChainSubstrate);

impl RecordLookup for SubstrateLookup<'_> {
    fn subaddress_address(&self, index: SubaddressIndex) -> Option<String> {
        self.0.subaddress_address(index)
    }

    fn tx_note(&self, tx_id: &str) -> Option<String> {
        self.0.tx_note(tx_id)
    }
}

/// Query coordinator over a [`ChainSubstrate`].
pub struct TxHistory {
    substrate: Arc<dyn ChainSubstrate>,
    max_block_height: u64,
    consistency_retries: u32,
}

impl TxHistory {
    pub fn new(substrate: Arc<dyn ChainSubstrate>, config: &WalletConfig) -> Self {
        Self {
            substrate,
            max_block_height: config.max_block_height,
            consistency_retries: config.consistency_retries,
        }
    }

    // ─── Entry points ────────────────────────────────────────────────────────

    /// Reconciled txs matching `query`.
    ///
    /// Txs come back ordered by height (unconfirmed last), or in the order
    /// of `query.tx_ids` when ids are given. Every requested id must exist.
    pub async fn get_txs(&self, query: &TxQuery) -> Result<Vec<Tx>, WalletError> {
        query.validate()?;
        trace_query("get_txs", query);
        let graph = self.with_retries("get_txs", || self.tx_graph(query)).await?;
        ordered(graph, &query.tx_ids)
    }

    /// The reconciled graph behind [`Self::get_txs`].
    pub async fn get_tx_graph(&self, query: &TxQuery) -> Result<TxGraph, WalletError> {
        query.validate()?;
        trace_query("get_tx_graph", query);
        self.with_retries("get_tx_graph", || self.tx_graph(query))
            .await
    }

    /// Transfers matching `query`, outgoing before incoming within a tx.
    pub async fn get_transfers(&self, query: &TransferQuery) -> Result<Vec<Transfer>, WalletError> {
        query.validate()?;
        trace_query("get_transfers", query);
        self.with_retries("get_transfers", || self.transfers(query))
            .await
    }

    /// Owned outputs matching `query`, ordered by tx height then
    /// account, subaddress and index.
    pub async fn get_outputs(&self, query: &OutputQuery) -> Result<Vec<WalletOutput>, WalletError> {
        query.validate()?;
        trace_query("get_outputs", query);
        self.with_retries("get_outputs", || self.outputs(query))
            .await
    }

    // ─── Query passes ────────────────────────────────────────────────────────

    async fn with_retries<T, F, Fut>(&self, op: &'static str, mut run: F) -> Result<T, WalletError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WalletError>>,
    {
        let mut attempt = 0;
        loop {
            match run().await {
                Err(e) if e.is_consistency() && attempt < self.consistency_retries => {
                    attempt += 1;
                    warn!(op, attempt, error = %e, "inconsistent substrate reads, re-running query");
                }
                result => return result,
            }
        }
    }

    async fn tx_graph(&self, query: &TxQuery) -> Result<TxGraph, WalletError> {
        let scope = query.detached();
        let mut graph = self.fetch_transfers(&TransferQuery::new(), &scope).await?;

        let has_output_filter = query
            .output_query
            .as_deref()
            .map_or(false, |q| !q.is_empty());
        if query.wants_outputs() || has_output_filter {
            let output_scope = output_scope(&scope);
            let mut outputs = self.fetch_outputs().await?;
            outputs.retain(|tx| output_scope.meets(tx));
            for fragment in into_fragments(outputs) {
                graph.merge(fragment, true)?;
            }
        }

        graph.retain(|tx| query.meets(tx));
        graph.check_consistency()?;
        if let Some(id) = query.tx_ids.iter().find(|id| graph.tx(id).is_none()) {
            return Err(WalletError::TxNotFound(id.clone()));
        }
        Ok(graph)
    }

    async fn transfers(&self, query: &TransferQuery) -> Result<Vec<Transfer>, WalletError> {
        let mut tx_query = query.tx_query.as_deref().cloned().unwrap_or_default();
        tx_query.transfer_query = None;

        let mut graph = self.fetch_transfers(query, &tx_query).await?;
        if tx_query.output_query.as_deref().map_or(false, |q| !q.is_empty()) {
            let outputs = self.fetch_outputs().await?;
            absorb_known(&mut graph, outputs)?;
        }

        let transfers = prune_transfers(&mut graph, query);
        graph.check_consistency()?;
        Ok(transfers)
    }

    async fn outputs(&self, query: &OutputQuery) -> Result<Vec<WalletOutput>, WalletError> {
        let mut tx_query = query.tx_query.as_deref().cloned().unwrap_or_default();
        tx_query.output_query = None;

        let mut graph = self.fetch_outputs().await?;
        if !tx_query.is_empty() {
            // Tx-level constraints may need transfer data outputs lack.
            let transfers = self
                .fetch_transfers(&TransferQuery::new(), &output_scope(&tx_query))
                .await?;
            absorb_known(&mut graph, transfers)?;
        }

        prune_outputs(&mut graph, query);
        graph.check_consistency()?;

        let mut pairs: Vec<(&Tx, &WalletOutput)> = graph
            .txs()
            .flat_map(|tx| tx.outputs.iter().map(move |o| (tx, o)))
            .collect();
        pairs.sort_by(|a, b| cmp_outputs(*a, *b));
        Ok(pairs.into_iter().map(|(_, o)| o.clone()).collect())
    }

    // ─── Stream pulls ────────────────────────────────────────────────────────

    /// Pull every transfer stream `transfer_query` and `tx_query` allow,
    /// merged but not yet filtered.
    async fn fetch_transfers(
        &self,
        transfer_query: &TransferQuery,
        tx_query: &TxQuery,
    ) -> Result<TxGraph, WalletError> {
        let plan = StreamPlan::classify(transfer_query, tx_query);
        let filter = SubaddressFilter {
            account: transfer_query.account_index,
            indices: transfer_query.subaddress_set(),
        };
        let range = self.height_range(tx_query);
        let lookup = SubstrateLookup(self.substrate.as_ref());
        let ctx = BuildContext::new(
            self.substrate.height(),
            self.substrate.last_block_reward(),
            &lookup,
        );
        let mut graph = TxGraph::new();

        if let Some(range) = range {
            if plan.confirmed_incoming {
                let records = self.substrate.confirmed_incoming(range, &filter).await?;
                debug!(stream = "confirmed_incoming", records = records.len(), "pulled stream");
                for rec in &records {
                    graph.merge(ctx.confirmed_incoming(rec), false)?;
                }
            }
            if plan.confirmed_outgoing {
                let records = self.substrate.confirmed_outgoing(range, &filter).await?;
                debug!(stream = "confirmed_outgoing", records = records.len(), "pulled stream");
                for rec in &records {
                    graph.merge(ctx.confirmed_outgoing(rec), false)?;
                }
            }
        }

        if plan.unconfirmed_outgoing() {
            let records = self.substrate.unconfirmed_outgoing(&filter).await?;
            debug!(stream = "unconfirmed_outgoing", records = records.len(), "pulled stream");
            for rec in &records {
                if tx_query.is_failed.map_or(false, |f| f != rec.is_failed()) {
                    continue;
                }
                graph.merge(ctx.unconfirmed_outgoing(rec), false)?;
            }
        }

        if plan.pool_incoming {
            self.substrate.refresh_pool().await?;
            let records = self.substrate.unconfirmed_incoming(&filter).await?;
            debug!(stream = "pool_incoming", records = records.len(), "pulled stream");
            for rec in &records {
                graph.merge(ctx.pool_incoming(rec), false)?;
            }
        }

        Ok(graph)
    }

    /// All owned outputs, merged into their txs.
    async fn fetch_outputs(&self) -> Result<TxGraph, WalletError> {
        let lookup = SubstrateLookup(self.substrate.as_ref());
        let ctx = BuildContext::new(
            self.substrate.height(),
            self.substrate.last_block_reward(),
            &lookup,
        );
        let records = self.substrate.outputs().await?;
        debug!(stream = "outputs", records = records.len(), "pulled stream");
        let mut graph = TxGraph::new();
        for rec in &records {
            graph.merge(ctx.spendable_output(rec), false)?;
        }
        Ok(graph)
    }

    /// Inclusive range for confirmed streams, or `None` if it is empty.
    fn height_range(&self, query: &TxQuery) -> Option<HeightRange> {
        let mut min = query.min_height.unwrap_or(0);
        let mut max = query
            .max_height
            .unwrap_or(self.max_block_height)
            .min(self.max_block_height);
        if let Some(h) = query.height {
            min = min.max(h);
            max = max.min(h);
        }
        (min <= max).then(|| HeightRange::new(min, max))
    }
}

// ─── Graph helpers ───────────────────────────────────────────────────────────

fn trace_query<Q: Serialize>(op: &'static str, query: &Q) {
    trace!(op, query = %query_json(query), "query");
}

fn query_json<Q: Serialize>(query: &Q) -> String {
    serde_json::to_string(query).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

/// The part of a tx query an output-only tx can answer.
fn output_scope(query: &TxQuery) -> TxQuery {
    TxQuery {
        tx_ids: query.tx_ids.clone(),
        height: query.height,
        min_height: query.min_height,
        max_height: query.max_height,
        is_confirmed: query.is_confirmed,
        in_tx_pool: query.in_tx_pool,
        is_failed: query.is_failed,
        is_relayed: query.is_relayed,
        ..TxQuery::default()
    }
}

/// Split a graph back into one fragment per tx, keeping block timestamps.
fn into_fragments(graph: TxGraph) -> Vec<TxFragment> {
    let timestamps: BTreeMap<u64, Option<u64>> =
        graph.blocks().map(|b| (b.height, b.timestamp)).collect();
    graph
        .into_sorted_txs()
        .into_iter()
        .map(|tx| {
            let block = tx.height.map(|h| {
                let mut block = Block::new(h).with_tx(tx.id.clone());
                block.timestamp = timestamps.get(&h).copied().flatten();
                block
            });
            TxFragment { tx, block }
        })
        .collect()
}

/// Fold the txs of `other` that `graph` already holds into `graph`.
fn absorb_known(graph: &mut TxGraph, other: TxGraph) -> Result<(), WalletError> {
    for fragment in into_fragments(other) {
        if graph.tx(&fragment.tx.id).is_some() {
            graph.merge(fragment, true)?;
        }
    }
    Ok(())
}

/// Drop transfers failing `query`, then txs left without transfers.
/// Returns the surviving transfers in tx order.
fn prune_transfers(graph: &mut TxGraph, query: &TransferQuery) -> Vec<Transfer> {
    let mut transfers = Vec::new();
    for id in graph.sorted_ids() {
        let Some(tx) = graph.tx(&id) else { continue };
        let keep_outgoing = tx
            .outgoing_transfer
            .as_ref()
            .map_or(false, |t| query.meets(TransferRef::Outgoing(t), tx));
        let keep_incoming: Vec<bool> = tx
            .incoming_transfers
            .iter()
            .map(|t| query.meets(TransferRef::Incoming(t), tx))
            .collect();

        let Some(tx) = graph.tx_mut(&id) else { continue };
        if !keep_outgoing {
            tx.outgoing_transfer = None;
        }
        let mut keep = keep_incoming.into_iter();
        tx.incoming_transfers
            .retain(|_| keep.next().unwrap_or(false));

        if tx.is_outgoing() || tx.is_incoming() {
            transfers.extend(tx.transfers().map(TransferRef::to_transfer));
        } else {
            graph.remove_tx(&id);
        }
    }
    transfers
}

/// Drop outputs failing `query`, then txs left without outputs.
fn prune_outputs(graph: &mut TxGraph, query: &OutputQuery) {
    for id in graph.sorted_ids() {
        let Some(tx) = graph.tx(&id) else { continue };
        let keep: Vec<bool> = tx.outputs.iter().map(|o| query.meets(o, tx)).collect();

        let Some(tx) = graph.tx_mut(&id) else { continue };
        let mut keep = keep.into_iter();
        tx.outputs.retain(|_| keep.next().unwrap_or(false));
        if tx.outputs.is_empty() {
            graph.remove_tx(&id);
        }
    }
}

/// Txs of `graph` in height order, or in the order of `ids` when given.
fn ordered(graph: TxGraph, ids: &[String]) -> Result<Vec<Tx>, WalletError> {
    if ids.is_empty() {
        return Ok(graph.into_sorted_txs());
    }
    ids.iter()
        .map(|id| {
            graph
                .tx(id)
                .cloned()
                .ok_or_else(|| WalletError::TxNotFound(id.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(max_block_height: u64) -> TxHistory {
        let config = WalletConfig {
            max_block_height,
            ..Default::default()
        };
        TxHistory::new(Arc::new(walletindex_memory::MemorySubstrate::new()), &config)
    }

    #[test]
    fn height_range_narrows_to_exact_height() {
        let h = history(1_000);
        assert_eq!(h.height_range(&TxQuery::new()), Some(HeightRange::new(0, 1_000)));
        assert_eq!(
            h.height_range(&TxQuery::new().max_height(5_000)),
            Some(HeightRange::new(0, 1_000))
        );
        assert_eq!(
            h.height_range(&TxQuery::new().min_height(10).height(20)),
            Some(HeightRange::new(20, 20))
        );
        assert_eq!(h.height_range(&TxQuery::new().min_height(30).height(20)), None);
    }

    #[test]
    fn output_scope_keeps_only_answerable_fields() {
        let q = TxQuery::new()
            .tx_id("aa11")
            .incoming(true)
            .coinbase(false)
            .confirmed(true)
            .min_height(5)
            .transfer_query(TransferQuery::new().amount(1));
        let scope = output_scope(&q);
        assert_eq!(scope.tx_ids, vec!["aa11".to_string()]);
        assert_eq!(scope.is_confirmed, Some(true));
        assert_eq!(scope.min_height, Some(5));
        assert_eq!(scope.is_incoming, None);
        assert_eq!(scope.is_coinbase, None);
        assert!(scope.transfer_query.is_none());
    }

    #[test]
    fn ordered_follows_requested_ids() {
        let mut graph = TxGraph::new();
        for (id, h) in [("aa", 10), ("bb", 5)] {
            let mut tx = Tx::new(id);
            tx.is_confirmed = Some(true);
            graph.merge(TxFragment::confirmed(tx, h, None), false).unwrap();
        }
        let by_height: Vec<String> = ordered(graph.clone(), &[])
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(by_height, vec!["bb", "aa"]);

        let by_ids: Vec<String> = ordered(graph.clone(), &["aa".into(), "bb".into()])
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(by_ids, vec!["aa", "bb"]);

        assert_eq!(
            ordered(graph, &["cc".into()]).unwrap_err(),
            WalletError::TxNotFound("cc".into())
        );
    }

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("no json"))
        }
    }

    #[test]
    fn query_json_reports_serialization_errors() {
        assert!(query_json(&TxQuery::new()).starts_with('{'));
        assert_eq!(query_json(&Unserializable), "<unserializable: no json>");
    }
}
