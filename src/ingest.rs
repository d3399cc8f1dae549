//! The ingest pipeline: bind the block follower to the per-block processor.
//!
//! A single consumer pulls blocks in stream order; per-provider errors are
//! logged and accumulated but never stop block processing.

use std::sync::{Arc, Mutex};

use sqlx::MySqlPool;
use tokio::sync::watch;

use crate::algod::AlgodClient;
use crate::algod::models::{Block, transaction_id};
use crate::algod::streamer::stream_blocks;
use crate::db::provider::get_latest_provider_round;
use crate::providers::Provider;

/// Failures observed while processing blocks, kept in memory for operator
/// inspection; blocks are never retried.
pub type ProcessingFailures = Arc<Mutex<Vec<String>>>;

pub struct Pipeline {
    pool: MySqlPool,
    algod: AlgodClient,
    providers: Arc<Vec<Arc<dyn Provider>>>,
    failures: ProcessingFailures,
    print_txns: bool,
}

impl Pipeline {
    pub fn new(
        pool: MySqlPool,
        algod: AlgodClient,
        providers: Arc<Vec<Arc<dyn Provider>>>,
        failures: ProcessingFailures,
        print_txns: bool,
    ) -> Self {
        Self {
            pool,
            algod,
            providers,
            failures,
            print_txns,
        }
    }

    /// Initialize every provider, derive the start round and consume the
    /// block stream until the shutdown signal flips.
    pub async fn run(
        &self,
        start_round_override: Option<u64>,
        shutdown: watch::Receiver<bool>,
    ) -> crate::error::Result<()> {
        for provider in self.providers.iter() {
            provider.init().await?;
        }

        // Stream from the smallest high-water mark across providers so no
        // provider misses blocks; a provider with no history (or a failed
        // lookup) falls back to the live tip.
        let start_round = match start_round_override {
            Some(round) => Some(round),
            None => {
                let mut min_round: Option<u64> = None;
                for provider in self.providers.iter() {
                    match get_latest_provider_round(&self.pool, provider.kind()).await {
                        Ok(Some(round)) => {
                            min_round = Some(min_round.map_or(round, |m| m.min(round)));
                        }
                        Ok(None) => {
                            min_round = None;
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(
                                provider = provider.kind(),
                                "start round lookup failed, streaming from tip: {e}"
                            );
                            min_round = None;
                            break;
                        }
                    }
                }
                min_round
            }
        };
        tracing::info!(?start_round, "starting block stream");

        let mut blocks = stream_blocks(self.algod.clone(), start_round, shutdown.clone());
        loop {
            tokio::select! {
                maybe_block = blocks.recv() => match maybe_block {
                    Some(wrap) => self.process_block(&wrap.block).await,
                    None => break,
                },
                _ = shutdown_flipped(shutdown.clone()) => break,
            }
        }

        tracing::info!("ingest pipeline stopped");
        Ok(())
    }

    /// Dispatch every top-level transaction of the block to each provider.
    pub async fn process_block(&self, block: &Block) {
        tracing::debug!(round = block.round, txns = block.payset.len(), "processing block");

        for stxn in &block.payset {
            let txn_id = transaction_id(block, stxn);

            if self.print_txns {
                tracing::info!(
                    round = block.round,
                    txn_type = %stxn.txn.txn_type,
                    txn_id = %txn_id,
                    "txn"
                );
                for (index, inner) in stxn.flattened().iter().skip(1).enumerate() {
                    tracing::info!(
                        txn_type = %inner.txn.txn_type,
                        inner = index,
                        "  inner txn"
                    );
                }
            }

            for provider in self.providers.iter() {
                if let Err(e) = provider.process(stxn, block.round).await {
                    let failure = format!(
                        "round {} txn {} provider {}: {}",
                        block.round,
                        txn_id,
                        provider.kind(),
                        e
                    );
                    tracing::error!("{failure}");
                    self.failures
                        .lock()
                        .expect("processing failures poisoned")
                        .push(failure);
                }
            }
        }
    }
}

async fn shutdown_flipped(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
