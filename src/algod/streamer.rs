//! Block follower.
//!
//! A background task that walks rounds in order, long-polling the node for
//! the next block and publishing each one into a 1-buffered channel. Slow
//! consumers back-pressure the follower directly through that buffer.

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use crate::constants::STREAM_RETRY_DELAY;

use super::client::AlgodClient;
use super::models::Block;

/// A block handed to the ingest consumer.
#[derive(Debug)]
pub struct BlockWrap {
    pub round: u64,
    pub block: Block,
}

/// Start streaming blocks beginning at `start_round` (or the live tip when
/// `None`). Returns the 1-buffered receiving side; the task ends when the
/// shutdown signal flips or the receiver is dropped.
pub fn stream_blocks(
    client: AlgodClient,
    start_round: Option<u64>,
    mut shutdown: watch::Receiver<bool>,
) -> mpsc::Receiver<BlockWrap> {
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let mut round = start_round;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = match round {
                Some(r) => r,
                None => match client.last_round().await {
                    Ok(tip) => {
                        round = Some(tip);
                        tip
                    }
                    Err(e) => {
                        tracing::warn!("streamer: tip lookup failed: {e}");
                        sleep(STREAM_RETRY_DELAY).await;
                        continue;
                    }
                },
            };

            let block = tokio::select! {
                result = fetch_block(&client, next) => match result {
                    Ok(block) => block,
                    Err(e) => {
                        tracing::warn!(round = next, "streamer: block fetch failed: {e}");
                        sleep(STREAM_RETRY_DELAY).await;
                        continue;
                    }
                },
                _ = shutdown.changed() => break,
            };

            let wrap = BlockWrap { round: next, block };
            if tx.send(wrap).await.is_err() {
                break;
            }
            round = Some(next + 1);
        }

        tracing::info!("streamer: stopped");
    });

    rx
}

async fn fetch_block(client: &AlgodClient, round: u64) -> crate::error::Result<Block> {
    // Only wait when the round is not yet committed; a node past the round
    // returns immediately from the block fetch.
    let tip = client.last_round().await?;
    if tip < round {
        client.wait_for_block_after(round.saturating_sub(1)).await?;
    }
    client.get_block(round).await
}
