use chrono::{DateTime, NaiveDateTime};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::accounts::{AccountAggregator, Link};
use crate::errors::SyncError;
use crate::gaps::{self, ChainReport};
use crate::models::*;
use crate::phantasma_client::{BlockRecord, ChainRpc, TransactionRecord};
use crate::store::{BlockBatch, Store};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkSummary {
    pub chain_address: String,
    pub first_height: i64,
    pub last_height: i64,
    pub blocks: usize,
    pub transactions: usize,
    pub accounts_created: usize,
    pub already_stored: usize,
    pub report: ChainReport,
}

/// Walks one chain from its checkpoint up to the node's height.
///
/// Blocks are fetched ahead of the committer through a bounded channel but
/// always committed in height order, one store transaction per block.
pub struct ChainWalker<'a, C: ChainRpc, S: Store> {
    pub rpc: &'a C,
    pub store: &'a S,
    pub prefetch: usize,
    pub cancelled: &'a AtomicBool,
}

impl<'a, C: ChainRpc, S: Store> ChainWalker<'a, C, S> {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn walk(&self, chain: &Chain) -> Result<WalkSummary, SyncError> {
        let target = self.rpc.get_block_height(&chain.address).await?;
        let start = self
            .store
            .find_checkpoint(&chain.address)?
            .map(|checkpoint| checkpoint.height + 1)
            .unwrap_or(1);
        if start > target {
            log::info!("Chain {} is up to date at height {}", chain.name, target);
            return Ok(WalkSummary {
                chain_address: chain.address.clone(),
                first_height: start,
                last_height: start - 1,
                ..WalkSummary::default()
            });
        }
        log::info!(
            "Syncing chain: {} ({}), from height {} to {}",
            chain.name,
            chain.address,
            start,
            target
        );
        let before = Instant::now();
        let (sender, receiver) = mpsc::channel(self.prefetch.max(1));
        let (fetched, committed) = tokio::join!(
            self.fetch_blocks(chain, start, target, sender),
            self.commit_blocks(chain, start, ReceiverStream::new(receiver))
        );
        let mut summary = committed?;
        fetched?;
        if summary.last_height < target && self.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        log::info!(
            "Synced {} blocks ({} transactions, {} new accounts) of chain {} in {:.2?}",
            summary.blocks,
            summary.transactions,
            summary.accounts_created,
            chain.name,
            before.elapsed()
        );

        summary.report = gaps::verify_chain(self.store, &chain.address, (start - 1).max(1))?;
        if !summary.report.is_clean() {
            log::warn!(
                "Chain {} has gaps {:?} and broken links at heights {:?}",
                chain.name,
                summary.report.gaps,
                summary.report.broken_links
            );
        }
        Ok(summary)
    }

    async fn fetch_blocks(
        &self,
        chain: &Chain,
        from: i64,
        to: i64,
        sender: mpsc::Sender<BlockRecord>,
    ) -> Result<(), SyncError> {
        for height in from..=to {
            if self.is_cancelled() {
                break;
            }
            let record = match self.rpc.get_block_by_height(&chain.address, height).await {
                Ok(record) => record,
                Err(e) => {
                    log::error!(
                        "Error fetching block {} of chain {}: {}",
                        height,
                        chain.name,
                        e
                    );
                    return Err(e);
                }
            };
            if record.height != height {
                return Err(SyncError::malformed(
                    "getBlockByHeight",
                    format!("asked for height {} of {}, got {}", height, chain.address, record.height),
                ));
            }
            if sender.send(record).await.is_err() {
                // committer stopped, its error is reported by the walk
                break;
            }
        }
        Ok(())
    }

    async fn commit_blocks(
        &self,
        chain: &Chain,
        from: i64,
        mut blocks: ReceiverStream<BlockRecord>,
    ) -> Result<WalkSummary, SyncError> {
        let mut summary = WalkSummary {
            chain_address: chain.address.clone(),
            first_height: from,
            last_height: from - 1,
            ..WalkSummary::default()
        };
        while let Some(record) = blocks.next().await {
            if self.is_cancelled() {
                log::info!(
                    "Stopping chain {} before height {}",
                    chain.name,
                    record.height
                );
                return Err(SyncError::Cancelled);
            }
            let batch = build_batch(self.store, chain, &record)?;
            let committed = self.store.commit_block(&batch).map_err(|e| {
                log::error!(
                    "Error committing block {} of chain {} at height {}: {}",
                    record.hash,
                    chain.name,
                    record.height,
                    e
                );
                SyncError::StoreCommitFailure(e)
            })?;
            if committed {
                summary.blocks += 1;
                summary.transactions += batch.transactions.len();
                summary.accounts_created += batch.new_accounts.len();
            } else {
                log::debug!("Block {} was already stored", record.hash);
                summary.already_stored += 1;
            }
            summary.last_height = record.height;
            if record.height % 1000 == 0 {
                log::info!("Chain {} current height: {}", chain.name, record.height);
            }
        }
        Ok(summary)
    }
}

/// Everything the block at `record` adds to the store, with the accounts its
/// events touch resolved against the store.
pub fn build_batch<S: Store>(
    store: &S,
    chain: &Chain,
    record: &BlockRecord,
) -> Result<BlockBatch, SyncError> {
    let mut batch = BlockBatch::new(build_block(chain, record)?);
    let mut aggregator = AccountAggregator::new(store);
    for tx_record in &record.transactions {
        let transaction = build_transaction(&record.hash, tx_record)?;
        batch.events.extend(build_events(tx_record));
        for event in &tx_record.events {
            // the event row is kept, there is no account to link
            if event.event_address.is_empty() {
                continue;
            }
            let link = aggregator.link(&mut batch, &transaction.hash, &event.event_address)?;
            if link == Link::Created {
                log::debug!(
                    "New account {} in transaction {}",
                    event.event_address,
                    transaction.hash
                );
            }
        }
        batch.transactions.push(transaction);
    }
    batch.sort_accounts();
    Ok(batch)
}

fn to_datetime(method: &str, seconds: i64) -> Result<NaiveDateTime, SyncError> {
    DateTime::from_timestamp(seconds, 0)
        .map(|datetime| datetime.naive_utc())
        .ok_or_else(|| SyncError::malformed(method, format!("invalid timestamp {}", seconds)))
}

fn build_block(chain: &Chain, record: &BlockRecord) -> Result<Block, SyncError> {
    Ok(Block {
        hash: record.hash.clone(),
        chain_address: chain.address.clone(),
        previous_hash: record.previous_hash.clone(),
        height: record.height,
        timestamp: to_datetime("getBlockByHeight", record.timestamp)?,
        payload: record.payload.clone(),
        reward: record.reward.clone(),
        validator_address: record.validator_address.clone(),
    })
}

fn build_transaction(block_hash: &str, record: &TransactionRecord) -> Result<Transaction, SyncError> {
    Ok(Transaction {
        hash: record.hash.clone(),
        block_hash: block_hash.to_string(),
        timestamp: to_datetime("getBlockByHeight", record.timestamp)?,
        script: record.script.clone(),
        result: record.result.clone(),
    })
}

fn build_events(record: &TransactionRecord) -> Vec<Event> {
    record
        .events
        .iter()
        .enumerate()
        .map(|(i, event)| Event {
            transaction_hash: record.hash.clone(),
            idx: i as i32,
            data: event.data.clone(),
            event_address: event.event_address.clone(),
            event_kind: event.event_kind.clone(),
        })
        .collect()
}
