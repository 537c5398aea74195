use futures::{stream, StreamExt, TryStreamExt};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::balance::{self, BalanceSummary};
use crate::config::SyncConfig;
use crate::errors::SyncError;
use crate::indexer::{ChainWalker, WalkSummary};
use crate::models::*;
use crate::phantasma_client::{AppRecord, ChainRecord, ChainRpc, TokenRecord};
use crate::store::{Collection, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Apps,
    Tokens,
    Chains,
    Balances,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Apps => "apps",
            Stage::Tokens => "tokens",
            Stage::Chains => "chains",
            Stage::Balances => "balances",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Completed { written: usize },
    /// The stage's collection already had rows, nothing was fetched.
    AlreadySeeded,
    /// Balances were left for a later run because no account existed before this one.
    Deferred,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub stages: Vec<(Stage, StageOutcome)>,
    pub walks: Vec<WalkSummary>,
    pub balances: Option<BalanceSummary>,
}

impl SyncReport {
    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, outcome)| outcome)
    }
}

/// Seeds the store from a node: apps, tokens and chains once, then walks every
/// chain from its checkpoint and classifies the balances of touched accounts.
pub struct Synchronizer<'a, C: ChainRpc, S: Store> {
    rpc: &'a C,
    store: &'a S,
    config: SyncConfig,
    cancelled: Arc<AtomicBool>,
}

impl<'a, C: ChainRpc, S: Store> Synchronizer<'a, C, S> {
    pub fn new(rpc: &'a C, store: &'a S, config: SyncConfig) -> Synchronizer<'a, C, S> {
        Synchronizer {
            rpc,
            store,
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the run between blocks once set.
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    pub async fn synchronize(&self) -> Result<SyncReport, SyncError> {
        let accounts_existed = !self.store.is_empty(Collection::Accounts)?;
        let mut report = SyncReport::default();

        self.check_cancelled()?;
        let outcome = self
            .gated(Stage::Apps, Collection::Apps, self.seed_apps())
            .await?;
        report.stages.push((Stage::Apps, outcome));

        self.check_cancelled()?;
        let outcome = self
            .gated(Stage::Tokens, Collection::Tokens, self.seed_tokens())
            .await?;
        report.stages.push((Stage::Tokens, outcome));

        self.check_cancelled()?;
        let outcome = self
            .gated(Stage::Chains, Collection::Chains, self.seed_chains())
            .await?;
        report.stages.push((Stage::Chains, outcome));
        report.walks = self.walk_chains().await.map_err(|e| {
            log::error!("Stage {} failed: {}", Stage::Chains, e);
            e
        })?;

        self.check_cancelled()?;
        if self.config.legacy_balance_gating && !accounts_existed {
            log::info!("No accounts before this run, deferring balances");
            report.stages.push((Stage::Balances, StageOutcome::Deferred));
        } else {
            let summary = balance::classify_balances(self.rpc, self.store, &self.cancelled)
                .await
                .map_err(|e| {
                    log::error!("Stage {} failed: {}", Stage::Balances, e);
                    e
                })?;
            report.stages.push((
                Stage::Balances,
                StageOutcome::Completed {
                    written: summary.accounts,
                },
            ));
            report.balances = Some(summary);
        }
        Ok(report)
    }

    async fn gated<F>(
        &self,
        stage: Stage,
        collection: Collection,
        seed: F,
    ) -> Result<StageOutcome, SyncError>
    where
        F: Future<Output = Result<usize, SyncError>>,
    {
        if !self.store.is_empty(collection)? {
            log::info!("Stage {} already seeded, skipping", stage);
            return Ok(StageOutcome::AlreadySeeded);
        }
        let before = Instant::now();
        let written = seed.await.map_err(|e| {
            log::error!("Stage {} failed: {}", stage, e);
            e
        })?;
        log::info!(
            "Stage {}: inserted {} rows in {:.2?}",
            stage,
            written,
            before.elapsed()
        );
        Ok(StageOutcome::Completed { written })
    }

    async fn seed_apps(&self) -> Result<usize, SyncError> {
        let apps = self
            .rpc
            .get_apps()
            .await?
            .into_iter()
            .map(build_app)
            .collect::<Vec<App>>();
        Ok(self.store.insert_apps(&apps)?)
    }

    async fn seed_tokens(&self) -> Result<usize, SyncError> {
        let tokens = self
            .rpc
            .get_tokens()
            .await?
            .into_iter()
            .filter_map(|record| match build_token(record) {
                Ok(token) => Some(token),
                Err(e) => {
                    log::warn!("Skipping token: {}", e);
                    None
                }
            })
            .collect::<Vec<Token>>();
        Ok(self.store.insert_tokens(&tokens)?)
    }

    /// Chain accounts go first so that a stored chain list always has them.
    async fn seed_chains(&self) -> Result<usize, SyncError> {
        let chains = self
            .rpc
            .get_chains()
            .await?
            .into_iter()
            .map(build_chain)
            .collect::<Vec<Chain>>();
        let accounts = chains
            .iter()
            .map(|chain| Account::new(&chain.address))
            .collect::<Vec<Account>>();
        self.store.insert_accounts(&accounts)?;
        Ok(self.store.insert_chains(&chains)?)
    }

    async fn walk_chains(&self) -> Result<Vec<WalkSummary>, SyncError> {
        let chains = self.store.find_chains()?;
        let walker = ChainWalker {
            rpc: self.rpc,
            store: self.store,
            prefetch: self.config.block_prefetch,
            cancelled: self.cancelled.as_ref(),
        };
        let walker = &walker;
        let before = Instant::now();
        let walks = stream::iter(chains)
            .map(|chain| async move { walker.walk(&chain).await })
            .buffer_unordered(self.config.chain_concurrency.max(1))
            .try_collect::<Vec<WalkSummary>>()
            .await?;
        log::info!(
            "Walked {} chains, {} new blocks in {:.2?}",
            walks.len(),
            walks.iter().map(|walk| walk.blocks).sum::<usize>(),
            before.elapsed()
        );
        Ok(walks)
    }
}

fn build_app(record: AppRecord) -> App {
    App {
        id: record.id,
        url: record.url,
        title: record.title,
        description: record.description,
        icon: record.icon,
    }
}

fn build_token(record: TokenRecord) -> Result<Token, SyncError> {
    let decimals = i32::try_from(record.decimals)
        .ok()
        .filter(|decimals| *decimals >= 0)
        .ok_or_else(|| {
            SyncError::malformed(
                "getTokens",
                format!("token {} has invalid decimals {}", record.symbol, record.decimals),
            )
        })?;
    Ok(Token {
        symbol: record.symbol,
        name: record.name,
        decimals,
        flags: record.flags,
        max_supply: record.max_supply,
        current_supply: record.current_supply,
        owner_address: record.owner_address,
    })
}

fn build_chain(record: ChainRecord) -> Chain {
    Chain {
        address: record.address,
        name: record.name,
        height: record.height,
        parent_address: record.parent_address.filter(|parent| !parent.is_empty()),
    }
}
