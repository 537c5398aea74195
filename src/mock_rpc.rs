//! Scripted [`ChainRpc`] for tests: a node whose chains, blocks and accounts
//! are plain vectors and maps.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::errors::SyncError;
use crate::models::token_flags;
use crate::phantasma_client::*;

#[derive(Default)]
pub struct MockRpc {
    pub apps: Vec<AppRecord>,
    pub tokens: Vec<TokenRecord>,
    pub chains: Vec<ChainRecord>,
    pub blocks: HashMap<String, Vec<BlockRecord>>,
    pub accounts: HashMap<String, AccountRecord>,
    pub unavailable_blocks: HashSet<(String, i64)>,
    calls: Mutex<Vec<String>>,
}

impl MockRpc {
    pub fn new() -> MockRpc {
        MockRpc::default()
    }

    /// Calls made so far to `method`.
    pub fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|m| m.as_str() == method).count())
            .unwrap_or(0)
    }

    fn record(&self, method: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(method.to_string());
        }
    }

    pub fn with_chain(mut self, address: &str, name: &str, blocks: Vec<BlockRecord>) -> MockRpc {
        self.chains.push(ChainRecord {
            name: name.to_string(),
            address: address.to_string(),
            parent_address: None,
            height: blocks.len() as i64,
        });
        self.blocks.insert(address.to_string(), blocks);
        self
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn get_apps(&self) -> Result<Vec<AppRecord>, SyncError> {
        self.record("getApps");
        Ok(self.apps.clone())
    }

    async fn get_tokens(&self) -> Result<Vec<TokenRecord>, SyncError> {
        self.record("getTokens");
        Ok(self.tokens.clone())
    }

    async fn get_chains(&self) -> Result<Vec<ChainRecord>, SyncError> {
        self.record("getChains");
        Ok(self.chains.clone())
    }

    async fn get_block_height(&self, chain_address: &str) -> Result<i64, SyncError> {
        self.record("getBlockHeight");
        self.blocks
            .get(chain_address)
            .map(|blocks| blocks.len() as i64)
            .ok_or_else(|| SyncError::malformed("getBlockHeight", "unknown chain"))
    }

    async fn get_block_by_height(
        &self,
        chain_address: &str,
        height: i64,
    ) -> Result<BlockRecord, SyncError> {
        self.record("getBlockByHeight");
        if self
            .unavailable_blocks
            .contains(&(chain_address.to_string(), height))
        {
            return Err(SyncError::unavailable("getBlockByHeight", "connection reset"));
        }
        self.blocks
            .get(chain_address)
            .and_then(|blocks| blocks.get((height - 1) as usize))
            .cloned()
            .ok_or_else(|| SyncError::malformed("getBlockByHeight", "block not found"))
    }

    async fn get_account(&self, address: &str) -> Result<AccountRecord, SyncError> {
        self.record("getAccount");
        self.accounts
            .get(address)
            .cloned()
            .ok_or_else(|| SyncError::malformed("getAccount", "account not found"))
    }
}

pub fn block_hash(chain: &str, height: i64) -> String {
    format!("{}-B{}", chain, height)
}

/// Hash linked blocks `1..=count` of `chain`, each carrying the transactions
/// scripted for its height.
pub fn make_blocks(
    chain: &str,
    count: i64,
    mut transactions: HashMap<i64, Vec<TransactionRecord>>,
) -> Vec<BlockRecord> {
    (1..=count)
        .map(|height| BlockRecord {
            hash: block_hash(chain, height),
            previous_hash: if height == 1 {
                "".to_string()
            } else {
                block_hash(chain, height - 1)
            },
            timestamp: 1_600_000_000 + height * 60,
            height,
            payload: "".to_string(),
            reward: BigDecimal::from(0),
            validator_address: "validator".to_string(),
            transactions: transactions.remove(&height).unwrap_or_default(),
        })
        .collect()
}

pub fn make_transaction(hash: &str, event_addresses: &[&str]) -> TransactionRecord {
    TransactionRecord {
        hash: hash.to_string(),
        timestamp: 1_600_000_000,
        script: "".to_string(),
        result: "".to_string(),
        events: event_addresses
            .iter()
            .map(|address| EventRecord {
                data: "".to_string(),
                event_address: address.to_string(),
                event_kind: "TokenSend".to_string(),
            })
            .collect(),
    }
}

pub fn make_token(symbol: &str, fungible: bool) -> TokenRecord {
    let flags = if fungible {
        token_flags::TRANSFERABLE | token_flags::FUNGIBLE | token_flags::DIVISIBLE
    } else {
        token_flags::TRANSFERABLE
    };
    TokenRecord {
        symbol: symbol.to_string(),
        name: symbol.to_lowercase(),
        decimals: if fungible { 8 } else { 0 },
        flags,
        max_supply: BigDecimal::from(0),
        current_supply: BigDecimal::from(1000),
        owner_address: "owner".to_string(),
    }
}
