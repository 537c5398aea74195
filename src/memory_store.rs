//! In-process [`Store`] with the same uniqueness rules as the Postgres schema.
//! Backs the synchronizer tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::db::DbError;
use crate::models::*;
use crate::store::{AccountBalances, BlockBatch, Collection, Store};

#[derive(Default)]
struct Tables {
    apps: BTreeMap<String, App>,
    tokens: BTreeMap<String, Token>,
    chains: BTreeMap<String, Chain>,
    blocks: BTreeMap<String, Block>,
    block_heights: BTreeMap<(String, i64), String>,
    transactions: BTreeMap<String, Transaction>,
    events: BTreeMap<(String, i32), Event>,
    accounts: BTreeMap<String, Account>,
    account_transactions: BTreeSet<(String, String)>,
    fungible_balances: BTreeMap<(String, String, String), FungibleBalance>,
    holdings: BTreeMap<(String, String, String), NonFungibleHolding>,
    checkpoints: BTreeMap<String, SyncCheckpoint>,
    writes: HashMap<Collection, usize>,
    fail_commit_at: Option<(String, i64)>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, DbError> {
        self.tables
            .lock()
            .map_err(|_| DbError::from("memory store lock poisoned"))
    }

    /// Number of insert calls that changed the given collection.
    pub fn writes(&self, collection: Collection) -> usize {
        self.tables()
            .map(|tables| tables.writes.get(&collection).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Makes the commit of the block at `height` on `chain_address` fail.
    pub fn fail_commit_at(&self, chain_address: &str, height: i64) {
        if let Ok(mut tables) = self.tables() {
            tables.fail_commit_at = Some((chain_address.to_string(), height));
        }
    }
}

impl Tables {
    fn record_write(&mut self, collection: Collection, inserted: usize) {
        if inserted > 0 {
            *self.writes.entry(collection).or_insert(0) += 1;
        }
    }

    fn insert_accounts(&mut self, accounts: &[Account]) -> usize {
        let mut inserted = 0;
        for account in accounts {
            if !self.accounts.contains_key(&account.address) {
                self.accounts
                    .insert(account.address.clone(), account.clone());
                inserted += 1;
            }
        }
        self.record_write(Collection::Accounts, inserted);
        inserted
    }

    fn transaction_count(&self, address: &str) -> i64 {
        self.account_transactions
            .iter()
            .filter(|(account, _)| account == address)
            .count() as i64
    }
}

impl Store for MemoryStore {
    fn is_empty(&self, collection: Collection) -> Result<bool, DbError> {
        let tables = self.tables()?;
        Ok(match collection {
            Collection::Apps => tables.apps.is_empty(),
            Collection::Tokens => tables.tokens.is_empty(),
            Collection::Chains => tables.chains.is_empty(),
            Collection::Accounts => tables.accounts.is_empty(),
        })
    }

    fn insert_apps(&self, apps: &[App]) -> Result<usize, DbError> {
        let mut tables = self.tables()?;
        let mut inserted = 0;
        for app in apps {
            if !tables.apps.contains_key(&app.id) {
                tables.apps.insert(app.id.clone(), app.clone());
                inserted += 1;
            }
        }
        tables.record_write(Collection::Apps, inserted);
        Ok(inserted)
    }

    fn insert_tokens(&self, tokens: &[Token]) -> Result<usize, DbError> {
        let mut tables = self.tables()?;
        let mut inserted = 0;
        for token in tokens {
            if !tables.tokens.contains_key(&token.symbol) {
                tables.tokens.insert(token.symbol.clone(), token.clone());
                inserted += 1;
            }
        }
        tables.record_write(Collection::Tokens, inserted);
        Ok(inserted)
    }

    fn find_token(&self, symbol: &str) -> Result<Option<Token>, DbError> {
        Ok(self.tables()?.tokens.get(symbol).cloned())
    }

    fn insert_chains(&self, chains: &[Chain]) -> Result<usize, DbError> {
        let mut tables = self.tables()?;
        let mut inserted = 0;
        for chain in chains {
            if !tables.chains.contains_key(&chain.address) {
                tables.chains.insert(chain.address.clone(), chain.clone());
                inserted += 1;
            }
        }
        tables.record_write(Collection::Chains, inserted);
        Ok(inserted)
    }

    fn find_chains(&self) -> Result<Vec<Chain>, DbError> {
        let mut chains = self
            .tables()?
            .chains
            .values()
            .cloned()
            .collect::<Vec<Chain>>();
        chains.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(chains)
    }

    fn find_checkpoint(&self, chain_address: &str) -> Result<Option<SyncCheckpoint>, DbError> {
        Ok(self.tables()?.checkpoints.get(chain_address).cloned())
    }

    fn find_block_by_hash(&self, hash: &str) -> Result<Option<Block>, DbError> {
        Ok(self.tables()?.blocks.get(hash).cloned())
    }

    fn find_block_by_height(
        &self,
        chain_address: &str,
        height: i64,
    ) -> Result<Option<Block>, DbError> {
        let tables = self.tables()?;
        Ok(tables
            .block_heights
            .get(&(chain_address.to_string(), height))
            .and_then(|hash| tables.blocks.get(hash))
            .cloned())
    }

    fn find_blocks_by_range(
        &self,
        chain_address: &str,
        min_height: i64,
        max_height: i64,
    ) -> Result<Vec<Block>, DbError> {
        if min_height > max_height {
            return Ok(vec![]);
        }
        let tables = self.tables()?;
        let range = (chain_address.to_string(), min_height)..=(chain_address.to_string(), max_height);
        Ok(tables
            .block_heights
            .range(range)
            .filter_map(|(_, hash)| tables.blocks.get(hash))
            .cloned()
            .collect())
    }

    fn find_min_max_height(&self, chain_address: &str) -> Result<Option<(i64, i64)>, DbError> {
        let tables = self.tables()?;
        let mut heights = tables
            .block_heights
            .keys()
            .filter(|(chain, _)| chain == chain_address)
            .map(|(_, height)| *height);
        Ok(heights.next().map(|first| {
            heights.fold((first, first), |(min, max), height| {
                (min.min(height), max.max(height))
            })
        }))
    }

    fn count_blocks(&self, chain_address: &str) -> Result<i64, DbError> {
        let tables = self.tables()?;
        Ok(tables
            .block_heights
            .keys()
            .filter(|(chain, _)| chain == chain_address)
            .count() as i64)
    }

    fn find_transaction(&self, hash: &str) -> Result<Option<Transaction>, DbError> {
        Ok(self.tables()?.transactions.get(hash).cloned())
    }

    fn find_events(&self, transaction_hash: &str) -> Result<Vec<Event>, DbError> {
        let tables = self.tables()?;
        Ok(tables
            .events
            .values()
            .filter(|event| event.transaction_hash == transaction_hash)
            .cloned()
            .collect())
    }

    fn commit_block(&self, batch: &BlockBatch) -> Result<bool, DbError> {
        let mut tables = self.tables()?;
        let block = &batch.block;
        if tables.fail_commit_at == Some((block.chain_address.clone(), block.height)) {
            return Err(DbError::from(format!(
                "injected commit failure at {} height {}",
                block.chain_address, block.height
            )));
        }
        let height_key = (block.chain_address.clone(), block.height);
        if tables.blocks.contains_key(&block.hash) || tables.block_heights.contains_key(&height_key)
        {
            return Ok(false);
        }
        tables.blocks.insert(block.hash.clone(), block.clone());
        tables.block_heights.insert(height_key, block.hash.clone());
        if let Some(chain) = tables.chains.get_mut(&block.chain_address) {
            chain.height = chain.height.max(block.height);
        }
        for tx in &batch.transactions {
            tables
                .transactions
                .entry(tx.hash.clone())
                .or_insert_with(|| tx.clone());
        }
        for event in &batch.events {
            tables
                .events
                .entry((event.transaction_hash.clone(), event.idx))
                .or_insert_with(|| event.clone());
        }
        tables.insert_accounts(&batch.new_accounts);
        for link in &batch.account_transactions {
            tables
                .account_transactions
                .insert((link.account_address.clone(), link.transaction_hash.clone()));
        }
        let checkpoint = batch.checkpoint();
        tables
            .checkpoints
            .insert(checkpoint.chain_address.clone(), checkpoint);
        Ok(true)
    }

    fn insert_accounts(&self, accounts: &[Account]) -> Result<usize, DbError> {
        Ok(self.tables()?.insert_accounts(accounts))
    }

    fn find_account(&self, address: &str) -> Result<Option<Account>, DbError> {
        Ok(self.tables()?.accounts.get(address).cloned())
    }

    fn has_account_transaction(
        &self,
        address: &str,
        transaction_hash: &str,
    ) -> Result<bool, DbError> {
        Ok(self
            .tables()?
            .account_transactions
            .contains(&(address.to_string(), transaction_hash.to_string())))
    }

    fn find_account_transactions(&self, address: &str) -> Result<Vec<AccountTransaction>, DbError> {
        let tables = self.tables()?;
        Ok(tables
            .account_transactions
            .iter()
            .filter(|(account, _)| account == address)
            .map(|(account, tx)| AccountTransaction {
                account_address: account.clone(),
                transaction_hash: tx.clone(),
            })
            .collect())
    }

    fn find_accounts_pending_balances(&self) -> Result<Vec<(Account, i64)>, DbError> {
        let tables = self.tables()?;
        Ok(tables
            .accounts
            .values()
            .map(|account| (account.clone(), tables.transaction_count(&account.address)))
            .filter(|(account, tx_count)| match account.balances_watermark {
                Some(watermark) => watermark < *tx_count,
                None => true,
            })
            .collect())
    }

    fn find_fungible_balances(&self, address: &str) -> Result<Vec<FungibleBalance>, DbError> {
        let tables = self.tables()?;
        Ok(tables
            .fungible_balances
            .values()
            .filter(|balance| balance.account_address == address)
            .cloned()
            .collect())
    }

    fn find_holdings(&self, address: &str) -> Result<Vec<NonFungibleHolding>, DbError> {
        let tables = self.tables()?;
        Ok(tables
            .holdings
            .values()
            .filter(|holding| holding.account_address == address)
            .cloned()
            .collect())
    }

    fn commit_account_balances(&self, balances: &AccountBalances) -> Result<(), DbError> {
        let mut tables = self.tables()?;
        let account = &balances.account;
        if !tables.accounts.contains_key(&account.address) {
            return Err(DbError::from(format!("unknown account {}", account.address)));
        }
        tables
            .accounts
            .insert(account.address.clone(), account.clone());
        for balance in &balances.released_fungible {
            tables.fungible_balances.remove(&(
                balance.account_address.clone(),
                balance.chain_name.clone(),
                balance.token_symbol.clone(),
            ));
        }
        for balance in &balances.fungible {
            tables.fungible_balances.insert(
                (
                    balance.account_address.clone(),
                    balance.chain_name.clone(),
                    balance.token_symbol.clone(),
                ),
                balance.clone(),
            );
        }
        for holding in &balances.released_holdings {
            tables.holdings.remove(&(
                holding.account_address.clone(),
                holding.token_symbol.clone(),
                holding.instance_id.clone(),
            ));
        }
        for holding in &balances.holdings {
            tables
                .holdings
                .entry((
                    holding.account_address.clone(),
                    holding.token_symbol.clone(),
                    holding.instance_id.clone(),
                ))
                .or_insert_with(|| holding.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::Utc;

    fn make_block(hash: &str, height: i64) -> Block {
        Block {
            hash: hash.to_string(),
            chain_address: "chain-A".to_string(),
            previous_hash: "".to_string(),
            height,
            timestamp: Utc::now().naive_utc(),
            payload: "".to_string(),
            reward: BigDecimal::from(0),
            validator_address: "validator".to_string(),
        }
    }

    #[test]
    fn test_blocks_are_found_by_hash_and_height() {
        let store = MemoryStore::new();
        store.commit_block(&BlockBatch::new(make_block("B1", 1))).unwrap();
        assert_eq!(
            store.find_block_by_hash("B1").unwrap().map(|b| b.height),
            Some(1)
        );
        assert_eq!(
            store
                .find_block_by_height("chain-A", 1)
                .unwrap()
                .map(|b| b.hash),
            Some("B1".to_string())
        );
        assert!(store.find_block_by_height("chain-A", 2).unwrap().is_none());
    }

    #[test]
    fn test_commit_block_rejects_duplicate_heights() {
        let store = MemoryStore::new();
        assert!(store.commit_block(&BlockBatch::new(make_block("B1", 1))).unwrap());
        assert!(!store.commit_block(&BlockBatch::new(make_block("B1", 1))).unwrap());
        assert!(!store.commit_block(&BlockBatch::new(make_block("other", 1))).unwrap());
        assert_eq!(store.count_blocks("chain-A").unwrap(), 1);
        assert_eq!(
            store.find_checkpoint("chain-A").unwrap().unwrap().block_hash,
            "B1"
        );
    }

    #[test]
    fn test_failed_commit_writes_nothing() {
        let store = MemoryStore::new();
        store.fail_commit_at("chain-A", 1);
        let mut batch = BlockBatch::new(make_block("B1", 1));
        batch.new_accounts.push(Account::new("addr-X"));
        assert!(store.commit_block(&batch).is_err());
        assert!(store.find_checkpoint("chain-A").unwrap().is_none());
        assert!(store.is_empty(Collection::Accounts).unwrap());
    }

    #[test]
    fn test_writes_count_only_effective_inserts() {
        let store = MemoryStore::new();
        let account = Account::new("addr-X");
        store.insert_accounts(&[account.clone()]).unwrap();
        store.insert_accounts(&[account]).unwrap();
        assert_eq!(store.writes(Collection::Accounts), 1);
        assert_eq!(store.writes(Collection::Apps), 0);
    }

    #[test]
    fn test_balances_of_unknown_accounts_are_rejected() {
        let store = MemoryStore::new();
        let balances = AccountBalances {
            account: Account::new("addr-X"),
            fungible: vec![],
            holdings: vec![],
            released_fungible: vec![],
            released_holdings: vec![],
        };
        assert!(store.commit_account_balances(&balances).is_err());
    }

    #[test]
    fn test_commit_block_raises_the_chain_height() {
        let store = MemoryStore::new();
        store
            .insert_chains(&[Chain {
                address: "chain-A".to_string(),
                name: "main".to_string(),
                height: 2,
                parent_address: None,
            }])
            .unwrap();
        let chain_height = || store.find_chains().unwrap()[0].height;

        store.commit_block(&BlockBatch::new(make_block("B1", 1))).unwrap();
        assert_eq!(chain_height(), 2);
        store.commit_block(&BlockBatch::new(make_block("B3", 3))).unwrap();
        assert_eq!(chain_height(), 3);
    }

    #[test]
    fn test_released_rows_are_removed() {
        let store = MemoryStore::new();
        store.insert_accounts(&[Account::new("addr-X")]).unwrap();
        let balance = FungibleBalance {
            account_address: "addr-X".to_string(),
            chain_name: "main".to_string(),
            token_symbol: "SOUL".to_string(),
            amount: BigDecimal::from(5),
        };
        let holding = NonFungibleHolding {
            account_address: "addr-X".to_string(),
            token_symbol: "CROWN".to_string(),
            instance_id: "nft-1".to_string(),
            chain_name: "main".to_string(),
        };
        let held = AccountBalances {
            account: Account::new("addr-X"),
            fungible: vec![balance.clone()],
            holdings: vec![holding.clone()],
            released_fungible: vec![],
            released_holdings: vec![],
        };
        store.commit_account_balances(&held).unwrap();
        store
            .commit_account_balances(&AccountBalances {
                fungible: vec![],
                holdings: vec![],
                released_fungible: vec![balance],
                released_holdings: vec![holding],
                ..held
            })
            .unwrap();

        assert!(store.find_fungible_balances("addr-X").unwrap().is_empty());
        assert!(store.find_holdings("addr-X").unwrap().is_empty());
    }
}
