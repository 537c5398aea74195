use diesel::Connection;

use crate::db::{DbError, DbPool};
use crate::models::*;
use crate::repository::*;

/// Collections whose emptiness gates a synchronization stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Apps,
    Tokens,
    Chains,
    Accounts,
}

/// Everything one block adds to the store. Committed atomically together
/// with the chain checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockBatch {
    pub block: Block,
    pub transactions: Vec<Transaction>,
    pub events: Vec<Event>,
    pub new_accounts: Vec<Account>,
    pub account_transactions: Vec<AccountTransaction>,
}

impl BlockBatch {
    pub fn new(block: Block) -> BlockBatch {
        BlockBatch {
            block,
            transactions: vec![],
            events: vec![],
            new_accounts: vec![],
            account_transactions: vec![],
        }
    }

    /// Orders account rows and links by key, so concurrent block commits of
    /// different chains lock shared accounts in one order.
    pub fn sort_accounts(&mut self) {
        self.new_accounts.sort_by(|a, b| a.address.cmp(&b.address));
        self.account_transactions.sort_by(|a, b| {
            (&a.account_address, &a.transaction_hash).cmp(&(&b.account_address, &b.transaction_hash))
        });
    }

    pub fn checkpoint(&self) -> SyncCheckpoint {
        SyncCheckpoint {
            chain_address: self.block.chain_address.clone(),
            height: self.block.height,
            block_hash: self.block.hash.clone(),
        }
    }
}

/// Classified holdings of one account, committed together with the account row.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountBalances {
    pub account: Account,
    pub fungible: Vec<FungibleBalance>,
    /// NFT instances not stored yet.
    pub holdings: Vec<NonFungibleHolding>,
    /// Stored balances the node no longer reports.
    pub released_fungible: Vec<FungibleBalance>,
    /// Stored NFT instances the node no longer reports.
    pub released_holdings: Vec<NonFungibleHolding>,
}

pub trait Store: Send + Sync {
    fn is_empty(&self, collection: Collection) -> Result<bool, DbError>;

    fn insert_apps(&self, apps: &[App]) -> Result<usize, DbError>;
    fn insert_tokens(&self, tokens: &[Token]) -> Result<usize, DbError>;
    fn find_token(&self, symbol: &str) -> Result<Option<Token>, DbError>;
    fn insert_chains(&self, chains: &[Chain]) -> Result<usize, DbError>;
    fn find_chains(&self) -> Result<Vec<Chain>, DbError>;

    fn find_checkpoint(&self, chain_address: &str) -> Result<Option<SyncCheckpoint>, DbError>;
    fn find_block_by_hash(&self, hash: &str) -> Result<Option<Block>, DbError>;
    fn find_block_by_height(&self, chain_address: &str, height: i64)
        -> Result<Option<Block>, DbError>;
    /// Ascending by height, bounds inclusive.
    fn find_blocks_by_range(
        &self,
        chain_address: &str,
        min_height: i64,
        max_height: i64,
    ) -> Result<Vec<Block>, DbError>;
    fn find_min_max_height(&self, chain_address: &str) -> Result<Option<(i64, i64)>, DbError>;
    fn count_blocks(&self, chain_address: &str) -> Result<i64, DbError>;
    fn find_transaction(&self, hash: &str) -> Result<Option<Transaction>, DbError>;
    fn find_events(&self, transaction_hash: &str) -> Result<Vec<Event>, DbError>;
    /// Returns false when the block was already stored.
    fn commit_block(&self, batch: &BlockBatch) -> Result<bool, DbError>;

    fn insert_accounts(&self, accounts: &[Account]) -> Result<usize, DbError>;
    fn find_account(&self, address: &str) -> Result<Option<Account>, DbError>;
    fn has_account_transaction(&self, address: &str, transaction_hash: &str)
        -> Result<bool, DbError>;
    fn find_account_transactions(&self, address: &str) -> Result<Vec<AccountTransaction>, DbError>;
    /// Accounts paired with their transaction count, when the count is ahead of
    /// the balances watermark.
    fn find_accounts_pending_balances(&self) -> Result<Vec<(Account, i64)>, DbError>;
    fn find_fungible_balances(&self, address: &str) -> Result<Vec<FungibleBalance>, DbError>;
    fn find_holdings(&self, address: &str) -> Result<Vec<NonFungibleHolding>, DbError>;
    /// Replaces the classified rows of the account and moves its watermark.
    fn commit_account_balances(&self, balances: &AccountBalances) -> Result<(), DbError>;
}

/// Postgres backed store built from the table repositories.
#[derive(Clone)]
pub struct PgStore {
    pub pool: DbPool,
    pub apps: AppsRepository,
    pub tokens: TokensRepository,
    pub chains: ChainsRepository,
    pub blocks: BlocksRepository,
    pub transactions: TransactionsRepository,
    pub events: EventsRepository,
    pub accounts: AccountsRepository,
    pub account_transactions: AccountTransactionsRepository,
    pub fungible_balances: FungibleBalancesRepository,
    pub holdings: NonFungibleHoldingsRepository,
    pub checkpoints: CheckpointsRepository,
}

impl PgStore {
    pub fn new(pool: DbPool) -> PgStore {
        PgStore {
            apps: AppsRepository { pool: pool.clone() },
            tokens: TokensRepository { pool: pool.clone() },
            chains: ChainsRepository { pool: pool.clone() },
            blocks: BlocksRepository { pool: pool.clone() },
            transactions: TransactionsRepository { pool: pool.clone() },
            events: EventsRepository { pool: pool.clone() },
            accounts: AccountsRepository { pool: pool.clone() },
            account_transactions: AccountTransactionsRepository { pool: pool.clone() },
            fungible_balances: FungibleBalancesRepository { pool: pool.clone() },
            holdings: NonFungibleHoldingsRepository { pool: pool.clone() },
            checkpoints: CheckpointsRepository { pool: pool.clone() },
            pool,
        }
    }
}

impl Store for PgStore {
    fn is_empty(&self, collection: Collection) -> Result<bool, DbError> {
        let count = match collection {
            Collection::Apps => self.apps.count()?,
            Collection::Tokens => self.tokens.count()?,
            Collection::Chains => self.chains.count()?,
            Collection::Accounts => self.accounts.count()?,
        };
        Ok(count == 0)
    }

    fn insert_apps(&self, apps: &[App]) -> Result<usize, DbError> {
        self.apps.insert_batch(apps)
    }

    fn insert_tokens(&self, tokens: &[Token]) -> Result<usize, DbError> {
        self.tokens.insert_batch(tokens)
    }

    fn find_token(&self, symbol: &str) -> Result<Option<Token>, DbError> {
        self.tokens.find_by_symbol(symbol)
    }

    fn insert_chains(&self, chains: &[Chain]) -> Result<usize, DbError> {
        self.chains.insert_batch(chains)
    }

    fn find_chains(&self) -> Result<Vec<Chain>, DbError> {
        self.chains.find_all()
    }

    fn find_checkpoint(&self, chain_address: &str) -> Result<Option<SyncCheckpoint>, DbError> {
        self.checkpoints.find_by_chain(chain_address)
    }

    fn find_block_by_hash(&self, hash: &str) -> Result<Option<Block>, DbError> {
        self.blocks.find_by_hash(hash)
    }

    fn find_block_by_height(
        &self,
        chain_address: &str,
        height: i64,
    ) -> Result<Option<Block>, DbError> {
        self.blocks.find_by_height(chain_address, height)
    }

    fn find_blocks_by_range(
        &self,
        chain_address: &str,
        min_height: i64,
        max_height: i64,
    ) -> Result<Vec<Block>, DbError> {
        self.blocks.find_by_range(chain_address, min_height, max_height)
    }

    fn find_min_max_height(&self, chain_address: &str) -> Result<Option<(i64, i64)>, DbError> {
        self.blocks.find_min_max_height(chain_address)
    }

    fn count_blocks(&self, chain_address: &str) -> Result<i64, DbError> {
        self.blocks.count(chain_address)
    }

    fn find_transaction(&self, hash: &str) -> Result<Option<Transaction>, DbError> {
        self.transactions.find_by_hash(hash)
    }

    fn find_events(&self, transaction_hash: &str) -> Result<Vec<Event>, DbError> {
        self.events.find_by_transaction(transaction_hash)
    }

    fn commit_block(&self, batch: &BlockBatch) -> Result<bool, DbError> {
        let mut conn = self.pool.get()?;
        let committed = conn.transaction::<_, diesel::result::Error, _>(|conn| {
            if BlocksRepository::insert_on(conn, &batch.block)? == 0 {
                return Ok(false);
            }
            ChainsRepository::advance_height_on(conn, &batch.block.chain_address, batch.block.height)?;
            TransactionsRepository::insert_batch_on(conn, &batch.transactions)?;
            EventsRepository::insert_batch_on(conn, &batch.events)?;
            AccountsRepository::insert_batch_on(conn, &batch.new_accounts)?;
            AccountTransactionsRepository::insert_batch_on(conn, &batch.account_transactions)?;
            CheckpointsRepository::upsert_on(conn, &batch.checkpoint())?;
            Ok(true)
        })?;
        Ok(committed)
    }

    fn insert_accounts(&self, accounts: &[Account]) -> Result<usize, DbError> {
        self.accounts.insert_batch(accounts)
    }

    fn find_account(&self, address: &str) -> Result<Option<Account>, DbError> {
        self.accounts.find_by_address(address)
    }

    fn has_account_transaction(
        &self,
        address: &str,
        transaction_hash: &str,
    ) -> Result<bool, DbError> {
        self.account_transactions.exists(address, transaction_hash)
    }

    fn find_account_transactions(&self, address: &str) -> Result<Vec<AccountTransaction>, DbError> {
        self.account_transactions.find_by_account(address)
    }

    fn find_accounts_pending_balances(&self) -> Result<Vec<(Account, i64)>, DbError> {
        self.accounts.find_pending_balances()
    }

    fn find_fungible_balances(&self, address: &str) -> Result<Vec<FungibleBalance>, DbError> {
        self.fungible_balances.find_by_account(address)
    }

    fn find_holdings(&self, address: &str) -> Result<Vec<NonFungibleHolding>, DbError> {
        self.holdings.find_by_account(address)
    }

    fn commit_account_balances(&self, balances: &AccountBalances) -> Result<(), DbError> {
        let mut conn = self.pool.get()?;
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            AccountsRepository::update_on(conn, &balances.account)?;
            FungibleBalancesRepository::delete_batch_on(conn, &balances.released_fungible)?;
            FungibleBalancesRepository::upsert_batch_on(conn, &balances.fungible)?;
            NonFungibleHoldingsRepository::delete_batch_on(conn, &balances.released_holdings)?;
            NonFungibleHoldingsRepository::insert_batch_on(conn, &balances.holdings)?;
            Ok(())
        })?;
        Ok(())
    }
}
