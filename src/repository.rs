use crate::db::DbError;

use super::db::DbPool;
use super::models::*;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;

// Number of parameters in one SQL query is limited to 65535, so inserts are chunked
const INSERT_CHUNK: usize = 1000;

#[derive(Clone)]
pub struct AppsRepository {
    pub pool: DbPool,
}

impl AppsRepository {
    pub fn count(&self) -> Result<i64, DbError> {
        use crate::schema::apps::dsl::*;
        let mut conn = self.pool.get()?;
        Ok(apps.count().get_result(&mut conn)?)
    }

    pub fn insert_batch(&self, new_apps: &[App]) -> Result<usize, DbError> {
        use crate::schema::apps::dsl::apps;
        let mut conn = self.pool.get()?;
        let mut inserted = 0;
        for chunk in new_apps.chunks(INSERT_CHUNK) {
            inserted += diesel::insert_into(apps)
                .values(chunk)
                .on_conflict_do_nothing()
                .execute(&mut conn)?;
        }
        Ok(inserted)
    }
}

#[derive(Clone)]
pub struct TokensRepository {
    pub pool: DbPool,
}

impl TokensRepository {
    pub fn count(&self) -> Result<i64, DbError> {
        use crate::schema::tokens::dsl::*;
        let mut conn = self.pool.get()?;
        Ok(tokens.count().get_result(&mut conn)?)
    }

    pub fn find_by_symbol(&self, token_symbol: &str) -> Result<Option<Token>, DbError> {
        use crate::schema::tokens::dsl::{symbol, tokens};
        let mut conn = self.pool.get()?;
        let result = tokens
            .filter(symbol.eq(token_symbol))
            .select(Token::as_select())
            .first::<Token>(&mut conn)
            .optional()?;
        Ok(result)
    }

    pub fn insert_batch(&self, new_tokens: &[Token]) -> Result<usize, DbError> {
        use crate::schema::tokens::dsl::tokens;
        let mut conn = self.pool.get()?;
        let mut inserted = 0;
        for chunk in new_tokens.chunks(INSERT_CHUNK) {
            inserted += diesel::insert_into(tokens)
                .values(chunk)
                .on_conflict_do_nothing()
                .execute(&mut conn)?;
        }
        Ok(inserted)
    }
}

#[derive(Clone)]
pub struct ChainsRepository {
    pub pool: DbPool,
}

impl ChainsRepository {
    pub fn count(&self) -> Result<i64, DbError> {
        use crate::schema::chains::dsl::*;
        let mut conn = self.pool.get()?;
        Ok(chains.count().get_result(&mut conn)?)
    }

    pub fn find_all(&self) -> Result<Vec<Chain>, DbError> {
        use crate::schema::chains::dsl::*;
        let mut conn = self.pool.get()?;
        let results = chains
            .select(Chain::as_select())
            .order(name.asc())
            .load::<Chain>(&mut conn)?;
        Ok(results)
    }

    pub fn insert_batch(&self, new_chains: &[Chain]) -> Result<usize, DbError> {
        use crate::schema::chains::dsl::chains;
        let mut conn = self.pool.get()?;
        let inserted = diesel::insert_into(chains)
            .values(new_chains)
            .on_conflict_do_nothing()
            .execute(&mut conn)?;
        Ok(inserted)
    }

    /// Raises the stored height of a chain, never lowers it.
    pub fn advance_height_on(
        conn: &mut PgConnection,
        chain: &str,
        block_height: i64,
    ) -> QueryResult<usize> {
        use crate::schema::chains::dsl::{chains, height};
        diesel::update(chains.find(chain))
            .filter(height.lt(block_height))
            .set(height.eq(block_height))
            .execute(conn)
    }
}

#[derive(Clone)]
pub struct BlocksRepository {
    pub pool: DbPool,
}

impl BlocksRepository {
    pub fn find_by_hash(&self, block_hash: &str) -> Result<Option<Block>, DbError> {
        use crate::schema::blocks::dsl::{blocks, hash};
        let mut conn = self.pool.get()?;
        let result = blocks
            .filter(hash.eq(block_hash))
            .select(Block::as_select())
            .first::<Block>(&mut conn)
            .optional()?;
        Ok(result)
    }

    pub fn find_by_height(&self, chain: &str, block_height: i64) -> Result<Option<Block>, DbError> {
        use crate::schema::blocks::dsl::{blocks, chain_address, height};
        let mut conn = self.pool.get()?;
        let result = blocks
            .filter(height.eq(block_height))
            .filter(chain_address.eq(chain))
            .select(Block::as_select())
            .first::<Block>(&mut conn)
            .optional()?;
        Ok(result)
    }

    /// Blocks of `chain` with `min_height <= height <= max_height`, ascending.
    pub fn find_by_range(
        &self,
        chain: &str,
        min_height: i64,
        max_height: i64,
    ) -> Result<Vec<Block>, DbError> {
        use crate::schema::blocks::dsl::{blocks, chain_address, height};
        let mut conn = self.pool.get()?;
        let results = blocks
            .filter(height.ge(min_height))
            .filter(height.le(max_height))
            .filter(chain_address.eq(chain))
            .select(Block::as_select())
            .order(height.asc())
            .load::<Block>(&mut conn)?;
        Ok(results)
    }

    pub fn find_min_max_height(&self, chain: &str) -> Result<Option<(i64, i64)>, DbError> {
        use crate::schema::blocks::dsl::{blocks, chain_address, height};
        use diesel::dsl::{max, min};
        let mut conn = self.pool.get()?;
        let (min_height, max_height) = blocks
            .filter(chain_address.eq(chain))
            .select((min(height), max(height)))
            .first::<(Option<i64>, Option<i64>)>(&mut conn)?;
        Ok(min_height.zip(max_height))
    }

    pub fn count(&self, chain: &str) -> Result<i64, DbError> {
        use crate::schema::blocks::dsl::{blocks, chain_address};
        let mut conn = self.pool.get()?;
        let count = blocks
            .filter(chain_address.eq(chain))
            .count()
            .get_result(&mut conn)?;
        Ok(count)
    }

    pub fn insert_on(conn: &mut PgConnection, block: &Block) -> QueryResult<usize> {
        use crate::schema::blocks::dsl::blocks;
        diesel::insert_into(blocks)
            .values(block)
            .on_conflict_do_nothing()
            .execute(conn)
    }
}

#[derive(Clone)]
pub struct TransactionsRepository {
    pub pool: DbPool,
}

impl TransactionsRepository {
    pub fn find_by_hash(&self, tx_hash: &str) -> Result<Option<Transaction>, DbError> {
        use crate::schema::transactions::dsl::{hash, transactions};
        let mut conn = self.pool.get()?;
        let result = transactions
            .filter(hash.eq(tx_hash))
            .select(Transaction::as_select())
            .first::<Transaction>(&mut conn)
            .optional()?;
        Ok(result)
    }

    pub fn insert_batch_on(conn: &mut PgConnection, txs: &[Transaction]) -> QueryResult<usize> {
        use crate::schema::transactions::dsl::transactions;
        let mut inserted = 0;
        for chunk in txs.chunks(INSERT_CHUNK) {
            inserted += diesel::insert_into(transactions)
                .values(chunk)
                .on_conflict_do_nothing()
                .execute(conn)?;
        }
        Ok(inserted)
    }
}

#[derive(Clone)]
pub struct EventsRepository {
    pub pool: DbPool,
}

impl EventsRepository {
    pub fn find_by_transaction(&self, tx_hash: &str) -> Result<Vec<Event>, DbError> {
        use crate::schema::events::dsl::{events, idx, transaction_hash};
        let mut conn = self.pool.get()?;
        let results = events
            .filter(transaction_hash.eq(tx_hash))
            .select(Event::as_select())
            .order(idx.asc())
            .load::<Event>(&mut conn)?;
        Ok(results)
    }

    pub fn insert_batch_on(conn: &mut PgConnection, new_events: &[Event]) -> QueryResult<usize> {
        use crate::schema::events::dsl::events;
        let mut inserted = 0;
        for chunk in new_events.chunks(INSERT_CHUNK) {
            inserted += diesel::insert_into(events)
                .values(chunk)
                .on_conflict_do_nothing()
                .execute(conn)?;
        }
        Ok(inserted)
    }
}

#[derive(Clone)]
pub struct AccountsRepository {
    pub pool: DbPool,
}

impl AccountsRepository {
    pub fn count(&self) -> Result<i64, DbError> {
        use crate::schema::accounts::dsl::*;
        let mut conn = self.pool.get()?;
        Ok(accounts.count().get_result(&mut conn)?)
    }

    pub fn find_by_address(&self, account: &str) -> Result<Option<Account>, DbError> {
        use crate::schema::accounts::dsl::{accounts, address};
        let mut conn = self.pool.get()?;
        let result = accounts
            .filter(address.eq(account))
            .select(Account::as_select())
            .first::<Account>(&mut conn)
            .optional()?;
        Ok(result)
    }

    /// Accounts whose balances watermark is null or behind their transaction
    /// count, paired with that count.
    pub fn find_pending_balances(&self) -> Result<Vec<(Account, i64)>, DbError> {
        use crate::schema::account_transactions::dsl::{account_transactions, transaction_hash};
        use crate::schema::accounts::dsl::{accounts, address, balances_watermark};
        use diesel::dsl::count;
        let mut conn = self.pool.get()?;
        let results = accounts
            .left_join(account_transactions)
            .group_by(address)
            .having(
                balances_watermark
                    .is_null()
                    .or(balances_watermark.lt(count(transaction_hash.nullable()).nullable())),
            )
            .select((Account::as_select(), count(transaction_hash.nullable())))
            .order(address.asc())
            .load::<(Account, i64)>(&mut conn)?;
        Ok(results)
    }

    pub fn insert_batch(&self, new_accounts: &[Account]) -> Result<usize, DbError> {
        let mut conn = self.pool.get()?;
        Ok(Self::insert_batch_on(&mut conn, new_accounts)?)
    }

    pub fn insert_batch_on(conn: &mut PgConnection, new_accounts: &[Account]) -> QueryResult<usize> {
        use crate::schema::accounts::dsl::accounts;
        let mut inserted = 0;
        for chunk in new_accounts.chunks(INSERT_CHUNK) {
            inserted += diesel::insert_into(accounts)
                .values(chunk)
                .on_conflict_do_nothing()
                .execute(conn)?;
        }
        Ok(inserted)
    }

    pub fn update_on(conn: &mut PgConnection, account: &Account) -> QueryResult<usize> {
        use crate::schema::accounts::dsl::{accounts, balances_watermark, name};
        diesel::update(accounts.find(&account.address))
            .set((
                name.eq(&account.name),
                balances_watermark.eq(account.balances_watermark),
            ))
            .execute(conn)
    }
}

#[derive(Clone)]
pub struct AccountTransactionsRepository {
    pub pool: DbPool,
}

impl AccountTransactionsRepository {
    pub fn exists(&self, account: &str, tx_hash: &str) -> Result<bool, DbError> {
        use crate::schema::account_transactions::dsl::{
            account_address, account_transactions, transaction_hash,
        };
        let mut conn = self.pool.get()?;
        let found = diesel::select(diesel::dsl::exists(
            account_transactions
                .filter(account_address.eq(account))
                .filter(transaction_hash.eq(tx_hash)),
        ))
        .get_result::<bool>(&mut conn)?;
        Ok(found)
    }

    pub fn find_by_account(&self, account: &str) -> Result<Vec<AccountTransaction>, DbError> {
        use crate::schema::account_transactions::dsl::{account_address, account_transactions};
        let mut conn = self.pool.get()?;
        let results = account_transactions
            .filter(account_address.eq(account))
            .select(AccountTransaction::as_select())
            .load::<AccountTransaction>(&mut conn)?;
        Ok(results)
    }

    pub fn insert_batch_on(
        conn: &mut PgConnection,
        links: &[AccountTransaction],
    ) -> QueryResult<usize> {
        use crate::schema::account_transactions::dsl::account_transactions;
        let mut inserted = 0;
        for chunk in links.chunks(INSERT_CHUNK) {
            inserted += diesel::insert_into(account_transactions)
                .values(chunk)
                .on_conflict_do_nothing()
                .execute(conn)?;
        }
        Ok(inserted)
    }
}

#[derive(Clone)]
pub struct FungibleBalancesRepository {
    pub pool: DbPool,
}

impl FungibleBalancesRepository {
    pub fn find_by_account(&self, account: &str) -> Result<Vec<FungibleBalance>, DbError> {
        use crate::schema::fungible_balances::dsl::{
            account_address, chain_name, fungible_balances, token_symbol,
        };
        let mut conn = self.pool.get()?;
        let results = fungible_balances
            .filter(account_address.eq(account))
            .select(FungibleBalance::as_select())
            .order((chain_name.asc(), token_symbol.asc()))
            .load::<FungibleBalance>(&mut conn)?;
        Ok(results)
    }

    /// One row per (account, chain, token): a newer amount replaces the stored one.
    pub fn upsert_batch_on(
        conn: &mut PgConnection,
        balances: &[FungibleBalance],
    ) -> QueryResult<usize> {
        use crate::schema::fungible_balances::dsl::{
            account_address, amount, chain_name, fungible_balances, token_symbol,
        };
        let mut written = 0;
        for chunk in balances.chunks(INSERT_CHUNK) {
            written += diesel::insert_into(fungible_balances)
                .values(chunk)
                .on_conflict((account_address, chain_name, token_symbol))
                .do_update()
                .set(amount.eq(excluded(amount)))
                .execute(conn)?;
        }
        Ok(written)
    }

    pub fn delete_batch_on(
        conn: &mut PgConnection,
        balances: &[FungibleBalance],
    ) -> QueryResult<usize> {
        use crate::schema::fungible_balances::dsl::fungible_balances;
        let mut deleted = 0;
        for balance in balances {
            deleted += diesel::delete(fungible_balances.find((
                &balance.account_address,
                &balance.chain_name,
                &balance.token_symbol,
            )))
            .execute(conn)?;
        }
        Ok(deleted)
    }
}

#[derive(Clone)]
pub struct NonFungibleHoldingsRepository {
    pub pool: DbPool,
}

impl NonFungibleHoldingsRepository {
    pub fn find_by_account(&self, account: &str) -> Result<Vec<NonFungibleHolding>, DbError> {
        use crate::schema::non_fungible_holdings::dsl::{
            account_address, instance_id, non_fungible_holdings, token_symbol,
        };
        let mut conn = self.pool.get()?;
        let results = non_fungible_holdings
            .filter(account_address.eq(account))
            .select(NonFungibleHolding::as_select())
            .order((token_symbol.asc(), instance_id.asc()))
            .load::<NonFungibleHolding>(&mut conn)?;
        Ok(results)
    }

    pub fn insert_batch_on(
        conn: &mut PgConnection,
        holdings: &[NonFungibleHolding],
    ) -> QueryResult<usize> {
        use crate::schema::non_fungible_holdings::dsl::non_fungible_holdings;
        let mut inserted = 0;
        for chunk in holdings.chunks(INSERT_CHUNK) {
            inserted += diesel::insert_into(non_fungible_holdings)
                .values(chunk)
                .on_conflict_do_nothing()
                .execute(conn)?;
        }
        Ok(inserted)
    }

    pub fn delete_batch_on(
        conn: &mut PgConnection,
        holdings: &[NonFungibleHolding],
    ) -> QueryResult<usize> {
        use crate::schema::non_fungible_holdings::dsl::non_fungible_holdings;
        let mut deleted = 0;
        for holding in holdings {
            deleted += diesel::delete(non_fungible_holdings.find((
                &holding.account_address,
                &holding.token_symbol,
                &holding.instance_id,
            )))
            .execute(conn)?;
        }
        Ok(deleted)
    }
}

#[derive(Clone)]
pub struct CheckpointsRepository {
    pub pool: DbPool,
}

impl CheckpointsRepository {
    pub fn find_by_chain(&self, chain: &str) -> Result<Option<SyncCheckpoint>, DbError> {
        use crate::schema::sync_checkpoints::dsl::{chain_address, sync_checkpoints};
        let mut conn = self.pool.get()?;
        let result = sync_checkpoints
            .filter(chain_address.eq(chain))
            .select(SyncCheckpoint::as_select())
            .first::<SyncCheckpoint>(&mut conn)
            .optional()?;
        Ok(result)
    }

    pub fn upsert_on(conn: &mut PgConnection, checkpoint: &SyncCheckpoint) -> QueryResult<usize> {
        use crate::schema::sync_checkpoints::dsl::{
            block_hash, chain_address, height, sync_checkpoints,
        };
        diesel::insert_into(sync_checkpoints)
            .values(checkpoint)
            .on_conflict(chain_address)
            .do_update()
            .set((
                height.eq(excluded(height)),
                block_hash.eq(excluded(block_hash)),
            ))
            .execute(conn)
    }
}
