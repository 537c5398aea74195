use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

/// Bits of the `flags` column of a token, as reported by the node.
pub mod token_flags {
    pub const TRANSFERABLE: i32 = 1 << 0;
    pub const FUNGIBLE: i32 = 1 << 1;
    pub const FINITE: i32 = 1 << 2;
    pub const DIVISIBLE: i32 = 1 << 3;
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = crate::schema::apps)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct App {
    pub id: String,
    pub url: String,
    pub title: String,
    pub description: String,
    pub icon: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = crate::schema::tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Token {
    pub symbol: String,
    pub name: String,
    pub decimals: i32,
    pub flags: i32,
    pub max_supply: BigDecimal,
    pub current_supply: BigDecimal,
    pub owner_address: String,
}

impl Token {
    pub fn is_fungible(&self) -> bool {
        self.flags & token_flags::FUNGIBLE != 0
    }
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = crate::schema::chains)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Chain {
    pub address: String,
    pub name: String,
    pub height: i64,
    pub parent_address: Option<String>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = crate::schema::blocks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[derive(Serialize)]
pub struct Block {
    pub hash: String,
    pub chain_address: String,
    pub previous_hash: String,
    pub height: i64,
    pub timestamp: NaiveDateTime,
    pub payload: String,
    pub reward: BigDecimal,
    pub validator_address: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = crate::schema::transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[derive(Serialize)]
pub struct Transaction {
    pub hash: String,
    pub block_hash: String,
    pub timestamp: NaiveDateTime,
    pub script: String,
    pub result: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = crate::schema::events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Event {
    pub transaction_hash: String,
    pub idx: i32,
    pub data: String,
    pub event_address: String,
    pub event_kind: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = crate::schema::accounts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Account {
    pub address: String,
    pub name: Option<String>,
    /// Number of linked transactions when balances were last classified.
    pub balances_watermark: Option<i64>,
}

impl Account {
    pub fn new(address: &str) -> Account {
        Account {
            address: address.to_string(),
            name: None,
            balances_watermark: None,
        }
    }
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[diesel(table_name = crate::schema::account_transactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AccountTransaction {
    pub account_address: String,
    pub transaction_hash: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = crate::schema::fungible_balances)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FungibleBalance {
    pub account_address: String,
    pub chain_name: String,
    pub token_symbol: String,
    pub amount: BigDecimal,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = crate::schema::non_fungible_holdings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NonFungibleHolding {
    pub account_address: String,
    pub token_symbol: String,
    pub instance_id: String,
    pub chain_name: String,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = crate::schema::sync_checkpoints)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SyncCheckpoint {
    pub chain_address: String,
    pub height: i64,
    pub block_hash: String,
}
