pub mod accounts;
pub mod balance;
pub mod config;
pub mod db;
pub mod errors;
pub mod gaps;
pub mod indexer;
pub mod memory_store;
pub mod models;
pub mod phantasma_client;
pub mod repository;
pub mod retry;
pub mod schema;
pub mod store;
pub mod synchronizer;

#[cfg(test)]
mod mock_rpc;
