use std::collections::{HashMap, HashSet};

use crate::db::DbError;
use crate::models::{Account, AccountTransaction};
use crate::store::{BlockBatch, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// First sighting of the address: a new account was created with this link.
    Created,
    /// Known account, new transaction.
    Appended,
    /// The account is already linked to the transaction.
    AlreadyLinked,
}

/// Links event target addresses to transactions while one block is built.
///
/// Lookups are answered from the block's pending rows first and fall back to
/// the store, so an account touched by several events of the same transaction
/// (or of the same block) gets exactly one association per transaction.
pub struct AccountAggregator<'a, S: Store> {
    store: &'a S,
    // address -> whether the account already exists in the store
    known_accounts: HashMap<String, bool>,
    linked: HashSet<(String, String)>,
}

impl<'a, S: Store> AccountAggregator<'a, S> {
    pub fn new(store: &'a S) -> AccountAggregator<'a, S> {
        AccountAggregator {
            store,
            known_accounts: HashMap::new(),
            linked: HashSet::new(),
        }
    }

    pub fn link(
        &mut self,
        batch: &mut BlockBatch,
        transaction_hash: &str,
        address: &str,
    ) -> Result<Link, DbError> {
        let key = (address.to_string(), transaction_hash.to_string());
        if self.linked.contains(&key) {
            return Ok(Link::AlreadyLinked);
        }
        let stored = match self.known_accounts.get(address) {
            Some(stored) => *stored,
            None => {
                let stored = self.store.find_account(address)?.is_some();
                self.known_accounts.insert(address.to_string(), stored);
                if !stored {
                    batch.new_accounts.push(Account::new(address));
                    self.linked.insert(key);
                    batch.account_transactions.push(AccountTransaction {
                        account_address: address.to_string(),
                        transaction_hash: transaction_hash.to_string(),
                    });
                    return Ok(Link::Created);
                }
                stored
            }
        };
        if stored && self.store.has_account_transaction(address, transaction_hash)? {
            self.linked.insert(key);
            return Ok(Link::AlreadyLinked);
        }
        self.linked.insert(key);
        batch.account_transactions.push(AccountTransaction {
            account_address: address.to_string(),
            transaction_hash: transaction_hash.to_string(),
        });
        Ok(Link::Appended)
    }
}
