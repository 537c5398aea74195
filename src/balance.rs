use itertools::Itertools;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::db::DbError;
use crate::errors::SyncError;
use crate::models::{Account, FungibleBalance, NonFungibleHolding};
use crate::phantasma_client::{AccountRecord, ChainRpc};
use crate::store::{AccountBalances, Store};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BalanceSummary {
    pub accounts: usize,
    pub fungible: usize,
    pub holdings: usize,
    pub released: usize,
    pub skipped_accounts: usize,
    pub unknown_tokens: usize,
}

/// Loop through accounts whose transactions moved past their balances watermark
/// Fetch the account from the node
/// Classify every token entry as a fungible balance or NFT holdings
/// Commit the classification together with the new watermark
pub async fn classify_balances<C: ChainRpc, S: Store>(
    rpc: &C,
    store: &S,
    cancelled: &AtomicBool,
) -> Result<BalanceSummary, SyncError> {
    let before = Instant::now();
    let pending = store.find_accounts_pending_balances()?;
    log::info!(
        "Found {} accounts with pending balances in {}ms",
        pending.len(),
        before.elapsed().as_millis()
    );
    let mut summary = BalanceSummary::default();
    let before = Instant::now();
    for (account, tx_count) in pending {
        if cancelled.load(Ordering::SeqCst) {
            return Err(SyncError::Cancelled);
        }
        let record = match rpc.get_account(&account.address).await {
            Ok(record) => record,
            Err(e @ SyncError::RpcMalformedResponse { .. }) => {
                log::warn!("Skipping balances of account {}: {}", account.address, e);
                summary.skipped_accounts += 1;
                continue;
            }
            Err(e) => {
                log::error!("Error fetching account {}: {}", account.address, e);
                return Err(e);
            }
        };
        let address = account.address.clone();
        let (balances, unknown_tokens) = classify_account(store, account, tx_count, &record)?;
        store.commit_account_balances(&balances).map_err(|e| {
            log::error!("Error committing balances of account {}: {}", address, e);
            SyncError::StoreCommitFailure(e)
        })?;
        summary.accounts += 1;
        summary.fungible += balances.fungible.len();
        summary.holdings += balances.holdings.len();
        summary.released += balances.released_fungible.len() + balances.released_holdings.len();
        summary.unknown_tokens += unknown_tokens;
    }
    log::info!(
        "Processed balances of {} accounts in {}ms",
        summary.accounts,
        before.elapsed().as_millis()
    );
    Ok(summary)
}

/// Splits the token entries of `record` into fungible balances and NFT
/// holdings not stored yet. Stored rows the node no longer reports are
/// released. Entries of tokens missing from the store are skipped and counted.
pub fn classify_account<S: Store>(
    store: &S,
    account: Account,
    tx_count: i64,
    record: &AccountRecord,
) -> Result<(AccountBalances, usize), DbError> {
    let mut unknown_tokens = 0;
    // one row per (chain, symbol), the last entry reported wins
    let mut fungible: BTreeMap<(String, String), FungibleBalance> = BTreeMap::new();
    let mut holdings: Vec<NonFungibleHolding> = vec![];
    let stored_holdings = store.find_holdings(&account.address)?;
    let mut known = stored_holdings
        .iter()
        .map(|holding| (holding.token_symbol.clone(), holding.instance_id.clone()))
        .collect::<HashSet<(String, String)>>();
    let mut reported: HashSet<(String, String)> = HashSet::new();

    let entries_by_symbol = record
        .token_balances
        .iter()
        .map(|entry| (entry.symbol.as_str(), entry))
        .into_group_map();
    for (symbol, entries) in entries_by_symbol.into_iter().sorted_by_key(|(s, _)| *s) {
        let token = match store.find_token(symbol)? {
            Some(token) => token,
            None => {
                log::warn!(
                    "Skipping balance of unknown token {} for account {}",
                    symbol,
                    account.address
                );
                unknown_tokens += entries.len();
                continue;
            }
        };
        if token.is_fungible() {
            for entry in entries {
                fungible.insert(
                    (entry.chain_name.clone(), token.symbol.clone()),
                    FungibleBalance {
                        account_address: account.address.clone(),
                        chain_name: entry.chain_name.clone(),
                        token_symbol: token.symbol.clone(),
                        amount: entry.amount.clone(),
                    },
                );
            }
        } else {
            for entry in entries {
                for id in entry.ids.iter().unique() {
                    let key = (token.symbol.clone(), id.clone());
                    reported.insert(key.clone());
                    if known.insert(key) {
                        holdings.push(NonFungibleHolding {
                            account_address: account.address.clone(),
                            token_symbol: token.symbol.clone(),
                            instance_id: id.clone(),
                            chain_name: entry.chain_name.clone(),
                        });
                    }
                }
            }
        }
    }

    let released_fungible = store
        .find_fungible_balances(&account.address)?
        .into_iter()
        .filter(|b| !fungible.contains_key(&(b.chain_name.clone(), b.token_symbol.clone())))
        .collect::<Vec<FungibleBalance>>();
    let released_holdings = stored_holdings
        .into_iter()
        .filter(|h| !reported.contains(&(h.token_symbol.clone(), h.instance_id.clone())))
        .collect::<Vec<NonFungibleHolding>>();

    let name = if record.name.is_empty() {
        account.name
    } else {
        Some(record.name.clone())
    };
    let balances = AccountBalances {
        account: Account {
            name,
            balances_watermark: Some(tx_count),
            ..account
        },
        fungible: fungible.into_values().collect(),
        holdings,
        released_fungible,
        released_holdings,
    };
    Ok((balances, unknown_tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::mock_rpc::*;
    use crate::models::{AccountTransaction, Block, Token};
    use crate::phantasma_client::TokenBalanceRecord;
    use crate::store::BlockBatch;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use std::str::FromStr;

    fn to_token(symbol: &str, fungible: bool) -> Token {
        let record = make_token(symbol, fungible);
        Token {
            symbol: record.symbol,
            name: record.name,
            decimals: record.decimals as i32,
            flags: record.flags,
            max_supply: record.max_supply,
            current_supply: record.current_supply,
            owner_address: record.owner_address,
        }
    }

    fn entry(symbol: &str, chain: &str, amount: &str, ids: &[&str]) -> TokenBalanceRecord {
        TokenBalanceRecord {
            symbol: symbol.to_string(),
            chain_name: chain.to_string(),
            amount: BigDecimal::from_str(amount).unwrap(),
            ids: ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    fn account_record(address: &str, entries: Vec<TokenBalanceRecord>) -> AccountRecord {
        AccountRecord {
            address: address.to_string(),
            name: "".to_string(),
            token_balances: entries,
        }
    }

    /// Store with the given accounts, each linked to `tx_count` transactions.
    fn seeded_store(addresses: &[&str], tx_count: usize) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_tokens(&[to_token("SOUL", true), to_token("KCAL", true), to_token("CROWN", false)])
            .unwrap();
        let mut batch = BlockBatch::new(Block {
            hash: "B1".to_string(),
            chain_address: "chain-A".to_string(),
            previous_hash: "".to_string(),
            height: 1,
            timestamp: Utc::now().naive_utc(),
            payload: "".to_string(),
            reward: BigDecimal::from(0),
            validator_address: "validator".to_string(),
        });
        for address in addresses {
            batch.new_accounts.push(Account::new(address));
            for i in 0..tx_count {
                batch.account_transactions.push(AccountTransaction {
                    account_address: address.to_string(),
                    transaction_hash: format!("tx-{}", i),
                });
            }
        }
        store.commit_block(&batch).unwrap();
        store
    }

    #[tokio::test]
    async fn test_fungible_balance_is_recorded() {
        let store = seeded_store(&["addr-Y"], 1);
        let mut rpc = MockRpc::new();
        rpc.accounts.insert(
            "addr-Y".to_string(),
            account_record("addr-Y", vec![entry("SOUL", "main", "100", &[])]),
        );

        let summary = classify_balances(&rpc, &store, &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(summary.accounts, 1);
        assert_eq!(
            store.find_fungible_balances("addr-Y").unwrap(),
            vec![FungibleBalance {
                account_address: "addr-Y".to_string(),
                chain_name: "main".to_string(),
                token_symbol: "SOUL".to_string(),
                amount: BigDecimal::from(100),
            }]
        );
        assert!(store.find_holdings("addr-Y").unwrap().is_empty());
        assert_eq!(
            store.find_account("addr-Y").unwrap().unwrap().balances_watermark,
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_nft_holdings_are_recorded_once() {
        let store = seeded_store(&["addr-Y"], 1);
        let mut rpc = MockRpc::new();
        rpc.accounts.insert(
            "addr-Y".to_string(),
            account_record(
                "addr-Y",
                vec![entry("CROWN", "main", "2", &["nft-1", "nft-2", "nft-1"])],
            ),
        );

        classify_balances(&rpc, &store, &AtomicBool::new(false))
            .await
            .unwrap();

        let ids = store
            .find_holdings("addr-Y")
            .unwrap()
            .into_iter()
            .filter(|holding| holding.token_symbol == "CROWN")
            .map(|holding| holding.instance_id)
            .collect::<HashSet<String>>();
        assert_eq!(ids, HashSet::from(["nft-1".to_string(), "nft-2".to_string()]));
        assert!(store.find_fungible_balances("addr-Y").unwrap().is_empty());
    }

    #[test]
    fn test_only_new_nft_ids_are_classified() {
        let store = seeded_store(&["addr-Y"], 1);
        let account = store.find_account("addr-Y").unwrap().unwrap();
        let first = account_record("addr-Y", vec![entry("CROWN", "main", "2", &["nft-1", "nft-2"])]);
        let (balances, _) = classify_account(&store, account.clone(), 1, &first).unwrap();
        store.commit_account_balances(&balances).unwrap();

        let second = account_record("addr-Y", vec![entry("CROWN", "main", "2", &["nft-2", "nft-3"])]);
        let (balances, _) = classify_account(&store, account, 2, &second).unwrap();
        assert_eq!(
            balances
                .holdings
                .iter()
                .map(|holding| holding.instance_id.as_str())
                .collect::<Vec<&str>>(),
            vec!["nft-3"]
        );
    }

    #[test]
    fn test_fungible_balance_is_replaced_not_duplicated() {
        let store = seeded_store(&["addr-Y"], 1);
        let account = store.find_account("addr-Y").unwrap().unwrap();
        for amount in ["100", "250"] {
            let record = account_record("addr-Y", vec![entry("SOUL", "main", amount, &[])]);
            let (balances, _) = classify_account(&store, account.clone(), 1, &record).unwrap();
            store.commit_account_balances(&balances).unwrap();
        }
        let balances = store.find_fungible_balances("addr-Y").unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].amount, BigDecimal::from(250));
    }

    #[test]
    fn test_holdings_no_longer_reported_are_released() {
        let store = seeded_store(&["addr-Y"], 1);
        let account = store.find_account("addr-Y").unwrap().unwrap();
        let first = account_record(
            "addr-Y",
            vec![
                entry("SOUL", "main", "100", &[]),
                entry("KCAL", "main", "7", &[]),
                entry("CROWN", "main", "2", &["nft-1", "nft-2"]),
            ],
        );
        let (balances, _) = classify_account(&store, account.clone(), 1, &first).unwrap();
        store.commit_account_balances(&balances).unwrap();

        // SOUL and nft-1 were transferred away
        let second = account_record(
            "addr-Y",
            vec![entry("KCAL", "main", "9", &[]), entry("CROWN", "main", "1", &["nft-2"])],
        );
        let (balances, _) = classify_account(&store, account, 2, &second).unwrap();
        assert_eq!(balances.released_fungible.len(), 1);
        assert_eq!(balances.released_fungible[0].token_symbol, "SOUL");
        assert_eq!(balances.released_holdings.len(), 1);
        assert_eq!(balances.released_holdings[0].instance_id, "nft-1");
        store.commit_account_balances(&balances).unwrap();

        let fungible = store.find_fungible_balances("addr-Y").unwrap();
        assert_eq!(fungible.len(), 1);
        assert_eq!(fungible[0].token_symbol, "KCAL");
        assert_eq!(fungible[0].amount, BigDecimal::from(9));
        let ids = store
            .find_holdings("addr-Y")
            .unwrap()
            .into_iter()
            .map(|holding| holding.instance_id)
            .collect::<Vec<String>>();
        assert_eq!(ids, vec!["nft-2".to_string()]);
    }

    #[test]
    fn test_empty_account_releases_everything() {
        let store = seeded_store(&["addr-Y"], 1);
        let account = store.find_account("addr-Y").unwrap().unwrap();
        let first = account_record(
            "addr-Y",
            vec![entry("SOUL", "main", "1", &[]), entry("CROWN", "main", "1", &["nft-1"])],
        );
        let (balances, _) = classify_account(&store, account.clone(), 1, &first).unwrap();
        store.commit_account_balances(&balances).unwrap();

        let (balances, _) =
            classify_account(&store, account, 2, &account_record("addr-Y", vec![])).unwrap();
        store.commit_account_balances(&balances).unwrap();

        assert!(store.find_fungible_balances("addr-Y").unwrap().is_empty());
        assert!(store.find_holdings("addr-Y").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_tokens_are_skipped() {
        let store = seeded_store(&["addr-Y"], 1);
        let account = store.find_account("addr-Y").unwrap().unwrap();
        let record = account_record(
            "addr-Y",
            vec![entry("NOPE", "main", "1", &[]), entry("KCAL", "main", "5", &[])],
        );
        let (balances, unknown) = classify_account(&store, account, 1, &record).unwrap();
        assert_eq!(unknown, 1);
        assert_eq!(balances.fungible.len(), 1);
        assert_eq!(balances.fungible[0].token_symbol, "KCAL");
    }

    #[test]
    fn test_account_name_is_taken_from_the_node() {
        let store = seeded_store(&["addr-Y"], 1);
        let account = store.find_account("addr-Y").unwrap().unwrap();
        let mut record = account_record("addr-Y", vec![]);
        record.name = "genesis".to_string();
        let (balances, _) = classify_account(&store, account, 3, &record).unwrap();
        assert_eq!(balances.account.name, Some("genesis".to_string()));
        assert_eq!(balances.account.balances_watermark, Some(3));
    }

    #[tokio::test]
    async fn test_classified_accounts_are_not_fetched_again() {
        let store = seeded_store(&["addr-Y", "addr-Z"], 2);
        let mut rpc = MockRpc::new();
        rpc.accounts.insert(
            "addr-Y".to_string(),
            account_record("addr-Y", vec![entry("SOUL", "main", "1", &[])]),
        );
        rpc.accounts.insert("addr-Z".to_string(), account_record("addr-Z", vec![]));

        let first = classify_balances(&rpc, &store, &AtomicBool::new(false))
            .await
            .unwrap();
        let second = classify_balances(&rpc, &store, &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(first.accounts, 2);
        assert_eq!(second.accounts, 0);
        assert_eq!(rpc.calls("getAccount"), 2);
    }

    #[tokio::test]
    async fn test_accounts_missing_on_the_node_are_skipped() {
        let store = seeded_store(&["addr-Y"], 1);
        let rpc = MockRpc::new();

        let summary = classify_balances(&rpc, &store, &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(summary.skipped_accounts, 1);
        assert_eq!(
            store.find_account("addr-Y").unwrap().unwrap().balances_watermark,
            None
        );
    }
}
