use crate::db::DbError;
use crate::models::Block;
use crate::store::Store;

const BATCH_SIZE: i64 = 100;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChainReport {
    /// Pairs of stored heights with missing blocks strictly between them.
    pub gaps: Vec<(i64, i64)>,
    /// Heights whose block does not reference the hash of the stored block below it.
    pub broken_links: Vec<i64>,
}

impl ChainReport {
    pub fn is_clean(&self) -> bool {
        self.gaps.is_empty() && self.broken_links.is_empty()
    }
}

/// Checks the stored blocks of a chain from `from_height` up to the highest
/// stored one: heights must be contiguous and every block must link to its
/// predecessor. Missing blocks right after `from_height` are reported as a
/// gap starting at `from_height - 1`.
pub fn verify_chain<S: Store>(
    store: &S,
    chain_address: &str,
    from_height: i64,
) -> Result<ChainReport, DbError> {
    let mut report = ChainReport::default();
    let (min_height, max_height) = match store.find_min_max_height(chain_address)? {
        Some(bounds) => bounds,
        None => return Ok(report),
    };
    if min_height > from_height {
        report.gaps.push((from_height - 1, min_height));
    }
    let mut previous: Option<Block> = None;
    let mut from = from_height.max(min_height);
    while from <= max_height {
        let to = (from + BATCH_SIZE - 1).min(max_height);
        for block in store.find_blocks_by_range(chain_address, from, to)? {
            if let Some(previous) = &previous {
                if block.height - previous.height > 1 {
                    report.gaps.push((previous.height, block.height));
                } else if block.previous_hash != previous.hash {
                    report.broken_links.push(block.height);
                }
            }
            previous = Some(block);
        }
        from = to + 1;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::store::BlockBatch;
    use bigdecimal::BigDecimal;
    use chrono::Utc;

    fn make_block(height: i64, previous_height: i64) -> Block {
        Block {
            hash: format!("hash-{}", height),
            chain_address: "chain-A".to_string(),
            previous_hash: format!("hash-{}", previous_height),
            height,
            timestamp: Utc::now().naive_utc(),
            payload: "".to_string(),
            reward: BigDecimal::from(0),
            validator_address: "validator".to_string(),
        }
    }

    fn store_with(heights: &[i64]) -> MemoryStore {
        let store = MemoryStore::new();
        for height in heights {
            store
                .commit_block(&BlockBatch::new(make_block(*height, height - 1)))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_verify_chain_is_clean_for_contiguous_blocks() {
        let store = store_with(&[1, 2, 3, 4, 5]);
        assert!(verify_chain(&store, "chain-A", 1).is_ok_and(|report| report.is_clean()));
        assert!(verify_chain(&store, "chain-B", 1).is_ok_and(|report| report.is_clean()));
    }

    #[test]
    fn test_verify_chain_finds_gaps() {
        let store = store_with(&[1, 2, 4, 5, 9, 10]);
        assert!(verify_chain(&store, "chain-A", 1)
            .is_ok_and(|report| report.gaps == vec![(2, 4), (5, 9)]));
        assert!(verify_chain(&store, "chain-A", 5)
            .is_ok_and(|report| report.gaps == vec![(5, 9)]));
    }

    #[test]
    fn test_verify_chain_reports_missing_start_of_chain() {
        let store = store_with(&[3, 4]);
        assert!(verify_chain(&store, "chain-A", 1).is_ok_and(|report| report.gaps == vec![(0, 3)]));
    }

    #[test]
    fn test_verify_chain_across_batches() {
        let heights = (1..=250).filter(|h| *h != 120).collect::<Vec<i64>>();
        let store = store_with(&heights);
        let report = verify_chain(&store, "chain-A", 1).unwrap();
        assert_eq!(report.gaps, vec![(119, 121)]);
        // 121 points at the missing 120, which is reported as a gap rather than a broken link
        assert!(report.broken_links.is_empty());
    }

    #[test]
    fn test_verify_chain_finds_broken_links() {
        let store = MemoryStore::new();
        store.commit_block(&BlockBatch::new(make_block(1, 0))).unwrap();
        store.commit_block(&BlockBatch::new(make_block(2, 1))).unwrap();
        let mut forked = make_block(3, 2);
        forked.previous_hash = "hash-other".to_string();
        store.commit_block(&BlockBatch::new(forked)).unwrap();

        let report = verify_chain(&store, "chain-A", 1).unwrap();
        assert!(report.gaps.is_empty());
        assert_eq!(report.broken_links, vec![3]);
        assert!(!report.is_clean());
    }
}
