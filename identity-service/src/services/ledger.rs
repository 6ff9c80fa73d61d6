//! Process-local commit log standing in for the consensus chain.

use crate::models::BlockHeight;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out strictly increasing block heights. Every event produced by one
/// state transition carries the height returned by a single `commit`.
pub struct Ledger {
    chain_id: String,
    height: AtomicU64,
}

impl Ledger {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            height: AtomicU64::new(0),
        }
    }

    pub fn commit(&self) -> BlockHeight {
        let height = self.height.fetch_add(1, Ordering::SeqCst) + 1;
        BlockHeight::new(self.chain_id.clone(), height)
    }

    pub fn current(&self) -> BlockHeight {
        BlockHeight::new(self.chain_id.clone(), self.height.load(Ordering::SeqCst))
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commits_are_strictly_increasing() {
        let ledger = Ledger::new("test-chain");
        let first = ledger.commit();
        let second = ledger.commit();
        assert!(second > first);
        assert_eq!(ledger.current(), second);
        assert_eq!(second.chain_id(), "test-chain");
    }
}
