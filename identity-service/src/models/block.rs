//! Ledger position marker carried by every committed transition.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// `"<chain-id>:<height>"`, both parts non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockHeight {
    chain_id: String,
    height: u64,
}

impl BlockHeight {
    pub fn new(chain_id: impl Into<String>, height: u64) -> Self {
        Self {
            chain_id: chain_id.into(),
            height,
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn height(&self) -> u64 {
        self.height
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain_id, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid block height '{0}': expected <chain>:<height>")]
pub struct ParseBlockHeightError(String);

impl FromStr for BlockHeight {
    type Err = ParseBlockHeightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (chain_id, height) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseBlockHeightError(s.to_string()))?;
        if chain_id.is_empty() || height.is_empty() {
            return Err(ParseBlockHeightError(s.to_string()));
        }
        let height = height
            .parse()
            .map_err(|_| ParseBlockHeightError(s.to_string()))?;
        Ok(Self::new(chain_id, height))
    }
}

impl PartialOrd for BlockHeight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BlockHeight {
    fn cmp(&self, other: &Self) -> Ordering {
        self.height
            .cmp(&other.height)
            .then_with(|| self.chain_id.cmp(&other.chain_id))
    }
}

impl Serialize for BlockHeight {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockHeight {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let height = BlockHeight::new("ndid-chain", 42);
        assert_eq!(height.to_string(), "ndid-chain:42");
        assert_eq!("ndid-chain:42".parse::<BlockHeight>().unwrap(), height);
    }

    #[test]
    fn test_rejects_empty_parts() {
        assert!(":42".parse::<BlockHeight>().is_err());
        assert!("ndid-chain:".parse::<BlockHeight>().is_err());
        assert!("ndid-chain".parse::<BlockHeight>().is_err());
        assert!("ndid-chain:abc".parse::<BlockHeight>().is_err());
    }

    #[test]
    fn test_orders_by_height() {
        let low = BlockHeight::new("c", 9);
        let high = BlockHeight::new("c", 10);
        assert!(low < high);
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_value(BlockHeight::new("c", 7)).unwrap();
        assert_eq!(json, serde_json::json!("c:7"));
    }
}
