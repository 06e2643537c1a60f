//! The chain client capability consumed by the event monitor.
//!
//! A thin contract over whatever JSON-RPC transport backs the process:
//! current head height, ranged log queries, block timestamp lookups, and
//! push-based log subscriptions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use contestindex_core::error::IndexerError;

/// A raw EVM log as returned by `eth_getLogs` / a log subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
}

impl RawLog {
    /// Returns the block number as u64.
    pub fn block_number_u64(&self) -> u64 {
        parse_hex_u64(&self.block_number)
    }

    /// Returns the log index as u32.
    pub fn log_index_u32(&self) -> u32 {
        parse_hex_u64(&self.log_index) as u32
    }
}

/// The slice of a block header the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    /// Unix timestamp (seconds since epoch).
    pub timestamp: u64,
}

/// Filter for a ranged log query: one contract, one event signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFilter {
    pub address: String,
    /// Event signature hash (topic[0]).
    pub topic0: String,
    /// Start block (inclusive).
    pub from_block: u64,
    /// End block (inclusive).
    pub to_block: u64,
}

impl LogFilter {
    pub fn new(address: impl Into<String>, topic0: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            topic0: topic0.into(),
            from_block: 0,
            to_block: 0,
        }
    }

    pub fn range(mut self, from: u64, to: u64) -> Self {
        self.from_block = from;
        self.to_block = to;
        self
    }
}

/// Capability trait for talking to an EVM node.
///
/// `block` distinguishes two failure modes the monitor treats differently:
/// [`IndexerError::BlockNotFound`] for blocks the node does not have, and
/// [`IndexerError::NotFinalized`] for blocks the provider cannot serve yet
/// (the retryable case during live event handling).
///
/// `subscribe_logs` returns a push channel of raw logs. The sender side
/// closing signals connection loss; the subscription does not survive it
/// and must be re-issued by the caller.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn head_height(&self) -> Result<u64, IndexerError>;

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError>;

    async fn block(&self, number: u64) -> Result<BlockHeader, IndexerError>;

    async fn subscribe_logs(
        &self,
        address: &str,
        topic0: &str,
    ) -> Result<mpsc::UnboundedReceiver<RawLog>, IndexerError>;
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> u64 {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1"), 1);
        assert_eq!(parse_hex_u64("0xff"), 255);
        assert_eq!(parse_hex_u64("1234"), 0x1234);
    }

    #[test]
    fn raw_log_accessors() {
        let log = RawLog {
            address: "0x0".into(),
            topics: vec![],
            data: "0x".into(),
            block_number: "0x12a05f200".into(), // 5_000_000_000
            tx_hash: "0x0".into(),
            log_index: "0x5".into(),
        };
        assert_eq!(log.block_number_u64(), 5_000_000_000);
        assert_eq!(log.log_index_u32(), 5);
    }

    #[test]
    fn log_filter_builder() {
        let filter = LogFilter::new("0xAbC", "0xdeadbeef").range(100, 110);
        assert_eq!(filter.from_block, 100);
        assert_eq!(filter.to_block, 110);
        assert_eq!(filter.address, "0xAbC");
    }
}
