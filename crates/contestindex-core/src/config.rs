//! Indexer configuration and state types.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::event::normalize_address;

/// Configuration for an indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,
    /// Chain slug (e.g. `"base-sepolia"`), used for log context only.
    pub chain: String,
    /// Address of the contest factory contract. Required.
    pub factory_address: String,
    /// How many blocks each historical backfill window covers.
    pub backfill_batch_size: u64,
    /// Maximum block span per `eth_getLogs` call (provider range limit).
    pub rpc_block_range: u64,
    /// Block-lookup retry attempts for live factory pushes.
    pub creation_block_retries: u32,
    /// Block-lookup retry attempts for live proposal/vote pushes.
    pub activity_block_retries: u32,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            chain: "base-sepolia".into(),
            factory_address: String::new(),
            backfill_batch_size: 1000,
            rpc_block_range: 10,
            creation_block_retries: 2,
            activity_block_retries: 3,
        }
    }
}

impl IndexerConfig {
    /// Load from the environment. Variables: `RPC_URL`, `FACTORY_ADDRESS`
    /// (required), `CHAIN_ID`, `BACKFILL_BATCH_SIZE`, `RPC_BLOCK_RANGE`.
    pub fn from_env() -> Result<Self, IndexerError> {
        let mut config = Self {
            rpc_url: std::env::var("RPC_URL").unwrap_or_default(),
            factory_address: std::env::var("FACTORY_ADDRESS").unwrap_or_default(),
            ..Self::default()
        };
        if let Ok(chain) = std::env::var("CHAIN_ID") {
            config.chain = chain;
        }
        if let Ok(raw) = std::env::var("BACKFILL_BATCH_SIZE") {
            config.backfill_batch_size = raw
                .parse()
                .map_err(|e| IndexerError::Config(format!("BACKFILL_BATCH_SIZE: {e}")))?;
        }
        if let Ok(raw) = std::env::var("RPC_BLOCK_RANGE") {
            config.rpc_block_range = raw
                .parse()
                .map_err(|e| IndexerError::Config(format!("RPC_BLOCK_RANGE: {e}")))?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Startup validation. A missing factory address is fatal — the
    /// process must not start without one.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.rpc_url.is_empty() {
            return Err(IndexerError::Config("RPC_URL is required".into()));
        }
        if self.factory_address.is_empty() {
            return Err(IndexerError::Config("FACTORY_ADDRESS is required".into()));
        }
        if !self.factory_address.starts_with("0x") || self.factory_address.len() != 42 {
            return Err(IndexerError::Config(format!(
                "FACTORY_ADDRESS {:?} is not a 20-byte hex address",
                self.factory_address
            )));
        }
        if self.backfill_batch_size == 0 || self.rpc_block_range == 0 {
            return Err(IndexerError::Config(
                "batch sizes must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// The factory address in canonical (lower-cased) form.
    pub fn factory(&self) -> String {
        normalize_address(&self.factory_address)
    }
}

/// Runtime state of the sync orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexerState {
    /// Not yet started.
    Idle,
    /// Live subscriptions running, historical catch-up in progress.
    Backfilling,
    /// Live subscriptions only — caught up to the chain head.
    Live,
    /// Shut down.
    Stopped,
}

impl std::fmt::Display for IndexerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Backfilling => write!(f, "backfilling"),
            Self::Live => write!(f, "live"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
