//! Fluent builder API for indexer configuration.
//!
//! # Example
//!
//! ```rust
//! use contestindex_evm::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .rpc_url("https://base-sepolia.example/v2/key")
//!     .chain("base-sepolia")
//!     .factory_address("0x00000000000000000000000000000000000000aa")
//!     .backfill_batch_size(500)
//!     .rpc_block_range(8)
//!     .build_config()
//!     .unwrap();
//! assert_eq!(config.backfill_batch_size, 500);
//! ```

use contestindex_core::config::IndexerConfig;
use contestindex_core::error::IndexerError;

/// Fluent builder for [`IndexerConfig`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Set the JSON-RPC endpoint URL.
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.config.rpc_url = url.into();
        self
    }

    /// Set the chain slug.
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Set the factory contract address (required).
    pub fn factory_address(mut self, address: impl Into<String>) -> Self {
        self.config.factory_address = address.into();
        self
    }

    /// Set the number of blocks per historical backfill window.
    pub fn backfill_batch_size(mut self, size: u64) -> Self {
        self.config.backfill_batch_size = size;
        self
    }

    /// Set the maximum block span per log query.
    pub fn rpc_block_range(mut self, range: u64) -> Self {
        self.config.rpc_block_range = range;
        self
    }

    /// Set block-lookup retry attempts for live factory pushes.
    pub fn creation_block_retries(mut self, attempts: u32) -> Self {
        self.config.creation_block_retries = attempts;
        self
    }

    /// Set block-lookup retry attempts for live proposal/vote pushes.
    pub fn activity_block_retries(mut self, attempts: u32) -> Self {
        self.config.activity_block_retries = attempts;
        self
    }

    /// Validate and build the [`IndexerConfig`].
    pub fn build_config(self) -> Result<IndexerConfig, IndexerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_valid_config() {
        let config = IndexerBuilder::new()
            .rpc_url("https://rpc.example")
            .chain("base-sepolia")
            .factory_address("0x00000000000000000000000000000000000000aa")
            .backfill_batch_size(500)
            .rpc_block_range(8)
            .creation_block_retries(4)
            .build_config()
            .unwrap();

        assert_eq!(config.chain, "base-sepolia");
        assert_eq!(config.backfill_batch_size, 500);
        assert_eq!(config.rpc_block_range, 8);
        assert_eq!(config.creation_block_retries, 4);
        assert_eq!(config.activity_block_retries, 3); // default
    }

    #[test]
    fn builder_rejects_missing_factory() {
        let result = IndexerBuilder::new().rpc_url("https://rpc.example").build_config();
        assert!(result.is_err());
    }
}
