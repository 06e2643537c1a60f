//! Error types for the contest indexing pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The requested block does not exist on the node.
    #[error("Block {0} not found")]
    BlockNotFound(u64),

    /// The block exists but the provider cannot serve unfinalized data yet.
    #[error("Block {0} not yet finalized")]
    NotFinalized(u64),

    #[error("Decode error in tx {tx_hash}: {reason}")]
    Decode { tx_hash: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    /// Lock/deadlock-class write conflict. Retryable with backoff.
    #[error("Storage write conflict: {0}")]
    StorageConflict(String),

    #[error("Subscription error for {address}: {reason}")]
    Subscription { address: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IndexerError {
    /// Returns `true` for "block not yet finalized" failures during live
    /// event block lookups.
    pub fn is_not_finalized(&self) -> bool {
        matches!(self, Self::NotFinalized(_))
    }

    /// Returns `true` for lock/deadlock-class storage conflicts.
    pub fn is_storage_conflict(&self) -> bool {
        matches!(self, Self::StorageConflict(_))
    }
}
