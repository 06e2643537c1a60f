//! Checkpoint management — persists the indexer's position for crash
//! recovery.
//!
//! The checkpoint is a single durable scalar (last fully indexed block
//! height) plus a "catch-up in progress" flag. On restart, the indexer
//! resumes from the last checkpoint rather than re-indexing from genesis.
//!
//! The live and historical pipelines both advance the checkpoint, in any
//! interleaving, so the advance must be an atomic read-modify-write that
//! only ever moves forward.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::IndexerError;

/// Key for the last fully indexed block height.
pub const LAST_INDEXED_BLOCK_KEY: &str = "contest:indexer:last_block";
/// Key for the "historical catch-up in progress" flag.
pub const CATCHING_UP_KEY: &str = "contest:indexer:catching_up";

/// Trait for the durable key/value store backing the checkpoint.
///
/// `get`/`set` must each be atomic and survive process restarts.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, IndexerError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), IndexerError>;
}

/// Process-wide checkpoint handle. Cheap to clone.
///
/// `advance_to` is the only writer path for `last_block` and holds an async
/// mutex across its read-modify-write, so concurrent live and backfill
/// writers cannot move the checkpoint backwards.
#[derive(Clone)]
pub struct SyncCheckpoint {
    store: Arc<dyn CheckpointStore>,
    advance_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SyncCheckpoint {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            advance_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// The last fully indexed block, or `None` on a fresh deployment.
    pub async fn last_indexed_block(&self) -> Result<Option<u64>, IndexerError> {
        let raw = self.store.get(LAST_INDEXED_BLOCK_KEY).await?;
        match raw {
            None => Ok(None),
            Some(s) => s
                .parse::<u64>()
                .map(Some)
                .map_err(|e| IndexerError::Storage(format!("corrupt checkpoint {s:?}: {e}"))),
        }
    }

    /// Advance the checkpoint to `block` if (and only if) it exceeds the
    /// stored value. Returns `true` when the checkpoint moved.
    pub async fn advance_to(&self, block: u64) -> Result<bool, IndexerError> {
        let _guard = self.advance_lock.lock().await;
        let current = match self.store.get(LAST_INDEXED_BLOCK_KEY).await? {
            Some(s) => s.parse::<u64>().unwrap_or(0),
            None => 0,
        };
        if block <= current {
            return Ok(false);
        }
        self.store
            .set(LAST_INDEXED_BLOCK_KEY, &block.to_string())
            .await?;
        tracing::debug!(block, "advanced checkpoint");
        Ok(true)
    }

    /// Seed the checkpoint on a fresh deployment. Does not overwrite an
    /// existing value.
    pub async fn initialize_at(&self, block: u64) -> Result<(), IndexerError> {
        let _guard = self.advance_lock.lock().await;
        if self.store.get(LAST_INDEXED_BLOCK_KEY).await?.is_none() {
            self.store
                .set(LAST_INDEXED_BLOCK_KEY, &block.to_string())
                .await?;
        }
        Ok(())
    }

    pub async fn set_catching_up(&self, value: bool) -> Result<(), IndexerError> {
        self.store
            .set(CATCHING_UP_KEY, if value { "1" } else { "0" })
            .await
    }

    pub async fn catching_up(&self) -> Result<bool, IndexerError> {
        Ok(self.store.get(CATCHING_UP_KEY).await?.as_deref() == Some("1"))
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory checkpoint store for tests and ephemeral indexers.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<String>, IndexerError> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), IndexerError> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint() -> SyncCheckpoint {
        SyncCheckpoint::new(Arc::new(MemoryCheckpointStore::new()))
    }

    #[tokio::test]
    async fn fresh_store_has_no_checkpoint() {
        let cp = checkpoint();
        assert_eq!(cp.last_indexed_block().await.unwrap(), None);
        assert!(!cp.catching_up().await.unwrap());
    }

    #[tokio::test]
    async fn advance_is_monotonic() {
        let cp = checkpoint();
        assert!(cp.advance_to(100).await.unwrap());
        assert!(cp.advance_to(150).await.unwrap());
        // Lower block — no movement
        assert!(!cp.advance_to(120).await.unwrap());
        assert_eq!(cp.last_indexed_block().await.unwrap(), Some(150));
    }

    #[tokio::test]
    async fn interleaved_advances_settle_on_max() {
        let cp = checkpoint();
        let mut handles = Vec::new();
        for block in [104u64, 101, 107, 102, 105, 103, 106, 100] {
            let cp = cp.clone();
            handles.push(tokio::spawn(async move { cp.advance_to(block).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(cp.last_indexed_block().await.unwrap(), Some(107));
    }

    #[tokio::test]
    async fn initialize_does_not_overwrite() {
        let cp = checkpoint();
        cp.initialize_at(500).await.unwrap();
        cp.initialize_at(900).await.unwrap();
        assert_eq!(cp.last_indexed_block().await.unwrap(), Some(500));
    }

    #[tokio::test]
    async fn catching_up_flag_roundtrip() {
        let cp = checkpoint();
        cp.set_catching_up(true).await.unwrap();
        assert!(cp.catching_up().await.unwrap());
        cp.set_catching_up(false).await.unwrap();
        assert!(!cp.catching_up().await.unwrap());
    }
}
