//! The persistence contract consumed by the sync orchestrator.

use async_trait::async_trait;

use contestindex_core::error::IndexerError;
use contestindex_core::event::{ContestCreatedEvent, ProposalEvent, VoteEvent};

/// Transactional, idempotent application of decoded events.
///
/// Each `apply_*` runs as one atomic transaction: the natural-key upsert
/// plus every dependent counter increment either all land or none do.
/// Re-applying an event whose natural key already exists is a no-op that
/// moves no counters — the `bool` result reports whether the row was newly
/// inserted.
///
/// Implementations map lock/deadlock-class write conflicts to
/// [`IndexerError::StorageConflict`] so the orchestrator can retry them;
/// any other failure is [`IndexerError::Storage`] and is not retried.
#[async_trait]
pub trait ContestStore: Send + Sync {
    /// Upsert a contest by its address. New contests start `Queued` with
    /// zeroed counters.
    async fn apply_contest_created(
        &self,
        event: &ContestCreatedEvent,
    ) -> Result<bool, IndexerError>;

    /// Upsert a proposal by `(proposal_id, contest_address)`; a fresh
    /// insert increments the contest's `total_proposals`.
    async fn apply_proposal(&self, event: &ProposalEvent) -> Result<bool, IndexerError>;

    /// Upsert a vote by `(tx_hash, log_index)`; a fresh insert adds the
    /// wei-scale vote weight to both the proposal's and the contest's
    /// `total_votes`. Fails (rolling back the insert) if the referenced
    /// proposal does not exist.
    async fn apply_vote(&self, event: &VoteEvent) -> Result<bool, IndexerError>;

    /// Addresses of every persisted contest, lower-cased. Used to resume
    /// per-contest backfill and live subscriptions after restart.
    async fn contest_addresses(&self) -> Result<Vec<String>, IndexerError>;
}
