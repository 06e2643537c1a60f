//! In-memory storage backend.
//!
//! Keeps the relational shape of the Postgres backend in plain maps.
//! Useful for tests and short-lived indexers that don't need persistence.
//! One mutex guards all tables, so each `apply_*` is atomic exactly like a
//! database transaction.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use contestindex_core::checkpoint::CheckpointStore;
use contestindex_core::error::IndexerError;
use contestindex_core::event::{ContestCreatedEvent, ContestState, ProposalEvent, VoteEvent};

use crate::store::ContestStore;
use crate::units::{add_wei, format_units18};

/// A persisted contest with its running aggregates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContestRow {
    pub address: String,
    pub contest_id: String,
    pub creator: String,
    pub contest_start: String,
    pub voting_period: String,
    pub state: ContestState,
    pub total_proposals: u64,
    /// Raw wei-scale total as a decimal string.
    pub total_votes: String,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalRow {
    pub proposal_id: String,
    pub contest_address: String,
    pub author: String,
    pub description: String,
    /// Raw wei-scale total as a decimal string.
    pub total_votes: String,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteRow {
    pub tx_hash: String,
    pub log_index: u32,
    pub contest_address: String,
    pub proposal_id: String,
    pub voter: String,
    /// Raw wei-scale weight.
    pub num_votes: String,
    /// 18-decimal scaled display form of `num_votes`.
    pub num_votes_scaled: String,
    /// Raw wei-scale cost.
    pub cost: String,
    /// 18-decimal scaled display form of `cost`.
    pub cost_scaled: String,
    pub block_number: u64,
    pub voted_at: u64,
}

#[derive(Default)]
struct Tables {
    contests: HashMap<String, ContestRow>,
    proposals: HashMap<(String, String), ProposalRow>,
    votes: HashMap<(String, u32), VoteRow>,
    checkpoints: HashMap<String, String>,
}

/// In-memory contest store.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contest(&self, address: &str) -> Option<ContestRow> {
        self.tables.lock().unwrap().contests.get(address).cloned()
    }

    pub fn proposal(&self, proposal_id: &str, contest_address: &str) -> Option<ProposalRow> {
        self.tables
            .lock()
            .unwrap()
            .proposals
            .get(&(proposal_id.to_string(), contest_address.to_string()))
            .cloned()
    }

    pub fn vote(&self, tx_hash: &str, log_index: u32) -> Option<VoteRow> {
        self.tables
            .lock()
            .unwrap()
            .votes
            .get(&(tx_hash.to_string(), log_index))
            .cloned()
    }

    pub fn contest_count(&self) -> usize {
        self.tables.lock().unwrap().contests.len()
    }

    pub fn proposal_count(&self) -> usize {
        self.tables.lock().unwrap().proposals.len()
    }

    pub fn vote_count(&self) -> usize {
        self.tables.lock().unwrap().votes.len()
    }
}

#[async_trait]
impl ContestStore for MemoryStore {
    async fn apply_contest_created(
        &self,
        event: &ContestCreatedEvent,
    ) -> Result<bool, IndexerError> {
        let mut tables = self.tables.lock().unwrap();
        if tables.contests.contains_key(&event.contest_address) {
            return Ok(false);
        }
        tables.contests.insert(
            event.contest_address.clone(),
            ContestRow {
                address: event.contest_address.clone(),
                contest_id: event.contest_id.clone(),
                creator: event.creator.clone(),
                contest_start: event.contest_start.clone(),
                voting_period: event.voting_period.clone(),
                state: ContestState::Queued,
                total_proposals: 0,
                total_votes: "0".into(),
                block_number: event.block_number,
                tx_hash: event.tx_hash.clone(),
                log_index: event.log_index,
                timestamp: event.timestamp,
            },
        );
        Ok(true)
    }

    async fn apply_proposal(&self, event: &ProposalEvent) -> Result<bool, IndexerError> {
        let mut tables = self.tables.lock().unwrap();
        let key = (event.proposal_id.clone(), event.contest_address.clone());
        if tables.proposals.contains_key(&key) {
            return Ok(false);
        }
        let contest = tables
            .contests
            .get_mut(&event.contest_address)
            .ok_or_else(|| {
                IndexerError::Storage(format!("unknown contest {}", event.contest_address))
            })?;
        contest.total_proposals += 1;
        tables.proposals.insert(
            key,
            ProposalRow {
                proposal_id: event.proposal_id.clone(),
                contest_address: event.contest_address.clone(),
                author: event.author.clone(),
                description: event.description.clone(),
                total_votes: "0".into(),
                block_number: event.block_number,
                tx_hash: event.tx_hash.clone(),
                log_index: event.log_index,
                timestamp: event.timestamp,
            },
        );
        Ok(true)
    }

    async fn apply_vote(&self, event: &VoteEvent) -> Result<bool, IndexerError> {
        let mut tables = self.tables.lock().unwrap();
        let key = (event.tx_hash.clone(), event.log_index);
        if tables.votes.contains_key(&key) {
            return Ok(false);
        }

        // A vote must reference an existing proposal before any counter
        // moves; checking up front keeps the apply all-or-nothing.
        let proposal_key = (event.proposal_id.clone(), event.contest_address.clone());
        if !tables.proposals.contains_key(&proposal_key) {
            return Err(IndexerError::Storage(format!(
                "vote references unknown proposal {} in contest {}",
                event.proposal_id, event.contest_address
            )));
        }
        if !tables.contests.contains_key(&event.contest_address) {
            return Err(IndexerError::Storage(format!(
                "unknown contest {}",
                event.contest_address
            )));
        }

        let num_votes_scaled = format_units18(&event.votes)?;
        let cost_scaled = format_units18(&event.cost)?;

        // Compute both new totals before touching either row, so a bad
        // amount leaves the store untouched.
        let new_proposal_total =
            add_wei(&tables.proposals[&proposal_key].total_votes, &event.votes)?;
        let new_contest_total =
            add_wei(&tables.contests[&event.contest_address].total_votes, &event.votes)?;
        if let Some(proposal) = tables.proposals.get_mut(&proposal_key) {
            proposal.total_votes = new_proposal_total;
        }
        if let Some(contest) = tables.contests.get_mut(&event.contest_address) {
            contest.total_votes = new_contest_total;
        }

        tables.votes.insert(
            key,
            VoteRow {
                tx_hash: event.tx_hash.clone(),
                log_index: event.log_index,
                contest_address: event.contest_address.clone(),
                proposal_id: event.proposal_id.clone(),
                voter: event.voter.clone(),
                num_votes: event.votes.clone(),
                num_votes_scaled,
                cost: event.cost.clone(),
                cost_scaled,
                block_number: event.block_number,
                voted_at: event.timestamp,
            },
        );
        Ok(true)
    }

    async fn contest_addresses(&self) -> Result<Vec<String>, IndexerError> {
        Ok(self.tables.lock().unwrap().contests.keys().cloned().collect())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, IndexerError> {
        Ok(self.tables.lock().unwrap().checkpoints.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), IndexerError> {
        self.tables
            .lock()
            .unwrap()
            .checkpoints
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contest_created(address: &str, block: u64) -> ContestCreatedEvent {
        ContestCreatedEvent {
            creator: "0xaaa".into(),
            contest_address: address.into(),
            contest_id: "1".into(),
            contest_start: "1000".into(),
            voting_period: "500".into(),
            block_number: block,
            tx_hash: format!("0xtx{block}"),
            log_index: 0,
            timestamp: 1_700_000_000,
        }
    }

    fn proposal(contest: &str, id: &str, block: u64) -> ProposalEvent {
        ProposalEvent {
            contest_address: contest.into(),
            proposal_id: id.into(),
            author: "0xbbb".into(),
            description: "meme".into(),
            block_number: block,
            tx_hash: format!("0xtx{block}"),
            log_index: 1,
            timestamp: 1_700_000_012,
        }
    }

    fn vote(contest: &str, proposal_id: &str, tx: &str, votes: &str) -> VoteEvent {
        VoteEvent {
            contest_address: contest.into(),
            voter: "0xddd".into(),
            proposal_id: proposal_id.into(),
            votes: votes.into(),
            cost: "1000000000000000000".into(),
            block_number: 102,
            tx_hash: tx.into(),
            log_index: 2,
            timestamp: 1_700_000_024,
        }
    }

    #[tokio::test]
    async fn contest_upsert_is_idempotent() {
        let store = MemoryStore::new();
        assert!(store.apply_contest_created(&contest_created("0xccc", 100)).await.unwrap());
        assert!(!store.apply_contest_created(&contest_created("0xccc", 100)).await.unwrap());
        assert_eq!(store.contest_count(), 1);

        let row = store.contest("0xccc").unwrap();
        assert_eq!(row.state, ContestState::Queued);
        assert_eq!(row.total_proposals, 0);
        assert_eq!(row.total_votes, "0");
    }

    #[tokio::test]
    async fn contest_row_is_immutable_once_created() {
        let store = MemoryStore::new();
        store.apply_contest_created(&contest_created("0xccc", 100)).await.unwrap();

        // A duplicate with a different creator must not overwrite.
        let mut dup = contest_created("0xccc", 100);
        dup.creator = "0xeee".into();
        assert!(!store.apply_contest_created(&dup).await.unwrap());
        assert_eq!(store.contest("0xccc").unwrap().creator, "0xaaa");
    }

    #[tokio::test]
    async fn proposal_increments_contest_counter_once() {
        let store = MemoryStore::new();
        store.apply_contest_created(&contest_created("0xccc", 100)).await.unwrap();

        assert!(store.apply_proposal(&proposal("0xccc", "1", 101)).await.unwrap());
        assert!(!store.apply_proposal(&proposal("0xccc", "1", 101)).await.unwrap());

        assert_eq!(store.contest("0xccc").unwrap().total_proposals, 1);
        assert_eq!(store.proposal("1", "0xccc").unwrap().total_votes, "0");
    }

    #[tokio::test]
    async fn proposal_for_unknown_contest_fails() {
        let store = MemoryStore::new();
        let result = store.apply_proposal(&proposal("0xccc", "1", 101)).await;
        assert!(matches!(result, Err(IndexerError::Storage(_))));
    }

    #[tokio::test]
    async fn vote_updates_both_aggregates() {
        let store = MemoryStore::new();
        store.apply_contest_created(&contest_created("0xccc", 100)).await.unwrap();
        store.apply_proposal(&proposal("0xccc", "1", 101)).await.unwrap();

        let v = vote("0xccc", "1", "0xtx102", "5000000000000000000");
        assert!(store.apply_vote(&v).await.unwrap());

        let row = store.vote("0xtx102", 2).unwrap();
        assert_eq!(row.num_votes, "5000000000000000000");
        assert_eq!(row.num_votes_scaled, "5");
        assert_eq!(row.cost, "1000000000000000000");
        assert_eq!(row.cost_scaled, "1");

        assert_eq!(store.proposal("1", "0xccc").unwrap().total_votes, "5000000000000000000");
        assert_eq!(store.contest("0xccc").unwrap().total_votes, "5000000000000000000");
    }

    #[tokio::test]
    async fn duplicate_vote_does_not_double_count() {
        let store = MemoryStore::new();
        store.apply_contest_created(&contest_created("0xccc", 100)).await.unwrap();
        store.apply_proposal(&proposal("0xccc", "1", 101)).await.unwrap();

        let v = vote("0xccc", "1", "0xtx102", "5000000000000000000");
        assert!(store.apply_vote(&v).await.unwrap());
        assert!(!store.apply_vote(&v).await.unwrap());

        assert_eq!(store.vote_count(), 1);
        assert_eq!(store.contest("0xccc").unwrap().total_votes, "5000000000000000000");
    }

    #[tokio::test]
    async fn vote_for_missing_proposal_rolls_back() {
        let store = MemoryStore::new();
        store.apply_contest_created(&contest_created("0xccc", 100)).await.unwrap();

        let v = vote("0xccc", "99", "0xtx102", "5000000000000000000");
        assert!(matches!(store.apply_vote(&v).await, Err(IndexerError::Storage(_))));

        // Nothing moved
        assert_eq!(store.vote_count(), 0);
        assert_eq!(store.contest("0xccc").unwrap().total_votes, "0");
    }

    #[tokio::test]
    async fn contest_addresses_lists_persisted_contests() {
        let store = MemoryStore::new();
        store.apply_contest_created(&contest_created("0xc1", 100)).await.unwrap();
        store.apply_contest_created(&contest_created("0xc2", 105)).await.unwrap();

        let mut addresses = store.contest_addresses().await.unwrap();
        addresses.sort();
        assert_eq!(addresses, vec!["0xc1", "0xc2"]);
    }
}
