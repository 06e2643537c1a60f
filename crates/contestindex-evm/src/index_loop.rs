//! The sync orchestrator — reconciles historical backfill with live
//! subscriptions and applies every decoded event to storage.
//!
//! # Startup
//! Read the checkpoint, start live subscriptions immediately (live
//! correctness never waits on backfill), then — if the checkpoint lags the
//! chain head — run bounded-window backfill concurrently.
//!
//! # Application
//! Every event goes through one transactional, idempotent store apply
//! under the storage-conflict retry policy, then advances the checkpoint
//! with a monotonic guard. Live and historical pipelines may interleave
//! freely: natural-key upserts plus the guard make any ordering safe.
//!
//! # Discovery
//! A contest's existence is itself an indexed event. Applying a
//! `ContestCreated` registers the contest contract and subscribes to its
//! proposal and vote streams, closing the loop between the factory stream
//! and per-contest streams.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use contestindex_core::checkpoint::SyncCheckpoint;
use contestindex_core::config::{IndexerConfig, IndexerState};
use contestindex_core::error::IndexerError;
use contestindex_core::event::{ContestCreatedEvent, ProposalEvent, VoteEvent};
use contestindex_core::registry::ContractKind;
use contestindex_core::retry::{retry, RetryPolicy};
use contestindex_storage::ContestStore;

use crate::client::ChainClient;
use crate::monitor::EventMonitor;

/// The top-level control loop.
pub struct Indexer<C: ChainClient + 'static, S> {
    config: IndexerConfig,
    monitor: Arc<EventMonitor<C>>,
    store: Arc<S>,
    checkpoint: SyncCheckpoint,
    state: Mutex<IndexerState>,
    /// Channel drain tasks (factory creations + per-contest streams).
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<C, S> Indexer<C, S>
where
    C: ChainClient + 'static,
    S: ContestStore + 'static,
{
    pub fn new(
        config: IndexerConfig,
        monitor: Arc<EventMonitor<C>>,
        store: Arc<S>,
        checkpoint: SyncCheckpoint,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            monitor,
            store,
            checkpoint,
            state: Mutex::new(IndexerState::Idle),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> IndexerState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: IndexerState) {
        *self.state.lock().unwrap() = state;
    }

    /// Start the orchestrator. Returns once live subscriptions are
    /// established; event processing and any backfill continue on
    /// background tasks until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), IndexerError> {
        self.config.validate()?;

        let head = self.monitor.head_height().await?;
        let last = self.checkpoint.last_indexed_block().await?;

        // Live first — never delayed by backfill.
        self.start_live().await?;

        match last {
            None => {
                // Fresh deployment: index forward from the current head.
                self.checkpoint.initialize_at(head).await?;
                self.set_state(IndexerState::Live);
                tracing::info!(head, "no checkpoint found, indexing forward from head");
            }
            Some(last) if last < head => {
                self.set_state(IndexerState::Backfilling);
                tracing::info!(from = last, to = head, "checkpoint behind head, starting backfill");
                let this = Arc::clone(self);
                let handle = tokio::spawn(async move {
                    if let Err(e) = this.backfill(last, head).await {
                        tracing::error!(
                            error = %e,
                            "historical backfill failed; next run resumes from the checkpoint"
                        );
                        let _ = this.checkpoint.set_catching_up(false).await;
                    }
                    this.set_state(IndexerState::Live);
                });
                self.tasks.lock().unwrap().push(handle);
            }
            Some(last) => {
                self.set_state(IndexerState::Live);
                tracing::info!(last, head, "checkpoint at chain head");
            }
        }
        Ok(())
    }

    /// Subscribe to factory creations, and re-establish proposal/vote
    /// subscriptions for every contest a previous run already persisted.
    async fn start_live(self: &Arc<Self>) -> Result<(), IndexerError> {
        let mut creations = self.monitor.subscribe_contest_creations();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = creations.recv().await {
                this.handle_contest_created(event).await;
            }
        });
        self.tasks.lock().unwrap().push(handle);

        for address in self.store.contest_addresses().await? {
            self.monitor.register_contract(&address, ContractKind::Contest);
            if let Err(e) = self.subscribe_contest(&address) {
                tracing::warn!(contest = %address, error = %e, "could not subscribe contest, skipping");
            }
        }
        Ok(())
    }

    /// Spawn drain tasks for one contest's proposal and vote channels.
    fn subscribe_contest(self: &Arc<Self>, address: &str) -> Result<(), IndexerError> {
        let mut proposals = self.monitor.subscribe_proposals(address)?;
        let mut votes = self.monitor.subscribe_votes(address)?;

        let this = Arc::clone(self);
        let proposals_task = tokio::spawn(async move {
            while let Some(event) = proposals.recv().await {
                this.handle_proposal(event).await;
            }
        });
        let this = Arc::clone(self);
        let votes_task = tokio::spawn(async move {
            while let Some(event) = votes.recv().await {
                this.handle_vote(event).await;
            }
        });

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(proposals_task);
        tasks.push(votes_task);
        Ok(())
    }

    /// Apply a contest creation, then register + subscribe the new contest.
    pub async fn handle_contest_created(self: &Arc<Self>, event: ContestCreatedEvent) {
        let applied = retry(
            RetryPolicy::storage_conflict(),
            IndexerError::is_storage_conflict,
            || self.store.apply_contest_created(&event),
        )
        .await;

        match applied {
            Ok(inserted) => {
                if inserted {
                    tracing::info!(
                        contest = %event.contest_address,
                        creator = %event.creator,
                        tx = %event.tx_hash,
                        "indexed contest creation"
                    );
                }
                self.advance_checkpoint(event.block_number).await;
                // Dynamic discovery: a newly known contest gets its own
                // proposal/vote streams. Registration is idempotent, so a
                // backfill/live duplicate does not double-subscribe.
                if self
                    .monitor
                    .register_contract(&event.contest_address, ContractKind::Contest)
                {
                    if let Err(e) = self.subscribe_contest(&event.contest_address) {
                        tracing::warn!(
                            contest = %event.contest_address,
                            error = %e,
                            "could not subscribe contest, skipping"
                        );
                    }
                }
            }
            Err(e) => tracing::error!(
                contest = %event.contest_address,
                error = %e,
                "failed to index contest creation"
            ),
        }
    }

    pub async fn handle_proposal(&self, event: ProposalEvent) {
        let applied = retry(
            RetryPolicy::storage_conflict(),
            IndexerError::is_storage_conflict,
            || self.store.apply_proposal(&event),
        )
        .await;

        match applied {
            Ok(inserted) => {
                if inserted {
                    tracing::info!(
                        proposal = %event.proposal_id,
                        contest = %event.contest_address,
                        "indexed proposal"
                    );
                }
                self.advance_checkpoint(event.block_number).await;
            }
            Err(e) => tracing::error!(
                proposal = %event.proposal_id,
                contest = %event.contest_address,
                error = %e,
                "failed to index proposal"
            ),
        }
    }

    pub async fn handle_vote(&self, event: VoteEvent) {
        let applied = retry(
            RetryPolicy::storage_conflict(),
            IndexerError::is_storage_conflict,
            || self.store.apply_vote(&event),
        )
        .await;

        match applied {
            Ok(inserted) => {
                if inserted {
                    tracing::info!(
                        voter = %event.voter,
                        proposal = %event.proposal_id,
                        contest = %event.contest_address,
                        "indexed vote"
                    );
                }
                self.advance_checkpoint(event.block_number).await;
            }
            Err(e) => tracing::error!(
                voter = %event.voter,
                proposal = %event.proposal_id,
                error = %e,
                "failed to index vote"
            ),
        }
    }

    async fn advance_checkpoint(&self, block: u64) {
        if let Err(e) = self.checkpoint.advance_to(block).await {
            tracing::warn!(block, error = %e, "failed to advance checkpoint");
        }
    }

    /// Replay `(from, to]` in bounded windows, advancing the checkpoint
    /// after each fully applied window.
    async fn backfill(self: &Arc<Self>, from: u64, to: u64) -> Result<(), IndexerError> {
        self.checkpoint.set_catching_up(true).await?;
        let batch = self.config.backfill_batch_size;
        let mut start = from;
        while start < to {
            let end = (start + batch).min(to);
            self.backfill_window(start + 1, end).await?;
            self.checkpoint.advance_to(end).await?;
            tracing::info!(from = start + 1, to = end, "indexed historical window");
            start = end;
        }
        self.checkpoint.set_catching_up(false).await?;
        tracing::info!("historical backfill complete");
        Ok(())
    }

    /// One backfill window: contest creations first (so contests discovered
    /// inside the window are registered), then every known contest's
    /// proposals and votes.
    async fn backfill_window(self: &Arc<Self>, from: u64, to: u64) -> Result<(), IndexerError> {
        let creations = self.monitor.contest_creations(from, to).await?;
        for event in creations {
            self.handle_contest_created(event).await;
        }

        for address in self.store.contest_addresses().await? {
            self.monitor.register_contract(&address, ContractKind::Contest);

            let proposals = match self.monitor.proposals(&address, from, to).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(contest = %address, error = %e, "skipping contest proposals for window");
                    continue;
                }
            };
            let votes = match self.monitor.votes(&address, from, to).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(contest = %address, error = %e, "skipping contest votes for window");
                    continue;
                }
            };

            for event in proposals {
                self.handle_proposal(event).await;
            }
            for event in votes {
                self.handle_vote(event).await;
            }
        }
        Ok(())
    }

    /// Stop draining, tear down every live subscription.
    pub fn shutdown(&self) {
        for handle in self.tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
        self.monitor.shutdown();
        self.set_state(IndexerState::Stopped);
        tracing::info!("sync orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use contestindex_core::checkpoint::{MemoryCheckpointStore, SyncCheckpoint};
    use contestindex_core::registry::ContractRegistry;
    use contestindex_storage::MemoryStore;

    use crate::client::{BlockHeader, LogFilter, RawLog};
    use crate::monitor::MonitorConfig;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Chain stub that serves nothing — handler tests feed events directly.
    struct EmptyChain;

    #[async_trait]
    impl ChainClient for EmptyChain {
        async fn head_height(&self) -> Result<u64, IndexerError> {
            Ok(0)
        }
        async fn logs(&self, _filter: &LogFilter) -> Result<Vec<RawLog>, IndexerError> {
            Ok(vec![])
        }
        async fn block(&self, number: u64) -> Result<BlockHeader, IndexerError> {
            Ok(BlockHeader {
                number,
                timestamp: number * 12,
            })
        }
        async fn subscribe_logs(
            &self,
            _address: &str,
            _topic0: &str,
        ) -> Result<mpsc::UnboundedReceiver<RawLog>, IndexerError> {
            Ok(mpsc::unbounded_channel().1)
        }
    }

    const FACTORY: &str = "0xfac0000000000000000000000000000000000fac";

    fn indexer() -> (Arc<Indexer<EmptyChain, MemoryStore>>, Arc<MemoryStore>, SyncCheckpoint) {
        let store = Arc::new(MemoryStore::new());
        let checkpoint = SyncCheckpoint::new(Arc::new(MemoryCheckpointStore::new()));
        let monitor = Arc::new(EventMonitor::new(
            Arc::new(EmptyChain),
            ContractRegistry::new(),
            FACTORY,
            MonitorConfig::default(),
        ));
        let config = IndexerConfig {
            rpc_url: "http://localhost:8545".into(),
            factory_address: FACTORY.into(),
            ..Default::default()
        };
        let indexer = Indexer::new(config, monitor, store.clone(), checkpoint.clone());
        (indexer, store, checkpoint)
    }

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

    fn vote(contest: &str, proposal_id: &str, block: u64, votes: &str) -> VoteEvent {
        VoteEvent {
            contest_address: contest.into(),
            voter: "0xddd".into(),
            proposal_id: proposal_id.into(),
            votes: votes.into(),
            cost: "1000000000000000000".into(),
            block_number: block,
            tx_hash: format!("0xtx{block}"),
            log_index: 2,
            timestamp: 1_700_000_024,
        }
    }

    #[tokio::test]
    async fn handlers_advance_checkpoint_to_max_block() {
        let (indexer, _store, checkpoint) = indexer();

        indexer.handle_contest_created(contest_created("0xccc", 104)).await;
        indexer.handle_proposal(proposal("0xccc", "1", 101)).await;
        indexer.handle_vote(vote("0xccc", "1", 107, "1")).await;
        indexer.handle_proposal(proposal("0xccc", "2", 102)).await;

        assert_eq!(checkpoint.last_indexed_block().await.unwrap(), Some(107));
    }

    #[tokio::test]
    async fn duplicate_events_do_not_double_count() {
        let (indexer, store, _checkpoint) = indexer();

        let creation = contest_created("0xccc", 100);
        indexer.handle_contest_created(creation.clone()).await;
        indexer.handle_contest_created(creation).await;

        let prop = proposal("0xccc", "1", 101);
        indexer.handle_proposal(prop.clone()).await;
        indexer.handle_proposal(prop).await;

        let v = vote("0xccc", "1", 102, "5000000000000000000");
        indexer.handle_vote(v.clone()).await;
        indexer.handle_vote(v).await;

        let contest = store.contest("0xccc").unwrap();
        assert_eq!(contest.total_proposals, 1);
        assert_eq!(contest.total_votes, "5000000000000000000");
        assert_eq!(store.vote_count(), 1);
    }

    #[tokio::test]
    async fn vote_without_proposal_is_contained() {
        let (indexer, store, checkpoint) = indexer();

        indexer.handle_contest_created(contest_created("0xccc", 100)).await;
        // No proposal "9" exists — the vote is logged and skipped, the
        // checkpoint does not advance for it.
        indexer.handle_vote(vote("0xccc", "9", 105, "1")).await;

        assert_eq!(store.vote_count(), 0);
        assert_eq!(checkpoint.last_indexed_block().await.unwrap(), Some(100));
    }

    #[tokio::test]
    async fn discovery_registers_contest_for_monitoring() {
        let (indexer, _store, _checkpoint) = indexer();

        indexer.handle_contest_created(contest_created("0xCCC", 100)).await;

        let registry = indexer.monitor.registry();
        assert!(registry.contains("0xccc"));
        assert_eq!(registry.kind_of("0xccc"), Some(ContractKind::Contest));
        indexer.shutdown();
    }

    #[tokio::test]
    async fn run_seeds_checkpoint_on_fresh_deployment() {
        let (indexer, _store, checkpoint) = indexer();

        indexer.run().await.unwrap();

        // EmptyChain reports head 0; the checkpoint is seeded there and the
        // orchestrator goes straight to live.
        assert_eq!(checkpoint.last_indexed_block().await.unwrap(), Some(0));
        assert_eq!(indexer.state(), IndexerState::Live);
        indexer.shutdown();
        assert_eq!(indexer.state(), IndexerState::Stopped);
    }

    #[tokio::test]
    async fn run_rejects_invalid_config() {
        let store = Arc::new(MemoryStore::new());
        let checkpoint = SyncCheckpoint::new(Arc::new(MemoryCheckpointStore::new()));
        let monitor = Arc::new(EventMonitor::new(
            Arc::new(EmptyChain),
            ContractRegistry::new(),
            FACTORY,
            MonitorConfig::default(),
        ));
        let config = IndexerConfig::default(); // no factory address
        let indexer = Indexer::new(config, monitor, store, checkpoint);

        assert!(matches!(indexer.run().await, Err(IndexerError::Config(_))));
    }
}
