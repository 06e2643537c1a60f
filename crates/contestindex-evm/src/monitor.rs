//! The event monitor — turns raw chain logs into typed domain events.
//!
//! Two delivery paths share the decoders:
//! - **historical**: ranged log queries, split into provider-sized
//!   sub-ranges and issued sequentially. Pure functions of the block range,
//!   so a failed batch can simply be re-run.
//! - **live**: per-(contract, event-kind) push subscriptions, each owned by
//!   a supervisor task that re-issues the subscription with backoff
//!   whenever the upstream connection drops. The orchestrator drains one
//!   ordered channel per subscription.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use contestindex_core::error::IndexerError;
use contestindex_core::event::{
    normalize_address, ContestCreatedEvent, ProposalEvent, VoteEvent,
};
use contestindex_core::registry::{ContractKind, ContractRegistry};
use contestindex_core::retry::{retry, RetryPolicy};

use crate::client::{ChainClient, LogFilter, RawLog};
use crate::decode::{
    decode_contest_created, decode_proposal, decode_vote, CONTEST_CREATED_TOPIC,
    PROPOSAL_CREATED_TOPIC, VOTE_CAST_TOPIC,
};

/// Tunables for the monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Maximum block span per log query (provider range limit).
    pub rpc_block_range: u64,
    /// Block-lookup attempts for live factory pushes.
    pub creation_block_retries: u32,
    /// Block-lookup attempts for live proposal/vote pushes.
    pub activity_block_retries: u32,
    /// Re-subscribe backoff starting duration.
    pub reconnect_initial: Duration,
    /// Maximum re-subscribe backoff.
    pub reconnect_max: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rpc_block_range: 10,
            creation_block_retries: 2,
            activity_block_retries: 3,
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

impl From<&contestindex_core::config::IndexerConfig> for MonitorConfig {
    fn from(config: &contestindex_core::config::IndexerConfig) -> Self {
        Self {
            rpc_block_range: config.rpc_block_range,
            creation_block_retries: config.creation_block_retries,
            activity_block_retries: config.activity_block_retries,
            ..Self::default()
        }
    }
}

/// Produces decoded, typed domain events from raw logs — by range-querying
/// history and by live subscription.
pub struct EventMonitor<C> {
    client: Arc<C>,
    registry: ContractRegistry,
    factory_address: String,
    config: MonitorConfig,
    /// Supervisor task handles keyed by contract address.
    tasks: Mutex<HashMap<String, Vec<JoinHandle<()>>>>,
}

impl<C: ChainClient + 'static> EventMonitor<C> {
    pub fn new(
        client: Arc<C>,
        registry: ContractRegistry,
        factory_address: &str,
        config: MonitorConfig,
    ) -> Self {
        let factory_address = normalize_address(factory_address);
        registry.register(&factory_address, ContractKind::Factory);
        Self {
            client,
            registry,
            factory_address,
            config,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    /// Current chain head height.
    pub async fn head_height(&self) -> Result<u64, IndexerError> {
        self.client.head_height().await
    }

    /// Register a contract for monitoring. Idempotent — returns `false` if
    /// the address was already known.
    pub fn register_contract(&self, address: &str, kind: ContractKind) -> bool {
        self.registry.register(address, kind)
    }

    // ─── Historical ──────────────────────────────────────────────────────────

    /// Fetch all logs in `[from, to]` for one contract + event signature,
    /// one provider-sized sub-range at a time.
    async fn fetch_chunked(
        &self,
        address: &str,
        topic0: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, IndexerError> {
        let mut all = Vec::new();
        let mut start = from;
        while start <= to {
            let end = (start + self.config.rpc_block_range - 1).min(to);
            let filter = LogFilter::new(address, topic0).range(start, end);
            let logs = self.client.logs(&filter).await?;
            tracing::debug!(address, from = start, to = end, count = logs.len(), "fetched log range");
            all.extend(logs);
            start = end + 1;
        }
        Ok(all)
    }

    /// Timestamp of `number`, cached per batch so N logs in one block cost
    /// one lookup. `None` means the block could not be fetched and the log
    /// should be skipped.
    async fn block_timestamp(&self, cache: &mut HashMap<u64, u64>, number: u64) -> Option<u64> {
        if let Some(ts) = cache.get(&number) {
            return Some(*ts);
        }
        match self.client.block(number).await {
            Ok(header) => {
                cache.insert(number, header.timestamp);
                Some(header.timestamp)
            }
            Err(e) => {
                tracing::warn!(block = number, error = %e, "could not fetch block, skipping log");
                None
            }
        }
    }

    /// Contest creations from the factory in `[from, to]`.
    pub async fn contest_creations(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<ContestCreatedEvent>, IndexerError> {
        let logs = self
            .fetch_chunked(&self.factory_address, CONTEST_CREATED_TOPIC, from, to)
            .await?;
        let mut cache = HashMap::new();
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let Some(ts) = self.block_timestamp(&mut cache, log.block_number_u64()).await else {
                continue;
            };
            match decode_contest_created(&log, ts) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(tx = %log.tx_hash, error = %e, "skipping unparsable log"),
            }
        }
        Ok(events)
    }

    /// Proposals for one registered contest in `[from, to]`.
    pub async fn proposals(
        &self,
        contest: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<ProposalEvent>, IndexerError> {
        let contest = self.known_contest(contest)?;
        let logs = self
            .fetch_chunked(&contest, PROPOSAL_CREATED_TOPIC, from, to)
            .await?;
        let mut cache = HashMap::new();
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let Some(ts) = self.block_timestamp(&mut cache, log.block_number_u64()).await else {
                continue;
            };
            match decode_proposal(&log, ts) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(tx = %log.tx_hash, error = %e, "skipping unparsable log"),
            }
        }
        Ok(events)
    }

    /// Votes for one registered contest in `[from, to]`.
    pub async fn votes(
        &self,
        contest: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<VoteEvent>, IndexerError> {
        let contest = self.known_contest(contest)?;
        let logs = self.fetch_chunked(&contest, VOTE_CAST_TOPIC, from, to).await?;
        let mut cache = HashMap::new();
        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let Some(ts) = self.block_timestamp(&mut cache, log.block_number_u64()).await else {
                continue;
            };
            match decode_vote(&log, ts) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(tx = %log.tx_hash, error = %e, "skipping unparsable log"),
            }
        }
        Ok(events)
    }

    fn known_contest(&self, address: &str) -> Result<String, IndexerError> {
        let address = normalize_address(address);
        if self.registry.kind_of(&address) != Some(ContractKind::Contest) {
            return Err(IndexerError::Subscription {
                address,
                reason: "contest is not registered".into(),
            });
        }
        Ok(address)
    }

    // ─── Live ────────────────────────────────────────────────────────────────

    /// Live contest creations from the factory, as an ordered channel.
    pub fn subscribe_contest_creations(&self) -> mpsc::UnboundedReceiver<ContestCreatedEvent> {
        self.spawn_subscription(
            self.factory_address.clone(),
            CONTEST_CREATED_TOPIC,
            self.config.creation_block_retries,
            decode_contest_created,
        )
    }

    /// Live proposals for one registered contest.
    pub fn subscribe_proposals(
        &self,
        contest: &str,
    ) -> Result<mpsc::UnboundedReceiver<ProposalEvent>, IndexerError> {
        let contest = self.known_contest(contest)?;
        Ok(self.spawn_subscription(
            contest,
            PROPOSAL_CREATED_TOPIC,
            self.config.activity_block_retries,
            decode_proposal,
        ))
    }

    /// Live votes for one registered contest.
    pub fn subscribe_votes(
        &self,
        contest: &str,
    ) -> Result<mpsc::UnboundedReceiver<VoteEvent>, IndexerError> {
        let contest = self.known_contest(contest)?;
        Ok(self.spawn_subscription(
            contest,
            VOTE_CAST_TOPIC,
            self.config.activity_block_retries,
            decode_vote,
        ))
    }

    fn spawn_subscription<T, D>(
        &self,
        address: String,
        topic0: &'static str,
        block_retries: u32,
        decode: D,
    ) -> mpsc::UnboundedReceiver<T>
    where
        T: Send + 'static,
        D: Fn(&RawLog, u64) -> Result<T, IndexerError> + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::clone(&self.client);
        let config = self.config.clone();
        let key = address.clone();
        let handle = tokio::spawn(supervise_subscription(
            client,
            address,
            topic0,
            block_retries,
            config,
            decode,
            tx,
        ));
        self.tasks.lock().unwrap().entry(key).or_default().push(handle);
        rx
    }

    /// Drop a contest's live subscriptions and registry entry.
    pub fn unsubscribe_contest(&self, address: &str) {
        let address = normalize_address(address);
        if let Some(handles) = self.tasks.lock().unwrap().remove(&address) {
            for handle in handles {
                handle.abort();
            }
        }
        self.registry.remove(&address);
        tracing::info!(%address, "unsubscribed contest");
    }

    /// Tear down every live subscription, factory stream included.
    pub fn shutdown(&self) {
        for contest in self.registry.contest_addresses() {
            self.unsubscribe_contest(&contest);
        }
        for (_, handles) in self.tasks.lock().unwrap().drain() {
            for handle in handles {
                handle.abort();
            }
        }
        tracing::info!("event monitor shut down");
    }
}

/// Owns one upstream subscription for its whole lifetime: re-issues it with
/// exponential backoff whenever the connection drops, and keeps delivering
/// into the same downstream channel. Exits when the receiver is dropped.
async fn supervise_subscription<C, T, D>(
    client: Arc<C>,
    address: String,
    topic0: &'static str,
    block_retries: u32,
    config: MonitorConfig,
    decode: D,
    out: mpsc::UnboundedSender<T>,
) where
    C: ChainClient,
    T: Send,
    D: Fn(&RawLog, u64) -> Result<T, IndexerError>,
{
    let mut backoff = config.reconnect_initial;
    loop {
        if out.is_closed() {
            return;
        }
        let mut stream = match client.subscribe_logs(&address, topic0).await {
            Ok(stream) => {
                tracing::info!(address = %address, "subscribed to event stream");
                backoff = config.reconnect_initial;
                stream
            }
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "subscribe failed, retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(config.reconnect_max);
                continue;
            }
        };

        while let Some(log) = stream.recv().await {
            let number = log.block_number_u64();

            // A freshly emitted event's block may not be finalized yet;
            // back off and re-fetch before giving up on the event.
            let policy = RetryPolicy::unfinalized_block(block_retries);
            let timestamp = retry(policy, IndexerError::is_not_finalized, || {
                let client = Arc::clone(&client);
                async move { client.block(number).await.map(|header| header.timestamp) }
            })
            .await;

            let timestamp = match timestamp {
                Ok(ts) => ts,
                Err(e) => {
                    tracing::error!(
                        address = %address,
                        block = number,
                        error = %e,
                        "giving up on block lookup, dropping event"
                    );
                    continue;
                }
            };

            match decode(&log, timestamp) {
                Ok(event) => {
                    if out.send(event).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "skipping unparsable event")
                }
            }
        }

        tracing::warn!(address = %address, "event stream closed, reconnecting in {backoff:?}");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.reconnect_max);
    }
}
