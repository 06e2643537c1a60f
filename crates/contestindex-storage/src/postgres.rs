//! PostgreSQL storage backend for ContestIndex.
//!
//! Persists contests, proposals, votes, and the sync checkpoint. Uses
//! `sqlx` with connection pooling; every event application runs in a single
//! transaction so the natural-key upsert and its counter increments land
//! together or not at all.
//!
//! # Feature Flag
//! Requires the `postgres` feature:
//! ```toml
//! contestindex-storage = { version = "0.2", features = ["postgres"] }
//! ```
//!
//! # Schema
//! Created automatically on first connect:
//! - `contests` — one row per contest address, with running aggregates
//! - `proposals` — keyed by `(proposal_id, contest_address)`
//! - `votes` — keyed by `(tx_hash, log_index)`
//! - `indexer_checkpoints` — durable key/value checkpoint store

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use contestindex_core::checkpoint::CheckpointStore;
use contestindex_core::error::IndexerError;
use contestindex_core::event::{ContestCreatedEvent, ContestState, ProposalEvent, VoteEvent};

use crate::store::ContestStore;
use crate::units::format_units18;

// ─── Connection options ────────────────────────────────────────────────────────

/// Connection options for the Postgres backend.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: u32,
    /// Minimum number of idle connections to keep open (default: 1)
    pub min_connections: u32,
    /// Connection timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

// ─── PostgresStore ────────────────────────────────────────────────────────────

/// PostgreSQL-backed contest store.
///
/// Thread-safe and cheaply cloneable — wraps a connection pool internally.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

/// Map an sqlx error into the pipeline taxonomy. Serialization failures
/// (`40001`) and deadlocks (`40P01`) become `StorageConflict` so the
/// orchestrator retries them.
fn map_db_err(e: sqlx::Error) -> IndexerError {
    if let sqlx::Error::Database(ref db) = e {
        if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) {
            return IndexerError::StorageConflict(db.message().to_string());
        }
    }
    IndexerError::Storage(e.to_string())
}

impl PostgresStore {
    /// Connect to a PostgreSQL database and initialize the schema.
    ///
    /// The URL format follows libpq convention:
    /// `postgresql://[user[:password]@][host][:port][/dbname]`
    pub async fn connect(database_url: &str) -> Result<Self, IndexerError> {
        Self::connect_with_options(database_url, PostgresOptions::default()).await
    }

    /// Connect with custom pool options.
    pub async fn connect_with_options(
        database_url: &str,
        opts: PostgresOptions,
    ) -> Result<Self, IndexerError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| IndexerError::Storage(format!("postgres connect: {e}")))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("PostgresStore connected and schema initialized");
        Ok(store)
    }

    /// Create tables and indexes if they don't already exist.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS contests (
                address          TEXT          PRIMARY KEY,
                contest_id       NUMERIC(78,0) NOT NULL,
                creator          TEXT          NOT NULL,
                contest_start    NUMERIC(78,0) NOT NULL,
                voting_period    NUMERIC(78,0) NOT NULL,
                state            SMALLINT      NOT NULL DEFAULT 0,
                total_proposals  BIGINT        NOT NULL DEFAULT 0,
                total_votes      NUMERIC(78,0) NOT NULL DEFAULT 0,
                block_number     BIGINT        NOT NULL,
                tx_hash          TEXT          NOT NULL,
                log_index        INTEGER       NOT NULL,
                created_at       BIGINT        NOT NULL,
                updated_at       BIGINT        NOT NULL DEFAULT EXTRACT(EPOCH FROM NOW())::BIGINT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS proposals (
                proposal_id      NUMERIC(78,0) NOT NULL,
                contest_address  TEXT          NOT NULL REFERENCES contests(address),
                author           TEXT          NOT NULL,
                description      TEXT          NOT NULL,
                total_votes      NUMERIC(78,0) NOT NULL DEFAULT 0,
                block_number     BIGINT        NOT NULL,
                tx_hash          TEXT          NOT NULL,
                log_index        INTEGER       NOT NULL,
                created_at       BIGINT        NOT NULL,
                updated_at       BIGINT        NOT NULL DEFAULT EXTRACT(EPOCH FROM NOW())::BIGINT,
                PRIMARY KEY (proposal_id, contest_address)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS votes (
                tx_hash          TEXT          NOT NULL,
                log_index        INTEGER       NOT NULL,
                contest_address  TEXT          NOT NULL REFERENCES contests(address),
                proposal_id      NUMERIC(78,0) NOT NULL,
                voter            TEXT          NOT NULL,
                num_votes        NUMERIC(78,0) NOT NULL,
                num_votes_scaled TEXT          NOT NULL,
                cost             NUMERIC(78,0) NOT NULL,
                cost_scaled      TEXT          NOT NULL,
                block_number     BIGINT        NOT NULL,
                voted_at         BIGINT        NOT NULL,
                PRIMARY KEY (tx_hash, log_index)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS indexer_checkpoints (
                key        TEXT   PRIMARY KEY,
                value      TEXT   NOT NULL,
                updated_at BIGINT NOT NULL DEFAULT EXTRACT(EPOCH FROM NOW())::BIGINT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        // Read-side access patterns: per-contest listings, voter history
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_proposals_contest
             ON proposals(contest_address, block_number DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_votes_contest_proposal
             ON votes(contest_address, proposal_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_votes_voter
             ON votes(voter, block_number DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        debug!("PostgresStore schema initialized");
        Ok(())
    }
}

#[async_trait]
impl ContestStore for PostgresStore {
    async fn apply_contest_created(
        &self,
        event: &ContestCreatedEvent,
    ) -> Result<bool, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let inserted = sqlx::query(
            "INSERT INTO contests
                (address, contest_id, creator, contest_start, voting_period,
                 state, block_number, tx_hash, log_index, created_at)
             VALUES ($1, $2::NUMERIC, $3, $4::NUMERIC, $5::NUMERIC, $6, $7, $8, $9, $10)
             ON CONFLICT (address) DO NOTHING",
        )
        .bind(&event.contest_address)
        .bind(&event.contest_id)
        .bind(&event.creator)
        .bind(&event.contest_start)
        .bind(&event.voting_period)
        .bind(ContestState::Queued.as_i16())
        .bind(event.block_number as i64)
        .bind(&event.tx_hash)
        .bind(event.log_index as i32)
        .bind(event.timestamp as i64)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?
        .rows_affected()
            > 0;

        tx.commit().await.map_err(map_db_err)?;
        Ok(inserted)
    }

    async fn apply_proposal(&self, event: &ProposalEvent) -> Result<bool, IndexerError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let inserted = sqlx::query(
            "INSERT INTO proposals
                (proposal_id, contest_address, author, description,
                 block_number, tx_hash, log_index, created_at)
             VALUES ($1::NUMERIC, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (proposal_id, contest_address) DO NOTHING",
        )
        .bind(&event.proposal_id)
        .bind(&event.contest_address)
        .bind(&event.author)
        .bind(&event.description)
        .bind(event.block_number as i64)
        .bind(&event.tx_hash)
        .bind(event.log_index as i32)
        .bind(event.timestamp as i64)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?
        .rows_affected()
            > 0;

        if inserted {
            let updated = sqlx::query(
                "UPDATE contests
                 SET total_proposals = total_proposals + 1,
                     updated_at = EXTRACT(EPOCH FROM NOW())::BIGINT
                 WHERE address = $1",
            )
            .bind(&event.contest_address)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?
            .rows_affected();

            if updated == 0 {
                return Err(IndexerError::Storage(format!(
                    "unknown contest {}",
                    event.contest_address
                )));
            }
        }

        tx.commit().await.map_err(map_db_err)?;
        Ok(inserted)
    }

    async fn apply_vote(&self, event: &VoteEvent) -> Result<bool, IndexerError> {
        let num_votes_scaled = format_units18(&event.votes)?;
        let cost_scaled = format_units18(&event.cost)?;

        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let inserted = sqlx::query(
            "INSERT INTO votes
                (tx_hash, log_index, contest_address, proposal_id, voter,
                 num_votes, num_votes_scaled, cost, cost_scaled,
                 block_number, voted_at)
             VALUES ($1, $2, $3, $4::NUMERIC, $5, $6::NUMERIC, $7, $8::NUMERIC, $9, $10, $11)
             ON CONFLICT (tx_hash, log_index) DO NOTHING",
        )
        .bind(&event.tx_hash)
        .bind(event.log_index as i32)
        .bind(&event.contest_address)
        .bind(&event.proposal_id)
        .bind(&event.voter)
        .bind(&event.votes)
        .bind(&num_votes_scaled)
        .bind(&event.cost)
        .bind(&cost_scaled)
        .bind(event.block_number as i64)
        .bind(event.timestamp as i64)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?
        .rows_affected()
            > 0;

        if inserted {
            // The vote must reference an existing proposal; rolling back
            // the insert keeps the vote and its aggregates consistent.
            let updated = sqlx::query(
                "UPDATE proposals
                 SET total_votes = total_votes + $1::NUMERIC,
                     updated_at = EXTRACT(EPOCH FROM NOW())::BIGINT
                 WHERE proposal_id = $2::NUMERIC AND contest_address = $3",
            )
            .bind(&event.votes)
            .bind(&event.proposal_id)
            .bind(&event.contest_address)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?
            .rows_affected();

            if updated == 0 {
                return Err(IndexerError::Storage(format!(
                    "vote references unknown proposal {} in contest {}",
                    event.proposal_id, event.contest_address
                )));
            }

            sqlx::query(
                "UPDATE contests
                 SET total_votes = total_votes + $1::NUMERIC,
                     updated_at = EXTRACT(EPOCH FROM NOW())::BIGINT
                 WHERE address = $2",
            )
            .bind(&event.votes)
            .bind(&event.contest_address)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        }

        tx.commit().await.map_err(map_db_err)?;
        Ok(inserted)
    }

    async fn contest_addresses(&self) -> Result<Vec<String>, IndexerError> {
        let rows = sqlx::query("SELECT address FROM contests ORDER BY block_number")
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(rows.iter().map(|r| r.get::<String, _>("address")).collect())
    }
}

#[async_trait]
impl CheckpointStore for PostgresStore {
    async fn get(&self, key: &str) -> Result<Option<String>, IndexerError> {
        let row = sqlx::query("SELECT value FROM indexer_checkpoints WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO indexer_checkpoints (key, value)
             VALUES ($1, $2)
             ON CONFLICT (key)
             DO UPDATE SET value = EXCLUDED.value,
                           updated_at = EXTRACT(EPOCH FROM NOW())::BIGINT",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Integration tests require a running PostgreSQL instance.
    // Set DATABASE_URL environment variable to enable.
    // Example: DATABASE_URL=postgresql://localhost/contestindex_test cargo test

    use contestindex_core::checkpoint::CheckpointStore;
    use contestindex_core::event::{ContestCreatedEvent, ProposalEvent, VoteEvent};

    use crate::store::ContestStore;

    fn scenario_contest() -> ContestCreatedEvent {
        ContestCreatedEvent {
            creator: "0xaaa".into(),
            contest_address: "0xccc".into(),
            contest_id: "1".into(),
            contest_start: "1000".into(),
            voting_period: "500".into(),
            block_number: 100,
            tx_hash: "0xt100".into(),
            log_index: 0,
            timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn checkpoint_kv_roundtrip() {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests");
        let store = super::PostgresStore::connect(&url).await.unwrap();

        store.set("test:last_block", "19000000").await.unwrap();
        store.set("test:last_block", "19000005").await.unwrap();
        let value = store.get("test:last_block").await.unwrap();
        assert_eq!(value.as_deref(), Some("19000005"));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL to enable)"]
    async fn apply_pipeline_is_idempotent() {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests");
        let store = super::PostgresStore::connect(&url).await.unwrap();

        assert!(store.apply_contest_created(&scenario_contest()).await.unwrap());
        assert!(!store.apply_contest_created(&scenario_contest()).await.unwrap());

        let proposal = ProposalEvent {
            contest_address: "0xccc".into(),
            proposal_id: "1".into(),
            author: "0xbbb".into(),
            description: "meme".into(),
            block_number: 101,
            tx_hash: "0xt101".into(),
            log_index: 0,
            timestamp: 1_700_000_012,
        };
        assert!(store.apply_proposal(&proposal).await.unwrap());
        assert!(!store.apply_proposal(&proposal).await.unwrap());

        let vote = VoteEvent {
            contest_address: "0xccc".into(),
            voter: "0xddd".into(),
            proposal_id: "1".into(),
            votes: "5000000000000000000".into(),
            cost: "1000000000000000000".into(),
            block_number: 102,
            tx_hash: "0xt102".into(),
            log_index: 0,
            timestamp: 1_700_000_024,
        };
        assert!(store.apply_vote(&vote).await.unwrap());
        assert!(!store.apply_vote(&vote).await.unwrap());

        let contests = store.contest_addresses().await.unwrap();
        assert!(contests.contains(&"0xccc".to_string()));
    }
}
