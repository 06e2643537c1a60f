//! Storage backends for ContestIndex.
//!
//! All backends implement [`ContestStore`] (transactional, idempotent event
//! application) and [`contestindex_core::checkpoint::CheckpointStore`]
//! (durable key/value checkpoint).

pub mod store;
mod units;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use store::ContestStore;

#[cfg(feature = "memory")]
pub use memory::MemoryStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
