//! contestindex-evm — event monitor, log decoding, and the sync
//! orchestrator for ContestIndex.

pub mod builder;
pub mod client;
pub mod decode;
pub mod index_loop;
pub mod monitor;
pub mod rpc;

pub use builder::IndexerBuilder;
pub use client::{BlockHeader, ChainClient, LogFilter, RawLog};
pub use index_loop::Indexer;
pub use monitor::{EventMonitor, MonitorConfig};
pub use rpc::{HttpChainClient, HttpClientConfig};
