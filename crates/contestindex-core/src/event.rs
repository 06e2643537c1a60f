//! Typed domain events decoded from raw contract logs.
//!
//! All on-chain amounts (`contest_id`, vote weights, costs) are carried as
//! decimal strings — they are 256-bit words on the wire and must never pass
//! through floating point.

use serde::{Deserialize, Serialize};

/// Lower-case an `0x…` address. Stored rows and registry keys always use
/// the lower-cased form so lookups are case-insensitive.
pub fn normalize_address(addr: &str) -> String {
    addr.to_ascii_lowercase()
}

// ─── ContestCreatedEvent ─────────────────────────────────────────────────────

/// `ContestCreated(address,address,uint256,uint256,uint256)` emitted by the
/// factory contract. Natural key: `contest_address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestCreatedEvent {
    pub creator: String,
    pub contest_address: String,
    pub contest_id: String,
    pub contest_start: String,
    pub voting_period: String,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    /// Unix timestamp of the containing block (seconds).
    pub timestamp: u64,
}

// ─── ProposalEvent ───────────────────────────────────────────────────────────

/// `ProposalCreated(uint256,address,string)` emitted by a contest contract.
/// Natural key: `(proposal_id, contest_address)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalEvent {
    pub contest_address: String,
    pub proposal_id: String,
    pub author: String,
    pub description: String,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    pub timestamp: u64,
}

// ─── VoteEvent ───────────────────────────────────────────────────────────────

/// `VoteCast(address,uint256,uint256,uint256)` emitted by a contest contract.
///
/// Natural key: `(tx_hash, log_index)` — the same vote can be observed twice
/// (once live, once in a backfill overlap), and this pair is the only
/// identifier shared by both observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteEvent {
    pub contest_address: String,
    pub voter: String,
    pub proposal_id: String,
    /// Raw wei-scale vote weight as a decimal string.
    pub votes: String,
    /// Raw wei-scale cost as a decimal string.
    pub cost: String,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    pub timestamp: u64,
}

// ─── ContestState ────────────────────────────────────────────────────────────

/// Lifecycle state of a contest row. Newly indexed contests start `Queued`;
/// later transitions are driven by the read-side aggregation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContestState {
    Queued,
    Active,
    Completed,
    Canceled,
}

impl ContestState {
    pub fn as_i16(self) -> i16 {
        match self {
            Self::Queued => 0,
            Self::Active => 1,
            Self::Completed => 2,
            Self::Canceled => 3,
        }
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Self::Queued),
            1 => Some(Self::Active),
            2 => Some(Self::Completed),
            3 => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}
