//! ABI decoding of the three contest event kinds.
//!
//! The event shapes are fixed by the factory/contest contracts:
//!
//! ```text
//! ContestCreated(address indexed creator, address indexed contestAddress,
//!                uint256 indexed contestId, uint256 contestStart, uint256 votingPeriod)
//! ProposalCreated(uint256 indexed proposalId, address indexed author, string description)
//! VoteCast(address indexed voter, uint256 indexed proposalId, uint256 votes, uint256 cost)
//! ```
//!
//! Indexed value types occupy `topics[1..]` as left-padded 32-byte words;
//! non-indexed parameters are ABI-encoded in `data`. All decoders return
//! `IndexerError::Decode` on malformed input and never panic — a single
//! bad log must not abort a batch.

use primitive_types::U256;

use contestindex_core::error::IndexerError;
use contestindex_core::event::{
    normalize_address, ContestCreatedEvent, ProposalEvent, VoteEvent,
};

use crate::client::RawLog;

/// keccak256 of `ContestCreated(address,address,uint256,uint256,uint256)`.
pub const CONTEST_CREATED_TOPIC: &str =
    "0x901810ce68c8e7b32960326253e3ed80fc852308ffe9173dab122d9cfdebd1aa";
/// keccak256 of `ProposalCreated(uint256,address,string)`.
pub const PROPOSAL_CREATED_TOPIC: &str =
    "0x7585f467599d0f008985f231af99293be388626ac16ca59505c2f8f88969cd63";
/// keccak256 of `VoteCast(address,uint256,uint256,uint256)`.
pub const VOTE_CAST_TOPIC: &str =
    "0xa23fc440c6fc2e19ce408adc0b47622097fa7ea64409d71d33ba3fcdb5b4cd95";

fn decode_err(log: &RawLog, reason: impl Into<String>) -> IndexerError {
    IndexerError::Decode {
        tx_hash: log.tx_hash.clone(),
        reason: reason.into(),
    }
}

/// Decode the 32-byte word at `topics[index]`.
fn topic_word(log: &RawLog, index: usize) -> Result<[u8; 32], IndexerError> {
    let topic = log
        .topics
        .get(index)
        .ok_or_else(|| decode_err(log, format!("missing topic {index}")))?;
    let bytes = hex::decode(topic.strip_prefix("0x").unwrap_or(topic))
        .map_err(|e| decode_err(log, format!("topic {index}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| decode_err(log, format!("topic {index} is not 32 bytes")))
}

/// An indexed `address` parameter: the low 20 bytes of the topic word.
fn topic_address(log: &RawLog, index: usize) -> Result<String, IndexerError> {
    let word = topic_word(log, index)?;
    Ok(format!("0x{}", hex::encode(&word[12..])))
}

/// An indexed `uint256` parameter as a decimal string.
fn topic_u256(log: &RawLog, index: usize) -> Result<String, IndexerError> {
    let word = topic_word(log, index)?;
    Ok(U256::from_big_endian(&word).to_string())
}

fn data_bytes(log: &RawLog) -> Result<Vec<u8>, IndexerError> {
    hex::decode(log.data.strip_prefix("0x").unwrap_or(&log.data))
        .map_err(|e| decode_err(log, format!("data: {e}")))
}

/// The `uint256` at data word `index` as a decimal string.
fn data_u256(log: &RawLog, data: &[u8], index: usize) -> Result<String, IndexerError> {
    let start = index * 32;
    let word = data
        .get(start..start + 32)
        .ok_or_else(|| decode_err(log, format!("data word {index} out of range")))?;
    Ok(U256::from_big_endian(word).to_string())
}

/// A dynamically-encoded `string` in `data`: head word at `index` holds the
/// byte offset of the tail, which is a length word followed by the bytes.
fn data_string(log: &RawLog, data: &[u8], index: usize) -> Result<String, IndexerError> {
    let start = index * 32;
    let head = data
        .get(start..start + 32)
        .ok_or_else(|| decode_err(log, format!("data word {index} out of range")))?;
    let offset = U256::from_big_endian(head);
    if offset > U256::from(data.len()) {
        return Err(decode_err(log, "string offset out of range"));
    }
    let offset = offset.as_usize();
    let len_word = data
        .get(offset..offset + 32)
        .ok_or_else(|| decode_err(log, "string length out of range"))?;
    let len = U256::from_big_endian(len_word);
    if len > U256::from(data.len()) {
        return Err(decode_err(log, "string body out of range"));
    }
    let len = len.as_usize();
    let body = data
        .get(offset + 32..offset + 32 + len)
        .ok_or_else(|| decode_err(log, "string body out of range"))?;
    String::from_utf8(body.to_vec()).map_err(|e| decode_err(log, format!("string: {e}")))
}

fn expect_topic0(log: &RawLog, expected: &str) -> Result<(), IndexerError> {
    match log.topics.first() {
        Some(t) if t.eq_ignore_ascii_case(expected) => Ok(()),
        Some(t) => Err(decode_err(log, format!("unexpected topic0 {t}"))),
        None => Err(decode_err(log, "missing topic0")),
    }
}

/// Decode a `ContestCreated` log emitted by the factory.
pub fn decode_contest_created(
    log: &RawLog,
    timestamp: u64,
) -> Result<ContestCreatedEvent, IndexerError> {
    expect_topic0(log, CONTEST_CREATED_TOPIC)?;
    let data = data_bytes(log)?;
    Ok(ContestCreatedEvent {
        creator: topic_address(log, 1)?,
        contest_address: topic_address(log, 2)?,
        contest_id: topic_u256(log, 3)?,
        contest_start: data_u256(log, &data, 0)?,
        voting_period: data_u256(log, &data, 1)?,
        block_number: log.block_number_u64(),
        tx_hash: log.tx_hash.clone(),
        log_index: log.log_index_u32(),
        timestamp,
    })
}

/// Decode a `ProposalCreated` log. The emitting contract is the contest.
pub fn decode_proposal(log: &RawLog, timestamp: u64) -> Result<ProposalEvent, IndexerError> {
    expect_topic0(log, PROPOSAL_CREATED_TOPIC)?;
    let data = data_bytes(log)?;
    Ok(ProposalEvent {
        contest_address: normalize_address(&log.address),
        proposal_id: topic_u256(log, 1)?,
        author: topic_address(log, 2)?,
        description: data_string(log, &data, 0)?,
        block_number: log.block_number_u64(),
        tx_hash: log.tx_hash.clone(),
        log_index: log.log_index_u32(),
        timestamp,
    })
}

/// Decode a `VoteCast` log. The emitting contract is the contest.
pub fn decode_vote(log: &RawLog, timestamp: u64) -> Result<VoteEvent, IndexerError> {
    expect_topic0(log, VOTE_CAST_TOPIC)?;
    let data = data_bytes(log)?;
    Ok(VoteEvent {
        contest_address: normalize_address(&log.address),
        voter: topic_address(log, 1)?,
        proposal_id: topic_u256(log, 2)?,
        votes: data_u256(log, &data, 0)?,
        cost: data_u256(log, &data, 1)?,
        block_number: log.block_number_u64(),
        tx_hash: log.tx_hash.clone(),
        log_index: log.log_index_u32(),
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiny_keccak::{Hasher, Keccak};

    fn keccak256(input: &[u8]) -> String {
        let mut hasher = Keccak::v256();
        let mut output = [0u8; 32];
        hasher.update(input);
        hasher.finalize(&mut output);
        format!("0x{}", hex::encode(output))
    }

    fn word_address(addr: &str) -> String {
        format!("0x{:0>64}", addr.trim_start_matches("0x"))
    }

    fn word_u64(v: u64) -> String {
        format!("{v:064x}")
    }

    fn contest_created_log(block: u64) -> RawLog {
        RawLog {
            address: "0xfac0000000000000000000000000000000000fac".into(),
            topics: vec![
                CONTEST_CREATED_TOPIC.into(),
                word_address("aaa0000000000000000000000000000000000aaa"),
                word_address("ccc0000000000000000000000000000000000ccc"),
                format!("0x{}", word_u64(1)),
            ],
            data: format!("0x{}{}", word_u64(1000), word_u64(500)),
            block_number: format!("0x{block:x}"),
            tx_hash: format!("0xtx{block}"),
            log_index: "0x0".into(),
        }
    }

    #[test]
    fn topic_constants_match_signatures() {
        assert_eq!(
            keccak256(b"ContestCreated(address,address,uint256,uint256,uint256)"),
            CONTEST_CREATED_TOPIC
        );
        assert_eq!(
            keccak256(b"ProposalCreated(uint256,address,string)"),
            PROPOSAL_CREATED_TOPIC
        );
        assert_eq!(
            keccak256(b"VoteCast(address,uint256,uint256,uint256)"),
            VOTE_CAST_TOPIC
        );
    }

    #[test]
    fn decode_contest_created_full() {
        let event = decode_contest_created(&contest_created_log(100), 1_700_000_000).unwrap();
        assert_eq!(event.creator, "0xaaa0000000000000000000000000000000000aaa");
        assert_eq!(
            event.contest_address,
            "0xccc0000000000000000000000000000000000ccc"
        );
        assert_eq!(event.contest_id, "1");
        assert_eq!(event.contest_start, "1000");
        assert_eq!(event.voting_period, "500");
        assert_eq!(event.block_number, 100);
        assert_eq!(event.timestamp, 1_700_000_000);
    }

    #[test]
    fn decode_proposal_with_dynamic_string() {
        let description = b"meme";
        let mut data = String::from("0x");
        data.push_str(&word_u64(0x20)); // offset of the tail
        data.push_str(&word_u64(description.len() as u64));
        data.push_str(&format!("{:0<64}", hex::encode(description)));

        let log = RawLog {
            address: "0xCCC0000000000000000000000000000000000CCC".into(),
            topics: vec![
                PROPOSAL_CREATED_TOPIC.into(),
                format!("0x{}", word_u64(1)),
                word_address("bbb0000000000000000000000000000000000bbb"),
            ],
            data,
            block_number: "0x65".into(),
            tx_hash: "0xtx101".into(),
            log_index: "0x1".into(),
        };

        let event = decode_proposal(&log, 1_700_000_012).unwrap();
        // Emitting contract address is normalized to lower case
        assert_eq!(
            event.contest_address,
            "0xccc0000000000000000000000000000000000ccc"
        );
        assert_eq!(event.proposal_id, "1");
        assert_eq!(event.author, "0xbbb0000000000000000000000000000000000bbb");
        assert_eq!(event.description, "meme");
        assert_eq!(event.block_number, 101);
    }

    #[test]
    fn decode_vote_wei_amounts() {
        // votes = 5e18, cost = 1e18 — full 256-bit words, decimal out
        let votes = primitive_types::U256::from(5u64) * primitive_types::U256::exp10(18);
        let cost = primitive_types::U256::exp10(18);
        let mut votes_word = [0u8; 32];
        let mut cost_word = [0u8; 32];
        votes.to_big_endian(&mut votes_word);
        cost.to_big_endian(&mut cost_word);

        let log = RawLog {
            address: "0xccc0000000000000000000000000000000000ccc".into(),
            topics: vec![
                VOTE_CAST_TOPIC.into(),
                word_address("ddd0000000000000000000000000000000000ddd"),
                format!("0x{}", word_u64(1)),
            ],
            data: format!("0x{}{}", hex::encode(votes_word), hex::encode(cost_word)),
            block_number: "0x66".into(),
            tx_hash: "0xtx102".into(),
            log_index: "0x2".into(),
        };

        let event = decode_vote(&log, 1_700_000_024).unwrap();
        assert_eq!(event.voter, "0xddd0000000000000000000000000000000000ddd");
        assert_eq!(event.proposal_id, "1");
        assert_eq!(event.votes, "5000000000000000000");
        assert_eq!(event.cost, "1000000000000000000");
    }

    #[test]
    fn wrong_topic0_is_rejected() {
        let mut log = contest_created_log(100);
        log.topics[0] = VOTE_CAST_TOPIC.into();
        assert!(matches!(
            decode_contest_created(&log, 0),
            Err(IndexerError::Decode { .. })
        ));
    }

    #[test]
    fn truncated_data_is_rejected_not_panicked() {
        let mut log = contest_created_log(100);
        log.data = "0xdeadbeef".into();
        assert!(decode_contest_created(&log, 0).is_err());

        let mut log = contest_created_log(100);
        log.topics.truncate(2);
        assert!(decode_contest_created(&log, 0).is_err());
    }

    #[test]
    fn garbage_hex_is_rejected() {
        let mut log = contest_created_log(100);
        log.topics[1] = "0xzzzz".into();
        assert!(decode_contest_created(&log, 0).is_err());
    }
}
