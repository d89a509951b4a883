//! Physical key layout for edges and their shadow intent records.
//!
//! ```text
//! partition prefix : u32 BE = (part_id << 8) | table tag
//! edge key         : prefix(part, EDGE) | src (padded) | edge_type (i32, flipped)
//!                    | rank (i64, flipped) | dst (padded) | key version
//! prime key        : prefix(part, PRIME) | edge key
//! double-prime key : prefix(part, DOUBLE_PRIME) | edge key
//! ```
//!
//! Intent values are `encoded single-edge request | op tag`, the tag being
//! one of [`INSERT_TAG`], [`UPDATE_TAG`], [`DELETE_TAG`].

use xxhash_rust::xxh64::xxh64;

use crate::error::{ChainError, Result};
use crate::primitives::bytes::ord;
use crate::types::{ChainOpKind, EdgeKey, PartitionId, ResumeType};

/// Table tag of normal edge records.
pub const EDGE_TABLE: u8 = 0x02;
/// Table tag of prime records.
pub const PRIME_TABLE: u8 = 0x11;
/// Table tag of double-prime records.
pub const DOUBLE_PRIME_TABLE: u8 = 0x12;
/// Trailing byte of every physical edge key.
pub const EDGE_KEY_VERSION: u8 = 0x01;
/// Length of a partition prefix.
pub const PREFIX_LEN: usize = 4;

/// Trailing byte of an insert intent.
pub const INSERT_TAG: u8 = b'a';
/// Trailing byte of an update intent.
pub const UPDATE_TAG: u8 = b'u';
/// Trailing byte of a delete intent.
pub const DELETE_TAG: u8 = b'd';

/// Highest partition id that fits in the 24-bit prefix field.
pub const MAX_PARTITION_ID: PartitionId = (1 << 24) - 1;

fn table_prefix(part: PartitionId, tag: u8) -> Vec<u8> {
    debug_assert!(part <= MAX_PARTITION_ID, "partition id exceeds 24 bits");
    let mut out = Vec::with_capacity(PREFIX_LEN);
    ord::put_u32_be(&mut out, (part << 8) | u32::from(tag));
    out
}

/// Prefix of every normal edge key of `part`.
pub fn edge_prefix(part: PartitionId) -> Vec<u8> {
    table_prefix(part, EDGE_TABLE)
}

/// Prefix of the prime table of `part`.
pub fn prime_table(part: PartitionId) -> Vec<u8> {
    table_prefix(part, PRIME_TABLE)
}

/// Prefix of the double-prime table of `part`.
pub fn double_prime_table(part: PartitionId) -> Vec<u8> {
    table_prefix(part, DOUBLE_PRIME_TABLE)
}

/// Prefix of the shadow table a dangling entry of `resume` type lives in.
pub fn resume_table(part: PartitionId, resume: ResumeType) -> Vec<u8> {
    match resume {
        ResumeType::ResumeChain => prime_table(part),
        ResumeType::ResumeRemote => double_prime_table(part),
    }
}

/// Physical key of the edge record, or `None` when a vertex id exceeds `vid_len`.
pub fn edge_key(vid_len: usize, part: PartitionId, key: &EdgeKey) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(PREFIX_LEN + 2 * vid_len + 4 + 8 + 1);
    out.extend_from_slice(&edge_prefix(part));
    if !ord::put_padded_vid(&mut out, &key.src, vid_len) {
        return None;
    }
    ord::put_i32_be(&mut out, key.edge_type);
    ord::put_i64_be(&mut out, key.ranking);
    if !ord::put_padded_vid(&mut out, &key.dst, vid_len) {
        return None;
    }
    out.push(EDGE_KEY_VERSION);
    Some(out)
}

/// Physical key of the prime record of an edge.
pub fn prime_key(vid_len: usize, part: PartitionId, key: &EdgeKey) -> Option<Vec<u8>> {
    edge_key(vid_len, part, key).map(|raw| prime_key_for(part, &raw))
}

/// Physical key of the double-prime record of an edge.
pub fn double_prime_key(vid_len: usize, part: PartitionId, key: &EdgeKey) -> Option<Vec<u8>> {
    edge_key(vid_len, part, key).map(|raw| double_prime_key_for(part, &raw))
}

/// Prime key for an already encoded edge key.
pub fn prime_key_for(part: PartitionId, raw_edge_key: &[u8]) -> Vec<u8> {
    let mut out = prime_table(part);
    out.extend_from_slice(raw_edge_key);
    out
}

/// Double-prime key for an already encoded edge key.
pub fn double_prime_key_for(part: PartitionId, raw_edge_key: &[u8]) -> Vec<u8> {
    let mut out = double_prime_table(part);
    out.extend_from_slice(raw_edge_key);
    out
}

/// Expected length of an encoded edge key.
pub fn edge_key_len(vid_len: usize) -> usize {
    PREFIX_LEN + 2 * vid_len + 4 + 8 + 1
}

/// Partition id encoded in an edge or shadow key prefix.
pub fn part_of_key(raw: &[u8]) -> Result<PartitionId> {
    Ok(ord::get_u32_be(raw)? >> 8)
}

/// Decodes an encoded edge key back into its partition and logical identity.
pub fn parse_edge_key(vid_len: usize, raw: &[u8]) -> Result<(PartitionId, EdgeKey)> {
    if raw.len() != edge_key_len(vid_len) {
        return Err(ChainError::Decode("edge key length mismatch"));
    }
    let prefix = ord::get_u32_be(raw)?;
    if (prefix & 0xFF) as u8 != EDGE_TABLE {
        return Err(ChainError::Decode("not an edge key"));
    }
    let mut off = PREFIX_LEN;
    let src = ord::get_padded_vid(&raw[off..], vid_len)?;
    off += vid_len;
    let edge_type = ord::get_i32_be(&raw[off..])?;
    off += 4;
    let ranking = ord::get_i64_be(&raw[off..])?;
    off += 8;
    let dst = ord::get_padded_vid(&raw[off..], vid_len)?;
    Ok((
        prefix >> 8,
        EdgeKey {
            src,
            edge_type,
            ranking,
            dst,
        },
    ))
}

/// Strips the shadow-table prefix of a prime or double-prime key.
pub fn strip_table_prefix(shadow_key: &[u8]) -> Result<&[u8]> {
    shadow_key
        .get(PREFIX_LEN..)
        .filter(|rest| !rest.is_empty())
        .ok_or(ChainError::Decode("shadow key shorter than its prefix"))
}

/// Returns the mirror of `key`: endpoints swapped and edge type negated.
pub fn reverse_edge_key(key: &EdgeKey) -> EdgeKey {
    EdgeKey {
        src: key.dst.clone(),
        edge_type: key.edge_type.wrapping_neg(),
        ranking: key.ranking,
        dst: key.src.clone(),
    }
}

/// Mirrors `key` in place.
pub fn reverse_edge_key_in_place(key: &mut EdgeKey) {
    std::mem::swap(&mut key.src, &mut key.dst);
    key.edge_type = key.edge_type.wrapping_neg();
}

/// Trailing tag byte of an intent of the given kind.
pub fn op_tag(kind: ChainOpKind) -> u8 {
    match kind {
        ChainOpKind::Insert => INSERT_TAG,
        ChainOpKind::Update => UPDATE_TAG,
        ChainOpKind::Delete => DELETE_TAG,
    }
}

/// Reads the operation kind from the last byte of an intent value.
pub fn parse_type(value: &[u8]) -> Result<ChainOpKind> {
    match value.last() {
        Some(&INSERT_TAG) => Ok(ChainOpKind::Insert),
        Some(&UPDATE_TAG) => Ok(ChainOpKind::Update),
        Some(&DELETE_TAG) => Ok(ChainOpKind::Delete),
        Some(other) => Err(ChainError::CorruptRecord(format!(
            "unknown intent tag 0x{other:02x}"
        ))),
        None => Err(ChainError::CorruptRecord("empty intent value".into())),
    }
}

/// Partition owning vertex `vid` in a space with `part_num` partitions.
pub fn part_of_vid(vid: &[u8], part_num: u32) -> PartitionId {
    if part_num == 0 {
        return 0;
    }
    (xxh64(vid, 0) % u64::from(part_num)) as PartitionId + 1
}
