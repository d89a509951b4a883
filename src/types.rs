//! Identifiers, protocol result codes, and edge identity shared by every layer.

use std::fmt;

/// Graph space identifier.
pub type SpaceId = i32;
/// Partition identifier within a space. Partitions are numbered from 1.
pub type PartitionId = u32;
/// Leader epoch of a partition.
pub type TermId = i64;
/// Edge type. Positive values are out-edges, negative values their in-edge mirrors.
pub type EdgeType = i32;
/// Edge rank, distinguishing parallel edges between the same vertices.
pub type EdgeRanking = i64;
/// Write version stamped on every edge row (microseconds since the Unix epoch).
pub type EdgeVersion = i64;

/// Outcome of a protocol step.
///
/// Phases and responses carry these codes instead of `Err` values: a failed
/// phase is an ordinary outcome that later phases inspect.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResultCode {
    /// Step completed.
    Succeeded,
    /// The requested key does not exist.
    KeyNotFound,
    /// The partition is not (or no longer) led by the addressed replica.
    LeaderChanged,
    /// The RPC outcome could not be determined.
    RpcFailure,
    /// Another chain operation holds the edge.
    WriteWriteConflict,
    /// The caller's term no longer matches the partition's term.
    OutdatedTerm,
    /// The stored edge is newer than the version carried by the request.
    OutdatedEdge,
    /// A vertex id does not fit the space's vid length.
    InvalidVid,
    /// Unknown space.
    SpaceNotFound,
    /// Unknown partition.
    PartNotFound,
    /// The edge to update does not exist.
    EdgeNotFound,
    /// A value violates the edge schema.
    InvalidData,
    /// The key-value engine failed.
    StorageError,
    /// Anything else, including corrupt records.
    Unknown,
}

impl ResultCode {
    /// Returns true for [`ResultCode::Succeeded`].
    pub fn is_ok(self) -> bool {
        self == ResultCode::Succeeded
    }

    /// Returns the stable name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Succeeded => "SUCCEEDED",
            ResultCode::KeyNotFound => "E_KEY_NOT_FOUND",
            ResultCode::LeaderChanged => "E_LEADER_CHANGED",
            ResultCode::RpcFailure => "E_RPC_FAILURE",
            ResultCode::WriteWriteConflict => "E_WRITE_WRITE_CONFLICT",
            ResultCode::OutdatedTerm => "E_OUTDATED_TERM",
            ResultCode::OutdatedEdge => "E_OUTDATED_EDGE",
            ResultCode::InvalidVid => "E_INVALID_VID",
            ResultCode::SpaceNotFound => "E_SPACE_NOT_FOUND",
            ResultCode::PartNotFound => "E_PART_NOT_FOUND",
            ResultCode::EdgeNotFound => "E_EDGE_NOT_FOUND",
            ResultCode::InvalidData => "E_INVALID_DATA",
            ResultCode::StorageError => "E_STORAGE_ERROR",
            ResultCode::Unknown => "E_UNKNOWN",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which record a dangling edge is waiting on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResumeType {
    /// A prime record exists: neither side is known to be committed.
    ResumeChain,
    /// A double-prime record exists: local committed, mirror unconfirmed.
    ResumeRemote,
}

impl fmt::Display for ResumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumeType::ResumeChain => f.write_str("RESUME_CHAIN"),
            ResumeType::ResumeRemote => f.write_str("RESUME_REMOTE"),
        }
    }
}

/// Kind of chain mutation, persisted as the trailing byte of every intent value.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ChainOpKind {
    /// Insert edges (`'a'`).
    Insert,
    /// Update one edge (`'u'`).
    Update,
    /// Delete edges (`'d'`).
    Delete,
}

impl fmt::Display for ChainOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainOpKind::Insert => f.write_str("insert"),
            ChainOpKind::Update => f.write_str("update"),
            ChainOpKind::Delete => f.write_str("delete"),
        }
    }
}

/// Logical identity of one directed edge occurrence.
///
/// The partition is not part of the identity: it is derived from `src` and
/// supplied separately wherever a physical key is built.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    /// Source vertex id.
    pub src: Vec<u8>,
    /// Edge type; negative for the in-edge mirror.
    pub edge_type: EdgeType,
    /// Rank.
    pub ranking: EdgeRanking,
    /// Destination vertex id.
    pub dst: Vec<u8>,
}

impl EdgeKey {
    /// Creates an edge key.
    pub fn new(
        src: impl Into<Vec<u8>>,
        edge_type: EdgeType,
        ranking: EdgeRanking,
        dst: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            src: src.into(),
            edge_type,
            ranking,
            dst: dst.into(),
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-[{}@{}]->{}",
            String::from_utf8_lossy(&self.src),
            self.edge_type,
            self.ranking,
            String::from_utf8_lossy(&self.dst)
        )
    }
}

/// Edge property value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Timestamp in microseconds since the Unix epoch.
    Timestamp(i64),
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Null => write!(f, "null"),
            PropValue::Bool(v) => write!(f, "{v}"),
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::Float(v) => write!(f, "{v}"),
            PropValue::Str(v) => write!(f, "{v}"),
            PropValue::Timestamp(v) => write!(f, "timestamp({v})"),
        }
    }
}

/// Current wall-clock time in microseconds since the Unix epoch.
pub fn now_micros() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}
