//! Mutation request and response types exchanged with clients and peers.

use std::collections::BTreeMap;

use crate::types::{EdgeKey, EdgeVersion, PartitionId, PropValue, ResultCode, SpaceId};

/// One edge to insert.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEdge {
    /// Edge identity.
    pub key: EdgeKey,
    /// Values positionally matching [`AddEdgesRequest::prop_names`].
    pub props: Vec<PropValue>,
}

/// Batched edge insertion, grouped by the partition of each edge's source.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct AddEdgesRequest {
    /// Target space.
    pub space_id: SpaceId,
    /// Edges per partition.
    pub parts: BTreeMap<PartitionId, Vec<NewEdge>>,
    /// Column names the edge values refer to.
    pub prop_names: Vec<String>,
    /// Skip edges that already exist instead of overwriting them.
    pub if_not_exists: bool,
    /// Write version stamped on every inserted row. Assigned at prepare time
    /// for chain inserts so both mirrored copies carry the same version.
    pub version: Option<EdgeVersion>,
}

impl AddEdgesRequest {
    /// Number of edges across all partitions.
    pub fn edge_count(&self) -> usize {
        self.parts.values().map(Vec::len).sum()
    }
}

/// One column assignment of an update.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdatedProp {
    /// Column name.
    pub name: String,
    /// New value.
    pub value: PropValue,
}

/// Update of a single edge.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateEdgeRequest {
    /// Target space.
    pub space_id: SpaceId,
    /// Partition of the edge's source vertex.
    pub part_id: PartitionId,
    /// Edge identity.
    pub edge_key: EdgeKey,
    /// Column assignments.
    pub updated_props: Vec<UpdatedProp>,
    /// Insert the edge (with defaults) when it does not exist yet.
    pub insertable: bool,
    /// Version the edge carries after this update.
    pub version: Option<EdgeVersion>,
}

/// Batched edge deletion, grouped by the partition of each edge's source.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct DeleteEdgesRequest {
    /// Target space.
    pub space_id: SpaceId,
    /// Edge keys per partition.
    pub parts: BTreeMap<PartitionId, Vec<EdgeKey>>,
}

impl DeleteEdgesRequest {
    /// Number of edges across all partitions.
    pub fn edge_count(&self) -> usize {
        self.parts.values().map(Vec::len).sum()
    }
}

/// Per-partition failure report of a mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartResult {
    /// Partition that failed.
    pub part_id: PartitionId,
    /// Why it failed.
    pub code: ResultCode,
}

/// Response of every mutation: the partitions that did not succeed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecResponse {
    /// Failed partitions. Empty on full success.
    pub failed_parts: Vec<PartResult>,
}

impl ExecResponse {
    /// Records the outcome of `part`; successes are not recorded.
    pub fn push_result(&mut self, part_id: PartitionId, code: ResultCode) {
        if code.is_ok() {
            return;
        }
        match self.failed_parts.iter_mut().find(|r| r.part_id == part_id) {
            Some(existing) => existing.code = code,
            None => self.failed_parts.push(PartResult { part_id, code }),
        }
    }

    /// Whether every partition succeeded.
    pub fn succeeded(&self) -> bool {
        self.failed_parts.is_empty()
    }

    /// Outcome of `part`.
    pub fn code_of(&self, part_id: PartitionId) -> ResultCode {
        self.failed_parts
            .iter()
            .find(|r| r.part_id == part_id)
            .map_or(ResultCode::Succeeded, |r| r.code)
    }

    /// Single code summarizing the response: the first failure, or success.
    pub fn code(&self) -> ResultCode {
        self.failed_parts
            .first()
            .map_or(ResultCode::Succeeded, |r| r.code)
    }

    /// Folds the failures of `other` into `self`.
    pub fn merge(&mut self, other: ExecResponse) {
        for PartResult { part_id, code } in other.failed_parts {
            self.push_result(part_id, code);
        }
    }
}
