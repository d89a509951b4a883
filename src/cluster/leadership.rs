use dashmap::DashMap;

use crate::types::{PartitionId, ResultCode, SpaceId, TermId};

/// Read-only view of the replication layer's partition leadership.
pub trait Leadership: Send + Sync {
    /// Current term of the partition as known to this node.
    fn term(&self, space: SpaceId, part: PartitionId) -> Result<TermId, ResultCode>;

    /// Whether this node currently leads the partition.
    fn is_leader(&self, space: SpaceId, part: PartitionId) -> bool;

    /// Every partition this node leads, with its term.
    fn leader_parts(&self) -> Vec<(SpaceId, PartitionId, TermId)>;
}

#[derive(Clone, Copy, Debug)]
struct PartState {
    term: TermId,
    leader: bool,
}

/// In-memory [`Leadership`] whose terms and leaders are set by hand.
#[derive(Default)]
pub struct MemLeadership {
    parts: DashMap<(SpaceId, PartitionId), PartState>,
}

impl MemLeadership {
    /// Creates a view with no partitions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks this node leader of the partition at `term`.
    pub fn set_leader(&self, space: SpaceId, part: PartitionId, term: TermId) {
        self.parts
            .insert((space, part), PartState { term, leader: true });
    }

    /// Records that another node leads the partition at `term`.
    pub fn set_follower(&self, space: SpaceId, part: PartitionId, term: TermId) {
        self.parts
            .insert((space, part), PartState { term, leader: false });
    }

    /// Increments the partition's term, keeping leadership. Returns the new term.
    pub fn bump_term(&self, space: SpaceId, part: PartitionId) -> Option<TermId> {
        self.parts.get_mut(&(space, part)).map(|mut state| {
            state.term += 1;
            state.term
        })
    }
}

impl Leadership for MemLeadership {
    fn term(&self, space: SpaceId, part: PartitionId) -> Result<TermId, ResultCode> {
        self.parts
            .get(&(space, part))
            .map(|state| state.term)
            .ok_or(ResultCode::PartNotFound)
    }

    fn is_leader(&self, space: SpaceId, part: PartitionId) -> bool {
        self.parts
            .get(&(space, part))
            .is_some_and(|state| state.leader)
    }

    fn leader_parts(&self) -> Vec<(SpaceId, PartitionId, TermId)> {
        let mut out: Vec<_> = self
            .parts
            .iter()
            .filter(|entry| entry.leader)
            .map(|entry| (entry.key().0, entry.key().1, entry.term))
            .collect();
        out.sort_unstable();
        out
    }
}
