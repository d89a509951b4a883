use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Weak;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::service::ChainStorageService;
use crate::storage::request::{AddEdgesRequest, DeleteEdgesRequest, UpdateEdgeRequest};
use crate::types::{EdgeVersion, PartitionId, ResultCode, SpaceId, TermId};

/// Storage-to-storage RPC used to mirror a chain mutation on the reverse partition.
///
/// `ResultCode::RpcFailure` means the outcome is unknown, not that the peer
/// rejected the request.
#[async_trait]
pub trait InternalClient: Send + Sync {
    /// Forwards a reversed insert.
    async fn chain_add_edges(
        &self,
        req: AddEdgesRequest,
        term: TermId,
        edge_version: Option<EdgeVersion>,
    ) -> ResultCode;

    /// Forwards a reversed update.
    async fn chain_update_edge(
        &self,
        req: UpdateEdgeRequest,
        term: TermId,
        edge_version: Option<EdgeVersion>,
    ) -> ResultCode;

    /// Forwards a reversed delete.
    async fn chain_delete_edges(&self, req: DeleteEdgesRequest, term: TermId) -> ResultCode;
}

#[derive(Clone, Copy, Debug)]
struct Scripted {
    code: ResultCode,
    deliver: bool,
}

/// In-process [`InternalClient`] dispatching straight to peer services.
///
/// Peers are looked up by the target `(space, partition)`, falling back to a
/// default peer. Responses can be scripted to simulate lost or redirected RPCs.
#[derive(Default)]
pub struct LoopbackClient {
    peers: Mutex<HashMap<(SpaceId, PartitionId), Weak<ChainStorageService>>>,
    default_peer: Mutex<Option<Weak<ChainStorageService>>>,
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
}

impl LoopbackClient {
    /// Creates a client with no peers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes requests for the partition to `peer`.
    pub fn register(&self, space: SpaceId, part: PartitionId, peer: Weak<ChainStorageService>) {
        self.peers.lock().insert((space, part), peer);
    }

    /// Routes requests without a registered partition to `peer`.
    pub fn set_default_peer(&self, peer: Weak<ChainStorageService>) {
        *self.default_peer.lock() = Some(peer);
    }

    /// Answers the next `times` calls with `code` without reaching the peer.
    pub fn fail_next(&self, code: ResultCode, times: usize) {
        let mut script = self.script.lock();
        for _ in 0..times {
            script.push_back(Scripted {
                code,
                deliver: false,
            });
        }
    }

    /// Delivers the next `times` calls, then reports `RpcFailure` as if the
    /// response had been lost.
    pub fn lose_next_responses(&self, times: usize) {
        let mut script = self.script.lock();
        for _ in 0..times {
            script.push_back(Scripted {
                code: ResultCode::RpcFailure,
                deliver: true,
            });
        }
    }

    /// Number of calls attempted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn peer(&self, space: SpaceId, part: PartitionId) -> Option<std::sync::Arc<ChainStorageService>> {
        let routed = self.peers.lock().get(&(space, part)).cloned();
        routed
            .or_else(|| self.default_peer.lock().clone())
            .and_then(|weak| weak.upgrade())
    }

    fn next_script(&self) -> Option<Scripted> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script.lock().pop_front()
    }
}

fn first_part<V>(parts: &std::collections::BTreeMap<PartitionId, V>) -> PartitionId {
    parts.keys().next().copied().unwrap_or_default()
}

#[async_trait]
impl InternalClient for LoopbackClient {
    async fn chain_add_edges(
        &self,
        req: AddEdgesRequest,
        term: TermId,
        edge_version: Option<EdgeVersion>,
    ) -> ResultCode {
        let scripted = self.next_script();
        if let Some(Scripted { code, deliver: false }) = scripted {
            debug!(code = %code, "loopback.chain_add_edges.scripted");
            return code;
        }
        let Some(peer) = self.peer(req.space_id, first_part(&req.parts)) else {
            return ResultCode::RpcFailure;
        };
        let code = peer.chain_add_edges(req, term, edge_version).await.code();
        scripted.map_or(code, |s| s.code)
    }

    async fn chain_update_edge(
        &self,
        req: UpdateEdgeRequest,
        term: TermId,
        edge_version: Option<EdgeVersion>,
    ) -> ResultCode {
        let scripted = self.next_script();
        if let Some(Scripted { code, deliver: false }) = scripted {
            debug!(code = %code, "loopback.chain_update_edge.scripted");
            return code;
        }
        let Some(peer) = self.peer(req.space_id, req.part_id) else {
            return ResultCode::RpcFailure;
        };
        let code = peer.chain_update_edge(req, term, edge_version).await.code();
        scripted.map_or(code, |s| s.code)
    }

    async fn chain_delete_edges(&self, req: DeleteEdgesRequest, term: TermId) -> ResultCode {
        let scripted = self.next_script();
        if let Some(Scripted { code, deliver: false }) = scripted {
            debug!(code = %code, "loopback.chain_delete_edges.scripted");
            return code;
        }
        let Some(peer) = self.peer(req.space_id, first_part(&req.parts)) else {
            return ResultCode::RpcFailure;
        };
        let code = peer.chain_delete_edges(req, term).await.code();
        scripted.map_or(code, |s| s.code)
    }
}
