//! Storage-node entry points for chain mutations.
//!
//! Client-facing calls fan out through the group processors; peer-facing
//! calls are the mirror side of a chain and go straight to the remote
//! processors.

use std::sync::Arc;

use crate::storage::{AddEdgesRequest, DeleteEdgesRequest, ExecResponse, UpdateEdgeRequest};
use crate::transaction::{
    ChainAddEdgesGroupProcessor, ChainAddEdgesRemoteProcessor, ChainDeleteEdgesGroupProcessor,
    ChainDeleteEdgesRemoteProcessor, ChainUpdateEdgeLocalProcessor, ChainUpdateEdgeRemoteProcessor,
    TransactionManager,
};
use crate::types::{EdgeVersion, ResultCode, TermId};

/// Dispatch shims of one storage node.
pub struct ChainStorageService {
    txn: Arc<TransactionManager>,
}

impl ChainStorageService {
    /// Wraps `txn`.
    pub fn new(txn: Arc<TransactionManager>) -> Arc<Self> {
        Arc::new(Self { txn })
    }

    /// Transaction manager backing this node.
    pub fn txn(&self) -> &Arc<TransactionManager> {
        &self.txn
    }

    /// Inserts edges and their mirrors.
    pub async fn add_edges(&self, req: AddEdgesRequest) -> ExecResponse {
        ChainAddEdgesGroupProcessor::new(Arc::clone(&self.txn))
            .process(req)
            .await
    }

    /// Updates one edge and its mirror.
    pub async fn update_edge(&self, req: UpdateEdgeRequest) -> ExecResponse {
        let part = req.part_id;
        let task = ChainUpdateEdgeLocalProcessor::new(Arc::clone(&self.txn), req);
        let code = self
            .txn
            .add_chain_task(task.into())
            .await
            .unwrap_or(ResultCode::Unknown);
        let mut resp = ExecResponse::default();
        resp.push_result(part, code);
        resp
    }

    /// Deletes edges and their mirrors.
    pub async fn delete_edges(&self, req: DeleteEdgesRequest) -> ExecResponse {
        ChainDeleteEdgesGroupProcessor::new(Arc::clone(&self.txn))
            .process(req)
            .await
    }

    /// Mirror side of [`add_edges`](Self::add_edges).
    pub async fn chain_add_edges(
        &self,
        req: AddEdgesRequest,
        term: TermId,
        edge_version: Option<EdgeVersion>,
    ) -> ExecResponse {
        ChainAddEdgesRemoteProcessor::new(Arc::clone(&self.txn))
            .process(req, term, edge_version)
            .await
    }

    /// Mirror side of [`update_edge`](Self::update_edge).
    pub async fn chain_update_edge(
        &self,
        req: UpdateEdgeRequest,
        term: TermId,
        edge_version: Option<EdgeVersion>,
    ) -> ExecResponse {
        ChainUpdateEdgeRemoteProcessor::new(Arc::clone(&self.txn))
            .process(req, term, edge_version)
            .await
    }

    /// Mirror side of [`delete_edges`](Self::delete_edges).
    pub async fn chain_delete_edges(&self, req: DeleteEdgesRequest, term: TermId) -> ExecResponse {
        ChainDeleteEdgesRemoteProcessor::new(Arc::clone(&self.txn))
            .process(req, term)
            .await
    }
}
