//! Non-chain mutation processors: validate a request, build one batch per
//! partition and commit it.
//!
//! The chain layer delegates its final local commit here and splices its own
//! intent bookkeeping into the same batch through a [`BatchHook`].

use tracing::{debug, trace};

use crate::cluster::SchemaManager;
use crate::types::{now_micros, PartitionId, PropValue, ResultCode, SpaceId};

use super::codec::{CompactCodec, EdgeRow};
use super::keys;
use super::kv::{BatchHolder, KvStore};
use super::request::{AddEdgesRequest, DeleteEdgesRequest, ExecResponse, NewEdge, UpdateEdgeRequest};

/// Extra operations appended to a mutation's batch before it is committed.
pub type BatchHook = Box<dyn FnOnce(&mut BatchHolder) + Send + Sync>;

/// Reads and decodes the edge row stored under `raw_key`.
///
/// Returns `Ok(None)` when the edge does not exist.
pub async fn read_edge(
    kv: &dyn KvStore,
    space: SpaceId,
    part: PartitionId,
    raw_key: &[u8],
) -> Result<Option<EdgeRow>, ResultCode> {
    match kv.get(space, part, raw_key).await {
        Ok(bytes) => EdgeRow::decode(&bytes)
            .map(Some)
            .map_err(|err| err.code()),
        Err(ResultCode::KeyNotFound) => Ok(None),
        Err(code) => Err(code),
    }
}

/// Inserts edges, one atomic batch per partition.
pub struct AddEdgesProcessor<'a> {
    kv: &'a dyn KvStore,
    schema: &'a dyn SchemaManager,
    hook: Option<(PartitionId, BatchHook)>,
}

impl<'a> AddEdgesProcessor<'a> {
    /// Creates a processor over the given engine and catalog.
    pub fn new(kv: &'a dyn KvStore, schema: &'a dyn SchemaManager) -> Self {
        Self {
            kv,
            schema,
            hook: None,
        }
    }

    /// Appends `hook` to the batch of `part`.
    pub fn with_hook(mut self, part: PartitionId, hook: BatchHook) -> Self {
        self.hook = Some((part, hook));
        self
    }

    /// Applies the request and reports failed partitions.
    pub async fn process(mut self, req: &AddEdgesRequest) -> ExecResponse {
        let mut resp = ExecResponse::default();
        let vid_len = match self.schema.vid_len(req.space_id) {
            Ok(len) => len,
            Err(code) => {
                for part in req.parts.keys() {
                    resp.push_result(*part, code);
                }
                return resp;
            }
        };
        for (part, edges) in &req.parts {
            let code = match self.build_batch(req, vid_len, *part, edges).await {
                Ok(batch) => self.commit(req.space_id, *part, batch).await,
                Err(code) => code,
            };
            resp.push_result(*part, code);
        }
        resp
    }

    async fn build_batch(
        &self,
        req: &AddEdgesRequest,
        vid_len: usize,
        part: PartitionId,
        edges: &[NewEdge],
    ) -> Result<BatchHolder, ResultCode> {
        let version = req.version.unwrap_or_else(now_micros);
        let mut batch = BatchHolder::new();
        for edge in edges {
            let key = keys::edge_key(vid_len, part, &edge.key).ok_or(ResultCode::InvalidVid)?;
            let schema = self.schema.edge_schema(req.space_id, edge.key.edge_type)?;
            let props = schema.build_row(&req.prop_names, &edge.props)?;
            if req.if_not_exists
                && read_edge(self.kv, req.space_id, part, &key).await?.is_some()
            {
                trace!(edge = %edge.key, "storage.add_edges.exists");
                continue;
            }
            batch.put(key, EdgeRow { version, props }.encode());
        }
        Ok(batch)
    }

    async fn commit(&mut self, space: SpaceId, part: PartitionId, mut batch: BatchHolder) -> ResultCode {
        if let Some((hook_part, _)) = &self.hook {
            if *hook_part == part {
                if let Some((_, hook)) = self.hook.take() {
                    hook(&mut batch);
                }
            }
        }
        if batch.is_empty() {
            return ResultCode::Succeeded;
        }
        let code = self.kv.commit_batch(space, part, batch).await;
        if !code.is_ok() {
            debug!(space, part, code = %code, "storage.add_edges.commit_failed");
        }
        code
    }
}

/// Updates a single edge, optionally inserting it.
pub struct UpdateEdgeProcessor<'a> {
    kv: &'a dyn KvStore,
    schema: &'a dyn SchemaManager,
    hook: Option<BatchHook>,
}

impl<'a> UpdateEdgeProcessor<'a> {
    /// Creates a processor over the given engine and catalog.
    pub fn new(kv: &'a dyn KvStore, schema: &'a dyn SchemaManager) -> Self {
        Self {
            kv,
            schema,
            hook: None,
        }
    }

    /// Appends `hook` to the update's batch.
    pub fn with_hook(mut self, hook: BatchHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Applies the update.
    pub async fn process(self, req: &UpdateEdgeRequest) -> ResultCode {
        let mut batch = match self.build_batch(req).await {
            Ok(batch) => batch,
            Err(code) => return code,
        };
        if let Some(hook) = self.hook {
            hook(&mut batch);
        }
        let code = self.kv.commit_batch(req.space_id, req.part_id, batch).await;
        if !code.is_ok() {
            debug!(space = req.space_id, part = req.part_id, code = %code, "storage.update_edge.commit_failed");
        }
        code
    }

    async fn build_batch(&self, req: &UpdateEdgeRequest) -> Result<BatchHolder, ResultCode> {
        let vid_len = self.schema.vid_len(req.space_id)?;
        let key = keys::edge_key(vid_len, req.part_id, &req.edge_key).ok_or(ResultCode::InvalidVid)?;
        let schema = self.schema.edge_schema(req.space_id, req.edge_key.edge_type)?;
        let now = now_micros();

        let mut props = match read_edge(self.kv, req.space_id, req.part_id, &key).await? {
            Some(row) => row.props,
            None if req.insertable => {
                let names: Vec<String> = req.updated_props.iter().map(|p| p.name.clone()).collect();
                let values: Vec<_> = req.updated_props.iter().map(|p| p.value.clone()).collect();
                schema.build_row(&names, &values)?
            }
            None => return Err(ResultCode::EdgeNotFound),
        };
        while props.len() < schema.columns.len() {
            props.push(schema.fill_value(props.len(), now)?);
        }
        for update in &req.updated_props {
            let idx = schema.column_index(&update.name).ok_or(ResultCode::InvalidData)?;
            if update.value == PropValue::Null && !schema.columns[idx].nullable {
                return Err(ResultCode::InvalidData);
            }
            props[idx] = update.value.clone();
        }

        let mut batch = BatchHolder::new();
        let version = req.version.unwrap_or(now);
        batch.put(key, EdgeRow { version, props }.encode());
        Ok(batch)
    }
}

/// Deletes edges, one atomic batch per partition.
pub struct DeleteEdgesProcessor<'a> {
    kv: &'a dyn KvStore,
    schema: &'a dyn SchemaManager,
    hook: Option<(PartitionId, BatchHook)>,
}

impl<'a> DeleteEdgesProcessor<'a> {
    /// Creates a processor over the given engine and catalog.
    pub fn new(kv: &'a dyn KvStore, schema: &'a dyn SchemaManager) -> Self {
        Self {
            kv,
            schema,
            hook: None,
        }
    }

    /// Appends `hook` to the batch of `part`.
    pub fn with_hook(mut self, part: PartitionId, hook: BatchHook) -> Self {
        self.hook = Some((part, hook));
        self
    }

    /// Applies the request and reports failed partitions.
    pub async fn process(mut self, req: &DeleteEdgesRequest) -> ExecResponse {
        let mut resp = ExecResponse::default();
        let vid_len = match self.schema.vid_len(req.space_id) {
            Ok(len) => len,
            Err(code) => {
                for part in req.parts.keys() {
                    resp.push_result(*part, code);
                }
                return resp;
            }
        };
        for (part, edge_keys) in &req.parts {
            let mut batch = BatchHolder::new();
            let mut code = ResultCode::Succeeded;
            for edge_key in edge_keys {
                match keys::edge_key(vid_len, *part, edge_key) {
                    Some(key) => batch.remove(key),
                    None => {
                        code = ResultCode::InvalidVid;
                        break;
                    }
                }
            }
            if code.is_ok() {
                if matches!(&self.hook, Some((hook_part, _)) if hook_part == part) {
                    if let Some((_, hook)) = self.hook.take() {
                        hook(&mut batch);
                    }
                }
                if !batch.is_empty() {
                    code = self.kv.commit_batch(req.space_id, *part, batch).await;
                }
            }
            resp.push_result(*part, code);
        }
        resp
    }
}
