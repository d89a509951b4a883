//! Two-node cluster over the in-memory collaborators.
//!
//! Partitions alternate between the nodes (odd partitions on node 0, even on
//! node 1). Each node's loopback client routes a partition to the service of
//! its owner, so an edge whose endpoints land on different nodes exercises a
//! real cross-node mirror.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use sombra_chain::cluster::{
    ColumnDef, DefaultValue, EdgeSchema, LoopbackClient, MemLeadership, StaticSchema,
};
use sombra_chain::storage::keys;
use sombra_chain::storage::{
    read_edge, AddEdgesRequest, DeleteEdgesRequest, EdgeRow, MemKvStore, NewEdge,
    UpdateEdgeRequest, UpdatedProp,
};
use sombra_chain::types::{EdgeType, PartitionId, SpaceId, TermId};
use sombra_chain::{
    ChainConfig, ChainStorageService, CounterMetrics, EdgeKey, PropValue, StorageEnv,
    TransactionManager,
};

pub const SPACE: SpaceId = 1;
pub const SERVE: EdgeType = 5;
pub const TERM: TermId = 3;
pub const VID_LEN: usize = 8;
pub const PART_NUM: u32 = 4;
const NODES: usize = 2;

pub struct Node {
    pub kv: Arc<MemKvStore>,
    pub leadership: Arc<MemLeadership>,
    pub client: Arc<LoopbackClient>,
    pub metrics: Arc<CounterMetrics>,
    pub txn: Arc<TransactionManager>,
    pub service: Arc<ChainStorageService>,
}

pub struct Cluster {
    pub schema: Arc<StaticSchema>,
    pub nodes: Vec<Node>,
}

pub fn serve_schema() -> EdgeSchema {
    EdgeSchema::new(vec![
        ColumnDef::new("start_year", false),
        ColumnDef::new("end_year", true),
        ColumnDef::new("created", false).with_default(DefaultValue::Now),
    ])
}

fn owner_index(part: PartitionId) -> usize {
    (part as usize - 1) % NODES
}

impl Cluster {
    pub fn new() -> Self {
        Self::with_config(ChainConfig::testing())
    }

    pub fn with_config(config: ChainConfig) -> Self {
        let schema = Arc::new(StaticSchema::new());
        schema.add_space(SPACE, VID_LEN, PART_NUM);
        schema.add_edge(SPACE, SERVE, serve_schema());

        let nodes: Vec<Node> = (0..NODES)
            .map(|idx| {
                let kv = Arc::new(MemKvStore::new());
                let leadership = Arc::new(MemLeadership::new());
                for part in 1..=PART_NUM {
                    if owner_index(part) == idx {
                        leadership.set_leader(SPACE, part, TERM);
                    } else {
                        leadership.set_follower(SPACE, part, TERM);
                    }
                }
                let client = Arc::new(LoopbackClient::new());
                let metrics = Arc::new(CounterMetrics::default());
                let env = StorageEnv::new(
                    kv.clone(),
                    schema.clone(),
                    leadership.clone(),
                    client.clone(),
                );
                let txn = TransactionManager::new(env, config.clone(), metrics.clone())
                    .expect("valid config");
                let service = ChainStorageService::new(txn.clone());
                Node {
                    kv,
                    leadership,
                    client,
                    metrics,
                    txn,
                    service,
                }
            })
            .collect();

        for node in &nodes {
            for part in 1..=PART_NUM {
                let owner = &nodes[owner_index(part)];
                node.client
                    .register(SPACE, part, Arc::downgrade(&owner.service));
            }
        }
        Self { schema, nodes }
    }

    pub fn part_of(&self, vid: &str) -> PartitionId {
        keys::part_of_vid(vid.as_bytes(), PART_NUM)
    }

    pub fn owner(&self, part: PartitionId) -> &Node {
        &self.nodes[owner_index(part)]
    }

    /// Node leading the partition of `vid`.
    pub fn node_of(&self, vid: &str) -> &Node {
        self.owner(self.part_of(vid))
    }

    /// First vid after `src` whose partition lives on the other node.
    pub fn remote_dst(&self, src: &str) -> String {
        let home = owner_index(self.part_of(src));
        (101..1000)
            .map(|n| n.to_string())
            .find(|vid| owner_index(self.part_of(vid)) != home)
            .expect("some vid hashes to the other node")
    }

    /// `count` distinct vids owned by the other node than `src`, all in one partition.
    pub fn remote_dsts(&self, src: &str, count: usize) -> Vec<String> {
        let first = self.remote_dst(src);
        let part = self.part_of(&first);
        let mut out = vec![first];
        out.extend(
            (1000..5000)
                .map(|n| n.to_string())
                .filter(|vid| self.part_of(vid) == part)
                .take(count.saturating_sub(1)),
        );
        out
    }

    /// Physical key of the edge in its source partition.
    pub fn edge_key(&self, src: &str, edge_type: EdgeType, dst: &str) -> Vec<u8> {
        let key = EdgeKey::new(src, edge_type, 0, dst);
        keys::edge_key(VID_LEN, self.part_of(src), &key).expect("vid fits")
    }

    /// The out-edge as stored by the node owning `src`.
    pub async fn out_edge(&self, src: &str, dst: &str) -> Option<EdgeRow> {
        self.read(src, SERVE, dst).await
    }

    /// The in-edge mirror as stored by the node owning `dst`.
    pub async fn in_edge(&self, src: &str, dst: &str) -> Option<EdgeRow> {
        self.read(dst, -SERVE, src).await
    }

    async fn read(&self, src: &str, edge_type: EdgeType, dst: &str) -> Option<EdgeRow> {
        let part = self.part_of(src);
        let raw = self.edge_key(src, edge_type, dst);
        read_edge(self.owner(part).kv.as_ref(), SPACE, part, &raw)
            .await
            .expect("edge read")
    }

    pub fn prime(&self, src: &str, dst: &str) -> Option<Vec<u8>> {
        let part = self.part_of(src);
        let raw = self.edge_key(src, SERVE, dst);
        self.owner(part)
            .kv
            .peek(SPACE, part, &keys::prime_key_for(part, &raw))
    }

    pub fn double_prime(&self, src: &str, dst: &str) -> Option<Vec<u8>> {
        let part = self.part_of(src);
        let raw = self.edge_key(src, SERVE, dst);
        self.owner(part)
            .kv
            .peek(SPACE, part, &keys::double_prime_key_for(part, &raw))
    }

    /// Held memory locks of the partition owning `src`.
    pub fn locks_held(&self, src: &str) -> usize {
        let part = self.part_of(src);
        self.owner(part).txn.get_lock_core(SPACE, part).size()
    }

    pub fn add_request(&self, src: &str, dsts: &[&str], start_year: i64) -> AddEdgesRequest {
        let edges = dsts
            .iter()
            .map(|dst| NewEdge {
                key: EdgeKey::new(src, SERVE, 0, *dst),
                props: vec![
                    PropValue::Int(start_year),
                    PropValue::Int(start_year + 10),
                    PropValue::Timestamp(1_600_000_000_000_000),
                ],
            })
            .collect();
        AddEdgesRequest {
            space_id: SPACE,
            parts: BTreeMap::from([(self.part_of(src), edges)]),
            prop_names: vec!["start_year".into(), "end_year".into(), "created".into()],
            if_not_exists: false,
            version: None,
        }
    }

    pub fn update_request(&self, src: &str, dst: &str, start_year: i64) -> UpdateEdgeRequest {
        UpdateEdgeRequest {
            space_id: SPACE,
            part_id: self.part_of(src),
            edge_key: EdgeKey::new(src, SERVE, 0, dst),
            updated_props: vec![UpdatedProp {
                name: "start_year".into(),
                value: PropValue::Int(start_year),
            }],
            insertable: false,
            version: None,
        }
    }

    pub fn delete_request(&self, src: &str, dsts: &[&str]) -> DeleteEdgesRequest {
        let edge_keys = dsts
            .iter()
            .map(|dst| EdgeKey::new(src, SERVE, 0, *dst))
            .collect();
        DeleteEdgesRequest {
            space_id: SPACE,
            parts: BTreeMap::from([(self.part_of(src), edge_keys)]),
        }
    }

    /// Inserts an edge through the chain and asserts both copies landed.
    pub async fn seed_edge(&self, src: &str, dst: &str, start_year: i64) {
        let resp = self
            .node_of(src)
            .service
            .add_edges(self.add_request(src, &[dst], start_year))
            .await;
        assert!(resp.succeeded(), "seed failed: {resp:?}");
        assert!(self.in_edge(src, dst).await.is_some());
    }
}
