//! Local storage plumbing used by the chain layer.
//!
//! Physical key layout, the compact request codec, the key-value engine
//! contract, request/response types and the non-chain mutation processors.

/// Compact binary codec for requests and edge rows.
pub mod codec;

/// Physical key layout of edges, primes and double-primes.
pub mod keys;

/// Key-value engine contract and the in-memory engine.
pub mod kv;

/// Non-chain mutation processors.
pub mod mutate;

/// Request and response types.
pub mod request;

pub use codec::{CompactCodec, EdgeRow};
pub use kv::{BatchHolder, BatchOp, KvStore, MemKvStore};
pub use mutate::{
    read_edge, AddEdgesProcessor, BatchHook, DeleteEdgesProcessor, UpdateEdgeProcessor,
};
pub use request::{
    AddEdgesRequest, DeleteEdgesRequest, ExecResponse, NewEdge, PartResult, UpdateEdgeRequest,
    UpdatedProp,
};
