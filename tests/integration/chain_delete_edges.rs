//! Chain deletes: both copies go, or the mirror is repaired later.

#![allow(missing_docs)]

mod common;

use std::sync::atomic::Ordering;

use common::{Cluster, SERVE, SPACE};
use sombra_chain::types::{ResultCode, ResumeType};

#[tokio::test(flavor = "multi_thread")]
async fn delete_removes_both_copies() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    cluster.seed_edge("100", &dst, 1997).await;
    let node = cluster.node_of("100");

    let resp = node
        .service
        .delete_edges(cluster.delete_request("100", &[&dst]))
        .await;
    assert!(resp.succeeded(), "{resp:?}");

    assert!(cluster.out_edge("100", &dst).await.is_none());
    assert!(cluster.in_edge("100", &dst).await.is_none());
    assert!(cluster.prime("100", &dst).is_none());
    assert_eq!(cluster.locks_held("100"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_batch_shares_one_chain_per_remote_partition() {
    let cluster = Cluster::new();
    let dsts = cluster.remote_dsts("100", 3);
    for dst in &dsts {
        cluster.seed_edge("100", dst, 2000).await;
    }
    let node = cluster.node_of("100");
    let started = node.metrics.chains_started.load(Ordering::Relaxed);

    let refs: Vec<&str> = dsts.iter().map(String::as_str).collect();
    let resp = node
        .service
        .delete_edges(cluster.delete_request("100", &refs))
        .await;
    assert!(resp.succeeded(), "{resp:?}");
    assert_eq!(node.metrics.chains_started.load(Ordering::Relaxed), started + 1);

    for dst in &dsts {
        assert!(cluster.out_edge("100", dst).await.is_none());
        assert!(cluster.in_edge("100", dst).await.is_none());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_delete_is_replayed_onto_the_mirror() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    cluster.seed_edge("100", &dst, 1997).await;
    let node = cluster.node_of("100");
    node.client.fail_next(ResultCode::RpcFailure, 1);

    let resp = node
        .service
        .delete_edges(cluster.delete_request("100", &[&dst]))
        .await;
    assert!(resp.succeeded(), "{resp:?}");
    assert!(cluster.out_edge("100", &dst).await.is_none());
    assert!(cluster.in_edge("100", &dst).await.is_some());
    assert!(cluster.double_prime("100", &dst).is_some());
    let raw = cluster.edge_key("100", SERVE, &dst);
    assert_eq!(node.txn.dangling_type(SPACE, &raw), Some(ResumeType::ResumeRemote));

    let summary = node.txn.resume_now().await;
    assert_eq!(summary.resolved, 1);
    assert!(cluster.in_edge("100", &dst).await.is_none());
    assert!(cluster.double_prime("100", &dst).is_none());
    assert_eq!(node.txn.dangling_len(), 0);
    assert_eq!(cluster.locks_held("100"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_an_absent_edge_succeeds() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    let node = cluster.node_of("100");

    let resp = node
        .service
        .delete_edges(cluster.delete_request("100", &[&dst]))
        .await;
    assert!(resp.succeeded(), "{resp:?}");
    assert!(cluster.prime("100", &dst).is_none());
    assert_eq!(cluster.locks_held("100"), 0);
}
