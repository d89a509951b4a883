//! Dangling-edge lifecycle: registration, recovery scans, replay, and the
//! background resume loop.

#![allow(missing_docs)]

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{Cluster, SERVE, SPACE, TERM};
use sombra_chain::types::{ResultCode, ResumeType};
use sombra_chain::ChainConfig;

#[tokio::test(flavor = "multi_thread")]
async fn replay_converges_the_mirror_and_clears_the_entry() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    let node = cluster.node_of("100");
    node.client.fail_next(ResultCode::RpcFailure, 1);
    assert!(node
        .service
        .add_edges(cluster.add_request("100", &[&dst], 1997))
        .await
        .succeeded());

    let summary = node.txn.resume_now().await;
    assert_eq!(summary.replayed, 1);
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.dropped, 0);

    let out = cluster.out_edge("100", &dst).await.expect("out edge");
    let mirror = cluster.in_edge("100", &dst).await.expect("in edge");
    assert_eq!(out.version, mirror.version);
    assert_eq!(out.props, mirror.props);
    assert!(cluster.double_prime("100", &dst).is_none());
    assert_eq!(node.txn.dangling_len(), 0);
    assert_eq!(cluster.locks_held("100"), 0);
    assert_eq!(node.metrics.resumes_succeeded.load(Ordering::Relaxed), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_response_replay_is_idempotent() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    let node = cluster.node_of("100");
    node.client.lose_next_responses(1);
    assert!(node
        .service
        .add_edges(cluster.add_request("100", &[&dst], 1997))
        .await
        .succeeded());
    // the mirror applied the insert even though the initiator never heard back
    let applied = cluster.in_edge("100", &dst).await.expect("in edge");
    assert!(cluster.double_prime("100", &dst).is_some());

    let summary = node.txn.resume_now().await;
    assert_eq!(summary.resolved, 1);
    let mirror = cluster.in_edge("100", &dst).await.expect("in edge");
    assert_eq!(mirror, applied);
    assert_eq!(node.txn.dangling_len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_replay_stays_dangling() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    let node = cluster.node_of("100");
    node.client.fail_next(ResultCode::RpcFailure, 2);
    assert!(node
        .service
        .add_edges(cluster.add_request("100", &[&dst], 1997))
        .await
        .succeeded());

    let summary = node.txn.resume_now().await;
    assert_eq!(summary.replayed, 1);
    assert_eq!(summary.resolved, 0);
    let raw = cluster.edge_key("100", SERVE, &dst);
    assert_eq!(node.txn.dangling_type(SPACE, &raw), Some(ResumeType::ResumeRemote));
    assert!(cluster.double_prime("100", &dst).is_some());
    assert_eq!(cluster.locks_held("100"), 1);
    assert_eq!(node.metrics.resumes_failed.load(Ordering::Relaxed), 1);

    let summary = node.txn.resume_now().await;
    assert_eq!(summary.resolved, 1);
    assert!(cluster.in_edge("100", &dst).await.is_some());
    assert_eq!(cluster.locks_held("100"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_replay_drops_the_double_prime() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    let node = cluster.node_of("100");
    node.client.fail_next(ResultCode::RpcFailure, 1);
    node.client.fail_next(ResultCode::InvalidData, 1);
    assert!(node
        .service
        .add_edges(cluster.add_request("100", &[&dst], 1997))
        .await
        .succeeded());

    let summary = node.txn.resume_now().await;
    assert_eq!(summary.replayed, 1);
    assert_eq!(summary.resolved, 0);
    // the local copy stays; nothing compensates the rejected mirror
    assert!(cluster.out_edge("100", &dst).await.is_some());
    assert!(cluster.in_edge("100", &dst).await.is_none());
    assert!(cluster.double_prime("100", &dst).is_none());
    assert_eq!(node.txn.dangling_len(), 0);
    assert_eq!(cluster.locks_held("100"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn leader_scan_recovers_intents_after_restart() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    let part = cluster.part_of("100");
    let node = cluster.node_of("100");
    node.client.fail_next(ResultCode::RpcFailure, 1);
    assert!(node
        .service
        .add_edges(cluster.add_request("100", &[&dst], 1997))
        .await
        .succeeded());

    // losing leadership forgets the in-memory state, the records remain
    node.txn.on_leader_lost(SPACE, part);
    assert_eq!(node.txn.dangling_len(), 0);
    assert_eq!(cluster.locks_held("100"), 0);
    assert!(cluster.double_prime("100", &dst).is_some());

    assert_eq!(
        node.txn.on_leader_elected(SPACE, part, TERM).await,
        ResultCode::Succeeded
    );
    let raw = cluster.edge_key("100", SERVE, &dst);
    assert_eq!(node.txn.dangling_type(SPACE, &raw), Some(ResumeType::ResumeRemote));
    assert_eq!(cluster.locks_held("100"), 1);

    let summary = node.txn.resume_now().await;
    assert_eq!(summary.resolved, 1);
    assert!(cluster.in_edge("100", &dst).await.is_some());
    assert_eq!(cluster.locks_held("100"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn follower_drops_entries_without_replay() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    let part = cluster.part_of("100");
    let node = cluster.node_of("100");
    node.client.fail_next(ResultCode::RpcFailure, 1);
    assert!(node
        .service
        .add_edges(cluster.add_request("100", &[&dst], 1997))
        .await
        .succeeded());

    node.leadership.set_follower(SPACE, part, TERM + 1);
    let summary = node.txn.resume_now().await;
    assert_eq!(summary.dropped, 1);
    assert_eq!(summary.replayed, 0);
    assert_eq!(node.txn.dangling_len(), 0);
    assert_eq!(cluster.locks_held("100"), 0);
    // the next leader recovers from the record
    assert!(cluster.double_prime("100", &dst).is_some());
    assert_eq!(node.metrics.resumes_dropped.load(Ordering::Relaxed), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn background_loop_repairs_the_mirror() {
    let cluster = Cluster::with_config(ChainConfig {
        enable_resume: true,
        ..ChainConfig::testing()
    });
    for node in &cluster.nodes {
        assert_eq!(node.txn.start().await, ResultCode::Succeeded);
    }
    let dst = cluster.remote_dst("100");
    let node = cluster.node_of("100");
    node.client.fail_next(ResultCode::RpcFailure, 1);
    assert!(node
        .service
        .add_edges(cluster.add_request("100", &[&dst], 1997))
        .await
        .succeeded());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while node.txn.dangling_len() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "resume loop never converged");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cluster.in_edge("100", &dst).await.is_some());
    assert!(cluster.double_prime("100", &dst).is_none());

    for node in &cluster.nodes {
        node.txn.stop().await;
    }
}
