//! Leader-epoch fencing on the initiator and on the mirror.

#![allow(missing_docs)]

mod common;

use common::{Cluster, SERVE, SPACE, TERM};
use sombra_chain::transaction::{ChainAddEdgesLocalProcessor, ChainProcessor, ChainState};
use sombra_chain::types::{ResultCode, ResumeType};

#[tokio::test(flavor = "multi_thread")]
async fn term_change_before_commit_reports_outdated_term() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    let part = cluster.part_of("100");
    let node = cluster.node_of("100");
    let mut proc = ChainAddEdgesLocalProcessor::new(
        node.txn.clone(),
        cluster.add_request("100", &[&dst], 1997),
    );

    assert_eq!(proc.prepare_local().await, ResultCode::Succeeded);
    node.leadership.bump_term(SPACE, part);
    let code = proc.process_remote(ResultCode::Succeeded).await;
    assert_eq!(code, ResultCode::Succeeded, "the mirror has not seen the new term");
    let code = proc.process_local(code).await;
    assert_eq!(proc.finish(code), ResultCode::OutdatedTerm);
    assert_eq!(proc.state(), ChainState::Aborted);

    assert!(cluster.out_edge("100", &dst).await.is_none());
    assert_eq!(cluster.locks_held("100"), 0);
    // the intent survives for the new leader to finish
    assert!(cluster.prime("100", &dst).is_some());
    assert_eq!(node.txn.dangling_len(), 0);

    // the mirror learns the new term through replication
    cluster.node_of(&dst).leadership.set_follower(SPACE, part, TERM + 1);
    assert_eq!(
        node.txn.on_leader_elected(SPACE, part, TERM + 1).await,
        ResultCode::Succeeded
    );
    let raw = cluster.edge_key("100", SERVE, &dst);
    assert_eq!(node.txn.dangling_type(SPACE, &raw), Some(ResumeType::ResumeChain));

    let summary = node.txn.resume_now().await;
    assert_eq!(summary.resolved, 1);
    let out = cluster.out_edge("100", &dst).await.expect("out edge");
    let mirror = cluster.in_edge("100", &dst).await.expect("in edge");
    assert_eq!(out.version, mirror.version);
    assert!(cluster.prime("100", &dst).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn mirror_rejects_a_deposed_initiator() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    let part = cluster.part_of("100");
    let node = cluster.node_of("100");
    // the mirror already knows a newer term for the initiator's partition
    cluster.node_of(&dst).leadership.set_follower(SPACE, part, TERM + 1);

    let resp = node.service.add_edges(cluster.add_request("100", &[&dst], 1997)).await;
    assert_eq!(resp.code(), ResultCode::OutdatedTerm);
    assert!(cluster.out_edge("100", &dst).await.is_none());
    assert!(cluster.in_edge("100", &dst).await.is_none());
    assert!(cluster.prime("100", &dst).is_none());
    assert_eq!(cluster.locks_held("100"), 0);
    assert_eq!(node.txn.dangling_len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn follower_refuses_to_initiate() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    let part = cluster.part_of("100");
    let node = cluster.node_of("100");
    node.leadership.set_follower(SPACE, part, TERM + 1);

    let resp = node.service.add_edges(cluster.add_request("100", &[&dst], 1997)).await;
    assert_eq!(resp.code(), ResultCode::LeaderChanged);
    assert_eq!(node.client.calls(), 0);
    assert!(cluster.prime("100", &dst).is_none());
    assert_eq!(cluster.locks_held("100"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn mirror_that_lost_leadership_is_retried_then_aborted() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    let mirror_part = cluster.part_of(&dst);
    let node = cluster.node_of("100");
    cluster
        .owner(mirror_part)
        .leadership
        .set_follower(SPACE, mirror_part, TERM + 1);

    let resp = node.service.add_edges(cluster.add_request("100", &[&dst], 1997)).await;
    assert_eq!(resp.code(), ResultCode::LeaderChanged);
    assert_eq!(node.client.calls(), 4);
    assert!(cluster.out_edge("100", &dst).await.is_none());
    assert!(cluster.prime("100", &dst).is_none());
    assert_eq!(cluster.locks_held("100"), 0);
}
