//! Chain updates: mirrored versions, upserts, and stale replays.

#![allow(missing_docs)]

mod common;

use std::collections::BTreeMap;

use common::{Cluster, SERVE, SPACE};
use sombra_chain::storage::keys;
use sombra_chain::storage::{AddEdgesProcessor, AddEdgesRequest, CompactCodec, KvStore, NewEdge};
use sombra_chain::types::{EdgeKey, PropValue, ResultCode, ResumeType};

#[tokio::test(flavor = "multi_thread")]
async fn update_rewrites_both_copies_with_one_version() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    cluster.seed_edge("100", &dst, 1997).await;
    let before = cluster.out_edge("100", &dst).await.expect("out edge");

    let node = cluster.node_of("100");
    let resp = node
        .service
        .update_edge(cluster.update_request("100", &dst, 2003))
        .await;
    assert!(resp.succeeded(), "{resp:?}");

    let out = cluster.out_edge("100", &dst).await.expect("out edge");
    let mirror = cluster.in_edge("100", &dst).await.expect("in edge");
    assert!(out.version > before.version);
    assert_eq!(out.version, mirror.version);
    assert_eq!(out.props[0], PropValue::Int(2003));
    assert_eq!(out.props, mirror.props);
    assert!(cluster.prime("100", &dst).is_none());
    assert_eq!(cluster.locks_held("100"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn update_of_missing_edge_fails_locally() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    let node = cluster.node_of("100");

    let resp = node
        .service
        .update_edge(cluster.update_request("100", &dst, 2003))
        .await;
    assert_eq!(resp.code(), ResultCode::EdgeNotFound);
    assert_eq!(node.client.calls(), 0);
    assert!(cluster.prime("100", &dst).is_none());
    assert_eq!(cluster.locks_held("100"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn upsert_inserts_identical_rows() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    let node = cluster.node_of("100");
    let mut req = cluster.update_request("100", &dst, 2003);
    req.insertable = true;

    assert!(node.service.update_edge(req).await.succeeded());

    let out = cluster.out_edge("100", &dst).await.expect("out edge");
    let mirror = cluster.in_edge("100", &dst).await.expect("in edge");
    assert_eq!(out.props[0], PropValue::Int(2003));
    assert!(matches!(out.props[2], PropValue::Timestamp(_)));
    assert_eq!(out.props, mirror.props);
    assert_eq!(out.version, mirror.version);
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_resumed_update_is_discarded() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    cluster.seed_edge("100", &dst, 1997).await;
    let stored = cluster.out_edge("100", &dst).await.expect("out edge");

    // an update intent recorded before the edge's current version
    let node = cluster.node_of("100");
    let part = cluster.part_of("100");
    let mut req = cluster.update_request("100", &dst, 1850);
    req.version = Some(stored.version - 1);
    let mut value = req.encode();
    value.push(keys::UPDATE_TAG);
    let raw = cluster.edge_key("100", SERVE, &dst);
    let code = node
        .kv
        .multi_put(SPACE, part, vec![(keys::prime_key_for(part, &raw), value)])
        .await;
    assert_eq!(code, ResultCode::Succeeded);
    node.txn.add_prime(SPACE, raw, ResumeType::ResumeChain);
    let calls_before = node.client.calls();

    let summary = node.txn.resume_now().await;
    assert_eq!(summary.replayed, 1);
    assert_eq!(summary.resolved, 1);
    // discarded without touching the mirror
    assert_eq!(node.client.calls(), calls_before);

    let out = cluster.out_edge("100", &dst).await.expect("out edge");
    let mirror = cluster.in_edge("100", &dst).await.expect("in edge");
    assert_eq!(out, stored);
    assert_eq!(mirror.props[0], PropValue::Int(1997));
    assert!(cluster.prime("100", &dst).is_none());
    assert_eq!(node.txn.dangling_len(), 0);
    assert_eq!(cluster.locks_held("100"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_update_is_replayed_onto_the_mirror() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    cluster.seed_edge("100", &dst, 1997).await;
    let node = cluster.node_of("100");
    node.client.fail_next(ResultCode::RpcFailure, 1);

    let resp = node
        .service
        .update_edge(cluster.update_request("100", &dst, 2003))
        .await;
    assert!(resp.succeeded(), "{resp:?}");
    let mirror = cluster.in_edge("100", &dst).await.expect("in edge");
    assert_eq!(mirror.props[0], PropValue::Int(1997));
    assert!(cluster.double_prime("100", &dst).is_some());

    let summary = node.txn.resume_now().await;
    assert_eq!(summary.resolved, 1);
    let out = cluster.out_edge("100", &dst).await.expect("out edge");
    let mirror = cluster.in_edge("100", &dst).await.expect("in edge");
    assert_eq!(mirror.props[0], PropValue::Int(2003));
    assert_eq!(out.version, mirror.version);
    assert!(cluster.double_prime("100", &dst).is_none());
    assert_eq!(cluster.locks_held("100"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn newer_mirror_rejects_the_update() {
    let cluster = Cluster::new();
    let dst = cluster.remote_dst("100");
    cluster.seed_edge("100", &dst, 1997).await;

    // the mirror already carries a version from the future
    let mirror_part = cluster.part_of(&dst);
    let mirror_node = cluster.owner(mirror_part);
    let future = AddEdgesRequest {
        space_id: SPACE,
        parts: BTreeMap::from([(
            mirror_part,
            vec![NewEdge {
                key: EdgeKey::new(dst.as_str(), -SERVE, 0, "100"),
                props: vec![PropValue::Int(2050)],
            }],
        )]),
        prop_names: vec!["start_year".into()],
        if_not_exists: false,
        version: Some(i64::MAX / 2),
    };
    let resp = AddEdgesProcessor::new(mirror_node.kv.as_ref(), cluster.schema.as_ref())
        .process(&future)
        .await;
    assert!(resp.succeeded());

    let node = cluster.node_of("100");
    let resp = node
        .service
        .update_edge(cluster.update_request("100", &dst, 2003))
        .await;
    assert_eq!(resp.code(), ResultCode::OutdatedEdge);

    let out = cluster.out_edge("100", &dst).await.expect("out edge");
    assert_eq!(out.props[0], PropValue::Int(1997));
    assert!(cluster.prime("100", &dst).is_none());
    assert_eq!(cluster.locks_held("100"), 0);
}
