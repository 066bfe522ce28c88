//! Requests rejected at admission never create a task.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{Duration, Utc};

use unimgr_core::{CertificateId, ClusterId, TenantId};
use unimgr_flow::certificate::{CertificateInfo, CertificateType};
use unimgr_flow::cluster::NodeActionType;
use unimgr_flow::error::Error;
use unimgr_flow::ledger::TaskLedger;
use unimgr_flow::lifecycle::{NodeActionParams, TaskParams};
use unimgr_test_utils::{ClusterFactory, TestContext};

fn node_action(cluster_id: ClusterId, node: &str, action: NodeActionType) -> TaskParams {
    TaskParams::NodeAction(NodeActionParams {
        cluster_id,
        node_name: node.to_string(),
        action,
        expected_version: None,
    })
}

async fn assert_nothing_persisted(ctx: &TestContext) {
    assert_eq!(ctx.tasks.task_count().unwrap(), 0);
    let entries = ctx.ledger.list(&ctx.tenant_id, None).await.unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn stopping_a_master_below_quorum_is_rejected() {
    let ctx = TestContext::new();
    let cluster = ctx
        .insert_cluster(ClusterFactory::three_masters(ctx.tenant_id))
        .await;

    let err = ctx
        .commissioner()
        .submit(ctx.tenant_id, node_action(cluster.id, "node-1", NodeActionType::Stop))
        .await
        .expect_err("quorum would be lost");

    assert!(err.is_admission_rejection());
    assert!(matches!(
        err,
        Error::QuorumViolation { remaining_masters: 2, replication_factor: 3, .. }
    ));
    assert_nothing_persisted(&ctx).await;
    assert!(!ctx.cluster(&cluster.id).await.unwrap().update_in_progress);
}

#[tokio::test]
async fn stopping_a_master_with_spare_quorum_is_admitted() {
    let ctx = TestContext::new();
    let cluster = ctx
        .insert_cluster(
            ClusterFactory::builder(ctx.tenant_id)
                .masters(3)
                .replication_factor(1)
                .build(),
        )
        .await;
    let commissioner = ctx.commissioner();

    let task_id = commissioner
        .submit(ctx.tenant_id, node_action(cluster.id, "node-1", NodeActionType::Stop))
        .await
        .expect("admitted");
    commissioner.wait(&task_id).await.unwrap();
    assert!(ctx.tasks.task_count().unwrap() > 0);
}

#[tokio::test]
async fn starting_a_node_without_a_root_certificate_is_rejected() {
    let ctx = TestContext::new();
    let cluster = ctx
        .insert_cluster(ClusterFactory::builder(ctx.tenant_id).tls(None).build())
        .await;

    let err = ctx
        .commissioner()
        .submit(ctx.tenant_id, node_action(cluster.id, "node-1", NodeActionType::Start))
        .await
        .expect_err("missing certificate");

    assert!(matches!(err, Error::InvalidCertificate { .. }));
    assert_nothing_persisted(&ctx).await;
}

#[tokio::test]
async fn incomplete_host_path_certificate_is_rejected_by_label() {
    let ctx = TestContext::new();
    let cert_id = CertificateId::generate();
    ctx.certificates
        .insert(CertificateInfo {
            id: cert_id,
            tenant_id: ctx.tenant_id,
            label: "on-prem-ca".into(),
            cert_type: CertificateType::CustomCertHostPath,
            custom_cert_info: None,
            expires_at: Utc::now() + Duration::days(365),
        })
        .unwrap();
    let cluster = ctx
        .insert_cluster(
            ClusterFactory::builder(ctx.tenant_id)
                .tls(Some(cert_id))
                .build(),
        )
        .await;

    let err = ctx
        .commissioner()
        .submit(ctx.tenant_id, node_action(cluster.id, "node-1", NodeActionType::Add))
        .await
        .expect_err("incomplete certificate");

    match err {
        Error::InvalidCertificate { message } => assert!(message.contains("on-prem-ca")),
        other => panic!("unexpected error {other:?}"),
    }
    assert_nothing_persisted(&ctx).await;
}

#[tokio::test]
async fn query_action_is_not_executable() {
    let ctx = TestContext::new();
    let cluster = ctx
        .insert_cluster(ClusterFactory::builder(ctx.tenant_id).build())
        .await;

    let err = ctx
        .commissioner()
        .submit(ctx.tenant_id, node_action(cluster.id, "node-1", NodeActionType::Query))
        .await
        .expect_err("query is internal");

    assert!(matches!(err, Error::UnsupportedAction { .. }));
    assert_nothing_persisted(&ctx).await;
}

#[tokio::test]
async fn read_only_cluster_rejects_node_actions() {
    let ctx = TestContext::new();
    let cluster = ctx
        .insert_cluster(ClusterFactory::builder(ctx.tenant_id).read_only().build())
        .await;

    let err = ctx
        .commissioner()
        .submit(ctx.tenant_id, node_action(cluster.id, "node-1", NodeActionType::Remove))
        .await
        .expect_err("not editable");

    assert!(matches!(err, Error::ClusterNotEditable { .. }));
    assert_nothing_persisted(&ctx).await;
}

#[tokio::test]
async fn unknown_node_is_rejected() {
    let ctx = TestContext::new();
    let cluster = ctx
        .insert_cluster(ClusterFactory::builder(ctx.tenant_id).build())
        .await;

    let err = ctx
        .commissioner()
        .submit(ctx.tenant_id, node_action(cluster.id, "node-9", NodeActionType::Stop))
        .await
        .expect_err("no such node");

    assert!(matches!(err, Error::NodeNotFound { .. }));
    assert_nothing_persisted(&ctx).await;
}

#[tokio::test]
async fn another_tenants_cluster_is_invisible() {
    let ctx = TestContext::new();
    let foreign = ctx
        .insert_cluster(ClusterFactory::builder(TenantId::generate()).build())
        .await;

    let err = ctx
        .commissioner()
        .submit(ctx.tenant_id, node_action(foreign.id, "node-1", NodeActionType::Stop))
        .await
        .expect_err("foreign cluster");

    assert!(matches!(err, Error::ClusterNotFound { .. }));
    assert_nothing_persisted(&ctx).await;
}
