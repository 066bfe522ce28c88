//! Cluster lock contention and release semantics.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use unimgr_flow::error::Error;
use unimgr_flow::registry::ClusterRegistry;
use unimgr_test_utils::{ClusterFactory, TestContext, assert_unlocked};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquisitions_admit_exactly_one() {
    let ctx = TestContext::new();
    for _ in 0..20 {
        let cluster = ctx
            .insert_cluster(ClusterFactory::builder(ctx.tenant_id).version(5).build())
            .await;
        let registry: Arc<dyn ClusterRegistry> = ctx.registry.clone();

        let attempts: Vec<_> = (0..2)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let id = cluster.id;
                tokio::spawn(async move { registry.acquire_lock(&id, Some(5), false).await })
            })
            .collect();

        let mut won = 0;
        let mut already_locked = 0;
        for attempt in attempts {
            match attempt.await.expect("join") {
                Ok(snapshot) => {
                    assert!(snapshot.update_in_progress);
                    won += 1;
                }
                Err(Error::AlreadyLocked { .. }) => already_locked += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!((won, already_locked), (1, 1));
    }
}

#[tokio::test]
async fn release_is_idempotent_and_bumps_version_once() {
    let ctx = TestContext::new();
    let cluster = ctx
        .insert_cluster(ClusterFactory::builder(ctx.tenant_id).version(5).build())
        .await;

    ctx.registry
        .acquire_lock(&cluster.id, Some(5), false)
        .await
        .expect("acquire");
    ctx.registry.release_lock(&cluster.id).await.expect("release");
    ctx.registry
        .release_lock(&cluster.id)
        .await
        .expect("second release");

    let stored = ctx.cluster(&cluster.id).await.expect("cluster");
    assert_unlocked(&stored);
    assert_eq!(stored.version, 6);
}

#[tokio::test]
async fn stale_version_is_rejected_before_locking() {
    let ctx = TestContext::new();
    let cluster = ctx
        .insert_cluster(ClusterFactory::builder(ctx.tenant_id).version(5).build())
        .await;

    let err = ctx
        .registry
        .acquire_lock(&cluster.id, Some(4), false)
        .await
        .expect_err("stale version");
    assert!(matches!(
        err,
        Error::VersionMismatch {
            expected: 4,
            actual: 5,
            ..
        }
    ));
    assert_unlocked(&ctx.cluster(&cluster.id).await.expect("cluster"));
}

#[tokio::test]
async fn forced_acquisition_takes_a_held_lock() {
    let ctx = TestContext::new();
    let cluster = ctx
        .insert_cluster(ClusterFactory::builder(ctx.tenant_id).locked().build())
        .await;

    let err = ctx
        .registry
        .acquire_lock(&cluster.id, None, false)
        .await
        .expect_err("held lock");
    assert!(err.is_lock_conflict());

    let snapshot = ctx
        .registry
        .acquire_lock(&cluster.id, None, true)
        .await
        .expect("forced acquire");
    assert!(snapshot.update_in_progress);
}
