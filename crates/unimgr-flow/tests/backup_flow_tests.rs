//! Backup, restore and delete through the commissioner.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use uuid::Uuid;

use unimgr_core::{BackupId, ClusterId};
use unimgr_flow::backup::{BackupState, BackupStore, TableRef};
use unimgr_flow::lifecycle::{BackupParams, TaskParams};
use unimgr_flow::task::TaskState;
use unimgr_test_utils::{
    ClusterFactory, Fault, ServiceOp, TestContext, assert_task_failed, assert_task_succeeded,
    assert_unlocked,
};

fn backup_params(cluster_id: ClusterId, tables: &[&str]) -> BackupParams {
    BackupParams {
        cluster_id,
        backup_id: BackupId::generate(),
        storage_config_id: Uuid::new_v4(),
        storage_location: "s3://backups/orders".into(),
        tables: tables.iter().map(|t| TableRef::table("app", *t)).collect(),
        parallelism: None,
    }
}

#[tokio::test]
async fn backup_completes_and_links_its_task() {
    let ctx = TestContext::new();
    let cluster = ctx
        .insert_cluster(ClusterFactory::builder(ctx.tenant_id).build())
        .await;
    let commissioner = ctx.commissioner();
    let params = backup_params(cluster.id, &["users", "orders"]);
    let backup_id = params.backup_id;

    let task_id = commissioner
        .submit(ctx.tenant_id, TaskParams::CreateBackup(params))
        .await
        .unwrap();
    assert_task_succeeded(&commissioner.wait(&task_id).await.unwrap());

    let backup = ctx.backups.get(&backup_id).await.unwrap().unwrap();
    assert_eq!(backup.state, BackupState::Completed);
    assert_eq!(backup.task_id, Some(task_id));
    let copied = ctx
        .services
        .operations()
        .into_iter()
        .filter(|op| matches!(op, ServiceOp::BackupTable { .. }))
        .count();
    assert_eq!(copied, 2);
    assert_unlocked(&ctx.cluster(&cluster.id).await.unwrap());
}

#[tokio::test]
async fn table_failure_marks_the_backup_failed() {
    let ctx = TestContext::new();
    let cluster = ctx
        .insert_cluster(ClusterFactory::builder(ctx.tenant_id).build())
        .await;
    ctx.services
        .inject_failure(Fault::Table("app.orders".into()));
    let commissioner = ctx.commissioner();
    let params = backup_params(cluster.id, &["users", "orders"]);
    let backup_id = params.backup_id;

    let task_id = commissioner
        .submit(ctx.tenant_id, TaskParams::CreateBackup(params))
        .await
        .unwrap();
    assert_task_failed(&commissioner.wait(&task_id).await.unwrap(), "app.orders");

    let backup = ctx.backups.get(&backup_id).await.unwrap().unwrap();
    assert_eq!(backup.state, BackupState::Failed);
    assert_unlocked(&ctx.cluster(&cluster.id).await.unwrap());
}

#[tokio::test]
async fn retried_backup_gets_a_fresh_record() {
    let ctx = TestContext::new();
    let cluster = ctx
        .insert_cluster(ClusterFactory::builder(ctx.tenant_id).build())
        .await;
    ctx.services
        .inject_failure(Fault::Table("app.users".into()));
    let commissioner = ctx.commissioner();
    let params = backup_params(cluster.id, &["users"]);
    let first_backup = params.backup_id;

    let failed = commissioner
        .submit(ctx.tenant_id, TaskParams::CreateBackup(params))
        .await
        .unwrap();
    commissioner.wait(&failed).await.unwrap();
    ctx.services.clear_failures();

    let retried = commissioner.retry(ctx.tenant_id, &failed).await.unwrap();
    assert_task_succeeded(&commissioner.wait(&retried).await.unwrap());

    let TaskParams::CreateBackup(details) = commissioner.get_details(&retried).await.unwrap()
    else {
        panic!("retry changed the operation");
    };
    assert_ne!(details.backup_id, first_backup);
    let records = ctx
        .backups
        .list_for_cluster(&ctx.tenant_id, &cluster.id)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn delete_backups_only_deletes_completed_ones() {
    let ctx = TestContext::new();
    let cluster = ctx
        .insert_cluster(ClusterFactory::builder(ctx.tenant_id).build())
        .await;
    let commissioner = ctx.commissioner();

    let completed = backup_params(cluster.id, &["users"]);
    let completed_id = completed.backup_id;
    let task = commissioner
        .submit(ctx.tenant_id, TaskParams::CreateBackup(completed))
        .await
        .unwrap();
    commissioner.wait(&task).await.unwrap();

    ctx.services
        .inject_failure(Fault::Table("app.orders".into()));
    let failed = backup_params(cluster.id, &["orders"]);
    let failed_id = failed.backup_id;
    let task = commissioner
        .submit(ctx.tenant_id, TaskParams::CreateBackup(failed))
        .await
        .unwrap();
    commissioner.wait(&task).await.unwrap();

    let submitted = commissioner
        .delete_backups(ctx.tenant_id, &[completed_id, failed_id, BackupId::generate()])
        .await
        .unwrap();
    assert_eq!(submitted.len(), 1);
    let status = commissioner.wait(&submitted[0]).await.unwrap();
    assert_eq!(status.state, TaskState::Success);

    let deleted = ctx.backups.get(&completed_id).await.unwrap().unwrap();
    assert_eq!(deleted.state, BackupState::Deleted);
    let kept = ctx.backups.get(&failed_id).await.unwrap().unwrap();
    assert_eq!(kept.state, BackupState::Failed);
    let artifact_deletes = ctx
        .services
        .operations()
        .into_iter()
        .filter(|op| matches!(op, ServiceOp::DeleteArtifacts { backup_id } if *backup_id == completed_id))
        .count();
    assert_eq!(artifact_deletes, 1);
}

#[tokio::test]
async fn empty_storage_location_is_rejected_before_any_record() {
    let ctx = TestContext::new();
    let cluster = ctx
        .insert_cluster(ClusterFactory::builder(ctx.tenant_id).build())
        .await;
    let mut params = backup_params(cluster.id, &["users"]);
    params.storage_location = "  ".into();
    let backup_id = params.backup_id;

    let err = ctx
        .commissioner()
        .submit(ctx.tenant_id, TaskParams::CreateBackup(params))
        .await
        .expect_err("invalid request");

    assert!(err.is_admission_rejection());
    assert!(ctx.backups.get(&backup_id).await.unwrap().is_none());
    assert_eq!(ctx.tasks.task_count().unwrap(), 0);
}
