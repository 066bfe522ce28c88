//! Admission checks run before a lifecycle operation is dispatched.
//!
//! Admission only reads. The backup record an admitted backup or restore
//! needs is returned for the caller to write once the task exists. A
//! rejected request never creates a task.

use uuid::Uuid;

use unimgr_core::TenantId;

use crate::backup::{Backup, BackupAction, BackupState};
use crate::certificate::{CertificateDirectory, validate_certificate};
use crate::cluster::{Cluster, NodeActionType};
use crate::error::{Error, Result};
use crate::ledger::{CustomerTaskKind, TargetType};
use crate::lifecycle::{BackupParams, Dependencies, TaskParams};

/// What an admitted request records in the customer task ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Kind of target resource.
    pub target_type: TargetType,
    /// Target resource identifier.
    pub target_id: Uuid,
    /// Requested operation.
    pub kind: CustomerTaskKind,
    /// Human readable target description.
    pub description: String,
    /// `InProgress` record to write for an admitted backup or restore.
    pub backup: Option<Backup>,
}

/// Validates a node action against a cluster snapshot.
///
/// Checks, in order: the action is externally requestable, the cluster is
/// editable, the node exists, the master quorum survives, and actions that
/// start processes have a usable certificate when inter-node TLS is on.
///
/// # Errors
///
/// Returns `UnsupportedAction`, `ClusterNotEditable`, `NodeNotFound`,
/// `QuorumViolation` or `InvalidCertificate`.
pub async fn validate_node_action(
    cluster: &Cluster,
    node_name: &str,
    action: NodeActionType,
    certificates: &dyn CertificateDirectory,
) -> Result<()> {
    if action == NodeActionType::Query {
        return Err(Error::UnsupportedAction {
            action: action.to_string(),
        });
    }
    if !cluster.details.editable {
        return Err(Error::ClusterNotEditable {
            cluster_id: cluster.id,
        });
    }
    if cluster.node(node_name).is_none() {
        return Err(Error::NodeNotFound {
            cluster_id: cluster.id,
            node_name: node_name.to_string(),
        });
    }
    if !cluster.is_node_action_allowed(node_name, action) {
        return Err(Error::QuorumViolation {
            node_name: node_name.to_string(),
            action: action.to_string(),
            remaining_masters: cluster.live_masters_excluding(node_name),
            replication_factor: cluster.replication_factor(),
        });
    }
    if matches!(
        action,
        NodeActionType::Add | NodeActionType::Start | NodeActionType::StartMaster
    ) {
        let tls = cluster.details.node_to_node_encryption
            || cluster.details.primary.user_intent.enable_node_to_node_encrypt;
        if tls && cluster.details.root_ca.is_none() {
            return Err(Error::InvalidCertificate {
                message: format!(
                    "node-to-node encryption is enabled on {} but no root certificate is set",
                    cluster.name
                ),
            });
        }
        validate_certificate(certificates, cluster.details.root_ca.as_ref()).await?;
    }
    Ok(())
}

/// Admits a request for `tenant_id`.
///
/// For a backup or restore the admission carries the `InProgress` backup
/// record the operation will drive; nothing is written here.
///
/// # Errors
///
/// Returns the rejection for an inadmissible request, or a storage error.
#[tracing::instrument(skip(params, deps), fields(tenant_id = %tenant_id))]
pub async fn admit(
    tenant_id: &TenantId,
    params: &TaskParams,
    deps: &Dependencies,
) -> Result<Admission> {
    let admission = match params {
        TaskParams::DestroyUniverse(p) => {
            let cluster = tenant_cluster(tenant_id, params, deps).await?;
            Admission {
                target_type: TargetType::Universe,
                target_id: p.cluster_id.as_uuid(),
                kind: CustomerTaskKind::Delete,
                description: cluster.name,
                backup: None,
            }
        }
        TaskParams::CreateBackup(p) | TaskParams::RestoreBackup(p) => {
            let cluster = tenant_cluster(tenant_id, params, deps).await?;
            check_backup_params(p)?;
            let (action, kind) = match params.backup_action() {
                Some(BackupAction::Restore) => (BackupAction::Restore, CustomerTaskKind::Restore),
                _ => (BackupAction::Create, CustomerTaskKind::Backup),
            };
            let description = match p.tables.as_slice() {
                [only] => only.to_string(),
                _ => cluster.name.clone(),
            };
            if deps.backups.get(&p.backup_id).await?.is_some() {
                return Err(Error::InvalidRequest {
                    message: format!("backup {} already exists", p.backup_id),
                });
            }
            Admission {
                target_type: TargetType::Backup,
                target_id: cluster.id.as_uuid(),
                kind,
                description,
                backup: Some(Backup::new(
                    p.backup_id,
                    *tenant_id,
                    cluster.id,
                    action,
                    p.storage_config_id,
                    p.storage_location.clone(),
                    p.tables.clone(),
                )),
            }
        }
        TaskParams::DeleteBackup(p) => {
            let backup = deps
                .backups
                .get(&p.backup_id)
                .await?
                .filter(|b| b.tenant_id == *tenant_id)
                .ok_or(Error::BackupNotFound {
                    backup_id: p.backup_id,
                })?;
            if backup.state != BackupState::Completed {
                return Err(Error::BackupNotCompleted {
                    backup_id: backup.id,
                    state: backup.state.to_string(),
                });
            }
            if backup.cluster_id != p.cluster_id {
                return Err(Error::InvalidRequest {
                    message: format!(
                        "backup {} was taken from cluster {}",
                        backup.id, backup.cluster_id
                    ),
                });
            }
            Admission {
                target_type: TargetType::Backup,
                target_id: backup.id.as_uuid(),
                kind: CustomerTaskKind::Delete,
                description: "Backup".to_string(),
                backup: None,
            }
        }
        TaskParams::NodeAction(p) => {
            let kind = p
                .action
                .customer_task_kind()
                .ok_or_else(|| Error::UnsupportedAction {
                    action: p.action.to_string(),
                })?;
            let cluster = tenant_cluster(tenant_id, params, deps).await?;
            validate_node_action(&cluster, &p.node_name, p.action, deps.certificates.as_ref())
                .await?;
            Admission {
                target_type: TargetType::Node,
                target_id: cluster.id.as_uuid(),
                kind,
                description: p.node_name.clone(),
                backup: None,
            }
        }
    };
    Ok(admission)
}

async fn tenant_cluster(
    tenant_id: &TenantId,
    params: &TaskParams,
    deps: &Dependencies,
) -> Result<Cluster> {
    let cluster_id = params.cluster_id();
    deps.registry
        .get(&cluster_id)
        .await?
        .filter(|c| c.tenant_id == *tenant_id)
        .ok_or(Error::ClusterNotFound { cluster_id })
}

fn check_backup_params(params: &BackupParams) -> Result<()> {
    if params.storage_location.trim().is_empty() {
        return Err(Error::InvalidRequest {
            message: "storage location is required".to_string(),
        });
    }
    if params.tables.is_empty() {
        return Err(Error::InvalidRequest {
            message: "at least one keyspace or table is required".to_string(),
        });
    }
    if params.tables.iter().any(|t| t.keyspace.trim().is_empty()) {
        return Err(Error::InvalidRequest {
            message: "keyspace must not be empty".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use unimgr_core::{BackupId, CertificateId, ClusterId};

    use crate::backup::{BackupStore, TableRef};
    use crate::certificate::{CertificateInfo, CertificateType, InMemoryCertificateDirectory};
    use crate::cluster::{CloudType, NodeState};
    use crate::lifecycle::testing::{cluster, fixture, node};
    use crate::lifecycle::{DeleteBackupParams, DestroyParams, NodeActionParams};
    use crate::registry::ClusterRegistry;

    fn three_masters(rf: u32) -> Cluster {
        let mut c = cluster(
            CloudType::Aws,
            vec![
                node("m1", true, NodeState::Live),
                node("m2", true, NodeState::Live),
                node("m3", true, NodeState::Live),
                node("t1", false, NodeState::Stopped),
            ],
        );
        c.details.primary.user_intent.replication_factor = rf;
        c
    }

    fn certs() -> InMemoryCertificateDirectory {
        InMemoryCertificateDirectory::new()
    }

    #[tokio::test]
    async fn query_is_never_admitted() {
        let c = three_masters(3);
        let err = validate_node_action(&c, "m1", NodeActionType::Query, &certs()).await;
        assert!(matches!(err, Err(Error::UnsupportedAction { .. })));
    }

    #[tokio::test]
    async fn stop_below_quorum_is_rejected() -> Result<()> {
        let c = three_masters(3);
        let err = validate_node_action(&c, "m1", NodeActionType::Stop, &certs()).await;
        assert!(matches!(
            err,
            Err(Error::QuorumViolation {
                remaining_masters: 2,
                replication_factor: 3,
                ..
            })
        ));

        let c = three_masters(1);
        validate_node_action(&c, "m1", NodeActionType::Remove, &certs()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn non_editable_cluster_is_rejected() {
        let mut c = three_masters(1);
        c.details.editable = false;
        let err = validate_node_action(&c, "t1", NodeActionType::Start, &certs()).await;
        assert!(matches!(err, Err(Error::ClusterNotEditable { .. })));
    }

    #[tokio::test]
    async fn start_requires_root_cert_under_tls() -> Result<()> {
        let mut c = three_masters(1);
        c.details.node_to_node_encryption = true;
        let err = validate_node_action(&c, "t1", NodeActionType::Start, &certs()).await;
        assert!(matches!(err, Err(Error::InvalidCertificate { .. })));

        let directory = certs();
        let cert = CertificateInfo {
            id: CertificateId::generate(),
            tenant_id: c.tenant_id,
            label: "prod-ca".into(),
            cert_type: CertificateType::CustomCertHostPath,
            custom_cert_info: None,
            expires_at: chrono::Utc::now(),
        };
        directory.insert(cert.clone())?;
        c.details.root_ca = Some(cert.id);
        let err = validate_node_action(&c, "t1", NodeActionType::Start, &directory).await;
        assert!(matches!(err, Err(Error::InvalidCertificate { ref message }) if message.contains("prod-ca")));

        // Stopping never needs a certificate.
        validate_node_action(&c, "t1", NodeActionType::Stop, &directory).await?;
        Ok(())
    }

    #[tokio::test]
    async fn other_tenants_clusters_are_invisible() -> Result<()> {
        let f = fixture();
        let c = three_masters(1);
        f.registry.insert(c.clone()).await?;
        let params = TaskParams::DestroyUniverse(DestroyParams {
            cluster_id: c.id,
            force: false,
        });
        let err = admit(&TenantId::generate(), &params, &f.deps).await;
        assert!(matches!(err, Err(Error::ClusterNotFound { .. })));

        let admission = admit(&c.tenant_id, &params, &f.deps).await?;
        assert_eq!(admission.kind, CustomerTaskKind::Delete);
        assert_eq!(admission.description, "orders");
        Ok(())
    }

    #[tokio::test]
    async fn node_action_targets_the_node() -> Result<()> {
        let f = fixture();
        let c = three_masters(1);
        f.registry.insert(c.clone()).await?;
        let params = TaskParams::NodeAction(NodeActionParams {
            cluster_id: c.id,
            node_name: "t1".into(),
            action: NodeActionType::Start,
            expected_version: Some(c.version),
        });
        let admission = admit(&c.tenant_id, &params, &f.deps).await?;
        assert_eq!(admission.target_type, TargetType::Node);
        assert_eq!(admission.target_id, c.id.as_uuid());
        assert_eq!(admission.kind, CustomerTaskKind::Start);
        assert_eq!(admission.description, "t1");
        Ok(())
    }

    #[tokio::test]
    async fn restore_requires_storage_location_and_prepares_record() -> Result<()> {
        let f = fixture();
        let c = three_masters(1);
        f.registry.insert(c.clone()).await?;
        let mut p = BackupParams {
            cluster_id: c.id,
            backup_id: BackupId::generate(),
            storage_config_id: Uuid::new_v4(),
            storage_location: "  ".into(),
            tables: vec![TableRef::table("ks", "orders")],
            parallelism: None,
        };
        let err = admit(&c.tenant_id, &TaskParams::RestoreBackup(p.clone()), &f.deps).await;
        assert!(matches!(err, Err(Error::InvalidRequest { .. })));
        assert!(f.backups.get(&p.backup_id).await?.is_none());

        p.storage_location = "s3://bucket/orders".into();
        let admission = admit(&c.tenant_id, &TaskParams::RestoreBackup(p.clone()), &f.deps).await?;
        assert_eq!(admission.kind, CustomerTaskKind::Restore);
        assert_eq!(admission.description, "ks.orders");
        assert!(admission.backup.is_some_and(|b| b.id == p.backup_id
            && b.action == BackupAction::Restore
            && b.state == BackupState::InProgress));
        assert!(f.backups.get(&p.backup_id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn existing_backup_id_is_rejected() -> Result<()> {
        let f = fixture();
        let c = three_masters(1);
        f.registry.insert(c.clone()).await?;
        let p = BackupParams {
            cluster_id: c.id,
            backup_id: BackupId::generate(),
            storage_config_id: Uuid::new_v4(),
            storage_location: "s3://bucket/orders".into(),
            tables: vec![TableRef::keyspace("ks")],
            parallelism: None,
        };
        f.backups
            .insert(Backup::new(
                p.backup_id,
                c.tenant_id,
                c.id,
                BackupAction::Create,
                p.storage_config_id,
                p.storage_location.clone(),
                p.tables.clone(),
            ))
            .await?;
        let err = admit(&c.tenant_id, &TaskParams::CreateBackup(p), &f.deps).await;
        assert!(matches!(err, Err(Error::InvalidRequest { ref message }) if message.contains("already exists")));
        Ok(())
    }

    #[tokio::test]
    async fn only_completed_backups_may_be_deleted() -> Result<()> {
        let f = fixture();
        let tenant = TenantId::generate();
        let backup = Backup::new(
            BackupId::generate(),
            tenant,
            ClusterId::generate(),
            BackupAction::Create,
            Uuid::new_v4(),
            "s3://bucket/orders",
            vec![TableRef::keyspace("ks")],
        );
        f.backups.insert(backup.clone()).await?;
        let params = TaskParams::DeleteBackup(DeleteBackupParams::for_backup(&backup));

        let err = admit(&tenant, &params, &f.deps).await;
        assert!(matches!(err, Err(Error::BackupNotCompleted { .. })));

        f.backups.set_state(&backup.id, BackupState::Completed).await?;
        let admission = admit(&tenant, &params, &f.deps).await?;
        assert_eq!(admission.target_id, backup.id.as_uuid());
        assert_eq!(admission.description, "Backup");

        let err = admit(&TenantId::generate(), &params, &f.deps).await;
        assert!(matches!(err, Err(Error::BackupNotFound { .. })));
        Ok(())
    }
}
