//! Cluster destruction.

use async_trait::async_trait;

use unimgr_core::ClusterId;

use super::subtasks::{
    DestroyEncryptionAtRest, DnsManipulation, MonitoringTargetUpdate, NodeCommandSubtask,
    RemoveUniverseEntry,
};
use super::{Dependencies, DestroyParams, LifecycleOperation, LockPolicy, OperationScope};
use crate::cluster::{CloudType, Node, NodeState};
use crate::error::Result;
use crate::queue::{SubtaskGroup, SubtaskGroupQueue};
use crate::services::{DnsCommand, NodeCommand, ServerType};
use crate::task::{SubtaskGroupType, TaskType};

/// Tears a cluster down and deletes its registry entry.
///
/// Groups, in order: key history cleanup, DNS removal, process shutdown
/// (on-prem only), node destruction, registry removal, monitoring target
/// removal. Imported clusters skip everything that touches infrastructure.
/// A forced destroy takes the lock even if held and treats DNS, shutdown and
/// node destruction as best-effort.
#[derive(Debug, Clone)]
pub struct DestroyOperation {
    params: DestroyParams,
}

impl DestroyOperation {
    /// Creates the operation.
    #[must_use]
    pub const fn new(params: DestroyParams) -> Self {
        Self { params }
    }

    fn stop_group(
        &self,
        deps: &Dependencies,
        nodes: &[&Node],
        server: ServerType,
    ) -> SubtaskGroup {
        let mut group = SubtaskGroup::new(
            format!("stop {server} processes"),
            SubtaskGroupType::StoppingNodeProcesses,
        );
        for node in nodes.iter().copied() {
            let runs_server = match server {
                ServerType::Master => node.is_master,
                ServerType::TServer => node.is_tserver,
            };
            if !runs_server {
                continue;
            }
            group.push_with_policy(
                NodeCommandSubtask {
                    node_manager: deps.node_manager.clone(),
                    cluster_id: self.params.cluster_id,
                    node: node.clone(),
                    command: NodeCommand::Stop(server),
                },
                self.params.force,
            );
        }
        group
    }
}

#[async_trait]
impl LifecycleOperation for DestroyOperation {
    fn task_type(&self) -> TaskType {
        TaskType::DestroyUniverse
    }

    fn cluster_id(&self) -> ClusterId {
        self.params.cluster_id
    }

    fn lock_policy(&self) -> LockPolicy {
        LockPolicy::Exclusive {
            expected_version: None,
            force: self.params.force,
        }
    }

    async fn build_queue(
        &self,
        scope: &OperationScope,
        deps: &Dependencies,
    ) -> Result<SubtaskGroupQueue> {
        let cluster = scope.cluster()?;
        let force = self.params.force;
        let mut queue = scope.queue();

        let mut encryption = SubtaskGroup::new(
            "destroy encryption at rest",
            SubtaskGroupType::RemovingUnusedServers,
        );
        encryption.push(DestroyEncryptionAtRest {
            key_history: deps.key_history.clone(),
            cluster_id: cluster.id,
        });
        queue.add(encryption);

        if !cluster.details.imported {
            let mut dns = SubtaskGroup::new("remove dns", SubtaskGroupType::RemovingUnusedServers);
            dns.push_with_policy(
                DnsManipulation {
                    dns: deps.dns.clone(),
                    cluster_id: cluster.id,
                    command: DnsCommand::Delete,
                    intent: cluster.details.primary.user_intent.clone(),
                },
                force,
            );
            queue.add(dns);

            let nodes: Vec<&Node> = cluster
                .nodes
                .iter()
                .filter(|n| n.state != NodeState::Destroyed)
                .collect();

            if cluster.provider() == CloudType::OnPrem {
                queue.add(self.stop_group(deps, &nodes, ServerType::Master));
                queue.add(self.stop_group(deps, &nodes, ServerType::TServer));
            }

            let mut destroy =
                SubtaskGroup::new("destroy servers", SubtaskGroupType::RemovingUnusedServers);
            for node in &nodes {
                destroy.push_with_policy(
                    NodeCommandSubtask {
                        node_manager: deps.node_manager.clone(),
                        cluster_id: cluster.id,
                        node: (*node).clone(),
                        command: NodeCommand::Destroy,
                    },
                    force,
                );
            }
            queue.add(destroy);
        }

        let mut entry = SubtaskGroup::new(
            "remove universe entry",
            SubtaskGroupType::RemovingUnusedServers,
        );
        entry.push(RemoveUniverseEntry {
            registry: deps.registry.clone(),
            cluster_id: cluster.id,
        });
        queue.add(entry);

        let mut targets = SubtaskGroup::new(
            "remove monitoring targets",
            SubtaskGroupType::RemovingUnusedServers,
        );
        targets.push(MonitoringTargetUpdate {
            monitoring: deps.monitoring.clone(),
            cluster_id: cluster.id,
        });
        queue.add(targets);

        Ok(queue)
    }

    async fn on_success(&self, scope: &OperationScope, deps: &Dependencies) -> Result<()> {
        deps.alerts
            .resolve_alerts(&scope.tenant_id, &scope.cluster_id)
            .await
    }
}
