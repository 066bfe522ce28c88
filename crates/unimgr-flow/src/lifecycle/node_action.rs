//! Node-level actions: add, remove, stop, start and start master.

use async_trait::async_trait;

use unimgr_core::ClusterId;

use super::subtasks::{NodeCommandSubtask, SetNodeState, UpdateNodeProcess};
use super::{Dependencies, LifecycleOperation, LockPolicy, NodeActionParams, OperationScope};
use crate::cluster::{Cluster, Node, NodeActionType, NodeState};
use crate::error::{Error, Result};
use crate::queue::{SubtaskGroup, SubtaskGroupQueue};
use crate::services::{NodeCommand, ServerType};
use crate::task::{SubtaskGroupType, TaskType};

/// Acts on one node of a cluster under the cluster lock.
///
/// The lock is taken at the version the caller acted on, so an action built
/// from a stale view fails with `VersionMismatch` before anything runs.
#[derive(Debug, Clone)]
pub struct NodeActionOperation {
    params: NodeActionParams,
    task_type: TaskType,
}

impl NodeActionOperation {
    /// Creates the operation.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAction` for an action with no task.
    pub fn new(params: NodeActionParams) -> Result<Self> {
        let task_type = params
            .action
            .task_type()
            .ok_or_else(|| Error::UnsupportedAction {
                action: params.action.to_string(),
            })?;
        Ok(Self { params, task_type })
    }

    /// Node states from which the action may start.
    const fn allowed_from(action: NodeActionType) -> &'static [NodeState] {
        match action {
            NodeActionType::Add => &[
                NodeState::ToBeAdded,
                NodeState::Removed,
                NodeState::Decommissioned,
            ],
            NodeActionType::Remove => &[NodeState::Live, NodeState::Stopped],
            NodeActionType::Stop => &[NodeState::Live],
            NodeActionType::Start => &[NodeState::Stopped],
            NodeActionType::StartMaster => &[NodeState::Live, NodeState::Stopped],
            NodeActionType::Query => &[],
        }
    }

    fn check_node<'a>(&self, cluster: &'a Cluster) -> Result<&'a Node> {
        let action = self.params.action;
        let node = cluster
            .node(&self.params.node_name)
            .ok_or_else(|| Error::NodeNotFound {
                cluster_id: cluster.id,
                node_name: self.params.node_name.clone(),
            })?;
        if !Self::allowed_from(action).contains(&node.state) {
            return Err(Error::InvalidRequest {
                message: format!("cannot {action} node {} in state {:?}", node.name, node.state),
            });
        }
        if action == NodeActionType::StartMaster && node.is_master {
            return Err(Error::InvalidRequest {
                message: format!("node {} already runs a master", node.name),
            });
        }
        if !cluster.is_node_action_allowed(&node.name, action) {
            return Err(Error::QuorumViolation {
                node_name: node.name.clone(),
                action: action.to_string(),
                remaining_masters: cluster.live_masters_excluding(&node.name),
                replication_factor: cluster.replication_factor(),
            });
        }
        Ok(node)
    }

    fn set_state(
        &self,
        deps: &Dependencies,
        group_type: SubtaskGroupType,
        state: NodeState,
    ) -> SubtaskGroup {
        let mut group = SubtaskGroup::new(format!("set node state {state:?}"), group_type);
        group.push(SetNodeState {
            registry: deps.registry.clone(),
            cluster_id: self.params.cluster_id,
            node_name: self.params.node_name.clone(),
            state,
        });
        group
    }

    fn command(
        &self,
        deps: &Dependencies,
        node: &Node,
        name: &str,
        group_type: SubtaskGroupType,
        commands: &[NodeCommand],
    ) -> SubtaskGroup {
        let mut group = SubtaskGroup::new(name, group_type);
        for command in commands {
            group.push(NodeCommandSubtask {
                node_manager: deps.node_manager.clone(),
                cluster_id: self.params.cluster_id,
                node: node.clone(),
                command: *command,
            });
        }
        group
    }

    fn mark_master(&self, deps: &Dependencies, is_master: bool) -> SubtaskGroup {
        let mut group = SubtaskGroup::new(
            "update node process",
            SubtaskGroupType::ConfigureUniverse,
        );
        group.push(UpdateNodeProcess {
            registry: deps.registry.clone(),
            cluster_id: self.params.cluster_id,
            node_name: self.params.node_name.clone(),
            is_master,
        });
        group
    }

    fn stop_commands(node: &Node) -> Vec<NodeCommand> {
        let mut commands = Vec::with_capacity(2);
        if node.is_tserver {
            commands.push(NodeCommand::Stop(ServerType::TServer));
        }
        if node.is_master {
            commands.push(NodeCommand::Stop(ServerType::Master));
        }
        commands
    }
}

#[async_trait]
impl LifecycleOperation for NodeActionOperation {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn cluster_id(&self) -> ClusterId {
        self.params.cluster_id
    }

    fn lock_policy(&self) -> LockPolicy {
        LockPolicy::Exclusive {
            expected_version: self.params.expected_version,
            force: false,
        }
    }

    async fn build_queue(
        &self,
        scope: &OperationScope,
        deps: &Dependencies,
    ) -> Result<SubtaskGroupQueue> {
        use SubtaskGroupType as G;

        let cluster = scope.cluster()?;
        let node = self.check_node(cluster)?;
        let mut queue = scope.queue();

        match self.params.action {
            NodeActionType::Add => {
                queue.add(self.command(
                    deps,
                    node,
                    "provision node",
                    G::Provisioning,
                    &[NodeCommand::Provision],
                ));
                queue.add(self.set_state(deps, G::Provisioning, NodeState::Provisioned));
                queue.add(self.command(
                    deps,
                    node,
                    "configure node",
                    G::ConfigureUniverse,
                    &[NodeCommand::Configure],
                ));
                queue.add(self.command(
                    deps,
                    node,
                    "start tserver",
                    G::StartingNodeProcesses,
                    &[NodeCommand::Start(ServerType::TServer)],
                ));
                queue.add(self.set_state(deps, G::StartingNodeProcesses, NodeState::Live));
            }
            NodeActionType::Remove => {
                queue.add(self.set_state(deps, G::StoppingNodeProcesses, NodeState::Removing));
                queue.add(self.command(
                    deps,
                    node,
                    "stop processes",
                    G::StoppingNodeProcesses,
                    &Self::stop_commands(node),
                ));
                if node.is_master {
                    queue.add(self.mark_master(deps, false));
                }
                queue.add(self.set_state(deps, G::RemovingUnusedServers, NodeState::Removed));
            }
            NodeActionType::Stop => {
                queue.add(self.set_state(deps, G::StoppingNodeProcesses, NodeState::Stopping));
                queue.add(self.command(
                    deps,
                    node,
                    "stop processes",
                    G::StoppingNodeProcesses,
                    &Self::stop_commands(node),
                ));
                queue.add(self.set_state(deps, G::StoppingNodeProcesses, NodeState::Stopped));
            }
            NodeActionType::Start => {
                queue.add(self.set_state(deps, G::StartingNodeProcesses, NodeState::Starting));
                queue.add(self.command(
                    deps,
                    node,
                    "start tserver",
                    G::StartingNodeProcesses,
                    &[NodeCommand::Start(ServerType::TServer)],
                ));
                queue.add(self.set_state(deps, G::StartingNodeProcesses, NodeState::Live));
            }
            NodeActionType::StartMaster => {
                queue.add(self.set_state(deps, G::StartingMasterProcess, NodeState::Starting));
                queue.add(self.command(
                    deps,
                    node,
                    "start master",
                    G::StartingMasterProcess,
                    &[NodeCommand::Start(ServerType::Master)],
                ));
                queue.add(self.mark_master(deps, true));
                queue.add(self.set_state(deps, G::StartingMasterProcess, NodeState::Live));
            }
            NodeActionType::Query => {
                return Err(Error::UnsupportedAction {
                    action: NodeActionType::Query.to_string(),
                });
            }
        }
        Ok(queue)
    }
}
