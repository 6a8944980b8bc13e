//! Cluster state the upgrade decision reads from.

pub mod cluster;

use anyhow::Result;
use async_trait::async_trait;

use crate::kubeadm::ClusterConfiguration;
use crate::upgrade::node::{NodeRole, NodeVersionInfo};

/// A cluster node matched by its machine id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub name: String,
    pub machine_id: String,
}

/// Read-only view of the cluster used by the upgrade coordinator.
///
/// Implementations do not lock anything: two coordinators running against
/// the same cluster can observe each other's intermediate state.
#[async_trait]
pub trait ClusterState: Send + Sync {
    /// Find the node whose `status.nodeInfo.machineID` matches.
    async fn node_by_machine_id(&self, machine_id: &str) -> Result<NodeRecord>;

    /// Versions of every node, read in one pass.
    async fn node_versions(&self) -> Result<Vec<NodeVersionInfo>>;

    /// Versions of every worker node.
    async fn worker_node_versions(&self) -> Result<Vec<NodeVersionInfo>> {
        Ok(self
            .node_versions()
            .await?
            .into_iter()
            .filter(|n| n.role == NodeRole::Worker)
            .collect())
    }

    /// The kubeadm `ClusterConfiguration` stored in the cluster.
    async fn cluster_configuration(&self) -> Result<ClusterConfiguration>;
}
