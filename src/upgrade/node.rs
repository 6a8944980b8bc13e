//! Per-node version state, update targets and control-plane position.

use std::fmt;

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::error::KnuError;
use crate::k8s::ClusterState;
use crate::version::ClusterVersion;
use crate::version::catalog::VersionCatalog;

/// Role a node plays for the duration of an upgrade decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlPlane => write!(f, "control-plane"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// Versions of the upgrade-relevant components running on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeVersionInfo {
    pub node_name: String,
    pub role: NodeRole,
    /// Only tracked on control-plane nodes.
    pub api_server_version: Option<ClusterVersion>,
    pub kubelet_version: ClusterVersion,
}

impl NodeVersionInfo {
    pub fn is_control_plane(&self) -> bool {
        self.role == NodeRole::ControlPlane
    }
}

/// Current and target versions of a node. Every target field is >= its current field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeVersionInfoUpdate {
    pub current: NodeVersionInfo,
    pub update: NodeVersionInfo,
}

impl NodeVersionInfoUpdate {
    /// Returns true if every tracked version already matches its target.
    pub fn is_updated(&self) -> bool {
        self.current.api_server_version == self.update.api_server_version
            && self.current.kubelet_version == self.update.kubelet_version
    }
}

/// Update status of one node, computed from a single snapshot of the cluster.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub versions: NodeVersionInfoUpdate,
    first_control_plane: bool,
}

impl NodeStatus {
    pub fn is_updated(&self) -> bool {
        self.versions.is_updated()
    }

    /// Returns true if this node would be the first control-plane node to
    /// cross into its target API server version.
    pub const fn is_first_control_plane_node_to_be_upgraded(&self) -> bool {
        self.first_control_plane
    }

    pub fn node_name(&self) -> &str {
        &self.versions.current.node_name
    }
}

/// Compute the update target for a node.
///
/// Control-plane nodes whose API server or kubelet is behind the cluster
/// version catch up to it; control-plane nodes fully at the cluster version
/// move to the next catalog version. Workers only
/// ever catch up to the cluster version and never lead the control plane.
pub fn plan_update(
    current: &NodeVersionInfo,
    cluster_version: &ClusterVersion,
    catalog: &VersionCatalog,
) -> NodeVersionInfoUpdate {
    let target = match current.role {
        NodeRole::ControlPlane => {
            let api_server = current
                .api_server_version
                .as_ref()
                .unwrap_or(&current.kubelet_version);
            if api_server < cluster_version || current.kubelet_version < *cluster_version {
                Some(cluster_version.clone())
            } else {
                catalog.next_upgrade(cluster_version).cloned()
            }
        }
        NodeRole::Worker => {
            (current.kubelet_version < *cluster_version).then(|| cluster_version.clone())
        }
    };

    let update = match target {
        Some(target) => NodeVersionInfo {
            node_name: current.node_name.clone(),
            role: current.role,
            api_server_version: current
                .api_server_version
                .as_ref()
                .map(|v| v.clone().max(target.clone())),
            kubelet_version: current.kubelet_version.clone().max(target),
        },
        None => current.clone(),
    };

    NodeVersionInfoUpdate {
        current: current.clone(),
        update,
    }
}

/// Decide whether `node` is the first control-plane node to be upgraded.
///
/// `snapshot` must hold every node of the cluster as read in one pass. The node
/// is first when it is a control-plane member whose API server has pending work
/// and no other control-plane member already runs an API server at or above its
/// target.
pub fn is_first_control_plane_node(
    node: &NodeVersionInfoUpdate,
    snapshot: &[NodeVersionInfo],
) -> bool {
    if !node.current.is_control_plane() || node.is_updated() {
        return false;
    }
    let Some(target) = node.update.api_server_version.as_ref() else {
        return false;
    };
    // Only the kubelet is behind: the API server has already crossed.
    if node.current.api_server_version.as_ref() >= Some(target) {
        return false;
    }

    !snapshot
        .iter()
        .filter(|other| other.is_control_plane() && other.node_name != node.current.node_name)
        .any(|other| other.api_server_version.as_ref().is_some_and(|v| v >= target))
}

/// Compute the update status of `node_name` against the live cluster.
pub async fn update_status(
    cluster: &dyn ClusterState,
    node_name: &str,
    cluster_version: &ClusterVersion,
    catalog: &VersionCatalog,
) -> Result<NodeStatus> {
    let snapshot = cluster.node_versions().await?;

    let current = snapshot
        .iter()
        .find(|n| n.node_name == node_name)
        .ok_or_else(|| KnuError::Lookup(format!("Node {node_name} not found in cluster")))?;

    let versions = plan_update(current, cluster_version, catalog);
    let first_control_plane = is_first_control_plane_node(&versions, &snapshot);

    debug!(
        "Node {} ({}): api_server {:?} -> {:?}, kubelet {} -> {}, first control plane: {}",
        node_name,
        current.role,
        versions.current.api_server_version,
        versions.update.api_server_version,
        versions.current.kubelet_version,
        versions.update.kubelet_version,
        first_control_plane
    );

    Ok(NodeStatus {
        versions,
        first_control_plane,
    })
}
