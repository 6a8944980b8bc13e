//! Cluster state read from the Kubernetes API.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};
use kube::Api;
use kube::api::ListParams;
use tracing::debug;

use super::{ClusterState, NodeRecord};
use crate::error::KnuError;
use crate::kubeadm::ClusterConfiguration;
use crate::upgrade::node::{NodeRole, NodeVersionInfo};
use crate::version::ClusterVersion;

const KUBE_SYSTEM: &str = "kube-system";
const KUBEADM_CONFIG_MAP: &str = "kubeadm-config";
const CLUSTER_CONFIGURATION_KEY: &str = "ClusterConfiguration";
const API_SERVER_SELECTOR: &str = "component=kube-apiserver";

/// Labels marking a control-plane node, current and legacy.
const CONTROL_PLANE_LABELS: &[&str] = &[
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// `ClusterState` backed by a kube client.
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    pub const fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Build a client from the kubeconfig or in-cluster environment.
    pub async fn try_default() -> Result<Self> {
        let client = kube::Client::try_default()
            .await
            .map_err(|e| KnuError::query("build Kubernetes client", e))?;
        Ok(Self::new(client))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .map_err(|e| KnuError::query("list nodes", e))?;
        debug!("Found {} nodes in cluster", list.items.len());
        Ok(list.items)
    }

    async fn list_api_server_pods(&self) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), KUBE_SYSTEM);
        let list = pods
            .list(&ListParams::default().labels(API_SERVER_SELECTOR))
            .await
            .map_err(|e| KnuError::query("list kube-apiserver pods", e))?;
        Ok(list.items)
    }
}

#[async_trait]
impl ClusterState for KubeCluster {
    async fn node_by_machine_id(&self, machine_id: &str) -> Result<NodeRecord> {
        self.list_nodes()
            .await?
            .iter()
            .find(|node| node_machine_id(node) == Some(machine_id))
            .map(|node| NodeRecord {
                name: node_name(node).to_string(),
                machine_id: machine_id.to_string(),
            })
            .ok_or_else(|| {
                KnuError::Lookup(format!("Node with machine id {machine_id}")).into()
            })
    }

    async fn node_versions(&self) -> Result<Vec<NodeVersionInfo>> {
        let (nodes, pods) = futures::try_join!(self.list_nodes(), self.list_api_server_pods())?;
        let api_servers = api_server_versions(&pods);

        nodes
            .iter()
            .map(|node| node_version_info(node, &api_servers))
            .collect()
    }

    async fn cluster_configuration(&self) -> Result<ClusterConfiguration> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), KUBE_SYSTEM);
        let config_map = config_maps
            .get(KUBEADM_CONFIG_MAP)
            .await
            .map_err(|e| KnuError::query("get kubeadm-config", e))?;

        let contents = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(CLUSTER_CONFIGURATION_KEY))
            .ok_or_else(|| {
                KnuError::Lookup(format!(
                    "{CLUSTER_CONFIGURATION_KEY} in {KUBE_SYSTEM}/{KUBEADM_CONFIG_MAP}"
                ))
            })?;

        ClusterConfiguration::from_yaml(contents)
    }
}

fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or("unknown")
}

fn node_machine_id(node: &Node) -> Option<&str> {
    node.status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|info| info.machine_id.as_str())
}

/// Role from the node-role labels.
pub fn node_role(node: &Node) -> NodeRole {
    let is_control_plane = node
        .metadata
        .labels
        .as_ref()
        .is_some_and(|labels| CONTROL_PLANE_LABELS.iter().any(|l| labels.contains_key(*l)));
    if is_control_plane {
        NodeRole::ControlPlane
    } else {
        NodeRole::Worker
    }
}

/// Version from a container image reference such as
/// `registry.k8s.io/kube-apiserver:v1.30.2` or `host:5000/kube-apiserver:v1.30.2@sha256:...`.
pub fn image_tag_version(image: &str) -> Result<ClusterVersion> {
    let without_digest = image.split('@').next().unwrap_or(image);
    let name = without_digest.rsplit('/').next().unwrap_or(without_digest);
    let tag = name
        .split_once(':')
        .map(|(_, tag)| tag)
        .ok_or_else(|| KnuError::InvalidVersion(image.to_string()))?;
    Ok(ClusterVersion::parse(tag)?)
}

/// API server version per node name, from the kube-apiserver static pods.
fn api_server_versions(pods: &[Pod]) -> HashMap<String, ClusterVersion> {
    pods.iter()
        .filter_map(|pod| {
            let spec = pod.spec.as_ref()?;
            let node = spec.node_name.clone()?;
            let image = spec
                .containers
                .iter()
                .find(|c| c.name == "kube-apiserver")
                .or_else(|| spec.containers.first())?
                .image
                .as_deref()?;
            match image_tag_version(image) {
                Ok(version) => Some((node, version)),
                Err(e) => {
                    debug!("Ignoring kube-apiserver pod on {}: {}", node, e);
                    None
                }
            }
        })
        .collect()
}

fn node_version_info(
    node: &Node,
    api_servers: &HashMap<String, ClusterVersion>,
) -> Result<NodeVersionInfo> {
    let name = node_name(node);
    let kubelet = node
        .status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|info| info.kubelet_version.as_str())
        .ok_or_else(|| KnuError::Lookup(format!("Kubelet version of node {name}")))?;

    let role = node_role(node);
    let api_server_version = match role {
        NodeRole::ControlPlane => Some(api_servers.get(name).cloned().ok_or_else(|| {
            KnuError::Lookup(format!("kube-apiserver pod on node {name}"))
        })?),
        NodeRole::Worker => None,
    };

    Ok(NodeVersionInfo {
        node_name: name.to_string(),
        role,
        api_server_version,
        kubelet_version: ClusterVersion::parse(kubelet)?,
    })
}
