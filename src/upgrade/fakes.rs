//! In-memory collaborators for upgrade tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::deployments::{NodeExecutor, Target};
use crate::error::KnuError;
use crate::k8s::{ClusterState, NodeRecord};
use crate::kubeadm::ClusterConfiguration;
use crate::upgrade::node::{NodeRole, NodeVersionInfo};
use crate::upgrade::pipeline::MutationStep;
use crate::version::ClusterVersion;
use crate::version::catalog::{CatalogEntry, ComponentVersions, VersionCatalog};

pub fn v(s: &str) -> ClusterVersion {
    ClusterVersion::parse(s).unwrap()
}

pub fn catalog(versions: &[&str]) -> VersionCatalog {
    VersionCatalog::new(
        versions
            .iter()
            .map(|s| CatalogEntry {
                version: v(s),
                components: ComponentVersions {
                    etcd: format!("etcd-for-{s}"),
                    coredns: format!("dns-for-{s}"),
                },
            })
            .collect(),
    )
}

pub fn control_plane(name: &str, api_server: &str, kubelet: &str) -> NodeVersionInfo {
    NodeVersionInfo {
        node_name: name.to_string(),
        role: NodeRole::ControlPlane,
        api_server_version: Some(v(api_server)),
        kubelet_version: v(kubelet),
    }
}

pub fn worker(name: &str, kubelet: &str) -> NodeVersionInfo {
    NodeVersionInfo {
        node_name: name.to_string(),
        role: NodeRole::Worker,
        api_server_version: None,
        kubelet_version: v(kubelet),
    }
}

/// Cluster state served from memory. Machine ids are `<node name>-id`.
#[derive(Default)]
pub struct FakeCluster {
    nodes: Vec<NodeVersionInfo>,
    cluster_version: Option<ClusterVersion>,
    fail_queries: bool,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl FakeCluster {
    pub fn new(nodes: Vec<NodeVersionInfo>) -> Self {
        Self {
            nodes,
            ..Self::default()
        }
    }

    pub fn with_cluster_version(mut self, version: &str) -> Self {
        self.cluster_version = Some(v(version));
        self
    }

    pub fn failing_queries(mut self) -> Self {
        self.fail_queries = true;
        self
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    fn record(&self, method: &'static str) -> Result<()> {
        *self.calls.lock().unwrap().entry(method).or_default() += 1;
        if self.fail_queries {
            return Err(KnuError::Query(format!("{method}: apiserver unavailable")).into());
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterState for FakeCluster {
    async fn node_by_machine_id(&self, machine_id: &str) -> Result<NodeRecord> {
        self.record("node_by_machine_id")?;
        self.nodes
            .iter()
            .find(|n| format!("{}-id", n.node_name) == machine_id)
            .map(|n| NodeRecord {
                name: n.node_name.clone(),
                machine_id: machine_id.to_string(),
            })
            .ok_or_else(|| KnuError::Lookup(format!("node with machine id {machine_id}")).into())
    }

    async fn node_versions(&self) -> Result<Vec<NodeVersionInfo>> {
        self.record("node_versions")?;
        Ok(self.nodes.clone())
    }

    async fn worker_node_versions(&self) -> Result<Vec<NodeVersionInfo>> {
        self.record("worker_node_versions")?;
        Ok(self
            .nodes
            .iter()
            .filter(|n| n.role == NodeRole::Worker)
            .cloned()
            .collect())
    }

    async fn cluster_configuration(&self) -> Result<ClusterConfiguration> {
        self.record("cluster_configuration")?;
        let version = self
            .cluster_version
            .as_ref()
            .map_or_else(|| "v1.29.0".to_string(), ClusterVersion::to_kubernetes_string);
        ClusterConfiguration::from_yaml(&format!(
            "kubernetesVersion: {version}\nclusterName: test\netcd:\n  local:\n    dataDir: /var/lib/etcd\n"
        ))
    }
}

/// Executor that records every step it is asked to apply.
#[derive(Default)]
pub struct RecordingExecutor {
    files: HashMap<String, String>,
    /// 1-based index of the apply call that fails.
    fail_at: Option<usize>,
    applied: Mutex<Vec<MutationStep>>,
}

impl RecordingExecutor {
    pub fn failing_at(call: usize) -> Self {
        Self {
            fail_at: Some(call),
            ..Self::default()
        }
    }

    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.files.insert(path.to_string(), contents.to_string());
        self
    }

    pub fn with_machine_id(self, node_name: &str) -> Self {
        self.with_file("/etc/machine-id", &format!("{node_name}-id\n"))
    }

    pub fn applied(&self) -> Vec<MutationStep> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeExecutor for RecordingExecutor {
    async fn download_file_contents(&self, target: &Target, path: &str) -> Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            KnuError::io("fakes", format!("{path} not found on {}", target.address)).into()
        })
    }

    async fn apply(&self, _target: &Target, step: &MutationStep) -> Result<()> {
        let mut applied = self.applied.lock().unwrap();
        applied.push(step.clone());
        if self.fail_at == Some(applied.len()) {
            return Err(KnuError::mutation(step.name(), "injected failure").into());
        }
        Ok(())
    }
}
