//! Upgrade path selection and pipeline construction.
//!
//! A node is routed to exactly one of:
//! - `UpToDate`: nothing to do.
//! - `Blocked`: workers cannot tolerate the control-plane version the upgrade
//!   would expose; retry after the workers catch up.
//! - a four-step sequence for the first control-plane node, a subsequent
//!   control-plane node, or a worker.

use std::fmt;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use super::node::NodeStatus;
use super::pipeline::MutationStep;
use super::tolerance::all_worker_nodes_tolerate_version;
use crate::deployments::Target;
use crate::error::KnuError;
use crate::k8s::ClusterState;
use crate::kubeadm::{self, ClusterConfiguration, GroupVersion};
use crate::version::ClusterVersion;
use crate::version::catalog::VersionCatalog;

/// Which upgrade procedure applies to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpgradeKind {
    FirstControlPlane,
    SubsequentControlPlane,
    Worker,
}

impl fmt::Display for UpgradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirstControlPlane => write!(f, "first control plane"),
            Self::SubsequentControlPlane => write!(f, "subsequent control plane"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// Outcome of the classification, before any pipeline is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    UpToDate,
    Blocked { reason: String },
    Upgrade(UpgradeKind),
}

/// Selected path for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradePath {
    UpToDate,
    Blocked {
        reason: String,
    },
    Sequence {
        kind: UpgradeKind,
        steps: Vec<MutationStep>,
    },
}

/// Cluster-wide inputs to path selection.
pub struct PathContext<'a> {
    pub cluster: &'a dyn ClusterState,
    pub cluster_configuration: &'a ClusterConfiguration,
    /// Version in the cluster's kubeadm configuration.
    pub cluster_version: &'a ClusterVersion,
    pub catalog: &'a VersionCatalog,
    pub max_kubelet_skew: u64,
}

/// Classify a node and run the tolerance gate where the path requires it.
pub async fn decide(ctx: &PathContext<'_>, status: &NodeStatus) -> Result<Decision> {
    if status.is_updated() {
        return Ok(Decision::UpToDate);
    }

    if status.is_first_control_plane_node_to_be_upgraded() {
        let candidate = target_api_server_version(status)?;
        if !all_worker_nodes_tolerate_version(ctx.cluster, candidate, ctx.max_kubelet_skew).await? {
            return Ok(Decision::Blocked {
                reason: format!("not all worker nodes tolerate API server version {candidate}"),
            });
        }
        return Ok(Decision::Upgrade(UpgradeKind::FirstControlPlane));
    }

    if status.versions.current.is_control_plane() {
        // Another control-plane node already runs the cluster version; the
        // workers must tolerate it before a second one follows.
        if !all_worker_nodes_tolerate_version(
            ctx.cluster,
            ctx.cluster_version,
            ctx.max_kubelet_skew,
        )
        .await?
        {
            return Ok(Decision::Blocked {
                reason: format!(
                    "not all worker nodes tolerate cluster version {}",
                    ctx.cluster_version
                ),
            });
        }
        return Ok(Decision::Upgrade(UpgradeKind::SubsequentControlPlane));
    }

    Ok(Decision::Upgrade(UpgradeKind::Worker))
}

/// Select the path for `target` and build its mutation sequence.
///
/// For the first control-plane node the init configuration is marshaled here,
/// so an encoding failure aborts before any step runs.
pub async fn select_path(
    ctx: &PathContext<'_>,
    target: &Target,
    status: &NodeStatus,
) -> Result<UpgradePath> {
    let kind = match decide(ctx, status).await? {
        Decision::UpToDate => return Ok(UpgradePath::UpToDate),
        Decision::Blocked { reason } => return Ok(UpgradePath::Blocked { reason }),
        Decision::Upgrade(kind) => kind,
    };

    let (current, update) = version_pair(kind, status)?;
    let upgrade_step = match kind {
        UpgradeKind::FirstControlPlane => {
            info!("Building kubeadm init configuration for {}", target);
            let init = kubeadm::init_configuration_for_target(
                target,
                ctx.cluster_configuration,
                update,
                ctx.catalog,
            )?;
            MutationStep::KubeadmUpgradeApply {
                kubeadm_config: kubeadm::marshal_init_configuration(
                    &init,
                    &GroupVersion::upgrade_default(),
                )?,
            }
        }
        UpgradeKind::SubsequentControlPlane | UpgradeKind::Worker => {
            MutationStep::KubeadmUpgradeNode
        }
    };

    Ok(UpgradePath::Sequence {
        kind,
        steps: build_pipeline(current, update, upgrade_step),
    })
}

/// The fixed four-step upgrade shape shared by every path.
///
/// Packages are first moved to the new kubeadm while keeping the running
/// Kubernetes version, then `upgrade_step` runs, then the remaining packages
/// follow and services are restarted.
pub fn build_pipeline(
    current: &ClusterVersion,
    update: &ClusterVersion,
    upgrade_step: MutationStep,
) -> Vec<MutationStep> {
    vec![
        MutationStep::InstallBasePackages {
            kubeadm_version: update.clone(),
            kubernetes_version: current.clone(),
        },
        upgrade_step,
        MutationStep::InstallBasePackages {
            kubeadm_version: update.clone(),
            kubernetes_version: update.clone(),
        },
        MutationStep::RestartServices,
    ]
}

/// Current and target versions driving the packages of a path.
///
/// The first control-plane node follows its API server version; every other
/// path follows the kubelet.
fn version_pair(
    kind: UpgradeKind,
    status: &NodeStatus,
) -> Result<(&ClusterVersion, &ClusterVersion)> {
    let versions = &status.versions;
    match kind {
        UpgradeKind::FirstControlPlane => {
            let current = versions.current.api_server_version.as_ref().ok_or_else(|| {
                KnuError::Lookup(format!("API server version of {}", status.node_name()))
            })?;
            Ok((current, target_api_server_version(status)?))
        }
        UpgradeKind::SubsequentControlPlane | UpgradeKind::Worker => Ok((
            &versions.current.kubelet_version,
            &versions.update.kubelet_version,
        )),
    }
}

fn target_api_server_version(status: &NodeStatus) -> Result<&ClusterVersion> {
    Ok(status
        .versions
        .update
        .api_server_version
        .as_ref()
        .ok_or_else(|| {
            KnuError::Lookup(format!("target API server version of {}", status.node_name()))
        })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::fakes::{FakeCluster, catalog, control_plane, v, worker};
    use crate::upgrade::node::update_status;

    struct Fixture {
        cluster: FakeCluster,
        config: ClusterConfiguration,
        cluster_version: ClusterVersion,
        catalog: VersionCatalog,
    }

    impl Fixture {
        async fn new(cluster: FakeCluster) -> Self {
            let config = cluster.cluster_configuration().await.unwrap();
            let cluster_version = config.kubernetes_version().unwrap();
            Self {
                cluster,
                config,
                cluster_version,
                catalog: catalog(&["1.29.0", "1.30.0"]),
            }
        }

        fn ctx(&self) -> PathContext<'_> {
            PathContext {
                cluster: &self.cluster,
                cluster_configuration: &self.config,
                cluster_version: &self.cluster_version,
                catalog: &self.catalog,
                max_kubelet_skew: 1,
            }
        }

        async fn status(&self, node: &str) -> NodeStatus {
            update_status(&self.cluster, node, &self.cluster_version, &self.catalog)
                .await
                .unwrap()
        }
    }

    fn resolved(node: &str) -> Target {
        let mut target = Target::new("10.0.0.10");
        target.node_name = Some(node.to_string());
        target
    }

    #[test]
    fn test_build_pipeline_shape() {
        let steps = build_pipeline(&v("1.29.0"), &v("1.30.0"), MutationStep::KubeadmUpgradeNode);
        assert_eq!(
            steps,
            vec![
                MutationStep::InstallBasePackages {
                    kubeadm_version: v("1.30.0"),
                    kubernetes_version: v("1.29.0"),
                },
                MutationStep::KubeadmUpgradeNode,
                MutationStep::InstallBasePackages {
                    kubeadm_version: v("1.30.0"),
                    kubernetes_version: v("1.30.0"),
                },
                MutationStep::RestartServices,
            ]
        );
    }

    #[tokio::test]
    async fn test_up_to_date_skips_tolerance() {
        let f = Fixture::new(
            FakeCluster::new(vec![
                control_plane("cp-1", "1.30.0", "1.30.0"),
                worker("w-1", "1.30.0"),
            ])
            .with_cluster_version("1.30.0"),
        )
        .await;
        let status = f.status("cp-1").await;
        assert_eq!(decide(&f.ctx(), &status).await.unwrap(), Decision::UpToDate);
        assert_eq!(f.cluster.calls("worker_node_versions"), 0);
    }

    #[tokio::test]
    async fn test_first_control_plane_checks_target_version() {
        // Workers at 1.28 tolerate the current 1.29 but not the 1.30 target.
        let f = Fixture::new(FakeCluster::new(vec![
            control_plane("cp-1", "1.29.0", "1.29.0"),
            worker("w-1", "1.28.0"),
        ]))
        .await;
        let status = f.status("cp-1").await;
        assert!(status.is_first_control_plane_node_to_be_upgraded());

        match decide(&f.ctx(), &status).await.unwrap() {
            Decision::Blocked { reason } => assert!(reason.contains("1.30.0")),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_control_plane_sequence() {
        let f = Fixture::new(FakeCluster::new(vec![
            control_plane("cp-1", "1.29.0", "1.29.0"),
            control_plane("cp-2", "1.29.0", "1.29.0"),
            worker("w-1", "1.29.0"),
        ]))
        .await;
        let status = f.status("cp-1").await;

        let UpgradePath::Sequence { kind, steps } =
            select_path(&f.ctx(), &resolved("cp-1"), &status).await.unwrap()
        else {
            panic!("expected a sequence");
        };
        assert_eq!(kind, UpgradeKind::FirstControlPlane);
        assert_eq!(steps.len(), 4);
        match &steps[1] {
            MutationStep::KubeadmUpgradeApply { kubeadm_config } => {
                assert!(kubeadm_config.contains("kubernetesVersion: v1.30.0"));
                assert!(kubeadm_config.contains("name: cp-1"));
                assert!(kubeadm_config.contains("imageTag: etcd-for-1.30.0"));
            }
            other => panic!("unexpected step: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_control_plane_config_failure_aborts() {
        let f = Fixture::new(FakeCluster::new(vec![
            control_plane("cp-1", "1.29.0", "1.29.0"),
            worker("w-1", "1.29.0"),
        ]))
        .await;
        let status = f.status("cp-1").await;

        // Unresolved target: the init configuration cannot be built.
        let err = select_path(&f.ctx(), &Target::new("10.0.0.10"), &status)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<KnuError>().is_some());
    }

    #[tokio::test]
    async fn test_subsequent_control_plane_checks_cluster_version() {
        // cp-1 already runs 1.30; cp-2 follows. The worker at 1.28 does not
        // tolerate the running cluster version.
        let f = Fixture::new(
            FakeCluster::new(vec![
                control_plane("cp-1", "1.30.0", "1.30.0"),
                control_plane("cp-2", "1.29.0", "1.29.0"),
                worker("w-1", "1.28.0"),
            ])
            .with_cluster_version("1.30.0"),
        )
        .await;
        let status = f.status("cp-2").await;
        assert!(!status.is_first_control_plane_node_to_be_upgraded());

        match decide(&f.ctx(), &status).await.unwrap() {
            Decision::Blocked { reason } => {
                assert!(reason.contains("cluster version 1.30.0"));
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_subsequent_control_plane_sequence() {
        let f = Fixture::new(
            FakeCluster::new(vec![
                control_plane("cp-1", "1.30.0", "1.30.0"),
                control_plane("cp-2", "1.29.0", "1.29.0"),
                worker("w-1", "1.29.0"),
            ])
            .with_cluster_version("1.30.0"),
        )
        .await;
        let status = f.status("cp-2").await;

        let path = select_path(&f.ctx(), &resolved("cp-2"), &status)
            .await
            .unwrap();
        assert_eq!(
            path,
            UpgradePath::Sequence {
                kind: UpgradeKind::SubsequentControlPlane,
                steps: build_pipeline(&v("1.29.0"), &v("1.30.0"), MutationStep::KubeadmUpgradeNode),
            }
        );
        assert_eq!(f.cluster.calls("worker_node_versions"), 1);
    }

    #[tokio::test]
    async fn test_worker_skips_tolerance() {
        let f = Fixture::new(
            FakeCluster::new(vec![
                control_plane("cp-1", "1.30.0", "1.30.0"),
                worker("w-1", "1.28.0"),
            ])
            .with_cluster_version("1.30.0"),
        )
        .await;
        let status = f.status("w-1").await;

        assert_eq!(
            decide(&f.ctx(), &status).await.unwrap(),
            Decision::Upgrade(UpgradeKind::Worker)
        );
        assert_eq!(f.cluster.calls("worker_node_versions"), 0);
    }
}
