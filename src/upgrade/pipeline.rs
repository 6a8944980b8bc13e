//! Mutation steps and the fail-fast pipeline executor.

use std::fmt;

use anyhow::Result;
use tracing::{debug, info};

use crate::deployments::{NodeExecutor, Target};
use crate::version::ClusterVersion;

/// One side-effecting operation issued to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationStep {
    /// Pin kubeadm and the kubelet/kubectl packages to the given versions.
    InstallBasePackages {
        kubeadm_version: ClusterVersion,
        kubernetes_version: ClusterVersion,
    },
    /// `kubeadm upgrade apply` with a marshaled init configuration.
    KubeadmUpgradeApply { kubeadm_config: String },
    /// `kubeadm upgrade node`.
    KubeadmUpgradeNode,
    RestartServices,
}

impl MutationStep {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InstallBasePackages { .. } => "kubernetes.install-base-packages",
            Self::KubeadmUpgradeApply { .. } => "kubeadm.upgrade.apply",
            Self::KubeadmUpgradeNode => "kubeadm.upgrade.node",
            Self::RestartServices => "kubernetes.restart-services",
        }
    }
}

impl fmt::Display for MutationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstallBasePackages {
                kubeadm_version,
                kubernetes_version,
            } => write!(
                f,
                "{} (kubeadm {kubeadm_version}, kubernetes {kubernetes_version})",
                self.name()
            ),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Run `steps` in order against `target`, stopping at the first failure.
///
/// The failing step's error is returned as is. Steps that already ran are not
/// rolled back.
pub async fn execute(
    executor: &dyn NodeExecutor,
    target: &Target,
    steps: &[MutationStep],
) -> Result<()> {
    let total = steps.len();
    for (index, step) in steps.iter().enumerate() {
        println!("[{}/{}] {}", index + 1, total, step);
        info!("Applying step {}/{} on {}: {}", index + 1, total, target, step);

        executor.apply(target, step).await?;

        debug!("Step {} completed on {}", step.name(), target);
    }
    Ok(())
}
