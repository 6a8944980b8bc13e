//! Worker kubelet tolerance of a candidate API server version.

use anyhow::Result;
use tracing::{debug, warn};

use crate::k8s::ClusterState;
use crate::upgrade::node::NodeVersionInfo;
use crate::version::{ClusterVersion, kubelet_tolerates};

/// Workers whose kubelet cannot run against `candidate`.
pub fn intolerant_workers<'a>(
    workers: &'a [NodeVersionInfo],
    candidate: &ClusterVersion,
    max_kubelet_skew: u64,
) -> Vec<&'a NodeVersionInfo> {
    workers
        .iter()
        .filter(|w| !kubelet_tolerates(&w.kubelet_version, candidate, max_kubelet_skew))
        .collect()
}

/// Returns true if every worker node can operate against an API server at `candidate`.
pub async fn all_worker_nodes_tolerate_version(
    cluster: &dyn ClusterState,
    candidate: &ClusterVersion,
    max_kubelet_skew: u64,
) -> Result<bool> {
    let workers = cluster.worker_node_versions().await?;
    let intolerant = intolerant_workers(&workers, candidate, max_kubelet_skew);

    for worker in &intolerant {
        warn!(
            "Worker {} (kubelet {}) does not tolerate API server {} (max skew: {} minor)",
            worker.node_name, worker.kubelet_version, candidate, max_kubelet_skew
        );
    }
    debug!(
        "{}/{} workers tolerate API server {}",
        workers.len() - intolerant.len(),
        workers.len(),
        candidate
    );

    Ok(intolerant.is_empty())
}
