//! Upgrade coordinator for a single node.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::node;
use super::path::{self, PathContext, UpgradeKind, UpgradePath};
use super::pipeline;
use crate::deployments::{NodeExecutor, Target};
use crate::k8s::ClusterState;
use crate::version::catalog::VersionCatalog;

/// File holding the stable host identifier matched against `status.nodeInfo.machineID`.
pub const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// How an upgrade call ended. `Blocked` is a deferral, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum UpgradeOutcome {
    UpToDate,
    Blocked { reason: String },
    Upgraded { kind: UpgradeKind },
}

/// Collaborators and policy for an upgrade call.
pub struct UpgradeContext<'a> {
    pub cluster: &'a dyn ClusterState,
    pub executor: &'a dyn NodeExecutor,
    pub catalog: &'a VersionCatalog,
    pub max_kubelet_skew: u64,
}

/// Summary of one upgrade call, printed with `--output json`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeReport {
    pub target: String,
    pub node_name: Option<String>,
    #[serde(flatten)]
    pub outcome: UpgradeOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl UpgradeReport {
    pub fn new(target: &Target, outcome: UpgradeOutcome, started_at: DateTime<Utc>) -> Self {
        Self {
            target: target.address.clone(),
            node_name: target.node_name.clone(),
            outcome,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Upgrade the node behind `target`, if needed and if the cluster allows it.
///
/// Any collaborator error aborts the call and is returned unchanged.
pub async fn upgrade_node(target: &mut Target, ctx: &UpgradeContext<'_>) -> Result<UpgradeOutcome> {
    let node_name = resolve_node_name(target, ctx).await?;

    let cluster_configuration = ctx.cluster.cluster_configuration().await?;
    let cluster_version = cluster_configuration.kubernetes_version()?;
    let latest_version = ctx
        .catalog
        .latest()
        .map_or_else(|| "unknown".to_string(), ToString::to_string);
    println!("Current Kubernetes cluster version: {cluster_version}");
    println!("Latest Kubernetes version: {latest_version}");
    println!();

    let status = node::update_status(ctx.cluster, &node_name, &cluster_version, ctx.catalog).await?;

    let path_ctx = PathContext {
        cluster: ctx.cluster,
        cluster_configuration: &cluster_configuration,
        cluster_version: &cluster_version,
        catalog: ctx.catalog,
        max_kubelet_skew: ctx.max_kubelet_skew,
    };

    match path::select_path(&path_ctx, target, &status).await? {
        UpgradePath::UpToDate => {
            println!("Node {node_name} is up to date");
            Ok(UpgradeOutcome::UpToDate)
        }
        UpgradePath::Blocked { reason } => {
            println!("Node {target} upgrade deferred: {reason}");
            info!("Upgrade of {} deferred: {}", target, reason);
            Ok(UpgradeOutcome::Blocked { reason })
        }
        UpgradePath::Sequence { kind, steps } => {
            println!("Performing node {target} upgrade ({kind}), please wait...");
            pipeline::execute(ctx.executor, target, &steps).await?;
            println!("Node {target} successfully upgraded");
            Ok(UpgradeOutcome::Upgraded { kind })
        }
    }
}

/// Resolve the cluster node name of `target` from its machine id.
async fn resolve_node_name(target: &mut Target, ctx: &UpgradeContext<'_>) -> Result<String> {
    let machine_id = ctx
        .executor
        .download_file_contents(target, MACHINE_ID_PATH)
        .await?;
    let machine_id = machine_id.trim_end_matches('\n');

    let node = ctx.cluster.node_by_machine_id(machine_id).await?;
    debug!(
        "Target {} is node {} (machine id {})",
        target.address, node.name, node.machine_id
    );

    target.node_name = Some(node.name.clone());
    Ok(node.name)
}
