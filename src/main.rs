//! knu - Kubernetes node upgrade coordinator for kubeadm clusters.
//!
//! Upgrades one node per invocation:
//! - Resolves the node from its machine id
//! - Classifies it as first control plane, subsequent control plane or worker
//! - Checks the kubelet version skew of every worker
//! - Runs package, kubeadm and service steps over SSH

mod config;
mod deployments;
mod error;
mod k8s;
mod kubeadm;
mod upgrade;
mod version;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tracing::{debug, error, info};

use config::{Args, Config, OutputFormat, version_banner};
use deployments::Target;
use deployments::ssh::SshExecutor;
use k8s::cluster::KubeCluster;
use upgrade::apply::{self, UpgradeContext, UpgradeReport};
use version::catalog::VersionCatalog;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = Config::from_args(args);

    if let Err(e) = init_tracing(&config.log_level) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    debug!("Starting knu for target {}", config.target);

    if let Err(e) = run(&config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Main application logic.
async fn run(config: &Config) -> Result<()> {
    println!("{}", version_banner());

    let catalog = load_catalog(config)?;
    let cluster = KubeCluster::try_default().await?;
    let executor = SshExecutor::new(config.ssh.clone());

    let ctx = UpgradeContext {
        cluster: &cluster,
        executor: &executor,
        catalog: &catalog,
        max_kubelet_skew: config.max_kubelet_skew,
    };

    let mut target = Target::new(&config.target);
    let started_at = Utc::now();
    let outcome = apply::upgrade_node(&mut target, &ctx).await?;

    if config.output == OutputFormat::Json {
        let report = UpgradeReport::new(&target, outcome, started_at);
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}

/// Versions file when given, built-in catalog otherwise.
fn load_catalog(config: &Config) -> Result<VersionCatalog> {
    match &config.versions_file {
        Some(path) => {
            let catalog = VersionCatalog::from_yaml_file(path)?;
            info!(
                "Loaded {} supported versions from {}",
                catalog.len(),
                path.display()
            );
            Ok(catalog)
        }
        None => Ok(VersionCatalog::builtin()),
    }
}

/// Initialize tracing subscriber.
fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {}", e))?;

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
