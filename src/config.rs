//! CLI configuration and argument parsing.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::deployments::ssh::SshSettings;
use crate::version::DEFAULT_MAX_KUBELET_SKEW;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Version with build metadata, shown by `--version` and at the start of a run.
pub const LONG_VERSION: &str = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION,
    COMMIT,
    BUILD_DATE
);

/// First line printed by every run.
pub fn version_banner() -> String {
    format!("knu {LONG_VERSION}")
}

/// Report format written to stdout when the upgrade call finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Upgrade one node of a kubeadm cluster.
///
/// Decides whether the node needs upgrading, checks that the worker fleet
/// tolerates the resulting control-plane version, and runs the package,
/// kubeadm and service steps on the node over SSH.
#[derive(Parser, Debug, Clone)]
#[command(name = "knu")]
#[command(about = "Kubernetes node upgrade coordinator for kubeadm clusters")]
#[command(version = LONG_VERSION)]
pub struct Args {
    /// Address of the node to upgrade
    #[arg(short, long)]
    pub target: String,

    /// SSH user
    #[arg(short, long, default_value = "root", env = "KNU_SSH_USER")]
    pub user: String,

    /// SSH port
    #[arg(short, long, default_value_t = 22)]
    pub port: u16,

    /// SSH private key
    #[arg(short, long, env = "KNU_SSH_IDENTITY_FILE")]
    pub identity_file: Option<PathBuf>,

    /// Run remote commands through sudo
    #[arg(short, long, default_value = "false")]
    pub sudo: bool,

    /// SSH connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// YAML file with supported versions (defaults to the built-in catalog)
    #[arg(long, env = "KNU_VERSIONS_FILE")]
    pub versions_file: Option<PathBuf>,

    /// Minor versions a kubelet may lag behind the API server
    #[arg(long, default_value_t = DEFAULT_MAX_KUBELET_SKEW, env = "KNU_MAX_KUBELET_SKEW")]
    pub max_kubelet_skew: u64,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "KNU_LOG_LEVEL")]
    pub log_level: String,
}

/// Application configuration derived from CLI args.
#[derive(Debug, Clone)]
pub struct Config {
    pub target: String,
    pub ssh: SshSettings,
    pub versions_file: Option<PathBuf>,
    pub max_kubelet_skew: u64,
    pub output: OutputFormat,
    pub log_level: String,
}

impl Config {
    /// Create config from CLI arguments.
    pub fn from_args(args: Args) -> Self {
        Self {
            target: args.target,
            ssh: SshSettings {
                user: args.user,
                port: args.port,
                identity_file: args.identity_file,
                sudo: args.sudo,
                connect_timeout_secs: args.connect_timeout,
            },
            versions_file: args.versions_file,
            max_kubelet_skew: args.max_kubelet_skew,
            output: args.output,
            log_level: args.log_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["knu", "--target", "10.0.0.10"]).unwrap();
        let config = Config::from_args(args);

        assert_eq!(config.target, "10.0.0.10");
        assert_eq!(config.ssh.user, "root");
        assert_eq!(config.ssh.port, 22);
        assert!(!config.ssh.sudo);
        assert!(config.ssh.identity_file.is_none());
        assert_eq!(config.ssh.connect_timeout_secs, 10);
        assert_eq!(config.max_kubelet_skew, DEFAULT_MAX_KUBELET_SKEW);
        assert_eq!(config.output, OutputFormat::Text);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_all_flags() {
        let args = Args::try_parse_from([
            "knu",
            "-t",
            "node-a",
            "-u",
            "sles",
            "-p",
            "2222",
            "-i",
            "/home/op/.ssh/id_ed25519",
            "--sudo",
            "--versions-file",
            "/etc/knu/versions.yaml",
            "--max-kubelet-skew",
            "2",
            "--output",
            "json",
        ])
        .unwrap();
        let config = Config::from_args(args);

        assert_eq!(config.ssh.user, "sles");
        assert_eq!(config.ssh.port, 2222);
        assert!(config.ssh.sudo);
        assert_eq!(
            config.ssh.identity_file,
            Some(PathBuf::from("/home/op/.ssh/id_ed25519"))
        );
        assert_eq!(
            config.versions_file,
            Some(PathBuf::from("/etc/knu/versions.yaml"))
        );
        assert_eq!(config.max_kubelet_skew, 2);
        assert_eq!(config.output, OutputFormat::Json);
    }

    #[test]
    fn test_version_banner() {
        let banner = version_banner();
        assert!(banner.starts_with(&format!("knu {VERSION} (commit: ")));
        assert!(banner.contains(BUILD_DATE));
    }

    #[test]
    fn test_target_is_required() {
        assert!(Args::try_parse_from(["knu"]).is_err());
    }
}
