//! Node executor backed by the system `ssh` client.
//!
//! Every operation is rendered to a bash script and fed to `bash -s` on the
//! remote side, so nothing has to be copied to the node beforehand.

use std::path::PathBuf;
use std::process::{Output, Stdio};

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{NodeExecutor, Target};
use crate::error::KnuError;
use crate::upgrade::pipeline::MutationStep;

/// Where the init configuration is written on the node during `kubeadm upgrade apply`.
pub const KUBEADM_CONFIG_PATH: &str = "/tmp/kubeadm-init.conf";

const HEREDOC_MARKER: &str = "KNU_KUBEADM_CONFIG";

/// Connection settings for reaching targets over SSH.
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    /// Run remote scripts through `sudo`.
    pub sudo: bool,
    pub connect_timeout_secs: u64,
}

pub struct SshExecutor {
    settings: SshSettings,
}

impl SshExecutor {
    pub const fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    /// Arguments passed to `ssh` to run a script on `target`.
    pub fn ssh_args(&self, target: &Target) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.settings.connect_timeout_secs),
            "-p".to_string(),
            self.settings.port.to_string(),
        ];
        if let Some(identity) = &self.settings.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push(format!("{}@{}", self.settings.user, target.address));
        args.push(if self.settings.sudo {
            "sudo bash -s".to_string()
        } else {
            "bash -s".to_string()
        });
        args
    }

    async fn run_script(&self, target: &Target, script: &str) -> std::io::Result<Output> {
        let mut child = Command::new("ssh")
            .args(self.ssh_args(target))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await?;
        }

        child.wait_with_output().await
    }
}

#[async_trait]
impl NodeExecutor for SshExecutor {
    async fn download_file_contents(&self, target: &Target, path: &str) -> Result<String> {
        debug!("Downloading {} from {}", path, target);

        let script = format!("set -euo pipefail\ncat -- {}\n", shell_quote(path));
        let output = self
            .run_script(target, &script)
            .await
            .map_err(|e| KnuError::io(module_path!(), e))?;

        if !output.status.success() {
            return Err(KnuError::io(
                module_path!(),
                format!("cannot read {path} on {target}: {}", failure_message(&output)),
            )
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn apply(&self, target: &Target, step: &MutationStep) -> Result<()> {
        debug!("Running {} on {} via ssh", step.name(), target);

        let output = self
            .run_script(target, &render_step(step))
            .await
            .map_err(|e| KnuError::mutation(step.name(), format!("failed to run ssh: {e}")))?;

        if !output.status.success() {
            return Err(KnuError::mutation(step.name(), failure_message(&output)).into());
        }
        Ok(())
    }
}

/// Render a mutation step as a bash script.
pub fn render_step(step: &MutationStep) -> String {
    let body = match step {
        MutationStep::InstallBasePackages {
            kubeadm_version,
            kubernetes_version,
        } => format!(
            "zypper --non-interactive install --oldpackage \\\n  \
             kubeadm-{kubeadm_version} kubelet-{kubernetes_version} kubectl-{kubernetes_version}\n"
        ),
        MutationStep::KubeadmUpgradeApply { kubeadm_config } => {
            let config = kubeadm_config.trim_end();
            let marker = heredoc_marker(config);
            format!(
                "trap 'rm -f {KUBEADM_CONFIG_PATH}' EXIT\n\
                 cat > {KUBEADM_CONFIG_PATH} <<'{marker}'\n\
                 {config}\n\
                 {marker}\n\
                 kubeadm upgrade apply --config {KUBEADM_CONFIG_PATH} --yes\n"
            )
        }
        MutationStep::KubeadmUpgradeNode => "kubeadm upgrade node\n".to_string(),
        MutationStep::RestartServices => {
            "systemctl daemon-reload\nsystemctl restart kubelet\n".to_string()
        }
    };
    format!("set -euo pipefail\n{body}")
}

/// Heredoc terminator that no line of `contents` equals.
fn heredoc_marker(contents: &str) -> String {
    let mut marker = HEREDOC_MARKER.to_string();
    let mut suffix = 0;
    while contents.lines().any(|line| line == marker) {
        suffix += 1;
        marker = format!("{HEREDOC_MARKER}_{suffix}");
    }
    marker
}

/// Single-quote a string for bash.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Last non-empty stderr line, or the exit status.
fn failure_message(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map_or_else(
            || match output.status.code() {
                Some(code) => format!("exit status {code}"),
                None => "terminated by signal".to_string(),
            },
            str::to_string,
        )
}
