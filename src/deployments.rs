//! Remote node handles and the executors that act on them.

pub mod ssh;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use crate::upgrade::pipeline::MutationStep;

/// A machine to upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Host name or address used to reach the machine.
    pub address: String,
    /// Cluster node name, set once the machine id has been resolved.
    pub node_name: Option<String>,
}

impl Target {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            node_name: None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_name {
            Some(name) => write!(f, "{name} ({})", self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Executes reads and mutation steps on a remote target.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Read a file from the target.
    async fn download_file_contents(&self, target: &Target, path: &str) -> Result<String>;

    /// Run one mutation step. Returns only success or failure.
    async fn apply(&self, target: &Target, step: &MutationStep) -> Result<()>;
}
