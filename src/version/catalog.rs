//! Supported Kubernetes versions and the add-on images kubeadm deploys with them.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ClusterVersion;
use crate::error::KnuError;

/// Image tags of the control-plane add-ons kubeadm manages for a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentVersions {
    pub etcd: String,
    pub coredns: String,
}

/// One supported Kubernetes version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub version: ClusterVersion,
    #[serde(flatten)]
    pub components: ComponentVersions,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    versions: Vec<CatalogEntry>,
}

/// Ordered set of versions this tool can upgrade to.
#[derive(Debug, Clone)]
pub struct VersionCatalog {
    entries: Vec<CatalogEntry>,
}

impl VersionCatalog {
    /// Build a catalog; entries are sorted and duplicate versions dropped.
    pub fn new(mut entries: Vec<CatalogEntry>) -> Self {
        entries.sort_by(|a, b| a.version.cmp(&b.version));
        entries.dedup_by(|a, b| a.version == b.version);
        Self { entries }
    }

    /// The catalog compiled into the binary.
    pub fn builtin() -> Self {
        let entry = |major, minor, patch, etcd: &str, coredns: &str| CatalogEntry {
            version: ClusterVersion::new(major, minor, patch),
            components: ComponentVersions {
                etcd: etcd.to_string(),
                coredns: coredns.to_string(),
            },
        };

        Self::new(vec![
            entry(1, 28, 15, "3.5.15-0", "v1.10.1"),
            entry(1, 29, 10, "3.5.15-0", "v1.11.1"),
            entry(1, 30, 6, "3.5.15-0", "v1.11.3"),
            entry(1, 31, 2, "3.5.15-0", "v1.11.3"),
        ])
    }

    /// Parse a catalog from YAML of the form `versions: [{version, etcd, coredns}]`.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(contents)
            .map_err(|e| KnuError::Encoding(format!("Invalid version catalog: {e}")))?;
        if file.versions.is_empty() {
            return Err(KnuError::Encoding("Version catalog is empty".to_string()).into());
        }
        Ok(Self::new(file.versions))
    }

    /// Load a catalog from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        debug!("Loading version catalog from {}", path.display());
        let contents = std::fs::read_to_string(path)
            .map_err(|e| KnuError::io(&path.display().to_string(), e))?;
        Self::from_yaml_str(&contents)
    }

    /// Newest version known to this tool. Used for reporting only.
    pub fn latest(&self) -> Option<&ClusterVersion> {
        self.entries.last().map(|e| &e.version)
    }

    /// Next upgrade step from `from`.
    ///
    /// Prefers the newest patch release of the same minor, otherwise the newest
    /// patch release of the next minor. Minor versions are never skipped.
    pub fn next_upgrade(&self, from: &ClusterVersion) -> Option<&ClusterVersion> {
        let newest_where = |pred: &dyn Fn(&ClusterVersion) -> bool| {
            self.entries
                .iter()
                .map(|e| &e.version)
                .filter(|v| pred(v))
                .max()
        };

        newest_where(&|v| v.same_minor(from) && v > from).or_else(|| {
            newest_where(&|v| v.major() == from.major() && v.minor() == from.minor() + 1)
        })
    }

    /// Add-on image tags for an exact version.
    pub fn components(&self, version: &ClusterVersion) -> Result<&ComponentVersions> {
        self.entries
            .iter()
            .find(|e| &e.version == version)
            .map(|e| &e.components)
            .ok_or_else(|| {
                KnuError::Lookup(format!("Version {version} is not in the version catalog")).into()
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
