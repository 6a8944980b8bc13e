//! Kubernetes component version parsing, ordering and kubelet skew policy.

pub mod catalog;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::KnuError;

/// Maximum number of minor versions a kubelet may lag behind the API server.
pub const DEFAULT_MAX_KUBELET_SKEW: u64 = 1;

/// A `major.minor.patch` version of a cluster component (API server, kubelet, kubeadm).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterVersion(semver::Version);

impl ClusterVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    /// Parse a dotted version such as `1.30.2` or `v1.30.2`.
    ///
    /// Exactly three numeric components are required; pre-release and build
    /// suffixes are rejected.
    pub fn parse(version: &str) -> Result<Self, KnuError> {
        let trimmed = version.trim();
        let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let parsed = semver::Version::parse(bare)
            .map_err(|_| KnuError::InvalidVersion(version.to_string()))?;
        if !parsed.pre.is_empty() || !parsed.build.is_empty() {
            return Err(KnuError::InvalidVersion(version.to_string()));
        }

        Ok(Self(parsed))
    }

    pub const fn major(&self) -> u64 {
        self.0.major
    }

    pub const fn minor(&self) -> u64 {
        self.0.minor
    }

    /// Returns true if both versions share major and minor.
    pub const fn same_minor(&self, other: &Self) -> bool {
        self.0.major == other.0.major && self.0.minor == other.0.minor
    }

    /// Render with the `v` prefix Kubernetes uses in manifests and kubeadm configs.
    pub fn to_kubernetes_string(&self) -> String {
        format!("v{self}")
    }
}

impl fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0.major, self.0.minor, self.0.patch)
    }
}

impl FromStr for ClusterVersion {
    type Err = KnuError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ClusterVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClusterVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Returns true if a kubelet at `kubelet` can run against an API server at `api_server`.
///
/// The kubelet must share the major version, must not be newer than the API
/// server, and may lag behind by at most `max_minor_skew` minor versions.
pub const fn kubelet_tolerates(
    kubelet: &ClusterVersion,
    api_server: &ClusterVersion,
    max_minor_skew: u64,
) -> bool {
    kubelet.major() == api_server.major()
        && kubelet.minor() <= api_server.minor()
        && api_server.minor() - kubelet.minor() <= max_minor_skew
}
