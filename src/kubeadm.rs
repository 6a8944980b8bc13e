//! kubeadm configuration handling for `kubeadm upgrade apply`.

use std::fmt;

use anyhow::Result;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::deployments::Target;
use crate::error::KnuError;
use crate::version::ClusterVersion;
use crate::version::catalog::VersionCatalog;

pub const KUBEADM_GROUP: &str = "kubeadm.k8s.io";

/// kubeadm config API version this tool emits.
pub const UPGRADE_SCHEMA_VERSION: &str = "v1beta2";

/// API group and version of a kubeadm configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }

    /// Schema used for upgrade configurations: `kubeadm.k8s.io/v1beta2`.
    pub fn upgrade_default() -> Self {
        Self::new(KUBEADM_GROUP, UPGRADE_SCHEMA_VERSION)
    }
}

impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.version)
    }
}

/// The cluster-wide kubeadm `ClusterConfiguration`.
///
/// Kept as a raw YAML mapping so fields this tool does not know survive a
/// read-modify-write cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterConfiguration(Mapping);

impl ClusterConfiguration {
    /// Parse the `ClusterConfiguration` document stored in `kubeadm-config`.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(contents)
            .map_err(|e| KnuError::Encoding(format!("Invalid ClusterConfiguration: {e}")))?;
        match value {
            Value::Mapping(mapping) => Ok(Self(mapping)),
            _ => Err(KnuError::Encoding(
                "ClusterConfiguration is not a YAML mapping".to_string(),
            )
            .into()),
        }
    }

    pub const fn as_mapping(&self) -> &Mapping {
        &self.0
    }

    /// The version in `kubernetesVersion`, i.e. the current cluster version.
    pub fn kubernetes_version(&self) -> Result<ClusterVersion> {
        let raw = get_nested(&self.0, &["kubernetesVersion"])
            .and_then(Value::as_str)
            .ok_or_else(|| {
                KnuError::Lookup("kubernetesVersion in ClusterConfiguration".to_string())
            })?;
        Ok(ClusterVersion::parse(raw)?)
    }

    pub fn set_kubernetes_version(&mut self, version: &ClusterVersion) {
        set_nested(
            &mut self.0,
            &["kubernetesVersion"],
            Value::String(version.to_kubernetes_string()),
        );
    }

    /// Returns true if etcd is managed outside of the cluster.
    pub fn has_external_etcd(&self) -> bool {
        get_nested(&self.0, &["etcd", "external"]).is_some()
    }

    /// Pin the etcd and CoreDNS images kubeadm deploys for `version`.
    pub fn set_container_images(&mut self, version: &ClusterVersion, catalog: &VersionCatalog) -> Result<()> {
        let components = catalog.components(version)?;
        if !self.has_external_etcd() {
            set_nested(
                &mut self.0,
                &["etcd", "local", "imageTag"],
                Value::String(components.etcd.clone()),
            );
        }
        set_nested(
            &mut self.0,
            &["dns", "imageTag"],
            Value::String(components.coredns.clone()),
        );
        Ok(())
    }
}

/// Init configuration handed to `kubeadm upgrade apply`.
#[derive(Debug, Clone, PartialEq)]
pub struct InitConfiguration {
    pub node_name: String,
    pub cluster_configuration: ClusterConfiguration,
}

/// Build the init configuration for upgrading `target` to `version`.
///
/// The target's node name must already be resolved.
pub fn init_configuration_for_target(
    target: &Target,
    cluster_configuration: &ClusterConfiguration,
    version: &ClusterVersion,
    catalog: &VersionCatalog,
) -> Result<InitConfiguration> {
    let node_name = target
        .node_name
        .clone()
        .ok_or_else(|| KnuError::Lookup(format!("Node name of target {}", target.address)))?;

    let mut cluster_configuration = cluster_configuration.clone();
    cluster_configuration.set_kubernetes_version(version);
    cluster_configuration.set_container_images(version, catalog)?;

    Ok(InitConfiguration {
        node_name,
        cluster_configuration,
    })
}

/// Serialize an init configuration as a two-document kubeadm YAML stream.
pub fn marshal_init_configuration(
    config: &InitConfiguration,
    group_version: &GroupVersion,
) -> Result<String> {
    if group_version.group != KUBEADM_GROUP || group_version.version != UPGRADE_SCHEMA_VERSION {
        return Err(KnuError::Encoding(format!(
            "Unsupported kubeadm configuration schema: {group_version}"
        ))
        .into());
    }
    debug!(
        "Marshaling InitConfiguration for {} as {}",
        config.node_name, group_version
    );

    let api_version = Value::String(group_version.to_string());

    let mut init = Mapping::new();
    init.insert(Value::String("apiVersion".into()), api_version.clone());
    init.insert(
        Value::String("kind".into()),
        Value::String("InitConfiguration".into()),
    );
    set_nested(
        &mut init,
        &["nodeRegistration", "name"],
        Value::String(config.node_name.clone()),
    );

    let mut cluster = config.cluster_configuration.as_mapping().clone();
    cluster.insert(Value::String("apiVersion".into()), api_version);
    cluster.insert(
        Value::String("kind".into()),
        Value::String("ClusterConfiguration".into()),
    );

    let encode = |doc: &Mapping| {
        serde_yaml::to_string(doc)
            .map_err(|e| KnuError::Encoding(format!("Failed to marshal kubeadm config: {e}")))
    };

    Ok(format!("{}---\n{}", encode(&init)?, encode(&cluster)?))
}

fn get_nested<'a>(map: &'a Mapping, path: &[&str]) -> Option<&'a Value> {
    let (head, rest) = path.split_first()?;
    let value = map.get(*head)?;
    if rest.is_empty() {
        return Some(value);
    }
    value.as_mapping().and_then(|inner| get_nested(inner, rest))
}

/// Set a value at `path`, replacing non-mapping intermediates.
fn set_nested(map: &mut Mapping, path: &[&str], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.insert(Value::String((*head).to_string()), value);
        return;
    }
    if !map.get(*head).is_some_and(Value::is_mapping) {
        map.insert(
            Value::String((*head).to_string()),
            Value::Mapping(Mapping::new()),
        );
    }
    if let Some(Value::Mapping(inner)) = map.get_mut(*head) {
        set_nested(inner, rest, value);
    }
}
