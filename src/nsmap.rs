//! Common-service namespace mapping table.
//!
//! The table lives as YAML under the `common-service-maps.yaml` key of the
//! `kube-public/common-service-maps` ConfigMap:
//!
//! ```yaml
//! controlNamespace: cs-control
//! defaultCsNs: ibm-common-services
//! namespaceMapping:
//!   - requested-from-namespace: [cp4i, cp4i-apps]
//!     map-to-common-service-namespace: cp4i-cs
//! ```
//!
//! Older tables write `requested-from-namespace` as a single string and name
//! the target `map-common-service-namespace`; both spellings are accepted.

use std::collections::HashSet;

use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Namespace holding the mapping ConfigMap.
pub const MAPPING_CONFIGMAP_NAMESPACE: &str = "kube-public";
/// Name of the mapping ConfigMap.
pub const MAPPING_CONFIGMAP_NAME: &str = "common-service-maps";
/// Data key holding the YAML table.
pub const MAPPING_DATA_KEY: &str = "common-service-maps.yaml";
/// Registry namespace used when the table does not name one.
pub const DEFAULT_CS_NAMESPACE: &str = "ibm-common-services";

/// The parsed mapping table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceMappingTable {
    #[serde(default)]
    pub control_namespace: String,

    #[serde(default, rename = "defaultCsNs", skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,

    #[serde(default, rename = "namespaceMapping")]
    pub mappings: Vec<NamespaceMapping>,
}

/// One tenant: the namespaces it requests from and the namespace it maps to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NamespaceMapping {
    #[serde(
        default,
        rename = "requested-from-namespace",
        deserialize_with = "one_or_many"
    )]
    pub request_namespaces: Vec<String>,

    #[serde(
        default,
        rename = "map-to-common-service-namespace",
        alias = "map-common-service-namespace"
    )]
    pub target_namespace: String,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(ns)) => vec![ns],
        Some(OneOrMany::Many(list)) => list,
    })
}

/// A rule of the mapping table that a proposed table breaks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingViolation {
    #[error("controlNamespace: {0} cannot be the same as one of the map-to-common-service-namespace")]
    ControlIsTarget(String),

    #[error("map-to-common-service-namespace: {0} exists in other namespace mappings")]
    DuplicateTarget(String),

    #[error("controlNamespace: {0} cannot be the same as one of the requested-from-namespace")]
    ControlIsRequest(String),

    #[error("requested-from-namespace: {0} appears more than once in the namespace mappings")]
    DuplicateRequest(String),
}

impl NamespaceMappingTable {
    /// Parse the YAML table.
    ///
    /// Blank content is an empty table.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Parse the table out of the mapping ConfigMap.
    pub fn from_config_map(cm: &ConfigMap) -> Result<Self, serde_yaml::Error> {
        let content = cm
            .data
            .as_ref()
            .and_then(|data| data.get(MAPPING_DATA_KEY))
            .map(String::as_str)
            .unwrap_or_default();
        Self::from_yaml(content)
    }

    /// Registry namespace that requests are expected to point at.
    pub fn default_namespace(&self) -> &str {
        match self.default_namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => DEFAULT_CS_NAMESPACE,
        }
    }

    /// Target namespace of the first mapping that lists `namespace`.
    pub fn target_for(&self, namespace: &str) -> Option<&str> {
        self.mappings
            .iter()
            .find(|m| m.request_namespaces.iter().any(|ns| ns == namespace))
            .map(|m| m.target_namespace.as_str())
    }

    /// Check the table invariants, stopping at the first violation.
    ///
    /// Mappings are checked in table order. Within a mapping the target is
    /// checked first, then each request namespace.
    pub fn validate(&self) -> Result<(), MappingViolation> {
        let control = self.control_namespace.as_str();
        let mut targets = HashSet::new();
        let mut requests = HashSet::new();

        for mapping in &self.mappings {
            let target = mapping.target_namespace.as_str();
            if control == target {
                return Err(MappingViolation::ControlIsTarget(control.to_string()));
            }
            if !targets.insert(target) {
                return Err(MappingViolation::DuplicateTarget(target.to_string()));
            }

            for ns in &mapping.request_namespaces {
                if control == ns {
                    return Err(MappingViolation::ControlIsRequest(control.to_string()));
                }
                if !requests.insert(ns.as_str()) {
                    return Err(MappingViolation::DuplicateRequest(ns.clone()));
                }
            }
        }

        Ok(())
    }
}
