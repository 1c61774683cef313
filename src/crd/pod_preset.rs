//! PodPreset Custom Resource Definition.
//!
//! A PodPreset describes environment variables, env sources, volumes and
//! volume mounts to inject into every Pod of its namespace that matches the
//! preset's label selector.

use k8s_openapi::api::core::v1::{EnvFromSource, EnvVar, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// PodPreset injects shared configuration into matching Pods.
///
/// Example:
/// ```yaml
/// apiVersion: operator.ibm.com/v1alpha1
/// kind: PodPreset
/// metadata:
///   name: proxy-settings
///   namespace: ibm-common-services
/// spec:
///   selector:
///     matchLabels:
///       app: auth-idp
///   env:
///     - name: HTTPS_PROXY
///       value: http://proxy.internal:3128
///   volumes:
///     - name: trust-bundle
///       configMap:
///         name: trust-bundle
///   volumeMounts:
///     - name: trust-bundle
///       mountPath: /etc/pki/trust
/// ```
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operator.ibm.com",
    version = "v1alpha1",
    kind = "PodPreset",
    plural = "podpresets",
    namespaced,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PodPresetSpec {
    /// Label query over Pods in the preset's namespace.
    /// A selector without requirements matches every Pod.
    #[serde(default)]
    pub selector: LabelSelector,

    /// Environment variables to inject into every container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Env sources appended to every container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_from: Vec<EnvFromSource>,

    /// Volumes to add to the Pod.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Volume mounts to add to every container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
}
