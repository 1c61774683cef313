//! OperandRequest Custom Resource Definition.
//!
//! OperandRequest is owned by the Operand Deployment Lifecycle Manager. Only
//! the fields the namespace rewrite touches are modelled here.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// OperandRequest asks ODLM to deploy operands from an OperandRegistry.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operator.ibm.com",
    version = "v1alpha1",
    kind = "OperandRequest",
    plural = "operandrequests",
    shortname = "opreq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OperandRequestSpec {
    #[serde(default)]
    pub requests: Vec<Request>,
}

/// A set of operands requested from one OperandRegistry.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// Name of the OperandRegistry.
    pub registry: String,

    /// Namespace of the OperandRegistry. Empty means the request's namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry_namespace: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operands: Vec<Operand>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One operand of a request.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Operand {
    pub name: String,
}
