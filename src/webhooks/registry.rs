//! Declarative table of the webhooks this process serves.
//!
//! The registry is built once in `main` and shared read-only between the
//! admission server (which routes on [`WebhookDescriptor::path`]) and the
//! configuration reconciler (which renders one registration object per
//! descriptor, named after [`WebhookDescriptor::name`]).

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use thiserror::Error;

/// Label opting a namespace into PodPreset injection.
pub const MANAGED_BY_WEBHOOK_LABEL: &str = "managed-by-common-service-webhook";

/// Which registration object a descriptor renders to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookKind {
    Mutating,
    Validating,
}

impl WebhookKind {
    /// Mutating webhooks fail open so an unavailable webhook never blocks
    /// workload creation; validating webhooks fail closed.
    pub fn failure_policy(self) -> &'static str {
        match self {
            WebhookKind::Mutating => "Ignore",
            WebhookKind::Validating => "Fail",
        }
    }
}

/// Admission operation a rule matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Connect,
    All,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationType::Create => "CREATE",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
            OperationType::Connect => "CONNECT",
            OperationType::All => "*",
        })
    }
}

/// Resource scope a rule matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Namespaced,
    Cluster,
    All,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Namespaced => "Namespaced",
            Scope::Cluster => "Cluster",
            Scope::All => "*",
        })
    }
}

/// Resources and operations a webhook is sent requests for.
///
/// Built fluently:
///
/// ```
/// use common_service_webhook::webhooks::registry::Rule;
///
/// let rule = Rule::new()
///     .one_resource("", "v1", "pods")
///     .for_update()
///     .for_create()
///     .namespaced_scope();
/// assert_eq!(rule.resources, vec!["pods"]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rule {
    pub api_groups: Vec<String>,
    pub api_versions: Vec<String>,
    pub resources: Vec<String>,
    pub operations: Vec<OperationType>,
    pub scope: Option<Scope>,
}

impl Rule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match a single resource of a single group version. The core group is `""`.
    pub fn one_resource(mut self, group: &str, version: &str, resource: &str) -> Self {
        self.api_groups = vec![group.to_string()];
        self.api_versions = vec![version.to_string()];
        self.resources = vec![resource.to_string()];
        self
    }

    pub fn for_operation(mut self, operation: OperationType) -> Self {
        if !self.operations.contains(&operation) {
            self.operations.push(operation);
        }
        self
    }

    pub fn for_create(self) -> Self {
        self.for_operation(OperationType::Create)
    }

    pub fn for_update(self) -> Self {
        self.for_operation(OperationType::Update)
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn namespaced_scope(self) -> Self {
        self.with_scope(Scope::Namespaced)
    }

    /// Render as the admissionregistration/v1 rule.
    pub fn to_k8s(&self) -> RuleWithOperations {
        RuleWithOperations {
            api_groups: Some(self.api_groups.clone()),
            api_versions: Some(self.api_versions.clone()),
            resources: Some(self.resources.clone()),
            operations: Some(self.operations.iter().map(ToString::to_string).collect()),
            scope: self.scope.map(|s| s.to_string()),
        }
    }
}

/// Which admission handler serves a descriptor's path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerKind {
    /// Inject matching PodPresets into Pods
    PodPreset,
    /// Rewrite OperandRequest registry namespaces through the mapping table
    OperandRequestNamespace,
    /// Validate the namespace mapping ConfigMap
    NamespaceMapping,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandlerKind::PodPreset => "podpreset",
            HandlerKind::OperandRequestNamespace => "operandrequest",
            HandlerKind::NamespaceMapping => "nsmapping",
        })
    }
}

/// One webhook: its route, its match rule and its registration object.
#[derive(Clone, Debug, PartialEq)]
pub struct WebhookDescriptor {
    /// Name of the rendered Mutating/ValidatingWebhookConfiguration
    pub name: String,
    /// Name of the single webhook inside the configuration
    pub webhook_name: String,
    /// HTTP path the API server posts AdmissionReviews to
    pub path: String,
    pub kind: WebhookKind,
    pub rule: Rule,
    pub namespace_selector: Option<LabelSelector>,
    pub handler: HandlerKind,
}

/// Errors raised while assembling the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("webhook configuration {0} is registered twice")]
    DuplicateName(String),

    #[error("webhook path {0} is registered twice")]
    DuplicatePath(String),
}

/// The set of webhooks served by this process, in registration order.
#[derive(Clone, Debug, Default)]
pub struct WebhookRegistry {
    descriptors: Vec<WebhookDescriptor>,
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Names and paths must be unique.
    pub fn add(&mut self, descriptor: WebhookDescriptor) -> Result<(), RegistryError> {
        if self.descriptors.iter().any(|d| d.name == descriptor.name) {
            return Err(RegistryError::DuplicateName(descriptor.name));
        }
        if self.descriptors.iter().any(|d| d.path == descriptor.path) {
            return Err(RegistryError::DuplicatePath(descriptor.path));
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn descriptors(&self) -> &[WebhookDescriptor] {
        &self.descriptors
    }

    pub fn by_path(&self, path: &str) -> Option<&WebhookDescriptor> {
        self.descriptors.iter().find(|d| d.path == path)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// PodPreset injection, scoped to namespaces labelled for it.
pub fn pod_preset_descriptor() -> WebhookDescriptor {
    WebhookDescriptor {
        name: "ibm-common-service-webhook-configuration".to_string(),
        webhook_name: "cs-podpreset.operator.ibm.com".to_string(),
        path: "/mutate-ibm-cs-pod".to_string(),
        kind: WebhookKind::Mutating,
        rule: Rule::new()
            .one_resource("", "v1", "pods")
            .for_update()
            .for_create()
            .namespaced_scope(),
        namespace_selector: Some(LabelSelector {
            match_labels: Some(BTreeMap::from([(
                MANAGED_BY_WEBHOOK_LABEL.to_string(),
                "true".to_string(),
            )])),
            match_expressions: None,
        }),
        handler: HandlerKind::PodPreset,
    }
}

/// OperandRequest registry namespace rewrite.
pub fn operand_request_descriptor() -> WebhookDescriptor {
    WebhookDescriptor {
        name: "ibm-operandrequest-webhook-configuration".to_string(),
        webhook_name: "ibm-cloudpak-operandrequest.operator.ibm.com".to_string(),
        path: "/mutate-ibm-cp-operandrequest".to_string(),
        kind: WebhookKind::Mutating,
        rule: Rule::new()
            .one_resource("operator.ibm.com", "v1alpha1", "operandrequests")
            .for_create()
            .for_update()
            .namespaced_scope(),
        namespace_selector: None,
        handler: HandlerKind::OperandRequestNamespace,
    }
}

/// Validation of the namespace mapping ConfigMap, scoped to `kube-public`.
pub fn namespace_mapping_descriptor() -> WebhookDescriptor {
    WebhookDescriptor {
        name: "ibm-cs-ns-mapping-webhook-configuration".to_string(),
        webhook_name: "cs-ns-mapping-configmap.operator.ibm.com".to_string(),
        path: "/validate-ibm-cs-ns-map".to_string(),
        kind: WebhookKind::Validating,
        rule: Rule::new()
            .one_resource("", "v1", "configmaps")
            .for_create()
            .for_update()
            .namespaced_scope(),
        namespace_selector: Some(LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "kubernetes.io/metadata.name".to_string(),
                operator: "In".to_string(),
                values: Some(vec![crate::nsmap::MAPPING_CONFIGMAP_NAMESPACE.to_string()]),
            }]),
        }),
        handler: HandlerKind::NamespaceMapping,
    }
}

/// The registry served by the operator.
///
/// The OperandRequest webhook is only registered when enabled, since its CRD
/// is installed by another operator.
pub fn default_registry(enable_operand_request: bool) -> Result<WebhookRegistry, RegistryError> {
    let mut registry = WebhookRegistry::new();
    registry.add(pod_preset_descriptor())?;
    if enable_operand_request {
        registry.add(operand_request_descriptor())?;
    }
    registry.add(namespace_mapping_descriptor())?;
    Ok(registry)
}
