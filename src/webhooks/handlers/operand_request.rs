//! OperandRequest registry namespace rewrite.
//!
//! Tenants whose namespace is listed in the namespace mapping table get
//! their requests pointed at the tenant's own common-services namespace
//! instead of the default one.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kube::core::DynamicObject;
use kube::core::admission::AdmissionRequest;
use kube::ResourceExt;
use tracing::{debug, info};

use super::{AdmissionError, Verdict, decode_object};
use crate::crd::OperandRequest;
use crate::nsmap::{MAPPING_CONFIGMAP_NAME, MAPPING_CONFIGMAP_NAMESPACE, NamespaceMappingTable};
use crate::webhooks::patch::patch_between;
use crate::webhooks::server::WebhookState;

/// Point every request on the default registry namespace at the target the
/// table maps `namespace` to. Returns the number of rewritten requests.
///
/// Only the first mapping listing `namespace` is used.
pub fn rewrite_registry_namespaces(
    operand_request: &mut OperandRequest,
    namespace: &str,
    table: &NamespaceMappingTable,
) -> usize {
    let Some(target) = table.target_for(namespace) else {
        return 0;
    };
    let default_namespace = table.default_namespace();

    let mut rewritten = 0;
    for request in &mut operand_request.spec.requests {
        if request.registry_namespace == default_namespace {
            request.registry_namespace = target.to_string();
            rewritten += 1;
        }
    }
    rewritten
}

/// Decide the verdict for `operand_request` given the mapping ConfigMap, if any.
pub fn mutate(
    operand_request: &OperandRequest,
    mapping: Option<&ConfigMap>,
) -> Result<Verdict, AdmissionError> {
    let Some(cm) = mapping else {
        return Ok(Verdict::Allowed);
    };
    let table = NamespaceMappingTable::from_config_map(cm)?;
    let namespace = operand_request.namespace().unwrap_or_default();

    let mut mutated = operand_request.clone();
    if rewrite_registry_namespaces(&mut mutated, &namespace, &table) == 0 {
        return Ok(Verdict::Allowed);
    }

    match patch_between(operand_request, &mutated).map_err(AdmissionError::Patch)? {
        Some(patch) => Ok(Verdict::Patched(patch)),
        None => Ok(Verdict::Allowed),
    }
}

/// Handle an OperandRequest admission request.
pub async fn handle(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<Verdict, AdmissionError> {
    let mut operand_request: OperandRequest = decode_object(request, "OperandRequest")?;
    if operand_request.metadata.namespace.is_none() {
        operand_request.metadata.namespace = request.namespace.clone();
    }

    let api: Api<ConfigMap> = Api::namespaced(state.client.clone(), MAPPING_CONFIGMAP_NAMESPACE);
    let mapping = api.get_opt(MAPPING_CONFIGMAP_NAME).await?;
    if mapping.is_none() {
        debug!(
            uid = %request.uid,
            "ConfigMap {}/{} not found, leaving OperandRequest alone",
            MAPPING_CONFIGMAP_NAMESPACE,
            MAPPING_CONFIGMAP_NAME
        );
    }

    let verdict = mutate(&operand_request, mapping.as_ref())?;
    if matches!(verdict, Verdict::Patched(_)) {
        info!(
            uid = %request.uid,
            namespace = ?operand_request.namespace(),
            name = %operand_request.name_any(),
            "Rewriting OperandRequest registry namespaces"
        );
    }
    Ok(verdict)
}
