//! Validation of the namespace mapping ConfigMap.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::core::DynamicObject;
use kube::core::admission::AdmissionRequest;
use tracing::{info, warn};

use super::{AdmissionError, Verdict, decode_object};
use crate::nsmap::{MAPPING_CONFIGMAP_NAME, MAPPING_CONFIGMAP_NAMESPACE, NamespaceMappingTable};

/// Whether a request targets the mapping ConfigMap at all.
pub fn is_mapping_config_map(namespace: Option<&str>, name: &str) -> bool {
    namespace == Some(MAPPING_CONFIGMAP_NAMESPACE) && name == MAPPING_CONFIGMAP_NAME
}

/// Validate the table carried by `cm`.
pub fn validate(cm: &ConfigMap) -> Result<Verdict, AdmissionError> {
    let table = NamespaceMappingTable::from_config_map(cm)?;
    match table.validate() {
        Ok(()) => Ok(Verdict::Allowed),
        Err(violation) => Ok(Verdict::Denied(violation.to_string())),
    }
}

/// Handle a ConfigMap admission request.
pub fn handle(request: &AdmissionRequest<DynamicObject>) -> Result<Verdict, AdmissionError> {
    if !is_mapping_config_map(request.namespace.as_deref(), &request.name) {
        return Ok(Verdict::Allowed);
    }

    info!(uid = %request.uid, "Validating namespace mapping ConfigMap");
    let cm: ConfigMap = decode_object(request, "ConfigMap")?;
    let verdict = validate(&cm)?;
    if let Verdict::Denied(reason) = &verdict {
        warn!(uid = %request.uid, reason = %reason, "Rejecting namespace mapping ConfigMap");
    }
    Ok(verdict)
}
