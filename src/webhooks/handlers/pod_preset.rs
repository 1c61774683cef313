//! PodPreset injection.
//!
//! `decode → exclusion check → match → conflict check → apply`, then the
//! difference between the admitted Pod and the injected copy is returned as
//! a patch. Conflicting presets are not a reason to reject a Pod: the Pod is
//! admitted as-is and the conflict is logged and counted.

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::core::DynamicObject;
use kube::core::admission::AdmissionRequest;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::{AdmissionError, Verdict, decode_object};
use crate::crd::PodPreset;
use crate::presets::{Conflicts, Exclusion, apply_presets, exclusion, matching_presets};
use crate::webhooks::patch::patch_between;
use crate::webhooks::server::WebhookState;

/// What injection decided for one Pod.
#[derive(Debug, Clone, PartialEq)]
pub enum Injection {
    Excluded(Exclusion),
    NoMatch,
    /// The matched presets conflict; the Pod is left alone.
    Conflicted {
        presets: Vec<String>,
        conflicts: Conflicts,
    },
    /// The Pod with every matched preset applied.
    Injected { presets: Vec<String>, pod: Box<Pod> },
}

/// Decide what injecting `presets` does to `pod` in `namespace`.
pub fn inject(pod: &Pod, namespace: &str, presets: &[PodPreset]) -> Result<Injection, AdmissionError> {
    if let Some(reason) = exclusion(pod) {
        return Ok(Injection::Excluded(reason));
    }

    let matched = matching_presets(presets, namespace, pod.labels())?;
    if matched.is_empty() {
        return Ok(Injection::NoMatch);
    }
    let names: Vec<String> = matched.iter().map(|p| p.name_any()).collect();

    let mut mutated = pod.clone();
    match apply_presets(&mut mutated, &matched) {
        Ok(()) => Ok(Injection::Injected {
            presets: names,
            pod: Box::new(mutated),
        }),
        Err(conflicts) => Ok(Injection::Conflicted {
            presets: names,
            conflicts,
        }),
    }
}

/// Turn an injection decision into a verdict for the admitted `pod`.
pub fn verdict(pod: &Pod, injection: &Injection) -> Result<Verdict, AdmissionError> {
    match injection {
        Injection::Injected { pod: mutated, .. } => {
            match patch_between(pod, mutated.as_ref()).map_err(AdmissionError::Patch)? {
                Some(patch) => Ok(Verdict::Patched(patch)),
                None => Ok(Verdict::Allowed),
            }
        }
        _ => Ok(Verdict::Allowed),
    }
}

/// Handle a Pod admission request.
pub async fn handle(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<Verdict, AdmissionError> {
    let pod: Pod = decode_object(request, "Pod")?;
    let namespace = request
        .namespace
        .clone()
        .or_else(|| pod.namespace())
        .unwrap_or_default();
    let pod_name = pod
        .metadata
        .name
        .clone()
        .or_else(|| pod.metadata.generate_name.clone())
        .unwrap_or_default();

    // skip the API call for pods that are never injected
    if let Some(reason) = exclusion(&pod) {
        debug!(uid = %request.uid, namespace = %namespace, pod = %pod_name, ?reason, "Pod excluded from PodPreset injection");
        return Ok(Verdict::Allowed);
    }

    let api: Api<PodPreset> = Api::namespaced(state.client.clone(), &namespace);
    let presets = api.list(&ListParams::default()).await?.items;

    let injection = inject(&pod, &namespace, &presets)?;
    match &injection {
        Injection::Conflicted { presets, conflicts } => {
            warn!(
                uid = %request.uid,
                namespace = %namespace,
                pod = %pod_name,
                presets = ?presets,
                conflicts = %conflicts,
                "PodPresets conflict, admitting pod without injection"
            );
            state.health.metrics.record_preset_conflict(&namespace);
        }
        Injection::Injected { presets, .. } => {
            info!(uid = %request.uid, namespace = %namespace, pod = %pod_name, presets = ?presets, "Injecting PodPresets");
        }
        Injection::Excluded(_) | Injection::NoMatch => {
            debug!(uid = %request.uid, namespace = %namespace, pod = %pod_name, "No PodPreset applies");
        }
    }

    verdict(&pod, &injection)
}
