//! Injection of matched presets into a Pod.
//!
//! Injection runs in two steps. [`check_conflicts`] performs every merge
//! against the unmodified Pod and reports all conflicts; [`apply_presets`]
//! repeats the merges for real and only writes to the Pod once all of them
//! succeeded, so a conflicting preset set never leaves a half-injected Pod.

use k8s_openapi::api::core::v1::{Container, Pod, PodDNSConfig, PodDNSConfigOption};
use kube::ResourceExt;

use super::merge::{Conflicts, merge_env, merge_env_from, merge_volume_mounts, merge_volumes};
use crate::crd::PodPreset;

/// Prefix of the annotation recording which preset version was applied.
pub const PODPRESET_ANNOTATION_PREFIX: &str = "cs-podpreset.operator.ibm.com/podpreset-";

/// Annotation the kubelet sets on static (mirror) Pods.
pub const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Annotation opting a Pod out of preset injection when set to `"true"`.
pub const OPT_OUT_ANNOTATION: &str = "podpreset.admission.kubernetes.io/exclude";

/// DNS option added to ClusterFirst Pods.
pub const SINGLE_REQUEST_REOPEN: &str = "single-request-reopen";

const DNS_CLUSTER_FIRST: &str = "ClusterFirst";

/// Why a Pod is left alone before any preset is considered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exclusion {
    MirrorPod,
    OptedOut,
}

/// Mirror Pods and Pods carrying the opt-out annotation are never mutated.
pub fn exclusion(pod: &Pod) -> Option<Exclusion> {
    let annotations = pod.annotations();
    if annotations.contains_key(MIRROR_POD_ANNOTATION) {
        return Some(Exclusion::MirrorPod);
    }
    if annotations.get(OPT_OUT_ANNOTATION).map(String::as_str) == Some("true") {
        return Some(Exclusion::OptedOut);
    }
    None
}

/// Annotation key recording that `preset` was applied.
pub fn applied_annotation_key(preset: &PodPreset) -> String {
    format!("{}{}", PODPRESET_ANNOTATION_PREFIX, preset.name_any())
}

/// Report every conflict injecting `presets` into `pod` would cause.
///
/// Volumes are checked once at Pod level; env and volume mounts once per
/// container. Env sources never conflict.
pub fn check_conflicts(pod: &Pod, presets: &[&PodPreset]) -> Result<(), Conflicts> {
    let mut conflicts = Conflicts::new();
    let Some(spec) = pod.spec.as_ref() else {
        return Ok(());
    };

    if let Err(e) = merge_volumes(spec.volumes.as_deref().unwrap_or_default(), presets) {
        conflicts.extend(e);
    }
    for container in &spec.containers {
        if let Err(e) = merge_env(container.env.as_deref().unwrap_or_default(), presets) {
            conflicts.extend(e);
        }
        if let Err(e) =
            merge_volume_mounts(container.volume_mounts.as_deref().unwrap_or_default(), presets)
        {
            conflicts.extend(e);
        }
    }

    conflicts.into_result()
}

/// Inject `presets` into `pod`.
///
/// Fails without touching the Pod when any preset conflicts. On success the
/// Pod carries one `cs-podpreset.operator.ibm.com/podpreset-<name>`
/// annotation per preset, valued with the preset's resourceVersion.
/// Presets already recorded at their current version are not applied again,
/// so a second application of the same preset versions changes nothing.
pub fn apply_presets(pod: &mut Pod, presets: &[&PodPreset]) -> Result<(), Conflicts> {
    if presets.is_empty() {
        return Ok(());
    }
    check_conflicts(pod, presets)?;

    let pending: Vec<&PodPreset> = presets
        .iter()
        .copied()
        .filter(|preset| !is_applied(pod, preset))
        .collect();

    if let Some(spec) = pod.spec.as_mut() {
        let volumes = merge_volumes(spec.volumes.as_deref().unwrap_or_default(), &pending)?;
        let containers = spec
            .containers
            .iter()
            .map(|c| injected_container(c, &pending))
            .collect::<Result<Vec<_>, _>>()?;

        set_unless_empty(&mut spec.volumes, volumes);
        spec.containers = containers;

        if spec.dns_policy.as_deref() == Some(DNS_CLUSTER_FIRST) {
            ensure_single_request_reopen(spec.dns_config.get_or_insert_with(PodDNSConfig::default));
        }
    }

    let annotations = pod.annotations_mut();
    for preset in presets {
        annotations.insert(
            applied_annotation_key(preset),
            preset.resource_version().unwrap_or_default(),
        );
    }

    Ok(())
}

/// Whether `pod` records `preset` at its current resourceVersion.
pub fn is_applied(pod: &Pod, preset: &PodPreset) -> bool {
    match (pod.annotations().get(&applied_annotation_key(preset)), preset.resource_version()) {
        (Some(recorded), Some(version)) => *recorded == version,
        _ => false,
    }
}

fn injected_container(container: &Container, presets: &[&PodPreset]) -> Result<Container, Conflicts> {
    let mut container = container.clone();

    let env = merge_env(container.env.as_deref().unwrap_or_default(), presets)?;
    let mounts = merge_volume_mounts(container.volume_mounts.as_deref().unwrap_or_default(), presets)?;
    let env_from = merge_env_from(container.env_from.as_deref().unwrap_or_default(), presets);

    set_unless_empty(&mut container.env, env);
    set_unless_empty(&mut container.volume_mounts, mounts);
    set_unless_empty(&mut container.env_from, env_from);
    Ok(container)
}

// An absent list stays absent when nothing was merged into it.
fn set_unless_empty<T>(field: &mut Option<Vec<T>>, merged: Vec<T>) {
    if !merged.is_empty() {
        *field = Some(merged);
    }
}

fn ensure_single_request_reopen(dns_config: &mut PodDNSConfig) {
    let wanted = PodDNSConfigOption {
        name: Some(SINGLE_REQUEST_REOPEN.to_string()),
        value: None,
    };
    let options = dns_config.options.get_or_insert_with(Vec::new);
    if !options.contains(&wanted) {
        options.push(wanted);
    }
}
