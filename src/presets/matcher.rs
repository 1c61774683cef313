//! Selection of the presets that apply to a Pod.

use std::collections::BTreeMap;

use kube::ResourceExt;
use kube::core::{Selector, SelectorExt};
use tracing::debug;

use super::Error;
use crate::crd::PodPreset;

/// Return the presets from `presets` that apply to a Pod in `namespace`
/// carrying `labels`.
///
/// Presets never match across namespaces. A selector without requirements
/// matches every Pod in the namespace. The result keeps the order of
/// `presets`, which is the order the API server listed them in.
pub fn matching_presets<'a>(
    presets: &'a [PodPreset],
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Result<Vec<&'a PodPreset>, Error> {
    let mut matching = Vec::new();

    for preset in presets {
        if preset.namespace().as_deref() != Some(namespace) {
            continue;
        }

        let selector = Selector::try_from(preset.spec.selector.clone()).map_err(|source| {
            Error::InvalidSelector {
                preset: preset.name_any(),
                source,
            }
        })?;

        if !selector.matches(labels) {
            continue;
        }

        debug!(preset = %preset.name_any(), namespace = %namespace, "PodPreset matches pod labels");
        matching.push(preset);
    }

    Ok(matching)
}
