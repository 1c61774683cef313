//! JSON patch generation between the admitted object and its mutated copy.

use json_patch::Patch;
use serde::Serialize;

/// Structural difference between `before` and `after` as an RFC 6902 patch.
///
/// Returns `None` when both serialize to the same document, so the caller
/// can answer with a plain allow instead of an empty patch.
pub fn patch_between<T: Serialize>(before: &T, after: &T) -> Result<Option<Patch>, serde_json::Error> {
    let before = serde_json::to_value(before)?;
    let after = serde_json::to_value(after)?;

    let patch = json_patch::diff(&before, &after);
    if patch.0.is_empty() {
        Ok(None)
    } else {
        Ok(Some(patch))
    }
}
