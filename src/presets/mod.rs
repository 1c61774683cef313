//! PodPreset matching, merging and injection.
//!
//! - [`matcher`]: which presets apply to a Pod
//! - [`merge`]: conflict-safe merge of env, volumes, mounts and env sources
//! - [`inject`]: dry-run conflict check and application onto a Pod

pub mod inject;
pub mod matcher;
pub mod merge;

pub use inject::{Exclusion, apply_presets, check_conflicts, exclusion};
pub use matcher::matching_presets;
pub use merge::{Axis, Conflict, Conflicts, Field};

use kube::core::ParseExpressionError;
use thiserror::Error;

/// Errors raised while selecting or applying presets.
#[derive(Error, Debug)]
pub enum Error {
    /// A preset carries a selector that cannot be evaluated
    #[error("label selector conversion failed for PodPreset {preset}: {source}")]
    InvalidSelector {
        preset: String,
        #[source]
        source: ParseExpressionError,
    },
}
