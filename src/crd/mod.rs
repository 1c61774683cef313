//! Custom Resource Definitions used by the admission webhooks.
//!
//! - `PodPreset`: shared env/volume configuration injected into Pods
//! - `OperandRequest`: ODLM request whose registry namespace may be remapped

mod operand_request;
mod pod_preset;

pub use operand_request::*;
pub use pod_preset::*;
