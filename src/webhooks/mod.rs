//! Admission webhooks.
//!
//! - `registry`: the descriptors of every served webhook and their match rules
//! - `handlers`: the admission decision of each webhook
//! - `patch`: JSON patch generation between admitted and mutated objects
//! - `server`: the TLS server routing registry paths to handlers

pub mod handlers;
pub mod patch;
pub mod registry;
mod server;

pub use handlers::{AdmissionError, Verdict};
pub use registry::{
    HandlerKind, RegistryError, Rule, WebhookDescriptor, WebhookKind, WebhookRegistry,
    default_registry,
};
pub use server::{WEBHOOK_PORT, WebhookError, WebhookState, create_webhook_router, run_webhook_server};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
