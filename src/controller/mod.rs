//! Controller keeping the webhook registration objects converged.
//!
//! - `webhook_config`: rendering and upsert of Mutating/ValidatingWebhookConfigurations
//! - `reconciler`: reconcile loop over the webhook certificate Secret
//! - `context`, `error`: shared state and error classification

pub mod context;
pub mod error;
pub mod reconciler;
pub mod webhook_config;

pub use error::{Error, Result};
pub use webhook_config::{
    Applied, CompositeReconciler, ServiceTarget, WebhookConfiguration, WebhookReconciler,
};
