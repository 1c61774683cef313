//! common-service-webhook library crate
//!
//! Admission webhooks for IBM Common Services: PodPreset injection,
//! OperandRequest namespace remapping and validation of the namespace
//! mapping ConfigMap, plus the controller that keeps their registration
//! objects converged.

pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod nsmap;
pub mod presets;
pub mod webhooks;

pub use config::{ConfigError, OperatorConfig};
pub use health::HealthState;
pub use webhooks::{WEBHOOK_PORT, WebhookError, WebhookState, run_webhook_server};

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};
use tracing::{debug, error, info};

use controller::context::Context;
use controller::reconciler::{error_policy, reconcile};
use controller::{CompositeReconciler, ServiceTarget, WebhookReconciler};
use webhooks::WebhookRegistry;

/// Watcher configuration selecting only the webhook certificate Secret.
fn secret_watcher_config(secret_name: &str) -> WatcherConfig {
    WatcherConfig::default()
        .fields(&format!("metadata.name={secret_name}"))
        .any_semantic()
}

/// Run the certificate controller.
///
/// Watches the webhook certificate Secret in `namespace` and converges
/// every webhook of `registry` whenever it changes. It can be called from
/// main.rs or spawned as a background task during integration tests.
pub async fn run_controller(
    client: Client,
    registry: Arc<WebhookRegistry>,
    service: ServiceTarget,
    secret_name: &str,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = service.namespace.clone();
    info!(
        namespace = %namespace,
        secret = %secret_name,
        webhooks = registry.len(),
        "Starting webhook configuration controller"
    );

    // Mark as ready once we start the controller
    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let webhooks = CompositeReconciler::new(
        WebhookReconciler::new(client.clone(), service),
        registry,
        health_state.clone(),
    );
    let ctx = Arc::new(Context::new(client.clone(), webhooks, health_state));

    let secrets: Api<Secret> = Api::namespaced(client, &namespace);

    Controller::new(secrets, secret_watcher_config(secret_name))
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // The Secret may be rotated by delete and recreate.
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Secret no longer exists: {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    // This should never complete in normal operation
    error!("Controller stream ended unexpectedly");
}
