//! Shared context for the certificate controller.
//!
//! The Context struct holds shared state that is passed to the reconciler,
//! including the composite webhook reconciler and event recorder.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use kube::Client;
use kube::Resource;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};

use super::webhook_config::CompositeReconciler;
use crate::health::HealthState;

/// Reporting controller name for events
pub const FIELD_MANAGER: &str = "ibm-common-service-webhook";

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Converges every registered webhook configuration
    pub webhooks: CompositeReconciler,
    /// Event reporter identity
    reporter: Reporter,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, webhooks: CompositeReconciler, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            client,
            webhooks,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
            health_state,
        }
    }

    /// Create an event recorder for publishing Kubernetes events
    fn recorder(&self) -> Recorder {
        Recorder::new(self.client.clone(), self.reporter.clone())
    }

    async fn publish(&self, secret: &Secret, type_: EventType, reason: &str, note: Option<String>) {
        let object_ref = secret.object_ref(&());
        if let Err(e) = self
            .recorder()
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note,
                    action: "ReconcileWebhookConfigurations".into(),
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }

    /// Publish a normal event on the certificate Secret
    pub async fn publish_normal_event(&self, secret: &Secret, reason: &str, note: Option<String>) {
        self.publish(secret, EventType::Normal, reason, note).await;
    }

    /// Publish a warning event on the certificate Secret
    pub async fn publish_warning_event(&self, secret: &Secret, reason: &str, note: Option<String>) {
        self.publish(secret, EventType::Warning, reason, note).await;
    }
}
