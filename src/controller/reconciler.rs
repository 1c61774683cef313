//! Reconciliation of the webhook certificate Secret.
//!
//! Every change of the Secret (and every resync) hands its CA bundle to the
//! composite webhook reconciler, so the registration objects always trust
//! the certificate the webhook server currently serves.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, warn};

use super::context::Context;
use super::error::Error;

/// Secret key holding the CA bundle
pub const CA_BUNDLE_KEY: &str = "ca.crt";
/// Fallback key for self-signed certificates
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Resync interval after a successful reconciliation
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// CA bundle carried by the certificate Secret.
///
/// Prefers `ca.crt` and falls back to `tls.crt`; empty values count as absent.
pub fn ca_bundle(secret: &Secret) -> Result<Vec<u8>, Error> {
    let data = secret.data.as_ref();
    [CA_BUNDLE_KEY, TLS_CERT_KEY]
        .iter()
        .filter_map(|key| data.and_then(|d| d.get(*key)))
        .map(|bytes| bytes.0.clone())
        .find(|bytes| !bytes.is_empty())
        .ok_or_else(|| Error::MissingCaBundle(secret.name_any()))
}

/// Main reconciliation function
pub async fn reconcile(secret: Arc<Secret>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start_time = Instant::now();
    let name = secret.name_any();
    debug!(name = %name, "Reconciling webhook configurations");

    let ca = match ca_bundle(&secret) {
        Ok(ca) => ca,
        Err(e) => {
            ctx.publish_warning_event(&secret, "MissingCaBundle", Some(e.to_string()))
                .await;
            return Err(e);
        }
    };

    let written = ctx.webhooks.reconcile_all(&ca).await?;
    if written > 0 {
        ctx.publish_normal_event(
            &secret,
            "WebhookConfigurationsUpdated",
            Some(format!("{written} webhook configuration(s) now trust the current CA bundle")),
        )
        .await;
    }

    if let Some(ref health_state) = ctx.health_state {
        health_state.touch_last_reconcile();
    }
    info!(
        name = %name,
        duration_ms = start_time.elapsed().as_millis() as u64,
        "Webhook configurations reconciled"
    );
    Ok(Action::requeue(RESYNC_INTERVAL))
}

/// Error policy for the controller
pub fn error_policy(secret: Arc<Secret>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = secret.name_any();

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}
