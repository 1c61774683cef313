//! Admission webhook server.
//!
//! Serves one POST route per registered webhook over TLS. The API server
//! reaches it through the webhook Service; the certificate is mounted from
//! the webhook certificate Secret at `/etc/webhook/certs/`.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, routing::post};
use axum_server::tls_rustls::RustlsConfig;
use kube::Client;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::handlers::{Verdict, dispatch};
use super::registry::{WebhookDescriptor, WebhookRegistry};
use crate::health::HealthState;

/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 8443;

/// Shared state for webhook handlers
pub struct WebhookState {
    pub client: Client,
    pub health: Arc<HealthState>,
}

impl WebhookState {
    pub fn new(client: Client, health: Arc<HealthState>) -> Self {
        Self { client, health }
    }
}

/// Create the webhook router with one route per descriptor
pub fn create_webhook_router(state: Arc<WebhookState>, registry: &WebhookRegistry) -> Router {
    registry
        .descriptors()
        .iter()
        .fold(Router::new(), |router, descriptor| {
            let state = state.clone();
            let descriptor = descriptor.clone();
            let path = descriptor.path.clone();
            router.route(
                &path,
                post(move |Json(review): Json<AdmissionReview<DynamicObject>>| async move {
                    Json(review_response(&state, &descriptor, review).await)
                }),
            )
        })
}

async fn review_response(
    state: &WebhookState,
    descriptor: &WebhookDescriptor,
    review: AdmissionReview<DynamicObject>,
) -> AdmissionReview<DynamicObject> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(webhook = %descriptor.handler, error = %e, "Failed to extract admission request");
            return AdmissionResponse::invalid(format!("Invalid AdmissionReview: {e}")).into_review();
        }
    };

    debug!(
        uid = %request.uid,
        webhook = %descriptor.handler,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = %request.name,
        "Processing admission request"
    );

    let started = Instant::now();
    let verdict = dispatch(descriptor.handler, state, &request).await;
    let elapsed = started.elapsed().as_secs_f64();

    match &verdict {
        Verdict::Allowed | Verdict::Patched(_) => {
            debug!(uid = %request.uid, webhook = %descriptor.handler, outcome = verdict.outcome(), "Admission request allowed");
        }
        Verdict::Denied(reason) => {
            warn!(uid = %request.uid, webhook = %descriptor.handler, reason = %reason, "Admission request denied");
        }
        Verdict::Errored { code, message } => {
            error!(uid = %request.uid, webhook = %descriptor.handler, code = code, message = %message, "Admission request failed");
        }
    }
    state
        .health
        .metrics
        .record_admission(&descriptor.handler.to_string(), verdict.outcome(), elapsed);

    verdict.into_response(&request).into_review()
}

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[source] std::io::Error),

    #[error("Webhook server error: {0}")]
    Server(#[source] std::io::Error),
}

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:8443 and serves every registered webhook path.
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    registry: &WebhookRegistry,
    cert_path: &Path,
    key_path: &Path,
) -> Result<(), WebhookError> {
    let app = create_webhook_router(state, registry);

    let config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(WebhookError::TlsConfig)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], WEBHOOK_PORT));
    info!(
        port = WEBHOOK_PORT,
        paths = ?registry.descriptors().iter().map(|d| d.path.as_str()).collect::<Vec<_>>(),
        "Webhook server listening with TLS"
    );

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(WebhookError::Server)?;

    Ok(())
}
