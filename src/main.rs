//! common-service-webhook - admission webhooks for IBM Common Services.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Reads the environment configuration and builds the webhook registry
//! - Creates the Kubernetes client
//! - Starts the certificate controller, health server, and webhook server

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::signal;
use tracing::{error, info, warn};

use common_service_webhook::health::{HealthState, run_health_server};
use common_service_webhook::webhooks::default_registry;
use common_service_webhook::{OperatorConfig, WebhookState, run_controller, run_webhook_server};

/// Grace period for in-flight admission requests to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("common_service_webhook=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    info!("Starting common-service-webhook");

    let config = OperatorConfig::from_env()?;
    if !config.namespace_from_env {
        warn!("WATCH_NAMESPACE and POD_NAMESPACE not set, using 'default'");
    }

    let registry = Arc::new(default_registry(config.enable_operand_request_webhook)?);
    info!(
        namespace = %config.namespace,
        service = %config.service_name,
        webhooks = registry.len(),
        operandrequest_webhook = config.enable_operand_request_webhook,
        "Webhook registry built"
    );

    // rustls needs a process-wide crypto provider before the TLS listener starts
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Create shared health state
    let health_state = Arc::new(HealthState::new());

    // Start health server immediately
    let health_handle = {
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state).await {
                error!("Health server error: {}", e);
            }
        })
    };

    // Start the controller converging the webhook configurations
    let controller_handle = {
        let health_state = health_state.clone();
        let controller_client = client.clone();
        let registry = registry.clone();
        let service = config.service_target();
        let secret = config.cert_secret.clone();
        tokio::spawn(async move {
            run_controller(controller_client, registry, service, &secret, Some(health_state)).await;
        })
    };

    // Start the webhook server if certificates are available
    let cert_path = config.cert_path();
    let key_path = config.key_path();
    let webhook_handle = if cert_path.exists() && key_path.exists() {
        info!(cert_dir = %config.cert_dir.display(), "TLS certificates found, starting webhook server");
        let state = Arc::new(WebhookState::new(client.clone(), health_state.clone()));
        let registry = registry.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_webhook_server(state, &registry, &cert_path, &key_path).await {
                error!("Webhook server error: {}", e);
            }
        }))
    } else {
        warn!(cert_dir = %config.cert_dir.display(), "Webhook certificates not found, webhook server disabled");
        None
    };

    // Wait for any task to complete (or fail), or shutdown signal
    tokio::select! {
        result = controller_handle => {
            if let Err(e) = result {
                error!("Controller task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        result = async {
            match webhook_handle {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready so the Service stops routing admission requests here
            health_state.set_ready(false).await;
            info!("Marked webhook as not ready");

            info!(
                "Waiting {}s for in-flight admission requests to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("common-service-webhook stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the process cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
