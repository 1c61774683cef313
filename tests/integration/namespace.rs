//! RAII namespace management for isolated tests.
//!
//! Each test can create its own namespace that is automatically
//! cleaned up when the test completes.
//!
//! IMPORTANT: Tests using TestNamespace must use `#[tokio::test(flavor = "multi_thread")]`
//! to support synchronous cleanup via `block_in_place`.

use common_service_webhook::webhooks::registry::MANAGED_BY_WEBHOOK_LABEL;
use k8s_openapi::api::core::v1::Namespace;
use kube::Client;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// A test namespace that is automatically deleted when dropped.
///
/// Use this to create isolated namespaces for each test to prevent
/// interference between tests running in parallel.
///
/// IMPORTANT: Tests using this must use `#[tokio::test(flavor = "multi_thread")]`
pub struct TestNamespace {
    client: Client,
    name: String,
    /// Track if cleanup has already been initiated
    cleanup_initiated: AtomicBool,
}

impl TestNamespace {
    /// Create a new test namespace with a unique suffix.
    ///
    /// The namespace name will be `{prefix}-{uuid}` to ensure uniqueness.
    pub async fn create(client: Client, prefix: &str) -> Self {
        Self::create_with_labels(client, prefix, BTreeMap::new()).await
    }

    /// Create a namespace the PodPreset webhook is registered for.
    pub async fn create_injected(client: Client, prefix: &str) -> Self {
        let labels = BTreeMap::from([(MANAGED_BY_WEBHOOK_LABEL.to_string(), "true".to_string())]);
        Self::create_with_labels(client, prefix, labels).await
    }

    async fn create_with_labels(
        client: Client,
        prefix: &str,
        mut labels: BTreeMap<String, String>,
    ) -> Self {
        let suffix = Uuid::new_v4().to_string()[..8].to_string();
        let name = format!("{}-{}", prefix, suffix);

        let ns_api: Api<Namespace> = Api::all(client.clone());

        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "integration-test".to_string(),
        );
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };

        ns_api
            .create(&PostParams::default(), &ns)
            .await
            .unwrap_or_else(|e| panic!("Failed to create test namespace {}: {}", name, e));

        tracing::info!(namespace = %name, "Created test namespace");

        Self {
            client,
            name,
            cleanup_initiated: AtomicBool::new(false),
        }
    }

    /// Get the name of the test namespace.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get an API client for resources in this namespace.
    pub fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.name)
    }
}

/// Automatic cleanup on drop - synchronously deletes the namespace.
///
/// PodPresets and Pods carry no finalizers, so deleting the namespace
/// removes everything a test created in it.
impl Drop for TestNamespace {
    fn drop(&mut self) {
        if self.cleanup_initiated.swap(true, Ordering::SeqCst) {
            return;
        }

        let name = self.name.clone();
        let client = self.client.clone();

        tracing::debug!("Drop: cleaning up namespace {}", name);

        tokio::task::block_in_place(|| {
            let handle = tokio::runtime::Handle::current();
            handle.block_on(async {
                let ns_api: Api<Namespace> = Api::all(client);
                let dp = DeleteParams {
                    propagation_policy: Some(kube::api::PropagationPolicy::Background),
                    ..Default::default()
                };

                match ns_api.delete(&name, &dp).await {
                    Ok(_) => {
                        tracing::debug!("Drop: namespace {} deletion initiated", name);
                    }
                    Err(kube::Error::Api(e)) if e.code == 404 => {
                        tracing::debug!("Drop: namespace {} already deleted", name);
                    }
                    Err(e) => {
                        tracing::warn!("Drop: failed to delete namespace {}: {}", name, e);
                    }
                }
            });
        });
    }
}
