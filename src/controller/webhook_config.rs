//! Rendering and convergence of webhook registration objects.
//!
//! Every descriptor of the registry becomes one cluster-scoped
//! `MutatingWebhookConfiguration` or `ValidatingWebhookConfiguration`
//! holding exactly one webhook with exactly one rule. The live object is
//! converged with a read-modify-write guarded by its resourceVersion; a
//! writer losing that race re-reads and starts the upsert over.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use k8s_openapi::ByteString;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, ServiceReference, ValidatingWebhook,
    ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::error::{Error, Result};
use crate::health::HealthState;
use crate::webhooks::registry::{WebhookDescriptor, WebhookKind, WebhookRegistry};

/// Label marking registration objects owned by this operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "ibm-common-service-webhook";

/// Seconds the API server waits for a webhook answer
pub const WEBHOOK_TIMEOUT_SECONDS: i32 = 10;

/// Attempts of one upsert before a conflict is reported upwards
pub const MAX_UPSERT_ATTEMPTS: u32 = 5;

const ADMISSION_REVIEW_VERSIONS: &[&str] = &["v1"];
const MATCH_POLICY_EXACT: &str = "Exact";
const SIDE_EFFECTS_NONE: &str = "None";
const REINVOCATION_NEVER: &str = "Never";

/// The Service the API server calls the webhooks through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceTarget {
    pub namespace: String,
    pub name: String,
    pub port: i32,
}

/// A registration object kind the reconciler can converge.
pub trait WebhookConfiguration:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: &'static str;

    /// Render the desired object for `descriptor`.
    fn render(descriptor: &WebhookDescriptor, service: &ServiceTarget, ca_bundle: &[u8]) -> Self;

    /// Whether this live object already carries everything `desired` sets.
    fn is_converged(&self, desired: &Self) -> bool;

    /// Take the desired webhooks and labels, keeping the rest of the live metadata.
    fn adopt(&mut self, desired: Self);
}

fn metadata(descriptor: &WebhookDescriptor) -> ObjectMeta {
    ObjectMeta {
        name: Some(descriptor.name.clone()),
        labels: Some(BTreeMap::from([(
            MANAGED_BY_LABEL.to_string(),
            MANAGED_BY_VALUE.to_string(),
        )])),
        ..Default::default()
    }
}

fn client_config(descriptor: &WebhookDescriptor, service: &ServiceTarget, ca_bundle: &[u8]) -> WebhookClientConfig {
    WebhookClientConfig {
        ca_bundle: Some(ByteString(ca_bundle.to_vec())),
        service: Some(ServiceReference {
            namespace: service.namespace.clone(),
            name: service.name.clone(),
            path: Some(descriptor.path.clone()),
            port: Some(service.port),
        }),
        url: None,
    }
}

// The API server defaults an absent selector to `{}`; rendering it
// explicitly keeps the convergence check stable.
fn selector_or_default(selector: &Option<LabelSelector>) -> Option<LabelSelector> {
    Some(selector.clone().unwrap_or_default())
}

fn labels_converged(live: &ObjectMeta, desired: &ObjectMeta) -> bool {
    let live_labels = live.labels.clone().unwrap_or_default();
    desired
        .labels
        .iter()
        .flatten()
        .all(|(k, v)| live_labels.get(k) == Some(v))
}

fn adopt_labels(live: &mut ObjectMeta, desired: ObjectMeta) {
    live.labels
        .get_or_insert_with(BTreeMap::new)
        .extend(desired.labels.unwrap_or_default());
}

impl WebhookConfiguration for MutatingWebhookConfiguration {
    const KIND: &'static str = "MutatingWebhookConfiguration";

    fn render(descriptor: &WebhookDescriptor, service: &ServiceTarget, ca_bundle: &[u8]) -> Self {
        MutatingWebhookConfiguration {
            metadata: metadata(descriptor),
            webhooks: Some(vec![MutatingWebhook {
                name: descriptor.webhook_name.clone(),
                admission_review_versions: ADMISSION_REVIEW_VERSIONS.iter().map(|v| v.to_string()).collect(),
                client_config: client_config(descriptor, service, ca_bundle),
                failure_policy: Some(descriptor.kind.failure_policy().to_string()),
                match_policy: Some(MATCH_POLICY_EXACT.to_string()),
                namespace_selector: selector_or_default(&descriptor.namespace_selector),
                object_selector: Some(LabelSelector::default()),
                reinvocation_policy: Some(REINVOCATION_NEVER.to_string()),
                rules: Some(vec![descriptor.rule.to_k8s()]),
                side_effects: SIDE_EFFECTS_NONE.to_string(),
                timeout_seconds: Some(WEBHOOK_TIMEOUT_SECONDS),
                ..Default::default()
            }]),
        }
    }

    fn is_converged(&self, desired: &Self) -> bool {
        self.webhooks == desired.webhooks && labels_converged(&self.metadata, &desired.metadata)
    }

    fn adopt(&mut self, desired: Self) {
        self.webhooks = desired.webhooks;
        adopt_labels(&mut self.metadata, desired.metadata);
    }
}

impl WebhookConfiguration for ValidatingWebhookConfiguration {
    const KIND: &'static str = "ValidatingWebhookConfiguration";

    fn render(descriptor: &WebhookDescriptor, service: &ServiceTarget, ca_bundle: &[u8]) -> Self {
        ValidatingWebhookConfiguration {
            metadata: metadata(descriptor),
            webhooks: Some(vec![ValidatingWebhook {
                name: descriptor.webhook_name.clone(),
                admission_review_versions: ADMISSION_REVIEW_VERSIONS.iter().map(|v| v.to_string()).collect(),
                client_config: client_config(descriptor, service, ca_bundle),
                failure_policy: Some(descriptor.kind.failure_policy().to_string()),
                match_policy: Some(MATCH_POLICY_EXACT.to_string()),
                namespace_selector: selector_or_default(&descriptor.namespace_selector),
                object_selector: Some(LabelSelector::default()),
                rules: Some(vec![descriptor.rule.to_k8s()]),
                side_effects: SIDE_EFFECTS_NONE.to_string(),
                timeout_seconds: Some(WEBHOOK_TIMEOUT_SECONDS),
                ..Default::default()
            }]),
        }
    }

    fn is_converged(&self, desired: &Self) -> bool {
        self.webhooks == desired.webhooks && labels_converged(&self.metadata, &desired.metadata)
    }

    fn adopt(&mut self, desired: Self) {
        self.webhooks = desired.webhooks;
        adopt_labels(&mut self.metadata, desired.metadata);
    }
}

/// The write an upsert needs, decided from the live object.
#[derive(Clone, Debug, PartialEq)]
pub enum Plan<K> {
    Create(K),
    /// Replace with the live resourceVersion carried in the object
    Replace(K),
    Unchanged,
}

/// Decide how to converge `live` towards `desired`.
pub fn plan<K: WebhookConfiguration>(live: Option<K>, desired: K) -> Plan<K> {
    match live {
        None => Plan::Create(desired),
        Some(live) if live.is_converged(&desired) => Plan::Unchanged,
        Some(mut live) => {
            live.adopt(desired);
            Plan::Replace(live)
        }
    }
}

/// What an upsert ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

async fn try_upsert<K: WebhookConfiguration>(api: &Api<K>, desired: &K) -> Result<Applied> {
    let name = desired.name_any();
    let live = api.get_opt(&name).await?;

    match plan(live, desired.clone()) {
        Plan::Create(object) => {
            api.create(&PostParams::default(), &object).await?;
            Ok(Applied::Created)
        }
        Plan::Replace(object) => {
            api.replace(&name, &PostParams::default(), &object).await?;
            Ok(Applied::Updated)
        }
        Plan::Unchanged => Ok(Applied::Unchanged),
    }
}

/// Create or update `desired`, re-reading and retrying on 409 conflicts.
pub async fn upsert<K: WebhookConfiguration>(api: &Api<K>, desired: &K) -> Result<Applied> {
    let name = desired.name_any();
    for attempt in 1..=MAX_UPSERT_ATTEMPTS {
        match try_upsert(api, desired).await {
            Err(e) if e.is_conflict() => {
                debug!(kind = K::KIND, name = %name, attempt, "Conflicting write, re-reading");
            }
            result => return result,
        }
    }
    Err(Error::ConflictRetriesExhausted {
        kind: K::KIND,
        name,
        attempts: MAX_UPSERT_ATTEMPTS,
    })
}

/// Converges the registration object of single descriptors.
#[derive(Clone)]
pub struct WebhookReconciler {
    client: Client,
    service: ServiceTarget,
}

impl WebhookReconciler {
    pub fn new(client: Client, service: ServiceTarget) -> Self {
        Self { client, service }
    }

    pub fn service(&self) -> &ServiceTarget {
        &self.service
    }

    /// Upsert the registration object of `descriptor` with `ca_bundle`.
    pub async fn reconcile(&self, descriptor: &WebhookDescriptor, ca_bundle: &[u8]) -> Result<Applied> {
        match descriptor.kind {
            WebhookKind::Mutating => {
                let api: Api<MutatingWebhookConfiguration> = Api::all(self.client.clone());
                upsert(&api, &MutatingWebhookConfiguration::render(descriptor, &self.service, ca_bundle)).await
            }
            WebhookKind::Validating => {
                let api: Api<ValidatingWebhookConfiguration> = Api::all(self.client.clone());
                upsert(&api, &ValidatingWebhookConfiguration::render(descriptor, &self.service, ca_bundle)).await
            }
        }
    }
}

/// Fans one CA bundle out to every registered descriptor.
///
/// Stops at the first failure; the remaining descriptors are converged by
/// the next trigger.
#[derive(Clone)]
pub struct CompositeReconciler {
    reconciler: WebhookReconciler,
    registry: Arc<WebhookRegistry>,
    health_state: Option<Arc<HealthState>>,
}

impl CompositeReconciler {
    pub fn new(
        reconciler: WebhookReconciler,
        registry: Arc<WebhookRegistry>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            reconciler,
            registry,
            health_state,
        }
    }

    /// Converge every descriptor; returns the number of objects written.
    pub async fn reconcile_all(&self, ca_bundle: &[u8]) -> Result<usize> {
        let mut written = 0;
        for descriptor in self.registry.descriptors() {
            match self.reconciler.reconcile(descriptor, ca_bundle).await {
                Ok(applied) => {
                    if applied == Applied::Unchanged {
                        debug!(configuration = %descriptor.name, "Webhook configuration up to date");
                    } else {
                        info!(configuration = %descriptor.name, ?applied, "Webhook configuration converged");
                        written += 1;
                    }
                    if let Some(ref health) = self.health_state {
                        health.metrics.record_reconcile(&descriptor.name);
                    }
                }
                Err(e) => {
                    warn!(configuration = %descriptor.name, error = %e, "Failed to converge webhook configuration");
                    if let Some(ref health) = self.health_state {
                        health.metrics.record_reconcile_error(&descriptor.name);
                    }
                    return Err(e);
                }
            }
        }
        Ok(written)
    }
}
