//! Admission handlers.
//!
//! Each handler turns one decoded [`AdmissionRequest`] into a [`Verdict`].
//! The decision logic of every handler is a pure function over already
//! fetched inputs; the async wrappers only add the single API call a
//! handler needs.

pub mod ns_mapping;
pub mod operand_request;
pub mod pod_preset;

use json_patch::Patch;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::error;

use super::registry::HandlerKind;
use super::server::WebhookState;

/// HTTP-equivalent status of a denial
pub const DENIED_CODE: u16 = 403;

/// Errors a handler can hit while deciding a request.
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("failed to decode {kind}: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("admission request carries no object")]
    MissingObject,

    #[error("malformed namespace mapping config: {0}")]
    MappingConfig(#[from] serde_yaml::Error),

    #[error(transparent)]
    Selector(#[from] crate::presets::Error),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to build JSON patch: {0}")]
    Patch(#[source] serde_json::Error),
}

impl AdmissionError {
    /// Malformed input is the caller's fault; everything else is ours.
    pub fn status_code(&self) -> u16 {
        match self {
            AdmissionError::Decode { .. }
            | AdmissionError::MissingObject
            | AdmissionError::MappingConfig(_) => 400,
            AdmissionError::Selector(_) | AdmissionError::Kube(_) | AdmissionError::Patch(_) => {
                500
            }
        }
    }
}

/// Outcome of one admission request.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Admit unmodified
    Allowed,
    /// Admit with a JSON patch
    Patched(Patch),
    /// Reject with a reason
    Denied(String),
    /// The handler failed
    Errored { code: u16, message: String },
}

impl Verdict {
    /// Metric label of the outcome
    pub fn outcome(&self) -> &'static str {
        match self {
            Verdict::Allowed => "allowed",
            Verdict::Patched(_) => "patched",
            Verdict::Denied(_) => "denied",
            Verdict::Errored { .. } => "errored",
        }
    }

    /// Build the response to `request`.
    pub fn into_response(self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        match self {
            Verdict::Allowed => AdmissionResponse::from(request),
            Verdict::Patched(patch) => match AdmissionResponse::from(request).with_patch(patch) {
                Ok(response) => response,
                Err(e) => {
                    error!(uid = %request.uid, error = %e, "Failed to serialize patch");
                    errored(request, 500, format!("patch serialization error: {e}"))
                }
            },
            Verdict::Denied(reason) => errored(request, DENIED_CODE, reason),
            Verdict::Errored { code, message } => errored(request, code, message),
        }
    }
}

impl From<AdmissionError> for Verdict {
    fn from(e: AdmissionError) -> Self {
        Verdict::Errored {
            code: e.status_code(),
            message: e.to_string(),
        }
    }
}

fn errored(request: &AdmissionRequest<DynamicObject>, code: u16, message: String) -> AdmissionResponse {
    let mut response = AdmissionResponse::from(request).deny(message);
    response.result.code = code;
    response
}

/// Decode the request object as `T`.
pub fn decode_object<T: DeserializeOwned>(
    request: &AdmissionRequest<DynamicObject>,
    kind: &'static str,
) -> Result<T, AdmissionError> {
    let object = request.object.as_ref().ok_or(AdmissionError::MissingObject)?;
    let value = serde_json::to_value(object).map_err(|source| AdmissionError::Decode { kind, source })?;
    serde_json::from_value(value).map_err(|source| AdmissionError::Decode { kind, source })
}

/// Route a request to the handler registered for its path.
pub async fn dispatch(
    handler: HandlerKind,
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> Verdict {
    let result = match handler {
        HandlerKind::PodPreset => pod_preset::handle(state, request).await,
        HandlerKind::OperandRequestNamespace => operand_request::handle(state, request).await,
        HandlerKind::NamespaceMapping => ns_mapping::handle(request),
    };

    result.unwrap_or_else(Verdict::from)
}
