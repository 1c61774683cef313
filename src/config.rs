//! Process configuration read from the environment.

use std::path::PathBuf;

use thiserror::Error;

use crate::controller::ServiceTarget;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_SERVICE_NAME: &str = "ibm-common-service-webhook";
pub const DEFAULT_SERVICE_PORT: i32 = 443;
pub const DEFAULT_CERT_SECRET: &str = "ibm-common-service-webhook-cert";
pub const DEFAULT_CERT_DIR: &str = "/etc/webhook/certs";

/// Errors raised while reading the environment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a port number, got {value:?}")]
    InvalidPort { var: &'static str, value: String },
}

/// Operator configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace the operator runs in; hosts the webhook Service and Secret
    pub namespace: String,
    /// Whether the namespace came from the environment
    pub namespace_from_env: bool,
    pub service_name: String,
    pub service_port: i32,
    pub cert_secret: String,
    pub cert_dir: PathBuf,
    pub enable_operand_request_webhook: bool,
}

impl OperatorConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the configuration through `lookup`; unset and empty values fall
    /// back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let namespace = get("WATCH_NAMESPACE").or_else(|| get("POD_NAMESPACE"));
        let namespace_from_env = namespace.is_some();

        let service_port = match get("WEBHOOK_SERVICE_PORT") {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map(i32::from)
                .map_err(|_| ConfigError::InvalidPort {
                    var: "WEBHOOK_SERVICE_PORT",
                    value,
                })?,
            None => DEFAULT_SERVICE_PORT,
        };

        Ok(Self {
            namespace: namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            namespace_from_env,
            service_name: get("WEBHOOK_SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            service_port,
            cert_secret: get("WEBHOOK_CERT_SECRET").unwrap_or_else(|| DEFAULT_CERT_SECRET.to_string()),
            cert_dir: PathBuf::from(get("WEBHOOK_CERT_DIR").unwrap_or_else(|| DEFAULT_CERT_DIR.to_string())),
            enable_operand_request_webhook: get("ENABLE_OPREQ_WEBHOOK")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
        })
    }

    pub fn cert_path(&self) -> PathBuf {
        self.cert_dir.join("tls.crt")
    }

    pub fn key_path(&self) -> PathBuf {
        self.cert_dir.join("tls.key")
    }

    /// The Service the registration objects point the API server at.
    pub fn service_target(&self) -> ServiceTarget {
        ServiceTarget {
            namespace: self.namespace.clone(),
            name: self.service_name.clone(),
            port: self.service_port,
        }
    }
}
