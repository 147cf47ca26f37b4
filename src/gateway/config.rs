use crate::core::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com";

/// How requests to the remote store are authenticated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credentials {
    /// Default strategy: a service-account identity and its private key.
    #[serde(rename_all = "kebab-case")]
    ServiceAccount {
        account_name: String,
        private_key: String,
    },
    /// A bearer token obtained out of band.
    AccessToken(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceAccount { account_name, .. } => f
                .debug_struct("ServiceAccount")
                .field("account_name", account_name)
                .field("private_key", &"***")
                .finish(),
            Self::AccessToken(_) => f.debug_tuple("AccessToken").field(&"***").finish(),
        }
    }
}

/// Gateway configuration
///
/// Every gateway is bound to one dataset and one application identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GatewayConfig {
    pub dataset_id: String,

    pub application_id: String,

    pub credentials: Credentials,

    /// Partition applied to every key that does not name its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

impl GatewayConfig {
    /// Starts from the service-account strategy with no key material; set it
    /// with [`GatewayConfig::service_account`] or switch strategy before use.
    pub fn new(dataset_id: &str, application_id: &str) -> Self {
        Self {
            dataset_id: dataset_id.to_string(),
            application_id: application_id.to_string(),
            credentials: Credentials::ServiceAccount {
                account_name: String::new(),
                private_key: String::new(),
            },
            namespace: None,
            api_base_url: default_api_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    pub fn service_account(mut self, account_name: &str, private_key: &str) -> Self {
        self.credentials = Credentials::ServiceAccount {
            account_name: account_name.to_string(),
            private_key: private_key.to_string(),
        };
        self
    }

    pub fn access_token(mut self, token: &str) -> Self {
        self.credentials = Credentials::AccessToken(token.to_string());
        self
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn api_base_url(mut self, url: &str) -> Self {
        self.api_base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Stored in whole milliseconds, rounded up.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_nanos().div_ceil(1_000_000);
        self.request_timeout_ms = u64::try_from(millis).unwrap_or(u64::MAX);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ModelError::Configuration(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        require("dataset-id", &self.dataset_id)?;
        require("application-id", &self.application_id)?;

        match &self.credentials {
            Credentials::ServiceAccount {
                account_name,
                private_key,
            } => {
                require("service-account-name", account_name)?;
                require("private-key", private_key)?;
            }
            Credentials::AccessToken(token) => require("access-token", token)?,
        }

        if self.api_base_url.is_empty() {
            return Err(ModelError::Configuration(
                "api-base-url cannot be empty".to_string(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(ModelError::Configuration(
                "request-timeout-ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn require(option: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ModelError::Configuration(format!(
            "Option {} must be supplied",
            option
        )));
    }
    Ok(())
}
