//! HashiCorp Vault KV v2 backend (§4.J): `PUT|GET /v1/<mount>/data/<base>/<key>`
//! with `X-Vault-Token`, optional `X-Vault-Namespace`.

use std::env;
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::json;

use crate::{classify_reqwest_error, retry, BackendError, SecretBackend};
use sentinel_retry::RetryConfig;

pub const VAULT_ADDR_ENV: &str = "VAULT_ADDR";
pub const VAULT_TOKEN_ENV: &str = "VAULT_TOKEN";

pub struct VaultBackend {
    client: Client,
    addr: String,
    token: String,
    mount: String,
    base: String,
    namespace: Option<String>,
    retry_config: RetryConfig,
}

/// Credentials resolved from the environment, checked before any network
/// call so that a missing `VAULT_ADDR`/`VAULT_TOKEN` fails fast.
struct VaultCredentials {
    addr: String,
    token: String,
}

fn resolve_credentials() -> Result<VaultCredentials, BackendError> {
    let addr = env::var(VAULT_ADDR_ENV)
        .map_err(|_| BackendError::MissingCredentials(format!("{VAULT_ADDR_ENV} is not set")))?;
    let token = env::var(VAULT_TOKEN_ENV)
        .map_err(|_| BackendError::MissingCredentials(format!("{VAULT_TOKEN_ENV} is not set")))?;
    if addr.trim().is_empty() {
        return Err(BackendError::MissingCredentials(format!(
            "{VAULT_ADDR_ENV} is empty"
        )));
    }
    if token.trim().is_empty() {
        return Err(BackendError::MissingCredentials(format!(
            "{VAULT_TOKEN_ENV} is empty"
        )));
    }
    Ok(VaultCredentials { addr, token })
}

impl VaultBackend {
    /// Build a backend from `VAULT_ADDR`/`VAULT_TOKEN`, a KV v2 mount
    /// (e.g. `"secret"`), and a base path under that mount.
    pub fn from_env(mount: impl Into<String>, base: impl Into<String>) -> Result<Self, BackendError> {
        let creds = resolve_credentials()?;
        Self::new(creds.addr, creds.token, mount, base)
    }

    pub fn new(
        addr: impl Into<String>,
        token: impl Into<String>,
        mount: impl Into<String>,
        base: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .user_agent("sentinel-backends")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::request("NetworkError", e.to_string()))?;
        Ok(VaultBackend {
            client,
            addr: addr.into(),
            token: token.into(),
            mount: mount.into(),
            base: base.into(),
            namespace: None,
            retry_config: RetryConfig::default(),
        })
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    fn url(&self, key: &str) -> String {
        format!(
            "{}/v1/{}/data/{}/{}",
            self.addr.trim_end_matches('/'),
            self.mount,
            self.base,
            key
        )
    }

    fn request(&self, req: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        let mut req = req.header("X-Vault-Token", &self.token);
        if let Some(ns) = &self.namespace {
            req = req.header("X-Vault-Namespace", ns);
        }
        req
    }
}

impl SecretBackend for VaultBackend {
    fn provider(&self) -> &'static str {
        "vault"
    }

    fn put(&self, key: &str, value: &str) -> Result<String, BackendError> {
        retry(&self.retry_config, |_attempt| {
            let body = json!({ "data": { "value": value } });
            let response = self
                .request(self.client.post(self.url(key)))
                .json(&body)
                .send()
                .map_err(|e| BackendError::request(classify_reqwest_error(&e), e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().unwrap_or_default();
                return Err(BackendError::request(status.as_u16().to_string(), text));
            }
            Ok(key.to_string())
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        retry(&self.retry_config, |_attempt| {
            let response = self
                .request(self.client.get(self.url(key)))
                .send()
                .map_err(|e| BackendError::request(classify_reqwest_error(&e), e.to_string()))?;

            let status = response.status();
            if status.as_u16() == 404 {
                return Ok(None);
            }
            if !status.is_success() {
                let text = response.text().unwrap_or_default();
                return Err(BackendError::request(status.as_u16().to_string(), text));
            }
            let body: serde_json::Value = response
                .json()
                .map_err(|e| BackendError::Serialization(e.to_string()))?;
            let value = body
                .get("data")
                .and_then(|d| d.get("data"))
                .and_then(|d| d.get("value"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            Ok(value)
        })
    }

    fn delete(&self, key: &str) -> Result<(), BackendError> {
        retry(&self.retry_config, |_attempt| {
            let response = self
                .request(self.client.delete(self.url(key)))
                .send()
                .map_err(|e| BackendError::request(classify_reqwest_error(&e), e.to_string()))?;

            let status = response.status();
            if !status.is_success() && status.as_u16() != 404 {
                let text = response.text().unwrap_or_default();
                return Err(BackendError::request(status.as_u16().to_string(), text));
            }
            Ok(())
        })
    }
}
