//! AWS Secrets Manager backend (§4.J): `put` tries `CreateSecret`, falling
//! back to `PutSecretValue` when the secret already exists.
//!
//! Pulling in `aws-sdk-secretsmanager` would mean a tokio runtime alongside
//! this workspace's otherwise-synchronous `reqwest::blocking` stack, so this
//! signs requests directly with SigV4 over `hmac`+`sha2` and calls the
//! JSON 1.1 protocol with `reqwest::blocking`.

use std::env;
use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::blocking::Client;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::{classify_reqwest_error, retry, BackendError, SecretBackend};
use sentinel_retry::RetryConfig;

type HmacSha256 = Hmac<Sha256>;

pub const AWS_ACCESS_KEY_ID_ENV: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_SESSION_TOKEN_ENV: &str = "AWS_SESSION_TOKEN";
pub const AWS_REGION_ENV: &str = "AWS_REGION";
pub const AWS_DEFAULT_REGION_ENV: &str = "AWS_DEFAULT_REGION";

const SERVICE: &str = "secretsmanager";

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    region: String,
}

fn resolve_credentials() -> Result<AwsCredentials, BackendError> {
    let access_key_id = env::var(AWS_ACCESS_KEY_ID_ENV).map_err(|_| {
        BackendError::MissingCredentials(format!("{AWS_ACCESS_KEY_ID_ENV} is not set"))
    })?;
    let secret_access_key = env::var(AWS_SECRET_ACCESS_KEY_ENV).map_err(|_| {
        BackendError::MissingCredentials(format!("{AWS_SECRET_ACCESS_KEY_ENV} is not set"))
    })?;
    let region = env::var(AWS_REGION_ENV)
        .or_else(|_| env::var(AWS_DEFAULT_REGION_ENV))
        .map_err(|_| {
            BackendError::MissingCredentials(format!(
                "{AWS_REGION_ENV} or {AWS_DEFAULT_REGION_ENV} is not set"
            ))
        })?;
    if access_key_id.trim().is_empty() || secret_access_key.trim().is_empty() {
        return Err(BackendError::MissingCredentials(
            "AWS access key id / secret access key is empty".into(),
        ));
    }
    let session_token = env::var(AWS_SESSION_TOKEN_ENV).ok().filter(|t| !t.is_empty());
    Ok(AwsCredentials {
        access_key_id,
        secret_access_key,
        session_token,
        region,
    })
}

pub struct AwsSecretsBackend {
    client: Client,
    endpoint: String,
    host: String,
    region: String,
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    name_prefix: String,
    retry_config: RetryConfig,
}

impl AwsSecretsBackend {
    /// Build a backend from the standard `AWS_ACCESS_KEY_ID` /
    /// `AWS_SECRET_ACCESS_KEY` / `AWS_REGION` environment variables,
    /// targeting the real `secretsmanager.<region>.amazonaws.com` endpoint.
    pub fn from_env(name_prefix: impl Into<String>) -> Result<Self, BackendError> {
        let creds = resolve_credentials()?;
        let host = format!("secretsmanager.{}.amazonaws.com", creds.region);
        let endpoint = format!("https://{host}/");
        Self::new(endpoint, host, creds, name_prefix)
    }

    /// Build a backend against an arbitrary endpoint (used by tests to
    /// point at a local server instead of the real AWS API).
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        host: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
        name_prefix: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let creds = AwsCredentials {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            region: region.into(),
        };
        Self::new(endpoint, host, creds, name_prefix)
    }

    fn new(
        endpoint: impl Into<String>,
        host: impl Into<String>,
        creds: AwsCredentials,
        name_prefix: impl Into<String>,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .user_agent("sentinel-backends")
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::request("NetworkError", e.to_string()))?;
        Ok(AwsSecretsBackend {
            client,
            endpoint: endpoint.into(),
            host: host.into(),
            region: creds.region,
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: creds.session_token,
            name_prefix: name_prefix.into(),
            retry_config: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    fn secret_name(&self, key: &str) -> String {
        if self.name_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.name_prefix, key)
        }
    }

    fn call(&self, target: &str, body: &Value) -> Result<(u16, Value), BackendError> {
        let payload = serde_json::to_string(body)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;
        let amz_target = format!("{SERVICE}.{target}");
        let date = Utc::now();
        let amz_date = date.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = date.format("%Y%m%d").to_string();

        let authorization = sign_request(
            &self.host,
            &self.region,
            &self.access_key_id,
            &self.secret_access_key,
            self.session_token.as_deref(),
            &amz_date,
            &date_stamp,
            &amz_target,
            &payload,
        );

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Host", &self.host)
            .header("X-Amz-Date", &amz_date)
            .header("X-Amz-Target", &amz_target)
            .header("Content-Type", "application/x-amz-json-1.1")
            .header("Authorization", authorization)
            .body(payload);

        if let Some(token) = &self.session_token {
            request = request.header("X-Amz-Security-Token", token);
        }

        let response = request
            .send()
            .map_err(|e| BackendError::request(classify_reqwest_error(&e), e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .map_err(|e| BackendError::request(classify_reqwest_error(&e), e.to_string()))?;
        let parsed: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| BackendError::Serialization(e.to_string()))?
        };
        Ok((status, parsed))
    }

    fn error_type(body: &Value) -> Option<&str> {
        body.get("__type").and_then(|v| v.as_str())
    }
}

impl SecretBackend for AwsSecretsBackend {
    fn provider(&self) -> &'static str {
        "aws"
    }

    fn put(&self, key: &str, value: &str) -> Result<String, BackendError> {
        retry(&self.retry_config, |_attempt| {
            let name = self.secret_name(key);
            let (status, body) = self.call(
                "CreateSecret",
                &json!({ "Name": name, "SecretString": value }),
            )?;

            if status == 200 {
                return Ok(name);
            }

            let already_exists = Self::error_type(&body)
                .map(|t| t.contains("ResourceExistsException"))
                .unwrap_or(false);
            if !already_exists {
                return Err(BackendError::request(status.to_string(), body.to_string()));
            }

            let (status, body) = self.call(
                "PutSecretValue",
                &json!({ "SecretId": name, "SecretString": value }),
            )?;
            if status != 200 {
                return Err(BackendError::request(status.to_string(), body.to_string()));
            }
            Ok(name)
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
        retry(&self.retry_config, |_attempt| {
            let name = self.secret_name(key);
            let (status, body) = self.call("GetSecretValue", &json!({ "SecretId": name }))?;

            if status == 400 {
                let not_found = Self::error_type(&body)
                    .map(|t| t.contains("ResourceNotFoundException"))
                    .unwrap_or(false);
                if not_found {
                    return Ok(None);
                }
            }
            if status != 200 {
                return Err(BackendError::request(status.to_string(), body.to_string()));
            }
            Ok(body
                .get("SecretString")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()))
        })
    }

    fn delete(&self, key: &str) -> Result<(), BackendError> {
        retry(&self.retry_config, |_attempt| {
            let name = self.secret_name(key);
            let (status, body) = self.call(
                "DeleteSecret",
                &json!({ "SecretId": name, "ForceDeleteWithoutRecovery": true }),
            )?;
            if status == 400 {
                let not_found = Self::error_type(&body)
                    .map(|t| t.contains("ResourceNotFoundException"))
                    .unwrap_or(false);
                if not_found {
                    return Ok(());
                }
            }
            if status != 200 {
                return Err(BackendError::request(status.to_string(), body.to_string()));
            }
            Ok(())
        })
    }
}

fn hmac_sha256(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts a key of any size");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute the `Authorization` header for a single-POST, JSON-1.1 AWS
/// request (empty canonical query string, empty canonical URI beyond `/`).
#[allow(clippy::too_many_arguments)]
fn sign_request(
    host: &str,
    region: &str,
    access_key_id: &str,
    secret_access_key: &str,
    session_token: Option<&str>,
    amz_date: &str,
    date_stamp: &str,
    amz_target: &str,
    payload: &str,
) -> String {
    let payload_hash = sha256_hex(payload);

    let mut canonical_headers = format!(
        "content-type:application/x-amz-json-1.1\nhost:{host}\nx-amz-date:{amz_date}\nx-amz-target:{amz_target}\n"
    );
    let mut signed_headers = "content-type;host;x-amz-date;x-amz-target".to_string();
    if let Some(token) = session_token {
        canonical_headers = format!(
            "content-type:application/x-amz-json-1.1\nhost:{host}\nx-amz-date:{amz_date}\nx-amz-security-token:{token}\nx-amz-target:{amz_target}\n"
        );
        signed_headers = "content-type;host;x-amz-date;x-amz-security-token;x-amz-target".to_string();
    }

    let canonical_request = format!(
        "POST\n/\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );
    let hashed_canonical_request = sha256_hex(&canonical_request);

    let credential_scope = format!("{date_stamp}/{region}/{SERVICE}/aws4_request");
    let string_to_sign =
        format!("AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{hashed_canonical_request}");

    let k_date = hmac_sha256(format!("AWS4{secret_access_key}").as_bytes(), date_stamp);
    let k_region = hmac_sha256(&k_date, region);
    let k_service = hmac_sha256(&k_region, SERVICE);
    let k_signing = hmac_sha256(&k_service, "aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, &string_to_sign));

    format!(
        "AWS4-HMAC-SHA256 Credential={access_key_id}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}"
    )
}
