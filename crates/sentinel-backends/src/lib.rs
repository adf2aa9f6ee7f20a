//! Secret store backends (§4.J): a shared `SecretBackend` trait with
//! file, AWS Secrets Manager, and Vault KV v2 implementations. Every
//! `put`/`get`/`delete` is wrapped in [`sentinel_retry::retry_with`] using
//! the fixed transient-tag policy; missing credentials are rejected before
//! any network call.

pub mod aws;
pub mod file;
pub mod vault;

use sentinel_retry::RetryConfig;
use thiserror::Error;

pub use aws::AwsSecretsBackend;
pub use file::FileBackend;
pub use vault::VaultBackend;

/// Error surface shared by every backend. `Request` carries the transient
/// classification tag `sentinel_retry` needs in `tag()`; callers that want
/// the underlying HTTP status can recover it from the message.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("secret not found")]
    NotFound,
    #[error("backend request failed ({tag}): {message}")]
    Request { tag: String, message: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(String),
}

impl BackendError {
    /// The transient-error tag used by [`sentinel_retry::is_transient`].
    /// Non-`Request` variants carry no tag and are never retried.
    pub fn tag(&self) -> &str {
        match self {
            BackendError::Request { tag, .. } => tag,
            _ => "",
        }
    }

    pub fn request(tag: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::Request {
            tag: tag.into(),
            message: message.into(),
        }
    }
}

/// Classify a `reqwest` transport failure into a retry tag, falling back to
/// the generic `"NetworkError"` tag when no more specific one applies.
pub(crate) fn classify_reqwest_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "ETIMEDOUT".to_string()
    } else if err.is_connect() {
        "ECONNREFUSED".to_string()
    } else {
        "NetworkError".to_string()
    }
}

/// `put(key, value)` returns the `ref_suffix` a caller combines with the
/// backend's provider name via [`sentinel_types::secret_ref`].
pub trait SecretBackend: Send + Sync {
    fn provider(&self) -> &'static str;
    fn put(&self, key: &str, value: &str) -> Result<String, BackendError>;
    fn get(&self, key: &str) -> Result<Option<String>, BackendError>;
    fn delete(&self, key: &str) -> Result<(), BackendError>;
}

/// Run `op` under the shared retry policy, sleeping for real between
/// attempts. Backend implementations use this for every network call;
/// tests reach for [`sentinel_retry::retry_with`] directly with an
/// injected no-op sleep instead.
pub(crate) fn retry<T>(
    config: &RetryConfig,
    mut op: impl FnMut(u32) -> Result<T, BackendError>,
) -> Result<T, BackendError> {
    sentinel_retry::retry_with(
        config,
        |attempt| op(attempt),
        |err: &BackendError| err.tag(),
        std::thread::sleep,
    )
}
