//! Ruleset marketplace (§4.M): fetches a JSON catalog over HTTP(S) or a
//! local path, optionally checks a detached catalog signature, then for
//! each requested ruleset fetches its bytes and checks a SHA-256 digest
//! and/or an ed25519 signature before writing it into the cache directory.
//!
//! Uses the workspace's existing `sha2`/`hex` for the digest check and adds
//! `ed25519-dalek` for detached-signature verification (see `DESIGN.md`).

use std::fs;
use std::path::{Path, PathBuf};

use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketplaceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("catalog JSON invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected status {0} fetching {1}")]
    UnexpectedStatus(StatusCode, String),
    #[error("ruleset {0:?} not found in catalog")]
    UnknownRuleset(String),
    #[error("sha256 mismatch for ruleset {0:?}")]
    HashMismatch(String),
    #[error("ruleset {0:?} has no signature but require_signed is set")]
    SignatureMissing(String),
    #[error("signature verification failed for {0:?}")]
    SignatureInvalid(String),
    #[error("catalog has no detached signature but require_catalog_signature is set")]
    CatalogSignatureMissing,
    #[error("catalog detached signature verification failed")]
    CatalogSignatureInvalid,
    #[error("no public key available to verify {0}")]
    MissingPublicKey(String),
    #[error("invalid PEM public key: {0}")]
    InvalidPublicKey(String),
    #[error("invalid base64 signature for {0:?}: {1}")]
    InvalidSignatureEncoding(String, base64::DecodeError),
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    name: String,
    url: String,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    sig: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Catalog {
    rulesets: Vec<CatalogEntry>,
    #[serde(default)]
    pubkey: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MarketplaceOptions {
    pub cache_dir: PathBuf,
    pub require_signed: bool,
    pub require_catalog_signature: bool,
    /// Overrides any `pubkey` embedded in the catalog itself.
    pub catalog_pubkey_override: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledRuleset {
    pub name: String,
    pub path: PathBuf,
    pub bytes: usize,
}

pub struct MarketplaceClient {
    http: Client,
}

impl MarketplaceClient {
    pub fn new() -> Result<Self, MarketplaceError> {
        let http = Client::builder()
            .user_agent(format!("sentinel-marketplace/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(MarketplaceClient { http })
    }

    fn fetch(&self, source: &str) -> Result<Vec<u8>, MarketplaceError> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let resp = self.http.get(source).send()?;
            match resp.status() {
                StatusCode::OK => Ok(resp.bytes()?.to_vec()),
                status => Err(MarketplaceError::UnexpectedStatus(status, source.to_string())),
            }
        } else {
            Ok(fs::read(source)?)
        }
    }

    fn fetch_sidecar_signature(&self, source: &str) -> Result<Option<Vec<u8>>, MarketplaceError> {
        let sig_source = format!("{source}.sig");
        if source.starts_with("http://") || source.starts_with("https://") {
            let resp = self.http.get(&sig_source).send()?;
            match resp.status() {
                StatusCode::OK => Ok(Some(resp.bytes()?.to_vec())),
                StatusCode::NOT_FOUND => Ok(None),
                status => Err(MarketplaceError::UnexpectedStatus(status, sig_source)),
            }
        } else if Path::new(&sig_source).exists() {
            Ok(Some(fs::read(&sig_source)?))
        } else {
            Ok(None)
        }
    }

    /// Fetches `catalog_source`, verifies a detached catalog signature if
    /// configured, then fetches, verifies, and installs each ruleset in
    /// `names` into `options.cache_dir`. Names not present in the catalog,
    /// or that fail a configured hash/signature check, abort the whole call.
    pub fn install(
        &self,
        catalog_source: &str,
        names: &[String],
        options: &MarketplaceOptions,
    ) -> Result<Vec<InstalledRuleset>, MarketplaceError> {
        let catalog_bytes = self.fetch(catalog_source)?;

        if options.require_catalog_signature {
            let sig_bytes = self
                .fetch_sidecar_signature(catalog_source)?
                .ok_or(MarketplaceError::CatalogSignatureMissing)?;
            let key_pem = options
                .catalog_pubkey_override
                .as_deref()
                .ok_or_else(|| MarketplaceError::MissingPublicKey("catalog".to_string()))?;
            verify_signature(key_pem, &catalog_bytes, &sig_bytes)
                .map_err(|_| MarketplaceError::CatalogSignatureInvalid)?;
        }

        let catalog: Catalog = serde_json::from_slice(&catalog_bytes)?;
        let embedded_pubkey = options.catalog_pubkey_override.clone().or_else(|| catalog.pubkey.clone());

        fs::create_dir_all(&options.cache_dir)?;

        let mut installed = Vec::with_capacity(names.len());
        for name in names {
            let entry = catalog
                .rulesets
                .iter()
                .find(|r| &r.name == name)
                .ok_or_else(|| MarketplaceError::UnknownRuleset(name.clone()))?;

            let bytes = self.fetch(&entry.url)?;

            if let Some(expected) = &entry.sha256 {
                let mut hasher = Sha256::new();
                hasher.update(&bytes);
                let actual = hex::encode(hasher.finalize());
                if &actual != expected {
                    return Err(MarketplaceError::HashMismatch(name.clone()));
                }
            }

            if options.require_signed {
                let sig_b64 = entry
                    .sig
                    .as_deref()
                    .ok_or_else(|| MarketplaceError::SignatureMissing(name.clone()))?;
                let sig_bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, sig_b64)
                    .map_err(|e| MarketplaceError::InvalidSignatureEncoding(name.clone(), e))?;
                let key_pem = embedded_pubkey
                    .as_deref()
                    .ok_or_else(|| MarketplaceError::MissingPublicKey(name.clone()))?;
                verify_signature(key_pem, &bytes, &sig_bytes)
                    .map_err(|_| MarketplaceError::SignatureInvalid(name.clone()))?;
            }

            let path = options.cache_dir.join(format!("{name}.ruleset.json"));
            fs::write(&path, &bytes)?;
            installed.push(InstalledRuleset { name: name.clone(), path, bytes: bytes.len() });
        }

        Ok(installed)
    }
}

fn verify_signature(pem: &str, message: &[u8], sig_bytes: &[u8]) -> Result<(), MarketplaceError> {
    let key = VerifyingKey::from_public_key_pem(pem)
        .map_err(|e| MarketplaceError::InvalidPublicKey(e.to_string()))?;
    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| MarketplaceError::InvalidPublicKey("signature must be 64 bytes".to_string()))?;
    let signature = Signature::from_bytes(&sig_array);
    key.verify(message, &signature)
        .map_err(|_| MarketplaceError::InvalidPublicKey("verification failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::pkcs8::EncodePublicKey;
    use ed25519_dalek::{Signer, SigningKey};
    use std::io::Read;
    use std::net::TcpListener;
    use tempfile::tempdir;
    use tiny_http::{Response, Server};

    fn keypair() -> (SigningKey, String) {
        let seed = [7u8; 32];
        let signing_key = SigningKey::from_bytes(&seed);
        let pem = signing_key.verifying_key().to_public_key_pem(Default::default()).unwrap();
        (signing_key, pem)
    }

    fn free_port() -> u16 {
        TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    #[test]
    fn installs_ruleset_verified_by_hash_from_local_catalog() {
        let dir = tempdir().unwrap();
        let ruleset_path = dir.path().join("aws.ruleset.json");
        fs::write(&ruleset_path, br#"{"rules":[]}"#).unwrap();

        let mut hasher = Sha256::new();
        hasher.update(fs::read(&ruleset_path).unwrap());
        let hash = hex::encode(hasher.finalize());

        let catalog_path = dir.path().join("catalog.json");
        let catalog_json = serde_json::json!({
            "rulesets": [
                {"name": "aws", "url": ruleset_path.to_string_lossy(), "sha256": hash}
            ]
        });
        fs::write(&catalog_path, serde_json::to_vec(&catalog_json).unwrap()).unwrap();

        let client = MarketplaceClient::new().unwrap();
        let options = MarketplaceOptions {
            cache_dir: dir.path().join("cache"),
            require_signed: false,
            require_catalog_signature: false,
            catalog_pubkey_override: None,
        };

        let installed = client
            .install(&catalog_path.to_string_lossy(), &["aws".to_string()], &options)
            .unwrap();
        assert_eq!(installed.len(), 1);
        assert!(installed[0].path.exists());
    }

    #[test]
    fn hash_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let ruleset_path = dir.path().join("aws.ruleset.json");
        fs::write(&ruleset_path, br#"{"rules":[]}"#).unwrap();

        let catalog_path = dir.path().join("catalog.json");
        let catalog_json = serde_json::json!({
            "rulesets": [
                {"name": "aws", "url": ruleset_path.to_string_lossy(), "sha256": "0".repeat(64)}
            ]
        });
        fs::write(&catalog_path, serde_json::to_vec(&catalog_json).unwrap()).unwrap();

        let client = MarketplaceClient::new().unwrap();
        let options = MarketplaceOptions {
            cache_dir: dir.path().join("cache"),
            require_signed: false,
            require_catalog_signature: false,
            catalog_pubkey_override: None,
        };

        let result = client.install(&catalog_path.to_string_lossy(), &["aws".to_string()], &options);
        assert!(matches!(result, Err(MarketplaceError::HashMismatch(_))));
    }

    #[test]
    fn require_signed_rejects_ruleset_with_no_signature() {
        let dir = tempdir().unwrap();
        let ruleset_path = dir.path().join("aws.ruleset.json");
        fs::write(&ruleset_path, br#"{"rules":[]}"#).unwrap();

        let catalog_path = dir.path().join("catalog.json");
        let catalog_json = serde_json::json!({
            "rulesets": [{"name": "aws", "url": ruleset_path.to_string_lossy()}]
        });
        fs::write(&catalog_path, serde_json::to_vec(&catalog_json).unwrap()).unwrap();

        let client = MarketplaceClient::new().unwrap();
        let options = MarketplaceOptions {
            cache_dir: dir.path().join("cache"),
            require_signed: true,
            require_catalog_signature: false,
            catalog_pubkey_override: None,
        };

        let result = client.install(&catalog_path.to_string_lossy(), &["aws".to_string()], &options);
        assert!(matches!(result, Err(MarketplaceError::SignatureMissing(_))));
    }

    #[test]
    fn valid_ed25519_signature_is_accepted() {
        let dir = tempdir().unwrap();
        let (signing_key, pem) = keypair();

        let ruleset_bytes = br#"{"rules":[]}"#;
        let ruleset_path = dir.path().join("aws.ruleset.json");
        fs::write(&ruleset_path, ruleset_bytes).unwrap();

        let signature = signing_key.sign(ruleset_bytes);
        let sig_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, signature.to_bytes());

        let catalog_path = dir.path().join("catalog.json");
        let catalog_json = serde_json::json!({
            "pubkey": pem,
            "rulesets": [{"name": "aws", "url": ruleset_path.to_string_lossy(), "sig": sig_b64}]
        });
        fs::write(&catalog_path, serde_json::to_vec(&catalog_json).unwrap()).unwrap();

        let client = MarketplaceClient::new().unwrap();
        let options = MarketplaceOptions {
            cache_dir: dir.path().join("cache"),
            require_signed: true,
            require_catalog_signature: false,
            catalog_pubkey_override: None,
        };

        let installed = client
            .install(&catalog_path.to_string_lossy(), &["aws".to_string()], &options)
            .unwrap();
        assert_eq!(installed.len(), 1);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let dir = tempdir().unwrap();
        let (signing_key, pem) = keypair();

        let ruleset_bytes = br#"{"rules":[]}"#;
        let ruleset_path = dir.path().join("aws.ruleset.json");
        fs::write(&ruleset_path, ruleset_bytes).unwrap();

        let signature = signing_key.sign(b"different message entirely");
        let sig_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, signature.to_bytes());

        let catalog_path = dir.path().join("catalog.json");
        let catalog_json = serde_json::json!({
            "pubkey": pem,
            "rulesets": [{"name": "aws", "url": ruleset_path.to_string_lossy(), "sig": sig_b64}]
        });
        fs::write(&catalog_path, serde_json::to_vec(&catalog_json).unwrap()).unwrap();

        let client = MarketplaceClient::new().unwrap();
        let options = MarketplaceOptions {
            cache_dir: dir.path().join("cache"),
            require_signed: true,
            require_catalog_signature: false,
            catalog_pubkey_override: None,
        };

        let result = client.install(&catalog_path.to_string_lossy(), &["aws".to_string()], &options);
        assert!(matches!(result, Err(MarketplaceError::SignatureInvalid(_))));
    }

    #[test]
    fn unknown_ruleset_name_errors() {
        let dir = tempdir().unwrap();
        let catalog_path = dir.path().join("catalog.json");
        fs::write(&catalog_path, br#"{"rulesets":[]}"#).unwrap();

        let client = MarketplaceClient::new().unwrap();
        let options = MarketplaceOptions {
            cache_dir: dir.path().join("cache"),
            require_signed: false,
            require_catalog_signature: false,
            catalog_pubkey_override: None,
        };

        let result = client.install(&catalog_path.to_string_lossy(), &["missing".to_string()], &options);
        assert!(matches!(result, Err(MarketplaceError::UnknownRuleset(_))));
    }

    #[test]
    fn fetches_catalog_over_http() {
        let port = free_port();
        let server = Server::http(format!("127.0.0.1:{port}")).unwrap();
        let handle = std::thread::spawn(move || {
            if let Ok(mut request) = server.recv() {
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                let response = Response::from_string(r#"{"rulesets":[]}"#.to_string());
                let _ = request.respond(response);
            }
        });

        let client = MarketplaceClient::new().unwrap();
        let dir = tempdir().unwrap();
        let options = MarketplaceOptions {
            cache_dir: dir.path().join("cache"),
            require_signed: false,
            require_catalog_signature: false,
            catalog_pubkey_override: None,
        };

        let result = client.install(&format!("http://127.0.0.1:{port}/catalog.json"), &[], &options);
        assert!(result.is_ok());
        handle.join().unwrap();
    }
}
