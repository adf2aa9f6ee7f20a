//! The `backend` rotator: writes the secret to a [`SecretBackend`], and
//! (optionally) verifies the write before substituting a `secretref://`
//! reference for the raw matched text.

use std::sync::Arc;

use sentinel_backends::SecretBackend;
use sentinel_types::{sanitize_key, secret_ref, Finding};

use crate::{expand_template, PreparedReplacement, RotateError, Rotator};

type KeyFn = dyn Fn(&Finding, &str) -> String + Send + Sync;

pub struct BackendRotator {
    backend: Arc<dyn SecretBackend>,
    key_fn: Option<Box<KeyFn>>,
}

impl BackendRotator {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        BackendRotator { backend, key_fn: None }
    }

    /// Override the default `basename(file)_line_ts` key derivation.
    pub fn with_key_fn(mut self, key_fn: impl Fn(&Finding, &str) -> String + Send + Sync + 'static) -> Self {
        self.key_fn = Some(Box::new(key_fn));
        self
    }

    fn derive_key(&self, finding: &Finding, file: &str, ts: &str) -> String {
        if let Some(f) = &self.key_fn {
            return f(finding, ts);
        }
        let basename = std::path::Path::new(file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.to_string());
        sanitize_key(&format!("{basename}_{}_{ts}", finding.line))
    }
}

impl Rotator for BackendRotator {
    fn name(&self) -> &'static str {
        "backend"
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn prepare(
        &self,
        finding: &Finding,
        template: Option<&str>,
        ts: &str,
        file: &str,
        verify: bool,
    ) -> Result<PreparedReplacement, RotateError> {
        let key = self.derive_key(finding, file, ts);
        let suffix = self.backend.put(&key, &finding.r#match)?;

        if verify {
            match self.backend.get(&key) {
                Ok(Some(value)) if value == finding.r#match => {}
                Ok(_) => {
                    let _ = self.backend.delete(&key);
                    return Err(RotateError::VerificationFailed(key));
                }
                Err(err) => {
                    let _ = self.backend.delete(&key);
                    return Err(RotateError::Backend(err));
                }
            }
        }

        let reference = secret_ref(self.backend.provider(), &suffix);
        let placeholder = match template {
            Some(t) => expand_template(t, finding, ts, file, Some(&reference)),
            None => reference,
        };

        Ok(PreparedReplacement {
            raw: finding.r#match.clone(),
            placeholder,
            backend_key: Some(key),
        })
    }

    fn rollback(&self, prepared: &PreparedReplacement) {
        if let Some(key) = &prepared.backend_key {
            let _ = self.backend.delete(key);
        }
    }
}
