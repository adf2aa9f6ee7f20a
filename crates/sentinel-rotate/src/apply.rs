//! The `apply` rotator: no external side effects, just a placeholder
//! string substituted for the raw matched secret.

use sentinel_types::Finding;

use crate::{expand_template, PreparedReplacement, RotateError, Rotator};

pub struct ApplyRotator;

impl Rotator for ApplyRotator {
    fn name(&self) -> &'static str {
        "apply"
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
        _verify: bool,
    ) -> Result<PreparedReplacement, RotateError> {
        let placeholder = match template {
            Some(t) => expand_template(t, finding, ts, file, None),
            None => format!("__REPLACED_SECRET_{ts}__"),
        };
        Ok(PreparedReplacement {
            raw: finding.r#match.clone(),
            placeholder,
            backend_key: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_types::{Severity, Span};

    fn finding() -> Finding {
        Finding {
            file_path: "a.env".into(),
            line: 1,
            column: 1,
            r#match: "abc123".into(),
            context: "abc123".into(),
            rule_name: "Generic API Key".into(),
            severity: Severity::High,
            confidence: Some(1.0),
            tags: vec![],
            message: None,
            span: Some(Span { start: 0, length: 6 }),
        }
    }

    #[test]
    fn default_placeholder_embeds_timestamp() {
        let rotator = ApplyRotator;
        let prepared = rotator
            .prepare(&finding(), None, "20240101T000000Z", "a.env", false)
            .unwrap();
        assert_eq!(prepared.placeholder, "__REPLACED_SECRET_20240101T000000Z__");
        assert_eq!(prepared.raw, "abc123");
        assert!(prepared.backend_key.is_none());
    }

    #[test]
    fn template_overrides_default() {
        let rotator = ApplyRotator;
        let prepared = rotator
            .prepare(
                &finding(),
                Some("masked::{{match}}::{{file}}"),
                "ts",
                "a.env",
                false,
            )
            .unwrap();
        assert_eq!(prepared.placeholder, "masked::abc123::a.env");
    }
}
