//! Duration fields that accept either a humantime string (`"30s"`) or a
//! plain millisecond integer, used by retry/backoff and ML-hook budget
//! configuration throughout the workspace.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum DurationForm {
    Millis(u64),
    Human(String),
}

/// Deserialize a [`Duration`] from either `"500ms"`/`"30s"` or a bare
/// millisecond count.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match DurationForm::deserialize(deserializer)? {
        DurationForm::Millis(ms) => Ok(Duration::from_millis(ms)),
        DurationForm::Human(s) => humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration {s:?}: {e}"))),
    }
}

/// Deserialize an `Option<Duration>`, treating `null` and a missing field
/// as `None`.
pub fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<DurationForm>::deserialize(deserializer)? {
        None => Ok(None),
        Some(DurationForm::Millis(ms)) => Ok(Some(Duration::from_millis(ms))),
        Some(DurationForm::Human(s)) => humantime::parse_duration(&s)
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration {s:?}: {e}"))),
    }
}

/// Serialize a [`Duration`] back out as a humantime string, so config files
/// round-trip legibly.
pub fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    humantime::format_duration(*value)
        .to_string()
        .serialize(serializer)
}

pub fn serialize_duration_opt<S>(
    value: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(d) => humantime::format_duration(*d).to_string().serialize(serializer),
        None => serializer.serialize_none(),
    }
}
