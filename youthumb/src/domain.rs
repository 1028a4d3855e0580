use bytes::Bytes;
use chrono::{DateTime, Utc};
use shared::{Error, Result};
use std::fmt;

/// Stable identifier of a thumbnail, used as the cache primary key.
///
/// Only `[A-Za-z0-9_-]` is accepted so the key can be substituted into an
/// origin URL template verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(Error::InvalidIdentifier("empty resource key".into()));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(Error::InvalidIdentifier(format!(
                "resource key {raw:?} contains {bad:?}"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A thumbnail together with its cache deadline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: ResourceKey,
    pub content_type: String,
    pub data: Bytes,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        key: ResourceKey,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            content_type: content_type.into(),
            data: data.into(),
            expires_at,
        }
    }

    /// Live entries have a deadline strictly after `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn is_live(&self) -> bool {
        self.is_live_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_resource_key_accepts_video_ids() {
        assert_eq!(ResourceKey::new("dQw4w9WgXcQ").unwrap().as_str(), "dQw4w9WgXcQ");
        assert!(ResourceKey::new("a-b_C9").is_ok());
    }

    #[test]
    fn test_resource_key_rejects_unsafe_input() {
        for raw in ["", "a/b", "../etc", "id?x=1", "white space", "ключ"] {
            assert!(
                matches!(ResourceKey::new(raw), Err(Error::InvalidIdentifier(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_liveness_is_strict() {
        let now = Utc::now();
        let key = ResourceKey::new("abc").unwrap();
        let entry = CacheEntry::new(key, "image/jpeg", vec![1, 2, 3], now);
        assert!(!entry.is_live_at(now));
        assert!(entry.is_live_at(now - Duration::seconds(1)));
        assert!(!entry.is_live_at(now + Duration::seconds(1)));
    }
}
