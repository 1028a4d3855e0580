use crate::domain::ResourceKey;
use shared::{Error, Result};
use url::Url;

/// Where inside a recognized URL the resource key lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyLocation {
    /// Value of the named query parameter, e.g. `watch?v=KEY`.
    Query(String),
    /// First path segment, e.g. `https://youtu.be/KEY`.
    FirstPathSegment,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostPattern {
    pub host: String,
    pub location: KeyLocation,
}

impl HostPattern {
    pub fn query(host: impl Into<String>, param: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            location: KeyLocation::Query(param.into()),
        }
    }

    pub fn first_segment(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            location: KeyLocation::FirstPathSegment,
        }
    }

    fn extract(&self, url: &Url) -> Option<String> {
        match &self.location {
            KeyLocation::Query(param) => url
                .query_pairs()
                .find(|(name, _)| name == param.as_str())
                .map(|(_, value)| value.into_owned()),
            KeyLocation::FirstPathSegment => url
                .path_segments()
                .and_then(|mut segments| segments.next())
                .map(str::to_owned),
        }
    }
}

/// Turns a video URL into the key its thumbnail is cached under. Pure; no I/O.
#[derive(Clone, Debug)]
pub struct Resolver {
    patterns: Vec<HostPattern>,
}

impl Resolver {
    pub fn new(patterns: Vec<HostPattern>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &[HostPattern] {
        &self.patterns
    }

    pub fn resolve(&self, raw: &str) -> Result<ResourceKey> {
        if raw.is_empty() {
            return Err(Error::InvalidIdentifier("video URL is required".into()));
        }

        let url = Url::parse(raw)
            .map_err(|e| Error::InvalidIdentifier(format!("unparsable URL {raw:?}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidIdentifier(format!("URL {raw:?} has no host")))?;

        let pattern = self
            .patterns
            .iter()
            .find(|p| p.host.eq_ignore_ascii_case(host))
            .ok_or_else(|| Error::InvalidIdentifier(format!("unrecognized host {host:?}")))?;

        match pattern.extract(&url) {
            Some(token) if !token.is_empty() => ResourceKey::new(token),
            _ => Err(Error::InvalidIdentifier(format!(
                "URL {raw:?} carries no video id"
            ))),
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(vec![
            HostPattern::query("www.youtube.com", "v"),
            HostPattern::query("youtube.com", "v"),
            HostPattern::query("m.youtube.com", "v"),
            HostPattern::first_segment("youtu.be"),
        ])
    }
}
