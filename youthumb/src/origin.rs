use crate::domain::{CacheEntry, ResourceKey};
use crate::ports::Origin;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, EXPIRES, HeaderMap};
use shared::config::Config;
use shared::{Error, Result};
use std::time::Duration;
use tracing::{Instrument, Span, debug, info_span};
use url::Url;

const KEY_PLACEHOLDER: &str = "{key}";
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Fetches thumbnails over HTTP from a URL template such as
/// `https://i.ytimg.com/vi/{key}/hqdefault.jpg`.
#[derive(Clone, Debug)]
pub struct HttpOrigin {
    client: reqwest::Client,
    template: String,
    max_body_bytes: usize,
    default_ttl: Option<Duration>,
    span: Span,
}

impl HttpOrigin {
    pub fn new(
        template: impl Into<String>,
        timeout: Duration,
        max_body_bytes: usize,
        default_ttl: Option<Duration>,
    ) -> Result<Self> {
        let template = template.into();
        if !template.contains(KEY_PLACEHOLDER) {
            return Err(Error::Config(format!(
                "origin template {template:?} has no {KEY_PLACEHOLDER} placeholder"
            )));
        }
        Url::parse(&template.replace(KEY_PLACEHOLDER, "probe"))
            .map_err(|e| Error::Config(format!("origin template {template:?}: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            template,
            max_body_bytes,
            default_ttl,
            span: info_span!("origin"),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.origin_template.clone(),
            config.origin_timeout,
            config.max_body_bytes,
            config.default_ttl,
        )
    }

    pub fn url_for(&self, key: &ResourceKey) -> Result<Url> {
        let raw = self.template.replace(KEY_PLACEHOLDER, key.as_str());
        Url::parse(&raw).map_err(|e| Error::Internal(format!("origin URL {raw:?}: {e}")))
    }

    fn expires_at(&self, headers: &HeaderMap, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let parsed = headers
            .get(EXPIRES)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date);

        match (parsed, self.default_ttl) {
            (Some(deadline), _) => Ok(deadline),
            (None, Some(ttl)) => {
                debug!(ttl_secs = ttl.as_secs(), "no usable Expires header, using default TTL");
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|e| Error::Internal(format!("default TTL out of range: {e}")))?;
                Ok(now + ttl)
            }
            (None, None) => Err(Error::Origin("missing or malformed Expires header".into())),
        }
    }

    async fn read_body(&self, response: &mut reqwest::Response) -> Result<Bytes> {
        if let Some(len) = response.content_length() {
            if len > self.max_body_bytes as u64 {
                return Err(Error::Origin(format!(
                    "body of {len} bytes exceeds limit of {}",
                    self.max_body_bytes
                )));
            }
        }

        let capacity = response
            .content_length()
            .map_or(0, |len| len as usize);
        let mut body = BytesMut::with_capacity(capacity);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Origin(format!("failed to read body: {e}")))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(Error::Origin(format!(
                    "body exceeds limit of {} bytes",
                    self.max_body_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch(&self, key: &ResourceKey) -> Result<CacheEntry> {
        let url = self.url_for(key)?;

        async {
            debug!(%url, "fetching from origin");
            let mut response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| Error::Origin(format!("GET {url}: {e}")))?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Err(Error::OriginNotFound);
            }
            if !status.is_success() {
                return Err(Error::Origin(format!("unexpected status {status} from {url}")));
            }

            let expires_at = self.expires_at(response.headers(), Utc::now())?;
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(FALLBACK_CONTENT_TYPE)
                .to_string();
            let data = self.read_body(&mut response).await?;

            debug!(bytes = data.len(), %content_type, %expires_at, "origin fetch complete");
            Ok(CacheEntry::new(key.clone(), content_type, data, expires_at))
        }
        .instrument(self.span.clone())
        .await
    }
}

/// Parses the three date formats HTTP recipients must accept: IMF-fixdate
/// (RFC 1123), obsolete RFC 850, and ANSI C `asctime`.
pub fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(raw) {
        return Some(date.with_timezone(&Utc));
    }
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
