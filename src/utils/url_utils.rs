//! URL canonicalization utilities.
//!
//! Every URL entering the scheduler passes through [`UrlNormalizer`] so that
//! trivially different spellings of the same resource share one dedup key
//! and one domain.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use url::{Url, form_urlencoded};

use super::constants::DEFAULT_TRACKING_PARAMS;
use crate::crawl_engine::SchedulerError;

/// A URL in canonical form.
///
/// Cheap to clone: the parsed `Url` is shared. The string form is the
/// immutable dedup and queue key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NormalizedUrl {
    url: Arc<Url>,
}

impl NormalizedUrl {
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Lower-cased host, the unit of politeness control
    #[must_use]
    pub fn domain(&self) -> &str {
        // Construction guarantees a host
        self.url.host_str().unwrap_or_default()
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Path plus query, the part robots.txt rules are matched against
    #[must_use]
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{}", self.url.path(), q),
            None => self.url.path().to_string(),
        }
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<NormalizedUrl> for String {
    fn from(value: NormalizedUrl) -> Self {
        value.as_str().to_string()
    }
}

impl TryFrom<String> for NormalizedUrl {
    type Error = SchedulerError;

    /// Re-normalizes with the default parameter lists
    fn try_from(value: String) -> Result<Self, Self::Error> {
        UrlNormalizer::default().normalize(&value)
    }
}

/// Canonicalizes raw URLs.
///
/// Rules: lower-case scheme and host, drop default ports, drop the fragment,
/// resolve `.`/`..` segments, remove tracking query parameters (deny list,
/// overridable by the allow list) and sort what remains.
#[derive(Debug, Clone)]
pub struct UrlNormalizer {
    deny: Vec<String>,
    allow: Vec<String>,
}

impl Default for UrlNormalizer {
    fn default() -> Self {
        Self::new(
            DEFAULT_TRACKING_PARAMS.iter().map(|s| (*s).to_string()).collect(),
            Vec::new(),
        )
    }
}

impl UrlNormalizer {
    /// Create a normalizer with explicit parameter lists
    ///
    /// Deny entries ending in `_` match by prefix. Allow entries are exact
    /// and win over the deny list.
    #[must_use]
    pub fn new(deny: Vec<String>, allow: Vec<String>) -> Self {
        Self {
            deny: deny.into_iter().map(|d| d.to_ascii_lowercase()).collect(),
            allow: allow.into_iter().map(|a| a.to_ascii_lowercase()).collect(),
        }
    }

    /// Normalize a raw URL string
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidUrl` when the input does not parse,
    /// is not http(s), or has no host.
    pub fn normalize(&self, raw: &str) -> Result<NormalizedUrl, SchedulerError> {
        let trimmed = raw.trim();
        let mut url = Url::parse(trimmed).map_err(|e| SchedulerError::InvalidUrl {
            url: trimmed.to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(SchedulerError::InvalidUrl {
                url: trimmed.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.trim_end_matches('.').to_ascii_lowercase(),
            _ => {
                return Err(SchedulerError::InvalidUrl {
                    url: trimmed.to_string(),
                    reason: "URL has no host".to_string(),
                });
            }
        };
        if host.is_empty() {
            return Err(SchedulerError::InvalidUrl {
                url: trimmed.to_string(),
                reason: "URL has no host".to_string(),
            });
        }
        if url.host_str() != Some(host.as_str()) {
            url.set_host(Some(&host)).map_err(|e| SchedulerError::InvalidUrl {
                url: trimmed.to_string(),
                reason: e.to_string(),
            })?;
        }

        // `Url` already drops the scheme's default port and resolves dot
        // segments while parsing.
        url.set_fragment(None);

        // Filter and sort the raw `key=value` segments so their encoding is
        // preserved byte for byte; keys are decoded only for matching.
        let mut segments: Vec<&str> = url
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|segment| !segment.is_empty())
            .filter(|segment| {
                form_urlencoded::parse(segment.as_bytes())
                    .next()
                    .is_some_and(|(key, _)| self.keep_param(&key))
            })
            .collect();
        segments.sort_unstable();
        let query = segments.join("&");
        url.set_query((!query.is_empty()).then_some(query.as_str()));

        Ok(NormalizedUrl { url: Arc::new(url) })
    }

    fn keep_param(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        if self.allow.iter().any(|a| *a == key) {
            return true;
        }
        !self.deny.iter().any(|d| {
            if d.ends_with('_') {
                key.starts_with(d.as_str())
            } else {
                *d == key
            }
        })
    }
}
