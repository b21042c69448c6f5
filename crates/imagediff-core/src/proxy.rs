//! # Dev Proxy Rules
//!
//! Maps an incoming request path onto an upstream URL.
//!
//! A rule owns a path prefix and a target. The prefix is stripped from the
//! request path and the remainder is appended to the target. With
//! `prepend_path` set, the target's own path is kept in front of the
//! remainder, so under the default rule `/api/widgets` becomes
//! `http://127.0.0.1:8000/api/widgets`. With `change_origin` set, the
//! forwarded `Host` header is the target's authority instead of the
//! incoming one.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Prefix forwarded to the backend by default.
pub const DEFAULT_PREFIX: &str = "/api/";

/// Backend target used by the default rule.
pub const DEFAULT_TARGET: &str = "http://127.0.0.1:8000/api/";

fn default_true() -> bool {
    true
}

// =============================================================================
// PROXY RULE
// =============================================================================

/// A single forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRule {
    /// Request path prefix, e.g. `/api/`.
    pub prefix: String,

    /// Absolute upstream URL.
    pub target: String,

    /// Rewrite the `Host` header to the target authority.
    #[serde(default = "default_true", alias = "changeOrigin")]
    pub change_origin: bool,

    /// Keep the target's path in front of the forwarded remainder.
    #[serde(default = "default_true", alias = "prependPath")]
    pub prepend_path: bool,
}

impl ProxyRule {
    /// Create a rule with origin rewriting and path prepending enabled.
    #[must_use]
    pub fn new(prefix: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            target: target.into(),
            change_origin: true,
            prepend_path: true,
        }
    }

    /// The `/api/` -> `http://127.0.0.1:8000/api/` rule.
    #[must_use]
    pub fn default_api() -> Self {
        Self::new(DEFAULT_PREFIX, DEFAULT_TARGET)
    }

    /// Check that the prefix is rooted and the target is an absolute HTTP URL.
    pub fn validate(&self) -> Result<()> {
        if !self.prefix.starts_with('/') {
            return Err(self.invalid("prefix must start with '/'"));
        }
        let target = Url::parse(&self.target)
            .map_err(|e| self.invalid(&format!("target is not a URL: {}", e)))?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(self.invalid("target scheme must be http or https"));
        }
        if target.host_str().is_none() {
            return Err(self.invalid("target has no host"));
        }
        Ok(())
    }

    /// Whether the request path falls under this rule.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.prefix)
    }

    /// Resolve a request `path[?query]` to its upstream URL.
    ///
    /// Returns `Ok(None)` when the path does not match the prefix.
    pub fn resolve(&self, path_and_query: &str) -> Result<Option<Url>> {
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path_and_query, None),
        };

        let Some(remainder) = path.strip_prefix(self.prefix.as_str()) else {
            return Ok(None);
        };
        let remainder = remainder.trim_start_matches('/');
        if let Some(seg) = remainder.split('/').find(|seg| is_dot_segment(seg)) {
            return Err(CoreError::InvalidSegment(seg.to_string()));
        }

        let mut url = Url::parse(&self.target)?;
        let base = if self.prepend_path { url.path() } else { "/" };
        let base = base.trim_end_matches('/').to_string();
        let joined = if remainder.is_empty() {
            format!("{}/", base)
        } else {
            format!("{}/{}", base, remainder)
        };

        url.set_path(&joined);
        // set_path normalises dot segments; the result must stay under the base.
        if !url.path().starts_with(&format!("{}/", base)) {
            return Err(CoreError::InvalidSegment(remainder.to_string()));
        }
        url.set_query(query);
        url.set_fragment(None);
        Ok(Some(url))
    }

    /// The `Host` header to send upstream, or `None` to keep the incoming one.
    #[must_use]
    pub fn host_header(&self) -> Option<String> {
        if !self.change_origin {
            return None;
        }
        let url = Url::parse(&self.target).ok()?;
        let host = url.host_str()?;
        Some(match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    fn invalid(&self, reason: &str) -> CoreError {
        CoreError::InvalidProxyRule {
            prefix: self.prefix.clone(),
            reason: reason.to_string(),
        }
    }
}

/// `.` or `..`, including their percent-encoded spellings.
fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

// =============================================================================
// PROXY TABLE
// =============================================================================

/// Ordered set of rules; the longest matching prefix wins.
#[derive(Debug, Clone, Default)]
pub struct ProxyTable {
    rules: Vec<ProxyRule>,
}

impl ProxyTable {
    /// Build a table, sorting rules by descending prefix length.
    #[must_use]
    pub fn new(mut rules: Vec<ProxyRule>) -> Self {
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { rules }
    }

    /// Find the rule handling `path`.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&ProxyRule> {
        self.rules.iter().find(|r| r.matches(path))
    }

    /// Resolve a request against the table.
    pub fn resolve(&self, path_and_query: &str) -> Result<Option<(&ProxyRule, Url)>> {
        let path = path_and_query.split('?').next().unwrap_or_default();
        let Some(rule) = self.find(path) else {
            return Ok(None);
        };
        Ok(rule.resolve(path_and_query)?.map(|url| (rule, url)))
    }

    #[must_use]
    pub fn rules(&self) -> &[ProxyRule] {
        &self.rules
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
