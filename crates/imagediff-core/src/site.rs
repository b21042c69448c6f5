//! # Site Configuration Record
//!
//! The front-end configuration read once at startup: page head metadata,
//! dev proxy rules and enabled feature flags. Nothing here mutates after
//! construction; the dev server holds it behind an `Arc`.
//!
//! Two presets exist. [`SiteConfig::with_head`] declares the title, language
//! and favicon; [`SiteConfig::minimal`] declares no head metadata and leaves
//! the page on built-in defaults. Both share the same proxy rule and module
//! list.

use crate::error::{CoreError, Result};
use crate::proxy::ProxyRule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Identifier of the image module (on-the-fly resizing endpoint).
pub const IMAGE_MODULE: &str = "@nuxt/image";

/// Title declared by the head-carrying preset.
pub const DEFAULT_TITLE: &str = "ImageDiff";

/// Favicon path declared by the head-carrying preset.
pub const FAVICON_HREF: &str = "/favicon.ico";

/// Compatibility date pinned by both presets.
pub const COMPATIBILITY_DATE: &str = "2025-03-25";

// =============================================================================
// HEAD METADATA
// =============================================================================

/// A `<link>` element rendered into the page head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadLink {
    pub rel: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    pub href: String,
}

impl HeadLink {
    #[must_use]
    pub fn new(rel: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            link_type: None,
            href: href.into(),
        }
    }

    #[must_use]
    pub fn with_type(mut self, link_type: impl Into<String>) -> Self {
        self.link_type = Some(link_type.into());
        self
    }
}

/// Static `<head>` content shared by every page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Value of the `lang` attribute on `<html>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_lang: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<HeadLink>,
}

// =============================================================================
// SITE CONFIG
// =============================================================================

/// The configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Head metadata; `None` means built-in defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<HeadMeta>,

    /// Whether the `/__devtools` endpoint is exposed.
    pub devtools: bool,

    /// Enabled module identifiers.
    pub modules: Vec<String>,

    /// Dev proxy rules, applied only by the dev server.
    pub dev_proxy: Vec<ProxyRule>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compatibility_date: Option<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self::with_head()
    }
}

impl SiteConfig {
    /// Preset carrying title, language attribute and favicon link.
    #[must_use]
    pub fn with_head() -> Self {
        Self {
            head: Some(HeadMeta {
                title: Some(DEFAULT_TITLE.to_string()),
                html_lang: Some("en".to_string()),
                links: vec![HeadLink::new("icon", FAVICON_HREF).with_type("image/x-icon")],
            }),
            ..Self::minimal()
        }
    }

    /// Preset without head metadata.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            head: None,
            devtools: true,
            modules: vec![IMAGE_MODULE.to_string()],
            dev_proxy: vec![ProxyRule::default_api()],
            compatibility_date: Some(COMPATIBILITY_DATE.to_string()),
        }
    }

    /// Check whether a module identifier is enabled.
    #[must_use]
    pub fn module_enabled(&self, id: &str) -> bool {
        self.modules.iter().any(|m| m == id)
    }

    /// Shorthand for the image module flag.
    #[must_use]
    pub fn image_module_enabled(&self) -> bool {
        self.module_enabled(IMAGE_MODULE)
    }

    /// Page title, if declared.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.head.as_ref().and_then(|h| h.title.as_deref())
    }

    /// Validate the proxy table.
    ///
    /// Every rule must be well formed and prefixes must be unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for rule in &self.dev_proxy {
            rule.validate()?;
            if !seen.insert(rule.prefix.as_str()) {
                return Err(CoreError::DuplicatePrefix(rule.prefix.clone()));
            }
        }
        Ok(())
    }
}

// =============================================================================
// RENDERING
// =============================================================================

/// Escape text for use in HTML content and double-quoted attributes.
#[must_use]
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Render the inner content of `<head>`.
///
/// Charset and viewport are always emitted; title and links only when
/// declared.
#[must_use]
pub fn render_head(config: &SiteConfig) -> String {
    let mut out = String::new();
    out.push_str("<meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");

    if let Some(head) = &config.head {
        if let Some(title) = &head.title {
            out.push_str(&format!("<title>{}</title>\n", escape_html(title)));
        }
        for link in &head.links {
            out.push_str(&format!("<link rel=\"{}\"", escape_html(&link.rel)));
            if let Some(t) = &link.link_type {
                out.push_str(&format!(" type=\"{}\"", escape_html(t)));
            }
            out.push_str(&format!(" href=\"{}\">\n", escape_html(&link.href)));
        }
    }

    out
}

/// Render a complete HTML document around `body`.
///
/// `body` is inserted verbatim.
#[must_use]
pub fn render_document(config: &SiteConfig, body: &str) -> String {
    let lang = config
        .head
        .as_ref()
        .and_then(|h| h.html_lang.as_deref())
        .map(|l| format!(" lang=\"{}\"", escape_html(l)))
        .unwrap_or_default();

    format!(
        "<!DOCTYPE html>\n<html{lang}>\n<head>\n{head}</head>\n<body>\n{body}\n</body>\n</html>\n",
        lang = lang,
        head = render_head(config),
        body = body,
    )
}

// =============================================================================
// TESTS
// =============================================================================
