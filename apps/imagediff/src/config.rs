//! # Configuration
//!
//! TOML configuration for both servers (`imagediff.toml` by default).
//!
//! ```toml
//! [server]
//! port = 8000
//! screenshots_dir = "screenshots"
//!
//! [dev]
//! port = 3000
//! variant = "minimal"
//!
//! [site]            # optional, replaces the variant preset entirely
//! devtools = false
//! ```
//!
//! Every section and field is optional. CLI flags override file values.

use crate::error::{AppError, Result};
use imagediff_core::SiteConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "imagediff.toml";

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "IMAGEDIFF_API_KEY";

// =============================================================================
// SECTIONS
// =============================================================================

/// Backend API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Root of the `<target>/<build>/<movie>-<frame>.png` tree.
    pub screenshots_dir: PathBuf,
    /// Where saved diffs are written and served from.
    pub diff_output_dir: PathBuf,
    /// Require this key on `/api/*` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Global request budget for `/api/*`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_second: Option<u32>,
    pub diff_cache_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            screenshots_dir: PathBuf::from("screenshots"),
            diff_output_dir: PathBuf::from("diff_images"),
            api_key: None,
            rate_limit_per_second: None,
            diff_cache_size: imagediff_core::cache::DEFAULT_CACHE_SIZE,
        }
    }
}

/// Which site preset the dev server starts from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SiteVariant {
    /// Title, language attribute and favicon declared.
    #[default]
    WithHead,
    /// No head metadata.
    Minimal,
}

impl SiteVariant {
    #[must_use]
    pub fn preset(self) -> SiteConfig {
        match self {
            Self::WithHead => SiteConfig::with_head(),
            Self::Minimal => SiteConfig::minimal(),
        }
    }
}

/// Dev server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevConfig {
    pub host: String,
    pub port: u16,
    /// Static files and optional `index.html` shell.
    pub public_dir: PathBuf,
    pub variant: SiteVariant,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            public_dir: PathBuf::from("public"),
            variant: SiteVariant::WithHead,
        }
    }
}

// =============================================================================
// APP CONFIG
// =============================================================================

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub dev: DevConfig,
    /// Explicit site record; overrides `dev.variant` when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<SiteConfig>,
}

impl AppConfig {
    /// Parse configuration text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.site().validate()?;
        Ok(config)
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, [`DEFAULT_CONFIG_FILE`] is
    /// read if present and defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    AppError::NotFound(format!("Cannot read config {}: {}", p.display(), e))
                })?;
                tracing::debug!(path = %p.display(), "Loaded configuration file");
                Self::from_toml_str(&text)?
            }
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    let text = std::fs::read_to_string(default)?;
                    tracing::debug!(path = DEFAULT_CONFIG_FILE, "Loaded configuration file");
                    Self::from_toml_str(&text)?
                } else {
                    Self::default()
                }
            }
        };

        if config.server.api_key.is_none() {
            config.server.api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        }
        Ok(config)
    }

    /// The site record in effect.
    #[must_use]
    pub fn site(&self) -> SiteConfig {
        self.site.clone().unwrap_or_else(|| self.dev.variant.preset())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| AppError::Internal(format!("Cannot render configuration: {}", e)))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use imagediff_core::IMAGE_MODULE;

    #[test]
    fn empty_file_yields_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.dev.port, 3000);
        assert_eq!(config.site().title(), Some("ImageDiff"));
    }

    #[test]
    fn variant_selects_preset() {
        let config = AppConfig::from_toml_str("[dev]\nvariant = \"minimal\"\n").unwrap();
        assert_eq!(config.dev.variant, SiteVariant::Minimal);
        assert!(config.site().head.is_none());
        assert_eq!(config.site().modules, vec![IMAGE_MODULE.to_string()]);
    }

    #[test]
    fn explicit_site_section_wins() {
        let text = r#"
[dev]
variant = "minimal"

[site]
devtools = false
modules = []

[[site.dev_proxy]]
prefix = "/api/"
target = "http://10.0.0.5:8000/api/"
"#;
        let config = AppConfig::from_toml_str(text).unwrap();
        let site = config.site();
        assert!(!site.devtools);
        assert!(!site.image_module_enabled());
        assert_eq!(site.dev_proxy[0].target, "http://10.0.0.5:8000/api/");
        assert!(site.dev_proxy[0].change_origin);
    }

    #[test]
    fn invalid_proxy_rule_is_rejected() {
        let text = "[site]\n[[site.dev_proxy]]\nprefix = \"api\"\ntarget = \"http://x/\"\n";
        assert!(AppConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(
            AppConfig::from_toml_str("[server\nport = 1"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn renders_back_to_toml() {
        let text = AppConfig::default().to_toml().unwrap();
        assert!(text.contains("[server]"));
        assert!(text.contains("port = 8000"));
        let reparsed = AppConfig::from_toml_str(&text).unwrap();
        assert_eq!(reparsed.server, ServerConfig::default());
    }
}
