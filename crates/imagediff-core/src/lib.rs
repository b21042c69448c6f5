//! # ImageDiff Core
//!
//! The deterministic logic behind ImageDiff.
//!
//! This crate knows how screenshots are named, how the dev proxy maps a
//! request path onto the backend, what the site configuration record holds,
//! and how two images are compared pixel by pixel. It performs no I/O:
//! images enter as encoded bytes and leave as encoded PNG bytes.
//!
//! ```text
//! ┌────────────────┐   /api/*   ┌────────────────┐   fs   ┌────────────────┐
//! │   dev server   │ ─────────► │  backend API   │ ─────► │  screenshots/  │
//! │ (site, proxy)  │            │ (catalog, diff)│        │ <t>/<b>/*.png  │
//! └────────────────┘            └────────────────┘        └────────────────┘
//!          ▲                             ▲
//!          └─────── imagediff-core ──────┘
//! ```

pub mod cache;
pub mod catalog;
pub mod diff;
pub mod error;
pub mod proxy;
pub mod site;
pub mod thumbnail;

pub use cache::{CacheStats, CachedDiff, DiffCache, DiffCacheKey, LruCache};
pub use diff::{DEFAULT_THRESHOLD, DiffOutcome, DiffRequest, DiffStats};
pub use error::{CoreError, Result};
pub use proxy::{ProxyRule, ProxyTable};
pub use site::{HeadLink, HeadMeta, SiteConfig, IMAGE_MODULE};
