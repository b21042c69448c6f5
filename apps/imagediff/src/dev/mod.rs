//! # Dev Server
//!
//! The local development front door.
//!
//! Resolution order for every request:
//! 1. `/__devtools` and `/_image` (each answers 404 while its flag is off)
//! 2. dev proxy rules, any method
//! 3. `/` and extensionless page routes: the page shell
//! 4. files from the public directory
//!
//! The page shell is `<public>/index.html` with [`HEAD_PLACEHOLDER`]
//! replaced by the rendered head, or a generated document when no such
//! file exists.

pub mod image;
pub mod proxy;

use crate::config::DevConfig;
use crate::error::{AppError, Result};
use axum::Router;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use imagediff_core::catalog::validate_segment;
use imagediff_core::site::{render_document, render_head};
use imagediff_core::{ProxyRule, ProxyTable, SiteConfig};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Marker in `index.html` replaced by the rendered head.
pub const HEAD_PLACEHOLDER: &str = "<!--imagediff-head-->";

/// Body of the generated page shell.
const APP_MOUNT: &str = "<div id=\"app\"></div>";

// =============================================================================
// STATE
// =============================================================================

/// Shared state of the dev server.
#[derive(Debug, Clone)]
pub struct DevState {
    pub site: Arc<SiteConfig>,
    pub proxy: Arc<ProxyTable>,
    pub client: reqwest::Client,
    pub public_dir: Arc<PathBuf>,
}

impl DevState {
    /// Validate the site record and prepare the proxy client.
    pub fn new(site: SiteConfig, public_dir: impl Into<PathBuf>) -> Result<Self> {
        site.validate()?;
        let proxy = ProxyTable::new(site.dev_proxy.clone());
        Ok(Self {
            site: Arc::new(site),
            proxy: Arc::new(proxy),
            client: proxy::build_client()?,
            public_dir: Arc::new(public_dir.into()),
        })
    }
}

// =============================================================================
// ROUTER
// =============================================================================

/// Build the dev server router.
pub fn create_router(state: DevState) -> Router {
    Router::new()
        .route("/__devtools", get(devtools))
        .route("/_image", get(image::resize))
        .fallback(dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the dev server until Ctrl-C.
pub async fn serve(config: &DevConfig, site: SiteConfig) -> Result<()> {
    let state = DevState::new(site, &config.public_dir)?;
    for rule in state.proxy.rules() {
        info!(
            prefix = %rule.prefix,
            target = %rule.target,
            change_origin = rule.change_origin,
            prepend_path = rule.prepend_path,
            "Dev proxy rule"
        );
    }

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        title = ?state.site.title(),
        devtools = state.site.devtools,
        modules = ?state.site.modules,
        "Dev server listening"
    );
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(crate::shutdown_signal())
        .await?;
    info!("Dev server stopped");
    Ok(())
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Debug, Serialize)]
struct DevtoolsReport<'a> {
    version: &'static str,
    site: &'a SiteConfig,
    proxy: &'a [ProxyRule],
    public_dir: String,
    image_module: bool,
}

async fn devtools(State(state): State<DevState>) -> Result<Json<serde_json::Value>> {
    if !state.site.devtools {
        return Err(AppError::NotFound("Devtools are disabled".to_string()));
    }
    let report = DevtoolsReport {
        version: env!("CARGO_PKG_VERSION"),
        site: &state.site,
        proxy: state.proxy.rules(),
        public_dir: state.public_dir.display().to_string(),
        image_module: state.site.image_module_enabled(),
    };
    let value = serde_json::to_value(&report).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(value))
}

async fn dispatch(State(state): State<DevState>, req: Request) -> Result<Response> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    if let Some((rule, target)) = state.proxy.resolve(&path_and_query)? {
        return proxy::forward(&state.client, rule, target, req).await;
    }

    let path = req.uri().path().to_string();
    if req.method() != Method::GET && req.method() != Method::HEAD {
        return Err(AppError::NotFound(format!("No route for {} {}", req.method(), path)));
    }
    if path == "/" || path == "/index.html" {
        return page_shell(&state).await;
    }

    let served = match ServeDir::new(state.public_dir.as_path())
        .append_index_html_on_directories(false)
        .oneshot(req)
        .await
    {
        Ok(res) => res,
        Err(never) => match never {},
    };
    if served.status() != StatusCode::NOT_FOUND {
        return Ok(served.into_response());
    }

    if is_page_route(&path) {
        page_shell(&state).await
    } else {
        Err(AppError::NotFound(format!("File not found: {}", path)))
    }
}

/// Page routes have no file extension in their last segment.
fn is_page_route(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or_default();
    !last.contains('.')
}

async fn page_shell(state: &DevState) -> Result<Response> {
    let index = state.public_dir.join("index.html");
    let html = match tokio::fs::read_to_string(&index).await {
        Ok(template) => inject_head(&template, &state.site),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            render_document(&state.site, APP_MOUNT)
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Html(html).into_response())
}

/// Replace [`HEAD_PLACEHOLDER`] in a template with the rendered head.
#[must_use]
pub fn inject_head(template: &str, site: &SiteConfig) -> String {
    template.replace(HEAD_PLACEHOLDER, &render_head(site))
}

/// Resolve a public URL path to a file inside `public_dir`.
pub fn public_file(public_dir: &Path, src: &str) -> Result<PathBuf> {
    let mut path = public_dir.to_path_buf();
    for component in Path::new(src.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| AppError::BadRequest(format!("Invalid path: {}", src)))?;
                validate_segment(part)?;
                path.push(part);
            }
            Component::CurDir => {}
            _ => {
                return Err(AppError::BadRequest(format!(
                    "Path escapes the public directory: {}",
                    src
                )));
            }
        }
    }
    if !path.is_file() {
        return Err(AppError::NotFound(format!("File not found: {}", src)));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_routes_have_no_extension() {
        assert!(is_page_route("/compare"));
        assert!(is_page_route("/targets/alpha/"));
        assert!(!is_page_route("/assets/app.js"));
    }

    #[test]
    fn placeholder_is_replaced() {
        let html = inject_head(
            "<html><head><!--imagediff-head--></head></html>",
            &SiteConfig::with_head(),
        );
        assert!(html.contains("<title>ImageDiff</title>"));
        assert!(!html.contains(HEAD_PLACEHOLDER));
    }

    #[test]
    fn public_file_rejects_parent_components() {
        let dir = std::env::temp_dir();
        assert!(matches!(
            public_file(&dir, "/../etc/passwd"),
            Err(AppError::BadRequest(_))
        ));
    }
}
