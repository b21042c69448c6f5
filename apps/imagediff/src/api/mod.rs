//! # Backend API
//!
//! The server behind the dev proxy's `/api/` rule.
//!
//! | Route            | Body                               | Returns                  |
//! |------------------|------------------------------------|--------------------------|
//! | `POST /api/targets` | (ignored)                       | target names             |
//! | `POST /api/builds`  | `{target}`                      | builds, numeric first    |
//! | `POST /api/movies`  | `{target, build}`               | unique movie names       |
//! | `POST /api/frames`  | `{target, build, movie}`        | frames of the movie      |
//! | `POST /api/image`   | `{target, build, movie, frame}` | the PNG                  |
//! | `POST /api/diff`    | `{imageA, imageB, threshold?, save?}` | transparent diff PNG |
//!
//! Screenshots and saved diffs are also served statically under
//! `/screenshots` and `/diff_images`.

pub mod auth;

use crate::catalog::{ScreenshotCatalog, modified_stamp};
use crate::config::ServerConfig;
use crate::error::{AppError, Result};
use auth::ApiGuard;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use imagediff_core::cache::CachedDiff;
use imagediff_core::diff::{self, DiffRequest, DiffStats};
use imagediff_core::{DiffCache, DiffCacheKey};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// URL prefix of saved diffs.
pub const DIFF_IMAGES_MOUNT: &str = "/diff_images";

// =============================================================================
// STATE
// =============================================================================

/// Shared state of the backend API.
#[derive(Debug, Clone)]
pub struct AppState {
    pub catalog: Arc<ScreenshotCatalog>,
    pub diff_output_dir: Arc<PathBuf>,
    pub cache: Arc<Mutex<DiffCache>>,
    pub guard: Arc<ApiGuard>,
}

impl AppState {
    /// Build state from configuration, creating the diff output directory.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.diff_output_dir)?;
        Ok(Self {
            catalog: Arc::new(ScreenshotCatalog::new(&config.screenshots_dir)),
            diff_output_dir: Arc::new(config.diff_output_dir.clone()),
            cache: Arc::new(Mutex::new(DiffCache::new(config.diff_cache_size))),
            guard: Arc::new(ApiGuard::new(
                config.api_key.clone(),
                config.rate_limit_per_second,
            )),
        })
    }
}

// =============================================================================
// REQUEST BODIES
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct BuildsRequest {
    pub target: String,
}

#[derive(Debug, Deserialize)]
pub struct MoviesRequest {
    pub target: String,
    pub build: String,
}

#[derive(Debug, Deserialize)]
pub struct FramesRequest {
    pub target: String,
    pub build: String,
    pub movie: String,
}

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub target: String,
    pub build: String,
    pub movie: String,
    pub frame: String,
}

/// Unwrap a JSON body, reporting rejections in the API's error format.
fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

/// Run blocking filesystem or image work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

// =============================================================================
// ROUTER
// =============================================================================

/// Build the API router.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/targets", post(list_targets))
        .route("/builds", post(list_builds))
        .route("/movies", post(list_movies))
        .route("/frames", post(list_frames))
        .route("/image", post(get_image))
        .route("/diff", post(create_diff))
        .route_layer(middleware::from_fn_with_state(
            state.guard.clone(),
            auth::require_api_access,
        ));

    Router::new()
        .route("/", get(landing))
        .route("/favicon.ico", get(favicon))
        .route("/health", get(health))
        .nest("/api", api)
        .nest_service("/screenshots", ServeDir::new(state.catalog.root()))
        .nest_service(DIFF_IMAGES_MOUNT, ServeDir::new(state.diff_output_dir.as_path()))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve the API until Ctrl-C.
pub async fn serve(config: &ServerConfig) -> Result<()> {
    let state = AppState::from_config(config)?;
    if !state.catalog.root().is_dir() {
        tracing::warn!(
            root = %state.catalog.root().display(),
            "Screenshot root does not exist yet"
        );
    }

    let app = create_router(state);
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        screenshots = %config.screenshots_dir.display(),
        "Backend API listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(crate::shutdown_signal())
        .await?;
    info!("Backend API stopped");
    Ok(())
}

// =============================================================================
// HANDLERS
// =============================================================================

const LANDING_PAGE: &str = r#"<!DOCTYPE html>
<html>
    <head>
        <title>ImageDiff API</title>
        <style>
            body { font-family: Arial, sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; }
            h1 { color: #333; }
            code { background: #f4f4f4; padding: 2px 4px; }
        </style>
    </head>
    <body>
        <h1>ImageDiff API</h1>
        <p>Screenshot catalog and pixel diff service.</p>
        <p>Endpoints accept <code>POST</code> with JSON bodies under <code>/api/</code>.</p>
    </body>
</html>
"#;

async fn landing() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

async fn favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_targets(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    let catalog = state.catalog.clone();
    let targets = blocking(move || catalog.targets()).await?;
    Ok(Json(targets))
}

async fn list_builds(
    State(state): State<AppState>,
    payload: std::result::Result<Json<BuildsRequest>, JsonRejection>,
) -> Result<Json<Vec<String>>> {
    let req = body(payload)?;
    let catalog = state.catalog.clone();
    let builds = blocking(move || catalog.builds(&req.target)).await?;
    Ok(Json(builds))
}

async fn list_movies(
    State(state): State<AppState>,
    payload: std::result::Result<Json<MoviesRequest>, JsonRejection>,
) -> Result<Json<Vec<String>>> {
    let req = body(payload)?;
    let catalog = state.catalog.clone();
    let movies = blocking(move || catalog.movies(&req.target, &req.build)).await?;
    debug!(count = movies.len(), "Listed movies");
    Ok(Json(movies))
}

async fn list_frames(
    State(state): State<AppState>,
    payload: std::result::Result<Json<FramesRequest>, JsonRejection>,
) -> Result<Json<Vec<String>>> {
    let req = body(payload)?;
    let catalog = state.catalog.clone();
    let frames = blocking(move || catalog.frames(&req.target, &req.build, &req.movie)).await?;
    Ok(Json(frames))
}

async fn get_image(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    let catalog = state.catalog.clone();
    let file_name = imagediff_core::catalog::image_file_name(&req.movie, &req.frame);
    let path =
        blocking(move || catalog.image_path(&req.target, &req.build, &req.movie, &req.frame))
            .await?;
    let bytes = tokio::fs::read(&path).await?;

    let disposition = HeaderValue::from_str(&format!("inline; filename=\"{}\"", file_name))
        .map_err(|e| AppError::BadRequest(format!("Invalid file name: {}", e)))?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(CONTENT_DISPOSITION, disposition);
    Ok((headers, bytes).into_response())
}

async fn create_diff(
    State(state): State<AppState>,
    payload: std::result::Result<Json<DiffRequest>, JsonRejection>,
) -> Result<Response> {
    let req = body(payload)?;
    let threshold = diff::check_threshold(req.threshold)?;

    let catalog = state.catalog.clone();
    let (image_a, image_b) = (req.image_a.clone(), req.image_b.clone());
    let (path_a, path_b, stamps) = blocking(move || {
        let a = catalog.resolve_image(&image_a)?;
        let b = catalog.resolve_image(&image_b)?;
        let stamps = (modified_stamp(&a), modified_stamp(&b));
        Ok((a, b, stamps))
    })
    .await?;

    let key = DiffCacheKey::new(
        path_a.display().to_string(),
        path_b.display().to_string(),
        stamps,
        threshold,
    );

    let cached = lock_cache(&state)?.get(&key);
    let result = match cached {
        Some(hit) => {
            debug!(image_a = %req.image_a, image_b = %req.image_b, "Diff cache hit");
            hit
        }
        None => {
            let computed = blocking(move || {
                let a = std::fs::read(&path_a)?;
                let b = std::fs::read(&path_b)?;
                let outcome = diff::generate(&a, &b, threshold)?;
                Ok(CachedDiff {
                    stats: outcome.stats,
                    png: outcome.png.into(),
                })
            })
            .await?;
            lock_cache(&state)?.insert(key.clone(), computed.clone());
            computed
        }
    };

    info!(
        image_a = %req.image_a,
        image_b = %req.image_b,
        threshold,
        different_pixels = result.stats.different_pixels,
        "Generated diff"
    );

    let mut headers = stats_headers(&result.stats)?;
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));

    if req.save {
        let name = saved_name(&key);
        let target = state.diff_output_dir.join(&name);
        tokio::fs::write(&target, &result.png[..]).await?;
        let url = format!("{}/{}", DIFF_IMAGES_MOUNT, name);
        headers.insert(
            HeaderName::from_static("x-diff-image-url"),
            HeaderValue::from_str(&url).map_err(|e| AppError::Internal(e.to_string()))?,
        );
        debug!(path = %target.display(), "Saved diff image");
    }

    Ok((headers, result.png.to_vec()).into_response())
}

fn lock_cache(state: &AppState) -> Result<std::sync::MutexGuard<'_, DiffCache>> {
    state
        .cache
        .lock()
        .map_err(|_| AppError::Internal("Diff cache lock poisoned".to_string()))
}

/// Headers carrying diff statistics.
pub fn stats_headers(stats: &DiffStats) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("x-different-pixels"),
        HeaderValue::from(stats.different_pixels),
    );
    headers.insert(
        HeaderName::from_static("x-difference-percentage"),
        HeaderValue::from_str(&diff::format_percentage(stats.difference_percentage))
            .map_err(|e| AppError::Internal(e.to_string()))?,
    );
    headers.insert(
        HeaderName::from_static("x-image-width"),
        HeaderValue::from(stats.width),
    );
    headers.insert(
        HeaderName::from_static("x-image-height"),
        HeaderValue::from(stats.height),
    );
    Ok(headers)
}

/// File name for a saved diff, fixed for a given key.
pub fn saved_name(key: &DiffCacheKey) -> String {
    let stem = |p: &str| {
        Path::new(p)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
            .to_string()
    };
    format!(
        "{}_vs_{}_{}.png",
        stem(&key.image_a),
        stem(&key.image_b),
        key.fingerprint()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saved_name_uses_stems_and_fingerprint() {
        let key = DiffCacheKey::new("/shots/web/12/home-1.png", "/shots/web/13/home-1.png", (7, 9), 5.0);
        let name = saved_name(&key);
        assert_eq!(name, format!("home-1_vs_home-1_{}.png", key.fingerprint()));
        assert_eq!(name, saved_name(&key.clone()));
    }

    #[test]
    fn saved_name_changes_with_threshold() {
        let a = DiffCacheKey::new("a.png", "b.png", (1, 1), 5.0);
        let b = DiffCacheKey::new("a.png", "b.png", (1, 1), 10.0);
        assert_ne!(saved_name(&a), saved_name(&b));
    }
}
