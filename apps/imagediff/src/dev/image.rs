//! `/_image`: resized PNGs from the public directory.
//!
//! Active only while the image module is enabled.

use super::{DevState, public_file};
use crate::error::{AppError, Result};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::HeaderValue;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use imagediff_core::thumbnail;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ImageParams {
    /// Public path of the source image, e.g. `/img/logo.png`.
    pub src: String,
    pub w: Option<u32>,
    pub h: Option<u32>,
}

pub async fn resize(
    State(state): State<DevState>,
    params: std::result::Result<Query<ImageParams>, QueryRejection>,
) -> Result<Response> {
    if !state.site.image_module_enabled() {
        return Err(AppError::NotFound("Image module is not enabled".to_string()));
    }
    let Query(params) = params.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let path = public_file(&state.public_dir, &params.src)?;
    let bytes = tokio::fs::read(&path).await?;
    let (w, h) = (params.w, params.h);
    let png = tokio::task::spawn_blocking(move || thumbnail::resize_png(&bytes, w, h)).await??;

    tracing::debug!(src = %params.src, ?w, ?h, "Resized image");
    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static("image/png")),
            (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        png,
    )
        .into_response())
}
