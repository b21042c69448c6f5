//! # ImageDiff Library
//!
//! This library exposes the ImageDiff modules for testing and integration.
//!
//! - [`api`]: backend API (screenshot catalog, diffs, static mounts)
//! - [`dev`]: dev server (page shell, public files, proxy)
//! - [`cli`]: command handlers behind the `imagediff` binary

pub mod api;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod dev;
pub mod error;

// Re-export imagediff_core for convenience
pub use imagediff_core;

/// Resolve on Ctrl-C, for graceful shutdown of either server.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
