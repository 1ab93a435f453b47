//! Local HTTP control API.
//!
//! Exposes favorites, manual wallpaper changes, the category preference
//! and the auto-wallpaper trigger over Axum.

pub mod routes;

use crate::config::Config;
use crate::favorites::DetailContext;
use axum::{
    routing::{get, post},
    Router,
};
use routes::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};

/// Web server errors
#[derive(Error, Debug)]
pub enum WebError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),

    #[error("Server error: {0}")]
    ServerError(String),
}

/// Web server
pub struct WebServer {
    state: AppState,
}

impl WebServer {
    /// Create a new web server sharing `config` with the scheduler
    pub fn new(
        ctx: DetailContext,
        trigger: mpsc::Sender<()>,
        config: Arc<RwLock<Config>>,
        config_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            state: AppState {
                ctx,
                trigger,
                config,
                config_path: config_path.into(),
            },
        }
    }

    /// Build the router with all routes
    fn build_router(&self) -> Router {
        router(self.state.clone())
    }

    /// Run the web server with graceful shutdown
    pub async fn run_with_shutdown(
        &self,
        port: u16,
        shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<(), WebError> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Web server listening on http://{}", addr);

        let mut shutdown = shutdown;
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Web server shutting down gracefully");
            })
            .await
            .map_err(|e| WebError::ServerError(e.to_string()))
    }
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/favorites", get(routes::list_favorites))
        .route("/images/:id", get(routes::image_status))
        .route("/images/:id/favorite", post(routes::favorite))
        .route("/images/:id/unfavorite", post(routes::unfavorite))
        .route("/images/:id/wallpaper", post(routes::set_wallpaper))
        .route("/category", get(routes::get_category).put(routes::put_category))
        .route("/rotate", post(routes::rotate))
        .with_state(state)
}
