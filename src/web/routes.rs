//! HTTP route handlers.
//!
//! Every image action opens a detail view, performs one action and closes
//! the view again, so the teardown rules apply exactly as for an
//! interactive session.

use crate::catalog::FetchError;
use crate::config::{Config, CATEGORIES};
use crate::favorites::{DetailContext, DetailError, FavoriteEntry, FavoriteState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ctx: DetailContext,
    pub trigger: mpsc::Sender<()>,
    pub config: Arc<RwLock<Config>>,
    pub config_path: PathBuf,
}

/// Result of an image action
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ActionResponse {
    pub image_id: String,
    pub favorite: bool,
    pub message: String,
    /// Favorite state the view ended in
    pub state: FavoriteState,
}

/// Favorite state of one image
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageStatus {
    pub image_id: String,
    pub favorite: bool,
    pub busy: bool,
    pub favorite_action_visible: bool,
}

/// Category preference
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CategoryPreference {
    pub category: String,
}

/// Category preference and the index sent to the catalog
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CategoryResponse {
    pub category: String,
    pub index: usize,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Favorite,
    Unfavorite,
    Wallpaper,
}

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}

/// GET /favorites - newest first
pub async fn list_favorites(
    State(state): State<AppState>,
) -> Result<Json<Vec<FavoriteEntry>>, (StatusCode, String)> {
    state
        .ctx
        .store
        .list()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// GET /images/:id
pub async fn image_status(State(state): State<AppState>, Path(id): Path<String>) -> Json<ImageStatus> {
    let favorite = state.ctx.stored_entry(&id).is_some();
    let busy = state.ctx.in_flight().contains(&id);

    Json(ImageStatus {
        image_id: id,
        favorite,
        busy,
        favorite_action_visible: !favorite && !busy,
    })
}

/// POST /images/:id/favorite
pub async fn favorite(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ActionResponse>) {
    run_action(&state.ctx, id, Action::Favorite).await
}

/// POST /images/:id/unfavorite
pub async fn unfavorite(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ActionResponse>) {
    run_action(&state.ctx, id, Action::Unfavorite).await
}

/// POST /images/:id/wallpaper
pub async fn set_wallpaper(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ActionResponse>) {
    run_action(&state.ctx, id, Action::Wallpaper).await
}

/// GET /category
pub async fn get_category(State(state): State<AppState>) -> Json<CategoryResponse> {
    let config = state.config.read().await;
    let index = config.category_index();
    Json(CategoryResponse {
        category: CATEGORIES[index].to_string(),
        index,
    })
}

/// PUT /category - validate, save, and use for the next auto-wallpaper run
pub async fn put_category(
    State(state): State<AppState>,
    Json(update): Json<CategoryPreference>,
) -> Result<Json<CategoryResponse>, (StatusCode, String)> {
    let mut config = state.config.write().await;

    let mut updated = config.clone();
    updated.category = update.category.trim().to_string();
    updated
        .validate()
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    updated
        .save(&state.config_path)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    tracing::info!("Category preference set to '{}'", updated.category);
    *config = updated;

    let index = config.category_index();
    Ok(Json(CategoryResponse {
        category: CATEGORIES[index].to_string(),
        index,
    }))
}

/// POST /rotate - queue an auto-wallpaper run
pub async fn rotate(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match state.trigger.try_send(()) {
        Ok(()) => (StatusCode::ACCEPTED, "Wallpaper change queued"),
        Err(TrySendError::Full(())) => (
            StatusCode::TOO_MANY_REQUESTS,
            "A wallpaper change is already pending",
        ),
        Err(TrySendError::Closed(())) => (StatusCode::SERVICE_UNAVAILABLE, "Scheduler is not running"),
    }
}

async fn run_action(ctx: &DetailContext, id: String, action: Action) -> (StatusCode, Json<ActionResponse>) {
    let respond = |status: StatusCode, state: FavoriteState, message: String| {
        (
            status,
            Json(ActionResponse {
                image_id: id.clone(),
                favorite: state == FavoriteState::Favorited,
                message,
                state,
            }),
        )
    };

    let image = if let Action::Unfavorite = action {
        // Only stored favorites can be unfavorited; no catalog lookup
        match ctx.stored_entry(&id) {
            Some(entry) => entry.image,
            None => return respond(StatusCode::OK, FavoriteState::Idle, "Not a favorite".to_string()),
        }
    } else {
        match ctx.resolve_image(&id).await {
            Ok(image) => image,
            Err(e @ FetchError::NotFound(_)) => {
                return respond(StatusCode::NOT_FOUND, FavoriteState::Idle, e.to_string());
            }
            Err(e) => return respond(StatusCode::BAD_GATEWAY, FavoriteState::Idle, e.to_string()),
        }
    };

    let view = ctx.open(image);
    let result = match action {
        Action::Favorite => view.set_as_favorite().await.map(|_| ()),
        Action::Unfavorite => view.unset_as_favorite().await,
        Action::Wallpaper => view.set_as_wallpaper().await,
    };

    let favorite_state = view.state();
    let status_message = view.status().map(|s| s.to_string());
    if let Err(e) = view.teardown().await {
        tracing::warn!("Closing detail view for {} failed: {}", id, e);
    }

    match result {
        Ok(()) => respond(StatusCode::OK, favorite_state, status_message.unwrap_or_default()),
        Err(e) => {
            let message = status_message.unwrap_or_else(|| e.to_string());
            respond(status_for(&e), favorite_state, message)
        }
    }
}

fn status_for(error: &DetailError) -> StatusCode {
    match error {
        DetailError::Busy(_) => StatusCode::CONFLICT,
        DetailError::Fetch(_) => StatusCode::BAD_GATEWAY,
        DetailError::Cache(_)
        | DetailError::Persistence(_)
        | DetailError::Platform(_)
        | DetailError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
