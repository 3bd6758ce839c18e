//! Moderation endpoints. Every route requires a privileged actor.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{self, get, post},
};
use constcat::concat;
use serde::Deserialize;

use crate::{
    AppState, Result,
    models::{Actor, Post, PostStatus},
    moderation::ModerationEngine,
    storage::SqliteStore,
};

type Engine = ModerationEngine<SqliteStore>;

const POSTS: &str = "/admin/posts";
const POST: &str = concat!(POSTS, "/{id}");

#[derive(Deserialize, Debug)]
struct ListQuery {
    #[serde(default = "default_status")]
    status: PostStatus,
}

const fn default_status() -> PostStatus {
    PostStatus::Pending
}

async fn list(
    actor: Actor,
    State(engine): State<Engine>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Post>>> {
    Ok(Json(engine.list_by_status(&actor, query.status).await?))
}

async fn approve(
    actor: Actor,
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<Post>> {
    Ok(Json(engine.approve(&actor, &id).await?))
}

async fn reject(
    actor: Actor,
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<Post>> {
    Ok(Json(engine.reject(&actor, &id).await?))
}

/// Send a rejected post back to the review queue.
async fn restore(
    actor: Actor,
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<Json<Post>> {
    Ok(Json(engine.restore(&actor, &id).await?))
}

async fn delete(
    actor: Actor,
    State(engine): State<Engine>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    engine.delete(&actor, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) fn routes() -> Router<AppState> {
    // G /api/admin/posts
    // P /api/admin/posts/{id}/approve
    // P /api/admin/posts/{id}/reject
    // P /api/admin/posts/{id}/restore
    // D /api/admin/posts/{id}
    Router::new()
        .route(POSTS,                     get(list))
        .route(concat!(POST, "/approve"), post(approve))
        .route(concat!(POST, "/reject"),  post(reject))
        .route(concat!(POST, "/restore"), post(restore))
        .route(POST,                      routing::delete(delete))
}
