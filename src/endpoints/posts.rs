//! Public feed and engagement.

use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    AppState, Result,
    engagement::{EngagementTracker, LikeState, ViewSessions},
    feed::{self, Feed},
    models::{Actor, Category},
    storage::{ContentStore, SqliteStore},
};

#[derive(Deserialize, Debug)]
struct FeedQuery {
    category: Option<Category>,
}

async fn get_feed(
    State(store): State<ContentStore<SqliteStore>>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Feed>> {
    let posts = store.list_approved().await?;
    Ok(Json(feed::rank(&posts, query.category)))
}

/// Counting a view never fails from the reader's side.
///
/// Readers are anonymous, so a session is per client address: repeat views
/// from one address count once until the session goes idle.
async fn record_view(
    State(engagement): State<EngagementTracker<SqliteStore>>,
    State(views): State<ViewSessions>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    Path(id): Path<String>,
) -> StatusCode {
    _ = views.view(&engagement, &client.ip().to_string(), &id).await;
    StatusCode::NO_CONTENT
}

async fn get_like(
    actor: Actor,
    State(engagement): State<EngagementTracker<SqliteStore>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let liked = engagement.has_liked(&id, &actor.id).await?;
    Ok(Json(json!({ "liked": liked })))
}

async fn toggle_like(
    actor: Actor,
    State(engagement): State<EngagementTracker<SqliteStore>>,
    Path(id): Path<String>,
) -> Result<Json<LikeState>> {
    Ok(Json(engagement.toggle_like(&id, &actor.id).await?))
}

pub(super) fn routes() -> Router<AppState> {
    // G /api/feed
    // P /api/posts/{id}/view
    // A /api/posts/{id}/like
    Router::new()
        .route("/feed",            get(get_feed))
        .route("/posts/{id}/view", post(record_view))
        .route("/posts/{id}/like", get(get_like).post(toggle_like))
}
