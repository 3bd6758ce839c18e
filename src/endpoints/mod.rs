use axum::Router;

use crate::AppState;

mod admin;
mod payments;
mod posts;
mod submissions;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .merge(payments::routes())
        .merge(posts::routes())
        .merge(submissions::routes())
        .merge(admin::routes())
}
