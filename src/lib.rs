//! "The Links": payment-gated link curation for Pi Network pioneers.
mod auth;
pub mod config;
mod endpoints;
pub mod engagement;
pub mod error;
pub mod feed;
mod metrics;
pub mod models;
pub mod moderation;
pub mod payment;
mod serve;
pub mod storage;
pub mod submission;

pub use serve::run;
use serve::{AppState, Error, Result};

/// The index (/) route.
async fn index() -> impl axum::response::IntoResponse {
    r"
  _____ _            _     _       _
 |_   _| |__   ___  | |   (_)_ __ | | _____
   | | | '_ \ / _ \ | |   | | '_ \| |/ / __|
   | | | | | |  __/ | |___| | | | |   <\__ \
   |_| |_| |_|\___| |_____|_|_| |_|_|\_\___/


Community-curated links for Pi Network pioneers.

Most API routes are under /api/

      Feed: GET /api/feed
    Submit: POST /api/submissions
    "
}
