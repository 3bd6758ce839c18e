//! Wallet access token authentication.

use anyhow::anyhow;
use axum::{extract::FromRequestParts, http::StatusCode};
use metrics::counter;
use tracing::debug;

use crate::{
    AppState, Error,
    metrics::AUTH_FAILED,
    models::Actor,
    payment::PlatformError,
};

/// Pull the bearer token out of an `Authorization` header value.
fn bearer(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for Actor {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(bearer)
            .ok_or_else(|| {
                counter!(AUTH_FAILED).increment(1);
                Error::unauthenticated(anyhow!("no access token provided"))
            })?;

        let user = state.platform.authenticate(token).await.map_err(|e| {
            counter!(AUTH_FAILED).increment(1);
            match e {
                PlatformError::Rejected { status, .. } if status.is_client_error() => {
                    Error::unauthenticated(anyhow!(e).context("access token was refused"))
                }
                e => Error::with_status(
                    StatusCode::BAD_GATEWAY,
                    anyhow!(e).context("failed to verify access token"),
                ),
            }
        })?;

        let is_privileged = state.config.is_admin(&user.uid);
        debug!(actor = %user.uid, is_privileged, "authenticated");

        Ok(Self {
            id: user.uid,
            display_name: user.username,
            is_privileged,
        })
    }
}
