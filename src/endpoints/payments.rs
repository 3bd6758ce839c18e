//! Server-side acknowledgement of wallet payments.

use anyhow::anyhow;
use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::{
    AppState, Error, Result,
    payment::{PaymentBackend as _, PlatformClient, PlatformError},
};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PaymentInput {
    #[serde(default)]
    payment_id: Option<String>,
    #[serde(default)]
    txid: Option<String>,
}

fn required(value: Option<String>, error: &'static str) -> Result<String> {
    value.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
        Error::described(
            StatusCode::BAD_REQUEST,
            error,
            "Bad request",
            error,
            anyhow!("{error}"),
        )
    })
}

/// Map a platform failure, forwarding the upstream status when there is one.
fn upstream(e: PlatformError, what: &'static str) -> Error {
    match e {
        PlatformError::Rejected { status, .. } => {
            Error::described(status, what, "Payment platform error", what, e)
        }
        PlatformError::MalformedId => Error::described(
            StatusCode::BAD_REQUEST,
            "Malformed paymentId",
            "Bad request",
            "Malformed paymentId",
            e,
        ),
        PlatformError::Transport(_) => Error::with_status(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn approve(
    State(platform): State<PlatformClient>,
    Json(input): Json<PaymentInput>,
) -> Result<Json<Value>> {
    let payment_id = required(input.payment_id, "Missing paymentId")?;

    platform
        .approve(&payment_id)
        .await
        .map_err(|e| upstream(e, "Pi API failed to approve"))?;

    info!(payment = %payment_id, "payment approved");
    Ok(Json(json!({ "success": true })))
}

async fn complete(
    State(platform): State<PlatformClient>,
    Json(input): Json<PaymentInput>,
) -> Result<Json<Value>> {
    let payment_id = required(input.payment_id, "Missing parameters")?;
    let txid = required(input.txid, "Missing parameters")?;

    platform
        .complete(&payment_id, &txid)
        .await
        .map_err(|e| upstream(e, "Pi API failed to complete"))?;

    info!(payment = %payment_id, txid = %txid, "payment completed");
    Ok(Json(json!({ "success": true })))
}

pub(super) fn routes() -> Router<AppState> {
    // P /api/approve
    // P /api/complete
    Router::new()
        .route("/approve",  post(approve))
        .route("/complete", post(complete))
}
