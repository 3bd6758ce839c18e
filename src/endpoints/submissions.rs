//! Link submission and the wallet callback relay.

use anyhow::anyhow;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::watch;
use uuid::Uuid;

use crate::{
    AppState, Error, Result,
    models::Actor,
    payment::{PaymentRequest, RelayWallet, WalletCallback},
    serve::Workflow,
    submission::{
        Draft, Intent, SubmissionError, SubmissionPhase, SubmissionStatus, SubmissionTracker,
    },
};

/// Longest client-chosen draft reference.
const MAX_DRAFT_REF_LEN: usize = 64;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SubmitInput {
    draft: Draft,
    /// Set when editing an existing post.
    #[serde(default)]
    post_id: Option<String>,
    /// Client-generated reference for this attempt. Assigned here if absent.
    #[serde(default)]
    draft_ref: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Started {
    draft_ref: String,
    phase: SubmissionPhase,
    /// What the wallet should be asked to pay.
    payment: PaymentRequest,
}

fn draft_ref(input: Option<String>) -> Result<String> {
    let Some(r) = input else {
        return Ok(Uuid::new_v4().to_string());
    };

    let ok = !r.is_empty()
        && r.len() <= MAX_DRAFT_REF_LEN
        && r.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(r)
    } else {
        Err(Error::described(
            StatusCode::BAD_REQUEST,
            "invalid-draft-ref",
            "Bad request",
            "The draft reference is malformed.",
            anyhow!("malformed draft reference"),
        ))
    }
}

async fn submit(
    actor: Actor,
    State(workflow): State<Workflow>,
    State(tracker): State<SubmissionTracker>,
    Json(input): Json<SubmitInput>,
) -> Result<Response> {
    let draft_ref = draft_ref(input.draft_ref)?;

    // Edits and privileged submissions never wait on a wallet.
    if input.post_id.is_some() || actor.is_privileged {
        let (intent, status) = match input.post_id {
            Some(post_id) => (Intent::Edit { post_id }, StatusCode::OK),
            None => (Intent::Create, StatusCode::CREATED),
        };
        let (phase, _rx) = watch::channel(SubmissionPhase::Idle);
        let post = workflow
            .submit(&actor, &input.draft, intent, &draft_ref, &phase)
            .await?;
        return Ok((status, Json(post)).into_response());
    }

    let fields = input.draft.validate().map_err(SubmissionError::from)?;
    let reservation = tracker
        .reserve(&draft_ref, &actor.id)
        .ok_or_else(|| draft_ref_in_use(&draft_ref))?;
    let payment = workflow.payment_request(&fields, &draft_ref);

    let mut submission =
        workflow.start(actor.clone(), input.draft, Intent::Create, draft_ref.clone());
    let phase = submission.started().await;
    if phase == SubmissionPhase::Idle {
        // Over before the wallet was involved.
        let post = submission.outcome().await?;
        return Ok((StatusCode::CREATED, Json(post)).into_response());
    }

    reservation.track(submission);
    Ok((
        StatusCode::ACCEPTED,
        Json(Started {
            draft_ref,
            phase,
            payment,
        }),
    )
        .into_response())
}

fn draft_ref_in_use(draft_ref: &str) -> Error {
    Error::described(
        StatusCode::CONFLICT,
        "draft-ref-in-use",
        "Submission already started",
        "This draft is already being submitted. Start a new draft to submit again.",
        anyhow!("draft reference {draft_ref} is in use"),
    )
}

fn unknown_submission(draft_ref: &str) -> Error {
    Error::not_found(format!("Submission {draft_ref}"))
}

async fn status(
    actor: Actor,
    State(tracker): State<SubmissionTracker>,
    Path(draft_ref): Path<String>,
) -> Result<Json<SubmissionStatus>> {
    if !actor.is_privileged && !tracker.is_owned_by(&draft_ref, &actor.id) {
        return Err(unknown_submission(&draft_ref));
    }

    tracker
        .status(&draft_ref)
        .map(Json)
        .ok_or_else(|| unknown_submission(&draft_ref))
}

/// A wallet callback forwarded by the pioneer's browser.
async fn event(
    actor: Actor,
    State(tracker): State<SubmissionTracker>,
    State(relay): State<RelayWallet>,
    Path(draft_ref): Path<String>,
    Json(callback): Json<WalletCallback>,
) -> Result<Json<Value>> {
    if !tracker.is_owned_by(&draft_ref, &actor.id) {
        return Err(unknown_submission(&draft_ref));
    }

    relay.relay(&draft_ref, callback).await?;
    Ok(Json(json!({ "success": true })))
}

pub(super) fn routes() -> Router<AppState> {
    // P /api/submissions
    // G /api/submissions/{draftRef}
    // P /api/submissions/{draftRef}/events
    Router::new()
        .route("/submissions",                    post(submit))
        .route("/submissions/{draft_ref}",        get(status))
        .route("/submissions/{draft_ref}/events", post(event))
}
