use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::{
    moderation::ModerationError,
    payment::{PaymentError, RelayError},
    storage::StoreError,
    submission::SubmissionError,
};

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
struct Body {
    error: String,
    title: String,
    message: String,
}

/// `axum`-compatible error handler.
///
/// Every failure renders as a JSON `{error, title, message}` body.
#[derive(Error)]
pub struct Error {
    status: StatusCode,
    body: Body,
    err: anyhow::Error,
}

impl Error {
    pub fn with_status(status: StatusCode, err: impl Into<anyhow::Error>) -> Self {
        let err = err.into();
        let reason = status.canonical_reason().unwrap_or("Error");

        // N.B: Only debug builds forward internal error details to the requester.
        let message = if cfg!(debug_assertions) || status.is_client_error() {
            format!("{err:#}")
        } else {
            "The request could not be completed.".to_owned()
        };

        Self {
            status,
            body: Body {
                error: reason.to_ascii_lowercase().replace(' ', "-"),
                title: reason.to_owned(),
                message,
            },
            err,
        }
    }

    /// An error with a fixed, user-facing rendition.
    pub fn described(
        status: StatusCode,
        error: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        err: impl Into<anyhow::Error>,
    ) -> Self {
        Self {
            status,
            body: Body {
                error: error.into(),
                title: title.into(),
                message: message.into(),
            },
            err: err.into(),
        }
    }

    /// The caller is not allowed to do this. Says nothing about why.
    pub fn access_denied(err: impl Into<anyhow::Error>) -> Self {
        Self::described(
            StatusCode::FORBIDDEN,
            "unauthorized",
            "Access denied",
            "access denied",
            err,
        )
    }

    pub fn unauthenticated(err: impl Into<anyhow::Error>) -> Self {
        Self::described(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "Sign in required",
            "Sign in with your wallet to continue.",
            err,
        )
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        let what = what.into();
        Self::described(
            StatusCode::NOT_FOUND,
            "not-found",
            "Not found",
            format!("{what} does not exist."),
            anyhow::anyhow!("{what} not found"),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, err)
    }
}

impl From<SubmissionError> for Error {
    fn from(err: SubmissionError) -> Self {
        let status = match &err {
            SubmissionError::Validation(_) => StatusCode::BAD_REQUEST,
            SubmissionError::Unauthorized => StatusCode::FORBIDDEN,
            SubmissionError::NotFound(_) => StatusCode::NOT_FOUND,
            SubmissionError::PaymentCancelled => StatusCode::CONFLICT,
            SubmissionError::PaymentFailed(_) => StatusCode::BAD_GATEWAY,
            SubmissionError::PersistenceFailed { .. } | SubmissionError::Interrupted => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let failure = err.failure();
        Self::described(status, failure.kind, failure.title, failure.message, err)
    }
}

impl From<ModerationError> for Error {
    fn from(err: ModerationError) -> Self {
        match err {
            ModerationError::Unauthorized => Self::access_denied(err),
            ModerationError::NotFound(ref id) => Self::described(
                StatusCode::NOT_FOUND,
                "not-found",
                "Post not found",
                format!("Post {id} no longer exists."),
                err,
            ),
            ModerationError::InvalidTransition { .. } => Self::described(
                StatusCode::CONFLICT,
                "invalid-transition",
                "Action not available",
                format!("{err}."),
                err,
            ),
            ModerationError::Store(_) => Self::described(
                StatusCode::INTERNAL_SERVER_ERROR,
                "persistence-failed",
                "Could not update post",
                "The change was not saved. Please try again.",
                err,
            ),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(ref id) => Self::described(
                StatusCode::NOT_FOUND,
                "not-found",
                "Post not found",
                format!("Post {id} does not exist."),
                err,
            ),
            _ => Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, err),
        }
    }
}

impl From<RelayError> for Error {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::UnknownSubmission(_) => Self::described(
                StatusCode::NOT_FOUND,
                "not-found",
                "No payment in progress",
                "There is no payment waiting for this submission.",
                err,
            ),
            RelayError::Payment(ref e) => {
                let (status, kind) = match e {
                    PaymentError::Cancelled => (StatusCode::CONFLICT, "payment-cancelled"),
                    PaymentError::Failed(_) => (StatusCode::BAD_GATEWAY, "payment-failed"),
                };
                Self::described(status, kind, "Payment not acknowledged", e.to_string(), err)
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:?}", self.status, self.err)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.err.fmt(f)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("{:?}", self.err);
        } else {
            info!(status = %self.status, "{:#}", self.err);
        }

        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::PostStatus, moderation::ModerationAction};

    #[test]
    fn submission_errors_map_to_statuses() {
        let cases = [
            (SubmissionError::PaymentCancelled, StatusCode::CONFLICT),
            (
                SubmissionError::PaymentFailed("down".to_owned()),
                StatusCode::BAD_GATEWAY,
            ),
            (SubmissionError::Unauthorized, StatusCode::FORBIDDEN),
            (
                SubmissionError::PersistenceFailed {
                    payment: Some("p1".to_owned()),
                    source: StoreError::Corrupt("bad".to_owned()),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            let kind = err.kind();
            let e = Error::from(err);
            assert_eq!(e.status(), status);
            assert_eq!(e.body.error, kind);
        }
    }

    #[test]
    fn access_denied_says_nothing_more() {
        let e = Error::from(ModerationError::Unauthorized);
        assert_eq!(e.status(), StatusCode::FORBIDDEN);
        assert_eq!(e.body.message, "access denied");

        let e = Error::from(ModerationError::InvalidTransition {
            from: PostStatus::Pending,
            action: ModerationAction::Restore,
        });
        assert_eq!(e.status(), StatusCode::CONFLICT);
        assert_eq!(e.body.message, "cannot restore a post that is pending.");
    }
}
