//! A [`Wallet`] whose callbacks arrive over HTTP.
//!
//! The pioneer's wallet SDK runs in the browser. The browser relays each SDK
//! callback to `POST /api/submissions/{draftRef}/events`, which lands in
//! [`RelayWallet::relay`] and is forwarded to the handshake waiting on that draft.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::{PaymentError, PaymentHandlers, PaymentRequest, Wallet};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("no payment in flight for submission {0}")]
    UnknownSubmission(String),
    #[error(transparent)]
    Payment(#[from] PaymentError),
}

/// One wallet SDK callback, as posted by the browser.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WalletCallback {
    ReadyForServerApproval { payment_id: String },
    ReadyForServerCompletion { payment_id: String, txid: String },
    Cancel {
        #[serde(default)]
        payment_id: Option<String>,
    },
    Error { message: String },
}

/// How long a completed handshake still acknowledges repeated completion callbacks.
const SETTLED_RETENTION: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Default)]
struct Handshakes {
    in_flight: HashMap<String, PaymentHandlers>,
    completed: HashMap<String, (Instant, PaymentHandlers)>,
}

#[derive(Clone, Debug, Default)]
pub struct RelayWallet {
    handshakes: Arc<Mutex<Handshakes>>,
}

impl RelayWallet {
    pub fn new() -> Self {
        Self::default()
    }

    fn handshakes(&self) -> MutexGuard<'_, Handshakes> {
        self.handshakes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_waiting(&self, draft_ref: &str) -> bool {
        self.handshakes().in_flight.contains_key(draft_ref)
    }

    /// The handshake a callback for `draft_ref` is meant for.
    ///
    /// Once a payment completed, only a repeat of its completion still finds it.
    fn handlers(&self, draft_ref: &str, callback: &WalletCallback) -> Option<PaymentHandlers> {
        let handshakes = self.handshakes();
        if let Some(handlers) = handshakes.in_flight.get(draft_ref) {
            return Some(handlers.clone());
        }

        match callback {
            WalletCallback::ReadyForServerCompletion { .. } => handshakes
                .completed
                .get(draft_ref)
                .filter(|(at, _)| at.elapsed() < SETTLED_RETENTION)
                .map(|(_, handlers)| handlers.clone()),
            _ => None,
        }
    }

    /// Forward `callback` to the handshake for `draft_ref`.
    ///
    /// Approval and completion resolve once this service has acknowledged them.
    pub async fn relay(&self, draft_ref: &str, callback: WalletCallback) -> Result<(), RelayError> {
        let handlers = self
            .handlers(draft_ref, &callback)
            .ok_or_else(|| RelayError::UnknownSubmission(draft_ref.to_owned()))?;

        debug!(draft = draft_ref, ?callback, "wallet callback");
        match callback {
            WalletCallback::ReadyForServerApproval { payment_id } => {
                handlers.ready_for_server_approval(&payment_id).await?;
            }
            WalletCallback::ReadyForServerCompletion { payment_id, txid } => {
                handlers
                    .ready_for_server_completion(&payment_id, &txid)
                    .await?;
            }
            WalletCallback::Cancel { payment_id } => handlers.cancel(payment_id.as_deref()),
            WalletCallback::Error { message } => handlers.error(message),
        }

        Ok(())
    }
}

impl Wallet for RelayWallet {
    async fn create_payment(
        &self,
        request: &PaymentRequest,
        handlers: PaymentHandlers,
    ) -> Result<(), PaymentError> {
        let mut handshakes = self.handshakes();
        if handshakes.in_flight.contains_key(&request.draft_ref) {
            return Err(PaymentError::Failed(format!(
                "submission {} already has a payment in flight",
                request.draft_ref
            )));
        }

        _ = handshakes.completed.remove(&request.draft_ref);
        _ = handshakes
            .in_flight
            .insert(request.draft_ref.clone(), handlers);
        Ok(())
    }

    fn release(&self, draft_ref: &str) {
        let mut handshakes = self.handshakes();
        handshakes
            .completed
            .retain(|_, (at, _)| at.elapsed() < SETTLED_RETENTION);

        if let Some(handlers) = handshakes.in_flight.remove(draft_ref) {
            if handlers.is_completed() {
                _ = handshakes
                    .completed
                    .insert(draft_ref.to_owned(), (Instant::now(), handlers));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::payment::{PaymentGateway, gateway::testing::*};

    #[test]
    fn callbacks_parse_from_browser_json() {
        let cb: WalletCallback = serde_json::from_str(
            r#"{"type":"readyForServerCompletion","paymentId":"p1","txid":"t1"}"#,
        )
        .unwrap();
        assert_eq!(
            cb,
            WalletCallback::ReadyForServerCompletion {
                payment_id: "p1".to_owned(),
                txid: "t1".to_owned()
            }
        );

        let cb: WalletCallback = serde_json::from_str(r#"{"type":"cancel"}"#).unwrap();
        assert_eq!(cb, WalletCallback::Cancel { payment_id: None });
    }

    #[tokio::test]
    async fn relays_a_full_handshake() {
        let relay = RelayWallet::new();
        let backend = RecordingBackend::default();
        let gw = PaymentGateway::new(relay.clone(), backend.clone(), Duration::from_secs(5));

        let pending = gw.begin(request("draft-1")).await.unwrap();
        assert!(relay.is_waiting("draft-1"));
        let settle = tokio::spawn(pending.settle());

        relay
            .relay(
                "draft-1",
                WalletCallback::ReadyForServerApproval {
                    payment_id: "p1".to_owned(),
                },
            )
            .await
            .unwrap();
        relay
            .relay(
                "draft-1",
                WalletCallback::ReadyForServerCompletion {
                    payment_id: "p1".to_owned(),
                    txid: "t1".to_owned(),
                },
            )
            .await
            .unwrap();

        let receipt = settle.await.unwrap().unwrap();
        assert_eq!(receipt.txid, "t1");
        assert!(!relay.is_waiting("draft-1"));
        assert_eq!(backend.calls(), vec!["approve p1", "complete p1 t1"]);
    }

    #[tokio::test]
    async fn repeated_completion_after_settling_is_acknowledged() {
        let relay = RelayWallet::new();
        let backend = RecordingBackend::default();
        let gw = PaymentGateway::new(relay.clone(), backend.clone(), Duration::from_secs(5));
        let completion = || WalletCallback::ReadyForServerCompletion {
            payment_id: "p1".to_owned(),
            txid: "t1".to_owned(),
        };

        let pending = gw.begin(request("draft-1")).await.unwrap();
        let settle = tokio::spawn(pending.settle());
        relay
            .relay(
                "draft-1",
                WalletCallback::ReadyForServerApproval {
                    payment_id: "p1".to_owned(),
                },
            )
            .await
            .unwrap();
        relay.relay("draft-1", completion()).await.unwrap();
        _ = settle.await.unwrap().unwrap();

        relay.relay("draft-1", completion()).await.unwrap();
        assert_eq!(backend.calls(), vec!["approve p1", "complete p1 t1"]);

        // Anything else for a settled payment has nowhere to go.
        assert!(matches!(
            relay
                .relay("draft-1", WalletCallback::Cancel { payment_id: None })
                .await,
            Err(RelayError::UnknownSubmission(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_handshakes_are_forgotten() {
        let relay = RelayWallet::new();
        let gw = PaymentGateway::new(
            relay.clone(),
            RecordingBackend::default(),
            Duration::from_secs(5),
        );

        let pending = gw.begin(request("draft-1")).await.unwrap();
        relay
            .relay("draft-1", WalletCallback::Cancel { payment_id: None })
            .await
            .unwrap();
        assert_eq!(pending.settle().await, Err(PaymentError::Cancelled));

        assert!(matches!(
            relay
                .relay(
                    "draft-1",
                    WalletCallback::ReadyForServerCompletion {
                        payment_id: "p1".to_owned(),
                        txid: "t1".to_owned(),
                    },
                )
                .await,
            Err(RelayError::UnknownSubmission(_))
        ));
    }

    #[tokio::test]
    async fn unknown_and_duplicate_drafts_are_refused() {
        let relay = RelayWallet::new();
        assert!(matches!(
            relay
                .relay("nope", WalletCallback::Cancel { payment_id: None })
                .await,
            Err(RelayError::UnknownSubmission(_))
        ));

        let gw = PaymentGateway::new(
            relay.clone(),
            RecordingBackend::default(),
            Duration::from_secs(5),
        );
        let _pending = gw.begin(request("draft-1")).await.unwrap();
        assert!(gw.begin(request("draft-1")).await.is_err());
        // The refused attempt must not evict the one in flight.
        assert!(relay.is_waiting("draft-1"));
    }

    #[tokio::test]
    async fn cancel_settles_and_releases() {
        let relay = RelayWallet::new();
        let gw = PaymentGateway::new(
            relay.clone(),
            RecordingBackend::default(),
            Duration::from_secs(5),
        );

        let pending = gw.begin(request("draft-1")).await.unwrap();
        relay
            .relay("draft-1", WalletCallback::Cancel { payment_id: None })
            .await
            .unwrap();

        assert_eq!(pending.settle().await, Err(PaymentError::Cancelled));
        assert!(!relay.is_waiting("draft-1"));
    }
}
