//! Turns the callback-driven wallet handshake into a single awaitable payment.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use super::{
    PaymentError, PaymentReceipt, PaymentRequest,
    handshake::{Handshake, Step, WalletEvent},
    platform::PaymentBackend,
};
use crate::metrics::{PAYMENT_CANCELLED, PAYMENT_COMPLETED, PAYMENT_FAILED};

/// The external wallet.
pub trait Wallet: Clone + Send + Sync + 'static {
    /// Hand `request` to the wallet. Resolves once the wallet has taken over;
    /// all further progress is reported through `handlers`.
    fn create_payment(
        &self,
        request: &PaymentRequest,
        handlers: PaymentHandlers,
    ) -> impl Future<Output = Result<(), PaymentError>> + Send;

    /// The handshake for `draft_ref` has settled, one way or the other.
    fn release(&self, _draft_ref: &str) {}
}

type Ack = oneshot::Sender<Result<(), PaymentError>>;

#[derive(Debug)]
struct Signal {
    event: WalletEvent,
    ack: Option<Ack>,
}

/// Callbacks the wallet invokes while a payment is in flight.
///
/// Approval and completion wait for this service's acknowledgement, so the
/// wallet cannot move past a phase the server has not confirmed.
#[derive(Clone, Debug)]
pub struct PaymentHandlers {
    signals: mpsc::UnboundedSender<Signal>,
    completed: Arc<AtomicBool>,
}

impl PaymentHandlers {
    fn no_longer_in_flight() -> PaymentError {
        PaymentError::Failed("payment is no longer in flight".to_owned())
    }

    async fn request(&self, event: WalletEvent) -> Result<(), PaymentError> {
        let (tx, rx) = oneshot::channel();
        self.signals
            .send(Signal {
                event,
                ack: Some(tx),
            })
            .map_err(|_| Self::no_longer_in_flight())?;

        match rx.await {
            Ok(r) => r,
            // The handshake settled before getting to this signal.
            Err(_) if self.is_completed() => Ok(()),
            Err(_) => Err(Self::no_longer_in_flight()),
        }
    }

    pub async fn ready_for_server_approval(&self, reference: &str) -> Result<(), PaymentError> {
        self.request(WalletEvent::ReadyForServerApproval {
            reference: reference.to_owned(),
        })
        .await
    }

    pub async fn ready_for_server_completion(
        &self,
        reference: &str,
        txid: &str,
    ) -> Result<(), PaymentError> {
        if self.is_completed() {
            return Ok(());
        }

        self.request(WalletEvent::ReadyForServerCompletion {
            reference: reference.to_owned(),
            txid: txid.to_owned(),
        })
        .await
    }

    pub fn cancel(&self, reference: Option<&str>) {
        _ = self.signals.send(Signal {
            event: WalletEvent::Cancelled {
                reference: reference.map(ToOwned::to_owned),
            },
            ack: None,
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        _ = self.signals.send(Signal {
            event: WalletEvent::Error {
                message: message.into(),
            },
            ack: None,
        });
    }

    /// Whether the server confirmed completion. Never true before that.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }
}

/// Collects payments through a [`Wallet`], acknowledging each phase with a [`PaymentBackend`].
#[derive(Clone, Debug)]
pub struct PaymentGateway<W, P> {
    wallet: W,
    backend: P,
    /// Longest wait for the next wallet callback.
    timeout: Duration,
}

impl<W: Wallet, P: PaymentBackend> PaymentGateway<W, P> {
    pub fn new(wallet: W, backend: P, timeout: Duration) -> Self {
        Self {
            wallet,
            backend,
            timeout,
        }
    }

    /// Start a handshake. The returned payment is registered with the wallet
    /// and must be [settled](PendingPayment::settle) to learn the outcome.
    pub async fn begin(
        &self,
        request: PaymentRequest,
    ) -> Result<PendingPayment<W, P>, PaymentError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let completed = Arc::new(AtomicBool::new(false));
        let handlers = PaymentHandlers {
            signals: tx,
            completed: completed.clone(),
        };

        info!(draft = %request.draft_ref, amount = request.amount, "requesting payment");
        if let Err(e) = self.wallet.create_payment(&request, handlers).await {
            counter!(PAYMENT_FAILED).increment(1);
            return Err(e);
        }

        Ok(PendingPayment {
            gateway: self.clone(),
            draft_ref: request.draft_ref,
            signals: rx,
            completed,
        })
    }

    /// Collect a payment, resolving only once the platform confirmed completion.
    pub async fn create_payment(
        &self,
        request: PaymentRequest,
    ) -> Result<PaymentReceipt, PaymentError> {
        self.begin(request).await?.settle().await
    }
}

/// A handshake in flight.
#[derive(Debug)]
pub struct PendingPayment<W: Wallet, P: PaymentBackend> {
    gateway: PaymentGateway<W, P>,
    draft_ref: String,
    signals: mpsc::UnboundedReceiver<Signal>,
    completed: Arc<AtomicBool>,
}

impl<W: Wallet, P: PaymentBackend> PendingPayment<W, P> {
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Drive the handshake to its end.
    pub async fn settle(mut self) -> Result<PaymentReceipt, PaymentError> {
        let outcome = self.drive().await;

        match &outcome {
            Ok(receipt) => {
                counter!(PAYMENT_COMPLETED).increment(1);
                info!(
                    draft = %self.draft_ref,
                    payment = %receipt.reference,
                    txid = %receipt.txid,
                    "payment completed"
                );
            }
            Err(PaymentError::Cancelled) => {
                counter!(PAYMENT_CANCELLED).increment(1);
                info!(draft = %self.draft_ref, "payment cancelled");
            }
            Err(e) => {
                counter!(PAYMENT_FAILED).increment(1);
                warn!(draft = %self.draft_ref, "payment failed: {e}");
            }
        }

        outcome
    }

    async fn next(&mut self) -> Result<Signal, PaymentError> {
        match tokio::time::timeout(self.gateway.timeout, self.signals.recv()).await {
            Ok(Some(signal)) => Ok(signal),
            Ok(None) => Err(PaymentError::Failed(
                "wallet closed the handshake before completion".to_owned(),
            )),
            Err(_) => Err(PaymentError::Failed(format!(
                "no wallet callback within {:?}",
                self.gateway.timeout
            ))),
        }
    }

    async fn drive(&mut self) -> Result<PaymentReceipt, PaymentError> {
        let mut handshake = Handshake::new(self.draft_ref.clone());

        loop {
            let Signal { event, ack } = self.next().await?;
            let reply = move |r: Result<(), PaymentError>| {
                if let Some(ack) = ack {
                    _ = ack.send(r);
                }
            };

            match handshake.advance(&event) {
                Step::Approve(reference) => {
                    info!(draft = %self.draft_ref, payment = %reference, "approving payment");
                    if let Err(e) = self.gateway.backend.approve(&reference).await {
                        let err = PaymentError::Failed(format!("server approval failed: {e}"));
                        reply(Err(err.clone()));
                        return Err(err);
                    }
                    handshake.approved(reference);
                    reply(Ok(()));
                }
                Step::Complete { reference, txid } => {
                    info!(draft = %self.draft_ref, payment = %reference, "completing payment");
                    if let Err(e) = self.gateway.backend.complete(&reference, &txid).await {
                        let err = PaymentError::Failed(format!("server completion failed: {e}"));
                        reply(Err(err.clone()));
                        return Err(err);
                    }
                    let receipt = handshake.completed(reference, txid);
                    self.completed
                        .store(handshake.is_completed(), Ordering::Release);
                    reply(Ok(()));
                    return Ok(receipt);
                }
                Step::Acknowledge => reply(Ok(())),
                Step::Cancel => {
                    reply(Err(PaymentError::Cancelled));
                    return Err(PaymentError::Cancelled);
                }
                Step::Fail(message) => {
                    let err = PaymentError::Failed(message);
                    reply(Err(err.clone()));
                    return Err(err);
                }
            }
        }
    }
}

impl<W: Wallet, P: PaymentBackend> Drop for PendingPayment<W, P> {
    fn drop(&mut self) {
        self.gateway.wallet.release(&self.draft_ref);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process wallets and platform backends for handshake tests.

    use std::sync::Mutex;

    use super::*;
    use crate::payment::PlatformError;

    /// One wallet callback in a scripted handshake.
    #[derive(Debug, Clone)]
    pub(crate) enum Act {
        Approve(&'static str),
        Complete(&'static str, &'static str),
        Cancel,
        Error(&'static str),
        /// Stop calling back, leaving the handshake dangling.
        Vanish,
    }

    /// What the scripted wallet observed, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Seen {
        Acked { completed: bool },
        Refused(PaymentError),
    }

    /// A wallet that plays a fixed list of callbacks, waiting for each acknowledgement.
    #[derive(Clone, Debug, Default)]
    pub(crate) struct ScriptedWallet {
        script: Vec<Act>,
        pub(crate) requests: Arc<Mutex<Vec<PaymentRequest>>>,
        pub(crate) seen: Arc<Mutex<Vec<Seen>>>,
        parked: Arc<Mutex<Vec<PaymentHandlers>>>,
    }

    impl ScriptedWallet {
        pub(crate) fn new(script: Vec<Act>) -> Self {
            Self {
                script,
                ..Self::default()
            }
        }

        /// Approves then completes `reference`.
        pub(crate) fn paying(reference: &'static str) -> Self {
            Self::new(vec![Act::Approve(reference), Act::Complete(reference, "tx-1")])
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub(crate) fn seen(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Wallet for ScriptedWallet {
        async fn create_payment(
            &self,
            request: &PaymentRequest,
            handlers: PaymentHandlers,
        ) -> Result<(), PaymentError> {
            self.requests.lock().unwrap().push(request.clone());
            let script = self.script.clone();
            let seen = self.seen.clone();
            let parked = self.parked.clone();

            drop(tokio::spawn(async move {
                for act in script {
                    let r = match act {
                        Act::Approve(r) => handlers.ready_for_server_approval(r).await,
                        Act::Complete(r, tx) => handlers.ready_for_server_completion(r, tx).await,
                        Act::Cancel => {
                            handlers.cancel(None);
                            return;
                        }
                        Act::Error(m) => {
                            handlers.error(m);
                            return;
                        }
                        Act::Vanish => {
                            parked.lock().unwrap().push(handlers);
                            return;
                        }
                    };
                    let entry = match r {
                        Ok(()) => Seen::Acked {
                            completed: handlers.is_completed(),
                        },
                        Err(e) => Seen::Refused(e),
                    };
                    seen.lock().unwrap().push(entry);
                }
            }));
            Ok(())
        }
    }

    /// A wallet that refuses to start any payment.
    #[derive(Clone, Debug)]
    pub(crate) struct BrokenWallet;

    impl Wallet for BrokenWallet {
        async fn create_payment(
            &self,
            _request: &PaymentRequest,
            _handlers: PaymentHandlers,
        ) -> Result<(), PaymentError> {
            Err(PaymentError::Failed("wallet unavailable".to_owned()))
        }
    }

    /// Platform backend that records calls and can be told to reject a phase.
    #[derive(Clone, Debug, Default)]
    pub(crate) struct RecordingBackend {
        pub(crate) calls: Arc<Mutex<Vec<String>>>,
        reject_approve: bool,
        reject_complete: bool,
    }

    impl RecordingBackend {
        pub(crate) fn rejecting_approve() -> Self {
            Self {
                reject_approve: true,
                ..Self::default()
            }
        }

        pub(crate) fn rejecting_complete() -> Self {
            Self {
                reject_complete: true,
                ..Self::default()
            }
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn rejected() -> PlatformError {
            PlatformError::Rejected {
                status: reqwest::StatusCode::BAD_GATEWAY,
                body: "upstream said no".to_owned(),
            }
        }
    }

    impl PaymentBackend for RecordingBackend {
        async fn approve(&self, payment_id: &str) -> Result<(), PlatformError> {
            self.calls.lock().unwrap().push(format!("approve {payment_id}"));
            if self.reject_approve {
                return Err(Self::rejected());
            }
            Ok(())
        }

        async fn complete(&self, payment_id: &str, txid: &str) -> Result<(), PlatformError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("complete {payment_id} {txid}"));
            if self.reject_complete {
                return Err(Self::rejected());
            }
            Ok(())
        }
    }

    pub(crate) fn request(draft_ref: &str) -> PaymentRequest {
        PaymentRequest {
            draft_ref: draft_ref.to_owned(),
            amount: 1.0,
            memo: "Curation Fee: test".to_owned(),
            metadata: serde_json::json!({ "draftRef": draft_ref }),
        }
    }
}
