//! Handshake bookkeeping, free of any I/O.

use super::PaymentReceipt;

/// A callback raised by the wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// The pioneer authorized the payment; the server must approve it.
    ReadyForServerApproval { reference: String },
    /// The transaction was broadcast; the server must confirm completion.
    ReadyForServerCompletion { reference: String, txid: String },
    Cancelled { reference: Option<String> },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    AwaitingApproval,
    Approved { reference: String },
    Completed(PaymentReceipt),
}

/// What the driver must do in response to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Approve `reference` with the platform.
    Approve(String),
    /// Confirm completion of `reference` with the platform.
    Complete { reference: String, txid: String },
    /// A repeat of an event already handled. Acknowledge without side effects.
    Acknowledge,
    Cancel,
    Fail(String),
}

/// State of one payment handshake.
///
/// `is_completed` starts false and only [`Handshake::completed`] sets it, which
/// the driver calls after the platform confirmed completion.
#[derive(Debug, Clone)]
pub struct Handshake {
    draft_ref: String,
    state: State,
}

impl Handshake {
    pub fn new(draft_ref: impl Into<String>) -> Self {
        Self {
            draft_ref: draft_ref.into(),
            state: State::AwaitingApproval,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.state, State::Completed(_))
    }

    /// The platform reference, once the wallet has assigned one.
    pub fn reference(&self) -> Option<&str> {
        match &self.state {
            State::AwaitingApproval => None,
            State::Approved { reference } => Some(reference),
            State::Completed(receipt) => Some(&receipt.reference),
        }
    }

    /// Decide how to react to `event`. Does not change state.
    pub fn advance(&self, event: &WalletEvent) -> Step {
        match (&self.state, event) {
            (State::AwaitingApproval, WalletEvent::ReadyForServerApproval { reference }) => {
                Step::Approve(reference.clone())
            }
            (_, WalletEvent::ReadyForServerApproval { reference }) => {
                self.repeat_of(reference, "approval")
            }

            (State::AwaitingApproval, WalletEvent::ReadyForServerCompletion { .. }) => {
                Step::Fail("completion requested before the payment was approved".to_owned())
            }
            (
                State::Approved { reference: approved },
                WalletEvent::ReadyForServerCompletion { reference, txid },
            ) => {
                if approved == reference {
                    Step::Complete {
                        reference: reference.clone(),
                        txid: txid.clone(),
                    }
                } else {
                    Step::Fail(format!(
                        "completion for payment {reference} but {approved} was approved"
                    ))
                }
            }
            (State::Completed(_), WalletEvent::ReadyForServerCompletion { reference, .. }) => {
                self.repeat_of(reference, "completion")
            }

            // Too late to back out of a confirmed payment.
            (State::Completed(_), WalletEvent::Cancelled { .. } | WalletEvent::Error { .. }) => {
                Step::Acknowledge
            }
            (_, WalletEvent::Cancelled { .. }) => Step::Cancel,
            (_, WalletEvent::Error { message }) => Step::Fail(message.clone()),
        }
    }

    fn repeat_of(&self, reference: &str, phase: &str) -> Step {
        match self.reference() {
            Some(known) if known == reference => Step::Acknowledge,
            Some(known) => Step::Fail(format!(
                "{phase} for payment {reference} while handling {known}"
            )),
            None => Step::Fail(format!("unexpected {phase} for payment {reference}")),
        }
    }

    /// Record that the platform approved `reference`.
    pub fn approved(&mut self, reference: String) {
        self.state = State::Approved { reference };
    }

    /// Record that the platform confirmed completion.
    pub fn completed(&mut self, reference: String, txid: String) -> PaymentReceipt {
        let receipt = PaymentReceipt {
            draft_ref: self.draft_ref.clone(),
            reference,
            txid,
        };
        self.state = State::Completed(receipt.clone());
        receipt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approval(r: &str) -> WalletEvent {
        WalletEvent::ReadyForServerApproval {
            reference: r.to_owned(),
        }
    }

    fn completion(r: &str, tx: &str) -> WalletEvent {
        WalletEvent::ReadyForServerCompletion {
            reference: r.to_owned(),
            txid: tx.to_owned(),
        }
    }

    #[test]
    fn happy_path() {
        let mut hs = Handshake::new("draft");
        assert_eq!(hs.advance(&approval("p1")), Step::Approve("p1".to_owned()));
        hs.approved("p1".to_owned());
        assert!(!hs.is_completed());

        assert_eq!(
            hs.advance(&completion("p1", "tx")),
            Step::Complete {
                reference: "p1".to_owned(),
                txid: "tx".to_owned()
            }
        );
        let receipt = hs.completed("p1".to_owned(), "tx".to_owned());
        assert!(hs.is_completed());
        assert_eq!(receipt.draft_ref, "draft");
    }

    #[test]
    fn completion_requires_approval() {
        let hs = Handshake::new("draft");
        assert!(matches!(hs.advance(&completion("p1", "tx")), Step::Fail(_)));
    }

    #[test]
    fn repeats_are_acknowledged_only_for_the_same_payment() {
        let mut hs = Handshake::new("draft");
        hs.approved("p1".to_owned());
        assert_eq!(hs.advance(&approval("p1")), Step::Acknowledge);
        assert!(matches!(hs.advance(&approval("p2")), Step::Fail(_)));
        assert!(matches!(hs.advance(&completion("p2", "tx")), Step::Fail(_)));

        hs.completed("p1".to_owned(), "tx".to_owned());
        assert_eq!(hs.advance(&completion("p1", "tx")), Step::Acknowledge);
        assert!(matches!(hs.advance(&completion("p2", "tx")), Step::Fail(_)));
    }

    #[test]
    fn cancel_before_completion_cancels() {
        let hs = Handshake::new("draft");
        let cancel = WalletEvent::Cancelled { reference: None };
        assert_eq!(hs.advance(&cancel), Step::Cancel);

        let mut hs = Handshake::new("draft");
        hs.approved("p1".to_owned());
        assert_eq!(hs.advance(&cancel), Step::Cancel);

        hs.completed("p1".to_owned(), "tx".to_owned());
        assert_eq!(hs.advance(&cancel), Step::Acknowledge);
    }

    #[test]
    fn wallet_error_fails() {
        let hs = Handshake::new("draft");
        let err = WalletEvent::Error {
            message: "network down".to_owned(),
        };
        assert_eq!(hs.advance(&err), Step::Fail("network down".to_owned()));
    }
}
