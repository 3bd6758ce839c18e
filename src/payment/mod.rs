//! Fee collection through the external wallet.
//!
//! A payment is a three-phase handshake driven by wallet callbacks:
//! the pioneer authorizes it in the wallet, this service approves it with the
//! payment platform, and once the transaction is broadcast this service
//! confirms completion. Only that last confirmation settles a payment.

pub(crate) mod gateway;
mod handshake;
mod platform;
mod relay;

use serde::Serialize;
use thiserror::Error;

pub use gateway::{PaymentGateway, PaymentHandlers, PendingPayment, Wallet};
pub use platform::{PaymentBackend, PlatformClient, PlatformError, PlatformUser};
pub use relay::{RelayError, RelayWallet, WalletCallback};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Why a payment did not settle.
pub enum PaymentError {
    /// The pioneer declined in the wallet.
    #[error("payment cancelled")]
    Cancelled,
    /// The handshake broke down: platform rejection, network failure, or an abandoned wallet.
    #[error("payment failed: {0}")]
    Failed(String),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
/// What the wallet is asked to pay.
pub struct PaymentRequest {
    /// Client-generated reference tying the payment to one submission attempt.
    pub draft_ref: String,
    pub amount: f64,
    pub memo: String,
    pub metadata: serde_json::Value,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Proof that a payment reached the completion phase.
pub struct PaymentReceipt {
    pub draft_ref: String,
    /// Identifier assigned by the payment platform.
    pub reference: String,
    /// Blockchain transaction id, known only once the payment completed.
    pub txid: String,
}
