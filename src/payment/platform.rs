//! Payment platform server API.
//!
//! These are the calls made by the approve/complete endpoints: both must
//! succeed with a 2xx, anything else fails the phase.

use std::{fmt, future::Future, sync::Arc};

use reqwest::{StatusCode, header::AUTHORIZATION};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::PaymentConfig;

/// Longest payment id accepted from a client.
const MAX_PAYMENT_ID_LEN: usize = 128;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("malformed payment id")]
    MalformedId,
    #[error("payment platform returned {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error("failed to reach payment platform")]
    Transport(#[from] reqwest::Error),
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
/// The pioneer behind a wallet access token.
pub struct PlatformUser {
    pub uid: String,
    pub username: String,
}

/// Server-side acknowledgements of a payment handshake.
pub trait PaymentBackend: Clone + Send + Sync + 'static {
    fn approve(&self, payment_id: &str) -> impl Future<Output = Result<(), PlatformError>> + Send;

    fn complete(
        &self,
        payment_id: &str,
        txid: &str,
    ) -> impl Future<Output = Result<(), PlatformError>> + Send;
}

/// Client for the payment platform's server API.
#[derive(Clone)]
pub struct PlatformClient {
    client: reqwest::Client,
    base: String,
    api_key: Arc<str>,
}

impl fmt::Debug for PlatformClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformClient")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

/// Payment ids end up in a URL path, so only a conservative alphabet is accepted.
fn check_payment_id(id: &str) -> Result<(), PlatformError> {
    let ok = !id.is_empty()
        && id.len() <= MAX_PAYMENT_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok { Ok(()) } else { Err(PlatformError::MalformedId) }
}

impl PlatformClient {
    pub fn new(client: reqwest::Client, config: &PaymentConfig) -> Self {
        Self {
            client,
            base: config.api_base.as_str().trim_end_matches('/').to_owned(),
            api_key: Arc::from(config.api_key.as_str()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    async fn check(res: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }

        let body = res.text().await.unwrap_or_default();
        warn!("payment platform error {status}: {body}");
        Err(PlatformError::Rejected { status, body })
    }

    async fn post_payment(
        &self,
        payment_id: &str,
        action: &str,
        body: serde_json::Value,
    ) -> Result<(), PlatformError> {
        check_payment_id(payment_id)?;
        debug!(payment = payment_id, "{action} payment");

        let res = self
            .client
            .post(self.url(&format!("payments/{payment_id}/{action}")))
            .header(AUTHORIZATION, format!("Key {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        _ = Self::check(res).await?;
        Ok(())
    }

    /// Resolve a wallet access token to the pioneer it belongs to.
    pub async fn authenticate(&self, access_token: &str) -> Result<PlatformUser, PlatformError> {
        let res = self
            .client
            .get(self.url("me"))
            .bearer_auth(access_token)
            .send()
            .await?;

        Ok(Self::check(res).await?.json().await?)
    }
}

impl PaymentBackend for PlatformClient {
    async fn approve(&self, payment_id: &str) -> Result<(), PlatformError> {
        self.post_payment(payment_id, "approve", json!({})).await
    }

    async fn complete(&self, payment_id: &str, txid: &str) -> Result<(), PlatformError> {
        self.post_payment(payment_id, "complete", json!({ "txid": txid }))
            .await
    }
}
