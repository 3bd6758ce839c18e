use std::{net::SocketAddr, time::Duration};

use serde::Deserialize;
use url::Url;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub listen_address: Option<SocketAddr>,
    /// SQLite database URL.
    pub db: String,
    /// Wallet uids that may moderate.
    #[serde(default)]
    pub admins: Vec<String>,
    pub payments: PaymentConfig,
    pub metrics: Option<MetricConfig>,
}

impl AppConfig {
    pub fn is_admin(&self, uid: &str) -> bool {
        self.admins.iter().any(|a| a == uid)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct PaymentConfig {
    /// Server API key issued by the payment platform.
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: Url,
    /// Submission fee, in platform units.
    #[serde(default = "default_fee")]
    pub fee: f64,
    /// How long a handshake may wait for the next wallet callback before it is abandoned.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl PaymentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_api_base() -> Url {
    Url::parse("https://api.minepi.com/v2").expect("constant URL should parse")
}

const fn default_fee() -> f64 {
    1.0
}

const fn default_timeout_secs() -> u64 {
    180
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricConfig {
    PrometheusPush(PrometheusConfig),
}

#[derive(Deserialize, Debug, Clone)]
pub struct PrometheusConfig {
    /// The URL of the Prometheus push gateway.
    pub url: String,
}
