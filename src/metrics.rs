//! Metric name constants.

use std::time::Duration;

use anyhow::Context;
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config;

pub const AUTH_FAILED: &str = "pilinks.auth.failed"; // Counter.

pub const PAYMENT_COMPLETED: &str = "pilinks.payment.completed"; // Counter.
pub const PAYMENT_CANCELLED: &str = "pilinks.payment.cancelled"; // Counter.
pub const PAYMENT_FAILED: &str = "pilinks.payment.failed"; // Counter.

pub const POST_CREATED: &str = "pilinks.post.created"; // Counter.
pub const POST_EDITED: &str = "pilinks.post.edited"; // Counter.
pub const POST_UNSAVED: &str = "pilinks.post.unsaved"; // Counter.

pub const MODERATION_ACTIONS: &str = "pilinks.moderation.actions"; // Counter.

pub const ENGAGEMENT_LIKES: &str = "pilinks.engagement.likes"; // Counter.
pub const ENGAGEMENT_VIEWS: &str = "pilinks.engagement.views"; // Counter.

/// Must be ran exactly once on startup. This will declare all of the instruments for `metrics`.
pub fn setup(config: Option<&config::MetricConfig>) -> anyhow::Result<()> {
    describe_counter!(AUTH_FAILED, "The number of failed authentication attempts.");

    describe_counter!(
        PAYMENT_COMPLETED,
        "Fee payments confirmed by the payment platform."
    );
    describe_counter!(PAYMENT_CANCELLED, "Fee payments cancelled by the pioneer.");
    describe_counter!(
        PAYMENT_FAILED,
        "Fee payments that failed during the handshake."
    );

    describe_counter!(POST_CREATED, "The count of created posts.");
    describe_counter!(POST_EDITED, "The count of edited posts.");
    describe_counter!(
        POST_UNSAVED,
        "Posts that could not be saved after their fee was paid."
    );

    describe_counter!(
        MODERATION_ACTIONS,
        "Moderation actions applied, labelled by action."
    );

    describe_counter!(ENGAGEMENT_LIKES, "Likes added and removed.");
    describe_counter!(ENGAGEMENT_VIEWS, "Post views recorded.");

    if let Some(config) = config {
        match config {
            config::MetricConfig::PrometheusPush(prometheus_config) => {
                PrometheusBuilder::new()
                    .with_push_gateway(
                        prometheus_config.url.clone(),
                        Duration::from_secs(10),
                        None,
                        None,
                    )
                    .context("failed to set up push gateway")?
                    .install()
                    .context("failed to install metrics exporter")?;
            }
        }
    }

    Ok(())
}
