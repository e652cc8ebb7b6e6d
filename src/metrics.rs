use std::time::Duration;
use tracing::debug;

/// Narrow seam for whatever metrics backend the deployment wires in.
/// Recording must never fail a trading operation.
pub trait Metrics: Send + Sync {
    fn order_attempt(&self);
    fn order_success(&self, quantity: f64, price: f64, latency: Duration);
    fn order_failure(&self);
    fn balance(&self, currency: &str, amount: f64);
}

/// Default backend: structured debug lines only.
pub struct LogMetrics;

impl Metrics for LogMetrics {
    fn order_attempt(&self) {
        debug!(metric = "order_attempts", "+1");
    }

    fn order_success(&self, quantity: f64, price: f64, latency: Duration) {
        debug!(
            metric = "order_success",
            quantity,
            price,
            latency_secs = latency.as_secs_f64(),
            "+1"
        );
    }

    fn order_failure(&self) {
        debug!(metric = "order_failures", "+1");
    }

    fn balance(&self, currency: &str, amount: f64) {
        debug!(metric = "balance", currency, amount, "gauge");
    }
}
