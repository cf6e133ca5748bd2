//! Alert dispatch
//!
//! Drains the bounded risk-alert channel and logs by severity. Losing
//! alerts on overflow is preferable to blocking the order path; drops
//! are counted at the publisher.

use services_common::{AlertLevel, RiskAlert};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Alert dispatcher counters
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    dispatched: AtomicU64,
}

impl DispatchMetrics {
    /// Alerts dispatched so far
    #[must_use]
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}

/// Drain alerts until the channel closes or shutdown flips
pub async fn run_alert_dispatch_loop(
    mut alerts: mpsc::Receiver<RiskAlert>,
    metrics: Arc<DispatchMetrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            alert = alerts.recv() => {
                let Some(alert) = alert else { return };
                dispatch(&alert);
                metrics.dispatched.fetch_add(1, Ordering::Relaxed);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

fn dispatch(alert: &RiskAlert) {
    match alert.level {
        AlertLevel::Info => info!(
            alert_type = %alert.alert_type,
            account = alert.account_id.as_deref().unwrap_or("global"),
            "{}", alert.message
        ),
        AlertLevel::Warning => warn!(
            alert_type = %alert.alert_type,
            account = alert.account_id.as_deref().unwrap_or("global"),
            "{}", alert.message
        ),
        AlertLevel::Critical => error!(
            alert_type = %alert.alert_type,
            account = alert.account_id.as_deref().unwrap_or("global"),
            "{}", alert.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services_common::events;

    #[tokio::test]
    async fn test_dispatch_counts_alerts() {
        let (publisher, rx) = events::bounded::<RiskAlert>(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let metrics = Arc::new(DispatchMetrics::default());

        let handle =
            tokio::spawn(run_alert_dispatch_loop(rx, Arc::clone(&metrics), shutdown_rx));

        publisher.publish(RiskAlert::new(AlertLevel::Info, "test", None, "hello"));
        publisher.publish(RiskAlert::new(AlertLevel::Warning, "test", None, "world"));
        drop(publisher);

        handle.await.unwrap();
        assert_eq!(metrics.dispatched(), 2);
        drop(shutdown_tx);
    }
}
