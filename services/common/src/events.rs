//! Bounded event fan-out
//!
//! Risk alerts, position updates and rotation/emergency notifications
//! travel over bounded channels. Producers never block the order path:
//! on overflow the newest event is dropped and counted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Risk alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    /// Informational
    Info,
    /// Threshold approaching
    Warning,
    /// Limit breached or emergency
    Critical,
}

/// Alert emitted by the risk aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlert {
    /// Severity
    pub level: AlertLevel,
    /// Machine-readable type tag, e.g. "leverage", "concentration"
    pub alert_type: String,
    /// Account the alert concerns; `None` for global alerts
    pub account_id: Option<String>,
    /// Human-readable message
    pub message: String,
    /// When the alert was produced
    pub timestamp: DateTime<Utc>,
}

impl RiskAlert {
    /// Create an alert stamped now
    pub fn new(
        level: AlertLevel,
        alert_type: impl Into<String>,
        account_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            alert_type: alert_type.into(),
            account_id,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Position update fanned out after every store mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionEvent {
    /// Venue of the mutated position
    pub venue: String,
    /// Symbol of the mutated position
    pub symbol: String,
    /// Signed quantity after the mutation
    pub quantity: Decimal,
    /// Mark price at the mutation
    pub mark_price: Decimal,
    /// Unrealized PnL after the mutation
    pub unrealized_pnl: Decimal,
    /// Mutation timestamp
    pub timestamp: DateTime<Utc>,
}

/// Rotation and emergency notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EmergencyEvent {
    /// Trading halted; every admission rejects until released
    EmergencyStop {
        /// Why the stop was engaged
        reason: String,
        /// When it was engaged
        timestamp: DateTime<Utc>,
    },
    /// Trading resumed
    EmergencyRelease {
        /// When the stop was released
        timestamp: DateTime<Utc>,
    },
    /// Venue credentials rotated; adapters should reconnect
    CredentialRotation {
        /// Affected venue
        venue: String,
        /// When the rotation happened
        timestamp: DateTime<Utc>,
    },
}

/// Sending half of a bounded event channel.
///
/// `publish` uses `try_send`: a full channel drops the new event rather
/// than back-pressuring the caller. Dropped events are counted and
/// visible through [`EventPublisher::dropped`].
#[derive(Debug)]
pub struct EventPublisher<T> {
    tx: mpsc::Sender<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for EventPublisher<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), dropped: Arc::clone(&self.dropped) }
    }
}

impl<T> EventPublisher<T> {
    /// Publish without blocking. Returns `false` if the event was dropped.
    pub fn publish(&self, event: T) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("event channel full, dropping newest event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Number of events dropped so far
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create a bounded event channel with drop-on-overflow publishing
#[must_use]
pub fn bounded<T>(capacity: usize) -> (EventPublisher<T>, mpsc::Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventPublisher { tx, dropped: Arc::new(AtomicU64::new(0)) }, rx)
}
