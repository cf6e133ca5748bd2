//! Risk Manager Service
//!
//! Admission control and cross-account risk aggregation:
//! - Per-order risk engine with a bounded-latency check path
//! - Account registry with balances and rate-limit usage
//! - Multi-account aggregator: global limits, refreshers, alerts
//! - Emergency stop and alert dispatch

pub mod account;
pub mod engine;
pub mod monitor;
pub mod multi_account;

pub use account::{AccountBalance, AccountManager};
pub use engine::{PositionRisk, RiskCheckMetrics, RiskCheckResult, RiskEngine, RiskEngineMetrics};
pub use monitor::DispatchMetrics;
pub use multi_account::{LimitViolation, MultiAccountRiskManager};
