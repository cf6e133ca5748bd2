//! Kernel configuration surface
//!
//! Every recognised option has a serde-deserializable struct with a
//! `Default` impl; `OmsConfig::load` layers an optional file over the
//! defaults and lets `OMS__`-prefixed environment variables override
//! individual fields.

use crate::constants::{channels, intervals, shm};
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-order risk limits consumed by the risk engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Maximum |new quantity x price| per (venue, symbol)
    pub max_position_size: Decimal,
    /// Maximum estimated leverage for futures orders
    pub max_leverage: u32,
    /// Maximum single order value
    pub max_order_value: Decimal,
    /// Daily loss beyond which admissions warn or reject
    pub max_daily_loss: Decimal,
    /// Maximum projected total exposure
    pub max_exposure: Decimal,
    /// Convert daily-loss warnings into rejections
    pub strict_mode: bool,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::new(100_000, 0),
            max_leverage: 20,
            max_order_value: Decimal::new(50_000, 0),
            max_daily_loss: Decimal::new(5_000, 0),
            max_exposure: Decimal::new(200_000, 0),
            strict_mode: false,
        }
    }
}

/// Cross-account limits enforced by the multi-account aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiAccountLimits {
    /// Cap on global gross exposure
    pub max_total_exposure: Decimal,
    /// Cap on global |net| exposure
    pub max_net_exposure: Decimal,
    /// Cap on gross exposure per venue
    pub max_exchange_exposure: Decimal,
    /// Cap on gross exposure per strategy tag
    pub max_strategy_exposure: Decimal,
    /// Cap on largest-position / total-exposure, as a fraction
    pub max_concentration_ratio: Decimal,
    /// Absolute cap on a single position's value
    pub max_position_size: Decimal,
    /// Cap on accounts sharing one strategy tag
    pub max_accounts_per_strategy: u32,
    /// Cap on global daily loss, positive number
    pub max_daily_loss: Decimal,
    /// Cap on per-account drawdown, as a fraction
    pub max_drawdown: Decimal,
    /// Cap on per-account leverage
    pub max_account_leverage: u32,
    /// Cap on global leverage
    pub max_global_leverage: u32,
    /// Cap on summed exposure across accounts holding correlated symbols
    pub max_correlated_exposure: Decimal,
}

impl Default for MultiAccountLimits {
    fn default() -> Self {
        Self {
            max_total_exposure: Decimal::new(1_000_000, 0),
            max_net_exposure: Decimal::new(500_000, 0),
            max_exchange_exposure: Decimal::new(400_000, 0),
            max_strategy_exposure: Decimal::new(300_000, 0),
            max_concentration_ratio: Decimal::new(25, 2),
            max_position_size: Decimal::new(150_000, 0),
            max_accounts_per_strategy: 10,
            max_daily_loss: Decimal::new(50_000, 0),
            max_drawdown: Decimal::new(20, 2),
            max_account_leverage: 20,
            max_global_leverage: 10,
            max_correlated_exposure: Decimal::new(500_000, 0),
        }
    }
}

/// Warning thresholds evaluated during refresh passes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Warn when leverage reaches this fraction of the account limit
    pub leverage_warning_ratio: Decimal,
    /// Warn when drawdown exceeds this fraction
    pub drawdown_warning: Decimal,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            leverage_warning_ratio: Decimal::new(80, 2),
            drawdown_warning: Decimal::new(10, 2),
        }
    }
}

/// Background refresher cadences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Per-account refresh interval in seconds
    pub account_refresh_secs: u64,
    /// Global refresh interval in seconds
    pub global_refresh_secs: u64,
    /// Risk alert channel capacity
    pub alert_capacity: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            account_refresh_secs: intervals::ACCOUNT_REFRESH_SECS,
            global_refresh_secs: intervals::GLOBAL_REFRESH_SECS,
            alert_capacity: channels::ALERT_CAPACITY,
        }
    }
}

/// Position store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory snapshots are written under
    pub snapshot_dir: PathBuf,
    /// Snapshot interval in seconds
    pub snapshot_interval_secs: u64,
    /// Shared-memory region path
    pub shm_path: PathBuf,
    /// Number of shared-memory slots
    pub shm_slots: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: PathBuf::from("data/snapshots"),
            snapshot_interval_secs: intervals::SNAPSHOT_SECS,
            shm_path: PathBuf::from(shm::DEFAULT_PATH),
            shm_slots: shm::SLOT_COUNT,
        }
    }
}

/// Sizing method used by the position optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerMethod {
    /// Kelly fraction with a safety factor
    Kelly,
    /// Inverse-risk weighting
    RiskParity,
    /// Return-over-risk weighting
    MaxSharpe,
    /// Uniform weighting
    EqualWeight,
}

/// Position optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Sizing method
    pub method: OptimizerMethod,
    /// Smallest allocation the plan will emit
    pub min_size: Decimal,
    /// Largest allocation per position
    pub max_size: Decimal,
    /// Allocations round down to a multiple of this
    pub size_increment: Decimal,
    /// Deltas below this fraction of the target are not rebalanced
    pub rebalance_threshold: Decimal,
    /// Cap on summed allocation risk per account
    pub max_portfolio_risk: Decimal,
    /// Cap on a single allocation's risk
    pub max_position_risk: Decimal,
    /// Kelly safety factor applied after clipping
    pub kelly_fraction: Decimal,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            method: OptimizerMethod::Kelly,
            min_size: Decimal::new(100, 0),
            max_size: Decimal::new(50_000, 0),
            size_increment: Decimal::new(100, 0),
            rebalance_threshold: Decimal::new(5, 2),
            max_portfolio_risk: Decimal::new(10, 2),
            max_position_risk: Decimal::new(2, 2),
            kelly_fraction: Decimal::new(25, 2),
        }
    }
}

/// Top-level kernel configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OmsConfig {
    /// Per-order risk limits
    pub risk: RiskLimits,
    /// Cross-account limits
    pub multi_account: MultiAccountLimits,
    /// Warning thresholds
    pub alerts: AlertThresholds,
    /// Refresher cadences
    pub refresh: RefreshConfig,
    /// Position store settings
    pub store: StoreConfig,
    /// Optimizer settings
    pub optimizer: OptimizerConfig,
}

impl OmsConfig {
    /// Load configuration: defaults, then an optional file, then
    /// `OMS__`-prefixed environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed, or if a
    /// field fails to deserialize.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("OMS").separator("__"),
        );
        let raw = builder.build().context("failed to assemble configuration")?;
        raw.try_deserialize().context("failed to deserialize configuration")
    }
}
