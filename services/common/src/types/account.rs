//! Account, balance and risk-snapshot types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A trading account bound to one venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account identifier
    pub id: String,
    /// Venue the account trades on
    pub venue: String,
    /// Strategy tag for per-strategy aggregation
    pub strategy: String,
    /// Per-account cap on a single position's value
    pub max_position_value: Decimal,
    /// Per-account leverage cap
    pub max_leverage: u32,
    /// Per-account daily loss limit, positive number
    pub daily_loss_limit: Decimal,
    /// Rate-limit weight budget per minute
    pub rate_limit_weight: u32,
    /// Whether the account participates in trading and aggregation
    pub active: bool,
}

/// Venue balance as the risk engine consumes it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    /// Venue the balance belongs to
    pub venue: String,
    /// Total equity
    pub total: Decimal,
    /// Balance available for new exposure
    pub available: Decimal,
    /// Last refresh timestamp
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Create a balance snapshot stamped now
    pub fn new(venue: impl Into<String>, total: Decimal, available: Decimal) -> Self {
        Self { venue: venue.into(), total, available, updated_at: Utc::now() }
    }
}

/// Per-account risk snapshot, replaced atomically on every refresh pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRisk {
    /// Account this snapshot describes
    pub account_id: String,
    /// Number of open positions
    pub open_positions: u32,
    /// Gross exposure: sum of |quantity x mark|
    pub total_exposure: Decimal,
    /// Net exposure: sum of signed quantity x mark
    pub net_exposure: Decimal,
    /// Realized PnL for the session
    pub realized_pnl: Decimal,
    /// Unrealized PnL at current marks
    pub unrealized_pnl: Decimal,
    /// PnL accumulated today
    pub daily_pnl: Decimal,
    /// Gross exposure over equity
    pub current_leverage: Decimal,
    /// Margin currently allocated
    pub margin_used: Decimal,
    /// Margin still available
    pub margin_available: Decimal,
    /// Highest equity observed; never decreases
    pub peak_balance: Decimal,
    /// (peak - equity) / peak
    pub current_drawdown: Decimal,
    /// Worst drawdown observed; never decreases
    pub max_drawdown: Decimal,
    /// Fraction of the rate-limit weight budget consumed
    pub rate_limit_usage: Decimal,
    /// When this snapshot was produced
    pub updated_at: DateTime<Utc>,
}

impl AccountRisk {
    /// Empty snapshot for an account that has not traded yet
    pub fn empty(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            open_positions: 0,
            total_exposure: Decimal::ZERO,
            net_exposure: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            current_leverage: Decimal::ZERO,
            margin_used: Decimal::ZERO,
            margin_available: Decimal::ZERO,
            peak_balance: Decimal::ZERO,
            current_drawdown: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            rate_limit_usage: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }
}

/// Global risk snapshot across all active accounts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalRisk {
    /// Sum of per-account gross exposure
    pub total_exposure: Decimal,
    /// Sum of per-account net exposure
    pub net_exposure: Decimal,
    /// Gross exposure per venue
    pub exposure_by_venue: FxHashMap<String, Decimal>,
    /// Gross exposure per strategy tag
    pub exposure_by_strategy: FxHashMap<String, Decimal>,
    /// Total realized plus unrealized PnL
    pub total_pnl: Decimal,
    /// PnL accumulated today across accounts
    pub daily_pnl: Decimal,
    /// Value of the largest single position
    pub largest_position: Decimal,
    /// largest_position / total_exposure
    pub concentration_ratio: Decimal,
    /// Number of active accounts seen in the last pass
    pub active_accounts: u32,
    /// Accounts currently past a warning threshold
    pub accounts_at_risk: u32,
    /// When the last full aggregation pass completed
    pub updated_at: Option<DateTime<Utc>>,
}
