//! Multi-account risk aggregation
//!
//! Enforces limits that span accounts and produces the global risk
//! picture. Synchronous admission (`validate_order`) runs in the order
//! path after the per-order engine admits; two background refreshers
//! keep per-account and global snapshots current and feed the bounded
//! alert channel.
//!
//! Ordering: each account snapshot is replaced atomically, so readers
//! see either the pre- or post-state of a refresh pass. Global
//! aggregation is not transactional with account updates; admission uses
//! per-account values plus the most recent global snapshot, which may be
//! stale by up to one refresh interval.

use crate::account::AccountManager;
use dashmap::DashMap;
use parking_lot::RwLock;
use position_manager::PositionStore;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use services_common::{
    Account, AccountRisk, AlertLevel, AlertThresholds, EmergencyEvent, EventPublisher,
    GlobalRisk, MultiAccountLimits, OmsConfig, Order, RefreshConfig, RiskAlert, decimal,
};
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

/// A cross-account rule violation. The first failing rule wins and
/// names itself; admission treats this as a value, not an exception.
#[derive(Debug, Clone, Error)]
pub enum LimitViolation {
    /// Trading halted process-wide
    #[error("emergency stop active: {reason}")]
    EmergencyStop {
        /// Why trading is halted
        reason: String,
    },

    /// The order references an unregistered account
    #[error("unknown account {account_id}")]
    UnknownAccount {
        /// The unresolved account id
        account_id: String,
    },

    /// Per-account position value cap
    #[error("account {account_id} position value {value} exceeds limit {limit}")]
    AccountPositionLimit {
        /// Account checked
        account_id: String,
        /// Projected position value
        value: Decimal,
        /// Account cap
        limit: Decimal,
    },

    /// Per-account daily loss cap
    #[error("account {account_id} daily pnl {daily_pnl} breaches loss limit {limit}")]
    AccountDailyLoss {
        /// Account checked
        account_id: String,
        /// Daily PnL at evaluation
        daily_pnl: Decimal,
        /// Account loss limit
        limit: Decimal,
    },

    /// Per-account leverage cap against live balance
    #[error("account {account_id} leverage {leverage} exceeds limit {limit}")]
    AccountLeverage {
        /// Account checked
        account_id: String,
        /// Projected leverage
        leverage: Decimal,
        /// Account cap
        limit: u32,
    },

    /// Per-account drawdown cap
    #[error("account {account_id} drawdown {drawdown} exceeds limit {limit}")]
    AccountDrawdown {
        /// Account checked
        account_id: String,
        /// Current drawdown fraction
        drawdown: Decimal,
        /// Cap fraction
        limit: Decimal,
    },

    /// Global gross exposure cap
    #[error("projected total exposure {projected} exceeds limit {limit}")]
    TotalExposure {
        /// Exposure if the order fills
        projected: Decimal,
        /// Global cap
        limit: Decimal,
    },

    /// Per-venue exposure cap
    #[error("projected {venue} exposure {projected} exceeds limit {limit}")]
    VenueExposure {
        /// Venue checked
        venue: String,
        /// Exposure if the order fills
        projected: Decimal,
        /// Venue cap
        limit: Decimal,
    },

    /// Per-strategy exposure cap
    #[error("projected strategy {strategy} exposure {projected} exceeds limit {limit}")]
    StrategyExposure {
        /// Strategy tag checked
        strategy: String,
        /// Exposure if the order fills
        projected: Decimal,
        /// Strategy cap
        limit: Decimal,
    },

    /// Absolute position size cap
    #[error("projected position size {projected} exceeds limit {limit}")]
    PositionSize {
        /// Position value if the order fills
        projected: Decimal,
        /// Absolute cap
        limit: Decimal,
    },

    /// Concentration ratio cap
    #[error("projected concentration {ratio} exceeds limit {limit}")]
    Concentration {
        /// Projected symbol exposure over projected total
        ratio: Decimal,
        /// Cap fraction
        limit: Decimal,
    },

    /// Global daily loss cap
    #[error("global daily pnl {daily_pnl} breaches loss limit {limit}")]
    GlobalDailyLoss {
        /// Daily PnL across accounts
        daily_pnl: Decimal,
        /// Global loss limit
        limit: Decimal,
    },

    /// Correlated-exposure cap across accounts
    #[error("correlated group {group} exposure {projected} exceeds limit {limit}")]
    CorrelatedExposure {
        /// Correlation group tag
        group: String,
        /// Exposure if the order fills
        projected: Decimal,
        /// Group cap
        limit: Decimal,
    },

    /// Per-strategy account count cap
    #[error("strategy {strategy} has {count} accounts, limit {limit}")]
    StrategyAccounts {
        /// Strategy tag checked
        strategy: String,
        /// Active accounts in the strategy
        count: u32,
        /// Cap
        limit: u32,
    },
}

/// Cross-account risk aggregator
pub struct MultiAccountRiskManager {
    accounts: Arc<AccountManager>,
    store: Arc<PositionStore>,
    limits: RwLock<MultiAccountLimits>,
    thresholds: AlertThresholds,
    refresh: RefreshConfig,
    account_risk: DashMap<String, AccountRisk>,
    daily_pnl: DashMap<String, Decimal>,
    global: RwLock<GlobalRisk>,
    alerts: EventPublisher<RiskAlert>,
    emergency_events: EventPublisher<EmergencyEvent>,
    emergency: AtomicBool,
    emergency_reason: RwLock<String>,
    correlation_groups: RwLock<FxHashMap<String, Vec<String>>>,
}

impl MultiAccountRiskManager {
    /// Create the aggregator over an account registry and the position
    /// store, wiring the alert and emergency fan-out channels.
    #[must_use]
    pub fn new(
        accounts: Arc<AccountManager>,
        store: Arc<PositionStore>,
        config: &OmsConfig,
        alerts: EventPublisher<RiskAlert>,
        emergency_events: EventPublisher<EmergencyEvent>,
    ) -> Self {
        Self {
            accounts,
            store,
            limits: RwLock::new(config.multi_account.clone()),
            thresholds: config.alerts.clone(),
            refresh: config.refresh.clone(),
            account_risk: DashMap::new(),
            daily_pnl: DashMap::new(),
            global: RwLock::new(GlobalRisk::default()),
            alerts,
            emergency_events,
            emergency: AtomicBool::new(false),
            emergency_reason: RwLock::new(String::new()),
            correlation_groups: RwLock::new(FxHashMap::default()),
        }
    }

    /// Define a correlation group: accounts holding any of these symbols
    /// share the group's exposure budget.
    pub fn set_correlation_group(&self, group: impl Into<String>, symbols: Vec<String>) {
        self.correlation_groups.write().insert(group.into(), symbols);
    }

    /// Add `delta` to an account's daily PnL accumulator
    pub fn record_daily_pnl(&self, account_id: &str, delta: Decimal) {
        *self.daily_pnl.entry(account_id.to_string()).or_insert(Decimal::ZERO) += delta;
    }

    /// Latest per-account snapshot
    #[must_use]
    pub fn account_risk(&self, account_id: &str) -> Option<AccountRisk> {
        self.account_risk.get(account_id).map(|r| r.value().clone())
    }

    /// Most recent global snapshot; may be stale by up to one global
    /// refresh interval relative to per-account state.
    #[must_use]
    pub fn global_risk(&self) -> GlobalRisk {
        self.global.read().clone()
    }

    /// Halt trading: every subsequent admission rejects until released
    pub fn engage_emergency_stop(&self, reason: impl Into<String>) {
        let reason = reason.into();
        *self.emergency_reason.write() = reason.clone();
        self.emergency.store(true, Ordering::SeqCst);
        warn!(reason = %reason, "emergency stop engaged");
        self.emergency_events
            .publish(EmergencyEvent::EmergencyStop { reason, timestamp: Utc::now() });
    }

    /// Resume trading
    pub fn release_emergency_stop(&self) {
        self.emergency.store(false, Ordering::SeqCst);
        info!("emergency stop released");
        self.emergency_events.publish(EmergencyEvent::EmergencyRelease { timestamp: Utc::now() });
    }

    /// Whether trading is currently halted
    #[must_use]
    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }

    /// Synchronous cross-account admission, called after the per-order
    /// engine admits. Checks run in a fixed order; the first failing
    /// rule wins.
    ///
    /// # Errors
    ///
    /// Returns the named [`LimitViolation`] of the first failing rule.
    pub fn validate_order(&self, account_id: &str, order: &Order) -> Result<(), LimitViolation> {
        if self.emergency.load(Ordering::SeqCst) {
            return Err(LimitViolation::EmergencyStop {
                reason: self.emergency_reason.read().clone(),
            });
        }

        let account = self
            .accounts
            .get_account(account_id)
            .ok_or_else(|| LimitViolation::UnknownAccount { account_id: account_id.to_string() })?;

        let mark = self.store.get_mark_price(&order.venue, &order.symbol);
        let order_value = order.notional(mark).unwrap_or(Decimal::ZERO);
        let limits = self.limits.read().clone();
        let risk = self.account_risk(account_id);

        self.check_account_rules(&account, &risk, order, order_value)?;
        self.check_global_rules(&account, order, order_value, &limits)?;
        Ok(())
    }

    fn check_account_rules(
        &self,
        account: &Account,
        risk: &Option<AccountRisk>,
        order: &Order,
        order_value: Decimal,
    ) -> Result<(), LimitViolation> {
        let existing_value = self
            .store
            .get_position(&order.venue, &order.symbol)
            .map_or(Decimal::ZERO, |p| p.position_value);
        let projected_position = existing_value + order_value;
        if projected_position > account.max_position_value {
            return Err(LimitViolation::AccountPositionLimit {
                account_id: account.id.clone(),
                value: projected_position,
                limit: account.max_position_value,
            });
        }

        let daily_pnl =
            self.daily_pnl.get(&account.id).map_or(Decimal::ZERO, |p| *p.value());
        if daily_pnl <= -account.daily_loss_limit {
            return Err(LimitViolation::AccountDailyLoss {
                account_id: account.id.clone(),
                daily_pnl,
                limit: account.daily_loss_limit,
            });
        }

        let exposure = risk.as_ref().map_or(Decimal::ZERO, |r| r.total_exposure);
        let equity = self
            .accounts
            .get_balance(&account.id)
            .map_or(Decimal::ZERO, |b| b.equity);
        let leverage = decimal::div(exposure + order_value, equity);
        match leverage {
            Ok(leverage) if leverage > Decimal::from(account.max_leverage) => {
                return Err(LimitViolation::AccountLeverage {
                    account_id: account.id.clone(),
                    leverage,
                    limit: account.max_leverage,
                });
            }
            Ok(_) => {}
            // Zero live balance cannot carry new exposure
            Err(_) if order_value > Decimal::ZERO => {
                return Err(LimitViolation::AccountLeverage {
                    account_id: account.id.clone(),
                    leverage: Decimal::ZERO,
                    limit: account.max_leverage,
                });
            }
            Err(_) => {}
        }

        let drawdown = risk.as_ref().map_or(Decimal::ZERO, |r| r.current_drawdown);
        let max_drawdown = self.limits.read().max_drawdown;
        if drawdown > max_drawdown {
            return Err(LimitViolation::AccountDrawdown {
                account_id: account.id.clone(),
                drawdown,
                limit: max_drawdown,
            });
        }

        Ok(())
    }

    fn check_global_rules(
        &self,
        account: &Account,
        order: &Order,
        order_value: Decimal,
        limits: &MultiAccountLimits,
    ) -> Result<(), LimitViolation> {
        let global = self.global.read().clone();

        let projected_total = global.total_exposure + order_value;
        if projected_total > limits.max_total_exposure {
            return Err(LimitViolation::TotalExposure {
                projected: projected_total,
                limit: limits.max_total_exposure,
            });
        }

        let venue_exposure = global
            .exposure_by_venue
            .get(&order.venue)
            .copied()
            .unwrap_or(Decimal::ZERO);
        if venue_exposure + order_value > limits.max_exchange_exposure {
            return Err(LimitViolation::VenueExposure {
                venue: order.venue.clone(),
                projected: venue_exposure + order_value,
                limit: limits.max_exchange_exposure,
            });
        }

        let strategy_exposure = global
            .exposure_by_strategy
            .get(&account.strategy)
            .copied()
            .unwrap_or(Decimal::ZERO);
        if strategy_exposure + order_value > limits.max_strategy_exposure {
            return Err(LimitViolation::StrategyExposure {
                strategy: account.strategy.clone(),
                projected: strategy_exposure + order_value,
                limit: limits.max_strategy_exposure,
            });
        }

        let existing_position = self
            .store
            .get_position(&order.venue, &order.symbol)
            .map_or(Decimal::ZERO, |p| p.position_value);
        if existing_position + order_value > limits.max_position_size {
            return Err(LimitViolation::PositionSize {
                projected: existing_position + order_value,
                limit: limits.max_position_size,
            });
        }

        // Concentration: projected exposure for this symbol over the
        // projected total. A zeroed position contributes |0|. Not
        // evaluated against an empty book, where any first order would
        // be 100% concentrated by construction.
        let symbol_exposure: Decimal = self
            .store
            .get_all_positions()
            .iter()
            .filter(|p| p.symbol == order.symbol)
            .map(|p| p.position_value)
            .sum();
        if !global.total_exposure.is_zero() {
            let ratio = decimal::div(symbol_exposure + order_value, projected_total)
                .unwrap_or(Decimal::ZERO);
            if ratio > limits.max_concentration_ratio {
                return Err(LimitViolation::Concentration {
                    ratio,
                    limit: limits.max_concentration_ratio,
                });
            }
        }

        let global_daily: Decimal = self.daily_pnl.iter().map(|e| *e.value()).sum();
        if global_daily <= -limits.max_daily_loss {
            return Err(LimitViolation::GlobalDailyLoss {
                daily_pnl: global_daily,
                limit: limits.max_daily_loss,
            });
        }

        if let Some((group, symbols)) = self
            .correlation_groups
            .read()
            .iter()
            .find(|(_, symbols)| symbols.iter().any(|s| s == &order.symbol))
            .map(|(g, s)| (g.clone(), s.clone()))
        {
            let correlated: Decimal = self
                .store
                .get_all_positions()
                .iter()
                .filter(|p| symbols.iter().any(|s| s == &p.symbol))
                .map(|p| p.position_value)
                .sum();
            if correlated + order_value > limits.max_correlated_exposure {
                return Err(LimitViolation::CorrelatedExposure {
                    group,
                    projected: correlated + order_value,
                    limit: limits.max_correlated_exposure,
                });
            }
        }

        let count = self.accounts.accounts_in_strategy(&account.strategy);
        if count > limits.max_accounts_per_strategy {
            return Err(LimitViolation::StrategyAccounts {
                strategy: account.strategy.clone(),
                count,
                limit: limits.max_accounts_per_strategy,
            });
        }

        Ok(())
    }

    /// Recompute one account's risk snapshot from the position store and
    /// the account registry, replace it atomically, and raise threshold
    /// alerts.
    pub fn refresh_account(&self, account: &Account) {
        let positions = self.store.get_positions_by_venue(&account.venue);
        let previous = self.account_risk(&account.id);

        let mut total_exposure = Decimal::ZERO;
        let mut net_exposure = Decimal::ZERO;
        let mut unrealized = Decimal::ZERO;
        let mut realized = Decimal::ZERO;
        let mut margin_used = Decimal::ZERO;
        let mut open_positions = 0u32;

        for p in &positions {
            total_exposure += p.position_value;
            net_exposure += p.quantity * p.mark_price;
            unrealized += p.unrealized_pnl;
            realized += p.realized_pnl;
            margin_used += p.margin_used;
            if !p.is_flat() {
                open_positions += 1;
            }
        }

        let balance = self.accounts.get_balance(&account.id);
        let equity = balance.as_ref().map_or(Decimal::ZERO, |b| b.equity);
        let current_leverage = decimal::div(total_exposure, equity).unwrap_or(Decimal::ZERO);

        // Peak balance is monotonic; drawdown derives from it and max
        // drawdown never decreases.
        let prior_peak = previous.as_ref().map_or(Decimal::ZERO, |r| r.peak_balance);
        let peak_balance = prior_peak.max(equity);
        let current_drawdown = if peak_balance.is_zero() {
            Decimal::ZERO
        } else {
            decimal::div(peak_balance - equity, peak_balance).unwrap_or(Decimal::ZERO)
        };
        let prior_max = previous.as_ref().map_or(Decimal::ZERO, |r| r.max_drawdown);
        let max_drawdown = prior_max.max(current_drawdown);

        let rate_limit_usage = if account.rate_limit_weight == 0 {
            Decimal::ZERO
        } else {
            decimal::div(
                Decimal::from(self.accounts.rate_limit_used(&account.id)),
                Decimal::from(account.rate_limit_weight),
            )
            .unwrap_or(Decimal::ZERO)
        };

        let snapshot = AccountRisk {
            account_id: account.id.clone(),
            open_positions,
            total_exposure,
            net_exposure,
            realized_pnl: realized,
            unrealized_pnl: unrealized,
            daily_pnl: self.daily_pnl.get(&account.id).map_or(Decimal::ZERO, |p| *p.value()),
            current_leverage,
            margin_used,
            margin_available: equity - margin_used,
            peak_balance,
            current_drawdown,
            max_drawdown,
            rate_limit_usage,
            updated_at: Utc::now(),
        };

        self.raise_account_alerts(account, &snapshot);
        // Atomic replacement: readers see the old or the new snapshot
        self.account_risk.insert(account.id.clone(), snapshot);
    }

    fn raise_account_alerts(&self, account: &Account, snapshot: &AccountRisk) {
        let leverage_warning =
            Decimal::from(account.max_leverage) * self.thresholds.leverage_warning_ratio;
        if !leverage_warning.is_zero() && snapshot.current_leverage >= leverage_warning {
            self.alerts.publish(RiskAlert::new(
                AlertLevel::Warning,
                "leverage",
                Some(account.id.clone()),
                format!(
                    "leverage {} approaching account limit {}",
                    snapshot.current_leverage, account.max_leverage
                ),
            ));
        }
        if snapshot.current_drawdown > self.thresholds.drawdown_warning {
            self.alerts.publish(RiskAlert::new(
                AlertLevel::Warning,
                "drawdown",
                Some(account.id.clone()),
                format!("drawdown {} past warning threshold", snapshot.current_drawdown),
            ));
        }
    }

    /// Refresh every active account
    pub fn refresh_accounts(&self) {
        for account in self.accounts.active_accounts() {
            self.refresh_account(&account);
        }
    }

    /// Rebuild the global snapshot from the per-account snapshots.
    ///
    /// Totals equal the sum over account snapshots at the moment the
    /// pass completes, provided no account update lands mid-pass.
    pub fn refresh_global(&self) {
        let mut next = GlobalRisk::default();
        let thresholds = &self.thresholds;
        let limits = self.limits.read().clone();

        for account in self.accounts.active_accounts() {
            let Some(risk) = self.account_risk(&account.id) else { continue };

            next.total_exposure += risk.total_exposure;
            next.net_exposure += risk.net_exposure;
            *next.exposure_by_venue.entry(account.venue.clone()).or_default() +=
                risk.total_exposure;
            *next.exposure_by_strategy.entry(account.strategy.clone()).or_default() +=
                risk.total_exposure;
            next.total_pnl += risk.unrealized_pnl + risk.realized_pnl;
            next.daily_pnl += risk.daily_pnl;
            next.active_accounts += 1;

            let leverage_warning =
                Decimal::from(account.max_leverage) * thresholds.leverage_warning_ratio;
            if (!leverage_warning.is_zero() && risk.current_leverage >= leverage_warning)
                || risk.current_drawdown > thresholds.drawdown_warning
            {
                next.accounts_at_risk += 1;
            }
        }

        next.largest_position = self
            .store
            .get_all_positions()
            .iter()
            .map(|p| p.position_value)
            .max()
            .unwrap_or(Decimal::ZERO);
        next.concentration_ratio =
            decimal::div(next.largest_position, next.total_exposure).unwrap_or(Decimal::ZERO);
        next.updated_at = Some(Utc::now());

        if next.concentration_ratio > limits.max_concentration_ratio {
            self.alerts.publish(RiskAlert::new(
                AlertLevel::Critical,
                "concentration",
                None,
                format!(
                    "concentration {} exceeds limit {}",
                    next.concentration_ratio, limits.max_concentration_ratio
                ),
            ));
        }
        if next.accounts_at_risk > 0 {
            self.alerts.publish(RiskAlert::new(
                AlertLevel::Warning,
                "accounts_at_risk",
                None,
                format!("{} accounts past warning thresholds", next.accounts_at_risk),
            ));
        }

        *self.global.write() = next;
    }

    /// Per-account refresher: wakes on the configured cadence, observes
    /// the shutdown signal between passes, never mid-aggregation.
    pub async fn run_account_refresh_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.refresh.account_refresh_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.refresh_accounts(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Global refresher, same shutdown discipline as the account loop
    pub async fn run_global_refresh_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.refresh.global_refresh_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.refresh_global(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
