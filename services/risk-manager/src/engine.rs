//! Per-order risk engine
//!
//! Admits or rejects a single order against configured limits in bounded
//! time. The check path takes read locks only, looks positions and
//! balances up in pre-allocated maps, and does all arithmetic in decimal
//! without formatted I/O. State mutation happens off the check path
//! under write locks.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use services_common::{Balance, Order, OrderType, PositionKey, RiskLimits, decimal};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Pre-allocated capacity for the hot-path maps
const RISK_MAP_CAPACITY: usize = 1024;

/// Slim position mirror used only on the admission fast path.
///
/// The position manager owns the full `Position`; keeping this separate
/// mirror decouples the engine's locking from the store's locking and
/// removes the store from the admission critical section. The same call
/// sites that update the store update this mirror.
#[derive(Debug, Clone)]
pub struct PositionRisk {
    /// Signed quantity: long > 0, short < 0
    pub quantity: Decimal,
    /// Average entry price
    pub entry_price: Decimal,
    /// Latest mark price
    pub mark_price: Decimal,
    /// |quantity| x mark price
    pub position_value: Decimal,
    /// Leverage applied
    pub leverage: u32,
    /// Margin allocated
    pub margin_used: Decimal,
}

/// Named decimals captured at evaluation time
#[derive(Debug, Clone, Default)]
pub struct RiskCheckMetrics {
    /// Value of the order under check
    pub order_value: Decimal,
    /// Exposure across all mirrored positions before the order
    pub current_exposure: Decimal,
    /// Exposure if the order fills completely
    pub projected_exposure: Decimal,
    /// Estimated leverage for futures orders; zero for spot
    pub estimated_leverage: Decimal,
    /// Daily PnL at evaluation time
    pub daily_pnl: Decimal,
    /// Daily loss limit crossed but strict mode is off
    pub daily_loss_warning: bool,
}

/// Outcome of one admission check.
///
/// A rejection is a successful check with a negative result, not an
/// error: the reason names the first failing rule and the metrics let
/// the client display why the order was blocked.
#[derive(Debug, Clone)]
pub struct RiskCheckResult {
    /// Whether the order may proceed
    pub passed: bool,
    /// First failing rule; empty when passed
    pub reason: String,
    /// Metrics at the moment of evaluation
    pub metrics: RiskCheckMetrics,
    /// Measured check duration
    pub duration: Duration,
}

impl RiskCheckResult {
    fn rejected(reason: String, metrics: RiskCheckMetrics, started: Instant) -> Self {
        Self { passed: false, reason, metrics, duration: started.elapsed() }
    }

    fn admitted(metrics: RiskCheckMetrics, started: Instant) -> Self {
        Self { passed: true, reason: String::new(), metrics, duration: started.elapsed() }
    }
}

/// Engine counters and current limits
#[derive(Debug, Clone)]
pub struct RiskEngineMetrics {
    /// Checks performed
    pub checks_performed: u64,
    /// Orders rejected
    pub orders_rejected: u64,
    /// Rolling average check duration
    pub avg_check_time: Duration,
    /// Current exposure across mirrored positions
    pub current_exposure: Decimal,
    /// Daily PnL
    pub daily_pnl: Decimal,
    /// Limits currently in force
    pub limits: RiskLimits,
}

/// Per-order admission control
pub struct RiskEngine {
    limits: RwLock<RiskLimits>,
    position_risks: RwLock<FxHashMap<PositionKey, PositionRisk>>,
    balances: RwLock<FxHashMap<String, Balance>>,
    marks: RwLock<FxHashMap<PositionKey, Decimal>>,
    daily_pnl: RwLock<Decimal>,
    checks: AtomicU64,
    rejections: AtomicU64,
    check_nanos: AtomicU64,
}

impl RiskEngine {
    /// Create an engine with pre-allocated hot-path maps
    #[must_use]
    pub fn new(limits: RiskLimits) -> Self {
        let mut position_risks = FxHashMap::default();
        position_risks.reserve(RISK_MAP_CAPACITY);
        let mut marks = FxHashMap::default();
        marks.reserve(RISK_MAP_CAPACITY);

        Self {
            limits: RwLock::new(limits),
            position_risks: RwLock::new(position_risks),
            balances: RwLock::new(FxHashMap::default()),
            marks: RwLock::new(marks),
            daily_pnl: RwLock::new(Decimal::ZERO),
            checks: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            check_nanos: AtomicU64::new(0),
        }
    }

    /// Admit or reject `order` against the configured limits.
    ///
    /// Pure over (order, limits, position/balance/daily-PnL snapshot at
    /// call time); read locks only, never held across anything blocking.
    #[must_use]
    pub fn check_order(&self, order: &Order) -> RiskCheckResult {
        let started = Instant::now();
        self.checks.fetch_add(1, Ordering::Relaxed);

        let limits = self.limits.read();
        let key = PositionKey::new(order.venue.clone(), order.symbol.clone());
        let mut metrics = RiskCheckMetrics::default();

        // 1. Order value: limit price, or best-known mark for market
        //    orders with the price field as fallback.
        let reference_price = match order.order_type {
            OrderType::Market => self.marks.read().get(&key).copied().or(order.price),
            _ => order.price,
        };
        let Some(reference_price) = reference_price else {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            return self.finish(RiskCheckResult::rejected(
                format!("no price reference for market order on {}:{}", order.venue, order.symbol),
                metrics,
                started,
            ));
        };
        let order_value = (order.quantity * reference_price).abs();
        metrics.order_value = order_value;

        // 2. Order value cap: equal is admitted, above is rejected.
        if order_value > limits.max_order_value {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            return self.finish(RiskCheckResult::rejected(
                format!(
                    "order value {} exceeds max_order_value {}",
                    order_value, limits.max_order_value
                ),
                metrics,
                started,
            ));
        }

        let position_risks = self.position_risks.read();

        // 3. Projected same-side position size for (venue, symbol).
        let existing = position_risks.get(&key);
        let same_side_qty = existing.map_or(Decimal::ZERO, |p| {
            let long_order = order.side == services_common::Side::Buy;
            if (long_order && p.quantity > Decimal::ZERO)
                || (!long_order && p.quantity < Decimal::ZERO)
            {
                p.quantity.abs()
            } else {
                Decimal::ZERO
            }
        });
        let projected_size = ((order.quantity + same_side_qty) * reference_price).abs();
        if projected_size > limits.max_position_size {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            return self.finish(RiskCheckResult::rejected(
                format!(
                    "projected position {} exceeds max_position_size {}",
                    projected_size, limits.max_position_size
                ),
                metrics,
                started,
            ));
        }

        let current_exposure: Decimal =
            position_risks.values().map(|p| p.position_value).sum();
        metrics.current_exposure = current_exposure;
        metrics.projected_exposure = current_exposure + order_value;

        // 4. Estimated leverage for futures orders, against the venue's
        //    available balance.
        if order.is_futures() {
            let venue_exposure: Decimal = position_risks
                .iter()
                .filter(|(k, _)| k.venue == order.venue)
                .map(|(_, p)| p.position_value)
                .sum();
            let available = self
                .balances
                .read()
                .get(&order.venue)
                .map(|b| b.available)
                .unwrap_or(Decimal::ZERO);

            match decimal::div(venue_exposure + order_value, available) {
                Ok(estimated) => {
                    metrics.estimated_leverage = estimated;
                    if estimated > Decimal::from(limits.max_leverage) {
                        self.rejections.fetch_add(1, Ordering::Relaxed);
                        return self.finish(RiskCheckResult::rejected(
                            format!(
                                "estimated leverage {} exceeds max_leverage {}",
                                estimated, limits.max_leverage
                            ),
                            metrics,
                            started,
                        ));
                    }
                }
                Err(_) => {
                    self.rejections.fetch_add(1, Ordering::Relaxed);
                    return self.finish(RiskCheckResult::rejected(
                        format!("no available balance on {} to lever against", order.venue),
                        metrics,
                        started,
                    ));
                }
            }
        }

        // 5. Projected total exposure.
        if metrics.projected_exposure > limits.max_exposure {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            return self.finish(RiskCheckResult::rejected(
                format!(
                    "projected exposure {} exceeds max_exposure {}",
                    metrics.projected_exposure, limits.max_exposure
                ),
                metrics,
                started,
            ));
        }
        drop(position_risks);

        // 6. Daily loss: strict mode rejects, otherwise admit with a
        //    warning attached to the result.
        let daily_pnl = *self.daily_pnl.read();
        metrics.daily_pnl = daily_pnl;
        if daily_pnl <= -limits.max_daily_loss {
            if limits.strict_mode {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                return self.finish(RiskCheckResult::rejected(
                    format!(
                        "daily pnl {} breaches max_daily_loss {} in strict mode",
                        daily_pnl, limits.max_daily_loss
                    ),
                    metrics,
                    started,
                ));
            }
            metrics.daily_loss_warning = true;
        }

        // 7. Admitted.
        self.finish(RiskCheckResult::admitted(metrics, started))
    }

    fn finish(&self, result: RiskCheckResult) -> RiskCheckResult {
        self.check_nanos
            .fetch_add(result.duration.as_nanos() as u64, Ordering::Relaxed);
        result
    }

    /// Replace the fast-path mirror for (venue, symbol). Called by the
    /// same sites that update the position store; takes a write lock.
    pub fn update_position(&self, venue: &str, symbol: &str, risk: PositionRisk) {
        self.position_risks
            .write()
            .insert(PositionKey::new(venue, symbol), risk);
    }

    /// Replace the balance for a venue
    pub fn update_balance(&self, venue: &str, balance: Balance) {
        self.balances.write().insert(venue.to_string(), balance);
    }

    /// Record the best-known mark for (venue, symbol)
    pub fn update_mark(&self, venue: &str, symbol: &str, price: Decimal) {
        self.marks.write().insert(PositionKey::new(venue, symbol), price);
    }

    /// Add `delta` to the cumulative daily PnL
    pub fn update_daily_pnl(&self, delta: Decimal) {
        let mut daily = self.daily_pnl.write();
        *daily += delta;
        if *daily <= -self.limits.read().max_daily_loss {
            warn!(daily_pnl = %daily, "daily loss limit crossed");
        }
    }

    /// Reset the daily PnL accumulator (start of trading day)
    pub fn reset_daily_pnl(&self) {
        *self.daily_pnl.write() = Decimal::ZERO;
    }

    /// Toggle strict mode; visible to subsequent checks only
    pub fn set_strict_mode(&self, strict: bool) {
        self.limits.write().strict_mode = strict;
    }

    /// Replace the full limit set
    pub fn set_limits(&self, limits: RiskLimits) {
        *self.limits.write() = limits;
    }

    /// Engine counters plus the limits in force
    #[must_use]
    pub fn metrics(&self) -> RiskEngineMetrics {
        let checks = self.checks.load(Ordering::Relaxed);
        let nanos = self.check_nanos.load(Ordering::Relaxed);
        let avg_check_time =
            if checks == 0 { Duration::ZERO } else { Duration::from_nanos(nanos / checks) };

        RiskEngineMetrics {
            checks_performed: checks,
            orders_rejected: self.rejections.load(Ordering::Relaxed),
            avg_check_time,
            current_exposure: self.position_risks.read().values().map(|p| p.position_value).sum(),
            daily_pnl: *self.daily_pnl.read(),
            limits: self.limits.read().clone(),
        }
    }
}
