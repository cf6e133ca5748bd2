//! Smart order routing
//!
//! Given an order and the venue registry, pick the venue that (a)
//! supports the order's market and symbol, (b) is healthy, (c) has
//! rate-limit weight left for the order's weight class, and (d)
//! minimises expected fees plus a penalty proportional to the venue's
//! current gross exposure, spreading exposure across venues. Ties break
//! by lower latency, then lexicographic venue name, so routing is
//! reproducible.

use crate::venue_manager::{VenueManager, VenueState};
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use services_common::{OmsError, Order, OrderType, TimeInForce, decimal};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const BASIS_POINTS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Routing policy knobs
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Heartbeats older than this mark a venue unhealthy
    pub heartbeat_timeout: Duration,
    /// Exposure penalty in basis points of the venue's gross exposure
    pub exposure_penalty_bp: Decimal,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(10),
            exposure_penalty_bp: Decimal::ONE,
        }
    }
}

/// Routing failure; retryable after backoff
#[derive(Debug, Error)]
pub enum RouteError {
    /// Every candidate was filtered out; reasons are per venue
    #[error("no admissible venue for {symbol} ({} candidates rejected)", reasons.len())]
    NoAdmissibleVenue {
        /// Symbol that could not be routed
        symbol: String,
        /// Why each candidate was rejected
        reasons: FxHashMap<String, String>,
    },

    /// The order has no price reference to cost against
    #[error("cannot cost order {client_order_id} without a price")]
    NoPriceReference {
        /// Order that could not be costed
        client_order_id: String,
    },
}

impl From<RouteError> for OmsError {
    fn from(err: RouteError) -> Self {
        Self::Capacity { details: err.to_string() }
    }
}

/// Chosen venue plus the costs that were compared
#[derive(Debug, Clone)]
pub struct RouteDecision {
    /// The winning venue
    pub venue: String,
    /// Cost of the winning venue
    pub cost: Decimal,
    /// Cost per admissible candidate, for audit
    pub candidate_costs: FxHashMap<String, Decimal>,
}

/// Venue selector; reads the registry, mutates nothing
pub struct SmartRouter {
    venues: Arc<VenueManager>,
    config: RouterConfig,
}

impl SmartRouter {
    /// Create a router over the venue registry
    #[must_use]
    pub fn new(venues: Arc<VenueManager>, config: RouterConfig) -> Self {
        Self { venues, config }
    }

    /// Pick a venue for `order`, or report every candidate's rejection
    /// reason.
    ///
    /// # Errors
    ///
    /// [`RouteError::NoAdmissibleVenue`] when the filter leaves nothing;
    /// [`RouteError::NoPriceReference`] when the order cannot be costed.
    pub fn route(&self, order: &Order) -> Result<RouteDecision, RouteError> {
        let order_value = match order.price.or(order.stop_price) {
            Some(price) => (order.quantity * price).abs(),
            // Unpriced market orders cost the same fee everywhere; the
            // exposure penalty still differentiates venues.
            None if order.order_type == OrderType::Market => Decimal::ZERO,
            None => {
                return Err(RouteError::NoPriceReference {
                    client_order_id: order.client_order_id.clone(),
                });
            }
        };

        let market = order.market();
        let weight = order_weight(order);
        let mut reasons: FxHashMap<String, String> = FxHashMap::default();
        let mut candidates: Vec<(Decimal, u64, String)> = Vec::new();
        let mut candidate_costs: FxHashMap<String, Decimal> = FxHashMap::default();

        for venue in self.venues.all() {
            if !venue.supports(market, &order.symbol) {
                reasons.insert(
                    venue.name.clone(),
                    format!("does not list {} {}", market, order.symbol),
                );
                continue;
            }
            if !venue.is_healthy(self.config.heartbeat_timeout) {
                reasons.insert(venue.name.clone(), "stale heartbeat".to_string());
                continue;
            }
            if venue.remaining_weight() < weight {
                reasons.insert(venue.name.clone(), "rate-limit weight exhausted".to_string());
                continue;
            }

            let cost = self.venue_cost(&venue, order, order_value);
            candidate_costs.insert(venue.name.clone(), cost);
            candidates.push((cost, venue.latency_us, venue.name.clone()));
        }

        // Cost, then latency, then name: deterministic for equal costs
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        match candidates.into_iter().next() {
            Some((cost, _, venue)) => {
                debug!(venue = %venue, %cost, symbol = %order.symbol, "order routed");
                Ok(RouteDecision { venue, cost, candidate_costs })
            }
            None => Err(RouteError::NoAdmissibleVenue {
                symbol: order.symbol.clone(),
                reasons,
            }),
        }
    }

    fn venue_cost(&self, venue: &VenueState, order: &Order, order_value: Decimal) -> Decimal {
        let fee_bp = if takes_liquidity(order) { venue.taker_fee_bp } else { venue.maker_fee_bp };
        let fee = decimal::div(order_value * fee_bp, BASIS_POINTS).unwrap_or(Decimal::ZERO);
        let penalty =
            decimal::div(venue.gross_exposure * self.config.exposure_penalty_bp, BASIS_POINTS)
                .unwrap_or(Decimal::ZERO);
        fee + penalty
    }
}

/// Rate-limit weight class of an order
const fn order_weight(order: &Order) -> u32 {
    match order.order_type {
        OrderType::Market | OrderType::Limit => 1,
        // Trigger orders cost more on most venues
        OrderType::StopLoss
        | OrderType::StopLossLimit
        | OrderType::TakeProfit
        | OrderType::TakeProfitLimit => 2,
    }
}

/// Whether the order is expected to take liquidity
const fn takes_liquidity(order: &Order) -> bool {
    if order.post_only || matches!(order.time_in_force, TimeInForce::Gtx) {
        return false;
    }
    matches!(
        order.order_type,
        OrderType::Market | OrderType::StopLoss | OrderType::TakeProfit
    ) || matches!(order.time_in_force, TimeInForce::Ioc | TimeInForce::Fok)
}
