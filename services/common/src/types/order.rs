//! Order types and request validation

use crate::errors::{OmsError, OmsResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy / bid
    Buy,
    /// Sell / ask
    Sell,
}

impl Side {
    /// Signed direction multiplier: +1 for buy, -1 for sell
    #[must_use]
    pub const fn sign(self) -> i64 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Execute immediately at best available price
    Market,
    /// Execute at the given price or better
    Limit,
    /// Market order triggered at the stop price
    StopLoss,
    /// Limit order triggered at the stop price
    StopLossLimit,
    /// Market order triggered at the take-profit price
    TakeProfit,
    /// Limit order triggered at the take-profit price
    TakeProfitLimit,
}

impl OrderType {
    /// Whether this type requires a limit price
    #[must_use]
    pub const fn requires_price(self) -> bool {
        matches!(self, Self::Limit | Self::StopLossLimit | Self::TakeProfitLimit)
    }

    /// Whether this type requires a stop price
    #[must_use]
    pub const fn requires_stop_price(self) -> bool {
        matches!(
            self,
            Self::StopLoss | Self::StopLossLimit | Self::TakeProfit | Self::TakeProfitLimit
        )
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good till cancelled
    Gtc,
    /// Immediate or cancel
    Ioc,
    /// Fill or kill
    Fok,
    /// Good till crossing (post-only on some venues)
    Gtx,
}

/// Position side for futures orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    /// Long leg in hedge mode
    Long,
    /// Short leg in hedge mode
    Short,
    /// One-way mode
    Both,
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
            Self::Both => write!(f, "BOTH"),
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted, no fills yet
    New,
    /// Partially executed
    PartiallyFilled,
    /// Completely executed
    Filled,
    /// Cancelled by the client
    Canceled,
    /// Cancel requested, not yet confirmed by the venue
    PendingCancel,
    /// Rejected by risk or by the venue
    Rejected,
    /// Expired by time in force
    Expired,
}

impl OrderStatus {
    /// Whether the order can no longer transition
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected | Self::Expired)
    }
}

/// An order as the kernel sees it.
///
/// Identified by the client-generated id; the venue-assigned id is set
/// once the order has been admitted and submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Client-generated order id
    pub client_order_id: String,
    /// Venue-assigned id, present after submission
    pub exchange_order_id: Option<String>,
    /// Target venue
    pub venue: String,
    /// Trading symbol, e.g. BTCUSDT
    pub symbol: String,
    /// Buy or sell
    pub side: Side,
    /// Order type
    pub order_type: OrderType,
    /// Order quantity, always positive
    pub quantity: Decimal,
    /// Limit price; absent for market orders
    pub price: Option<Decimal>,
    /// Stop trigger price
    pub stop_price: Option<Decimal>,
    /// Time in force
    pub time_in_force: TimeInForce,
    /// Only reduce an existing position
    pub reduce_only: bool,
    /// Reject instead of taking liquidity
    pub post_only: bool,
    /// Futures position side; `None` for spot orders
    pub position_side: Option<PositionSide>,
    /// Current status
    pub status: OrderStatus,
    /// Cumulative executed quantity
    pub executed_quantity: Decimal,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a limit order with GTC time in force
    pub fn limit(
        client_order_id: impl Into<String>,
        venue: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            client_order_id: client_order_id.into(),
            exchange_order_id: None,
            venue: venue.into(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            reduce_only: false,
            post_only: false,
            position_side: None,
            status: OrderStatus::New,
            executed_quantity: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a market order
    pub fn market_order(
        client_order_id: impl Into<String>,
        venue: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
    ) -> Self {
        let mut order = Self::limit(client_order_id, venue, symbol, side, quantity, Decimal::ZERO);
        order.order_type = OrderType::Market;
        order.price = None;
        order.time_in_force = TimeInForce::Ioc;
        order
    }

    /// Whether this is a futures order
    #[must_use]
    pub const fn is_futures(&self) -> bool {
        self.position_side.is_some()
    }

    /// Market segment the order trades in
    #[must_use]
    pub const fn market(&self) -> super::Market {
        if self.is_futures() { super::Market::Futures } else { super::Market::Spot }
    }

    /// Notional value against the limit price, or the given mark price
    /// for market orders. `None` when neither is available.
    #[must_use]
    pub fn notional(&self, mark_price: Option<Decimal>) -> Option<Decimal> {
        let price = match self.order_type {
            OrderType::Market => mark_price.or(self.price),
            _ => self.price.or(mark_price),
        }?;
        Some((self.quantity * price).abs())
    }

    /// Synchronous request validation, run before any risk math.
    ///
    /// # Errors
    ///
    /// Returns [`OmsError::Validation`] naming the first malformed field.
    pub fn validate(&self) -> OmsResult<()> {
        if self.venue.is_empty() {
            return Err(OmsError::validation("venue must not be empty"));
        }
        if self.symbol.is_empty() {
            return Err(OmsError::validation("symbol must not be empty"));
        }
        if self.client_order_id.is_empty() {
            return Err(OmsError::validation("client order id must not be empty"));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(OmsError::validation(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        if self.order_type.requires_price() {
            match self.price {
                Some(p) if p > Decimal::ZERO => {}
                Some(p) => {
                    return Err(OmsError::validation(format!(
                        "price must be positive, got {p}"
                    )));
                }
                None => {
                    return Err(OmsError::validation(format!(
                        "{:?} order requires a price",
                        self.order_type
                    )));
                }
            }
        }
        if self.order_type.requires_stop_price() && self.stop_price.is_none() {
            return Err(OmsError::validation(format!(
                "{:?} order requires a stop price",
                self.order_type
            )));
        }
        Ok(())
    }
}
