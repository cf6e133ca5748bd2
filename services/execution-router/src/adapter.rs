//! Exchange adapter interface
//!
//! Each venue adapter implements these operations; transports, request
//! signing and reconnection are the adapter's concern. The kernel only
//! consumes this surface.

use async_trait::async_trait;
use rust_decimal::Decimal;
use services_common::{Balance, OmsResult, Order, OrderStatus};

/// Venue acknowledgement for a submitted order
#[derive(Debug, Clone)]
pub struct ExchangeAck {
    /// Venue-assigned order id
    pub exchange_order_id: String,
    /// Status reported by the venue
    pub status: OrderStatus,
}

/// Operations every venue adapter exposes
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Venue identifier this adapter talks to
    fn venue(&self) -> &str;

    /// Submit a spot order
    async fn place_order(&self, order: &Order) -> OmsResult<ExchangeAck>;

    /// Cancel by venue-assigned id
    async fn cancel_order(&self, symbol: &str, exchange_order_id: &str) -> OmsResult<()>;

    /// Fetch one order's current state
    async fn get_order(&self, symbol: &str, exchange_order_id: &str) -> OmsResult<Order>;

    /// Fetch open orders, optionally filtered by symbol
    async fn get_open_orders(&self, symbol: Option<&str>) -> OmsResult<Vec<Order>>;

    /// Fetch the venue balance
    async fn get_balance(&self) -> OmsResult<Balance>;
}

/// Additional operations for futures-capable venues
#[async_trait]
pub trait FuturesExchangeAdapter: ExchangeAdapter {
    /// Submit a futures order (position side set on the order)
    async fn place_futures_order(&self, order: &Order) -> OmsResult<ExchangeAck>;

    /// Set leverage for a symbol
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> OmsResult<()>;

    /// Current mark price for a symbol
    async fn get_mark_price(&self, symbol: &str) -> OmsResult<Decimal>;
}
