//! Execution Router Service
//!
//! Venue selection for admitted orders:
//! - Venue registry with capabilities, health, fees and rate budgets
//! - Smart router minimising fees plus an exposure-spread penalty
//! - Exchange adapter interface consumed by the submission layer
//!
//! The router chooses; it never mutates position or risk state, and it
//! never calls an adapter itself.

pub mod adapter;
pub mod smart_router;
pub mod venue_manager;

pub use adapter::{ExchangeAck, ExchangeAdapter, FuturesExchangeAdapter};
pub use smart_router::{RouteDecision, RouteError, RouterConfig, SmartRouter};
pub use venue_manager::{VenueConfig, VenueManager, VenueState};
