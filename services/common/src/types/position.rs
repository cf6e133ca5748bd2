//! Position types and derived-field arithmetic

use crate::decimal;
use super::PositionSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Market segment within a venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    /// Spot market
    Spot,
    /// Futures market
    Futures,
}

impl Market {
    /// Short tag used in the shared-memory record
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Futures => "futures",
        }
    }

    /// Parse the shared-memory tag back
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "spot" => Some(Self::Spot),
            "futures" => Some(Self::Futures),
            _ => None,
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of a position: one net holding per (venue, symbol)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    /// Venue identifier, e.g. "binance"
    pub venue: String,
    /// Trading symbol, e.g. "BTCUSDT"
    pub symbol: String,
}

impl PositionKey {
    /// Create a key
    pub fn new(venue: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self { venue: venue.into(), symbol: symbol.into() }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.venue, self.symbol)
    }
}

/// Net holding in a single (venue, symbol).
///
/// Quantity is signed: positive for long, negative for short. The three
/// derived fields are recomputed via [`Position::recompute_derived`] on
/// every mutation so readers never observe stale values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Venue holding the position
    pub venue: String,
    /// Trading symbol
    pub symbol: String,
    /// Spot or futures
    pub market: Market,
    /// Long or short
    pub side: PositionSide,
    /// Signed quantity: long > 0, short < 0
    pub quantity: Decimal,
    /// Average entry price
    pub entry_price: Decimal,
    /// Latest mark price
    pub mark_price: Decimal,
    /// Unrealized PnL at the current mark
    pub unrealized_pnl: Decimal,
    /// Realized PnL for the session
    pub realized_pnl: Decimal,
    /// Leverage applied (1 for spot)
    pub leverage: u32,
    /// Margin allocated to the position
    pub margin_used: Decimal,
    /// Derived: |quantity| x mark price
    pub position_value: Decimal,
    /// Derived: unrealized PnL over entry notional, in percent
    pub pnl_percent: Decimal,
    /// Derived: position value over (margin used x leverage)
    pub margin_ratio: Decimal,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Create a position with derived fields already consistent
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        venue: impl Into<String>,
        symbol: impl Into<String>,
        market: Market,
        quantity: Decimal,
        entry_price: Decimal,
        mark_price: Decimal,
        leverage: u32,
        margin_used: Decimal,
    ) -> Self {
        let mut position = Self {
            venue: venue.into(),
            symbol: symbol.into(),
            market,
            side: if quantity < Decimal::ZERO { PositionSide::Short } else { PositionSide::Long },
            quantity,
            entry_price,
            mark_price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            leverage,
            margin_used,
            position_value: Decimal::ZERO,
            pnl_percent: Decimal::ZERO,
            margin_ratio: Decimal::ZERO,
            updated_at: Utc::now(),
        };
        position.unrealized_pnl = (mark_price - entry_price) * quantity;
        position.recompute_derived();
        position
    }

    /// Key of this position
    #[must_use]
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.venue.clone(), self.symbol.clone())
    }

    /// Whether the net quantity has returned to zero
    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Recompute position value, PnL percent and margin ratio from the
    /// current quantity, prices and margin. Also re-syncs the side tag
    /// with the quantity sign.
    pub fn recompute_derived(&mut self) {
        let abs_qty = self.quantity.abs();
        self.position_value = abs_qty * self.mark_price;

        let entry_notional = abs_qty * self.entry_price;
        self.pnl_percent = if entry_notional.is_zero() {
            Decimal::ZERO
        } else {
            decimal::div(self.unrealized_pnl * Decimal::ONE_HUNDRED, entry_notional)
                .unwrap_or(Decimal::ZERO)
        };

        let margin_capacity = self.margin_used * Decimal::from(self.leverage);
        self.margin_ratio = if margin_capacity.is_zero() {
            Decimal::ZERO
        } else {
            decimal::div(self.position_value, margin_capacity).unwrap_or(Decimal::ZERO)
        };

        if !self.quantity.is_zero() {
            self.side = if self.quantity < Decimal::ZERO {
                PositionSide::Short
            } else {
                PositionSide::Long
            };
        }
    }

    /// Re-mark the position and refresh unrealized PnL and derived fields
    pub fn apply_mark_price(&mut self, mark_price: Decimal) {
        self.mark_price = mark_price;
        self.unrealized_pnl = (mark_price - self.entry_price) * self.quantity;
        self.recompute_derived();
    }
}

/// Symbol-level aggregation across venues, computed on demand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedPosition {
    /// Symbol shared by the contributing positions
    pub symbol: String,
    /// Signed sum of contributing quantities; may be zero
    pub total_quantity: Decimal,
    /// Quantity-weighted average entry; zero when the net quantity is zero
    pub avg_entry_price: Decimal,
    /// Sum of position values, each against its own mark
    pub total_value: Decimal,
    /// Sum of unrealized plus realized PnL
    pub total_pnl: Decimal,
    /// The contributing (venue, symbol) positions
    pub positions: Vec<Position>,
}

impl AggregatedPosition {
    /// Aggregate a non-empty set of positions sharing one symbol.
    ///
    /// Weighted average entry is (sum quantity_i x entry_i) / sum
    /// quantity_i; callers must be prepared for a zero net quantity, in
    /// which case the average entry is reported as zero.
    #[must_use]
    pub fn from_positions(symbol: String, positions: Vec<Position>) -> Self {
        let mut total_quantity = Decimal::ZERO;
        let mut entry_notional = Decimal::ZERO;
        let mut total_value = Decimal::ZERO;
        let mut total_pnl = Decimal::ZERO;

        for p in &positions {
            total_quantity += p.quantity;
            entry_notional += p.quantity * p.entry_price;
            total_value += p.position_value;
            total_pnl += p.unrealized_pnl + p.realized_pnl;
        }

        let avg_entry_price =
            decimal::div(entry_notional, total_quantity).unwrap_or(Decimal::ZERO);

        Self { symbol, total_quantity, avg_entry_price, total_value, total_pnl, positions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_derived_fields_follow_mutation() {
        let mut p = Position::new(
            "binance",
            "BTCUSDT",
            Market::Futures,
            dec!(2),
            dec!(40000),
            dec!(42000),
            10,
            dec!(8400),
        );
        assert_eq!(p.position_value, dec!(84000));
        assert_eq!(p.unrealized_pnl, dec!(4000));
        assert_eq!(p.pnl_percent, dec!(5));
        assert_eq!(p.margin_ratio, dec!(1));

        p.apply_mark_price(dec!(41000));
        assert_eq!(p.position_value, dec!(82000));
        assert_eq!(p.unrealized_pnl, dec!(2000));
    }

    #[test]
    fn test_short_position_sign_conventions() {
        let p = Position::new(
            "okx",
            "ETHUSDT",
            Market::Futures,
            dec!(-3),
            dec!(3000),
            dec!(2900),
            5,
            dec!(1800),
        );
        assert_eq!(p.side, PositionSide::Short);
        // Short profits when the mark drops below entry
        assert_eq!(p.unrealized_pnl, dec!(300));
        assert_eq!(p.position_value, dec!(8700));
    }

    #[test]
    fn test_aggregation_weighted_entry() {
        let a = Position::new(
            "binance", "BTCUSDT", Market::Spot, dec!(1), dec!(40000), dec!(42000), 1, dec!(0),
        );
        let b = Position::new(
            "okx", "BTCUSDT", Market::Spot, dec!(0.3), dec!(41000), dec!(42000), 1, dec!(0),
        );
        let agg = AggregatedPosition::from_positions("BTCUSDT".into(), vec![a, b]);
        assert_eq!(agg.total_quantity, dec!(1.3));
        // (40000*1 + 41000*0.3) / 1.3, truncated at scale 8
        assert_eq!(agg.avg_entry_price, dec!(40230.76923076));
    }

    #[test]
    fn test_aggregation_zero_net_quantity() {
        let a = Position::new(
            "binance", "BTCUSDT", Market::Spot, dec!(1), dec!(40000), dec!(42000), 1, dec!(0),
        );
        let b = Position::new(
            "okx", "BTCUSDT", Market::Spot, dec!(-1), dec!(41000), dec!(42000), 1, dec!(0),
        );
        let agg = AggregatedPosition::from_positions("BTCUSDT".into(), vec![a, b]);
        assert!(agg.total_quantity.is_zero());
        assert_eq!(agg.avg_entry_price, Decimal::ZERO);
    }

    #[test]
    fn test_flat_position_keeps_zero_derived_pnl() {
        let mut p = Position::new(
            "binance", "BTCUSDT", Market::Spot, dec!(0), dec!(40000), dec!(42000), 1, dec!(0),
        );
        p.recompute_derived();
        assert!(p.is_flat());
        assert_eq!(p.position_value, Decimal::ZERO);
        assert_eq!(p.pnl_percent, Decimal::ZERO);
    }
}
