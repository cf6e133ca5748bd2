//! Venue registry
//!
//! Tracks, per venue: supported markets and symbols, fee schedule,
//! heartbeat freshness, latency samples, rate-limit weight budget and
//! current gross exposure. Adapters feed the mutable signals; the smart
//! router only reads.

use dashmap::DashMap;
use rust_decimal::Decimal;
use rustc_hash::FxHashSet;
use services_common::Market;
use std::time::{Duration, Instant};
use tracing::debug;

/// Rate-limit window length
const WEIGHT_WINDOW: Duration = Duration::from_secs(60);

/// Static venue description supplied at registration
#[derive(Debug, Clone)]
pub struct VenueConfig {
    /// Venue identifier, e.g. "binance"
    pub name: String,
    /// Supports spot trading
    pub spot: bool,
    /// Supports futures trading
    pub futures: bool,
    /// Symbols the venue lists
    pub symbols: Vec<String>,
    /// Maker fee in basis points
    pub maker_fee_bp: Decimal,
    /// Taker fee in basis points
    pub taker_fee_bp: Decimal,
    /// Rate-limit weight budget per minute
    pub weight_limit: u32,
}

/// Live venue state
#[derive(Debug, Clone)]
pub struct VenueState {
    /// Venue identifier
    pub name: String,
    /// Supports spot trading
    pub spot: bool,
    /// Supports futures trading
    pub futures: bool,
    /// Symbols the venue lists
    pub symbols: FxHashSet<String>,
    /// Maker fee in basis points
    pub maker_fee_bp: Decimal,
    /// Taker fee in basis points
    pub taker_fee_bp: Decimal,
    /// Rate-limit weight budget per minute
    pub weight_limit: u32,
    /// Weight consumed in the current window
    pub weight_used: u32,
    /// When the current window started
    pub window_started: Instant,
    /// Last heartbeat received
    pub last_heartbeat: Instant,
    /// Latest latency sample in microseconds
    pub latency_us: u64,
    /// Gross exposure currently carried on the venue
    pub gross_exposure: Decimal,
}

impl VenueState {
    fn new(config: VenueConfig) -> Self {
        let now = Instant::now();
        Self {
            name: config.name,
            spot: config.spot,
            futures: config.futures,
            symbols: config.symbols.into_iter().collect(),
            maker_fee_bp: config.maker_fee_bp,
            taker_fee_bp: config.taker_fee_bp,
            weight_limit: config.weight_limit,
            weight_used: 0,
            window_started: now,
            last_heartbeat: now,
            latency_us: 0,
            gross_exposure: Decimal::ZERO,
        }
    }

    /// Whether the venue lists (market, symbol)
    #[must_use]
    pub fn supports(&self, market: Market, symbol: &str) -> bool {
        let market_ok = match market {
            Market::Spot => self.spot,
            Market::Futures => self.futures,
        };
        market_ok && self.symbols.contains(symbol)
    }

    /// Heartbeat younger than `timeout`
    #[must_use]
    pub fn is_healthy(&self, timeout: Duration) -> bool {
        self.last_heartbeat.elapsed() <= timeout
    }

    fn roll_window(&mut self) {
        if self.window_started.elapsed() >= WEIGHT_WINDOW {
            self.window_started = Instant::now();
            self.weight_used = 0;
        }
    }

    /// Weight still available in the current window
    #[must_use]
    pub fn remaining_weight(&self) -> u32 {
        if self.window_started.elapsed() >= WEIGHT_WINDOW {
            self.weight_limit
        } else {
            self.weight_limit.saturating_sub(self.weight_used)
        }
    }
}

/// Concurrent registry of venues
#[derive(Debug, Default)]
pub struct VenueManager {
    venues: DashMap<String, VenueState>,
}

impl VenueManager {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a venue
    pub fn register(&self, config: VenueConfig) {
        debug!(venue = %config.name, "venue registered");
        self.venues.insert(config.name.clone(), VenueState::new(config));
    }

    /// Snapshot one venue's state
    #[must_use]
    pub fn get(&self, name: &str) -> Option<VenueState> {
        self.venues.get(name).map(|v| v.value().clone())
    }

    /// Snapshot every venue
    #[must_use]
    pub fn all(&self) -> Vec<VenueState> {
        self.venues.iter().map(|v| v.value().clone()).collect()
    }

    /// Record a heartbeat
    pub fn record_heartbeat(&self, name: &str) {
        if let Some(mut venue) = self.venues.get_mut(name) {
            venue.last_heartbeat = Instant::now();
        }
    }

    /// Record a latency sample
    pub fn record_latency(&self, name: &str, micros: u64) {
        if let Some(mut venue) = self.venues.get_mut(name) {
            venue.latency_us = micros;
        }
    }

    /// Replace the venue's gross exposure (fed from position state)
    pub fn set_exposure(&self, name: &str, exposure: Decimal) {
        if let Some(mut venue) = self.venues.get_mut(name) {
            venue.gross_exposure = exposure;
        }
    }

    /// Consume rate-limit weight; `false` when the budget is exhausted.
    /// Called by the submission layer once a venue is chosen.
    pub fn try_consume_weight(&self, name: &str, weight: u32) -> bool {
        let Some(mut venue) = self.venues.get_mut(name) else {
            return false;
        };
        venue.roll_window();
        if venue.weight_used + weight > venue.weight_limit {
            return false;
        }
        venue.weight_used += weight;
        true
    }
}
