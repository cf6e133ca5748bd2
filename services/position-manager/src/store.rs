//! Concurrent position store
//!
//! The in-memory map is the source of truth; the shared-memory region is
//! a projection. Both are written inside the same critical section so no
//! observer of a key sees one without the other, and a cached entry is
//! never newer than its shared-memory slot.

use crate::shm::{SharedMemoryRegion, SlotRecord};
use crate::snapshot::{self, SnapshotDocument, SnapshotMetrics};
use anyhow::{Context, Result};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use services_common::{
    AggregatedPosition, EventPublisher, OmsResult, Position, PositionEvent, PositionKey,
    StoreConfig, decimal,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Store counters and aggregate risk numbers
#[derive(Debug, Clone)]
pub struct StoreMetrics {
    /// Number of positions held
    pub position_count: usize,
    /// Sum of position values
    pub total_value: Decimal,
    /// Sum of margin used
    pub total_margin_used: Decimal,
    /// Highest leverage across positions
    pub max_leverage: u32,
    /// Sum of unrealized PnL
    pub unrealized_pnl: Decimal,
    /// Sum of realized PnL
    pub realized_pnl: Decimal,
    /// Unrealized plus realized
    pub total_pnl: Decimal,
    /// Updates applied since construction
    pub update_count: u64,
    /// Reads served since construction
    pub read_count: u64,
    /// Rolling average update duration
    pub avg_update_latency: Duration,
}

/// Authoritative store for every (venue, symbol) position
pub struct PositionStore {
    config: StoreConfig,
    positions: DashMap<PositionKey, Position>,
    mark_prices: DashMap<PositionKey, Decimal>,
    shm: Mutex<SharedMemoryRegion>,
    events: Option<EventPublisher<PositionEvent>>,
    update_count: AtomicU64,
    read_count: AtomicU64,
    update_nanos: AtomicU64,
}

impl PositionStore {
    /// Construct the store: map the shared-memory region, create the
    /// snapshot directory and recover the latest snapshot before any
    /// traffic is accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared-memory region or the snapshot
    /// directory cannot be set up. Snapshot load failures are not
    /// errors: the store starts empty with a warning.
    pub fn new(config: StoreConfig) -> Result<Self> {
        let shm = SharedMemoryRegion::open(&config.shm_path, config.shm_slots)?;
        std::fs::create_dir_all(&config.snapshot_dir)
            .with_context(|| format!("creating {}", config.snapshot_dir.display()))?;

        let store = Self {
            config,
            positions: DashMap::new(),
            mark_prices: DashMap::new(),
            shm: Mutex::new(shm),
            events: None,
            update_count: AtomicU64::new(0),
            read_count: AtomicU64::new(0),
            update_nanos: AtomicU64::new(0),
        };
        store.recover();
        Ok(store)
    }

    /// Attach a position-event publisher for downstream fan-out
    #[must_use]
    pub fn with_events(mut self, events: EventPublisher<PositionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Load the latest snapshot into the map and the shared-memory
    /// region. Malformed snapshots are refused; the store starts empty.
    fn recover(&self) {
        let latest = match snapshot::find_latest(&self.config.snapshot_dir) {
            Ok(Some(path)) => path,
            Ok(None) => {
                info!("no snapshot found, starting with an empty position store");
                return;
            }
            Err(e) => {
                warn!(error = %e, "snapshot scan failed, starting empty");
                return;
            }
        };

        match snapshot::load_snapshot(&latest) {
            Ok(doc) => {
                let count = doc.positions.len();
                let mut shm = self.shm.lock();
                for position in doc.positions {
                    if let Err(e) = shm.store(&slot_record(&position)) {
                        warn!(key = %position.key(), error = %e, "skipping position during recovery");
                        continue;
                    }
                    self.positions.insert(position.key(), position);
                }
                info!(path = %latest.display(), count, "recovered positions from snapshot");
            }
            Err(e) => {
                warn!(path = %latest.display(), error = %e, "snapshot refused, starting empty");
            }
        }
    }

    /// Upsert a position by (venue, symbol).
    ///
    /// Derived fields are recomputed before storing; the map entry and
    /// the shared-memory slot are written under the same critical
    /// section.
    ///
    /// # Errors
    ///
    /// Returns [`services_common::OmsError::Capacity`] when the
    /// shared-memory region has no free slot; the in-memory map is not
    /// mutated in that case.
    pub fn update_position(&self, mut position: Position) -> OmsResult<()> {
        let started = Instant::now();
        position.recompute_derived();
        position.updated_at = Utc::now();
        let key = position.key();
        let event = self.events.as_ref().map(|_| PositionEvent {
            venue: position.venue.clone(),
            symbol: position.symbol.clone(),
            quantity: position.quantity,
            mark_price: position.mark_price,
            unrealized_pnl: position.unrealized_pnl,
            timestamp: position.updated_at,
        });

        {
            // Same critical section: slot write precedes the map write,
            // so the cached entry is never newer than the slot.
            let mut shm = self.shm.lock();
            let entry = self.positions.entry(key);
            shm.store(&slot_record(&position))?;
            entry.insert(position);
        }

        self.update_count.fetch_add(1, Ordering::Relaxed);
        self.update_nanos
            .fetch_add(started.elapsed().as_nanos() as u64, Ordering::Relaxed);

        if let (Some(events), Some(event)) = (self.events.as_ref(), event) {
            events.publish(event);
        }
        Ok(())
    }

    /// O(1) read of the current position for (venue, symbol)
    #[must_use]
    pub fn get_position(&self, venue: &str, symbol: &str) -> Option<Position> {
        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.positions
            .get(&PositionKey::new(venue, symbol))
            .map(|p| p.value().clone())
    }

    /// Value-copy snapshot of every position
    #[must_use]
    pub fn get_all_positions(&self) -> Vec<Position> {
        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.positions.iter().map(|e| e.value().clone()).collect()
    }

    /// Value-copy snapshot of one venue's positions
    #[must_use]
    pub fn get_positions_by_venue(&self, venue: &str) -> Vec<Position> {
        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.positions
            .iter()
            .filter(|e| e.value().venue == venue)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Per-symbol aggregation over the current position set.
    ///
    /// Callers must be prepared for a zero net quantity per symbol.
    #[must_use]
    pub fn get_aggregated_positions(&self) -> FxHashMap<String, AggregatedPosition> {
        let mut by_symbol: FxHashMap<String, Vec<Position>> = FxHashMap::default();
        for entry in self.positions.iter() {
            by_symbol
                .entry(entry.value().symbol.clone())
                .or_default()
                .push(entry.value().clone());
        }
        by_symbol
            .into_iter()
            .map(|(symbol, positions)| {
                let agg = AggregatedPosition::from_positions(symbol.clone(), positions);
                (symbol, agg)
            })
            .collect()
    }

    /// Store the latest mark price; if a position exists for the key,
    /// re-mark it through the normal update path.
    ///
    /// # Errors
    ///
    /// Propagates the capacity error from the triggered update.
    pub fn update_mark_price(&self, venue: &str, symbol: &str, price: Decimal) -> OmsResult<()> {
        let key = PositionKey::new(venue, symbol);
        self.mark_prices.insert(key.clone(), price);

        let position = self.positions.get(&key).map(|p| p.value().clone());
        if let Some(mut position) = position {
            position.apply_mark_price(price);
            self.update_position(position)?;
        }
        Ok(())
    }

    /// Last mark price observed for (venue, symbol)
    #[must_use]
    pub fn get_mark_price(&self, venue: &str, symbol: &str) -> Option<Decimal> {
        self.mark_prices
            .get(&PositionKey::new(venue, symbol))
            .map(|p| *p.value())
    }

    /// Sum (unrealized, realized) PnL across all positions
    #[must_use]
    pub fn calculate_total_pnl(&self) -> (Decimal, Decimal) {
        self.positions.iter().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(unrealized, realized), e| {
                (unrealized + e.value().unrealized_pnl, realized + e.value().realized_pnl)
            },
        )
    }

    /// Sum (unrealized, realized) PnL for one venue
    #[must_use]
    pub fn calculate_venue_pnl(&self, venue: &str) -> (Decimal, Decimal) {
        self.positions
            .iter()
            .filter(|e| e.value().venue == venue)
            .fold((Decimal::ZERO, Decimal::ZERO), |(unrealized, realized), e| {
                (unrealized + e.value().unrealized_pnl, realized + e.value().realized_pnl)
            })
    }

    /// Aggregate store metrics
    #[must_use]
    pub fn get_risk_metrics(&self) -> StoreMetrics {
        let mut total_value = Decimal::ZERO;
        let mut total_margin_used = Decimal::ZERO;
        let mut max_leverage = 0u32;
        let mut unrealized = Decimal::ZERO;
        let mut realized = Decimal::ZERO;
        let mut count = 0usize;

        for entry in self.positions.iter() {
            let p = entry.value();
            total_value += p.position_value;
            total_margin_used += p.margin_used;
            max_leverage = max_leverage.max(p.leverage);
            unrealized += p.unrealized_pnl;
            realized += p.realized_pnl;
            count += 1;
        }

        let updates = self.update_count.load(Ordering::Relaxed);
        let nanos = self.update_nanos.load(Ordering::Relaxed);
        let avg_update_latency = if updates == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(nanos / updates)
        };

        StoreMetrics {
            position_count: count,
            total_value,
            total_margin_used,
            max_leverage,
            unrealized_pnl: unrealized,
            realized_pnl: realized,
            total_pnl: unrealized + realized,
            update_count: updates,
            read_count: self.read_count.load(Ordering::Relaxed),
            avg_update_latency,
        }
    }

    /// Serialize the full position set plus metrics to the snapshot
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file write fails; the
    /// caller logs and carries on, the next scheduled snapshot retries.
    pub fn save_snapshot(&self) -> Result<std::path::PathBuf> {
        let positions = self.get_all_positions();
        let metrics = self.get_risk_metrics();
        let doc = SnapshotDocument {
            version: snapshot::SNAPSHOT_VERSION,
            timestamp: Utc::now(),
            metrics: SnapshotMetrics {
                position_count: positions.len() as u64,
                total_value: decimal::to_f64(metrics.total_value),
                total_unrealized_pnl: decimal::to_f64(metrics.unrealized_pnl),
                total_realized_pnl: decimal::to_f64(metrics.realized_pnl),
            },
            positions,
        };
        snapshot::write_snapshot(&self.config.snapshot_dir, &doc)
    }

    /// Periodic snapshot loop. Writes on the configured interval and a
    /// final time when the shutdown signal flips; write failures are
    /// logged and never block further updates.
    pub async fn run_snapshot_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.snapshot_interval_secs);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // interval fires immediately; skip that one

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.save_snapshot() {
                        error!(error = %e, "scheduled snapshot failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        match self.save_snapshot() {
                            Ok(path) => info!(path = %path.display(), "shutdown snapshot written"),
                            Err(e) => error!(error = %e, "shutdown snapshot failed"),
                        }
                        return;
                    }
                }
            }
        }
    }
}

fn slot_record(position: &Position) -> SlotRecord {
    SlotRecord {
        symbol: position.symbol.clone(),
        venue: position.venue.clone(),
        market: position.market.as_str().to_string(),
        side: position.side.to_string(),
        quantity: decimal::to_f64(position.quantity),
        entry_price: decimal::to_f64(position.entry_price),
        mark_price: decimal::to_f64(position.mark_price),
        unrealized_pnl: decimal::to_f64(position.unrealized_pnl),
        realized_pnl: decimal::to_f64(position.realized_pnl),
        margin_used: decimal::to_f64(position.margin_used),
        leverage: position.leverage as i32,
        updated_at: position.updated_at.timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use services_common::Market;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> PositionStore {
        test_store_with_slots(dir, 16)
    }

    fn test_store_with_slots(dir: &TempDir, slots: usize) -> PositionStore {
        PositionStore::new(StoreConfig {
            snapshot_dir: dir.path().join("snapshots"),
            snapshot_interval_secs: 300,
            shm_path: dir.path().join("positions"),
            shm_slots: slots,
        })
        .unwrap()
    }

    fn btc_position(venue: &str, qty: Decimal) -> Position {
        Position::new(venue, "BTCUSDT", Market::Spot, qty, dec!(40000), dec!(42000), 1, dec!(0))
    }

    #[test]
    fn test_upsert_and_read() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.update_position(btc_position("binance", dec!(1))).unwrap();
        let p = store.get_position("binance", "BTCUSDT").unwrap();
        assert_eq!(p.quantity, dec!(1));
        assert_eq!(p.position_value, dec!(42000));

        assert!(store.get_position("okx", "BTCUSDT").is_none());
    }

    #[test]
    fn test_map_and_slot_agree() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.update_position(btc_position("binance", dec!(1.5))).unwrap();

        let p = store.get_position("binance", "BTCUSDT").unwrap();
        let shm = store.shm.lock();
        let rec = shm.read_slot(0).unwrap();
        assert_eq!(rec.symbol, "BTCUSDT");
        assert_eq!(rec.venue, "binance");
        assert_eq!(rec.quantity, decimal::to_f64(p.quantity));
        assert_eq!(rec.entry_price, decimal::to_f64(p.entry_price));
        assert_eq!(rec.mark_price, decimal::to_f64(p.mark_price));
        assert_eq!(rec.unrealized_pnl, decimal::to_f64(p.unrealized_pnl));
        assert_eq!(rec.updated_at, p.updated_at.timestamp());
    }

    #[test]
    fn test_update_is_idempotent_modulo_counters() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        let position = btc_position("binance", dec!(2));
        store.update_position(position.clone()).unwrap();
        let first = store.get_position("binance", "BTCUSDT").unwrap();

        store.update_position(position).unwrap();
        let second = store.get_position("binance", "BTCUSDT").unwrap();

        assert_eq!(first.quantity, second.quantity);
        assert_eq!(first.entry_price, second.entry_price);
        assert_eq!(first.position_value, second.position_value);
        assert_eq!(store.positions.len(), 1);
        assert_eq!(store.get_risk_metrics().update_count, 2);
    }

    #[test]
    fn test_full_region_leaves_map_untouched() {
        let dir = TempDir::new().unwrap();
        let store = test_store_with_slots(&dir, 1);

        store.update_position(btc_position("binance", dec!(1))).unwrap();
        let err = store
            .update_position(Position::new(
                "okx", "ETHUSDT", Market::Spot, dec!(1), dec!(3000), dec!(3000), 1, dec!(0),
            ))
            .unwrap_err();

        assert!(err.is_retryable());
        assert!(store.get_position("okx", "ETHUSDT").is_none());
        assert_eq!(store.get_all_positions().len(), 1);
    }

    #[test]
    fn test_mark_price_triggers_recompute() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.update_position(btc_position("binance", dec!(1))).unwrap();
        store.update_mark_price("binance", "BTCUSDT", dec!(43000)).unwrap();

        let p = store.get_position("binance", "BTCUSDT").unwrap();
        assert_eq!(p.mark_price, dec!(43000));
        assert_eq!(p.unrealized_pnl, dec!(3000));
        assert_eq!(p.position_value, dec!(43000));

        // A mark for an unseen key is cached without creating a position
        store.update_mark_price("binance", "SOLUSDT", dec!(150)).unwrap();
        assert!(store.get_position("binance", "SOLUSDT").is_none());
        assert_eq!(store.get_mark_price("binance", "SOLUSDT"), Some(dec!(150)));
    }

    #[test]
    fn test_aggregation_sums_signed_quantities() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.update_position(btc_position("binance", dec!(1))).unwrap();
        store
            .update_position(Position::new(
                "okx", "BTCUSDT", Market::Spot, dec!(0.3), dec!(41000), dec!(42000), 1, dec!(0),
            ))
            .unwrap();

        let aggregated = store.get_aggregated_positions();
        let btc = &aggregated["BTCUSDT"];
        assert_eq!(btc.total_quantity, dec!(1.3));
        assert_eq!(btc.avg_entry_price, dec!(40230.76923076));
        assert_eq!(btc.positions.len(), 2);
    }

    #[test]
    fn test_venue_pnl_split() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.update_position(btc_position("binance", dec!(1))).unwrap();
        store
            .update_position(Position::new(
                "okx", "ETHUSDT", Market::Spot, dec!(-2), dec!(3000), dec!(2900), 1, dec!(0),
            ))
            .unwrap();

        let (total_unrealized, _) = store.calculate_total_pnl();
        assert_eq!(total_unrealized, dec!(2200)); // 2000 long + 200 short

        let (okx_unrealized, _) = store.calculate_venue_pnl("okx");
        assert_eq!(okx_unrealized, dec!(200));
    }

    #[test]
    fn test_zeroed_position_is_retained() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store.update_position(btc_position("binance", dec!(1))).unwrap();
        let mut flat = btc_position("binance", dec!(0));
        flat.unrealized_pnl = Decimal::ZERO;
        store.update_position(flat).unwrap();

        let p = store.get_position("binance", "BTCUSDT").unwrap();
        assert!(p.is_flat());
        assert_eq!(p.position_value, Decimal::ZERO);
        assert_eq!(store.get_all_positions().len(), 1);
    }
}
