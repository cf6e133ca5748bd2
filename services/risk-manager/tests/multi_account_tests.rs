//! Cross-account admission and aggregation tests

use position_manager::PositionStore;
use risk_manager::{AccountBalance, AccountManager, LimitViolation, MultiAccountRiskManager};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use services_common::{
    Account, EmergencyEvent, Market, OmsConfig, Order, Position, RiskAlert, Side, StoreConfig,
    events,
};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    accounts: Arc<AccountManager>,
    store: Arc<PositionStore>,
    manager: MultiAccountRiskManager,
    _alert_rx: tokio::sync::mpsc::Receiver<RiskAlert>,
    _emergency_rx: tokio::sync::mpsc::Receiver<EmergencyEvent>,
    _dir: TempDir,
}

fn fixture(config: OmsConfig) -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        PositionStore::new(StoreConfig {
            snapshot_dir: dir.path().join("snapshots"),
            snapshot_interval_secs: 300,
            shm_path: dir.path().join("positions"),
            shm_slots: 64,
        })
        .unwrap(),
    );
    let accounts = Arc::new(AccountManager::new());
    let (alerts, alert_rx) = events::bounded(config.refresh.alert_capacity);
    let (emergency, emergency_rx) = events::bounded(16);
    let manager = MultiAccountRiskManager::new(
        Arc::clone(&accounts),
        Arc::clone(&store),
        &config,
        alerts,
        emergency,
    );
    Fixture {
        accounts,
        store,
        manager,
        _alert_rx: alert_rx,
        _emergency_rx: emergency_rx,
        _dir: dir,
    }
}

fn account(id: &str, venue: &str, strategy: &str) -> Account {
    Account {
        id: id.to_string(),
        venue: venue.to_string(),
        strategy: strategy.to_string(),
        max_position_value: dec!(500000),
        max_leverage: 20,
        daily_loss_limit: dec!(10000),
        rate_limit_weight: 1200,
        active: true,
    }
}

fn add_position(f: &Fixture, venue: &str, symbol: &str, value: Decimal) {
    // quantity 1 at mark == value keeps position_value == value
    f.store
        .update_position(Position::new(
            venue,
            symbol,
            Market::Spot,
            dec!(1),
            value,
            value,
            1,
            dec!(0),
        ))
        .unwrap();
}

#[test]
fn test_concentration_rejection() {
    let mut config = OmsConfig::default();
    config.multi_account.max_concentration_ratio = dec!(0.20);
    let f = fixture(config);

    f.accounts.upsert_account(account("a1", "binance", "momentum"));
    f.accounts.update_balance("a1", AccountBalance::new(dec!(1000000), dec!(800000)));

    // 100 000 of existing exposure spread across three symbols,
    // largest 42 000
    add_position(&f, "binance", "BTCUSDT", dec!(42000));
    add_position(&f, "binance", "ETHUSDT", dec!(38000));
    add_position(&f, "binance", "SOLUSDT", dec!(20000));
    f.manager.refresh_accounts();
    f.manager.refresh_global();

    // A 60 000 BTCUSDT order makes BTC 102 000 of 160 000 = 0.6375
    let order =
        Order::limit("c1", "binance", "BTCUSDT", Side::Buy, dec!(1), dec!(60000));
    let violation = f.manager.validate_order("a1", &order).unwrap_err();
    assert!(matches!(violation, LimitViolation::Concentration { .. }));
    assert!(violation.to_string().contains("concentration"));
}

#[test]
fn test_total_exposure_sums_account_snapshots() {
    let f = fixture(OmsConfig::default());

    f.accounts.upsert_account(account("a1", "binance", "momentum"));
    f.accounts.upsert_account(account("a2", "okx", "carry"));
    f.accounts.update_balance("a1", AccountBalance::new(dec!(500000), dec!(400000)));
    f.accounts.update_balance("a2", AccountBalance::new(dec!(500000), dec!(400000)));

    add_position(&f, "binance", "BTCUSDT", dec!(42000));
    add_position(&f, "okx", "ETHUSDT", dec!(38000));

    f.manager.refresh_accounts();
    f.manager.refresh_global();

    let global = f.manager.global_risk();
    let a1 = f.manager.account_risk("a1").unwrap();
    let a2 = f.manager.account_risk("a2").unwrap();
    assert_eq!(global.total_exposure, a1.total_exposure + a2.total_exposure);
    assert_eq!(global.total_exposure, dec!(80000));
    assert_eq!(global.exposure_by_venue["binance"], dec!(42000));
    assert_eq!(global.exposure_by_strategy["carry"], dec!(38000));
    assert_eq!(global.active_accounts, 2);
    assert_eq!(global.largest_position, dec!(42000));
}

#[test]
fn test_drawdown_monotonicity() {
    let f = fixture(OmsConfig::default());
    let acct = account("a1", "binance", "momentum");
    f.accounts.upsert_account(acct.clone());

    f.accounts.update_balance("a1", AccountBalance::new(dec!(100000), dec!(100000)));
    f.manager.refresh_account(&acct);
    let first = f.manager.account_risk("a1").unwrap();
    assert_eq!(first.peak_balance, dec!(100000));
    assert_eq!(first.current_drawdown, Decimal::ZERO);

    // Equity drops: drawdown appears, peak holds
    f.accounts.update_balance("a1", AccountBalance::new(dec!(80000), dec!(80000)));
    f.manager.refresh_account(&acct);
    let second = f.manager.account_risk("a1").unwrap();
    assert_eq!(second.peak_balance, dec!(100000));
    assert_eq!(second.current_drawdown, dec!(0.2));
    assert_eq!(second.max_drawdown, dec!(0.2));

    // Equity recovers: current drawdown shrinks, max never decreases
    f.accounts.update_balance("a1", AccountBalance::new(dec!(95000), dec!(95000)));
    f.manager.refresh_account(&acct);
    let third = f.manager.account_risk("a1").unwrap();
    assert_eq!(third.peak_balance, dec!(100000));
    assert_eq!(third.current_drawdown, dec!(0.05));
    assert_eq!(third.max_drawdown, dec!(0.2));

    // New equity high: peak moves up
    f.accounts.update_balance("a1", AccountBalance::new(dec!(120000), dec!(120000)));
    f.manager.refresh_account(&acct);
    let fourth = f.manager.account_risk("a1").unwrap();
    assert_eq!(fourth.peak_balance, dec!(120000));
    assert_eq!(fourth.max_drawdown, dec!(0.2));
}

#[test]
fn test_unknown_account_is_named() {
    let f = fixture(OmsConfig::default());
    let order = Order::limit("c1", "binance", "BTCUSDT", Side::Buy, dec!(1), dec!(100));
    let violation = f.manager.validate_order("ghost", &order).unwrap_err();
    assert!(matches!(violation, LimitViolation::UnknownAccount { .. }));
}

#[test]
fn test_account_daily_loss_blocks_admission() {
    let f = fixture(OmsConfig::default());
    f.accounts.upsert_account(account("a1", "binance", "momentum"));
    f.accounts.update_balance("a1", AccountBalance::new(dec!(100000), dec!(80000)));

    f.manager.record_daily_pnl("a1", dec!(-10000));
    let order = Order::limit("c1", "binance", "BTCUSDT", Side::Buy, dec!(0.1), dec!(42000));
    let violation = f.manager.validate_order("a1", &order).unwrap_err();
    assert!(matches!(violation, LimitViolation::AccountDailyLoss { .. }));
}

#[test]
fn test_correlated_exposure_spans_symbols() {
    let mut config = OmsConfig::default();
    config.multi_account.max_correlated_exposure = dec!(100000);
    config.multi_account.max_concentration_ratio = dec!(0.90);
    let f = fixture(config);

    f.accounts.upsert_account(account("a1", "binance", "momentum"));
    f.accounts.update_balance("a1", AccountBalance::new(dec!(1000000), dec!(800000)));
    f.manager.set_correlation_group(
        "l1-majors",
        vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()],
    );

    add_position(&f, "binance", "BTCUSDT", dec!(50000));
    add_position(&f, "binance", "ETHUSDT", dec!(45000));
    f.manager.refresh_accounts();
    f.manager.refresh_global();

    let order = Order::limit("c1", "binance", "ETHUSDT", Side::Buy, dec!(2), dec!(3000));
    let violation = f.manager.validate_order("a1", &order).unwrap_err();
    assert!(matches!(violation, LimitViolation::CorrelatedExposure { .. }));

    // An uncorrelated symbol is unaffected by the group budget
    let order = Order::limit("c2", "binance", "SOLUSDT", Side::Buy, dec!(2), dec!(150));
    assert!(f.manager.validate_order("a1", &order).is_ok());
}

#[test]
fn test_emergency_stop_rejects_everything() {
    let f = fixture(OmsConfig::default());
    f.accounts.upsert_account(account("a1", "binance", "momentum"));
    f.accounts.update_balance("a1", AccountBalance::new(dec!(100000), dec!(80000)));

    let order = Order::limit("c1", "binance", "BTCUSDT", Side::Buy, dec!(0.1), dec!(42000));
    assert!(f.manager.validate_order("a1", &order).is_ok());

    f.manager.engage_emergency_stop("manual halt");
    let violation = f.manager.validate_order("a1", &order).unwrap_err();
    assert!(matches!(violation, LimitViolation::EmergencyStop { .. }));

    f.manager.release_emergency_stop();
    assert!(f.manager.validate_order("a1", &order).is_ok());
}

#[test]
fn test_venue_exposure_limit() {
    let mut config = OmsConfig::default();
    config.multi_account.max_exchange_exposure = dec!(50000);
    let f = fixture(config);

    f.accounts.upsert_account(account("a1", "binance", "momentum"));
    f.accounts.update_balance("a1", AccountBalance::new(dec!(1000000), dec!(800000)));
    add_position(&f, "binance", "BTCUSDT", dec!(45000));
    f.manager.refresh_accounts();
    f.manager.refresh_global();

    let order = Order::limit("c1", "binance", "ETHUSDT", Side::Buy, dec!(2), dec!(3500));
    let violation = f.manager.validate_order("a1", &order).unwrap_err();
    assert!(matches!(violation, LimitViolation::VenueExposure { .. }));
}
