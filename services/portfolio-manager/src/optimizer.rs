//! Signal-to-allocation sizing
//!
//! Converts trading signals into per-account allocations under the
//! configured method. Kelly sizing uses p = confidence, q = 1 - p,
//! b = expected return / expected risk, fraction = (p*b - q) / b clipped
//! at zero, scaled by the configured safety factor, applied to the
//! account's available capital (balance minus margin in use). Sizes are
//! bounded by min/max and rounded down to the configured increment.

use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use services_common::{OptimizerConfig, OptimizerMethod, decimal};
use thiserror::Error;
use tracing::debug;

/// Direction of a signal / target allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalDirection {
    /// Expecting the price to rise
    Long,
    /// Expecting the price to fall
    Short,
}

/// One trading signal entering the optimizer
#[derive(Debug, Clone)]
pub struct TradingSignal {
    /// Symbol the signal is about
    pub symbol: String,
    /// Expected direction
    pub direction: SignalDirection,
    /// Expected return, as a fraction
    pub expected_return: Decimal,
    /// Expected risk (loss magnitude), as a positive fraction
    pub expected_risk: Decimal,
    /// Win probability in [0, 1]
    pub confidence: Decimal,
    /// Strategy tag carried through to the allocation
    pub strategy: String,
}

/// Capital available to one account
#[derive(Debug, Clone)]
pub struct AccountCapital {
    /// Account identifier
    pub account_id: String,
    /// Account balance
    pub balance: Decimal,
    /// Margin already committed
    pub margin_used: Decimal,
}

impl AccountCapital {
    /// Balance minus margin in use, floored at zero
    #[must_use]
    pub fn available(&self) -> Decimal {
        (self.balance - self.margin_used).max(Decimal::ZERO)
    }
}

/// Target allocation produced for one (account, symbol)
#[derive(Debug, Clone)]
pub struct TargetAllocation {
    /// Account receiving the allocation
    pub account_id: String,
    /// Symbol to hold
    pub symbol: String,
    /// Direction to hold it in
    pub direction: SignalDirection,
    /// Notional size
    pub size: Decimal,
    /// Strategy tag from the signal
    pub strategy: String,
}

/// Exposure caps a finished plan must respect
#[derive(Debug, Clone)]
pub struct AllocationLimits {
    /// Cap on summed allocation per account
    pub max_account_exposure: Decimal,
    /// Cap on summed allocation per symbol across accounts
    pub max_symbol_exposure: Decimal,
    /// Cap on the whole plan
    pub max_total_exposure: Decimal,
}

/// Optimizer failures
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// A signal carries out-of-domain numbers
    #[error("invalid signal for {symbol}: {reason}")]
    InvalidSignal {
        /// Offending symbol
        symbol: String,
        /// What was out of domain
        reason: String,
    },

    /// The allocation plan breaches an exposure cap
    #[error("{scope} exposure {value} exceeds limit {limit}")]
    LimitExceeded {
        /// Which cap: "account <id>", "symbol <sym>" or "total"
        scope: String,
        /// Summed exposure
        value: Decimal,
        /// The cap
        limit: Decimal,
    },
}

/// Signal-to-allocation optimizer
pub struct PositionOptimizer {
    config: OptimizerConfig,
}

impl PositionOptimizer {
    /// Create an optimizer with the given configuration
    #[must_use]
    pub const fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Allocate `signals` across `accounts` with the configured method.
    ///
    /// Allocations below the minimum size are dropped; the rest are
    /// clamped to the maximum and rounded down to the increment.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizerError::InvalidSignal`] for out-of-domain
    /// signal numbers.
    pub fn allocate(
        &self,
        signals: &[TradingSignal],
        accounts: &[AccountCapital],
    ) -> Result<Vec<TargetAllocation>, OptimizerError> {
        for signal in signals {
            validate_signal(signal)?;
        }
        if signals.is_empty() {
            return Ok(Vec::new());
        }

        let weights = self.signal_weights(signals);
        let mut allocations = Vec::new();

        for account in accounts {
            let available = account.available();
            if available.is_zero() {
                debug!(account = %account.account_id, "no available capital, skipping");
                continue;
            }

            for (signal, weight) in signals.iter().zip(&weights) {
                let raw = available * *weight;
                let size = self.constrain(raw);
                if size.is_zero() {
                    continue;
                }
                allocations.push(TargetAllocation {
                    account_id: account.account_id.clone(),
                    symbol: signal.symbol.clone(),
                    direction: signal.direction,
                    size,
                    strategy: signal.strategy.clone(),
                });
            }
        }

        Ok(allocations)
    }

    /// Per-signal capital fractions for the configured method
    fn signal_weights(&self, signals: &[TradingSignal]) -> Vec<Decimal> {
        match self.config.method {
            OptimizerMethod::Kelly => {
                signals.iter().map(|s| self.kelly_fraction(s)).collect()
            }
            OptimizerMethod::RiskParity => {
                let inverses: Vec<Decimal> = signals
                    .iter()
                    .map(|s| decimal::div(Decimal::ONE, s.expected_risk).unwrap_or(Decimal::ZERO))
                    .collect();
                normalize(&inverses)
            }
            OptimizerMethod::MaxSharpe => {
                let sharpes: Vec<Decimal> = signals
                    .iter()
                    .map(|s| {
                        decimal::div(s.expected_return, s.expected_risk)
                            .unwrap_or(Decimal::ZERO)
                            .max(Decimal::ZERO)
                    })
                    .collect();
                normalize(&sharpes)
            }
            OptimizerMethod::EqualWeight => {
                let n = Decimal::from(signals.len());
                signals
                    .iter()
                    .map(|_| decimal::div(Decimal::ONE, n).unwrap_or(Decimal::ZERO))
                    .collect()
            }
        }
    }

    /// Kelly fraction for one signal: (p*b - q) / b, clipped at zero,
    /// scaled by the safety factor.
    #[must_use]
    pub fn kelly_fraction(&self, signal: &TradingSignal) -> Decimal {
        let b = match decimal::div(signal.expected_return, signal.expected_risk) {
            Ok(b) if !b.is_zero() => b,
            _ => return Decimal::ZERO,
        };
        let p = signal.confidence;
        let q = Decimal::ONE - p;
        let raw = decimal::div(p * b - q, b).unwrap_or(Decimal::ZERO);
        raw.max(Decimal::ZERO) * self.config.kelly_fraction
    }

    /// Clamp to the max size, round down to the increment, drop below
    /// the min size.
    fn constrain(&self, raw: Decimal) -> Decimal {
        let capped = raw.min(self.config.max_size);
        let stepped = if self.config.size_increment.is_zero() {
            capped
        } else {
            let steps = decimal::div(capped, self.config.size_increment)
                .unwrap_or(Decimal::ZERO)
                .trunc();
            steps * self.config.size_increment
        };
        if stepped < self.config.min_size { Decimal::ZERO } else { stepped }
    }

    /// Check a finished plan against per-account, per-symbol and global
    /// caps. The first breached cap names itself.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizerError::LimitExceeded`] with the scope.
    pub fn validate_allocations(
        allocations: &[TargetAllocation],
        limits: &AllocationLimits,
    ) -> Result<(), OptimizerError> {
        let mut by_account: FxHashMap<&str, Decimal> = FxHashMap::default();
        let mut by_symbol: FxHashMap<&str, Decimal> = FxHashMap::default();
        let mut total = Decimal::ZERO;

        for a in allocations {
            *by_account.entry(a.account_id.as_str()).or_default() += a.size;
            *by_symbol.entry(a.symbol.as_str()).or_default() += a.size;
            total += a.size;
        }

        for (account, value) in &by_account {
            if *value > limits.max_account_exposure {
                return Err(OptimizerError::LimitExceeded {
                    scope: format!("account {account}"),
                    value: *value,
                    limit: limits.max_account_exposure,
                });
            }
        }
        for (symbol, value) in &by_symbol {
            if *value > limits.max_symbol_exposure {
                return Err(OptimizerError::LimitExceeded {
                    scope: format!("symbol {symbol}"),
                    value: *value,
                    limit: limits.max_symbol_exposure,
                });
            }
        }
        if total > limits.max_total_exposure {
            return Err(OptimizerError::LimitExceeded {
                scope: "total".to_string(),
                value: total,
                limit: limits.max_total_exposure,
            });
        }
        Ok(())
    }
}

fn validate_signal(signal: &TradingSignal) -> Result<(), OptimizerError> {
    if signal.expected_risk <= Decimal::ZERO {
        return Err(OptimizerError::InvalidSignal {
            symbol: signal.symbol.clone(),
            reason: format!("expected risk must be positive, got {}", signal.expected_risk),
        });
    }
    if signal.confidence < Decimal::ZERO || signal.confidence > Decimal::ONE {
        return Err(OptimizerError::InvalidSignal {
            symbol: signal.symbol.clone(),
            reason: format!("confidence must be in [0, 1], got {}", signal.confidence),
        });
    }
    Ok(())
}

fn normalize(values: &[Decimal]) -> Vec<Decimal> {
    let total: Decimal = values.iter().copied().sum();
    if total.is_zero() {
        return vec![Decimal::ZERO; values.len()];
    }
    values
        .iter()
        .map(|v| decimal::div(*v, total).unwrap_or(Decimal::ZERO))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signal(symbol: &str, ret: Decimal, risk: Decimal, confidence: Decimal) -> TradingSignal {
        TradingSignal {
            symbol: symbol.to_string(),
            direction: SignalDirection::Long,
            expected_return: ret,
            expected_risk: risk,
            confidence,
            strategy: "momentum".to_string(),
        }
    }

    fn optimizer(method: OptimizerMethod) -> PositionOptimizer {
        PositionOptimizer::new(OptimizerConfig { method, ..OptimizerConfig::default() })
    }

    #[test]
    fn test_kelly_fraction_formula() {
        let opt = optimizer(OptimizerMethod::Kelly);
        // b = 0.10 / 0.05 = 2, p = 0.6, q = 0.4
        // f = (0.6*2 - 0.4) / 2 = 0.4, scaled by 0.25 = 0.1
        let f = opt.kelly_fraction(&signal("BTCUSDT", dec!(0.10), dec!(0.05), dec!(0.6)));
        assert_eq!(f, dec!(0.1));
    }

    #[test]
    fn test_kelly_negative_edge_clips_to_zero() {
        let opt = optimizer(OptimizerMethod::Kelly);
        // b = 1, p = 0.4, q = 0.6 -> raw fraction negative
        let f = opt.kelly_fraction(&signal("BTCUSDT", dec!(0.05), dec!(0.05), dec!(0.4)));
        assert_eq!(f, Decimal::ZERO);
    }

    #[test]
    fn test_kelly_allocation_applies_available_capital() {
        let opt = optimizer(OptimizerMethod::Kelly);
        let accounts = [AccountCapital {
            account_id: "a1".to_string(),
            balance: dec!(120000),
            margin_used: dec!(20000),
        }];
        let signals = [signal("BTCUSDT", dec!(0.10), dec!(0.05), dec!(0.6))];

        let allocations = opt.allocate(&signals, &accounts).unwrap();
        assert_eq!(allocations.len(), 1);
        // available 100 000 x 0.1 = 10 000, already on the increment
        assert_eq!(allocations[0].size, dec!(10000));
    }

    #[test]
    fn test_sizes_round_down_to_increment() {
        let opt = PositionOptimizer::new(OptimizerConfig {
            method: OptimizerMethod::Kelly,
            size_increment: dec!(250),
            ..OptimizerConfig::default()
        });
        let accounts = [AccountCapital {
            account_id: "a1".to_string(),
            balance: dec!(101300),
            margin_used: Decimal::ZERO,
        }];
        let signals = [signal("BTCUSDT", dec!(0.10), dec!(0.05), dec!(0.6))];

        let allocations = opt.allocate(&signals, &accounts).unwrap();
        // 10 130 rounds down to 10 000
        assert_eq!(allocations[0].size, dec!(10000));
    }

    #[test]
    fn test_small_allocations_are_dropped() {
        let opt = PositionOptimizer::new(OptimizerConfig {
            method: OptimizerMethod::Kelly,
            min_size: dec!(500),
            ..OptimizerConfig::default()
        });
        let accounts = [AccountCapital {
            account_id: "a1".to_string(),
            balance: dec!(3000),
            margin_used: Decimal::ZERO,
        }];
        let signals = [signal("BTCUSDT", dec!(0.10), dec!(0.05), dec!(0.6))];

        // 3 000 x 0.1 = 300 < 500 minimum
        let allocations = opt.allocate(&signals, &accounts).unwrap();
        assert!(allocations.is_empty());
    }

    #[test]
    fn test_risk_parity_weights_inverse_to_risk() {
        let opt = optimizer(OptimizerMethod::RiskParity);
        let accounts = [AccountCapital {
            account_id: "a1".to_string(),
            balance: dec!(30000),
            margin_used: Decimal::ZERO,
        }];
        let signals = [
            signal("BTCUSDT", dec!(0.10), dec!(0.02), dec!(0.6)),
            signal("ETHUSDT", dec!(0.10), dec!(0.04), dec!(0.6)),
        ];

        let allocations = opt.allocate(&signals, &accounts).unwrap();
        assert_eq!(allocations.len(), 2);
        // Half the risk gets twice the capital, modulo increment rounding
        assert_eq!(allocations[0].size, dec!(19900));
        assert_eq!(allocations[1].size, dec!(9900));
    }

    #[test]
    fn test_equal_weight_split() {
        let opt = optimizer(OptimizerMethod::EqualWeight);
        let accounts = [AccountCapital {
            account_id: "a1".to_string(),
            balance: dec!(30000),
            margin_used: Decimal::ZERO,
        }];
        let signals = [
            signal("BTCUSDT", dec!(0.10), dec!(0.02), dec!(0.6)),
            signal("ETHUSDT", dec!(0.05), dec!(0.04), dec!(0.5)),
            signal("SOLUSDT", dec!(0.02), dec!(0.05), dec!(0.5)),
        ];

        let allocations = opt.allocate(&signals, &accounts).unwrap();
        assert_eq!(allocations.len(), 3);
        for a in &allocations {
            assert_eq!(a.size, dec!(9900)); // 9 999.99.. rounded down to 100s
        }
    }

    #[test]
    fn test_invalid_signals_are_rejected() {
        let opt = optimizer(OptimizerMethod::Kelly);
        let accounts: [AccountCapital; 0] = [];

        let bad_risk = signal("BTCUSDT", dec!(0.10), dec!(0), dec!(0.6));
        assert!(opt.allocate(&[bad_risk], &accounts).is_err());

        let bad_confidence = signal("BTCUSDT", dec!(0.10), dec!(0.05), dec!(1.5));
        assert!(opt.allocate(&[bad_confidence], &accounts).is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // f = (p*b - q)/b <= p <= 1, so the scaled fraction can never
            // exceed the safety factor
            #[test]
            fn prop_kelly_fraction_stays_within_safety_factor(
                ret in 1i64..1000,
                risk in 1i64..1000,
                confidence in 0i64..=100,
            ) {
                let opt = optimizer(OptimizerMethod::Kelly);
                let s = signal(
                    "BTCUSDT",
                    Decimal::new(ret, 3),
                    Decimal::new(risk, 3),
                    Decimal::new(confidence, 2),
                );
                let f = opt.kelly_fraction(&s);
                prop_assert!(f >= Decimal::ZERO);
                prop_assert!(f <= dec!(0.25));
            }

            #[test]
            fn prop_allocations_respect_size_constraints(balance in 0i64..100_000_000) {
                let opt = optimizer(OptimizerMethod::EqualWeight);
                let accounts = [AccountCapital {
                    account_id: "a1".to_string(),
                    balance: Decimal::new(balance, 2),
                    margin_used: Decimal::ZERO,
                }];
                let signals = [signal("BTCUSDT", dec!(0.1), dec!(0.05), dec!(0.6))];

                let allocations = opt.allocate(&signals, &accounts).unwrap();
                for a in &allocations {
                    // Default config: min 100, max 50 000, increment 100
                    prop_assert!(a.size >= dec!(100));
                    prop_assert!(a.size <= dec!(50000));
                    prop_assert_eq!(a.size % dec!(100), Decimal::ZERO);
                }
            }
        }
    }

    #[test]
    fn test_validation_names_breached_scope() {
        let allocations = vec![
            TargetAllocation {
                account_id: "a1".to_string(),
                symbol: "BTCUSDT".to_string(),
                direction: SignalDirection::Long,
                size: dec!(60000),
                strategy: "momentum".to_string(),
            },
            TargetAllocation {
                account_id: "a2".to_string(),
                symbol: "BTCUSDT".to_string(),
                direction: SignalDirection::Long,
                size: dec!(50000),
                strategy: "momentum".to_string(),
            },
        ];

        let err = PositionOptimizer::validate_allocations(
            &allocations,
            &AllocationLimits {
                max_account_exposure: dec!(100000),
                max_symbol_exposure: dec!(100000),
                max_total_exposure: dec!(500000),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("symbol BTCUSDT"));

        assert!(
            PositionOptimizer::validate_allocations(
                &allocations,
                &AllocationLimits {
                    max_account_exposure: dec!(100000),
                    max_symbol_exposure: dec!(200000),
                    max_total_exposure: dec!(500000),
                },
            )
            .is_ok()
        );
    }
}
