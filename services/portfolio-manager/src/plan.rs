//! Deterministic execution plans
//!
//! Per account: close actions come first (positions not in the target
//! set), then increases/reductions for existing positions whose delta
//! exceeds the rebalance threshold, then opens for new positions.
//! Priorities are assigned in plan order so downstream executors can
//! respect it.

use crate::optimizer::{SignalDirection, TargetAllocation};
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use services_common::decimal;

/// What to do with one (account, symbol)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    /// Flatten a position that has no target
    Close,
    /// Shrink toward the target
    Reduce,
    /// Grow toward the target
    Increase,
    /// Establish a new position
    Open,
}

/// One step of an execution plan
#[derive(Debug, Clone)]
pub struct PlanStep {
    /// Execution priority, ascending within the plan
    pub priority: u32,
    /// Account the step belongs to
    pub account_id: String,
    /// Symbol to trade
    pub symbol: String,
    /// The action
    pub action: PlanAction,
    /// Unsigned notional to trade
    pub quantity: Decimal,
    /// Direction of the target (or of the position being closed)
    pub direction: SignalDirection,
}

/// A current holding, as the executor reports it
#[derive(Debug, Clone)]
pub struct CurrentHolding {
    /// Account holding the position
    pub account_id: String,
    /// Symbol held
    pub symbol: String,
    /// Unsigned notional size
    pub size: Decimal,
    /// Direction held
    pub direction: SignalDirection,
}

/// Ordered steps for the executor
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// Steps in priority order
    pub steps: Vec<PlanStep>,
}

/// Build the plan from current holdings and target allocations.
///
/// `rebalance_threshold` is a fraction of the current size: existing
/// positions whose relative delta is at or below it are left alone.
#[must_use]
pub fn build_plan(
    current: &[CurrentHolding],
    targets: &[TargetAllocation],
    rebalance_threshold: Decimal,
) -> ExecutionPlan {
    let target_index: FxHashMap<(&str, &str), &TargetAllocation> =
        targets.iter().map(|t| ((t.account_id.as_str(), t.symbol.as_str()), t)).collect();
    let current_index: FxHashMap<(&str, &str), &CurrentHolding> =
        current.iter().map(|c| ((c.account_id.as_str(), c.symbol.as_str()), c)).collect();

    let mut closes = Vec::new();
    let mut adjustments = Vec::new();
    let mut opens = Vec::new();

    // Closes: held but not targeted, or direction flipped
    for holding in current {
        let key = (holding.account_id.as_str(), holding.symbol.as_str());
        let target = target_index.get(&key);
        let needs_close =
            target.is_none_or(|t| t.direction != holding.direction);
        if needs_close && !holding.size.is_zero() {
            closes.push((holding, holding.size));
        }
    }

    // Adjustments: targeted and held in the same direction, delta past
    // the threshold
    for target in targets {
        let key = (target.account_id.as_str(), target.symbol.as_str());
        match current_index.get(&key) {
            Some(holding) if holding.direction == target.direction => {
                let delta = target.size - holding.size;
                if delta.is_zero() {
                    continue;
                }
                let relative = decimal::div(delta.abs(), holding.size.max(Decimal::ONE))
                    .unwrap_or(Decimal::ZERO);
                if relative > rebalance_threshold {
                    adjustments.push((target, delta));
                }
            }
            // Direction flips were closed above; reopen at full target
            Some(_) => opens.push((target, target.size)),
            None => opens.push((target, target.size)),
        }
    }

    // Deterministic order inside each phase
    closes.sort_by(|a, b| {
        (&a.0.account_id, &a.0.symbol).cmp(&(&b.0.account_id, &b.0.symbol))
    });
    adjustments.sort_by(|a, b| {
        (&a.0.account_id, &a.0.symbol).cmp(&(&b.0.account_id, &b.0.symbol))
    });
    opens.sort_by(|a, b| {
        (&a.0.account_id, &a.0.symbol).cmp(&(&b.0.account_id, &b.0.symbol))
    });

    let mut steps = Vec::with_capacity(closes.len() + adjustments.len() + opens.len());
    let mut priority = 0u32;

    for (holding, size) in closes {
        steps.push(PlanStep {
            priority,
            account_id: holding.account_id.clone(),
            symbol: holding.symbol.clone(),
            action: PlanAction::Close,
            quantity: size,
            direction: holding.direction,
        });
        priority += 1;
    }
    for (target, delta) in adjustments {
        steps.push(PlanStep {
            priority,
            account_id: target.account_id.clone(),
            symbol: target.symbol.clone(),
            action: if delta > Decimal::ZERO { PlanAction::Increase } else { PlanAction::Reduce },
            quantity: delta.abs(),
            direction: target.direction,
        });
        priority += 1;
    }
    for (target, size) in opens {
        if size.is_zero() {
            continue;
        }
        steps.push(PlanStep {
            priority,
            account_id: target.account_id.clone(),
            symbol: target.symbol.clone(),
            action: PlanAction::Open,
            quantity: size,
            direction: target.direction,
        });
        priority += 1;
    }

    ExecutionPlan { steps }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn holding(account: &str, symbol: &str, size: Decimal) -> CurrentHolding {
        CurrentHolding {
            account_id: account.to_string(),
            symbol: symbol.to_string(),
            size,
            direction: SignalDirection::Long,
        }
    }

    fn target(account: &str, symbol: &str, size: Decimal) -> TargetAllocation {
        TargetAllocation {
            account_id: account.to_string(),
            symbol: symbol.to_string(),
            direction: SignalDirection::Long,
            size,
            strategy: "momentum".to_string(),
        }
    }

    #[test]
    fn test_phases_in_order() {
        let current = vec![
            holding("a1", "DOGEUSDT", dec!(5000)), // not targeted -> close
            holding("a1", "BTCUSDT", dec!(10000)), // targeted larger -> increase
        ];
        let targets = vec![
            target("a1", "BTCUSDT", dec!(15000)),
            target("a1", "ETHUSDT", dec!(8000)), // new -> open
        ];

        let plan = build_plan(&current, &targets, dec!(0.05));
        let actions: Vec<_> = plan.steps.iter().map(|s| s.action).collect();
        assert_eq!(actions, vec![PlanAction::Close, PlanAction::Increase, PlanAction::Open]);

        // Priorities follow plan order
        let priorities: Vec<_> = plan.steps.iter().map(|s| s.priority).collect();
        assert_eq!(priorities, vec![0, 1, 2]);

        assert_eq!(plan.steps[1].quantity, dec!(5000));
        assert_eq!(plan.steps[2].quantity, dec!(8000));
    }

    #[rstest]
    #[case::under_threshold(dec!(0.05), 0)]
    #[case::over_threshold(dec!(0.02), 1)]
    fn test_threshold_gates_small_deltas(
        #[case] threshold: Decimal,
        #[case] expected_steps: usize,
    ) {
        let current = vec![holding("a1", "BTCUSDT", dec!(10000))];
        let targets = vec![target("a1", "BTCUSDT", dec!(10300))]; // 3% delta

        let plan = build_plan(&current, &targets, threshold);
        assert_eq!(plan.steps.len(), expected_steps);
        if let Some(step) = plan.steps.first() {
            assert_eq!(step.action, PlanAction::Increase);
            assert_eq!(step.quantity, dec!(300));
        }
    }

    #[test]
    fn test_reduce_when_target_shrinks() {
        let current = vec![holding("a1", "BTCUSDT", dec!(10000))];
        let targets = vec![target("a1", "BTCUSDT", dec!(6000))];

        let plan = build_plan(&current, &targets, dec!(0.05));
        assert_eq!(plan.steps[0].action, PlanAction::Reduce);
        assert_eq!(plan.steps[0].quantity, dec!(4000));
    }

    #[test]
    fn test_direction_flip_closes_then_opens() {
        let current = vec![holding("a1", "BTCUSDT", dec!(10000))];
        let mut flipped = target("a1", "BTCUSDT", dec!(7000));
        flipped.direction = SignalDirection::Short;

        let plan = build_plan(&current, &[flipped], dec!(0.05));
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].action, PlanAction::Close);
        assert_eq!(plan.steps[1].action, PlanAction::Open);
        assert_eq!(plan.steps[1].quantity, dec!(7000));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let current = vec![
            holding("a2", "ETHUSDT", dec!(5000)),
            holding("a1", "BTCUSDT", dec!(5000)),
        ];
        let targets = vec![
            target("a2", "SOLUSDT", dec!(2000)),
            target("a1", "AVAXUSDT", dec!(2000)),
        ];

        let first = build_plan(&current, &targets, dec!(0.05));
        let second = build_plan(&current, &targets, dec!(0.05));
        let keys =
            |p: &ExecutionPlan| p.steps.iter().map(|s| (s.account_id.clone(), s.symbol.clone(), s.action)).collect::<Vec<_>>();
        assert_eq!(keys(&first), keys(&second));
        // Sorted by account within each phase
        assert_eq!(first.steps[0].account_id, "a1");
        assert_eq!(first.steps[1].account_id, "a2");
    }
}
