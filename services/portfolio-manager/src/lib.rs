//! Portfolio Manager Service
//!
//! Translates batches of trading signals into per-account target
//! allocations under the configured sizing method, validates the result
//! against exposure limits, and emits a deterministic execution plan.

pub mod optimizer;
pub mod plan;

pub use optimizer::{
    AccountCapital, AllocationLimits, OptimizerError, PositionOptimizer, SignalDirection,
    TargetAllocation, TradingSignal,
};
pub use plan::{CurrentHolding, ExecutionPlan, PlanAction, PlanStep, build_plan};
