//! Exact decimal arithmetic for prices, quantities and PnL
//!
//! Every monetary value in the kernel is a `rust_decimal::Decimal`.
//! Floating point is allowed only at two boundaries: the shared-memory
//! region (inherently lossy, documented as such) and display. The helpers
//! here pin down the division contract and keep the float conversions at
//! explicit call sites.

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use thiserror::Error;

/// Scale that division results are truncated to.
///
/// Division truncates toward zero at this scale so that repeated
/// divisions are deterministic across platforms.
pub const DIV_SCALE: u32 = 8;

/// Decimal domain errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecimalError {
    /// Division by zero on the order/PnL path
    #[error("division by zero")]
    DivisionByZero,

    /// Input string is not an exact decimal
    #[error("invalid decimal literal: {0}")]
    Parse(String),
}

/// Divide `num` by `den`, truncating toward zero at [`DIV_SCALE`].
///
/// A zero divisor is a domain error, never an infinity or NaN.
pub fn div(num: Decimal, den: Decimal) -> Result<Decimal, DecimalError> {
    let quotient = num.checked_div(den).ok_or(DecimalError::DivisionByZero)?;
    Ok(quotient.trunc_with_scale(DIV_SCALE))
}

/// Parse an exact decimal string, preserving scale.
pub fn parse(s: &str) -> Result<Decimal, DecimalError> {
    Decimal::from_str_exact(s).map_err(|_| DecimalError::Parse(s.to_string()))
}

/// Convert to `f64` at the shared-memory / display boundary.
///
/// Lossy for values that need more than 53 bits of mantissa; callers on
/// the order/PnL path must not round-trip through this.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

/// Convert from `f64` at the shared-memory boundary.
///
/// Non-finite inputs map to zero; the shared-memory region is a
/// projection, never the source of truth.
pub fn from_f64(value: f64) -> Decimal {
    if value.is_finite() {
        Decimal::from_f64(value).unwrap_or_default()
    } else {
        Decimal::ZERO
    }
}
