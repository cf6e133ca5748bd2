//! Error taxonomy shared across the kernel

use thiserror::Error;

/// Kernel error categories.
///
/// Admission failures are not represented here: a rejected order is a
/// successful check that returned a negative result, and is carried as a
/// value by the risk engine and multi-account aggregator.
#[derive(Debug, Error)]
pub enum OmsError {
    /// Missing or malformed inputs, rejected before any risk math runs
    #[error("validation failed: {message}")]
    Validation {
        /// What was malformed
        message: String,
    },

    /// Unknown venue, account or absent position
    #[error("{what} not found")]
    NotFound {
        /// The entity that could not be resolved
        what: String,
    },

    /// A fixed resource is exhausted; retryable after backoff
    #[error("capacity exhausted: {details}")]
    Capacity {
        /// Which capacity limit was hit
        details: String,
    },

    /// Exchange adapter failure surfaced to the caller
    #[error("venue {venue} error: {message}")]
    External {
        /// Venue that produced the failure
        venue: String,
        /// Venue-side detail
        message: String,
        /// Whether the caller may retry after backoff
        retryable: bool,
    },

    /// Should-not-happen conditions; logged and metered, generic outward
    #[error("internal error: {message}")]
    Internal {
        /// Internal detail, not exposed to clients
        message: String,
    },
}

impl OmsError {
    /// Whether the caller may retry after backoff
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Capacity { .. } | Self::External { retryable: true, .. }
        )
    }

    /// Shorthand for a validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Shorthand for a missing entity
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

/// Result alias used across the kernel
pub type OmsResult<T> = Result<T, OmsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(OmsError::Capacity { details: "no free slot".into() }.is_retryable());
        assert!(
            OmsError::External {
                venue: "binance".into(),
                message: "timeout".into(),
                retryable: true,
            }
            .is_retryable()
        );
        assert!(!OmsError::validation("empty symbol").is_retryable());
        assert!(!OmsError::not_found("position binance:BTCUSDT").is_retryable());
    }
}
