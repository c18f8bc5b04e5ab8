//! Domain error taxonomy.
//!
//! `DomainError` is the umbrella every component-specific error converts
//! into at a service boundary. Candidate-level failures (missing price,
//! missing exchange rate) are handled by converting them into "skip this
//! candidate" inside the rebalance engine rather than surfacing as
//! `DomainError` — only context-level failures reach this type.

use rust_decimal::Decimal;
use thiserror::Error;

use super::currency::CurrencyError;
use super::locks::LockError;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient funds: need {need}, available {available}")]
    InsufficientFunds { need: Decimal, available: Decimal },

    #[error("invalid trade: {0}")]
    InvalidTrade(String),

    #[error("currency conversion error: {0}")]
    CurrencyConversion(#[from] CurrencyError),

    #[error("lock timeout: {0}")]
    LockTimeout(#[from] LockError),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("{0}")]
    Other(String),
}

impl DomainError {
    /// Short, user-visible label matching the system's "BROKER DOWN" /
    /// "REBAL FAIL" style error-display strings.
    pub fn display_label(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "VALIDATION FAIL",
            DomainError::NotFound(_) => "NOT FOUND",
            DomainError::InsufficientFunds { .. } => "INSUFFICIENT FUNDS",
            DomainError::InvalidTrade(_) => "INVALID TRADE",
            DomainError::CurrencyConversion(_) => "FX FAIL",
            DomainError::LockTimeout(_) => "LOCK TIMEOUT",
            DomainError::Broker(_) => "BROKER DOWN",
            DomainError::Other(_) => "TRADING LOOP FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_funds_formats_amounts() {
        let error = DomainError::InsufficientFunds {
            need: Decimal::new(100000, 2),
            available: Decimal::new(5000, 2),
        };
        let msg = error.to_string();
        assert!(msg.contains("1000"));
        assert!(msg.contains("50"));
    }

    #[test]
    fn display_labels_are_short() {
        assert_eq!(DomainError::Broker("x".into()).display_label(), "BROKER DOWN");
        assert_eq!(
            DomainError::InvalidTrade("x".into()).display_label(),
            "INVALID TRADE"
        );
    }
}
