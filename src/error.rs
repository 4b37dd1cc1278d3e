//! Error taxonomy for the allocation engine.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised while admitting signals or running an optimization tick.
///
/// Any error returned from an engine entry point means the tick was abandoned
/// before the portfolio was touched. The one exception is [`PortfolioError::Persistence`],
/// which is reported alongside a committed tick rather than returned.
#[derive(Debug, Error)]
pub enum PortfolioError {
    /// Broker reported a position with no usable cost basis.
    #[error("zero cost basis for {ticker}")]
    ZeroCostBasis { ticker: String },

    /// Hedge parameters and quotes produce a zero sizing denominator or an
    /// out-of-range share count.
    #[error("degenerate sizing for {pair}: {reason}")]
    DegenerateSizing { pair: String, reason: String },

    /// A signal from pair discovery failed validation.
    #[error("malformed signal: {0}")]
    MalformedSignal(String),

    /// A broker call failed; the tick should be retried on the next schedule.
    #[error("broker unavailable: {0:#}")]
    CollaboratorUnavailable(#[source] anyhow::Error),

    /// Writing or reading the followed-signal log failed.
    #[error("persistence failure: {0:#}")]
    Persistence(#[source] anyhow::Error),
}

impl PortfolioError {
    pub fn degenerate(pair: impl ToString, reason: impl Into<String>) -> Self {
        Self::DegenerateSizing {
            pair: pair.to_string(),
            reason: reason.into(),
        }
    }

    /// True for the precondition family (bad inputs rather than a failing collaborator).
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::ZeroCostBasis { .. } | Self::DegenerateSizing { .. } | Self::MalformedSignal(_)
        )
    }
}

pub(crate) fn ensure_positive(value: Decimal, what: &str) -> Result<(), PortfolioError> {
    if value <= Decimal::ZERO {
        return Err(PortfolioError::MalformedSignal(format!(
            "{what} must be positive, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_precondition_family() {
        assert!(PortfolioError::ZeroCostBasis { ticker: "KO".into() }.is_precondition());
        assert!(PortfolioError::degenerate("KO/PEP", "zero denominator").is_precondition());
        assert!(!PortfolioError::CollaboratorUnavailable(anyhow::anyhow!("down")).is_precondition());
    }

    #[test]
    fn test_ensure_positive() {
        assert!(ensure_positive(dec!(1), "ask").is_ok());
        assert!(ensure_positive(Decimal::ZERO, "ask").is_err());
    }
}
