//! Broker-agnostic interface consumed by the portfolio engine.
//!
//! The engine only needs two read paths from the broker:
//! - Open positions with their average cost
//! - Current top-of-book quotes for a ticker
//!
//! Order submission stays with the host; the engine emits target share counts.

use async_trait::async_trait;
use rust_decimal::Decimal;

/// A position as reported by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerPosition {
    pub ticker: String,
    /// Average fill price of the open shares
    pub avg_cost: Decimal,
    /// Signed share count
    pub shares: i64,
}

impl BrokerPosition {
    pub fn new(ticker: impl Into<String>, avg_cost: Decimal, shares: i64) -> Self {
        Self {
            ticker: ticker.into(),
            avg_cost,
            shares,
        }
    }
}

/// Best bid/ask for a ticker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub ask: Decimal,
    pub bid: Decimal,
}

/// Read access to a brokerage account.
///
/// Implementations are expected to return an empty vector, not an error,
/// when the account has no open positions.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Fetch all open positions for an account.
    async fn positions(&self, account: &str) -> anyhow::Result<Vec<BrokerPosition>>;

    /// Fetch the current quote for a ticker.
    async fn current_quote(&self, ticker: &str) -> anyhow::Result<Quote>;
}

#[async_trait]
impl<B: Broker + ?Sized> Broker for std::sync::Arc<B> {
    async fn positions(&self, account: &str) -> anyhow::Result<Vec<BrokerPosition>> {
        (**self).positions(account).await
    }

    async fn current_quote(&self, ticker: &str) -> anyhow::Result<Quote> {
        (**self).current_quote(ticker).await
    }
}
