//! Unrealized return per ticker.

use crate::broker::{Broker, BrokerPosition};
use crate::error::PortfolioError;
use crate::portfolio::Portfolio;
use crate::signal::SignalRecord;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Where the reference price for PnL comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    /// Ask captured in the signal's quote snapshot at admission. Goes stale
    /// as the market moves.
    #[default]
    Snapshot,
    /// Current ask from the broker.
    Live,
}

impl PriceSource {
    pub async fn reference_price<B: Broker + ?Sized>(
        &self,
        broker: &B,
        record: &SignalRecord,
        ticker: &str,
    ) -> Result<Decimal, PortfolioError> {
        match self {
            PriceSource::Snapshot => record.signal.snapshot_ask(ticker).ok_or_else(|| {
                PortfolioError::MalformedSignal(format!(
                    "no snapshot ask for {ticker} in {}",
                    record.pair()
                ))
            }),
            PriceSource::Live => broker
                .current_quote(ticker)
                .await
                .map(|quote| quote.ask)
                .map_err(PortfolioError::CollaboratorUnavailable),
        }
    }
}

/// `(reference_price - avg_cost) / avg_cost`.
pub fn unrealized_return(
    ticker: &str,
    avg_cost: Decimal,
    reference_price: Decimal,
) -> Result<Decimal, PortfolioError> {
    if avg_cost.is_zero() {
        return Err(PortfolioError::ZeroCostBasis {
            ticker: ticker.to_string(),
        });
    }
    (reference_price - avg_cost)
        .checked_div(avg_cost)
        .ok_or_else(|| PortfolioError::ZeroCostBasis {
            ticker: ticker.to_string(),
        })
}

/// Computes per-ticker unrealized returns for followed positions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PnlTracker {
    source: PriceSource,
}

impl PnlTracker {
    pub fn new(source: PriceSource) -> Self {
        Self { source }
    }

    /// Compute and store the return of one ticker.
    pub fn update(
        portfolio: &mut Portfolio,
        ticker: &str,
        avg_cost: Decimal,
        reference_price: Decimal,
    ) -> Result<Decimal, PortfolioError> {
        let ret = unrealized_return(ticker, avg_cost, reference_price)?;
        portfolio.record_pnl(ticker, ret);
        Ok(ret)
    }

    /// Update the return of every broker position that belongs to a followed
    /// pair. Returns the stored values.
    ///
    /// Stops at the first failure; callers run this on a draft so nothing
    /// partial reaches the live portfolio.
    pub async fn evaluate<B: Broker + ?Sized>(
        &self,
        broker: &B,
        portfolio: &mut Portfolio,
        positions: &[BrokerPosition],
    ) -> Result<HashMap<String, Decimal>, PortfolioError> {
        let mut returns = HashMap::with_capacity(positions.len());

        for position in positions {
            let Some(record) = portfolio.followed().by_ticker(&position.ticker) else {
                warn!(ticker = %position.ticker, "Broker position not tracked by any followed pair");
                continue;
            };

            let reference = self
                .source
                .reference_price(broker, record, &position.ticker)
                .await?;
            let ret = Self::update(portfolio, &position.ticker, position.avg_cost, reference)?;

            debug!(
                ticker = %position.ticker,
                avg_cost = %position.avg_cost,
                %reference,
                unrealized_return = %ret,
                "Position PnL"
            );
            returns.insert(position.ticker.clone(), ret);
        }

        Ok(returns)
    }
}
