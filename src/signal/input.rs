//! Wire format for signal batches handed over by pair discovery.

use super::types::{Direction, HedgeParams, PairKey, QuoteSnapshot, Signal};
use crate::error::PortfolioError;
use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One signal as emitted by pair discovery.
///
/// ```json
/// {
///   "expected_return": "0.06",
///   "direction": 1,
///   "tickers": ["KO", "PEP"],
///   "currency": "USD",
///   "quotes": { "KO": "61.20", "PEP": "171.05" },
///   "hedge_const": "1.5",
///   "hedge_slope": "0.35",
///   "threshold": "2.0"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalInput {
    pub expected_return: Decimal,
    /// Spread direction as a sign (+1 long, -1 short)
    pub direction: i64,
    pub tickers: [String; 2],
    pub currency: String,
    /// Ask prices at discovery time
    pub quotes: HashMap<String, Decimal>,
    pub hedge_const: Decimal,
    pub hedge_slope: Decimal,
    pub threshold: Decimal,
}

impl TryFrom<SignalInput> for Signal {
    type Error = PortfolioError;

    fn try_from(input: SignalInput) -> Result<Self, Self::Error> {
        let direction = Direction::from_sign(input.direction).ok_or_else(|| {
            PortfolioError::MalformedSignal(format!(
                "direction must be +1 or -1, got {}",
                input.direction
            ))
        })?;
        let [ticker_a, ticker_b] = input.tickers;
        let pair = PairKey::new(ticker_a, ticker_b, input.currency)?;
        let quotes = input
            .quotes
            .into_iter()
            .fold(QuoteSnapshot::new(), |snapshot, (ticker, ask)| {
                snapshot.with_ask(ticker, ask)
            });

        Signal::new(
            input.expected_return,
            direction,
            pair,
            HedgeParams {
                constant: input.hedge_const,
                slope: input.hedge_slope,
                threshold: input.threshold,
            },
            quotes,
        )
    }
}

/// Parse a JSON array of signals. A single malformed entry rejects the batch.
pub fn parse_batch(json: &str) -> Result<Vec<Signal>, PortfolioError> {
    let inputs: Vec<SignalInput> = serde_json::from_str(json)
        .map_err(|e| PortfolioError::MalformedSignal(format!("invalid signal batch: {e}")))?;

    inputs.into_iter().map(Signal::try_from).collect()
}

/// Read and parse a signal batch file.
pub fn load_batch<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<Signal>> {
    let raw = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read signal file {:?}", path.as_ref()))?;
    Ok(parse_batch(&raw)?)
}
