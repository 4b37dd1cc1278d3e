//! Pair, quote and signal types shared by the allocator and rebalancer.

use crate::error::{ensure_positive, PortfolioError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Two tickers linked by a hedge relationship, plus their quote currency.
///
/// Equality and hashing ignore leg order, so `KO/PEP` and `PEP/KO` address the
/// same pair. The construction order is still kept: leg A is the leg the
/// hedge constant applies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairKey {
    ticker_a: String,
    ticker_b: String,
    currency: String,
}

impl PairKey {
    pub fn new(
        ticker_a: impl Into<String>,
        ticker_b: impl Into<String>,
        currency: impl Into<String>,
    ) -> Result<Self, PortfolioError> {
        let ticker_a = ticker_a.into();
        let ticker_b = ticker_b.into();
        if ticker_a.is_empty() || ticker_b.is_empty() {
            return Err(PortfolioError::MalformedSignal(
                "pair tickers must not be empty".to_string(),
            ));
        }
        if ticker_a == ticker_b {
            return Err(PortfolioError::MalformedSignal(format!(
                "pair legs must differ, got {ticker_a} twice"
            )));
        }
        Ok(Self {
            ticker_a,
            ticker_b,
            currency: currency.into(),
        })
    }

    pub fn ticker_a(&self) -> &str {
        &self.ticker_a
    }

    pub fn ticker_b(&self) -> &str {
        &self.ticker_b
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn tickers(&self) -> [&str; 2] {
        [&self.ticker_a, &self.ticker_b]
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.ticker_a == ticker || self.ticker_b == ticker
    }

    fn canonical(&self) -> (&str, &str) {
        if self.ticker_a <= self.ticker_b {
            (&self.ticker_a, &self.ticker_b)
        } else {
            (&self.ticker_b, &self.ticker_a)
        }
    }
}

impl PartialEq for PairKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical() && self.currency == other.currency
    }
}

impl Eq for PairKey {}

impl Hash for PairKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
        self.currency.hash(state);
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.ticker_a, self.ticker_b, self.currency)
    }
}

/// Ask prices captured when a signal was produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteSnapshot {
    asks: HashMap<String, Decimal>,
}

impl QuoteSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an ask price.
    pub fn with_ask(mut self, ticker: impl Into<String>, ask: Decimal) -> Self {
        self.asks.insert(ticker.into(), ask);
        self
    }

    pub fn ask(&self, ticker: &str) -> Option<Decimal> {
        self.asks.get(ticker).copied()
    }
}

/// Side of the spread trade implied by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn from_sign(sign: i64) -> Option<Self> {
        match sign.signum() {
            1 => Some(Direction::Long),
            -1 => Some(Direction::Short),
            _ => None,
        }
    }

    pub fn sign(&self) -> i64 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
        }
    }
}

/// Linear hedge relationship `a = constant + slope * b` and the entry threshold
/// pair discovery used to emit the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HedgeParams {
    pub constant: Decimal,
    pub slope: Decimal,
    pub threshold: Decimal,
}

/// A proposed or active pair trade.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    expected_return: Decimal,
    direction: Direction,
    pair: PairKey,
    hedge: HedgeParams,
    quotes: QuoteSnapshot,
}

impl Signal {
    /// Build a signal, checking that the snapshot prices both legs.
    pub fn new(
        expected_return: Decimal,
        direction: Direction,
        pair: PairKey,
        hedge: HedgeParams,
        quotes: QuoteSnapshot,
    ) -> Result<Self, PortfolioError> {
        for ticker in pair.tickers() {
            let ask = quotes.ask(ticker).ok_or_else(|| {
                PortfolioError::MalformedSignal(format!("no quote for {ticker} in {pair}"))
            })?;
            ensure_positive(ask, &format!("ask of {ticker}"))?;
        }

        Ok(Self {
            expected_return,
            direction,
            pair,
            hedge,
            quotes,
        })
    }

    pub fn expected_return(&self) -> Decimal {
        self.expected_return
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn pair(&self) -> &PairKey {
        &self.pair
    }

    pub fn hedge(&self) -> &HedgeParams {
        &self.hedge
    }

    /// Snapshot ask for one leg. Both legs are guaranteed present.
    pub fn snapshot_ask(&self, ticker: &str) -> Option<Decimal> {
        self.quotes.ask(ticker)
    }
}

/// A followed signal and the share counts derived for each leg.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalRecord {
    pub signal: Signal,
    pub shares_a: i64,
    pub shares_b: i64,
}

impl SignalRecord {
    pub fn pair(&self) -> &PairKey {
        self.signal.pair()
    }

    pub fn shares_for(&self, ticker: &str) -> Option<i64> {
        let pair = self.signal.pair();
        if pair.ticker_a() == ticker {
            Some(self.shares_a)
        } else if pair.ticker_b() == ticker {
            Some(self.shares_b)
        } else {
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use rust_decimal_macros::dec;

    /// Signal with unit hedge (`a = b`) and both legs quoted at 100.
    pub fn signal(a: &str, b: &str, expected_return: Decimal) -> Signal {
        signal_with_asks(a, b, expected_return, dec!(100), dec!(100))
    }

    pub fn signal_with_asks(
        a: &str,
        b: &str,
        expected_return: Decimal,
        ask_a: Decimal,
        ask_b: Decimal,
    ) -> Signal {
        Signal::new(
            expected_return,
            Direction::Long,
            PairKey::new(a, b, "USD").unwrap(),
            HedgeParams {
                constant: Decimal::ZERO,
                slope: Decimal::ONE,
                threshold: dec!(2),
            },
            QuoteSnapshot::new().with_ask(a, ask_a).with_ask(b, ask_b),
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    #[test]
    fn test_pair_key_is_unordered() {
        let ab = PairKey::new("KO", "PEP", "USD").unwrap();
        let ba = PairKey::new("PEP", "KO", "USD").unwrap();
        assert_eq!(ab, ba);

        let mut set = HashSet::new();
        set.insert(ab.clone());
        assert!(set.contains(&ba));

        // Leg order survives for sizing
        assert_eq!(ba.ticker_a(), "PEP");
        assert_ne!(ab, PairKey::new("KO", "PEP", "EUR").unwrap());
    }

    #[test]
    fn test_pair_key_rejects_degenerate_legs() {
        assert!(PairKey::new("KO", "KO", "USD").is_err());
        assert!(PairKey::new("", "PEP", "USD").is_err());
    }

    #[test]
    fn test_signal_requires_quotes_for_both_legs() {
        let pair = PairKey::new("KO", "PEP", "USD").unwrap();
        let hedge = HedgeParams {
            constant: dec!(1),
            slope: dec!(0.8),
            threshold: dec!(2),
        };

        let missing = Signal::new(
            dec!(0.05),
            Direction::Long,
            pair.clone(),
            hedge,
            QuoteSnapshot::new().with_ask("KO", dec!(60)),
        );
        assert!(matches!(missing, Err(PortfolioError::MalformedSignal(_))));

        let zero_ask = Signal::new(
            dec!(0.05),
            Direction::Long,
            pair.clone(),
            hedge,
            QuoteSnapshot::new()
                .with_ask("KO", dec!(60))
                .with_ask("PEP", Decimal::ZERO),
        );
        assert!(zero_ask.is_err());

        let ok = Signal::new(
            dec!(0.05),
            Direction::Short,
            pair,
            hedge,
            QuoteSnapshot::new()
                .with_ask("KO", dec!(60))
                .with_ask("PEP", dec!(170)),
        )
        .unwrap();
        assert_eq!(ok.snapshot_ask("PEP"), Some(dec!(170)));
    }

    #[test]
    fn test_direction_sign() {
        assert_eq!(Direction::from_sign(1), Some(Direction::Long));
        assert_eq!(Direction::from_sign(-3), Some(Direction::Short));
        assert_eq!(Direction::from_sign(0), None);
        assert_eq!(Direction::Short.sign(), -1);
    }

    #[test]
    fn test_record_shares_for_leg() {
        let record = SignalRecord {
            signal: fixtures::signal("KO", "PEP", dec!(0.05)),
            shares_a: 10,
            shares_b: 7,
        };
        assert_eq!(record.shares_for("KO"), Some(10));
        assert_eq!(record.shares_for("PEP"), Some(7));
        assert_eq!(record.shares_for("MSFT"), None);
    }
}
