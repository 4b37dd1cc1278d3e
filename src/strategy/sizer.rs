//! Hedge-ratio position sizing.

use crate::error::PortfolioError;
use crate::signal::Signal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Splits the per-slot budget between the two legs of a pair.
///
/// With hedge relationship `a = c + m * b` and asks `pa`, `pb`, spending the
/// slot budget `B / N` on both legs gives:
///
/// ```text
/// shares_b = (B / N - c * pa) / (m * pa + pb)
/// shares_a = c + m * shares_b
/// ```
///
/// Both counts are truncated toward zero; fractional shares are not traded.
#[derive(Debug, Clone, Copy)]
pub struct PositionSizer {
    budget: Decimal,
    slot_capacity: usize,
}

impl PositionSizer {
    pub fn new(budget: Decimal, slot_capacity: usize) -> Self {
        Self {
            budget,
            slot_capacity,
        }
    }

    /// Share counts `(shares_a, shares_b)` for raw hedge parameters and asks.
    pub fn size(
        &self,
        hedge_const: Decimal,
        hedge_slope: Decimal,
        ask_a: Decimal,
        ask_b: Decimal,
    ) -> Result<(i64, i64), PortfolioError> {
        self.compute(hedge_const, hedge_slope, ask_a, ask_b)
            .map_err(|reason| PortfolioError::degenerate("hedge", reason))
    }

    /// Share counts for a signal, priced off its quote snapshot.
    pub fn size_signal(&self, signal: &Signal) -> Result<(i64, i64), PortfolioError> {
        let pair = signal.pair();
        let ask = |ticker: &str| {
            signal.snapshot_ask(ticker).ok_or_else(|| {
                PortfolioError::MalformedSignal(format!("no snapshot ask for {ticker} in {pair}"))
            })
        };
        let ask_a = ask(pair.ticker_a())?;
        let ask_b = ask(pair.ticker_b())?;
        let hedge = signal.hedge();

        self.compute(hedge.constant, hedge.slope, ask_a, ask_b)
            .map_err(|reason| PortfolioError::degenerate(pair, reason))
    }

    fn compute(
        &self,
        c: Decimal,
        m: Decimal,
        ask_a: Decimal,
        ask_b: Decimal,
    ) -> Result<(i64, i64), String> {
        if self.slot_capacity == 0 {
            return Err("slot capacity is zero".to_string());
        }
        let slot_budget = self
            .budget
            .checked_div(Decimal::from(self.slot_capacity))
            .ok_or("slot budget overflow")?;

        let denominator = m
            .checked_mul(ask_a)
            .and_then(|v| v.checked_add(ask_b))
            .ok_or("denominator overflow")?;
        if denominator.is_zero() {
            return Err(format!(
                "slope * ask_a + ask_b is zero (slope={m}, ask_a={ask_a}, ask_b={ask_b})"
            ));
        }

        let shares_b = c
            .checked_mul(ask_a)
            .and_then(|cost_a| slot_budget.checked_sub(cost_a))
            .and_then(|numerator| numerator.checked_div(denominator))
            .ok_or("shares_b overflow")?;
        let shares_a = m
            .checked_mul(shares_b)
            .and_then(|v| v.checked_add(c))
            .ok_or("shares_a overflow")?;

        let whole = |v: Decimal| v.trunc().to_i64().ok_or(format!("{v} shares out of range"));
        Ok((whole(shares_a)?, whole(shares_b)?))
    }
}
