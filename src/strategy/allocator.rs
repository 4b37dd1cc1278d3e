//! Capacity-limited admission of ranked signals.

use super::sizer::PositionSizer;
use crate::error::PortfolioError;
use crate::portfolio::Portfolio;
use crate::signal::{PairKey, Signal, SignalRecord};
use std::collections::HashMap;
use tracing::debug;

/// Target share count per ticker.
pub type Adjustments = HashMap<String, i64>;

/// Result of one admission pass.
#[derive(Debug, Default)]
pub struct AdmissionOutcome {
    /// Target shares for both legs of each admitted or refreshed pair
    pub adjustments: Adjustments,
    /// Pairs moved into the followed pool, in admission order
    pub admitted: Vec<PairKey>,
    /// Pairs routed to the ignored pool
    pub ignored: Vec<PairKey>,
    /// Followed pairs whose record was replaced by a newer signal
    pub refreshed: Vec<PairKey>,
}

/// Admits signals into the followed pool while slots remain.
///
/// Signals are ranked by descending expected return; ties keep input order.
/// A signal for a pair that is already followed replaces that pair's record
/// and is re-sized in place without taking another slot. Once capacity runs
/// out the remaining signals go to the ignored pool.
pub fn admit(
    mut signals: Vec<Signal>,
    portfolio: &mut Portfolio,
) -> Result<AdmissionOutcome, PortfolioError> {
    signals.sort_by(|a, b| b.expected_return().cmp(&a.expected_return()));

    let sizer = PositionSizer::new(portfolio.budget(), portfolio.slot_capacity());
    let mut outcome = AdmissionOutcome::default();

    for signal in signals {
        let pair = signal.pair().clone();
        let followed = portfolio.followed().contains_pair(&pair);

        if !followed {
            if portfolio.empty_slots() == 0 {
                ignore(signal, portfolio, &mut outcome);
                continue;
            }
            if let Some(holder) = portfolio.followed().conflict(&pair) {
                debug!(%pair, %holder, "Ticker already held by another pair");
                ignore(signal, portfolio, &mut outcome);
                continue;
            }
        }

        let (shares_a, shares_b) = sizer.size_signal(&signal)?;

        debug!(
            %pair,
            expected_return = %signal.expected_return(),
            shares_a,
            shares_b,
            refresh = followed,
            "Admitting signal"
        );

        outcome
            .adjustments
            .insert(pair.ticker_a().to_string(), shares_a);
        outcome
            .adjustments
            .insert(pair.ticker_b().to_string(), shares_b);

        let record = SignalRecord {
            signal,
            shares_a,
            shares_b,
        };
        portfolio.ignored_mut().remove(&pair);
        if followed {
            portfolio.followed_mut().replace(record);
            outcome.refreshed.push(pair);
        } else {
            portfolio.followed_mut().insert(record);
            outcome.admitted.push(pair);
        }
    }

    Ok(outcome)
}

fn ignore(signal: Signal, portfolio: &mut Portfolio, outcome: &mut AdmissionOutcome) {
    let pair = signal.pair().clone();
    portfolio.ignored_mut().insert(signal);
    outcome.ignored.push(pair);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::fixtures::{signal, signal_with_asks};
    use crate::signal::{Direction, HedgeParams, QuoteSnapshot};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn portfolio(slots: usize) -> Portfolio {
        Portfolio::new("DU123", slots, dec!(10_000) * Decimal::from(slots)).unwrap()
    }

    fn key(a: &str, b: &str) -> PairKey {
        PairKey::new(a, b, "USD").unwrap()
    }

    #[test]
    fn test_admits_best_signals_first() {
        let mut portfolio = portfolio(2);
        let signals = vec![
            signal("A1", "A2", dec!(0.02)),
            signal("B1", "B2", dec!(0.09)),
            signal("C1", "C2", dec!(0.05)),
        ];

        let outcome = admit(signals, &mut portfolio).unwrap();

        assert_eq!(outcome.admitted, vec![key("B1", "B2"), key("C1", "C2")]);
        assert_eq!(outcome.ignored, vec![key("A1", "A2")]);
        assert_eq!(portfolio.empty_slots(), 0);
        assert!(portfolio.ignored().contains(&key("A1", "A2")));
    }

    #[test]
    fn test_ties_keep_input_order() {
        let mut portfolio = portfolio(2);
        let signals = vec![
            signal("FIRST", "F2", dec!(0.10)),
            signal("SECOND", "S2", dec!(0.10)),
            signal("THIRD", "T2", dec!(0.05)),
        ];

        let outcome = admit(signals, &mut portfolio).unwrap();

        assert_eq!(
            outcome.admitted,
            vec![key("FIRST", "F2"), key("SECOND", "S2")]
        );
        assert_eq!(outcome.ignored, vec![key("THIRD", "T2")]);
    }

    #[test]
    fn test_sizes_both_legs() {
        let mut portfolio = portfolio(1);
        let outcome = admit(vec![signal("KO", "PEP", dec!(0.05))], &mut portfolio).unwrap();

        // 10_000 per slot, unit hedge at 100/100
        assert_eq!(outcome.adjustments["KO"], 50);
        assert_eq!(outcome.adjustments["PEP"], 50);

        let record = portfolio.followed().by_ticker("KO").unwrap();
        assert_eq!((record.shares_a, record.shares_b), (50, 50));
    }

    #[test]
    fn test_all_overflow_goes_to_ignored() {
        let mut portfolio = portfolio(1);
        let signals = vec![
            signal("A1", "A2", dec!(0.09)),
            signal("B1", "B2", dec!(0.07)),
            signal("C1", "C2", dec!(0.03)),
        ];

        let outcome = admit(signals, &mut portfolio).unwrap();

        assert_eq!(outcome.admitted.len(), 1);
        assert_eq!(outcome.ignored.len(), 2);
        assert_eq!(portfolio.ignored().len(), 2);
        assert!(outcome.adjustments.get("B1").is_none());
    }

    #[test]
    fn test_newer_signal_replaces_followed_record() {
        let mut portfolio = portfolio(2);
        admit(vec![signal("KO", "PEP", dec!(0.05))], &mut portfolio).unwrap();

        let newer = signal_with_asks("PEP", "KO", dec!(0.09), dec!(125), dec!(75));
        let outcome = admit(vec![newer], &mut portfolio).unwrap();

        assert!(outcome.admitted.is_empty());
        assert_eq!(outcome.refreshed, vec![key("KO", "PEP")]);
        // 10_000 per slot, unit hedge at 125/75 -> 50 each
        assert_eq!(outcome.adjustments["PEP"], 50);
        assert_eq!(outcome.adjustments["KO"], 50);

        let record = portfolio.followed().by_ticker("KO").unwrap();
        assert_eq!(record.signal.expected_return(), dec!(0.09));
        assert_eq!(record.pair().ticker_a(), "PEP");
        assert_eq!(portfolio.empty_slots(), 1);
        assert!(portfolio.ignored().is_empty());
        assert!(portfolio.is_consistent());
    }

    #[test]
    fn test_refresh_applies_when_slots_are_full() {
        let mut portfolio = portfolio(1);
        admit(vec![signal("KO", "PEP", dec!(0.05))], &mut portfolio).unwrap();

        let outcome = admit(
            vec![signal("XOM", "CVX", dec!(0.08)), signal("KO", "PEP", dec!(0.02))],
            &mut portfolio,
        )
        .unwrap();

        assert_eq!(outcome.ignored, vec![key("XOM", "CVX")]);
        assert_eq!(outcome.refreshed, vec![key("KO", "PEP")]);
        assert_eq!(
            portfolio.followed().by_ticker("KO").unwrap().signal.expected_return(),
            dec!(0.02)
        );
        assert_eq!(portfolio.empty_slots(), 0);
    }

    #[test]
    fn test_shared_ticker_routes_to_ignored() {
        let mut portfolio = portfolio(2);
        admit(vec![signal("KO", "PEP", dec!(0.05))], &mut portfolio).unwrap();

        let outcome = admit(vec![signal("PEP", "KDP", dec!(0.08))], &mut portfolio).unwrap();

        assert!(outcome.admitted.is_empty());
        assert_eq!(outcome.ignored, vec![key("PEP", "KDP")]);
        assert_eq!(portfolio.empty_slots(), 1);
    }

    #[test]
    fn test_admission_removes_ignored_entry() {
        let mut portfolio = portfolio(1);
        admit(
            vec![signal("A1", "A2", dec!(0.09)), signal("B1", "B2", dec!(0.05))],
            &mut portfolio,
        )
        .unwrap();
        assert!(portfolio.ignored().contains(&key("B1", "B2")));

        portfolio.followed_mut().remove(&key("A1", "A2"));
        admit(vec![signal("B1", "B2", dec!(0.05))], &mut portfolio).unwrap();

        assert!(portfolio.ignored().is_empty());
        assert!(portfolio.followed().contains_pair(&key("B1", "B2")));
    }

    #[test]
    fn test_degenerate_sizing_propagates() {
        let mut portfolio = portfolio(1);
        let bad = Signal::new(
            dec!(0.05),
            Direction::Long,
            key("X", "Y"),
            HedgeParams {
                constant: Decimal::ZERO,
                slope: dec!(-1),
                threshold: dec!(2),
            },
            QuoteSnapshot::new()
                .with_ask("X", dec!(20))
                .with_ask("Y", dec!(20)),
        )
        .unwrap();

        let err = admit(vec![bad], &mut portfolio).unwrap_err();
        assert!(matches!(err, PortfolioError::DegenerateSizing { .. }));
    }

    #[test]
    fn test_empty_batch() {
        let mut portfolio = portfolio(3);
        let outcome = admit(Vec::new(), &mut portfolio).unwrap();
        assert!(outcome.adjustments.is_empty());
        assert_eq!(portfolio.empty_slots(), 3);
    }
}
