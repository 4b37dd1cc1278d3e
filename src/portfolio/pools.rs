//! Followed and ignored signal pools.

use crate::signal::{PairKey, Signal, SignalRecord};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Followed {
    seq: u64,
    record: SignalRecord,
}

/// Records of the pairs currently held, one per occupied slot.
///
/// Records are keyed by pair with a secondary `ticker -> pair` index so either
/// leg resolves in O(1). A ticker belongs to at most one followed pair.
#[derive(Debug, Clone, Default)]
pub struct FollowedPool {
    records: HashMap<PairKey, Followed>,
    by_ticker: HashMap<String, PairKey>,
    next_seq: u64,
}

impl FollowedPool {
    /// Number of followed pairs (occupied slots).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of ticker keys, always twice the number of pairs.
    pub fn ticker_count(&self) -> usize {
        self.by_ticker.len()
    }

    pub fn get(&self, pair: &PairKey) -> Option<&SignalRecord> {
        self.records.get(pair).map(|f| &f.record)
    }

    pub fn by_ticker(&self, ticker: &str) -> Option<&SignalRecord> {
        self.by_ticker.get(ticker).and_then(|pair| self.get(pair))
    }

    pub fn contains_pair(&self, pair: &PairKey) -> bool {
        self.records.contains_key(pair)
    }

    pub fn holds_ticker(&self, ticker: &str) -> bool {
        self.by_ticker.contains_key(ticker)
    }

    /// The followed pair that already uses one of `pair`'s tickers, if any.
    pub fn conflict(&self, pair: &PairKey) -> Option<&PairKey> {
        pair.tickers()
            .into_iter()
            .find_map(|ticker| self.by_ticker.get(ticker))
    }

    /// Records in admission order.
    pub fn records(&self) -> Vec<&SignalRecord> {
        let mut entries: Vec<&Followed> = self.records.values().collect();
        entries.sort_by_key(|f| f.seq);
        entries.into_iter().map(|f| &f.record).collect()
    }

    /// Insert a record. Returns `false` without changes when either ticker is
    /// already followed.
    pub(crate) fn insert(&mut self, record: SignalRecord) -> bool {
        if self.conflict(record.pair()).is_some() {
            return false;
        }

        let pair = record.pair().clone();
        for ticker in pair.tickers() {
            self.by_ticker.insert(ticker.to_string(), pair.clone());
        }
        self.records.insert(
            pair,
            Followed {
                seq: self.next_seq,
                record,
            },
        );
        self.next_seq += 1;
        true
    }

    /// Swap in a newer record for an already followed pair, keeping its
    /// admission position. Returns the previous record, or `None` without
    /// changes when the pair is not followed.
    pub(crate) fn replace(&mut self, record: SignalRecord) -> Option<SignalRecord> {
        let pair = record.pair().clone();
        let (old_pair, old) = self.records.remove_entry(&pair)?;
        for ticker in old_pair.tickers() {
            self.by_ticker.remove(ticker);
        }
        for ticker in pair.tickers() {
            self.by_ticker.insert(ticker.to_string(), pair.clone());
        }
        self.records.insert(
            pair,
            Followed {
                seq: old.seq,
                record,
            },
        );
        Some(old.record)
    }

    pub(crate) fn remove(&mut self, pair: &PairKey) -> Option<SignalRecord> {
        let followed = self.records.remove(pair)?;
        for ticker in pair.tickers() {
            self.by_ticker.remove(ticker);
        }
        Some(followed.record)
    }
}

/// Signals that lost admission, waiting for capacity.
#[derive(Debug, Clone, Default)]
pub struct IgnoredPool {
    signals: HashMap<PairKey, (u64, Signal)>,
    next_seq: u64,
}

impl IgnoredPool {
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn contains(&self, pair: &PairKey) -> bool {
        self.signals.contains_key(pair)
    }

    pub fn get(&self, pair: &PairKey) -> Option<&Signal> {
        self.signals.get(pair).map(|(_, s)| s)
    }

    /// Signals by descending expected return; ties keep arrival order.
    pub fn ranked(&self) -> Vec<Signal> {
        let mut entries: Vec<&(u64, Signal)> = self.signals.values().collect();
        entries.sort_by(|(seq_a, a), (seq_b, b)| {
            b.expected_return()
                .cmp(&a.expected_return())
                .then(seq_a.cmp(seq_b))
        });
        entries.into_iter().map(|(_, s)| s.clone()).collect()
    }

    /// Insert a signal, replacing any older signal for the same pair.
    pub(crate) fn insert(&mut self, signal: Signal) {
        let pair = signal.pair().clone();
        self.signals.insert(pair, (self.next_seq, signal));
        self.next_seq += 1;
    }

    pub(crate) fn remove(&mut self, pair: &PairKey) -> Option<Signal> {
        self.signals.remove(pair).map(|(_, s)| s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::fixtures::signal;
    use rust_decimal_macros::dec;

    fn record(a: &str, b: &str) -> SignalRecord {
        SignalRecord {
            signal: signal(a, b, dec!(0.05)),
            shares_a: 10,
            shares_b: 10,
        }
    }

    #[test]
    fn test_followed_lookup_by_either_leg() {
        let mut pool = FollowedPool::default();
        assert!(pool.insert(record("KO", "PEP")));

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.ticker_count(), 2);
        let via_a = pool.by_ticker("KO").unwrap();
        let via_b = pool.by_ticker("PEP").unwrap();
        assert_eq!(via_a.pair(), via_b.pair());
    }

    #[test]
    fn test_followed_rejects_shared_ticker() {
        let mut pool = FollowedPool::default();
        assert!(pool.insert(record("KO", "PEP")));
        assert!(!pool.insert(record("PEP", "KDP")));
        assert_eq!(pool.len(), 1);
        assert!(!pool.holds_ticker("KDP"));
    }

    #[test]
    fn test_followed_remove_clears_index() {
        let mut pool = FollowedPool::default();
        pool.insert(record("KO", "PEP"));
        let key = PairKey::new("PEP", "KO", "USD").unwrap();

        assert!(pool.remove(&key).is_some());
        assert!(pool.is_empty());
        assert_eq!(pool.ticker_count(), 0);
        assert!(pool.by_ticker("KO").is_none());
        assert!(pool.remove(&key).is_none());
    }

    #[test]
    fn test_followed_records_in_admission_order() {
        let mut pool = FollowedPool::default();
        pool.insert(record("XOM", "CVX"));
        pool.insert(record("KO", "PEP"));
        pool.insert(record("V", "MA"));

        let records = pool.records();
        let order: Vec<&str> = records.iter().map(|r| r.pair().ticker_a()).collect();
        assert_eq!(order, vec!["XOM", "KO", "V"]);
    }

    #[test]
    fn test_followed_replace_keeps_admission_slot() {
        let mut pool = FollowedPool::default();
        pool.insert(record("XOM", "CVX"));
        pool.insert(record("KO", "PEP"));

        let newer = SignalRecord {
            signal: signal("PEP", "KO", dec!(0.09)),
            shares_a: 7,
            shares_b: 4,
        };
        let previous = pool.replace(newer).unwrap();
        assert_eq!(previous.signal.expected_return(), dec!(0.05));

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.ticker_count(), 4);
        let records = pool.records();
        assert_eq!(records[1].pair().ticker_a(), "PEP");
        assert_eq!(pool.by_ticker("KO").unwrap().shares_a, 7);

        assert!(pool.replace(record("V", "MA")).is_none());
        assert!(!pool.holds_ticker("V"));
    }

    #[test]
    fn test_ignored_ranking_is_stable() {
        let mut pool = IgnoredPool::default();
        pool.insert(signal("A1", "A2", dec!(0.05)));
        pool.insert(signal("B1", "B2", dec!(0.10)));
        pool.insert(signal("C1", "C2", dec!(0.10)));

        let ranked = pool.ranked();
        let order: Vec<&str> = ranked.iter().map(|s| s.pair().ticker_a()).collect();
        assert_eq!(order, vec!["B1", "C1", "A1"]);
    }

    #[test]
    fn test_ignored_newer_signal_replaces_older() {
        let mut pool = IgnoredPool::default();
        pool.insert(signal("KO", "PEP", dec!(0.03)));
        pool.insert(signal("PEP", "KO", dec!(0.07)));

        assert_eq!(pool.len(), 1);
        let key = PairKey::new("KO", "PEP", "USD").unwrap();
        assert_eq!(pool.get(&key).unwrap().expected_return(), dec!(0.07));
        assert!(pool.remove(&key).is_some());
        assert!(pool.is_empty());
    }
}
