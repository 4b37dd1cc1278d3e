//! SQLite persistence for the followed-signal log.
//!
//! Persists allocation state to survive restarts:
//! - Followed signals, one row per held ticker
//! - History of emitted target positions

use crate::portfolio::FollowedPool;
use crate::signal::{Direction, HedgeParams, PairKey};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// A followed signal as read back from the log, without its quote snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSignal {
    pub pair: PairKey,
    pub expected_return: Decimal,
    pub direction: Direction,
    pub hedge: HedgeParams,
    pub shares_a: i64,
    pub shares_b: i64,
    pub saved_at: DateTime<Utc>,
}

/// Why a target position was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentReason {
    Open,
    /// A newer signal for a followed pair re-sized its legs
    Refresh,
    Close,
    Replace,
}

impl AdjustmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentReason::Open => "open",
            AdjustmentReason::Refresh => "refresh",
            AdjustmentReason::Close => "close",
            AdjustmentReason::Replace => "replace",
        }
    }
}

impl fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted target position.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentRecord {
    pub timestamp: DateTime<Utc>,
    pub ticker: String,
    pub target_shares: i64,
    pub reason: String,
}

/// SQLite-backed signal log.
pub struct SignalLog {
    conn: Connection,
}

impl SignalLog {
    /// Open the log, initializing the database if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let log = Self { conn };
        log.init_schema()?;

        info!("Signal log initialized at {:?}", db_path.as_ref());
        Ok(log)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Followed signals, keyed by each leg
            CREATE TABLE IF NOT EXISTS followed_signals (
                ticker TEXT PRIMARY KEY,
                slot INTEGER NOT NULL,
                expected_return TEXT NOT NULL,
                direction INTEGER NOT NULL,
                ticker_a TEXT NOT NULL,
                ticker_b TEXT NOT NULL,
                currency TEXT NOT NULL,
                hedge_const TEXT NOT NULL,
                hedge_slope TEXT NOT NULL,
                threshold TEXT NOT NULL,
                shares_a INTEGER NOT NULL,
                shares_b INTEGER NOT NULL,
                saved_at TEXT NOT NULL
            );

            -- Target position history
            CREATE TABLE IF NOT EXISTS adjustments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                ticker TEXT NOT NULL,
                target_shares INTEGER NOT NULL,
                reason TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_adjustments_timestamp ON adjustments(timestamp);
            CREATE INDEX IF NOT EXISTS idx_adjustments_ticker ON adjustments(ticker);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Replace the stored followed pool with the given one.
    pub fn save_followed(&self, followed: &FollowedPool) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let saved_at = Utc::now().to_rfc3339();

        tx.execute("DELETE FROM followed_signals", [])?;

        for (slot, record) in followed.records().into_iter().enumerate() {
            let signal = &record.signal;
            let pair = signal.pair();
            let hedge = signal.hedge();

            for ticker in pair.tickers() {
                tx.execute(
                    r#"
                    INSERT INTO followed_signals (ticker, slot, expected_return, direction,
                                                  ticker_a, ticker_b, currency, hedge_const,
                                                  hedge_slope, threshold, shares_a, shares_b,
                                                  saved_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                    "#,
                    params![
                        ticker,
                        slot as i64,
                        signal.expected_return().to_string(),
                        signal.direction().sign(),
                        pair.ticker_a(),
                        pair.ticker_b(),
                        pair.currency(),
                        hedge.constant.to_string(),
                        hedge.slope.to_string(),
                        hedge.threshold.to_string(),
                        record.shares_a,
                        record.shares_b,
                        saved_at,
                    ],
                )?;
            }
        }

        tx.commit()?;

        debug!(pairs = followed.len(), "Followed signals saved");
        Ok(())
    }

    /// Load the followed pool, one entry per pair in slot order.
    pub fn load_followed(&self) -> Result<Vec<StoredSignal>> {
        type Row = (
            String,
            i64,
            String,
            String,
            String,
            String,
            String,
            String,
            i64,
            i64,
            String,
            String,
        );

        let mut stmt = self.conn.prepare(
            r#"
            SELECT expected_return, direction, ticker_a, ticker_b, currency, hedge_const,
                   hedge_slope, threshold, shares_a, shares_b, saved_at, ticker
            FROM followed_signals
            ORDER BY slot, ticker
            "#,
        )?;

        let rows: Vec<Row> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                    row.get(11)?,
                ))
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut seen = HashSet::new();
        let mut stored = Vec::new();

        for (er, dir, a, b, currency, c, m, threshold, shares_a, shares_b, saved_at, ticker) in rows
        {
            let pair = PairKey::new(a, b, currency)?;
            if !pair.contains(&ticker) {
                warn!(%ticker, %pair, "Log row keyed by a ticker outside its pair, skipping");
                continue;
            }
            if !seen.insert(pair.clone()) {
                continue;
            }

            stored.push(StoredSignal {
                expected_return: parse_decimal(&er, "expected_return")?,
                direction: Direction::from_sign(dir)
                    .ok_or_else(|| anyhow!("Invalid direction {dir} for {pair}"))?,
                hedge: HedgeParams {
                    constant: parse_decimal(&c, "hedge_const")?,
                    slope: parse_decimal(&m, "hedge_slope")?,
                    threshold: parse_decimal(&threshold, "threshold")?,
                },
                pair,
                shares_a,
                shares_b,
                saved_at: parse_timestamp(&saved_at, "saved_at")?,
            });
        }

        info!(pairs = stored.len(), "Loaded followed signals from log");
        Ok(stored)
    }

    /// Append emitted target positions to the history.
    pub fn record_adjustments(&self, entries: &[(String, i64, AdjustmentReason)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        let timestamp = Utc::now().to_rfc3339();
        for (ticker, target, reason) in entries {
            tx.execute(
                r#"
                INSERT INTO adjustments (timestamp, ticker, target_shares, reason)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![timestamp, ticker, target, reason.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Most recent target positions, newest first.
    pub fn recent_adjustments(&self, limit: usize) -> Result<Vec<AdjustmentRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, ticker, target_shares, reason
            FROM adjustments
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(ts, ticker, target_shares, reason)| {
                Ok(AdjustmentRecord {
                    timestamp: parse_timestamp(&ts, "timestamp")?,
                    ticker,
                    target_shares,
                    reason,
                })
            })
            .collect()
    }

    /// Check if any followed signal is stored.
    pub fn has_state(&self) -> Result<bool> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM followed_signals", [], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Clear all data (for testing or reset).
    pub fn clear_all(&self) -> Result<()> {
        warn!("Clearing signal log");
        self.conn.execute_batch(
            r#"
            DELETE FROM followed_signals;
            DELETE FROM adjustments;
            "#,
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

fn parse_decimal(raw: &str, column: &str) -> Result<Decimal> {
    Decimal::from_str(raw).with_context(|| format!("Invalid decimal in {column}: {raw:?}"))
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in {column}: {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{QuoteSnapshot, Signal, SignalRecord};
    use rust_decimal_macros::dec;

    fn followed_pool() -> FollowedPool {
        let signal = Signal::new(
            dec!(0.065),
            Direction::Short,
            PairKey::new("KO", "PEP", "USD").unwrap(),
            HedgeParams {
                constant: dec!(1.25),
                slope: dec!(0.348),
                threshold: dec!(2.1),
            },
            QuoteSnapshot::new()
                .with_ask("KO", dec!(61.2))
                .with_ask("PEP", dec!(171.05)),
        )
        .unwrap();

        let mut pool = FollowedPool::default();
        pool.insert(SignalRecord {
            signal,
            shares_a: 31,
            shares_b: 85,
        });
        pool
    }

    #[test]
    fn test_save_and_load_followed() {
        let log = SignalLog::new(":memory:").unwrap();
        assert!(!log.has_state().unwrap());

        log.save_followed(&followed_pool()).unwrap();
        assert!(log.has_state().unwrap());

        let loaded = log.load_followed().unwrap();
        assert_eq!(loaded.len(), 1);

        let entry = &loaded[0];
        assert_eq!(entry.pair, PairKey::new("KO", "PEP", "USD").unwrap());
        assert_eq!(entry.pair.ticker_a(), "KO");
        assert_eq!(entry.expected_return, dec!(0.065));
        assert_eq!(entry.direction, Direction::Short);
        assert_eq!(entry.hedge.constant, dec!(1.25));
        assert_eq!(entry.hedge.slope, dec!(0.348));
        assert_eq!(entry.hedge.threshold, dec!(2.1));
        assert_eq!((entry.shares_a, entry.shares_b), (31, 85));
    }

    #[test]
    fn test_one_row_per_ticker() {
        let log = SignalLog::new(":memory:").unwrap();
        log.save_followed(&followed_pool()).unwrap();

        let rows: i64 = log
            .conn
            .query_row("SELECT COUNT(*) FROM followed_signals", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_save_replaces_previous_pool() {
        let log = SignalLog::new(":memory:").unwrap();
        log.save_followed(&followed_pool()).unwrap();
        log.save_followed(&FollowedPool::default()).unwrap();

        assert!(log.load_followed().unwrap().is_empty());
    }

    #[test]
    fn test_adjustment_history() {
        let log = SignalLog::new(":memory:").unwrap();
        log.record_adjustments(&[
            ("KO".to_string(), 0, AdjustmentReason::Close),
            ("PEP".to_string(), 0, AdjustmentReason::Close),
        ])
        .unwrap();
        log.record_adjustments(&[("XOM".to_string(), 40, AdjustmentReason::Open)])
            .unwrap();

        let recent = log.recent_adjustments(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].ticker, "XOM");
        assert_eq!(recent[0].reason, "open");
        assert_eq!(recent[1].target_shares, 0);
    }

    #[test]
    fn test_corrupt_saved_at_is_an_error() {
        let log = SignalLog::new(":memory:").unwrap();
        log.save_followed(&followed_pool()).unwrap();
        log.execute_raw("UPDATE followed_signals SET saved_at = 'yesterday'")
            .unwrap();

        let err = log.load_followed().unwrap_err();
        assert!(format!("{err:#}").contains("saved_at"));
    }

    #[test]
    fn test_corrupt_adjustment_timestamp_is_an_error() {
        let log = SignalLog::new(":memory:").unwrap();
        log.execute_raw(
            "INSERT INTO adjustments (timestamp, ticker, target_shares, reason) \
             VALUES ('not a time', 'KO', 10, 'open')",
        )
        .unwrap();

        let err = log.recent_adjustments(5).unwrap_err();
        assert!(format!("{err:#}").contains("timestamp"));
    }

    #[test]
    fn test_clear_all() {
        let log = SignalLog::new(":memory:").unwrap();
        log.save_followed(&followed_pool()).unwrap();
        log.clear_all().unwrap();
        assert!(!log.has_state().unwrap());
    }
}
