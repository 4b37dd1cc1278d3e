//! Portfolio state: slot capacity, budget, signal pools and per-ticker PnL.

mod pools;

pub use pools::{FollowedPool, IgnoredPool};

use crate::broker::{Broker, BrokerPosition};
use crate::config::PortfolioConfig;
use crate::error::PortfolioError;
use crate::persistence::SignalLog;
use crate::signal::{QuoteSnapshot, Signal, SignalRecord};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, warn};

/// Aggregate state for one trading account.
///
/// Invariant: `followed.len() <= slot_capacity`, so
/// `followed.ticker_count() == 2 * (slot_capacity - empty_slots())`.
#[derive(Debug, Clone)]
pub struct Portfolio {
    account: String,
    slot_capacity: usize,
    budget: Decimal,
    followed: FollowedPool,
    ignored: IgnoredPool,
    position_pnl: HashMap<String, Decimal>,
    broker_positions: HashMap<String, i64>,
}

impl Portfolio {
    /// Create an empty portfolio.
    pub fn new(
        account: impl Into<String>,
        slot_capacity: usize,
        budget: Decimal,
    ) -> Result<Self, PortfolioError> {
        if slot_capacity == 0 {
            return Err(PortfolioError::degenerate(
                "portfolio",
                "slot capacity must be at least 1",
            ));
        }
        if budget <= Decimal::ZERO {
            return Err(PortfolioError::degenerate(
                "portfolio",
                format!("budget must be positive, got {budget}"),
            ));
        }

        Ok(Self {
            account: account.into(),
            slot_capacity,
            budget,
            followed: FollowedPool::default(),
            ignored: IgnoredPool::default(),
            position_pnl: HashMap::new(),
            broker_positions: HashMap::new(),
        })
    }

    pub fn from_config(account: &str, config: &PortfolioConfig) -> Result<Self, PortfolioError> {
        Self::new(account, config.slot_capacity, config.budget)
    }

    /// Rebuild the followed pool from the signal log.
    ///
    /// Quote snapshots are not persisted, so each leg's ask is re-fetched from
    /// the broker. Stored pairs beyond the slot capacity are parked in the
    /// ignored pool.
    pub async fn restore<B: Broker + ?Sized>(
        account: &str,
        config: &PortfolioConfig,
        broker: &B,
        log: &SignalLog,
    ) -> Result<Self, PortfolioError> {
        let mut portfolio = Self::from_config(account, config)?;
        let stored = log.load_followed().map_err(PortfolioError::Persistence)?;

        for entry in stored {
            let mut quotes = QuoteSnapshot::new();
            for ticker in entry.pair.tickers() {
                let quote = broker
                    .current_quote(ticker)
                    .await
                    .map_err(PortfolioError::CollaboratorUnavailable)?;
                quotes = quotes.with_ask(ticker, quote.ask);
            }

            let signal = Signal::new(
                entry.expected_return,
                entry.direction,
                entry.pair.clone(),
                entry.hedge,
                quotes,
            )?;

            if portfolio.empty_slots() == 0 {
                warn!(pair = %entry.pair, "Stored pair exceeds slot capacity, parking as ignored");
                portfolio.ignored.insert(signal);
                continue;
            }

            let record = SignalRecord {
                signal,
                shares_a: entry.shares_a,
                shares_b: entry.shares_b,
            };
            if !portfolio.followed.insert(record) {
                warn!(pair = %entry.pair, "Stored pair shares a ticker with another, skipping");
            }
        }

        info!(
            account,
            followed = portfolio.followed.len(),
            empty_slots = portfolio.empty_slots(),
            "Restored portfolio from signal log"
        );
        Ok(portfolio)
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    pub fn budget(&self) -> Decimal {
        self.budget
    }

    pub fn occupied_slots(&self) -> usize {
        self.followed.len()
    }

    pub fn empty_slots(&self) -> usize {
        self.slot_capacity.saturating_sub(self.followed.len())
    }

    pub fn followed(&self) -> &FollowedPool {
        &self.followed
    }

    pub fn ignored(&self) -> &IgnoredPool {
        &self.ignored
    }

    /// Last computed unrealized return for a ticker.
    pub fn position_pnl(&self, ticker: &str) -> Option<Decimal> {
        self.position_pnl.get(ticker).copied()
    }

    /// Share counts from the last broker snapshot.
    pub fn broker_positions(&self) -> &HashMap<String, i64> {
        &self.broker_positions
    }

    /// Check the slot invariants.
    pub fn is_consistent(&self) -> bool {
        self.followed.len() <= self.slot_capacity
            && self.followed.ticker_count() == 2 * (self.slot_capacity - self.empty_slots())
    }

    pub(crate) fn followed_mut(&mut self) -> &mut FollowedPool {
        &mut self.followed
    }

    pub(crate) fn ignored_mut(&mut self) -> &mut IgnoredPool {
        &mut self.ignored
    }

    pub(crate) fn record_pnl(&mut self, ticker: impl Into<String>, unrealized_return: Decimal) {
        self.position_pnl.insert(ticker.into(), unrealized_return);
    }

    pub(crate) fn clear_pnl(&mut self) {
        self.position_pnl.clear();
    }

    pub(crate) fn sync_broker_positions(&mut self, positions: &[BrokerPosition]) {
        self.broker_positions = positions
            .iter()
            .map(|p| (p.ticker.clone(), p.shares))
            .collect();
    }
}
