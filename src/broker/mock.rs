//! In-memory broker for paper trading and tests.

use super::traits::{Broker, BrokerPosition, Quote};
use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Mock broker holding one account's positions and a quote board.
///
/// Target share counts are filled instantly at the current ask.
pub struct MockBroker {
    account: String,
    positions: Arc<RwLock<HashMap<String, BrokerPosition>>>,
    quotes: Arc<RwLock<HashMap<String, Quote>>>,
    offline: AtomicBool,
    fill_counter: AtomicU64,
}

impl MockBroker {
    /// Create an empty mock account.
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            positions: Arc::new(RwLock::new(HashMap::new())),
            quotes: Arc::new(RwLock::new(HashMap::new())),
            offline: AtomicBool::new(false),
            fill_counter: AtomicU64::new(0),
        }
    }

    /// Simulate a dropped connection. Every call fails while offline.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Set the quote for a ticker.
    pub async fn set_quote(&self, ticker: &str, ask: Decimal, bid: Decimal) {
        self.quotes
            .write()
            .await
            .insert(ticker.to_string(), Quote { ask, bid });
    }

    /// Overwrite a position directly, bypassing fills.
    pub async fn set_position(&self, ticker: &str, avg_cost: Decimal, shares: i64) {
        self.positions
            .write()
            .await
            .insert(ticker.to_string(), BrokerPosition::new(ticker, avg_cost, shares));
    }

    pub async fn clear_positions(&self) {
        self.positions.write().await.clear();
    }

    /// Number of simulated fills so far.
    pub fn fill_count(&self) -> u64 {
        self.fill_counter.load(Ordering::SeqCst)
    }

    /// Move each ticker to its target share count, filling at the ask.
    ///
    /// Returns the number of tickers whose position changed.
    pub async fn apply_adjustments(&self, targets: &HashMap<String, i64>) -> Result<usize> {
        self.ensure_online()?;

        let quotes = self.quotes.read().await;
        let mut positions = self.positions.write().await;
        let mut changed = 0;

        for (ticker, &target) in targets {
            let current = positions.get(ticker).map(|p| p.shares).unwrap_or(0);
            if current == target {
                continue;
            }

            if target == 0 {
                positions.remove(ticker);
            } else {
                let Some(quote) = quotes.get(ticker) else {
                    bail!("No quote for {ticker}, cannot fill");
                };
                let avg_cost = match positions.get(ticker) {
                    // Adding to a same-side position blends the cost basis
                    Some(pos)
                        if pos.shares.signum() == target.signum()
                            && target.abs() > pos.shares.abs() =>
                    {
                        let added = Decimal::from(target.abs() - pos.shares.abs());
                        let held = Decimal::from(pos.shares.abs());
                        (pos.avg_cost * held + quote.ask * added) / (held + added)
                    }
                    Some(pos) if pos.shares.signum() == target.signum() => pos.avg_cost,
                    _ => quote.ask,
                };
                positions.insert(ticker.clone(), BrokerPosition::new(ticker, avg_cost, target));
            }

            self.fill_counter.fetch_add(1, Ordering::SeqCst);
            changed += 1;

            debug!(%ticker, from = current, to = target, "Mock fill");
        }

        info!(changed, open = positions.len(), "Applied target positions");
        Ok(changed)
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("mock broker offline");
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn positions(&self, account: &str) -> Result<Vec<BrokerPosition>> {
        self.ensure_online()?;
        if account != self.account {
            return Ok(Vec::new());
        }

        let mut positions: Vec<BrokerPosition> =
            self.positions.read().await.values().cloned().collect();
        positions.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(positions)
    }

    async fn current_quote(&self, ticker: &str) -> Result<Quote> {
        self.ensure_online()?;
        match self.quotes.read().await.get(ticker) {
            Some(quote) => Ok(*quote),
            None => bail!("No quote available for {ticker}"),
        }
    }
}
