//! Configuration management for the pair slot allocator.
//!
//! Loads settings from environment variables and config files.

use crate::strategy::PriceSource;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broker account settings
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Slot capacity, budget and replacement policy
    #[serde(default)]
    pub portfolio: PortfolioConfig,
    /// Signal log location
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Optimization tick timing
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Account whose positions are managed
    #[serde(default = "default_account")]
    pub account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    /// Maximum number of pairs held at once
    #[serde(default = "default_slot_capacity")]
    pub slot_capacity: usize,
    /// Total capital, split evenly across slots
    #[serde(default = "default_budget")]
    pub budget: Decimal,
    /// Replace a pair whose remaining potential exceeds
    /// `divergence_factor * expected_return`
    #[serde(default = "default_divergence_factor")]
    pub divergence_factor: Decimal,
    /// Reference price for unrealized returns
    #[serde(default)]
    pub price_source: PriceSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database holding the followed pool and adjustment history
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between optimization ticks
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

fn default_account() -> String {
    "paper".to_string()
}

fn default_slot_capacity() -> usize {
    10
}

fn default_budget() -> Decimal {
    Decimal::new(100_000, 0)
}

fn default_divergence_factor() -> Decimal {
    Decimal::new(15, 1) // 1.5
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/signals.db")
}

fn default_tick_interval() -> u64 {
    300
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("PSA"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.broker.account.is_empty(),
            "broker.account must not be empty"
        );

        anyhow::ensure!(
            self.portfolio.slot_capacity >= 1,
            "slot_capacity must be at least 1"
        );

        anyhow::ensure!(
            self.portfolio.budget > Decimal::ZERO,
            "budget must be positive"
        );

        anyhow::ensure!(
            self.portfolio.divergence_factor >= Decimal::ONE,
            "divergence_factor must be >= 1"
        );

        anyhow::ensure!(
            self.schedule.tick_interval_secs > 0,
            "tick_interval_secs must be positive"
        );

        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            account: default_account(),
        }
    }
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            slot_capacity: default_slot_capacity(),
            budget: default_budget(),
            divergence_factor: default_divergence_factor(),
            price_source: PriceSource::default(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.portfolio.divergence_factor, dec!(1.5));
        assert_eq!(config.portfolio.price_source, PriceSource::Snapshot);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let mut config = Config::default();
        config.portfolio.slot_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_positive_budget() {
        let mut config = Config::default();
        config.portfolio.budget = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "portfolio": { "slot_capacity": 4, "price_source": "live" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.portfolio.slot_capacity, 4);
        assert_eq!(config.portfolio.price_source, PriceSource::Live);
        assert_eq!(config.portfolio.budget, dec!(100_000));
        assert_eq!(config.broker.account, "paper");
    }
}
