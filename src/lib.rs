//! # Pair Slot Allocator
//!
//! Signal lifecycle engine for a slot-constrained pair-trading portfolio.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `signal`: Pair keys, signals and JSON signal input
//! - `broker`: Broker trait and the in-memory paper broker
//! - `portfolio`: Slot capacity, followed/ignored pools and per-ticker PnL
//! - `strategy`: Position sizing, slot admission, PnL and rebalancing
//! - `persistence`: SQLite signal log and adjustment history
//! - `error`: Domain error type

pub mod broker;
pub mod config;
pub mod error;
pub mod persistence;
pub mod portfolio;
pub mod signal;
pub mod strategy;

pub use config::Config;
pub use error::PortfolioError;
