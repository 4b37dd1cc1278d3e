//! Signals produced by pair discovery and the records derived from them.

mod input;
mod types;

pub use input::{load_batch, parse_batch, SignalInput};
pub use types::{Direction, HedgeParams, PairKey, QuoteSnapshot, Signal, SignalRecord};

#[cfg(test)]
pub(crate) use types::fixtures;
