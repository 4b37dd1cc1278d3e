//! Trading strategy implementation.
//!
//! Contains the core logic for:
//! - Hedge-ratio position sizing
//! - Slot-limited admission of ranked signals
//! - Unrealized return tracking
//! - Close / replace / hold rebalancing

mod allocator;
mod pnl;
mod rebalancer;
mod sizer;

pub use allocator::{admit, AdmissionOutcome, Adjustments};
pub use pnl::{unrealized_return, PnlTracker, PriceSource};
pub use rebalancer::{
    PairDecision, RebalanceAction, RebalanceEngine, ReplacementPolicy, TickReport,
};
pub use sizer::PositionSizer;
