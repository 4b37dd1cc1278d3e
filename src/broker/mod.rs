//! Broker collaborator.
//!
//! The engine reads positions and quotes through the [`Broker`] trait; the
//! host decides which implementation to inject. [`MockBroker`] backs paper
//! trading and the test suite.

pub mod mock;
mod traits;

pub use mock::MockBroker;
pub use traits::{Broker, BrokerPosition, Quote};
