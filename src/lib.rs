//! Cross-chain message dispatcher
//!
//! Sends a text message through a messaging contract on a source chain, waits
//! for the transaction to be included, then watches the destination chain's
//! receiver contract for the matching `MessageReceived` event until a deadline.

pub mod api;
pub mod chain;
pub mod config;
pub mod coordination;
pub mod error;
pub mod events;
pub mod metrics;

#[cfg(test)]
pub(crate) mod testing;

pub use coordination::{DispatchCoordinator, DispatchOutcome, DispatchRequest};
pub use error::{DispatchError, DispatchResult};
