//! Coordination of a single cross-chain send
//!
//! A dispatch:
//! 1. Validates the route against the endpoint registry
//! 2. Submits `sendMessage` on the source chain and waits for inclusion
//! 3. Races a one-shot delivery subscription on the destination against a deadline

pub mod coordinator;
pub mod progress;
pub mod request;
pub mod state;

pub use coordinator::DispatchCoordinator;
pub use progress::{ProgressEvent, ProgressLog, ProgressSink, ProgressStage};
pub use request::{ChainId, DispatchOutcome, DispatchRequest, MessagePayload};
pub use state::{DispatchState, Lifecycle};
