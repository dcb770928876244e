//! Per-request lifecycle state

use crate::error::{DispatchError, DispatchResult};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Idle,
    Validated,
    Submitted,
    Included,
    AwaitingDelivery,
    Delivered,
    TimedOut,
    Cancelled,
    Failed,
}

impl DispatchState {
    /// Legal successor states
    ///
    /// `AwaitingDelivery` is the only state with racing exits.
    pub fn can_transition_to(self, next: DispatchState) -> bool {
        use DispatchState::*;
        matches!(
            (self, next),
            (Idle, Validated)
                | (Idle, Failed)
                | (Validated, Submitted)
                | (Validated, Failed)
                | (Submitted, Included)
                | (Submitted, Failed)
                | (Included, AwaitingDelivery)
                | (Included, Failed)
                | (AwaitingDelivery, Delivered)
                | (AwaitingDelivery, TimedOut)
                | (AwaitingDelivery, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DispatchState::Delivered
                | DispatchState::TimedOut
                | DispatchState::Cancelled
                | DispatchState::Failed
        )
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::Idle => "idle",
            DispatchState::Validated => "validated",
            DispatchState::Submitted => "submitted",
            DispatchState::Included => "included",
            DispatchState::AwaitingDelivery => "awaiting_delivery",
            DispatchState::Delivered => "delivered",
            DispatchState::TimedOut => "timed_out",
            DispatchState::Cancelled => "cancelled",
            DispatchState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks the state of one in-flight dispatch
#[derive(Debug)]
pub struct Lifecycle {
    state: DispatchState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: DispatchState::Idle,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn advance(&mut self, next: DispatchState) -> DispatchResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(DispatchError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!("Dispatch state {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
