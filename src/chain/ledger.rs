//! Capability surface the dispatcher needs from a ledger connection

use crate::error::LedgerResult;
use crate::events::DeliveryEvent;

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Bytes, U256};
use tokio::sync::oneshot;

/// A contract call to be signed and broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct ContractCall {
    pub contract: String,
    /// Canonical function signature, e.g. `sendMessage(uint16,bytes,string)`
    pub function: String,
    pub args: Vec<Token>,
    /// Native value attached to the call, in wei
    pub value: U256,
}

/// Identifies a broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionHandle {
    pub tx_id: String,
}

/// Proof that a transaction made it into the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionReceipt {
    pub tx_id: String,
    pub block_number: u64,
    /// Protocol message id, when the source contract reports one
    pub message_id: Option<String>,
}

/// Narrows which delivery event a subscription accepts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryFilter {
    pub source_routing_code: Option<u16>,
    pub message: Option<String>,
}

impl DeliveryFilter {
    pub fn matches(&self, event: &DeliveryEvent) -> bool {
        self.source_routing_code
            .map_or(true, |code| code == event.source_routing_code)
            && self
                .message
                .as_ref()
                .map_or(true, |message| *message == event.message)
    }
}

type Release = Box<dyn FnOnce() + Send>;

/// One-shot watch for a delivery event
///
/// Yields at most one event. `cancel` releases the underlying watcher and is
/// idempotent; dropping the subscription cancels it.
pub struct Subscription {
    events: Option<oneshot::Receiver<DeliveryEvent>>,
    release: Option<Release>,
}

impl Subscription {
    pub fn new(events: oneshot::Receiver<DeliveryEvent>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            events: Some(events),
            release: Some(Box::new(release)),
        }
    }

    /// Wait for the event; `None` once cancelled or if the watcher went away
    pub async fn recv(&mut self) -> Option<DeliveryEvent> {
        let events = self.events.as_mut()?;
        let event = events.await.ok();
        self.events = None;
        event
    }

    pub fn cancel(&mut self) {
        // Dropping the receiver makes any late send fail
        self.events = None;
        if let Some(release) = self.release.take() {
            release();
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Ledger operations used by a dispatch
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Encode an address the way this ledger's contracts expect it (pure)
    fn encode_address(&self, address: &str) -> LedgerResult<Bytes>;

    /// Sign and broadcast a contract call
    async fn submit_transaction(&self, call: ContractCall) -> LedgerResult<TransactionHandle>;

    /// Wait until the transaction is included
    async fn await_inclusion(&self, handle: &TransactionHandle) -> LedgerResult<InclusionReceipt>;

    /// Watch `contract` for one delivery event accepted by `filter`
    async fn subscribe_once(
        &self,
        contract: &str,
        filter: DeliveryFilter,
    ) -> LedgerResult<Subscription>;

    /// Whether the ledger endpoint currently answers
    async fn health_check(&self) -> bool;
}
