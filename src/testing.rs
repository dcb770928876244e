//! In-memory ledger fakes for coordinator and API tests

use crate::chain::{
    ContractCall, DeliveryFilter, EndpointRegistration, EndpointRegistry, InclusionReceipt,
    LedgerClient, Subscription, TransactionHandle,
};
use crate::coordination::ChainId;
use crate::error::LedgerResult;
use crate::events::DeliveryEvent;

use async_trait::async_trait;
use ethers::types::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

pub const SOURCE_CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
pub const DESTINATION_CONTRACT: &str = "0x1CBd3b2770909D4e10f157cABC84C7264073C9Ec";
pub const SOURCE_ROUTING_CODE: u16 = 10121;
pub const DESTINATION_ROUTING_CODE: u16 = 10109;

#[derive(Debug, Default)]
pub struct CallCounts {
    pub submitted: AtomicUsize,
    pub included: AtomicUsize,
    pub subscribed: AtomicUsize,
    pub released: Arc<AtomicUsize>,
}

/// Ledger whose timings and delivery are fixed up front
#[derive(Debug, Default)]
pub struct ScriptedLedger {
    tx_id: String,
    inclusion_delay: Duration,
    /// Delivery fired this long after each subscription opens
    delivery: Option<(Duration, String)>,
    /// Senders of subscriptions whose delivery was not scripted or filtered out
    held: Mutex<Vec<oneshot::Sender<DeliveryEvent>>>,
    pub calls: CallCounts,
}

impl ScriptedLedger {
    pub fn new(tx_id: &str) -> Self {
        Self {
            tx_id: tx_id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_inclusion_delay(mut self, delay: Duration) -> Self {
        self.inclusion_delay = delay;
        self
    }

    pub fn delivering_after(mut self, delay: Duration, message: &str) -> Self {
        self.delivery = Some((delay, message.to_string()));
        self
    }

    /// Push a delivery into the most recent unresolved subscription;
    /// false when its receiver is already gone
    pub fn fire_held_delivery(&self, message: &str) -> bool {
        let sender = self.held.lock().ok().and_then(|mut held| held.pop());
        match sender {
            Some(sender) => sender.send(event(message)).is_ok(),
            None => false,
        }
    }
}

pub fn event(message: &str) -> DeliveryEvent {
    DeliveryEvent {
        source_routing_code: SOURCE_ROUTING_CODE,
        receiver: DESTINATION_CONTRACT.to_lowercase(),
        message: message.to_string(),
        tx_hash: "0xdef".to_string(),
        block_number: 42,
    }
}

#[async_trait]
impl LedgerClient for ScriptedLedger {
    fn encode_address(&self, address: &str) -> LedgerResult<Bytes> {
        let mut word = vec![0u8; 12];
        word.extend(address.as_bytes().iter().take(20));
        Ok(Bytes::from(word))
    }

    async fn submit_transaction(&self, _call: ContractCall) -> LedgerResult<TransactionHandle> {
        self.calls.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(TransactionHandle {
            tx_id: self.tx_id.clone(),
        })
    }

    async fn await_inclusion(&self, handle: &TransactionHandle) -> LedgerResult<InclusionReceipt> {
        self.calls.included.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.inclusion_delay).await;
        Ok(InclusionReceipt {
            tx_id: handle.tx_id.clone(),
            block_number: 7,
            message_id: None,
        })
    }

    async fn subscribe_once(
        &self,
        _contract: &str,
        filter: DeliveryFilter,
    ) -> LedgerResult<Subscription> {
        self.calls.subscribed.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = oneshot::channel();

        match &self.delivery {
            Some((delay, message)) if filter.matches(&event(message)) => {
                let (delay, event) = (*delay, event(message));
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = sender.send(event);
                });
            }
            _ => {
                if let Ok(mut held) = self.held.lock() {
                    held.push(sender);
                }
            }
        }

        let released = self.calls.released.clone();
        Ok(Subscription::new(receiver, move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Registry with chains "A" (source contract) and "B" (destination contract)
pub fn registry(
    source: Arc<dyn LedgerClient>,
    destination: Arc<dyn LedgerClient>,
) -> Arc<EndpointRegistry> {
    Arc::new(EndpointRegistry::new(vec![
        EndpointRegistration {
            chain: ChainId::from("A"),
            name: "alpha".to_string(),
            client: source,
            contract_address: SOURCE_CONTRACT.to_string(),
            routing_code: SOURCE_ROUTING_CODE,
        },
        EndpointRegistration {
            chain: ChainId::from("B"),
            name: "beta".to_string(),
            client: destination,
            contract_address: DESTINATION_CONTRACT.to_string(),
            routing_code: DESTINATION_ROUTING_CODE,
        },
    ]))
}
