//! One-shot delivery watcher polling destination contract logs

use crate::chain::ledger::DeliveryFilter;
use crate::error::LedgerResult;
use crate::events::{topics, DeliveryEvent, EventParser};

use super::ChainProvider;

use ethers::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Largest block span queried per poll
const MAX_BLOCK_RANGE: u64 = 1000;

/// Watches one contract for the first `MessageReceived` accepted by a filter
pub struct DeliveryListener {
    provider: Arc<ChainProvider>,
    contract_address: Address,
    filter: DeliveryFilter,
    poll_interval: Duration,
    event_parser: EventParser,
}

impl DeliveryListener {
    pub fn new(
        provider: Arc<ChainProvider>,
        contract_address: Address,
        filter: DeliveryFilter,
        poll_interval: Duration,
    ) -> Self {
        Self {
            provider,
            contract_address,
            filter,
            poll_interval,
            event_parser: EventParser::new(contract_address),
        }
    }

    /// Poll from `from_block` until a matching event is sent or the receiver
    /// goes away
    pub async fn run(self, from_block: u64, mut sender: oneshot::Sender<DeliveryEvent>) {
        let mut next_block = from_block;

        loop {
            if sender.is_closed() {
                debug!("Delivery watcher on chain {} released", self.provider.chain_id());
                return;
            }

            match self.poll(next_block).await {
                Ok((Some(event), _)) => {
                    info!(
                        "Delivery observed on chain {} in block {}",
                        self.provider.chain_id(),
                        event.block_number
                    );
                    // Receiver may have lost the race; nothing else to do
                    let _ = sender.send(event);
                    return;
                }
                Ok((None, processed_to)) => next_block = processed_to + 1,
                Err(e) => warn!(
                    "Delivery poll failed on chain {}: {}",
                    self.provider.chain_id(),
                    e
                ),
            }

            tokio::select! {
                _ = sender.closed() => {
                    debug!("Delivery watcher on chain {} released", self.provider.chain_id());
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Scan one block range; returns the first match and the last block scanned
    async fn poll(&self, from_block: u64) -> LedgerResult<(Option<DeliveryEvent>, u64)> {
        let current_block = self.provider.get_block_number().await?;
        if current_block < from_block {
            return Ok((None, from_block.saturating_sub(1)));
        }

        let to_block = std::cmp::min(current_block, from_block + MAX_BLOCK_RANGE);

        debug!(
            "Chain {}: scanning blocks {} to {} for delivery",
            self.provider.chain_id(),
            from_block,
            to_block
        );

        let filter = Filter::new()
            .address(self.contract_address)
            .topic0(*topics::MESSAGE_RECEIVED)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.provider.get_logs(&filter).await?;
        Ok((self.first_match(&logs), to_block))
    }

    fn first_match(&self, logs: &[Log]) -> Option<DeliveryEvent> {
        logs.iter().find_map(|log| match self.event_parser.parse_delivery(log) {
            Ok(Some(event)) if self.filter.matches(&event) => Some(event),
            Ok(_) => None,
            Err(e) => {
                warn!("Skipping undecodable delivery log: {}", e);
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainConfig;
    use crate::events::message_received_log;

    fn listener(filter: DeliveryFilter) -> (DeliveryListener, Address) {
        let contract: Address = "0x1CBd3b2770909D4e10f157cABC84C7264073C9Ec".parse().unwrap();
        let config = ChainConfig {
            chain_id: 80002,
            name: "amoy".to_string(),
            rpc_urls: vec!["http://localhost:8545".to_string()],
            contract_address: format!("{:?}", contract),
            routing_code: 10109,
            poll_interval_ms: 10,
            inclusion_timeout_secs: 5,
            enabled: true,
        };
        let provider = Arc::new(ChainProvider::new(&config).unwrap());
        (
            DeliveryListener::new(provider, contract, filter, Duration::from_millis(10)),
            contract,
        )
    }

    #[test]
    fn first_match_applies_filter() {
        let (listener, contract) = listener(DeliveryFilter {
            source_routing_code: None,
            message: Some("hello".to_string()),
        });
        let logs = vec![
            message_received_log(contract, 10121, Address::zero(), "someone else"),
            message_received_log(contract, 10121, Address::zero(), "hello"),
        ];
        let event = listener.first_match(&logs).unwrap();
        assert_eq!(event.message, "hello");
    }

    #[test]
    fn first_match_skips_foreign_logs() {
        let (listener, _) = listener(DeliveryFilter::default());
        let logs = vec![message_received_log(
            Address::from_low_u64_be(1),
            10121,
            Address::zero(),
            "hello",
        )];
        assert!(listener.first_match(&logs).is_none());
    }

    #[tokio::test]
    async fn run_exits_when_receiver_is_dropped() {
        let (listener, _) = listener(DeliveryFilter::default());
        let (tx, rx) = oneshot::channel();
        drop(rx);
        // Returns without touching the network
        tokio::time::timeout(Duration::from_secs(1), listener.run(0, tx))
            .await
            .unwrap();
    }
}
