//! Dispatch coordinator: send on the source chain, watch for delivery on the
//! destination chain

use super::progress::{ProgressEvent, ProgressSink, ProgressStage};
use super::request::{DispatchOutcome, DispatchRequest};
use super::state::{DispatchState, Lifecycle};
use crate::chain::{ContractCall, DeliveryFilter, EndpointRegistration, EndpointRegistry};
use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::events::{DeliveryEvent, SEND_MESSAGE};

use ethers::abi::Token;
use ethers::types::U256;
use std::future::{pending, Future};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Source and destination endpoints of a validated request
struct Route<'a> {
    source: &'a EndpointRegistration,
    destination: &'a EndpointRegistration,
}

/// How the delivery race ended
enum Resolution {
    Delivered(DeliveryEvent),
    TimedOut,
    Unobservable(String),
    Cancelled,
}

/// Runs cross-chain sends against a shared endpoint registry
pub struct DispatchCoordinator {
    registry: Arc<EndpointRegistry>,
    /// Value attached to every send, in wei
    attached_value: U256,
    delivery_timeout: Duration,
    match_source_chain: bool,
    match_payload: bool,
}

impl DispatchCoordinator {
    pub fn new(registry: Arc<EndpointRegistry>, attached_value: U256) -> Self {
        Self {
            registry,
            attached_value,
            delivery_timeout: Duration::from_secs(20),
            match_source_chain: false,
            match_payload: true,
        }
    }

    pub fn from_config(
        registry: Arc<EndpointRegistry>,
        config: &DispatchConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self::new(registry, config.attached_value()?)
            .with_delivery_timeout(config.delivery_timeout())
            .with_correlation(config.match_source_chain, config.match_payload))
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Choose which fields of a delivery event must match the request
    pub fn with_correlation(mut self, match_source_chain: bool, match_payload: bool) -> Self {
        self.match_source_chain = match_source_chain;
        self.match_payload = match_payload;
        self
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    /// Run one request to completion
    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
        sink: &dyn ProgressSink,
    ) -> DispatchResult<DispatchOutcome> {
        self.dispatch_until(request, sink, pending()).await
    }

    /// Run one request, abandoning the delivery wait when `cancel` resolves
    pub async fn dispatch_until<C>(
        &self,
        request: &DispatchRequest,
        sink: &dyn ProgressSink,
        cancel: C,
    ) -> DispatchResult<DispatchOutcome>
    where
        C: Future<Output = ()>,
    {
        let span = info_span!(
            "dispatch",
            request_id = %request.id(),
            source = %request.source(),
            destination = %request.destination(),
            payload_bytes = request.payload().byte_len(),
        );

        async {
            let mut lifecycle = Lifecycle::new();
            let result = self.run(request, sink, cancel, &mut lifecycle).await;

            if let Err(e) = &result {
                error!("Dispatch failed: {}", e);
                if !lifecycle.state().is_terminal() {
                    lifecycle.advance(DispatchState::Failed)?;
                }
                crate::metrics::record_dispatch_failure(request.source(), e.kind());
                emit(sink, ProgressStage::Failed { reason: e.to_string() });
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn run<C>(
        &self,
        request: &DispatchRequest,
        sink: &dyn ProgressSink,
        cancel: C,
        lifecycle: &mut Lifecycle,
    ) -> DispatchResult<DispatchOutcome>
    where
        C: Future<Output = ()>,
    {
        let route = self.resolve_route(request)?;
        lifecycle.advance(DispatchState::Validated)?;
        crate::metrics::record_dispatch_started(request.source(), request.destination());

        let tx_id = self.submit_and_confirm(&route, request, sink, lifecycle).await?;
        self.await_delivery(&route, request, tx_id, sink, cancel, lifecycle)
            .await
    }

    /// Pre-flight checks; touches nothing but the registry
    fn resolve_route(&self, request: &DispatchRequest) -> DispatchResult<Route<'_>> {
        let source = self
            .registry
            .resolve(request.source())
            .ok_or_else(|| DispatchError::UnknownChain {
                chain: request.source().clone(),
            })?;
        let destination = self
            .registry
            .resolve(request.destination())
            .ok_or_else(|| DispatchError::UnknownChain {
                chain: request.destination().clone(),
            })?;

        if request.source() == request.destination() {
            return Err(DispatchError::InvalidRoute {
                chain: request.source().clone(),
            });
        }

        Ok(Route {
            source,
            destination,
        })
    }

    /// Submit `sendMessage` on the source chain and wait for its inclusion
    async fn submit_and_confirm(
        &self,
        route: &Route<'_>,
        request: &DispatchRequest,
        sink: &dyn ProgressSink,
        lifecycle: &mut Lifecycle,
    ) -> DispatchResult<String> {
        // The source endpoint's client holds the signer for that chain
        let signer = &route.source.client;

        let destination_address = signer
            .encode_address(&route.destination.contract_address)
            .map_err(|source| DispatchError::InvalidAddress {
                chain: route.destination.chain.clone(),
                source,
            })?;

        emit(
            sink,
            ProgressStage::Submitting {
                source: route.source.name.clone(),
            },
        );

        let call = ContractCall {
            contract: route.source.contract_address.clone(),
            function: SEND_MESSAGE.to_string(),
            args: vec![
                Token::Uint(U256::from(route.destination.routing_code)),
                Token::Bytes(destination_address.to_vec()),
                Token::String(request.payload().as_str().to_string()),
            ],
            value: self.attached_value,
        };

        let submitted_at = Instant::now();
        let handle = signer
            .submit_transaction(call)
            .await
            .map_err(|source| DispatchError::SubmissionFailed {
                chain: route.source.chain.clone(),
                source,
            })?;

        lifecycle.advance(DispatchState::Submitted)?;
        emit(
            sink,
            ProgressStage::Submitted {
                tx_id: handle.tx_id.clone(),
            },
        );

        let receipt = signer.await_inclusion(&handle).await.map_err(|source| {
            DispatchError::InclusionFailed {
                chain: route.source.chain.clone(),
                tx_id: handle.tx_id.clone(),
                source,
            }
        })?;

        lifecycle.advance(DispatchState::Included)?;
        crate::metrics::record_inclusion_latency(
            &route.source.chain,
            submitted_at.elapsed().as_secs_f64(),
        );
        emit(
            sink,
            ProgressStage::Included {
                block_number: receipt.block_number,
                message_id: receipt.message_id,
            },
        );

        Ok(handle.tx_id)
    }

    fn delivery_filter(&self, route: &Route<'_>, request: &DispatchRequest) -> DeliveryFilter {
        DeliveryFilter {
            source_routing_code: self
                .match_source_chain
                .then_some(route.source.routing_code),
            message: self
                .match_payload
                .then(|| request.payload().as_str().to_string()),
        }
    }

    /// Race the destination subscription against the delivery deadline
    ///
    /// Exactly one branch resolves the outcome; the subscription is released
    /// on every exit, including when this future is dropped.
    async fn await_delivery<C>(
        &self,
        route: &Route<'_>,
        request: &DispatchRequest,
        tx_id: String,
        sink: &dyn ProgressSink,
        cancel: C,
        lifecycle: &mut Lifecycle,
    ) -> DispatchResult<DispatchOutcome>
    where
        C: Future<Output = ()>,
    {
        let timeout_ms = self.delivery_timeout.as_millis() as u64;
        lifecycle.advance(DispatchState::AwaitingDelivery)?;
        emit(
            sink,
            ProgressStage::AwaitingDelivery {
                destination: route.destination.name.clone(),
                timeout_ms,
            },
        );

        let started = Instant::now();
        let deadline = started + self.delivery_timeout;
        tokio::pin!(cancel);

        let destination = &route.destination;
        let subscribe = timeout_at(
            deadline,
            destination.client.subscribe_once(
                &destination.contract_address,
                self.delivery_filter(route, request),
            ),
        );

        let resolution = tokio::select! {
            biased;
            _ = &mut cancel => Resolution::Cancelled,
            opened = subscribe => match opened {
                Err(_) => Resolution::TimedOut,
                Ok(Err(e)) => Resolution::Unobservable(e.to_string()),
                Ok(Ok(mut subscription)) => {
                    let resolution = tokio::select! {
                        biased;
                        _ = &mut cancel => Resolution::Cancelled,
                        event = subscription.recv() => match event {
                            Some(event) => Resolution::Delivered(event),
                            None => {
                                warn!("Delivery watcher ended early; waiting out the deadline");
                                tokio::select! {
                                    biased;
                                    _ = &mut cancel => Resolution::Cancelled,
                                    _ = sleep_until(deadline) => Resolution::TimedOut,
                                }
                            }
                        },
                        _ = sleep_until(deadline) => Resolution::TimedOut,
                    };
                    subscription.cancel();
                    debug!("Delivery subscription released");
                    resolution
                }
            },
        };

        match resolution {
            Resolution::Delivered(event) => {
                lifecycle.advance(DispatchState::Delivered)?;
                crate::metrics::record_delivery_latency(
                    &destination.chain,
                    started.elapsed().as_secs_f64(),
                );
                crate::metrics::record_dispatch_outcome(&destination.chain, "delivered");
                info!(
                    "Delivery observed in destination tx {} (block {})",
                    event.tx_hash, event.block_number
                );
                emit(
                    sink,
                    ProgressStage::Delivered {
                        text: event.message.clone(),
                    },
                );
                Ok(DispatchOutcome::delivered(tx_id, event.message))
            }
            Resolution::TimedOut => {
                lifecycle.advance(DispatchState::TimedOut)?;
                crate::metrics::record_dispatch_outcome(&destination.chain, "timed_out");
                warn!("No delivery within {:?} for {}", self.delivery_timeout, tx_id);
                emit(sink, ProgressStage::TimedOut { timeout_ms });
                Ok(DispatchOutcome::undelivered(tx_id))
            }
            Resolution::Unobservable(reason) => {
                lifecycle.advance(DispatchState::TimedOut)?;
                crate::metrics::record_dispatch_outcome(&destination.chain, "unobservable");
                warn!("Cannot watch for delivery of {}: {}", tx_id, reason);
                emit(sink, ProgressStage::DeliveryUnobservable { reason });
                Ok(DispatchOutcome::undelivered(tx_id))
            }
            Resolution::Cancelled => {
                lifecycle.advance(DispatchState::Cancelled)?;
                crate::metrics::record_dispatch_outcome(&destination.chain, "cancelled");
                Err(DispatchError::Cancelled { tx_id })
            }
        }
    }
}

fn emit(sink: &dyn ProgressSink, stage: ProgressStage) {
    let event = ProgressEvent::new(stage);
    if event.stage.is_terminal() {
        info!("Dispatch finished: {}", event.message);
    } else {
        info!("{}", event.message);
    }
    sink.emit(event);
}
