//! Chain module - ledger endpoints the dispatcher can route between
//!
//! This module provides:
//! - The `LedgerClient` capability surface and its one-shot `Subscription`
//! - An ethers-backed EVM client with multi-RPC failover
//! - The read-only endpoint registry shared by all dispatches

pub mod client;
pub mod ledger;
pub mod listener;
pub mod provider;

pub use client::EvmLedgerClient;
pub use ledger::{
    ContractCall, DeliveryFilter, InclusionReceipt, LedgerClient, Subscription, TransactionHandle,
};
pub use provider::ChainProvider;

use crate::config::Settings;
use crate::coordination::ChainId;
use crate::error::LedgerResult;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Connection and deployment details for one chain
#[derive(Clone)]
pub struct EndpointRegistration {
    pub chain: ChainId,
    pub name: String,
    pub client: Arc<dyn LedgerClient>,
    pub contract_address: String,
    /// Messaging protocol's id for this chain when it is a destination
    pub routing_code: u16,
}

impl std::fmt::Debug for EndpointRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRegistration")
            .field("chain", &self.chain)
            .field("name", &self.name)
            .field("contract_address", &self.contract_address)
            .field("routing_code", &self.routing_code)
            .finish()
    }
}

/// Public view of a registered chain
#[derive(Debug, Clone, Serialize)]
pub struct ChainSummary {
    pub chain: ChainId,
    pub name: String,
    pub contract_address: String,
    pub routing_code: u16,
}

/// Immutable map from chain identifier to endpoint
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<ChainId, EndpointRegistration>,
}

impl EndpointRegistry {
    pub fn new(registrations: impl IntoIterator<Item = EndpointRegistration>) -> Self {
        let endpoints = registrations
            .into_iter()
            .map(|r| (r.chain.clone(), r))
            .collect();
        Self { endpoints }
    }

    /// Build EVM endpoints for every enabled chain, all signing with `wallet`
    pub fn from_settings(
        settings: &Settings,
        wallet: Option<ethers::signers::LocalWallet>,
    ) -> LedgerResult<Self> {
        let mut registrations = Vec::new();

        for (id, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} ({}, EVM id {})",
                id, chain_config.name, chain_config.chain_id
            );

            let client = EvmLedgerClient::new(chain_config.clone(), wallet.clone())?;
            registrations.push(EndpointRegistration {
                chain: ChainId::new(id.as_str()),
                name: chain_config.name.clone(),
                client: Arc::new(client),
                contract_address: chain_config.contract_address.clone(),
                routing_code: chain_config.routing_code,
            });
        }

        Ok(Self::new(registrations))
    }

    pub fn resolve(&self, chain: &ChainId) -> Option<&EndpointRegistration> {
        self.endpoints.get(chain)
    }

    /// Registered chains sorted by identifier
    pub fn chains(&self) -> Vec<ChainSummary> {
        let mut chains: Vec<_> = self
            .endpoints
            .values()
            .map(|r| ChainSummary {
                chain: r.chain.clone(),
                name: r.name.clone(),
                contract_address: r.contract_address.clone(),
                routing_code: r.routing_code,
            })
            .collect();
        chains.sort_by(|a, b| a.chain.cmp(&b.chain));
        chains
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(ChainId, bool)> {
        let checks = self.endpoints.values().map(|r| async move {
            let healthy = r.client.health_check().await;
            crate::metrics::record_chain_health(&r.chain, healthy);
            (r.chain.clone(), healthy)
        });

        let mut results = futures::future::join_all(checks).await;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
