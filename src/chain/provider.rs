//! Chain provider with multi-RPC support and automatic failover

use crate::config::ChainConfig;
use crate::error::{LedgerError, LedgerResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    chain_id: u64,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    pub fn new(config: &ChainConfig) -> LedgerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(LedgerError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            chain_id: config.chain_id,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> LedgerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(LedgerError::ChainConnection {
            chain_id: self.chain_id,
            message: "All providers failed".to_string(),
        })
    }

    /// Get logs for a filter with failover
    pub async fn get_logs(&self, filter: &Filter) -> LedgerResult<Vec<Log>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_logs(filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!("Failed to get logs from chain {}: {}", self.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(LedgerError::ChainConnection {
            chain_id: self.chain_id,
            message: "All providers failed to get logs".to_string(),
        })
    }

    /// Get a transaction receipt with failover
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> LedgerResult<Option<TransactionReceipt>> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_transaction_receipt(tx_hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    warn!(
                        "Failed to get receipt {:?} from chain {}: {}",
                        tx_hash, self.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(LedgerError::ChainConnection {
            chain_id: self.chain_id,
            message: "All providers failed to get receipt".to_string(),
        })
    }

    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Health check failed for chain {}: {}", self.chain_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(urls: &[&str]) -> ChainConfig {
        ChainConfig {
            chain_id: 31337,
            name: "localhost".to_string(),
            rpc_urls: urls.iter().map(|u| u.to_string()).collect(),
            contract_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
            routing_code: 10121,
            poll_interval_ms: 10,
            inclusion_timeout_secs: 5,
            enabled: true,
        }
    }

    #[test]
    fn rejects_when_no_url_parses() {
        let err = ChainProvider::new(&config(&["not a url"])).err().unwrap();
        assert!(matches!(err, LedgerError::ChainConnection { chain_id: 31337, .. }));
    }

    #[test]
    fn failover_rotates_providers() {
        let provider =
            ChainProvider::new(&config(&["http://localhost:8545", "http://localhost:8546"]))
                .unwrap();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 1);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn receipt_lookup_tries_every_provider() {
        // Nothing listens on these ports
        let provider =
            ChainProvider::new(&config(&["http://127.0.0.1:1", "http://127.0.0.1:2", "http://127.0.0.1:3"]))
                .unwrap();
        provider.failover();

        let err = provider
            .get_transaction_receipt(H256::from_low_u64_be(0xabc))
            .await
            .unwrap_err();

        match err {
            LedgerError::ChainConnection { chain_id, message } => {
                assert_eq!(chain_id, 31337);
                assert_eq!(message, "All providers failed to get receipt");
            }
            other => panic!("unexpected error: {other}"),
        }
        // One failover per provider brings the pool back to where it started
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 1);
    }
}
