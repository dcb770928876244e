//! EVM implementation of the ledger capability surface

use super::ledger::{
    ContractCall, DeliveryFilter, InclusionReceipt, LedgerClient, Subscription, TransactionHandle,
};
use super::listener::DeliveryListener;
use super::ChainProvider;
use crate::config::ChainConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::events::{encode_call, EventParser};

use async_trait::async_trait;
use ethers::abi::{self, Token};
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Ledger client for an EVM chain reached over JSON-RPC
pub struct EvmLedgerClient {
    config: ChainConfig,
    provider: Arc<ChainProvider>,
    /// Signer bound to this chain's id; absent for watch-only endpoints
    wallet: Option<LocalWallet>,
}

impl EvmLedgerClient {
    pub fn new(config: ChainConfig, wallet: Option<LocalWallet>) -> LedgerResult<Self> {
        let provider = Arc::new(ChainProvider::new(&config)?);
        let wallet = wallet.map(|w| w.with_chain_id(config.chain_id));

        Ok(Self {
            config,
            provider,
            wallet,
        })
    }

    /// Parse a hex private key into a wallet
    pub fn wallet_from_key(key: &str) -> LedgerResult<LocalWallet> {
        key.trim()
            .parse::<LocalWallet>()
            .map_err(|e| LedgerError::Wallet(format!("Invalid private key: {}", e)))
    }

    fn parse_address(value: &str) -> LedgerResult<Address> {
        value
            .parse::<Address>()
            .map_err(|e| LedgerError::InvalidAddress {
                value: value.to_string(),
                message: e.to_string(),
            })
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> TransactionReceipt {
        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.block_number.is_some() => return receipt,
                Ok(_) => {}
                // The transaction may already be in; keep polling until the inclusion timeout
                Err(e) => warn!("Receipt poll for {:?} failed: {}", tx_hash, e),
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    fn message_id(&self, receipt: &TransactionReceipt) -> Option<String> {
        let contract = Self::parse_address(&self.config.contract_address).ok()?;
        let parser = EventParser::new(contract);
        receipt
            .logs
            .iter()
            .find_map(|log| parser.parse_sent(log).ok().flatten())
            .map(|sent| sent.message_id.to_string())
    }
}

#[async_trait]
impl LedgerClient for EvmLedgerClient {
    fn encode_address(&self, address: &str) -> LedgerResult<Bytes> {
        let address = Self::parse_address(address)?;
        Ok(Bytes::from(abi::encode(&[Token::Address(address)])))
    }

    async fn submit_transaction(&self, call: ContractCall) -> LedgerResult<TransactionHandle> {
        let wallet = self.wallet.as_ref().ok_or_else(|| {
            LedgerError::Wallet(format!(
                "No signer configured for chain {}",
                self.config.chain_id
            ))
        })?;
        let to = Self::parse_address(&call.contract)?;

        let request = TransactionRequest::new()
            .from(wallet.address())
            .to(to)
            .data(encode_call(&call.function, &call.args))
            .value(call.value)
            .chain_id(self.config.chain_id);
        let mut tx: TypedTransaction = request.into();

        self.provider
            .http()
            .fill_transaction(&mut tx, None)
            .await
            .map_err(|e| LedgerError::Transaction(e.to_string()))?;

        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| LedgerError::Wallet(e.to_string()))?;

        let send_timeout = Duration::from_secs(30);
        let pending = timeout(
            send_timeout,
            self.provider.http().send_raw_transaction(tx.rlp_signed(&signature)),
        )
        .await
        .map_err(|_| LedgerError::Timeout {
            operation: "send transaction".to_string(),
        })?
        .map_err(|e| LedgerError::Transaction(e.to_string()))?;

        let tx_id = format!("{:?}", pending.tx_hash());
        info!("Transaction sent on chain {}: {}", self.config.chain_id, tx_id);

        Ok(TransactionHandle { tx_id })
    }

    async fn await_inclusion(&self, handle: &TransactionHandle) -> LedgerResult<InclusionReceipt> {
        let tx_hash: H256 = handle
            .tx_id
            .parse()
            .map_err(|e| LedgerError::Transaction(format!("Invalid transaction hash: {}", e)))?;

        let receipt = timeout(self.config.inclusion_timeout(), self.wait_for_receipt(tx_hash))
            .await
            .map_err(|_| LedgerError::Timeout {
                operation: format!("inclusion of {}", handle.tx_id),
            })?;

        if receipt.status == Some(0u64.into()) {
            return Err(LedgerError::Reverted {
                chain_id: self.config.chain_id,
                tx_hash: handle.tx_id.clone(),
            });
        }

        let block_number = receipt.block_number.map(|b| b.as_u64()).unwrap_or(0);
        debug!(
            "Transaction {} included on chain {} in block {}",
            handle.tx_id, self.config.chain_id, block_number
        );

        Ok(InclusionReceipt {
            tx_id: handle.tx_id.clone(),
            block_number,
            message_id: self.message_id(&receipt),
        })
    }

    async fn subscribe_once(
        &self,
        contract: &str,
        filter: DeliveryFilter,
    ) -> LedgerResult<Subscription> {
        let contract_address = Self::parse_address(contract)?;
        let from_block = self.provider.get_block_number().await?;

        let (sender, receiver) = oneshot::channel();
        let listener = DeliveryListener::new(
            self.provider.clone(),
            contract_address,
            filter,
            self.config.poll_interval(),
        );
        let handle = tokio::spawn(listener.run(from_block, sender));

        debug!(
            "Watching {:?} on chain {} from block {}",
            contract_address, self.config.chain_id, from_block
        );

        Ok(Subscription::new(receiver, move || handle.abort()))
    }

    async fn health_check(&self) -> bool {
        self.provider.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Anvil's first default account
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn config() -> ChainConfig {
        ChainConfig {
            chain_id: 31337,
            name: "localhost".to_string(),
            rpc_urls: vec!["http://localhost:8545".to_string()],
            contract_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
            routing_code: 10121,
            poll_interval_ms: 10,
            inclusion_timeout_secs: 5,
            enabled: true,
        }
    }

    #[test]
    fn encodes_address_as_one_padded_word() {
        let client = EvmLedgerClient::new(config(), None).unwrap();
        let encoded = client
            .encode_address("0x1CBd3b2770909D4e10f157cABC84C7264073C9Ec")
            .unwrap();

        assert_eq!(encoded.len(), 32);
        assert!(encoded[..12].iter().all(|b| *b == 0));
        assert_eq!(
            hex::encode(&encoded[12..]),
            "1cbd3b2770909d4e10f157cabc84c7264073c9ec"
        );
    }

    #[test]
    fn rejects_malformed_address() {
        let client = EvmLedgerClient::new(config(), None).unwrap();
        let err = client.encode_address("0x1234").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn submit_without_signer_fails_before_network() {
        let client = EvmLedgerClient::new(config(), None).unwrap();
        let call = ContractCall {
            contract: config().contract_address,
            function: crate::events::SEND_MESSAGE.to_string(),
            args: vec![],
            value: U256::zero(),
        };
        let err = client.submit_transaction(call).await.unwrap_err();
        assert!(matches!(err, LedgerError::Wallet(_)));
    }

    #[test]
    fn wallet_is_bound_to_chain_id() {
        let wallet = EvmLedgerClient::wallet_from_key(TEST_KEY).unwrap();
        let client = EvmLedgerClient::new(config(), Some(wallet)).unwrap();
        assert_eq!(client.wallet.as_ref().unwrap().chain_id(), 31337);
        assert_eq!(
            format!("{:?}", client.wallet.as_ref().unwrap().address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[tokio::test]
    async fn inclusion_wait_survives_unreachable_rpcs_until_timeout() {
        let mut config = config();
        config.rpc_urls = vec![
            "http://127.0.0.1:1".to_string(),
            "http://127.0.0.1:2".to_string(),
        ];
        config.inclusion_timeout_secs = 1;
        let client = EvmLedgerClient::new(config, None).unwrap();
        let handle = TransactionHandle {
            tx_id: format!("{:?}", H256::from_low_u64_be(0xabc)),
        };

        let started = std::time::Instant::now();
        let err = client.await_inclusion(&handle).await.unwrap_err();

        assert!(matches!(err, LedgerError::Timeout { ref operation } if operation.contains("inclusion")));
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn bad_key_is_a_wallet_error() {
        assert!(matches!(
            EvmLedgerClient::wallet_from_key("zz"),
            Err(LedgerError::Wallet(_))
        ));
    }
}
