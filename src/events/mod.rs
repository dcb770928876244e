//! Messaging contract ABI: function selectors, event topics and log decoding
//!
//! The sender/receiver contracts expose:
//! - `sendMessage(uint16 dstChainId, bytes destination, string message) payable`
//! - `MessageSent(uint16 indexed srcChain, uint256 indexed msgId, address sender, string message)`
//! - `MessageReceived(uint16 indexed srcChain, address receiver, string message)`

use crate::error::{LedgerError, LedgerResult};

use ethers::abi::{self, ParamType, Token};
use ethers::prelude::*;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

pub const SEND_MESSAGE: &str = "sendMessage(uint16,bytes,string)";
pub const MESSAGE_SENT: &str = "MessageSent(uint16,uint256,address,string)";
pub const MESSAGE_RECEIVED: &str = "MessageReceived(uint16,address,string)";

/// Event topic signatures (keccak256 of event signature)
pub mod topics {
    use ethers::types::H256;
    use lazy_static::lazy_static;

    lazy_static! {
        pub static ref MESSAGE_SENT: H256 = super::topic(super::MESSAGE_SENT);
        pub static ref MESSAGE_RECEIVED: H256 = super::topic(super::MESSAGE_RECEIVED);
    }
}

/// keccak256 of a canonical signature
pub fn keccak(signature: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(signature.as_bytes());
    hasher.finalize().into()
}

/// First four bytes of the signature hash
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak(signature);
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn topic(signature: &str) -> H256 {
    H256::from(keccak(signature))
}

/// Selector followed by the ABI-encoded arguments
pub fn encode_call(signature: &str, args: &[Token]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend_from_slice(&abi::encode(args));
    Bytes::from(data)
}

/// `MessageReceived` observed on a destination contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    /// Protocol routing code of the chain the message came from
    pub source_routing_code: u16,
    pub receiver: String,
    pub message: String,
    pub tx_hash: String,
    pub block_number: u64,
}

/// `MessageSent` emitted by the source contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSent {
    pub destination_routing_code: u16,
    pub message_id: U256,
    pub sender: Address,
    pub message: String,
}

/// Decodes messaging contract logs
pub struct EventParser {
    contract_address: Address,
}

impl EventParser {
    pub fn new(contract_address: Address) -> Self {
        Self { contract_address }
    }

    /// Parse a `MessageReceived` log; other logs yield `None`
    pub fn parse_delivery(&self, log: &Log) -> LedgerResult<Option<DeliveryEvent>> {
        if log.address != self.contract_address
            || log.topics.first() != Some(&*topics::MESSAGE_RECEIVED)
        {
            return Ok(None);
        }

        let source_routing_code = indexed_u16(log, 1)?;
        let tokens = abi::decode(&[ParamType::Address, ParamType::String], &log.data)
            .map_err(|e| LedgerError::EventParsing(format!("MessageReceived data: {}", e)))?;

        let (receiver, message) = match tokens.as_slice() {
            [Token::Address(receiver), Token::String(message)] => (*receiver, message.clone()),
            _ => {
                return Err(LedgerError::EventParsing(
                    "MessageReceived data has unexpected shape".to_string(),
                ))
            }
        };

        Ok(Some(DeliveryEvent {
            source_routing_code,
            receiver: format!("{:?}", receiver),
            message,
            tx_hash: format!("{:?}", log.transaction_hash.unwrap_or_default()),
            block_number: log.block_number.map(|b| b.as_u64()).unwrap_or(0),
        }))
    }

    /// Parse a `MessageSent` log; other logs yield `None`
    pub fn parse_sent(&self, log: &Log) -> LedgerResult<Option<MessageSent>> {
        if log.address != self.contract_address
            || log.topics.first() != Some(&*topics::MESSAGE_SENT)
        {
            return Ok(None);
        }

        let destination_routing_code = indexed_u16(log, 1)?;
        let message_id = log
            .topics
            .get(2)
            .map(|t| U256::from_big_endian(t.as_bytes()))
            .ok_or_else(|| LedgerError::EventParsing("MessageSent without msgId".to_string()))?;

        let tokens = abi::decode(&[ParamType::Address, ParamType::String], &log.data)
            .map_err(|e| LedgerError::EventParsing(format!("MessageSent data: {}", e)))?;

        match tokens.as_slice() {
            [Token::Address(sender), Token::String(message)] => Ok(Some(MessageSent {
                destination_routing_code,
                message_id,
                sender: *sender,
                message: message.clone(),
            })),
            _ => Err(LedgerError::EventParsing(
                "MessageSent data has unexpected shape".to_string(),
            )),
        }
    }
}

fn indexed_u16(log: &Log, index: usize) -> LedgerResult<u16> {
    let word = log
        .topics
        .get(index)
        .ok_or_else(|| LedgerError::EventParsing(format!("missing indexed topic {}", index)))?;
    let value = U256::from_big_endian(word.as_bytes());
    if value > U256::from(u16::MAX) {
        return Err(LedgerError::EventParsing(format!(
            "indexed value {} does not fit uint16",
            value
        )));
    }
    Ok(value.as_u32() as u16)
}

#[cfg(test)]
pub(crate) fn message_received_log(
    contract: Address,
    source_routing_code: u16,
    receiver: Address,
    message: &str,
) -> Log {
    Log {
        address: contract,
        topics: vec![
            *topics::MESSAGE_RECEIVED,
            H256::from_low_u64_be(source_routing_code as u64),
        ],
        data: abi::encode(&[Token::Address(receiver), Token::String(message.to_string())]).into(),
        block_number: Some(U64::from(42)),
        transaction_hash: Some(H256::from_low_u64_be(0xabc)),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> Address {
        "0x1CBd3b2770909D4e10f157cABC84C7264073C9Ec".parse().unwrap()
    }

    #[test]
    fn selector_matches_known_value() {
        // transfer(address,uint256) is the canonical ERC-20 example
        assert_eq!(
            hex::encode(selector("transfer(address,uint256)")),
            "a9059cbb"
        );
    }

    #[test]
    fn call_data_starts_with_selector() {
        let data = encode_call(
            SEND_MESSAGE,
            &[
                Token::Uint(U256::from(10109u64)),
                Token::Bytes(vec![0u8; 32]),
                Token::String("hello".to_string()),
            ],
        );
        assert_eq!(&data[..4], &selector(SEND_MESSAGE));
        // three head words, bytes (len + 1 word), string (len + 1 word)
        assert_eq!(data.len(), 4 + 32 * 7);
    }

    #[test]
    fn parses_message_received() {
        let receiver = Address::from_low_u64_be(7);
        let log = message_received_log(contract(), 10121, receiver, "hello");

        let event = EventParser::new(contract())
            .parse_delivery(&log)
            .unwrap()
            .unwrap();
        assert_eq!(event.source_routing_code, 10121);
        assert_eq!(event.message, "hello");
        assert_eq!(event.block_number, 42);
        assert_eq!(event.receiver, format!("{:?}", receiver));
    }

    #[test]
    fn ignores_other_contracts_and_topics() {
        let parser = EventParser::new(contract());
        let mut log = message_received_log(Address::zero(), 1, Address::zero(), "x");
        assert!(parser.parse_delivery(&log).unwrap().is_none());

        log.address = contract();
        log.topics[0] = *topics::MESSAGE_SENT;
        assert!(parser.parse_delivery(&log).unwrap().is_none());
    }

    #[test]
    fn rejects_truncated_data() {
        let mut log = message_received_log(contract(), 1, Address::zero(), "hello");
        log.data = Bytes::from(vec![0u8; 16]);
        assert!(EventParser::new(contract()).parse_delivery(&log).is_err());
    }

    #[test]
    fn parses_message_sent_id() {
        let sender = Address::from_low_u64_be(9);
        let log = Log {
            address: contract(),
            topics: vec![
                *topics::MESSAGE_SENT,
                H256::from_low_u64_be(10109),
                H256::from_low_u64_be(5),
            ],
            data: abi::encode(&[Token::Address(sender), Token::String("hi".into())]).into(),
            ..Default::default()
        };
        let sent = EventParser::new(contract()).parse_sent(&log).unwrap().unwrap();
        assert_eq!(sent.destination_routing_code, 10109);
        assert_eq!(sent.message_id, U256::from(5));
        assert_eq!(sent.sender, sender);
    }
}
