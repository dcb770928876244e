//! Request and outcome types for a single cross-chain send

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Dispatcher-internal name of a participating chain (e.g. `"1"`)
///
/// Distinct from the EVM chain id used for signing and from the messaging
/// protocol's routing code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChainId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChainId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message text handed to the source contract untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessagePayload(String);

impl MessagePayload {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Size of the UTF-8 text in bytes
    pub fn byte_len(&self) -> usize {
        self.0.len()
    }
}

impl From<&str> for MessagePayload {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl From<String> for MessagePayload {
    fn from(text: String) -> Self {
        Self(text)
    }
}

/// One user-initiated send
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    id: Uuid,
    source: ChainId,
    destination: ChainId,
    payload: MessagePayload,
}

impl DispatchRequest {
    pub fn new(
        source: impl Into<ChainId>,
        destination: impl Into<ChainId>,
        payload: impl Into<MessagePayload>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            destination: destination.into(),
            payload: payload.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source(&self) -> &ChainId {
        &self.source
    }

    pub fn destination(&self) -> &ChainId {
        &self.destination
    }

    pub fn payload(&self) -> &MessagePayload {
        &self.payload
    }
}

/// Final result of a dispatch that got past inclusion
///
/// `delivered == false` means only that the destination event was not seen
/// before the deadline; the source transaction is committed either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub source_transaction_id: String,
    pub delivered: bool,
    pub delivered_message: Option<String>,
}

impl DispatchOutcome {
    pub fn delivered(source_transaction_id: String, message: String) -> Self {
        Self {
            source_transaction_id,
            delivered: true,
            delivered_message: Some(message),
        }
    }

    pub fn undelivered(source_transaction_id: String) -> Self {
        Self {
            source_transaction_id,
            delivered: false,
            delivered_message: None,
        }
    }
}
