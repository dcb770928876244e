//! Error types for the cross-chain dispatcher

use crate::coordination::ChainId;
use thiserror::Error;

/// Errors raised by a ledger client (transport, signing, decoding)
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Transaction {tx_hash} reverted on chain {chain_id}")]
    Reverted { chain_id: u64, tx_hash: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Invalid address {value}: {message}")]
    InvalidAddress { value: String, message: String },

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },
}

/// Errors surfaced to the caller of a dispatch
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Chain {chain} is not registered")]
    UnknownChain { chain: ChainId },

    #[error("Invalid route: source and destination are both {chain}")]
    InvalidRoute { chain: ChainId },

    #[error("Cannot encode destination address for chain {chain}: {source}")]
    InvalidAddress {
        chain: ChainId,
        #[source]
        source: LedgerError,
    },

    #[error("Submission failed on chain {chain}: {source}")]
    SubmissionFailed {
        chain: ChainId,
        #[source]
        source: LedgerError,
    },

    #[error("Inclusion of {tx_id} failed on chain {chain}: {source}")]
    InclusionFailed {
        chain: ChainId,
        tx_id: String,
        #[source]
        source: LedgerError,
    },

    #[error("Dispatch cancelled while awaiting delivery of {tx_id}")]
    Cancelled { tx_id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

impl DispatchError {
    /// Whether the request was rejected before any collaborator was called
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            DispatchError::UnknownChain { .. } | DispatchError::InvalidRoute { .. }
        )
    }

    /// Short label for metrics and API responses
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::UnknownChain { .. } => "unknown_chain",
            DispatchError::InvalidRoute { .. } => "invalid_route",
            DispatchError::InvalidAddress { .. } => "invalid_address",
            DispatchError::SubmissionFailed { .. } => "submission_failed",
            DispatchError::InclusionFailed { .. } => "inclusion_failed",
            DispatchError::Cancelled { .. } => "cancelled",
            DispatchError::InvalidStateTransition { .. } => "invalid_state_transition",
        }
    }
}

/// Result type for ledger client operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;
