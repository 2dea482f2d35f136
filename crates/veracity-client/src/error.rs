use alloy_primitives::Address;
use thiserror::Error;
use veracity_core::{TransitionError, VerifyError};

/// Failures talking to a single node. Recovered by substituting another
/// node while the pool lasts.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },
}

/// The one error a caller sees when no verified answer could be produced.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("No eligible nodes for chain {chain_id}")]
    NoNodes { chain_id: u64 },

    #[error("Chain {0} is not configured")]
    UnknownChain(u64),

    #[error("{answers} different answers to {method}")]
    Conflict { method: String, answers: usize },

    #[error("{method} requires a proof, none was attached")]
    ProofMissing { method: String },

    #[error("Answer from {node} failed verification: {source}")]
    Verification {
        node: Address,
        #[source]
        source: VerifyError,
    },

    /// Nodes that were evicted because they failed to sign a block hash.
    #[error("Blacklisted {addresses:?}: {reason}")]
    Blacklist {
        addresses: Vec<Address>,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Invalid {method} result: {source}")]
    InvalidResult {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}
