//! # Veracity Core
//!
//! Pure Rust verification of JSON-RPC answers from untrusted Ethereum-style
//! nodes.
//!
//! This crate contains **no networking code**. Every answer the client
//! accepts has passed through one of these routines first.
//!
//! ## Trust Model
//!
//! - **Headers** (`consensus` module): a header is trusted when its hash is
//!   the one asked about and either enough PoA validators sealed it and its
//!   successors, or the requested nodes signed it. Validator sets change only
//!   through proven transitions.
//!
//! - **State and bodies** (`execution` module): Merkle-Patricia proofs tie
//!   accounts, storage, transactions and receipts to a trusted header.
//!   `eth_call` results are recomputed locally over proven state.
//!
//! - **Dispatch** (`verify` module): picks the routine for a method and
//!   refuses answers that should carry a proof but do not.
//!
//! ## Usage
//!
//! ```ignore
//! use veracity_core::{ChainContext, ChainSpec, ProofDispatcher};
//!
//! let dispatcher = ProofDispatcher::standard();
//! let mut ctx = ChainContext::new(ChainSpec::default());
//! dispatcher.verify_proof(&request, &response, false, &mut ctx)?;
//! ```

pub mod consensus;
pub mod execution;
pub mod types;
pub mod verify;

#[cfg(test)]
mod testutil;

pub use consensus::{
    apply_validator_states, node_message_hash, verify_block, BlockCheck, BlockError,
    BlockHeader, TransitionError, ValidatorList, ValidatorSetHistory,
};
pub use execution::{
    execute_call, keccak256, verify_account_proof, verify_merkle_proof, CallError, ProofError,
    VerifiedAccount,
};
pub use types::{chain::*, execution::*, proof::*, rpc::*};
pub use verify::{ProofDispatcher, VerifyError, UNVERIFIABLE_METHODS};
