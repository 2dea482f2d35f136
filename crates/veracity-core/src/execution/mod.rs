pub mod account;
pub mod call;
pub mod proof;
pub mod receipt;
pub mod rlp;
pub mod transaction;
pub mod trie;

pub use account::{verify_account_proof, VerifiedAccount};
pub use call::{execute_call, CallError, CallRequest, MissingData, ProofState};
pub use proof::{keccak256, read_merkle_proof, verify_merkle_proof, ProofError};
