pub mod block;
pub mod header;
pub mod signature;
pub mod transition;
pub mod validators;

pub use block::{verify_block, BlockCheck, BlockError};
pub use header::{BlockHeader, HeaderError};
pub use signature::{node_message_hash, recover_signer, SignatureError};
pub use transition::{apply_validator_states, TransitionError, ValidatorList};
pub use validators::{DeltaHistory, HistoryError, ValidatorSetHistory};
