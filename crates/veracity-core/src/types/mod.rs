pub mod chain;
pub mod encoding;
pub mod execution;
pub mod proof;
pub mod rpc;
