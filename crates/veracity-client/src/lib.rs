//! # Veracity Client
//!
//! Quorum JSON-RPC client on top of `veracity-core`.
//!
//! ## Architecture
//!
//! - Nodes come from a verified registry nodelist (or static bootstrap
//!   nodes) and are picked at random, weighted by deposit and speed
//! - Every request goes to several nodes in parallel; a failing node is
//!   replaced by an untried one while the pool lasts
//! - Every answer passes the core proof dispatcher before it is merged
//! - Nodes caught with a bad proof are blacklisted for a while
//! - Disagreeing answers are settled by an authority node, or reported as a
//!   conflict
//!
//! The transport is untrusted. Nothing it returns is used before
//! verification.
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use veracity_client::{ClientConfig, HttpTransport, QuorumClient};
//!
//! let client = QuorumClient::new(config, Arc::new(HttpTransport::new()))?
//!     .on_nodelist_update(|chain_id, nodes| println!("{chain_id}: {} nodes", nodes.len()));
//! let balance = client.call("eth_getBalance", vec![address, "latest".into()]).await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod merge;
pub mod nodes;
pub mod select;
pub mod transport;

pub use client::{NodelistCallback, QuorumClient};
pub use config::{ChainConfig, ClientConfig};
pub use error::{ClientError, TransportError};
pub use merge::{merge_results, Merged};
pub use nodes::{NodeList, NodeRecord, NodeTable, NodeWeight};
pub use select::{node_score, select_nodes, RandomSource, ThreadRandom};
pub use transport::{HttpTransport, Transport};
