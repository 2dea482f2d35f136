//! Node records from the registry and the per-node scores kept about them.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, U256};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use veracity_core::types::encoding::{parse_quantity, quantity};

/// Milliseconds since the unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// A server as listed in the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub address: Address,
    pub url: String,
    /// Chains served. Empty means the chain the record is configured under.
    #[serde(default, with = "chain_ids")]
    pub chain_ids: Vec<u64>,
    #[serde(default)]
    pub deposit: U256,
    /// Capability bit flags.
    #[serde(default, with = "quantity")]
    pub props: u64,
    /// Position in the registry.
    #[serde(default, with = "quantity")]
    pub index: u64,
}

impl NodeRecord {
    pub fn serves(&self, chain_id: u64) -> bool {
        self.chain_ids.is_empty() || self.chain_ids.contains(&chain_id)
    }
}

mod chain_ids {
    use super::*;

    pub fn serialize<S: Serializer>(ids: &[u64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(ids.iter().map(|id| format!("{id:#x}")))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u64>, D::Error> {
        Vec::<Value>::deserialize(deserializer)?
            .iter()
            .map(|v| {
                parse_quantity(v)
                    .and_then(|q| u64::try_from(q).ok())
                    .ok_or_else(|| de::Error::custom(format!("invalid chain id {v}")))
            })
            .collect()
    }
}

/// Result of `in3_nodeList`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeList {
    pub nodes: Vec<NodeRecord>,
    pub contract: Address,
    #[serde(with = "quantity")]
    pub last_block_number: u64,
    #[serde(with = "quantity")]
    pub total_servers: u64,
}

/// Mutable score of one node.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeWeight {
    /// Manual multiplier, 1 unless configured otherwise.
    pub weight: f64,
    pub response_count: u64,
    /// Running average in milliseconds, 0 before the first response.
    pub avg_response_time: f64,
    /// Unix millis of the last attempt.
    pub last_request: u64,
    /// Unix millis until which the node is excluded, 0 if never.
    pub blacklisted_until: u64,
}

impl Default for NodeWeight {
    fn default() -> Self {
        Self {
            weight: 1.0,
            response_count: 0,
            avg_response_time: 0.0,
            last_request: 0,
            blacklisted_until: 0,
        }
    }
}

impl NodeWeight {
    pub fn is_blacklisted(&self, now: u64) -> bool {
        self.blacklisted_until > now
    }

    /// Fold one attempt into the running average.
    pub fn record(&mut self, elapsed_ms: u64, now: u64) {
        let n = self.response_count as f64;
        self.avg_response_time = (self.avg_response_time * n + elapsed_ms as f64) / (n + 1.0);
        self.response_count += 1;
        self.last_request = now;
    }
}

/// Nodelist snapshot of one chain together with the node scores.
#[derive(Clone, Debug, Default)]
pub struct NodeTable {
    nodes: Vec<NodeRecord>,
    weights: HashMap<Address, NodeWeight>,
    last_block: u64,
}

impl NodeTable {
    pub fn new(nodes: Vec<NodeRecord>) -> Self {
        Self {
            nodes,
            ..Self::default()
        }
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    pub fn find(&self, address: &Address) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.address == *address)
    }

    /// Score of `address`, the default for nodes never contacted.
    pub fn weight(&self, address: &Address) -> NodeWeight {
        self.weights.get(address).copied().unwrap_or_default()
    }

    /// Registry block of the installed snapshot, 0 for bootstrap nodes.
    pub fn last_block(&self) -> u64 {
        self.last_block
    }

    pub fn record(&mut self, address: Address, elapsed_ms: u64, now: u64) {
        self.weights.entry(address).or_default().record(elapsed_ms, now);
    }

    pub fn blacklist(&mut self, address: Address, until: u64) {
        let weight = self.weights.entry(address).or_default();
        weight.blacklisted_until = weight.blacklisted_until.max(until);
    }

    /// Replace the snapshot. Scores of addresses still listed survive.
    pub fn install(&mut self, nodes: Vec<NodeRecord>, last_block: u64) {
        self.weights
            .retain(|address, _| nodes.iter().any(|n| n.address == *address));
        self.nodes = nodes;
        self.last_block = last_block;
    }
}
