//! Weighted random node selection.
//!
//! Eligible nodes are drawn without replacement with probability
//! proportional to their score. Randomness is injected so selection can be
//! replayed in tests.

use std::collections::HashSet;

use alloy_primitives::{Address, B256};
use rand::Rng;
use tracing::trace;

use crate::config::ClientConfig;
use crate::nodes::{NodeRecord, NodeTable, NodeWeight};

/// Response time at which the speed factor is 1.
const RESPONSE_TIME_BASE_MS: f64 = 500.0;

/// Draws per wanted node before falling back to list order.
const MAX_DRAWS_PER_NODE: usize = 64;

pub trait RandomSource: Send + Sync {
    /// Uniform draw from `[0, 1)`.
    fn next_f64(&self) -> f64;

    /// 32 random bytes, used as the `in3_nodeList` seed.
    fn seed(&self) -> B256 {
        let mut out = [0u8; 32];
        for chunk in out.chunks_mut(8) {
            chunk.copy_from_slice(&self.next_f64().to_bits().to_be_bytes());
        }
        B256::from(out)
    }
}

/// [`RandomSource`] backed by the thread-local generator.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&self) -> f64 {
        rand::thread_rng().gen()
    }

    fn seed(&self) -> B256 {
        B256::from(rand::random::<[u8; 32]>())
    }
}

/// weight × deposit × speed, where speed is 500ms over the average
/// response time once one is known.
pub fn node_score(node: &NodeRecord, weight: &NodeWeight) -> f64 {
    let deposit = u128::try_from(node.deposit).map_or(u128::MAX as f64, |d| d as f64);
    let speed = if weight.avg_response_time > 0.0 {
        RESPONSE_TIME_BASE_MS / weight.avg_response_time
    } else {
        1.0
    };
    weight.weight * deposit.max(1.0) * speed
}

/// Pick up to `count` distinct nodes serving `chain_id`.
///
/// Nodes below the minimum deposit, in `excludes` or blacklisted at `now`
/// are never picked. When no more than `count` remain, all of them are
/// returned.
pub fn select_nodes(
    config: &ClientConfig,
    chain_id: u64,
    table: &NodeTable,
    count: usize,
    excludes: &HashSet<Address>,
    random: &dyn RandomSource,
    now: u64,
) -> Vec<NodeRecord> {
    let eligible: Vec<&NodeRecord> = table
        .nodes()
        .iter()
        .filter(|n| n.serves(chain_id))
        .filter(|n| n.deposit >= config.min_deposit)
        .filter(|n| !excludes.contains(&n.address))
        .filter(|n| !table.weight(&n.address).is_blacklisted(now))
        .collect();
    if eligible.len() <= count {
        return eligible.into_iter().cloned().collect();
    }

    let mut scores: Vec<f64> = eligible
        .iter()
        .map(|n| node_score(n, &table.weight(&n.address)))
        .map(|s| if s.is_finite() && s > 0.0 { s } else { 0.0 })
        .collect();
    if scores.iter().all(|s| *s == 0.0) {
        scores.iter_mut().for_each(|s| *s = 1.0);
    }
    let cumulative: Vec<f64> = scores
        .iter()
        .scan(0.0, |sum, s| {
            *sum += s;
            Some(*sum)
        })
        .collect();
    let total = cumulative.last().copied().unwrap_or_default();

    let mut picked: Vec<usize> = Vec::with_capacity(count);
    let mut draws = 0;
    while picked.len() < count && draws < count * MAX_DRAWS_PER_NODE {
        draws += 1;
        let target = random.next_f64().clamp(0.0, 1.0) * total;
        let index = cumulative
            .partition_point(|c| *c <= target)
            .min(eligible.len() - 1);
        if scores[index] > 0.0 && !picked.contains(&index) {
            picked.push(index);
        }
    }
    if picked.len() < count {
        trace!(chain_id, drawn = picked.len(), count, "topping up selection in list order");
        for index in 0..eligible.len() {
            if picked.len() == count {
                break;
            }
            if !picked.contains(&index) {
                picked.push(index);
            }
        }
    }
    picked.into_iter().map(|i| eligible[i].clone()).collect()
}
