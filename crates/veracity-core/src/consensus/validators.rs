//! Validator sets by block height, stored as a sparse list of splices.
//!
//! Each delta replaces `len` entries at `start` with `data`. Replaying every
//! delta with `block <= h`, in order, onto the empty list yields the set
//! valid at `h`. Sets change rarely and usually by one member, so this is
//! far smaller than one snapshot per change.

use std::fmt::Display;
use std::str::FromStr;

use alloy_primitives::Address;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Malformed delta `{delta}`: {reason}")]
    Malformed { delta: String, reason: String },

    #[error("Delta at block {block} is out of order")]
    OutOfOrder { block: u64 },

    #[error("Delta at block {block} splices {start}..{end} of a {len}-entry list")]
    OutOfRange {
        block: u64,
        start: usize,
        end: usize,
        len: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delta<T> {
    pub block: u64,
    pub start: usize,
    pub len: usize,
    pub data: Vec<T>,
}

impl<T> Delta<T> {
    /// Replace `len` entries at `start` with this delta's data.
    fn apply(&self, state: &mut Vec<T>)
    where
        T: Clone,
    {
        let end = self.start.saturating_add(self.len).min(state.len());
        let start = self.start.min(end);
        state.splice(start..end, self.data.iter().cloned());
    }
}

/// The smallest splice turning `old` into `new`, keeping the common prefix
/// and suffix in place. `None` if the lists are equal.
fn diff<T: Clone + PartialEq>(block: u64, old: &[T], new: &[T]) -> Option<Delta<T>> {
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let max_suffix = old.len().min(new.len()) - prefix;
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let len = old.len() - prefix - suffix;
    let data = new[prefix..new.len() - suffix].to_vec();
    if len == 0 && data.is_empty() {
        return None;
    }
    Some(Delta {
        block,
        start: prefix,
        len,
        data,
    })
}

/// A history of lists keyed by block height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeltaHistory<T> {
    deltas: Vec<Delta<T>>,
}

pub type ValidatorSetHistory = DeltaHistory<Address>;

impl<T> Default for DeltaHistory<T> {
    fn default() -> Self {
        Self { deltas: Vec::new() }
    }
}

impl<T: Clone + PartialEq> DeltaHistory<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deltas(&self) -> &[Delta<T>] {
        &self.deltas
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Block of the most recent change.
    pub fn last_block(&self) -> Option<u64> {
        self.deltas.last().map(|d| d.block)
    }

    /// The list valid at `block`.
    pub fn get_data(&self, block: u64) -> Vec<T> {
        let mut state = Vec::new();
        for delta in self.deltas.iter().take_while(|d| d.block <= block) {
            delta.apply(&mut state);
        }
        state
    }

    /// Record that `list` is valid from `block` on.
    ///
    /// Inserting before existing deltas keeps every later height answering
    /// as before: the later states are snapshotted, the history is cut at
    /// `block` and the snapshots are re-diffed on top of the new state.
    pub fn add_state(&mut self, block: u64, list: Vec<T>) {
        let mut later: Vec<(u64, Vec<T>)> = Vec::new();
        for delta in self.deltas.iter().filter(|d| d.block > block) {
            if later.last().map(|(b, _)| *b) != Some(delta.block) {
                later.push((delta.block, self.get_data(delta.block)));
            }
        }

        self.deltas.retain(|d| d.block < block);
        let mut previous = self.get_data(block);
        let rebased = later.len();

        for (at, state) in std::iter::once((block, list)).chain(later) {
            if let Some(delta) = diff(at, &previous, &state) {
                self.deltas.push(delta);
            }
            previous = state;
        }

        debug!(block, rebased, deltas = self.deltas.len(), "validator history updated");
    }
}

impl<T: Clone + PartialEq + Display> DeltaHistory<T> {
    /// Compact form: one `block:start:len:data...` string per delta.
    pub fn to_delta_strings(&self) -> Vec<String> {
        self.deltas
            .iter()
            .map(|d| {
                let mut parts = vec![d.block.to_string(), d.start.to_string(), d.len.to_string()];
                parts.extend(d.data.iter().map(ToString::to_string));
                parts.join(":")
            })
            .collect()
    }
}

impl<T> DeltaHistory<T>
where
    T: Clone + PartialEq + FromStr,
    T::Err: Display,
{
    /// Parse the output of [`to_delta_strings`](Self::to_delta_strings),
    /// rejecting anything that would not replay cleanly.
    pub fn from_delta_strings(strings: &[String]) -> Result<Self, HistoryError> {
        let mut deltas: Vec<Delta<T>> = Vec::with_capacity(strings.len());
        let mut state: Vec<T> = Vec::new();

        for s in strings {
            let malformed = |reason: String| HistoryError::Malformed {
                delta: s.clone(),
                reason,
            };
            let mut parts = s.split(':');
            let mut number = |name: &str| -> Result<u64, HistoryError> {
                parts
                    .next()
                    .ok_or_else(|| malformed(format!("missing {name}")))?
                    .parse::<u64>()
                    .map_err(|e| malformed(format!("{name}: {e}")))
            };
            let block = number("block")?;
            let start = number("start")?;
            let len = number("len")?;
            let data = parts
                .map(|p| p.parse::<T>().map_err(|e| malformed(e.to_string())))
                .collect::<Result<Vec<_>, _>>()?;

            if deltas.last().is_some_and(|d| d.block > block) {
                return Err(HistoryError::OutOfOrder { block });
            }
            let range = usize::try_from(start)
                .ok()
                .zip(usize::try_from(len).ok())
                .and_then(|(start, len)| Some((start, start.checked_add(len)?)))
                .filter(|(_, end)| *end <= state.len());
            let Some((start, end)) = range else {
                return Err(HistoryError::OutOfRange {
                    block,
                    start: usize::try_from(start).unwrap_or(usize::MAX),
                    end: usize::try_from(start.saturating_add(len)).unwrap_or(usize::MAX),
                    len: state.len(),
                });
            };
            let delta = Delta {
                block,
                start,
                len: end - start,
                data,
            };
            delta.apply(&mut state);
            deltas.push(delta);
        }
        Ok(Self { deltas })
    }
}
