use std::collections::{HashMap, HashSet};
use std::fmt;

use alloy_primitives::{Address, Bytes, B256};
use schnellru::{ByLength, LruMap};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consensus::validators::{HistoryError, ValidatorSetHistory};
use crate::types::encoding::quantity;

/// Cache key under which the validator history is exported.
pub const VALIDATORS_CACHE_KEY: &str = "validators";

const DEFAULT_CODE_CACHE_ENTRIES: u32 = 256;
const DEFAULT_HEADER_CACHE_ENTRIES: u32 = 1024;

/// Closed set of chain families. Each family maps to one verifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChainFamily {
    /// Ethereum-style chains: MPT state, RLP headers.
    #[default]
    Ethereum,
    /// Chains whose answers cannot be proven. Only accepted with an
    /// explicit opt-out of verification.
    Passthrough,
}

/// The block-sealing engine, which decides how headers are signed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsensusEngine {
    /// Proof of work or proof of stake: no in-header signatures.
    #[default]
    Ethash,
    AuthorityRound,
    Clique,
}

impl ConsensusEngine {
    pub fn is_poa(&self) -> bool {
        !matches!(self, ConsensusEngine::Ethash)
    }
}

/// Static description of a chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainSpec {
    #[serde(with = "quantity")]
    pub chain_id: u64,
    pub family: ChainFamily,
    pub engine: ConsensusEngine,
    /// Node registry contract.
    pub registry: Option<Address>,
    /// Validator set at genesis for PoA chains.
    pub validators: Vec<Address>,
    /// Validator-set contract emitting `InitiateChange` for authority-round.
    pub validator_contract: Option<Address>,
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self {
            chain_id: 1,
            family: ChainFamily::Ethereum,
            engine: ConsensusEngine::Ethash,
            registry: None,
            validators: Vec::new(),
            validator_contract: None,
        }
    }
}

/// Contract code keyed by its hash. Code is only inserted after its hash
/// was proven, so a hit can stand in for the code bytes of a later proof.
pub struct CodeCache {
    entries: LruMap<B256, Bytes, ByLength>,
}

impl CodeCache {
    pub fn new(capacity: u32) -> Self {
        Self {
            entries: LruMap::new(ByLength::new(capacity)),
        }
    }

    /// Look up code, marking it as recently used.
    pub fn get(&mut self, code_hash: &B256) -> Option<&Bytes> {
        self.entries.get(code_hash).map(|code| &*code)
    }

    /// Insert code, evicting the least recently used entry when full.
    pub fn insert(&mut self, code_hash: B256, code: Bytes) {
        self.entries.insert(code_hash, code);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for CodeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeCache")
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}

/// Verified header hashes with the node signatures checked for them.
pub struct HeaderCache {
    entries: LruMap<B256, HashSet<Address>, ByLength>,
}

impl HeaderCache {
    pub fn new(capacity: u32) -> Self {
        Self {
            entries: LruMap::new(ByLength::new(capacity)),
        }
    }

    /// True if `hash` was verified with at least the given signers.
    pub fn covers(&mut self, hash: &B256, signers: &[Address]) -> bool {
        self.entries
            .get(hash)
            .is_some_and(|known| signers.iter().all(|s| known.contains(s)))
    }

    pub fn record(&mut self, hash: B256, signers: &[Address]) {
        if let Some(known) = self.entries.get_or_insert(hash, HashSet::new) {
            known.extend(signers.iter().copied());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for HeaderCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderCache")
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}

/// Mutable per-chain verification state.
///
/// Behaviour comes from the [`ChainSpec`]; the context only owns caches and
/// the validator history, which is mutated only after a verified transition.
#[derive(Debug)]
pub struct ChainContext {
    pub spec: ChainSpec,
    pub validators: ValidatorSetHistory,
    /// Block of the last validator change applied to `validators`.
    pub last_validator_change: u64,
    cache: HashMap<String, String>,
    pub code_cache: Option<CodeCache>,
    pub header_cache: Option<HeaderCache>,
}

impl ChainContext {
    pub fn new(spec: ChainSpec) -> Self {
        let mut validators = ValidatorSetHistory::new();
        if !spec.validators.is_empty() {
            validators.add_state(0, spec.validators.clone());
        }
        Self {
            spec,
            validators,
            last_validator_change: 0,
            cache: HashMap::new(),
            code_cache: Some(CodeCache::new(DEFAULT_CODE_CACHE_ENTRIES)),
            header_cache: Some(HeaderCache::new(DEFAULT_HEADER_CACHE_ENTRIES)),
        }
    }

    /// A context without typed caches.
    pub fn uncached(spec: ChainSpec) -> Self {
        Self {
            code_cache: None,
            header_cache: None,
            ..Self::new(spec)
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.spec.chain_id
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.cache.get(key).map(String::as_str)
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.cache.insert(key.into(), value.into());
    }

    /// Snapshot of the key/value cache, including the validator history
    /// as delta strings.
    pub fn export_cache(&self) -> HashMap<String, String> {
        let mut out = self.cache.clone();
        out.insert(
            VALIDATORS_CACHE_KEY.to_string(),
            self.validators.to_delta_strings().join(","),
        );
        out
    }

    /// Restore a snapshot produced by [`export_cache`](Self::export_cache).
    pub fn import_cache(&mut self, mut entries: HashMap<String, String>) -> Result<(), HistoryError> {
        if let Some(deltas) = entries.remove(VALIDATORS_CACHE_KEY) {
            let parts: Vec<String> = deltas
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            self.validators = ValidatorSetHistory::from_delta_strings(&parts)?;
            self.last_validator_change = self
                .validators
                .last_block()
                .unwrap_or_default()
                .max(self.last_validator_change);
            debug!(
                chain_id = self.spec.chain_id,
                deltas = parts.len(),
                "restored validator history"
            );
        }
        self.cache.extend(entries);
        Ok(())
    }
}
