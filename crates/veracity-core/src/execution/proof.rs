use alloy_primitives::B256;
use thiserror::Error;
use tiny_keccak::{Hasher, Keccak};

use crate::execution::rlp::{decode_item, decode_list, Item};
use crate::types::execution::AccountState;

/// Errors during Merkle-Patricia trie proof verification.
/// Each variant is specific enough to diagnose exactly what went wrong.
#[derive(Debug, Error)]
pub enum ProofError {
    #[error("Empty proof: no trie nodes provided")]
    EmptyProof,

    #[error("Invalid RLP encoding in proof node {index}: {source}")]
    InvalidRlp {
        index: usize,
        #[source]
        source: alloy_rlp::Error,
    },

    #[error("Hash mismatch at proof node {index}: computed {computed}, expected {expected}")]
    HashMismatch {
        index: usize,
        computed: B256,
        expected: B256,
    },

    #[error("Key mismatch at proof node {index}: the path diverges from the proved key")]
    KeyMismatch { index: usize },

    #[error("Proof has {extra} unused node(s) after the value was reached")]
    ExtraNodes { extra: usize },

    #[error("Invalid trie node at proof node {index}: {node_type}")]
    InvalidNodeType { index: usize, node_type: String },

    #[error("Proof incomplete: {consumed} of {total} node(s) consumed without reaching the key")]
    IncompleteProof { consumed: usize, total: usize },

    #[error("Proved value does not match the expected value")]
    ValueMismatch,

    #[error("Invalid account RLP encoding: {reason}")]
    InvalidAccountEncoding { reason: String },

    #[error("Code does not match code hash {expected}")]
    CodeHashMismatch { expected: B256 },
}

/// Compute keccak256 hash of data.
pub fn keccak256(data: &[u8]) -> B256 {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    B256::from(output)
}

/// Split bytes into nibbles (4 bits each), high nibble first.
pub fn to_nibbles(bytes: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(bytes.len() * 2);
    for byte in bytes {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }
    nibbles
}

/// Decode compact (hex-prefix) encoding used in trie nodes.
/// Returns (nibbles, is_leaf), or `None` if the flag nibble is invalid.
pub fn decode_compact_path(encoded: &[u8]) -> Option<(Vec<u8>, bool)> {
    let first = *encoded.first()?;
    let flag = first >> 4;
    if flag > 3 {
        return None;
    }
    let is_leaf = flag >= 2;
    let is_odd = flag % 2 == 1;

    let mut nibbles = Vec::with_capacity(encoded.len() * 2);
    if is_odd {
        nibbles.push(first & 0x0F);
    } else if first & 0x0F != 0 {
        return None;
    }
    nibbles.extend(to_nibbles(&encoded[1..]));
    Some((nibbles, is_leaf))
}

/// Hex-prefix encode a nibble path.
pub fn encode_compact_path(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
    let flag = if is_leaf { 2 } else { 0 };
    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    let rest = if nibbles.len() % 2 == 1 {
        out.push(((flag + 1) << 4) | nibbles[0]);
        &nibbles[1..]
    } else {
        out.push(flag << 4);
        nibbles
    };
    for pair in rest.chunks(2) {
        out.push((pair[0] << 4) | pair[1]);
    }
    out
}

/// Where a walk down the trie ended.
enum Walk {
    Found(Vec<u8>),
    /// The key is not in the trie. `diverged` names the node whose partial
    /// key did not match, if that is how the walk ended.
    Absent { diverged: Option<usize> },
}

enum NodeRef<'a> {
    Hash(B256),
    Inline(&'a [u8]),
}

fn child_ref<'a>(item: &Item<'a>, index: usize) -> Result<Option<NodeRef<'a>>, ProofError> {
    match item {
        Item::Bytes(b) if b.is_empty() => Ok(None),
        Item::Bytes(b) if b.len() == 32 => Ok(Some(NodeRef::Hash(B256::from_slice(b)))),
        Item::List(raw) if raw.len() < 32 => Ok(Some(NodeRef::Inline(raw))),
        _ => Err(ProofError::InvalidNodeType {
            index,
            node_type: "child reference is neither a hash nor an inline node".to_string(),
        }),
    }
}

/// Walk the trie from `root` along `path`, checking every hashed node.
fn walk(root: B256, path: &[u8], proof: &[impl AsRef<[u8]>]) -> Result<Walk, ProofError> {
    if proof.is_empty() {
        // Nothing to walk: only the empty trie proves absence without nodes
        if root == AccountState::EMPTY_STORAGE_ROOT {
            return Ok(Walk::Absent { diverged: None });
        }
        return Err(ProofError::EmptyProof);
    }

    let nibbles = to_nibbles(path);
    let mut pos = 0usize;
    let mut consumed = 0usize;
    let mut next = NodeRef::Hash(root);

    let outcome = loop {
        // The index used in errors is the last hashed node, which also
        // contains any inline node being looked at.
        let (node, index): (&[u8], usize) = match next {
            NodeRef::Hash(expected) => {
                let node = proof
                    .get(consumed)
                    .ok_or(ProofError::IncompleteProof {
                        consumed,
                        total: proof.len(),
                    })?
                    .as_ref();
                let computed = keccak256(node);
                if computed != expected {
                    return Err(ProofError::HashMismatch {
                        index: consumed,
                        computed,
                        expected,
                    });
                }
                consumed += 1;
                (node, consumed - 1)
            }
            NodeRef::Inline(raw) => (raw, consumed.saturating_sub(1)),
        };

        let (item, len) =
            decode_item(node).map_err(|source| ProofError::InvalidRlp { index, source })?;
        if len != node.len() {
            return Err(ProofError::InvalidRlp {
                index,
                source: alloy_rlp::Error::UnexpectedLength,
            });
        }
        let raw = match item {
            Item::Bytes(b) if b.is_empty() => break Walk::Absent { diverged: None },
            Item::Bytes(_) => {
                return Err(ProofError::InvalidNodeType {
                    index,
                    node_type: "byte string".to_string(),
                })
            }
            Item::List(raw) => raw,
        };
        let items = decode_list(raw).map_err(|source| ProofError::InvalidRlp { index, source })?;

        match items.len() {
            17 => {
                // Branch node: 16 children + value
                if pos == nibbles.len() {
                    let value = items[16]
                        .as_bytes()
                        .map_err(|source| ProofError::InvalidRlp { index, source })?;
                    if value.is_empty() {
                        break Walk::Absent { diverged: None };
                    }
                    break Walk::Found(value.to_vec());
                }
                let child = &items[nibbles[pos] as usize];
                pos += 1;
                match child_ref(child, index)? {
                    Some(r) => next = r,
                    None => break Walk::Absent { diverged: None },
                }
            }
            2 => {
                // Extension or leaf node
                let encoded = items[0]
                    .as_bytes()
                    .map_err(|source| ProofError::InvalidRlp { index, source })?;
                let (partial, is_leaf) =
                    decode_compact_path(encoded).ok_or_else(|| ProofError::InvalidNodeType {
                        index,
                        node_type: "invalid hex-prefix flag".to_string(),
                    })?;
                let remaining = &nibbles[pos..];

                if is_leaf {
                    if remaining != partial.as_slice() {
                        break Walk::Absent {
                            diverged: Some(index),
                        };
                    }
                    let value = items[1]
                        .as_bytes()
                        .map_err(|source| ProofError::InvalidRlp { index, source })?;
                    break Walk::Found(value.to_vec());
                }

                if !remaining.starts_with(&partial) {
                    break Walk::Absent {
                        diverged: Some(index),
                    };
                }
                pos += partial.len();
                next = child_ref(&items[1], index)?.ok_or_else(|| {
                    ProofError::InvalidNodeType {
                        index,
                        node_type: "extension without child".to_string(),
                    }
                })?;
            }
            n => {
                return Err(ProofError::InvalidNodeType {
                    index,
                    node_type: format!("{n}-element list"),
                });
            }
        }
    };

    if consumed < proof.len() {
        return Err(ProofError::ExtraNodes {
            extra: proof.len() - consumed,
        });
    }
    Ok(outcome)
}

/// Verify a proof and return the value stored at `path`, or `None` if the
/// proof shows the key is absent.
pub fn read_merkle_proof(
    root: B256,
    path: &[u8],
    proof: &[impl AsRef<[u8]>],
) -> Result<Option<Vec<u8>>, ProofError> {
    match walk(root, path, proof)? {
        Walk::Found(value) => Ok(Some(value)),
        Walk::Absent { .. } => Ok(None),
    }
}

/// Verify that `proof` commits `expected` at `path` under `root`.
///
/// `expected = None` asks for a non-existence proof. A partial key that does
/// not match the path is only accepted in that case.
pub fn verify_merkle_proof(
    root: B256,
    path: &[u8],
    proof: &[impl AsRef<[u8]>],
    expected: Option<&[u8]>,
) -> Result<Option<Vec<u8>>, ProofError> {
    match (walk(root, path, proof)?, expected) {
        (Walk::Found(value), Some(expected)) if value == expected => Ok(Some(value)),
        (Walk::Found(_), _) => Err(ProofError::ValueMismatch),
        (Walk::Absent { diverged: Some(index) }, Some(_)) => Err(ProofError::KeyMismatch { index }),
        (Walk::Absent { diverged: None }, Some(_)) => Err(ProofError::ValueMismatch),
        (Walk::Absent { .. }, None) => Ok(None),
    }
}
