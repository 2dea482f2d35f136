//! Trie that keeps every key/value pair and encodes nodes on demand, so it
//! can produce a proof for any key.

use std::collections::BTreeMap;

use alloy_primitives::B256;

use crate::execution::proof::{encode_compact_path, keccak256, to_nibbles};
use crate::execution::rlp::{encode_bytes, encode_list, encode_u64};
use crate::types::execution::AccountState;

#[derive(Clone, Debug, Default)]
pub struct Trie {
    /// Nibble path to value.
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    /// A trie keyed by `rlp(index)`, as used for transactions and receipts.
    pub fn from_ordered<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut trie = Self::new();
        for (i, value) in values.into_iter().enumerate() {
            trie.insert(&encode_u64(i as u64), value);
        }
        trie
    }

    /// Insert a value. An empty value removes the key.
    pub fn insert(&mut self, key: &[u8], value: Vec<u8>) {
        let path = to_nibbles(key);
        if value.is_empty() {
            self.entries.remove(&path);
        } else {
            self.entries.insert(path, value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn root(&self) -> B256 {
        if self.entries.is_empty() {
            return AccountState::EMPTY_STORAGE_ROOT;
        }
        let entries: Vec<(&[u8], &[u8])> = self.entries_vec();
        keccak256(&encode_node(&entries, 0, None, &mut Vec::new()))
    }

    /// Nodes from the root towards `key`, root first. Inline nodes are
    /// part of their parent and not listed separately.
    pub fn proof(&self, key: &[u8]) -> Vec<Vec<u8>> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        let target = to_nibbles(key);
        let entries = self.entries_vec();
        let mut nodes = Vec::new();
        let root = encode_node(&entries, 0, Some(&target), &mut nodes);
        // Post-order collection: the root was encoded last
        if root.len() < 32 {
            nodes.push(root);
        }
        nodes.reverse();
        nodes
    }

    fn entries_vec(&self) -> Vec<(&[u8], &[u8])> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect()
    }
}

/// RLP-encode the node covering `entries`, all of which share the first
/// `depth` nibbles. Hashed nodes on the path to `target` are pushed to
/// `proof` children first.
fn encode_node(
    entries: &[(&[u8], &[u8])],
    depth: usize,
    target: Option<&[u8]>,
    proof: &mut Vec<Vec<u8>>,
) -> Vec<u8> {
    let node = if let [(key, value)] = entries {
        encode_list(&[
            encode_bytes(&encode_compact_path(&key[depth..], true)),
            encode_bytes(value),
        ])
    } else {
        let shared = common_prefix(entries, depth);
        if shared > 0 {
            let prefix = &entries[0].0[depth..depth + shared];
            let on_path = target.filter(|t| t.len() >= depth + shared && &t[depth..depth + shared] == prefix);
            let child = encode_node(entries, depth + shared, on_path, proof);
            encode_list(&[
                encode_bytes(&encode_compact_path(prefix, false)),
                child_reference(child),
            ])
        } else {
            encode_branch(entries, depth, target, proof)
        }
    };

    if target.is_some() && node.len() >= 32 {
        proof.push(node.clone());
    }
    node
}

fn encode_branch(
    entries: &[(&[u8], &[u8])],
    depth: usize,
    target: Option<&[u8]>,
    proof: &mut Vec<Vec<u8>>,
) -> Vec<u8> {
    let mut items = Vec::with_capacity(17);
    let mut value = encode_bytes(&[]);
    let mut rest = entries;

    // Sorted keys: a key ending here sorts before all its extensions
    if let Some(((key, v), tail)) = rest.split_first() {
        if key.len() == depth {
            value = encode_bytes(v);
            rest = tail;
        }
    }

    for nibble in 0..16u8 {
        let end = rest.partition_point(|(k, _)| k[depth] <= nibble);
        let (group, tail) = rest.split_at(end);
        rest = tail;
        if group.is_empty() {
            items.push(encode_bytes(&[]));
            continue;
        }
        let on_path = target.filter(|t| t.get(depth) == Some(&nibble));
        let child = encode_node(group, depth + 1, on_path, proof);
        items.push(child_reference(child));
    }
    items.push(value);
    encode_list(&items)
}

fn common_prefix(entries: &[(&[u8], &[u8])], depth: usize) -> usize {
    let first = entries[0].0;
    let mut len = first.len() - depth;
    for (key, _) in &entries[1..] {
        len = len.min(key.len() - depth);
        len = first[depth..depth + len]
            .iter()
            .zip(&key[depth..depth + len])
            .take_while(|(a, b)| a == b)
            .count();
    }
    len
}

/// Children shorter than a hash are embedded in their parent.
fn child_reference(node: Vec<u8>) -> Vec<u8> {
    if node.len() < 32 {
        node
    } else {
        encode_bytes(keccak256(&node).as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_empty_root() {
        assert_eq!(Trie::new().root(), AccountState::EMPTY_STORAGE_ROOT);
    }

    #[test]
    fn test_known_root() {
        let mut trie = Trie::new();
        trie.insert(b"do", b"verb".to_vec());
        trie.insert(b"horse", b"stallion".to_vec());
        trie.insert(b"doge", b"coin".to_vec());
        trie.insert(b"dog", b"puppy".to_vec());
        assert_eq!(
            trie.root(),
            B256::from(hex!("5991bb8c6514148a29db676a14ac506cd2cd5775ace63c30a4fe457715e9ac84"))
        );
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let values: Vec<Vec<u8>> = (0..200u32).map(|i| i.to_be_bytes().to_vec()).collect();
        let ordered = Trie::from_ordered(values.clone());

        let mut reversed = Trie::new();
        for (i, v) in values.iter().enumerate().rev() {
            reversed.insert(&encode_u64(i as u64), v.clone());
        }
        assert_eq!(ordered.root(), reversed.root());
    }

    #[test]
    fn test_empty_value_removes_key() {
        let mut trie = Trie::new();
        trie.insert(b"a", b"1".to_vec());
        let root = trie.root();
        trie.insert(b"b", b"2".to_vec());
        trie.insert(b"b", Vec::new());
        assert_eq!(trie.root(), root);
    }

    #[test]
    fn test_proof_starts_at_root() {
        let trie = Trie::from_ordered((0..50u8).map(|i| vec![i; 40]));
        let proof = trie.proof(&encode_u64(17));
        assert!(!proof.is_empty());
        assert_eq!(keccak256(&proof[0]), trie.root());
    }
}
