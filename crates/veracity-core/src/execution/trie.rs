//! Roots of the index-keyed tries committing to block bodies.
//!
//! Transactions and receipts are stored under `rlp(index)`. The root is
//! built with [`HashBuilder`], which needs its leaves in key order.

use alloy_primitives::B256;
use alloy_trie::{HashBuilder, Nibbles};

#[cfg(test)]
mod memory;

#[cfg(test)]
pub(crate) use memory::Trie;

/// Position of the `i`-th leaf in key order among `len` indices.
///
/// `rlp(0)` is `0x80`, which sorts after `rlp(1)..=rlp(0x7f)`, so index 0
/// is inserted once the single-byte keys are done.
pub const fn adjust_index_for_rlp(i: usize, len: usize) -> usize {
    if i > 0x7f {
        i
    } else if i == 0x7f || i + 1 == len {
        0
    } else {
        i + 1
    }
}

/// Root of the trie mapping `rlp(i)` to `items[i]`.
pub fn ordered_trie_root<T: AsRef<[u8]>>(items: &[T]) -> B256 {
    let mut builder = HashBuilder::default();
    for i in 0..items.len() {
        let index = adjust_index_for_rlp(i, items.len());
        let key = alloy_rlp::encode(index);
        builder.add_leaf(Nibbles::unpack(&key), items[index].as_ref());
    }
    builder.root()
}
