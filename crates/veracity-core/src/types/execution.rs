use alloy_primitives::{b256, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// An Ethereum account as stored in the state trie.
/// Verified via Merkle-Patricia trie proofs against a known state root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    /// Number of transactions sent from this account.
    pub nonce: u64,
    /// Balance in wei.
    pub balance: U256,
    /// Root hash of the account's storage trie.
    /// For externally owned accounts (EOAs), this is the empty trie root.
    pub storage_root: B256,
    /// Keccak256 hash of the account's code.
    /// For EOAs, this is the hash of the empty string.
    pub code_hash: B256,
}

impl AccountState {
    /// The keccak256 hash of empty bytes, the code hash of every EOA.
    pub const EMPTY_CODE_HASH: B256 =
        b256!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470");

    /// The root of an empty Merkle-Patricia trie.
    pub const EMPTY_STORAGE_ROOT: B256 =
        b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

    /// State of an account that is not in the trie.
    pub fn empty() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            storage_root: Self::EMPTY_STORAGE_ROOT,
            code_hash: Self::EMPTY_CODE_HASH,
        }
    }

    /// Empty in the EIP-161 sense: such accounts are absent from the trie.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0
            && self.balance.is_zero()
            && self.code_hash == Self::EMPTY_CODE_HASH
            && self.storage_root == Self::EMPTY_STORAGE_ROOT
    }

    /// Check if this is a contract account (has code deployed).
    pub fn is_contract(&self) -> bool {
        self.code_hash != Self::EMPTY_CODE_HASH
    }
}

/// A transaction receipt decoded from the receipts trie.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    /// EIP-2718 type, 0 for legacy receipts.
    pub tx_type: u8,
    /// Post-Byzantium status (1 success, 0 failure).
    pub status: Option<u8>,
    /// Pre-Byzantium intermediate state root.
    pub root: Option<B256>,
    /// Cumulative gas used in the block up to and including this transaction.
    pub cumulative_gas_used: u64,
    /// Bloom filter over the logs' addresses and topics.
    pub logs_bloom: Bytes,
    /// The logs emitted by this transaction.
    pub logs: Vec<Log>,
}

/// A log entry emitted by a smart contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// Address of the contract that emitted the log.
    pub address: Address,
    /// Indexed topics (up to 4, first is usually the event signature hash).
    pub topics: Vec<B256>,
    /// Non-indexed data.
    pub data: Bytes,
}
