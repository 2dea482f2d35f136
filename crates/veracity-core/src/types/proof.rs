use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::encoding::quantity;

/// Which verification routine a proof is meant for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProofKind {
    TransactionProof,
    ReceiptProof,
    BlockProof,
    AccountProof,
    CallProof,
    LogProof,
}

/// The proof object a server attaches in `in3.proof`.
///
/// Which optional fields are required depends on [`ProofKind`]; the
/// verifiers check presence themselves and report what is missing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(rename = "type")]
    pub kind: ProofKind,
    /// RLP-encoded block header the proof is anchored in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<Bytes>,
    /// RLP-encoded headers following `block`, each the child of the previous.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finality_blocks: Vec<Bytes>,
    /// Full transaction objects, for hash-only block bodies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions: Option<Vec<Value>>,
    /// RLP-encoded uncle headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncles: Option<Vec<Bytes>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merkle_proof: Vec<Bytes>,
    /// Transaction inclusion proof backing a receipt proof.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tx_proof: Vec<Bytes>,
    /// Keyed by block number in hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_proof: Option<BTreeMap<String, LogProofBlock>>,
    /// Keyed by address in hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accounts: Option<BTreeMap<String, AccountProofEntry>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "quantity::opt"
    )]
    pub tx_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<Signature>,
}

impl Proof {
    pub fn new(kind: ProofKind) -> Self {
        Self {
            kind,
            block: None,
            finality_blocks: Vec::new(),
            transactions: None,
            uncles: None,
            merkle_proof: Vec::new(),
            tx_proof: Vec::new(),
            log_proof: None,
            accounts: None,
            tx_index: None,
            signatures: Vec::new(),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

/// One block's worth of log proof data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogProofBlock {
    pub block: Bytes,
    /// Keyed by transaction hash in hex.
    pub receipts: BTreeMap<String, LogProofReceipt>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogProofReceipt {
    pub tx_hash: B256,
    #[serde(with = "quantity")]
    pub tx_index: u64,
    /// Receipt inclusion proof.
    pub proof: Vec<Bytes>,
    /// Transaction inclusion proof at the same index.
    pub tx_proof: Vec<Bytes>,
}

/// An `eth_getProof`-style account proof.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProofEntry {
    pub address: Address,
    pub balance: U256,
    pub nonce: U256,
    pub code_hash: B256,
    pub storage_hash: B256,
    pub account_proof: Vec<Bytes>,
    #[serde(default)]
    pub storage_proof: Vec<StorageProofEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Bytes>,
}

impl AccountProofEntry {
    pub fn storage(&self, key: U256) -> Option<&StorageProofEntry> {
        self.storage_proof.iter().find(|s| s.key == key)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageProofEntry {
    pub key: U256,
    pub proof: Vec<Bytes>,
    pub value: U256,
}

/// A node's signature over a block hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    /// Claimed signer. Informational only, the signer is always recovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(with = "quantity")]
    pub block: u64,
    pub block_hash: B256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_hash: Option<B256>,
    pub r: U256,
    pub s: U256,
    #[serde(with = "quantity")]
    pub v: u64,
}
