//! Fixtures shared by the unit tests: signing keys, headers, block bodies
//! with their tries, and state proofs.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, B256, U256};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use serde_json::{json, Value};

use crate::consensus::header::{
    BlockHeader, COINBASE, EXTRA_DATA, PARENT_HASH, RECEIPTS_ROOT, SEAL_START, STATE_ROOT,
    TRANSACTIONS_ROOT,
};
use crate::consensus::signature::{node_message_hash, public_key_to_address};
use crate::execution::account::encode_account;
use crate::execution::proof::keccak256;
use crate::execution::receipt::encode_receipt;
use crate::execution::rlp::{encode_bytes, encode_u64};
use crate::execution::transaction::{encode_transaction, transaction_hash};
use crate::execution::trie::Trie;
use crate::types::encoding::quantity_bytes;
use crate::types::execution::AccountState;
use crate::types::proof::{AccountProofEntry, Proof, Signature, StorageProofEntry};
use crate::types::rpc::RpcResponse;

pub fn signing_key(n: u8) -> SecretKey {
    SecretKey::from_slice(&[n; 32]).unwrap()
}

pub fn signer_address(key: &SecretKey) -> Address {
    public_key_to_address(PublicKey::from_secret_key(SECP256K1, key))
}

/// `r || s || v` with `v` in 0/1.
pub fn sign(key: &SecretKey, msg: B256) -> [u8; 65] {
    let message = Message::from_digest(msg.0);
    let (id, compact) = SECP256K1
        .sign_ecdsa_recoverable(&message, key)
        .serialize_compact();
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&compact);
    out[64] = id.to_i32() as u8;
    out
}

/// A node's signature over a block, as servers attach it.
pub fn node_signature(key: &SecretKey, block_hash: B256, number: u64) -> Signature {
    let msg = node_message_hash(block_hash, number);
    let sig = sign(key, msg);
    Signature {
        address: Some(signer_address(key)),
        block: number,
        block_hash,
        msg_hash: Some(msg),
        r: U256::from_be_slice(&sig[..32]),
        s: U256::from_be_slice(&sig[32..64]),
        v: u64::from(sig[64]) + 27,
    }
}

pub fn bytes_list(nodes: Vec<Vec<u8>>) -> Vec<Bytes> {
    nodes.into_iter().map(Bytes::from).collect()
}

fn quantity(n: u64) -> Bytes {
    Bytes::from(quantity_bytes(U256::from(n)))
}

fn hash_field(byte: u8) -> Bytes {
    Bytes::from(vec![byte; 32])
}

/// Header fields for block `number` with `trailing` post-London fields.
/// Quantities are minimal so the JSON form converts back byte-for-byte.
pub fn header_fields(number: u64, trailing: usize) -> Vec<Bytes> {
    let mut fields = vec![
        hash_field(0x11),
        Bytes::copy_from_slice(keccak256(&[0xc0]).as_slice()),
        Bytes::from(vec![0x33; 20]),
        hash_field(0x44),
        Bytes::copy_from_slice(Trie::new().root().as_slice()),
        Bytes::copy_from_slice(Trie::new().root().as_slice()),
        Bytes::from(vec![0u8; 256]),
        quantity(2),
        quantity(number),
        quantity(30_000_000),
        quantity(0),
        quantity(1_700_000_000 + number),
        Bytes::new(),
        hash_field(0x22),
        Bytes::from(vec![0u8; 8]),
    ];
    let optional = [
        quantity(7),
        hash_field(0x55),
        quantity(0),
        quantity(0),
        hash_field(0x66),
        hash_field(0x77),
    ];
    fields.extend(optional.into_iter().take(trailing));
    fields
}

fn hex_quantity(raw: &[u8]) -> Value {
    json!(format!("0x{:x}", U256::from_be_slice(raw)))
}

/// The JSON-RPC block object for `header`.
pub fn block_json(header: &BlockHeader, transactions: &[Value]) -> Value {
    let f = header.fields();
    let mut block = json!({
        "hash": header.hash(),
        "parentHash": f[0],
        "sha3Uncles": f[1],
        "miner": f[2],
        "stateRoot": f[3],
        "transactionsRoot": f[4],
        "receiptsRoot": f[5],
        "logsBloom": f[6],
        "difficulty": hex_quantity(&f[7]),
        "number": hex_quantity(&f[8]),
        "gasLimit": hex_quantity(&f[9]),
        "gasUsed": hex_quantity(&f[10]),
        "timestamp": hex_quantity(&f[11]),
        "extraData": f[12],
        "mixHash": f[13],
        "nonce": f[14],
        "transactions": transactions,
        "uncles": [],
    });
    let names = [
        "baseFeePerGas",
        "withdrawalsRoot",
        "blobGasUsed",
        "excessBlobGas",
        "parentBeaconBlockRoot",
        "requestsHash",
    ];
    for (name, raw) in names.iter().zip(&f[15..]) {
        block[*name] = if matches!(*name, "baseFeePerGas" | "blobGasUsed" | "excessBlobGas") {
            hex_quantity(raw)
        } else {
            json!(raw)
        };
    }
    block
}

/// A signed-looking transaction of the given EIP-2718 type. The signature
/// values are arbitrary; only the encoding matters here.
pub fn transaction_json(ty: u8, nonce: u64) -> Value {
    let mut tx = json!({
        "type": format!("0x{ty:x}"),
        "nonce": format!("0x{nonce:x}"),
        "gas": "0x5208",
        "to": Address::repeat_byte(0x42),
        "value": format!("0x{:x}", 1_000 + nonce),
        "input": "0x",
        "r": format!("0x{}", "1a".repeat(32)),
        "s": format!("0x{}", "2b".repeat(32)),
    });
    if ty == 0 {
        tx["gasPrice"] = json!("0x3b9aca00");
        tx["v"] = json!("0x25");
    } else {
        tx["chainId"] = json!("0x1");
        tx["yParity"] = json!("0x1");
        tx["v"] = json!("0x1");
        tx["accessList"] = json!([{
            "address": Address::repeat_byte(0x43),
            "storageKeys": [B256::repeat_byte(0x01)],
        }]);
    }
    if ty == 1 {
        tx["gasPrice"] = json!("0x3b9aca00");
    }
    if ty >= 2 {
        tx["maxPriorityFeePerGas"] = json!("0x1");
        tx["maxFeePerGas"] = json!("0x3b9aca00");
    }
    if ty == 3 {
        tx["maxFeePerBlobGas"] = json!("0x2");
        tx["blobVersionedHashes"] = json!([B256::repeat_byte(0x01)]);
    }
    tx["hash"] = json!(transaction_hash(&tx).unwrap());
    tx
}

/// A successful receipt with `n_logs` logs.
pub fn receipt_json(ty: u8, cumulative_gas: u64, n_logs: usize) -> Value {
    let logs: Vec<Value> = (0..n_logs)
        .map(|i| {
            json!({
                "address": Address::repeat_byte(0x10 + i as u8),
                "topics": [B256::repeat_byte(0xa0 + i as u8), B256::with_last_byte(ty)],
                "data": Bytes::from(vec![i as u8; 4 + i]),
            })
        })
        .collect();
    json!({
        "type": format!("0x{ty:x}"),
        "status": "0x1",
        "cumulativeGasUsed": format!("0x{cumulative_gas:x}"),
        "logsBloom": Bytes::from(vec![0u8; 256]),
        "logs": logs,
    })
}

/// A block with `tx_count` transactions of rotating types, its receipts
/// and both tries. JSON objects carry their block context.
pub struct BlockFixture {
    pub header: BlockHeader,
    pub transactions: Vec<Value>,
    pub receipts: Vec<Value>,
    pub tx_trie: Trie,
    pub receipt_trie: Trie,
}

impl BlockFixture {
    pub fn tx_proof(&self, index: usize) -> Vec<Bytes> {
        bytes_list(self.tx_trie.proof(&encode_u64(index as u64)))
    }

    pub fn receipt_proof(&self, index: usize) -> Vec<Bytes> {
        bytes_list(self.receipt_trie.proof(&encode_u64(index as u64)))
    }

    pub fn hash(&self) -> B256 {
        self.header.hash()
    }

    /// The block as `eth_getBlockBy*` returns it.
    pub fn block(&self, full: bool) -> Value {
        let transactions: Vec<Value> = if full {
            self.transactions.clone()
        } else {
            self.transactions.iter().map(|tx| tx["hash"].clone()).collect()
        };
        block_json(&self.header, &transactions)
    }
}

pub fn block_fixture(number: u64, tx_count: usize) -> BlockFixture {
    let mut transactions: Vec<Value> = (0..tx_count)
        .map(|i| transaction_json((i % 4) as u8, i as u64))
        .collect();
    let mut receipts: Vec<Value> = (0..tx_count)
        .map(|i| receipt_json((i % 4) as u8, 21_000 * (i as u64 + 1), 1 + i % 2))
        .collect();

    let tx_trie = Trie::from_ordered(transactions.iter().map(|tx| encode_transaction(tx).unwrap()));
    let receipt_trie = Trie::from_ordered(receipts.iter().map(|r| encode_receipt(r).unwrap()));

    let mut fields = header_fields(number, 1);
    fields[TRANSACTIONS_ROOT] = Bytes::copy_from_slice(tx_trie.root().as_slice());
    fields[RECEIPTS_ROOT] = Bytes::copy_from_slice(receipt_trie.root().as_slice());
    let header = BlockHeader::from_fields(fields).unwrap();
    let block_hash = header.hash();

    let mut log_index = 0u64;
    for (i, (tx, receipt)) in transactions.iter_mut().zip(receipts.iter_mut()).enumerate() {
        let context = json!({
            "blockHash": block_hash,
            "blockNumber": format!("0x{number:x}"),
            "transactionIndex": format!("0x{i:x}"),
        });
        for (key, value) in context.as_object().unwrap() {
            tx[key] = value.clone();
            receipt[key] = value.clone();
        }
        receipt["transactionHash"] = tx["hash"].clone();
        let tx_hash = tx["hash"].clone();
        for (position, log) in receipt["logs"].as_array_mut().unwrap().iter_mut().enumerate() {
            for (key, value) in context.as_object().unwrap() {
                log[key] = value.clone();
            }
            log["transactionHash"] = tx_hash.clone();
            log["logIndex"] = json!(format!("0x{log_index:x}"));
            log["transactionLogIndex"] = json!(format!("0x{position:x}"));
            log_index += 1;
        }
    }

    BlockFixture {
        header,
        transactions,
        receipts,
        tx_trie,
        receipt_trie,
    }
}

/// A state trie built from a handful of accounts.
#[derive(Default)]
pub struct StateFixture {
    accounts: BTreeMap<Address, (AccountState, Trie, BTreeMap<U256, U256>, Option<Bytes>)>,
}

impl StateFixture {
    /// Add an account. The storage root, and the code hash when `code` is
    /// given, are computed from the arguments.
    pub fn add(
        &mut self,
        address: Address,
        mut account: AccountState,
        storage: &[(U256, U256)],
        code: Option<Bytes>,
    ) {
        let mut trie = Trie::new();
        for (slot, value) in storage {
            trie.insert(
                keccak256(&slot.to_be_bytes::<32>()).as_slice(),
                encode_bytes(&quantity_bytes(*value)),
            );
        }
        account.storage_root = trie.root();
        if let Some(code) = &code {
            account.code_hash = keccak256(code);
        }
        self.accounts.insert(
            address,
            (account, trie, storage.iter().copied().collect(), code),
        );
    }

    pub fn trie(&self) -> Trie {
        let mut trie = Trie::new();
        for (address, (account, ..)) in &self.accounts {
            trie.insert(keccak256(address.as_slice()).as_slice(), encode_account(account));
        }
        trie
    }

    pub fn root(&self) -> B256 {
        self.trie().root()
    }

    /// The `eth_getProof` entry for `address` covering `slots`. Unknown
    /// addresses get an empty account with a non-existence proof.
    pub fn entry(&self, address: Address, slots: &[U256]) -> AccountProofEntry {
        let state = self.trie();
        let account_proof = bytes_list(state.proof(keccak256(address.as_slice()).as_slice()));
        let Some((account, storage_trie, storage, code)) = self.accounts.get(&address) else {
            return AccountProofEntry {
                address,
                balance: U256::ZERO,
                nonce: U256::ZERO,
                code_hash: AccountState::EMPTY_CODE_HASH,
                storage_hash: AccountState::EMPTY_STORAGE_ROOT,
                account_proof,
                storage_proof: Vec::new(),
                code: None,
            };
        };
        let storage_proof = slots
            .iter()
            .map(|slot| StorageProofEntry {
                key: *slot,
                proof: bytes_list(storage_trie.proof(keccak256(&slot.to_be_bytes::<32>()).as_slice())),
                value: storage.get(slot).copied().unwrap_or_default(),
            })
            .collect();
        AccountProofEntry {
            address,
            balance: account.balance,
            nonce: U256::from(account.nonce),
            code_hash: account.code_hash,
            storage_hash: account.storage_root,
            account_proof,
            storage_proof,
            code: code.clone(),
        }
    }

    /// A header for block `number` committing to this state.
    pub fn header(&self, number: u64) -> BlockHeader {
        let mut fields = header_fields(number, 1);
        fields[STATE_ROOT] = Bytes::copy_from_slice(self.root().as_slice());
        BlockHeader::from_fields(fields).unwrap()
    }
}

pub struct AccountFixture {
    pub state_root: B256,
    pub entry: AccountProofEntry,
    pub trie: Trie,
}

/// A single-account state proving `slots` of its storage.
pub fn account_fixture(
    address: Address,
    account: AccountState,
    storage: &[(U256, U256)],
    slots: &[U256],
) -> AccountFixture {
    let mut state = StateFixture::default();
    state.add(address, account, storage, None);
    AccountFixture {
        state_root: state.root(),
        entry: state.entry(address, slots),
        trie: state.trie(),
    }
}

/// Seal `fields` as an authority-round block at `step`.
pub fn seal_aura(key: &SecretKey, mut fields: Vec<Bytes>, step: u64) -> BlockHeader {
    fields[SEAL_START] = quantity(step);
    fields[SEAL_START + 1] = Bytes::from(vec![0u8; 65]);
    let unsealed = BlockHeader::from_fields(fields.clone()).unwrap();
    fields[SEAL_START + 1] = Bytes::copy_from_slice(&sign(key, unsealed.bare_hash()));
    BlockHeader::from_fields(fields).unwrap()
}

pub fn aura_header(key: &SecretKey, number: u64, step: u64, parent: B256) -> BlockHeader {
    let mut fields = header_fields(number, 0);
    fields[PARENT_HASH] = Bytes::copy_from_slice(parent.as_slice());
    seal_aura(key, fields, step)
}

/// A clique block: 32 bytes of vanity followed by the seal. `coinbase` and
/// `nonce` carry a vote.
pub fn clique_header(
    key: &SecretKey,
    number: u64,
    parent: B256,
    coinbase: Address,
    nonce: [u8; 8],
) -> BlockHeader {
    let mut fields = header_fields(number, 0);
    fields[PARENT_HASH] = Bytes::copy_from_slice(parent.as_slice());
    fields[COINBASE] = Bytes::copy_from_slice(coinbase.as_slice());
    fields[SEAL_START + 1] = Bytes::copy_from_slice(&nonce);
    let vanity = vec![0u8; 32];
    fields[EXTRA_DATA] = Bytes::from(vanity.clone());
    let unsealed = BlockHeader::from_fields(fields).unwrap();
    let mut extra = vanity;
    extra.extend_from_slice(&sign(key, unsealed.hash()));
    unsealed.with_extra_data(Bytes::from(extra))
}

/// ABI encoding of a single `address[]` argument.
pub fn abi_address_array(addresses: &[Address]) -> Vec<u8> {
    let mut out = U256::from(32).to_be_bytes::<32>().to_vec();
    out.extend_from_slice(&U256::from(addresses.len()).to_be_bytes::<32>());
    for address in addresses {
        out.extend_from_slice(&[0u8; 12]);
        out.extend_from_slice(address.as_slice());
    }
    out
}

pub fn respond(result: Value, proof: &Proof) -> RpcResponse {
    RpcResponse::success(1, result).with_proof(serde_json::to_value(proof).unwrap())
}
