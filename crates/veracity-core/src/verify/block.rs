use alloy_primitives::B256;
use serde_json::Value;
use tracing::trace;

use crate::consensus::header::BlockHeader;
use crate::execution::proof::keccak256;
use crate::execution::rlp::encode_list;
use crate::execution::transaction::encode_transaction;
use crate::execution::trie::ordered_trie_root;
use crate::types::chain::ChainContext;
use crate::types::encoding::{field, field_b256, field_u64, value_bytes};
use crate::types::proof::Proof;
use crate::types::rpc::{RpcRequest, RpcResponse};
use crate::verify::{check_block_param, check_header, mismatch, param_b256, VerifyError};

fn as_hash(value: &Value, name: &'static str) -> Result<B256, VerifyError> {
    let bytes = value_bytes(value, name)?;
    if bytes.len() != 32 {
        return Err(mismatch(name, "a 32-byte hash", value));
    }
    Ok(B256::from_slice(&bytes))
}

/// Recompute the transactions root from full bodies, checking each body's
/// own hash and block context along the way.
fn verify_bodies(
    transactions: &[Value],
    header: &BlockHeader,
    block_hash: B256,
    listed_hashes: Option<&[B256]>,
) -> Result<(), VerifyError> {
    if let Some(hashes) = listed_hashes {
        if hashes.len() != transactions.len() {
            return Err(mismatch("transaction count", hashes.len(), transactions.len()));
        }
    }
    let mut encoded = Vec::with_capacity(transactions.len());
    for (i, tx) in transactions.iter().enumerate() {
        let raw = encode_transaction(tx)?;
        let hash = keccak256(&raw);
        if tx.get("hash").is_some_and(|h| !h.is_null()) && field_b256(tx, "hash")? != hash {
            return Err(mismatch("transaction hash", hash, &tx["hash"]));
        }
        if let Some(listed) = listed_hashes.and_then(|h| h.get(i)) {
            if *listed != hash {
                return Err(mismatch("transaction hash", hash, listed));
            }
        }
        if tx.get("blockHash").is_some_and(|h| !h.is_null()) && field_b256(tx, "blockHash")? != block_hash {
            return Err(mismatch("transaction blockHash", block_hash, &tx["blockHash"]));
        }
        if tx.get("transactionIndex").is_some_and(|h| !h.is_null())
            && field_u64(tx, "transactionIndex")? != i as u64
        {
            return Err(mismatch("transactionIndex", i, &tx["transactionIndex"]));
        }
        encoded.push(raw);
    }
    let root = ordered_trie_root(&encoded);
    if root != header.transactions_root() {
        return Err(mismatch("transactions root", header.transactions_root(), root));
    }
    Ok(())
}

/// Uncle headers must hash to the listed uncles and together to
/// `sha3Uncles`.
fn verify_uncles(block: &Value, header: &BlockHeader, proof: &Proof) -> Result<(), VerifyError> {
    let listed = match block.get("uncles") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|u| as_hash(u, "uncles"))
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => return Err(mismatch("uncles", "a list", other)),
    };
    let raw = match (&proof.uncles, listed.is_empty()) {
        (Some(raw), _) => raw.clone(),
        (None, true) => Vec::new(),
        (None, false) => return Err(VerifyError::MissingProofField("uncles")),
    };
    if raw.len() != listed.len() {
        return Err(mismatch("uncle count", listed.len(), raw.len()));
    }
    for (expected, encoded) in listed.iter().zip(&raw) {
        let hash = BlockHeader::decode(encoded)?.hash();
        if hash != *expected {
            return Err(mismatch("uncle hash", expected, hash));
        }
    }
    let items: Vec<Vec<u8>> = raw.iter().map(|r| r.to_vec()).collect();
    let uncles_hash = keccak256(&encode_list(&items));
    if uncles_hash != header.uncles_hash() {
        return Err(mismatch("sha3Uncles", header.uncles_hash(), uncles_hash));
    }
    Ok(())
}

/// Verify an `eth_getBlockByHash`/`eth_getBlockByNumber` answer.
///
/// The header is rebuilt from the JSON fields, so every header field is
/// covered by the hash. Bodies are covered by the transactions root, given
/// either inline or in `proof.transactions` when only hashes were returned.
pub(crate) fn verify_block_proof(
    request: &RpcRequest,
    response: &RpcResponse,
    proof: &Proof,
    ctx: &mut ChainContext,
) -> Result<(), VerifyError> {
    let block = response.result_or_null();
    if block.is_null() {
        return Ok(());
    }
    let header = BlockHeader::from_json(block)?;
    let hash = header.hash();
    let claimed = field_b256(block, "hash")?;
    if claimed != hash {
        return Err(mismatch("block hash", hash, claimed));
    }

    match request.method.as_str() {
        "eth_getBlockByHash" => {
            let requested = param_b256(request, 0)?;
            if requested != hash {
                return Err(mismatch("requested block", requested, hash));
            }
        }
        _ => check_block_param(request, 0, &header)?,
    }
    check_header(&header, Some(hash), request, proof, ctx)?;

    let transactions = field(block, "transactions")?
        .as_array()
        .ok_or(VerifyError::MissingResult("transactions"))?;
    let hashes_only = transactions.iter().any(Value::is_string);
    if hashes_only {
        let listed = transactions
            .iter()
            .map(|t| as_hash(t, "transactions"))
            .collect::<Result<Vec<_>, _>>()?;
        let bodies = proof
            .transactions
            .as_deref()
            .ok_or(VerifyError::MissingProofField("transactions"))?;
        verify_bodies(bodies, &header, hash, Some(&listed))?;
    } else {
        verify_bodies(transactions, &header, hash, None)?;
    }

    verify_uncles(block, &header, proof)?;
    trace!(block = header.number(), txs = transactions.len(), "block body verified");
    Ok(())
}
