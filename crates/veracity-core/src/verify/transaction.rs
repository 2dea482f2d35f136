use alloy_primitives::U256;

use crate::execution::proof::{keccak256, read_merkle_proof, verify_merkle_proof};
use crate::execution::receipt::encode_receipt;
use crate::execution::rlp::encode_u64;
use crate::execution::transaction::encode_transaction;
use crate::types::chain::ChainContext;
use crate::types::encoding::{field_b256, field_u64};
use crate::types::proof::Proof;
use crate::types::rpc::{RpcRequest, RpcResponse};
use crate::verify::logs::check_log_position;
use crate::verify::{
    check_block_param, mismatch, param_b256, param_quantity, proof_header, VerifyError,
};

/// The index in the proof, if given, must be the one the answer claims.
fn check_proof_index(proof: &Proof, index: u64) -> Result<(), VerifyError> {
    match proof.tx_index {
        Some(proven) if proven != index => Err(mismatch("transaction index", proven, index)),
        _ => Ok(()),
    }
}

/// Verify a transaction object against the transactions trie of its block.
///
/// The hash and trie value are recomputed from the answer's own fields, so
/// changing any of them breaks either the hash or the Merkle proof.
pub(crate) fn verify_transaction(
    request: &RpcRequest,
    response: &RpcResponse,
    proof: &Proof,
    ctx: &mut ChainContext,
) -> Result<(), VerifyError> {
    let tx = response.result_or_null();
    if tx.is_null() {
        return Ok(());
    }
    let block_hash = field_b256(tx, "blockHash")?;
    let index = field_u64(tx, "transactionIndex")?;
    check_proof_index(proof, index)?;

    let encoded = encode_transaction(tx)?;
    let hash = keccak256(&encoded);
    let claimed = field_b256(tx, "hash")?;
    if claimed != hash {
        return Err(mismatch("transaction hash", hash, claimed));
    }

    match request.method.as_str() {
        "eth_getTransactionByHash" => {
            let requested = param_b256(request, 0)?;
            if requested != hash {
                return Err(mismatch("requested transaction", requested, hash));
            }
        }
        "eth_getTransactionByBlockHashAndIndex" => {
            let requested = param_b256(request, 0)?;
            if requested != block_hash {
                return Err(mismatch("requested block", requested, block_hash));
            }
        }
        _ => {}
    }
    if request.method != "eth_getTransactionByHash" {
        let requested = param_quantity(request, 1)?;
        if requested != U256::from(index) {
            return Err(mismatch("requested index", requested, index));
        }
    }

    let header = proof_header(proof, Some(block_hash), request, ctx)?;
    let number = field_u64(tx, "blockNumber")?;
    if number != header.number() {
        return Err(mismatch("block number", header.number(), number));
    }
    if request.method == "eth_getTransactionByBlockNumberAndIndex" {
        check_block_param(request, 0, &header)?;
    }

    verify_merkle_proof(
        header.transactions_root(),
        &encode_u64(index),
        &proof.merkle_proof,
        Some(encoded.as_slice()),
    )?;
    Ok(())
}

/// Verify a receipt against the receipts trie, and bind it to its
/// transaction through `txProof`.
pub(crate) fn verify_receipt(
    request: &RpcRequest,
    response: &RpcResponse,
    proof: &Proof,
    ctx: &mut ChainContext,
) -> Result<(), VerifyError> {
    let receipt = response.result_or_null();
    if receipt.is_null() {
        return Ok(());
    }
    let block_hash = field_b256(receipt, "blockHash")?;
    let index = field_u64(receipt, "transactionIndex")?;
    let tx_hash = field_b256(receipt, "transactionHash")?;
    check_proof_index(proof, index)?;

    let requested = param_b256(request, 0)?;
    if requested != tx_hash {
        return Err(mismatch("requested transaction", requested, tx_hash));
    }

    let header = proof_header(proof, Some(block_hash), request, ctx)?;
    let number = field_u64(receipt, "blockNumber")?;
    if number != header.number() {
        return Err(mismatch("block number", header.number(), number));
    }

    let key = encode_u64(index);
    let encoded = encode_receipt(receipt)?;
    verify_merkle_proof(
        header.receipts_root(),
        &key,
        &proof.merkle_proof,
        Some(encoded.as_slice()),
    )?;

    if proof.tx_proof.is_empty() {
        return Err(VerifyError::MissingProofField("txProof"));
    }
    let tx = read_merkle_proof(header.transactions_root(), &key, &proof.tx_proof)?
        .ok_or_else(|| mismatch("transaction", tx_hash, "none at this index"))?;
    let proven = keccak256(&tx);
    if proven != tx_hash {
        return Err(mismatch("transaction hash", proven, tx_hash));
    }

    if let Some(logs) = receipt.get("logs").and_then(|l| l.as_array()) {
        for (position, log) in logs.iter().enumerate() {
            check_log_position(log, block_hash, number, tx_hash, index, Some(position))?;
        }
    }
    Ok(())
}
