use std::collections::HashMap;

use alloy_primitives::{B256, U256};
use serde_json::Value;
use tracing::trace;

use crate::consensus::header::BlockHeader;
use crate::execution::proof::{keccak256, read_merkle_proof};
use crate::execution::receipt::{decode_receipt, parse_log};
use crate::execution::rlp::encode_u64;
use crate::types::chain::ChainContext;
use crate::types::encoding::{field_b256, field_u64, parse_quantity, value_bytes};
use crate::types::execution::{Log, TransactionReceipt};
use crate::types::proof::Proof;
use crate::types::rpc::{RpcRequest, RpcResponse};
use crate::verify::{check_header, mismatch, VerifyError};

/// Where a log claims to sit. Only fields the server included are checked.
pub(crate) fn check_log_position(
    log: &Value,
    block_hash: B256,
    number: u64,
    tx_hash: B256,
    tx_index: u64,
    position: Option<usize>,
) -> Result<(), VerifyError> {
    let present = |name: &str| log.get(name).is_some_and(|v| !v.is_null());
    if present("blockHash") && field_b256(log, "blockHash")? != block_hash {
        return Err(mismatch("log blockHash", block_hash, &log["blockHash"]));
    }
    if present("blockNumber") && field_u64(log, "blockNumber")? != number {
        return Err(mismatch("log blockNumber", number, &log["blockNumber"]));
    }
    if present("transactionHash") && field_b256(log, "transactionHash")? != tx_hash {
        return Err(mismatch("log transactionHash", tx_hash, &log["transactionHash"]));
    }
    if present("transactionIndex") && field_u64(log, "transactionIndex")? != tx_index {
        return Err(mismatch("log transactionIndex", tx_index, &log["transactionIndex"]));
    }
    if let Some(position) = position {
        if present("transactionLogIndex")
            && field_u64(log, "transactionLogIndex")? != position as u64
        {
            return Err(mismatch(
                "transactionLogIndex",
                position,
                &log["transactionLogIndex"],
            ));
        }
    }
    Ok(())
}

/// A filter value is a single entry or a list of alternatives.
fn matches_any(filter: &Value, actual: &[u8]) -> bool {
    let matches = |v: &Value| value_bytes(v, "filter").is_ok_and(|b| b.as_ref() == actual);
    match filter {
        Value::Null => true,
        Value::Array(options) => options.iter().any(matches),
        single => matches(single),
    }
}

/// The log must be one the filter asked for.
fn check_filter(filter: &Value, log: &Log, number: u64, block_hash: B256) -> Result<(), VerifyError> {
    if let Some(address) = filter.get("address") {
        if !matches_any(address, log.address.as_slice()) {
            return Err(mismatch("log address", address, log.address));
        }
    }
    if let Some(topics) = filter.get("topics").and_then(Value::as_array) {
        for (i, wanted) in topics.iter().enumerate() {
            let ok = match log.topics.get(i) {
                Some(topic) => matches_any(wanted, topic.as_slice()),
                None => wanted.is_null(),
            };
            if !ok {
                return Err(mismatch("log topic", wanted, i));
            }
        }
    }
    if let Some(hash) = filter.get("blockHash").and_then(Value::as_str) {
        if hash.parse::<B256>().ok() != Some(block_hash) {
            return Err(mismatch("filter blockHash", hash, block_hash));
        }
    }
    let number = U256::from(number);
    if let Some(from) = filter.get("fromBlock").and_then(parse_quantity) {
        if number < from {
            return Err(mismatch("fromBlock", from, number));
        }
    }
    if let Some(to) = filter.get("toBlock").and_then(parse_quantity) {
        if number > to {
            return Err(mismatch("toBlock", to, number));
        }
    }
    Ok(())
}

struct ProvenBlock {
    hash: B256,
    /// By transaction hash: index and decoded receipt.
    receipts: HashMap<B256, (u64, TransactionReceipt)>,
}

/// Verify the blocks and receipts in `proof.logProof`.
fn prove_blocks(
    request: &RpcRequest,
    proof: &Proof,
    ctx: &mut ChainContext,
) -> Result<HashMap<u64, ProvenBlock>, VerifyError> {
    let blocks = proof
        .log_proof
        .as_ref()
        .ok_or(VerifyError::MissingProofField("logProof"))?;

    let mut proven = HashMap::with_capacity(blocks.len());
    for (key, entry) in blocks {
        let header = BlockHeader::decode(&entry.block)?;
        let number = header.number();
        if parse_quantity(&Value::String(key.clone())) != Some(U256::from(number)) {
            return Err(mismatch("logProof block", key, number));
        }
        let hash = check_header(&header, None, request, proof, ctx)?;

        let mut receipts = HashMap::with_capacity(entry.receipts.len());
        for (tx_key, item) in &entry.receipts {
            let key = encode_u64(item.tx_index);
            let raw = read_merkle_proof(header.receipts_root(), &key, &item.proof)?
                .ok_or_else(|| mismatch("receipt", item.tx_hash, "none at this index"))?;
            let tx = read_merkle_proof(header.transactions_root(), &key, &item.tx_proof)?
                .ok_or_else(|| mismatch("transaction", item.tx_hash, "none at this index"))?;
            let tx_hash = keccak256(&tx);
            if tx_hash != item.tx_hash || tx_key.parse::<B256>().ok() != Some(tx_hash) {
                return Err(mismatch("transaction hash", tx_hash, tx_key));
            }
            receipts.insert(tx_hash, (item.tx_index, decode_receipt(&raw)?));
        }
        trace!(block = number, receipts = receipts.len(), "log proof block verified");
        proven.insert(number, ProvenBlock { hash, receipts });
    }
    Ok(proven)
}

/// Verify an `eth_getLogs` answer: every log must appear in a proven
/// receipt, at the position it claims, with identical content.
pub(crate) fn verify_logs(
    request: &RpcRequest,
    response: &RpcResponse,
    proof: &Proof,
    ctx: &mut ChainContext,
) -> Result<(), VerifyError> {
    let logs = response
        .result_or_null()
        .as_array()
        .ok_or(VerifyError::MissingResult("logs"))?;
    if logs.is_empty() {
        return Ok(());
    }
    let proven = prove_blocks(request, proof, ctx)?;
    let filter = request.param(0).unwrap_or(&Value::Null);

    for log in logs {
        let number = field_u64(log, "blockNumber")?;
        let block = proven
            .get(&number)
            .ok_or(VerifyError::MissingProofField("logProof"))?;
        let tx_hash = field_b256(log, "transactionHash")?;
        let (tx_index, receipt) = block
            .receipts
            .get(&tx_hash)
            .ok_or(VerifyError::MissingProofField("logProof"))?;
        check_log_position(log, block.hash, number, tx_hash, *tx_index, None)?;

        let parsed = parse_log(log)?;
        let proven_log = if log.get("transactionLogIndex").is_some_and(|v| !v.is_null()) {
            let position = field_u64(log, "transactionLogIndex")?;
            usize::try_from(position).ok().and_then(|i| receipt.logs.get(i))
        } else {
            receipt.logs.iter().find(|l| **l == parsed)
        };
        match proven_log {
            Some(l) if *l == parsed => {}
            _ => return Err(mismatch("log", tx_hash, "no identical log in the receipt")),
        }
        check_filter(filter, &parsed, number, block.hash)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{block_fixture, respond, BlockFixture};
    use crate::types::chain::ChainSpec;
    use crate::types::proof::{LogProofBlock, LogProofReceipt, ProofKind};
    use crate::verify::ProofDispatcher;
    use alloy_primitives::Address;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn log_proof(fixture: &BlockFixture, indexes: &[usize]) -> Proof {
        let receipts = indexes
            .iter()
            .map(|&i| {
                let tx_hash = fixture.transactions[i]["hash"].as_str().unwrap().parse::<B256>().unwrap();
                (
                    tx_hash.to_string(),
                    LogProofReceipt {
                        tx_hash,
                        tx_index: i as u64,
                        proof: fixture.receipt_proof(i),
                        tx_proof: fixture.tx_proof(i),
                    },
                )
            })
            .collect();
        let mut blocks = BTreeMap::new();
        blocks.insert(
            format!("{:#x}", fixture.header.number()),
            LogProofBlock {
                block: fixture.header.encode().into(),
                receipts,
            },
        );
        Proof {
            log_proof: Some(blocks),
            ..Proof::new(ProofKind::LogProof)
        }
    }

    fn all_logs(fixture: &BlockFixture, indexes: &[usize]) -> Vec<Value> {
        indexes
            .iter()
            .flat_map(|&i| fixture.receipts[i]["logs"].as_array().unwrap().clone())
            .collect()
    }

    fn verify(filter: Value, logs: Vec<Value>, proof: &Proof) -> Result<(), VerifyError> {
        let request = RpcRequest::new("eth_getLogs", vec![filter], 1);
        let mut ctx = ChainContext::new(ChainSpec::default());
        ProofDispatcher::standard().verify_proof(&request, &respond(json!(logs), proof), false, &mut ctx)
    }

    #[test]
    fn test_logs_verify() {
        let fixture = block_fixture(300, 3);
        let proof = log_proof(&fixture, &[0, 2]);
        assert!(verify(json!({}), all_logs(&fixture, &[0, 2]), &proof).is_ok());
    }

    #[test]
    fn test_tampered_log_data() {
        let fixture = block_fixture(300, 2);
        let proof = log_proof(&fixture, &[1]);
        let mut logs = all_logs(&fixture, &[1]);
        logs[0]["data"] = json!("0xdeadbeef");
        assert!(matches!(
            verify(json!({}), logs, &proof),
            Err(VerifyError::Mismatch { field: "log", .. })
        ));
    }

    #[test]
    fn test_log_from_unproven_receipt() {
        let fixture = block_fixture(300, 3);
        let proof = log_proof(&fixture, &[0]);
        assert!(matches!(
            verify(json!({}), all_logs(&fixture, &[0, 1]), &proof),
            Err(VerifyError::MissingProofField("logProof"))
        ));
    }

    #[test]
    fn test_wrong_receipt_position() {
        let fixture = block_fixture(300, 3);
        // Receipt 2 proven under the index of receipt 1
        let mut proof = log_proof(&fixture, &[2]);
        for block in proof.log_proof.as_mut().unwrap().values_mut() {
            for item in block.receipts.values_mut() {
                item.tx_index = 1;
            }
        }
        assert!(verify(json!({}), all_logs(&fixture, &[2]), &proof).is_err());
    }

    #[test]
    fn test_filter_is_enforced() {
        let fixture = block_fixture(300, 1);
        let proof = log_proof(&fixture, &[0]);
        let logs = all_logs(&fixture, &[0]);
        let address = logs[0]["address"].clone();

        assert!(verify(json!({ "address": address }), logs.clone(), &proof).is_ok());
        assert!(verify(json!({ "address": [Address::ZERO, address] }), logs.clone(), &proof).is_ok());
        assert!(verify(json!({ "address": Address::ZERO }), logs.clone(), &proof).is_err());
        assert!(verify(json!({ "fromBlock": "0x12d" }), logs.clone(), &proof).is_err());
        assert!(verify(json!({ "toBlock": "latest" }), logs, &proof).is_ok());
    }
}
