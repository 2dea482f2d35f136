use alloy_primitives::{Address, U256};
use serde_json::Value;
use tracing::trace;

use crate::consensus::header::BlockHeader;
use crate::execution::account::{verify_account_proof, VerifiedAccount};
use crate::execution::proof::keccak256;
use crate::types::chain::ChainContext;
use crate::types::encoding::{parse_quantity, value_bytes, EncodingError};
use crate::types::proof::{AccountProofEntry, Proof};
use crate::types::rpc::{RpcRequest, RpcResponse};
use crate::verify::{
    check_block_param, mismatch, param, param_quantity, proof_header, VerifyError,
};

pub(crate) fn param_address(request: &RpcRequest, index: usize) -> Result<Address, VerifyError> {
    let value = param(request, index)?;
    value
        .as_str()
        .and_then(|s| s.parse::<Address>().ok())
        .ok_or_else(|| {
            VerifyError::Encoding(EncodingError::InvalidHex {
                field: "params",
                reason: format!("expected an address, got {value}"),
            })
        })
}

/// The proof entry for `address`, matched on the entry's own address field.
pub(crate) fn find_account<'a>(
    proof: &'a Proof,
    address: &Address,
) -> Result<&'a AccountProofEntry, VerifyError> {
    proof
        .accounts
        .as_ref()
        .ok_or(VerifyError::MissingProofField("accounts"))?
        .values()
        .find(|entry| entry.address == *address)
        .ok_or(VerifyError::MissingProofField("accounts"))
}

/// Verify every account in the proof against `header`, caching proven code.
pub(crate) fn verify_accounts(
    proof: &Proof,
    header: &BlockHeader,
    ctx: &mut ChainContext,
) -> Result<Vec<VerifiedAccount>, VerifyError> {
    let entries = proof
        .accounts
        .as_ref()
        .ok_or(VerifyError::MissingProofField("accounts"))?;
    let mut verified = Vec::with_capacity(entries.len());
    for entry in entries.values() {
        let account = verify_account_proof(header.state_root(), entry)?;
        if let (Some(code), Some(cache)) = (&account.code, ctx.code_cache.as_mut()) {
            if !code.is_empty() {
                cache.insert(account.account.code_hash, code.clone());
            }
        }
        verified.push(account);
    }
    Ok(verified)
}

fn result_quantity(result: &Value) -> Result<U256, VerifyError> {
    parse_quantity(result).ok_or_else(|| {
        VerifyError::Encoding(EncodingError::InvalidQuantity {
            field: "result",
            value: result.to_string(),
        })
    })
}

/// Verify `eth_getBalance`, `eth_getTransactionCount`, `eth_getCode` and
/// `eth_getStorageAt` against an account proof in a verified block.
pub(crate) fn verify_account(
    request: &RpcRequest,
    response: &RpcResponse,
    proof: &Proof,
    ctx: &mut ChainContext,
) -> Result<(), VerifyError> {
    let method = request.method.as_str();
    let address = param_address(request, 0)?;
    let block_index = if method == "eth_getStorageAt" { 2 } else { 1 };

    let header = proof_header(proof, None, request, ctx)?;
    check_block_param(request, block_index, &header)?;

    let entry = find_account(proof, &address)?;
    let verified = verify_account_proof(header.state_root(), entry)?;
    let account = &verified.account;
    let result = response.result_or_null();

    match method {
        "eth_getBalance" => {
            let claimed = result_quantity(result)?;
            if claimed != account.balance {
                return Err(mismatch("balance", account.balance, claimed));
            }
        }
        "eth_getTransactionCount" => {
            let claimed = result_quantity(result)?;
            if claimed != U256::from(account.nonce) {
                return Err(mismatch("nonce", account.nonce, claimed));
            }
        }
        "eth_getCode" => {
            let code = value_bytes(result, "result")?;
            let hash = keccak256(&code);
            if hash != account.code_hash {
                return Err(mismatch("code hash", account.code_hash, hash));
            }
            if let Some(cache) = ctx.code_cache.as_mut().filter(|_| !code.is_empty()) {
                cache.insert(hash, code);
            }
        }
        "eth_getStorageAt" => {
            let slot = param_quantity(request, 1)?;
            let proven = verified
                .get_storage(slot)
                .ok_or(VerifyError::MissingProofField("storageProof"))?;
            let claimed = result_quantity(result)?;
            if claimed != proven {
                return Err(mismatch("storage value", proven, claimed));
            }
        }
        other => return Err(VerifyError::UnsupportedMethod(other.to_string())),
    }
    trace!(method, %address, block = header.number(), "account answer verified");
    Ok(())
}
