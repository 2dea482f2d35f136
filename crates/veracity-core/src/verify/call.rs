use tracing::debug;

use crate::execution::call::{execute_call, CallRequest, ProofState};
use crate::types::chain::ChainContext;
use crate::types::encoding::value_bytes;
use crate::types::proof::Proof;
use crate::types::rpc::{RpcRequest, RpcResponse};
use crate::verify::account::verify_accounts;
use crate::verify::{check_block_param, mismatch, param, proof_header, VerifyError};

/// Verify an `eth_call` answer by running the call over the proven
/// accounts. Code missing from the proof is taken from the code cache.
pub(crate) fn verify_call(
    request: &RpcRequest,
    response: &RpcResponse,
    proof: &Proof,
    ctx: &mut ChainContext,
) -> Result<(), VerifyError> {
    let call: CallRequest =
        serde_json::from_value(param(request, 0)?.clone()).map_err(VerifyError::InvalidCall)?;
    let claimed = value_bytes(response.result_or_null(), "result")?;

    let header = proof_header(proof, None, request, ctx)?;
    check_block_param(request, 1, &header)?;

    let accounts = verify_accounts(proof, &header, ctx)?;
    let uncached: Vec<_> = accounts
        .iter()
        .filter(|a| a.code.is_none() && a.account.is_contract())
        .map(|a| a.account.code_hash)
        .collect();
    let mut state = ProofState::from_verified(accounts);
    if let Some(cache) = ctx.code_cache.as_mut() {
        for code_hash in uncached {
            if let Some(code) = cache.get(&code_hash) {
                state.add_code(code_hash, code.clone());
            }
        }
    }

    let output = execute_call(state, &call, &header, ctx.chain_id())?;
    if output != claimed {
        return Err(mismatch("call result", output, claimed));
    }
    debug!(block = header.number(), to = ?call.to, "call result re-executed");
    Ok(())
}
