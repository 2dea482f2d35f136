//! `in3_nodeList` answers, checked against the registry contract's storage.
//!
//! The registry keeps its servers in a dynamic array of structs at slot 0.
//! Every field a node entry claims is read back from proven storage, and the
//! set of returned indexes must be exactly the one the request asked for.

use std::collections::BTreeSet;

use alloy_primitives::{Address, B256, U256};
use serde_json::Value;
use tracing::debug;

use crate::execution::account::{verify_account_proof, VerifiedAccount};
use crate::execution::proof::keccak256;
use crate::types::chain::ChainContext;
use crate::types::encoding::{
    bytes_to_u64, field, field_address, field_quantity, field_u64, parse_quantity, value_bytes,
};
use crate::types::proof::Proof;
use crate::types::rpc::{RpcRequest, RpcResponse};
use crate::verify::account::find_account;
use crate::verify::{mismatch, param, proof_header, VerifyError};

/// Storage words per server struct.
pub const SERVER_STRUCT_SLOTS: u64 = 6;
pub const URL_OFFSET: u64 = 0;
pub const OWNER_OFFSET: u64 = 1;
pub const DEPOSIT_OFFSET: u64 = 2;
pub const PROPS_OFFSET: u64 = 3;

/// First storage slot of server `index`.
pub fn server_base(index: u64) -> U256 {
    let array_start = U256::from_be_bytes(keccak256(&[0u8; 32]).0);
    array_start.wrapping_add(U256::from(index).wrapping_mul(U256::from(SERVER_STRUCT_SLOTS)))
}

/// Indexes of a limited nodelist: `prefix` first, then a walk over the
/// registry driven by `seed`. Repeats re-hash the seed to pick a new step.
pub fn random_indexes(len: u64, limit: u64, seed: B256, prefix: &[u64]) -> Vec<u64> {
    let mut indexes: Vec<u64> = Vec::new();
    for index in prefix {
        if !indexes.contains(index) {
            indexes.push(*index);
        }
    }
    if len == 0 {
        return indexes;
    }
    let limit = limit.min(len);
    let mut seed = seed;
    let mut step = bytes_to_u64(&seed[0..6]);
    let mut pos = bytes_to_u64(&seed[6..12]) % len;
    while (indexes.len() as u64) < limit {
        if indexes.contains(&pos) {
            seed = keccak256(seed.as_slice());
            step = bytes_to_u64(&seed[0..6]);
        } else {
            indexes.push(pos);
        }
        pos = (pos + step % len) % len;
    }
    indexes
}

/// Read a proven storage slot. Slots the proof does not list are an error.
fn slot(registry: &VerifiedAccount, key: U256) -> Result<U256, VerifyError> {
    registry
        .get_storage(key)
        .ok_or_else(|| VerifyError::NodeList(format!("storage slot 0x{key:x} is not proven")))
}

/// Decode a Solidity `string` stored at `key`.
pub(crate) fn read_string(registry: &VerifiedAccount, key: U256) -> Result<Vec<u8>, VerifyError> {
    let head = slot(registry, key)?.to_be_bytes::<32>();
    let marker = head[31];
    if marker & 1 == 0 {
        let len = usize::from(marker / 2);
        if len > 31 {
            return Err(VerifyError::NodeList(format!("short string of {len} bytes")));
        }
        return Ok(head[..len].to_vec());
    }

    let len = usize::try_from(U256::from_be_bytes(head) >> 1usize)
        .map_err(|_| VerifyError::NodeList("string length overflows".to_string()))?;
    if len < 32 {
        return Err(VerifyError::NodeList(format!("long string of {len} bytes")));
    }
    let data_start = U256::from_be_bytes(keccak256(&key.to_be_bytes::<32>()).0);
    let mut out = Vec::with_capacity(len);
    for k in 0..len.div_ceil(32) {
        let word = slot(registry, data_start.wrapping_add(U256::from(k)))?.to_be_bytes::<32>();
        out.extend_from_slice(&word);
    }
    out.truncate(len);
    Ok(out)
}

/// One returned server, checked field by field against storage.
fn verify_node(registry: &VerifiedAccount, node: &Value, total: u64) -> Result<u64, VerifyError> {
    let index = field_u64(node, "index")?;
    if index >= total {
        return Err(VerifyError::NodeList(format!(
            "index {index} outside a registry of {total}"
        )));
    }
    let base = server_base(index);
    let at = |offset: u64| base.wrapping_add(U256::from(offset));

    let address = field_address(node, "address")?;
    let owner = slot(registry, at(OWNER_OFFSET))?;
    if owner != U256::from_be_slice(address.as_slice()) {
        return Err(mismatch("node address", Address::from_word(owner.into()), address));
    }
    let deposit = field_quantity(node, "deposit")?;
    let stored = slot(registry, at(DEPOSIT_OFFSET))?;
    if deposit != stored {
        return Err(mismatch("node deposit", stored, deposit));
    }
    let props = node.get("props").and_then(parse_quantity).unwrap_or_default();
    let stored = slot(registry, at(PROPS_OFFSET))?;
    if props != stored {
        return Err(mismatch("node props", stored, props));
    }
    let url = field(node, "url")?
        .as_str()
        .ok_or(VerifyError::MissingResult("url"))?;
    let stored = read_string(registry, at(URL_OFFSET))?;
    if url.as_bytes() != stored.as_slice() {
        return Err(mismatch("node url", String::from_utf8_lossy(&stored), url));
    }
    Ok(index)
}

/// Verify an `in3_nodeList` answer.
///
/// Params are `[limit, seed, addresses]`; a limit of 0 (or at least the
/// registry size) asks for every server.
pub(crate) fn verify_nodelist(
    request: &RpcRequest,
    response: &RpcResponse,
    proof: &Proof,
    ctx: &mut ChainContext,
) -> Result<(), VerifyError> {
    let registry_address = ctx.spec.registry.ok_or(VerifyError::NoRegistry)?;
    let result = response.result_or_null();
    let contract = field_address(result, "contract")?;
    if contract != registry_address {
        return Err(mismatch("registry", registry_address, contract));
    }

    let header = proof_header(proof, None, request, ctx)?;
    let last_block = field_u64(result, "lastBlockNumber")?;
    if last_block > header.number() {
        return Err(mismatch("lastBlockNumber", header.number(), last_block));
    }

    let entry = find_account(proof, &registry_address)?;
    let registry = verify_account_proof(header.state_root(), entry)?;

    let total = u64::try_from(slot(&registry, U256::ZERO)?)
        .map_err(|_| VerifyError::NodeList("registry length overflows".to_string()))?;
    let claimed_total = field_u64(result, "totalServers")?;
    if claimed_total != total {
        return Err(mismatch("totalServers", total, claimed_total));
    }

    let nodes = field(result, "nodes")?
        .as_array()
        .ok_or(VerifyError::MissingResult("nodes"))?;
    let mut returned = Vec::with_capacity(nodes.len());
    for node in nodes {
        returned.push((verify_node(&registry, node, total)?, field_address(node, "address")?));
    }
    let returned_set: BTreeSet<u64> = returned.iter().map(|(i, _)| *i).collect();
    if returned_set.len() != returned.len() {
        return Err(VerifyError::NodeList("duplicate server index".to_string()));
    }

    let limit = request
        .param(0)
        .and_then(parse_quantity)
        .map_or(0, |l| u64::try_from(l).unwrap_or(u64::MAX));
    let expected: BTreeSet<u64> = if limit == 0 || limit >= total {
        (0..total).collect()
    } else {
        let seed = value_bytes(param(request, 1)?, "seed")?;
        if seed.len() != 32 {
            return Err(mismatch("seed length", 32, seed.len()));
        }
        let mut prefix = Vec::new();
        if let Some(wanted) = request.param(2).and_then(Value::as_array) {
            for item in wanted {
                let address = value_bytes(item, "addresses")?;
                let index = returned
                    .iter()
                    .find(|(_, a)| a.as_slice() == address.as_ref())
                    .map(|(i, _)| *i)
                    .ok_or_else(|| {
                        VerifyError::NodeList(format!("requested node {item} is missing"))
                    })?;
                prefix.push(index);
            }
        }
        random_indexes(total, limit, B256::from_slice(&seed), &prefix)
            .into_iter()
            .collect()
    };
    if expected != returned_set {
        return Err(VerifyError::NodeList(format!(
            "returned {} server(s), expected indexes {:?}",
            returned_set.len(),
            expected
        )));
    }

    debug!(
        chain_id = ctx.chain_id(),
        servers = nodes.len(),
        total,
        block = header.number(),
        "nodelist verified"
    );
    Ok(())
}
