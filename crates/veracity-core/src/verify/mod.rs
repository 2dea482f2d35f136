//! Proof dispatch: route a `(request, response, proof)` triple to the
//! routine that can verify it.
//!
//! Every branch either verifies the answer completely or fails. There is no
//! path that accepts a present but broken proof.

pub mod account;
pub mod block;
pub mod call;
pub mod logs;
pub mod nodelist;
pub mod transaction;

use std::collections::HashMap;
use std::fmt::Display;

use alloy_primitives::{Address, B256, U256};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

use crate::consensus::block::{verify_block, BlockCheck, BlockError};
use crate::consensus::header::{BlockHeader, HeaderError};
use crate::execution::call::CallError;
use crate::execution::proof::{keccak256, ProofError};
use crate::types::chain::{ChainContext, ChainFamily};
use crate::types::encoding::{parse_quantity, value_bytes, EncodingError};
use crate::types::proof::{Proof, ProofKind};
use crate::types::rpc::{RpcRequest, RpcResponse, Verification};

/// Methods whose answers cannot be proven and are accepted as-is.
pub const UNVERIFIABLE_METHODS: &[&str] = &[
    "eth_blockNumber",
    "eth_gasPrice",
    "eth_maxPriorityFeePerGas",
    "eth_feeHistory",
    "eth_estimateGas",
    "eth_sendRawTransaction",
    "eth_syncing",
    "eth_protocolVersion",
    "net_version",
    "net_peerCount",
    "net_listening",
    "web3_clientVersion",
    "in3_validatorList",
];

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("{method} requires a proof, none was attached")]
    ProofMissing { method: String },

    #[error("A {kind:?} cannot prove the result of {method}")]
    UnexpectedProof { method: String, kind: ProofKind },

    #[error("{0} cannot be verified")]
    UnsupportedMethod(String),

    #[error("No verifier registered for {0:?} chains")]
    UnsupportedFamily(ChainFamily),

    #[error("{0:?} chains cannot verify proofs")]
    Unverifiable(ChainFamily),

    #[error("Malformed proof: {0}")]
    MalformedProof(#[source] serde_json::Error),

    #[error("Proof is missing `{0}`")]
    MissingProofField(&'static str),

    #[error("Request is missing parameter {0}")]
    MissingParam(usize),

    #[error("Invalid call object: {0}")]
    InvalidCall(#[source] serde_json::Error),

    #[error("Result is missing `{0}`")]
    MissingResult(&'static str),

    #[error("{field} mismatch: expected {expected}, got {actual}")]
    Mismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },

    #[error("No registry contract configured for this chain")]
    NoRegistry,

    #[error("Invalid nodelist: {0}")]
    NodeList(String),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Merkle(#[from] ProofError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Call(#[from] CallError),
}

impl VerifyError {
    /// True if the failure implicates the nodes named in
    /// [`blacklisted_addresses`](Self::blacklisted_addresses).
    pub fn is_blacklist(&self) -> bool {
        matches!(self, VerifyError::Block(BlockError::Blacklist { .. }))
    }

    pub fn blacklisted_addresses(&self) -> &[Address] {
        match self {
            VerifyError::Block(BlockError::Blacklist { addresses, .. }) => addresses,
            _ => &[],
        }
    }
}

pub(crate) fn mismatch(field: &'static str, expected: impl Display, actual: impl Display) -> VerifyError {
    VerifyError::Mismatch {
        field,
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// Verification for one chain family.
pub trait Verifier: Send + Sync {
    fn verify(
        &self,
        request: &RpcRequest,
        response: &RpcResponse,
        proof: &Proof,
        ctx: &mut ChainContext,
    ) -> Result<(), VerifyError>;
}

/// Ethereum-style proofs: MPT state, RLP headers, PoA signatures.
#[derive(Clone, Copy, Debug, Default)]
pub struct EthVerifier;

/// The proof kind that answers `method`, if any.
pub fn proof_kind_for(method: &str) -> Option<ProofKind> {
    Some(match method {
        "eth_getTransactionByHash"
        | "eth_getTransactionByBlockHashAndIndex"
        | "eth_getTransactionByBlockNumberAndIndex" => ProofKind::TransactionProof,
        "eth_getTransactionReceipt" => ProofKind::ReceiptProof,
        "eth_getBlockByHash" | "eth_getBlockByNumber" => ProofKind::BlockProof,
        "eth_getBalance" | "eth_getTransactionCount" | "eth_getCode" | "eth_getStorageAt"
        | "in3_nodeList" => ProofKind::AccountProof,
        "eth_call" => ProofKind::CallProof,
        "eth_getLogs" => ProofKind::LogProof,
        _ => return None,
    })
}

impl Verifier for EthVerifier {
    fn verify(
        &self,
        request: &RpcRequest,
        response: &RpcResponse,
        proof: &Proof,
        ctx: &mut ChainContext,
    ) -> Result<(), VerifyError> {
        let method = request.method.as_str();
        let expected =
            proof_kind_for(method).ok_or_else(|| VerifyError::UnsupportedMethod(method.to_string()))?;
        if expected != proof.kind {
            return Err(VerifyError::UnexpectedProof {
                method: method.to_string(),
                kind: proof.kind,
            });
        }
        match proof.kind {
            ProofKind::TransactionProof => transaction::verify_transaction(request, response, proof, ctx),
            ProofKind::ReceiptProof => transaction::verify_receipt(request, response, proof, ctx),
            ProofKind::BlockProof => block::verify_block_proof(request, response, proof, ctx),
            ProofKind::AccountProof if method == "in3_nodeList" => {
                nodelist::verify_nodelist(request, response, proof, ctx)
            }
            ProofKind::AccountProof => account::verify_account(request, response, proof, ctx),
            ProofKind::CallProof => call::verify_call(request, response, proof, ctx),
            ProofKind::LogProof => logs::verify_logs(request, response, proof, ctx),
        }
    }
}

/// For chains whose answers cannot be proven.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughVerifier;

impl Verifier for PassthroughVerifier {
    fn verify(
        &self,
        _request: &RpcRequest,
        _response: &RpcResponse,
        _proof: &Proof,
        _ctx: &mut ChainContext,
    ) -> Result<(), VerifyError> {
        Err(VerifyError::Unverifiable(ChainFamily::Passthrough))
    }
}

/// Closed table of verifiers, one per chain family.
pub struct ProofDispatcher {
    verifiers: HashMap<ChainFamily, Box<dyn Verifier>>,
}

impl ProofDispatcher {
    pub fn new<I>(verifiers: I) -> Self
    where
        I: IntoIterator<Item = (ChainFamily, Box<dyn Verifier>)>,
    {
        Self {
            verifiers: verifiers.into_iter().collect(),
        }
    }

    /// A verifier for every [`ChainFamily`].
    pub fn standard() -> Self {
        Self::new([
            (ChainFamily::Ethereum, Box::new(EthVerifier) as Box<dyn Verifier>),
            (ChainFamily::Passthrough, Box::new(PassthroughVerifier) as Box<dyn Verifier>),
        ])
    }

    /// Verify a response to `request`.
    ///
    /// Without a proof the answer is accepted only for unverifiable methods,
    /// for vacuous results or when `allow_without_proof` is set.
    pub fn verify_proof(
        &self,
        request: &RpcRequest,
        response: &RpcResponse,
        allow_without_proof: bool,
        ctx: &mut ChainContext,
    ) -> Result<(), VerifyError> {
        let method = request.method.as_str();
        if request.verification() == Verification::Never {
            trace!(method, "verification disabled");
            return Ok(());
        }
        if response.error.is_some() {
            trace!(method, "error responses carry no proof");
            return Ok(());
        }
        if verify_locally(request, response, ctx)? {
            return Ok(());
        }

        let Some(raw) = response.proof() else {
            if UNVERIFIABLE_METHODS.contains(&method) || is_vacuous(method, response.result_or_null()) {
                trace!(method, "accepted without proof");
                return Ok(());
            }
            if allow_without_proof {
                debug!(method, chain_id = ctx.chain_id(), "accepting unproven answer");
                return Ok(());
            }
            return Err(VerifyError::ProofMissing {
                method: method.to_string(),
            });
        };

        let family = ctx.spec.family;
        let verifier = self
            .verifiers
            .get(&family)
            .ok_or(VerifyError::UnsupportedFamily(family))?;
        let proof = Proof::from_value(raw).map_err(VerifyError::MalformedProof)?;
        verifier.verify(request, response, &proof, ctx)?;
        debug!(method, kind = ?proof.kind, chain_id = ctx.chain_id(), "proof verified");
        Ok(())
    }
}

/// Answers that need no proof: a missing transaction, block or receipt, or
/// an empty log list.
fn is_vacuous(method: &str, result: &Value) -> bool {
    match method {
        "eth_getLogs" => result.as_array().is_some_and(Vec::is_empty),
        "eth_getTransactionByHash"
        | "eth_getTransactionByBlockHashAndIndex"
        | "eth_getTransactionByBlockNumberAndIndex"
        | "eth_getTransactionReceipt"
        | "eth_getBlockByHash"
        | "eth_getBlockByNumber" => result.is_null(),
        _ => false,
    }
}

/// Methods checked without any proof. Returns whether `request` was one.
fn verify_locally(
    request: &RpcRequest,
    response: &RpcResponse,
    ctx: &ChainContext,
) -> Result<bool, VerifyError> {
    let result = response.result_or_null();
    match request.method.as_str() {
        "web3_sha3" => {
            let input = value_bytes(request.param(0).ok_or(VerifyError::MissingParam(0))?, "params")?;
            let claimed = value_bytes(result, "result")?;
            let hash = keccak256(&input);
            if claimed.as_ref() != hash.as_slice() {
                return Err(mismatch("web3_sha3", hash, claimed));
            }
            Ok(true)
        }
        "eth_chainId" => {
            let claimed = parse_quantity(result).ok_or(VerifyError::MissingResult("chainId"))?;
            if claimed != U256::from(ctx.chain_id()) {
                return Err(mismatch("chainId", ctx.chain_id(), claimed));
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

pub(crate) fn param(request: &RpcRequest, index: usize) -> Result<&Value, VerifyError> {
    request
        .param(index)
        .filter(|v| !v.is_null())
        .ok_or(VerifyError::MissingParam(index))
}

pub(crate) fn param_b256(request: &RpcRequest, index: usize) -> Result<B256, VerifyError> {
    let value = param(request, index)?;
    value
        .as_str()
        .and_then(|s| s.parse::<B256>().ok())
        .ok_or_else(|| {
            VerifyError::Encoding(EncodingError::InvalidHex {
                field: "params",
                reason: format!("expected a 32-byte hash, got {value}"),
            })
        })
}

pub(crate) fn param_quantity(request: &RpcRequest, index: usize) -> Result<U256, VerifyError> {
    let value = param(request, index)?;
    parse_quantity(value).ok_or_else(|| {
        VerifyError::Encoding(EncodingError::InvalidQuantity {
            field: "params",
            value: value.to_string(),
        })
    })
}

/// Verify `header` with the request's signer and finality requirements.
pub(crate) fn check_header(
    header: &BlockHeader,
    expected_hash: Option<B256>,
    request: &RpcRequest,
    proof: &Proof,
    ctx: &mut ChainContext,
) -> Result<B256, VerifyError> {
    let finality_blocks = proof
        .finality_blocks
        .iter()
        .map(|raw| BlockHeader::decode(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let check = BlockCheck {
        expected_hash,
        signers: request.signers(),
        signatures: &proof.signatures,
        finality_blocks: &finality_blocks,
        finality: request.in3.as_ref().and_then(|in3| in3.finality),
    };
    Ok(verify_block(header, &check, ctx)?)
}

/// Decode and verify `proof.block`.
pub(crate) fn proof_header(
    proof: &Proof,
    expected_hash: Option<B256>,
    request: &RpcRequest,
    ctx: &mut ChainContext,
) -> Result<BlockHeader, VerifyError> {
    let raw = proof
        .block
        .as_ref()
        .ok_or(VerifyError::MissingProofField("block"))?;
    let header = BlockHeader::decode(raw)?;
    check_header(&header, expected_hash, request, proof, ctx)?;
    Ok(header)
}

/// Check a block parameter (hash, number, tag or EIP-1898 object) against
/// the proven header. Tags cannot be checked and pass.
pub(crate) fn check_block_param(
    request: &RpcRequest,
    index: usize,
    header: &BlockHeader,
) -> Result<(), VerifyError> {
    let Some(param) = request.param(index) else {
        return Ok(());
    };
    let param = match param {
        Value::Object(obj) => match obj.get("blockHash").or_else(|| obj.get("blockNumber")) {
            Some(inner) => inner,
            None => return Ok(()),
        },
        other => other,
    };
    if let Some(s) = param.as_str().filter(|s| s.len() == 66) {
        let hash = header.hash();
        if s.parse::<B256>().ok() != Some(hash) {
            return Err(mismatch("block hash", s, hash));
        }
        return Ok(());
    }
    match parse_quantity(param) {
        Some(number) if number != U256::from(header.number()) => {
            Err(mismatch("block number", number, header.number()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::chain::ChainSpec;
    use crate::types::rpc::In3Request;
    use serde_json::json;

    fn response(result: Value) -> RpcResponse {
        RpcResponse::success(1, result)
    }

    #[test]
    fn test_unverifiable_methods_pass() {
        let dispatcher = ProofDispatcher::standard();
        let mut ctx = ChainContext::new(ChainSpec::default());
        let request = RpcRequest::new("eth_blockNumber", vec![], 1);
        assert!(dispatcher
            .verify_proof(&request, &response(json!("0x10")), false, &mut ctx)
            .is_ok());
    }

    #[test]
    fn test_missing_proof() {
        let dispatcher = ProofDispatcher::standard();
        let mut ctx = ChainContext::new(ChainSpec::default());
        let request = RpcRequest::new(
            "eth_getBalance",
            vec![json!("0x0000000000000000000000000000000000000001"), json!("latest")],
            1,
        );
        let answer = response(json!("0x1"));
        assert!(matches!(
            dispatcher.verify_proof(&request, &answer, false, &mut ctx),
            Err(VerifyError::ProofMissing { .. })
        ));
        assert!(dispatcher.verify_proof(&request, &answer, true, &mut ctx).is_ok());

        let mut never = request.clone();
        never.in3 = Some(In3Request {
            verification: Verification::Never,
            ..In3Request::default()
        });
        assert!(dispatcher.verify_proof(&never, &answer, false, &mut ctx).is_ok());
    }

    #[test]
    fn test_vacuous_results() {
        let dispatcher = ProofDispatcher::standard();
        let mut ctx = ChainContext::new(ChainSpec::default());
        let logs = RpcRequest::new("eth_getLogs", vec![json!({})], 1);
        assert!(dispatcher.verify_proof(&logs, &response(json!([])), false, &mut ctx).is_ok());
        assert!(dispatcher
            .verify_proof(&logs, &response(json!([{}])), false, &mut ctx)
            .is_err());

        let tx = RpcRequest::new("eth_getTransactionByHash", vec![json!(B256::ZERO)], 1);
        assert!(dispatcher.verify_proof(&tx, &response(Value::Null), false, &mut ctx).is_ok());
    }

    #[test]
    fn test_local_methods() {
        let dispatcher = ProofDispatcher::standard();
        let mut ctx = ChainContext::new(ChainSpec::default());

        let sha3 = RpcRequest::new("web3_sha3", vec![json!("0x68656c6c6f")], 1);
        let good = json!(keccak256(b"hello"));
        assert!(dispatcher.verify_proof(&sha3, &response(good), false, &mut ctx).is_ok());
        assert!(matches!(
            dispatcher.verify_proof(&sha3, &response(json!(B256::ZERO)), false, &mut ctx),
            Err(VerifyError::Mismatch { field: "web3_sha3", .. })
        ));

        let chain_id = RpcRequest::new("eth_chainId", vec![], 1);
        assert!(dispatcher.verify_proof(&chain_id, &response(json!("0x1")), false, &mut ctx).is_ok());
        assert!(dispatcher
            .verify_proof(&chain_id, &response(json!("0x5")), false, &mut ctx)
            .is_err());
    }

    #[test]
    fn test_proof_kind_must_fit_method() {
        let dispatcher = ProofDispatcher::standard();
        let mut ctx = ChainContext::new(ChainSpec::default());
        let request = RpcRequest::new("eth_getBalance", vec![json!(Address::ZERO)], 1);
        let answer = response(json!("0x1")).with_proof(json!({ "type": "blockProof" }));
        assert!(matches!(
            dispatcher.verify_proof(&request, &answer, false, &mut ctx),
            Err(VerifyError::UnexpectedProof { kind: ProofKind::BlockProof, .. })
        ));

        let answer = response(json!("0x1")).with_proof(json!({ "type": "nonsense" }));
        assert!(matches!(
            dispatcher.verify_proof(&request, &answer, false, &mut ctx),
            Err(VerifyError::MalformedProof(_))
        ));
    }

    #[test]
    fn test_passthrough_rejects_proofs() {
        let dispatcher = ProofDispatcher::standard();
        let mut ctx = ChainContext::new(ChainSpec {
            family: ChainFamily::Passthrough,
            ..ChainSpec::default()
        });
        let request = RpcRequest::new("eth_getBalance", vec![json!(Address::ZERO)], 1);
        let answer = response(json!("0x1")).with_proof(json!({ "type": "accountProof" }));
        assert!(matches!(
            dispatcher.verify_proof(&request, &answer, false, &mut ctx),
            Err(VerifyError::Unverifiable(ChainFamily::Passthrough))
        ));

        let empty = ProofDispatcher::new(Vec::<(ChainFamily, Box<dyn Verifier>)>::new());
        assert!(matches!(
            empty.verify_proof(&request, &answer, false, &mut ctx),
            Err(VerifyError::UnsupportedFamily(ChainFamily::Passthrough))
        ));
    }

    #[test]
    fn test_blacklist_accessors() {
        let err = VerifyError::Block(BlockError::Blacklist {
            addresses: vec![Address::repeat_byte(1)],
            reason: "bad".to_string(),
        });
        assert!(err.is_blacklist());
        assert_eq!(err.blacklisted_addresses(), &[Address::repeat_byte(1)]);
        assert!(!VerifyError::NoRegistry.is_blacklist());
    }
}
