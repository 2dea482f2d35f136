use std::collections::HashSet;

use alloy_primitives::{Address, Bytes, B256};
use thiserror::Error;
use tracing::{debug, trace};

use crate::consensus::header::{BlockHeader, HeaderError};
use crate::consensus::signature::{
    node_message_hash, recover_from_parts, recover_signer, SignatureError,
};
use crate::types::chain::{ChainContext, ConsensusEngine};
use crate::types::encoding::bytes_to_u64;
use crate::types::proof::Signature;

/// Length of an `r || s || v` seal signature.
pub const SEAL_SIGNATURE_LEN: usize = 65;

#[derive(Debug, Error)]
pub enum BlockError {
    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("Block hash mismatch: expected {expected}, header hashes to {actual}")]
    HashMismatch { expected: B256, actual: B256 },

    #[error("Invalid seal on block {block}: {reason}")]
    InvalidSeal { block: u64, reason: String },

    #[error("Seal signature on block {block}: {source}")]
    SealSignature {
        block: u64,
        #[source]
        source: SignatureError,
    },

    #[error("Block {block} sealed by {signer}, which is not a validator at that height")]
    NotAValidator { block: u64, signer: Address },

    #[error("Block {block} at step {step} must be sealed by {expected}, got {actual}")]
    WrongProposer {
        block: u64,
        step: u64,
        expected: Address,
        actual: Address,
    },

    #[error("No validator set known for block {block}")]
    UnknownValidators { block: u64 },

    #[error("Finality block {block} is not the child of the previous header")]
    DisconnectedFinality { block: u64 },

    #[error("Finality not reached: {signers} distinct signer(s), {required} required")]
    FinalityNotReached { signers: usize, required: usize },

    #[error("Node signatures rejected for {addresses:?}: {reason}")]
    Blacklist {
        addresses: Vec<Address>,
        reason: String,
    },
}

/// What a header must satisfy beyond hashing correctly.
#[derive(Clone, Debug, Default)]
pub struct BlockCheck<'a> {
    /// Hash the caller was told this header has.
    pub expected_hash: Option<B256>,
    /// Nodes that were asked to sign the block hash.
    pub signers: &'a [Address],
    /// Signatures supplied with the proof.
    pub signatures: &'a [Signature],
    /// Headers following the checked one, each the child of the previous.
    pub finality_blocks: &'a [BlockHeader],
    /// Required share of the validator set, in percent.
    pub finality: Option<u8>,
}

/// Recover the address that sealed a PoA header. `None` for engines
/// without in-header signatures.
pub fn seal_signer(
    header: &BlockHeader,
    engine: ConsensusEngine,
) -> Result<Option<Address>, BlockError> {
    let block = header.number();
    let signature_error = |source| BlockError::SealSignature { block, source };
    match engine {
        ConsensusEngine::Ethash => Ok(None),
        ConsensusEngine::AuthorityRound => {
            let signature = &header.seal_fields()[1];
            let signer =
                recover_signer(header.bare_hash(), signature).map_err(signature_error)?;
            Ok(Some(signer))
        }
        ConsensusEngine::Clique => {
            let extra = header.extra_data();
            if extra.len() < SEAL_SIGNATURE_LEN {
                return Err(BlockError::InvalidSeal {
                    block,
                    reason: format!("extraData has {} bytes, no room for a seal", extra.len()),
                });
            }
            let split = extra.len() - SEAL_SIGNATURE_LEN;
            // The seal hash is the header hash with the signature cut off
            let unsealed = header.with_extra_data(Bytes::copy_from_slice(&extra[..split]));
            let signer =
                recover_signer(unsealed.hash(), &extra[split..]).map_err(signature_error)?;
            Ok(Some(signer))
        }
    }
}

/// Check the seal against the validator set valid at the header's height.
/// Returns the sealer, or `None` for non-PoA engines.
pub fn verify_seal(
    header: &BlockHeader,
    ctx: &ChainContext,
) -> Result<Option<Address>, BlockError> {
    let engine = ctx.spec.engine;
    let Some(signer) = seal_signer(header, engine)? else {
        return Ok(None);
    };
    let block = header.number();
    let validators = ctx.validators.get_data(block);
    if validators.is_empty() {
        return Err(BlockError::UnknownValidators { block });
    }
    if !validators.contains(&signer) {
        return Err(BlockError::NotAValidator { block, signer });
    }

    if engine == ConsensusEngine::AuthorityRound {
        let step = bytes_to_u64(&header.seal_fields()[0]);
        let expected = validators[(step % validators.len() as u64) as usize];
        if expected != signer {
            return Err(BlockError::WrongProposer {
                block,
                step,
                expected,
                actual: signer,
            });
        }
    }
    Ok(Some(signer))
}

/// Distinct validators sealing `header` and the connected chain after it.
fn finality_signers(
    header: &BlockHeader,
    following: &[BlockHeader],
    ctx: &ChainContext,
) -> Result<HashSet<Address>, BlockError> {
    let mut signers = HashSet::new();
    let mut parent = header.hash();
    if let Some(signer) = verify_seal(header, ctx)? {
        signers.insert(signer);
    }
    for child in following {
        if child.parent_hash() != parent {
            return Err(BlockError::DisconnectedFinality {
                block: child.number(),
            });
        }
        if let Some(signer) = verify_seal(child, ctx)? {
            signers.insert(signer);
        }
        parent = child.hash();
    }
    Ok(signers)
}

/// Every requested signer must have signed exactly this block.
fn verify_node_signatures(
    hash: B256,
    number: u64,
    signers: &[Address],
    signatures: &[Signature],
) -> Result<(), BlockError> {
    let message = node_message_hash(hash, number);
    let mut confirmed = HashSet::new();
    for sig in signatures {
        if sig.block_hash != hash || sig.block != number {
            continue;
        }
        if sig.msg_hash.is_some_and(|m| m != message) {
            continue;
        }
        match recover_from_parts(message, sig.r, sig.s, sig.v) {
            Ok(signer) => {
                confirmed.insert(signer);
            }
            Err(e) => trace!(block = number, error = %e, "unrecoverable node signature"),
        }
    }

    let missing: Vec<Address> = signers
        .iter()
        .filter(|s| !confirmed.contains(*s))
        .copied()
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(BlockError::Blacklist {
        reason: format!(
            "no valid signature for block {number} ({hash}) from {} of {} signer(s)",
            missing.len(),
            signers.len()
        ),
        addresses: missing,
    })
}

/// Verify a header and return its hash.
///
/// Order matters: the hash is checked first since everything else is only
/// meaningful for the block the caller asked about.
pub fn verify_block(
    header: &BlockHeader,
    check: &BlockCheck<'_>,
    ctx: &mut ChainContext,
) -> Result<B256, BlockError> {
    let hash = header.hash();
    let number = header.number();
    if let Some(expected) = check.expected_hash {
        if expected != hash {
            return Err(BlockError::HashMismatch {
                expected,
                actual: hash,
            });
        }
    }

    let finality = check.finality.filter(|f| *f > 0);
    if finality.is_none()
        && ctx
            .header_cache
            .as_mut()
            .is_some_and(|cache| cache.covers(&hash, check.signers))
    {
        trace!(block = number, %hash, "header already verified");
        return Ok(hash);
    }

    let engine = ctx.spec.engine;
    match finality {
        Some(percent) if engine.is_poa() => {
            let validators = ctx.validators.get_data(number).len();
            if validators == 0 {
                return Err(BlockError::UnknownValidators { block: number });
            }
            let required = (usize::from(percent) * validators).div_ceil(100);
            let signers = finality_signers(header, check.finality_blocks, ctx)?.len();
            if signers < required {
                return Err(BlockError::FinalityNotReached { signers, required });
            }
            debug!(block = number, signers, required, "finality reached");
        }
        _ if engine.is_poa() && !ctx.validators.get_data(number).is_empty() => {
            verify_seal(header, ctx)?;
        }
        _ => {}
    }

    if !check.signers.is_empty() {
        verify_node_signatures(hash, number, check.signers, check.signatures)?;
    }

    if let Some(cache) = ctx.header_cache.as_mut() {
        cache.record(hash, check.signers);
    }
    Ok(hash)
}
