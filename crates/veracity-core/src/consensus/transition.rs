//! Proven validator-set changes.
//!
//! A change is only written to the chain context's history after its proof
//! checks out: majority votes for clique, an `InitiateChange` event proven
//! through the receipts trie for authority-round.

use std::collections::HashSet;

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::consensus::block::{seal_signer, verify_block, BlockCheck, BlockError};
use crate::consensus::header::{BlockHeader, HeaderError};
use crate::execution::proof::{keccak256, read_merkle_proof, ProofError};
use crate::execution::receipt::decode_receipt;
use crate::execution::rlp::encode_u64;
use crate::types::chain::{ChainContext, ConsensusEngine};
use crate::types::encoding::{quantity, EncodingError};

/// Clique nonce voting to add the coinbase to the signer set.
pub const NONCE_AUTHORIZE: [u8; 8] = [0xff; 8];
/// Clique nonce voting to remove the coinbase from the signer set.
pub const NONCE_DROP: [u8; 8] = [0x00; 8];

/// Finality required on the block carrying an `InitiateChange` event when
/// finality headers are supplied.
const CHANGE_FINALITY_PERCENT: u8 = 51;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("No validator set known before block {block}")]
    UnknownValidators { block: u64 },

    #[error("Validator change at block {block} comes without a proof")]
    MissingProof { block: u64 },

    #[error("{0:?} chains have no validator transitions")]
    UnsupportedEngine(ConsensusEngine),

    #[error("Proof for block {block} does not match the consensus engine")]
    WrongProofKind { block: u64 },

    #[error("No validator contract configured for authority-round transitions")]
    NoValidatorContract,

    #[error("Invalid validator change at block {block}: {reason}")]
    InvalidChange { block: u64, reason: String },

    #[error("Invalid vote in block {block}: {reason}")]
    InvalidVote { block: u64, reason: String },

    #[error("{votes} vote(s) for {candidate}, {required} required")]
    NotEnoughVotes {
        candidate: Address,
        votes: usize,
        required: usize,
    },

    #[error("InitiateChange log rejected: {0}")]
    InvalidLog(&'static str),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// Result of `in3_validatorList`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorList {
    pub states: Vec<ValidatorState>,
    #[serde(default, with = "quantity::opt", skip_serializing_if = "Option::is_none")]
    pub last_checked_block: Option<u64>,
}

/// A validator set and the block it takes effect at.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorState {
    #[serde(with = "quantity")]
    pub block: u64,
    pub validators: Vec<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<TransitionProof>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionProof {
    /// RLP headers of clique blocks voting for the change.
    Votes(Vec<Bytes>),
    AuraChange(AuraChangeProof),
}

/// Receipt proof of the `InitiateChange` event in an authority-round block.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuraChangeProof {
    /// RLP header of the block emitting the event.
    pub block: Bytes,
    #[serde(with = "quantity")]
    pub tx_index: u64,
    #[serde(with = "quantity")]
    pub log_index: u64,
    /// Receipts-trie proof for `tx_index`.
    pub proof: Vec<Bytes>,
    #[serde(default)]
    pub finality_blocks: Vec<Bytes>,
}

/// `keccak256("InitiateChange(bytes32,address[])")`.
pub fn initiate_change_topic() -> B256 {
    keccak256(b"InitiateChange(bytes32,address[])")
}

/// Decode ABI-encoded `address[]` event data.
pub fn decode_address_array(data: &[u8]) -> Option<Vec<Address>> {
    let word = |at: usize| data.get(at..at.checked_add(32)?);
    let offset = usize::try_from(U256::from_be_slice(word(0)?)).ok()?;
    let len = usize::try_from(U256::from_be_slice(word(offset)?)).ok()?;
    if len > data.len() / 32 {
        return None;
    }
    (0..len)
        .map(|i| {
            let w = word(offset + 32 + i * 32)?;
            w[..12]
                .iter()
                .all(|b| *b == 0)
                .then(|| Address::from_slice(&w[12..]))
        })
        .collect()
}

/// Verify and record every state in `list` not already known.
/// Returns the number of changes applied.
pub fn apply_validator_states(
    ctx: &mut ChainContext,
    list: &ValidatorList,
) -> Result<usize, TransitionError> {
    let mut states: Vec<&ValidatorState> = list.states.iter().collect();
    states.sort_by_key(|s| s.block);

    let mut applied = 0;
    for state in states {
        if ctx.validators.get_data(state.block) == state.validators {
            continue;
        }
        let block = state.block;
        let current = ctx.validators.get_data(block.saturating_sub(1));
        if current.is_empty() || block == 0 {
            return Err(TransitionError::UnknownValidators { block });
        }
        match (ctx.spec.engine, &state.proof) {
            (_, None) => return Err(TransitionError::MissingProof { block }),
            (ConsensusEngine::Ethash, _) => {
                return Err(TransitionError::UnsupportedEngine(ConsensusEngine::Ethash))
            }
            (ConsensusEngine::Clique, Some(TransitionProof::Votes(votes))) => {
                verify_clique_votes(ctx, &current, state, votes)?
            }
            (ConsensusEngine::AuthorityRound, Some(TransitionProof::AuraChange(proof))) => {
                verify_aura_change(ctx, state, proof)?
            }
            _ => return Err(TransitionError::WrongProofKind { block }),
        }

        ctx.validators.add_state(block, state.validators.clone());
        ctx.last_validator_change = ctx.last_validator_change.max(block);
        applied += 1;
        info!(
            chain_id = ctx.chain_id(),
            block,
            validators = state.validators.len(),
            "validator set change verified"
        );
    }
    Ok(applied)
}

/// A clique change adds or drops exactly one signer and is carried by
/// votes from a strict majority of the current signers.
fn verify_clique_votes(
    ctx: &ChainContext,
    current: &[Address],
    state: &ValidatorState,
    votes: &[Bytes],
) -> Result<(), TransitionError> {
    let block = state.block;
    let added: Vec<Address> = state
        .validators
        .iter()
        .filter(|v| !current.contains(v))
        .copied()
        .collect();
    let removed: Vec<Address> = current
        .iter()
        .filter(|v| !state.validators.contains(v))
        .copied()
        .collect();
    let (candidate, nonce) = match (added.as_slice(), removed.as_slice()) {
        ([candidate], []) => (*candidate, NONCE_AUTHORIZE),
        ([], [candidate]) => (*candidate, NONCE_DROP),
        _ => {
            return Err(TransitionError::InvalidChange {
                block,
                reason: format!("{} added and {} removed", added.len(), removed.len()),
            })
        }
    };
    let unique: HashSet<&Address> = state.validators.iter().collect();
    if unique.len() != state.validators.len() {
        return Err(TransitionError::InvalidChange {
            block,
            reason: "duplicate validators".to_string(),
        });
    }

    // Votes cast before the current set took effect were already tallied
    let since = ctx
        .validators
        .deltas()
        .iter()
        .map(|d| d.block)
        .filter(|b| *b < block)
        .max()
        .unwrap_or(0);

    let mut voters = HashSet::new();
    let mut last_vote = 0;
    for raw in votes {
        let header = BlockHeader::decode(raw)?;
        let number = header.number();
        let invalid = |reason: &str| TransitionError::InvalidVote {
            block: number,
            reason: reason.to_string(),
        };
        if number > block || number <= since {
            return Err(invalid("outside the voting window"));
        }
        if header.coinbase() != candidate {
            return Err(invalid("votes for another candidate"));
        }
        if header.nonce().as_ref() != nonce.as_slice() {
            return Err(invalid("nonce does not match the direction of the change"));
        }
        let signer = seal_signer(&header, ConsensusEngine::Clique)?
            .ok_or_else(|| invalid("unsealed header"))?;
        if !current.contains(&signer) {
            return Err(invalid("sealed by a non-validator"));
        }
        voters.insert(signer);
        last_vote = last_vote.max(number);
    }

    let required = current.len() / 2 + 1;
    if voters.len() < required {
        return Err(TransitionError::NotEnoughVotes {
            candidate,
            votes: voters.len(),
            required,
        });
    }
    if last_vote != block {
        return Err(TransitionError::InvalidChange {
            block,
            reason: format!("deciding vote is in block {last_vote}"),
        });
    }
    debug!(block, %candidate, votes = voters.len(), required, "clique votes verified");
    Ok(())
}

/// The event must come from the validator contract, name the parent of the
/// emitting block and list exactly the new set.
fn verify_aura_change(
    ctx: &mut ChainContext,
    state: &ValidatorState,
    proof: &AuraChangeProof,
) -> Result<(), TransitionError> {
    let contract = ctx
        .spec
        .validator_contract
        .ok_or(TransitionError::NoValidatorContract)?;
    let header = BlockHeader::decode(&proof.block)?;
    if header.number() > state.block {
        return Err(TransitionError::InvalidChange {
            block: state.block,
            reason: format!("event in later block {}", header.number()),
        });
    }

    let finality_blocks = proof
        .finality_blocks
        .iter()
        .map(|raw| BlockHeader::decode(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let check = BlockCheck {
        finality_blocks: &finality_blocks,
        finality: (!finality_blocks.is_empty()).then_some(CHANGE_FINALITY_PERCENT),
        ..BlockCheck::default()
    };
    verify_block(&header, &check, ctx)?;

    let receipt = read_merkle_proof(
        header.receipts_root(),
        &encode_u64(proof.tx_index),
        &proof.proof,
    )?
    .ok_or(TransitionError::InvalidLog("receipt not in the block"))?;
    let receipt = decode_receipt(&receipt)?;
    let log = usize::try_from(proof.log_index)
        .ok()
        .and_then(|i| receipt.logs.get(i))
        .ok_or(TransitionError::InvalidLog("log index out of range"))?;

    if log.address != contract {
        return Err(TransitionError::InvalidLog("emitted by another contract"));
    }
    if log.topics.first() != Some(&initiate_change_topic()) {
        return Err(TransitionError::InvalidLog("not an InitiateChange event"));
    }
    if log.topics.get(1) != Some(&header.parent_hash()) {
        return Err(TransitionError::InvalidLog("parent hash does not match"));
    }
    let validators = decode_address_array(&log.data)
        .ok_or(TransitionError::InvalidLog("malformed address list"))?;
    if validators != state.validators {
        return Err(TransitionError::InvalidLog("event lists a different set"));
    }
    debug!(block = state.block, event_block = header.number(), "InitiateChange verified");
    Ok(())
}
