use alloy_primitives::{Address, Bytes, B256, U256};

use crate::execution::proof::{keccak256, verify_merkle_proof, ProofError};
use crate::execution::rlp::{encode_bytes, encode_list, encode_u64, encode_uint};
use crate::types::encoding::quantity_bytes;
use crate::types::execution::AccountState;
use crate::types::proof::AccountProofEntry;

/// An account whose fields and listed storage slots were proven against a
/// state root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedAccount {
    pub address: Address,
    pub account: AccountState,
    /// Proven `(slot, value)` pairs. Absent slots are listed with value 0.
    pub storage: Vec<(U256, U256)>,
    /// Code, if it was supplied and matched the code hash.
    pub code: Option<Bytes>,
}

impl VerifiedAccount {
    /// Look up a verified storage slot value by key.
    pub fn get_storage(&self, key: U256) -> Option<U256> {
        self.storage.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }
}

/// RLP of an account as stored in the state trie:
/// `[nonce, balance, storageRoot, codeHash]`.
pub fn encode_account(account: &AccountState) -> Vec<u8> {
    encode_list(&[
        encode_u64(account.nonce),
        encode_uint(account.balance),
        encode_bytes(account.storage_root.as_slice()),
        encode_bytes(account.code_hash.as_slice()),
    ])
}

/// Servers report absent accounts with either the empty hashes or zeros.
fn normalize_hash(hash: B256, empty: B256) -> B256 {
    if hash.is_zero() {
        empty
    } else {
        hash
    }
}

/// Verify an `eth_getProof` entry against a trusted state root.
///
/// The account proof must commit exactly the claimed fields; an empty
/// account must come with a non-existence proof. Every listed storage slot
/// is checked the same way against the claimed storage hash, with zero
/// values proven absent.
pub fn verify_account_proof(
    state_root: B256,
    entry: &AccountProofEntry,
) -> Result<VerifiedAccount, ProofError> {
    let nonce = u64::try_from(entry.nonce).map_err(|_| ProofError::InvalidAccountEncoding {
        reason: format!("nonce {} exceeds 64 bits", entry.nonce),
    })?;
    let account = AccountState {
        nonce,
        balance: entry.balance,
        storage_root: normalize_hash(entry.storage_hash, AccountState::EMPTY_STORAGE_ROOT),
        code_hash: normalize_hash(entry.code_hash, AccountState::EMPTY_CODE_HASH),
    };

    // The key in the state trie is keccak256(address)
    let path = keccak256(entry.address.as_slice());
    let expected = (!account.is_empty()).then(|| encode_account(&account));
    verify_merkle_proof(state_root, path.as_slice(), &entry.account_proof, expected.as_deref())?;

    let mut storage = Vec::with_capacity(entry.storage_proof.len());
    for slot in &entry.storage_proof {
        let path = keccak256(&slot.key.to_be_bytes::<32>());
        let expected = (!slot.value.is_zero()).then(|| encode_bytes(&quantity_bytes(slot.value)));
        verify_merkle_proof(account.storage_root, path.as_slice(), &slot.proof, expected.as_deref())?;
        storage.push((slot.key, slot.value));
    }

    if let Some(code) = &entry.code {
        if keccak256(code) != account.code_hash {
            return Err(ProofError::CodeHashMismatch {
                expected: account.code_hash,
            });
        }
    }

    Ok(VerifiedAccount {
        address: entry.address,
        account,
        storage,
        code: entry.code.clone(),
    })
}
