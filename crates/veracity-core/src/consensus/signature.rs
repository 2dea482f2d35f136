use alloy_primitives::{Address, B256, U256};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, SECP256K1,
};
use thiserror::Error;

use crate::execution::proof::keccak256;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Signature must be 65 bytes, got {0}")]
    InvalidLength(usize),

    #[error("Invalid recovery id {0}")]
    InvalidRecoveryId(u64),

    #[error("Public key recovery failed: {0}")]
    Recovery(#[from] secp256k1::Error),
}

/// The message a node signs to vouch for a block:
/// `keccak256(blockHash || uint256(blockNumber))`.
pub fn node_message_hash(block_hash: B256, number: u64) -> B256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(block_hash.as_slice());
    buf[32..].copy_from_slice(&U256::from(number).to_be_bytes::<32>());
    keccak256(&buf)
}

/// Converts a public key into an ethereum address by hashing the encoded
/// public key with keccak256.
pub fn public_key_to_address(public: PublicKey) -> Address {
    // strip out the first byte, the uncompressed tag
    let hash = keccak256(&public.serialize_uncompressed()[1..]);
    Address::from_slice(&hash[12..])
}

/// Recover the signer of `msg` from an `r || s || v` signature.
/// `v` may be given as 0/1 or 27/28.
pub fn recover_signer(msg: B256, sig: &[u8]) -> Result<Address, SignatureError> {
    if sig.len() != 65 {
        return Err(SignatureError::InvalidLength(sig.len()));
    }
    let v = u64::from(sig[64]);
    recover_compact(msg, &sig[..64], v)
}

/// Recover the signer from separate `r`, `s` and `v` values.
pub fn recover_from_parts(msg: B256, r: U256, s: U256, v: u64) -> Result<Address, SignatureError> {
    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(&r.to_be_bytes::<32>());
    compact[32..].copy_from_slice(&s.to_be_bytes::<32>());
    recover_compact(msg, &compact, v)
}

fn recover_compact(msg: B256, compact: &[u8], v: u64) -> Result<Address, SignatureError> {
    let id = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        _ => return Err(SignatureError::InvalidRecoveryId(v)),
    };
    let id = RecoveryId::from_i32(id as i32)?;
    let sig = RecoverableSignature::from_compact(compact, id)?;
    let public = SECP256K1.recover_ecdsa(&Message::from_digest_slice(msg.as_slice())?, &sig)?;
    Ok(public_key_to_address(public))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sign, signer_address, signing_key};
    use hex_literal::hex;

    #[test]
    fn test_known_recovery_vector() {
        let sig = hex!("650acf9d3f5f0a2c799776a1254355d5f4061762a237396a99a0e0e3fc2bcd6729514a0dacb2e623ac4abd157cb18163ff942280db4d5caad66ddf941ba12e0300");
        let hash = B256::from(hex!("47173285a8d7341e5e972fc677286384f802f8ef42a5ec5f03bbfa254cb01fad"));
        let expected = Address::from(hex!("c08b5542d177ac6686946920409741463a15dddb"));
        assert_eq!(recover_signer(hash, &sig).unwrap(), expected);

        let mut legacy_v = sig;
        legacy_v[64] = 27;
        assert_eq!(recover_signer(hash, &legacy_v).unwrap(), expected);
    }

    #[test]
    fn test_sign_and_recover() {
        let key = signing_key(3);
        let msg = node_message_hash(B256::repeat_byte(0x42), 1234);
        let sig = sign(&key, msg);
        assert_eq!(recover_signer(msg, &sig).unwrap(), signer_address(&key));

        let r = U256::from_be_slice(&sig[..32]);
        let s = U256::from_be_slice(&sig[32..64]);
        assert_eq!(
            recover_from_parts(msg, r, s, u64::from(sig[64]) + 27).unwrap(),
            signer_address(&key)
        );
    }

    #[test]
    fn test_message_hash_binds_number() {
        let hash = B256::repeat_byte(1);
        assert_ne!(node_message_hash(hash, 1), node_message_hash(hash, 2));
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(matches!(
            recover_signer(B256::ZERO, &[0u8; 64]),
            Err(SignatureError::InvalidLength(64))
        ));
        let mut sig = [1u8; 65];
        sig[64] = 5;
        assert!(matches!(
            recover_signer(B256::ZERO, &sig),
            Err(SignatureError::InvalidRecoveryId(5))
        ));
    }
}
