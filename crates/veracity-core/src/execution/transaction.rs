use alloy_primitives::B256;
use serde_json::Value;

use crate::execution::proof::keccak256;
use crate::execution::receipt::{envelope_type, with_type_prefix};
use crate::execution::rlp::{encode_bytes, encode_list, encode_uint};
use crate::types::encoding::{
    field, field_address, field_bytes, field_quantity, value_bytes, EncodingError,
};

fn quantity(obj: &Value, name: &'static str) -> Result<Vec<u8>, EncodingError> {
    Ok(encode_uint(field_quantity(obj, name)?))
}

fn bytes(obj: &Value, name: &'static str) -> Result<Vec<u8>, EncodingError> {
    Ok(encode_bytes(&field_bytes(obj, name)?))
}

/// Contract creations have no recipient and encode `to` as empty bytes.
fn recipient(obj: &Value) -> Result<Vec<u8>, EncodingError> {
    match obj.get("to") {
        None | Some(Value::Null) => Ok(encode_bytes(&[])),
        Some(_) => Ok(encode_bytes(field_address(obj, "to")?.as_slice())),
    }
}

/// Calldata is `input` on current nodes and `data` on older ones.
fn input(obj: &Value) -> Result<Vec<u8>, EncodingError> {
    if obj.get("input").is_some_and(|v| !v.is_null()) {
        bytes(obj, "input")
    } else {
        bytes(obj, "data")
    }
}

/// Typed transactions sign with `yParity`; some nodes only report `v`.
fn y_parity(obj: &Value) -> Result<Vec<u8>, EncodingError> {
    if obj.get("yParity").is_some_and(|v| !v.is_null()) {
        quantity(obj, "yParity")
    } else {
        quantity(obj, "v")
    }
}

fn access_list(obj: &Value) -> Result<Vec<u8>, EncodingError> {
    let entries = match obj.get("accessList") {
        None | Some(Value::Null) => return Ok(encode_list(&[])),
        Some(list) => list.as_array().ok_or(EncodingError::MissingField("accessList"))?,
    };
    let mut encoded = Vec::with_capacity(entries.len());
    for entry in entries {
        let keys = field(entry, "storageKeys")?
            .as_array()
            .ok_or(EncodingError::MissingField("storageKeys"))?
            .iter()
            .map(|k| value_bytes(k, "storageKeys").map(|b| encode_bytes(&b)))
            .collect::<Result<Vec<_>, _>>()?;
        encoded.push(encode_list(&[
            encode_bytes(field_address(entry, "address")?.as_slice()),
            encode_list(&keys),
        ]));
    }
    Ok(encode_list(&encoded))
}

fn blob_hashes(obj: &Value) -> Result<Vec<u8>, EncodingError> {
    let hashes = field(obj, "blobVersionedHashes")?
        .as_array()
        .ok_or(EncodingError::MissingField("blobVersionedHashes"))?
        .iter()
        .map(|h| value_bytes(h, "blobVersionedHashes").map(|b| encode_bytes(&b)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(encode_list(&hashes))
}

/// Serialize a transaction JSON object into its signed network encoding,
/// which is also the value stored in the transactions trie.
pub fn encode_transaction(obj: &Value) -> Result<Vec<u8>, EncodingError> {
    let ty = envelope_type(obj)?;
    let fields = match ty {
        0 => vec![
            quantity(obj, "nonce")?,
            quantity(obj, "gasPrice")?,
            quantity(obj, "gas")?,
            recipient(obj)?,
            quantity(obj, "value")?,
            input(obj)?,
            quantity(obj, "v")?,
            quantity(obj, "r")?,
            quantity(obj, "s")?,
        ],
        1 => vec![
            quantity(obj, "chainId")?,
            quantity(obj, "nonce")?,
            quantity(obj, "gasPrice")?,
            quantity(obj, "gas")?,
            recipient(obj)?,
            quantity(obj, "value")?,
            input(obj)?,
            access_list(obj)?,
            y_parity(obj)?,
            quantity(obj, "r")?,
            quantity(obj, "s")?,
        ],
        2 => vec![
            quantity(obj, "chainId")?,
            quantity(obj, "nonce")?,
            quantity(obj, "maxPriorityFeePerGas")?,
            quantity(obj, "maxFeePerGas")?,
            quantity(obj, "gas")?,
            recipient(obj)?,
            quantity(obj, "value")?,
            input(obj)?,
            access_list(obj)?,
            y_parity(obj)?,
            quantity(obj, "r")?,
            quantity(obj, "s")?,
        ],
        _ => vec![
            quantity(obj, "chainId")?,
            quantity(obj, "nonce")?,
            quantity(obj, "maxPriorityFeePerGas")?,
            quantity(obj, "maxFeePerGas")?,
            quantity(obj, "gas")?,
            recipient(obj)?,
            quantity(obj, "value")?,
            input(obj)?,
            access_list(obj)?,
            quantity(obj, "maxFeePerBlobGas")?,
            blob_hashes(obj)?,
            y_parity(obj)?,
            quantity(obj, "r")?,
            quantity(obj, "s")?,
        ],
    };
    Ok(with_type_prefix(ty, encode_list(&fields)))
}

/// The transaction hash: keccak256 of the signed encoding.
pub fn transaction_hash(obj: &Value) -> Result<B256, EncodingError> {
    Ok(keccak256(&encode_transaction(obj)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::rlp::decode_list;
    use crate::testutil::transaction_json;
    use serde_json::json;

    #[test]
    fn test_legacy_transaction_fields() {
        let tx = transaction_json(0, 5);
        let encoded = encode_transaction(&tx).unwrap();
        assert_eq!(decode_list(&encoded).unwrap().len(), 9);
    }

    #[test]
    fn test_typed_transactions_are_prefixed() {
        for (ty, len) in [(1u8, 11usize), (2, 12), (3, 14)] {
            let encoded = encode_transaction(&transaction_json(ty, 1)).unwrap();
            assert_eq!(encoded[0], ty);
            assert_eq!(decode_list(&encoded[1..]).unwrap().len(), len);
        }
    }

    #[test]
    fn test_hash_changes_with_any_field() {
        let tx = transaction_json(2, 9);
        let original = transaction_hash(&tx).unwrap();

        let mut changed = tx.clone();
        changed["to"] = json!("0x00000000000000000000000000000000000000ff");
        assert_ne!(transaction_hash(&changed).unwrap(), original);

        let mut changed = tx.clone();
        changed["value"] = json!("0x2");
        assert_ne!(transaction_hash(&changed).unwrap(), original);
    }

    #[test]
    fn test_contract_creation_has_empty_recipient() {
        let mut tx = transaction_json(0, 1);
        tx["to"] = Value::Null;
        let encoded = encode_transaction(&tx).unwrap();
        let items = decode_list(&encoded).unwrap();
        assert!(items[3].is_empty_bytes());
    }

    #[test]
    fn test_data_alias_for_input() {
        let tx = transaction_json(0, 1);
        let mut aliased = tx.clone();
        let input = aliased["input"].take();
        aliased["data"] = input;
        assert_eq!(
            encode_transaction(&tx).unwrap(),
            encode_transaction(&aliased).unwrap()
        );
    }
}
