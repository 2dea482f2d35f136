use alloy_primitives::{Address, Bytes, B256};
use serde_json::Value;

use crate::execution::rlp::{decode_list, encode_byte_list, encode_bytes, encode_list, encode_u64};
use crate::types::encoding::{
    bytes_to_u64, field, field_address, field_b256, field_bytes, field_u64, value_bytes,
    EncodingError,
};
use crate::types::execution::{Log, TransactionReceipt};

/// EIP-2718 type of a transaction or receipt JSON object, 0 when absent.
pub fn envelope_type(obj: &Value) -> Result<u8, EncodingError> {
    if obj.get("type").map_or(true, Value::is_null) {
        return Ok(0);
    }
    let ty = field_u64(obj, "type")?;
    u8::try_from(ty)
        .ok()
        .filter(|t| *t <= 3)
        .ok_or(EncodingError::UnsupportedType(ty))
}

/// Parse a log object as returned by `eth_getLogs` or inside a receipt.
pub fn parse_log(obj: &Value) -> Result<Log, EncodingError> {
    let topics = field(obj, "topics")?
        .as_array()
        .ok_or(EncodingError::MissingField("topics"))?
        .iter()
        .map(|t| {
            let bytes = value_bytes(t, "topics")?;
            if bytes.len() != 32 {
                return Err(EncodingError::InvalidLength {
                    field: "topics",
                    expected: 32,
                    got: bytes.len(),
                });
            }
            Ok(B256::from_slice(&bytes))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Log {
        address: field_address(obj, "address")?,
        topics,
        data: Bytes::from(field_bytes(obj, "data")?),
    })
}

fn encode_log(log: &Log) -> Vec<u8> {
    encode_list(&[
        encode_bytes(log.address.as_slice()),
        encode_byte_list(&log.topics),
        encode_bytes(&log.data),
    ])
}

/// Serialize a receipt JSON object the way it is stored in the receipts
/// trie: `type || rlp([status|root, cumulativeGas, bloom, logs])`.
pub fn encode_receipt(obj: &Value) -> Result<Vec<u8>, EncodingError> {
    let ty = envelope_type(obj)?;

    // Pre-Byzantium receipts carry the intermediate state root instead
    let outcome = match obj.get("status").filter(|s| !s.is_null()) {
        Some(_) => encode_u64(field_u64(obj, "status")?),
        None => encode_bytes(field_b256(obj, "root")?.as_slice()),
    };

    let logs = field(obj, "logs")?
        .as_array()
        .ok_or(EncodingError::MissingField("logs"))?
        .iter()
        .map(|l| parse_log(l).map(|log| encode_log(&log)))
        .collect::<Result<Vec<_>, _>>()?;

    let body = encode_list(&[
        outcome,
        encode_u64(field_u64(obj, "cumulativeGasUsed")?),
        encode_bytes(&field_bytes(obj, "logsBloom")?),
        encode_list(&logs),
    ]);

    Ok(with_type_prefix(ty, body))
}

pub(crate) fn with_type_prefix(ty: u8, body: Vec<u8>) -> Vec<u8> {
    if ty == 0 {
        return body;
    }
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(ty);
    out.extend_from_slice(&body);
    out
}

/// Decode a receipt as stored in the receipts trie.
/// Post-EIP-2718, receipts may be typed (prefixed with a type byte).
pub fn decode_receipt(data: &[u8]) -> Result<TransactionReceipt, EncodingError> {
    let (tx_type, rlp_data) = match data.first() {
        Some(&ty) if ty <= 0x7F => (ty, &data[1..]),
        _ => (0, data),
    };

    let items = decode_list(rlp_data)?;
    if items.len() != 4 {
        return Err(EncodingError::InvalidLength {
            field: "receipt",
            expected: 4,
            got: items.len(),
        });
    }

    let outcome = items[0].as_bytes()?;
    let (status, root) = if outcome.len() == 32 {
        (None, Some(B256::from_slice(outcome)))
    } else {
        (Some(outcome.first().copied().unwrap_or(0)), None)
    };

    let mut logs = Vec::new();
    for log in items[3].as_list()? {
        let fields = log.as_list()?;
        if fields.len() != 3 {
            return Err(EncodingError::InvalidLength {
                field: "log",
                expected: 3,
                got: fields.len(),
            });
        }
        let address = fields[0].as_bytes()?;
        if address.len() != 20 {
            return Err(EncodingError::InvalidLength {
                field: "address",
                expected: 20,
                got: address.len(),
            });
        }
        let topics = fields[1]
            .as_list()?
            .iter()
            .map(|t| {
                let t = t.as_bytes()?;
                if t.len() != 32 {
                    return Err(EncodingError::InvalidLength {
                        field: "topics",
                        expected: 32,
                        got: t.len(),
                    });
                }
                Ok(B256::from_slice(t))
            })
            .collect::<Result<Vec<_>, _>>()?;
        logs.push(Log {
            address: Address::from_slice(address),
            topics,
            data: Bytes::copy_from_slice(fields[2].as_bytes()?),
        });
    }

    Ok(TransactionReceipt {
        tx_type,
        status,
        root,
        cumulative_gas_used: bytes_to_u64(items[1].as_bytes()?),
        logs_bloom: Bytes::copy_from_slice(items[2].as_bytes()?),
        logs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::receipt_json;
    use serde_json::json;

    #[test]
    fn test_receipt_roundtrip_through_trie_value() {
        let receipt = receipt_json(2, 21_000, 1);
        let encoded = encode_receipt(&receipt).unwrap();
        assert_eq!(encoded[0], 2);

        let decoded = decode_receipt(&encoded).unwrap();
        assert_eq!(decoded.tx_type, 2);
        assert_eq!(decoded.status, Some(1));
        assert_eq!(decoded.cumulative_gas_used, 21_000);
        assert_eq!(decoded.logs.len(), 1);
        assert_eq!(decoded.logs[0], parse_log(&receipt["logs"][0]).unwrap());
    }

    #[test]
    fn test_legacy_receipt_has_no_prefix() {
        let encoded = encode_receipt(&receipt_json(0, 50_000, 0)).unwrap();
        assert!(encoded[0] >= 0xC0);
        assert_eq!(decode_receipt(&encoded).unwrap().tx_type, 0);
    }

    #[test]
    fn test_pre_byzantium_root() {
        let mut receipt = receipt_json(0, 1, 0);
        receipt["status"] = Value::Null;
        receipt["root"] = json!(format!("0x{}", "ab".repeat(32)));
        let decoded = decode_receipt(&encode_receipt(&receipt).unwrap()).unwrap();
        assert_eq!(decoded.status, None);
        assert_eq!(decoded.root, Some(B256::repeat_byte(0xab)));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut receipt = receipt_json(0, 1, 0);
        receipt["type"] = json!("0x7e");
        assert!(matches!(
            encode_receipt(&receipt),
            Err(EncodingError::UnsupportedType(0x7e))
        ));
    }
}
