use alloy_primitives::{Address, Bytes, B256, U256};
use serde_json::Value;
use thiserror::Error;

use crate::execution::proof::keccak256;
use crate::execution::rlp::{decode_bytes, decode_list, encode_byte_list, Item};
use crate::types::encoding::{
    bytes_to_u64, field_bytes, field_quantity, quantity_bytes, value_bytes, EncodingError,
};

pub const PARENT_HASH: usize = 0;
pub const UNCLES_HASH: usize = 1;
pub const COINBASE: usize = 2;
pub const STATE_ROOT: usize = 3;
pub const TRANSACTIONS_ROOT: usize = 4;
pub const RECEIPTS_ROOT: usize = 5;
pub const LOGS_BLOOM: usize = 6;
pub const DIFFICULTY: usize = 7;
pub const NUMBER: usize = 8;
pub const GAS_LIMIT: usize = 9;
pub const GAS_USED: usize = 10;
pub const TIMESTAMP: usize = 11;
pub const EXTRA_DATA: usize = 12;
/// First sealed field: `mixHash` on ethash/clique, `step` on authority-round.
pub const SEAL_START: usize = 13;
pub const SEAL_FIELDS: usize = 2;
pub const BASE_FEE: usize = 15;

const FIXED_FIELDS: usize = SEAL_START + SEAL_FIELDS;

/// Post-London trailing fields, in header order.
const OPTIONAL_FIELDS: [&str; 6] = [
    "baseFeePerGas",
    "withdrawalsRoot",
    "blobGasUsed",
    "excessBlobGas",
    "parentBeaconBlockRoot",
    "requestsHash",
];

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("Invalid header RLP: {0}")]
    Rlp(#[from] alloy_rlp::Error),

    #[error("Header has {got} fields, expected at least {FIXED_FIELDS}")]
    TooFewFields { got: usize },

    #[error("Header field {index} has {got} bytes, expected {expected}")]
    FieldLength {
        index: usize,
        expected: usize,
        got: usize,
    },

    #[error("Header has {0} seal fields; only two are supported")]
    UnsupportedSeal(usize),

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// A block header as its ordered list of raw RLP field payloads.
///
/// Raw payloads re-encode byte for byte, whatever the engine's seal layout
/// and including trailing fields this crate does not interpret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    fields: Vec<Bytes>,
}

impl BlockHeader {
    /// Build from raw field payloads, checking the fixed-size fields.
    pub fn from_fields(fields: Vec<Bytes>) -> Result<Self, HeaderError> {
        if fields.len() < FIXED_FIELDS {
            return Err(HeaderError::TooFewFields { got: fields.len() });
        }
        let sizes = [
            (PARENT_HASH, 32),
            (UNCLES_HASH, 32),
            (COINBASE, 20),
            (STATE_ROOT, 32),
            (TRANSACTIONS_ROOT, 32),
            (RECEIPTS_ROOT, 32),
            (LOGS_BLOOM, 256),
        ];
        for (index, expected) in sizes {
            if fields[index].len() != expected {
                return Err(HeaderError::FieldLength {
                    index,
                    expected,
                    got: fields[index].len(),
                });
            }
        }
        if fields.get(BASE_FEE).is_some_and(|fee| fee.len() > 32) {
            return Err(HeaderError::FieldLength {
                index: BASE_FEE,
                expected: 32,
                got: fields[BASE_FEE].len(),
            });
        }
        for index in [NUMBER, GAS_LIMIT, GAS_USED, TIMESTAMP] {
            if fields[index].len() > 8 {
                return Err(HeaderError::FieldLength {
                    index,
                    expected: 8,
                    got: fields[index].len(),
                });
            }
        }
        Ok(Self { fields })
    }

    /// Decode an RLP-encoded header.
    ///
    /// Trailing fields are all strings. A list after the seal is an extra
    /// seal field, such as authority-round empty steps, and is rejected
    /// rather than read as `baseFeePerGas`.
    pub fn decode(data: &[u8]) -> Result<Self, HeaderError> {
        let items = decode_list(data)?;
        let mut fields = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if index >= FIXED_FIELDS && matches!(item, Item::List(_)) {
                return Err(HeaderError::UnsupportedSeal(index - SEAL_START + 1));
            }
            fields.push(Bytes::copy_from_slice(item.as_bytes()?));
        }
        Self::from_fields(fields)
    }

    /// Build from a JSON-RPC block object.
    ///
    /// `sealFields` (authority-round nodes) are RLP items and are decoded;
    /// otherwise `mixHash` and `nonce` form the seal.
    pub fn from_json(block: &Value) -> Result<Self, HeaderError> {
        let bytes = |name: &'static str| field_bytes(block, name).map(Bytes::from);
        let number = |name: &'static str| {
            field_quantity(block, name).map(|q| Bytes::from(quantity_bytes(q)))
        };
        let coinbase = if block.get("miner").is_some_and(|m| !m.is_null()) {
            bytes("miner")?
        } else {
            bytes("author")?
        };

        let mut fields = vec![
            bytes("parentHash")?,
            bytes("sha3Uncles")?,
            coinbase,
            bytes("stateRoot")?,
            bytes("transactionsRoot")?,
            bytes("receiptsRoot")?,
            bytes("logsBloom")?,
            number("difficulty")?,
            number("number")?,
            number("gasLimit")?,
            number("gasUsed")?,
            number("timestamp")?,
            bytes("extraData")?,
        ];

        match block.get("sealFields").and_then(Value::as_array) {
            Some(seal) => {
                if seal.len() != SEAL_FIELDS {
                    return Err(HeaderError::UnsupportedSeal(seal.len()));
                }
                for item in seal {
                    let raw = value_bytes(item, "sealFields")?;
                    fields.push(Bytes::copy_from_slice(decode_bytes(&raw)?));
                }
            }
            None => {
                fields.push(bytes("mixHash")?);
                fields.push(bytes("nonce")?);
            }
        }

        for name in OPTIONAL_FIELDS {
            if block.get(name).map_or(true, Value::is_null) {
                break;
            }
            let value = if matches!(name, "baseFeePerGas" | "blobGasUsed" | "excessBlobGas") {
                number(name)?
            } else {
                bytes(name)?
            };
            fields.push(value);
        }

        Self::from_fields(fields)
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_byte_list(&self.fields)
    }

    /// keccak256 of the RLP encoding.
    pub fn hash(&self) -> B256 {
        keccak256(&self.encode())
    }

    /// Hash over every field except the seal, as signed by authority-round.
    pub fn bare_hash(&self) -> B256 {
        let unsealed: Vec<&Bytes> = self.fields[..SEAL_START]
            .iter()
            .chain(&self.fields[FIXED_FIELDS..])
            .collect();
        keccak256(&encode_byte_list(&unsealed))
    }

    /// A copy with `extraData` replaced.
    pub fn with_extra_data(&self, extra: Bytes) -> Self {
        let mut fields = self.fields.clone();
        fields[EXTRA_DATA] = extra;
        Self { fields }
    }

    pub fn fields(&self) -> &[Bytes] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&Bytes> {
        self.fields.get(index)
    }

    pub fn seal_fields(&self) -> &[Bytes] {
        &self.fields[SEAL_START..FIXED_FIELDS]
    }

    fn b256(&self, index: usize) -> B256 {
        B256::from_slice(&self.fields[index])
    }

    pub fn parent_hash(&self) -> B256 {
        self.b256(PARENT_HASH)
    }

    pub fn uncles_hash(&self) -> B256 {
        self.b256(UNCLES_HASH)
    }

    pub fn coinbase(&self) -> Address {
        Address::from_slice(&self.fields[COINBASE])
    }

    pub fn state_root(&self) -> B256 {
        self.b256(STATE_ROOT)
    }

    pub fn transactions_root(&self) -> B256 {
        self.b256(TRANSACTIONS_ROOT)
    }

    pub fn receipts_root(&self) -> B256 {
        self.b256(RECEIPTS_ROOT)
    }

    pub fn difficulty(&self) -> U256 {
        U256::from_be_slice(&self.fields[DIFFICULTY])
    }

    pub fn number(&self) -> u64 {
        bytes_to_u64(&self.fields[NUMBER])
    }

    pub fn gas_limit(&self) -> u64 {
        bytes_to_u64(&self.fields[GAS_LIMIT])
    }

    pub fn timestamp(&self) -> u64 {
        bytes_to_u64(&self.fields[TIMESTAMP])
    }

    pub fn extra_data(&self) -> &Bytes {
        &self.fields[EXTRA_DATA]
    }

    /// The 8-byte nonce of ethash/clique headers.
    pub fn nonce(&self) -> &Bytes {
        &self.fields[SEAL_START + 1]
    }

    /// `mixHash` (`prevRandao` after the merge), if the seal has that shape.
    pub fn mix_hash(&self) -> Option<B256> {
        let mix = &self.fields[SEAL_START];
        (mix.len() == 32).then(|| B256::from_slice(mix))
    }

    pub fn base_fee(&self) -> Option<U256> {
        self.fields.get(BASE_FEE).map(|f| U256::from_be_slice(f))
    }

    /// Number of post-London trailing fields present.
    pub fn trailing_fields(&self) -> usize {
        self.fields.len() - FIXED_FIELDS
    }
}
