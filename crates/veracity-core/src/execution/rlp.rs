//! Thin helpers over `alloy-rlp` for walking untyped RLP structures.
//!
//! Trie nodes, headers and receipts are heterogeneous lists, so instead of
//! deriving typed decoders we slice them into [`Item`]s and interpret the
//! items at the call site.

use alloy_primitives::U256;
use alloy_rlp::{Error, Header};

use crate::types::encoding::quantity_bytes;

/// One decoded RLP item, borrowing from the input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Item<'a> {
    /// A byte string payload (header stripped).
    Bytes(&'a [u8]),
    /// A nested list, as its complete encoding (header included).
    List(&'a [u8]),
}

impl<'a> Item<'a> {
    pub fn as_bytes(&self) -> Result<&'a [u8], Error> {
        match self {
            Item::Bytes(b) => Ok(b),
            Item::List(_) => Err(Error::UnexpectedList),
        }
    }

    pub fn as_list(&self) -> Result<Vec<Item<'a>>, Error> {
        match self {
            Item::List(raw) => decode_list(raw),
            Item::Bytes(_) => Err(Error::UnexpectedString),
        }
    }

    pub fn is_empty_bytes(&self) -> bool {
        matches!(self, Item::Bytes(b) if b.is_empty())
    }
}

/// Decode the first item of `data`, returning it with its encoded length.
pub fn decode_item(data: &[u8]) -> Result<(Item<'_>, usize), Error> {
    let mut buf = data;
    let header = Header::decode(&mut buf)?;
    let header_len = data.len() - buf.len();
    if buf.len() < header.payload_length {
        return Err(Error::InputTooShort);
    }
    let total = header_len + header.payload_length;
    let item = if header.list {
        Item::List(&data[..total])
    } else {
        Item::Bytes(&buf[..header.payload_length])
    };
    Ok((item, total))
}

/// Decode `data` as exactly one list and return its items.
pub fn decode_list(data: &[u8]) -> Result<Vec<Item<'_>>, Error> {
    let mut buf = data;
    let header = Header::decode(&mut buf)?;
    if !header.list {
        return Err(Error::UnexpectedString);
    }
    if buf.len() != header.payload_length {
        return Err(Error::UnexpectedLength);
    }

    let mut items = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let (item, consumed) = decode_item(&buf[offset..])?;
        items.push(item);
        offset += consumed;
    }
    Ok(items)
}

/// Decode `data` as exactly one byte string.
pub fn decode_bytes(data: &[u8]) -> Result<&[u8], Error> {
    let (item, consumed) = decode_item(data)?;
    if consumed != data.len() {
        return Err(Error::UnexpectedLength);
    }
    item.as_bytes()
}

pub fn encode_bytes(bytes: &[u8]) -> Vec<u8> {
    alloy_rlp::encode(bytes)
}

pub fn encode_u64(value: u64) -> Vec<u8> {
    alloy_rlp::encode(value)
}

pub fn encode_uint(value: U256) -> Vec<u8> {
    encode_bytes(&quantity_bytes(value))
}

/// Wrap already-encoded items in a list header.
pub fn encode_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_length = items.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(payload_length + 9);
    Header {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

/// A list of byte strings, such as topics or header fields.
pub fn encode_byte_list<T: AsRef<[u8]>>(items: &[T]) -> Vec<u8> {
    let encoded: Vec<Vec<u8>> = items.iter().map(|i| encode_bytes(i.as_ref())).collect();
    encode_list(&encoded)
}
