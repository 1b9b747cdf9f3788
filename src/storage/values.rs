//! Compressed bytes-array codec
//!
//! Marshals a list of byte strings (label names and values of one series)
//! into a single LZ4 block.
//!
//! Format before compression: for each value, `len u32 BE` then the bytes.
//! The item count is stored by the caller alongside the marshal type.

use crate::storage::error::{StorageError, StorageResult};

/// Marshal type tag stored next to the encoded payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MarshalType {
    /// Length-prefixed values compressed with LZ4
    Lz4BytesArray = 7,
}

impl MarshalType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MarshalType {
    type Error = StorageError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            7 => Ok(MarshalType::Lz4BytesArray),
            other => Err(StorageError::Codec(format!("unknown marshal type {}", other))),
        }
    }
}

/// Marshal `values`, appending the encoded payload to `dst`
pub fn marshal_values(dst: &mut Vec<u8>, values: &[&[u8]]) -> StorageResult<MarshalType> {
    if values.is_empty() {
        return Err(StorageError::Codec(
            "values must contain at least one item".to_string(),
        ));
    }

    let raw_len: usize = values.iter().map(|v| v.len() + 4).sum();
    let mut raw = Vec::with_capacity(raw_len);
    for v in values {
        let len = u32::try_from(v.len())
            .map_err(|_| StorageError::Codec(format!("value too long: {} bytes", v.len())))?;
        raw.extend_from_slice(&len.to_be_bytes());
        raw.extend_from_slice(v);
    }

    dst.extend_from_slice(&lz4_flex::compress_prepend_size(&raw));
    Ok(MarshalType::Lz4BytesArray)
}

/// Unmarshal exactly `items_count` values from `src`
pub fn unmarshal_values(
    src: &[u8],
    marshal_type: MarshalType,
    items_count: usize,
) -> StorageResult<Vec<Vec<u8>>> {
    match marshal_type {
        MarshalType::Lz4BytesArray => {
            let raw = lz4_flex::decompress_size_prepended(src).map_err(|e| {
                StorageError::Codec(format!(
                    "cannot decompress {} values from {} bytes: {}",
                    items_count,
                    src.len(),
                    e
                ))
            })?;

            let mut out = Vec::with_capacity(items_count);
            let mut rest = raw.as_slice();
            for i in 0..items_count {
                if rest.len() < 4 {
                    return Err(StorageError::Codec(format!(
                        "truncated length for value #{}",
                        i
                    )));
                }
                let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
                rest = &rest[4..];
                if rest.len() < len {
                    return Err(StorageError::Codec(format!(
                        "truncated value #{}: want {} bytes, have {}",
                        i,
                        len,
                        rest.len()
                    )));
                }
                out.push(rest[..len].to_vec());
                rest = &rest[len..];
            }

            if !rest.is_empty() {
                return Err(StorageError::Codec(format!(
                    "{} unexpected trailing bytes after {} values",
                    rest.len(),
                    items_count
                )));
            }

            Ok(out)
        }
    }
}
