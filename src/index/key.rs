//! Typed index keys and their total order.

use std::cmp::Ordering;

use crate::record::{AttrType, Rid};

use super::error::{IndexError, IndexResult};

/// A typed index key. Keys of one index all share the type recorded in
/// the file's meta page.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    Int(i32),
    Real(f32),
    VarChar(Vec<u8>),
}

impl IndexKey {
    /// Decode a caller-provided key payload: Int/Real are 4 bytes LE,
    /// VarChar is a 4-byte LE length followed by that many bytes.
    pub fn decode(attr_type: AttrType, bytes: &[u8]) -> IndexResult<Self> {
        let mut pos = 0;
        let key = Self::decode_at(attr_type, bytes, &mut pos)?;
        Ok(key)
    }

    /// Decode a key at `*pos`, advancing it past the key bytes
    pub fn decode_at(attr_type: AttrType, buf: &[u8], pos: &mut usize) -> IndexResult<Self> {
        let at = *pos;
        match attr_type {
            AttrType::Int => {
                let end = at + 4;
                if end > buf.len() {
                    return Err(IndexError::InvalidArgument("key truncated".to_string()));
                }
                *pos = end;
                Ok(IndexKey::Int(i32::from_le_bytes([
                    buf[at],
                    buf[at + 1],
                    buf[at + 2],
                    buf[at + 3],
                ])))
            }
            AttrType::Real => {
                let end = at + 4;
                if end > buf.len() {
                    return Err(IndexError::InvalidArgument("key truncated".to_string()));
                }
                *pos = end;
                Ok(IndexKey::Real(f32::from_le_bytes([
                    buf[at],
                    buf[at + 1],
                    buf[at + 2],
                    buf[at + 3],
                ])))
            }
            AttrType::VarChar => {
                if at + 4 > buf.len() {
                    return Err(IndexError::InvalidArgument("key truncated".to_string()));
                }
                let len = u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
                    as usize;
                let end = at + 4 + len;
                if end > buf.len() {
                    return Err(IndexError::InvalidArgument("key truncated".to_string()));
                }
                *pos = end;
                Ok(IndexKey::VarChar(buf[at + 4..end].to_vec()))
            }
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            IndexKey::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            IndexKey::Real(v) => out.extend_from_slice(&v.to_le_bytes()),
            IndexKey::VarChar(bytes) => {
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            IndexKey::Int(_) | IndexKey::Real(_) => 4,
            IndexKey::VarChar(bytes) => 4 + bytes.len(),
        }
    }

    /// NaN cannot participate in the key order
    pub fn validate(&self) -> IndexResult<()> {
        if let IndexKey::Real(v) = self {
            if v.is_nan() {
                return Err(IndexError::InvalidArgument(
                    "NaN is not a legal index key".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Total order over same-typed keys. Real keys never hold NaN, so the
    /// partial float order is total here.
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexKey::Int(a), IndexKey::Int(b)) => a.cmp(b),
            (IndexKey::Real(a), IndexKey::Real(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (IndexKey::VarChar(a), IndexKey::VarChar(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }

    /// Human-readable form for `print_btree`
    pub fn render(&self) -> String {
        match self {
            IndexKey::Int(v) => v.to_string(),
            IndexKey::Real(v) => v.to_string(),
            IndexKey::VarChar(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// Entries with equal keys order secondarily by RID, so duplicates are
/// totally ordered.
pub fn compare_entries(a: &(IndexKey, Rid), b: &(IndexKey, Rid)) -> Ordering {
    a.0.compare(&b.0).then_with(|| a.1.cmp(&b.1))
}
