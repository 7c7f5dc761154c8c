//! Transcoding between the external record format and the stored form.
//!
//! External payloads carry a null bitmap followed by the packed non-null
//! values (VarChar with a 4-byte length prefix). The stored form replaces
//! the bitmap with a field directory of one u16 end-offset per attribute,
//! so that per-attribute reads are O(1); VarChar length prefixes are
//! dropped because lengths fall out of adjacent directory entries.

use std::cmp::Ordering;

use super::error::{RecordError, RecordResult};
use super::schema::{AttrType, Attribute};

/// Directory entry value marking a null field. Legal end offsets are
/// always at least `2 * n_fields`, so zero is unambiguous.
pub const NULL_FIELD: u16 = 0;

/// Size of the null bitmap for `n` fields
pub fn null_bitmap_size(n: usize) -> usize {
    n.div_ceil(8)
}

/// Whether field `i` is null in an external payload's bitmap
pub fn is_null_external(bitmap: &[u8], i: usize) -> bool {
    bitmap[i / 8] & (0x80 >> (i % 8)) != 0
}

fn set_null_external(bitmap: &mut [u8], i: usize) {
    bitmap[i / 8] |= 0x80 >> (i % 8);
}

/// Rewrite an external payload into the stored form:
/// `n` u16 end-offsets (NULL_FIELD for null) followed by the packed values.
pub fn encode_internal(descriptor: &[Attribute], data: &[u8]) -> RecordResult<Vec<u8>> {
    let n = descriptor.len();
    if n == 0 {
        // A zero-field record would occupy zero bytes and its slot entry
        // would collide with the tombstone encoding
        return Err(RecordError::InvalidArgument(
            "record descriptor is empty".to_string(),
        ));
    }
    let bitmap_size = null_bitmap_size(n);
    if data.len() < bitmap_size {
        return Err(RecordError::InvalidArgument(format!(
            "payload of {} bytes is shorter than its null bitmap",
            data.len()
        )));
    }

    let bitmap = &data[..bitmap_size];
    let dir_size = 2 * n;
    let mut dir = vec![0u16; n];
    let mut values = Vec::with_capacity(data.len());
    let mut pos = bitmap_size;

    for (i, attr) in descriptor.iter().enumerate() {
        if is_null_external(bitmap, i) {
            dir[i] = NULL_FIELD;
            continue;
        }

        let value = match attr.attr_type {
            AttrType::Int | AttrType::Real => {
                let end = pos + 4;
                if end > data.len() {
                    return Err(RecordError::InvalidArgument(format!(
                        "payload truncated in field '{}'",
                        attr.name
                    )));
                }
                &data[pos..end]
            }
            AttrType::VarChar => {
                if pos + 4 > data.len() {
                    return Err(RecordError::InvalidArgument(format!(
                        "payload truncated in field '{}'",
                        attr.name
                    )));
                }
                let len =
                    u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
                        as usize;
                if len > attr.length as usize {
                    return Err(RecordError::InvalidArgument(format!(
                        "field '{}' is {} bytes, declared maximum is {}",
                        attr.name, len, attr.length
                    )));
                }
                let end = pos + 4 + len;
                if end > data.len() {
                    return Err(RecordError::InvalidArgument(format!(
                        "payload truncated in field '{}'",
                        attr.name
                    )));
                }
                &data[pos + 4..end]
            }
        };

        pos += match attr.attr_type {
            AttrType::Int | AttrType::Real => 4,
            AttrType::VarChar => 4 + value.len(),
        };
        values.extend_from_slice(value);
        dir[i] = (dir_size + values.len()) as u16;
    }

    let mut internal = Vec::with_capacity(dir_size + values.len());
    for entry in &dir {
        internal.extend_from_slice(&entry.to_le_bytes());
    }
    internal.extend_from_slice(&values);
    Ok(internal)
}

/// Reconstitute the external payload from the stored form
pub fn decode_external(descriptor: &[Attribute], internal: &[u8]) -> RecordResult<Vec<u8>> {
    let n = descriptor.len();
    let bitmap_size = null_bitmap_size(n);
    let mut external = vec![0u8; bitmap_size];

    for (i, attr) in descriptor.iter().enumerate() {
        match field_bytes(descriptor, internal, i)? {
            None => set_null_external(&mut external, i),
            Some(value) => match attr.attr_type {
                AttrType::Int | AttrType::Real => external.extend_from_slice(value),
                AttrType::VarChar => {
                    external.extend_from_slice(&(value.len() as u32).to_le_bytes());
                    external.extend_from_slice(value);
                }
            },
        }
    }

    Ok(external)
}

fn dir_entry(internal: &[u8], i: usize) -> RecordResult<u16> {
    let at = 2 * i;
    if at + 2 > internal.len() {
        return Err(RecordError::InvalidArgument(
            "stored record shorter than its field directory".to_string(),
        ));
    }
    Ok(u16::from_le_bytes([internal[at], internal[at + 1]]))
}

/// Value bytes of field `idx` in the stored form, or `None` when null
pub fn field_bytes<'a>(
    descriptor: &[Attribute],
    internal: &'a [u8],
    idx: usize,
) -> RecordResult<Option<&'a [u8]>> {
    let n = descriptor.len();
    let end = dir_entry(internal, idx)?;
    if end == NULL_FIELD {
        return Ok(None);
    }

    // Start is the end of the nearest preceding non-null field
    let mut start = (2 * n) as u16;
    for j in (0..idx).rev() {
        let prev = dir_entry(internal, j)?;
        if prev != NULL_FIELD {
            start = prev;
            break;
        }
    }

    if start > end || end as usize > internal.len() {
        return Err(RecordError::InvalidArgument(format!(
            "field directory entry {} out of bounds",
            idx
        )));
    }
    Ok(Some(&internal[start as usize..end as usize]))
}

/// Compare a stored field value against a condition value in the key
/// payload format (Int/Real 4 bytes LE, VarChar length-prefixed).
/// Returns `None` when the comparison is undefined (e.g. NaN).
pub fn compare_field(
    attr_type: AttrType,
    field: &[u8],
    cond: &[u8],
) -> RecordResult<Option<Ordering>> {
    match attr_type {
        AttrType::Int => {
            let lhs = i32::from_le_bytes(decode_fixed(field, "record field")?);
            let rhs = i32::from_le_bytes(decode_fixed(cond, "condition value")?);
            Ok(Some(lhs.cmp(&rhs)))
        }
        AttrType::Real => {
            let lhs = f32::from_le_bytes(decode_fixed(field, "record field")?);
            let rhs = f32::from_le_bytes(decode_fixed(cond, "condition value")?);
            Ok(lhs.partial_cmp(&rhs))
        }
        AttrType::VarChar => {
            if cond.len() < 4 {
                return Err(RecordError::InvalidArgument(
                    "condition value truncated".to_string(),
                ));
            }
            let len = u32::from_le_bytes([cond[0], cond[1], cond[2], cond[3]]) as usize;
            if 4 + len > cond.len() {
                return Err(RecordError::InvalidArgument(
                    "condition value truncated".to_string(),
                ));
            }
            Ok(Some(field.cmp(&cond[4..4 + len])))
        }
    }
}

fn decode_fixed(bytes: &[u8], what: &str) -> RecordResult<[u8; 4]> {
    bytes
        .try_into()
        .map_err(|_| RecordError::InvalidArgument(format!("{} is not 4 bytes", what)))
}

/// Render one value for `print_record`
pub fn format_value(attr_type: AttrType, value: &[u8]) -> RecordResult<String> {
    match attr_type {
        AttrType::Int => Ok(i32::from_le_bytes(decode_fixed(value, "field")?).to_string()),
        AttrType::Real => Ok(f32::from_le_bytes(decode_fixed(value, "field")?).to_string()),
        AttrType::VarChar => Ok(String::from_utf8_lossy(value).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_descriptor() -> Vec<Attribute> {
        vec![
            Attribute::new("age", AttrType::Int, 4),
            Attribute::new("height", AttrType::Real, 4),
            Attribute::new("name", AttrType::VarChar, 30),
        ]
    }

    fn sample_external(age: i32, height: f32, name: &str) -> Vec<u8> {
        let mut data = vec![0u8]; // 3 fields, 1 bitmap byte, no nulls
        data.extend_from_slice(&age.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data.extend_from_slice(&(name.len() as u32).to_le_bytes());
        data.extend_from_slice(name.as_bytes());
        data
    }

    #[test]
    fn test_round_trip_identity() {
        let descriptor = sample_descriptor();
        let external = sample_external(24, 6.1, "anteater");

        let internal = encode_internal(&descriptor, &external).unwrap();
        let restored = decode_external(&descriptor, &internal).unwrap();
        assert_eq!(external, restored);
    }

    #[test]
    fn test_round_trip_with_nulls() {
        let descriptor = sample_descriptor();

        // height (field 1) is null: second bit from the left
        let mut external = vec![0b0100_0000u8];
        external.extend_from_slice(&42i32.to_le_bytes());
        external.extend_from_slice(&5u32.to_le_bytes());
        external.extend_from_slice(b"quail");

        let internal = encode_internal(&descriptor, &external).unwrap();
        let restored = decode_external(&descriptor, &internal).unwrap();
        assert_eq!(external, restored);
    }

    #[test]
    fn test_all_fields_null() {
        let descriptor = sample_descriptor();
        let external = vec![0b1110_0000u8];

        let internal = encode_internal(&descriptor, &external).unwrap();
        // Just the directory, no values
        assert_eq!(internal.len(), 6);
        assert_eq!(decode_external(&descriptor, &internal).unwrap(), external);
    }

    #[test]
    fn test_directory_offsets() {
        let descriptor = sample_descriptor();
        let external = sample_external(1, 2.0, "abc");
        let internal = encode_internal(&descriptor, &external).unwrap();

        // dir = [10, 14, 17]: values begin after the 6-byte directory
        assert_eq!(u16::from_le_bytes([internal[0], internal[1]]), 10);
        assert_eq!(u16::from_le_bytes([internal[2], internal[3]]), 14);
        assert_eq!(u16::from_le_bytes([internal[4], internal[5]]), 17);
        assert_eq!(internal.len(), 17);
    }

    #[test]
    fn test_field_bytes() {
        let descriptor = sample_descriptor();
        let external = sample_external(7, 1.5, "pelican");
        let internal = encode_internal(&descriptor, &external).unwrap();

        let age = field_bytes(&descriptor, &internal, 0).unwrap().unwrap();
        assert_eq!(i32::from_le_bytes(age.try_into().unwrap()), 7);

        let name = field_bytes(&descriptor, &internal, 2).unwrap().unwrap();
        assert_eq!(name, b"pelican");
    }

    #[test]
    fn test_field_bytes_skips_null_run() {
        let descriptor = sample_descriptor();

        // age and height both null, name present
        let mut external = vec![0b1100_0000u8];
        external.extend_from_slice(&3u32.to_le_bytes());
        external.extend_from_slice(b"owl");

        let internal = encode_internal(&descriptor, &external).unwrap();
        assert!(field_bytes(&descriptor, &internal, 0).unwrap().is_none());
        assert!(field_bytes(&descriptor, &internal, 1).unwrap().is_none());
        assert_eq!(
            field_bytes(&descriptor, &internal, 2).unwrap().unwrap(),
            b"owl"
        );
    }

    #[test]
    fn test_varchar_over_declared_max() {
        let descriptor = vec![Attribute::new("tag", AttrType::VarChar, 3)];
        let mut external = vec![0u8];
        external.extend_from_slice(&5u32.to_le_bytes());
        external.extend_from_slice(b"toooo");

        assert!(matches!(
            encode_internal(&descriptor, &external),
            Err(RecordError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let descriptor = sample_descriptor();
        let external = sample_external(1, 2.0, "abc");

        let result = encode_internal(&descriptor, &external[..6]);
        assert!(matches!(result, Err(RecordError::InvalidArgument(_))));
    }

    #[test]
    fn test_compare_field() {
        let lhs = 10i32.to_le_bytes();
        let rhs = 20i32.to_le_bytes();
        assert_eq!(
            compare_field(AttrType::Int, &lhs, &rhs).unwrap(),
            Some(Ordering::Less)
        );

        let nan = f32::NAN.to_le_bytes();
        let one = 1.0f32.to_le_bytes();
        assert_eq!(compare_field(AttrType::Real, &nan, &one).unwrap(), None);

        let mut cond = 3u32.to_le_bytes().to_vec();
        cond.extend_from_slice(b"bee");
        assert_eq!(
            compare_field(AttrType::VarChar, b"ant", &cond).unwrap(),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_format_value() {
        assert_eq!(
            format_value(AttrType::Int, &42i32.to_le_bytes()).unwrap(),
            "42"
        );
        assert_eq!(
            format_value(AttrType::Real, &6.5f32.to_le_bytes()).unwrap(),
            "6.5"
        );
        assert_eq!(format_value(AttrType::VarChar, b"emu").unwrap(), "emu");
    }
}
