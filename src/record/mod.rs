mod codec;
mod error;
mod page;
mod scan;
mod schema;

pub use error::{RecordError, RecordResult};
pub use scan::{CompOp, RecordScanIterator};
pub use schema::{AttrType, Attribute, Rid, SlotId};

use std::path::Path;

use tracing::debug;

use crate::file::{FileHandle, PageId, PagedFileManager, PAGE_SIZE};
use page::{SlottedPage, PAGE_TRAILER_SIZE, SLOT_ENTRY_SIZE};

/// Manages record-based files: slotted pages of variable-length tuples
/// addressed by stable RIDs. Record files have no file-level header;
/// page 0 is a normal record page.
pub struct RecordFileManager {
    file_manager: PagedFileManager,
}

impl RecordFileManager {
    pub fn new() -> Self {
        Self {
            file_manager: PagedFileManager::new(),
        }
    }

    pub fn create_file<P: AsRef<Path>>(&self, path: P) -> RecordResult<()> {
        Ok(self.file_manager.create_file(path)?)
    }

    pub fn destroy_file<P: AsRef<Path>>(&self, path: P) -> RecordResult<()> {
        Ok(self.file_manager.destroy_file(path)?)
    }

    pub fn open_file<P: AsRef<Path>>(&self, path: P, handle: &mut FileHandle) -> RecordResult<()> {
        Ok(self.file_manager.open_file(path, handle)?)
    }

    pub fn close_file(&self, handle: &mut FileHandle) -> RecordResult<()> {
        Ok(self.file_manager.close_file(handle)?)
    }

    /// Insert a record given in the external payload format, returning its
    /// RID. The RID stays valid for the record's lifetime even if a later
    /// update relocates it.
    pub fn insert_record(
        &self,
        handle: &mut FileHandle,
        descriptor: &[Attribute],
        data: &[u8],
    ) -> RecordResult<Rid> {
        let internal = codec::encode_internal(descriptor, data)?;
        self.insert_internal(handle, &internal)
    }

    /// Read a record back into the external payload format
    pub fn read_record(
        &self,
        handle: &mut FileHandle,
        descriptor: &[Attribute],
        rid: Rid,
    ) -> RecordResult<Vec<u8>> {
        let internal = self.load_internal(handle, rid)?;
        codec::decode_external(descriptor, &internal)
    }

    /// Delete a record. Its slot becomes a tombstone and is never handed
    /// out again; deleting a relocated record tombstones both the home
    /// slot and the forwarded copy.
    pub fn delete_record(
        &self,
        handle: &mut FileHandle,
        _descriptor: &[Attribute],
        rid: Rid,
    ) -> RecordResult<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        handle.read_page(rid.page_num, &mut buf)?;
        let mut home = SlottedPage::new(rid.page_num, &mut buf)?;
        check_slot(&home, rid)?;

        let (_, length) = home.slot(rid.slot_num);
        let record = home.record(rid.slot_num);
        let forwarded = if page::is_beacon(length, record) {
            Some(page::decode_beacon(record))
        } else {
            None
        };

        home.remove(rid.slot_num);
        drop(home);
        handle.write_page(rid.page_num, &buf)?;

        if let Some(target) = forwarded {
            handle.read_page(target.page_num, &mut buf)?;
            let mut page = SlottedPage::new(target.page_num, &mut buf)?;
            if target.slot_num >= page.slot_count() || page.is_tombstone(target.slot_num) {
                return Err(RecordError::CorruptPage(target.page_num));
            }
            page.remove(target.slot_num);
            drop(page);
            handle.write_page(target.page_num, &buf)?;
        }

        Ok(())
    }

    /// Update a record in place when it fits, otherwise relocate it and
    /// leave a forwarding beacon in the home slot. The RID never changes.
    pub fn update_record(
        &self,
        handle: &mut FileHandle,
        descriptor: &[Attribute],
        data: &[u8],
        rid: Rid,
    ) -> RecordResult<()> {
        let internal = codec::encode_internal(descriptor, data)?;
        if internal.len() + SLOT_ENTRY_SIZE + PAGE_TRAILER_SIZE > PAGE_SIZE {
            return Err(RecordError::RecordTooLarge(internal.len()));
        }

        let mut buf = vec![0u8; PAGE_SIZE];
        handle.read_page(rid.page_num, &mut buf)?;
        let home = SlottedPage::new(rid.page_num, &mut buf)?;
        check_slot(&home, rid)?;

        let (_, length) = home.slot(rid.slot_num);
        let record = home.record(rid.slot_num);
        let forwarded = page::is_beacon(length, record);
        let live_rid = if forwarded {
            page::decode_beacon(record)
        } else {
            rid
        };
        drop(home);

        if live_rid.page_num != rid.page_num {
            handle.read_page(live_rid.page_num, &mut buf)?;
        }
        let mut live = SlottedPage::new(live_rid.page_num, &mut buf)?;
        if live_rid.slot_num >= live.slot_count() || live.is_tombstone(live_rid.slot_num) {
            return Err(RecordError::CorruptPage(live_rid.page_num));
        }

        let (_, old_length) = live.slot(live_rid.slot_num);
        let fits = internal.len() <= old_length as usize
            || internal.len() - old_length as usize <= live.free_bytes();
        if fits {
            live.replace(live_rid.slot_num, &internal)?;
            drop(live);
            handle.write_page(live_rid.page_num, &buf)?;
            return Ok(());
        }

        // The grown record moves; a forwarded copy's old slot is freed,
        // while the home slot stays alive to carry the beacon.
        if forwarded {
            live.remove(live_rid.slot_num);
            drop(live);
            handle.write_page(live_rid.page_num, &buf)?;
        } else {
            drop(live);
        }

        let new_rid = self.insert_internal(handle, &internal)?;
        debug!(
            from_page = rid.page_num,
            from_slot = rid.slot_num,
            to_page = new_rid.page_num,
            to_slot = new_rid.slot_num,
            "relocated record"
        );

        handle.read_page(rid.page_num, &mut buf)?;
        let mut home = SlottedPage::new(rid.page_num, &mut buf)?;
        home.replace(rid.slot_num, &page::encode_beacon(new_rid))?;
        drop(home);
        handle.write_page(rid.page_num, &buf)?;
        Ok(())
    }

    /// Read a single attribute of a record: a 1-byte null indicator
    /// followed by the value in the external format. O(1) in the number
    /// of fields thanks to the stored field directory.
    pub fn read_attribute(
        &self,
        handle: &mut FileHandle,
        descriptor: &[Attribute],
        rid: Rid,
        attribute_name: &str,
    ) -> RecordResult<Vec<u8>> {
        let idx = descriptor
            .iter()
            .position(|a| a.name == attribute_name)
            .ok_or_else(|| RecordError::AttributeNotFound(attribute_name.to_string()))?;

        let internal = self.load_internal(handle, rid)?;
        match codec::field_bytes(descriptor, &internal, idx)? {
            None => Ok(vec![0x80]),
            Some(value) => {
                let mut out = vec![0u8];
                match descriptor[idx].attr_type {
                    AttrType::Int | AttrType::Real => out.extend_from_slice(value),
                    AttrType::VarChar => {
                        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
                        out.extend_from_slice(value);
                    }
                }
                Ok(out)
            }
        }
    }

    /// Render an external payload as a `name: value` line (debugging aid)
    pub fn print_record(&self, descriptor: &[Attribute], data: &[u8]) -> RecordResult<String> {
        let bitmap_size = codec::null_bitmap_size(descriptor.len());
        if data.len() < bitmap_size {
            return Err(RecordError::InvalidArgument(
                "payload shorter than its null bitmap".to_string(),
            ));
        }

        let mut pos = bitmap_size;
        let mut parts = Vec::with_capacity(descriptor.len());
        for (i, attr) in descriptor.iter().enumerate() {
            if codec::is_null_external(&data[..bitmap_size], i) {
                parts.push(format!("{}: NULL", attr.name));
                continue;
            }

            let value_len = match attr.attr_type {
                AttrType::Int | AttrType::Real => 4,
                AttrType::VarChar => {
                    if pos + 4 > data.len() {
                        return Err(RecordError::InvalidArgument(
                            "payload truncated".to_string(),
                        ));
                    }
                    4 + u32::from_le_bytes([
                        data[pos],
                        data[pos + 1],
                        data[pos + 2],
                        data[pos + 3],
                    ]) as usize
                }
            };
            if pos + value_len > data.len() {
                return Err(RecordError::InvalidArgument(
                    "payload truncated".to_string(),
                ));
            }

            let value = match attr.attr_type {
                AttrType::VarChar => &data[pos + 4..pos + value_len],
                _ => &data[pos..pos + value_len],
            };
            parts.push(format!(
                "{}: {}",
                attr.name,
                codec::format_value(attr.attr_type, value)?
            ));
            pos += value_len;
        }

        Ok(parts.join("  "))
    }

    /// Open a predicate scan. The iterator borrows the handle; see
    /// [`RecordScanIterator`].
    pub fn scan<'h>(
        &self,
        handle: &'h mut FileHandle,
        descriptor: &[Attribute],
        condition_attribute: Option<&str>,
        comp_op: CompOp,
        value: Option<&[u8]>,
        projected_attributes: &[String],
    ) -> RecordResult<RecordScanIterator<'h>> {
        RecordScanIterator::new(
            handle,
            descriptor,
            condition_attribute,
            comp_op,
            value,
            projected_attributes,
        )
    }

    /// Place an already-transcoded record: last appended page first, then
    /// first-fit from page 0, else a fresh page.
    fn insert_internal(&self, handle: &mut FileHandle, internal: &[u8]) -> RecordResult<Rid> {
        if internal.len() + SLOT_ENTRY_SIZE + PAGE_TRAILER_SIZE > PAGE_SIZE {
            return Err(RecordError::RecordTooLarge(internal.len()));
        }

        let page_count = handle.page_count()?;
        let mut candidates: Vec<PageId> = Vec::with_capacity(page_count as usize);
        if page_count > 0 {
            candidates.push(page_count - 1);
            candidates.extend(0..page_count - 1);
        }

        let mut buf = vec![0u8; PAGE_SIZE];
        for page_num in candidates {
            handle.read_page(page_num, &mut buf)?;
            let mut page = SlottedPage::new(page_num, &mut buf)?;
            if page.can_fit(internal.len()) {
                let slot_num = page.insert(internal)?;
                drop(page);
                handle.write_page(page_num, &buf)?;
                return Ok(Rid::new(page_num, slot_num));
            }
        }

        let mut page = SlottedPage::init(&mut buf);
        let slot_num = page.insert(internal)?;
        drop(page);
        handle.append_page(&buf)?;
        debug!(page_num = page_count, "appended record page");
        Ok(Rid::new(page_count, slot_num))
    }

    /// Fetch a record's stored bytes, following a beacon at most once
    fn load_internal(&self, handle: &mut FileHandle, rid: Rid) -> RecordResult<Vec<u8>> {
        let mut buf = vec![0u8; PAGE_SIZE];
        handle.read_page(rid.page_num, &mut buf)?;
        let page = SlottedPage::new(rid.page_num, &mut buf)?;
        check_slot(&page, rid)?;

        let (_, length) = page.slot(rid.slot_num);
        let record = page.record(rid.slot_num);
        if !page::is_beacon(length, record) {
            return Ok(record.to_vec());
        }

        let target = page::decode_beacon(record);
        drop(page);
        handle.read_page(target.page_num, &mut buf)?;
        let page = SlottedPage::new(target.page_num, &mut buf)?;
        if target.slot_num >= page.slot_count() || page.is_tombstone(target.slot_num) {
            return Err(RecordError::CorruptPage(target.page_num));
        }

        let (_, length) = page.slot(target.slot_num);
        let record = page.record(target.slot_num);
        // Beacons are never chained; one hop always lands on the record
        debug_assert!(!page::is_beacon(length, record));
        Ok(record.to_vec())
    }
}

impl Default for RecordFileManager {
    fn default() -> Self {
        Self::new()
    }
}

fn check_slot(page: &SlottedPage<'_>, rid: Rid) -> RecordResult<()> {
    if rid.slot_num >= page.slot_count() {
        return Err(RecordError::InvalidSlot {
            page_num: rid.page_num,
            slot_num: rid.slot_num,
        });
    }
    if page.is_tombstone(rid.slot_num) {
        return Err(RecordError::RecordDeleted {
            page_num: rid.page_num,
            slot_num: rid.slot_num,
        });
    }
    Ok(())
}
