//! Predicate scan over a record file.

use std::cmp::Ordering;

use crate::file::{FileHandle, PageId, PAGE_SIZE};

use super::codec;
use super::error::{RecordError, RecordResult};
use super::page::{self, SlottedPage};
use super::schema::{AttrType, Attribute, Rid, SlotId};

/// Comparison operator for scan predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
    /// No condition; matches every record
    NoOp,
}

impl CompOp {
    fn matches(self, ordering: Ordering) -> bool {
        match self {
            CompOp::Eq => ordering == Ordering::Equal,
            CompOp::Lt => ordering == Ordering::Less,
            CompOp::Le => ordering != Ordering::Greater,
            CompOp::Gt => ordering == Ordering::Greater,
            CompOp::Ge => ordering != Ordering::Less,
            CompOp::Ne => ordering != Ordering::Equal,
            CompOp::NoOp => true,
        }
    }
}

/// Iterator over the records satisfying a predicate, yielding projected
/// external payloads. Borrows the file handle for its whole lifetime, so
/// the handle cannot be closed while a scan is live.
pub struct RecordScanIterator<'a> {
    handle: &'a mut FileHandle,
    descriptor: Vec<Attribute>,
    cond_field: Option<usize>,
    comp_op: CompOp,
    value: Option<Vec<u8>>,
    projection: Vec<usize>,
    page_count: PageId,
    cur_page: PageId,
    cur_slot: SlotId,
    page_buf: Vec<u8>,
    page_loaded: bool,
    error: Option<RecordError>,
    closed: bool,
}

impl<'a> RecordScanIterator<'a> {
    pub(super) fn new(
        handle: &'a mut FileHandle,
        descriptor: &[Attribute],
        condition_attribute: Option<&str>,
        comp_op: CompOp,
        value: Option<&[u8]>,
        projected_attributes: &[String],
    ) -> RecordResult<Self> {
        let cond_field = match condition_attribute {
            None => None,
            Some(name) => Some(
                descriptor
                    .iter()
                    .position(|a| a.name == name)
                    .ok_or_else(|| RecordError::AttributeNotFound(name.to_string()))?,
            ),
        };

        if comp_op != CompOp::NoOp {
            if cond_field.is_none() {
                return Err(RecordError::InvalidArgument(
                    "comparison requires a condition attribute".to_string(),
                ));
            }
            if value.is_none() {
                return Err(RecordError::InvalidArgument(
                    "comparison requires a condition value".to_string(),
                ));
            }
        }

        let projection = projected_attributes
            .iter()
            .map(|name| {
                descriptor
                    .iter()
                    .position(|a| &a.name == name)
                    .ok_or_else(|| RecordError::AttributeNotFound(name.clone()))
            })
            .collect::<RecordResult<Vec<_>>>()?;

        let page_count = handle.page_count()?;
        Ok(Self {
            handle,
            descriptor: descriptor.to_vec(),
            cond_field,
            comp_op,
            value: value.map(<[u8]>::to_vec),
            projection,
            page_count,
            cur_page: 0,
            cur_slot: 0,
            page_buf: vec![0u8; PAGE_SIZE],
            page_loaded: false,
            error: None,
            closed: false,
        })
    }

    /// The error that terminated the scan early, if any
    pub fn error(&self) -> Option<&RecordError> {
        self.error.as_ref()
    }

    /// Close the iterator. Succeeds once; closing twice is an error.
    pub fn close(&mut self) -> RecordResult<()> {
        if self.closed {
            return Err(RecordError::ScanClosed);
        }
        self.closed = true;
        Ok(())
    }

    fn fail(&mut self, error: RecordError) -> Option<(Rid, Vec<u8>)> {
        self.error = Some(error);
        None
    }

    fn predicate_matches(&self, internal: &[u8]) -> RecordResult<bool> {
        if self.comp_op == CompOp::NoOp {
            return Ok(true);
        }
        let (field_idx, value) = match (self.cond_field, self.value.as_deref()) {
            (Some(idx), Some(value)) => (idx, value),
            _ => {
                return Err(RecordError::InvalidArgument(
                    "comparison requires a condition attribute and value".to_string(),
                ))
            }
        };

        // Nulls never compare true
        let field = match codec::field_bytes(&self.descriptor, internal, field_idx)? {
            Some(bytes) => bytes,
            None => return Ok(false),
        };

        let ordering =
            codec::compare_field(self.descriptor[field_idx].attr_type, field, value)?;
        Ok(ordering.is_some_and(|ord| self.comp_op.matches(ord)))
    }

    fn project(&self, internal: &[u8]) -> RecordResult<Vec<u8>> {
        let bitmap_size = codec::null_bitmap_size(self.projection.len());
        let mut out = vec![0u8; bitmap_size];

        for (out_idx, &field_idx) in self.projection.iter().enumerate() {
            match codec::field_bytes(&self.descriptor, internal, field_idx)? {
                None => out[out_idx / 8] |= 0x80 >> (out_idx % 8),
                Some(value) => match self.descriptor[field_idx].attr_type {
                    AttrType::Int | AttrType::Real => out.extend_from_slice(value),
                    AttrType::VarChar => {
                        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
                        out.extend_from_slice(value);
                    }
                },
            }
        }

        Ok(out)
    }
}

impl Iterator for RecordScanIterator<'_> {
    type Item = (Rid, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed || self.error.is_some() {
            return None;
        }

        loop {
            if self.cur_page >= self.page_count {
                return None;
            }

            if !self.page_loaded {
                if let Err(e) = self.handle.read_page(self.cur_page, &mut self.page_buf) {
                    return self.fail(e.into());
                }
                self.page_loaded = true;
            }

            // Pull the next live home record out of the loaded page; the
            // page view's borrow must end before predicate evaluation.
            let candidate = match SlottedPage::new(self.cur_page, &mut self.page_buf) {
                Err(e) => return self.fail(e),
                Ok(page) => {
                    let mut candidate = None;
                    while self.cur_slot < page.slot_count() {
                        let slot_num = self.cur_slot;
                        self.cur_slot += 1;

                        if page.is_tombstone(slot_num) {
                            continue;
                        }
                        let (_, length) = page.slot(slot_num);
                        let record = page.record(slot_num);
                        // Relocated records are yielded where they physically
                        // live; following the beacon here would count them twice.
                        if page::is_beacon(length, record) {
                            continue;
                        }

                        candidate = Some((slot_num, record.to_vec()));
                        break;
                    }
                    candidate
                }
            };

            let (slot_num, internal) = match candidate {
                Some(found) => found,
                None => {
                    self.cur_page += 1;
                    self.cur_slot = 0;
                    self.page_loaded = false;
                    continue;
                }
            };

            match self.predicate_matches(&internal) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(e) => return self.fail(e),
            }

            let projected = match self.project(&internal) {
                Ok(p) => p,
                Err(e) => return self.fail(e),
            };
            return Some((Rid::new(self.cur_page, slot_num), projected));
        }
    }
}
