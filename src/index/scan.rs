//! Bounded range scan over the leaf chain.

use std::cmp::Ordering;

use crate::file::FileHandle;
use crate::record::{AttrType, Rid};

use super::btree;
use super::error::{IndexError, IndexResult};
use super::key::IndexKey;
use super::node::{LeafNode, NodePage, NO_PAGE};

/// Iterator over index entries in `[low, high]` (either bound optional,
/// either end inclusive or exclusive). Borrows the index file handle for
/// its whole lifetime, so the handle cannot be closed mid-scan. Mutating
/// the tree while an iterator is live has undefined effect on it.
pub struct IndexScanIterator<'a> {
    handle: &'a mut FileHandle,
    key_type: AttrType,
    high: Option<IndexKey>,
    high_inclusive: bool,
    leaf: Option<LeafNode>,
    pos: usize,
    error: Option<IndexError>,
    closed: bool,
}

impl<'a> IndexScanIterator<'a> {
    pub(super) fn new(
        handle: &'a mut FileHandle,
        key_type: AttrType,
        root_page: i32,
        low: Option<IndexKey>,
        high: Option<IndexKey>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> IndexResult<Self> {
        let mut iter = Self {
            handle,
            key_type,
            high,
            high_inclusive,
            leaf: None,
            pos: 0,
            error: None,
            closed: false,
        };

        if root_page == NO_PAGE {
            return Ok(iter);
        }

        let (_, leaf) = btree::find_leaf(iter.handle, key_type, root_page, low.as_ref())?;
        iter.pos = match &low {
            None => 0,
            Some(low_key) => leaf.entries.partition_point(|(key, _)| {
                let ord = key.compare(low_key);
                if low_inclusive {
                    ord == Ordering::Less
                } else {
                    ord != Ordering::Greater
                }
            }),
        };
        iter.leaf = Some(leaf);
        Ok(iter)
    }

    /// The error that terminated the scan early, if any
    pub fn error(&self) -> Option<&IndexError> {
        self.error.as_ref()
    }

    /// Close the iterator. Succeeds once; closing twice is an error.
    pub fn close(&mut self) -> IndexResult<()> {
        if self.closed {
            return Err(IndexError::ScanClosed);
        }
        self.closed = true;
        Ok(())
    }

    fn past_upper_bound(&self, key: &IndexKey) -> bool {
        match &self.high {
            None => false,
            Some(high_key) => match key.compare(high_key) {
                Ordering::Less => false,
                Ordering::Equal => !self.high_inclusive,
                Ordering::Greater => true,
            },
        }
    }
}

impl Iterator for IndexScanIterator<'_> {
    type Item = (Rid, IndexKey);

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed || self.error.is_some() {
            return None;
        }

        loop {
            let leaf = self.leaf.as_ref()?;

            if self.pos < leaf.entries.len() {
                let (key, rid) = &leaf.entries[self.pos];
                if self.past_upper_bound(key) {
                    self.leaf = None;
                    return None;
                }
                let item = (*rid, key.clone());
                self.pos += 1;
                return Some(item);
            }

            // Exhausted this leaf; follow the chain, skipping emptied leaves
            let next_leaf = leaf.next_leaf;
            if next_leaf == NO_PAGE {
                self.leaf = None;
                return None;
            }
            match btree::read_node(self.handle, self.key_type, next_leaf) {
                Ok(NodePage::Leaf(leaf)) => {
                    self.leaf = Some(leaf);
                    self.pos = 0;
                }
                Ok(NodePage::Internal(_)) => {
                    self.error = Some(IndexError::CorruptPage(next_leaf as u32));
                    self.leaf = None;
                    return None;
                }
                Err(e) => {
                    self.error = Some(e);
                    self.leaf = None;
                    return None;
                }
            }
        }
    }
}
