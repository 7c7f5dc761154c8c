//! B+-tree index management.

mod btree;
mod error;
mod key;
mod node;
mod scan;

pub use error::{IndexError, IndexResult};
pub use key::IndexKey;
pub use scan::IndexScanIterator;

use std::cmp::Ordering;
use std::path::Path;

use crate::file::{FileHandle, PagedFileManager, PAGE_SIZE};
use crate::record::{AttrType, Attribute, Rid};

use btree::Meta;
use node::{NodePage, LEAF_HEADER_SIZE, NO_PAGE, RID_SIZE};

/// Handle to an open index file; wraps a paged file handle and passes its
/// I/O counters through.
#[derive(Debug, Default)]
pub struct IndexFileHandle {
    handle: FileHandle,
}

impl IndexFileHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.handle.is_bound()
    }

    /// Snapshot the (read, write, append) page counters
    pub fn collect_counter_values(&self) -> (u32, u32, u32) {
        self.handle.collect_counter_values()
    }
}

/// Manages B+-tree index files over typed keys pointing at RIDs.
pub struct IndexManager {
    file_manager: PagedFileManager,
}

impl IndexManager {
    pub fn new() -> Self {
        Self {
            file_manager: PagedFileManager::new(),
        }
    }

    /// Create an index file: an empty tree whose key type is fixed by the
    /// first inserted entry.
    pub fn create_file<P: AsRef<Path>>(&self, path: P) -> IndexResult<()> {
        let path = path.as_ref();
        self.file_manager.create_file(path)?;

        let mut handle = FileHandle::new();
        self.file_manager.open_file(path, &mut handle)?;
        let meta = Meta {
            key_type: None,
            root_page: NO_PAGE,
        };
        handle.append_page(&btree::serialize_meta(&meta))?;
        self.file_manager.close_file(&mut handle)?;
        Ok(())
    }

    pub fn destroy_file<P: AsRef<Path>>(&self, path: P) -> IndexResult<()> {
        Ok(self.file_manager.destroy_file(path)?)
    }

    /// Bind `handle` to an index file, validating the meta page
    pub fn open_file<P: AsRef<Path>>(
        &self,
        path: P,
        handle: &mut IndexFileHandle,
    ) -> IndexResult<()> {
        self.file_manager.open_file(path, &mut handle.handle)?;
        if let Err(e) = btree::read_meta(&mut handle.handle) {
            let _ = self.file_manager.close_file(&mut handle.handle);
            return Err(e);
        }
        Ok(())
    }

    pub fn close_file(&self, handle: &mut IndexFileHandle) -> IndexResult<()> {
        Ok(self.file_manager.close_file(&mut handle.handle)?)
    }

    /// Insert a (key, rid) entry. Duplicate keys are permitted and order
    /// secondarily by RID; the first insert fixes the index's key type.
    pub fn insert_entry(
        &self,
        handle: &mut IndexFileHandle,
        attribute: &Attribute,
        key: &[u8],
        rid: Rid,
    ) -> IndexResult<()> {
        let key = IndexKey::decode(attribute.attr_type, key)?;
        key.validate()?;
        // A leaf must be able to hold at least two entries of this key size
        if key.encoded_len() + RID_SIZE > (PAGE_SIZE - LEAF_HEADER_SIZE) / 2 {
            return Err(IndexError::InvalidArgument(format!(
                "key of {} bytes is too large to index",
                key.encoded_len()
            )));
        }

        let mut meta = btree::read_meta(&mut handle.handle)?;
        let key_type = match meta.key_type {
            Some(t) if t == attribute.attr_type => t,
            Some(t) => {
                return Err(IndexError::KeyTypeMismatch {
                    expected: t,
                    actual: attribute.attr_type,
                })
            }
            None => {
                meta.key_type = Some(attribute.attr_type);
                attribute.attr_type
            }
        };

        if let Some(new_root) = btree::insert(&mut handle.handle, key_type, meta.root_page, &key, rid)? {
            meta.root_page = new_root;
            btree::write_meta(&mut handle.handle, &meta)?;
        }
        Ok(())
    }

    /// Delete the exact (key, rid) entry; fails when it is absent
    pub fn delete_entry(
        &self,
        handle: &mut IndexFileHandle,
        attribute: &Attribute,
        key: &[u8],
        rid: Rid,
    ) -> IndexResult<()> {
        let key = IndexKey::decode(attribute.attr_type, key)?;
        key.validate()?;

        let meta = btree::read_meta(&mut handle.handle)?;
        let key_type = match meta.key_type {
            Some(t) if t == attribute.attr_type => t,
            Some(t) => {
                return Err(IndexError::KeyTypeMismatch {
                    expected: t,
                    actual: attribute.attr_type,
                })
            }
            None => return Err(IndexError::EntryAbsent { rid }),
        };

        btree::delete(&mut handle.handle, key_type, meta.root_page, &key, rid)
    }

    /// Open a range scan over `[low, high]`; `None` bounds mean unbounded.
    /// The iterator borrows the handle; see [`IndexScanIterator`].
    pub fn scan<'h>(
        &self,
        handle: &'h mut IndexFileHandle,
        attribute: &Attribute,
        low: Option<&[u8]>,
        high: Option<&[u8]>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> IndexResult<IndexScanIterator<'h>> {
        let meta = btree::read_meta(&mut handle.handle)?;
        let key_type = match meta.key_type {
            Some(t) if t == attribute.attr_type => t,
            Some(t) => {
                return Err(IndexError::KeyTypeMismatch {
                    expected: t,
                    actual: attribute.attr_type,
                })
            }
            // Empty index: the iterator sees an empty tree and yields nothing
            None => attribute.attr_type,
        };

        let decode_bound = |bound: Option<&[u8]>| -> IndexResult<Option<IndexKey>> {
            match bound {
                None => Ok(None),
                Some(bytes) => {
                    let key = IndexKey::decode(key_type, bytes)?;
                    key.validate()?;
                    Ok(Some(key))
                }
            }
        };
        let low = decode_bound(low)?;
        let high = decode_bound(high)?;

        IndexScanIterator::new(
            &mut handle.handle,
            key_type,
            meta.root_page,
            low,
            high,
            low_inclusive,
            high_inclusive,
        )
    }

    /// Render the tree depth-first in a JSON-like form (debugging aid)
    pub fn print_btree(
        &self,
        handle: &mut IndexFileHandle,
        attribute: &Attribute,
    ) -> IndexResult<String> {
        let meta = btree::read_meta(&mut handle.handle)?;
        let key_type = match meta.key_type {
            Some(t) if t == attribute.attr_type => t,
            Some(t) => {
                return Err(IndexError::KeyTypeMismatch {
                    expected: t,
                    actual: attribute.attr_type,
                })
            }
            None => return Ok("{}".to_string()),
        };
        if meta.root_page == NO_PAGE {
            return Ok("{}".to_string());
        }

        let mut out = String::new();
        render_node(&mut handle.handle, key_type, meta.root_page, &mut out)?;
        Ok(out)
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}

fn render_node(
    handle: &mut FileHandle,
    key_type: AttrType,
    page_num: i32,
    out: &mut String,
) -> IndexResult<()> {
    match btree::read_node(handle, key_type, page_num)? {
        NodePage::Leaf(leaf) => {
            // Duplicate keys collapse into one "key:[(p,s),(p,s)]" group
            let mut groups = Vec::new();
            let mut i = 0;
            while i < leaf.entries.len() {
                let key = leaf.entries[i].0.clone();
                let mut rids = Vec::new();
                while i < leaf.entries.len()
                    && leaf.entries[i].0.compare(&key) == Ordering::Equal
                {
                    let rid = leaf.entries[i].1;
                    rids.push(format!("({},{})", rid.page_num, rid.slot_num));
                    i += 1;
                }
                groups.push(format!("\"{}:[{}]\"", key.render(), rids.join(",")));
            }
            out.push_str("{\"keys\": [");
            out.push_str(&groups.join(","));
            out.push_str("]}");
        }
        NodePage::Internal(internal) => {
            out.push_str("{\"keys\": [");
            for (i, key) in internal.keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&format!("\"{}\"", key.render()));
            }
            out.push_str("], \"children\": [");
            for (i, child) in internal.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                render_node(handle, key_type, *child, out)?;
            }
            out.push_str("]}");
        }
    }
    Ok(())
}
