//! Disk-resident B+-tree: descent, splits, exact-entry delete.
//!
//! Page 0 of an index file is the meta page (magic, key type, root page);
//! every other page is one tree node. Leaf splits copy the right leaf's
//! first key up; internal splits push their middle key up. Deletes never
//! rebalance: an emptied leaf stays in the sibling chain.

use std::cmp::Ordering;

use tracing::debug;

use crate::file::{FileHandle, PAGE_SIZE};
use crate::record::{AttrType, Rid};

use super::error::{IndexError, IndexResult};
use super::key::{compare_entries, IndexKey};
use super::node::{InternalNode, LeafNode, NodePage, NO_PAGE};

/// Magic number for index files: "MRIX" in ASCII
pub const MAGIC_NUMBER: u32 = 0x4D52_4958;

const KEY_TYPE_UNSET: u8 = 0xFF;

/// Contents of the meta page
#[derive(Debug, Clone, Copy)]
pub struct Meta {
    /// Fixed by the first insert; `None` until then
    pub key_type: Option<AttrType>,
    /// NO_PAGE while the tree is empty
    pub root_page: i32,
}

fn key_type_tag(attr_type: AttrType) -> u8 {
    match attr_type {
        AttrType::Int => 0,
        AttrType::Real => 1,
        AttrType::VarChar => 2,
    }
}

fn key_type_from_tag(tag: u8) -> Option<AttrType> {
    match tag {
        0 => Some(AttrType::Int),
        1 => Some(AttrType::Real),
        2 => Some(AttrType::VarChar),
        _ => None,
    }
}

pub fn serialize_meta(meta: &Meta) -> Vec<u8> {
    let mut buf = vec![0u8; PAGE_SIZE];
    buf[0..4].copy_from_slice(&MAGIC_NUMBER.to_le_bytes());
    buf[4] = meta.key_type.map_or(KEY_TYPE_UNSET, key_type_tag);
    buf[5..9].copy_from_slice(&meta.root_page.to_le_bytes());
    buf
}

pub fn read_meta(handle: &mut FileHandle) -> IndexResult<Meta> {
    let mut buf = vec![0u8; PAGE_SIZE];
    handle.read_page(0, &mut buf)?;

    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != MAGIC_NUMBER {
        return Err(IndexError::InvalidMagic);
    }

    let key_type = if buf[4] == KEY_TYPE_UNSET {
        None
    } else {
        Some(key_type_from_tag(buf[4]).ok_or(IndexError::CorruptPage(0))?)
    };
    let root_page = i32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);
    Ok(Meta {
        key_type,
        root_page,
    })
}

pub fn write_meta(handle: &mut FileHandle, meta: &Meta) -> IndexResult<()> {
    handle.write_page(0, &serialize_meta(meta))?;
    Ok(())
}

pub fn read_node(
    handle: &mut FileHandle,
    key_type: AttrType,
    page_num: i32,
) -> IndexResult<NodePage> {
    let mut buf = vec![0u8; PAGE_SIZE];
    handle.read_page(page_num as u32, &mut buf)?;
    NodePage::deserialize(page_num as u32, key_type, &buf)
}

pub fn write_node(handle: &mut FileHandle, page_num: i32, node: &NodePage) -> IndexResult<()> {
    handle.write_page(page_num as u32, &node.serialize()?)?;
    Ok(())
}

pub fn append_node(handle: &mut FileHandle, node: &NodePage) -> IndexResult<i32> {
    let page_num = handle.page_count()? as i32;
    handle.append_page(&node.serialize()?)?;
    Ok(page_num)
}

/// Insert into the subtree rooted at `page_num`; on split, returns the
/// separator key and the new right sibling's page for the parent to adopt.
fn insert_rec(
    handle: &mut FileHandle,
    key_type: AttrType,
    page_num: i32,
    key: &IndexKey,
    rid: Rid,
) -> IndexResult<Option<(IndexKey, i32)>> {
    match read_node(handle, key_type, page_num)? {
        NodePage::Leaf(mut leaf) => {
            let entry = (key.clone(), rid);
            let pos = leaf
                .entries
                .partition_point(|e| compare_entries(e, &entry) == Ordering::Less);
            leaf.entries.insert(pos, entry);

            if leaf.used_bytes() <= PAGE_SIZE {
                write_node(handle, page_num, &NodePage::Leaf(leaf))?;
                return Ok(None);
            }

            let at = leaf.split_point();
            let right = LeafNode {
                next_leaf: leaf.next_leaf,
                entries: leaf.entries.split_off(at),
            };
            // Copy up the right leaf's first key
            let separator = right.entries[0].0.clone();
            let right_page = append_node(handle, &NodePage::Leaf(right))?;
            leaf.next_leaf = right_page;
            write_node(handle, page_num, &NodePage::Leaf(leaf))?;

            debug!(left = page_num, right = right_page, "split leaf");
            Ok(Some((separator, right_page)))
        }
        NodePage::Internal(mut node) => {
            let child_idx = node.route(key);
            let child = node.children[child_idx];
            let promoted = insert_rec(handle, key_type, child, key, rid)?;

            let (separator, new_child) = match promoted {
                None => return Ok(None),
                Some(p) => p,
            };
            node.keys.insert(child_idx, separator);
            node.children.insert(child_idx + 1, new_child);

            if node.used_bytes() <= PAGE_SIZE {
                write_node(handle, page_num, &NodePage::Internal(node))?;
                return Ok(None);
            }

            // Push up the middle key; children split around it
            let mid = node.keys.len() / 2;
            let push_key = node.keys[mid].clone();
            let right = InternalNode {
                keys: node.keys.split_off(mid + 1),
                children: node.children.split_off(mid + 1),
            };
            node.keys.truncate(mid);

            let right_page = append_node(handle, &NodePage::Internal(right))?;
            write_node(handle, page_num, &NodePage::Internal(node))?;

            debug!(left = page_num, right = right_page, "split internal node");
            Ok(Some((push_key, right_page)))
        }
    }
}

/// Insert an entry, growing the tree as needed. Returns the new root page
/// when the root changed (first insert or root split); the caller owns the
/// meta page update.
pub fn insert(
    handle: &mut FileHandle,
    key_type: AttrType,
    root_page: i32,
    key: &IndexKey,
    rid: Rid,
) -> IndexResult<Option<i32>> {
    if root_page == NO_PAGE {
        let leaf = LeafNode {
            next_leaf: NO_PAGE,
            entries: vec![(key.clone(), rid)],
        };
        let page = append_node(handle, &NodePage::Leaf(leaf))?;
        debug!(root = page, "allocated first leaf");
        return Ok(Some(page));
    }

    match insert_rec(handle, key_type, root_page, key, rid)? {
        None => Ok(None),
        Some((separator, right_page)) => {
            let new_root = InternalNode {
                keys: vec![separator],
                children: vec![root_page, right_page],
            };
            let page = append_node(handle, &NodePage::Internal(new_root))?;
            debug!(root = page, "grew tree with new root");
            Ok(Some(page))
        }
    }
}

/// Descend to the leaf where `key` belongs; `None` descends to the
/// leftmost leaf.
pub fn find_leaf(
    handle: &mut FileHandle,
    key_type: AttrType,
    root_page: i32,
    key: Option<&IndexKey>,
) -> IndexResult<(i32, LeafNode)> {
    let mut page_num = root_page;
    loop {
        match read_node(handle, key_type, page_num)? {
            NodePage::Leaf(leaf) => return Ok((page_num, leaf)),
            NodePage::Internal(node) => {
                page_num = match key {
                    Some(key) => node.children[node.route(key)],
                    None => node.children[0],
                };
            }
        }
    }
}

/// Remove the exact (key, rid) entry, walking right across duplicate runs
/// that span leaves. Fails with `EntryAbsent` when no such entry exists.
pub fn delete(
    handle: &mut FileHandle,
    key_type: AttrType,
    root_page: i32,
    key: &IndexKey,
    rid: Rid,
) -> IndexResult<()> {
    if root_page == NO_PAGE {
        return Err(IndexError::EntryAbsent { rid });
    }

    let (mut page_num, mut leaf) = find_leaf(handle, key_type, root_page, Some(key))?;
    loop {
        let entry = (key.clone(), rid);
        let pos = leaf
            .entries
            .partition_point(|e| compare_entries(e, &entry) == Ordering::Less);
        if pos < leaf.entries.len() && leaf.entries[pos] == entry {
            leaf.entries.remove(pos);
            write_node(handle, page_num, &NodePage::Leaf(leaf))?;
            return Ok(());
        }

        // The entry could only live further right if this leaf ends at or
        // below the key (or holds nothing at all)
        let may_continue = leaf
            .entries
            .last()
            .map_or(true, |(last, _)| last.compare(key) != Ordering::Greater);
        if !may_continue || leaf.next_leaf == NO_PAGE {
            return Err(IndexError::EntryAbsent { rid });
        }

        page_num = leaf.next_leaf;
        leaf = match read_node(handle, key_type, page_num)? {
            NodePage::Leaf(next) => next,
            NodePage::Internal(_) => return Err(IndexError::CorruptPage(page_num as u32)),
        };
    }
}
