//! On-disk layout of B+-tree nodes.
//!
//! Every node fills one page. A leaf carries a forward-sibling pointer and
//! a packed sorted array of (key, rid) entries; an internal node carries
//! `child0` followed by (key, child) pairs. All integers little-endian.

use crate::file::PAGE_SIZE;
use crate::record::{AttrType, Rid};

use super::error::{IndexError, IndexResult};
use super::key::IndexKey;

/// Sentinel page number meaning "none" (no next leaf, empty tree root)
pub const NO_PAGE: i32 = -1;

/// is_leaf (1) + entry_count (2) + free_space (2) + next_leaf (4)
pub const LEAF_HEADER_SIZE: usize = 9;

/// is_leaf (1) + entry_count (2) + free_space (2)
pub const INTERNAL_HEADER_SIZE: usize = 5;

/// page_num (4) + slot_num (2)
pub const RID_SIZE: usize = 6;

/// Child page pointer width in an internal node
pub const CHILD_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct LeafNode {
    pub next_leaf: i32,
    pub entries: Vec<(IndexKey, Rid)>,
}

#[derive(Debug, Clone)]
pub struct InternalNode {
    /// Always one more child than keys
    pub children: Vec<i32>,
    pub keys: Vec<IndexKey>,
}

#[derive(Debug, Clone)]
pub enum NodePage {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl LeafNode {
    pub fn used_bytes(&self) -> usize {
        LEAF_HEADER_SIZE
            + self
                .entries
                .iter()
                .map(|(key, _)| key.encoded_len() + RID_SIZE)
                .sum::<usize>()
    }

    /// Split index balancing the two halves by bytes, nudged to a key-run
    /// boundary so equal keys stay in one leaf whenever possible.
    pub fn split_point(&self) -> usize {
        let total: usize = self
            .entries
            .iter()
            .map(|(key, _)| key.encoded_len() + RID_SIZE)
            .sum();

        let mut at = self.entries.len() / 2;
        let mut acc = 0;
        for (i, (key, _)) in self.entries.iter().enumerate() {
            acc += key.encoded_len() + RID_SIZE;
            if acc * 2 >= total {
                at = i + 1;
                break;
            }
        }
        let byte_mid = at.clamp(1, self.entries.len() - 1);

        // Walk left to the start of the duplicate run under the cut
        let mut at = byte_mid;
        while at > 0
            && self.entries[at - 1].0.compare(&self.entries[at].0) == std::cmp::Ordering::Equal
        {
            at -= 1;
        }
        if at > 0 {
            return at;
        }

        // The run reaches the leaf's start; try the run's far end instead
        let mut at = byte_mid;
        while at < self.entries.len()
            && self.entries[at - 1].0.compare(&self.entries[at].0) == std::cmp::Ordering::Equal
        {
            at += 1;
        }
        if at < self.entries.len() {
            at
        } else {
            // One giant run fills the leaf; a mid-run split is all that's left
            byte_mid
        }
    }
}

impl InternalNode {
    pub fn used_bytes(&self) -> usize {
        INTERNAL_HEADER_SIZE
            + CHILD_SIZE
            + self
                .keys
                .iter()
                .map(|key| key.encoded_len() + CHILD_SIZE)
                .sum::<usize>()
    }

    /// Child index to descend into for `key`: the rightmost child whose
    /// separator is <= key, so duplicates find their first occurrence.
    pub fn route(&self, key: &IndexKey) -> usize {
        self.keys
            .partition_point(|sep| sep.compare(key) != std::cmp::Ordering::Greater)
    }
}

impl NodePage {
    pub fn serialize(&self) -> IndexResult<Vec<u8>> {
        let mut buf = vec![0u8; PAGE_SIZE];
        match self {
            NodePage::Leaf(leaf) => {
                let used = leaf.used_bytes();
                if used > PAGE_SIZE {
                    return Err(IndexError::InvalidArgument(format!(
                        "leaf of {} bytes exceeds page size",
                        used
                    )));
                }
                buf[0] = 1;
                buf[1..3].copy_from_slice(&(leaf.entries.len() as u16).to_le_bytes());
                buf[3..5].copy_from_slice(&((PAGE_SIZE - used) as u16).to_le_bytes());
                buf[5..9].copy_from_slice(&leaf.next_leaf.to_le_bytes());

                let mut out = Vec::with_capacity(used - LEAF_HEADER_SIZE);
                for (key, rid) in &leaf.entries {
                    key.encode_into(&mut out);
                    out.extend_from_slice(&rid.page_num.to_le_bytes());
                    out.extend_from_slice(&rid.slot_num.to_le_bytes());
                }
                buf[LEAF_HEADER_SIZE..LEAF_HEADER_SIZE + out.len()].copy_from_slice(&out);
            }
            NodePage::Internal(node) => {
                let used = node.used_bytes();
                if used > PAGE_SIZE || node.children.len() != node.keys.len() + 1 {
                    return Err(IndexError::InvalidArgument(format!(
                        "malformed internal node ({} bytes, {} children, {} keys)",
                        used,
                        node.children.len(),
                        node.keys.len()
                    )));
                }
                buf[0] = 0;
                buf[1..3].copy_from_slice(&(node.keys.len() as u16).to_le_bytes());
                buf[3..5].copy_from_slice(&((PAGE_SIZE - used) as u16).to_le_bytes());

                let mut out = Vec::with_capacity(used - INTERNAL_HEADER_SIZE);
                out.extend_from_slice(&node.children[0].to_le_bytes());
                for (key, child) in node.keys.iter().zip(&node.children[1..]) {
                    key.encode_into(&mut out);
                    out.extend_from_slice(&child.to_le_bytes());
                }
                buf[INTERNAL_HEADER_SIZE..INTERNAL_HEADER_SIZE + out.len()]
                    .copy_from_slice(&out);
            }
        }
        Ok(buf)
    }

    pub fn deserialize(page_num: u32, key_type: AttrType, buf: &[u8]) -> IndexResult<Self> {
        match buf[0] {
            1 => {
                let entry_count = u16::from_le_bytes([buf[1], buf[2]]) as usize;
                let next_leaf = i32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]);

                let mut pos = LEAF_HEADER_SIZE;
                let mut entries = Vec::with_capacity(entry_count);
                for _ in 0..entry_count {
                    let key = IndexKey::decode_at(key_type, buf, &mut pos)
                        .map_err(|_| IndexError::CorruptPage(page_num))?;
                    if pos + RID_SIZE > buf.len() {
                        return Err(IndexError::CorruptPage(page_num));
                    }
                    let page = u32::from_le_bytes([
                        buf[pos],
                        buf[pos + 1],
                        buf[pos + 2],
                        buf[pos + 3],
                    ]);
                    let slot = u16::from_le_bytes([buf[pos + 4], buf[pos + 5]]);
                    pos += RID_SIZE;
                    entries.push((key, Rid::new(page, slot)));
                }
                Ok(NodePage::Leaf(LeafNode { next_leaf, entries }))
            }
            0 => {
                let key_count = u16::from_le_bytes([buf[1], buf[2]]) as usize;

                let mut pos = INTERNAL_HEADER_SIZE;
                if pos + CHILD_SIZE > buf.len() {
                    return Err(IndexError::CorruptPage(page_num));
                }
                let mut children = Vec::with_capacity(key_count + 1);
                children.push(i32::from_le_bytes([
                    buf[pos],
                    buf[pos + 1],
                    buf[pos + 2],
                    buf[pos + 3],
                ]));
                pos += CHILD_SIZE;

                let mut keys = Vec::with_capacity(key_count);
                for _ in 0..key_count {
                    let key = IndexKey::decode_at(key_type, buf, &mut pos)
                        .map_err(|_| IndexError::CorruptPage(page_num))?;
                    if pos + CHILD_SIZE > buf.len() {
                        return Err(IndexError::CorruptPage(page_num));
                    }
                    children.push(i32::from_le_bytes([
                        buf[pos],
                        buf[pos + 1],
                        buf[pos + 2],
                        buf[pos + 3],
                    ]));
                    pos += CHILD_SIZE;
                    keys.push(key);
                }
                Ok(NodePage::Internal(InternalNode { children, keys }))
            }
            tag => Err(IndexError::InvalidNodeType { page_num, tag }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_with(entries: Vec<(i32, u32, u16)>) -> LeafNode {
        LeafNode {
            next_leaf: NO_PAGE,
            entries: entries
                .into_iter()
                .map(|(k, p, s)| (IndexKey::Int(k), Rid::new(p, s)))
                .collect(),
        }
    }

    #[test]
    fn test_leaf_round_trip() {
        let leaf = LeafNode {
            next_leaf: 7,
            entries: vec![
                (IndexKey::Int(1), Rid::new(10, 1)),
                (IndexKey::Int(2), Rid::new(20, 2)),
            ],
        };
        let buf = NodePage::Leaf(leaf.clone()).serialize().unwrap();
        assert_eq!(buf.len(), PAGE_SIZE);

        match NodePage::deserialize(3, AttrType::Int, &buf).unwrap() {
            NodePage::Leaf(restored) => {
                assert_eq!(restored.next_leaf, 7);
                assert_eq!(restored.entries, leaf.entries);
            }
            NodePage::Internal(_) => panic!("expected leaf"),
        }
    }

    #[test]
    fn test_internal_round_trip_varchar() {
        let node = InternalNode {
            children: vec![1, 2, 3],
            keys: vec![
                IndexKey::VarChar(b"middle".to_vec()),
                IndexKey::VarChar(b"upper".to_vec()),
            ],
        };
        let buf = NodePage::Internal(node.clone()).serialize().unwrap();

        match NodePage::deserialize(0, AttrType::VarChar, &buf).unwrap() {
            NodePage::Internal(restored) => {
                assert_eq!(restored.children, node.children);
                assert_eq!(restored.keys, node.keys);
            }
            NodePage::Leaf(_) => panic!("expected internal"),
        }
    }

    #[test]
    fn test_free_space_recorded() {
        let leaf = leaf_with(vec![(1, 1, 1)]);
        let used = leaf.used_bytes();
        let buf = NodePage::Leaf(leaf).serialize().unwrap();
        let free = u16::from_le_bytes([buf[3], buf[4]]) as usize;
        assert_eq!(free, PAGE_SIZE - used);
    }

    #[test]
    fn test_invalid_node_tag() {
        let mut buf = vec![0u8; PAGE_SIZE];
        buf[0] = 9;
        assert!(matches!(
            NodePage::deserialize(5, AttrType::Int, &buf),
            Err(IndexError::InvalidNodeType { page_num: 5, tag: 9 })
        ));
    }

    #[test]
    fn test_route_ties_resolve_right() {
        let node = InternalNode {
            children: vec![10, 11, 12],
            keys: vec![IndexKey::Int(5), IndexKey::Int(9)],
        };
        assert_eq!(node.route(&IndexKey::Int(3)), 0);
        assert_eq!(node.route(&IndexKey::Int(5)), 1);
        assert_eq!(node.route(&IndexKey::Int(7)), 1);
        assert_eq!(node.route(&IndexKey::Int(9)), 2);
        assert_eq!(node.route(&IndexKey::Int(100)), 2);
    }

    #[test]
    fn test_split_point_balances_bytes() {
        let leaf = leaf_with((0..10).map(|i| (i, i as u32, 0)).collect());
        let at = leaf.split_point();
        assert!(at >= 4 && at <= 6);
    }

    #[test]
    fn test_split_point_keeps_duplicate_run_together() {
        // Run of key 5 straddles the byte midpoint; the cut must move to
        // the run's start
        let leaf = leaf_with(vec![
            (1, 0, 0),
            (2, 0, 1),
            (5, 0, 2),
            (5, 0, 3),
            (5, 0, 4),
            (5, 0, 5),
            (9, 0, 6),
        ]);
        let at = leaf.split_point();
        assert_eq!(at, 2);
    }

    #[test]
    fn test_split_point_single_run_falls_back_to_middle() {
        let leaf = leaf_with((0..8).map(|i| (5, 0, i as u16)).collect());
        let at = leaf.split_point();
        assert!(at >= 1 && at < 8);
    }
}
