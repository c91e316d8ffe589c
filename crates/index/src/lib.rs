//! In-memory B-tree for secondary indexes.
//!
//! Keys are JSON-comparable values (numbers, strings, booleans, null) wrapped
//! in [`IndexKey`] to get a total order. Leaves hold sorted entry arrays and
//! are searched with binary search; internal nodes keep a fan-out of up to
//! [`FANOUT`] children. Each key carries the row references pointing at every
//! row whose indexed field holds that value, so duplicates are free.
//!
//! The tree lives only in memory: it is rebuilt from a table scan when the
//! database opens, and its existence is recorded in the `_indexes` catalog
//! table rather than on dedicated pages.


mod key;

pub use key::IndexKey;

use common::RowRef;
use serde_json::Value;

/// Maximum entries per leaf and children per internal node.
pub const FANOUT: usize = 32;

/// Counters surfaced by SHOW INDEXES / SHOW STATS.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Distinct keys in the tree.
    pub keys: usize,
    /// Total `(key, row)` pairs, duplicates included.
    pub entries: usize,
    /// Tree height (a lone leaf has depth 1).
    pub depth: usize,
}

#[derive(Debug)]
enum Node {
    Leaf {
        entries: Vec<(IndexKey, Vec<RowRef>)>,
    },
    Internal {
        /// `keys[i]` is the smallest key reachable under `children[i + 1]`.
        keys: Vec<IndexKey>,
        children: Vec<Node>,
    },
}

impl Node {
    fn empty_leaf() -> Self {
        Node::Leaf { entries: Vec::new() }
    }
}

/// Ordered index over one `(table, field)` pair.
#[derive(Debug)]
pub struct BTreeIndex {
    root: Node,
    entries: usize,
    keys: usize,
}

impl Default for BTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self {
            root: Node::empty_leaf(),
            entries: 0,
            keys: 0,
        }
    }

    /// Register `row` under `key`. Duplicate keys accumulate references.
    pub fn insert(&mut self, key: &Value, row: RowRef) {
        let key = IndexKey::from(key.clone());
        if let Some((sep, sibling)) = insert_rec(&mut self.root, key, row, &mut self.keys) {
            let old_root = std::mem::replace(&mut self.root, Node::empty_leaf());
            self.root = Node::Internal {
                keys: vec![sep],
                children: vec![old_root, sibling],
            };
        }
        self.entries += 1;
    }

    /// Remove one `(key, row)` pair; the key entry disappears with its last
    /// reference. Returns whether anything was removed.
    pub fn remove(&mut self, key: &Value, row: RowRef) -> bool {
        let key = IndexKey::from(key.clone());
        let removed = remove_rec(&mut self.root, &key, row, &mut self.keys);
        if removed {
            self.entries -= 1;
        }
        removed
    }

    /// All row references stored under `key`.
    pub fn find(&self, key: &Value) -> Vec<RowRef> {
        let key = IndexKey::from(key.clone());
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf { entries } => {
                    return match entries.binary_search_by(|(k, _)| k.cmp(&key)) {
                        Ok(idx) => entries[idx].1.clone(),
                        Err(_) => Vec::new(),
                    };
                }
                Node::Internal { keys, children } => {
                    let idx = child_index(keys, &key);
                    node = &children[idx];
                }
            }
        }
    }

    /// Lazy in-order walk over the inclusive key range `[lo, hi]`.
    pub fn range<'a>(&'a self, lo: &Value, hi: &Value) -> RangeIter<'a> {
        RangeIter::new(&self.root, IndexKey::from(lo.clone()), IndexKey::from(hi.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            keys: self.keys,
            entries: self.entries,
            depth: depth(&self.root),
        }
    }
}

fn depth(node: &Node) -> usize {
    match node {
        Node::Leaf { .. } => 1,
        Node::Internal { children, .. } => 1 + depth(&children[0]),
    }
}

/// Index of the child that may contain `key`.
fn child_index(keys: &[IndexKey], key: &IndexKey) -> usize {
    match keys.binary_search(key) {
        Ok(idx) => idx + 1,
        Err(idx) => idx,
    }
}

/// Recursive insert; on overflow returns the separator key and new right
/// sibling for the caller to hook in.
fn insert_rec(
    node: &mut Node,
    key: IndexKey,
    row: RowRef,
    key_count: &mut usize,
) -> Option<(IndexKey, Node)> {
    match node {
        Node::Leaf { entries } => {
            match entries.binary_search_by(|(k, _)| k.cmp(&key)) {
                Ok(idx) => {
                    entries[idx].1.push(row);
                    return None;
                }
                Err(idx) => {
                    entries.insert(idx, (key, vec![row]));
                    *key_count += 1;
                }
            }
            if entries.len() <= FANOUT {
                return None;
            }
            let right = entries.split_off(entries.len() / 2);
            let sep = right[0].0.clone();
            Some((sep, Node::Leaf { entries: right }))
        }
        Node::Internal { keys, children } => {
            let idx = child_index(keys, &key);
            let split = insert_rec(&mut children[idx], key, row, key_count)?;
            let (sep, sibling) = split;
            keys.insert(idx, sep);
            children.insert(idx + 1, sibling);
            if children.len() <= FANOUT {
                return None;
            }
            // Split this internal node: the middle key moves up.
            let mid = keys.len() / 2;
            let up = keys[mid].clone();
            let right_keys = keys.split_off(mid + 1);
            keys.pop();
            let right_children = children.split_off(mid + 1);
            Some((
                up,
                Node::Internal {
                    keys: right_keys,
                    children: right_children,
                },
            ))
        }
    }
}

/// Recursive remove. Leaves may go empty; no rebalancing is performed, which
/// keeps deletion O(log n) and is fine for a rebuilt-on-open structure.
fn remove_rec(node: &mut Node, key: &IndexKey, row: RowRef, key_count: &mut usize) -> bool {
    match node {
        Node::Leaf { entries } => match entries.binary_search_by(|(k, _)| k.cmp(key)) {
            Ok(idx) => {
                let refs = &mut entries[idx].1;
                let Some(pos) = refs.iter().position(|r| *r == row) else {
                    return false;
                };
                refs.remove(pos);
                if refs.is_empty() {
                    entries.remove(idx);
                    *key_count -= 1;
                }
                true
            }
            Err(_) => false,
        },
        Node::Internal { keys, children } => {
            let idx = child_index(keys, key);
            remove_rec(&mut children[idx], key, row, key_count)
        }
    }
}

/// Depth-first iterator yielding `(key, row)` pairs inside an inclusive range.
pub struct RangeIter<'a> {
    stack: Vec<&'a Node>,
    current: Option<(&'a [(IndexKey, Vec<RowRef>)], usize, usize)>,
    lo: IndexKey,
    hi: IndexKey,
}

impl<'a> RangeIter<'a> {
    fn new(root: &'a Node, lo: IndexKey, hi: IndexKey) -> Self {
        Self {
            stack: vec![root],
            current: None,
            lo,
            hi,
        }
    }

    fn descend(&mut self) -> bool {
        while let Some(node) = self.stack.pop() {
            match node {
                Node::Leaf { entries } => {
                    let start = entries
                        .binary_search_by(|(k, _)| k.cmp(&self.lo))
                        .unwrap_or_else(|e| e);
                    if start < entries.len() {
                        self.current = Some((entries.as_slice(), start, 0));
                        return true;
                    }
                }
                Node::Internal { keys, children } => {
                    // Push candidates right-to-left so leftmost pops first.
                    let first = child_index(keys, &self.lo);
                    let last = child_index(keys, &self.hi);
                    for idx in (first..=last).rev() {
                        self.stack.push(&children[idx]);
                    }
                }
            }
        }
        false
    }
}

impl<'a> Iterator for RangeIter<'a> {
    type Item = (&'a Value, RowRef);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() && !self.descend() {
                return None;
            }
            let (entries, entry_idx, ref_idx) = self.current.take().expect("set by descend");
            if entry_idx >= entries.len() {
                continue;
            }
            let (key, refs) = &entries[entry_idx];
            if *key > self.hi {
                // Past the range: drain the stack, nothing further qualifies.
                self.stack.clear();
                return None;
            }
            if ref_idx < refs.len() {
                self.current = Some((entries, entry_idx, ref_idx + 1));
                return Some((key.value(), refs[ref_idx]));
            }
            self.current = Some((entries, entry_idx + 1, 0));
        }
    }
}
