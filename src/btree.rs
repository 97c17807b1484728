//! # B+tree
//!
//! The disk-resident ordered map: byte-string keys to `u64` values. Trees
//! serve both as the user-facing map and as the backing index of the
//! table-schema catalog.
//!
//! ## Node layout
//!
//! Every node occupies one page. The slot-directory cursors live in the
//! page's *metadata entry* ([`TreeHeader`]): `floor` is one past the end of
//! the slot array (which grows up from offset 0), `ceiling` is the start of
//! the entry region (which grows down from the end of the page), and
//! `free_space` is their distance. Each slot is a little-endian u16 offset
//! pointing at an entry:
//!
//! ```text
//! entry := varint(key_len) key_bytes varint(value)
//! ```
//!
//! Leaves store the user value; branches store the child page number, and
//! a branch entry's key is the smallest key reachable through that child.
//! Keys order as byte strings (shorter wins ties), which is exactly how
//! Rust compares slices.
//!
//! ## Traversal
//!
//! Descents record `(page_num, position)` pairs on an explicit
//! [`TraversalStack`]; splits and deletions walk the stack back up instead
//! of recursing. A root split allocates a new branch root, so the tree id
//! (its root page number) changes and callers observe it through
//! [`BTree::root`].

use crate::error::{Error, Result};
use crate::meta::{PageMetadata, TreeHeader};
use crate::pages::PAGE_SIZE;
use crate::txn::Transaction;
use crate::varint;

/// Hard cap on key length; keeps a handful of entries on every page so
/// splits always make progress.
pub const MAX_KEY_SIZE: usize = 1024;

const SLOT_SIZE: usize = 2;

// ---------------------------------------------------------------------------
// Traversal stack
// ---------------------------------------------------------------------------

/// Explicit descent stack of `(page_num, position)` pairs.
#[derive(Debug, Default)]
pub struct TraversalStack {
    pages: Vec<u64>,
    positions: Vec<u16>,
}

impl TraversalStack {
    pub fn new() -> TraversalStack {
        TraversalStack::default()
    }

    pub fn push(&mut self, page_num: u64, position: u16) {
        self.pages.push(page_num);
        self.positions.push(position);
    }

    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the stack is empty.
    pub fn pop(&mut self) -> Result<(u64, u16)> {
        match (self.pages.pop(), self.positions.pop()) {
            (Some(page), Some(position)) => Ok((page, position)),
            _ => Err(Error::InvalidArgument(
                "the traversal stack is empty, cannot pop".into(),
            )),
        }
    }

    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the stack is empty.
    pub fn peek(&self) -> Result<(u64, u16)> {
        match (self.pages.last(), self.positions.last()) {
            (Some(&page), Some(&position)) => Ok((page, position)),
            _ => Err(Error::InvalidArgument(
                "the traversal stack is empty, cannot peek".into(),
            )),
        }
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.positions.clear();
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Node primitives (operate on a page body + its tree header)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Leaf,
    Branch,
}

fn node_kind(entry: &PageMetadata) -> Result<(NodeKind, TreeHeader)> {
    match entry {
        PageMetadata::TreeLeaf(h) => Ok((NodeKind::Leaf, *h)),
        PageMetadata::TreeBranch(h) => Ok((NodeKind::Branch, *h)),
        other => Err(Error::Corruption(format!(
            "expected a tree page, found {other:?}"
        ))),
    }
}

fn node_metadata(kind: NodeKind, h: TreeHeader) -> PageMetadata {
    match kind {
        NodeKind::Leaf => PageMetadata::TreeLeaf(h),
        NodeKind::Branch => PageMetadata::TreeBranch(h),
    }
}

fn empty_header() -> TreeHeader {
    TreeHeader {
        floor: 0,
        ceiling: PAGE_SIZE as u16,
        free_space: PAGE_SIZE as u16,
    }
}

#[inline]
fn slot_count(h: &TreeHeader) -> u16 {
    h.floor / SLOT_SIZE as u16
}

#[inline]
fn slot_offset(body: &[u8], index: u16) -> usize {
    let at = index as usize * SLOT_SIZE;
    u16::from_le_bytes([body[at], body[at + 1]]) as usize
}

/// Decode the entry at `offset`, returning `(key, value, encoded_len)`.
fn entry_at(body: &[u8], offset: usize) -> Result<(&[u8], u64, usize)> {
    let (key_len, used) = varint::decode(&body[offset..])?;
    let key_start = offset + used;
    let key_end = key_start + key_len as usize;
    if key_end > body.len() {
        return Err(Error::Corruption("tree entry key overruns the page".into()));
    }
    let (value, value_used) = varint::decode(&body[key_end..])?;
    Ok((
        &body[key_start..key_end],
        value,
        used + key_len as usize + value_used,
    ))
}

fn entry_size(key: &[u8], value: u64) -> usize {
    varint::encoded_len(key.len() as u64) + key.len() + varint::encoded_len(value)
}

/// Binary-search the slot array. `Ok(i)` is an exact match, `Err(i)` the
/// insertion position.
fn search(body: &[u8], h: &TreeHeader, key: &[u8]) -> Result<std::result::Result<u16, u16>> {
    let mut low = 0u16;
    let mut high = slot_count(h);
    while low < high {
        let mid = (low + high) / 2;
        let (entry_key, _, _) = entry_at(body, slot_offset(body, mid))?;
        match entry_key.cmp(key) {
            std::cmp::Ordering::Equal => return Ok(Ok(mid)),
            std::cmp::Ordering::Less => low = mid + 1,
            std::cmp::Ordering::Greater => high = mid,
        }
    }
    Ok(Err(low))
}

/// The child a branch routes `key` to: the last entry whose key is not
/// greater than `key`, clamped to the leftmost entry.
fn branch_child_index(body: &[u8], h: &TreeHeader, key: &[u8]) -> Result<u16> {
    Ok(match search(body, h, key)? {
        Ok(i) => i,
        Err(0) => 0,
        Err(i) => i - 1,
    })
}

fn read_entry(body: &[u8], index: u16) -> Result<(Vec<u8>, u64)> {
    let (key, value, _) = entry_at(body, slot_offset(body, index))?;
    Ok((key.to_vec(), value))
}

/// Append an entry body and wire its slot at `index`. The caller has
/// verified there is room.
fn insert_entry(body: &mut [u8], h: &mut TreeHeader, index: u16, key: &[u8], value: u64) {
    let size = entry_size(key, value);
    let offset = h.ceiling as usize - size;

    let mut encoded = Vec::with_capacity(size);
    varint::encode(key.len() as u64, &mut encoded);
    encoded.extend_from_slice(key);
    varint::encode(value, &mut encoded);
    body[offset..offset + size].copy_from_slice(&encoded);

    // Shift the slots at and after `index` up by one.
    let count = slot_count(h);
    for i in (index..count).rev() {
        let at = i as usize * SLOT_SIZE;
        let (a, b) = (body[at], body[at + 1]);
        body[at + SLOT_SIZE] = a;
        body[at + SLOT_SIZE + 1] = b;
    }
    let at = index as usize * SLOT_SIZE;
    body[at..at + SLOT_SIZE].copy_from_slice(&(offset as u16).to_le_bytes());

    h.floor += SLOT_SIZE as u16;
    h.ceiling = offset as u16;
    h.free_space = h.ceiling - h.floor;
}

/// Unwire the slot at `index`; the entry bytes become dead space that a
/// later compaction reclaims.
fn remove_entry(body: &mut [u8], h: &mut TreeHeader, index: u16) {
    let count = slot_count(h);
    for i in index..count - 1 {
        let at = (i + 1) as usize * SLOT_SIZE;
        let (a, b) = (body[at], body[at + 1]);
        body[at - SLOT_SIZE] = a;
        body[at - SLOT_SIZE + 1] = b;
    }
    h.floor -= SLOT_SIZE as u16;
    // The ceiling is left alone; `free_space` only grows by the slot.
    h.free_space = h.ceiling - h.floor;
}

fn collect_entries(body: &[u8], h: &TreeHeader) -> Result<Vec<(Vec<u8>, u64)>> {
    let count = slot_count(h);
    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count {
        entries.push(read_entry(body, i)?);
    }
    Ok(entries)
}

/// Rewrite a node from scratch with `entries` in slot order.
fn rebuild(body: &mut [u8], h: &mut TreeHeader, entries: &[(Vec<u8>, u64)]) {
    body.fill(0);
    *h = empty_header();
    for (i, (key, value)) in entries.iter().enumerate() {
        insert_entry(body, h, i as u16, key, *value);
    }
}

// ---------------------------------------------------------------------------
// BTree
// ---------------------------------------------------------------------------

/// A B+tree identified by its root page number.
///
/// The root page changes when the root splits or collapses; persist the
/// value of [`root`](Self::root) after every mutating batch.
#[derive(Debug, Clone, Copy)]
pub struct BTree {
    root: u64,
}

impl BTree {
    /// Create an empty tree: a single leaf page.
    pub fn create(tx: &mut Transaction<'_>) -> Result<BTree> {
        let root = tx.allocate_page(PageMetadata::TreeLeaf(empty_header()), 0)?;
        Ok(BTree { root })
    }

    /// Open a tree rooted at a known page.
    pub fn open(root: u64) -> BTree {
        BTree { root }
    }

    /// The tree id: the current root page number.
    #[inline]
    pub fn root(&self) -> u64 {
        self.root
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Find the value stored under `key`.
    pub fn get(&self, tx: &mut Transaction<'_>, key: &[u8]) -> Result<Option<u64>> {
        let leaf = self.descend(tx, key, None)?;
        let (_, h) = node_kind(&tx.metadata(leaf)?)?;
        let body = tx.raw_get_page(leaf, 1)?;
        match search(body, &h, key)? {
            Ok(i) => {
                let (_, value) = read_entry(body, i)?;
                Ok(Some(value))
            }
            Err(_) => Ok(None),
        }
    }

    /// Walk from the root to the leaf responsible for `key`, optionally
    /// recording the branch positions taken.
    fn descend(
        &self,
        tx: &mut Transaction<'_>,
        key: &[u8],
        mut stack: Option<&mut TraversalStack>,
    ) -> Result<u64> {
        let mut page = self.root;
        loop {
            let (kind, h) = node_kind(&tx.metadata(page)?)?;
            if kind == NodeKind::Leaf {
                return Ok(page);
            }
            let body = tx.raw_get_page(page, 1)?;
            let index = branch_child_index(body, &h, key)?;
            let (_, child) = read_entry(body, index)?;
            if let Some(stack) = stack.as_deref_mut() {
                stack.push(page, index);
            }
            page = child;
        }
    }

    // -----------------------------------------------------------------------
    // Insert
    // -----------------------------------------------------------------------

    /// Insert or replace `key`, mapping it to `value`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] -- the key is empty or longer than
    /// [`MAX_KEY_SIZE`].
    pub fn set(&mut self, tx: &mut Transaction<'_>, key: &[u8], value: u64) -> Result<()> {
        if key.is_empty() || key.len() > MAX_KEY_SIZE {
            return Err(Error::InvalidArgument(format!(
                "key length {} is outside 1..={MAX_KEY_SIZE}",
                key.len()
            )));
        }

        let mut stack = TraversalStack::new();
        let leaf = self.descend(tx, key, Some(&mut stack))?;

        // Replace-in-place is a remove followed by a fresh insert.
        {
            let (_, h) = node_kind(&tx.metadata(leaf)?)?;
            let existing = {
                let body = tx.raw_get_page(leaf, 1)?;
                search(body, &h, key)?
            };
            if let Ok(i) = existing {
                let mut h = h;
                let body = tx.raw_modify_page(leaf, 1)?;
                remove_entry(body, &mut h, i);
                tx.set_metadata(leaf, &PageMetadata::TreeLeaf(h))?;
            }
        }

        let mut pending = self.insert_into_node(tx, leaf, key, value)?;

        // Propagate splits toward the root.
        while let Some((separator, new_page)) = pending {
            if stack.is_empty() {
                self.grow_root(tx, separator, new_page)?;
                return Ok(());
            }
            let (parent, _) = stack.pop()?;
            pending = self.insert_into_node(tx, parent, &separator, new_page)?;
        }
        Ok(())
    }

    /// Insert `(key, value)` into one node, splitting it when it cannot
    /// absorb the entry. Returns the separator and sibling to add to the
    /// parent when a split happened.
    fn insert_into_node(
        &mut self,
        tx: &mut Transaction<'_>,
        page: u64,
        key: &[u8],
        value: u64,
    ) -> Result<Option<(Vec<u8>, u64)>> {
        let (kind, mut h) = node_kind(&tx.metadata(page)?)?;
        let needed = entry_size(key, value) + SLOT_SIZE;

        let index = {
            let body = tx.raw_get_page(page, 1)?;
            match search(body, &h, key)? {
                Ok(_) => {
                    return Err(Error::InvalidState(format!(
                        "duplicate key insert into tree page {page}"
                    )))
                }
                Err(i) => i,
            }
        };

        if (h.free_space as usize) < needed {
            // Dead entry bytes may be reclaimable before we split.
            let entries = {
                let body = tx.raw_get_page(page, 1)?;
                collect_entries(body, &h)?
            };
            let live: usize = entries
                .iter()
                .map(|(k, v)| entry_size(k, *v) + SLOT_SIZE)
                .sum();
            if PAGE_SIZE - live >= needed {
                let body = tx.raw_modify_page(page, 1)?;
                rebuild(body, &mut h, &entries);
            } else {
                return self.split(tx, page, kind, entries, index, key, value);
            }
        }

        let body = tx.raw_modify_page(page, 1)?;
        insert_entry(body, &mut h, index, key, value);
        tx.set_metadata(page, &node_metadata(kind, h))?;
        Ok(None)
    }

    /// Split `page`: keep the low half in place, move the high half (with
    /// the new entry merged in) to a fresh sibling of the same kind, and
    /// hand the right sibling's smallest key up as the separator.
    fn split(
        &mut self,
        tx: &mut Transaction<'_>,
        page: u64,
        kind: NodeKind,
        mut entries: Vec<(Vec<u8>, u64)>,
        index: u16,
        key: &[u8],
        value: u64,
    ) -> Result<Option<(Vec<u8>, u64)>> {
        entries.insert(index as usize, (key.to_vec(), value));
        let split_point = entries.len() / 2;
        let right_entries = entries.split_off(split_point);
        let separator = right_entries[0].0.clone();

        let sibling = tx.allocate_page(node_metadata(kind, empty_header()), page)?;
        {
            let mut h = empty_header();
            let body = tx.raw_modify_page(sibling, 1)?;
            rebuild(body, &mut h, &right_entries);
            tx.set_metadata(sibling, &node_metadata(kind, h))?;
        }
        {
            let mut h = empty_header();
            let body = tx.raw_modify_page(page, 1)?;
            rebuild(body, &mut h, &entries);
            tx.set_metadata(page, &node_metadata(kind, h))?;
        }

        Ok(Some((separator, sibling)))
    }

    /// The root overflowed: allocate a new branch root over the old root
    /// and the freshly split-off sibling. The tree id changes here.
    fn grow_root(
        &mut self,
        tx: &mut Transaction<'_>,
        separator: Vec<u8>,
        right: u64,
    ) -> Result<()> {
        let left = self.root;
        let left_min = {
            let (_, h) = node_kind(&tx.metadata(left)?)?;
            let body = tx.raw_get_page(left, 1)?;
            if slot_count(&h) == 0 {
                Vec::new()
            } else {
                read_entry(body, 0)?.0
            }
        };

        let new_root = tx.allocate_page(PageMetadata::TreeBranch(empty_header()), left)?;
        let mut h = empty_header();
        let body = tx.raw_modify_page(new_root, 1)?;
        insert_entry(body, &mut h, 0, &left_min, left);
        insert_entry(body, &mut h, 1, &separator, right);
        tx.set_metadata(new_root, &PageMetadata::TreeBranch(h))?;

        self.root = new_root;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    /// Remove `key`. Returns `true` when it was present.
    ///
    /// Emptied leaves are freed and their separators removed from the
    /// parent; a root branch left with a single child collapses into it.
    pub fn del(&mut self, tx: &mut Transaction<'_>, key: &[u8]) -> Result<bool> {
        let mut stack = TraversalStack::new();
        let leaf = self.descend(tx, key, Some(&mut stack))?;

        let (_, mut h) = node_kind(&tx.metadata(leaf)?)?;
        let found = {
            let body = tx.raw_get_page(leaf, 1)?;
            search(body, &h, key)?
        };
        let index = match found {
            Ok(i) => i,
            Err(_) => return Ok(false),
        };

        {
            let body = tx.raw_modify_page(leaf, 1)?;
            remove_entry(body, &mut h, index);
        }
        tx.set_metadata(leaf, &PageMetadata::TreeLeaf(h))?;

        // Cascade: free emptied nodes and unlink them from their parents.
        let mut emptied = slot_count(&h) == 0 && leaf != self.root;
        let mut child = leaf;
        while emptied {
            tx.free_page(child)?;
            let (parent, position) = stack.pop()?;
            let (_, mut ph) = node_kind(&tx.metadata(parent)?)?;
            {
                let body = tx.raw_modify_page(parent, 1)?;
                remove_entry(body, &mut ph, position);
            }
            tx.set_metadata(parent, &PageMetadata::TreeBranch(ph))?;
            child = parent;
            emptied = slot_count(&ph) == 0 && parent != self.root;
        }

        self.collapse_root(tx)?;
        Ok(true)
    }

    /// While the root is a branch with a single child, make that child the
    /// root; a fully emptied root branch is rebuilt as an empty leaf.
    fn collapse_root(&mut self, tx: &mut Transaction<'_>) -> Result<()> {
        loop {
            let (kind, h) = node_kind(&tx.metadata(self.root)?)?;
            if kind == NodeKind::Leaf {
                return Ok(());
            }
            match slot_count(&h) {
                0 => {
                    tx.set_metadata(self.root, &PageMetadata::TreeLeaf(empty_header()))?;
                    let body = tx.raw_modify_page(self.root, 1)?;
                    body.fill(0);
                    return Ok(());
                }
                1 => {
                    let child = {
                        let body = tx.raw_get_page(self.root, 1)?;
                        read_entry(body, 0)?.1
                    };
                    tx.free_page(self.root)?;
                    self.root = child;
                }
                _ => return Ok(()),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Compare and swap
    // -----------------------------------------------------------------------

    /// Atomically replace the value under `key` when the current value
    /// matches `expected` (`None` = absent). `new = None` deletes. Returns
    /// `true` when the swap applied.
    pub fn compare_and_swap(
        &mut self,
        tx: &mut Transaction<'_>,
        key: &[u8],
        expected: Option<u64>,
        new: Option<u64>,
    ) -> Result<bool> {
        let current = self.get(tx, key)?;
        if current != expected {
            return Ok(false);
        }
        match new {
            Some(value) => self.set(tx, key, value)?,
            None => {
                let _ = self.del(tx, key)?;
            }
        }
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Scan
    // -----------------------------------------------------------------------

    /// An ordered cursor over `[from, ..)`; pass an empty slice to scan the
    /// whole tree.
    pub fn scan<'t, 'db>(
        &self,
        tx: &'t mut Transaction<'db>,
        from: &[u8],
    ) -> Result<TreeScan<'t, 'db>> {
        let mut stack = TraversalStack::new();
        let mut page = self.root;
        loop {
            let (kind, h) = node_kind(&tx.metadata(page)?)?;
            if kind == NodeKind::Leaf {
                let start = {
                    let body = tx.raw_get_page(page, 1)?;
                    match search(body, &h, from)? {
                        Ok(i) => i,
                        Err(i) => i,
                    }
                };
                stack.push(page, start);
                break;
            }
            let index = {
                let body = tx.raw_get_page(page, 1)?;
                branch_child_index(body, &h, from)?
            };
            let child = {
                let body = tx.raw_get_page(page, 1)?;
                read_entry(body, index)?.1
            };
            // Record the next sibling to visit once this subtree drains.
            stack.push(page, index + 1);
            page = child;
        }
        Ok(TreeScan { tx, stack })
    }
}

/// Ordered iterator state over a tree; see [`BTree::scan`].
pub struct TreeScan<'t, 'db> {
    tx: &'t mut Transaction<'db>,
    stack: TraversalStack,
}

impl TreeScan<'_, '_> {
    /// The next `(key, value)` pair in order, or `None` when the scan is
    /// exhausted.
    pub fn next(&mut self) -> Result<Option<(Vec<u8>, u64)>> {
        loop {
            if self.stack.is_empty() {
                return Ok(None);
            }
            let (page, position) = self.stack.peek()?;
            let (kind, h) = node_kind(&self.tx.metadata(page)?)?;
            if position >= slot_count(&h) {
                self.stack.pop()?;
                continue;
            }
            match kind {
                NodeKind::Leaf => {
                    let entry = {
                        let body = self.tx.raw_get_page(page, 1)?;
                        read_entry(body, position)?
                    };
                    self.bump_top(page, position + 1)?;
                    return Ok(Some(entry));
                }
                NodeKind::Branch => {
                    let child = {
                        let body = self.tx.raw_get_page(page, 1)?;
                        read_entry(body, position)?.1
                    };
                    self.bump_top(page, position + 1)?;
                    self.stack.push(child, 0);
                }
            }
        }
    }

    fn bump_top(&mut self, page: u64, position: u16) -> Result<()> {
        self.stack.pop()?;
        self.stack.push(page, position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, Options};
    use tempfile::TempDir;

    fn open_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(
            dir.path().join("tree.corvus"),
            Options {
                minimum_size: 4 * 1024 * 1024,
                ..Options::default()
            },
        )
        .unwrap();
        (dir, db)
    }

    #[test]
    fn stack_push_pop_peek() {
        let mut stack = TraversalStack::new();
        assert!(stack.pop().is_err());
        assert!(stack.peek().is_err());

        stack.push(7, 1);
        stack.push(9, 2);
        assert_eq!(stack.peek().unwrap(), (9, 2));
        assert_eq!(stack.pop().unwrap(), (9, 2));
        assert_eq!(stack.pop().unwrap(), (7, 1));
        assert!(matches!(stack.pop(), Err(Error::InvalidArgument(_))));

        stack.push(1, 0);
        stack.clear();
        assert!(stack.is_empty());
    }

    #[test]
    fn set_and_get_single_item() {
        let (_dir, db) = open_db();
        let mut tx = db.write_tx().unwrap();
        let mut tree = BTree::create(&mut tx).unwrap();

        tree.set(&mut tx, b"John", 5).unwrap();
        assert_eq!(tree.get(&mut tx, b"John").unwrap(), Some(5));
        assert_eq!(tree.get(&mut tx, b"Jane").unwrap(), None);
    }

    #[test]
    fn set_replaces_existing_value() {
        let (_dir, db) = open_db();
        let mut tx = db.write_tx().unwrap();
        let mut tree = BTree::create(&mut tx).unwrap();

        tree.set(&mut tx, b"counter", 1).unwrap();
        tree.set(&mut tx, b"counter", 2).unwrap();
        assert_eq!(tree.get(&mut tx, b"counter").unwrap(), Some(2));
    }

    #[test]
    fn rejects_oversized_and_empty_keys() {
        let (_dir, db) = open_db();
        let mut tx = db.write_tx().unwrap();
        let mut tree = BTree::create(&mut tx).unwrap();

        let big = vec![b'x'; MAX_KEY_SIZE + 1];
        assert!(matches!(
            tree.set(&mut tx, &big, 1),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            tree.set(&mut tx, b"", 1),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn writes_enough_to_split_pages() {
        let (_dir, db) = open_db();
        let mut tx = db.write_tx().unwrap();
        let mut tree = BTree::create(&mut tx).unwrap();
        let first_root = tree.root();

        for i in 0u32..1024 {
            let key = format!("{i:04}");
            tree.set(&mut tx, key.as_bytes(), i as u64).unwrap();
        }
        for i in 0u32..1024 {
            let key = format!("{i:04}");
            assert_eq!(
                tree.get(&mut tx, key.as_bytes()).unwrap(),
                Some(i as u64),
                "lost key {key}"
            );
        }

        // The root must have split at least once.
        assert_ne!(tree.root(), first_root);
        assert!(matches!(
            tx.metadata(tree.root()).unwrap(),
            PageMetadata::TreeBranch(_)
        ));
    }

    #[test]
    fn survives_unordered_inserts() {
        let (_dir, db) = open_db();
        let mut tx = db.write_tx().unwrap();
        let mut tree = BTree::create(&mut tx).unwrap();

        // Insert in a scrambled order so splits happen all over the key
        // space, not only at the right edge.
        let mut keys: Vec<u32> = (0..2048).collect();
        keys.sort_by_key(|&i| i.wrapping_mul(2_654_435_761) % 4096);

        for &i in &keys {
            tree.set(&mut tx, format!("key-{i:05}").as_bytes(), i as u64)
                .unwrap();
        }
        for i in 0u32..2048 {
            assert_eq!(
                tree.get(&mut tx, format!("key-{i:05}").as_bytes()).unwrap(),
                Some(i as u64)
            );
        }
    }

    #[test]
    fn delete_removes_and_reports() {
        let (_dir, db) = open_db();
        let mut tx = db.write_tx().unwrap();
        let mut tree = BTree::create(&mut tx).unwrap();

        tree.set(&mut tx, b"a", 1).unwrap();
        tree.set(&mut tx, b"b", 2).unwrap();
        assert!(tree.del(&mut tx, b"a").unwrap());
        assert!(!tree.del(&mut tx, b"a").unwrap());
        assert_eq!(tree.get(&mut tx, b"a").unwrap(), None);
        assert_eq!(tree.get(&mut tx, b"b").unwrap(), Some(2));
    }

    #[test]
    fn delete_everything_collapses_the_tree() {
        let (_dir, db) = open_db();
        let mut tx = db.write_tx().unwrap();
        let mut tree = BTree::create(&mut tx).unwrap();

        for i in 0u32..512 {
            tree.set(&mut tx, format!("{i:04}").as_bytes(), i as u64)
                .unwrap();
        }
        for i in 0u32..512 {
            assert!(tree.del(&mut tx, format!("{i:04}").as_bytes()).unwrap());
        }
        for i in 0u32..512 {
            assert_eq!(tree.get(&mut tx, format!("{i:04}").as_bytes()).unwrap(), None);
        }

        // The surviving root is a (possibly empty) leaf again.
        assert!(matches!(
            tx.metadata(tree.root()).unwrap(),
            PageMetadata::TreeLeaf(_)
        ));
    }

    #[test]
    fn scan_yields_sorted_pairs() {
        let (_dir, db) = open_db();
        let mut tx = db.write_tx().unwrap();
        let mut tree = BTree::create(&mut tx).unwrap();

        for i in (0u32..700).rev() {
            tree.set(&mut tx, format!("{i:04}").as_bytes(), i as u64)
                .unwrap();
        }

        let mut scan = tree.scan(&mut tx, b"").unwrap();
        let mut seen = Vec::new();
        while let Some((key, value)) = scan.next().unwrap() {
            seen.push((key, value));
        }
        assert_eq!(seen.len(), 700);
        for (i, (key, value)) in seen.iter().enumerate() {
            assert_eq!(key, format!("{i:04}").as_bytes());
            assert_eq!(*value, i as u64);
        }
    }

    #[test]
    fn scan_from_a_midpoint() {
        let (_dir, db) = open_db();
        let mut tx = db.write_tx().unwrap();
        let mut tree = BTree::create(&mut tx).unwrap();

        for i in 0u32..100 {
            tree.set(&mut tx, format!("{i:04}").as_bytes(), i as u64)
                .unwrap();
        }

        let mut scan = tree.scan(&mut tx, b"0050").unwrap();
        let (first, value) = scan.next().unwrap().unwrap();
        assert_eq!(first, b"0050");
        assert_eq!(value, 50);
    }

    #[test]
    fn compare_and_swap_applies_only_on_match() {
        let (_dir, db) = open_db();
        let mut tx = db.write_tx().unwrap();
        let mut tree = BTree::create(&mut tx).unwrap();

        // Create when absent.
        assert!(tree
            .compare_and_swap(&mut tx, b"k", None, Some(1))
            .unwrap());
        // Wrong expectation leaves the value alone.
        assert!(!tree
            .compare_and_swap(&mut tx, b"k", Some(9), Some(2))
            .unwrap());
        assert_eq!(tree.get(&mut tx, b"k").unwrap(), Some(1));
        // Matching expectation swaps.
        assert!(tree
            .compare_and_swap(&mut tx, b"k", Some(1), Some(2))
            .unwrap());
        assert_eq!(tree.get(&mut tx, b"k").unwrap(), Some(2));
        // And a None new-value deletes.
        assert!(tree.compare_and_swap(&mut tx, b"k", Some(2), None).unwrap());
        assert_eq!(tree.get(&mut tx, b"k").unwrap(), None);
    }

    #[test]
    fn shorter_key_sorts_first_on_ties() {
        let (_dir, db) = open_db();
        let mut tx = db.write_tx().unwrap();
        let mut tree = BTree::create(&mut tx).unwrap();

        tree.set(&mut tx, b"ab", 2).unwrap();
        tree.set(&mut tx, b"a", 1).unwrap();
        tree.set(&mut tx, b"abc", 3).unwrap();

        let mut scan = tree.scan(&mut tx, b"").unwrap();
        assert_eq!(scan.next().unwrap().unwrap().0, b"a");
        assert_eq!(scan.next().unwrap().unwrap().0, b"ab");
        assert_eq!(scan.next().unwrap().unwrap().0, b"abc");
    }
}
