//! A height-balanced index of counted words, resident in the arena.
//!
//! Every node, the root pointer, and every item string live inside the
//! [`Arena`], addressed by arena-relative offsets, so the whole tree
//! survives close and reopen without any replay or rebuild.

use std::cmp::Ordering;
use std::path::Path;

use smallvec::SmallVec;

use crate::arena::Arena;
use crate::error::{Error, Result};
use crate::node::{ItemRef, Node, NodeRef, NODE_SIZE};

/// Header record at arena offset 0: `items`, `unique`, `root`.
const ITEMS: u64 = 0;
const UNIQUE: u64 = 8;
const ROOT: u64 = 16;
const HEADER_SIZE: usize = 24;

/// A persistent, file-backed index of counted words.
///
/// Words are non-empty byte strings without interior NUL, ordered by
/// unsigned lexicographic byte comparison; `"a"` and `"A"` are distinct.
/// Inserting an existing word bumps its count instead of adding a node.
///
/// ```
/// # use wordmap::WordMap;
/// # fn main() -> wordmap::Result<()> {
/// let file = tempfile::NamedTempFile::new().unwrap();
/// file.as_file().set_len(1 << 16).unwrap();
///
/// let mut map = WordMap::open(file.path(), true)?;
/// map.insert("foo")?;
/// map.insert("foo")?;
/// map.insert("bar")?;
/// assert_eq!(map.count("foo"), 2);
/// assert_eq!(map.items(), 3);
/// assert_eq!(map.unique(), 2);
/// # Ok(())
/// # }
/// ```
pub struct WordMap {
    arena: Arena,
}

impl WordMap {
    /// Opens the index backed by the arena at `path`.
    ///
    /// An already-utilized arena contributes its prior state as-is; a
    /// fresh or truncated one gets a zeroed header record at offset 0.
    pub fn open(path: impl AsRef<Path>, truncate: bool) -> Result<WordMap> {
        let mut arena = Arena::open(path, truncate)?;
        if arena.utilized() == 0 {
            let at = arena.alloc(HEADER_SIZE)?;
            debug_assert_eq!(at, 0, "the header is the arena's root allocation");
            arena.slice_mut(at, HEADER_SIZE).fill(0);
        } else if arena.utilized() < HEADER_SIZE {
            return Err(Error::Footer {
                found: arena.utilized() as u64,
                limit: arena.limit() as u64,
            });
        }
        Ok(WordMap { arena })
    }

    /// Flushes the arena to the backing file and releases it.
    ///
    /// Dropping a `WordMap` flushes best-effort instead; `close` is the
    /// way to observe flush failures.
    pub fn close(self) -> Result<()> {
        self.arena.close()
    }

    /// Inserts one occurrence of `word`.
    ///
    /// Allocation failures are atomic: an insert that returns
    /// [`Error::OutOfArena`] leaves the tree and both counters untouched.
    pub fn insert(&mut self, word: impl AsRef<[u8]>) -> Result<()> {
        let word = word.as_ref();
        check_word(word)?;
        let root = self.update(self.root(), word)?;
        self.set_root(root);
        Ok(())
    }

    /// Removes all occurrences of `word`.
    ///
    /// The node is unlinked but its arena storage stays behind; the arena
    /// is append-only.
    pub fn remove(&mut self, word: impl AsRef<[u8]>) -> Result<()> {
        let word = word.as_ref();
        check_word(word)?;
        let count = self.count(word);
        if count == 0 {
            return Err(Error::NotFound);
        }
        let root = self.remove_node(self.root(), word);
        self.set_root(root);
        self.set_items(self.items() - count);
        self.set_unique(self.unique() - 1);
        Ok(())
    }

    /// Returns how many times `word` has been inserted, or 0 if absent.
    pub fn count(&self, word: impl AsRef<[u8]>) -> u64 {
        let word = word.as_ref();
        let mut at = self.root();
        while !at.is_null() {
            let node = Node::load(&self.arena, at);
            match self.cmp_item(word, node.item) {
                Ordering::Equal => return node.count,
                Ordering::Less => at = node.left,
                Ordering::Greater => at = node.right,
            }
        }
        0
    }

    /// Returns `true` if `word` is present.
    pub fn contains(&self, word: impl AsRef<[u8]>) -> bool {
        self.count(word) > 0
    }

    /// Calls `f(word, count)` for every word in ascending byte order.
    pub fn for_each<F: FnMut(&[u8], u64)>(&self, mut f: F) {
        self.visit(self.root(), &mut f);
    }

    /// Returns an in-order iterator over `(word, count)` pairs.
    pub fn iter(&self) -> Iter<'_> {
        Iter { map: self, stack: SmallVec::new(), descend: self.root() }
    }

    /// Total insertions, duplicates included.
    pub fn items(&self) -> u64 {
        self.arena.read_u64(ITEMS)
    }

    /// Number of distinct words currently present.
    pub fn unique(&self) -> u64 {
        self.arena.read_u64(UNIQUE)
    }

    /// Returns `true` if no words are present.
    pub fn is_empty(&self) -> bool {
        self.unique() == 0
    }

    /// Arena bytes consumed so far, header included.
    pub fn used_bytes(&self) -> usize {
        self.arena.utilized()
    }

    /// Arena bytes still allocatable.
    pub fn free_bytes(&self) -> usize {
        self.arena.capacity()
    }

    fn root(&self) -> NodeRef {
        NodeRef(self.arena.read_u64(ROOT))
    }

    fn set_root(&mut self, root: NodeRef) {
        self.arena.write_u64(ROOT, root.0);
    }

    fn set_items(&mut self, value: u64) {
        self.arena.write_u64(ITEMS, value);
    }

    fn set_unique(&mut self, value: u64) {
        self.arena.write_u64(UNIQUE, value);
    }

    fn cmp_item(&self, word: &[u8], item: ItemRef) -> Ordering {
        word.cmp(self.arena.cstr(item.0))
    }

    fn visit<F: FnMut(&[u8], u64)>(&self, at: NodeRef, f: &mut F) {
        if at.is_null() {
            return;
        }
        let node = Node::load(&self.arena, at);
        self.visit(node.left, f);
        f(self.arena.cstr(node.item.0), node.count);
        self.visit(node.right, f);
    }

    /// Inserts `word` into the subtree at `at`, returning its new root.
    ///
    /// Both allocations happen before any structural change, so a failed
    /// insert leaves the tree exactly as it was.
    fn update(&mut self, at: NodeRef, word: &[u8]) -> Result<NodeRef> {
        if at.is_null() {
            let item = ItemRef(self.arena.alloc_cstr(word)?);
            let at = NodeRef(self.arena.alloc(NODE_SIZE)?);
            let node = Node { depth: 0, count: 1, item, left: NodeRef::NULL, right: NodeRef::NULL };
            node.store(&mut self.arena, at);
            self.set_items(self.items() + 1);
            self.set_unique(self.unique() + 1);
            return Ok(at);
        }

        let mut node = Node::load(&self.arena, at);
        let ord = self.cmp_item(word, node.item);
        match ord {
            Ordering::Equal => {
                node.count += 1;
                node.store(&mut self.arena, at);
                self.set_items(self.items() + 1);
                return Ok(at);
            }
            Ordering::Less => node.left = self.update(node.left, word)?,
            Ordering::Greater => node.right = self.update(node.right, word)?,
        }

        node.depth = self.joint_depth(node.left, node.right);
        node.store(&mut self.arena, at);
        if self.balance_of(&node).abs() > 1 {
            return Ok(self.rebalance_insert(at, word));
        }
        Ok(at)
    }

    /// One rotation per imbalanced ancestor, keyed by where the new word
    /// landed relative to the heavy child.
    fn rebalance_insert(&mut self, at: NodeRef, word: &[u8]) -> NodeRef {
        let node = Node::load(&self.arena, at);
        if self.balance_of(&node) > 0 {
            let heavy = Node::load(&self.arena, node.left);
            if self.cmp_item(word, heavy.item) == Ordering::Less {
                self.rotate_right(at)
            } else {
                self.rotate_left_right(at)
            }
        } else {
            let heavy = Node::load(&self.arena, node.right);
            if self.cmp_item(word, heavy.item) == Ordering::Greater {
                self.rotate_left(at)
            } else {
                self.rotate_right_left(at)
            }
        }
    }

    /// Removes `word` from the subtree at `at`, returning its new root.
    /// `word` is known to exist in this subtree.
    fn remove_node(&mut self, at: NodeRef, word: &[u8]) -> NodeRef {
        let mut node = Node::load(&self.arena, at);
        let ord = self.cmp_item(word, node.item);
        match ord {
            Ordering::Less => node.left = self.remove_node(node.left, word),
            Ordering::Greater => node.right = self.remove_node(node.right, word),
            Ordering::Equal => {
                if node.left.is_null() || node.right.is_null() {
                    let child = if node.left.is_null() { node.right } else { node.left };
                    self.arena.free(node.item.0);
                    self.arena.free(at.0);
                    return child;
                }
                // two children: adopt the in-order successor's payload,
                // then delete the successor out of the right subtree
                let mut succ_at = node.right;
                let mut succ = Node::load(&self.arena, succ_at);
                while !succ.left.is_null() {
                    succ_at = succ.left;
                    succ = Node::load(&self.arena, succ_at);
                }
                node.item = succ.item;
                node.count = succ.count;
                let succ_word = self.arena.cstr(succ.item.0).to_vec();
                node.right = self.remove_node(node.right, &succ_word);
            }
        }

        node.depth = self.joint_depth(node.left, node.right);
        node.store(&mut self.arena, at);
        if self.balance_of(&node).abs() > 1 {
            return self.rebalance_remove(at);
        }
        at
    }

    /// Rotation family keyed by the heavy child's balance; the removed
    /// word is no longer available as a tiebreaker.
    fn rebalance_remove(&mut self, at: NodeRef) -> NodeRef {
        let node = Node::load(&self.arena, at);
        if self.balance_of(&node) > 0 {
            let heavy = Node::load(&self.arena, node.left);
            if self.balance_of(&heavy) >= 0 {
                self.rotate_right(at)
            } else {
                self.rotate_left_right(at)
            }
        } else {
            let heavy = Node::load(&self.arena, node.right);
            if self.balance_of(&heavy) <= 0 {
                self.rotate_left(at)
            } else {
                self.rotate_right_left(at)
            }
        }
    }

    fn subtree_depth(&self, at: NodeRef) -> i64 {
        if at.is_null() {
            -1
        } else {
            Node::load(&self.arena, at).depth
        }
    }

    fn joint_depth(&self, left: NodeRef, right: NodeRef) -> i64 {
        1 + self.subtree_depth(left).max(self.subtree_depth(right))
    }

    fn balance_of(&self, node: &Node) -> i64 {
        self.subtree_depth(node.left) - self.subtree_depth(node.right)
    }

    fn rotate_right(&mut self, at: NodeRef) -> NodeRef {
        let mut node = Node::load(&self.arena, at);
        let pivot_at = node.left;
        let mut pivot = Node::load(&self.arena, pivot_at);
        node.left = pivot.right;
        pivot.right = at;
        node.depth = self.joint_depth(node.left, node.right);
        node.store(&mut self.arena, at);
        pivot.depth = self.joint_depth(pivot.left, pivot.right);
        pivot.store(&mut self.arena, pivot_at);
        pivot_at
    }

    fn rotate_left(&mut self, at: NodeRef) -> NodeRef {
        let mut node = Node::load(&self.arena, at);
        let pivot_at = node.right;
        let mut pivot = Node::load(&self.arena, pivot_at);
        node.right = pivot.left;
        pivot.left = at;
        node.depth = self.joint_depth(node.left, node.right);
        node.store(&mut self.arena, at);
        pivot.depth = self.joint_depth(pivot.left, pivot.right);
        pivot.store(&mut self.arena, pivot_at);
        pivot_at
    }

    fn rotate_left_right(&mut self, at: NodeRef) -> NodeRef {
        let mut node = Node::load(&self.arena, at);
        node.left = self.rotate_left(node.left);
        node.store(&mut self.arena, at);
        self.rotate_right(at)
    }

    fn rotate_right_left(&mut self, at: NodeRef) -> NodeRef {
        let mut node = Node::load(&self.arena, at);
        node.right = self.rotate_right(node.right);
        node.store(&mut self.arena, at);
        self.rotate_left(at)
    }
}

/// In-order iterator over `(word, count)` pairs.
///
/// Holds the descent path on a small inline stack; an AVL tree of any
/// realistic size stays within the inline capacity.
pub struct Iter<'a> {
    map: &'a WordMap,
    stack: SmallVec<[NodeRef; 16]>,
    descend: NodeRef,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a [u8], u64);

    fn next(&mut self) -> Option<(&'a [u8], u64)> {
        let map = self.map;
        let mut at = self.descend;
        while !at.is_null() {
            self.stack.push(at);
            at = Node::load(&map.arena, at).left;
        }
        let at = self.stack.pop()?;
        let node = Node::load(&map.arena, at);
        self.descend = node.right;
        Some((map.arena.cstr(node.item.0), node.count))
    }
}

fn check_word(word: &[u8]) -> Result<()> {
    if word.is_empty() {
        return Err(Error::InvalidArgument("empty word"));
    }
    if word.contains(&0) {
        return Err(Error::InvalidArgument("word contains an interior NUL"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;
    use tempfile::NamedTempFile;

    fn backing(len: u64) -> NamedTempFile {
        let tmp = NamedTempFile::new().unwrap();
        tmp.as_file().set_len(len).unwrap();
        tmp
    }

    fn fresh(tmp: &NamedTempFile) -> WordMap {
        WordMap::open(tmp.path(), true).unwrap()
    }

    fn snapshot(map: &WordMap) -> (u64, u64, Vec<(Vec<u8>, u64)>) {
        let words = map.iter().map(|(w, c)| (w.to_vec(), c)).collect();
        (map.items(), map.unique(), words)
    }

    /// Walks the whole tree verifying BST order, the depth recurrence,
    /// the AVL balance bound, and both header counters.
    fn check_invariants(map: &WordMap) {
        let mut nodes = 0u64;
        let mut items = 0u64;
        let mut prev: Option<Vec<u8>> = None;
        check_subtree(map, map.root(), &mut nodes, &mut items, &mut prev);
        assert_eq!(map.unique(), nodes, "unique must equal reachable nodes");
        assert_eq!(map.items(), items, "items must equal the sum of counts");
    }

    fn check_subtree(
        map: &WordMap,
        at: NodeRef,
        nodes: &mut u64,
        items: &mut u64,
        prev: &mut Option<Vec<u8>>,
    ) -> i64 {
        if at.is_null() {
            return -1;
        }
        let node = Node::load(&map.arena, at);
        let left = check_subtree(map, node.left, nodes, items, prev);

        let word = map.arena.cstr(node.item.0).to_vec();
        if let Some(prev) = prev.as_ref() {
            assert!(*prev < word, "in-order traversal must strictly ascend");
        }
        *prev = Some(word);
        assert!(node.count >= 1);
        *nodes += 1;
        *items += node.count;

        let right = check_subtree(map, node.right, nodes, items, prev);
        assert_eq!(node.depth, 1 + left.max(right), "depth recurrence");
        assert!((left - right).abs() <= 1, "AVL balance bound");
        node.depth
    }

    #[test]
    fn duplicate_inserts_bump_the_count() {
        let tmp = backing(1 << 16);
        let mut map = fresh(&tmp);
        map.insert("foo").unwrap();
        map.insert("foo").unwrap();
        map.insert("bar").unwrap();

        assert_eq!(map.items(), 3);
        assert_eq!(map.unique(), 2);
        assert_eq!(map.count("foo"), 2);
        assert_eq!(map.count("bar"), 1);
        assert_eq!(map.count("baz"), 0);
        let words: Vec<_> = map.iter().map(|(w, c)| (w.to_vec(), c)).collect();
        assert_eq!(words, vec![(b"bar".to_vec(), 1), (b"foo".to_vec(), 2)]);
        check_invariants(&map);
    }

    #[test]
    fn comparison_is_byte_wise() {
        let tmp = backing(1 << 16);
        let mut map = fresh(&tmp);
        map.insert("a").unwrap();
        map.insert("A").unwrap();

        assert_eq!(map.unique(), 2);
        assert_eq!(map.count("a"), 1);
        assert_eq!(map.count("A"), 1);
        // 'A' (0x41) sorts before 'a' (0x61)
        let words: Vec<_> = map.iter().map(|(w, _)| w.to_vec()).collect();
        assert_eq!(words, vec![b"A".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn sequential_inserts_stay_balanced() {
        let tmp = backing(1 << 16);
        let mut map = fresh(&tmp);
        for word in ["a", "b", "c", "d", "e", "f", "g"] {
            map.insert(word).unwrap();
        }

        assert_eq!(map.unique(), 7);
        assert_eq!(map.items(), 7);
        // seven ascending keys settle into the perfect shape
        assert_eq!(map.subtree_depth(map.root()), 2);
        let words: Vec<_> = map.iter().map(|(w, _)| w.to_vec()).collect();
        let want: Vec<_> = ["a", "b", "c", "d", "e", "f", "g"]
            .iter()
            .map(|w| w.as_bytes().to_vec())
            .collect();
        assert_eq!(words, want);
        check_invariants(&map);
    }

    #[test]
    fn removing_a_two_child_root_adopts_the_successor() {
        let tmp = backing(1 << 16);
        let mut map = fresh(&tmp);
        for word in ["a", "b", "c", "d", "e", "f", "g"] {
            map.insert(word).unwrap();
        }
        map.remove("d").unwrap();

        assert_eq!(map.unique(), 6);
        assert_eq!(map.items(), 6);
        assert_eq!(map.count("d"), 0);
        let words: Vec<_> = map.iter().map(|(w, _)| w.to_vec()).collect();
        let want: Vec<_> = ["a", "b", "c", "e", "f", "g"]
            .iter()
            .map(|w| w.as_bytes().to_vec())
            .collect();
        assert_eq!(words, want);
        check_invariants(&map);
    }

    #[test]
    fn removing_a_one_child_node_splices_the_child() {
        let tmp = backing(1 << 16);
        let mut map = fresh(&tmp);
        for word in ["b", "a", "c", "d"] {
            map.insert(word).unwrap();
        }
        map.remove("c").unwrap();

        assert_eq!(map.count("c"), 0);
        assert_eq!(map.count("d"), 1);
        assert_eq!(map.unique(), 3);
        check_invariants(&map);
    }

    #[test]
    fn removing_everything_empties_the_map() {
        let tmp = backing(1 << 16);
        let mut map = fresh(&tmp);
        for word in ["b", "a", "c"] {
            map.insert(word).unwrap();
        }
        for word in ["a", "b", "c"] {
            map.remove(word).unwrap();
        }

        assert!(map.is_empty());
        assert_eq!(map.items(), 0);
        assert_eq!(map.iter().count(), 0);
        // the map stays usable after draining
        map.insert("again").unwrap();
        assert_eq!(map.count("again"), 1);
        check_invariants(&map);
    }

    #[test]
    fn removing_a_missing_word_changes_nothing() {
        let tmp = backing(1 << 16);
        let mut map = fresh(&tmp);
        map.insert("foo").unwrap();
        let before = snapshot(&map);

        assert!(matches!(map.remove("zzz"), Err(Error::NotFound)));
        assert_eq!(snapshot(&map), before);
    }

    #[test]
    fn remove_takes_all_occurrences() {
        let tmp = backing(1 << 16);
        let mut map = fresh(&tmp);
        for _ in 0..5 {
            map.insert("foo").unwrap();
        }
        map.insert("bar").unwrap();
        map.remove("foo").unwrap();

        assert_eq!(map.items(), 1);
        assert_eq!(map.unique(), 1);
        assert_eq!(map.count("foo"), 0);
        check_invariants(&map);
    }

    #[test]
    fn count_is_read_only() {
        let tmp = backing(1 << 16);
        let mut map = fresh(&tmp);
        map.insert("foo").unwrap();
        let before = snapshot(&map);

        for _ in 0..3 {
            assert_eq!(map.count("foo"), 1);
            assert_eq!(map.count("bar"), 0);
        }
        assert_eq!(snapshot(&map), before);
    }

    #[test]
    fn empty_and_nul_words_are_rejected() {
        let tmp = backing(1 << 16);
        let mut map = fresh(&tmp);
        assert!(matches!(map.insert(""), Err(Error::InvalidArgument(_))));
        assert!(matches!(map.insert(b"a\0b".as_slice()), Err(Error::InvalidArgument(_))));
        assert!(matches!(map.remove(""), Err(Error::InvalidArgument(_))));
        assert!(map.is_empty());
    }

    #[test]
    fn iter_agrees_with_for_each() {
        let tmp = backing(1 << 16);
        let mut map = fresh(&tmp);
        for word in ["pear", "apple", "plum", "apple", "fig"] {
            map.insert(word).unwrap();
        }

        let mut visited = Vec::new();
        map.for_each(|word, count| visited.push((word.to_vec(), count)));
        let iterated: Vec<_> = map.iter().map(|(w, c)| (w.to_vec(), c)).collect();
        assert_eq!(visited, iterated);
        assert_eq!(visited.len(), 4);
    }

    #[test]
    fn exhausted_insert_is_atomic() {
        // room for the header and two words, not three
        let tmp = backing(128);
        let mut map = fresh(&tmp);
        let mut failed = None;
        for i in 0..16 {
            let word = format!("w{i:02}");
            let before = snapshot(&map);
            match map.insert(&word) {
                Ok(()) => continue,
                Err(err) => {
                    assert!(matches!(err, Error::OutOfArena { .. }));
                    assert_eq!(snapshot(&map), before);
                    failed = Some(before);
                    break;
                }
            }
        }
        let (items, unique, _) = failed.expect("a 128-byte arena must fill up");
        assert!(items >= 1 && unique >= 1);
        check_invariants(&map);
    }

    #[test]
    fn deletion_rebalances_the_tree() {
        let tmp = backing(1 << 18);
        let mut map = fresh(&tmp);
        for i in 0..64 {
            map.insert(format!("w{i:02}")).unwrap();
        }
        // stripping one flank forces rotations keyed on the heavy child
        for i in 32..64 {
            map.remove(format!("w{i:02}")).unwrap();
            check_invariants(&map);
        }
        assert_eq!(map.unique(), 32);
    }

    #[test]
    fn randomized_operations_match_a_model() {
        let tmp = backing(1 << 20);
        let mut map = fresh(&tmp);
        let mut model: BTreeMap<Vec<u8>, u64> = BTreeMap::new();
        let mut rng = StdRng::seed_from_u64(7);

        for step in 0..4000u32 {
            let len: usize = rng.random_range(1..=6);
            let word: Vec<u8> = (0..len).map(|_| rng.random_range(b'a'..=b'd')).collect();
            if rng.random_range(0..10) < 7 {
                map.insert(&word).unwrap();
                *model.entry(word).or_insert(0) += 1;
            } else {
                match map.remove(&word) {
                    Ok(()) => assert!(model.remove(&word).is_some()),
                    Err(Error::NotFound) => assert!(!model.contains_key(&word)),
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
            if step % 256 == 0 {
                check_invariants(&map);
            }
        }

        check_invariants(&map);
        let got: Vec<_> = map.iter().map(|(w, c)| (w.to_vec(), c)).collect();
        let want: Vec<_> = model.iter().map(|(w, c)| (w.clone(), *c)).collect();
        assert_eq!(got, want);
    }
}
