//! On-arena layout of tree nodes and their item strings.

use crate::arena::Arena;

/// Offset of a node record inside the arena.
///
/// Offset 0 always holds the map header, never a node, so it doubles as
/// the absent-child sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct NodeRef(pub(crate) u64);

impl NodeRef {
    pub(crate) const NULL: NodeRef = NodeRef(0);

    pub(crate) fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Offset of a NUL-terminated item string inside the arena.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct ItemRef(pub(crate) u64);

/// Size of a node record: five u64-wide fields.
pub(crate) const NODE_SIZE: usize = 40;

const DEPTH: u64 = 0;
const COUNT: u64 = 8;
const ITEM: u64 = 16;
const LEFT: u64 = 24;
const RIGHT: u64 = 32;

/// A node record lifted out of the arena.
///
/// `load`/`store` move whole records; mutation happens on the in-memory
/// copy and is written back in one step.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Node {
    /// Height of the subtree rooted here; leaves are 0, absent children
    /// count as -1.
    pub depth: i64,
    /// Occurrences of `item`, at least 1 for a linked node.
    pub count: u64,
    pub item: ItemRef,
    pub left: NodeRef,
    pub right: NodeRef,
}

impl Node {
    pub(crate) fn load(arena: &Arena, at: NodeRef) -> Node {
        debug_assert!(!at.is_null());
        Node {
            depth: arena.read_u64(at.0 + DEPTH) as i64,
            count: arena.read_u64(at.0 + COUNT),
            item: ItemRef(arena.read_u64(at.0 + ITEM)),
            left: NodeRef(arena.read_u64(at.0 + LEFT)),
            right: NodeRef(arena.read_u64(at.0 + RIGHT)),
        }
    }

    pub(crate) fn store(&self, arena: &mut Arena, at: NodeRef) {
        debug_assert!(!at.is_null());
        arena.write_u64(at.0 + DEPTH, self.depth as u64);
        arena.write_u64(at.0 + COUNT, self.count);
        arena.write_u64(at.0 + ITEM, self.item.0);
        arena.write_u64(at.0 + LEFT, self.left.0);
        arena.write_u64(at.0 + RIGHT, self.right.0);
    }
}
