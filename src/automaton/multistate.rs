//! Set of state identities stored as a B+-tree.
//!
//! A `MultiState` is the set of NFA states active at the same time. Sets
//! with zero or one element live inline; larger sets are a B+-tree whose
//! leaves are chained left to right, so iteration yields the states in
//! ascending `StateId` order. Two sets with the same elements therefore
//! always iterate identically, which `StateVector` relies on.
//!
//! Insertion never leaves a half-split tree behind: before a full leaf is
//! split, `add` checks that the arena can serve every node the split may
//! need up to a new root. If it cannot, `add` fails with `OutOfMemory`
//! and the set is unchanged.

use smallvec::SmallVec;

use super::arena::{Addr, Arena};
use super::state::StateId;
use crate::error::{Error, Result};

/// States per leaf.
pub(crate) const LEAF_LEN: usize = 6;
/// Children per branch.
pub(crate) const BRANCH_LEN: usize = 4;

#[derive(Clone, Copy, Debug)]
pub(crate) enum MultiStateNode {
    Leaf {
        len: u8,
        next: Option<Addr>,
        states: [StateId; LEAF_LEN],
    },
    Branch {
        level: u8,
        len: u8,
        /// `keys[i]` is the smallest state below `children[i + 1]`.
        keys: [StateId; BRANCH_LEN - 1],
        children: [Addr; BRANCH_LEN],
    },
}

pub(crate) type MultiStateArena = Arena<MultiStateNode>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Root {
    #[default]
    Empty,
    Single(StateId),
    Node(Addr),
}

/// A set of states. Cheap to copy; the nodes live in a `MultiStateArena`.
///
/// A copy shares its nodes with the original, so only one of them may be
/// modified afterwards.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct MultiState {
    len: usize,
    root: Root,
}

impl MultiState {
    pub const fn new() -> Self {
        Self {
            len: 0,
            root: Root::Empty,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert `state`. Returns `Ok(false)` if it was already present.
    pub fn add(&mut self, arena: &mut MultiStateArena, state: StateId) -> Result<bool> {
        match self.root {
            Root::Empty => self.root = Root::Single(state),
            Root::Single(first) => {
                if first == state {
                    return Ok(false);
                }
                let mut states = [StateId::NONE; LEAF_LEN];
                states[0] = first.min(state);
                states[1] = first.max(state);
                let leaf = arena.alloc(&[MultiStateNode::Leaf {
                    len: 2,
                    next: None,
                    states,
                }])?;
                self.root = Root::Node(leaf);
            }
            Root::Node(root) => {
                if !self.insert(arena, root, state)? {
                    return Ok(false);
                }
            }
        }
        self.len += 1;
        Ok(true)
    }

    fn insert(&mut self, arena: &mut MultiStateArena, root: Addr, state: StateId) -> Result<bool> {
        let mut path: SmallVec<[(Addr, usize); 16]> = SmallVec::new();
        let mut node = root;
        while let MultiStateNode::Branch { len, keys, children, .. } = arena[node] {
            let i = keys[..len as usize - 1].partition_point(|&k| k <= state);
            path.push((node, i));
            node = children[i];
        }

        let (len, pos) = match &arena[node] {
            MultiStateNode::Leaf { len, states, .. } => {
                match states[..*len as usize].binary_search(&state) {
                    Ok(_) => return Ok(false),
                    Err(pos) => (*len as usize, pos),
                }
            }
            MultiStateNode::Branch { .. } => unreachable!("descent ends at a leaf"),
        };

        if len < LEAF_LEN {
            if let MultiStateNode::Leaf { len, states, .. } = &mut arena[node] {
                states.copy_within(pos..*len as usize, pos + 1);
                states[pos] = state;
                *len += 1;
            }
            return Ok(true);
        }

        // one node for the leaf, one per full branch above it, one new root
        let full = path
            .iter()
            .rev()
            .take_while(|&&(addr, _)| branch_len(arena, addr) == BRANCH_LEN)
            .count();
        let needed = 1 + full + usize::from(full == path.len());
        if !arena.can_alloc(1, needed) {
            return Err(Error::OutOfMemory);
        }

        let (mut key, mut right) = split_leaf(arena, node, pos, state)?;
        for &(parent, i) in path.iter().rev() {
            match insert_child(arena, parent, i, key, right)? {
                None => return Ok(true),
                Some((k, r)) => {
                    key = k;
                    right = r;
                }
            }
        }

        let level = match arena[root] {
            MultiStateNode::Branch { level, .. } => level + 1,
            MultiStateNode::Leaf { .. } => 1,
        };
        let mut keys = [StateId::NONE; BRANCH_LEN - 1];
        keys[0] = key;
        let mut children = [root; BRANCH_LEN];
        children[1] = right;
        let new_root = arena.alloc(&[MultiStateNode::Branch {
            level,
            len: 2,
            keys,
            children,
        }])?;
        self.root = Root::Node(new_root);
        Ok(true)
    }

    /// A copy with its own nodes.
    pub fn duplicate(&self, arena: &mut MultiStateArena) -> Result<MultiState> {
        match self.root {
            Root::Empty | Root::Single(_) => Ok(*self),
            Root::Node(_) => {
                let states: SmallVec<[StateId; 32]> = self.iter(arena).collect();
                let mut copy = MultiState::new();
                for state in states {
                    copy.add(arena, state)?;
                }
                Ok(copy)
            }
        }
    }

    /// States in ascending order.
    pub fn iter<'a>(&self, arena: &'a MultiStateArena) -> MultiStateIter<'a> {
        match self.root {
            Root::Empty => MultiStateIter {
                arena,
                inline: None,
                leaf: None,
                pos: 0,
            },
            Root::Single(state) => MultiStateIter {
                arena,
                inline: Some(state),
                leaf: None,
                pos: 0,
            },
            Root::Node(mut node) => {
                while let MultiStateNode::Branch { children, .. } = arena[node] {
                    node = children[0];
                }
                MultiStateIter {
                    arena,
                    inline: None,
                    leaf: Some(node),
                    pos: 0,
                }
            }
        }
    }
}

fn branch_len(arena: &MultiStateArena, addr: Addr) -> usize {
    match arena[addr] {
        MultiStateNode::Branch { len, .. } => len as usize,
        MultiStateNode::Leaf { .. } => 0,
    }
}

/// Split the full leaf while inserting `state` at `pos`.
/// Returns the separator key and the new right leaf.
fn split_leaf(
    arena: &mut MultiStateArena,
    leaf: Addr,
    pos: usize,
    state: StateId,
) -> Result<(StateId, Addr)> {
    let (states, next) = match arena[leaf] {
        MultiStateNode::Leaf { states, next, .. } => (states, next),
        MultiStateNode::Branch { .. } => unreachable!("split_leaf on branch"),
    };
    let mut all = [StateId::NONE; LEAF_LEN + 1];
    all[..pos].copy_from_slice(&states[..pos]);
    all[pos] = state;
    all[pos + 1..].copy_from_slice(&states[pos..]);

    let split = (LEAF_LEN + 2) / 2;
    let mut right_states = [StateId::NONE; LEAF_LEN];
    right_states[..LEAF_LEN + 1 - split].copy_from_slice(&all[split..]);
    let right = arena.alloc(&[MultiStateNode::Leaf {
        len: (LEAF_LEN + 1 - split) as u8,
        next,
        states: right_states,
    }])?;

    let mut left_states = [StateId::NONE; LEAF_LEN];
    left_states[..split].copy_from_slice(&all[..split]);
    arena[leaf] = MultiStateNode::Leaf {
        len: split as u8,
        next: Some(right),
        states: left_states,
    };
    Ok((all[split], right))
}

/// Insert `right` after child `i` of `parent`, separated by `key`.
/// Returns the promoted key and new sibling if `parent` had to split.
fn insert_child(
    arena: &mut MultiStateArena,
    parent: Addr,
    i: usize,
    key: StateId,
    right: Addr,
) -> Result<Option<(StateId, Addr)>> {
    let (level, len, keys, children) = match arena[parent] {
        MultiStateNode::Branch {
            level,
            len,
            keys,
            children,
        } => (level, len as usize, keys, children),
        MultiStateNode::Leaf { .. } => unreachable!("insert_child on leaf"),
    };

    let mut all_keys = [StateId::NONE; BRANCH_LEN];
    all_keys[..i].copy_from_slice(&keys[..i]);
    all_keys[i] = key;
    all_keys[i + 1..len].copy_from_slice(&keys[i..len - 1]);
    let mut all_children = [right; BRANCH_LEN + 1];
    all_children[..=i].copy_from_slice(&children[..=i]);
    all_children[i + 2..=len].copy_from_slice(&children[i + 1..len]);

    if len < BRANCH_LEN {
        let mut new_keys = [StateId::NONE; BRANCH_LEN - 1];
        new_keys[..len].copy_from_slice(&all_keys[..len]);
        let mut new_children = [right; BRANCH_LEN];
        new_children[..=len].copy_from_slice(&all_children[..=len]);
        arena[parent] = MultiStateNode::Branch {
            level,
            len: (len + 1) as u8,
            keys: new_keys,
            children: new_children,
        };
        return Ok(None);
    }

    let left_n = (BRANCH_LEN + 2) / 2;
    let right_n = BRANCH_LEN + 1 - left_n;
    let promoted = all_keys[left_n - 1];

    let mut right_keys = [StateId::NONE; BRANCH_LEN - 1];
    right_keys[..right_n - 1].copy_from_slice(&all_keys[left_n..]);
    let mut right_children = [right; BRANCH_LEN];
    right_children[..right_n].copy_from_slice(&all_children[left_n..]);
    let sibling = arena.alloc(&[MultiStateNode::Branch {
        level,
        len: right_n as u8,
        keys: right_keys,
        children: right_children,
    }])?;

    let mut left_keys = [StateId::NONE; BRANCH_LEN - 1];
    left_keys[..left_n - 1].copy_from_slice(&all_keys[..left_n - 1]);
    let mut left_children = [right; BRANCH_LEN];
    left_children[..left_n].copy_from_slice(&all_children[..left_n]);
    arena[parent] = MultiStateNode::Branch {
        level,
        len: left_n as u8,
        keys: left_keys,
        children: left_children,
    };
    Ok(Some((promoted, sibling)))
}

/// Iterator over a `MultiState`, following the leaf chain.
pub(crate) struct MultiStateIter<'a> {
    arena: &'a MultiStateArena,
    inline: Option<StateId>,
    leaf: Option<Addr>,
    pos: usize,
}

impl Iterator for MultiStateIter<'_> {
    type Item = StateId;

    fn next(&mut self) -> Option<StateId> {
        if let Some(state) = self.inline.take() {
            return Some(state);
        }
        while let Some(leaf) = self.leaf {
            match &self.arena[leaf] {
                MultiStateNode::Leaf { len, next, states } => {
                    if self.pos < *len as usize {
                        self.pos += 1;
                        return Some(states[self.pos - 1]);
                    }
                    self.leaf = *next;
                    self.pos = 0;
                }
                MultiStateNode::Branch { .. } => unreachable!("leaf chain reaches branch"),
            }
        }
        None
    }
}
