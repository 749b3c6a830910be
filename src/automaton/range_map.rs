//! Partition of the code point space into disjoint intervals.
//!
//! Determinization uses a `RangeMap` to split the alphabet seen on the
//! range edges of one DFA state into pieces on which every edge either
//! fully applies or does not apply at all. Each piece carries the set of
//! destination states reached on it.
//!
//! The map is a B+-tree. Leaves hold entries sorted by `from` and are
//! chained left to right; branches hold the `from` of the first entry of
//! every child but the first.
//!
//! Building a partition takes two steps:
//!
//! 1. `add_range` for every edge: afterwards the stored intervals cover
//!    exactly the union of all edges and each edge is a union of entries.
//! 2. `add_state` for every edge: adds the edge target to all entries the
//!    edge covers.

use smallvec::SmallVec;

use super::arena::{Addr, Arena};
use super::multistate::{MultiState, MultiStateArena};
use super::state::StateId;
use crate::error::{Error, Result};

/// Entries per leaf.
pub(crate) const RANGE_LEAF_LEN: usize = 4;
/// Children per branch.
pub(crate) const RANGE_BRANCH_LEN: usize = 4;

#[derive(Clone, Copy, Debug)]
pub(crate) struct RangeEntry {
    pub from: u32,
    pub to: u32,
    pub states: MultiState,
}

const EMPTY_ENTRY: RangeEntry = RangeEntry {
    from: 0,
    to: 0,
    states: MultiState::new(),
};

#[derive(Clone, Copy, Debug)]
pub(crate) enum RangeMapNode {
    Leaf {
        len: u8,
        next: Option<Addr>,
        entries: [RangeEntry; RANGE_LEAF_LEN],
    },
    Branch {
        level: u8,
        len: u8,
        keys: [u32; RANGE_BRANCH_LEN - 1],
        children: [Addr; RANGE_BRANCH_LEN],
    },
}

pub(crate) type RangeMapArena = Arena<RangeMapNode>;

type Path = SmallVec<[(Addr, usize); 16]>;

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RangeMap {
    len: usize,
    root: Option<Addr>,
}

impl RangeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored intervals.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Register `from..=to` so that it becomes a union of stored intervals.
    pub fn add_range(
        &mut self,
        nodes: &mut RangeMapArena,
        sets: &mut MultiStateArena,
        from: u32,
        to: u32,
    ) -> Result<()> {
        let mut from = from;
        while let Some(rest) = self.add_range_part(nodes, sets, from, to)? {
            from = rest;
        }
        Ok(())
    }

    /// Process the part of `from..=to` that fits without crossing a stored
    /// boundary. Returns the start of the remainder, if any is left.
    ///
    /// Each call inserts at most one interval. A call that only splits an
    /// existing interval at `from` returns `Some(from)`.
    pub fn add_range_part(
        &mut self,
        nodes: &mut RangeMapArena,
        sets: &mut MultiStateArena,
        from: u32,
        to: u32,
    ) -> Result<Option<u32>> {
        if from > to {
            return Err(Error::InvalidArgument("range with from > to"));
        }
        let Some(root) = self.root else {
            let mut entries = [EMPTY_ENTRY; RANGE_LEAF_LEN];
            entries[0] = RangeEntry {
                from,
                to,
                states: MultiState::new(),
            };
            let leaf = nodes.alloc(&[RangeMapNode::Leaf {
                len: 1,
                next: None,
                entries,
            }])?;
            self.root = Some(leaf);
            self.len = 1;
            return Ok(None);
        };

        let (path, leaf) = descend(nodes, root, from);
        let (len, entries, next) = leaf_parts(nodes, leaf);
        let pos = entries[..len].partition_point(|e| e.from <= from);

        if pos > 0 && entries[pos - 1].to >= from {
            let prev = entries[pos - 1];
            if prev.from < from {
                // split prev at from, the caller continues at from
                let states = prev.states.duplicate(sets)?;
                let upper = RangeEntry {
                    from,
                    to: prev.to,
                    states,
                };
                self.reserve(nodes, &path, len)?;
                set_entry_to(nodes, leaf, pos - 1, from - 1);
                self.insert_entry(nodes, &path, leaf, pos, upper)?;
                return Ok(Some(from));
            }
            if to < prev.to {
                let states = prev.states.duplicate(sets)?;
                let upper = RangeEntry {
                    from: to + 1,
                    to: prev.to,
                    states,
                };
                self.reserve(nodes, &path, len)?;
                set_entry_to(nodes, leaf, pos - 1, to);
                self.insert_entry(nodes, &path, leaf, pos, upper)?;
                return Ok(None);
            }
            return Ok(if to == prev.to { None } else { Some(prev.to + 1) });
        }

        let next_from = if pos < len {
            Some(entries[pos].from)
        } else {
            next.map(|n| leaf_parts(nodes, n).1[0].from)
        };
        let upper = match next_from {
            Some(next_from) if next_from <= to => next_from - 1,
            _ => to,
        };
        self.reserve(nodes, &path, len)?;
        self.insert_entry(
            nodes,
            &path,
            leaf,
            pos,
            RangeEntry {
                from,
                to: upper,
                states: MultiState::new(),
            },
        )?;
        Ok(if upper < to { Some(upper + 1) } else { None })
    }

    /// Add `state` to every interval inside `from..=to`.
    ///
    /// Fails with `InvalidArgument` unless `from..=to` is exactly a union of
    /// stored intervals, which holds after `add_range(from, to)`.
    pub fn add_state(
        &self,
        nodes: &mut RangeMapArena,
        sets: &mut MultiStateArena,
        from: u32,
        to: u32,
        state: StateId,
    ) -> Result<()> {
        let root = self
            .root
            .ok_or(Error::InvalidArgument("range not registered"))?;
        let (_, leaf) = descend(nodes, root, from);
        let (len, entries, _) = leaf_parts(nodes, leaf);
        let pos = entries[..len]
            .iter()
            .position(|e| e.from == from)
            .ok_or(Error::InvalidArgument("range not registered"))?;

        // check coverage before touching anything
        let mut cursor = Some((leaf, pos));
        let mut expected = from;
        loop {
            let Some((l, p)) = cursor else {
                return Err(Error::InvalidArgument("range not registered"));
            };
            let entry = leaf_parts(nodes, l).1[p];
            if entry.from != expected || entry.to > to {
                return Err(Error::InvalidArgument("range not registered"));
            }
            if entry.to == to {
                break;
            }
            expected = entry.to + 1;
            cursor = next_entry(nodes, l, p);
        }

        let mut cursor = Some((leaf, pos));
        while let Some((l, p)) = cursor {
            let done = match &mut nodes[l] {
                RangeMapNode::Leaf { entries, .. } => {
                    entries[p].states.add(sets, state)?;
                    entries[p].to == to
                }
                RangeMapNode::Branch { .. } => unreachable!("entry cursor on branch"),
            };
            if done {
                break;
            }
            cursor = next_entry(nodes, l, p);
        }
        Ok(())
    }

    /// Intervals in ascending order with their destination sets.
    pub fn iter<'a>(&self, nodes: &'a RangeMapArena) -> RangeMapIter<'a> {
        let mut leaf = self.root;
        while let Some(node) = leaf {
            match nodes[node] {
                RangeMapNode::Branch { children, .. } => leaf = Some(children[0]),
                RangeMapNode::Leaf { .. } => break,
            }
        }
        RangeMapIter {
            nodes,
            leaf,
            pos: 0,
        }
    }

    /// Fail with `OutOfMemory` unless inserting into a leaf of `leaf_len`
    /// entries below `path` cannot run out of nodes.
    fn reserve(&self, nodes: &RangeMapArena, path: &Path, leaf_len: usize) -> Result<()> {
        if leaf_len < RANGE_LEAF_LEN {
            return Ok(());
        }
        let full = path
            .iter()
            .rev()
            .take_while(|&&(addr, _)| branch_len(nodes, addr) == RANGE_BRANCH_LEN)
            .count();
        let needed = 1 + full + usize::from(full == path.len());
        if nodes.can_alloc(1, needed) {
            Ok(())
        } else {
            Err(Error::OutOfMemory)
        }
    }

    fn insert_entry(
        &mut self,
        nodes: &mut RangeMapArena,
        path: &Path,
        leaf: Addr,
        pos: usize,
        entry: RangeEntry,
    ) -> Result<()> {
        let (len, entries, next) = leaf_parts(nodes, leaf);
        self.len += 1;
        if len < RANGE_LEAF_LEN {
            if let RangeMapNode::Leaf { len, entries, .. } = &mut nodes[leaf] {
                entries.copy_within(pos..*len as usize, pos + 1);
                entries[pos] = entry;
                *len += 1;
            }
            return Ok(());
        }

        let mut all = [EMPTY_ENTRY; RANGE_LEAF_LEN + 1];
        all[..pos].copy_from_slice(&entries[..pos]);
        all[pos] = entry;
        all[pos + 1..].copy_from_slice(&entries[pos..]);
        let split = (RANGE_LEAF_LEN + 2) / 2;
        let mut right_entries = [EMPTY_ENTRY; RANGE_LEAF_LEN];
        right_entries[..RANGE_LEAF_LEN + 1 - split].copy_from_slice(&all[split..]);
        let right = nodes.alloc(&[RangeMapNode::Leaf {
            len: (RANGE_LEAF_LEN + 1 - split) as u8,
            next,
            entries: right_entries,
        }])?;
        let mut left_entries = [EMPTY_ENTRY; RANGE_LEAF_LEN];
        left_entries[..split].copy_from_slice(&all[..split]);
        nodes[leaf] = RangeMapNode::Leaf {
            len: split as u8,
            next: Some(right),
            entries: left_entries,
        };

        let mut key = all[split].from;
        let mut right = right;
        for &(parent, i) in path.iter().rev() {
            match insert_child(nodes, parent, i, key, right)? {
                None => return Ok(()),
                Some((k, r)) => {
                    key = k;
                    right = r;
                }
            }
        }

        let Some(root) = self.root else {
            unreachable!("insert into empty map")
        };
        let level = match nodes[root] {
            RangeMapNode::Branch { level, .. } => level + 1,
            RangeMapNode::Leaf { .. } => 1,
        };
        let mut keys = [0; RANGE_BRANCH_LEN - 1];
        keys[0] = key;
        let mut children = [root; RANGE_BRANCH_LEN];
        children[1] = right;
        let new_root = nodes.alloc(&[RangeMapNode::Branch {
            level,
            len: 2,
            keys,
            children,
        }])?;
        self.root = Some(new_root);
        Ok(())
    }
}

fn descend(nodes: &RangeMapArena, root: Addr, from: u32) -> (Path, Addr) {
    let mut path = Path::new();
    let mut node = root;
    while let RangeMapNode::Branch {
        len, keys, children, ..
    } = nodes[node]
    {
        let i = keys[..len as usize - 1].partition_point(|&k| k <= from);
        path.push((node, i));
        node = children[i];
    }
    (path, node)
}

fn leaf_parts(
    nodes: &RangeMapArena,
    leaf: Addr,
) -> (usize, [RangeEntry; RANGE_LEAF_LEN], Option<Addr>) {
    match nodes[leaf] {
        RangeMapNode::Leaf { len, entries, next } => (len as usize, entries, next),
        RangeMapNode::Branch { .. } => unreachable!("expected leaf"),
    }
}

fn set_entry_to(nodes: &mut RangeMapArena, leaf: Addr, pos: usize, to: u32) {
    if let RangeMapNode::Leaf { entries, .. } = &mut nodes[leaf] {
        entries[pos].to = to;
    }
}

fn next_entry(nodes: &RangeMapArena, leaf: Addr, pos: usize) -> Option<(Addr, usize)> {
    let (len, _, next) = leaf_parts(nodes, leaf);
    if pos + 1 < len {
        Some((leaf, pos + 1))
    } else {
        next.map(|n| (n, 0))
    }
}

fn branch_len(nodes: &RangeMapArena, addr: Addr) -> usize {
    match nodes[addr] {
        RangeMapNode::Branch { len, .. } => len as usize,
        RangeMapNode::Leaf { .. } => 0,
    }
}

fn insert_child(
    nodes: &mut RangeMapArena,
    parent: Addr,
    i: usize,
    key: u32,
    right: Addr,
) -> Result<Option<(u32, Addr)>> {
    let (level, len, keys, children) = match nodes[parent] {
        RangeMapNode::Branch {
            level,
            len,
            keys,
            children,
        } => (level, len as usize, keys, children),
        RangeMapNode::Leaf { .. } => unreachable!("insert_child on leaf"),
    };

    let mut all_keys = [0u32; RANGE_BRANCH_LEN];
    all_keys[..i].copy_from_slice(&keys[..i]);
    all_keys[i] = key;
    all_keys[i + 1..len].copy_from_slice(&keys[i..len - 1]);
    let mut all_children = [right; RANGE_BRANCH_LEN + 1];
    all_children[..=i].copy_from_slice(&children[..=i]);
    all_children[i + 2..=len].copy_from_slice(&children[i + 1..len]);

    if len < RANGE_BRANCH_LEN {
        let mut new_keys = [0u32; RANGE_BRANCH_LEN - 1];
        new_keys[..len].copy_from_slice(&all_keys[..len]);
        let mut new_children = [right; RANGE_BRANCH_LEN];
        new_children[..=len].copy_from_slice(&all_children[..=len]);
        nodes[parent] = RangeMapNode::Branch {
            level,
            len: (len + 1) as u8,
            keys: new_keys,
            children: new_children,
        };
        return Ok(None);
    }

    let left_n = (RANGE_BRANCH_LEN + 2) / 2;
    let right_n = RANGE_BRANCH_LEN + 1 - left_n;
    let promoted = all_keys[left_n - 1];

    let mut right_keys = [0u32; RANGE_BRANCH_LEN - 1];
    right_keys[..right_n - 1].copy_from_slice(&all_keys[left_n..]);
    let mut right_children = [right; RANGE_BRANCH_LEN];
    right_children[..right_n].copy_from_slice(&all_children[left_n..]);
    let sibling = nodes.alloc(&[RangeMapNode::Branch {
        level,
        len: right_n as u8,
        keys: right_keys,
        children: right_children,
    }])?;

    let mut left_keys = [0u32; RANGE_BRANCH_LEN - 1];
    left_keys[..left_n - 1].copy_from_slice(&all_keys[..left_n - 1]);
    let mut left_children = [right; RANGE_BRANCH_LEN];
    left_children[..left_n].copy_from_slice(&all_children[..left_n]);
    nodes[parent] = RangeMapNode::Branch {
        level,
        len: left_n as u8,
        keys: left_keys,
        children: left_children,
    };
    Ok(Some((promoted, sibling)))
}

/// Iterator over the stored intervals: `(from, to, destination states)`.
pub(crate) struct RangeMapIter<'a> {
    nodes: &'a RangeMapArena,
    leaf: Option<Addr>,
    pos: usize,
}

impl Iterator for RangeMapIter<'_> {
    type Item = (u32, u32, MultiState);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(leaf) = self.leaf {
            let (len, entries, next) = leaf_parts(self.nodes, leaf);
            if self.pos < len {
                let entry = entries[self.pos];
                self.pos += 1;
                return Some((entry.from, entry.to, entry.states));
            }
            self.leaf = next;
            self.pos = 0;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::arena::ArenaConfig;

    fn sid(i: usize) -> StateId {
        StateId::from_addr(Addr::from_index(i))
    }

    fn intervals(map: &RangeMap, nodes: &RangeMapArena) -> Vec<(u32, u32)> {
        map.iter(nodes).map(|(from, to, _)| (from, to)).collect()
    }

    fn assert_partition(list: &[(u32, u32)]) {
        for &(from, to) in list {
            assert!(from <= to);
        }
        for pair in list.windows(2) {
            assert!(pair[0].1 < pair[1].0, "overlap {:?}", pair);
        }
    }

    #[test]
    fn test_split_existing_interval() {
        let mut nodes = RangeMapArena::new();
        let mut sets = MultiStateArena::new();
        let mut map = RangeMap::new();

        map.add_range(&mut nodes, &mut sets, 5, 10).unwrap();
        map.add_range(&mut nodes, &mut sets, 0, 20).unwrap();
        assert_eq!(intervals(&map, &nodes), vec![(0, 4), (5, 10), (11, 20)]);

        map.add_range(&mut nodes, &mut sets, 7, 8).unwrap();
        assert_eq!(
            intervals(&map, &nodes),
            vec![(0, 4), (5, 6), (7, 8), (9, 10), (11, 20)]
        );
        assert_eq!(map.len(), 5);

        // already covered: nothing changes
        map.add_range(&mut nodes, &mut sets, 5, 8).unwrap();
        assert_eq!(map.len(), 5);
    }

    #[test]
    fn test_add_range_part_reports_remainder() {
        let mut nodes = RangeMapArena::new();
        let mut sets = MultiStateArena::new();
        let mut map = RangeMap::new();

        map.add_range(&mut nodes, &mut sets, 10, 19).unwrap();
        // prefix [0, 9] fits before the stored interval
        assert_eq!(map.add_range_part(&mut nodes, &mut sets, 0, 30).unwrap(), Some(10));
        // [10, 19] already exists
        assert_eq!(map.add_range_part(&mut nodes, &mut sets, 10, 30).unwrap(), Some(20));
        assert_eq!(map.add_range_part(&mut nodes, &mut sets, 20, 30).unwrap(), None);
        // split at 15, same start returned
        assert_eq!(map.add_range_part(&mut nodes, &mut sets, 15, 17).unwrap(), Some(15));
        assert_eq!(map.add_range_part(&mut nodes, &mut sets, 15, 17).unwrap(), None);
        assert_eq!(
            intervals(&map, &nodes),
            vec![(0, 9), (10, 14), (15, 17), (18, 19), (20, 30)]
        );
    }

    #[test]
    fn test_add_state_requires_exact_cover() {
        let mut nodes = RangeMapArena::new();
        let mut sets = MultiStateArena::new();
        let mut map = RangeMap::new();

        assert!(map.add_state(&mut nodes, &mut sets, 0, 1, sid(1)).is_err());

        map.add_range(&mut nodes, &mut sets, 0, 20).unwrap();
        map.add_range(&mut nodes, &mut sets, 5, 10).unwrap();
        map.add_state(&mut nodes, &mut sets, 0, 20, sid(1)).unwrap();
        map.add_state(&mut nodes, &mut sets, 5, 10, sid(2)).unwrap();

        assert!(matches!(
            map.add_state(&mut nodes, &mut sets, 6, 10, sid(3)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            map.add_state(&mut nodes, &mut sets, 5, 12, sid(3)),
            Err(Error::InvalidArgument(_))
        ));

        let got: Vec<_> = map
            .iter(&nodes)
            .map(|(from, to, states)| (from, to, states.iter(&sets).collect::<Vec<_>>()))
            .collect();
        assert_eq!(
            got,
            vec![
                (0, 4, vec![sid(1)]),
                (5, 10, vec![sid(1), sid(2)]),
                (11, 20, vec![sid(1)]),
            ]
        );
    }

    #[test]
    fn test_split_copies_destination_states() {
        let mut nodes = RangeMapArena::new();
        let mut sets = MultiStateArena::new();
        let mut map = RangeMap::new();

        map.add_range(&mut nodes, &mut sets, 0, 10).unwrap();
        for i in 0..10 {
            map.add_state(&mut nodes, &mut sets, 0, 10, sid(i)).unwrap();
        }
        map.add_range(&mut nodes, &mut sets, 3, 4).unwrap();
        map.add_state(&mut nodes, &mut sets, 3, 4, sid(99)).unwrap();

        let sizes: Vec<_> = map
            .iter(&nodes)
            .map(|(from, to, states)| (from, to, states.len()))
            .collect();
        assert_eq!(sizes, vec![(0, 2, 10), (3, 4, 11), (5, 10, 10)]);
    }

    #[test]
    fn test_spanning_range_fills_gaps() {
        let mut nodes = RangeMapArena::new();
        let mut sets = MultiStateArena::new();
        let mut map = RangeMap::new();

        for i in 0..1000u32 {
            map.add_range(&mut nodes, &mut sets, 10 * i + 3, 10 * i + 5).unwrap();
        }
        assert_eq!(map.len(), 1000);
        map.add_range(&mut nodes, &mut sets, 0, 10_000).unwrap();

        let list = intervals(&map, &nodes);
        assert_partition(&list);
        // 1000 originals, a gap before each and one after the last
        assert_eq!(list.len(), 2001);
        assert_eq!(list.first(), Some(&(0, 2)));
        assert_eq!(list.last(), Some(&(9996, 10_000)));
        for i in 0..1000u32 {
            assert!(list.contains(&(10 * i + 3, 10 * i + 5)));
        }
        let covered: u32 = list.iter().map(|&(from, to)| to - from + 1).sum();
        assert_eq!(covered, 10_001);
        // contiguous from 0 to 10000
        for pair in list.windows(2) {
            assert_eq!(pair[0].1 + 1, pair[1].0);
        }
    }

    #[test]
    fn test_overlapping_ranges_stay_disjoint() {
        let mut nodes = RangeMapArena::new();
        let mut sets = MultiStateArena::new();
        let mut map = RangeMap::new();

        let mut seed = 17u32;
        for _ in 0..500 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let from = (seed >> 8) % 5000;
            let to = from + (seed >> 20) % 64;
            map.add_range(&mut nodes, &mut sets, from, to).unwrap();
        }
        let list = intervals(&map, &nodes);
        assert_partition(&list);
        assert_eq!(list.len(), map.len());
    }

    #[test]
    fn test_out_of_memory_leaves_map_usable() {
        let node_size = std::mem::size_of::<RangeMapNode>();
        let mut nodes = RangeMapArena::with_config(ArenaConfig::bounded(node_size * 2, 4));
        let mut sets = MultiStateArena::new();
        let mut map = RangeMap::new();

        let mut added = Vec::new();
        for i in 0..1000u32 {
            match map.add_range(&mut nodes, &mut sets, 2 * i, 2 * i) {
                Ok(()) => added.push((2 * i, 2 * i)),
                Err(err) => {
                    assert_eq!(err, Error::OutOfMemory);
                    break;
                }
            }
        }
        assert!(added.len() > RANGE_LEAF_LEN);
        assert_eq!(intervals(&map, &nodes), added);
        assert_eq!(map.len(), added.len());

        // ranges that need no new node still work
        map.add_range(&mut nodes, &mut sets, 0, 0).unwrap();
        map.add_state(&mut nodes, &mut sets, 0, 0, sid(1)).unwrap();
    }
}
