//! States and transitions stored in an arena.
//!
//! A state occupies consecutive arena cells: one `Header` followed by its
//! epsilon edges and then its range edges. Edge counts are fixed when the
//! state is allocated. The only way to add edges later is a continuation
//! block (a header-only cell plus more range edges) chained through
//! `Header::more`, which `extend_ranges` uses.
//!
//! ```text
//! [Header{next, more, nr_empty: 1, nr_range: 2}] [Empty(t0)] [Range(t1,a,c)] [Range(t1,x,x)]
//! ```
//!
//! The header's `next` links the states of one automaton into a circular
//! list; see `Automaton` for how start and end state are found.

use super::arena::{Addr, Arena};
use crate::error::{Error, Result};

/// Largest code point accepted in a range.
pub const CHAR_MAX: u32 = 0x7fff_ffff;

/// Identity of a state: the arena address of its header cell.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StateId(u32);

impl StateId {
    /// Sentinel for "no state".
    pub const NONE: StateId = StateId(u32::MAX);

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn addr(self) -> Addr {
        Addr::from_index(self.index())
    }

    #[inline]
    pub(crate) fn from_addr(addr: Addr) -> StateId {
        StateId(addr.index() as u32)
    }
}

/// A transition taken if the next code point lies in `from..=to`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RangeEdge {
    pub target: StateId,
    pub from: u32,
    pub to: u32,
}

impl RangeEdge {
    #[inline]
    pub fn contains(&self, c: u32) -> bool {
        self.from <= c && c <= self.to
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Header {
    pub next: StateId,
    pub more: StateId,
    pub nr_empty: u16,
    pub nr_range: u16,
}

/// One arena cell of the state graph.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Cell {
    Header(Header),
    Empty(StateId),
    Range(RangeEdge),
}

pub(crate) type StateArena = Arena<Cell>;

/// Check a list of `(from, to)` code point ranges.
pub(crate) fn validate_ranges(ranges: &[(u32, u32)]) -> Result<()> {
    if ranges.is_empty() {
        return Err(Error::InvalidArgument("empty range list"));
    }
    if ranges.len() > u16::MAX as usize {
        return Err(Error::Overflow("too many ranges for one state"));
    }
    for &(from, to) in ranges {
        if from > to {
            return Err(Error::InvalidArgument("range with from > to"));
        }
        if to > CHAR_MAX {
            return Err(Error::InvalidArgument("range exceeds CHAR_MAX"));
        }
    }
    Ok(())
}

/// Allocate a state with the given edges. The state is not linked into
/// any list yet (`next` is `StateId::NONE`).
pub(crate) fn alloc_state(
    arena: &mut StateArena,
    empty: &[StateId],
    ranges: &[RangeEdge],
) -> Result<StateId> {
    let nr_empty =
        u16::try_from(empty.len()).map_err(|_| Error::Overflow("too many epsilon edges"))?;
    let nr_range =
        u16::try_from(ranges.len()).map_err(|_| Error::Overflow("too many range edges"))?;
    let header = Cell::Header(Header {
        next: StateId::NONE,
        more: StateId::NONE,
        nr_empty,
        nr_range,
    });
    let cells = std::iter::once(header)
        .chain(empty.iter().map(|&t| Cell::Empty(t)))
        .chain(ranges.iter().map(|&r| Cell::Range(r)));
    let addr = arena.alloc_iter(1 + empty.len() + ranges.len(), cells)?;
    Ok(StateId::from_addr(addr))
}

/// Allocate the end state: a single epsilon edge pointing to itself.
pub(crate) fn alloc_end_state(arena: &mut StateArena) -> Result<StateId> {
    let end = alloc_state(arena, &[StateId::NONE], &[])?;
    set_empty_target(arena, end, 0, end);
    Ok(end)
}

#[inline]
pub(crate) fn header(arena: &StateArena, state: StateId) -> Header {
    match arena[state.addr()] {
        Cell::Header(header) => header,
        ref other => unreachable!("state {:?} points to {:?}", state, other),
    }
}

#[inline]
fn header_mut(arena: &mut StateArena, state: StateId) -> &mut Header {
    match &mut arena[state.addr()] {
        Cell::Header(header) => header,
        other => unreachable!("state {:?} points to {:?}", state, other),
    }
}

#[inline]
pub(crate) fn next(arena: &StateArena, state: StateId) -> StateId {
    header(arena, state).next
}

#[inline]
pub(crate) fn set_next(arena: &mut StateArena, state: StateId, next: StateId) {
    header_mut(arena, state).next = next;
}

#[inline]
fn cell_at(state: StateId, offset: usize) -> Addr {
    Addr::from_index(state.index() + offset)
}

/// Epsilon edges of `state` in creation order.
pub(crate) fn empty_edges(arena: &StateArena, state: StateId) -> impl Iterator<Item = StateId> + '_ {
    let nr_empty = header(arena, state).nr_empty as usize;
    (0..nr_empty).map(move |i| match arena[cell_at(state, 1 + i)] {
        Cell::Empty(target) => target,
        other => unreachable!("expected epsilon edge, found {:?}", other),
    })
}

pub(crate) fn set_empty_target(arena: &mut StateArena, state: StateId, i: usize, target: StateId) {
    debug_assert!(i < header(arena, state).nr_empty as usize);
    arena[cell_at(state, 1 + i)] = Cell::Empty(target);
}

/// Retarget the `i`-th range edge of the state's first block.
pub(crate) fn set_range_target(arena: &mut StateArena, state: StateId, i: usize, target: StateId) {
    let h = header(arena, state);
    debug_assert!(i < h.nr_range as usize);
    let addr = cell_at(state, 1 + h.nr_empty as usize + i);
    if let Cell::Range(edge) = &mut arena[addr] {
        edge.target = target;
    }
}

/// Iterator over all range edges of a state, continuation blocks included.
pub(crate) struct RangeEdges<'a> {
    arena: &'a StateArena,
    block: StateId,
    pos: usize,
    end: usize,
}

impl<'a> RangeEdges<'a> {
    fn new(arena: &'a StateArena, block: StateId) -> Self {
        let h = header(arena, block);
        let pos = 1 + h.nr_empty as usize;
        Self {
            arena,
            block,
            pos,
            end: pos + h.nr_range as usize,
        }
    }
}

impl Iterator for RangeEdges<'_> {
    type Item = RangeEdge;

    fn next(&mut self) -> Option<RangeEdge> {
        loop {
            if self.block.is_none() {
                return None;
            }
            if self.pos < self.end {
                let cell = self.arena[cell_at(self.block, self.pos)];
                self.pos += 1;
                match cell {
                    Cell::Range(edge) => return Some(edge),
                    other => unreachable!("expected range edge, found {:?}", other),
                }
            }
            let more = header(self.arena, self.block).more;
            if more.is_none() {
                self.block = StateId::NONE;
            } else {
                *self = RangeEdges::new(self.arena, more);
            }
        }
    }
}

pub(crate) fn range_edges(arena: &StateArena, state: StateId) -> RangeEdges<'_> {
    RangeEdges::new(arena, state)
}

/// Number of range edges over all blocks.
pub(crate) fn nr_range_edges(arena: &StateArena, state: StateId) -> usize {
    let mut total = 0;
    let mut block = state;
    while !block.is_none() {
        let h = header(arena, block);
        total += h.nr_range as usize;
        block = h.more;
    }
    total
}

/// Number of arena cells used by the state, continuation blocks included.
pub(crate) fn nr_cells(arena: &StateArena, state: StateId) -> usize {
    let mut total = 0;
    let mut block = state;
    while !block.is_none() {
        let h = header(arena, block);
        total += 1 + h.nr_empty as usize + h.nr_range as usize;
        block = h.more;
    }
    total
}

/// Append range edges to `target` as a continuation block of `state`.
pub(crate) fn extend_ranges(
    arena: &mut StateArena,
    state: StateId,
    target: StateId,
    ranges: &[(u32, u32)],
) -> Result<()> {
    let edges: Vec<RangeEdge> = ranges
        .iter()
        .map(|&(from, to)| RangeEdge { target, from, to })
        .collect();
    let block = alloc_state(arena, &[], &edges)?;
    let mut last = state;
    loop {
        let more = header(arena, last).more;
        if more.is_none() {
            break;
        }
        last = more;
    }
    header_mut(arena, last).more = block;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_id_none() {
        assert!(StateId::NONE.is_none());
        assert!(!StateId(0).is_none());
        assert!(!StateId(100).is_none());
    }

    #[test]
    fn test_alloc_state_layout() {
        let mut arena = StateArena::new();
        let end = alloc_end_state(&mut arena).unwrap();
        let s = alloc_state(
            &mut arena,
            &[end],
            &[
                RangeEdge { target: end, from: 'a' as u32, to: 'c' as u32 },
                RangeEdge { target: end, from: 'x' as u32, to: 'x' as u32 },
            ],
        )
        .unwrap();

        // end state: header + self loop
        assert_eq!(s.index(), end.index() + 2);
        assert_eq!(empty_edges(&arena, end).collect::<Vec<_>>(), vec![end]);
        assert_eq!(empty_edges(&arena, s).collect::<Vec<_>>(), vec![end]);
        let ranges: Vec<_> = range_edges(&arena, s).map(|e| (e.from, e.to)).collect();
        assert_eq!(ranges, vec![('a' as u32, 'c' as u32), ('x' as u32, 'x' as u32)]);
        assert_eq!(nr_cells(&arena, s), 4);
        assert!(next(&arena, s).is_none());
    }

    #[test]
    fn test_extend_ranges_chains_blocks() {
        let mut arena = StateArena::new();
        let end = alloc_end_state(&mut arena).unwrap();
        let s = alloc_state(&mut arena, &[], &[RangeEdge { target: end, from: 1, to: 1 }]).unwrap();
        extend_ranges(&mut arena, s, end, &[(3, 4)]).unwrap();
        extend_ranges(&mut arena, s, end, &[(6, 6), (8, 9)]).unwrap();

        let ranges: Vec<_> = range_edges(&arena, s).map(|e| (e.from, e.to)).collect();
        assert_eq!(ranges, vec![(1, 1), (3, 4), (6, 6), (8, 9)]);
        assert_eq!(nr_range_edges(&arena, s), 4);
        assert_eq!(nr_cells(&arena, s), 2 + 2 + 3);
    }

    #[test]
    fn test_retarget_edges() {
        let mut arena = StateArena::new();
        let a = alloc_end_state(&mut arena).unwrap();
        let b = alloc_end_state(&mut arena).unwrap();
        let s = alloc_state(&mut arena, &[a], &[RangeEdge { target: a, from: 0, to: 9 }]).unwrap();
        set_empty_target(&mut arena, s, 0, b);
        set_range_target(&mut arena, s, 0, b);
        set_next(&mut arena, s, a);

        assert_eq!(empty_edges(&arena, s).next(), Some(b));
        assert_eq!(range_edges(&arena, s).next().map(|e| e.target), Some(b));
        assert_eq!(next(&arena, s), a);
    }

    #[test]
    fn test_validate_ranges() {
        assert!(validate_ranges(&[(1, 2), (5, 5)]).is_ok());
        assert!(matches!(validate_ranges(&[]), Err(Error::InvalidArgument(_))));
        assert!(matches!(validate_ranges(&[(3, 2)]), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            validate_ranges(&[(0, CHAR_MAX + 1)]),
            Err(Error::InvalidArgument(_))
        ));
    }
}
