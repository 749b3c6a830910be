//! Construction operators for automata.
//!
//! All operators work in place on `self`:
//! - `extend_ranges`: add alternatives to a single-transition automaton
//! - `sequence`: `self` followed by `other`
//! - `repeat`: `self*` or `self+`
//! - `union`: `self | other`
//! - `optional`: `self | ()`
//!
//! `copy` and `reverse` build a new automaton instead.
//!
//! Binary operators take the states of `other` over. If `other` lives in a
//! different arena its states are copied into the arena of `self` first.
//! On success `other` is left free; on failure neither automaton changes.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::automat::{link, splice, Automaton, AutomatonArena};
use super::state::{self, alloc_end_state, alloc_state, RangeEdge, StateArena, StateId};
use crate::error::{Error, Result};

/// A state list loaded into owned memory with edges as list positions.
///
/// Position 0 is the start state, position 1 the end state.
#[derive(Debug, Default)]
pub(crate) struct Graph {
    pub empty: Vec<SmallVec<[usize; 2]>>,
    pub ranges: Vec<SmallVec<[(usize, u32, u32); 2]>>,
}

impl Graph {
    pub(crate) fn with_len(n: usize) -> Self {
        Self {
            empty: vec![SmallVec::new(); n],
            ranges: vec![SmallVec::new(); n],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.empty.len()
    }

    pub(crate) fn load(automaton: &Automaton, states: &StateArena) -> Result<Graph> {
        let ids = automaton.state_ids(states);
        let position: FxHashMap<StateId, usize> =
            ids.iter().enumerate().map(|(i, &s)| (s, i)).collect();
        let lookup = |s: StateId| {
            position
                .get(&s)
                .copied()
                .ok_or(Error::InvalidArgument("edge leaves the automaton"))
        };

        let mut graph = Graph::with_len(ids.len());
        for (i, &s) in ids.iter().enumerate() {
            for target in state::empty_edges(states, s) {
                graph.empty[i].push(lookup(target)?);
            }
            for edge in state::range_edges(states, s) {
                graph.ranges[i].push((lookup(edge.target)?, edge.from, edge.to));
            }
        }
        Ok(graph)
    }

    /// Allocate all states, patch edge targets and link them in order.
    /// Returns the list tail.
    pub(crate) fn emit(&self, states: &mut StateArena) -> Result<StateId> {
        let mut ids = Vec::with_capacity(self.len());
        for i in 0..self.len() {
            let empty: SmallVec<[StateId; 2]> =
                self.empty[i].iter().map(|_| StateId::NONE).collect();
            let ranges: SmallVec<[RangeEdge; 4]> = self.ranges[i]
                .iter()
                .map(|&(_, from, to)| RangeEdge {
                    target: StateId::NONE,
                    from,
                    to,
                })
                .collect();
            ids.push(alloc_state(states, &empty, &ranges)?);
        }
        for (i, &s) in ids.iter().enumerate() {
            for (j, &target) in self.empty[i].iter().enumerate() {
                state::set_empty_target(states, s, j, ids[target]);
            }
            for (j, &(target, _, _)) in self.ranges[i].iter().enumerate() {
                state::set_range_target(states, s, j, ids[target]);
            }
        }
        Ok(link(states, &ids))
    }

    /// Graph with every edge turned around. The old end becomes the start,
    /// the old start becomes the end and gets a self loop in its first
    /// epsilon slot. Epsilon self loops of other states are dropped.
    pub(crate) fn reversed(&self) -> Graph {
        let swap = |i: usize| match i {
            0 => 1,
            1 => 0,
            _ => i,
        };
        let mut rev = Graph::with_len(self.len());
        rev.empty[1].push(1);
        for u in 0..self.len() {
            for &v in &self.empty[u] {
                if u != v {
                    rev.empty[swap(v)].push(swap(u));
                }
            }
            for &(v, from, to) in &self.ranges[u] {
                rev.ranges[swap(v)].push((swap(u), from, to));
            }
        }
        rev
    }
}

impl Automaton {
    /// Add more alternative ranges to an automaton built by `new_matching`.
    pub fn extend_ranges(&mut self, ranges: &[(u32, u32)]) -> Result<()> {
        let arena = self.arena()?.clone();
        if self.nr_states != 2 {
            return Err(Error::InvalidArgument("not a single transition automaton"));
        }
        {
            let states = arena.borrow();
            let start = self.start_in(&states);
            if state::empty_edges(&states, start).next().is_some()
                || state::nr_range_edges(&states, start) == 0
            {
                return Err(Error::InvalidArgument("not a single transition automaton"));
            }
        }
        state::validate_ranges(ranges)?;
        arena.transaction(|states| {
            let start = self.start_in(states);
            let end = self.end_in(states);
            state::extend_ranges(states, start, end, ranges)
        })?;
        self.changed();
        Ok(())
    }

    /// Take the states of `other` into the arena of `self`.
    ///
    /// The returned automaton is a second handle on them, so dropping it
    /// after a failed operation leaves `other` intact.
    pub(crate) fn adopt(&self, other: &Automaton) -> Result<Automaton> {
        let arena = self.arena()?;
        let other_arena = other.arena()?;
        if arena.same(other_arena) {
            Ok(Automaton::from_parts(
                arena.clone(),
                other.last,
                other.nr_states,
            ))
        } else {
            other.copy_into(arena)
        }
    }

    /// `self` followed by `other`. `other` is left free.
    pub fn sequence(&mut self, other: &mut Automaton) -> Result<()> {
        let b = self.adopt(other)?;
        let arena = self.arena()?.clone();
        self.last = arena.transaction(|states| {
            let a_start = self.start_in(states);
            let a_end = self.end_in(states);
            let b_start = b.start_in(states);
            let b_end = b.end_in(states);
            let start = alloc_state(states, &[a_start], &[])?;
            let end = alloc_end_state(states)?;
            state::set_empty_target(states, a_end, 0, b_start);
            state::set_empty_target(states, b_end, 0, end);
            let head = link(states, &[start, end]);
            let last = splice(states, head, self.last);
            Ok(splice(states, last, b.last))
        })?;
        self.nr_states += 2 + b.nr_states;
        self.changed();
        other.free();
        Ok(())
    }

    /// Repeat `self` zero or more times, or at least once if
    /// `at_least_once` is set.
    pub fn repeat(&mut self, at_least_once: bool) -> Result<()> {
        let arena = self.arena()?.clone();
        let added = if at_least_once { 3 } else { 2 };
        self.last = arena.transaction(|states| {
            let a_start = self.start_in(states);
            let a_end = self.end_in(states);
            if at_least_once {
                let start = alloc_state(states, &[a_start], &[])?;
                let end = alloc_end_state(states)?;
                let again = alloc_state(states, &[a_start, end], &[])?;
                state::set_empty_target(states, a_end, 0, again);
                let head = link(states, &[start, end, again]);
                Ok(splice(states, head, self.last))
            } else {
                let end = alloc_end_state(states)?;
                let start = alloc_state(states, &[a_start, end], &[])?;
                state::set_empty_target(states, a_end, 0, start);
                let head = link(states, &[start, end]);
                Ok(splice(states, head, self.last))
            }
        })?;
        self.nr_states += added;
        self.changed();
        Ok(())
    }

    /// Either `self` or `other`. `other` is left free.
    pub fn union(&mut self, other: &mut Automaton) -> Result<()> {
        let b = self.adopt(other)?;
        let arena = self.arena()?.clone();
        self.last = arena.transaction(|states| {
            let a_start = self.start_in(states);
            let a_end = self.end_in(states);
            let b_start = b.start_in(states);
            let b_end = b.end_in(states);
            let start = alloc_state(states, &[a_start, b_start], &[])?;
            let end = alloc_end_state(states)?;
            state::set_empty_target(states, a_end, 0, end);
            state::set_empty_target(states, b_end, 0, end);
            let head = link(states, &[start, end]);
            let last = splice(states, head, self.last);
            Ok(splice(states, last, b.last))
        })?;
        self.nr_states += 2 + b.nr_states;
        self.changed();
        other.free();
        Ok(())
    }

    /// `self` or the empty input.
    pub fn optional(&mut self) -> Result<()> {
        let mut empty = Automaton::empty_in(self.arena()?)?;
        self.union(&mut empty)
    }

    /// Structural copy in the arena of `like` (a new arena if `None`).
    pub fn copy(&self, like: Option<&Automaton>) -> Result<Automaton> {
        self.copy_into(&Automaton::arena_like(like)?)
    }

    /// Automaton for the reversed language in the arena of `like` (a new
    /// arena if `None`).
    pub fn reverse(&self, like: Option<&Automaton>) -> Result<Automaton> {
        self.reverse_into(&Automaton::arena_like(like)?)
    }

    pub(crate) fn copy_into(&self, arena: &AutomatonArena) -> Result<Automaton> {
        let graph = Graph::load(self, &self.arena()?.borrow())?;
        let last = arena.transaction(|states| graph.emit(states))?;
        Ok(Automaton::from_parts(arena.clone(), last, graph.len()))
    }

    pub(crate) fn reverse_into(&self, arena: &AutomatonArena) -> Result<Automaton> {
        let graph = Graph::load(self, &self.arena()?.borrow())?.reversed();
        let last = arena.transaction(|states| graph.emit(states))?;
        Ok(Automaton::from_parts(arena.clone(), last, graph.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> (u32, u32) {
        let mut it = s.chars();
        let from = it.next().unwrap() as u32;
        let to = it.next().map_or(from, |c| c as u32);
        (from, to)
    }

    fn single(c: &str) -> Automaton {
        Automaton::new_matching(None, &[chars(c)]).unwrap()
    }

    #[test]
    fn test_sequence_state_count_and_ownership() {
        let mut a = single("a");
        let mut b = Automaton::new_matching(Some(&a), &[chars("b")]).unwrap();
        let arena = a.arena().unwrap().clone();
        assert_eq!(arena.use_count(), 2);

        a.sequence(&mut b).unwrap();
        assert!(b.is_free());
        assert_eq!(a.nr_states(), 6);
        assert_eq!(arena.use_count(), 1);
        let states = arena.borrow();
        assert_eq!(a.state_ids(&states).len(), 6);
    }

    #[test]
    fn test_sequence_copies_foreign_arena() {
        let mut a = single("a");
        let mut b = single("b");
        let b_arena = b.arena().unwrap().clone();

        a.sequence(&mut b).unwrap();
        assert!(b.is_free());
        assert_eq!(b_arena.use_count(), 0);
        assert_eq!(a.arena().unwrap().use_count(), 1);
        assert_eq!(a.nr_states(), 6);
    }

    #[test]
    fn test_repeat_state_counts() {
        let mut star = single("a");
        star.repeat(false).unwrap();
        assert_eq!(star.nr_states(), 4);

        let mut plus = single("a");
        plus.repeat(true).unwrap();
        assert_eq!(plus.nr_states(), 5);
    }

    #[test]
    fn test_union_and_optional() {
        let mut a = single("a");
        let mut b = single("b");
        a.union(&mut b).unwrap();
        assert_eq!(a.nr_states(), 6);
        a.optional().unwrap();
        assert_eq!(a.nr_states(), 10);
    }

    #[test]
    fn test_free_operand_rejected() {
        let mut a = single("a");
        let mut b = single("b");
        b.free();
        assert!(matches!(a.sequence(&mut b), Err(Error::InvalidArgument(_))));
        assert!(matches!(b.repeat(false), Err(Error::InvalidArgument(_))));
        assert_eq!(a.nr_states(), 2);
    }

    #[test]
    fn test_extend_ranges_only_on_matching_automaton() {
        let mut a = single("a");
        a.extend_ranges(&[chars("x"), chars("09")]).unwrap();
        {
            let arena = a.arena().unwrap();
            let states = arena.borrow();
            let start = a.start_in(&states);
            assert_eq!(state::nr_range_edges(&states, start), 3);
        }

        let mut e = Automaton::new_empty(None).unwrap();
        assert!(matches!(e.extend_ranges(&[(1, 1)]), Err(Error::InvalidArgument(_))));

        a.repeat(false).unwrap();
        assert!(matches!(a.extend_ranges(&[(1, 1)]), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_copy_preserves_structure() {
        let mut a = single("a");
        let mut b = single("b");
        a.union(&mut b).unwrap();
        a.repeat(false).unwrap();

        let c = a.copy(None).unwrap();
        assert_eq!(c.nr_states(), a.nr_states());
        assert!(!c.arena().unwrap().same(a.arena().unwrap()));

        let ga = Graph::load(&a, &a.arena().unwrap().borrow()).unwrap();
        let gc = Graph::load(&c, &c.arena().unwrap().borrow()).unwrap();
        assert_eq!(ga.empty, gc.empty);
        assert_eq!(ga.ranges, gc.ranges);
    }

    #[test]
    fn test_reverse_swaps_start_and_end() {
        let mut a = single("a");
        let mut b = single("b");
        a.sequence(&mut b).unwrap();

        let r = a.reverse(Some(&a)).unwrap();
        assert_eq!(r.nr_states(), a.nr_states());
        assert_eq!(a.arena().unwrap().use_count(), 2);

        let g = Graph::load(&r, &r.arena().unwrap().borrow()).unwrap();
        // new end keeps its self loop in slot 0
        assert_eq!(g.empty[1][0], 1);
        // the new start only has epsilon edges, no self loop
        assert!(!g.empty[0].contains(&0));
        assert!(g.ranges[0].is_empty());
    }
}
