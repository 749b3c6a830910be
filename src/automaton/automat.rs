//! The automaton object and the arena it lives in.
//!
//! An `Automaton` owns a circular list of states threaded through
//! `Header::next`. It stores the list tail; the first state after the tail
//! is the start state and the state after the start is the end state:
//!
//! ```text
//! last -> start -> end -> s2 -> ... -> last
//! ```
//!
//! Every automaton registers as a user of its `AutomatonArena`. Several
//! automata may share one arena; it gives its pages back when the last of
//! them is freed or dropped.

use std::cell::{OnceCell, Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use super::arena::{ArenaConfig, Snapshot};
use super::fa_builders::Graph;
use super::state::{self, alloc_end_state, alloc_state, RangeEdge, StateArena, StateId};
use crate::error::{Error, Result};

/// Shared handle to the memory of one or more automata.
///
/// Cloning the handle does not register a new user; only automata do.
#[derive(Clone, Debug, Default)]
pub struct AutomatonArena {
    inner: Rc<RefCell<StateArena>>,
}

impl AutomatonArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ArenaConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(StateArena::with_config(config))),
        }
    }

    pub fn config(&self) -> ArenaConfig {
        self.inner.borrow().config().clone()
    }

    /// Bytes allocated for states and edges.
    pub fn allocated(&self) -> usize {
        self.inner.borrow().allocated()
    }

    /// Bytes held by discarded automata that could not be given back.
    pub fn wasted(&self) -> usize {
        self.inner.borrow().wasted()
    }

    /// Number of automata using this arena.
    pub fn use_count(&self) -> usize {
        self.inner.borrow().use_count()
    }

    pub fn page_count(&self) -> usize {
        self.inner.borrow().page_count()
    }

    pub fn cached_page_count(&self) -> usize {
        self.inner.borrow().cached_page_count()
    }

    /// Free pages cached by earlier releases.
    pub fn free_cache(&self) {
        self.inner.borrow_mut().free_cache();
    }

    /// True if both handles refer to the same arena.
    pub fn same(&self, other: &AutomatonArena) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[inline]
    pub(crate) fn borrow(&self) -> Ref<'_, StateArena> {
        self.inner.borrow()
    }

    #[inline]
    pub(crate) fn borrow_mut(&self) -> RefMut<'_, StateArena> {
        self.inner.borrow_mut()
    }

    /// Run `f` and roll the arena back if it fails.
    pub(crate) fn transaction<T>(&self, f: impl FnOnce(&mut StateArena) -> Result<T>) -> Result<T> {
        let mut arena = self.inner.borrow_mut();
        let snapshot: Snapshot = arena.snapshot();
        match f(&mut arena) {
            Ok(value) => Ok(value),
            Err(err) => {
                arena.restore(snapshot)?;
                Err(err)
            }
        }
    }
}

/// A nondeterministic or deterministic finite automaton over code points.
///
/// An automaton without states is free: it owns no arena and every
/// operation that needs a start or end state rejects it with
/// `Error::InvalidArgument`.
pub struct Automaton {
    pub(crate) arena: Option<AutomatonArena>,
    pub(crate) last: StateId,
    pub(crate) nr_states: usize,
    /// Densely numbered copy of the states for matching, loaded on first
    /// use and dropped whenever the states change.
    pub(crate) graph: OnceCell<Graph>,
}

impl Default for Automaton {
    fn default() -> Self {
        Self::free_automaton()
    }
}

impl Automaton {
    pub(crate) fn free_automaton() -> Self {
        Self {
            arena: None,
            last: StateId::NONE,
            nr_states: 0,
            graph: OnceCell::new(),
        }
    }

    /// Wrap an already linked state list and register as arena user.
    pub(crate) fn from_parts(arena: AutomatonArena, last: StateId, nr_states: usize) -> Self {
        arena.borrow_mut().incr_use();
        Self {
            arena: Some(arena),
            last,
            nr_states,
            graph: OnceCell::new(),
        }
    }

    /// The arena of `like`, or a new arena with default config.
    pub(crate) fn arena_like(like: Option<&Automaton>) -> Result<AutomatonArena> {
        match like {
            Some(automaton) => Ok(automaton.arena()?.clone()),
            None => Ok(AutomatonArena::new()),
        }
    }

    /// Automaton accepting only the empty input, in the arena of `like`.
    pub fn new_empty(like: Option<&Automaton>) -> Result<Self> {
        Self::empty_in(&Self::arena_like(like)?)
    }

    /// Automaton accepting exactly one code point out of `ranges`, in the
    /// arena of `like`.
    pub fn new_matching(like: Option<&Automaton>, ranges: &[(u32, u32)]) -> Result<Self> {
        Self::matching_in(&Self::arena_like(like)?, ranges)
    }

    pub fn empty_in(arena: &AutomatonArena) -> Result<Self> {
        let last = arena.transaction(|states| {
            let start = alloc_state(states, &[StateId::NONE], &[])?;
            let end = alloc_end_state(states)?;
            state::set_empty_target(states, start, 0, end);
            Ok(link(states, &[start, end]))
        })?;
        Ok(Self::from_parts(arena.clone(), last, 2))
    }

    pub fn matching_in(arena: &AutomatonArena, ranges: &[(u32, u32)]) -> Result<Self> {
        state::validate_ranges(ranges)?;
        let last = arena.transaction(|states| {
            let end = alloc_end_state(states)?;
            let edges: Vec<RangeEdge> = ranges
                .iter()
                .map(|&(from, to)| RangeEdge {
                    target: end,
                    from,
                    to,
                })
                .collect();
            let start = alloc_state(states, &[], &edges)?;
            Ok(link(states, &[start, end]))
        })?;
        Ok(Self::from_parts(arena.clone(), last, 2))
    }

    /// Release the arena and make the automaton free.
    pub fn free(&mut self) {
        if let Some(arena) = self.arena.take() {
            arena.borrow_mut().decr_use();
        }
        self.last = StateId::NONE;
        self.nr_states = 0;
        self.changed();
    }

    /// Forget derived data after the states were modified in place.
    #[inline]
    pub(crate) fn changed(&mut self) {
        self.graph.take();
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.arena.is_none()
    }

    #[inline]
    pub fn nr_states(&self) -> usize {
        self.nr_states
    }

    pub fn arena(&self) -> Result<&AutomatonArena> {
        self.arena
            .as_ref()
            .ok_or(Error::InvalidArgument("automaton is free"))
    }

    pub fn start_state(&self) -> Option<StateId> {
        let arena = self.arena.as_ref()?;
        Some(state::next(&arena.borrow(), self.last))
    }

    pub fn end_state(&self) -> Option<StateId> {
        let arena = self.arena.as_ref()?;
        let states = arena.borrow();
        Some(state::next(&states, state::next(&states, self.last)))
    }

    #[inline]
    pub(crate) fn start_in(&self, states: &StateArena) -> StateId {
        state::next(states, self.last)
    }

    #[inline]
    pub(crate) fn end_in(&self, states: &StateArena) -> StateId {
        state::next(states, self.start_in(states))
    }

    /// States in list order, start first.
    pub(crate) fn state_ids(&self, states: &StateArena) -> Vec<StateId> {
        let mut ids = Vec::with_capacity(self.nr_states);
        if self.is_free() {
            return ids;
        }
        let first = self.start_in(states);
        let mut s = first;
        loop {
            ids.push(s);
            s = state::next(states, s);
            if s == first {
                break;
            }
        }
        ids
    }

    /// Arena cells in use by the states of this automaton.
    pub(crate) fn nr_cells(&self, states: &StateArena) -> usize {
        self.state_ids(states)
            .into_iter()
            .map(|s| state::nr_cells(states, s))
            .sum()
    }
}

impl Drop for Automaton {
    fn drop(&mut self) {
        self.free();
    }
}

impl fmt::Debug for Automaton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Automaton")
            .field("nr_states", &self.nr_states)
            .field("last", &self.last)
            .finish()
    }
}

/// Debug dump: one line per state, edges indented below it.
impl fmt::Display for Automaton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(arena) = self.arena.as_ref() else {
            return writeln!(f, "automaton (free)");
        };
        let states = arena.borrow();
        let ids = self.state_ids(&states);
        let number = |s: StateId| ids.iter().position(|&x| x == s);
        writeln!(f, "automaton ({} states)", self.nr_states)?;
        for (i, &s) in ids.iter().enumerate() {
            let role = match i {
                0 => " start",
                1 => " end",
                _ => "",
            };
            writeln!(f, "state {}{}:", i, role)?;
            for target in state::empty_edges(&states, s) {
                match number(target) {
                    Some(t) => writeln!(f, "  eps -> {}", t)?,
                    None => writeln!(f, "  eps -> ?")?,
                }
            }
            for edge in state::range_edges(&states, s) {
                let target = number(edge.target).map_or("?".to_string(), |t| t.to_string());
                if edge.from == edge.to {
                    writeln!(f, "  {} -> {}", DisplayChar(edge.from), target)?;
                } else {
                    writeln!(
                        f,
                        "  {}..{} -> {}",
                        DisplayChar(edge.from),
                        DisplayChar(edge.to),
                        target
                    )?;
                }
            }
        }
        Ok(())
    }
}

struct DisplayChar(u32);

impl fmt::Display for DisplayChar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match char::from_u32(self.0) {
            Some(c) if c.is_ascii_graphic() => write!(f, "'{}'", c),
            _ => write!(f, "{:#x}", self.0),
        }
    }
}

/// Link `states` into a circular list in the given order and return the tail.
pub(crate) fn link(states: &mut StateArena, order: &[StateId]) -> StateId {
    for pair in order.windows(2) {
        state::set_next(states, pair[0], pair[1]);
    }
    match (order.first(), order.last()) {
        (Some(&first), Some(&last)) => {
            state::set_next(states, last, first);
            last
        }
        _ => StateId::NONE,
    }
}

/// Append the circular list ending in `last_b` to the one ending in
/// `last_a`. Returns the tail of the joined list.
pub(crate) fn splice(states: &mut StateArena, last_a: StateId, last_b: StateId) -> StateId {
    let first_a = state::next(states, last_a);
    let first_b = state::next(states, last_b);
    state::set_next(states, last_a, first_b);
    state::set_next(states, last_b, first_a);
    last_b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_automaton_layout() {
        let a = Automaton::new_empty(None).unwrap();
        assert_eq!(a.nr_states(), 2);
        let arena = a.arena().unwrap();
        assert_eq!(arena.use_count(), 1);

        let states = arena.borrow();
        let start = a.start_in(&states);
        let end = a.end_in(&states);
        assert_eq!(state::empty_edges(&states, start).collect::<Vec<_>>(), vec![end]);
        assert_eq!(state::empty_edges(&states, end).collect::<Vec<_>>(), vec![end]);
        assert_eq!(a.state_ids(&states), vec![start, end]);
        assert_eq!(a.start_state(), Some(start));
        assert_eq!(a.end_state(), Some(end));
    }

    #[test]
    fn test_matching_automaton_layout() {
        let a = Automaton::new_matching(None, &[('a' as u32, 'c' as u32), (0x100, 0x1ff)]).unwrap();
        let arena = a.arena().unwrap();
        let states = arena.borrow();
        let start = a.start_in(&states);
        let end = a.end_in(&states);
        let edges: Vec<_> = state::range_edges(&states, start).collect();
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|e| e.target == end));
        assert_eq!(state::empty_edges(&states, start).count(), 0);
    }

    #[test]
    fn test_invalid_ranges_leave_arena_unused() {
        let arena = AutomatonArena::new();
        assert!(matches!(
            Automaton::matching_in(&arena, &[]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Automaton::matching_in(&arena, &[(5, 4)]),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(arena.use_count(), 0);
        assert_eq!(arena.allocated(), 0);
    }

    #[test]
    fn test_shared_arena_released_by_last_user() {
        let mut a = Automaton::new_empty(None).unwrap();
        let b = Automaton::new_matching(Some(&a), &[(1, 2)]).unwrap();
        let arena = a.arena().unwrap().clone();
        assert!(arena.same(b.arena().unwrap()));
        assert_eq!(arena.use_count(), 2);

        a.free();
        assert!(a.is_free());
        assert_eq!(a.nr_states(), 0);
        assert_eq!(a.start_state(), None);
        assert_eq!(arena.use_count(), 1);
        assert!(arena.allocated() > 0);

        drop(b);
        assert_eq!(arena.use_count(), 0);
        assert_eq!(arena.allocated(), 0);
        assert_eq!(arena.cached_page_count(), 1);
        arena.free_cache();
        assert_eq!(arena.cached_page_count(), 0);
    }

    #[test]
    fn test_free_automaton_rejected_as_like() {
        let mut a = Automaton::new_empty(None).unwrap();
        a.free();
        a.free();
        assert!(matches!(
            Automaton::new_empty(Some(&a)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_out_of_memory_is_transactional() {
        let cell = std::mem::size_of::<state::Cell>();
        let arena = AutomatonArena::with_config(ArenaConfig::bounded(cell * 4, 1));
        let a = Automaton::empty_in(&arena).unwrap();
        let used = arena.allocated();
        // start with 3 ranges does not fit the remaining page
        assert_eq!(
            Automaton::matching_in(&arena, &[(1, 1), (3, 3), (5, 5)]).unwrap_err(),
            Error::OutOfMemory
        );
        assert_eq!(arena.allocated(), used);
        assert_eq!(arena.use_count(), 1);
        drop(a);
    }

    #[test]
    fn test_display_dump() {
        let a = Automaton::new_matching(None, &[('a' as u32, 'a' as u32), (0, 31)]).unwrap();
        let dump = a.to_string();
        assert!(dump.starts_with("automaton (2 states)\n"));
        assert!(dump.contains("state 0 start:\n  'a' -> 1\n  0x0..0x1f -> 1\n"));
        assert!(dump.contains("state 1 end:\n  eps -> 1\n"));

        let mut b = Automaton::new_empty(None).unwrap();
        b.free();
        assert_eq!(b.to_string(), "automaton (free)\n");
    }
}
