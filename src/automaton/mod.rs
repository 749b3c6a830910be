//! Finite automaton engine over code point ranges
//!
//! Automata are built from range primitives, combined with sequence,
//! repetition and union, and turned into minimal DFAs by subset
//! construction. The key components are:
//!
//! - `Arena`: paged bump allocator shared by the automata built from it
//! - `Automaton`: circular list of states with a start and an end state
//! - `MultiState` / `RangeMap`: B+-trees used during subset construction
//! - `CanonicalIndex`: deduplicates state sets so each becomes one DFA state
//!
//! # Module Organization
//!
//! - `arena`: page allocator with undo, snapshots and use counting
//! - `state`: state and edge layout inside the arena
//! - `automat`: the `Automaton` type, its lifecycle and queries
//! - `fa_builders`: construction operators (sequence, repeat, union, ...)
//! - `multistate`, `range_map`, `state_vector`: determinization data structures
//! - `dfa`: determinization, products, complement and minimization
//! - `nfa`: simulation of an automaton over input
//! - `sparse_set`: O(1)-clear sets used by the simulation

mod arena;
mod automat;
mod dfa;
mod fa_builders;
mod multistate;
mod nfa;
mod range_map;
mod sparse_set;
mod state;
mod state_vector;

pub use arena::{ArenaConfig, PAGE_SIZE};
pub use automat::{Automaton, AutomatonArena};
pub use nfa::MatchBuffers;
pub use state::{RangeEdge, StateId, CHAR_MAX};
