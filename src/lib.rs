//! automat: finite automata over Unicode code point ranges
//!
//! Build nondeterministic automata from ranges, combine them, and reduce
//! them to minimal deterministic automata:
//!
//! ```
//! use automat::Automaton;
//!
//! // x(a|b)*n
//! let mut x = Automaton::new_matching(None, &[('x' as u32, 'x' as u32)])?;
//! let mut ab = Automaton::new_matching(Some(&x), &[('a' as u32, 'b' as u32)])?;
//! let mut n = Automaton::new_matching(Some(&x), &[('n' as u32, 'n' as u32)])?;
//! ab.repeat(false)?;
//! x.sequence(&mut ab)?;
//! x.sequence(&mut n)?;
//! x.minimize()?;
//!
//! assert!(x.is_match_str("xabban"));
//! assert!(!x.is_match_str("xa"));
//! assert_eq!(x.find_match_str("xnnn", true), Some(2));
//! # Ok::<(), automat::Error>(())
//! ```
//!
//! Automata that are built together should share an arena (pass an
//! existing automaton as `like`); operators on automata from different
//! arenas copy the second operand first.

mod automaton;
mod error;

pub use automaton::{
    ArenaConfig, Automaton, AutomatonArena, MatchBuffers, RangeEdge, StateId, CHAR_MAX, PAGE_SIZE,
};
pub use error::{Error, Result};
