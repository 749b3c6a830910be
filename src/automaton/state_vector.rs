//! Canonical state vectors for subset construction.
//!
//! A `StateVector` is the sorted array of NFA states that forms one DFA
//! state. `CanonicalIndex` keeps every vector seen so far in a prefix trie
//! keyed on the state sequence, so two equal sets always resolve to the
//! same `VectorId` and therefore to the same DFA state.
//!
//! Vector contents live in a dedicated arena. A vector that turns out to be
//! a duplicate is dropped again with `undo_last`, so only distinct vectors
//! occupy memory.

use smallvec::SmallVec;

use super::arena::{Addr, Arena, ArenaConfig};
use super::multistate::{MultiState, MultiStateArena};
use super::state::StateId;
use crate::error::{Error, Result};

/// Position of a vector in the index, in order of first insertion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct VectorId(u32);

impl VectorId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Sorted, deduplicated states plus the DFA state built for them.
#[derive(Clone, Copy, Debug)]
pub(crate) struct StateVector {
    addr: Addr,
    len: u16,
    pub dfa: StateId,
}

impl StateVector {
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }
}

#[derive(Default)]
struct TrieNode {
    /// Sorted by state for binary search.
    children: SmallVec<[(StateId, u32); 4]>,
    terminal: Option<VectorId>,
}

pub(crate) struct CanonicalIndex {
    nodes: Vec<TrieNode>,
    vectors: Vec<StateVector>,
    cells: Arena<StateId>,
}

impl CanonicalIndex {
    pub fn with_config(config: ArenaConfig) -> Self {
        Self {
            nodes: vec![TrieNode::default()],
            vectors: Vec::new(),
            cells: Arena::with_config(config),
        }
    }

    /// Number of distinct vectors.
    #[inline]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[inline]
    pub fn vector(&self, id: VectorId) -> &StateVector {
        &self.vectors[id.index()]
    }

    #[inline]
    pub fn set_dfa(&mut self, id: VectorId, dfa: StateId) {
        self.vectors[id.index()].dfa = dfa;
    }

    /// States of a vector in ascending order.
    pub fn states(&self, id: VectorId) -> &[StateId] {
        let v = &self.vectors[id.index()];
        self.cells.slice(v.addr, v.len())
    }

    /// Copy the elements of `set` into a new vector. The set iterates in
    /// ascending order, so the copy is sorted without a separate pass.
    pub fn vectorize(&mut self, sets: &MultiStateArena, set: &MultiState) -> Result<StateVector> {
        if set.is_empty() {
            return Err(Error::InvalidArgument("empty state set"));
        }
        let len = u16::try_from(set.len()).map_err(|_| Error::Overflow("state set too large"))?;
        let addr = self.cells.alloc_iter(set.len(), set.iter(sets))?;
        Ok(StateVector {
            addr,
            len,
            dfa: StateId::NONE,
        })
    }

    /// Register `vector`, which must be the most recent `vectorize` result.
    ///
    /// Returns the id of the equal vector already present and `false`, or
    /// the id of the newly registered one and `true`.
    pub fn canonicalize(&mut self, vector: StateVector) -> Result<(VectorId, bool)> {
        let mut node = 0usize;
        for i in 0..vector.len() {
            let state = self.cells[Addr::from_index(vector.addr.index() + i)];
            let children = &self.nodes[node].children;
            node = match children.binary_search_by_key(&state, |&(s, _)| s) {
                Ok(pos) => children[pos].1 as usize,
                Err(pos) => {
                    let child = self.nodes.len();
                    self.nodes.push(TrieNode::default());
                    self.nodes[node].children.insert(pos, (state, child as u32));
                    child
                }
            };
        }

        if let Some(existing) = self.nodes[node].terminal {
            self.cells.undo_last()?;
            return Ok((existing, false));
        }
        let id = VectorId(
            u32::try_from(self.vectors.len()).map_err(|_| Error::Overflow("too many state vectors"))?,
        );
        self.vectors.push(vector);
        self.nodes[node].terminal = Some(id);
        Ok((id, true))
    }

    /// `vectorize` followed by `canonicalize`.
    pub fn insert(&mut self, sets: &MultiStateArena, set: &MultiState) -> Result<(VectorId, bool)> {
        let vector = self.vectorize(sets, set)?;
        self.canonicalize(vector)
    }

    /// Look up a sorted state sequence.
    #[cfg(test)]
    pub fn find(&self, states: &[StateId]) -> Option<VectorId> {
        let mut node = 0usize;
        for state in states {
            let children = &self.nodes[node].children;
            let pos = children.binary_search_by_key(state, |&(s, _)| s).ok()?;
            node = children[pos].1 as usize;
        }
        self.nodes[node].terminal
    }
}
