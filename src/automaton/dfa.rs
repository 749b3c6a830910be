//! Determinization, product automata, complement and minimization.
//!
//! All constructions share one subset construction that runs in two
//! phases:
//!
//! 1. Planning: explore the reachable sets of NFA states. Each set is
//!    canonicalized into a `StateVector`; its outgoing transitions come from
//!    a `RangeMap` that partitions the ranges of all member states. Sets,
//!    maps and vectors live in scratch arenas separate from the automaton.
//! 2. Emitting: allocate one DFA state per vector and patch the targets.
//!
//! A vector holds only the states that have range edges plus the end
//! states; epsilon-only states are dropped once the closure is taken, so
//! re-entering a set through a different epsilon path reaches the same
//! DFA state.
//!
//! An accepting vector without transitions (other than the start) becomes
//! the shared end state instead of a state of its own. Every other
//! accepting state gets an epsilon edge to the end state.

use log::debug;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use super::arena::ArenaConfig;
use super::automat::{link, Automaton, AutomatonArena};
use super::multistate::{MultiState, MultiStateArena};
use super::range_map::{RangeMap, RangeMapArena};
use super::state::{self, alloc_end_state, alloc_state, Cell, RangeEdge, StateArena, StateId, CHAR_MAX};
use super::state_vector::{CanonicalIndex, VectorId};
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Single,
    And,
    AndNot,
}

/// One DFA state before allocation.
struct Planned {
    id: VectorId,
    accepting: bool,
    edges: Vec<(u32, u32, VectorId)>,
}

/// Add every state reachable over epsilon edges to `set`.
pub(crate) fn closure(
    states: &StateArena,
    sets: &mut MultiStateArena,
    set: &mut MultiState,
) -> Result<()> {
    let mut stack: SmallVec<[StateId; 32]> = set.iter(sets).collect();
    while let Some(s) = stack.pop() {
        for target in state::empty_edges(states, s) {
            if set.add(sets, target)? {
                stack.push(target);
            }
        }
    }
    Ok(())
}

struct Construction<'a> {
    states: &'a StateArena,
    mode: Mode,
    end_a: StateId,
    end_b: StateId,
    /// States of the first operand of a product.
    a_states: FxHashSet<StateId>,
}

impl<'a> Construction<'a> {
    fn accepting(&self, members: &[StateId]) -> bool {
        let has = |s: StateId| members.binary_search(&s).is_ok();
        match self.mode {
            Mode::Single => has(self.end_a),
            Mode::And => has(self.end_a) && has(self.end_b),
            Mode::AndNot => has(self.end_a) && !has(self.end_b),
        }
    }

    /// False for sets that can never reach acceptance.
    fn keep(&self, sets: &MultiStateArena, set: &MultiState) -> bool {
        if self.mode == Mode::Single {
            return true;
        }
        let mut has_a = false;
        let mut has_b = false;
        for s in set.iter(sets) {
            if self.a_states.contains(&s) {
                has_a = true;
            } else {
                has_b = true;
            }
            if has_a && (has_b || self.mode == Mode::AndNot) {
                return true;
            }
        }
        false
    }

    /// The members of a closed set that decide its transitions and
    /// acceptance: states with range edges and the end states. Sets that
    /// differ only in epsilon-only states become the same DFA state.
    fn significant(&self, sets: &mut MultiStateArena, set: &MultiState) -> Result<MultiState> {
        let members: SmallVec<[StateId; 16]> = set.iter(sets).collect();
        let mut key = MultiState::new();
        for s in members {
            if s == self.end_a || s == self.end_b || state::nr_range_edges(self.states, s) > 0 {
                key.add(sets, s)?;
            }
        }
        Ok(key)
    }

    fn plan(&self, config: ArenaConfig, starts: &[StateId]) -> Result<(CanonicalIndex, Vec<Planned>)> {
        let mut sets = MultiStateArena::with_config(config.clone());
        let mut nodes = RangeMapArena::with_config(config.clone());
        let mut index = CanonicalIndex::with_config(config);

        let mut start = MultiState::new();
        for &s in starts {
            start.add(&mut sets, s)?;
        }
        closure(self.states, &mut sets, &mut start)?;
        let key = self.significant(&mut sets, &start)?;
        // a start that can neither move nor accept keeps its own identity
        let start = if key.is_empty() { start } else { key };
        let (start_id, _) = index.insert(&sets, &start)?;

        let mut queue = vec![start_id];
        let mut plan = Vec::new();
        let mut next = 0;
        while next < queue.len() {
            let id = queue[next];
            next += 1;
            let members: SmallVec<[StateId; 16]> = index.states(id).into();
            let sets_mark = sets.snapshot();
            let nodes_mark = nodes.snapshot();

            let mut map = RangeMap::new();
            for &s in &members {
                for edge in state::range_edges(self.states, s) {
                    map.add_range(&mut nodes, &mut sets, edge.from, edge.to)?;
                }
            }
            for &s in &members {
                for edge in state::range_edges(self.states, s) {
                    map.add_state(&mut nodes, &mut sets, edge.from, edge.to, edge.target)?;
                }
            }

            let mut pieces: Vec<(u32, u32, MultiState)> = Vec::with_capacity(map.len());
            pieces.extend(map.iter(&nodes));
            let mut edges = Vec::with_capacity(pieces.len());
            for (from, to, mut dest) in pieces {
                closure(self.states, &mut sets, &mut dest)?;
                let dest = self.significant(&mut sets, &dest)?;
                if dest.is_empty() || !self.keep(&sets, &dest) {
                    continue;
                }
                let (target, is_new) = index.insert(&sets, &dest)?;
                if is_new {
                    queue.push(target);
                }
                edges.push((from, to, target));
            }

            sets.restore(sets_mark)?;
            nodes.restore(nodes_mark)?;
            plan.push(Planned {
                id,
                accepting: self.accepting(&members),
                edges,
            });
        }
        Ok((index, plan))
    }
}

/// Allocate the planned DFA. Returns the list tail and the state count.
fn emit(states: &mut StateArena, index: &mut CanonicalIndex, plan: &[Planned]) -> Result<(StateId, usize)> {
    // plan[i] holds the vector with index i
    let alias: Vec<bool> = plan
        .iter()
        .enumerate()
        .map(|(i, p)| i != 0 && p.accepting && p.edges.is_empty())
        .collect();
    let resolve = |target: VectorId| (!alias[target.index()]).then_some(target);

    let end = alloc_end_state(states)?;
    let mut order = Vec::with_capacity(plan.len() + 1);
    let mut pending = Vec::with_capacity(plan.len());
    for (i, p) in plan.iter().enumerate() {
        if alias[i] {
            index.set_dfa(p.id, end);
            continue;
        }
        // adjacent pieces with the same target share one edge
        let mut merged: Vec<(u32, u32, Option<VectorId>)> = Vec::with_capacity(p.edges.len());
        for &(from, to, target) in &p.edges {
            let target = resolve(target);
            match merged.last_mut() {
                Some(last) if last.2 == target && last.1 + 1 == from => last.1 = to,
                _ => merged.push((from, to, target)),
            }
        }
        let to_end = [end];
        let empty: &[StateId] = if p.accepting { &to_end } else { &[] };
        let ranges: Vec<RangeEdge> = merged
            .iter()
            .map(|&(from, to, _)| RangeEdge {
                target: StateId::NONE,
                from,
                to,
            })
            .collect();
        let s = alloc_state(states, empty, &ranges)?;
        index.set_dfa(p.id, s);
        order.push(s);
        if i == 0 {
            order.push(end);
        }
        pending.push((s, merged));
    }

    for (s, merged) in pending {
        for (j, &(_, _, target)) in merged.iter().enumerate() {
            let target = target.map_or(end, |t| index.vector(t).dfa);
            state::set_range_target(states, s, j, target);
        }
    }

    let nr_states = order.len();
    Ok((link(states, &order), nr_states))
}

impl Automaton {
    /// Replace `self` by an equivalent deterministic automaton.
    pub fn determinize(&mut self) -> Result<()> {
        self.construct(None, Mode::Single)
    }

    /// Replace `self` by a deterministic automaton accepting the inputs
    /// accepted by both `self` and `other`.
    pub fn determinize_and(&mut self, other: &Automaton) -> Result<()> {
        self.construct(Some(other), Mode::And)
    }

    /// Replace `self` by a deterministic automaton accepting the inputs
    /// accepted by `self` but not by `other`.
    pub fn determinize_and_not(&mut self, other: &Automaton) -> Result<()> {
        self.construct(Some(other), Mode::AndNot)
    }

    /// Replace `self` by a deterministic automaton accepting every input
    /// `self` rejects.
    pub fn complement(&mut self) -> Result<()> {
        let arena = AutomatonArena::with_config(self.arena()?.config());
        let mut any = Automaton::matching_in(&arena, &[(0, CHAR_MAX)])?;
        any.repeat(false)?;
        any.determinize_and_not(self)?;
        *self = any;
        Ok(())
    }

    /// Replace `self` by the minimal deterministic automaton for its
    /// language (reverse, determinize, reverse, determinize).
    pub fn minimize(&mut self) -> Result<()> {
        let config = self.arena()?.config();
        let before = self.nr_states;
        let mut reversed = self.reverse_into(&AutomatonArena::with_config(config.clone()))?;
        reversed.determinize()?;
        let mut result = reversed.reverse_into(&AutomatonArena::with_config(config))?;
        drop(reversed);
        result.determinize()?;
        debug!("minimize: {} -> {} states", before, result.nr_states);
        *self = result;
        Ok(())
    }

    fn construct(&mut self, other: Option<&Automaton>, mode: Mode) -> Result<()> {
        let arena = self.arena()?.clone();
        let operand = other.map(|o| self.adopt(o)).transpose()?;
        let copied = match other {
            Some(o) => !arena.same(o.arena()?),
            None => false,
        };

        let (mut index, plan) = {
            let states = arena.borrow();
            let start_a = self.start_in(&states);
            let mut construction = Construction {
                states: &states,
                mode,
                end_a: self.end_in(&states),
                end_b: StateId::NONE,
                a_states: FxHashSet::default(),
            };
            let mut starts: SmallVec<[StateId; 2]> = SmallVec::new();
            starts.push(start_a);
            if let Some(b) = &operand {
                starts.push(b.start_in(&states));
                construction.end_b = b.end_in(&states);
                construction.a_states = self.state_ids(&states).into_iter().collect();
            }
            construction.plan(arena.config(), &starts)?
        };

        let users = 1 + usize::from(operand.is_some());
        let exclusive = arena.use_count() == users;
        let target = if exclusive {
            AutomatonArena::with_config(arena.config())
        } else {
            arena.clone()
        };
        let (last, nr_states) = target.transaction(|states| emit(states, &mut index, &plan))?;

        if !exclusive {
            let states = arena.borrow();
            let mut cells = self.nr_cells(&states);
            if let (true, Some(b)) = (copied, &operand) {
                cells += b.nr_cells(&states);
            }
            drop(states);
            arena
                .borrow_mut()
                .add_wasted(cells * std::mem::size_of::<Cell>());
        }

        debug!(
            "determinize ({:?}): {} nfa states -> {} dfa states ({} vectors)",
            mode,
            self.nr_states + operand.as_ref().map_or(0, |b| b.nr_states),
            nr_states,
            index.len()
        );
        drop(operand);
        *self = Automaton::from_parts(target, last, nr_states);
        Ok(())
    }
}
