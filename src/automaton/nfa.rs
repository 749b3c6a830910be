//! Running an automaton over input.
//!
//! The matcher simulates the automaton directly, so it works the same on
//! NFAs and DFAs. On first use the automaton's states are loaded into a
//! densely numbered `Graph`, cached until the automaton changes. Active
//! states are kept epsilon-closed in a pair of sparse sets sized to the
//! automaton; clearing one is O(1), so no per-character allocation
//! happens once the buffers are warm.

use super::automat::Automaton;
use super::fa_builders::Graph;
use super::sparse_set::Step;

/// Position of the start state in a loaded graph.
const START: usize = 0;
/// Position of the end state in a loaded graph.
const END: usize = 1;

/// Reusable scratch space for matching.
#[derive(Clone, Debug, Default)]
pub struct MatchBuffers {
    step: Step,
    stack: Vec<usize>,
}

impl MatchBuffers {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Automaton {
    /// The states numbered densely, start 0 and end 1.
    fn match_graph(&self) -> Option<&Graph> {
        if let Some(graph) = self.graph.get() {
            return Some(graph);
        }
        let arena = self.arena.as_ref()?;
        let graph = Graph::load(self, &arena.borrow()).ok()?;
        Some(self.graph.get_or_init(|| graph))
    }

    /// Length of the shortest (or, with `longest`, the longest) prefix of
    /// `input` the automaton accepts. `None` if no prefix is accepted or
    /// the automaton is free.
    pub fn find_match(&self, input: &[u32], longest: bool) -> Option<usize> {
        self.find_match_with(&mut MatchBuffers::new(), input, longest)
    }

    /// `find_match` with caller-provided buffers.
    pub fn find_match_with(&self, bufs: &mut MatchBuffers, input: &[u32], longest: bool) -> Option<usize> {
        let graph = self.match_graph()?;
        let MatchBuffers { step, stack } = bufs;
        step.fit(graph.len());
        stack.clear();
        step.current.insert_closed(graph, stack, START);

        let mut matched = None;
        if step.current.contains(END) {
            matched = Some(0);
            if !longest {
                return matched;
            }
        }

        for (i, &c) in input.iter().enumerate() {
            for s in step.current.iter() {
                for &(target, from, to) in &graph.ranges[s] {
                    if from <= c && c <= to {
                        step.next.insert_closed(graph, stack, target);
                    }
                }
            }
            step.advance();
            if step.current.is_empty() {
                break;
            }
            if step.current.contains(END) {
                matched = Some(i + 1);
                if !longest {
                    break;
                }
            }
        }
        matched
    }

    /// True if the automaton accepts all of `input`.
    pub fn is_match(&self, input: &[u32]) -> bool {
        self.find_match(input, true) == Some(input.len())
    }

    /// `find_match` over the code points of `input`. The result counts
    /// code points, not bytes.
    pub fn find_match_str(&self, input: &str, longest: bool) -> Option<usize> {
        let input: Vec<u32> = input.chars().map(u32::from).collect();
        self.find_match(&input, longest)
    }

    pub fn is_match_str(&self, input: &str) -> bool {
        let input: Vec<u32> = input.chars().map(u32::from).collect();
        self.is_match(&input)
    }
}
