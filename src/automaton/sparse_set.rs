//! Sets of active states with O(1) clear.
//!
//! Based on: https://research.swtch.com/sparse
//!
//! The matcher works on the dense numbering of a loaded `Graph` (start 0,
//! end 1), so a set needs one slot per state of the automaton being run,
//! independent of how large its arena is.

use super::fa_builders::Graph;

/// The states active at one input position.
///
/// Membership, insertion and clearing are O(1); iteration follows
/// insertion order.
#[derive(Clone, Debug, Default)]
pub(crate) struct ActiveSet {
    len: usize,
    /// Members in insertion order.
    dense: Vec<u32>,
    /// `sparse[s]` is the position of `s` in `dense` if `s` is a member.
    sparse: Vec<u32>,
}

impl ActiveSet {
    pub fn with_states(nr_states: usize) -> Self {
        ActiveSet {
            len: 0,
            dense: vec![0; nr_states],
            sparse: vec![0; nr_states],
        }
    }

    /// Make room for `nr_states` states. Clears the set; never shrinks.
    pub fn fit(&mut self, nr_states: usize) {
        self.clear();
        if self.sparse.len() < nr_states {
            self.dense.resize(nr_states, 0);
            self.sparse.resize(nr_states, 0);
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.sparse.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn contains(&self, s: usize) -> bool {
        let pos = self.sparse[s] as usize;
        pos < self.len && self.dense[pos] as usize == s
    }

    /// Returns false if `s` was already active.
    #[inline]
    pub fn insert(&mut self, s: usize) -> bool {
        if self.contains(s) {
            return false;
        }
        self.dense[self.len] = s as u32;
        self.sparse[s] = self.len as u32;
        self.len += 1;
        true
    }

    /// Activate `s` and every state reachable from it over epsilon edges.
    pub fn insert_closed(&mut self, graph: &Graph, stack: &mut Vec<usize>, s: usize) {
        if !self.insert(s) {
            return;
        }
        stack.push(s);
        while let Some(s) = stack.pop() {
            for &target in &graph.empty[s] {
                if self.insert(target) {
                    stack.push(target);
                }
            }
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.dense[..self.len].iter().map(|&s| s as usize)
    }
}

/// Active states before and after the current input position.
#[derive(Clone, Debug, Default)]
pub(crate) struct Step {
    pub current: ActiveSet,
    pub next: ActiveSet,
}

impl Step {
    pub fn fit(&mut self, nr_states: usize) {
        self.current.fit(nr_states);
        self.next.fit(nr_states);
    }

    /// Move to the next position: `next` becomes current and is emptied.
    #[inline]
    pub fn advance(&mut self) {
        std::mem::swap(&mut self.current, &mut self.next);
        self.next.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 0 -eps-> 2 -eps-> 3, 3 -eps-> 2, 1 isolated
    fn chain() -> Graph {
        let mut graph = Graph::with_len(4);
        graph.empty[0].push(2);
        graph.empty[2].push(3);
        graph.empty[3].push(2);
        graph
    }

    #[test]
    fn test_insert_and_contains() {
        let mut set = ActiveSet::with_states(16);
        assert!(set.is_empty());
        assert!(set.insert(12));
        assert!(set.insert(0));
        assert!(!set.insert(12));
        assert!(set.contains(0));
        assert!(set.contains(12));
        assert!(!set.contains(5));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![12, 0]);
    }

    #[test]
    fn test_clear_ignores_stale_entries() {
        let mut set = ActiveSet::with_states(8);
        set.insert(3);
        set.insert(7);
        set.clear();
        assert!(!set.contains(3));
        assert!(!set.contains(7));

        // 7 now sits at dense[0], 3's stale sparse slot must not match
        set.insert(7);
        assert!(set.contains(7));
        assert!(!set.contains(3));
    }

    #[test]
    fn test_insert_closed_follows_epsilon_cycles() {
        let graph = chain();
        let mut set = ActiveSet::with_states(graph.len());
        let mut stack = Vec::new();
        set.insert_closed(&graph, &mut stack, 0);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 2, 3]);
        assert!(!set.contains(1));
        assert!(stack.is_empty());

        // already active: nothing is expanded again
        set.insert_closed(&graph, &mut stack, 2);
        assert_eq!(set.iter().count(), 3);
    }

    #[test]
    fn test_advance_and_fit() {
        let mut step = Step::default();
        step.fit(4);
        step.current.insert(1);
        step.next.insert(2);
        step.advance();
        assert!(step.current.contains(2));
        assert!(!step.current.contains(1));
        assert!(step.next.is_empty());

        step.fit(100);
        assert!(step.current.is_empty());
        assert!(step.current.insert(99));

        // fitting a smaller automaton keeps the larger buffers
        step.fit(2);
        assert!(step.current.is_empty());
        assert!(step.current.insert(1));
    }
}
