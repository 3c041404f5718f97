use std::collections::{BTreeSet, VecDeque};

use bit_set::BitSet;

use crate::{Automaton, StateId, Symbol};

/// Allows iterating over the states that are reachable from some origin, in breadth-first
/// order. Only transitions on symbols of the alphabet are followed, and transitions to
/// states that do not exist are skipped.
#[derive(Debug, Clone)]
pub struct ReachableStates<'a, S: Symbol, M> {
    automaton: &'a Automaton<S, M>,
    seen: BitSet,
    queue: VecDeque<StateId>,
}

impl<'a, S: Symbol, M> ReachableStates<'a, S, M> {
    /// Starts a breadth-first search in `origin`. If `origin` does not exist, the iterator is empty.
    pub fn new(automaton: &'a Automaton<S, M>, origin: StateId) -> Self {
        let mut seen = BitSet::with_capacity(automaton.size());
        let mut queue = VecDeque::new();
        if automaton.contains(origin) {
            seen.insert(origin as usize);
            queue.push_back(origin);
        }
        Self {
            automaton,
            seen,
            queue,
        }
    }
}

impl<'a, S: Symbol, M> Iterator for ReachableStates<'a, S, M> {
    type Item = StateId;

    fn next(&mut self) -> Option<Self::Item> {
        let q = self.queue.pop_front()?;
        for (_, p) in self.automaton.transitions_within_alphabet(q) {
            if self.automaton.contains(p) && self.seen.insert(p as usize) {
                self.queue.push_back(p);
            }
        }
        Some(q)
    }
}

/// Computes the states from which an accepting state can be reached by a backwards search
/// that starts in all accepting states at once.
pub(super) fn live_states<S: Symbol, M>(automaton: &Automaton<S, M>) -> BTreeSet<StateId> {
    let mut predecessors: Vec<Vec<StateId>> = vec![vec![]; automaton.size()];
    for q in automaton.state_ids() {
        for (_, p) in automaton.transitions_within_alphabet(q) {
            if let Some(preds) = predecessors.get_mut(p as usize) {
                preds.push(q);
            }
        }
    }

    let mut seen = BitSet::with_capacity(automaton.size());
    let mut queue: VecDeque<StateId> = automaton
        .states()
        .filter(|q| q.is_accepting())
        .map(|q| q.id())
        .collect();
    for q in &queue {
        seen.insert(*q as usize);
    }

    while let Some(q) = queue.pop_front() {
        for p in &predecessors[q as usize] {
            if seen.insert(*p as usize) {
                queue.push_back(*p);
            }
        }
    }

    seen.iter().map(|q| q as StateId).collect()
}
