use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, trace};

use crate::{
    error::StructuralError,
    math::{Map, Partition, Set},
    Automaton, Show, StateId, Symbol,
};

/// Identifies an [`EquivalenceClass`]. Class ids are dense and assigned in order of the
/// smallest member of each class, so the class containing the smallest state id is always `0`.
pub type ClassId = usize;

/// A maximal set of states that cannot be distinguished by any sequence of transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquivalenceClass {
    id: ClassId,
    members: BTreeSet<StateId>,
}

impl EquivalenceClass {
    /// The id of the class.
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// The states that make up the class.
    pub fn members(&self) -> &BTreeSet<StateId> {
        &self.members
    }

    /// The canonical representative, which is the smallest member.
    pub fn representative(&self) -> StateId {
        *self
            .members
            .first()
            .expect("equivalence classes are never empty")
    }

    /// Returns true if `state` belongs to the class.
    pub fn contains(&self, state: StateId) -> bool {
        self.members.contains(&state)
    }

    /// The number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false, classes are never empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Searches `classes` for the one that contains `state` and returns its id.
pub fn find_equivalence_class(state: StateId, classes: &[EquivalenceClass]) -> Option<ClassId> {
    classes
        .iter()
        .find(|class| class.contains(state))
        .map(EquivalenceClass::id)
}

/// The result of a run of the [`EquivalenceClassComputer`]: a partition of the considered
/// states into equivalence classes, together with a lookup from state to class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquivalenceClasses {
    classes: Vec<EquivalenceClass>,
    class_of: BTreeMap<StateId, ClassId>,
    iterations: usize,
}

impl EquivalenceClasses {
    fn from_partition(partition: Partition<StateId>, iterations: usize) -> Self {
        let classes: Vec<_> = partition
            .into_blocks()
            .into_iter()
            .enumerate()
            .map(|(id, members)| EquivalenceClass { id, members })
            .collect();
        let class_of = classes
            .iter()
            .flat_map(|class| class.members.iter().map(|q| (*q, class.id)))
            .collect();
        Self {
            classes,
            class_of,
            iterations,
        }
    }

    /// The classes, ordered by id.
    pub fn classes(&self) -> &[EquivalenceClass] {
        &self.classes
    }

    /// Returns the class with the given id.
    pub fn class(&self, id: ClassId) -> Option<&EquivalenceClass> {
        self.classes.get(id)
    }

    /// Returns the id of the class that `state` belongs to, or `None` if the state was not
    /// part of the computation.
    pub fn find_equivalence_class(&self, state: StateId) -> Option<ClassId> {
        self.class_of.get(&state).copied()
    }

    /// The mapping from every considered state to its class.
    pub fn class_map(&self) -> &BTreeMap<StateId, ClassId> {
        &self.class_of
    }

    /// Returns true if both states were considered and ended up in the same class.
    pub fn same_class(&self, left: StateId, right: StateId) -> bool {
        match (
            self.find_equivalence_class(left),
            self.find_equivalence_class(right),
        ) {
            (Some(l), Some(r)) => l == r,
            _ => false,
        }
    }

    /// The number of classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true if no state was considered.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// The number of refinement passes it took to reach the fixed point.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Iterates over the classes.
    pub fn iter(&self) -> std::slice::Iter<'_, EquivalenceClass> {
        self.classes.iter()
    }
}

impl<'a> IntoIterator for &'a EquivalenceClasses {
    type Item = &'a EquivalenceClass;
    type IntoIter = std::slice::Iter<'a, EquivalenceClass>;

    fn into_iter(self) -> Self::IntoIter {
        self.classes.iter()
    }
}

/// Computes the coarsest partition of (a subset of) the states of an automaton such that two
/// states share a block if and only if they agree on acceptance and, for every symbol of the
/// alphabet, their targets share a block.
///
/// The computation is the classic Moore refinement. It starts from the split into accepting
/// and rejecting states and then repeatedly splits every block by the *transition signature*
/// of its members, which is the sorted list of pairs `(symbol, block of target)`. Once a full
/// pass does not split anything, the partition is stable.
///
/// A missing transition is different from a transition into any block, so states only
/// agree on a symbol if both have no transition on it or both move into the same block.
/// Transitions on symbols outside of the alphabet and transitions to states that are not
/// considered are treated as missing.
#[derive(Debug, Clone)]
pub struct EquivalenceClassComputer<'a, S: Symbol, M> {
    automaton: &'a Automaton<S, M>,
    states: BTreeSet<StateId>,
    max_iterations: Option<usize>,
}

impl<'a, S: Symbol, M> EquivalenceClassComputer<'a, S, M> {
    /// Considers all states of `automaton`.
    pub fn new(automaton: &'a Automaton<S, M>) -> Self {
        Self {
            automaton,
            states: automaton.state_ids().collect(),
            max_iterations: None,
        }
    }

    /// Only considers the given states. Ids that do not belong to the automaton are dropped.
    pub fn restricted_to<I: IntoIterator<Item = StateId>>(mut self, states: I) -> Self {
        self.states = states
            .into_iter()
            .filter(|q| self.automaton.contains(*q))
            .collect();
        self
    }

    /// Overrides the bound on refinement passes. By default the number of considered states
    /// plus one is used, which a well-formed input never exceeds as every pass that does not
    /// reach the fixed point increases the number of blocks.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// The states that are considered.
    pub fn states(&self) -> &BTreeSet<StateId> {
        &self.states
    }

    fn transition_signature(
        &self,
        state: StateId,
        block_of: &Map<StateId, usize>,
    ) -> Vec<(&'a S, usize)> {
        let automaton: &'a Automaton<S, M> = self.automaton;
        let mut signature: Vec<_> = automaton
            .state(state)
            .into_iter()
            .flat_map(|q| q.transitions().iter())
            .filter_map(|(sym, target)| {
                if !automaton.alphabet().contains(sym) {
                    trace!(
                        "state {} has transition on {} outside of the alphabet",
                        state.show(),
                        sym.show()
                    );
                    return None;
                }
                block_of.get(target).map(|block| (sym, *block))
            })
            .collect();
        // transitions are stored ordered by symbol already, sorting keeps this independent of that
        signature.sort();
        signature
    }

    /// Runs the refinement and returns the resulting classes.
    pub fn compute(&self) -> Result<EquivalenceClasses, StructuralError> {
        let max_iterations = self.max_iterations.unwrap_or(self.states.len() + 1);

        let (accepting, rejecting): (Vec<StateId>, Vec<StateId>) = self
            .states
            .iter()
            .copied()
            .partition(|q| self.automaton.is_accepting(*q));
        let mut partition = Partition::new([accepting, rejecting]);

        let mut iterations = 0;
        loop {
            if iterations >= max_iterations {
                return Err(StructuralError::RefinementDiverged { iterations });
            }
            iterations += 1;

            let block_of: Map<StateId, usize> = partition
                .iter()
                .enumerate()
                .flat_map(|(i, block)| block.iter().map(move |q| (*q, i)))
                .collect();

            let mut refined: Vec<Vec<StateId>> = Vec::with_capacity(partition.size());
            for block in &partition {
                let mut splits: BTreeMap<Vec<(&S, usize)>, Vec<StateId>> = BTreeMap::new();
                for q in block {
                    splits
                        .entry(self.transition_signature(*q, &block_of))
                        .or_default()
                        .push(*q);
                }
                refined.extend(splits.into_values());
            }

            let refined = Partition::new(refined);
            trace!(
                "refinement pass {iterations} produced {} blocks from {}",
                refined.size(),
                partition.size()
            );
            if refined.size() == partition.size() {
                break;
            }
            partition = refined;
        }

        debug!(
            "partitioned {} states into {} classes in {iterations} passes",
            self.states.len(),
            partition.size()
        );
        Ok(EquivalenceClasses::from_partition(partition, iterations))
    }

    /// Decides whether the two states are equivalent. States with different acceptance are
    /// rejected right away, without running the refinement. States that are not considered
    /// or for which the refinement fails are never equivalent.
    pub fn are_states_equivalent(&self, left: StateId, right: StateId) -> bool {
        if !self.states.contains(&left) || !self.states.contains(&right) {
            return false;
        }
        if self.automaton.is_accepting(left) != self.automaton.is_accepting(right) {
            return false;
        }
        if left == right {
            return true;
        }
        self.compute()
            .map(|classes| classes.same_class(left, right))
            .unwrap_or(false)
    }

    /// Tries to find a shortest word on which exactly one of the two states leads to
    /// acceptance. A missing transition behaves like a move into a rejecting sink, so this
    /// compares the accepted languages. Returns `None` if the languages coincide.
    pub fn distinguishing_word(&self, left: StateId, right: StateId) -> Option<Vec<S>> {
        let automaton = self.automaton;
        let step = |q: Option<StateId>, sym: &S| {
            q.and_then(|q| automaton.successor(q, sym))
                .filter(|p| self.states.contains(p))
        };
        let accepts = |q: Option<StateId>| q.map(|q| automaton.is_accepting(q)).unwrap_or(false);

        let origin = (
            Some(left).filter(|q| self.states.contains(q)),
            Some(right).filter(|q| self.states.contains(q)),
        );
        let mut seen: Set<(Option<StateId>, Option<StateId>)> = Set::default();
        seen.insert(origin);
        let mut queue = VecDeque::from([(origin, vec![])]);

        while let Some(((l, r), word)) = queue.pop_front() {
            if accepts(l) != accepts(r) {
                return Some(word);
            }
            for sym in automaton.alphabet() {
                let next = (step(l, sym), step(r, sym));
                if seen.insert(next) {
                    let mut extended = word.clone();
                    extended.push(sym.clone());
                    queue.push_back((next, extended));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use crate::{prelude::*, tests::wiki_automaton};

    #[test_log::test]
    fn wiki_classes() {
        let aut = wiki_automaton();
        let classes = EquivalenceClassComputer::new(&aut).compute().unwrap();
        assert_eq!(classes.len(), 3);
        let members: Vec<Vec<StateId>> = classes
            .iter()
            .map(|c| c.members().iter().copied().collect())
            .collect();
        assert_eq!(members, vec![vec![0, 1], vec![2, 3, 4], vec![5]]);
        assert_eq!(classes.find_equivalence_class(3), Some(1));
        assert_eq!(find_equivalence_class(5, classes.classes()), Some(2));
        assert_eq!(find_equivalence_class(9, classes.classes()), None);
        assert_eq!(classes.class(1).map(|c| c.representative()), Some(2));
    }

    #[test]
    fn classes_partition_all_states() {
        let aut = wiki_automaton();
        let classes = EquivalenceClassComputer::new(&aut).compute().unwrap();
        let partition =
            math::Partition::new(classes.iter().map(|c| c.members().iter().copied()));
        assert!(partition.partitions(&aut.state_ids().collect::<Vec<_>>()));
        assert_eq!(classes.class_map().len(), aut.size());
    }

    #[test]
    fn accepting_states_without_transitions_merge() {
        // A and B are accepting dead ends, C moves to A
        let aut: Automaton = AutomatonBuilder::new()
            .with_alphabet(['x'])
            .with_accepting([true, true, false])
            .with_edges([(2, 'x', 0)])
            .into_automaton(2);
        let computer = EquivalenceClassComputer::new(&aut);
        assert!(computer.are_states_equivalent(0, 1));
        assert!(!computer.are_states_equivalent(0, 2));
        assert_eq!(computer.compute().unwrap().len(), 2);
    }

    #[test]
    fn transitions_outside_alphabet_count_as_missing() {
        let aut: Automaton = AutomatonBuilder::new()
            .with_alphabet(['a'])
            .with_accepting([false, false, true])
            .with_edges([(0, 'a', 0), (1, 'a', 1), (1, 'z', 2)])
            .into_automaton(0);
        let computer = EquivalenceClassComputer::new(&aut);
        assert!(computer.are_states_equivalent(0, 1));
        assert_eq!(computer.distinguishing_word(0, 1), None);
    }

    #[test]
    fn missing_transition_differs_from_present_one() {
        let aut: Automaton = AutomatonBuilder::new()
            .with_accepting([false, false, false])
            .with_edges([(0, 'a', 2), (2, 'a', 2)])
            .into_automaton(0);
        let computer = EquivalenceClassComputer::new(&aut);
        assert!(!computer.are_states_equivalent(0, 1));
        // neither accepts anything though
        assert_eq!(computer.distinguishing_word(0, 1), None);
    }

    #[test]
    fn acceptance_mismatch_short_circuits() {
        let aut = wiki_automaton();
        // a zero iteration budget makes every refinement fail, so a negative answer can only
        // come from the acceptance check
        let computer = EquivalenceClassComputer::new(&aut).with_max_iterations(0);
        assert!(computer.compute().is_err());
        assert!(!computer.are_states_equivalent(0, 2));
        assert!(computer.are_states_equivalent(2, 2));
    }

    #[test]
    fn iteration_guard_stops_refinement() {
        let aut = wiki_automaton();
        let result = EquivalenceClassComputer::new(&aut)
            .with_max_iterations(1)
            .compute();
        assert_eq!(
            result,
            Err(StructuralError::RefinementDiverged { iterations: 1 })
        );
        let classes = EquivalenceClassComputer::new(&aut).compute().unwrap();
        assert!(classes.iterations() <= aut.size() + 1);
    }

    #[test]
    fn restriction_ignores_other_states() {
        let aut = wiki_automaton();
        let computer = EquivalenceClassComputer::new(&aut).restricted_to([2, 3, 4, 5, 42]);
        assert_eq!(computer.states().len(), 4);
        let classes = computer.compute().unwrap();
        assert_eq!(classes.len(), 2);
        assert_eq!(classes.find_equivalence_class(0), None);
        assert!(!computer.are_states_equivalent(0, 1));
    }

    #[test]
    fn distinguishing_words_are_shortest() {
        let aut = wiki_automaton();
        let computer = EquivalenceClassComputer::new(&aut);
        assert_eq!(computer.distinguishing_word(0, 1), None);
        assert_eq!(computer.distinguishing_word(0, 2), Some(vec![]));
        assert_eq!(computer.distinguishing_word(0, 5), Some(vec!['b']));
    }
}
