use std::collections::BTreeSet;

use crate::{automaton::State, Automaton, StateId, Symbol};

/// Helper struct for the construction of automata. It stores a list of edges, a list of
/// acceptance flags and, optionally, per-state metadata.
///
/// # Example
///
/// We want to create an automaton with two states 0 and 1 over the alphabet `['a', 'b']`,
/// where reading `b` toggles between the states and `a` loops. State 0 should be initial and
/// accepting, state 1 should be rejecting. This can be done as follows
/// ```
/// use automata_memo::prelude::*;
///
/// let aut: Automaton = AutomatonBuilder::new()
///     .with_accepting([true, false]) // flags given in the order of the states
///     .with_edges([(0, 'a', 0), (0, 'b', 1), (1, 'a', 1), (1, 'b', 0)])
///     .into_automaton(0); // 0 is the initial state
/// assert_eq!(aut.size(), 2);
/// ```
pub struct AutomatonBuilder<S: Symbol = char, M = ()> {
    alphabet: Option<BTreeSet<S>>,
    accepting: Vec<bool>,
    edges: Vec<(StateId, S, StateId)>,
    metadata: Vec<M>,
}

impl<S: Symbol> AutomatonBuilder<S, ()> {
    /// Creates an empty builder whose states carry no metadata.
    pub fn new() -> Self {
        Self {
            alphabet: None,
            accepting: vec![],
            edges: vec![],
            metadata: vec![],
        }
    }
}

impl<S: Symbol> Default for AutomatonBuilder<S, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Symbol, M> AutomatonBuilder<S, M> {
    /// Fixes the alphabet. Without this, the alphabet consists of precisely the symbols that
    /// appear on some edge.
    pub fn with_alphabet<I: IntoIterator<Item = S>>(mut self, alphabet: I) -> Self {
        self.alphabet = Some(alphabet.into_iter().collect());
        self
    }

    /// Sets the acceptance flags, the `i`-th flag belongs to state `i`. States without a
    /// flag are rejecting.
    pub fn with_accepting<I: IntoIterator<Item = bool>>(mut self, accepting: I) -> Self {
        self.accepting = accepting.into_iter().collect();
        self
    }

    /// Adds the given edges, each of the form `(source, symbol, target)`.
    pub fn with_edges<I: IntoIterator<Item = (StateId, S, StateId)>>(mut self, edges: I) -> Self {
        self.edges.extend(edges);
        self
    }

    /// Attaches metadata to the states, the `i`-th item belongs to state `i`. States without
    /// an item receive the default value.
    pub fn with_metadata<N, I: IntoIterator<Item = N>>(self, metadata: I) -> AutomatonBuilder<S, N> {
        AutomatonBuilder {
            alphabet: self.alphabet,
            accepting: self.accepting,
            edges: self.edges,
            metadata: metadata.into_iter().collect(),
        }
    }

    /// Consumes the builder and produces an [`Automaton`] with the given initial state. A state
    /// is created for every id that is mentioned by a flag, an edge or a metadata item, so
    /// the result never contains dangling transitions.
    pub fn into_automaton(self, initial: StateId) -> Automaton<S, M>
    where
        M: Default,
    {
        let size = self
            .edges
            .iter()
            .map(|(p, _, q)| (*p).max(*q) as usize + 1)
            .chain([self.accepting.len(), self.metadata.len()])
            .max()
            .unwrap_or(0);

        let alphabet = self
            .alphabet
            .unwrap_or_else(|| self.edges.iter().map(|(_, sym, _)| sym.clone()).collect());

        let mut metadata = self.metadata.into_iter();
        let states: Vec<State<S, M>> = (0..size)
            .map(|id| {
                State::new(
                    id as StateId,
                    self.accepting.get(id).copied().unwrap_or(false),
                    metadata.next().unwrap_or_default(),
                )
            })
            .collect();

        let mut automaton = Automaton {
            states,
            alphabet,
            initial,
        };
        for (source, sym, target) in self.edges {
            automaton.states[source as usize]
                .transitions
                .insert(sym, target);
        }
        automaton
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[test]
    fn builder_fills_in_missing_states() {
        let aut: Automaton = AutomatonBuilder::new()
            .with_accepting([true])
            .with_edges([(0, 'a', 3)])
            .into_automaton(0);
        assert_eq!(aut.size(), 4);
        assert!(aut.is_accepting(0));
        assert!(!aut.is_accepting(3));
        assert!(aut.validate().is_ok());
        assert_eq!(aut.alphabet().len(), 1);
    }

    #[test]
    fn builder_attaches_metadata() {
        let aut = AutomatonBuilder::new()
            .with_edges([(0, 'a', 1)])
            .with_metadata(["idle".to_string()])
            .into_automaton(0);
        assert_eq!(aut.state(0).unwrap().metadata(), "idle");
        assert_eq!(aut.state(1).unwrap().metadata(), "");
    }
}
