use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use owo_colors::OwoColorize;
use tracing::trace;

use crate::{error::StructuralError, Show, Symbol};

mod builder;
pub use builder::AutomatonBuilder;

mod reachable;
pub use reachable::ReachableStates;

/// Index of a state in an [`Automaton`]. Ids are handed out in the order in which states are
/// added and double as positions in the underlying arena.
pub type StateId = u32;

/// A single state of an [`Automaton`]. Besides its id, a state knows whether it is accepting
/// and where its outgoing transitions lead. A symbol that does not appear in the transition
/// map simply has no transition.
///
/// The metadata `M` is a back-reference to whatever the state was built from. It is carried
/// along but never inspected, in particular it does not take part in equality.
#[derive(Clone)]
pub struct State<S: Symbol = char, M = ()> {
    id: StateId,
    accepting: bool,
    transitions: BTreeMap<S, StateId>,
    metadata: M,
}

impl<S: Symbol, M> State<S, M> {
    pub(crate) fn new(id: StateId, accepting: bool, metadata: M) -> Self {
        Self {
            id,
            accepting,
            transitions: BTreeMap::new(),
            metadata,
        }
    }

    /// The id of the state.
    pub fn id(&self) -> StateId {
        self.id
    }

    /// Returns true if the state is accepting.
    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    /// Marks the state as accepting or rejecting.
    pub fn set_accepting(&mut self, accepting: bool) {
        self.accepting = accepting;
    }

    /// The outgoing transitions, ordered by symbol.
    pub fn transitions(&self) -> &BTreeMap<S, StateId> {
        &self.transitions
    }

    /// Returns the target of the transition on `symbol`, if there is one. This does not
    /// consult the alphabet, see [`Automaton::successor`] for that.
    pub fn transition(&self, symbol: &S) -> Option<StateId> {
        self.transitions.get(symbol).copied()
    }

    /// A reference to the opaque metadata.
    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    /// A mutable reference to the opaque metadata.
    pub fn metadata_mut(&mut self) -> &mut M {
        &mut self.metadata
    }
}

impl<S: Symbol, M> PartialEq for State<S, M> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.accepting == other.accepting
            && self.transitions == other.transitions
    }
}

impl<S: Symbol, M> Eq for State<S, M> {}

impl<S: Symbol, M> std::fmt::Debug for State<S, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{} {{{}}}",
            self.id.show(),
            self.accepting.show(),
            self.transitions
                .iter()
                .map(|(sym, target)| format!("{} -> {}", sym.show(), target.show()))
                .join(", ")
        )
    }
}

/// A finite automaton over symbols of type `S`, whose states carry metadata of type `M`.
///
/// States live in an arena and are addressed by their [`StateId`], so nothing about the
/// automaton depends on object identity. The alphabet is kept explicitly: transitions on a
/// symbol outside of it may be stored, but they are treated as absent by every algorithm
/// in this crate.
///
/// An automaton is well-formed if every transition target exists and the initial state
/// exists, which is checked by [`Automaton::validate`].
#[derive(Clone)]
pub struct Automaton<S: Symbol = char, M = ()> {
    states: Vec<State<S, M>>,
    alphabet: BTreeSet<S>,
    initial: StateId,
}

impl<S: Symbol, M> Automaton<S, M> {
    /// Creates an automaton without any states over the given alphabet. The initial state
    /// defaults to `0`, which only becomes valid once a state has been added.
    pub fn new<I: IntoIterator<Item = S>>(alphabet: I) -> Self {
        Self {
            states: vec![],
            alphabet: alphabet.into_iter().collect(),
            initial: 0,
        }
    }

    /// The set of symbols in use.
    pub fn alphabet(&self) -> &BTreeSet<S> {
        &self.alphabet
    }

    /// Adds `symbol` to the alphabet, returns false if it was already present.
    pub fn add_symbol(&mut self, symbol: S) -> bool {
        self.alphabet.insert(symbol)
    }

    /// Adds a new state and returns its id.
    pub fn add_state(&mut self, accepting: bool, metadata: M) -> StateId {
        let id = self.states.len() as StateId;
        self.states.push(State::new(id, accepting, metadata));
        id
    }

    /// Inserts a transition from `from` on `symbol` to `to` and returns the previous target,
    /// if any. The target is not checked here, a dangling target is reported by
    /// [`Automaton::validate`].
    pub fn add_transition(
        &mut self,
        from: StateId,
        symbol: S,
        to: StateId,
    ) -> Result<Option<StateId>, StructuralError> {
        let state = self
            .state_mut(from)
            .ok_or(StructuralError::UnknownState(from))?;
        Ok(state.transitions.insert(symbol, to))
    }

    /// Removes the transition from `from` on `symbol` and returns its target.
    pub fn remove_transition(&mut self, from: StateId, symbol: &S) -> Option<StateId> {
        self.state_mut(from)?.transitions.remove(symbol)
    }

    /// The designated initial state.
    pub fn initial(&self) -> StateId {
        self.initial
    }

    /// Designates `initial` as the initial state. Whether it exists is checked by
    /// [`Automaton::validate`].
    pub fn set_initial(&mut self, initial: StateId) {
        self.initial = initial;
    }

    /// Returns the state with the given id.
    pub fn state(&self, id: StateId) -> Option<&State<S, M>> {
        self.states.get(id as usize)
    }

    /// Returns a mutable reference to the state with the given id.
    pub fn state_mut(&mut self, id: StateId) -> Option<&mut State<S, M>> {
        self.states.get_mut(id as usize)
    }

    /// Iterates over all states in order of their ids.
    pub fn states(&self) -> std::slice::Iter<'_, State<S, M>> {
        self.states.iter()
    }

    /// Iterates over the ids of all states.
    pub fn state_ids(&self) -> impl Iterator<Item = StateId> + '_ {
        self.states.iter().map(State::id)
    }

    /// Returns true if a state with the given id exists.
    pub fn contains(&self, id: StateId) -> bool {
        (id as usize) < self.states.len()
    }

    /// The number of states.
    pub fn size(&self) -> usize {
        self.states.len()
    }

    /// Returns true if there are no states at all.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Returns true if the state `id` exists and is accepting.
    pub fn is_accepting(&self, id: StateId) -> bool {
        self.state(id).map(State::is_accepting).unwrap_or(false)
    }

    /// Returns the target of the transition from `from` on `symbol`. Symbols that are not
    /// part of the alphabet have no transition, even if one is stored.
    pub fn successor(&self, from: StateId, symbol: &S) -> Option<StateId> {
        if !self.alphabet.contains(symbol) {
            trace!("ignoring symbol {} outside of the alphabet", symbol.show());
            return None;
        }
        self.state(from)?.transition(symbol)
    }

    /// Iterates over the transitions of `from` whose symbol is part of the alphabet.
    pub fn transitions_within_alphabet(
        &self,
        from: StateId,
    ) -> impl Iterator<Item = (&S, StateId)> + '_ {
        self.state(from)
            .into_iter()
            .flat_map(|state| state.transitions.iter())
            .filter(|(sym, _)| self.alphabet.contains(*sym))
            .map(|(sym, target)| (sym, *target))
    }

    /// Checks that every transition target exists and that the initial state exists.
    pub fn validate(&self) -> Result<(), StructuralError> {
        for state in &self.states {
            for (sym, target) in &state.transitions {
                if !self.contains(*target) {
                    return Err(StructuralError::DanglingTransition {
                        origin: state.id,
                        symbol: sym.show(),
                        target: *target,
                    });
                }
            }
        }
        if !self.contains(self.initial) {
            return Err(StructuralError::MissingInitial {
                initial: self.initial,
                remaining: self.size(),
            });
        }
        Ok(())
    }

    /// Runs `word` from the initial state and returns the reached state. If some symbol has no
    /// transition, the run fails and `None` is returned.
    pub fn run<'a, W>(&self, word: W) -> Option<StateId>
    where
        S: 'a,
        W: IntoIterator<Item = &'a S>,
    {
        self.run_from(self.initial, word)
    }

    /// Runs `word` starting in `origin` and returns the reached state.
    pub fn run_from<'a, W>(&self, origin: StateId, word: W) -> Option<StateId>
    where
        S: 'a,
        W: IntoIterator<Item = &'a S>,
    {
        if !self.contains(origin) {
            return None;
        }
        word.into_iter()
            .try_fold(origin, |state, sym| self.successor(state, sym))
    }

    /// Returns true if running `word` from the initial state ends in an accepting state. A
    /// failed run rejects.
    pub fn accepts<'a, W>(&self, word: W) -> bool
    where
        S: 'a,
        W: IntoIterator<Item = &'a S>,
    {
        self.run(word)
            .map(|reached| self.is_accepting(reached))
            .unwrap_or(false)
    }

    /// Returns an iterator over the states that can be reached from `origin`, in breadth-first order.
    pub fn reachable_from(&self, origin: StateId) -> ReachableStates<'_, S, M> {
        ReachableStates::new(self, origin)
    }

    /// Returns the set of states from which some accepting state can be reached.
    pub fn live_states(&self) -> BTreeSet<StateId> {
        reachable::live_states(self)
    }

    /// Relabels the metadata of every state through `f`.
    pub fn map_metadata<N, F>(self, mut f: F) -> Automaton<S, N>
    where
        F: FnMut(StateId, M) -> N,
    {
        Automaton {
            states: self
                .states
                .into_iter()
                .map(|state| State {
                    id: state.id,
                    accepting: state.accepting,
                    transitions: state.transitions,
                    metadata: f(state.id, state.metadata),
                })
                .collect(),
            alphabet: self.alphabet,
            initial: self.initial,
        }
    }

    /// Returns a string representation of the transition table, one row per state and one
    /// column per symbol of the alphabet. The initial state is marked with an arrow, accepting
    /// states are printed in bold.
    pub fn transition_table(&self) -> String {
        let mut builder = tabled::builder::Builder::default();
        builder.push_record(
            std::iter::once("State".to_string()).chain(self.alphabet.iter().map(Show::show)),
        );
        for state in &self.states {
            let label = format!(
                "{}{}",
                if state.id == self.initial { "→ " } else { "" },
                state.id.show()
            );
            let mut row = vec![if state.accepting {
                label.bold().to_string()
            } else {
                label
            }];
            for sym in &self.alphabet {
                row.push(
                    state
                        .transition(sym)
                        .map(|target| target.show())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
            builder.push_record(row);
        }
        builder
            .build()
            .with(tabled::settings::Style::rounded())
            .to_string()
    }
}

impl<S: Symbol, M> PartialEq for Automaton<S, M> {
    fn eq(&self, other: &Self) -> bool {
        self.initial == other.initial
            && self.alphabet == other.alphabet
            && self.states == other.states
    }
}

impl<S: Symbol, M> Eq for Automaton<S, M> {}

impl<S: Symbol, M> std::fmt::Debug for Automaton<S, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.transition_table())
    }
}
