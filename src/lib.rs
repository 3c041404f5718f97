//! Minimization of finite state machines and signature-keyed memoization of the patches
//! that are computed between structural states.
//!
//! The crate is organized around two cooperating halves. The first one works on an
//! [`Automaton`], which is an arena of states indexed by [`StateId`]. Each state carries
//! an accepting flag, a map from symbols to target states and some opaque metadata which
//! links it back to whatever domain object it was built from. The [`equivalence`] module
//! computes the coarsest partition of the states into behaviourally equivalent classes using
//! Moore-style partition refinement, and the [`minimization`] module turns such a partition
//! into a minimized automaton, together with [`minimization::Metrics`] and a mapping from
//! the original state ids to the classes they ended up in.
//!
//! The second half is concerned with caching. A [`signature::SignatureGenerator`] computes
//! a deterministic [`Signature`] for a structural [`signature::Node`] (a DOM-like element
//! tree or a stylesheet) or for a state of an automaton. Pairs of signatures are used as
//! keys into a [`TransitionCache`], which remembers the patch sequence that transforms one
//! structure into the other. The [`diff`] module glues these together: a
//! [`diff::CachedDiffer`] signs both structures, consults the cache and only invokes the
//! underlying [`diff::Differ`] on a miss. Whenever the minimizer proves two signatures to be
//! equivalent, the cache can be consolidated so that both resolve to the same entry.
//!
//! Everything in here is synchronous and single-threaded. A [`TransitionCache`] is meant to
//! be driven from a single update loop; if multiple streams of updates need to share one,
//! it has to be wrapped in a mutex or sharded.
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// The prelude is supposed to make using this package easier. Including everything, i.e.
/// `use automata_memo::prelude::*;` should be enough to use the package.
pub mod prelude {
    pub use super::{
        automaton::{Automaton, AutomatonBuilder, State, StateId},
        cache::{
            CacheConfig, CacheConsistencyWarning, CacheEntry, CacheStats, Clock, ManualClock,
            MergeReport, Patches, SystemClock, TransitionCache,
        },
        diff::{
            dom::{DomDiffer, DomPatch},
            stylesheet::{StylePatch, StylesheetDiffer},
            CachedDiffer, DiffOrigin, DiffOutcome, Differ,
        },
        equivalence::{
            find_equivalence_class, ClassId, EquivalenceClass, EquivalenceClassComputer,
            EquivalenceClasses,
        },
        error::{SignatureError, StructuralError},
        math,
        minimization::{
            Metrics, Minimization, MinimizerOptions, RewireState, StateMachineMinimizer,
            StateSource,
        },
        signature::{ComponentExtractor, Node, Signature, SignatureGenerator, SignatureOptions},
        Show, Symbol,
    };
}

/// Contains definitions of mathematical objects (sets, maps and partitions) that are used
/// throughout the crate.
pub mod math;
pub use math::{Map, Set};

/// The error types of the crate.
pub mod error;

/// Defines the arena-backed [`Automaton`] together with a builder and reachability analysis.
pub mod automaton;
pub use automaton::{Automaton, StateId};

/// Computes behavioural equivalence classes of automaton states through partition refinement.
pub mod equivalence;

/// Orchestrates the minimization of automata and maps the result back onto domain objects.
pub mod minimization;

/// Deterministic structural fingerprints of nodes and automaton states.
pub mod signature;
pub use signature::Signature;

/// Memoization of patch sequences keyed by pairs of signatures.
pub mod cache;
pub use cache::TransitionCache;

/// Diff producers and the cache-aware orchestration around them.
pub mod diff;

/// Implements the generation of random automata. This is feature gated behind the `random` feature.
#[cfg(feature = "random")]
pub mod random;

use std::{fmt::Debug, hash::Hash};

/// A symbol is anything that can label a transition. Symbols need to be totally ordered, as
/// every place which derives something from a collection of symbols sorts them first.
pub trait Symbol: Clone + Eq + Ord + Hash + Debug + Show {}

impl<T: Clone + Eq + Ord + Hash + Debug + Show> Symbol for T {}

/// Helper trait which can be used to display states, symbols and such.
pub trait Show {
    /// Returns a human readable representation of `self`. For a state index this should be
    /// for example q0, q1, ... and for a symbol simply the symbol itself. The representation
    /// also ends up in signatures, so it has to be deterministic.
    fn show(&self) -> String;

    /// Show a collection of the thing, for a collection of states this should be {q0, q1, q2, ...}.
    fn show_collection<'a, I>(iter: I) -> String
    where
        Self: 'a,
        I: IntoIterator<Item = &'a Self>,
    {
        format!(
            "{{{}}}",
            itertools::Itertools::join(&mut iter.into_iter().map(|x| x.show()), ", ")
        )
    }
}

impl Show for char {
    fn show(&self) -> String {
        self.to_string()
    }
}

impl Show for String {
    fn show(&self) -> String {
        self.clone()
    }
}

impl Show for u32 {
    fn show(&self) -> String {
        format!("q{self}")
    }
}

impl Show for usize {
    fn show(&self) -> String {
        self.to_string()
    }
}

impl Show for bool {
    fn show(&self) -> String {
        match self {
            true => "+",
            false => "-",
        }
        .to_string()
    }
}

impl<S: Show> Show for Vec<S> {
    fn show(&self) -> String {
        S::show_collection(self.iter())
    }
}

impl<S: Show> Show for &S {
    fn show(&self) -> String {
        S::show(*self)
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    /// The automaton from the wikipedia article on DFA minimization. States 2, 3 and 4 as
    /// well as 0 and 1 are equivalent, and 5 is a rejecting sink.
    pub fn wiki_automaton() -> Automaton {
        AutomatonBuilder::new()
            .with_accepting([false, false, true, true, true, false])
            .with_edges([
                (0, 'a', 1),
                (0, 'b', 2),
                (1, 'a', 0),
                (1, 'b', 3),
                (2, 'a', 4),
                (2, 'b', 5),
                (3, 'a', 4),
                (3, 'b', 5),
                (4, 'a', 4),
                (4, 'b', 5),
                (5, 'a', 5),
                (5, 'b', 5),
            ])
            .into_automaton(0)
    }

    /// All words over `alphabet` of length at most `max_len`, shortest first.
    pub fn words_up_to<S: Symbol>(alphabet: &[S], max_len: usize) -> Vec<Vec<S>> {
        let mut out = vec![vec![]];
        let mut frontier: Vec<Vec<S>> = vec![vec![]];
        for _ in 0..max_len {
            let mut next = vec![];
            for word in &frontier {
                for sym in alphabet {
                    let mut extended = word.clone();
                    extended.push(sym.clone());
                    next.push(extended);
                }
            }
            out.extend(next.iter().cloned());
            frontier = next;
        }
        out
    }

    #[test]
    fn show_collections() {
        assert_eq!(vec![0u32, 2].show(), "{q0, q2}");
        assert_eq!(true.show(), "+");
        assert_eq!('a'.show(), "a");
    }

    #[test]
    fn words_are_enumerated_by_length() {
        let words = words_up_to(&['a', 'b'], 2);
        assert_eq!(words.len(), 1 + 2 + 4);
        assert!(words[0].is_empty());
        assert_eq!(words[3], vec!['a', 'a']);
    }
}
