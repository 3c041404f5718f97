use thiserror::Error;

use crate::automaton::StateId;

/// A malformed automaton. These errors are fatal for the call that produced them, a failed
/// minimization never hands out a partially rewritten automaton.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    /// A transition points at a state that does not exist.
    #[error("transition from {origin} on {symbol} leads to unknown state {target}")]
    DanglingTransition {
        /// The state the transition originates in.
        origin: StateId,
        /// The rendered symbol of the transition.
        symbol: String,
        /// The missing target.
        target: StateId,
    },
    /// The designated initial state is not (or no longer) part of the automaton.
    #[error("initial state {initial} is missing, {remaining} states remain after pruning")]
    MissingInitial {
        /// The id that was designated as initial state.
        initial: StateId,
        /// Number of states that survived pruning.
        remaining: usize,
    },
    /// An operation referenced a state id that is not part of the automaton.
    #[error("unknown state {0}")]
    UnknownState(StateId),
    /// Partition refinement did not reach a fixed point within its iteration budget.
    #[error("partition refinement did not stabilize after {iterations} iterations")]
    RefinementDiverged {
        /// The number of refinement passes that were performed.
        iterations: usize,
    },
}

/// Raised when no signature can be computed for a node. Diff producers react to this by
/// replacing the whole structure instead of attempting a partial patch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// A component node whose kind has no registered extractor.
    #[error("no signature extractor is registered for node kind `{kind}`")]
    UnrecognizedNode {
        /// The kind of the offending node.
        kind: String,
    },
}
