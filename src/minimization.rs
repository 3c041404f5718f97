use std::{
    collections::{BTreeMap, BTreeSet},
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{
    equivalence::{ClassId, EquivalenceClassComputer, EquivalenceClasses},
    error::StructuralError,
    math::Bijection,
    Automaton, StateId, Symbol,
};

/// Anything that carries a state machine which can be minimized. The implementor converts
/// its live objects into an [`Automaton`], using the metadata to point back at them.
pub trait StateSource {
    /// The symbols that label transitions.
    type Symbol: Symbol;
    /// Back-reference from an automaton state to the domain object it was built from.
    type Meta: Clone;

    /// Builds the automaton. State ids have to be assigned in a deterministic order.
    fn to_automaton(&self) -> Automaton<Self::Symbol, Self::Meta>;
}

impl<S: Symbol, M: Clone> StateSource for Automaton<S, M> {
    type Symbol = S;
    type Meta = M;

    fn to_automaton(&self) -> Automaton<S, M> {
        self.clone()
    }
}

/// Domain states that can be rewired after minimization. A rewired state takes the id of the
/// class it represents and its transitions point at class ids.
pub trait RewireState<S: Symbol>: Clone {
    /// Replaces the identity and the outgoing transitions of `self`.
    fn rewire(&mut self, id: StateId, transitions: &BTreeMap<S, StateId>);
}

/// Controls the pipeline of a [`StateMachineMinimizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinimizerOptions {
    remove_unreachable: bool,
    remove_dead: bool,
    max_iterations: Option<usize>,
}

impl Default for MinimizerOptions {
    fn default() -> Self {
        Self {
            remove_unreachable: true,
            remove_dead: false,
            max_iterations: None,
        }
    }
}

impl MinimizerOptions {
    /// Toggles the removal of states that cannot be reached from the initial state. On by default.
    pub fn with_unreachable_removal(mut self, remove: bool) -> Self {
        self.remove_unreachable = remove;
        self
    }

    /// Toggles the removal of states from which no accepting state can be reached. Off by
    /// default. If the initial state itself is dead, minimization fails.
    pub fn with_dead_removal(mut self, remove: bool) -> Self {
        self.remove_dead = remove;
        self
    }

    /// Bounds the number of refinement passes, see
    /// [`EquivalenceClassComputer::with_max_iterations`].
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }
}

/// Figures about a single minimization. All numbers are derived from actual counts.
///
/// Two metrics compare equal if their counts agree, the processing time is not taken into
/// account.
#[derive(Debug, Clone, Copy)]
pub struct Metrics {
    /// Number of states of the input automaton, before pruning.
    pub original_state_count: usize,
    /// Number of states of the minimized automaton.
    pub minimized_state_count: usize,
    /// `(1 - minimized / original) * 100`, or `0` for an empty input.
    pub reduction_percentage: f64,
    /// Number of equivalence classes that were computed.
    pub equivalence_class_count: usize,
    /// Wall clock time spent in [`StateMachineMinimizer::minimize`].
    pub processing_time: Duration,
}

impl Metrics {
    fn new(original: usize, minimized: usize, classes: usize, processing_time: Duration) -> Self {
        let reduction_percentage = if original == 0 {
            0.0
        } else {
            (1.0 - minimized as f64 / original as f64) * 100.0
        };
        Self {
            original_state_count: original,
            minimized_state_count: minimized,
            reduction_percentage,
            equivalence_class_count: classes,
            processing_time,
        }
    }
}

impl PartialEq for Metrics {
    fn eq(&self, other: &Self) -> bool {
        self.original_state_count == other.original_state_count
            && self.minimized_state_count == other.minimized_state_count
            && self.equivalence_class_count == other.equivalence_class_count
            && self.reduction_percentage == other.reduction_percentage
    }
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut builder = tabled::builder::Builder::default();
        for (label, value) in [
            ("original states", self.original_state_count.to_string()),
            ("minimized states", self.minimized_state_count.to_string()),
            ("reduction", format!("{:.2}%", self.reduction_percentage)),
            ("classes", self.equivalence_class_count.to_string()),
            ("time", format!("{:?}", self.processing_time)),
        ] {
            builder.push_record([label.to_string(), value]);
        }
        write!(
            f,
            "{}",
            builder.build().with(tabled::settings::Style::modern())
        )
    }
}

/// The outcome of a successful minimization.
///
/// The minimized automaton has one state per equivalence class, and the id of that state is
/// the [`ClassId`]. Its metadata is cloned from the class representative, which is the
/// smallest original state id in the class.
#[derive(Debug, Clone)]
pub struct Minimization<S: Symbol, M> {
    automaton: Automaton<S, M>,
    metrics: Metrics,
    classes: EquivalenceClasses,
    representatives: Bijection<ClassId, StateId>,
}

impl<S: Symbol, M> Minimization<S, M> {
    /// The minimized automaton.
    pub fn automaton(&self) -> &Automaton<S, M> {
        &self.automaton
    }

    /// Consumes `self` and returns the minimized automaton.
    pub fn into_automaton(self) -> Automaton<S, M> {
        self.automaton
    }

    /// The metrics of the run.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// The equivalence classes over the states that survived pruning.
    pub fn classes(&self) -> &EquivalenceClasses {
        &self.classes
    }

    /// Maps every original state that survived pruning to its class, which is also its
    /// state id in the minimized automaton. Pruned states do not appear.
    pub fn class_map(&self) -> &BTreeMap<StateId, ClassId> {
        self.classes.class_map()
    }

    /// The class (and minimized state) that the original state `state` ended up in.
    pub fn class_of(&self, state: StateId) -> Option<ClassId> {
        self.classes.find_equivalence_class(state)
    }

    /// The original state that represents `class`.
    pub fn representative(&self, class: ClassId) -> Option<StateId> {
        self.representatives.get_by_left(&class).copied()
    }

    /// The class that is represented by the original state `state`, if it is a representative.
    pub fn represented_class(&self, state: StateId) -> Option<ClassId> {
        self.representatives.get_by_right(&state).copied()
    }

    /// Maps the result back onto domain objects. `domain` is indexed by original state id.
    /// For every class, the representative is cloned and rewired to the class id and the
    /// transitions of the minimized automaton. The input is left untouched, applying the
    /// returned states is up to the caller.
    pub fn project<T: RewireState<S>>(&self, domain: &[T]) -> Result<Vec<T>, StructuralError> {
        self.classes
            .iter()
            .map(|class| {
                let representative = class.representative();
                let mut projected = domain
                    .get(representative as usize)
                    .cloned()
                    .ok_or(StructuralError::UnknownState(representative))?;
                let id = class.id() as StateId;
                let state = self
                    .automaton
                    .state(id)
                    .ok_or(StructuralError::UnknownState(id))?;
                projected.rewire(id, state.transitions());
                Ok(projected)
            })
            .collect()
    }
}

/// Runs the minimization pipeline: validation, pruning, partition refinement and the
/// construction of the quotient automaton.
#[derive(Debug, Clone, Default)]
pub struct StateMachineMinimizer {
    options: MinimizerOptions,
}

impl StateMachineMinimizer {
    /// Creates a minimizer with the given options.
    pub fn new(options: MinimizerOptions) -> Self {
        Self { options }
    }

    /// The options in use.
    pub fn options(&self) -> &MinimizerOptions {
        &self.options
    }

    /// Converts `source` into an automaton and minimizes it.
    pub fn minimize_source<T: StateSource>(
        &self,
        source: &T,
    ) -> Result<Minimization<T::Symbol, T::Meta>, StructuralError> {
        self.minimize(&source.to_automaton())
    }

    /// Minimizes `automaton`. Fails if a transition points nowhere or if the initial state
    /// does not survive pruning.
    pub fn minimize<S: Symbol, M: Clone>(
        &self,
        automaton: &Automaton<S, M>,
    ) -> Result<Minimization<S, M>, StructuralError> {
        let start = Instant::now();
        automaton.validate()?;

        let initial = automaton.initial();
        let mut kept: BTreeSet<StateId> = if self.options.remove_unreachable {
            automaton.reachable_from(initial).collect()
        } else {
            automaton.state_ids().collect()
        };
        if self.options.remove_dead {
            let live = automaton.live_states();
            kept.retain(|q| live.contains(q));
        }
        debug!(
            "pruned {} of {} states",
            automaton.size() - kept.len(),
            automaton.size()
        );
        if !kept.contains(&initial) {
            return Err(StructuralError::MissingInitial {
                initial,
                remaining: kept.len(),
            });
        }

        let mut computer = EquivalenceClassComputer::new(automaton).restricted_to(kept);
        if let Some(max_iterations) = self.options.max_iterations {
            computer = computer.with_max_iterations(max_iterations);
        }
        let classes = computer.compute()?;

        let mut minimized = Automaton::new(automaton.alphabet().iter().cloned());
        let mut representatives = Bijection::new();
        for class in &classes {
            let representative = class.representative();
            let state = automaton
                .state(representative)
                .ok_or(StructuralError::UnknownState(representative))?;
            let id = minimized.add_state(state.is_accepting(), state.metadata().clone());
            debug_assert_eq!(id as ClassId, class.id());
            representatives.insert(class.id(), representative);
        }
        for class in &classes {
            let representative = class.representative();
            for (sym, target) in automaton.transitions_within_alphabet(representative) {
                if let Some(target_class) = classes.find_equivalence_class(target) {
                    minimized.add_transition(
                        class.id() as StateId,
                        sym.clone(),
                        target_class as StateId,
                    )?;
                }
            }
        }
        let initial_class = classes
            .find_equivalence_class(initial)
            .ok_or(StructuralError::MissingInitial {
                initial,
                remaining: classes.class_map().len(),
            })?;
        minimized.set_initial(initial_class as StateId);

        let metrics = Metrics::new(
            automaton.size(),
            minimized.size(),
            classes.len(),
            start.elapsed(),
        );
        debug!(
            "minimized {} states to {} ({:.1}% reduction)",
            metrics.original_state_count, metrics.minimized_state_count, metrics.reduction_percentage
        );

        Ok(Minimization {
            automaton: minimized,
            metrics,
            classes,
            representatives,
        })
    }
}
