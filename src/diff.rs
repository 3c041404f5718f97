use tracing::{trace, warn};

use crate::{
    cache::{CacheConfig, Clock, SystemClock},
    error::SignatureError,
    signature::{Node, SignatureGenerator, SignatureOptions},
    Signature, TransitionCache,
};

/// Positional diffing of document trees.
pub mod dom;
/// Rule-by-rule diffing of stylesheets.
pub mod stylesheet;

/// Produces the patches that transform one structure into another.
///
/// Implementations have to be deterministic: equal inputs must always yield equal patches,
/// otherwise memoizing them would be unsound.
pub trait Differ {
    /// A single patch operation.
    type Patch: Clone + PartialEq;

    /// Computes the ordered patches that turn `old` into `new`. Equal inputs give no patches.
    fn diff(&mut self, old: &Node, new: &Node) -> Vec<Self::Patch>;

    /// The patches that discard whatever is there and put `new` in its place.
    fn replace(&mut self, new: &Node) -> Vec<Self::Patch>;
}

/// Where the patches of a [`DiffOutcome`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOrigin {
    /// Taken from the cache, the differ was not invoked.
    Cached,
    /// Computed by the differ and stored in the cache.
    Computed,
    /// One of the structures could not be signed, so a full replace was produced. Nothing
    /// was stored.
    Replaced,
}

/// The result of [`CachedDiffer::diff`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiffOutcome<P> {
    /// The patches to apply, in order.
    pub patches: Vec<P>,
    /// Where they came from.
    pub origin: DiffOrigin,
}

/// Wraps a [`Differ`] such that diffs between structures that were already seen, or that
/// are known to be equivalent to ones already seen, are taken from a [`TransitionCache`].
///
/// Every call signs both structures, consults the cache and only invokes the differ on a
/// miss. Afterwards the signature of the new structure is committed as the latest state.
/// If a structure contains a node that cannot be signed, the call degrades to a full
/// replace that bypasses the cache.
///
/// The signature options should keep values and children, otherwise structures which
/// differ only in dropped parts share a key and receive each other's patches.
pub struct CachedDiffer<D: Differ, C: Clock = SystemClock> {
    differ: D,
    generator: SignatureGenerator,
    options: SignatureOptions,
    cache: TransitionCache<D::Patch, C>,
}

impl<D, C> std::fmt::Debug for CachedDiffer<D, C>
where
    D: Differ + std::fmt::Debug,
    D::Patch: std::fmt::Debug,
    C: Clock + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedDiffer")
            .field("differ", &self.differ)
            .field("options", &self.options)
            .field("cache", &self.cache)
            .finish()
    }
}

impl<D: Differ> CachedDiffer<D> {
    /// Creates a cached differ with a fresh cache that uses the wall clock.
    pub fn new(differ: D, generator: SignatureGenerator, config: CacheConfig) -> Self {
        Self::with_cache(differ, generator, TransitionCache::new(config))
    }
}

impl<D: Differ, C: Clock> CachedDiffer<D, C> {
    /// Creates a cached differ around an existing cache.
    pub fn with_cache(
        differ: D,
        generator: SignatureGenerator,
        cache: TransitionCache<D::Patch, C>,
    ) -> Self {
        Self {
            differ,
            generator,
            options: SignatureOptions::default(),
            cache,
        }
    }

    /// Sets the options used for signing.
    pub fn with_options(mut self, options: SignatureOptions) -> Self {
        self.options = options;
        self
    }

    /// The wrapped differ.
    pub fn differ(&self) -> &D {
        &self.differ
    }

    /// The signature generator.
    pub fn generator(&self) -> &SignatureGenerator {
        &self.generator
    }

    /// The cache.
    pub fn cache(&self) -> &TransitionCache<D::Patch, C> {
        &self.cache
    }

    /// Mutable access to the cache, for example to consolidate signatures.
    pub fn cache_mut(&mut self) -> &mut TransitionCache<D::Patch, C> {
        &mut self.cache
    }

    /// Signs `node` with the configured options.
    pub fn sign(&self, node: &Node) -> Result<Signature, SignatureError> {
        self.generator.generate(node, &self.options)
    }

    /// Produces the patches from `old` to `new`, preferably from the cache.
    pub fn diff(&mut self, old: &Node, new: &Node) -> DiffOutcome<D::Patch> {
        let (old_sig, new_sig) = match self.sign(old).and_then(|o| Ok((o, self.sign(new)?))) {
            Ok(signatures) => signatures,
            Err(err) => {
                warn!("{err}, falling back to a full replace");
                return DiffOutcome {
                    patches: self.differ.replace(new),
                    origin: DiffOrigin::Replaced,
                };
            }
        };

        let cached = self
            .cache
            .lookup(&old_sig, &new_sig)
            .map(|patches| patches.as_slice().to_vec());
        let outcome = match cached {
            Some(patches) => DiffOutcome {
                patches,
                origin: DiffOrigin::Cached,
            },
            None => {
                let patches = self.differ.diff(old, new);
                trace!("computed {} patches on a cache miss", patches.len());
                self.cache.store(&old_sig, &new_sig, patches.clone());
                DiffOutcome {
                    patches,
                    origin: DiffOrigin::Computed,
                }
            }
        };
        self.cache.commit(&new_sig);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    /// Counts how often the wrapped differ actually runs.
    struct Counting<D> {
        inner: D,
        diffs: usize,
        replaces: usize,
    }

    impl<D> Counting<D> {
        fn new(inner: D) -> Self {
            Self {
                inner,
                diffs: 0,
                replaces: 0,
            }
        }
    }

    impl<D: Differ> Differ for Counting<D> {
        type Patch = D::Patch;

        fn diff(&mut self, old: &Node, new: &Node) -> Vec<Self::Patch> {
            self.diffs += 1;
            self.inner.diff(old, new)
        }

        fn replace(&mut self, new: &Node) -> Vec<Self::Patch> {
            self.replaces += 1;
            self.inner.replace(new)
        }
    }

    fn button_sheet(color: &str) -> Node {
        Node::stylesheet([
            Node::rule("body").with_declaration("margin", "0"),
            Node::rule(".btn").with_declaration("color", color),
        ])
    }

    #[test_log::test]
    fn second_encounter_is_a_cache_hit() {
        let mut cached = CachedDiffer::new(
            Counting::new(StylesheetDiffer),
            SignatureGenerator::new(),
            CacheConfig::default(),
        );

        let first = cached.diff(&button_sheet("red"), &button_sheet("blue"));
        assert_eq!(first.origin, DiffOrigin::Computed);
        assert_eq!(first.patches.len(), 1);

        // rebuilt from scratch, so nothing is shared with the first pair
        let second = cached.diff(&button_sheet("red"), &button_sheet("blue"));
        assert_eq!(second.origin, DiffOrigin::Cached);
        assert_eq!(second.patches, first.patches);
        assert_eq!(cached.differ().diffs, 1);
        assert_eq!(cached.cache().stats().hits, 1);
        assert_eq!(
            cached.cache().current(),
            cached.sign(&button_sheet("blue")).ok().as_ref()
        );
    }

    #[test]
    fn no_op_transitions_are_cached() {
        let mut cached = CachedDiffer::new(
            Counting::new(StylesheetDiffer),
            SignatureGenerator::new(),
            CacheConfig::default(),
        );
        let sheet = button_sheet("red");
        assert_eq!(cached.diff(&sheet, &sheet).origin, DiffOrigin::Computed);
        let again = cached.diff(&sheet, &sheet);
        assert_eq!(again.origin, DiffOrigin::Cached);
        assert!(again.patches.is_empty());
        assert_eq!(cached.differ().diffs, 1);
    }

    #[test]
    fn unsignable_structures_are_replaced() {
        let mut cached = CachedDiffer::new(
            Counting::new(DomDiffer),
            SignatureGenerator::new(),
            CacheConfig::default(),
        );
        let old = Node::element("div").with_child(Node::component("date-picker"));
        let new = Node::element("div");

        let outcome = cached.diff(&old, &new);
        assert_eq!(outcome.origin, DiffOrigin::Replaced);
        assert_eq!(
            outcome.patches,
            vec![DomPatch::Replace {
                path: vec![],
                node: new.clone()
            }]
        );
        assert_eq!(cached.differ().diffs, 0);
        assert_eq!(cached.differ().replaces, 1);
        assert!(cached.cache().is_empty());
    }

    #[test]
    fn registered_components_are_cached() {
        let generator = SignatureGenerator::new().with_extractor(
            "date-picker",
            |props: &math::Map<String, Option<String>>,
             _: &SignatureOptions|
             -> Vec<(String, Option<String>)> {
                props
                    .get("value")
                    .map(|value| vec![("value".to_string(), value.clone())])
                    .unwrap_or_default()
            },
        );
        let mut cached =
            CachedDiffer::new(Counting::new(DomDiffer), generator, CacheConfig::default());
        let old = Node::element("form").with_child(Node::component("date-picker"));
        let new = Node::element("form")
            .with_child(Node::component("date-picker").with_attribute("value", "2024-01-01"));

        assert_eq!(cached.diff(&old, &new).origin, DiffOrigin::Computed);
        assert_eq!(cached.diff(&old, &new).origin, DiffOrigin::Cached);
        assert_eq!(cached.differ().diffs, 1);
    }

    #[test]
    fn consolidated_signatures_hit_the_same_entry() {
        let mut cached = CachedDiffer::new(
            Counting::new(StylesheetDiffer),
            SignatureGenerator::new(),
            CacheConfig::default(),
        );
        let target = button_sheet("blue");
        cached.diff(&button_sheet("red"), &target);

        // a structure that some behaviour model proved to be equivalent to the red one
        let crimson = button_sheet("crimson");
        let red = cached.sign(&button_sheet("red")).unwrap();
        let crimson_sig = cached.sign(&crimson).unwrap();
        let report = cached.cache_mut().consolidate(&red, [&crimson_sig]);
        assert!(report.warnings.is_empty());

        let outcome = cached.diff(&crimson, &target);
        assert_eq!(outcome.origin, DiffOrigin::Cached);
        assert_eq!(cached.differ().diffs, 1);
    }
}
