use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{
    automaton::State, equivalence::EquivalenceClasses, Automaton, Signature, Symbol,
};

mod clock;
pub use clock::{Clock, ManualClock, SystemClock};

/// The key of a cache entry: the signature of the state before and after the change.
pub type CacheKey = (Signature, Signature);

/// The patch sequence stored for a pair of signatures. An empty sequence is stored as
/// [`Patches::NoChange`], so that transitions which change nothing are still cache hits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patches<P> {
    /// The two states do not differ.
    NoChange,
    /// The ordered, non-empty list of operations that turns the old state into the new one.
    Ops(Vec<P>),
}

impl<P> Patches<P> {
    /// Wraps `ops`, turning an empty list into [`Patches::NoChange`].
    pub fn from_ops(ops: Vec<P>) -> Self {
        if ops.is_empty() {
            Patches::NoChange
        } else {
            Patches::Ops(ops)
        }
    }

    /// Returns true for [`Patches::NoChange`].
    pub fn is_no_change(&self) -> bool {
        matches!(self, Patches::NoChange)
    }

    /// The operations, empty for [`Patches::NoChange`].
    pub fn as_slice(&self) -> &[P] {
        match self {
            Patches::NoChange => &[],
            Patches::Ops(ops) => ops,
        }
    }

    /// The number of operations.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Returns true if there are no operations.
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Consumes `self` and returns the operations.
    pub fn into_vec(self) -> Vec<P> {
        match self {
            Patches::NoChange => vec![],
            Patches::Ops(ops) => ops,
        }
    }
}

/// A stored patch sequence together with its recency metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<P> {
    patches: Patches<P>,
    created_at: Duration,
    last_used: Duration,
    hits: u64,
}

impl<P> CacheEntry<P> {
    fn new(patches: Patches<P>, now: Duration) -> Self {
        Self {
            patches,
            created_at: now,
            last_used: now,
            hits: 0,
        }
    }

    /// The stored patches.
    pub fn patches(&self) -> &Patches<P> {
        &self.patches
    }

    /// When the entry was first stored.
    pub fn created_at(&self) -> Duration {
        self.created_at
    }

    /// When the entry was last stored or hit.
    pub fn last_used(&self) -> Duration {
        self.last_used
    }

    /// How often the entry was hit.
    pub fn hits(&self) -> u64 {
        self.hits
    }
}

/// Capacity and idle window of a [`TransitionCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// The maximal number of entries. Storing beyond it evicts the least recently used entry.
    pub capacity: usize,
    /// Signatures that have not been seen for longer than this are dropped by
    /// [`TransitionCache::sweep`]. `None` disables sweeping.
    pub idle_window: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            idle_window: None,
        }
    }
}

impl CacheConfig {
    /// Sets the capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the idle window.
    pub fn with_idle_window(mut self, idle_window: Duration) -> Self {
        self.idle_window = Some(idle_window);
        self
    }
}

/// Counters of a [`TransitionCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Calls to [`TransitionCache::store`].
    pub stores: u64,
    /// Entries dropped because of the capacity bound.
    pub evictions: u64,
    /// Entries whose key was rewritten during consolidation.
    pub merges: u64,
    /// Entries dropped during consolidation because their rewritten key was taken.
    pub discarded: u64,
    /// Entries dropped by [`TransitionCache::sweep`].
    pub swept: u64,
}

/// A consolidation tried to move an entry onto a key that already holds different patches.
/// This hints at a signature collision or at a nondeterministic diff producer. The entry of
/// the representative is kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("consolidated entry {old} -> {new} conflicts: kept {kept} patches, discarded {discarded}")]
pub struct CacheConsistencyWarning {
    /// Old signature of the contested key.
    pub old: Signature,
    /// New signature of the contested key.
    pub new: Signature,
    /// Number of operations of the entry that was kept.
    pub kept: usize,
    /// Number of operations of the entry that was dropped.
    pub discarded: usize,
}

/// What a call to [`TransitionCache::consolidate`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// The signature everything was merged into.
    pub representative: Signature,
    /// The signatures that now resolve to the representative.
    pub merged: Vec<Signature>,
    /// Number of entries that were moved to a rewritten key.
    pub rewritten: usize,
    /// Number of entries that were dropped because their rewritten key already held an
    /// entry, with equal or conflicting patches.
    pub discarded: usize,
    /// Conflicts that were encountered along the way.
    pub warnings: Vec<CacheConsistencyWarning>,
}

/// Memoizes patch sequences between structural states, keyed by the pair of their signatures.
///
/// Entries are kept in recency order: the front holds the most recently used entry, the back
/// the least recently used one, which is the first to go once the capacity is exceeded.
/// Independently of that, every signature that is committed, stored or hit is remembered
/// as *active* together with the time it was last seen, and [`TransitionCache::sweep`]
/// drops signatures that have been idle for too long along with all entries touching them.
/// A signature stays active only while some entry mentions it or while it is the current
/// one, so evicting an entry also forgets signatures that nothing refers to anymore.
///
/// When two signatures are proven equivalent, [`TransitionCache::consolidate`] moves all
/// entries of one onto the other and records an alias, so that lookups through either
/// signature find the same entry. At most `capacity` aliases are kept, the oldest goes
/// first, and aliases die with their target.
///
/// The cache assumes a single writer that applies updates in order. It is not synchronized.
#[derive(Debug)]
pub struct TransitionCache<P, C: Clock = SystemClock> {
    config: CacheConfig,
    clock: C,
    entries: IndexMap<CacheKey, CacheEntry<P>>,
    active: BTreeMap<Signature, Duration>,
    refs: BTreeMap<Signature, usize>,
    aliases: IndexMap<Signature, Signature>,
    current: Option<Signature>,
    stats: CacheStats,
}

impl<P> TransitionCache<P, SystemClock> {
    /// Creates an empty cache that uses the wall clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, SystemClock::default())
    }
}

impl<P> Default for TransitionCache<P, SystemClock> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<P, C: Clock> TransitionCache<P, C> {
    /// Creates an empty cache that reads time from `clock`.
    pub fn with_clock(config: CacheConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            entries: IndexMap::new(),
            active: BTreeMap::new(),
            refs: BTreeMap::new(),
            aliases: IndexMap::new(),
            current: None,
            stats: CacheStats::default(),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// The counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries, most recently used first.
    pub fn entries(&self) -> impl Iterator<Item = (&CacheKey, &CacheEntry<P>)> + '_ {
        self.entries.iter()
    }

    /// Follows the alias of `signature`, if it was merged into another one.
    pub fn resolve(&self, signature: &Signature) -> Signature {
        self.aliases
            .get(signature)
            .unwrap_or(signature)
            .clone()
    }

    /// Iterates over the recorded aliases and their targets, oldest first.
    pub fn aliases(&self) -> impl Iterator<Item = (&Signature, &Signature)> + '_ {
        self.aliases.iter()
    }

    fn key(&self, old: &Signature, new: &Signature) -> CacheKey {
        (self.resolve(old), self.resolve(new))
    }

    fn touch(&mut self, signature: &Signature, now: Duration) {
        self.active.insert(signature.clone(), now);
    }

    fn retain_key(&mut self, (old, new): &CacheKey) {
        for signature in [old, new] {
            *self.refs.entry(signature.clone()).or_insert(0) += 1;
        }
    }

    fn release_key(&mut self, (old, new): &CacheKey) {
        for signature in [old, new] {
            if let Some(count) = self.refs.get_mut(signature) {
                *count -= 1;
                if *count == 0 {
                    self.refs.remove(signature);
                }
            }
            self.forget_if_unused(signature);
        }
    }

    /// Drops `signature` from the active set, and every alias pointing at it, unless an entry
    /// mentions it or it is the current one.
    fn forget_if_unused(&mut self, signature: &Signature) {
        if self.refs.contains_key(signature) || self.current.as_ref() == Some(signature) {
            return;
        }
        if self.active.remove(signature).is_some() {
            trace!("forgetting unused signature {signature}");
        }
        self.aliases.retain(|_, target| target != signature);
    }

    fn record_alias(&mut self, alias: Signature, target: Signature) {
        self.aliases.insert(alias, target);
        while self.aliases.len() > self.config.capacity {
            self.aliases.shift_remove_index(0);
        }
    }

    /// Looks up the patches from `old` to `new`. A hit moves the entry to the front and marks
    /// both signatures as active.
    pub fn lookup(&mut self, old: &Signature, new: &Signature) -> Option<&Patches<P>> {
        let key = self.key(old, new);
        let Some(index) = self.entries.get_index_of(&key) else {
            self.stats.misses += 1;
            trace!("cache miss for {} -> {}", key.0, key.1);
            return None;
        };

        let now = self.clock.now();
        self.stats.hits += 1;
        self.touch(&key.0, now);
        self.touch(&key.1, now);
        self.entries.move_index(index, 0);
        let (_, entry) = self.entries.get_index_mut(0)?;
        entry.last_used = now;
        entry.hits += 1;
        trace!("cache hit for {} -> {}", key.0, key.1);
        Some(&entry.patches)
    }

    /// Returns the entry from `old` to `new` without touching it.
    pub fn peek(&self, old: &Signature, new: &Signature) -> Option<&CacheEntry<P>> {
        self.entries.get(&self.key(old, new))
    }

    /// Returns true if there is an entry from `old` to `new`.
    pub fn contains(&self, old: &Signature, new: &Signature) -> bool {
        self.entries.contains_key(&self.key(old, new))
    }

    /// Stores the patches from `old` to `new` at the front, replacing a previous entry. An
    /// empty list is stored as [`Patches::NoChange`]. Exceeding the capacity evicts from the back.
    pub fn store(&mut self, old: &Signature, new: &Signature, patches: Vec<P>) {
        let key = self.key(old, new);
        let now = self.clock.now();
        self.stats.stores += 1;
        self.touch(&key.0, now);
        self.touch(&key.1, now);
        let patches = Patches::from_ops(patches);

        if let Some((index, _, entry)) = self.entries.get_full_mut(&key) {
            entry.patches = patches;
            entry.last_used = now;
            self.entries.move_index(index, 0);
            return;
        }

        trace!("storing {} patches for {} -> {}", patches.len(), key.0, key.1);
        self.retain_key(&key);
        let (index, _) = self.entries.insert_full(key, CacheEntry::new(patches, now));
        self.entries.move_index(index, 0);

        while self.entries.len() > self.config.capacity {
            if let Some((key, _)) = self.entries.pop() {
                self.stats.evictions += 1;
                trace!("evicted {} -> {}", key.0, key.1);
                self.release_key(&key);
            }
        }
    }

    /// Records `signature` as the latest committed state. It supersedes the previous one,
    /// which is returned. The previous one stays active only while an entry mentions it.
    pub fn commit(&mut self, signature: &Signature) -> Option<Signature> {
        let signature = self.resolve(signature);
        let now = self.clock.now();
        self.touch(&signature, now);
        let previous = self.current.replace(signature);
        if let Some(previous) = &previous {
            self.forget_if_unused(previous);
        }
        previous
    }

    /// The latest committed signature.
    pub fn current(&self) -> Option<&Signature> {
        self.current.as_ref()
    }

    /// Returns true if `signature` (or what it resolves to) is active.
    pub fn is_active(&self, signature: &Signature) -> bool {
        self.active.contains_key(&self.resolve(signature))
    }

    /// Iterates over the active signatures in order.
    pub fn active_signatures(&self) -> impl Iterator<Item = &Signature> + '_ {
        self.active.keys()
    }

    /// Drops every signature that has been idle for longer than the configured window,
    /// together with all entries that mention it. The current signature is never dropped.
    /// Returns the number of removed entries.
    pub fn sweep(&mut self) -> usize {
        let Some(window) = self.config.idle_window else {
            return 0;
        };
        let now = self.clock.now();
        let stale: BTreeSet<Signature> = self
            .active
            .iter()
            .filter(|(signature, seen)| {
                now.saturating_sub(**seen) > window && self.current.as_ref() != Some(*signature)
            })
            .map(|(signature, _)| signature.clone())
            .collect();
        if stale.is_empty() {
            return 0;
        }

        self.active.retain(|signature, _| !stale.contains(signature));
        self.aliases.retain(|_, target| !stale.contains(target));
        let mut dropped = vec![];
        self.entries.retain(|key, _| {
            let keep = !stale.contains(&key.0) && !stale.contains(&key.1);
            if !keep {
                dropped.push(key.clone());
            }
            keep
        });
        for key in &dropped {
            self.release_key(key);
        }
        let removed = dropped.len();
        self.stats.swept += removed as u64;
        debug!(
            "swept {} idle signatures and {removed} entries",
            stale.len()
        );
        removed
    }

    /// Removes all entries, aliases and bookkeeping. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.active.clear();
        self.refs.clear();
        self.aliases.clear();
        self.current = None;
    }

    /// Merges `equivalents` into `representative`: every entry mentioning one of them is
    /// rewritten to mention the representative instead, and later lookups through any of them
    /// resolve to the representative.
    ///
    /// The rewrites are collected first and applied afterwards. If a rewritten key already
    /// exists, the existing entry wins and the moved one is discarded. If their patches
    /// differ, a [`CacheConsistencyWarning`] is logged and reported.
    pub fn consolidate<'s, I>(&mut self, representative: &Signature, equivalents: I) -> MergeReport
    where
        P: PartialEq,
        I: IntoIterator<Item = &'s Signature>,
    {
        let representative = self.resolve(representative);
        let merged: BTreeSet<Signature> = equivalents
            .into_iter()
            .map(|signature| self.resolve(signature))
            .filter(|signature| *signature != representative)
            .collect();
        let mut report = MergeReport {
            representative: representative.clone(),
            merged: merged.iter().cloned().collect(),
            rewritten: 0,
            discarded: 0,
            warnings: vec![],
        };
        if merged.is_empty() {
            return report;
        }

        let rewrite = |signature: &Signature| {
            if merged.contains(signature) {
                representative.clone()
            } else {
                signature.clone()
            }
        };
        let rewrites: Vec<(CacheKey, CacheKey)> = self
            .entries
            .keys()
            .filter(|(old, new)| merged.contains(old) || merged.contains(new))
            .map(|key| (key.clone(), (rewrite(&key.0), rewrite(&key.1))))
            .collect();

        // activity and aliases move first, so releasing the old keys below finds nothing
        // left to forget for the merged signatures
        for signature in &merged {
            if let Some(seen) = self.active.remove(signature) {
                let last = self.active.entry(representative.clone()).or_insert(seen);
                *last = (*last).max(seen);
            }
        }
        if self
            .current
            .as_ref()
            .is_some_and(|current| merged.contains(current))
        {
            self.current = Some(representative.clone());
        }
        let redirected: Vec<Signature> = self
            .aliases
            .iter()
            .filter(|(_, target)| merged.contains(*target))
            .map(|(alias, _)| alias.clone())
            .collect();
        for alias in redirected.into_iter().chain(merged.iter().cloned()) {
            self.record_alias(alias, representative.clone());
        }

        for (from, to) in rewrites {
            let Some((index, _, entry)) = self.entries.shift_remove_full(&from) else {
                continue;
            };
            match self
                .entries
                .get(&to)
                .map(|existing| (existing.patches != entry.patches, existing.patches.len()))
            {
                Some((conflict, kept)) => {
                    report.discarded += 1;
                    if conflict {
                        let warning = CacheConsistencyWarning {
                            old: to.0.clone(),
                            new: to.1.clone(),
                            kept,
                            discarded: entry.patches.len(),
                        };
                        warn!("{warning}");
                        report.warnings.push(warning);
                    }
                }
                None => {
                    report.rewritten += 1;
                    self.retain_key(&to);
                    let index = index.min(self.entries.len());
                    self.entries.shift_insert(index, to, entry);
                }
            }
            self.release_key(&from);
        }
        self.forget_if_unused(&representative);

        self.stats.merges += report.rewritten as u64;
        self.stats.discarded += report.discarded as u64;
        debug!(
            "consolidated {} signatures into {representative}, rewrote {} entries",
            merged.len(),
            report.rewritten
        );
        report
    }

    /// Consolidates along equivalence classes of an automaton whose states stand for
    /// structural states. `signature_of` extracts the signature a state stands for. Within
    /// each class, the active signatures are merged into the smallest one.
    pub fn consolidate_classes<S, M, F>(
        &mut self,
        automaton: &Automaton<S, M>,
        classes: &EquivalenceClasses,
        mut signature_of: F,
    ) -> Vec<MergeReport>
    where
        P: PartialEq,
        S: Symbol,
        F: FnMut(&State<S, M>) -> Option<Signature>,
    {
        let mut reports = vec![];
        for class in classes {
            let signatures: BTreeSet<Signature> = class
                .members()
                .iter()
                .filter_map(|q| automaton.state(*q))
                .filter_map(&mut signature_of)
                .map(|signature| self.resolve(&signature))
                .filter(|signature| self.active.contains_key(signature))
                .collect();
            let mut signatures = signatures.into_iter();
            let Some(representative) = signatures.next() else {
                continue;
            };
            let rest: Vec<Signature> = signatures.collect();
            if !rest.is_empty() {
                reports.push(self.consolidate(&representative, &rest));
            }
        }
        reports
    }
}
