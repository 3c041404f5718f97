use std::{collections::BTreeSet, hash::Hash};

/// Type alias for sets, we use this to hide which type of `HashSet` we are actually using.
pub type Set<S> = fxhash::FxHashSet<S>;
/// Type alias for maps, we use this to hide which type of `HashMap` we are actually using.
pub type Map<K, V> = fxhash::FxHashMap<K, V>;

/// Represents a bijective mapping between `L` and `R`, that is a mapping which associates
/// each `L` with precisely one `R` and vice versa.
pub type Bijection<L, R> = bimap::BiBTreeMap<L, R>;

/// A partition groups elements of type `I` into disjoint blocks. It is a different view on
/// an equivalence relation. Blocks are kept in a canonical order, namely sorted by their
/// smallest element, so two partitions with the same blocks are laid out identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition<I: Hash + Eq + Ord>(Vec<BTreeSet<I>>);

impl<I: Hash + Eq + Ord> std::ops::Deref for Partition<I> {
    type Target = Vec<BTreeSet<I>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a, I: Hash + Eq + Ord> IntoIterator for &'a Partition<I> {
    type Item = &'a BTreeSet<I>;
    type IntoIter = std::slice::Iter<'a, BTreeSet<I>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<I: Hash + Eq + Ord + Copy> Partition<I> {
    /// Returns the size of the partition, i.e. the number of blocks.
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Builds a new partition from an iterator that yields iterators which yield elements of
    /// type `I`. Empty blocks are dropped and the remaining ones are brought into canonical order.
    pub fn new<X: IntoIterator<Item = I>, Y: IntoIterator<Item = X>>(iter: Y) -> Self {
        let mut blocks: Vec<BTreeSet<I>> = iter
            .into_iter()
            .map(|it| it.into_iter().collect::<BTreeSet<_>>())
            .filter(|block| !block.is_empty())
            .collect();
        blocks.sort_by_key(|block| block.first().copied());
        Self(blocks)
    }

    /// Returns the position of the block containing `element`, if any.
    pub fn position_of(&self, element: &I) -> Option<usize> {
        self.0.iter().position(|block| block.contains(element))
    }

    /// Verifies that the blocks are pairwise disjoint and that their union is exactly `universe`.
    pub fn partitions<'a, U>(&self, universe: U) -> bool
    where
        I: 'a,
        U: IntoIterator<Item = &'a I>,
    {
        let universe: BTreeSet<I> = universe.into_iter().copied().collect();
        let total: usize = self.0.iter().map(BTreeSet::len).sum();
        let union: BTreeSet<I> = self.0.iter().flatten().copied().collect();
        total == union.len() && union == universe
    }

    /// Consumes `self` and returns the underlying blocks.
    pub fn into_blocks(self) -> Vec<BTreeSet<I>> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::Partition;

    #[test]
    fn partition_is_canonical() {
        let left = Partition::new([vec![4, 2], vec![], vec![3, 1]]);
        let right = Partition::new([vec![1, 3], vec![2, 4]]);
        assert_eq!(left, right);
        assert_eq!(left.size(), 2);
        assert_eq!(left.position_of(&4), Some(1));
        assert_eq!(left.position_of(&7), None);
    }

    #[test]
    fn partition_covers_universe() {
        let partition = Partition::new([vec![0, 1], vec![2]]);
        assert!(partition.partitions(&[0, 1, 2]));
        assert!(!partition.partitions(&[0, 1, 2, 3]));
        let overlapping = Partition::new([vec![0, 1], vec![1, 2]]);
        assert!(!overlapping.partitions(&[0, 1, 2]));
    }
}
