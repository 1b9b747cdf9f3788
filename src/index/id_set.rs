//! IdentifierSet - set of 64-bit series identifiers
//!
//! Backed by a `RoaringTreemap`: inserts in any order are cheap and set
//! algebra works container by container. Iteration is always ascending.

use roaring::RoaringTreemap;

/// Set of series identifiers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifierSet {
    ids: RoaringTreemap,
}

impl IdentifierSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identifiers
    pub fn len(&self) -> usize {
        self.ids.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Check membership
    pub fn has(&self, id: u64) -> bool {
        self.ids.contains(id)
    }

    /// Add one identifier. Returns false if it was already present.
    pub fn add(&mut self, id: u64) -> bool {
        self.ids.insert(id)
    }

    /// Add many identifiers at once
    ///
    /// `ids` may be unsorted and may contain duplicates or identifiers
    /// already in the set; adding is idempotent.
    pub fn add_multi(&mut self, ids: &[u64]) {
        self.ids.extend(ids.iter().copied());
    }

    /// Keep only identifiers also present in `other`
    pub fn intersect(&mut self, other: &IdentifierSet) {
        self.ids &= &other.ids;
    }

    /// Remove every identifier present in `other`
    pub fn subtract(&mut self, other: &IdentifierSet) {
        self.ids -= &other.ids;
    }

    /// Add every identifier present in `other`
    pub fn union(&mut self, other: &IdentifierSet) {
        self.ids |= &other.ids;
    }

    /// Drop identifiers beyond the first `limit` (in ascending order)
    pub fn truncate(&mut self, limit: usize) {
        if let Some(first_dropped) = self.ids.iter().nth(limit) {
            self.ids.remove_range(first_dropped..);
        }
    }

    /// Iterate identifiers in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ids.iter()
    }

    /// Iterate at most `limit` identifiers in ascending order
    pub fn iter_limited(&self, limit: usize) -> impl Iterator<Item = u64> + '_ {
        self.ids.iter().take(limit)
    }

    /// Identifiers in ascending order
    pub fn into_vec(self) -> Vec<u64> {
        self.ids.into_iter().collect()
    }
}

impl FromIterator<u64> for IdentifierSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

impl Extend<u64> for IdentifierSet {
    fn extend<I: IntoIterator<Item = u64>>(&mut self, iter: I) {
        self.ids.extend(iter);
    }
}
