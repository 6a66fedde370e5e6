use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Ordered container with array semantics plus near-O(1) average
/// `index_of`/`contains`, backed by a secondary index from element hash to
/// candidate positions. Used wherever the grouping tree needs to turn a
/// child value back into its sibling index quickly.
///
/// Structural mutations shift the stored positions of every element behind
/// the mutation point, so `insert`/`remove` are O(n); the consumers here
/// mutate rarely and look up constantly. Bulk range deletion is
/// deliberately unsupported.
#[derive(Debug, Clone, Default)]
pub struct HashList<T: Hash + Eq> {
    items: Vec<T>,
    index: HashMap<u64, Vec<usize>>,
}

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

impl<T: Hash + Eq> HashList<T> {
    pub fn new() -> Self {
        HashList { items: Vec::new(), index: HashMap::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        HashList { items: Vec::with_capacity(capacity), index: HashMap::with_capacity(capacity) }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn add(&mut self, value: T) {
        let position = self.items.len();
        self.index.entry(hash_of(&value)).or_default().push(position);
        self.items.push(value);
    }

    /// Inserts at `index`, shifting every stored position at or behind the
    /// insertion point in all buckets. Buckets stay ascending so `index_of`
    /// keeps returning the first occurrence among equal elements.
    pub fn insert(&mut self, index: usize, value: T) {
        assert!(index <= self.items.len(), "insert index out of bounds");
        for positions in self.index.values_mut() {
            for p in positions.iter_mut() {
                if *p >= index {
                    *p += 1;
                }
            }
        }
        let bucket = self.index.entry(hash_of(&value)).or_default();
        let slot = bucket.partition_point(|&p| p < index);
        bucket.insert(slot, index);
        self.items.insert(index, value);
    }

    /// Removes and returns the element at `index`, shifting stored
    /// positions behind the removal point back by one.
    pub fn remove(&mut self, index: usize) -> T {
        assert!(index < self.items.len(), "remove index out of bounds");
        let value = self.items.remove(index);
        let hash = hash_of(&value);
        if let Some(positions) = self.index.get_mut(&hash) {
            positions.retain(|&p| p != index);
            if positions.is_empty() {
                self.index.remove(&hash);
            }
        }
        for positions in self.index.values_mut() {
            for p in positions.iter_mut() {
                if *p > index {
                    *p -= 1;
                }
            }
        }
        value
    }

    /// Average O(1): hashes the probe, scans only the candidate positions
    /// in its bucket, and confirms with real equality.
    pub fn index_of(&self, value: &T) -> Option<usize> {
        let positions = self.index.get(&hash_of(value))?;
        positions.iter().copied().find(|&p| self.items[p] == *value)
    }

    pub fn contains(&self, value: &T) -> bool {
        self.index_of(value).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Stable in-place sort. The position index is rebuilt wholesale
    /// afterwards; cheaper than tracking every swap.
    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&T, &T) -> std::cmp::Ordering,
    {
        self.items.sort_by(compare);
        self.rebuild_index();
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (position, item) in self.items.iter().enumerate() {
            self.index.entry(hash_of(item)).or_default().push(position);
        }
    }
}

impl<T: Hash + Eq> FromIterator<T> for HashList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = HashList::new();
        for item in iter {
            list.add(item);
        }
        list
    }
}

impl<'a, T: Hash + Eq> IntoIterator for &'a HashList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
