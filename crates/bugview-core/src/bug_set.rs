//! The record collection behind one grouping tree.
//!
//! A `BugSet` owns an ordered, unfiltered list of records plus two layers
//! of derived state: a distinct-value catalog per attribute (computed over
//! filter-passing records at construction) and memoized sub-collections
//! keyed by predicate atom. Neither layer is ever invalidated in place;
//! when filters, designations or suppressions change, the owner builds a
//! fresh `BugSet` and the stale one is dropped wholesale.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::hash_list::HashList;
use crate::matcher::FilterSet;
use crate::model::{BugRecord, RecordRef};
use crate::sortables::{Sortable, SortableValue};

pub struct BugSet {
    records: HashList<RecordRef>,
    filters: Arc<RwLock<FilterSet>>,
    /// Filter-set version this collection was built under. Stale reads are
    /// legal (the owner decides when to rebuild); this is for diagnostics.
    built_under: u64,
    distinct: HashMap<Sortable, Vec<String>>,
    query_cache: Mutex<HashMap<SortableValue, Arc<BugSet>>>,
    contains_cache: Mutex<HashMap<SortableValue, bool>>,
}

impl BugSet {
    /// Builds the root collection: sorts the records under `order` and
    /// computes the distinct-value catalog over filter-passing records.
    pub fn new(
        records: Vec<RecordRef>,
        filters: Arc<RwLock<FilterSet>>,
        order: &[Sortable],
    ) -> Arc<BugSet> {
        let mut list: HashList<RecordRef> = records.into_iter().collect();
        sort_records(&mut list, order);
        debug!(records = list.len(), "building record collection");
        Arc::new(BugSet::from_parts(list, filters))
    }

    fn from_parts(records: HashList<RecordRef>, filters: Arc<RwLock<FilterSet>>) -> BugSet {
        let (distinct, built_under) = {
            let guard = read_filters(&filters);
            (distinct_values(&records, &guard), guard.version())
        };
        BugSet {
            records,
            filters,
            built_under,
            distinct,
            query_cache: Mutex::new(HashMap::new()),
            contains_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Filter-set version the distinct catalog and caches were built under.
    pub fn built_under(&self) -> u64 {
        self.built_under
    }

    /// Distinct values of `sortable` among filter-passing records, in the
    /// attribute's sort order. Frozen at construction time.
    pub fn all_values(&self, sortable: Sortable) -> &[String] {
        self.distinct.get(&sortable).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The sub-collection of records carrying `atom`, memoized. Drawn from
    /// the unfiltered list so that filter toggles show up in the same
    /// sub-collection without rebuilding it; visibility is applied by the
    /// filtered accessors on the result.
    pub fn query(self: &Arc<Self>, atom: &SortableValue) -> Arc<BugSet> {
        if let Some(cached) = lock(&self.query_cache).get(atom) {
            return Arc::clone(cached);
        }
        let sub: HashList<RecordRef> = self
            .records
            .iter()
            .filter(|r| atom.describes(r))
            .cloned()
            .collect();
        let sub = Arc::new(BugSet::from_parts(sub, Arc::clone(&self.filters)));
        lock(&self.query_cache)
            .entry(atom.clone())
            .or_insert_with(|| Arc::clone(&sub));
        sub
    }

    /// Folds `query` left to right over a tree path. Each step memoizes in
    /// its own collection, so the same atoms in a different order can yield
    /// distinct (if same-content) collections.
    pub fn query_path(self: &Arc<Self>, path: &[SortableValue]) -> Arc<BugSet> {
        let mut current = Arc::clone(self);
        for atom in path {
            current = current.query(atom);
        }
        current
    }

    /// Whether any filter-passing record here carries `atom`. Memoized;
    /// used to decide which branch values exist at all.
    pub fn contains_atom(&self, atom: &SortableValue) -> bool {
        if let Some(&cached) = lock(&self.contains_cache).get(atom) {
            return cached;
        }
        let found = {
            let guard = read_filters(&self.filters);
            self.records
                .iter()
                .any(|r| guard.matches(r) && atom.describes(r))
        };
        lock(&self.contains_cache).insert(atom.clone(), found);
        found
    }

    /// Records passing the current filter set, in list order. Recomputed on
    /// every call rather than cached, so filter toggles are visible
    /// immediately through the filtered accessors.
    pub fn filtered(&self) -> Vec<RecordRef> {
        let guard = read_filters(&self.filters);
        self.records
            .iter()
            .filter(|r| guard.matches(r))
            .cloned()
            .collect()
    }

    pub fn filtered_len(&self) -> usize {
        let guard = read_filters(&self.filters);
        self.records.iter().filter(|r| guard.matches(r)).count()
    }

    pub fn filtered_get(&self, index: usize) -> Option<RecordRef> {
        let guard = read_filters(&self.filters);
        self.records
            .iter()
            .filter(|r| guard.matches(r))
            .nth(index)
            .cloned()
    }

    pub fn filtered_index_of(&self, record: &BugRecord) -> Option<usize> {
        let guard = read_filters(&self.filters);
        self.records
            .iter()
            .filter(|r| guard.matches(r))
            .position(|r| r.as_ref() == record)
    }

    /// Number of records hidden by the current filter set (suppressions
    /// included). Recomputed per call like the filtered accessors, so
    /// `count_filtered() + filtered_len() == unfiltered_len()` always.
    pub fn count_filtered(&self) -> usize {
        let guard = read_filters(&self.filters);
        self.records.iter().filter(|r| !guard.matches(r)).count()
    }

    /// A fresh collection holding only the records passing the current
    /// filter set, in this collection's order. Shares no caches with this
    /// collection; filtering an already-filtered collection changes
    /// nothing.
    pub fn filter_no_cache(&self) -> Arc<BugSet> {
        let kept: HashList<RecordRef> = {
            let guard = read_filters(&self.filters);
            self.records
                .iter()
                .filter(|r| guard.matches(r))
                .cloned()
                .collect()
        };
        Arc::new(BugSet::from_parts(kept, Arc::clone(&self.filters)))
    }

    pub fn unfiltered_len(&self) -> usize {
        self.records.len()
    }

    pub fn unfiltered_get(&self, index: usize) -> Option<&RecordRef> {
        self.records.get(index)
    }

    pub fn unfiltered_index_of(&self, record: &RecordRef) -> Option<usize> {
        self.records.index_of(record)
    }

    pub fn iter_unfiltered(&self) -> impl Iterator<Item = &RecordRef> {
        self.records.iter()
    }

    /// A copy of this collection re-sorted under `order`, with fresh caches.
    pub fn resorted(&self, order: &[Sortable]) -> Arc<BugSet> {
        let mut list: HashList<RecordRef> = self.records.iter().cloned().collect();
        sort_records(&mut list, order);
        Arc::new(BugSet::from_parts(list, Arc::clone(&self.filters)))
    }

    /// Swaps the memoized sub-collection for `atom`. Used after a branch
    /// re-sort so subsequent queries see the new order.
    pub fn replace_cached(&self, atom: SortableValue, set: Arc<BugSet>) {
        lock(&self.query_cache).insert(atom, set);
    }
}

impl std::fmt::Debug for BugSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BugSet")
            .field("records", &self.records.len())
            .field("built_under", &self.built_under)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_filters(filters: &RwLock<FilterSet>) -> std::sync::RwLockReadGuard<'_, FilterSet> {
    match filters.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Stable chained sort under `order`, skipping the divider marker, with
/// record id as the final tie-break so equal-keyed records keep a
/// deterministic relative order across rebuilds.
fn sort_records(records: &mut HashList<RecordRef>, order: &[Sortable]) {
    records.sort_by(|a, b| {
        for sortable in order.iter().filter(|s| **s != Sortable::Divider) {
            let ordering = sortable.compare_records(a, b);
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        a.id.cmp(&b.id)
    });
}

fn distinct_values(
    records: &HashList<RecordRef>,
    filters: &FilterSet,
) -> HashMap<Sortable, Vec<String>> {
    let mut distinct = HashMap::new();
    for sortable in Sortable::all() {
        if sortable == Sortable::Divider {
            continue;
        }
        let mut values: Vec<String> = records
            .iter()
            .filter(|r| filters.matches(r))
            .map(|r| sortable.extract(r))
            .collect();
        values.sort_by(|a, b| sortable.compare(a, b));
        values.dedup();
        distinct.insert(sortable, values);
    }
    distinct
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Matcher;
    use crate::model::RecordBuilder;

    fn sample_records() -> Vec<RecordRef> {
        vec![
            RecordBuilder::new(1)
                .category("SECURITY")
                .priority(1)
                .class_name("com.example.A")
                .build(),
            RecordBuilder::new(2)
                .category("SECURITY")
                .priority(2)
                .class_name("com.example.B")
                .build(),
            RecordBuilder::new(3)
                .category("CORRECTNESS")
                .priority(1)
                .class_name("com.example.C")
                .build(),
        ]
    }

    fn no_filters() -> Arc<RwLock<FilterSet>> {
        Arc::new(RwLock::new(FilterSet::new()))
    }

    #[test]
    fn query_is_memoized() {
        let set = BugSet::new(sample_records(), no_filters(), &[Sortable::Category]);
        let atom = SortableValue::new(Sortable::Category, "SECURITY");
        let first = set.query(&atom);
        let second = set.query(&atom);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.unfiltered_len(), 2);
    }

    #[test]
    fn path_order_yields_distinct_collections_with_same_content() {
        let set = BugSet::new(sample_records(), no_filters(), &[Sortable::Category]);
        let security = SortableValue::new(Sortable::Category, "SECURITY");
        let high = SortableValue::new(Sortable::Priority, "1");

        let a = set.query_path(&[security.clone(), high.clone()]);
        let b = set.query_path(&[high, security]);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.filtered_len(), b.filtered_len());
        assert_eq!(a.filtered_len(), 1);
    }

    #[test]
    fn filtered_accessors_see_filter_toggles_immediately() {
        let filters = no_filters();
        let set = BugSet::new(sample_records(), Arc::clone(&filters), &[Sortable::Category]);
        assert_eq!(set.filtered_len(), 3);

        filters
            .write()
            .unwrap()
            .add(Matcher::atom(SortableValue::new(Sortable::Category, "SECURITY")));
        assert_eq!(set.filtered_len(), 1);
        assert_eq!(set.filtered()[0].category, "CORRECTNESS");
        // The unfiltered list and the distinct catalog stay as built.
        assert_eq!(set.unfiltered_len(), 3);
        assert_eq!(set.all_values(Sortable::Category), ["CORRECTNESS", "SECURITY"]);
    }

    #[test]
    fn distinct_catalog_covers_only_filter_passing_records() {
        let filters = no_filters();
        filters
            .write()
            .unwrap()
            .add(Matcher::atom(SortableValue::new(Sortable::Category, "CORRECTNESS")));
        let set = BugSet::new(sample_records(), filters, &[Sortable::Category]);
        assert_eq!(set.all_values(Sortable::Category), ["SECURITY"]);
        assert_eq!(set.all_values(Sortable::Priority), ["1", "2"]);
    }

    #[test]
    fn contains_atom_is_memoized_per_collection() {
        let filters = no_filters();
        let set = BugSet::new(sample_records(), Arc::clone(&filters), &[Sortable::Category]);
        let atom = SortableValue::new(Sortable::Category, "SECURITY");
        assert!(set.contains_atom(&atom));

        // Memoized answer survives a filter change; a fresh collection
        // re-evaluates it.
        filters.write().unwrap().add(Matcher::atom(atom.clone()));
        assert!(set.contains_atom(&atom));
        let rebuilt = BugSet::new(sample_records(), filters, &[Sortable::Category]);
        assert!(!rebuilt.contains_atom(&atom));
    }

    #[test]
    fn count_filtered_counts_the_hidden_side() {
        let filters = no_filters();
        let set = BugSet::new(sample_records(), Arc::clone(&filters), &[Sortable::Category]);
        assert_eq!(set.count_filtered(), 0);

        filters
            .write()
            .unwrap()
            .add(Matcher::atom(SortableValue::new(Sortable::Category, "SECURITY")));
        assert_eq!(set.count_filtered(), 2);
        assert_eq!(set.count_filtered() + set.filtered_len(), set.unfiltered_len());
    }

    #[test]
    fn filter_no_cache_is_idempotent() {
        let filters = no_filters();
        filters
            .write()
            .unwrap()
            .add(Matcher::atom(SortableValue::new(Sortable::Priority, "2")));
        let set = BugSet::new(sample_records(), filters, &[Sortable::Category]);

        let once = set.filter_no_cache();
        let twice = once.filter_no_cache();
        let ids = |s: &BugSet| -> Vec<u64> { s.iter_unfiltered().map(|r| r.id).collect() };
        assert_eq!(ids(&once), [3, 1]);
        assert_eq!(ids(&once), ids(&twice));
        assert_eq!(once.count_filtered(), 0);
    }

    #[test]
    fn sort_respects_order_then_id() {
        let set = BugSet::new(
            sample_records(),
            no_filters(),
            &[Sortable::Priority, Sortable::Divider, Sortable::Category],
        );
        let ids: Vec<u64> = set.iter_unfiltered().map(|r| r.id).collect();
        // Priority 1 first (CORRECTNESS before SECURITY), then priority 2.
        assert_eq!(ids, [3, 1, 2]);
    }

    #[test]
    fn suppressed_records_drop_out_of_filtered_views() {
        let records = sample_records();
        let suppressed = Arc::clone(&records[0]);
        let set = BugSet::new(records, no_filters(), &[Sortable::Category]);
        assert_eq!(set.filtered_len(), 3);
        suppressed.set_suppressed(true);
        assert_eq!(set.filtered_len(), 2);
        assert_eq!(set.filtered_index_of(&suppressed), None);
        assert!(set.unfiltered_index_of(&suppressed).is_some());
    }
}
