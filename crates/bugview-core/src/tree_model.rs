//! The grouping tree over a record collection.
//!
//! Nodes are addressed by value, not by reference: a branch is its path of
//! predicate atoms from the root, a leaf is a branch path plus a record.
//! There are no child-to-parent or node-to-tree back references; every
//! navigation question is answered by querying the backing collection, so
//! a branch's child list and count can never disagree with the records it
//! covers.
//!
//! Mutations follow two event disciplines. Insertions update the model
//! first and compute paths and indices from the fresh state. Removals
//! compute paths and indices from the stale state first, then update the
//! model. Both emit to listeners only after the model is consistent.

use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::bug_set::BugSet;
use crate::matcher::FilterSet;
use crate::model::{BugRecord, RecordRef};
use crate::sorter::{SortOrder, SortOrderChanges};
use crate::sortables::SortableValue;

/// A branch node: the atom path from the root plus the number of visible
/// records underneath it at the time it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BugAspects {
    atoms: Vec<SortableValue>,
    count: usize,
}

impl BugAspects {
    pub fn root(count: usize) -> BugAspects {
        BugAspects { atoms: Vec::new(), count }
    }

    pub fn new(atoms: Vec<SortableValue>, count: usize) -> BugAspects {
        BugAspects { atoms, count }
    }

    /// A copy of this path extended by one atom. Paths are values; the
    /// original is untouched.
    pub fn child(&self, atom: SortableValue, count: usize) -> BugAspects {
        let mut atoms = self.atoms.clone();
        atoms.push(atom);
        BugAspects { atoms, count }
    }

    pub fn atoms(&self) -> &[SortableValue] {
        &self.atoms
    }

    pub fn last(&self) -> Option<&SortableValue> {
        self.atoms.last()
    }

    pub fn depth(&self) -> usize {
        self.atoms.len()
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl fmt::Display for BugAspects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.atoms.last() {
            Some(atom) => write!(f, "{} ({})", atom.display(), self.count),
            None => write!(f, "All findings ({})", self.count),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TreeNode {
    Branch(BugAspects),
    Leaf(RecordRef),
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self, TreeNode::Leaf(_))
    }
}

/// One tree mutation, addressed to the parent branch it happened under.
#[derive(Debug, Clone)]
pub struct TreeEvent {
    /// Atom path of the parent branch the change happened under.
    pub parent: Vec<SortableValue>,
    /// Indices of the affected children within the parent, in the state
    /// the event kind prescribes (fresh for inserts, stale for removals).
    pub child_indices: Vec<usize>,
    pub children: Vec<TreeNode>,
}

impl TreeEvent {
    fn structure(parent: Vec<SortableValue>) -> TreeEvent {
        TreeEvent { parent, child_indices: Vec::new(), children: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeModification {
    Insert,
    Remove,
    Restructure,
}

/// Observer of tree mutations. Implementations run on the caller's thread;
/// a UI boundary forwards these through its own channel.
pub trait TreeModelListener: Send {
    fn nodes_changed(&self, event: &TreeEvent);
    fn nodes_inserted(&self, event: &TreeEvent);
    fn nodes_removed(&self, event: &TreeEvent);
    fn structure_changed(&self, event: &TreeEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A branch operation could not find the branch it targets. Recoverable:
/// the caller proceeds with its model update and skips the tree event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNotFound {
    pub path: Vec<SortableValue>,
}

impl fmt::Display for BranchNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.path.iter().map(|a| a.to_string()).collect();
        write!(f, "no branch at [{}]", parts.join(", "))
    }
}

impl std::error::Error for BranchNotFound {}

pub struct BugTreeModel {
    records: Vec<RecordRef>,
    filters: Arc<RwLock<FilterSet>>,
    order: SortOrder,
    root: Arc<BugSet>,
    listeners: Vec<(ListenerId, Box<dyn TreeModelListener>)>,
    next_listener_id: u64,
}

impl BugTreeModel {
    pub fn new(
        records: Vec<RecordRef>,
        filters: Arc<RwLock<FilterSet>>,
        order: SortOrder,
    ) -> BugTreeModel {
        let root = BugSet::new(records.clone(), Arc::clone(&filters), order.order());
        BugTreeModel {
            records,
            filters,
            order,
            root,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    pub fn order(&self) -> &SortOrder {
        &self.order
    }

    pub fn root_set(&self) -> &Arc<BugSet> {
        &self.root
    }

    pub fn add_listener(&mut self, listener: Box<dyn TreeModelListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Moves all listeners onto another model. Used when a background
    /// rebuild produces a replacement tree.
    pub fn take_listeners(&mut self) -> Vec<(ListenerId, Box<dyn TreeModelListener>)> {
        std::mem::take(&mut self.listeners)
    }

    pub fn adopt_listeners(
        &mut self,
        listeners: Vec<(ListenerId, Box<dyn TreeModelListener>)>,
    ) {
        for (id, _) in &listeners {
            self.next_listener_id = self.next_listener_id.max(id.0 + 1);
        }
        self.listeners.extend(listeners);
    }

    pub fn root(&self) -> TreeNode {
        TreeNode::Branch(BugAspects::root(self.root.filtered_len()))
    }

    fn grouping_depth(&self) -> usize {
        self.order.before_divider().len()
    }

    /// Distinct child values under a branch, in attribute order. Empty when
    /// the branch is at (or past) the last grouping level.
    pub fn enums_that_exist(&self, path: &[SortableValue]) -> Vec<String> {
        if path.len() >= self.grouping_depth() {
            return Vec::new();
        }
        let key = self.order.before_divider()[path.len()];
        self.root.query_path(path).all_values(key).to_vec()
    }

    pub fn child_count(&self, path: &[SortableValue]) -> usize {
        if path.len() < self.grouping_depth() {
            self.enums_that_exist(path).len()
        } else if path.len() == self.grouping_depth() {
            self.root.query_path(path).filtered_len()
        } else {
            0
        }
    }

    /// The `index`-th child of the branch at `path`, or `None` when the
    /// index is out of range. Out-of-range asks are expected during
    /// view/model races and are answered without panicking.
    pub fn child(&self, path: &[SortableValue], index: usize) -> Option<TreeNode> {
        if path.len() < self.grouping_depth() {
            let key = self.order.before_divider()[path.len()];
            let set = self.root.query_path(path);
            let Some(value) = set.all_values(key).get(index) else {
                debug!(index, depth = path.len(), "child index out of range");
                return None;
            };
            let atom = SortableValue::new(key, value.clone());
            let count = set.query(&atom).filtered_len();
            let mut atoms = path.to_vec();
            atoms.push(atom);
            Some(TreeNode::Branch(BugAspects::new(atoms, count)))
        } else if path.len() == self.grouping_depth() {
            let set = self.root.query_path(path);
            match set.filtered_get(index) {
                Some(record) => Some(TreeNode::Leaf(record)),
                None => {
                    debug!(index, depth = path.len(), "leaf index out of range");
                    None
                }
            }
        } else {
            None
        }
    }

    pub fn index_of_child(&self, path: &[SortableValue], node: &TreeNode) -> Option<usize> {
        match node {
            TreeNode::Branch(aspects) => {
                let atom = aspects.last()?;
                self.branch_index(path, atom)
            }
            TreeNode::Leaf(record) => {
                self.root.query_path(path).filtered_index_of(record)
            }
        }
    }

    fn branch_index(&self, parent: &[SortableValue], atom: &SortableValue) -> Option<usize> {
        self.root
            .query_path(parent)
            .all_values(atom.key)
            .iter()
            .position(|v| *v == atom.value)
    }

    /// Re-resolves a branch path to per-level child indices in the current
    /// tree. Paths are values, so a selection recorded before a rebuild can
    /// be reopened against the replacement tree; `None` when any step of
    /// the path no longer exists or no longer matches the grouping order.
    pub fn resolve_path(&self, path: &[SortableValue]) -> Option<Vec<usize>> {
        if path.len() > self.grouping_depth() {
            return None;
        }
        let mut indices = Vec::with_capacity(path.len());
        for depth in 0..path.len() {
            let atom = &path[depth];
            if atom.key != self.order.before_divider()[depth] {
                return None;
            }
            indices.push(self.branch_index(&path[..depth], atom)?);
        }
        Some(indices)
    }

    /// The grouping-atom path a record belongs under, derived from the
    /// current sort order.
    pub fn path_to_record(&self, record: &BugRecord) -> Vec<SortableValue> {
        self.order
            .before_divider()
            .iter()
            .map(|s| SortableValue::new(*s, s.extract(record)))
            .collect()
    }

    /// Hides a record. The removal event is computed from the stale state:
    /// the topmost ancestor branch left empty by this removal is the node
    /// that disappears; if no branch empties, a single leaf does.
    pub fn suppress_record(&mut self, record: &RecordRef) {
        let path = self.path_to_record(record);
        let event = self.removal_event(&path, record);

        record.set_suppressed(true);
        self.reset_data();

        if let Some(event) = event {
            let parent = event.parent.clone();
            self.emit(&event, TreeModification::Remove);
            self.emit_ancestor_counts(&parent);
        }
    }

    /// Reveals a previously suppressed record. The model is updated first;
    /// the insertion event is computed from the fresh state: the topmost
    /// ancestor branch this record brought into existence is the node that
    /// appears, otherwise a single leaf does.
    pub fn unsuppress_record(&mut self, record: &RecordRef) {
        record.set_suppressed(false);
        self.reset_data();

        let path = self.path_to_record(record);
        if self.root.query_path(&path).filtered_index_of(record).is_none() {
            // Still hidden by filters; nothing visible changed.
            return;
        }
        let event = self.insertion_event(&path, record);
        if let Some(event) = event {
            let parent = event.parent.clone();
            self.emit(&event, TreeModification::Insert);
            self.emit_ancestor_counts(&parent);
        }
    }

    /// Stale-state removal event for taking `record` out from under `path`.
    /// `None` when the record is not currently visible.
    fn removal_event(&self, path: &[SortableValue], record: &RecordRef) -> Option<TreeEvent> {
        let leaf_set = self.root.query_path(path);
        let leaf_index = leaf_set.filtered_index_of(record)?;

        // Topmost ancestor whose only visible record is this one.
        for depth in 1..=path.len() {
            let prefix = &path[..depth];
            let set = self.root.query_path(prefix);
            if set.filtered_len() == 1 {
                let atom = &prefix[depth - 1];
                let index = self.branch_index(&prefix[..depth - 1], atom)?;
                let aspects = BugAspects::new(prefix.to_vec(), 1);
                return Some(TreeEvent {
                    parent: prefix[..depth - 1].to_vec(),
                    child_indices: vec![index],
                    children: vec![TreeNode::Branch(aspects)],
                });
            }
        }
        Some(TreeEvent {
            parent: path.to_vec(),
            child_indices: vec![leaf_index],
            children: vec![TreeNode::Leaf(Arc::clone(record))],
        })
    }

    /// Fresh-state insertion event for `record` appearing under `path`.
    fn insertion_event(&self, path: &[SortableValue], record: &RecordRef) -> Option<TreeEvent> {
        for depth in 1..=path.len() {
            let prefix = &path[..depth];
            let set = self.root.query_path(prefix);
            if set.filtered_len() == 1 {
                let atom = &prefix[depth - 1];
                let index = self.branch_index(&prefix[..depth - 1], atom)?;
                let aspects = BugAspects::new(prefix.to_vec(), 1);
                return Some(TreeEvent {
                    parent: prefix[..depth - 1].to_vec(),
                    child_indices: vec![index],
                    children: vec![TreeNode::Branch(aspects)],
                });
            }
        }
        let leaf_set = self.root.query_path(path);
        let leaf_index = leaf_set.filtered_index_of(record)?;
        Some(TreeEvent {
            parent: path.to_vec(),
            child_indices: vec![leaf_index],
            children: vec![TreeNode::Leaf(Arc::clone(record))],
        })
    }

    /// Prepares the removal event for an entire branch, typically because a
    /// filter hiding exactly that branch is about to be activated. Phase
    /// one of two: the caller applies its model update, then passes the
    /// event to `send_event`.
    pub fn remove_branch(&self, path: &[SortableValue]) -> Result<TreeEvent, BranchNotFound> {
        let (parent, atom) = split_branch_path(path)?;
        let index = self
            .branch_index(parent, atom)
            .ok_or_else(|| BranchNotFound { path: path.to_vec() })?;
        let count = self.root.query_path(path).filtered_len();
        if count == 0 {
            return Err(BranchNotFound { path: path.to_vec() });
        }
        Ok(TreeEvent {
            parent: parent.to_vec(),
            child_indices: vec![index],
            children: vec![TreeNode::Branch(BugAspects::new(path.to_vec(), count))],
        })
    }

    /// Prepares the insertion event for a branch that a just-applied model
    /// update (typically a filter deactivation plus `reset_data`) made
    /// visible. Fresh-state indices per the insertion discipline.
    pub fn insert_branch(&self, path: &[SortableValue]) -> Result<TreeEvent, BranchNotFound> {
        let (parent, atom) = split_branch_path(path)?;
        let index = self
            .branch_index(parent, atom)
            .ok_or_else(|| BranchNotFound { path: path.to_vec() })?;
        let count = self.root.query_path(path).filtered_len();
        if count == 0 {
            return Err(BranchNotFound { path: path.to_vec() });
        }
        Ok(TreeEvent {
            parent: parent.to_vec(),
            child_indices: vec![index],
            children: vec![TreeNode::Branch(BugAspects::new(path.to_vec(), count))],
        })
    }

    /// Prepares a structure-changed event for the branch at `path`, used
    /// when its children changed wholesale.
    pub fn restructure_branch(
        &self,
        path: &[SortableValue],
    ) -> Result<TreeEvent, BranchNotFound> {
        if !path.is_empty() {
            let (parent, atom) = split_branch_path(path)?;
            self.branch_index(parent, atom)
                .ok_or_else(|| BranchNotFound { path: path.to_vec() })?;
        }
        Ok(TreeEvent::structure(path.to_vec()))
    }

    /// Phase two of the branch operations: emit a prepared event after the
    /// caller's model update completed.
    pub fn send_event(&self, event: &TreeEvent, kind: TreeModification) {
        self.emit(event, kind);
        if kind != TreeModification::Restructure {
            let parent = event.parent.clone();
            self.emit_ancestor_counts(&parent);
        }
    }

    /// Re-sorts one branch's records under the current order and announces
    /// the branch as restructured.
    pub fn sort_branch(&self, path: &[SortableValue]) -> Result<(), BranchNotFound> {
        let (parent, atom) = split_branch_path(path)?;
        let parent_set = self.root.query_path(parent);
        if self.branch_index(parent, atom).is_none() {
            return Err(BranchNotFound { path: path.to_vec() });
        }
        let sorted = parent_set.query(atom).resorted(self.order.order());
        parent_set.replace_cached(atom.clone(), sorted);
        self.emit(&TreeEvent::structure(path.to_vec()), TreeModification::Restructure);
        Ok(())
    }

    /// Announces a content change on a single node, e.g. a designation
    /// edit changing a leaf's display text.
    pub fn tree_node_changed(&self, path: &[SortableValue], node: TreeNode) {
        let indices = match self.index_of_child(path, &node) {
            Some(i) => vec![i],
            None => Vec::new(),
        };
        let event =
            TreeEvent { parent: path.to_vec(), child_indices: indices, children: vec![node] };
        for (_, listener) in &self.listeners {
            listener.nodes_changed(&event);
        }
    }

    /// Drops every derived cache by building a fresh backing collection
    /// over the same records and filters.
    pub fn reset_data(&mut self) {
        self.root = BugSet::new(
            self.records.clone(),
            Arc::clone(&self.filters),
            self.order.order(),
        );
    }

    /// Swaps in a rebuilt collection and order, announcing a full
    /// structural change. Used by the background rebuild path.
    pub fn change_set(&mut self, root: Arc<BugSet>, order: SortOrder) {
        self.order = order;
        self.root = root;
        let event = TreeEvent::structure(Vec::new());
        for (_, listener) in &self.listeners {
            listener.structure_changed(&event);
        }
    }

    /// Reacts to accumulated sort-order changes, adopting the caller's
    /// updated order. Pure reorders are handled in place with a re-sort;
    /// set changes need a full rebuild, which is signalled to the caller
    /// rather than done here.
    pub fn check_sorter(&mut self, order: &SortOrder, changes: SortOrderChanges) -> bool {
        self.order = order.clone();
        if changes.set_changed {
            return true;
        }
        if changes.order_changed {
            self.reset_data();
            let event = TreeEvent::structure(Vec::new());
            for (_, listener) in &self.listeners {
                listener.structure_changed(&event);
            }
        }
        false
    }

    fn emit(&self, event: &TreeEvent, kind: TreeModification) {
        for (_, listener) in &self.listeners {
            match kind {
                TreeModification::Insert => listener.nodes_inserted(event),
                TreeModification::Remove => listener.nodes_removed(event),
                TreeModification::Restructure => listener.structure_changed(event),
            }
        }
    }

    /// Changed events for every surviving branch from `parent` up to the
    /// root, so displayed counts refresh.
    fn emit_ancestor_counts(&self, parent: &[SortableValue]) {
        for depth in (1..=parent.len()).rev() {
            let prefix = &parent[..depth];
            let count = self.root.query_path(prefix).filtered_len();
            if count == 0 {
                continue;
            }
            let node = TreeNode::Branch(BugAspects::new(prefix.to_vec(), count));
            self.tree_node_changed(&prefix[..depth - 1], node);
        }
    }
}

fn split_branch_path(
    path: &[SortableValue],
) -> Result<(&[SortableValue], &SortableValue), BranchNotFound> {
    match path.split_last() {
        Some((atom, parent)) => Ok((parent, atom)),
        None => Err(BranchNotFound { path: Vec::new() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordBuilder;
    use crate::sortables::Sortable;
    use std::sync::Mutex;

    fn records() -> Vec<RecordRef> {
        vec![
            RecordBuilder::new(1).category("SECURITY").priority(1).build(),
            RecordBuilder::new(2).category("SECURITY").priority(2).build(),
            RecordBuilder::new(3).category("CORRECTNESS").priority(1).build(),
        ]
    }

    fn model(records: Vec<RecordRef>) -> BugTreeModel {
        let filters = Arc::new(RwLock::new(FilterSet::new()));
        let order = SortOrder::new(vec![
            Sortable::Category,
            Sortable::Priority,
            Sortable::Divider,
        ]);
        BugTreeModel::new(records, filters, order)
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(TreeModification, Vec<SortableValue>, Vec<usize>)>>,
        changed: Mutex<Vec<Vec<SortableValue>>>,
    }

    impl Recorder {
        fn log(&self, kind: TreeModification, event: &TreeEvent) {
            self.events.lock().unwrap().push((
                kind,
                event.parent.clone(),
                event.child_indices.clone(),
            ));
        }
    }

    impl TreeModelListener for Arc<Recorder> {
        fn nodes_changed(&self, event: &TreeEvent) {
            self.changed.lock().unwrap().push(event.parent.clone());
        }
        fn nodes_inserted(&self, event: &TreeEvent) {
            self.log(TreeModification::Insert, event);
        }
        fn nodes_removed(&self, event: &TreeEvent) {
            self.log(TreeModification::Remove, event);
        }
        fn structure_changed(&self, event: &TreeEvent) {
            self.log(TreeModification::Restructure, event);
        }
    }

    fn atom(key: Sortable, value: &str) -> SortableValue {
        SortableValue::new(key, value)
    }

    #[test]
    fn navigation_reflects_grouping_order() {
        let m = model(records());
        // Category level: CORRECTNESS before SECURITY.
        assert_eq!(m.child_count(&[]), 2);
        let TreeNode::Branch(first) = m.child(&[], 0).unwrap() else {
            panic!("expected branch")
        };
        assert_eq!(first.last().unwrap().value, "CORRECTNESS");
        assert_eq!(first.count(), 1);

        let security = [atom(Sortable::Category, "SECURITY")];
        assert_eq!(m.child_count(&security), 2);
        let leaf_path = [
            atom(Sortable::Category, "SECURITY"),
            atom(Sortable::Priority, "1"),
        ];
        assert_eq!(m.child_count(&leaf_path), 1);
        let TreeNode::Leaf(record) = m.child(&leaf_path, 0).unwrap() else {
            panic!("expected leaf")
        };
        assert_eq!(record.id, 1);
        assert!(m.child(&leaf_path, 5).is_none());
    }

    #[test]
    fn counts_always_match_query_sizes() {
        let m = model(records());
        for index in 0..m.child_count(&[]) {
            let TreeNode::Branch(branch) = m.child(&[], index).unwrap() else {
                panic!("expected branch")
            };
            let set = m.root_set().query_path(branch.atoms());
            assert_eq!(branch.count(), set.filtered_len());
        }
    }

    #[test]
    fn suppressing_last_record_collapses_topmost_empty_ancestor() {
        let recs = records();
        let correctness_record = Arc::clone(&recs[2]);
        let mut m = model(recs);
        let recorder = Arc::new(Recorder::default());
        m.add_listener(Box::new(Arc::clone(&recorder)));

        m.suppress_record(&correctness_record);

        let events = recorder.events.lock().unwrap();
        // The whole CORRECTNESS branch goes, removed from the root at its
        // stale index 0.
        assert_eq!(events.len(), 1);
        let (kind, parent, indices) = &events[0];
        assert_eq!(*kind, TreeModification::Remove);
        assert!(parent.is_empty());
        assert_eq!(indices, &[0]);
        drop(events);

        assert_eq!(m.child_count(&[]), 1);
        let TreeNode::Branch(only) = m.child(&[], 0).unwrap() else {
            panic!("expected branch")
        };
        assert_eq!(only.last().unwrap().value, "SECURITY");
    }

    #[test]
    fn suppressing_one_of_many_removes_a_leaf_and_updates_counts() {
        let recs = records();
        let record = Arc::clone(&recs[0]);
        let mut m = model(recs);
        let recorder = Arc::new(Recorder::default());
        m.add_listener(Box::new(Arc::clone(&recorder)));

        m.suppress_record(&record);

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let (kind, parent, _) = &events[0];
        assert_eq!(*kind, TreeModification::Remove);
        // Priority 1 under SECURITY had exactly this record: the branch
        // SECURITY/1 collapses, removed from SECURITY.
        assert_eq!(parent, &[atom(Sortable::Category, "SECURITY")]);
        drop(events);

        // Surviving ancestors got count-changed notifications.
        assert!(!recorder.changed.lock().unwrap().is_empty());
        assert_eq!(m.child_count(&[atom(Sortable::Category, "SECURITY")]), 1);
    }

    #[test]
    fn unsuppress_restores_with_fresh_state_indices() {
        let recs = records();
        let record = Arc::clone(&recs[2]);
        let mut m = model(recs);
        m.suppress_record(&record);
        assert_eq!(m.child_count(&[]), 1);

        let recorder = Arc::new(Recorder::default());
        m.add_listener(Box::new(Arc::clone(&recorder)));
        m.unsuppress_record(&record);

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let (kind, parent, indices) = &events[0];
        assert_eq!(*kind, TreeModification::Insert);
        assert!(parent.is_empty());
        // CORRECTNESS sorts before SECURITY in the fresh child list.
        assert_eq!(indices, &[0]);
        drop(events);
        assert_eq!(m.child_count(&[]), 2);
    }

    #[test]
    fn suppressing_an_already_hidden_record_is_silent() {
        let recs = records();
        let record = Arc::clone(&recs[0]);
        record.set_suppressed(true);
        let mut m = model(recs);
        let recorder = Arc::new(Recorder::default());
        m.add_listener(Box::new(Arc::clone(&recorder)));

        m.suppress_record(&record);
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[test]
    fn remove_branch_two_phase() {
        let recs = records();
        let mut m = model(recs);
        let recorder = Arc::new(Recorder::default());
        m.add_listener(Box::new(Arc::clone(&recorder)));

        let path = [atom(Sortable::Category, "SECURITY")];
        let event = m.remove_branch(&path).unwrap();
        assert_eq!(event.child_indices, [1]);

        // Model update between the phases: hide the branch via filter.
        {
            let mut filters = m.filters.write().unwrap();
            filters.add(crate::matcher::Matcher::stacked(vec![atom(
                Sortable::Category,
                "SECURITY",
            )]));
        }
        m.reset_data();
        m.send_event(&event, TreeModification::Remove);

        assert_eq!(m.child_count(&[]), 1);
        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, TreeModification::Remove);
    }

    #[test]
    fn branch_operations_report_missing_branches() {
        let m = model(records());
        let missing = [atom(Sortable::Category, "STYLE")];
        assert!(m.remove_branch(&missing).is_err());
        assert!(m.insert_branch(&missing).is_err());
        assert!(m.restructure_branch(&missing).is_err());
        assert!(m.sort_branch(&missing).is_err());
    }

    #[test]
    fn check_sorter_resorts_in_place_or_requests_rebuild() {
        let mut m = model(records());
        let recorder = Arc::new(Recorder::default());
        m.add_listener(Box::new(Arc::clone(&recorder)));

        let order = SortOrder::new(vec![
            Sortable::Priority,
            Sortable::Category,
            Sortable::Divider,
        ]);
        let reorder = SortOrderChanges { order_changed: true, set_changed: false };
        assert!(!m.check_sorter(&order, reorder));
        assert_eq!(
            recorder.events.lock().unwrap().last().unwrap().0,
            TreeModification::Restructure
        );
        // The adopted order now drives grouping.
        let TreeNode::Branch(first) = m.child(&[], 0).unwrap() else {
            panic!("expected branch")
        };
        assert_eq!(first.last().unwrap().key, Sortable::Priority);

        let set_change = SortOrderChanges { order_changed: false, set_changed: true };
        assert!(m.check_sorter(&order, set_change));
    }

    #[test]
    fn resolve_path_survives_collection_swaps() {
        let recs = records();
        let correctness_record = Arc::clone(&recs[2]);
        let mut m = model(recs);

        let path = [
            atom(Sortable::Category, "SECURITY"),
            atom(Sortable::Priority, "2"),
        ];
        // CORRECTNESS sorts first, so SECURITY sits at index 1.
        assert_eq!(m.resolve_path(&path), Some(vec![1, 1]));

        m.suppress_record(&correctness_record);
        // Same value path, new indices against the rebuilt collection.
        assert_eq!(m.resolve_path(&path), Some(vec![0, 1]));

        assert_eq!(m.resolve_path(&[atom(Sortable::Category, "STYLE")]), None);
        // Keys out of step with the grouping order never resolve.
        assert_eq!(m.resolve_path(&[atom(Sortable::Priority, "1")]), None);
    }

    #[test]
    fn listeners_move_between_models() {
        let mut a = model(records());
        let recorder = Arc::new(Recorder::default());
        a.add_listener(Box::new(Arc::clone(&recorder)));

        let mut b = model(records());
        b.adopt_listeners(a.take_listeners());
        b.change_set(
            Arc::clone(b.root_set()),
            SortOrder::new(vec![Sortable::Category, Sortable::Divider]),
        );
        assert_eq!(
            recorder.events.lock().unwrap().last().unwrap().0,
            TreeModification::Restructure
        );
    }
}
