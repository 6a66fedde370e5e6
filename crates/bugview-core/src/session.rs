//! One viewing session: the records under inspection, the shared filter
//! set, the sort order and the grouping tree, plus the background rebuild
//! coordinator. All state that the original design kept in globals is
//! owned here and passed down explicitly.

use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::matcher::{FilterSet, Matcher};
use crate::model::RecordRef;
use crate::rebuild::{RebuildCoordinator, RebuildRequest};
use crate::sorter::SortOrder;
use crate::sortables::{Sortable, SortableValue};
use crate::tree_model::{BugTreeModel, TreeModification};

pub struct ViewSession {
    records: Vec<RecordRef>,
    filters: Arc<RwLock<FilterSet>>,
    sorter: SortOrder,
    tree: BugTreeModel,
    coordinator: RebuildCoordinator,
}

impl ViewSession {
    pub fn new(records: Vec<RecordRef>, sorter: SortOrder) -> ViewSession {
        let filters = Arc::new(RwLock::new(FilterSet::new()));
        let tree = BugTreeModel::new(records.clone(), Arc::clone(&filters), sorter.clone());
        ViewSession {
            records,
            filters,
            sorter,
            tree,
            coordinator: RebuildCoordinator::new(),
        }
    }

    pub fn tree(&self) -> &BugTreeModel {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut BugTreeModel {
        &mut self.tree
    }

    pub fn sorter(&self) -> &SortOrder {
        &self.sorter
    }

    pub fn filters(&self) -> &Arc<RwLock<FilterSet>> {
        &self.filters
    }

    fn write_filters(&self) -> RwLockWriteGuard<'_, FilterSet> {
        match self.filters.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Hides one tree branch by activating a stacked filter built from its
    /// atom path. Returns false when an equal filter already exists.
    ///
    /// When the branch cannot be located (the view raced a rebuild), the
    /// filter is still activated; only the incremental tree event is
    /// skipped and the next rebuild reconciles the view.
    pub fn apply_branch_filter(&mut self, path: Vec<SortableValue>) -> bool {
        let matcher = Matcher::stacked(path.clone());
        if self.write_filters().contains(&matcher) {
            debug!("branch filter already present");
            return false;
        }

        let event = match self.tree.remove_branch(&path) {
            Ok(event) => Some(event),
            Err(missing) => {
                warn!(%missing, "branch filter target not in tree, activating anyway");
                None
            }
        };
        self.write_filters().add(matcher);
        self.tree.reset_data();
        if let Some(event) = event {
            self.tree.send_event(&event, TreeModification::Remove);
        }
        true
    }

    /// Disables or re-enables the filter at `index`. A stacked filter
    /// whose atoms line up with the current grouping prefix is translated
    /// into a minimal tree event in either direction (branch removed on
    /// activation, restored on deactivation); everything else rebuilds.
    pub fn set_filter_active(&mut self, index: usize, active: bool) {
        let branch = {
            let filters = self.write_filters();
            match filters.matchers().get(index) {
                Some(m) if m.active != active => {
                    m.as_stacked().and_then(|atoms| self.branch_path_for(atoms))
                }
                _ => return,
            }
        };
        if active {
            // Removal indices are stale-state: compute the event before
            // the filter takes effect.
            let removal = branch.and_then(|path| self.tree.remove_branch(&path).ok());
            self.write_filters().set_active(index, active);
            match removal {
                Some(event) => {
                    self.tree.reset_data();
                    self.tree.send_event(&event, TreeModification::Remove);
                }
                None => self.request_rebuild(),
            }
        } else {
            self.write_filters().set_active(index, active);
            self.after_filter_change(branch);
        }
    }

    /// Removes the filter at `index` entirely.
    pub fn remove_filter(&mut self, index: usize) {
        let restored = {
            let mut filters = self.write_filters();
            match filters.remove(index) {
                Some(removed) if removed.active => removed
                    .as_stacked()
                    .and_then(|atoms| self.branch_path_for(atoms)),
                Some(_) => return,
                None => return,
            }
        };
        self.after_filter_change(restored);
    }

    fn after_filter_change(&mut self, restored_branch: Option<Vec<SortableValue>>) {
        match restored_branch {
            Some(path) => {
                self.tree.reset_data();
                match self.tree.insert_branch(&path) {
                    Ok(event) => self.tree.send_event(&event, TreeModification::Insert),
                    Err(missing) => {
                        // Nothing visible came back (all records under the
                        // branch are hidden by other filters).
                        debug!(%missing, "restored filter revealed no branch");
                    }
                }
            }
            None => self.request_rebuild(),
        }
    }

    /// Reorders the stacked atoms to the current grouping prefix, or None
    /// when they do not form one (wrong keys, or grouping changed since
    /// the filter was created).
    fn branch_path_for(&self, atoms: &[SortableValue]) -> Option<Vec<SortableValue>> {
        let grouping = self.sorter.before_divider();
        if atoms.len() > grouping.len() {
            return None;
        }
        let mut path = Vec::with_capacity(atoms.len());
        for key in &grouping[..atoms.len()] {
            let atom = atoms.iter().find(|a| a.key == *key)?;
            path.push(atom.clone());
        }
        Some(path)
    }

    pub fn suppress(&mut self, record: &RecordRef) {
        self.tree.suppress_record(record);
    }

    pub fn unsuppress(&mut self, record: &RecordRef) {
        self.tree.unsuppress_record(record);
    }

    /// Records a user designation. Leaf-only display data unless the
    /// designation participates in grouping, in which case the record may
    /// move branches and the tree rebuilds.
    pub fn set_designation(&mut self, record: &RecordRef, designation: &str) {
        record.set_designation(designation);
        if self.sorter.before_divider().contains(&Sortable::Designation) {
            self.request_rebuild();
        } else {
            self.tree.reset_data();
            let path = self.tree.path_to_record(record);
            self.tree.tree_node_changed(
                &path,
                crate::tree_model::TreeNode::Leaf(Arc::clone(record)),
            );
        }
    }

    pub fn move_sortable(&mut self, from: usize, to: usize) -> bool {
        if !self.sorter.move_sortable(from, to) {
            return false;
        }
        self.apply_sorter_changes();
        true
    }

    pub fn insert_sortable(&mut self, position: usize, sortable: Sortable) -> bool {
        if !self.sorter.insert(position, sortable) {
            return false;
        }
        self.apply_sorter_changes();
        true
    }

    pub fn remove_sortable(&mut self, sortable: Sortable) -> bool {
        if !self.sorter.remove(sortable) {
            return false;
        }
        self.apply_sorter_changes();
        true
    }

    fn apply_sorter_changes(&mut self) {
        let changes = self.sorter.take_changes();
        if self.tree.check_sorter(&self.sorter, changes) {
            self.request_rebuild();
        }
    }

    /// Kicks off a background rebuild. The sort order freezes until every
    /// outstanding rebuild (including a coalesced follow-up) has been
    /// applied by `pump`.
    pub fn request_rebuild(&mut self) {
        info!("requesting tree rebuild");
        self.sorter.freeze();
        self.coordinator.trigger(RebuildRequest {
            records: self.records.clone(),
            filters: Arc::clone(&self.filters),
            order: self.sorter.clone(),
        });
    }

    pub fn is_rebuilding(&self) -> bool {
        self.coordinator.is_rebuilding()
    }

    /// Applies any finished rebuilds. Call from the owning loop; thaws the
    /// sort order once no rebuild remains in flight.
    pub fn pump(&mut self) {
        while let Some(outcome) = self.coordinator.try_outcome() {
            self.tree.change_set(outcome.root, outcome.order);
        }
        if !self.coordinator.is_rebuilding() {
            self.sorter.thaw();
        }
    }

    /// Blocks until the next rebuild finishes (or the timeout passes) and
    /// applies it. For callers without their own event loop.
    pub fn pump_wait(&mut self, timeout: Duration) -> bool {
        match self.coordinator.wait_outcome(timeout) {
            Some(outcome) => {
                self.tree.change_set(outcome.root, outcome.order);
                if !self.coordinator.is_rebuilding() {
                    self.sorter.thaw();
                }
                true
            }
            None => false,
        }
    }
}
