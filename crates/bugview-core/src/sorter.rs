//! The user-visible sort order: an ordered list of attributes with a
//! divider splitting grouping attributes (before) from sort-only
//! attributes (after). The order can be frozen during background rebuilds;
//! frozen mutations are rejected, not queued.

use tracing::debug;

use crate::sortables::Sortable;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortOrderChanges {
    /// Attributes were reordered without changing the set on either side
    /// of the divider.
    pub order_changed: bool,
    /// Attributes were added, removed, or moved across the divider; the
    /// grouping structure itself is different.
    pub set_changed: bool,
}

impl SortOrderChanges {
    pub fn any(self) -> bool {
        self.order_changed || self.set_changed
    }
}

#[derive(Debug, Clone)]
pub struct SortOrder {
    order: Vec<Sortable>,
    frozen: bool,
    changes: SortOrderChanges,
}

impl SortOrder {
    /// `order` must contain `Divider` exactly once; attributes before it
    /// group, attributes after it only sort leaves.
    pub fn new(order: Vec<Sortable>) -> SortOrder {
        assert_eq!(
            order.iter().filter(|s| **s == Sortable::Divider).count(),
            1,
            "sort order needs exactly one divider"
        );
        SortOrder { order, frozen: false, changes: SortOrderChanges::default() }
    }

    pub fn order(&self) -> &[Sortable] {
        &self.order
    }

    fn divider_position(&self) -> usize {
        self.order
            .iter()
            .position(|s| *s == Sortable::Divider)
            .expect("divider present by construction")
    }

    /// The grouping attributes, i.e. one tree level each.
    pub fn before_divider(&self) -> &[Sortable] {
        &self.order[..self.divider_position()]
    }

    /// Sort-only attributes applied to leaf lists after grouping.
    pub fn after_divider(&self) -> &[Sortable] {
        &self.order[self.divider_position() + 1..]
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Rejects mutation while a rebuild is consuming this order.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn thaw(&mut self) {
        self.frozen = false;
    }

    /// Moves the attribute at `from` to `to`. Returns false (and does
    /// nothing) while frozen or out of bounds.
    pub fn move_sortable(&mut self, from: usize, to: usize) -> bool {
        if self.frozen {
            debug!(from, to, "sort order frozen, move rejected");
            return false;
        }
        if from >= self.order.len() || to >= self.order.len() {
            return false;
        }
        if from == to {
            return true;
        }
        let divider_before = self.divider_position();
        let moved = self.order.remove(from);
        self.order.insert(to, moved);
        let crossed = (from < divider_before) != (to < self.divider_position());
        if moved == Sortable::Divider || crossed {
            self.changes.set_changed = true;
        } else {
            self.changes.order_changed = true;
        }
        true
    }

    /// Adds an attribute at `position`; false while frozen, already
    /// present, or when inserting the divider (there is exactly one).
    pub fn insert(&mut self, position: usize, sortable: Sortable) -> bool {
        if self.frozen {
            debug!(%sortable, "sort order frozen, insert rejected");
            return false;
        }
        if sortable == Sortable::Divider
            || position > self.order.len()
            || self.order.contains(&sortable)
        {
            return false;
        }
        self.order.insert(position, sortable);
        self.changes.set_changed = true;
        true
    }

    /// Removes an attribute; the divider itself cannot be removed.
    pub fn remove(&mut self, sortable: Sortable) -> bool {
        if self.frozen {
            debug!(%sortable, "sort order frozen, remove rejected");
            return false;
        }
        if sortable == Sortable::Divider {
            return false;
        }
        match self.order.iter().position(|s| *s == sortable) {
            Some(position) => {
                self.order.remove(position);
                self.changes.set_changed = true;
                true
            }
            None => false,
        }
    }

    /// Accumulated changes since the last call, cleared on read. The tree
    /// consumer uses this to decide between re-sorting and restructuring.
    pub fn take_changes(&mut self) -> SortOrderChanges {
        std::mem::take(&mut self.changes)
    }
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::new(vec![
            Sortable::Category,
            Sortable::Pattern,
            Sortable::Divider,
        ])
    }
}
