use std::fmt;
use std::hash::{Hash, Hasher};

use regex::Regex;

use crate::model::BugRecord;
use crate::sortables::SortableValue;

/// Exact or `~regex` name constraint, as accepted by the grammar's
/// name-valued attributes. Regexes are anchored: the whole name must match.
#[derive(Debug, Clone)]
pub enum NameMatch {
    Exact(String),
    Regex(Regex),
}

impl NameMatch {
    /// A leading `~` selects regex matching; anything else is exact.
    pub fn parse(spec: &str) -> Result<NameMatch, regex::Error> {
        if let Some(pattern) = spec.strip_prefix('~') {
            Ok(NameMatch::Regex(Regex::new(&format!("^(?:{pattern})$"))?))
        } else {
            Ok(NameMatch::Exact(spec.to_string()))
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameMatch::Exact(expected) => expected == name,
            NameMatch::Regex(re) => re.is_match(name),
        }
    }

    /// The grammar spelling this constraint was parsed from.
    pub fn spec(&self) -> String {
        match self {
            NameMatch::Exact(s) => s.clone(),
            NameMatch::Regex(re) => {
                let raw = re
                    .as_str()
                    .strip_prefix("^(?:")
                    .and_then(|s| s.strip_suffix(")$"))
                    .unwrap_or(re.as_str());
                format!("~{raw}")
            }
        }
    }
}

impl PartialEq for NameMatch {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NameMatch::Exact(a), NameMatch::Exact(b)) => a == b,
            (NameMatch::Regex(a), NameMatch::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Eq for NameMatch {}

impl Hash for NameMatch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            NameMatch::Exact(s) => {
                0u8.hash(state);
                s.hash(state);
            }
            NameMatch::Regex(re) => {
                1u8.hash(state);
                re.as_str().hash(state);
            }
        }
    }
}

/// Relational operator for version constraints, spelled as in the grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelOp {
    Eq,
    Neq,
    Lt,
    Gt,
    Leq,
    Geq,
}

impl RelOp {
    pub fn parse(spec: &str) -> Option<RelOp> {
        match spec {
            "EQ" => Some(RelOp::Eq),
            "NEQ" => Some(RelOp::Neq),
            "LT" => Some(RelOp::Lt),
            "GT" => Some(RelOp::Gt),
            "LEQ" => Some(RelOp::Leq),
            "GEQ" => Some(RelOp::Geq),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelOp::Eq => "EQ",
            RelOp::Neq => "NEQ",
            RelOp::Lt => "LT",
            RelOp::Gt => "GT",
            RelOp::Leq => "LEQ",
            RelOp::Geq => "GEQ",
        }
    }

    pub fn apply(self, lhs: i64, rhs: i64) -> bool {
        match self {
            RelOp::Eq => lhs == rhs,
            RelOp::Neq => lhs != rhs,
            RelOp::Lt => lhs < rhs,
            RelOp::Gt => lhs > rhs,
            RelOp::Leq => lhs <= rhs,
            RelOp::Geq => lhs >= rhs,
        }
    }
}

/// Rich leaf predicates from the persisted filter grammar. Each variant
/// carries exactly the attributes its element accepts; absent optional
/// attributes constrain nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DetailMatcher {
    Bug {
        code: Option<String>,
        pattern: Option<String>,
        category: Option<String>,
    },
    Class {
        name: NameMatch,
        role: Option<String>,
    },
    Type {
        descriptor: NameMatch,
        role: Option<String>,
        type_parameters: Option<String>,
    },
    Method {
        name: Option<NameMatch>,
        params: Option<String>,
        returns: Option<String>,
        role: Option<String>,
    },
    Field {
        name: Option<NameMatch>,
        field_type: Option<String>,
        role: Option<String>,
    },
    Package {
        name: NameMatch,
    },
    Priority {
        value: u8,
    },
    Confidence {
        value: u8,
    },
    Rank {
        value: u16,
    },
    Designation {
        designation: String,
    },
    FirstVersion {
        value: i64,
        rel_op: RelOp,
    },
    LastVersion {
        value: i64,
        rel_op: RelOp,
    },
    Local {
        name: NameMatch,
    },
    Source {
        name: NameMatch,
    },
}

impl DetailMatcher {
    /// Positive form: does the record fit this description?
    pub fn describes(&self, record: &BugRecord) -> bool {
        match self {
            DetailMatcher::Bug { code, pattern, category } => {
                code.as_ref().is_none_or(|c| *c == record.bug_code)
                    && pattern.as_ref().is_none_or(|p| *p == record.pattern)
                    && category.as_ref().is_none_or(|c| *c == record.category)
            }
            DetailMatcher::Class { name, .. } => name.matches(&record.class_name),
            DetailMatcher::Type { descriptor, .. } => record
                .type_descriptor
                .as_deref()
                .is_some_and(|d| descriptor.matches(d)),
            DetailMatcher::Method { name, params, returns, .. } => {
                let Some(method) = record.method.as_ref() else {
                    return false;
                };
                name.as_ref().is_none_or(|n| n.matches(&method.name))
                    && params
                        .as_ref()
                        .is_none_or(|p| method.signature.starts_with(&format!("({p})")))
                    && returns.as_ref().is_none_or(|r| method.signature.ends_with(r.as_str()))
            }
            DetailMatcher::Field { name, field_type, .. } => {
                let Some(field) = record.field.as_ref() else {
                    return false;
                };
                name.as_ref().is_none_or(|n| n.matches(&field.name))
                    && field_type.as_ref().is_none_or(|t| *t == field.signature)
            }
            DetailMatcher::Package { name } => name.matches(&record.package),
            DetailMatcher::Priority { value } | DetailMatcher::Confidence { value } => {
                record.priority == *value
            }
            // Rank matches the given rank or scarier (numerically lower).
            DetailMatcher::Rank { value } => record.rank <= *value,
            DetailMatcher::Designation { designation } => record.designation() == *designation,
            DetailMatcher::FirstVersion { value, rel_op } => {
                rel_op.apply(record.first_version, *value)
            }
            DetailMatcher::LastVersion { value, rel_op } => {
                rel_op.apply(record.last_version, *value)
            }
            DetailMatcher::Local { name } => {
                record.local_variable.as_deref().is_some_and(|l| name.matches(l))
            }
            DetailMatcher::Source { name } => name.matches(&record.source_file),
        }
    }
}

/// One node of the predicate model.
///
/// `matches` returns true when the record should stay visible: filters
/// describe what to hide, not what to keep, so an active node hides
/// exactly the records its positive description covers, inverting once at
/// the node the filter set consults. A disabled node always matches and
/// therefore has no filtering effect while staying available for
/// re-enabling.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub active: bool,
    pub kind: MatcherKind,
}

#[derive(Debug, Clone)]
pub enum MatcherKind {
    /// Simple attribute suppression: hides records whose attribute equals
    /// the atom's value.
    Atom(SortableValue),
    /// A batch of atoms suppressing one whole tree branch as a single
    /// togglable unit: a record is hidden only when every component atom
    /// would individually hide it.
    Stacked(Vec<SortableValue>),
    /// Rich grammar leaf.
    Detail(DetailMatcher),
    And(Vec<Matcher>),
    Or(Vec<Matcher>),
    Not(Box<Matcher>),
}

impl Matcher {
    pub fn atom(atom: SortableValue) -> Matcher {
        Matcher { active: true, kind: MatcherKind::Atom(atom) }
    }

    pub fn stacked(atoms: Vec<SortableValue>) -> Matcher {
        Matcher { active: true, kind: MatcherKind::Stacked(atoms) }
    }

    pub fn detail(detail: DetailMatcher) -> Matcher {
        Matcher { active: true, kind: MatcherKind::Detail(detail) }
    }

    pub fn and(children: Vec<Matcher>) -> Matcher {
        Matcher { active: true, kind: MatcherKind::And(children) }
    }

    pub fn or(children: Vec<Matcher>) -> Matcher {
        Matcher { active: true, kind: MatcherKind::Or(children) }
    }

    pub fn not(child: Matcher) -> Matcher {
        Matcher { active: true, kind: MatcherKind::Not(Box::new(child)) }
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// True when the record stays visible under this predicate: the single
    /// inversion of the positive description. A conjunction therefore
    /// hides only records matching every child, not records matching any.
    pub fn matches(&self, record: &BugRecord) -> bool {
        !(self.active && self.describes(record))
    }

    /// Positive form, independent of the active flag. Used for branch
    /// matching and by the inversion in `matches`.
    pub fn describes(&self, record: &BugRecord) -> bool {
        match &self.kind {
            MatcherKind::Atom(atom) => atom.describes(record),
            MatcherKind::Stacked(atoms) => atoms.iter().all(|atom| atom.describes(record)),
            MatcherKind::Detail(detail) => detail.describes(record),
            MatcherKind::And(children) => children.iter().all(|c| c.describes(record)),
            MatcherKind::Or(children) => children.iter().any(|c| c.describes(record)),
            MatcherKind::Not(child) => !child.describes(record),
        }
    }

    /// The atoms of a stacked predicate, if this is one.
    pub fn as_stacked(&self) -> Option<&[SortableValue]> {
        match &self.kind {
            MatcherKind::Stacked(atoms) => Some(atoms),
            _ => None,
        }
    }
}

fn sorted_atoms(atoms: &[SortableValue]) -> Vec<&SortableValue> {
    let mut sorted: Vec<&SortableValue> = atoms.iter().collect();
    sorted.sort();
    sorted
}

// Equality ignores the active flag so that a re-parsed copy of an existing
// (possibly disabled) filter is recognized as a duplicate, and compares
// stacked children order-independently.
impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for Matcher {}

impl PartialEq for MatcherKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MatcherKind::Atom(a), MatcherKind::Atom(b)) => a == b,
            (MatcherKind::Stacked(a), MatcherKind::Stacked(b)) => {
                sorted_atoms(a) == sorted_atoms(b)
            }
            (MatcherKind::Detail(a), MatcherKind::Detail(b)) => a == b,
            (MatcherKind::And(a), MatcherKind::And(b)) => a == b,
            (MatcherKind::Or(a), MatcherKind::Or(b)) => a == b,
            (MatcherKind::Not(a), MatcherKind::Not(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for MatcherKind {}

impl Hash for Matcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
    }
}

impl Hash for MatcherKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            MatcherKind::Atom(atom) => {
                0u8.hash(state);
                atom.hash(state);
            }
            MatcherKind::Stacked(atoms) => {
                1u8.hash(state);
                for atom in sorted_atoms(atoms) {
                    atom.hash(state);
                }
            }
            MatcherKind::Detail(detail) => {
                2u8.hash(state);
                detail.hash(state);
            }
            MatcherKind::And(children) => {
                3u8.hash(state);
                children.hash(state);
            }
            MatcherKind::Or(children) => {
                4u8.hash(state);
                children.hash(state);
            }
            MatcherKind::Not(child) => {
                5u8.hash(state);
                child.hash(state);
            }
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.active {
            write!(f, "[disabled] ")?;
        }
        match &self.kind {
            MatcherKind::Atom(atom) => write!(f, "{atom}"),
            MatcherKind::Stacked(atoms) => {
                let parts: Vec<String> = atoms.iter().map(|a| a.to_string()).collect();
                write!(f, "branch({})", parts.join(", "))
            }
            MatcherKind::Detail(detail) => write!(f, "{detail:?}"),
            MatcherKind::And(children) => write!(f, "and({} children)", children.len()),
            MatcherKind::Or(children) => write!(f, "or({} children)", children.len()),
            MatcherKind::Not(_) => write!(f, "not(..)"),
        }
    }
}

/// Observer of filter-set mutations. Notified after the mutation applied,
/// on the mutating thread. The filter set travels to the rebuild worker
/// inside an `Arc<RwLock<_>>`, so listeners must be shareable too.
pub trait FilterListener: Send + Sync {
    fn filters_changed(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterListenerId(u64);

/// The set of all currently defined filters: the explicit context object
/// consulted by every collection. Visibility is the conjunction of all
/// member predicates, with suppressed records always hidden.
#[derive(Default)]
pub struct FilterSet {
    matchers: Vec<Matcher>,
    version: u64,
    listeners: Vec<(FilterListenerId, Box<dyn FilterListener>)>,
    next_listener_id: u64,
}

impl fmt::Debug for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSet")
            .field("matchers", &self.matchers)
            .field("version", &self.version)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl FilterSet {
    pub fn new() -> Self {
        FilterSet::default()
    }

    pub fn matchers(&self) -> &[Matcher] {
        &self.matchers
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// Bumped on every mutation; collections remember the version they were
    /// built under so stale caches are detectable in debug assertions.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contains(&self, matcher: &Matcher) -> bool {
        self.matchers.contains(matcher)
    }

    pub fn add_listener(&mut self, listener: Box<dyn FilterListener>) -> FilterListenerId {
        let id = FilterListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&mut self, id: FilterListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    fn changed(&mut self) {
        self.version += 1;
        for (_, listener) in &self.listeners {
            listener.filters_changed();
        }
    }

    /// Adds a filter unless an equal one (active or not) already exists.
    pub fn add(&mut self, matcher: Matcher) -> bool {
        if self.contains(&matcher) {
            return false;
        }
        self.matchers.push(matcher);
        self.changed();
        true
    }

    pub fn remove(&mut self, index: usize) -> Option<Matcher> {
        if index >= self.matchers.len() {
            return None;
        }
        let removed = self.matchers.remove(index);
        self.changed();
        Some(removed)
    }

    pub fn remove_matcher(&mut self, matcher: &Matcher) -> bool {
        match self.matchers.iter().position(|m| m == matcher) {
            Some(index) => {
                self.matchers.remove(index);
                self.changed();
                true
            }
            None => false,
        }
    }

    pub fn set_active(&mut self, index: usize, active: bool) -> bool {
        match self.matchers.get_mut(index) {
            Some(m) if m.active != active => {
                m.active = active;
                self.changed();
                true
            }
            Some(_) => false,
            None => false,
        }
    }

    /// True when the record is visible under every active filter.
    pub fn matches(&self, record: &BugRecord) -> bool {
        if record.is_suppressed() {
            return false;
        }
        self.matchers.iter().all(|m| m.matches(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RecordBuilder, RecordRef};
    use crate::sortables::Sortable;

    fn record() -> RecordRef {
        RecordBuilder::new(1)
            .category("SECURITY")
            .bug_code("SQL")
            .pattern("SQL_INJECTION")
            .class_name("com.example.Dao")
            .package("com.example")
            .source_file("Dao.java")
            .priority(1)
            .rank(5)
            .build()
    }

    #[test]
    fn active_leaf_inverts() {
        let r = record();
        let mut m = Matcher::atom(SortableValue::new(Sortable::Category, "SECURITY"));
        assert!(!m.matches(&r));
        m.set_active(false);
        assert!(m.matches(&r));
        // A leaf for a value the record does not carry has no effect.
        let other = Matcher::atom(SortableValue::new(Sortable::Category, "STYLE"));
        assert!(other.matches(&r));
    }

    #[test]
    fn stacked_hides_only_when_every_atom_hides() {
        let r = record();
        let both = Matcher::stacked(vec![
            SortableValue::new(Sortable::Category, "SECURITY"),
            SortableValue::new(Sortable::Priority, "1"),
        ]);
        assert!(!both.matches(&r));
        let partial = Matcher::stacked(vec![
            SortableValue::new(Sortable::Category, "SECURITY"),
            SortableValue::new(Sortable::Priority, "3"),
        ]);
        assert!(partial.matches(&r));
        // A one-atom stack behaves exactly like the plain leaf.
        let single = Matcher::stacked(vec![SortableValue::new(Sortable::Category, "SECURITY")]);
        let leaf = Matcher::atom(SortableValue::new(Sortable::Category, "SECURITY"));
        assert_eq!(single.matches(&r), leaf.matches(&r));
    }

    #[test]
    fn stacked_equality_is_order_independent() {
        let a = Matcher::stacked(vec![
            SortableValue::new(Sortable::Category, "SECURITY"),
            SortableValue::new(Sortable::Priority, "1"),
        ]);
        let b = Matcher::stacked(vec![
            SortableValue::new(Sortable::Priority, "1"),
            SortableValue::new(Sortable::Category, "SECURITY"),
        ]);
        assert_eq!(a, b);
        let mut set = FilterSet::new();
        assert!(set.add(a));
        assert!(!set.add(b));
    }

    #[test]
    fn disabled_nodes_are_vacuously_true() {
        let r = record();
        let mut stack = Matcher::stacked(vec![
            SortableValue::new(Sortable::Category, "SECURITY"),
            SortableValue::new(Sortable::Priority, "1"),
        ]);
        stack.set_active(false);
        assert!(stack.matches(&r));
    }

    #[test]
    fn compound_conjunction_hides_only_fully_described_records() {
        let hidden = RecordBuilder::new(1).category("SECURITY").priority(1).build();
        let kept = RecordBuilder::new(2).category("SECURITY").priority(3).build();

        let and = Matcher::and(vec![
            Matcher::atom(SortableValue::new(Sortable::Category, "SECURITY")),
            Matcher::atom(SortableValue::new(Sortable::Priority, "1")),
        ]);
        assert!(and.describes(&hidden));
        assert!(!and.matches(&hidden));
        // Partially described records stay visible.
        assert!(!and.describes(&kept));
        assert!(and.matches(&kept));

        let or = Matcher::or(vec![
            Matcher::atom(SortableValue::new(Sortable::Priority, "1")),
            Matcher::atom(SortableValue::new(Sortable::Priority, "3")),
        ]);
        assert!(!or.matches(&hidden));
        assert!(!or.matches(&kept));

        let not = Matcher::not(Matcher::atom(SortableValue::new(Sortable::Priority, "1")));
        assert!(not.matches(&hidden));
        assert!(!not.matches(&kept));
    }

    #[test]
    fn filter_set_shares_across_threads() {
        fn is_send_sync<T: Send + Sync>() {}
        is_send_sync::<FilterSet>();
        is_send_sync::<std::sync::Arc<std::sync::RwLock<FilterSet>>>();
    }

    #[test]
    fn suppressed_records_never_visible() {
        let r = record();
        let set = FilterSet::new();
        assert!(set.matches(&r));
        r.set_suppressed(true);
        assert!(!set.matches(&r));
    }

    #[test]
    fn listeners_hear_every_effective_mutation() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct Counter(Arc<AtomicUsize>);
        impl FilterListener for Counter {
            fn filters_changed(&self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let count = Arc::new(AtomicUsize::new(0));
        let mut set = FilterSet::new();
        let id = set.add_listener(Box::new(Counter(Arc::clone(&count))));

        let m = Matcher::atom(SortableValue::new(Sortable::Category, "SECURITY"));
        assert!(set.add(m.clone()));
        assert!(!set.add(m.clone())); // duplicate, no notification
        assert!(set.set_active(0, false));
        assert!(!set.set_active(0, false)); // no-op, no notification
        assert!(set.remove(0).is_some());
        assert_eq!(count.load(Ordering::Relaxed), 3);

        assert!(set.remove_listener(id));
        set.add(m);
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn detail_regex_names_anchor() {
        let r = record();
        let exact = DetailMatcher::Class {
            name: NameMatch::parse("com.example.Dao").unwrap(),
            role: None,
        };
        assert!(exact.describes(&r));
        let re = DetailMatcher::Class {
            name: NameMatch::parse("~com\\.example\\..*").unwrap(),
            role: None,
        };
        assert!(re.describes(&r));
        let partial = DetailMatcher::Class {
            name: NameMatch::parse("~example").unwrap(),
            role: None,
        };
        assert!(!partial.describes(&r));
    }

    #[test]
    fn version_relops() {
        let r = RecordBuilder::new(2).first_version(3).last_version(5).build();
        let m = DetailMatcher::FirstVersion { value: 3, rel_op: RelOp::Eq };
        assert!(m.describes(&r));
        let m = DetailMatcher::LastVersion { value: 4, rel_op: RelOp::Gt };
        assert!(m.describes(&r));
        let m = DetailMatcher::LastVersion { value: 4, rel_op: RelOp::Leq };
        assert!(!m.describes(&r));
    }
}
