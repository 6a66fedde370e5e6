use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::BugRecord;

/// The closed, ordered catalog of attributes records can be grouped,
/// filtered and sorted by. `Divider` is not a real attribute: it is the
/// structural marker separating grouping attributes from trailing
/// sort-only attributes in a sort order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Sortable {
    FirstVersion,
    LastVersion,
    Priority,
    Rank,
    Class,
    Package,
    Category,
    Designation,
    BugCode,
    Pattern,
    Divider,
}

/// Sentinel meaning "bug still present" in `last_version`.
const STILL_PRESENT: i64 = -1;

impl Sortable {
    /// Every catalog entry, divider included. Iteration code that wants
    /// real attributes skips `Divider` explicitly, so new attributes only
    /// need to be added here.
    pub fn all() -> [Sortable; 11] {
        [
            Sortable::FirstVersion,
            Sortable::LastVersion,
            Sortable::Priority,
            Sortable::Rank,
            Sortable::Class,
            Sortable::Package,
            Sortable::Category,
            Sortable::Designation,
            Sortable::BugCode,
            Sortable::Pattern,
            Sortable::Divider,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Sortable::FirstVersion => "first_version",
            Sortable::LastVersion => "last_version",
            Sortable::Priority => "priority",
            Sortable::Rank => "rank",
            Sortable::Class => "class",
            Sortable::Package => "package",
            Sortable::Category => "category",
            Sortable::Designation => "designation",
            Sortable::BugCode => "bug_code",
            Sortable::Pattern => "pattern",
            Sortable::Divider => "divider",
        }
    }

    pub fn from_name(name: &str) -> Option<Sortable> {
        Sortable::all().into_iter().find(|s| s.as_str() == name)
    }

    /// Extracts this attribute's value from a record as a plain string.
    /// Calling this on `Divider` is a programming error.
    pub fn extract(self, record: &BugRecord) -> String {
        match self {
            Sortable::FirstVersion => record.first_version.to_string(),
            Sortable::LastVersion => record.last_version.to_string(),
            Sortable::Priority => record.priority.to_string(),
            Sortable::Rank => record.rank.to_string(),
            Sortable::Class => record.class_name.clone(),
            Sortable::Package => record.package.clone(),
            Sortable::Category => record.category.clone(),
            Sortable::Designation => record.designation(),
            Sortable::BugCode => record.bug_code.clone(),
            Sortable::Pattern => record.pattern.clone(),
            Sortable::Divider => panic!("divider is a structural marker, not an attribute"),
        }
    }

    /// Formats a raw attribute value for display. Identity for most
    /// attributes; the exceptions mirror how version sentinels, priorities
    /// and the default package are presented.
    pub fn format(self, value: &str) -> String {
        match self {
            Sortable::FirstVersion if value == "0" => "First version not defined".to_string(),
            Sortable::LastVersion if value == "-1" => "Last version not defined".to_string(),
            Sortable::Priority => match value {
                "1" => "High".to_string(),
                "2" => "Normal".to_string(),
                "3" => "Low".to_string(),
                "4" => "Experimental".to_string(),
                _ => "Ignore".to_string(),
            },
            Sortable::Package if value.is_empty() => "(Default)".to_string(),
            Sortable::Divider => panic!("divider is a structural marker, not an attribute"),
            _ => value.to_string(),
        }
    }

    /// Total order over raw values of this attribute. Lexicographic by
    /// default; versions, priority and rank compare numerically, with the
    /// `last_version` still-present sentinel ordered last; class names
    /// sharing an inner-class prefix compare by their numeric suffix.
    pub fn compare(self, a: &str, b: &str) -> Ordering {
        match self {
            Sortable::FirstVersion | Sortable::Priority | Sortable::Rank => {
                compare_numeric(a, b)
            }
            Sortable::LastVersion => {
                let key = |v: &str| match v.parse::<i64>() {
                    Ok(n) if n == STILL_PRESENT => i64::MAX,
                    Ok(n) => n,
                    Err(_) => i64::MAX,
                };
                key(a).cmp(&key(b)).then_with(|| a.cmp(b))
            }
            Sortable::Class => compare_class_names(a, b),
            Sortable::Divider => panic!("divider is a structural marker, not an attribute"),
            _ => a.cmp(b),
        }
    }

    /// Comparator over whole records, used to build chained sort orders.
    pub fn compare_records(self, a: &BugRecord, b: &BugRecord) -> Ordering {
        self.compare(&self.extract(a), &self.extract(b))
    }
}

impl fmt::Display for Sortable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        // Unparsable values sort lexicographically rather than failing.
        _ => a.cmp(b),
    }
}

/// Inner classes named `Outer$1`, `Outer$2`, ... compare numerically when
/// both share the outer-class prefix; everything else is lexicographic.
fn compare_class_names(a: &str, b: &str) -> Ordering {
    if let (Some(ia), Some(ib)) = (a.rfind('$'), b.rfind('$')) {
        if a[..ia] == b[..ib] {
            if let (Ok(na), Ok(nb)) =
                (a[ia + 1..].parse::<u64>(), b[ib + 1..].parse::<u64>())
            {
                return na.cmp(&nb);
            }
        }
    }
    a.cmp(b)
}

/// A predicate atom: one attribute paired with one raw value. The unit of
/// both filtering and grouping-tree path addressing, so it must be cheap
/// to hash and compare.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortableValue {
    pub key: Sortable,
    pub value: String,
}

impl SortableValue {
    pub fn new(key: Sortable, value: impl Into<String>) -> Self {
        SortableValue { key, value: value.into() }
    }

    /// True when the record's value for this atom's attribute equals the
    /// atom's value. This is the positive form; suppression polarity lives
    /// in the matcher layer.
    pub fn describes(&self, record: &BugRecord) -> bool {
        self.key.extract(record) == self.value
    }

    pub fn display(&self) -> String {
        self.key.format(&self.value)
    }
}

impl fmt::Display for SortableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordBuilder;

    #[test]
    fn priority_compares_numerically() {
        assert_eq!(Sortable::Priority.compare("2", "10"), Ordering::Less);
        assert_eq!(Sortable::Priority.compare("10", "2"), Ordering::Greater);
    }

    #[test]
    fn last_version_sentinel_sorts_last() {
        assert_eq!(Sortable::LastVersion.compare("-1", "3"), Ordering::Greater);
        assert_eq!(Sortable::LastVersion.compare("0", "-1"), Ordering::Less);
    }

    #[test]
    fn inner_classes_compare_by_suffix() {
        assert_eq!(
            Sortable::Class.compare("com.example.Outer$2", "com.example.Outer$10"),
            Ordering::Less
        );
        // Different outer classes fall back to lexicographic.
        assert_eq!(
            Sortable::Class.compare("com.a.X$2", "com.b.Y$1"),
            Ordering::Less
        );
    }

    #[test]
    fn extract_reads_live_designation() {
        let r = RecordBuilder::new(1).build();
        assert_eq!(Sortable::Designation.extract(&r), "UNCLASSIFIED");
        r.set_designation("MUST_FIX");
        assert_eq!(Sortable::Designation.extract(&r), "MUST_FIX");
    }

    #[test]
    fn format_covers_sentinels() {
        assert_eq!(Sortable::FirstVersion.format("0"), "First version not defined");
        assert_eq!(Sortable::LastVersion.format("-1"), "Last version not defined");
        assert_eq!(Sortable::Priority.format("1"), "High");
        assert_eq!(Sortable::Package.format(""), "(Default)");
        assert_eq!(Sortable::Category.format("SECURITY"), "SECURITY");
    }

    #[test]
    fn name_round_trip() {
        for s in Sortable::all() {
            assert_eq!(Sortable::from_name(s.as_str()), Some(s));
        }
        assert_eq!(Sortable::from_name("nope"), None);
    }
}
