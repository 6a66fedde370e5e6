use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Shared handle to a record. Equality and hashing go through the record's
/// stable id, so handles stay valid across designation edits.
pub type RecordRef = Arc<BugRecord>;

/// Reference to a method or field implicated in a finding. Signatures use
/// JVM descriptor syntax, e.g. `(Ljava/lang/String;)V`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberRef {
    pub name: String,
    pub signature: String,
}

/// One analysis finding. Produced by the external analysis engine; immutable
/// here except for the externally-owned `designation` and `suppressed`
/// fields, which this core observes but does not decide.
#[derive(Debug, Serialize, Deserialize)]
pub struct BugRecord {
    /// Stable identity, used for equality and hashing.
    pub id: u64,
    /// Bug category, e.g. `CORRECTNESS` or `SECURITY`.
    pub category: String,
    /// Short bug-kind abbreviation, e.g. `NP`.
    pub bug_code: String,
    /// Full pattern type, e.g. `NP_NULL_ON_SOME_PATH`.
    pub pattern: String,
    /// Fully qualified class name of the primary location.
    pub class_name: String,
    pub package: String,
    pub source_file: String,
    /// 1 = high, 2 = normal, 3 = low, 4 = experimental.
    pub priority: u8,
    pub rank: u16,
    /// Analysis sequence number of the first version the bug appeared in.
    /// 0 means not defined.
    pub first_version: i64,
    /// Last version the bug was seen in; -1 means still present.
    pub last_version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<MemberRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<MemberRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_descriptor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_variable: Option<String>,
    #[serde(
        default = "unclassified",
        serialize_with = "serialize_designation",
        deserialize_with = "deserialize_designation"
    )]
    designation: RwLock<String>,
    #[serde(
        default,
        serialize_with = "serialize_suppressed",
        deserialize_with = "deserialize_suppressed"
    )]
    suppressed: AtomicBool,
}

fn unclassified() -> RwLock<String> {
    RwLock::new("UNCLASSIFIED".to_string())
}

fn serialize_designation<S: Serializer>(v: &RwLock<String>, s: S) -> Result<S::Ok, S::Error> {
    match v.read() {
        Ok(guard) => s.serialize_str(&guard),
        Err(poisoned) => s.serialize_str(&poisoned.into_inner()),
    }
}

fn deserialize_designation<'de, D: Deserializer<'de>>(d: D) -> Result<RwLock<String>, D::Error> {
    String::deserialize(d).map(RwLock::new)
}

fn serialize_suppressed<S: Serializer>(v: &AtomicBool, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_bool(v.load(Ordering::Relaxed))
}

fn deserialize_suppressed<'de, D: Deserializer<'de>>(d: D) -> Result<AtomicBool, D::Error> {
    bool::deserialize(d).map(AtomicBool::new)
}

impl BugRecord {
    /// Current user designation key, e.g. `UNCLASSIFIED` or `NOT_A_BUG`.
    pub fn designation(&self) -> String {
        match self.designation.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Owned by the commenting collaborator; the caller is responsible for
    /// refreshing any collection built before the change.
    pub fn set_designation(&self, designation: impl Into<String>) {
        let value = designation.into();
        match self.designation.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::Relaxed)
    }

    pub fn set_suppressed(&self, suppressed: bool) {
        self.suppressed.store(suppressed, Ordering::Relaxed);
    }
}

impl PartialEq for BugRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BugRecord {}

impl Hash for BugRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for BugRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.pattern, self.class_name, self.source_file)
    }
}

/// Builder used by record producers and tests; every attribute not set
/// explicitly gets a neutral default.
#[derive(Debug, Default)]
pub struct RecordBuilder {
    record: RecordFields,
}

#[derive(Debug)]
struct RecordFields {
    id: u64,
    category: String,
    bug_code: String,
    pattern: String,
    class_name: String,
    package: String,
    source_file: String,
    priority: u8,
    rank: u16,
    first_version: i64,
    last_version: i64,
    method: Option<MemberRef>,
    field: Option<MemberRef>,
    type_descriptor: Option<String>,
    local_variable: Option<String>,
    designation: String,
}

impl Default for RecordFields {
    fn default() -> Self {
        RecordFields {
            id: 0,
            category: String::new(),
            bug_code: String::new(),
            pattern: String::new(),
            class_name: String::new(),
            package: String::new(),
            source_file: String::new(),
            priority: 2,
            rank: 10,
            first_version: 0,
            last_version: -1,
            method: None,
            field: None,
            type_descriptor: None,
            local_variable: None,
            designation: "UNCLASSIFIED".to_string(),
        }
    }
}

impl RecordBuilder {
    pub fn new(id: u64) -> Self {
        let mut builder = RecordBuilder::default();
        builder.record.id = id;
        builder
    }

    pub fn category(mut self, v: impl Into<String>) -> Self {
        self.record.category = v.into();
        self
    }

    pub fn bug_code(mut self, v: impl Into<String>) -> Self {
        self.record.bug_code = v.into();
        self
    }

    pub fn pattern(mut self, v: impl Into<String>) -> Self {
        self.record.pattern = v.into();
        self
    }

    pub fn class_name(mut self, v: impl Into<String>) -> Self {
        self.record.class_name = v.into();
        self
    }

    pub fn package(mut self, v: impl Into<String>) -> Self {
        self.record.package = v.into();
        self
    }

    pub fn source_file(mut self, v: impl Into<String>) -> Self {
        self.record.source_file = v.into();
        self
    }

    pub fn priority(mut self, v: u8) -> Self {
        self.record.priority = v;
        self
    }

    pub fn rank(mut self, v: u16) -> Self {
        self.record.rank = v;
        self
    }

    pub fn first_version(mut self, v: i64) -> Self {
        self.record.first_version = v;
        self
    }

    pub fn last_version(mut self, v: i64) -> Self {
        self.record.last_version = v;
        self
    }

    pub fn method(mut self, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.record.method = Some(MemberRef { name: name.into(), signature: signature.into() });
        self
    }

    pub fn field(mut self, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.record.field = Some(MemberRef { name: name.into(), signature: signature.into() });
        self
    }

    pub fn type_descriptor(mut self, v: impl Into<String>) -> Self {
        self.record.type_descriptor = Some(v.into());
        self
    }

    pub fn local_variable(mut self, v: impl Into<String>) -> Self {
        self.record.local_variable = Some(v.into());
        self
    }

    pub fn designation(mut self, v: impl Into<String>) -> Self {
        self.record.designation = v.into();
        self
    }

    pub fn build(self) -> RecordRef {
        let r = self.record;
        Arc::new(BugRecord {
            id: r.id,
            category: r.category,
            bug_code: r.bug_code,
            pattern: r.pattern,
            class_name: r.class_name,
            package: r.package,
            source_file: r.source_file,
            priority: r.priority,
            rank: r.rank,
            first_version: r.first_version,
            last_version: r.last_version,
            method: r.method,
            field: r.field,
            type_descriptor: r.type_descriptor,
            local_variable: r.local_variable,
            designation: RwLock::new(r.designation),
            suppressed: AtomicBool::new(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_survives_designation_edits() {
        let a = RecordBuilder::new(7).category("CORRECTNESS").build();
        let b = RecordBuilder::new(7).category("SECURITY").build();
        assert_eq!(a, b);
        a.set_designation("NOT_A_BUG");
        assert_eq!(a.designation(), "NOT_A_BUG");
        assert_eq!(a, b);
    }

    #[test]
    fn suppressed_defaults_to_false() {
        let r = RecordBuilder::new(1).build();
        assert!(!r.is_suppressed());
        r.set_suppressed(true);
        assert!(r.is_suppressed());
    }

    #[test]
    fn serde_round_trip_preserves_mutable_state() {
        let r = RecordBuilder::new(9).category("SECURITY").build();
        r.set_designation("NOT_A_BUG");
        r.set_suppressed(true);
        let json = serde_json::to_string(&*r).unwrap();
        let back: BugRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 9);
        assert_eq!(back.designation(), "NOT_A_BUG");
        assert!(back.is_suppressed());
    }

    #[test]
    fn serde_defaults_for_missing_mutable_fields() {
        let json = r#"{
            "id": 5, "category": "STYLE", "bug_code": "SF",
            "pattern": "SF_SWITCH_NO_DEFAULT", "class_name": "com.example.A",
            "package": "com.example", "source_file": "A.java",
            "priority": 3, "rank": 17, "first_version": 0, "last_version": -1
        }"#;
        let record: BugRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.designation(), "UNCLASSIFIED");
        assert!(!record.is_suppressed());
        assert!(record.method.is_none());
    }
}
