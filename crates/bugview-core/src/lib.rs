//! Filtering, grouping and tree-model engine for analysis findings.
//!
//! The pipeline: records ([`model`]) are collected into sorted,
//! filter-aware collections ([`bug_set`]), grouped into a value-addressed
//! tree ([`tree_model`]) according to a divider-split sort order
//! ([`sorter`]), under a shared set of suppression predicates
//! ([`matcher`]) that persist through a small tag grammar ([`filter_io`]).
//! Expensive tree rebuilds run in the background ([`rebuild`]) and
//! everything is tied together per viewing session ([`session`]).

pub mod bug_set;
pub mod config;
pub mod filter_io;
pub mod hash_list;
pub mod matcher;
pub mod model;
pub mod rebuild;
pub mod session;
pub mod sortables;
pub mod sorter;
pub mod tree_model;

pub use bug_set::BugSet;
pub use config::{Config, ViewOptions};
pub use filter_io::{
    parse_filter_document, parse_filter_file, write_filter_document, DocumentKind,
    FilterDocument, FilterParseError,
};
pub use hash_list::HashList;
pub use matcher::{
    DetailMatcher, FilterListener, FilterListenerId, FilterSet, Matcher, MatcherKind, NameMatch,
    RelOp,
};
pub use model::{BugRecord, MemberRef, RecordBuilder, RecordRef};
pub use rebuild::{CoalesceState, RebuildCoordinator, RebuildOutcome, RebuildRequest};
pub use session::ViewSession;
pub use sortables::{Sortable, SortableValue};
pub use sorter::{SortOrder, SortOrderChanges};
pub use tree_model::{
    BranchNotFound, BugAspects, BugTreeModel, ListenerId, TreeEvent, TreeModelListener,
    TreeModification, TreeNode,
};
