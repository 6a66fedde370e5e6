//! Parser and writer for the persisted predicate grammar.
//!
//! The grammar is a nested tag language: two top-level wrapper elements
//! (`FindBugsFilter`, `SuppressionFilter`), compound elements (`And`,
//! `Match`, `Or`, `Not`, `StackedFilter`) and one leaf element per
//! attribute predicate. Parsing drives an explicit stack of in-progress
//! compound nodes; errors fail fast and no partial model is returned.

use std::fmt;
use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::matcher::{DetailMatcher, FilterSet, Matcher, MatcherKind, NameMatch, RelOp};
use crate::sortables::{Sortable, SortableValue};

/// Which wrapper element a document was parsed from. Both produce the same
/// model shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    FilterCollection,
    SuppressionFilter,
}

impl DocumentKind {
    fn tag(self) -> &'static str {
        match self {
            DocumentKind::FilterCollection => "FindBugsFilter",
            DocumentKind::SuppressionFilter => "SuppressionFilter",
        }
    }

    fn from_tag(tag: &str) -> Option<DocumentKind> {
        match tag {
            "FindBugsFilter" => Some(DocumentKind::FilterCollection),
            "SuppressionFilter" => Some(DocumentKind::SuppressionFilter),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterDocument {
    pub kind: DocumentKind,
    pub matchers: Vec<Matcher>,
}

impl FilterDocument {
    /// Loads the parsed predicates into a fresh filter set, dropping
    /// duplicates the way interactive filter creation does.
    pub fn into_filter_set(self) -> FilterSet {
        let mut set = FilterSet::new();
        for matcher in self.matchers {
            set.add(matcher);
        }
        set
    }
}

#[derive(Debug)]
pub enum FilterParseError {
    UnknownElement { element: String },
    MissingAttribute { element: String, attribute: &'static str },
    InvalidValue { element: String, attribute: &'static str, value: String },
    /// A leaf appeared somewhere its parent does not allow, or a closing
    /// tag did not match the open compound.
    MisplacedElement { element: String },
    /// `Not` takes exactly one child.
    NotArity { found: usize },
    /// The document root is not a recognized wrapper element.
    MissingWrapper { element: String },
    Xml { message: String },
}

impl fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterParseError::UnknownElement { element } => {
                write!(f, "unknown filter element <{element}>")
            }
            FilterParseError::MissingAttribute { element, attribute } => {
                write!(f, "element <{element}> is missing required attribute '{attribute}'")
            }
            FilterParseError::InvalidValue { element, attribute, value } => {
                write!(f, "element <{element}> attribute '{attribute}' has invalid value '{value}'")
            }
            FilterParseError::MisplacedElement { element } => {
                write!(f, "element <{element}> is not allowed here")
            }
            FilterParseError::NotArity { found } => {
                write!(f, "<Not> requires exactly one child, found {found}")
            }
            FilterParseError::MissingWrapper { element } => {
                write!(f, "expected a filter document wrapper, found <{element}>")
            }
            FilterParseError::Xml { message } => write!(f, "malformed filter document: {message}"),
        }
    }
}

impl std::error::Error for FilterParseError {}

enum Pending {
    TopLevel { kind: DocumentKind, children: Vec<Matcher> },
    And { children: Vec<Matcher>, active: bool },
    Or { children: Vec<Matcher>, active: bool },
    Not { children: Vec<Matcher>, active: bool },
    Stacked { atoms: Vec<SortableValue>, active: bool },
}

struct DocumentBuilder {
    stack: Vec<Pending>,
    result: Option<FilterDocument>,
}

impl DocumentBuilder {
    fn new() -> Self {
        DocumentBuilder { stack: Vec::new(), result: None }
    }

    fn attach(&mut self, element: &str, matcher: Matcher) -> Result<(), FilterParseError> {
        match self.stack.last_mut() {
            Some(Pending::TopLevel { children, .. })
            | Some(Pending::And { children, .. })
            | Some(Pending::Or { children, .. })
            | Some(Pending::Not { children, .. }) => {
                children.push(matcher);
                Ok(())
            }
            Some(Pending::Stacked { .. }) | None => {
                Err(FilterParseError::MisplacedElement { element: element.to_string() })
            }
        }
    }

    fn attach_atom(&mut self, element: &str, atom: SortableValue, active: bool)
        -> Result<(), FilterParseError>
    {
        match self.stack.last_mut() {
            Some(Pending::Stacked { atoms, .. }) => {
                // Per-atom disabled flags make no sense inside a stack;
                // the stack toggles as one unit.
                atoms.push(atom);
                Ok(())
            }
            Some(_) => {
                let mut matcher = Matcher::atom(atom);
                matcher.set_active(active);
                self.attach(element, matcher)
            }
            None => Err(FilterParseError::MisplacedElement { element: element.to_string() }),
        }
    }

    fn close(&mut self, element: &str) -> Result<(), FilterParseError> {
        let pending = self
            .stack
            .pop()
            .ok_or_else(|| FilterParseError::MisplacedElement { element: element.to_string() })?;
        let matcher = match pending {
            Pending::TopLevel { kind, children } => {
                self.result = Some(FilterDocument { kind, matchers: children });
                return Ok(());
            }
            Pending::And { children, active } => {
                let mut m = Matcher::and(children);
                m.set_active(active);
                m
            }
            Pending::Or { children, active } => {
                let mut m = Matcher::or(children);
                m.set_active(active);
                m
            }
            Pending::Not { children, active } => {
                if children.len() != 1 {
                    return Err(FilterParseError::NotArity { found: children.len() });
                }
                let mut m = Matcher::not(children.into_iter().next().expect("one child"));
                m.set_active(active);
                m
            }
            Pending::Stacked { atoms, active } => {
                let mut m = Matcher::stacked(atoms);
                m.set_active(active);
                m
            }
        };
        self.attach(element, matcher)
    }
}

fn attr(start: &BytesStart<'_>, name: &str) -> Result<Option<String>, FilterParseError> {
    for attribute in start.attributes() {
        let attribute =
            attribute.map_err(|e| FilterParseError::Xml { message: e.to_string() })?;
        if attribute.key.as_ref() == name.as_bytes() {
            let value = attribute
                .unescape_value()
                .map_err(|e| FilterParseError::Xml { message: e.to_string() })?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn required_attr(
    start: &BytesStart<'_>,
    element: &str,
    name: &'static str,
) -> Result<String, FilterParseError> {
    attr(start, name)?.ok_or_else(|| FilterParseError::MissingAttribute {
        element: element.to_string(),
        attribute: name,
    })
}

fn parse_number<T: std::str::FromStr>(
    element: &str,
    attribute: &'static str,
    value: &str,
) -> Result<T, FilterParseError> {
    value.parse().map_err(|_| FilterParseError::InvalidValue {
        element: element.to_string(),
        attribute,
        value: value.to_string(),
    })
}

fn parse_name_match(
    element: &str,
    attribute: &'static str,
    spec: &str,
) -> Result<NameMatch, FilterParseError> {
    NameMatch::parse(spec).map_err(|_| FilterParseError::InvalidValue {
        element: element.to_string(),
        attribute,
        value: spec.to_string(),
    })
}

fn parse_rel_op(element: &str, value: &str) -> Result<RelOp, FilterParseError> {
    RelOp::parse(value).ok_or_else(|| FilterParseError::InvalidValue {
        element: element.to_string(),
        attribute: "relOp",
        value: value.to_string(),
    })
}

fn is_disabled(start: &BytesStart<'_>) -> Result<bool, FilterParseError> {
    Ok(attr(start, "disabled")?.as_deref() == Some("true"))
}

/// Parses one complete filter document. Fail-fast: the first unknown
/// element, missing attribute or unparsable value aborts the parse.
pub fn parse_filter_document(xml: &str) -> Result<FilterDocument, FilterParseError> {
    let mut reader = Reader::from_str(xml);
    let mut builder = DocumentBuilder::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                let element = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                handle_open(&mut builder, &element, &start)?;
            }
            Ok(Event::Empty(start)) => {
                let element = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                // An empty element opens and immediately closes.
                if handle_open(&mut builder, &element, &start)? == Opened::Compound {
                    builder.close(&element)?;
                }
            }
            Ok(Event::End(end)) => {
                let element = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                if is_compound_tag(&element) || DocumentKind::from_tag(&element).is_some() {
                    builder.close(&element)?;
                }
                // Closing tags of non-empty leaf elements carry nothing.
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(FilterParseError::Xml { message: e.to_string() }),
        }
    }

    builder.result.ok_or(FilterParseError::MissingWrapper { element: "(none)".to_string() })
}

/// Reads and parses a filter document from disk.
pub fn parse_filter_file(path: &Path) -> anyhow::Result<FilterDocument> {
    let xml = std::fs::read_to_string(path)
        .with_context(|| format!("reading filter document {}", path.display()))?;
    parse_filter_document(&xml)
        .with_context(|| format!("parsing filter document {}", path.display()))
}

fn is_compound_tag(element: &str) -> bool {
    matches!(element, "And" | "Match" | "Or" | "Not" | "StackedFilter")
}

#[derive(PartialEq)]
enum Opened {
    Compound,
    Leaf,
}

fn handle_open(
    builder: &mut DocumentBuilder,
    element: &str,
    start: &BytesStart<'_>,
) -> Result<Opened, FilterParseError> {
    if let Some(kind) = DocumentKind::from_tag(element) {
        if !builder.stack.is_empty() || builder.result.is_some() {
            return Err(FilterParseError::MisplacedElement { element: element.to_string() });
        }
        builder.stack.push(Pending::TopLevel { kind, children: Vec::new() });
        return Ok(Opened::Compound);
    }
    if builder.stack.is_empty() {
        return Err(FilterParseError::MissingWrapper { element: element.to_string() });
    }

    let active = !is_disabled(start)?;
    match element {
        "And" | "Match" => {
            builder.stack.push(Pending::And { children: Vec::new(), active });
            if element == "Match" {
                // Match accepts an implicit class constraint.
                if let Some(classregex) = attr(start, "classregex")? {
                    let name = parse_name_match(element, "classregex", &format!("~{classregex}"))?;
                    builder.attach(
                        element,
                        Matcher::detail(DetailMatcher::Class { name, role: None }),
                    )?;
                } else if let Some(class) = attr(start, "class")? {
                    let name = parse_name_match(element, "class", &class)?;
                    builder.attach(
                        element,
                        Matcher::detail(DetailMatcher::Class { name, role: None }),
                    )?;
                }
            }
            Ok(Opened::Compound)
        }
        "Or" => {
            builder.stack.push(Pending::Or { children: Vec::new(), active });
            Ok(Opened::Compound)
        }
        "Not" => {
            builder.stack.push(Pending::Not { children: Vec::new(), active });
            Ok(Opened::Compound)
        }
        "StackedFilter" => {
            builder.stack.push(Pending::Stacked { atoms: Vec::new(), active });
            Ok(Opened::Compound)
        }
        "FilterAtom" => {
            let key_name = required_attr(start, element, "key")?;
            let key = Sortable::from_name(&key_name)
                .filter(|s| *s != Sortable::Divider)
                .ok_or_else(|| FilterParseError::InvalidValue {
                    element: element.to_string(),
                    attribute: "key",
                    value: key_name.clone(),
                })?;
            let value = required_attr(start, element, "value")?;
            builder.attach_atom(element, SortableValue::new(key, value), active)?;
            Ok(Opened::Leaf)
        }
        _ => {
            let detail = parse_leaf(element, start)?;
            let mut matcher = Matcher::detail(detail);
            matcher.set_active(active);
            builder.attach(element, matcher)?;
            Ok(Opened::Leaf)
        }
    }
}

fn parse_leaf(element: &str, start: &BytesStart<'_>) -> Result<DetailMatcher, FilterParseError> {
    match element {
        "Bug" => {
            let code = attr(start, "code")?;
            let pattern = attr(start, "pattern")?;
            let category = attr(start, "category")?;
            if code.is_none() && pattern.is_none() && category.is_none() {
                return Err(FilterParseError::MissingAttribute {
                    element: element.to_string(),
                    attribute: "code|pattern|category",
                });
            }
            Ok(DetailMatcher::Bug { code, pattern, category })
        }
        "BugCode" => Ok(DetailMatcher::Bug {
            code: Some(required_attr(start, element, "name")?),
            pattern: None,
            category: None,
        }),
        "BugPattern" => Ok(DetailMatcher::Bug {
            code: None,
            pattern: Some(required_attr(start, element, "name")?),
            category: None,
        }),
        "Class" => Ok(DetailMatcher::Class {
            name: parse_name_match(element, "name", &required_attr(start, element, "name")?)?,
            role: attr(start, "role")?,
        }),
        "Type" => Ok(DetailMatcher::Type {
            descriptor: parse_name_match(
                element,
                "descriptor",
                &required_attr(start, element, "descriptor")?,
            )?,
            role: attr(start, "role")?,
            type_parameters: attr(start, "typeParameters")?,
        }),
        "Method" => Ok(DetailMatcher::Method {
            name: match attr(start, "name")? {
                Some(n) => Some(parse_name_match(element, "name", &n)?),
                None => None,
            },
            params: attr(start, "params")?,
            returns: attr(start, "returns")?,
            role: attr(start, "role")?,
        }),
        "Field" => Ok(DetailMatcher::Field {
            name: match attr(start, "name")? {
                Some(n) => Some(parse_name_match(element, "name", &n)?),
                None => None,
            },
            field_type: attr(start, "type")?,
            role: attr(start, "role")?,
        }),
        "Package" => Ok(DetailMatcher::Package {
            name: parse_name_match(element, "name", &required_attr(start, element, "name")?)?,
        }),
        "Priority" => Ok(DetailMatcher::Priority {
            value: parse_number(element, "value", &required_attr(start, element, "value")?)?,
        }),
        "Confidence" => Ok(DetailMatcher::Confidence {
            value: parse_number(element, "value", &required_attr(start, element, "value")?)?,
        }),
        "Rank" => Ok(DetailMatcher::Rank {
            value: parse_number(element, "value", &required_attr(start, element, "value")?)?,
        }),
        "Designation" => Ok(DetailMatcher::Designation {
            designation: required_attr(start, element, "designation")?,
        }),
        "FirstVersion" => Ok(DetailMatcher::FirstVersion {
            value: parse_number(element, "value", &required_attr(start, element, "value")?)?,
            rel_op: parse_rel_op(element, &required_attr(start, element, "relOp")?)?,
        }),
        "LastVersion" => Ok(DetailMatcher::LastVersion {
            value: parse_number(element, "value", &required_attr(start, element, "value")?)?,
            rel_op: parse_rel_op(element, &required_attr(start, element, "relOp")?)?,
        }),
        "Local" => Ok(DetailMatcher::Local {
            name: parse_name_match(element, "name", &required_attr(start, element, "name")?)?,
        }),
        "Source" => Ok(DetailMatcher::Source {
            name: parse_name_match(element, "name", &required_attr(start, element, "name")?)?,
        }),
        _ => Err(FilterParseError::UnknownElement { element: element.to_string() }),
    }
}

/// Serializes a predicate model back to the grammar.
pub fn write_filter_document(kind: DocumentKind, matchers: &[Matcher]) -> String {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer
        .write_event(Event::Start(BytesStart::new(kind.tag())))
        .expect("in-memory write");
    for matcher in matchers {
        write_matcher(&mut writer, matcher);
    }
    writer
        .write_event(Event::End(BytesEnd::new(kind.tag())))
        .expect("in-memory write");
    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).expect("writer emits UTF-8")
}

fn write_matcher(writer: &mut Writer<Cursor<Vec<u8>>>, matcher: &Matcher) {
    let disabled = !matcher.active;
    match &matcher.kind {
        MatcherKind::Atom(atom) => {
            let mut e = BytesStart::new("FilterAtom");
            e.push_attribute(("key", atom.key.as_str()));
            e.push_attribute(("value", atom.value.as_str()));
            if disabled {
                e.push_attribute(("disabled", "true"));
            }
            writer.write_event(Event::Empty(e)).expect("in-memory write");
        }
        MatcherKind::Stacked(atoms) => {
            let mut e = BytesStart::new("StackedFilter");
            if disabled {
                e.push_attribute(("disabled", "true"));
            }
            writer.write_event(Event::Start(e)).expect("in-memory write");
            for atom in atoms {
                let mut a = BytesStart::new("FilterAtom");
                a.push_attribute(("key", atom.key.as_str()));
                a.push_attribute(("value", atom.value.as_str()));
                writer.write_event(Event::Empty(a)).expect("in-memory write");
            }
            writer
                .write_event(Event::End(BytesEnd::new("StackedFilter")))
                .expect("in-memory write");
        }
        MatcherKind::Detail(detail) => write_detail(writer, detail, disabled),
        MatcherKind::And(children) => write_compound(writer, "And", children, disabled),
        MatcherKind::Or(children) => write_compound(writer, "Or", children, disabled),
        MatcherKind::Not(child) => {
            write_compound(writer, "Not", std::slice::from_ref(child), disabled)
        }
    }
}

fn write_compound(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    tag: &str,
    children: &[Matcher],
    disabled: bool,
) {
    let mut e = BytesStart::new(tag);
    if disabled {
        e.push_attribute(("disabled", "true"));
    }
    writer.write_event(Event::Start(e)).expect("in-memory write");
    for child in children {
        write_matcher(writer, child);
    }
    writer.write_event(Event::End(BytesEnd::new(tag))).expect("in-memory write");
}

fn write_detail(writer: &mut Writer<Cursor<Vec<u8>>>, detail: &DetailMatcher, disabled: bool) {
    let (tag, attributes): (&str, Vec<(&str, String)>) = match detail {
        DetailMatcher::Bug { code, pattern, category } => {
            let mut attrs = Vec::new();
            if let Some(code) = code {
                attrs.push(("code", code.clone()));
            }
            if let Some(pattern) = pattern {
                attrs.push(("pattern", pattern.clone()));
            }
            if let Some(category) = category {
                attrs.push(("category", category.clone()));
            }
            ("Bug", attrs)
        }
        DetailMatcher::Class { name, role } => {
            let mut attrs = vec![("name", name.spec())];
            if let Some(role) = role {
                attrs.push(("role", role.clone()));
            }
            ("Class", attrs)
        }
        DetailMatcher::Type { descriptor, role, type_parameters } => {
            let mut attrs = vec![("descriptor", descriptor.spec())];
            if let Some(role) = role {
                attrs.push(("role", role.clone()));
            }
            if let Some(tp) = type_parameters {
                attrs.push(("typeParameters", tp.clone()));
            }
            ("Type", attrs)
        }
        DetailMatcher::Method { name, params, returns, role } => {
            let mut attrs = Vec::new();
            if let Some(name) = name {
                attrs.push(("name", name.spec()));
            }
            if let Some(params) = params {
                attrs.push(("params", params.clone()));
            }
            if let Some(returns) = returns {
                attrs.push(("returns", returns.clone()));
            }
            if let Some(role) = role {
                attrs.push(("role", role.clone()));
            }
            ("Method", attrs)
        }
        DetailMatcher::Field { name, field_type, role } => {
            let mut attrs = Vec::new();
            if let Some(name) = name {
                attrs.push(("name", name.spec()));
            }
            if let Some(t) = field_type {
                attrs.push(("type", t.clone()));
            }
            if let Some(role) = role {
                attrs.push(("role", role.clone()));
            }
            ("Field", attrs)
        }
        DetailMatcher::Package { name } => ("Package", vec![("name", name.spec())]),
        DetailMatcher::Priority { value } => ("Priority", vec![("value", value.to_string())]),
        DetailMatcher::Confidence { value } => {
            ("Confidence", vec![("value", value.to_string())])
        }
        DetailMatcher::Rank { value } => ("Rank", vec![("value", value.to_string())]),
        DetailMatcher::Designation { designation } => {
            ("Designation", vec![("designation", designation.clone())])
        }
        DetailMatcher::FirstVersion { value, rel_op } => (
            "FirstVersion",
            vec![("value", value.to_string()), ("relOp", rel_op.as_str().to_string())],
        ),
        DetailMatcher::LastVersion { value, rel_op } => (
            "LastVersion",
            vec![("value", value.to_string()), ("relOp", rel_op.as_str().to_string())],
        ),
        DetailMatcher::Local { name } => ("Local", vec![("name", name.spec())]),
        DetailMatcher::Source { name } => ("Source", vec![("name", name.spec())]),
    };

    let mut e = BytesStart::new(tag);
    for (key, value) in &attributes {
        e.push_attribute((*key, value.as_str()));
    }
    if disabled {
        e.push_attribute(("disabled", "true"));
    }
    writer.write_event(Event::Empty(e)).expect("in-memory write");
}
