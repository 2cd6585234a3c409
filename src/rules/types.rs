//! Typed rule AST. Tagged variants instead of sentinel strings (spec §9):
//! a literal `*` segment can never be confused with a wildcard segment.

use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Label {
    Literal(String),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodSet {
    Any,
    Set(HashSet<String>),
}

impl MethodSet {
    pub fn matches(&self, method: &str) -> bool {
        match self {
            MethodSet::Any => true,
            MethodSet::Set(set) => set.contains("*") || set.contains(method),
        }
    }
}

/// An ordered, left-to-right (TLD-last) sequence of host labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPattern(pub Vec<Label>);

/// An ordered, left-to-right sequence of path segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern(pub Vec<Segment>);

/// A single parsed `--allow` specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub methods: Option<MethodSet>,
    pub host_pattern: Option<HostPattern>,
    pub path_pattern: Option<PathPattern>,
    pub raw: String,
}

impl Rule {
    /// A rule with every field absent matches everything.
    pub fn any() -> Rule {
        Rule {
            methods: None,
            host_pattern: None,
            path_pattern: None,
            raw: String::new(),
        }
    }
}

/// The tuple a request is matched against (spec §3 "Matched request").
#[derive(Debug, Clone)]
pub struct MatchRequest<'a> {
    pub method: &'a str,
    pub scheme: &'a str,
    pub host: &'a str,
    pub path: &'a str,
}
