//! Recursive-descent parser for `--allow` specs (spec §4.1).
//!
//! Each input string is a whitespace-separated sequence of `key=value`
//! clauses (`method=`, `domain=`, `path=`). Parsing is total on well-formed
//! input; malformed input is rejected with the offending spec and a
//! description of where it went wrong (spec §4.1, "fatal to the whole
//! parse"). Grounded on `simophin-cpxy::rule::Rule::parse_rules`.

use std::collections::HashSet;

use thiserror::Error;

use super::types::{HostPattern, Label, MethodSet, PathPattern, Rule, Segment};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("allow spec {spec_index}: empty clause")]
    EmptyClause { spec_index: usize },

    #[error("allow spec {spec_index}: clause {clause:?} is missing '='")]
    MissingEquals { spec_index: usize, clause: String },

    #[error("allow spec {spec_index}: unknown key {key:?} (expected method, domain, or path)")]
    UnknownKey { spec_index: usize, key: String },

    #[error("allow spec {spec_index}: key {key:?} given more than once")]
    DuplicateKey { spec_index: usize, key: String },

    #[error("allow spec {spec_index}: method {token:?} is not a valid RFC 7230 token")]
    InvalidMethodToken { spec_index: usize, token: String },

    #[error("allow spec {spec_index}: domain label {label:?} is not a valid RFC 1123 label")]
    InvalidHostLabel { spec_index: usize, label: String },

    #[error("allow spec {spec_index}: domain pattern must not end with a wildcard label")]
    TrailingWildcardLabel { spec_index: usize },

    #[error("allow spec {spec_index}: domain pattern is empty")]
    EmptyHostPattern { spec_index: usize },

    #[error("allow spec {spec_index}: path segment {segment:?} is not a legal path segment")]
    InvalidPathSegment { spec_index: usize, segment: String },

    #[error("allow spec {spec_index}: path segment {segment:?} mixes a wildcard with literal text")]
    MixedWildcardSegment { spec_index: usize, segment: String },
}

const METHOD_TCHARS: &str = "!#$%&'*+-.^_`|~";

fn is_tchar(c: char) -> bool {
    c.is_ascii_alphanumeric() || METHOD_TCHARS.contains(c)
}

fn parse_method_clause(value: &str, spec_index: usize) -> Result<MethodSet, ParseError> {
    let mut set = HashSet::new();
    for token in value.split(',') {
        if token.is_empty() || !token.chars().all(is_tchar) {
            return Err(ParseError::InvalidMethodToken {
                spec_index,
                token: token.to_string(),
            });
        }
        set.insert(token.to_ascii_uppercase());
    }
    if set.contains("*") {
        Ok(MethodSet::Any)
    } else {
        Ok(MethodSet::Set(set))
    }
}

fn is_valid_dns_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    if bytes.is_empty() {
        return false;
    }
    let first = bytes[0];
    let last = bytes[bytes.len() - 1];
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return false;
    }
    bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
}

fn parse_host_clause(value: &str, spec_index: usize) -> Result<HostPattern, ParseError> {
    let labels: Vec<&str> = value.split('.').collect();
    if labels.is_empty() || labels.iter().any(|l| l.is_empty()) {
        return Err(ParseError::EmptyHostPattern { spec_index });
    }
    let mut out = Vec::with_capacity(labels.len());
    for label in &labels {
        if *label == "*" {
            out.push(Label::Wildcard);
        } else {
            if !is_valid_dns_label(label) {
                return Err(ParseError::InvalidHostLabel {
                    spec_index,
                    label: (*label).to_string(),
                });
            }
            out.push(Label::Literal(label.to_ascii_lowercase()));
        }
    }
    if matches!(out.last(), Some(Label::Wildcard)) {
        return Err(ParseError::TrailingWildcardLabel { spec_index });
    }
    Ok(HostPattern(out))
}

fn is_unreserved_or_pct_or_sub_delim_or_colon_at(c: char) -> bool {
    // RFC 3986 pchar minus '%' handling, which is validated separately below.
    c.is_ascii_alphanumeric()
        || "-._~!$&'()*+,;=:@".contains(c)
}

fn parse_path_segment(segment: &str, spec_index: usize) -> Result<Segment, ParseError> {
    if segment == "*" {
        return Ok(Segment::Wildcard);
    }
    if segment.contains('*') {
        return Err(ParseError::MixedWildcardSegment {
            spec_index,
            segment: segment.to_string(),
        });
    }
    // Validate pchar sequence with %HH escapes.
    let bytes = segment.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = segment[i..].chars().next().unwrap();
        if c == '%' {
            if i + 2 >= bytes.len()
                || !bytes[i + 1].is_ascii_hexdigit()
                || !bytes[i + 2].is_ascii_hexdigit()
            {
                return Err(ParseError::InvalidPathSegment {
                    spec_index,
                    segment: segment.to_string(),
                });
            }
            i += 3;
            continue;
        }
        if !is_unreserved_or_pct_or_sub_delim_or_colon_at(c) {
            return Err(ParseError::InvalidPathSegment {
                spec_index,
                segment: segment.to_string(),
            });
        }
        i += c.len_utf8();
    }
    Ok(Segment::Literal(segment.to_string()))
}

/// A single `path=` value may list several comma-separated segment lists;
/// each becomes an independent `PathPattern` sharing the rule's other
/// clauses (spec §4.1).
fn parse_path_clause(value: &str, spec_index: usize) -> Result<Vec<PathPattern>, ParseError> {
    let mut out = Vec::new();
    for list in value.split(',') {
        let trimmed = list.strip_prefix('/').unwrap_or(list);
        let segments = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed
                .split('/')
                .map(|seg| parse_path_segment(seg, spec_index))
                .collect::<Result<Vec<_>, _>>()?
        };
        out.push(PathPattern(segments));
    }
    Ok(out)
}

/// Parse a single `--allow` spec string into one or more rules (path
/// comma-expansion can produce several rules sharing method/host clauses).
fn parse_spec(spec: &str, spec_index: usize) -> Result<Vec<Rule>, ParseError> {
    let mut methods: Option<MethodSet> = None;
    let mut host_pattern: Option<HostPattern> = None;
    let mut path_patterns: Option<Vec<PathPattern>> = None;

    for clause in spec.split_whitespace() {
        let (key, value) = clause.split_once('=').ok_or_else(|| ParseError::MissingEquals {
            spec_index,
            clause: clause.to_string(),
        })?;
        if key.is_empty() || value.is_empty() {
            return Err(ParseError::EmptyClause { spec_index });
        }
        match key {
            "method" => {
                if methods.is_some() {
                    return Err(ParseError::DuplicateKey {
                        spec_index,
                        key: key.to_string(),
                    });
                }
                methods = Some(parse_method_clause(value, spec_index)?);
            }
            "domain" => {
                if host_pattern.is_some() {
                    return Err(ParseError::DuplicateKey {
                        spec_index,
                        key: key.to_string(),
                    });
                }
                host_pattern = Some(parse_host_clause(value, spec_index)?);
            }
            "path" => {
                if path_patterns.is_some() {
                    return Err(ParseError::DuplicateKey {
                        spec_index,
                        key: key.to_string(),
                    });
                }
                path_patterns = Some(parse_path_clause(value, spec_index)?);
            }
            other => {
                return Err(ParseError::UnknownKey {
                    spec_index,
                    key: other.to_string(),
                })
            }
        }
    }

    let raw = spec.to_string();
    match path_patterns {
        None => Ok(vec![Rule {
            methods,
            host_pattern,
            path_pattern: None,
            raw,
        }]),
        Some(patterns) => Ok(patterns
            .into_iter()
            .map(|p| Rule {
                methods: methods.clone(),
                host_pattern: host_pattern.clone(),
                path_pattern: Some(p),
                raw: raw.clone(),
            })
            .collect()),
    }
}

/// Parse a whole `--allow`/`allowlist` list. Total on well-formed input;
/// the first offending spec aborts the entire parse (spec §4.1).
pub fn parse_allow_specs(specs: &[String]) -> Result<Vec<Rule>, ParseError> {
    let mut rules = Vec::new();
    for (index, spec) in specs.iter().enumerate() {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            rules.push(Rule::any());
            continue;
        }
        rules.extend(parse_spec(trimmed, index)?);
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::types::MethodSet;

    #[test]
    fn parses_domain_only() {
        let rules = parse_allow_specs(&["domain=github.com".to_string()]).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].raw, "domain=github.com");
        assert!(rules[0].methods.is_none());
        assert!(rules[0].path_pattern.is_none());
    }

    #[test]
    fn parses_method_domain_path_clause() {
        let rules = parse_allow_specs(&[
            "method=GET,HEAD domain=example.com path=/a/*".to_string(),
        ])
        .unwrap();
        assert_eq!(rules.len(), 1);
        match &rules[0].methods {
            Some(MethodSet::Set(set)) => {
                assert!(set.contains("GET"));
                assert!(set.contains("HEAD"));
            }
            other => panic!("unexpected methods: {other:?}"),
        }
    }

    #[test]
    fn rejects_trailing_wildcard_label() {
        let err = parse_allow_specs(&["domain=*.com.*".to_string()]).unwrap_err();
        assert!(matches!(err, ParseError::TrailingWildcardLabel { .. }));
    }

    #[test]
    fn rejects_double_wildcard_path_segment() {
        let err = parse_allow_specs(&["path=/api/**".to_string()]).unwrap_err();
        assert!(matches!(err, ParseError::MixedWildcardSegment { .. }));
    }

    #[test]
    fn path_comma_list_expands_into_independent_rules_sharing_domain() {
        let rules =
            parse_allow_specs(&["domain=example.com path=/todos/1,/todos/2".to_string()])
                .unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.host_pattern.is_some()));
    }

    #[test]
    fn empty_spec_list_element_matches_everything() {
        let rules = parse_allow_specs(&["".to_string()]).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0], Rule::any());
    }
}
