//! Matching algorithm (spec §4.1): method set, then host labels compared
//! right-to-left (TLD inward), then path segments compared left-to-right,
//! exact segment count, no prefix matching. Grounded on
//! `simophin-cpxy::rule::RuleString::execute_rules` for the overall
//! first-match-wins shape.

use super::types::{HostPattern, Label, MatchRequest, PathPattern, Rule, Segment};

pub(crate) fn host_matches(pattern: &HostPattern, host: &str) -> bool {
    let host_labels: Vec<&str> = host.split('.').collect();
    let pattern_labels = &pattern.0;
    if host_labels.len() != pattern_labels.len() {
        return false;
    }
    host_labels
        .iter()
        .rev()
        .zip(pattern_labels.iter().rev())
        .all(|(host_label, pattern_label)| match pattern_label {
            Label::Wildcard => true,
            Label::Literal(expected) => expected.eq_ignore_ascii_case(host_label),
        })
}

fn path_matches(pattern: &PathPattern, path: &str) -> bool {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let path_segments: Vec<&str> = if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    };
    let pattern_segments = &pattern.0;
    if path_segments.len() != pattern_segments.len() {
        return false;
    }
    path_segments
        .iter()
        .zip(pattern_segments.iter())
        .all(|(path_segment, pattern_segment)| match pattern_segment {
            Segment::Wildcard => true,
            Segment::Literal(expected) => expected == path_segment,
        })
}

fn rule_matches(rule: &Rule, req: &MatchRequest) -> bool {
    if let Some(methods) = &rule.methods {
        if !methods.matches(req.method) {
            return false;
        }
    }
    if let Some(host_pattern) = &rule.host_pattern {
        if !host_matches(host_pattern, req.host) {
            return false;
        }
    }
    if let Some(path_pattern) = &rule.path_pattern {
        if !path_matches(path_pattern, req.path) {
            return false;
        }
    }
    true
}

/// Evaluates a request against an ordered rule set. Deny-by-default: an
/// empty or non-matching rule set yields `None`. The first matching rule
/// wins and its `raw` text is what gets audited (spec §4.1, §6).
pub fn evaluate<'a>(rules: &'a [Rule], req: &MatchRequest) -> Option<&'a Rule> {
    rules.iter().find(|rule| rule_matches(rule, req))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::parser::parse_allow_specs;

    fn req<'a>(method: &'a str, scheme: &'a str, host: &'a str, path: &'a str) -> MatchRequest<'a> {
        MatchRequest {
            method,
            scheme,
            host,
            path,
        }
    }

    #[test]
    fn empty_ruleset_denies_everything() {
        let rules = parse_allow_specs(&[]).unwrap();
        assert!(evaluate(&rules, &req("GET", "https", "example.com", "/")).is_none());
    }

    #[test]
    fn domain_only_rule_matches_any_method_and_path() {
        let rules = parse_allow_specs(&["domain=github.com".to_string()]).unwrap();
        assert!(evaluate(&rules, &req("POST", "https", "github.com", "/repos/x")).is_some());
        assert!(evaluate(&rules, &req("GET", "https", "evil.com", "/")).is_none());
    }

    #[test]
    fn wildcard_label_matches_subdomain_but_not_apex() {
        let rules = parse_allow_specs(&["domain=*.github.com".to_string()]).unwrap();
        assert!(evaluate(&rules, &req("GET", "https", "api.github.com", "/")).is_some());
        assert!(evaluate(&rules, &req("GET", "https", "github.com", "/")).is_none());
    }

    #[test]
    fn deeper_subdomain_does_not_match_single_wildcard_label() {
        let rules = parse_allow_specs(&["domain=*.github.com".to_string()]).unwrap();
        assert!(evaluate(&rules, &req("GET", "https", "a.b.github.com", "/")).is_none());
    }

    #[test]
    fn path_is_segment_exact_not_prefix() {
        let rules =
            parse_allow_specs(&["domain=example.com path=/todos/1,/todos/2".to_string()])
                .unwrap();
        assert!(evaluate(&rules, &req("GET", "https", "example.com", "/todos/1")).is_some());
        assert!(evaluate(&rules, &req("GET", "https", "example.com", "/todos/3")).is_none());
        assert!(
            evaluate(&rules, &req("GET", "https", "example.com", "/todos/1/extra")).is_none()
        );
    }

    #[test]
    fn method_set_restricts_matching() {
        let rules =
            parse_allow_specs(&["method=GET,HEAD domain=example.com path=/a/*".to_string()])
                .unwrap();
        assert!(evaluate(&rules, &req("GET", "https", "example.com", "/a/x")).is_some());
        assert!(evaluate(&rules, &req("POST", "https", "example.com", "/a/x")).is_none());
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = parse_allow_specs(&[
            "method=GET domain=example.com".to_string(),
            "domain=example.com".to_string(),
        ])
        .unwrap();
        let matched = evaluate(&rules, &req("GET", "https", "example.com", "/")).unwrap();
        assert_eq!(matched.raw, "method=GET domain=example.com");
    }
}
