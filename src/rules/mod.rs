//! Deny-by-default allowlist rule engine (spec §4.1).

pub mod matcher;
pub mod parser;
pub mod types;

pub use parser::ParseError;
pub use types::{HostPattern, Label, MatchRequest, MethodSet, PathPattern, Rule, Segment};

/// An ordered, parsed rule set with a single evaluation entry point.
#[derive(Debug, Clone)]
pub struct Engine {
    rules: Vec<Rule>,
}

impl Engine {
    pub fn from_specs(specs: &[String]) -> Result<Engine, ParseError> {
        Ok(Engine {
            rules: parser::parse_allow_specs(specs)?,
        })
    }

    /// Returns the first matching rule, or `None` if the request is denied.
    pub fn evaluate<'a>(&'a self, req: &MatchRequest) -> Option<&'a Rule> {
        matcher::evaluate(&self.rules, req)
    }

    /// Ignores method and path: true if some rule's host pattern matches
    /// (or is absent). Used to decide whether a `CONNECT`'s inner TLS
    /// handshake is worth completing at all (spec §4.3) before the path is
    /// known; never the final allow/deny verdict on its own.
    pub fn any_rule_could_match_host(&self, host: &str) -> bool {
        self.rules.iter().any(|rule| match &rule.host_pattern {
            None => true,
            Some(pattern) => matcher::host_matches(pattern, host),
        })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_wires_parser_and_matcher_together() {
        let engine = Engine::from_specs(&["domain=github.com".to_string()]).unwrap();
        let req = MatchRequest {
            method: "GET",
            scheme: "https",
            host: "github.com",
            path: "/",
        };
        assert!(engine.evaluate(&req).is_some());
    }
}
