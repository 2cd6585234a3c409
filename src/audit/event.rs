//! The event shape shared by every audit sink.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub allowed: bool,
    pub time: DateTime<Utc>,
    pub method: String,
    pub url: String,
    /// Populated only when `allowed` is true (spec §6).
    pub matched_rule: Option<String>,
}

impl AuditEvent {
    pub fn allow(method: &str, url: &str, matched_rule: &str) -> AuditEvent {
        AuditEvent {
            allowed: true,
            time: Utc::now(),
            method: method.to_string(),
            url: url.to_string(),
            matched_rule: Some(matched_rule.to_string()),
        }
    }

    pub fn deny(method: &str, url: &str) -> AuditEvent {
        AuditEvent {
            allowed: false,
            time: Utc::now(),
            method: method.to_string(),
            url: url.to_string(),
            matched_rule: None,
        }
    }
}
