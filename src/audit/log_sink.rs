//! Synchronous sink: one structured line per event, `INFO` on allow,
//! `WARN` on deny (spec §4.5). Grounded on the teacher's `log_traffic`,
//! moved from ad hoc JSON lines onto `tracing`.

use tracing::{info, warn};

use super::{AuditEvent, Sink};

pub struct LogSink;

impl Sink for LogSink {
    fn record(&self, event: AuditEvent) {
        if event.allowed {
            info!(
                method = %event.method,
                url = %event.url,
                rule = event.matched_rule.as_deref().unwrap_or(""),
                "allow"
            );
        } else {
            warn!(method = %event.method, url = %event.url, "deny");
        }
    }
}
