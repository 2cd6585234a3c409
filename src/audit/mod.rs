//! Auditing: two concrete sinks composed through a fan-out (spec §4.5).

pub mod event;
pub mod log_sink;
pub mod socket_sink;
pub mod wire;

pub use event::AuditEvent;
pub use log_sink::LogSink;
pub use socket_sink::{SocketSink, SocketSinkHandle};

use std::sync::Arc;

/// A destination for audit events. The log sink and socket sink both
/// implement this, as does the fan-out below.
pub trait Sink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Fans an event out to every configured concrete sink.
pub struct MultiSink {
    sinks: Vec<Arc<dyn Sink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> MultiSink {
        MultiSink { sinks }
    }
}

impl Sink for MultiSink {
    fn record(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording(Mutex<Vec<AuditEvent>>);

    impl Sink for Recording {
        fn record(&self, event: AuditEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn multi_sink_fans_out_to_every_sink() {
        let a = Arc::new(Recording(Mutex::new(Vec::new())));
        let b = Arc::new(Recording(Mutex::new(Vec::new())));
        let multi = MultiSink::new(vec![a.clone(), b.clone()]);
        multi.record(AuditEvent::allow("GET", "https://example.com/", "domain=example.com"));
        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(b.0.lock().unwrap().len(), 1);
    }
}
