//! Length-prefixed framing for the audit wire protocol (spec §6):
//! `[ 4-bit tag || 28-bit length ][ payload ]`, payload is a
//! protobuf-encoded `ReportBoundaryLogsRequest`.

pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/boundary.audit.rs"));
}

use bytes::{Buf, BufMut, BytesMut};
use prost::Message;
use prost_types::Timestamp;

use proto::boundary_log::Resource;
use proto::{BoundaryLog, HttpRequestLog, ReportBoundaryLogsRequest};

use super::event::AuditEvent;

const FRAME_TAG: u32 = 1;
const LENGTH_MASK: u32 = 0x0FFF_FFFF;

fn to_timestamp(time: chrono::DateTime<chrono::Utc>) -> Timestamp {
    Timestamp {
        seconds: time.timestamp(),
        nanos: time.timestamp_subsec_nanos() as i32,
    }
}

fn to_log(event: &AuditEvent) -> BoundaryLog {
    BoundaryLog {
        allowed: event.allowed,
        time: Some(to_timestamp(event.time)),
        resource: Some(Resource::HttpRequest(HttpRequestLog {
            method: event.method.clone(),
            url: event.url.clone(),
            matched_rule: event.matched_rule.clone().unwrap_or_default(),
        })),
    }
}

/// Serialises a batch into one framed wire message.
pub fn encode_batch(events: &[AuditEvent]) -> BytesMut {
    let request = ReportBoundaryLogsRequest {
        logs: events.iter().map(to_log).collect(),
    };
    let payload = request.encode_to_vec();
    debug_assert!(payload.len() as u64 <= LENGTH_MASK as u64, "batch too large for one frame");

    let mut framed = BytesMut::with_capacity(4 + payload.len());
    let header = (FRAME_TAG << 28) | (payload.len() as u32 & LENGTH_MASK);
    framed.put_u32(header);
    framed.extend_from_slice(&payload);
    framed
}

/// Splits a frame header into `(tag, length)`. Used by tests and by
/// anything reading this wire format back.
pub fn decode_header(mut header: &[u8]) -> (u8, u32) {
    let word = header.get_u32();
    ((word >> 28) as u8, word & LENGTH_MASK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_frame_with_tag_one() {
        let events = vec![AuditEvent::allow("GET", "https://github.com/x", "domain=github.com")];
        let frame = encode_batch(&events);
        let (tag, length) = decode_header(&frame[..4]);
        assert_eq!(tag, 1);
        assert_eq!(length as usize, frame.len() - 4);
    }

    #[test]
    fn payload_round_trips_through_protobuf() {
        let events = vec![
            AuditEvent::allow("GET", "https://github.com/x", "domain=github.com"),
            AuditEvent::deny("POST", "https://evil.com/"),
        ];
        let frame = encode_batch(&events);
        let (_, length) = decode_header(&frame[..4]);
        let decoded = ReportBoundaryLogsRequest::decode(&frame[4..4 + length as usize]).unwrap();
        assert_eq!(decoded.logs.len(), 2);
        assert!(decoded.logs[0].allowed);
        assert!(!decoded.logs[1].allowed);
        match &decoded.logs[1].resource {
            Some(Resource::HttpRequest(req)) => assert_eq!(req.matched_rule, ""),
            None => panic!("missing resource"),
        }
    }
}
