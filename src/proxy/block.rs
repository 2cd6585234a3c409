//! The synthetic deny response (spec §6).

pub const BLOCK_BODY: &str = "Request Blocked by Boundary\n";
pub const REASON_HEADER: &str = "X-Boundary-Reason";
pub const REASON_NO_MATCH: &str = "no-matching-allow-rule";

/// A complete HTTP/1.1 403 response, ready to write to either a plain or
/// TLS-wrapped stream.
pub fn response_bytes() -> Vec<u8> {
    format!(
        "HTTP/1.1 403 Forbidden\r\n\
         Content-Type: text/plain\r\n\
         {header}: {reason}\r\n\
         Content-Length: {len}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        header = REASON_HEADER,
        reason = REASON_NO_MATCH,
        len = BLOCK_BODY.len(),
        body = BLOCK_BODY,
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_matches_exactly() {
        let bytes = response_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(text.ends_with("Request Blocked by Boundary\n"));
        assert!(text.contains("X-Boundary-Reason: no-matching-allow-rule"));
    }
}
