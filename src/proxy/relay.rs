//! Hop-by-hop header stripping (RFC 7230 §6.1) and bidirectional byte
//! relaying. Grounded on the teacher's `tokio::io::copy` + `tokio::select!`
//! relay loop in both `rust-proxy` and `prison-network`.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(header_name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(header_name))
}

/// Removes hop-by-hop headers from a raw, CRLF-delimited header block,
/// leaving everything else (including `Content-Length`) untouched.
pub fn strip_hop_by_hop_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .cloned()
        .collect()
}

/// Rebuilds a request line + header block to forward upstream, after the
/// caller has stripped whatever headers it doesn't want carried through.
pub fn rebuild_request_head(method: &str, target: &str, headers: &[(String, String)]) -> Vec<u8> {
    let mut out = format!("{method} {target} HTTP/1.1\r\n").into_bytes();
    for (name, value) in headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out
}

/// Copies bytes in both directions until either side closes or errors.
/// Used once the request has been approved and the response is streamed
/// back; unbounded once headers are sent (spec §4.3).
pub async fn relay_bidirectional<A, B>(a: A, b: B) -> std::io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let a_to_b = tokio::io::copy(&mut a_read, &mut b_write);
    let b_to_a = tokio::io::copy(&mut b_read, &mut a_write);

    tokio::select! {
        result = a_to_b => { result?; }
        result = b_to_a => { result?; }
    }
    let _ = a_write.shutdown().await;
    let _ = b_write.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_hop_by_hop_headers_case_insensitively() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(!is_hop_by_hop("Content-Length"));
        assert!(!is_hop_by_hop("Host"));
    }

    #[test]
    fn strip_keeps_content_length_and_host() {
        let headers = vec![
            ("Host".to_string(), "example.com".to_string()),
            ("Connection".to_string(), "keep-alive".to_string()),
            ("Content-Length".to_string(), "12".to_string()),
        ];
        let stripped = strip_hop_by_hop_headers(&headers);
        assert_eq!(stripped.len(), 2);
        assert!(stripped.iter().any(|(n, _)| n == "Host"));
        assert!(stripped.iter().any(|(n, _)| n == "Content-Length"));
    }

    #[test]
    fn rebuild_produces_a_well_formed_request_head() {
        let headers = vec![("Host".to_string(), "example.com".to_string())];
        let rebuilt = rebuild_request_head("GET", "/a/b", &headers);
        assert_eq!(
            String::from_utf8(rebuilt).unwrap(),
            "GET /a/b HTTP/1.1\r\nHost: example.com\r\n\r\n"
        );
    }
}
