//! Minimal HTTP/1.x request-line and header parsing, enough to extract
//! `(method, host, path)` for rule evaluation without pulling in a full
//! HTTP parser. Grounded on the teacher's hand-rolled request-line split
//! in `handle_connection`, extended to cover absolute-form targets.

#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    /// Byte offset of the end of the header block (after the blank line).
    pub header_len: usize,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Host for this request: absolute-form target wins, falling back to
    /// the `Host` header (origin-form targets and CONNECT rely on this).
    pub fn effective_host(&self) -> Option<String> {
        if let Some(host) = host_from_absolute_form(&self.target) {
            return Some(host);
        }
        self.header("host").map(|h| h.to_string())
    }

    /// Path with any scheme/authority stripped and query dropped.
    pub fn effective_path(&self) -> String {
        let without_query = self.target.split('?').next().unwrap_or(&self.target);
        if let Some(idx) = without_query.find("://") {
            let after_scheme = &without_query[idx + 3..];
            match after_scheme.find('/') {
                Some(slash) => after_scheme[slash..].to_string(),
                None => "/".to_string(),
            }
        } else {
            without_query.to_string()
        }
    }
}

fn host_from_absolute_form(target: &str) -> Option<String> {
    let idx = target.find("://")?;
    let after_scheme = &target[idx + 3..];
    let authority = match after_scheme.find('/') {
        Some(slash) => &after_scheme[..slash],
        None => after_scheme,
    };
    if authority.is_empty() {
        None
    } else {
        Some(authority.to_string())
    }
}

/// Parses request line + headers out of a buffer that contains at least
/// one full `\r\n\r\n`-terminated header block. Returns `None` if the
/// buffer doesn't look like an HTTP request at all.
pub fn parse_request_head(buf: &[u8]) -> Option<RequestHead> {
    let end = find_header_end(buf)?;
    let text = std::str::from_utf8(&buf[..end]).ok()?;
    let mut lines = text.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();
    parts.next()?; // HTTP version

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Some(RequestHead {
        method,
        target,
        headers,
        header_len: end,
    })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Strips `:port` from a `Host` header value, matching spec §4.1 rule 2
/// ("a host with an explicit port uses only the hostname part").
pub fn host_without_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal like "[::1]:8080".
        return host.split(']').next().map(|h| &h[1..]).unwrap_or(host);
    }
    host.split(':').next().unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_origin_form_request_with_host_header() {
        let raw = b"GET /a/b?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let head = parse_request_head(raw).unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.effective_host().as_deref(), Some("example.com"));
        assert_eq!(head.effective_path(), "/a/b");
    }

    #[test]
    fn parses_absolute_form_request() {
        let raw = b"GET http://example.com/a HTTP/1.1\r\n\r\n";
        let head = parse_request_head(raw).unwrap();
        assert_eq!(head.effective_host().as_deref(), Some("example.com"));
        assert_eq!(head.effective_path(), "/a");
    }

    #[test]
    fn strips_port_from_host() {
        assert_eq!(host_without_port("example.com:8443"), "example.com");
        assert_eq!(host_without_port("example.com"), "example.com");
        assert_eq!(host_without_port("[::1]:8080"), "::1");
    }

    #[test]
    fn returns_none_without_full_header_block() {
        let raw = b"GET / HTTP/1.1\r\nHost: example.com\r\n";
        assert!(parse_request_head(raw).is_none());
    }
}
