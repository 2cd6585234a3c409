//! The MITM proxy: a single accept loop dispatching to plain HTTP,
//! `CONNECT`, or direct-TLS handling depending on what arrives on the wire
//! (spec §4.3). Grounded on both teacher binaries, merged: `rust-proxy`
//! handles direct TLS arriving via the jail's transparent port-443 DNAT
//! (the target never issues `CONNECT` because it doesn't know it's being
//! proxied); `prison-network` handles `CONNECT`, which is what a target
//! configured via `HTTP_PROXY`/`HTTPS_PROXY` (nojail mode) issues.

pub mod block;
pub mod connect;
pub mod http;
pub mod listener;
pub mod relay;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::audit::{AuditEvent, Sink};
use crate::ca::CertificateAuthority;
use crate::rules::{Engine, MatchRequest};

pub use listener::ProxyListener;

pub struct ProxyState {
    pub ca: Arc<CertificateAuthority>,
    pub engine: Arc<Engine>,
    pub auditor: Arc<dyn Sink>,
    pub proxy_port: u16,
}

fn is_loopback_exempt(host: &str, proxy_port: u16) -> bool {
    let without_port = http::host_without_port(host);
    (without_port == "localhost" || without_port == "127.0.0.1")
        && host.ends_with(&format!(":{proxy_port}"))
}

async fn read_until_headers(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Result<()> {
    loop {
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(());
        }
        if buf.len() >= 16 * 1024 {
            anyhow::bail!("request headers too large");
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("connection closed before headers completed");
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

pub async fn handle_connection(mut stream: TcpStream, state: Arc<ProxyState>) -> Result<()> {
    let mut peek_buf = vec![0u8; 4096];
    let n = stream.peek(&mut peek_buf).await?;
    peek_buf.truncate(n);

    if n > 0 && peek_buf[0] == 0x16 {
        return handle_direct_tls(stream, peek_buf, state).await;
    }

    let mut buf = Vec::new();
    read_until_headers(&mut stream, &mut buf).await?;
    let head = http::parse_request_head(&buf).context("malformed request")?;

    if head.method.eq_ignore_ascii_case("CONNECT") {
        handle_connect(stream, buf, head, state).await
    } else {
        handle_plain_http(stream, buf, head, state).await
    }
}

async fn evaluate_and_audit(
    state: &ProxyState,
    method: &str,
    scheme: &str,
    host: &str,
    path: &str,
) -> bool {
    let host = http::host_without_port(host);
    let url = format!("{scheme}://{host}{path}");
    let req = MatchRequest {
        method,
        scheme,
        host,
        path,
    };
    match state.engine.evaluate(&req) {
        Some(rule) => {
            state.auditor.record(AuditEvent::allow(method, &url, &rule.raw));
            true
        }
        None => {
            state.auditor.record(AuditEvent::deny(method, &url));
            false
        }
    }
}

async fn handle_plain_http(
    mut client: TcpStream,
    leading: Vec<u8>,
    head: http::RequestHead,
    state: Arc<ProxyState>,
) -> Result<()> {
    let Some(host) = head.effective_host() else {
        client.write_all(&block::response_bytes()).await?;
        return Ok(());
    };
    let path = head.effective_path();

    if is_loopback_exempt(&host, state.proxy_port) {
        return Ok(());
    }

    let allowed = evaluate_and_audit(&state, &head.method, "http", &host, &path).await;
    if !allowed {
        client.write_all(&block::response_bytes()).await?;
        return Ok(());
    }

    let port = 80;
    let hostname = http::host_without_port(&host);
    let mut upstream = match TcpStream::connect((hostname, port)).await {
        Ok(s) => s,
        Err(err) => {
            warn!(%hostname, error = %err, "upstream connect failed");
            let body = format!("HTTP/1.1 502 Bad Gateway\r\nConnection: close\r\n\r\nfailed to connect to {hostname}");
            client.write_all(body.as_bytes()).await?;
            return Ok(());
        }
    };

    // Rebuild the request head with hop-by-hop headers stripped (RFC 7230
    // §6.1), then forward it followed by whatever of the body we've
    // already buffered; the rest streams through as part of the
    // bidirectional relay.
    let stripped_headers = relay::strip_hop_by_hop_headers(&head.headers);
    let mut forward = relay::rebuild_request_head(&head.method, &head.target, &stripped_headers);
    forward.extend_from_slice(&leading[head.header_len..]);
    upstream.write_all(&forward).await.ok();
    relay::relay_bidirectional(client, upstream).await?;
    Ok(())
}

async fn handle_connect(
    mut client: TcpStream,
    buf: Vec<u8>,
    head: http::RequestHead,
    state: Arc<ProxyState>,
) -> Result<()> {
    let (host, port) = parse_connect_authority(&head.target);
    let _ = buf;

    if is_loopback_exempt(&format!("{host}:{port}"), state.proxy_port) {
        return Ok(());
    }

    // Blocking here (before the MITM handshake) is only valid when no rule
    // could possibly match this host regardless of path (spec §4.3).
    if !state.engine.any_rule_could_match_host(&host) {
        state.auditor.record(AuditEvent::deny("CONNECT", &format!("https://{host}:{port}")));
        client
            .write_all(b"HTTP/1.1 403 Forbidden\r\nConnection: close\r\n\r\n")
            .await?;
        return Ok(());
    }

    client.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await?;

    let server_config = connect::server_config_for_host(&state.ca, &host)?;
    let client_tls = connect::accept_mitm_tls(client, server_config).await?;

    serve_mitm_request(client_tls, host, port, state).await
}

async fn handle_direct_tls(client: TcpStream, peeked: Vec<u8>, state: Arc<ProxyState>) -> Result<()> {
    let Some(host) = connect::parse_sni(&peeked) else {
        debug!("direct TLS connection without a parseable SNI; dropping");
        return Ok(());
    };

    if !state.engine.any_rule_could_match_host(&host) {
        state.auditor.record(AuditEvent::deny("CONNECT", &format!("https://{host}")));
        // No CONNECT to reply to: just refuse the TCP connection.
        return Ok(());
    }

    let server_config = connect::server_config_for_host(&state.ca, &host)?;
    let client_tls = connect::accept_mitm_tls(client, server_config).await?;

    serve_mitm_request(client_tls, host, 443, state).await
}

async fn serve_mitm_request(
    mut client_tls: tokio_rustls::server::TlsStream<TcpStream>,
    host: String,
    port: u16,
    state: Arc<ProxyState>,
) -> Result<()> {
    let mut buf = Vec::new();
    loop {
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
        let mut chunk = [0u8; 4096];
        let n = client_tls.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() >= 16 * 1024 {
            anyhow::bail!("request headers too large");
        }
    }
    let head = http::parse_request_head(&buf).context("malformed inner request")?;
    let path = head.effective_path();

    let allowed = evaluate_and_audit(&state, &head.method, "https", &host, &path).await;
    if !allowed {
        client_tls.write_all(&block::response_bytes()).await?;
        return Ok(());
    }

    let mut upstream_tls = connect::connect_upstream_tls(&host, port).await?;
    let stripped_headers = relay::strip_hop_by_hop_headers(&head.headers);
    let mut forward = relay::rebuild_request_head(&head.method, &head.target, &stripped_headers);
    forward.extend_from_slice(&buf[head.header_len..]);
    upstream_tls.write_all(&forward).await?;
    relay::relay_bidirectional(client_tls, upstream_tls).await?;
    Ok(())
}

fn parse_connect_authority(target: &str) -> (String, u16) {
    match target.rfind(':') {
        Some(idx) => {
            let host = &target[..idx];
            let port = target[idx + 1..].parse().unwrap_or(443);
            (host.to_string(), port)
        }
        None => (target.to_string(), 443),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_exemption_matches_localhost_and_loopback_ip() {
        assert!(is_loopback_exempt("localhost:8080", 8080));
        assert!(is_loopback_exempt("127.0.0.1:8080", 8080));
        assert!(!is_loopback_exempt("localhost:9090", 8080));
        assert!(!is_loopback_exempt("example.com:8080", 8080));
    }

    #[test]
    fn connect_authority_defaults_to_443() {
        assert_eq!(parse_connect_authority("example.com:8443"), ("example.com".to_string(), 8443));
        assert_eq!(parse_connect_authority("example.com"), ("example.com".to_string(), 443));
    }
}
