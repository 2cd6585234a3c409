//! MITM TLS setup for both the `CONNECT` and direct-TLS dispatch paths.
//! Grounded on `prison-network::handle_connection`'s inline TLS accept and
//! `rust-proxy::parse_sni` for the direct-TLS (no `CONNECT`) path that the
//! jail's port-443 DNAT produces.

use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::ca::CertificateAuthority;

/// Parses the SNI hostname out of a raw TLS ClientHello, for connections
/// that arrive as direct TLS rather than via `CONNECT` (the jail's
/// transparent-redirect path, where the target never issues a `CONNECT`
/// because it doesn't know it's being proxied).
pub fn parse_sni(buf: &[u8]) -> Option<String> {
    if buf.len() < 5 || buf[0] != 0x16 {
        return None;
    }
    let record_len = ((buf[3] as usize) << 8) | (buf[4] as usize);
    if buf.len() < 5 + record_len {
        return None;
    }

    let handshake = &buf[5..];
    if handshake.is_empty() || handshake[0] != 0x01 || handshake.len() < 4 {
        return None;
    }
    let hello_len =
        ((handshake[1] as usize) << 16) | ((handshake[2] as usize) << 8) | (handshake[3] as usize);
    if handshake.len() < 4 + hello_len {
        return None;
    }

    let hello = &handshake[4..];
    if hello.len() < 34 {
        return None;
    }
    let mut pos = 34;

    let session_len = *hello.get(pos)? as usize;
    pos += 1 + session_len;

    if pos + 2 > hello.len() {
        return None;
    }
    let cipher_len = ((hello[pos] as usize) << 8) | (hello[pos + 1] as usize);
    pos += 2 + cipher_len;

    let comp_len = *hello.get(pos)? as usize;
    pos += 1 + comp_len;

    if pos + 2 > hello.len() {
        return None;
    }
    let ext_len = ((hello[pos] as usize) << 8) | (hello[pos + 1] as usize);
    pos += 2;

    let ext_end = pos + ext_len;
    while pos + 4 <= ext_end && pos + 4 <= hello.len() {
        let ext_type = ((hello[pos] as u16) << 8) | (hello[pos + 1] as u16);
        let ext_data_len = ((hello[pos + 2] as usize) << 8) | (hello[pos + 3] as usize);
        pos += 4;

        if ext_type == 0 {
            let sni_data = hello.get(pos..pos + ext_data_len)?;
            if sni_data.len() < 5 {
                return None;
            }
            let name_len = ((sni_data[3] as usize) << 8) | (sni_data[4] as usize);
            let name = sni_data.get(5..5 + name_len)?;
            return String::from_utf8(name.to_vec()).ok();
        }
        pos += ext_data_len;
    }
    None
}

/// Builds a server TLS config presenting a leaf certificate for
/// `hostname`, minted (or fetched from cache) by the CA.
pub fn server_config_for_host(ca: &CertificateAuthority, hostname: &str) -> Result<ServerConfig> {
    let leaf = ca.get_certificate(hostname)?;
    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(leaf.chain, leaf.key)
        .context("building MITM server TLS config")
}

pub async fn accept_mitm_tls(stream: TcpStream, config: ServerConfig) -> Result<tokio_rustls::server::TlsStream<TcpStream>> {
    let acceptor = TlsAcceptor::from(Arc::new(config));
    acceptor.accept(stream).await.context("MITM TLS handshake with target failed")
}

/// Dials and TLS-wraps the real upstream, verifying its certificate
/// against the system trust store (spec §4.3).
pub async fn connect_upstream_tls(host: &str, port: u16) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let tcp = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("connecting to upstream {host}:{port}"))?;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));

    let server_name = ServerName::try_from(host.to_string()).context("invalid upstream hostname")?;
    connector
        .connect(server_name, tcp)
        .await
        .context("TLS handshake with upstream failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sni_parser_rejects_non_tls_bytes() {
        assert_eq!(parse_sni(b"GET / HTTP/1.1\r\n\r\n"), None);
    }
}
