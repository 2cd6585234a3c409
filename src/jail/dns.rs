//! The dummy DNS sink (spec §4.4, §6). Runs inside the namespace on
//! `127.0.0.1:5353`, DNATed to from every outbound DNS query regardless of
//! the resolver the target asked for, so nothing ever actually resolves
//! names from inside the jail. Built on `hickory-proto`'s wire types only;
//! no resolver or server crate is pulled in since the answers are fixed.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use anyhow::{Context, Result};
use hickory_proto::op::{Message, MessageType, OpCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_DNS_PORT: u16 = 5353;
const FIXED_A: Ipv4Addr = Ipv4Addr::new(6, 6, 6, 6);
const FIXED_AAAA: Ipv6Addr = Ipv6Addr::new(0x2001, 0x0db8, 0, 0, 0, 0, 0, 1);
const FIXED_TTL: u32 = 1;

fn build_response(query: &Message) -> Message {
    let mut response = Message::new();
    response.set_id(query.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(OpCode::Query);
    response.set_authoritative(true);
    response.set_recursion_available(false);

    for q in query.queries() {
        response.add_query(q.clone());
        match q.query_type() {
            RecordType::A => {
                response.add_answer(Record::from_rdata(q.name().clone(), FIXED_TTL, RData::A(A(FIXED_A))));
            }
            RecordType::AAAA => {
                response.add_answer(Record::from_rdata(
                    q.name().clone(),
                    FIXED_TTL,
                    RData::AAAA(AAAA(FIXED_AAAA)),
                ));
            }
            _ => {
                // RCODE=0, empty answer section: nothing to add.
            }
        }
    }
    response
}

async fn serve_udp(socket: UdpSocket, cancel: CancellationToken) -> Result<()> {
    let mut buf = [0u8; 512];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            recvd = socket.recv_from(&mut buf) => {
                let (n, peer) = recvd.context("dummy DNS UDP recv failed")?;
                if let Err(err) = respond_udp(&socket, &buf[..n], peer).await {
                    warn!(error = %err, "dummy DNS failed to answer UDP query");
                }
            }
        }
    }
}

async fn respond_udp(socket: &UdpSocket, query_bytes: &[u8], peer: SocketAddr) -> Result<()> {
    let query = Message::from_bytes(query_bytes).context("decoding DNS query")?;
    let response = build_response(&query);
    let bytes = response.to_bytes().context("encoding DNS response")?;
    socket.send_to(&bytes, peer).await.context("sending DNS response")?;
    debug!(%peer, "answered dummy DNS query over UDP");
    Ok(())
}

async fn serve_tcp(listener: TcpListener, cancel: CancellationToken) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("dummy DNS TCP accept failed")?;
                tokio::spawn(async move {
                    if let Err(err) = handle_tcp_connection(stream).await {
                        warn!(%peer, error = %err, "dummy DNS TCP connection failed");
                    }
                });
            }
        }
    }
}

async fn handle_tcp_connection(mut stream: tokio::net::TcpStream) -> Result<()> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut query_buf = vec![0u8; len];
    stream.read_exact(&mut query_buf).await?;

    let query = Message::from_bytes(&query_buf).context("decoding DNS-over-TCP query")?;
    let response = build_response(&query);
    let bytes = response.to_bytes().context("encoding DNS-over-TCP response")?;

    stream.write_all(&(bytes.len() as u16).to_be_bytes()).await?;
    stream.write_all(&bytes).await?;
    Ok(())
}

/// Binds UDP and TCP on `127.0.0.1:port` and serves fixed answers until
/// `cancel` fires.
pub async fn run(port: u16, cancel: CancellationToken) -> Result<()> {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let udp = UdpSocket::bind(addr).await.context("binding dummy DNS UDP socket")?;
    let tcp = TcpListener::bind(addr).await.context("binding dummy DNS TCP socket")?;

    let udp_cancel = cancel.clone();
    let udp_task = tokio::spawn(serve_udp(udp, udp_cancel));
    let tcp_task = tokio::spawn(serve_tcp(tcp, cancel));

    let (udp_result, tcp_result) = tokio::join!(udp_task, tcp_task);
    udp_result.context("dummy DNS UDP task panicked")??;
    tcp_result.context("dummy DNS TCP task panicked")??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::Name;
    use std::str::FromStr;

    fn a_query() -> Message {
        let mut msg = Message::new();
        msg.set_id(42);
        msg.set_message_type(MessageType::Query);
        msg.add_query(Query::query(Name::from_str("example.com.").unwrap(), RecordType::A));
        msg
    }

    #[test]
    fn answers_a_query_with_fixed_address() {
        let response = build_response(&a_query());
        assert_eq!(response.id(), 42);
        assert!(response.authoritative());
        assert_eq!(response.answers().len(), 1);
        match response.answers()[0].data() {
            Some(RData::A(a)) => assert_eq!(a.0, FIXED_A),
            other => panic!("unexpected rdata: {other:?}"),
        }
    }

    #[test]
    fn answers_aaaa_query_with_fixed_address() {
        let mut msg = Message::new();
        msg.set_id(7);
        msg.add_query(Query::query(Name::from_str("example.com.").unwrap(), RecordType::AAAA));
        let response = build_response(&msg);
        match response.answers()[0].data() {
            Some(RData::AAAA(aaaa)) => assert_eq!(aaaa.0, FIXED_AAAA),
            other => panic!("unexpected rdata: {other:?}"),
        }
    }

    #[test]
    fn other_query_types_get_empty_answer_section() {
        let mut msg = Message::new();
        msg.set_id(9);
        msg.add_query(Query::query(Name::from_str("example.com.").unwrap(), RecordType::MX));
        let response = build_response(&msg);
        assert!(response.answers().is_empty());
    }
}
