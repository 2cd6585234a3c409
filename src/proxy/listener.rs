//! The proxy's accept loop: one TCP listener, one task per connection
//! (spec §4.3, §5). Grounded on both teacher binaries' `main()` loops.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::ProxyState;

pub const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(30);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ProxyListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ProxyListener {
    pub async fn bind(port: u16) -> Result<ProxyListener> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding proxy listener on {addr}"))?;
        let local_addr = listener.local_addr()?;
        Ok(ProxyListener { listener, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the accept loop until `cancel` fires, then stops accepting and
    /// lets in-flight connections drain for a bounded grace period (spec
    /// §5) before returning.
    pub async fn run(self, state: Arc<ProxyState>, cancel: CancellationToken) -> Result<()> {
        info!(addr = %self.local_addr, "proxy listening");
        let mut in_flight = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.context("accept failed")?;
                    let state = state.clone();
                    in_flight.spawn(async move {
                        if let Err(err) = super::handle_connection(stream, state).await {
                            error!(%peer, error = %err, "connection error");
                        }
                    });
                }
                Some(_) = in_flight.join_next() => {}
            }
        }

        let grace = tokio::time::sleep(Duration::from_secs(5));
        tokio::pin!(grace);
        loop {
            tokio::select! {
                _ = &mut grace => {
                    in_flight.shutdown().await;
                    break;
                }
                next = in_flight.join_next() => {
                    if next.is_none() {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
