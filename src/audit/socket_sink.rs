//! Bounded, batched, retrying Unix-domain-socket sink (spec §4.5).
//!
//! A single worker task owns the queue, batch, socket handle, and flush
//! timer. Callers only enqueue; the worker decides when to dial, flush,
//! and redial. Grounded on the lifecycle shape of
//! `zed-industries-codex::network_proxy::NetworkProxyHandle` (a
//! `JoinHandle`-backed worker with an explicit shutdown join).

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::event::AuditEvent;
use super::wire::encode_batch;
use super::Sink;

const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Enqueues events onto a bounded channel; never blocks the data plane.
pub struct SocketSink {
    tx: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
}

impl Sink for SocketSink {
    fn record(&self, event: AuditEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl SocketSink {
    pub fn spawn(socket_path: PathBuf) -> (Arc<SocketSink>, SocketSinkHandle) {
        Self::spawn_with(socket_path, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL)
    }

    pub fn spawn_with(
        socket_path: PathBuf,
        batch_size: usize,
        flush_interval: Duration,
    ) -> (Arc<SocketSink>, SocketSinkHandle) {
        let (tx, rx) = mpsc::channel(batch_size * 2);
        let dropped = Arc::new(AtomicU64::new(0));
        let worker = Worker {
            socket_path,
            batch_size,
            flush_interval,
            rx,
            conn: None,
            batch: Vec::new(),
            deadline: None,
        };
        let join = tokio::spawn(worker.run());
        let sink = Arc::new(SocketSink {
            tx,
            dropped: dropped.clone(),
        });
        (sink, SocketSinkHandle { join, dropped })
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct SocketSinkHandle {
    join: JoinHandle<()>,
    dropped: Arc<AtomicU64>,
}

impl SocketSinkHandle {
    /// Waits for the worker to drain its queue and perform a final flush.
    /// The caller must have dropped every `Arc<SocketSink>` first so the
    /// channel actually closes.
    pub async fn shutdown(self) -> u64 {
        let _ = self.join.await;
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Worker {
    socket_path: PathBuf,
    batch_size: usize,
    flush_interval: Duration,
    rx: mpsc::Receiver<AuditEvent>,
    conn: Option<UnixStream>,
    batch: Vec<AuditEvent>,
    deadline: Option<Instant>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let sleep_for = self
                .deadline
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_secs(3600));
            let sleep = tokio::time::sleep(sleep_for);
            tokio::pin!(sleep);

            tokio::select! {
                _ = &mut sleep, if self.deadline.is_some() => {
                    self.deadline = None;
                    self.flush().await;
                }
                maybe_event = self.rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            if self.batch.is_empty() {
                                self.deadline = Some(Instant::now() + self.flush_interval);
                            }
                            self.batch.push(event);
                            if self.batch.len() >= self.batch_size {
                                self.deadline = None;
                                self.flush().await;
                            }
                        }
                        None => {
                            while let Ok(event) = self.rx.try_recv() {
                                self.batch.push(event);
                            }
                            self.flush().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        if self.conn.is_none() {
            match UnixStream::connect(&self.socket_path).await {
                Ok(stream) => self.conn = Some(stream),
                Err(err) => {
                    warn!(
                        socket = %self.socket_path.display(),
                        error = %err,
                        "audit socket dial failed, retaining batch"
                    );
                    return;
                }
            }
        }

        let frame = encode_batch(&self.batch);
        if let Some(conn) = self.conn.as_mut() {
            match conn.write_all(&frame).await {
                Ok(()) => {
                    debug!(events = self.batch.len(), "flushed audit batch");
                    self.batch.clear();
                }
                Err(err) => {
                    warn!(error = %err, "audit socket write failed, will redial on next flush");
                    self.conn = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn flushes_batch_on_size_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let (sink, handle) = SocketSink::spawn_with(path, 2, Duration::from_secs(30));
        sink.record(AuditEvent::allow("GET", "https://a/", "domain=a"));
        sink.record(AuditEvent::allow("GET", "https://b/", "domain=b"));

        let (mut conn, _) = listener.accept().await.unwrap();
        let mut header = [0u8; 4];
        tokio::io::AsyncReadExt::read_exact(&mut conn, &mut header)
            .await
            .unwrap();
        let (tag, _len) = super::super::wire::decode_header(&header);
        assert_eq!(tag, 1);

        drop(sink);
        let dropped = handle.shutdown().await;
        assert_eq!(dropped, 0);
    }

    #[tokio::test]
    async fn counts_drops_when_queue_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.sock");
        // `record` is synchronous and the test runtime is single-threaded,
        // so all 16 sends below run to completion before the worker task
        // (spawned but not yet polled) gets a chance to drain any of them.
        let (sink, handle) = SocketSink::spawn_with(path, 1, Duration::from_secs(30));
        for i in 0..16 {
            sink.record(AuditEvent::allow("GET", &format!("https://{i}/"), "domain=x"));
        }
        assert_eq!(sink.dropped_count(), 14); // capacity is batch_size * 2 = 2
        drop(sink);
        let _ = handle.shutdown().await;
    }
}
