//! # server
//!
//! TCP ingest for the tag gateway. One peer at a time: the listener accepts a
//! connection, streams it through [`LineFramer`] and [`decode_report`] into the
//! shared ranging state until the peer hangs up, then goes back to accepting.
//! Further peers wait in the listen backlog meanwhile.
//!
//! ## Failure handling
//! - Bind failure is returned to the caller (fatal at startup).
//! - Reset / aborted / failed reads end the current connection only.
//! - Malformed records are logged and skipped; state is left untouched.
//! - The shutdown watch channel interrupts both accept and read.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::framing::{Frame, LineFramer};
use crate::ranging_state::SharedRanging;
use crate::report::decode_report;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Longest slice of a rejected record echoed into the log
const LOG_SNIPPET_CHARS: usize = 120;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

// ── Ingest pipeline ───────────────────────────────────────────────────────────

/// Counters for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub bytes: u64,
    /// Non-empty records handed to the parser
    pub records: u64,
    pub accepted: u64,
    pub rejected: u64,
    /// Over-long lines dropped by the framer
    pub overflowed: u64,
}

/// Framer + parser + publisher for one byte stream.
pub struct LineIngest {
    framer: LineFramer,
    state: SharedRanging,
    stats: IngestStats,
}

impl LineIngest {
    pub fn new(state: SharedRanging, max_line_bytes: usize) -> Self {
        Self {
            framer: LineFramer::new(max_line_bytes),
            state,
            stats: IngestStats::default(),
        }
    }

    /// Feed one read's worth of bytes; every complete record is decoded and
    /// valid ones are published in arrival order.
    pub async fn feed(&mut self, chunk: &[u8]) {
        self.stats.bytes += chunk.len() as u64;
        self.framer.push(chunk);

        while let Some(frame) = self.framer.next_frame() {
            match frame {
                Frame::Record(record) if record.is_empty() => {}
                Frame::Record(record) => {
                    self.stats.records += 1;
                    match decode_report(&record) {
                        Ok(report) => {
                            debug!(
                                "Tag {}: d=[{:.2}, {:.2}, {:.2}] cm rssi=[{:.2}, {:.2}, {:.2}] dBm",
                                report.tag_id,
                                report.measurements[0].distance,
                                report.measurements[1].distance,
                                report.measurements[2].distance,
                                report.measurements[0].rssi,
                                report.measurements[1].rssi,
                                report.measurements[2].rssi,
                            );
                            self.state.publish(report).await;
                            self.stats.accepted += 1;
                        }
                        Err(reason) => {
                            self.stats.rejected += 1;
                            warn!("Dropped record ({reason}): {}", snippet(&record));
                        }
                    }
                }
                Frame::Overflow { discarded } => {
                    self.stats.overflowed += 1;
                    warn!("Dropped over-long line ({discarded} bytes)");
                }
            }
        }
    }

    /// End of stream: drop any unterminated record. Returns the final counters.
    pub fn finish(mut self) -> IngestStats {
        let dropped = self.framer.reset();
        if dropped > 0 {
            debug!("Discarded {dropped} bytes of unterminated record");
        }
        self.stats
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }
}

fn snippet(record: &[u8]) -> String {
    let text = String::from_utf8_lossy(record);
    if text.chars().count() > LOG_SNIPPET_CHARS {
        let cut: String = text.chars().take(LOG_SNIPPET_CHARS).collect();
        format!("{cut}…")
    } else {
        text.into_owned()
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

pub struct ConnectionServer {
    listener: TcpListener,
    state: SharedRanging,
    read_buffer_bytes: usize,
    max_line_bytes: usize,
}

impl ConnectionServer {
    pub async fn bind(config: &ServerConfig, state: SharedRanging) -> Result<Self, ServerError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr: addr.clone(), source })?;
        info!("📡 Ranging server listening on TCP {addr}");

        Ok(Self {
            listener,
            state,
            read_buffer_bytes: config.read_buffer_bytes.max(1),
            max_line_bytes: config.max_line_bytes,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve peers one at a time until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let accepted = tokio::select! {
                res = self.listener.accept() => res,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match accepted {
                Ok((stream, peer)) => {
                    info!("🔌 Connected by {peer}");
                    let stats = self.serve_connection(stream, &mut shutdown).await;
                    info!(
                        "Client {peer} disconnected ({} bytes, {} records: {} accepted, {} rejected, {} over-long)",
                        stats.bytes, stats.records, stats.accepted, stats.rejected, stats.overflowed
                    );
                }
                Err(e) => {
                    // e.g. EMFILE: keep the listener, try again shortly
                    warn!("Accept failed: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
        info!("Ranging server stopped");
    }

    async fn serve_connection(&self, mut stream: TcpStream, shutdown: &mut watch::Receiver<bool>) -> IngestStats {
        let mut ingest = LineIngest::new(self.state.clone(), self.max_line_bytes);
        let mut buf = vec![0u8; self.read_buffer_bytes];

        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested, closing active connection");
                break;
            }

            let read = tokio::select! {
                res = stream.read(&mut buf) => res,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match read {
                Ok(0) => break,
                Ok(n) => ingest.feed(&buf[..n]).await,
                Err(e) if is_disconnect(&e) => {
                    info!("Connection reset by peer");
                    break;
                }
                Err(e) => {
                    warn!("Read error: {e}");
                    break;
                }
            }
        }

        ingest.finish()
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}
