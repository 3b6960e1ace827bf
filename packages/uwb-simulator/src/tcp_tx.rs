//! tcp_tx.rs — TCP transmitter for ranging lines
//!
//! Holds one connection to the tracker. A failed connect or write drops the
//! connection and the next send reconnects, waiting with exponential backoff
//! (doubling from `base_delay`, capped at `max_delay`). Send errors are logged,
//! never fatal.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self { base_delay, max_delay, attempt: 0 }
    }

    /// Delay before the next attempt; grows on each call.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        self.attempt = self.attempt.saturating_add(1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(5))
    }
}

pub struct TcpTransmitter {
    addr: String,
    stream: Option<TcpStream>,
    backoff: Backoff,
    /// Delay owed before the next connect attempt
    pending_delay: Option<Duration>,
}

impl TcpTransmitter {
    pub fn new(addr: impl Into<String>, backoff: Backoff) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
            backoff,
            pending_delay: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn ensure_connected(&mut self) -> Option<&mut TcpStream> {
        if self.stream.is_none() {
            if let Some(delay) = self.pending_delay.take() {
                tokio::time::sleep(delay).await;
            }
            match TcpStream::connect(&self.addr).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    info!("🔌 Connected to tracker at {}", self.addr);
                    self.backoff.reset();
                    self.stream = Some(stream);
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!("TCP: connect to {} failed: {e} (retry in {}ms)", self.addr, delay.as_millis());
                    self.pending_delay = Some(delay);
                }
            }
        }
        self.stream.as_mut()
    }

    /// Write `line` in pieces of `chunks` bytes (all remaining bytes if the
    /// sizes fall short). Returns whether the whole line was written.
    pub async fn send_line(&mut self, line: &[u8], chunks: &[usize]) -> bool {
        let addr = self.addr.clone();
        let Some(stream) = self.ensure_connected().await else {
            return false;
        };

        let mut offset = 0;
        let mut result = Ok(());
        for &size in chunks {
            if offset >= line.len() {
                break;
            }
            let end = (offset + size).min(line.len());
            result = write_piece(stream, &line[offset..end]).await;
            if result.is_err() {
                break;
            }
            offset = end;
        }
        if result.is_ok() && offset < line.len() {
            result = write_piece(stream, &line[offset..]).await;
        }

        match result {
            Ok(()) => {
                debug!("TCP → {addr} {} bytes in {} chunk(s)", line.len(), chunks.len().max(1));
                true
            }
            Err(e) => {
                warn!("TCP: send to {addr} failed: {e}; reconnecting");
                self.stream = None;
                self.pending_delay = Some(self.backoff.next_delay());
                false
            }
        }
    }
}

async fn write_piece(stream: &mut TcpStream, piece: &[u8]) -> std::io::Result<()> {
    stream.write_all(piece).await?;
    stream.flush().await
}
