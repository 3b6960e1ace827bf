//! # ranging_state
//!
//! The latest accepted ranging sample, shared between the connection server
//! (writer) and the position consumer (reader).
//!
//! Last-write-wins with no history: a newer report replaces the older one whole.
//! Distances and signal strengths live in one value behind one lock, so a reader
//! never sees distances from one report paired with RSSI from another.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;
use uwb_types::RangingReport;

/// Snapshot of one accepted report.
#[derive(Debug, Clone, PartialEq)]
pub struct RangingSample {
    pub tag_id: String,
    /// cm, ordered A1, A2, A3
    pub distances: [f64; 3],
    /// dBm, ordered A1, A2, A3
    pub signal_strengths: [f64; 3],
    /// Publish order, starting at 1
    pub seq: u64,
    pub received_at: Instant,
}

#[derive(Debug, Default)]
pub struct SharedRangingState {
    latest: RwLock<Option<RangingSample>>,
    next_seq: AtomicU64,
}

pub type SharedRanging = Arc<SharedRangingState>;

impl SharedRangingState {
    pub fn new() -> SharedRanging {
        Arc::new(Self::default())
    }

    /// Replace the current sample with `report`. Returns the assigned sequence number.
    pub async fn publish(&self, report: RangingReport) -> u64 {
        let distances = report.distances();
        let signal_strengths = report.signal_strengths();

        let mut latest = self.latest.write().await;
        // Assigned under the write lock so seq order matches publish order
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        *latest = Some(RangingSample {
            tag_id: report.tag_id,
            distances,
            signal_strengths,
            seq,
            received_at: Instant::now(),
        });
        seq
    }

    /// Copy of the current sample, `None` until the first report is accepted.
    pub async fn snapshot(&self) -> Option<RangingSample> {
        self.latest.read().await.clone()
    }

    /// Number of reports published so far.
    pub fn published(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed)
    }
}
