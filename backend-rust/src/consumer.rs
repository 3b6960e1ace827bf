//! # consumer
//!
//! Timer-paced reader of the shared ranging state. Every tick it copies the
//! latest sample, runs the trilateration solver and hands a [`PositionUpdate`]
//! to each registered [`PositionSink`] (renderers, logs).
//!
//! A missing sample or a failed solve skips the tick and nothing else: state is
//! never cleared, and the next tick tries again with whatever is latest. A sample
//! that has not changed since the previous tick is solved and forwarded again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uwb_types::ResolvedPosition;

use crate::ranging_state::SharedRanging;
use crate::trilateration::{SolveError, Trilaterator};

/// One resolved position plus the signal strengths of the sample it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionUpdate {
    pub tag_id: String,
    pub position: ResolvedPosition,
    /// dBm, A1..A3
    pub signal_strengths: [f64; 3],
    /// cm, A1..A3
    pub distances: [f64; 3],
    pub rms_residual_cm: f64,
    pub sample_seq: u64,
}

/// Receiver of resolved positions. Called from the consumer task; implementations
/// must not block.
pub trait PositionSink: Send + Sync {
    fn publish(&self, update: &PositionUpdate);
}

/// Logs every Nth position at `info`.
pub struct LogSink {
    every: u64,
    seen: AtomicU64,
}

impl LogSink {
    pub fn new(every: u64) -> Self {
        Self { every, seen: AtomicU64::new(0) }
    }
}

impl PositionSink for LogSink {
    fn publish(&self, update: &PositionUpdate) {
        if self.every == 0 {
            return;
        }
        let n = self.seen.fetch_add(1, Ordering::Relaxed);
        if n % self.every == 0 {
            let [s1, s2, s3] = update.signal_strengths;
            info!(
                "Tag position: x={:.1} cm, y={:.1} cm (rms {:.2} cm, rssi {:.1}/{:.1}/{:.1} dBm)",
                update.position.x, update.position.y, update.rms_residual_cm, s1, s2, s3
            );
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No report accepted yet
    NoSample,
    Unresolved(SolveError),
    Resolved(PositionUpdate),
}

pub struct PositionConsumer {
    state: SharedRanging,
    solver: Trilaterator,
    interval: Duration,
    sinks: Vec<Arc<dyn PositionSink>>,
}

impl PositionConsumer {
    pub fn new(state: SharedRanging, solver: Trilaterator, interval: Duration) -> Self {
        Self {
            state,
            solver,
            interval,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn PositionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// One consumer step.
    pub async fn tick(&self) -> TickOutcome {
        let Some(sample) = self.state.snapshot().await else {
            return TickOutcome::NoSample;
        };

        match self.solver.solve(sample.distances) {
            Ok(solution) => {
                let update = PositionUpdate {
                    tag_id: sample.tag_id,
                    position: solution.position,
                    signal_strengths: sample.signal_strengths,
                    distances: sample.distances,
                    rms_residual_cm: solution.rms_residual_cm,
                    sample_seq: sample.seq,
                };
                for sink in &self.sinks {
                    sink.publish(&update);
                }
                TickOutcome::Resolved(update)
            }
            Err(e) => {
                debug!("Sample #{} unresolved: {e}", sample.seq);
                TickOutcome::Unresolved(e)
            }
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("📍 Position consumer running every {}ms", self.interval.as_millis());

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            self.tick().await;
        }
        info!("Position consumer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranging_state::SharedRangingState;
    use crate::trilateration::SolverConfig;
    use std::sync::Mutex;
    use uwb_types::{AnchorId, AnchorMeasurement, AnchorPosition, RangingReport};

    #[derive(Default)]
    struct Collect(Mutex<Vec<PositionUpdate>>);

    impl PositionSink for Collect {
        fn publish(&self, update: &PositionUpdate) {
            self.0.lock().unwrap().push(update.clone());
        }
    }

    fn solver(max_iterations: u32) -> Trilaterator {
        Trilaterator::new(
            [
                AnchorPosition::new(AnchorId::A1, 15.0, 5.0),
                AnchorPosition::new(AnchorId::A2, 290.0, 5.0),
                AnchorPosition::new(AnchorId::A3, 165.0, 625.0),
            ],
            SolverConfig { max_iterations, ..SolverConfig::default() },
        )
    }

    fn report(solver: &Trilaterator, x: f64, y: f64) -> RangingReport {
        let d = solver.anchors().map(|a| a.distance_to(x, y));
        RangingReport {
            tag_id: "T1".into(),
            measurements: [
                AnchorMeasurement { distance: d[0], rssi: -60.0 },
                AnchorMeasurement { distance: d[1], rssi: -62.0 },
                AnchorMeasurement { distance: d[2], rssi: -58.0 },
            ],
        }
    }

    #[tokio::test]
    async fn empty_state_skips_tick() {
        let sink = Arc::new(Collect::default());
        let consumer = PositionConsumer::new(SharedRangingState::new(), solver(200), Duration::from_millis(10))
            .with_sink(sink.clone());
        assert_eq!(consumer.tick().await, TickOutcome::NoSample);
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolved_tick_reaches_sinks_and_repeats_on_stale_sample() {
        let state = SharedRangingState::new();
        let sink = Arc::new(Collect::default());
        let solver = solver(200);
        state.publish(report(&solver, 200.0, 400.0)).await;

        let consumer = PositionConsumer::new(state, solver, Duration::from_millis(10)).with_sink(sink.clone());
        let TickOutcome::Resolved(update) = consumer.tick().await else {
            panic!("expected a position");
        };
        assert!(update.position.distance_to(&ResolvedPosition::new(200.0, 400.0)) < 0.01);
        assert_eq!(update.signal_strengths, [-60.0, -62.0, -58.0]);
        assert_eq!(update.sample_seq, 1);

        consumer.tick().await;
        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].sample_seq, 1);
    }

    #[tokio::test]
    async fn unresolved_tick_keeps_state() {
        let state = SharedRangingState::new();
        let sink = Arc::new(Collect::default());
        let starved = Trilaterator::new(
            *solver(1).anchors(),
            SolverConfig {
                max_iterations: 1,
                x_tolerance: 0.0,
                f_tolerance: 0.0,
                g_tolerance: 0.0,
            },
        );
        state.publish(report(&starved, 400.0, 600.0)).await;

        let consumer = PositionConsumer::new(state.clone(), starved, Duration::from_millis(10))
            .with_sink(sink.clone());
        assert!(matches!(consumer.tick().await, TickOutcome::Unresolved(SolveError::NotConverged { .. })));
        assert!(sink.0.lock().unwrap().is_empty());
        assert!(state.snapshot().await.is_some());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let state = SharedRangingState::new();
        let sink = Arc::new(Collect::default());
        let solver = solver(200);
        state.publish(report(&solver, 100.0, 100.0)).await;

        let (tx, rx) = watch::channel(false);
        let consumer = PositionConsumer::new(state, solver, Duration::from_millis(5)).with_sink(sink.clone());
        let task = tokio::spawn(consumer.run(rx));

        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(!sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn log_sink_throttles() {
        let sink = LogSink::new(3);
        let update = PositionUpdate {
            tag_id: "T".into(),
            position: ResolvedPosition::new(1.0, 2.0),
            signal_strengths: [0.0; 3],
            distances: [0.0; 3],
            rms_residual_cm: 0.0,
            sample_seq: 1,
        };
        for _ in 0..7 {
            sink.publish(&update);
        }
        assert_eq!(sink.seen.load(Ordering::Relaxed), 7);
    }
}
