//! # uwb-tracker
//!
//! Three-anchor UWB tag tracker. A tag gateway streams newline-delimited JSON
//! ranging reports over TCP; the tracker keeps the newest report and resolves a
//! 2D tag position from it on a fixed cadence.
//!
//! ```text
//! TCP ─▶ server ─▶ framing ─▶ report ─▶ ranging_state ◀─ consumer ─▶ trilateration
//!                                                           │
//!                                                           └─▶ telemetry / logs
//! ```
//!
//! The network side and the solve side share nothing but
//! [`ranging_state::SharedRangingState`].

pub mod config;
pub mod consumer;
pub mod framing;
pub mod ranging_state;
pub mod report;
pub mod server;
pub mod telemetry;
pub mod trilateration;

pub use config::TrackerConfig;
pub use consumer::{LogSink, PositionConsumer, PositionSink, PositionUpdate, TickOutcome};
pub use framing::{Frame, LineFramer};
pub use ranging_state::{RangingSample, SharedRanging, SharedRangingState};
pub use report::{decode_report, RejectReason};
pub use server::{ConnectionServer, IngestStats, LineIngest, ServerError};
pub use telemetry::{SceneInfo, TelemetryHub};
pub use trilateration::{SolveError, SolverConfig, TrilaterationSolution, Trilaterator};
