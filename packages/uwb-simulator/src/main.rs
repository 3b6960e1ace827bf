//! main.rs — UWB tag emulator entry point
//!
//! Stands in for the tag gateway during development: walks a simulated tag
//! around the room and streams one ranging line per epoch to the tracker over
//! TCP. Scenarios inject the stream faults the tracker has to tolerate.

mod scenarios;
mod tag_sim;
mod tcp_tx;
mod uwb_physics;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use uwb_types::{AnchorId, AnchorPosition, RangingEnvelope};

use scenarios::{ScenarioConfig, ScenarioType};
use tag_sim::{MotionConfig, TagSim};
use tcp_tx::{Backoff, TcpTransmitter};
use uwb_physics::{RadioConfig, RadioModel};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "uwb-sim", about = "UWB tag emulator for the three-anchor tracker")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Tracker address (host:port)
    #[arg(long)]
    tracker_addr: Option<String>,
    /// Tag identifier put in every record
    #[arg(long)]
    tag_id: Option<String>,
    /// Records per second
    #[arg(long)]
    rate_hz: Option<f64>,
    /// Enable a fault scenario (repeatable)
    #[arg(long = "scenario", value_enum)]
    scenarios: Vec<ScenarioType>,
    /// Load a scenario preset: flaky_link, crowded_room, anchor_fault
    #[arg(long)]
    preset: Option<String>,
    /// Seed the noise generator for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
    /// Stop after this many records
    #[arg(long)]
    count: Option<u64>,
}

// ── Config structs ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FullConfig {
    simulation: SimulationConfig,
    room: RoomConfig,
    anchors: AnchorConfig,
    motion: MotionConfig,
    radio: RadioConfig,
    scenarios: ScenarioConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SimulationConfig {
    tracker_addr: String,
    tag_id: String,
    rate_hz: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tracker_addr: "127.0.0.1:7007".to_string(),
            tag_id: "T1".to_string(),
            rate_hz: 10.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RoomConfig {
    width_cm: f64,
    height_cm: f64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self { width_cm: 480.0, height_cm: 650.0 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct AnchorConfig {
    a1: [f64; 2],
    a2: [f64; 2],
    a3: [f64; 2],
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self { a1: [15.0, 5.0], a2: [290.0, 5.0], a3: [165.0, 625.0] }
    }
}

impl AnchorConfig {
    fn positions(&self) -> [AnchorPosition; 3] {
        [
            AnchorPosition::new(AnchorId::A1, self.a1[0], self.a1[1]),
            AnchorPosition::new(AnchorId::A2, self.a2[0], self.a2[1]),
            AnchorPosition::new(AnchorId::A3, self.a3[0], self.a3[1]),
        ]
    }
}

fn load_config(args: &Args) -> Result<FullConfig> {
    let text = std::fs::read_to_string(&args.config)
        .unwrap_or_else(|_| include_str!("../config.toml").to_string());
    let mut cfg: FullConfig = toml::from_str(&text).context("invalid simulator config")?;

    if let Some(addr) = &args.tracker_addr {
        cfg.simulation.tracker_addr = addr.clone();
    }
    if let Some(tag) = &args.tag_id {
        cfg.simulation.tag_id = tag.clone();
    }
    if let Some(rate) = args.rate_hz {
        cfg.simulation.rate_hz = rate;
    }
    if let Some(name) = &args.preset {
        match scenarios::preset(name) {
            Some(preset) => cfg.scenarios = preset,
            None => bail!("unknown scenario preset: {name}"),
        }
    }
    for &s in &args.scenarios {
        cfg.scenarios.enable(s);
    }

    if !(cfg.simulation.rate_hz.is_finite() && cfg.simulation.rate_hz > 0.0) {
        bail!("simulation.rate_hz must be positive, got {}", cfg.simulation.rate_hz);
    }
    Ok(cfg)
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uwb_sim=info".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = load_config(&args)?;
    let radio = RadioModel::new(&cfg.radio).context("invalid [radio] noise parameters")?;
    let anchors = cfg.anchors.positions();
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    info!(
        "🏷  UWB tag emulator starting: tag {} at {} Hz → {} (scenarios: {:?})",
        cfg.simulation.tag_id, cfg.simulation.rate_hz, cfg.simulation.tracker_addr, cfg.scenarios.active
    );

    let mut sim = TagSim::new(&cfg.motion, cfg.room.width_cm, cfg.room.height_cm);
    let mut tx = TcpTransmitter::new(cfg.simulation.tracker_addr.clone(), Backoff::default());

    let epoch = Duration::from_secs_f64(1.0 / cfg.simulation.rate_hz);
    let mut ticker = interval(epoch);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut sent = 0u64;
    let mut epoch_counter = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, stopping");
                break;
            }
        }
        if args.count.is_some_and(|n| sent >= n) {
            break;
        }

        sim.tick(epoch.as_secs_f64());
        epoch_counter += 1;

        let measurements = radio.generate_epoch(sim.position, &anchors, cfg.scenarios.nlos_multiplier(), &mut rng);
        let envelope = RangingEnvelope::new(cfg.simulation.tag_id.clone(), measurements);
        let line = match cfg.scenarios.encode(&envelope, epoch_counter) {
            Ok(line) => line,
            Err(e) => {
                warn!("Serialize failed: {e}");
                continue;
            }
        };
        let chunks = cfg.scenarios.chunk_sizes(line.len(), &mut rng);

        if tx.send_line(line.as_bytes(), &chunks).await {
            sent += 1;
        }

        if epoch_counter % 50 == 0 {
            info!(
                "⏱ epoch={} sent={} tag=({:.1}, {:.1}) cm link={}",
                epoch_counter,
                sent,
                sim.position.x,
                sim.position.y,
                if tx.is_connected() { "up" } else { "down" }
            );
        }
    }

    info!("Sent {sent} records in {epoch_counter} epochs");
    Ok(())
}
