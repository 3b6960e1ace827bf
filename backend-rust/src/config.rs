//! # config
//!
//! Tracker configuration: TOML file (optional), then `UWB_*` environment
//! overrides, then command-line overrides applied by `main`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use uwb_types::{AnchorId, AnchorPosition};

use crate::framing::DEFAULT_MAX_LINE_BYTES;
use crate::trilateration::SolverConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Size of each socket read
    pub read_buffer_bytes: usize,
    /// Longest accepted record; longer lines are dropped
    pub max_line_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7007,
            read_buffer_bytes: 1024,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Anchor coordinates in cm, `[x, y]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnchorLayout {
    pub a1: [f64; 2],
    pub a2: [f64; 2],
    pub a3: [f64; 2],
}

impl Default for AnchorLayout {
    fn default() -> Self {
        Self {
            a1: [15.0, 5.0],
            a2: [290.0, 5.0],
            a3: [165.0, 625.0],
        }
    }
}

impl AnchorLayout {
    pub fn positions(&self) -> [AnchorPosition; 3] {
        [
            AnchorPosition::new(AnchorId::A1, self.a1[0], self.a1[1]),
            AnchorPosition::new(AnchorId::A2, self.a2[0], self.a2[1]),
            AnchorPosition::new(AnchorId::A3, self.a3[0], self.a3[1]),
        ]
    }

    /// Twice the signed triangle area; zero when the anchors are collinear.
    fn doubled_area(&self) -> f64 {
        let [a, b, c] = [self.a1, self.a2, self.a3];
        (b[0] - a[0]) * (c[1] - a[1]) - (c[0] - a[0]) * (b[1] - a[1])
    }
}

/// Floor plan passed through to renderers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub width_cm: f64,
    pub height_cm: f64,
    pub background_image: Option<PathBuf>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            width_cm: 480.0,
            height_cm: 650.0,
            background_image: Some(PathBuf::from("floorplan.png")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Solve cadence
    pub interval_ms: u64,
    /// Trailing positions kept for renderers
    pub path_history: usize,
    /// Log every Nth resolved position (0 disables)
    pub log_every: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            path_history: 100,
            log_every: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:9090".to_string(),
        }
    }
}

// ── Root ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub server: ServerConfig,
    pub anchors: AnchorLayout,
    pub room: RoomConfig,
    pub consumer: ConsumerConfig,
    pub solver: SolverConfig,
    pub telemetry: TelemetryConfig,
}

impl TrackerConfig {
    /// Read `path` if it exists, otherwise start from defaults. Environment
    /// overrides are applied and the result validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut cfg = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let cfg = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            info!("Loaded config from {}", path.display());
            cfg
        } else {
            info!("No {} found, using default config", path.display());
            Self::default()
        };
        cfg.apply_env(|var| std::env::var(var).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// `UWB_HOST`, `UWB_PORT`, `UWB_TELEMETRY_BIND`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(host) = lookup("UWB_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("UWB_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::Env { var: "UWB_PORT", value: port })?;
        }
        if let Some(bind) = lookup("UWB_TELEMETRY_BIND") {
            self.telemetry.bind = bind;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.server.port == 0 {
            return invalid("server.port must be non-zero".into());
        }
        if self.server.read_buffer_bytes == 0 || self.server.max_line_bytes == 0 {
            return invalid("server buffer sizes must be non-zero".into());
        }
        for (name, v) in [("room.width_cm", self.room.width_cm), ("room.height_cm", self.room.height_cm)] {
            if !(v.is_finite() && v > 0.0) {
                return invalid(format!("{name} must be positive, got {v}"));
            }
        }
        if self.consumer.interval_ms == 0 {
            return invalid("consumer.interval_ms must be non-zero".into());
        }
        if self.solver.max_iterations == 0 {
            return invalid("solver.max_iterations must be non-zero".into());
        }
        if self.telemetry.enabled && self.telemetry.bind.parse::<SocketAddr>().is_err() {
            return invalid(format!("telemetry.bind is not a socket address: {}", self.telemetry.bind));
        }

        let positions = self.anchors.positions();
        for a in &positions {
            if !(a.x.is_finite() && a.y.is_finite()) {
                return invalid(format!("anchor {} has non-finite coordinates", a.id));
            }
        }
        for (i, a) in positions.iter().enumerate() {
            for b in &positions[i + 1..] {
                if a.x == b.x && a.y == b.y {
                    return invalid(format!("anchors {} and {} coincide", a.id, b.id));
                }
            }
        }
        if self.anchors.doubled_area().abs() < 1e-6 {
            warn!("Anchors are collinear: positions will be ill-conditioned");
        }
        Ok(())
    }
}
