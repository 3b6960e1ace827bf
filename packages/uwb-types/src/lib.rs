//! # uwb-types
//!
//! Shared ranging structures for the three-anchor UWB tracker.
//!
//! These types are used by:
//! - `backend-rust`: decoding ranging reports from the tag gateway and solving positions
//! - `packages/uwb-simulator`: producing ranging reports for development without hardware
//!
//! ## Coordinate Conventions
//!
//! - **Room frame**: 2D Cartesian, origin at the lower-left corner of the floor plan,
//!   X to the right, Y up, all values in centimeters.
//! - Signal strengths are RSSI values in dBm as reported by the tag firmware.
//!
//! ## Wire format
//!
//! One JSON object per line (`\n` terminated):
//!
//! ```text
//! {"tag_id":"T1","anchors":{"A1":{"distance":324.42,"rssi":-60}, "A2":{...}, "A3":{...}}}
//! ```

use serde::{Deserialize, Serialize};

// ── Anchor identity ───────────────────────────────────────────────────────────

/// One of the three fixed anchors. The tracker supports exactly three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AnchorId {
    A1 = 1,
    A2 = 2,
    A3 = 3,
}

impl AnchorId {
    pub const ALL: [AnchorId; 3] = [AnchorId::A1, AnchorId::A2, AnchorId::A3];

    /// Key used for this anchor in the wire `anchors` mapping
    pub fn key(self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::A3 => "A3",
        }
    }

    /// Zero-based slot in measurement/position triples
    pub fn index(self) -> usize {
        self as usize - 1
    }
}

impl std::fmt::Display for AnchorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

// ── Geometry ──────────────────────────────────────────────────────────────────

/// Fixed anchor location in the room frame. Set once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorPosition {
    pub id: AnchorId,
    /// cm
    pub x: f64,
    /// cm
    pub y: f64,
}

impl AnchorPosition {
    pub fn new(id: AnchorId, x: f64, y: f64) -> Self {
        Self { id, x, y }
    }

    /// Euclidean distance from this anchor to a point, cm
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (x - self.x).hypot(y - self.y)
    }
}

/// Tag position resolved by trilateration (room frame, cm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPosition {
    pub x: f64,
    pub y: f64,
}

impl ResolvedPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &ResolvedPosition) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

// ── Ranging report ────────────────────────────────────────────────────────────

/// Distance + signal quality for one anchor in one report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorMeasurement {
    /// Measured tag→anchor range, cm (≥ 0)
    pub distance: f64,
    /// Received signal strength, dBm
    pub rssi: f64,
}

/// A validated report: tag identifier plus the ordered (A1, A2, A3) triple.
#[derive(Debug, Clone, PartialEq)]
pub struct RangingReport {
    pub tag_id: String,
    pub measurements: [AnchorMeasurement; 3],
}

impl RangingReport {
    pub fn distances(&self) -> [f64; 3] {
        self.measurements.map(|m| m.distance)
    }

    pub fn signal_strengths(&self) -> [f64; 3] {
        self.measurements.map(|m| m.rssi)
    }
}

// ── Wire envelope ─────────────────────────────────────────────────────────────

/// The `anchors` mapping as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorReadings {
    #[serde(rename = "A1")]
    pub a1: AnchorMeasurement,
    #[serde(rename = "A2")]
    pub a2: AnchorMeasurement,
    #[serde(rename = "A3")]
    pub a3: AnchorMeasurement,
}

/// Serialized form of one ranging line. Producers (tag gateway, simulator) emit
/// this; the tracker decodes leniently with its own validator so it can classify
/// rejections, so this type is the strict, well-formed shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangingEnvelope {
    pub tag_id: String,
    pub anchors: AnchorReadings,
}

impl RangingEnvelope {
    pub fn new(tag_id: impl Into<String>, measurements: [AnchorMeasurement; 3]) -> Self {
        let [a1, a2, a3] = measurements;
        Self {
            tag_id: tag_id.into(),
            anchors: AnchorReadings { a1, a2, a3 },
        }
    }

    /// Encode as one newline-terminated wire record.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_fixed_anchor_keys() {
        let env = RangingEnvelope::new(
            "T1",
            [
                AnchorMeasurement { distance: 1.5, rssi: -60.0 },
                AnchorMeasurement { distance: 2.5, rssi: -62.0 },
                AnchorMeasurement { distance: 3.5, rssi: -58.0 },
            ],
        );
        let line = env.to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let v: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(v["tag_id"], "T1");
        assert_eq!(v["anchors"]["A2"]["distance"], 2.5);
        assert_eq!(v["anchors"]["A3"]["rssi"], -58.0);
    }

    #[test]
    fn anchor_slots_follow_wire_order() {
        assert_eq!(AnchorId::ALL.map(AnchorId::index), [0, 1, 2]);
        assert_eq!(AnchorId::A3.to_string(), "A3");

        let report = RangingReport {
            tag_id: "tag".into(),
            measurements: [
                AnchorMeasurement { distance: 10.0, rssi: -1.0 },
                AnchorMeasurement { distance: 20.0, rssi: -2.0 },
                AnchorMeasurement { distance: 30.0, rssi: -3.0 },
            ],
        };
        assert_eq!(report.distances(), [10.0, 20.0, 30.0]);
        assert_eq!(report.signal_strengths(), [-1.0, -2.0, -3.0]);
    }

    #[test]
    fn anchor_distance_is_euclidean() {
        let a = AnchorPosition::new(AnchorId::A1, 15.0, 5.0);
        assert!((a.distance_to(18.0, 9.0) - 5.0).abs() < 1e-12);
    }
}
