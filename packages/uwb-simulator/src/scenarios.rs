//! scenarios.rs — Injectable stream faults for exercising the tracker
//!
//! Each scenario mimics a failure the tracker must survive without losing its
//! last good state. Scenarios only change what goes on the wire; the tag's
//! motion is never affected.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uwb_types::{AnchorId, RangingEnvelope};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum ScenarioType {
    /// Every Nth record is corrupted (bad JSON, missing anchor, non-numeric value)
    MalformedRecords,
    /// Each line is written in several random-sized chunks
    ChunkSplitting,
    /// Raise the NLOS probability (people walking between tag and anchors)
    HighNlos,
    /// One anchor's entry is periodically missing from the record
    AnchorDropout,
}

/// How a corrupted record is broken, cycled in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// Cut mid-object
    TruncatedJson,
    /// `anchors.A3` removed
    MissingAnchor,
    /// `anchors.A2.rssi` replaced by a string
    NonNumeric,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub active: Vec<ScenarioType>,
    pub malformed_every: u64,
    pub dropout_anchor: AnchorId,
    pub dropout_every: u64,
    /// Upper bound on pieces per line under `chunk_splitting`
    pub max_chunks: usize,
    pub high_nlos_multiplier: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            active: vec![],
            malformed_every: 5,
            dropout_anchor: AnchorId::A3,
            dropout_every: 7,
            max_chunks: 4,
            high_nlos_multiplier: 6.0,
        }
    }
}

impl ScenarioConfig {
    pub fn has(&self, s: ScenarioType) -> bool {
        self.active.contains(&s)
    }

    pub fn enable(&mut self, s: ScenarioType) {
        if !self.has(s) {
            self.active.push(s);
        }
    }

    /// NLOS multiplier for HighNlos scenario
    pub fn nlos_multiplier(&self) -> f64 {
        if self.has(ScenarioType::HighNlos) { self.high_nlos_multiplier } else { 1.0 }
    }

    pub fn corruption_for(&self, epoch: u64) -> Option<Corruption> {
        if !self.has(ScenarioType::MalformedRecords) || self.malformed_every == 0 {
            return None;
        }
        if epoch % self.malformed_every != 0 {
            return None;
        }
        Some(match (epoch / self.malformed_every) % 3 {
            0 => Corruption::TruncatedJson,
            1 => Corruption::MissingAnchor,
            _ => Corruption::NonNumeric,
        })
    }

    pub fn dropped_anchor(&self, epoch: u64) -> Option<AnchorId> {
        if !self.has(ScenarioType::AnchorDropout) || self.dropout_every == 0 {
            return None;
        }
        (epoch % self.dropout_every == 0).then_some(self.dropout_anchor)
    }

    /// Wire line for `envelope` in epoch `epoch`, with any active fault applied.
    pub fn encode(&self, envelope: &RangingEnvelope, epoch: u64) -> serde_json::Result<String> {
        if let Some(kind) = self.corruption_for(epoch) {
            return corrupt_line(envelope, kind);
        }
        if let Some(anchor) = self.dropped_anchor(epoch) {
            return without_anchor(envelope, anchor);
        }
        envelope.to_line()
    }

    /// Piece lengths for writing a `len`-byte line; a single piece unless
    /// `chunk_splitting` is active.
    pub fn chunk_sizes(&self, len: usize, rng: &mut impl Rng) -> Vec<usize> {
        let pieces = if self.has(ScenarioType::ChunkSplitting) && len > 1 {
            rng.gen_range(2..=self.max_chunks.clamp(2, len))
        } else {
            1
        };

        // pieces - 1 distinct cut points inside the line
        let mut cuts: Vec<usize> = Vec::with_capacity(pieces + 1);
        while cuts.len() < pieces - 1 {
            let cut = rng.gen_range(1..len);
            if !cuts.contains(&cut) {
                cuts.push(cut);
            }
        }
        cuts.sort_unstable();
        cuts.push(len);

        let mut prev = 0;
        cuts.into_iter()
            .map(|cut| {
                let size = cut - prev;
                prev = cut;
                size
            })
            .collect()
    }
}

pub fn corrupt_line(envelope: &RangingEnvelope, kind: Corruption) -> serde_json::Result<String> {
    let mut line = match kind {
        Corruption::TruncatedJson => {
            let full = serde_json::to_string(envelope)?;
            let cut = (0..=full.len() / 2)
                .rev()
                .find(|&i| full.is_char_boundary(i))
                .unwrap_or(0);
            full[..cut].to_string()
        }
        Corruption::MissingAnchor => return without_anchor(envelope, AnchorId::A3),
        Corruption::NonNumeric => {
            let mut v = serde_json::to_value(envelope)?;
            v["anchors"]["A2"]["rssi"] = Value::from("strong");
            serde_json::to_string(&v)?
        }
    };
    line.push('\n');
    Ok(line)
}

fn without_anchor(envelope: &RangingEnvelope, anchor: AnchorId) -> serde_json::Result<String> {
    let mut v = serde_json::to_value(envelope)?;
    if let Some(anchors) = v.get_mut("anchors").and_then(Value::as_object_mut) {
        anchors.remove(anchor.key());
    }
    let mut line = serde_json::to_string(&v)?;
    line.push('\n');
    Ok(line)
}

/// Named preset bundles for the command line
pub fn preset(name: &str) -> Option<ScenarioConfig> {
    let active = match name {
        "default" => vec![],
        "flaky_link" => vec![ScenarioType::ChunkSplitting, ScenarioType::MalformedRecords],
        "crowded_room" => vec![ScenarioType::HighNlos],
        "anchor_fault" => vec![ScenarioType::AnchorDropout],
        _ => return None,
    };
    Some(ScenarioConfig { active, ..Default::default() })
}
