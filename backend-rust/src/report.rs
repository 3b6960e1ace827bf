//! # report
//!
//! Decodes one framed record into a [`RangingReport`].
//!
//! Decoding never unwinds: every malformed record maps to a [`RejectReason`],
//! the ingest loop logs it and moves on to the next line. The JSON is walked as a
//! `serde_json::Value` rather than deserialized straight into the wire envelope so
//! that the reason names the exact field that was missing or non-numeric.

use serde_json::{Map, Value};
use thiserror::Error;
use uwb_types::{AnchorId, AnchorMeasurement, RangingReport};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("record is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed JSON: {0}")]
    InvalidJson(String),
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("field `{0}` is not an object")]
    NonObject(String),
    #[error("missing field `{0}`")]
    MissingField(String),
    #[error("field `{0}` is not numeric")]
    NonNumeric(String),
    #[error("field `{0}` is not finite")]
    NonFinite(String),
    #[error("distance for {anchor} is negative ({value})")]
    NegativeDistance { anchor: AnchorId, value: f64 },
    #[error("`tag_id` must be a string or number")]
    InvalidTagId,
}

/// Decode one trimmed, non-empty record.
pub fn decode_report(record: &[u8]) -> Result<RangingReport, RejectReason> {
    let text = std::str::from_utf8(record).map_err(|_| RejectReason::InvalidUtf8)?;
    let value: Value =
        serde_json::from_str(text).map_err(|e| RejectReason::InvalidJson(e.to_string()))?;
    let root = value.as_object().ok_or(RejectReason::NotAnObject)?;

    let tag_id = match root.get("tag_id") {
        None => return Err(RejectReason::MissingField("tag_id".into())),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => return Err(RejectReason::InvalidTagId),
    };

    let anchors = root
        .get("anchors")
        .ok_or_else(|| RejectReason::MissingField("anchors".into()))?
        .as_object()
        .ok_or_else(|| RejectReason::NonObject("anchors".into()))?;

    let mut measurements = [AnchorMeasurement { distance: 0.0, rssi: 0.0 }; 3];
    for anchor in AnchorId::ALL {
        measurements[anchor.index()] = decode_anchor(anchors, anchor)?;
    }

    Ok(RangingReport { tag_id, measurements })
}

fn decode_anchor(anchors: &Map<String, Value>, anchor: AnchorId) -> Result<AnchorMeasurement, RejectReason> {
    let key = anchor.key();
    let entry = anchors
        .get(key)
        .ok_or_else(|| RejectReason::MissingField(format!("anchors.{key}")))?;
    if !entry.is_object() {
        return Err(RejectReason::NonObject(format!("anchors.{key}")));
    }

    let distance = numeric_field(entry, key, "distance")?;
    let rssi = numeric_field(entry, key, "rssi")?;

    if distance < 0.0 {
        return Err(RejectReason::NegativeDistance { anchor, value: distance });
    }

    Ok(AnchorMeasurement { distance, rssi })
}

/// Numbers and numeric strings coerce to `f64`; anything else is rejected.
fn numeric_field(entry: &Value, anchor_key: &str, field: &str) -> Result<f64, RejectReason> {
    let path = || format!("anchors.{anchor_key}.{field}");
    let raw = entry.get(field).ok_or_else(|| RejectReason::MissingField(path()))?;

    let value = match raw {
        Value::Number(n) => n.as_f64().ok_or_else(|| RejectReason::NonNumeric(path()))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| RejectReason::NonNumeric(path()))?,
        _ => return Err(RejectReason::NonNumeric(path())),
    };

    if !value.is_finite() {
        return Err(RejectReason::NonFinite(path()));
    }
    Ok(value)
}
