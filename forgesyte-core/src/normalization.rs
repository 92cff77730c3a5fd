//! Canonical result normalization.
//!
//! Plugin outputs come in one of two accepted shapes; this module unifies
//! either into a single `{ frames: [...] }` document. Ported faithfully
//! from the original project's `schemas/normalisation.py`, including its
//! validation error messages.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::plugin::JsonMap;

#[derive(Debug, thiserror::Error)]
pub enum NormalizationError {
    #[error("normalization error: missing required field '{0}'")]
    MissingField(String),
    #[error("normalization error: field '{0}' must be a non-empty list")]
    EmptyList(String),
    #[error("normalization error: boxes/scores/labels length mismatch ({boxes} boxes, {scores} scores, {labels} labels)")]
    LengthMismatch {
        boxes: usize,
        scores: usize,
        labels: usize,
    },
    #[error("normalization error: box at index {index} must have exactly 4 coordinates")]
    WrongBoxArity { index: usize },
    #[error("normalization error: score {value} at index {index} is out of range [0,1]")]
    ScoreOutOfRange { index: usize, value: f64 },
    #[error("normalization error: field '{0}' has an unrecognized shape")]
    UnrecognizedShape(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub frame_index: u32,
    pub boxes: Vec<BoundingBox>,
    pub scores: Vec<f64>,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizedResult {
    pub frames: Vec<Frame>,
}

/// Normalize a plugin's raw output mapping into the canonical frames
/// document. Returns an error (never panics) on any shape violation; the
/// caller is expected to fall back to the raw mapping rather than fail
/// the job.
pub fn normalize(raw: &JsonMap) -> Result<NormalizedResult, NormalizationError> {
    if raw.contains_key("detections") {
        normalize_detections(raw)
    } else if raw.contains_key("boxes") || raw.contains_key("scores") || raw.contains_key("labels") {
        normalize_parallel_lists(raw)
    } else {
        Err(NormalizationError::UnrecognizedShape("detections|boxes".to_string()))
    }
}

fn normalize_detections(raw: &JsonMap) -> Result<NormalizedResult, NormalizationError> {
    let detections = raw
        .get("detections")
        .and_then(Value::as_array)
        .ok_or_else(|| NormalizationError::MissingField("detections".to_string()))?;
    if detections.is_empty() {
        return Err(NormalizationError::EmptyList("detections".to_string()));
    }

    let mut boxes = Vec::with_capacity(detections.len());
    let mut scores = Vec::with_capacity(detections.len());
    let mut labels = Vec::with_capacity(detections.len());

    for (index, detection) in detections.iter().enumerate() {
        let obj = detection
            .as_object()
            .ok_or_else(|| NormalizationError::UnrecognizedShape(format!("detections[{index}]")))?;

        let xyxy = obj
            .get("xyxy")
            .and_then(Value::as_array)
            .ok_or_else(|| NormalizationError::MissingField(format!("detections[{index}].xyxy")))?;
        boxes.push(parse_box(xyxy, index)?);

        let confidence = obj
            .get("confidence")
            .and_then(Value::as_f64)
            .ok_or_else(|| NormalizationError::MissingField(format!("detections[{index}].confidence")))?;
        scores.push(validate_score(confidence, index)?);

        let class_name = obj
            .get("class_name")
            .and_then(Value::as_str)
            .ok_or_else(|| NormalizationError::MissingField(format!("detections[{index}].class_name")))?;
        labels.push(class_name.to_string());
    }

    Ok(NormalizedResult {
        frames: vec![Frame {
            frame_index: 0,
            boxes,
            scores,
            labels,
        }],
    })
}

fn normalize_parallel_lists(raw: &JsonMap) -> Result<NormalizedResult, NormalizationError> {
    let raw_boxes = raw
        .get("boxes")
        .and_then(Value::as_array)
        .ok_or_else(|| NormalizationError::MissingField("boxes".to_string()))?;
    let raw_scores = raw
        .get("scores")
        .and_then(Value::as_array)
        .ok_or_else(|| NormalizationError::MissingField("scores".to_string()))?;
    let raw_labels = raw
        .get("labels")
        .and_then(Value::as_array)
        .ok_or_else(|| NormalizationError::MissingField("labels".to_string()))?;

    if raw_boxes.is_empty() {
        return Err(NormalizationError::EmptyList("boxes".to_string()));
    }
    if raw_boxes.len() != raw_scores.len() || raw_boxes.len() != raw_labels.len() {
        return Err(NormalizationError::LengthMismatch {
            boxes: raw_boxes.len(),
            scores: raw_scores.len(),
            labels: raw_labels.len(),
        });
    }

    let mut boxes = Vec::with_capacity(raw_boxes.len());
    for (index, entry) in raw_boxes.iter().enumerate() {
        let arr = entry
            .as_array()
            .ok_or_else(|| NormalizationError::WrongBoxArity { index })?;
        boxes.push(parse_box(arr, index)?);
    }

    let mut scores = Vec::with_capacity(raw_scores.len());
    for (index, entry) in raw_scores.iter().enumerate() {
        let value = entry
            .as_f64()
            .ok_or_else(|| NormalizationError::MissingField(format!("scores[{index}]")))?;
        scores.push(validate_score(value, index)?);
    }

    let mut labels = Vec::with_capacity(raw_labels.len());
    for (index, entry) in raw_labels.iter().enumerate() {
        let s = entry
            .as_str()
            .ok_or_else(|| NormalizationError::MissingField(format!("labels[{index}]")))?;
        labels.push(s.to_string());
    }

    Ok(NormalizedResult {
        frames: vec![Frame {
            frame_index: 0,
            boxes,
            scores,
            labels,
        }],
    })
}

fn parse_box(arr: &[Value], index: usize) -> Result<BoundingBox, NormalizationError> {
    if arr.len() != 4 {
        return Err(NormalizationError::WrongBoxArity { index });
    }
    let coords: Vec<f64> = arr
        .iter()
        .map(Value::as_f64)
        .collect::<Option<Vec<f64>>>()
        .ok_or(NormalizationError::WrongBoxArity { index })?;
    Ok(BoundingBox {
        x1: coords[0],
        y1: coords[1],
        x2: coords[2],
        y2: coords[3],
    })
}

fn validate_score(value: f64, index: usize) -> Result<f64, NormalizationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(NormalizationError::ScoreOutOfRange { index, value });
    }
    Ok(value)
}

/// Serialize a [`NormalizedResult`] back into a `JsonMap` for storage in a
/// job record alongside, or in place of, the raw plugin output.
pub fn to_json_map(result: &NormalizedResult) -> JsonMap {
    let value = serde_json::to_value(result).expect("NormalizedResult always serializes");
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> JsonMap {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn normalizes_detections_shape() {
        let raw = obj(json!({
            "detections": [
                {"xyxy": [1.0, 2.0, 3.0, 4.0], "confidence": 0.9, "class_name": "cat"}
            ]
        }));
        let result = normalize(&raw).unwrap();
        assert_eq!(result.frames.len(), 1);
        assert_eq!(result.frames[0].labels, vec!["cat"]);
        assert_eq!(result.frames[0].scores, vec![0.9]);
    }

    #[test]
    fn normalizes_parallel_lists_shape() {
        let raw = obj(json!({
            "boxes": [[0.0, 0.0, 1.0, 1.0]],
            "scores": [0.5],
            "labels": ["dog"]
        }));
        let result = normalize(&raw).unwrap();
        assert_eq!(result.frames[0].boxes[0].x2, 1.0);
    }

    #[test]
    fn rejects_empty_detections() {
        let raw = obj(json!({"detections": []}));
        assert!(matches!(normalize(&raw), Err(NormalizationError::EmptyList(_))));
    }

    #[test]
    fn rejects_length_mismatch() {
        let raw = obj(json!({"boxes": [[0.0,0.0,1.0,1.0]], "scores": [0.1, 0.2], "labels": ["a"]}));
        assert!(matches!(normalize(&raw), Err(NormalizationError::LengthMismatch { .. })));
    }

    #[test]
    fn rejects_score_out_of_range() {
        let raw = obj(json!({"boxes": [[0.0,0.0,1.0,1.0]], "scores": [1.5], "labels": ["a"]}));
        assert!(matches!(normalize(&raw), Err(NormalizationError::ScoreOutOfRange { .. })));
    }

    #[test]
    fn rejects_wrong_box_arity() {
        let raw = obj(json!({"boxes": [[0.0,0.0,1.0]], "scores": [0.5], "labels": ["a"]}));
        assert!(matches!(normalize(&raw), Err(NormalizationError::WrongBoxArity { .. })));
    }

    #[test]
    fn rejects_unrecognized_shape() {
        let raw = obj(json!({"foo": "bar"}));
        assert!(matches!(normalize(&raw), Err(NormalizationError::UnrecognizedShape(_))));
    }
}
