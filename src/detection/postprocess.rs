//! Turning raw YOLO output into candidates in source image coordinates.

use crate::detection::preprocessing::Letterbox;
use crate::models::Candidate;

/// Thresholds applied while decoding model output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 300,
        }
    }
}

/// Decode a YOLOv8 head laid out as `[4 + classes, anchors]` (batch dim
/// already removed). Rows 0..4 are `cx, cy, w, h` in model input pixels.
pub fn decode_yolo(
    data: &[f32],
    rows: usize,
    anchors: usize,
    labels: &[String],
    letterbox: &Letterbox,
    params: &DecodeParams,
) -> Vec<Candidate> {
    if rows <= 4 || data.len() < rows * anchors {
        return Vec::new();
    }
    let classes = rows - 4;
    let at = |row: usize, anchor: usize| data[row * anchors + anchor];

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class_id, confidence) = (0..classes)
            .map(|c| (c, at(4 + c, anchor)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if !(confidence >= params.confidence_threshold) {
            continue;
        }

        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        let (x1, y1) = letterbox.to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_source(cx + w / 2.0, cy + h / 2.0);

        candidates.push(Candidate {
            class_id,
            label: labels
                .get(class_id)
                .cloned()
                .unwrap_or_else(|| format!("class_{class_id}")),
            confidence,
            x1,
            y1,
            x2,
            y2,
        });
    }

    non_max_suppression(candidates, params.iou_threshold, params.max_detections)
}

/// Greedy class-wise NMS. Output is ordered by descending confidence.
pub fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
