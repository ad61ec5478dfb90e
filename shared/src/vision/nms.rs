// ============================================================================
// NMS Implementation
// ============================================================================

use tracing::warn;

use super::{BoundingBox, Detection, DetectionConfig, MAX_NMS_INPUTS};

/// Intersection over union of two corner-form boxes.
///
/// Zero when the union has no area, so degenerate boxes never count as
/// overlapping.
#[must_use]
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = (a.x2().min(b.x2()) - a.x.max(b.x)).max(0.0);
    let inter_h = (a.y2().min(b.y2()) - a.y.max(b.y)).max(0.0);
    let inter_area = inter_w * inter_h;

    let union = a.area() + b.area() - inter_area;
    if union > 0.0 {
        inter_area / union
    } else {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Suppressed {
    /// Accepted detections in acceptance (confidence-descending) order.
    pub kept: Vec<Detection>,
    /// True if lower-confidence candidates were cut before suppression.
    pub truncated: bool,
}

/// Greedy non-maximum suppression.
///
/// Class-agnostic unless `per_class` is set: a dog box can suppress an
/// overlapping cat box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuppressionEngine {
    iou_threshold: f32,
    per_class: bool,
    max_candidates: usize,
}

impl SuppressionEngine {
    #[must_use]
    pub fn new(iou_threshold: f32) -> Self {
        Self {
            iou_threshold,
            per_class: false,
            max_candidates: MAX_NMS_INPUTS,
        }
    }

    #[must_use]
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(config.iou_threshold)
            .per_class(config.per_class_suppression)
            .max_candidates(config.max_candidates)
    }

    #[must_use]
    pub fn per_class(mut self, per_class: bool) -> Self {
        self.per_class = per_class;
        self
    }

    #[must_use]
    pub fn max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }

    /// Keeps a candidate only if its IoU with every accepted box of the same
    /// scope is at most the threshold.
    ///
    /// Candidates are ordered by confidence, descending; the sort is stable
    /// so exact ties keep their input order.
    #[must_use]
    pub fn suppress(&self, mut detections: Vec<Detection>) -> Suppressed {
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let truncated = detections.len() > self.max_candidates;
        if truncated {
            warn!(
                original = detections.len(),
                limit = self.max_candidates,
                "NMS input truncated"
            );
            detections.truncate(self.max_candidates);
        }

        let mut kept: Vec<Detection> = Vec::with_capacity(detections.len().min(100));
        for candidate in detections {
            let overlaps = kept
                .iter()
                .filter(|k| !self.per_class || k.class_id == candidate.class_id)
                .any(|k| iou(&k.bbox, &candidate.bbox) > self.iou_threshold);
            if !overlaps {
                kept.push(candidate);
            }
        }

        Suppressed { kept, truncated }
    }
}

/// Class-agnostic suppression over every candidate, with no input cap.
#[must_use]
pub fn suppress(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    SuppressionEngine::new(iou_threshold)
        .max_candidates(usize::MAX)
        .suppress(detections)
        .kept
}
