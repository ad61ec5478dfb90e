use std::collections::BTreeSet;

use tracing::trace;

use super::{class_name, BoundingBox, Detection};

/// Parses a flat record-major model output into candidate detections.
///
/// Each record is `4 + num_classes` floats: a center-form box normalized to
/// `[0, 1]` followed by independent per-class scores. A record yields at most
/// one detection, for its best-scoring class, and only if that score is at
/// least `confidence_threshold` and the class is a target. A trailing partial
/// record is ignored. Output keeps record order.
#[must_use]
pub fn decode(
    raw_output: &[f32],
    num_classes: usize,
    input_size: u32,
    confidence_threshold: f32,
    target_classes: &BTreeSet<u32>,
) -> Vec<Detection> {
    let Some(record_len) = num_classes.checked_add(4).filter(|_| num_classes > 0) else {
        return Vec::new();
    };
    let scale = input_size as f32;
    let mut detections = Vec::new();

    for record in raw_output.chunks_exact(record_len) {
        let Some((class_idx, score)) = best_class(&record[4..]) else {
            continue;
        };

        if score < confidence_threshold {
            continue;
        }

        let Ok(class_id) = u32::try_from(class_idx) else {
            continue;
        };
        if !target_classes.contains(&class_id) {
            continue;
        }
        let Some(name) = class_name(class_id) else {
            continue;
        };

        let Some(bbox) =
            BoundingBox::from_normalized_center(record[0], record[1], record[2], record[3], scale)
        else {
            trace!(class_id, score, "dropping record with invalid box");
            continue;
        };

        detections.push(Detection {
            class_id,
            class_name: name.to_owned(),
            confidence: score.min(1.0),
            bbox,
        });
    }

    detections
}

/// Index and score of the best class, strictly above zero. NaN never
/// compares greater and ties keep the first index.
fn best_class(scores: &[f32]) -> Option<(usize, f32)> {
    scores
        .iter()
        .enumerate()
        .fold(None, |best, (idx, &score)| match best {
            Some((_, best_score)) if score <= best_score || score.is_nan() => best,
            _ if score > 0.0 => Some((idx, score)),
            _ => best,
        })
}
