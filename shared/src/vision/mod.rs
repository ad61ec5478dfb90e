use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

pub mod decode;
pub mod model;
pub mod nms;
pub mod tensor;

pub use decode::decode;
pub use model::{Infer, ModelHandle, ModelLoader, PreloadedModel};
#[cfg(feature = "ml")]
pub use model::{OnnxFileLoader, OnnxModel};
pub use nms::{iou, suppress, Suppressed, SuppressionEngine};
pub use tensor::{encode, encode_bytes, PixelLayout, RawImage, Tensor};

// ============================================================================
// Constants
// ============================================================================

/// Square model input size the detector was trained on.
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Largest square input accepted from configuration.
pub const MAX_INPUT_SIZE: u32 = 4096;

/// COCO head of the YOLO export.
pub const DEFAULT_NUM_CLASSES: usize = 80;

/// Largest classification head accepted from configuration.
pub const MAX_NUM_CLASSES: usize = 1000;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Maximum candidates entering NMS to bound CPU time
pub const MAX_NMS_INPUTS: usize = 300;

pub const CAT_CLASS_ID: u32 = 16;
pub const DOG_CLASS_ID: u32 = 17;

/// Animal labels the app knows how to report.
pub const ANIMAL_LABELS: &[(u32, &str)] = &[
    (15, "bird"),
    (16, "cat"),
    (17, "dog"),
    (18, "horse"),
    (19, "sheep"),
    (20, "cow"),
    (21, "elephant"),
    (22, "bear"),
    (23, "zebra"),
    (24, "giraffe"),
];

#[must_use]
pub fn class_name(class_id: u32) -> Option<&'static str> {
    ANIMAL_LABELS
        .iter()
        .find(|(id, _)| *id == class_id)
        .map(|(_, name)| *name)
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(thiserror::Error, Debug)]
pub enum VisionError {
    #[error("invalid image: {reason}")]
    InvalidImage { reason: String },

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("invalid detection config: {0}")]
    InvalidConfig(String),

    #[error("processing error: {0}")]
    Processing(String),
}

impl VisionError {
    pub(crate) fn invalid_image(reason: impl Into<String>) -> Self {
        VisionError::InvalidImage {
            reason: reason.into(),
        }
    }

    /// Anything that goes wrong inside the model boundary surfaces as
    /// `ModelUnavailable` so callers can fall back to manual classification.
    pub(crate) fn into_unavailable(self) -> Self {
        match self {
            VisionError::ModelUnavailable(_) => self,
            other => VisionError::ModelUnavailable(other.to_string()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            VisionError::InvalidImage { .. } => "invalid_image",
            VisionError::ModelUnavailable(_) => "model_unavailable",
            VisionError::InvalidConfig(_) => "invalid_config",
            VisionError::Processing(_) => "processing",
        }
    }
}

impl From<image::ImageError> for VisionError {
    fn from(e: image::ImageError) -> Self {
        VisionError::invalid_image(format!("decode failed: {e}"))
    }
}

// Manual From impl to sanitize ORT errors
#[cfg(feature = "ml")]
impl From<ort::Error> for VisionError {
    fn from(e: ort::Error) -> Self {
        // Log full error internally, return sanitized version externally
        tracing::error!(error = %e, "ORT inference error");
        VisionError::ModelUnavailable("internal inference error".into())
    }
}

// ============================================================================
// Detection Result
// ============================================================================

/// Corner-form box in model input pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Converts a center-form box normalized to [0, 1] into pixel corner form.
    ///
    /// Returns `None` for non-finite values or negative extents.
    #[must_use]
    pub fn from_normalized_center(cx: f32, cy: f32, w: f32, h: f32, scale: f32) -> Option<Self> {
        if !cx.is_finite() || !cy.is_finite() || !w.is_finite() || !h.is_finite() {
            return None;
        }
        if w < 0.0 || h < 0.0 {
            return None;
        }
        Some(Self {
            x: (cx - w / 2.0) * scale,
            y: (cy - h / 2.0) * scale,
            width: w * scale,
            height: h * scale,
        })
    }

    #[must_use]
    pub fn x2(&self) -> f32 {
        self.x + self.width
    }

    #[must_use]
    pub fn y2(&self) -> f32 {
        self.y + self.height
    }

    #[must_use]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[must_use]
pub struct Detection {
    pub class_id: u32,
    pub class_name: String,
    /// Detection confidence score (0.0..=1.0)
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct DetectionResult {
    /// Surviving detections, highest confidence first.
    pub detections: Vec<Detection>,
    pub primary: Option<Detection>,
    pub class_flags: BTreeMap<u32, bool>,
    /// True if NMS input was truncated to `max_candidates`
    pub truncated: bool,
    pub candidates_before_nms: usize,
    pub preprocess_ms: f64,
    pub inference_ms: f64,
    pub postprocess_ms: f64,
}

impl DetectionResult {
    fn from_detections(detections: Vec<Detection>, target_classes: &BTreeSet<u32>) -> Self {
        let class_flags = target_classes
            .iter()
            .map(|&id| (id, detections.iter().any(|d| d.class_id == id)))
            .collect();
        let primary = detections.first().cloned();
        Self {
            detections,
            primary,
            class_flags,
            truncated: false,
            candidates_before_nms: 0,
            preprocess_ms: 0.0,
            inference_ms: 0.0,
            postprocess_ms: 0.0,
        }
    }

    #[must_use]
    pub fn is_detected(&self, class_id: u32) -> bool {
        self.class_flags.get(&class_id).copied().unwrap_or(false)
    }
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub input_size: u32,
    pub num_classes: usize,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub target_classes: BTreeSet<u32>,
    /// Restrict suppression to boxes of the same class.
    pub per_class_suppression: bool,
    pub max_candidates: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            num_classes: DEFAULT_NUM_CLASSES,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            target_classes: [CAT_CLASS_ID, DOG_CLASS_ID].into_iter().collect(),
            per_class_suppression: false,
            max_candidates: MAX_NMS_INPUTS,
        }
    }
}

impl DetectionConfig {
    /// # Errors
    ///
    /// Returns `InvalidConfig` for out-of-range thresholds, empty dimensions,
    /// or target classes the model or label set cannot produce.
    pub fn validate(&self) -> Result<(), VisionError> {
        if self.input_size == 0 || self.input_size > MAX_INPUT_SIZE {
            return Err(VisionError::InvalidConfig(format!(
                "input_size must be in 1..={MAX_INPUT_SIZE}, got {}",
                self.input_size
            )));
        }
        if self.num_classes == 0 || self.num_classes > MAX_NUM_CLASSES {
            return Err(VisionError::InvalidConfig(format!(
                "num_classes must be in 1..={MAX_NUM_CLASSES}, got {}",
                self.num_classes
            )));
        }
        if self.max_candidates == 0 {
            return Err(VisionError::InvalidConfig("max_candidates must be non-zero".into()));
        }
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("iou_threshold", self.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(VisionError::InvalidConfig(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if self.target_classes.is_empty() {
            return Err(VisionError::InvalidConfig("no target classes".into()));
        }
        for &class_id in &self.target_classes {
            if class_id as usize >= self.num_classes {
                return Err(VisionError::InvalidConfig(format!(
                    "target class {class_id} exceeds model class count {}",
                    self.num_classes
                )));
            }
            if class_name(class_id).is_none() {
                return Err(VisionError::InvalidConfig(format!(
                    "target class {class_id} has no known label"
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn record_len(&self) -> usize {
        self.num_classes.saturating_add(4)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Runs encode -> infer -> decode -> suppress against an already-loaded model.
///
/// # Errors
///
/// `InvalidImage` for empty or unreadable images, `ModelUnavailable` when the
/// model call fails.
#[instrument(skip(model, image, config), fields(width = image.width(), height = image.height()))]
pub fn run_detection(
    model: &dyn Infer,
    image: &DynamicImage,
    config: &DetectionConfig,
) -> Result<DetectionResult, VisionError> {
    let preprocess_start = Instant::now();
    let tensor = encode(image, config.input_size)?;
    let preprocess_ms = preprocess_start.elapsed().as_secs_f64() * 1000.0;

    let inference_start = Instant::now();
    let raw_output = model.infer(&tensor).map_err(VisionError::into_unavailable)?;
    let inference_ms = inference_start.elapsed().as_secs_f64() * 1000.0;

    let postprocess_start = Instant::now();
    let candidates = decode(
        &raw_output,
        config.num_classes,
        config.input_size,
        config.confidence_threshold,
        &config.target_classes,
    );
    let candidates_before_nms = candidates.len();
    let Suppressed { kept, truncated } =
        SuppressionEngine::from_config(config).suppress(candidates);
    let postprocess_ms = postprocess_start.elapsed().as_secs_f64() * 1000.0;

    debug!(
        detections = kept.len(),
        truncated,
        candidates_before_nms,
        preprocess_ms,
        inference_ms,
        postprocess_ms,
        "Detection completed"
    );

    Ok(DetectionResult {
        truncated,
        candidates_before_nms,
        preprocess_ms,
        inference_ms,
        postprocess_ms,
        ..DetectionResult::from_detections(kept, &config.target_classes)
    })
}

/// Detection pipeline bound to a lazily loaded model.
///
/// Holds no per-call state; clone the `Arc<ModelHandle>` to share one model
/// between several pipelines.
pub struct DetectionPipeline<L> {
    config: Arc<DetectionConfig>,
    model: Arc<ModelHandle<L>>,
}

impl<L: ModelLoader> DetectionPipeline<L> {
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn new(config: DetectionConfig, model: Arc<ModelHandle<L>>) -> Result<Self, VisionError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            model,
        })
    }

    #[must_use]
    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Detects target animals in `image`, loading the model on first use.
    ///
    /// No retries: a `ModelUnavailable` error is left for the caller to fall
    /// back on.
    ///
    /// # Errors
    ///
    /// `InvalidImage`, `ModelUnavailable`, or `Processing` if the blocking
    /// task is torn down.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub async fn detect(&self, image: DynamicImage) -> Result<DetectionResult, VisionError> {
        let start = Instant::now();
        counter!("vision.detect.requests").increment(1);

        let result = self.detect_inner(image).await;

        histogram!("vision.detect.duration_ms").record(start.elapsed().as_millis() as f64);

        if let Err(e) = &result {
            counter!("vision.detect.errors", "kind" => e.kind()).increment(1);
            warn!(error = %e, "detect failed");
        }

        result
    }

    async fn detect_inner(&self, image: DynamicImage) -> Result<DetectionResult, VisionError> {
        let model = self.model.ensure_loaded().await?;
        let config = Arc::clone(&self.config);

        tokio::task::spawn_blocking(move || run_detection(model.as_ref(), &image, &config))
            .await
            .map_err(|_| VisionError::Processing("detection task aborted".into()))?
    }
}

// ============================================================================
// Tests
// ============================================================================
