// lib.rs - PawGuard shared core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

pub mod hazard_zone;
pub mod similarity;
pub mod vision;
pub mod weather;

pub use hazard_zone::{check_hazard_zones, default_seismic_zones, HazardZone, HazardZoneError};
pub use similarity::{
    cosine_similarity, is_match, rank_matches, RankedMatch, SimilarityError, EMBEDDING_DIMENSIONS,
};
pub use vision::{
    BoundingBox, Detection, DetectionConfig, DetectionPipeline, DetectionResult, Infer,
    ModelHandle, ModelLoader, Tensor, VisionError,
};
pub use weather::{
    classify, is_actionable, AlertClassification, AlertType, Severity, WeatherError,
    WeatherObservation,
};

pub const EARTH_RADIUS_KM: f64 = 6_371.0;
