use geojson::{GeoJson, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::weather::{AlertClassification, AlertType, Severity};
use crate::EARTH_RADIUS_KM;

#[derive(Debug, Clone, Error)]
pub enum HazardZoneError {
    #[error("coordinate out of range: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("invalid zone radius for {name}: {radius_km}")]
    InvalidRadius { name: String, radius_km: f64 },

    #[error("invalid zone geojson: {0}")]
    GeoJson(String),
}

impl From<geojson::Error> for HazardZoneError {
    fn from(e: geojson::Error) -> Self {
        HazardZoneError::GeoJson(e.to_string())
    }
}

/// Circular area with known seismic risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HazardZone {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub radius_km: f64,
}

impl HazardZone {
    /// # Errors
    ///
    /// Rejects out-of-range centers and non-positive radii.
    pub fn new(
        name: impl Into<String>,
        lat: f64,
        lon: f64,
        radius_km: f64,
    ) -> Result<Self, HazardZoneError> {
        validate_coordinate(lat, lon)?;
        let name = name.into();
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(HazardZoneError::InvalidRadius { name, radius_km });
        }
        Ok(Self {
            name,
            lat,
            lon,
            radius_km,
        })
    }

    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        haversine_km(self.lat, self.lon, lat, lon) <= self.radius_km
    }
}

fn validate_coordinate(lat: f64, lon: f64) -> Result<(), HazardZoneError> {
    if !lat.is_finite()
        || !lon.is_finite()
        || !(-90.0..=90.0).contains(&lat)
        || !(-180.0..=180.0).contains(&lon)
    {
        return Err(HazardZoneError::InvalidCoordinate { lat, lon });
    }
    Ok(())
}

/// Great-circle distance in kilometers.
#[must_use]
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Sabah seismic zones the app ships with.
#[must_use]
pub fn default_seismic_zones() -> Vec<HazardZone> {
    vec![
        HazardZone {
            name: "Ranau".into(),
            lat: 5.9631,
            lon: 116.6661,
            radius_km: 50.0,
        },
        HazardZone {
            name: "Kundasang".into(),
            lat: 6.0167,
            lon: 116.5667,
            radius_km: 30.0,
        },
        HazardZone {
            name: "Kota Kinabalu".into(),
            lat: 5.9804,
            lon: 116.0735,
            radius_km: 40.0,
        },
    ]
}

/// Reads zones from a `FeatureCollection` of `Point` features carrying
/// `name` and `radius_km` properties.
///
/// # Errors
///
/// Fails on invalid GeoJSON, non-point geometry, or missing/invalid
/// properties.
pub fn zones_from_geojson(source: &str) -> Result<Vec<HazardZone>, HazardZoneError> {
    let GeoJson::FeatureCollection(collection) = source.parse::<GeoJson>()? else {
        return Err(HazardZoneError::GeoJson("expected a FeatureCollection".into()));
    };

    collection
        .features
        .iter()
        .map(|feature| {
            let name = feature
                .property("name")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| HazardZoneError::GeoJson("feature without name".into()))?;
            let radius_km = feature
                .property("radius_km")
                .and_then(serde_json::Value::as_f64)
                .ok_or_else(|| {
                    HazardZoneError::GeoJson(format!("{name}: missing radius_km"))
                })?;
            let Some(Value::Point(position)) = feature.geometry.as_ref().map(|g| &g.value) else {
                return Err(HazardZoneError::GeoJson(format!(
                    "{name}: geometry must be a Point"
                )));
            };
            // GeoJSON positions are [lon, lat]
            let (Some(&lon), Some(&lat)) = (position.first(), position.get(1)) else {
                return Err(HazardZoneError::GeoJson(format!(
                    "{name}: incomplete position"
                )));
            };
            HazardZone::new(name, lat, lon, radius_km)
        })
        .collect()
}

/// Earthquake-preparedness alert for the first zone containing the point.
///
/// # Errors
///
/// `InvalidCoordinate` for out-of-range input.
pub fn check_hazard_zones(
    lat: f64,
    lon: f64,
    zones: &[HazardZone],
) -> Result<Option<AlertClassification>, HazardZoneError> {
    validate_coordinate(lat, lon)?;

    let Some(zone) = zones.iter().find(|zone| zone.contains(lat, lon)) else {
        return Ok(None);
    };
    debug!(zone = %zone.name, "location inside seismic zone");

    Ok(Some(AlertClassification::new(
        AlertType::Earthquake,
        Severity::High,
        "Seismic Zone Advisory",
        format!(
            "Location is in {} seismic zone. Earthquake preparedness recommended.",
            zone.name
        ),
    )))
}
