//! Weather threat classification for disaster mode.
//!
//! Condition codes follow the OpenWeatherMap taxonomy
//! (<https://openweathermap.org/weather-conditions>).

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const THUNDERSTORM_CODES: RangeInclusive<i32> = 200..=232;
const TORNADO_CODE: i32 = 781;
const DUST_CODES: RangeInclusive<i32> = 761..=762;
const HEAVY_RAIN_CODES: RangeInclusive<i32> = 502..=531;
const SNOW_CODES: RangeInclusive<i32> = 600..=622;
const BLIZZARD_CODES: RangeInclusive<i32> = 615..=622;

/// Wind that turns snow into a blizzard, m/s.
const BLIZZARD_WIND_MS: f64 = 15.0;
const HIGH_WIND_MS: f64 = 20.0;
const EXTREME_HEAT_C: f64 = 40.0;
const EXTREME_COLD_C: f64 = -10.0;

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("malformed weather payload: {0}")]
    Malformed(String),

    #[error("weather payload has no condition entry")]
    MissingCondition,
}

impl From<serde_json::Error> for WeatherError {
    fn from(e: serde_json::Error) -> Self {
        WeatherError::Malformed(e.to_string())
    }
}

/// Alert levels, ordered `None < Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Thunderstorm,
    Tornado,
    Dust,
    Flood,
    Snow,
    ExtremeHeat,
    ExtremeCold,
    HighWind,
    Earthquake,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub condition_code: i32,
    pub temperature_c: f64,
    pub wind_speed_ms: f64,
    pub humidity: f64,
}

#[derive(Deserialize)]
struct OwmResponse {
    weather: Vec<OwmCondition>,
    main: OwmMain,
    #[serde(default)]
    wind: Option<OwmWind>,
}

#[derive(Deserialize)]
struct OwmCondition {
    id: i32,
}

#[derive(Deserialize)]
struct OwmMain {
    temp: f64,
    humidity: f64,
}

#[derive(Deserialize)]
struct OwmWind {
    #[serde(default)]
    speed: f64,
}

impl WeatherObservation {
    /// Parses an OpenWeatherMap "current weather" response (metric units).
    ///
    /// # Errors
    ///
    /// `Malformed` for invalid JSON or missing fields, `MissingCondition`
    /// for an empty `weather` array.
    pub fn from_openweather_json(payload: &str) -> Result<Self, WeatherError> {
        let response: OwmResponse = serde_json::from_str(payload)?;
        let condition = response
            .weather
            .first()
            .ok_or(WeatherError::MissingCondition)?;

        Ok(Self {
            condition_code: condition.id,
            temperature_c: response.main.temp,
            wind_speed_ms: response.wind.map_or(0.0, |w| w.speed),
            humidity: response.main.humidity,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertClassification {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
}

impl AlertClassification {
    pub fn new(
        alert_type: AlertType,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            severity,
            title: title.into(),
            description: description.into(),
        }
    }

    #[must_use]
    pub fn none() -> Self {
        Self::new(
            AlertType::None,
            Severity::None,
            "Normal Conditions",
            "Weather conditions are normal. All systems monitoring.",
        )
    }

    #[must_use]
    pub fn is_worse_than(&self, other: &Self) -> bool {
        self.severity > other.severity
    }
}

impl Default for AlertClassification {
    fn default() -> Self {
        Self::none()
    }
}

/// One entry of the classifier's precedence list.
pub struct Rule {
    name: &'static str,
    applies: fn(&WeatherObservation) -> bool,
    build: fn(&WeatherObservation) -> AlertClassification,
}

impl Rule {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn evaluate(&self, observation: &WeatherObservation) -> Option<AlertClassification> {
        (self.applies)(observation).then(|| (self.build)(observation))
    }
}

fn is_blizzard(o: &WeatherObservation) -> bool {
    BLIZZARD_CODES.contains(&o.condition_code) || o.wind_speed_ms > BLIZZARD_WIND_MS
}

// Life safety first: storms and tornadoes must never be masked by a
// less urgent rule that also matches.
static RULES: [Rule; 8] = [
    Rule {
        name: "thunderstorm",
        applies: |o| THUNDERSTORM_CODES.contains(&o.condition_code),
        build: |_| {
            AlertClassification::new(
                AlertType::Thunderstorm,
                Severity::Critical,
                "Thunderstorm Warning",
                "Severe thunderstorm detected. Seek shelter immediately and secure outdoor animals.",
            )
        },
    },
    Rule {
        name: "tornado",
        applies: |o| o.condition_code == TORNADO_CODE,
        build: |_| {
            AlertClassification::new(
                AlertType::Tornado,
                Severity::Critical,
                "Tornado Alert",
                "Tornado warning in effect. Move to the lowest floor and protect all animals.",
            )
        },
    },
    Rule {
        name: "dust",
        applies: |o| DUST_CODES.contains(&o.condition_code),
        build: |_| {
            AlertClassification::new(
                AlertType::Dust,
                Severity::High,
                "Dust Storm Warning",
                "Dangerous dust storm conditions. Keep animals indoors with windows closed.",
            )
        },
    },
    Rule {
        name: "flood",
        applies: |o| HEAVY_RAIN_CODES.contains(&o.condition_code),
        build: |_| {
            AlertClassification::new(
                AlertType::Flood,
                Severity::High,
                "Flood Warning",
                "Heavy rainfall and potential flooding. Move animals to higher ground.",
            )
        },
    },
    Rule {
        name: "snow",
        applies: |o| SNOW_CODES.contains(&o.condition_code),
        build: |o| {
            if is_blizzard(o) {
                AlertClassification::new(
                    AlertType::Snow,
                    Severity::High,
                    "Blizzard Warning",
                    "Blizzard conditions detected. Bring all animals indoors immediately.",
                )
            } else {
                AlertClassification::new(
                    AlertType::Snow,
                    Severity::Medium,
                    "Snow Advisory",
                    "Snow conditions present. Ensure outdoor animals have warm shelter.",
                )
            }
        },
    },
    Rule {
        name: "extreme_heat",
        applies: |o| o.temperature_c > EXTREME_HEAT_C,
        build: |o| {
            AlertClassification::new(
                AlertType::ExtremeHeat,
                Severity::High,
                "Extreme Heat Warning",
                format!(
                    "Temperature at {}°C. Provide shade, water, and cool shelter for all animals.",
                    o.temperature_c
                ),
            )
        },
    },
    Rule {
        name: "extreme_cold",
        applies: |o| o.temperature_c < EXTREME_COLD_C,
        build: |o| {
            AlertClassification::new(
                AlertType::ExtremeCold,
                Severity::High,
                "Extreme Cold Warning",
                format!(
                    "Temperature at {}°C. Bring all animals indoors immediately.",
                    o.temperature_c
                ),
            )
        },
    },
    Rule {
        name: "high_wind",
        applies: |o| o.wind_speed_ms > HIGH_WIND_MS,
        build: |_| {
            AlertClassification::new(
                AlertType::HighWind,
                Severity::Medium,
                "High Wind Advisory",
                "Strong winds detected. Secure loose objects and provide shelter for animals.",
            )
        },
    },
];

/// Classifier rules in evaluation order.
#[must_use]
pub fn rules() -> &'static [Rule] {
    &RULES
}

/// First matching rule wins; falls back to `AlertClassification::none()`.
#[must_use]
pub fn classify(observation: &WeatherObservation) -> AlertClassification {
    RULES
        .iter()
        .find_map(|rule| rule.evaluate(observation))
        .unwrap_or_default()
}

/// Whether an alert should switch the app into disaster mode.
#[must_use]
pub fn is_actionable(classification: &AlertClassification) -> bool {
    classification.severity != Severity::None
}

/// Demo fixtures used when the shell runs with mocked weather.
#[must_use]
pub fn mock_observations() -> Vec<(&'static str, WeatherObservation)> {
    vec![
        (
            "THUNDERSTORM",
            WeatherObservation {
                condition_code: 202,
                temperature_c: 29.0,
                wind_speed_ms: 22.0,
                humidity: 92.0,
            },
        ),
        (
            "TORNADO",
            WeatherObservation {
                condition_code: 781,
                temperature_c: 28.0,
                wind_speed_ms: 40.0,
                humidity: 80.0,
            },
        ),
        (
            "HEATWAVE",
            WeatherObservation {
                condition_code: 800,
                temperature_c: 42.0,
                wind_speed_ms: 5.0,
                humidity: 40.0,
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn obs(condition_code: i32, temperature_c: f64, wind_speed_ms: f64) -> WeatherObservation {
        WeatherObservation {
            condition_code,
            temperature_c,
            wind_speed_ms,
            humidity: 50.0,
        }
    }

    fn kind(o: WeatherObservation) -> (AlertType, Severity) {
        let c = classify(&o);
        (c.alert_type, c.severity)
    }

    #[test]
    fn severity_is_totally_ordered() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::None);
    }

    #[test]
    fn each_rule_in_isolation() {
        assert_eq!(kind(obs(200, 20.0, 0.0)), (AlertType::Thunderstorm, Severity::Critical));
        assert_eq!(kind(obs(232, 20.0, 0.0)), (AlertType::Thunderstorm, Severity::Critical));
        assert_eq!(kind(obs(781, 20.0, 0.0)), (AlertType::Tornado, Severity::Critical));
        assert_eq!(kind(obs(761, 20.0, 0.0)), (AlertType::Dust, Severity::High));
        assert_eq!(kind(obs(762, 20.0, 0.0)), (AlertType::Dust, Severity::High));
        assert_eq!(kind(obs(502, 20.0, 0.0)), (AlertType::Flood, Severity::High));
        assert_eq!(kind(obs(531, 20.0, 0.0)), (AlertType::Flood, Severity::High));
        assert_eq!(kind(obs(600, -2.0, 3.0)), (AlertType::Snow, Severity::Medium));
        assert_eq!(kind(obs(615, -2.0, 3.0)), (AlertType::Snow, Severity::High));
        assert_eq!(kind(obs(601, -2.0, 16.0)), (AlertType::Snow, Severity::High));
        assert_eq!(kind(obs(800, 40.5, 0.0)), (AlertType::ExtremeHeat, Severity::High));
        assert_eq!(kind(obs(800, -10.5, 0.0)), (AlertType::ExtremeCold, Severity::High));
        assert_eq!(kind(obs(800, 20.0, 20.5)), (AlertType::HighWind, Severity::Medium));
        assert_eq!(kind(obs(800, 20.0, 0.0)), (AlertType::None, Severity::None));
    }

    #[test]
    fn boundaries_are_strict() {
        assert_eq!(kind(obs(800, 40.0, 20.0)).0, AlertType::None);
        assert_eq!(kind(obs(800, -10.0, 0.0)).0, AlertType::None);
        assert_eq!(kind(obs(601, 0.0, 15.0)).1, Severity::Medium);
        assert_eq!(kind(obs(501, 20.0, 0.0)).0, AlertType::None);
        assert_eq!(kind(obs(233, 20.0, 0.0)).0, AlertType::None);
    }

    #[test]
    fn storm_is_not_downgraded_by_calm_wind() {
        assert_eq!(kind(obs(211, 25.0, 0.0)), (AlertType::Thunderstorm, Severity::Critical));
    }

    #[test]
    fn earlier_rules_mask_later_ones() {
        // Flood beats heat and wind
        assert_eq!(kind(obs(502, 45.0, 30.0)).0, AlertType::Flood);
        // Heat beats wind
        assert_eq!(kind(obs(800, 45.0, 30.0)).0, AlertType::ExtremeHeat);
        // Snow stays snow even when bitterly cold
        assert_eq!(kind(obs(600, -20.0, 0.0)).0, AlertType::Snow);
    }

    #[test]
    fn rules_listed_in_precedence_order() {
        let names: Vec<_> = rules().iter().map(Rule::name).collect();
        assert_eq!(
            names,
            [
                "thunderstorm",
                "tornado",
                "dust",
                "flood",
                "snow",
                "extreme_heat",
                "extreme_cold",
                "high_wind"
            ]
        );
        let heat = &rules()[5];
        assert!(heat.evaluate(&obs(800, 20.0, 0.0)).is_none());
        assert!(heat.evaluate(&obs(202, 41.0, 0.0)).is_some());
    }

    #[test]
    fn heat_description_includes_temperature() {
        let c = classify(&obs(800, 42.0, 2.0));
        assert!(c.description.starts_with("Temperature at 42°C."));
    }

    #[test]
    fn temperature_is_not_rounded_in_description() {
        let heat = classify(&obs(800, 40.4, 0.0));
        assert_eq!(heat.alert_type, AlertType::ExtremeHeat);
        assert!(heat.description.starts_with("Temperature at 40.4°C."));

        let cold = classify(&obs(800, -10.5, 0.0));
        assert_eq!(cold.alert_type, AlertType::ExtremeCold);
        assert!(cold.description.starts_with("Temperature at -10.5°C."));
    }

    #[test]
    fn actionable_only_above_none() {
        assert!(!is_actionable(&AlertClassification::none()));
        assert!(is_actionable(&classify(&obs(781, 20.0, 0.0))));
        assert!(is_actionable(&classify(&obs(800, 20.0, 25.0))));
    }

    #[test]
    fn worse_than_compares_severity() {
        let tornado = classify(&obs(781, 20.0, 0.0));
        let wind = classify(&obs(800, 20.0, 25.0));
        assert!(tornado.is_worse_than(&wind));
        assert!(!wind.is_worse_than(&tornado));
        assert!(!tornado.is_worse_than(&tornado));
    }

    #[test]
    fn mock_fixtures_classify_as_expected() {
        let expected = [AlertType::Thunderstorm, AlertType::Tornado, AlertType::ExtremeHeat];
        for ((_, o), want) in mock_observations().into_iter().zip(expected) {
            assert_eq!(classify(&o).alert_type, want);
        }
    }

    #[test]
    fn parses_openweather_payload() {
        let payload = r#"{
            "weather": [{"id": 502, "main": "Rain", "description": "heavy intensity rain"}],
            "main": {"temp": 24.6, "humidity": 94},
            "wind": {"speed": 7.2, "deg": 210},
            "name": "Ipoh"
        }"#;
        let o = WeatherObservation::from_openweather_json(payload).unwrap();
        assert_eq!(o.condition_code, 502);
        assert!((o.temperature_c - 24.6).abs() < 1e-9);
        assert!((o.wind_speed_ms - 7.2).abs() < 1e-9);
        assert!((o.humidity - 94.0).abs() < 1e-9);
    }

    #[test]
    fn missing_wind_defaults_to_calm() {
        let payload = r#"{"weather": [{"id": 800}], "main": {"temp": 30, "humidity": 60}}"#;
        let o = WeatherObservation::from_openweather_json(payload).unwrap();
        assert!(o.wind_speed_ms.abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_bad_payloads() {
        assert!(matches!(
            WeatherObservation::from_openweather_json("not json"),
            Err(WeatherError::Malformed(_))
        ));
        let no_condition = r#"{"weather": [], "main": {"temp": 1, "humidity": 2}}"#;
        assert!(matches!(
            WeatherObservation::from_openweather_json(no_condition),
            Err(WeatherError::MissingCondition)
        ));
    }

    #[test]
    fn classification_serializes_like_the_app_expects() {
        let json = serde_json::to_value(classify(&obs(781, 20.0, 0.0))).unwrap();
        assert_eq!(json["type"], "tornado");
        assert_eq!(json["severity"], "CRITICAL");
    }

    proptest! {
        #[test]
        fn thunderstorm_always_critical(
            code in 200i32..=232,
            temp in -60.0f64..60.0,
            wind in 0.0f64..80.0,
        ) {
            let c = classify(&obs(code, temp, wind));
            prop_assert_eq!(c.alert_type, AlertType::Thunderstorm);
            prop_assert_eq!(c.severity, Severity::Critical);
        }

        #[test]
        fn classify_is_total(
            code in any::<i32>(),
            temp in any::<f64>(),
            wind in any::<f64>(),
        ) {
            let c = classify(&obs(code, temp, wind));
            prop_assert_eq!(is_actionable(&c), c.severity != Severity::None);
        }
    }
}
