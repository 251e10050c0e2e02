//! Core value types shared by every component.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::plants::MAX_PLANTS;

/// Timestamp used when the clock cannot be formatted.
pub const EPOCH_ISO8601: &str = "1970-01-01T00:00:00Z";

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorId {
    Pump,
    Fan,
    Light,
}

impl ActuatorId {
    pub const ALL: [ActuatorId; 3] = [ActuatorId::Pump, ActuatorId::Fan, ActuatorId::Light];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pump => "pump",
            Self::Fan => "fan",
            Self::Light => "light",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Pump => 0,
            Self::Fan => 1,
            Self::Light => 2,
        }
    }
}

impl fmt::Display for ActuatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render an on/off flag the way it travels on the wire.
pub fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Monitored quantities that carry thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Quantity {
    Moisture,
    Temperature,
    Light,
    AirQuality,
}

/// Inclusive operating band for one quantity, in its native unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min: f32,
    pub max: f32,
}

impl Thresholds {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Both bounds finite and ordered.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

/// One band per monitored quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSet {
    pub moisture: Thresholds,
    pub temperature: Thresholds,
    pub light: Thresholds,
    #[serde(alias = "air_quality")]
    pub air_quality: Thresholds,
}

impl ThresholdSet {
    pub fn get(&self, quantity: Quantity) -> Thresholds {
        match quantity {
            Quantity::Moisture => self.moisture,
            Quantity::Temperature => self.temperature,
            Quantity::Light => self.light,
            Quantity::AirQuality => self.air_quality,
        }
    }

    /// Name of the first invalid band, if any.
    pub fn first_invalid(&self) -> Option<&'static str> {
        [
            ("moisture", self.moisture),
            ("temperature", self.temperature),
            ("light", self.light),
            ("airQuality", self.air_quality),
        ]
        .into_iter()
        .find(|(_, t)| !t.is_valid())
        .map(|(name, _)| name)
    }
}

// ---------------------------------------------------------------------------
// Sensor snapshot
// ---------------------------------------------------------------------------

/// One sampling of every sensor. `None` means the sensor did not deliver a
/// usable value this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    /// Soil moisture in percent, indexed by plant slot.
    pub moisture_percent: [Option<f32>; MAX_PLANTS],
    pub temperature_c: Option<f32>,
    pub humidity_percent: Option<f32>,
    pub light_level: Option<f32>,
    pub air_quality_ppm: Option<f32>,
}

impl SensorReading {
    /// Build a reading from raw driver values, treating NaN and infinities
    /// as unavailable.
    pub fn from_raw(
        moisture_percent: [f32; MAX_PLANTS],
        temperature_c: f32,
        humidity_percent: f32,
        light_level: f32,
        air_quality_ppm: f32,
    ) -> Self {
        Self {
            moisture_percent: moisture_percent.map(available),
            temperature_c: available(temperature_c),
            humidity_percent: available(humidity_percent),
            light_level: available(light_level),
            air_quality_ppm: available(air_quality_ppm),
        }
    }

    pub fn moisture(&self, slot: usize) -> Option<f32> {
        self.moisture_percent.get(slot).copied().flatten()
    }
}

/// `Some(v)` for finite values, `None` otherwise.
pub fn available(v: f32) -> Option<f32> {
    v.is_finite().then_some(v)
}

// ---------------------------------------------------------------------------
// Actuation events
// ---------------------------------------------------------------------------

/// Who asked for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trigger {
    System,
    User,
}

impl Trigger {
    pub fn source(self) -> Source {
        match self {
            Self::System => Source::Auto,
            Self::User => Source::Manual,
        }
    }
}

/// Which decision path produced a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Auto,
    Manual,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Fail,
}

/// Audit record for one executed (or attempted) transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuationEvent {
    pub actuator: ActuatorId,
    pub new_state: bool,
    pub trigger: Trigger,
    pub source: Source,
    pub zone: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub outcome: Outcome,
}

impl ActuationEvent {
    pub fn new(
        actuator: ActuatorId,
        new_state: bool,
        trigger: Trigger,
        zone: &str,
        outcome: Outcome,
    ) -> Self {
        Self {
            actuator,
            new_state,
            trigger,
            source: trigger.source(),
            zone: zone.to_string(),
            timestamp: OffsetDateTime::now_utc(),
            outcome,
        }
    }

    /// Human-readable action, e.g. `"pump ON"`.
    pub fn action(&self) -> String {
        format!("{} {}", self.actuator, on_off(self.new_state))
    }
}

/// A request to put one actuator into a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub actuator: ActuatorId,
    pub desired: bool,
}

/// Format a timestamp as RFC 3339, falling back to the epoch.
pub fn iso8601(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339)
        .unwrap_or_else(|_| EPOCH_ISO8601.to_string())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn actuator_display_is_lowercase() {
        assert_eq!(ActuatorId::Pump.to_string(), "pump");
        assert_eq!(ActuatorId::Fan.to_string(), "fan");
        assert_eq!(ActuatorId::Light.to_string(), "light");
    }

    #[test]
    fn thresholds_validity() {
        assert!(Thresholds::new(30.0, 90.0).is_valid());
        assert!(Thresholds::new(50.0, 50.0).is_valid());
        assert!(!Thresholds::new(90.0, 30.0).is_valid());
        assert!(!Thresholds::new(f32::NAN, 30.0).is_valid());
    }

    #[test]
    fn reading_from_raw_marks_nan_unavailable() {
        let r = SensorReading::from_raw([20.0, f32::NAN, 0.0, 0.0], f32::NAN, 55.0, 300.0, 12.0);
        assert_eq!(r.moisture(0), Some(20.0));
        assert_eq!(r.moisture(1), None);
        assert_eq!(r.temperature_c, None);
        assert_eq!(r.humidity_percent, Some(55.0));
    }

    #[test]
    fn moisture_out_of_range_slot_is_unavailable() {
        let r = SensorReading::default();
        assert_eq!(r.moisture(MAX_PLANTS + 3), None);
    }

    #[test]
    fn trigger_determines_source() {
        assert_eq!(Trigger::System.source(), Source::Auto);
        assert_eq!(Trigger::User.source(), Source::Manual);
    }

    #[test]
    fn event_action_string() {
        let e = ActuationEvent::new(ActuatorId::Fan, true, Trigger::User, "zone1", Outcome::Success);
        assert_eq!(e.action(), "fan ON");
        assert_eq!(e.source, Source::Manual);
    }

    #[test]
    fn iso8601_formats_utc() {
        assert_eq!(iso8601(datetime!(2024-05-01 08:30:00 UTC)), "2024-05-01T08:30:00Z");
    }
}
