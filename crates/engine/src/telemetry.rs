//! Periodic per-plant sensor snapshots for the remote API.
//!
//! Independent of actuation: a telemetry failure never affects decisions.
//! This is the only place unavailable readings become `0`, because the
//! receiving API expects every sensor field to be a number.

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::actuators::ActuatorFlag;
use crate::model::{iso8601, ActuatorId, SensorReading};
use crate::ports::TelemetrySink;
use crate::thresholds::ThresholdStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    pub sensor_record_id: String,
    pub last_updated: String,
    pub plant_id: String,
    pub sensors: SensorValues,
    pub automation: Automation,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorValues {
    pub humidity: f32,
    pub light: f32,
    pub soil_moisture: f32,
    pub temp: f32,
    pub air_quality: f32,
}

/// Current output flags, so the dashboard can show what the device is doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Automation {
    pub fan_on: bool,
    pub light_on: bool,
    pub water_on: bool,
}

impl Automation {
    pub fn from_flags(flags: &[ActuatorFlag]) -> Self {
        let on = |id: ActuatorId| flags.iter().any(|f| f.actuator == id && f.on);
        Self {
            fan_on: on(ActuatorId::Fan),
            light_on: on(ActuatorId::Light),
            water_on: on(ActuatorId::Pump),
        }
    }
}

impl TelemetryPayload {
    pub fn new(
        reading: &SensorReading,
        slot: usize,
        plant_id: &str,
        automation: Automation,
        user_id: &str,
        at: OffsetDateTime,
    ) -> Self {
        let timestamp = iso8601(at);
        let zero = |v: Option<f32>| v.unwrap_or(0.0);
        Self {
            sensor_record_id: format!("{plant_id}@{timestamp}"),
            last_updated: timestamp,
            plant_id: plant_id.to_string(),
            sensors: SensorValues {
                humidity: zero(reading.humidity_percent),
                light: zero(reading.light_level),
                soil_moisture: zero(reading.moisture(slot)),
                temp: zero(reading.temperature_c),
                air_quality: zero(reading.air_quality_ppm),
            },
            automation,
            user_id: user_id.to_string(),
        }
    }
}

/// Result of one reporting round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryStatus {
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetryStats {
    pub published: u64,
    pub failed: u64,
}

pub struct TelemetryReporter {
    user_id: String,
    stats: TelemetryStats,
}

impl TelemetryReporter {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            stats: TelemetryStats::default(),
        }
    }

    /// Publish one payload per plant. A failure for one plant does not stop
    /// the rest.
    pub async fn report<S: TelemetrySink>(
        &mut self,
        reading: &SensorReading,
        store: &ThresholdStore,
        flags: &[ActuatorFlag],
        sink: &S,
    ) -> TelemetryStatus {
        let automation = Automation::from_flags(flags);
        let now = OffsetDateTime::now_utc();
        let mut status = TelemetryStatus::default();

        for (slot, plant) in store.plants().iter() {
            let payload =
                TelemetryPayload::new(reading, slot, &plant.plant_id, automation, &self.user_id, now);
            match sink.publish(&payload).await {
                Ok(()) => {
                    self.stats.published += 1;
                    status.sent += 1;
                    debug!(plant = %plant.plant_id, "telemetry sent");
                }
                Err(e) => {
                    self.stats.failed += 1;
                    status.failed += 1;
                    warn!(plant = %plant.plant_id, error = %e, "failed to send telemetry");
                }
            }
        }
        status
    }

    pub fn stats(&self) -> TelemetryStats {
        self.stats
    }
}

// ===========================================================================
// Tests
// ===========================================================================
