//! Capabilities the engine consumes. Adapters in the device binary implement
//! these; tests implement them with in-memory fakes.
//!
//! ```text
//!  SensorSource ─────────────▶ ┌──────────────┐ ──▶ FeedbackChannel
//!  RemoteConfigProvider ─────▶ │    engine    │ ──▶ TelemetrySink
//!  CommandChannel ───────────▶ └──────────────┘ ──▶ ActuatorDriver
//! ```
//!
//! Network-facing ports are async; the engine awaits them from a single
//! task, so implementations need not be `Sync`.

#![allow(async_fn_in_trait)]

use crate::actuators::ActuatorFlag;
use crate::error::{DriveError, FetchError, PublishError};
use crate::model::{ActuationEvent, ActuatorId, SensorReading};
use crate::plants::PlantSet;
use crate::telemetry::TelemetryPayload;
use crate::thresholds::ThresholdPayload;

/// Produces one sensor snapshot on demand.
pub trait SensorSource {
    fn read(&mut self, plants: &PlantSet) -> SensorReading;

    /// Told about output levels after each cycle. Closed-loop sources (a
    /// simulator) use it; hardware probes ignore it.
    fn observe(&mut self, _outputs: &[ActuatorFlag]) {}
}

/// Source of a zone's plant roster with per-plant threshold bands.
pub trait RemoteConfigProvider {
    /// One call answers for the whole zone.
    async fn fetch_thresholds(&self, zone_id: &str) -> Result<ThresholdPayload, FetchError>;
}

/// An undecoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Non-blocking source of inbound command messages.
pub trait CommandChannel {
    fn next_message(&mut self) -> Option<RawMessage>;
}

pub trait FeedbackChannel {
    async fn publish(&self, event: &ActuationEvent) -> Result<(), PublishError>;
}

pub trait TelemetrySink {
    async fn publish(&self, payload: &TelemetryPayload) -> Result<(), PublishError>;
}

/// Writes a physical output level.
///
/// An `Err` means the level was not changed.
pub trait ActuatorDriver {
    fn drive(&mut self, actuator: ActuatorId, on: bool) -> Result<(), DriveError>;
}

impl CommandChannel for std::collections::VecDeque<RawMessage> {
    fn next_message(&mut self) -> Option<RawMessage> {
        self.pop_front()
    }
}
