//! In-memory port implementations shared by the unit tests.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::error::{DriveError, FetchError, PublishError};
use crate::model::{ActuationEvent, ActuatorId, ThresholdSet, Thresholds};
use crate::ports::{ActuatorDriver, FeedbackChannel, RemoteConfigProvider, TelemetrySink};
use crate::telemetry::TelemetryPayload;
use crate::thresholds::ThresholdPayload;

pub fn defaults() -> ThresholdSet {
    ThresholdSet {
        moisture: Thresholds::new(30.0, 80.0),
        temperature: Thresholds::new(10.0, 28.0),
        light: Thresholds::new(300.0, 2500.0),
        air_quality: Thresholds::new(0.0, 400.0),
    }
}

/// One plant-list entry with the given moisture band and temperature ceiling;
/// the other bands are fixed.
pub fn plant_json(plant_id: &str, moist_min: f32, moist_max: f32, temp_max: f32) -> String {
    format!(
        r#"{{"plantId":"{plant_id}","thresholds":{{"moisture":{{"min":{moist_min},"max":{moist_max}}},"temperature":{{"min":10,"max":{temp_max}}},"light":{{"min":200,"max":2000}},"airQuality":{{"min":0,"max":400}}}}}}"#
    )
}

/// A zone plant-list body from `plant_json` entries.
pub fn plants_json(entries: &[String]) -> String {
    format!(r#"{{"plants":[{}]}}"#, entries.join(","))
}

// ---------------------------------------------------------------------------
// Remote config
// ---------------------------------------------------------------------------

/// Answers keyed by zone id. Unknown zones fail with a transport error.
#[derive(Default)]
pub struct FakeRemote {
    bodies: HashMap<String, Result<String, FetchError>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, zone_id: &str, body: String) -> Self {
        self.bodies.insert(zone_id.to_string(), Ok(body));
        self
    }

    pub fn failing(mut self, zone_id: &str, err: FetchError) -> Self {
        self.bodies.insert(zone_id.to_string(), Err(err));
        self
    }
}

impl RemoteConfigProvider for FakeRemote {
    async fn fetch_thresholds(&self, zone_id: &str) -> Result<ThresholdPayload, FetchError> {
        match self.bodies.get(zone_id) {
            Some(Ok(body)) => ThresholdPayload::parse(body.as_bytes()),
            Some(Err(e)) => Err(e.clone()),
            None => Err(FetchError::Transport(format!("no route for zone {zone_id}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Records every successful write. Writes to `fail` always error.
#[derive(Default)]
pub struct FakeDriver {
    pub log: Vec<(ActuatorId, bool)>,
    fail: Option<ActuatorId>,
}

impl FakeDriver {
    pub fn failing(actuator: ActuatorId) -> Self {
        Self {
            log: Vec::new(),
            fail: Some(actuator),
        }
    }

    /// Writes issued after the startup reset.
    pub fn writes_after_reset(&self) -> &[(ActuatorId, bool)] {
        self.log.get(3..).unwrap_or(&[])
    }
}

impl ActuatorDriver for FakeDriver {
    fn drive(&mut self, actuator: ActuatorId, on: bool) -> Result<(), DriveError> {
        if self.fail == Some(actuator) {
            return Err(DriveError::Hardware {
                actuator,
                message: "relay stuck".into(),
            });
        }
        self.log.push((actuator, on));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outbound channels
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingFeedback {
    events: RefCell<Vec<ActuationEvent>>,
    fail: bool,
}

impl RecordingFeedback {
    pub fn failing() -> Self {
        Self {
            events: RefCell::default(),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<ActuationEvent> {
        self.events.borrow().clone()
    }
}

impl FeedbackChannel for RecordingFeedback {
    async fn publish(&self, event: &ActuationEvent) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::Transport("broker unreachable".into()));
        }
        self.events.borrow_mut().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    payloads: RefCell<Vec<TelemetryPayload>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            payloads: RefCell::default(),
            fail: true,
        }
    }

    pub fn payloads(&self) -> Vec<TelemetryPayload> {
        self.payloads.borrow().clone()
    }
}

impl TelemetrySink for RecordingSink {
    async fn publish(&self, payload: &TelemetryPayload) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::Rejected(500));
        }
        self.payloads.borrow_mut().push(payload.clone());
        Ok(())
    }
}
