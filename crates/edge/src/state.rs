//! Ephemeral device status for the web endpoint. Written by the runtime and
//! the MQTT task after each step completes; never read by the control path.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use irrigation_engine::{
    ActuatorFlag, ActuatorId, OperationMode, ReporterStats, SensorReading, TelemetryStats,
    ThresholdSet,
};

use crate::mqtt::LinkState;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub zone_id: String,
    pub mode: OperationMode,
    pub link: LinkState,
    pub actuators: Vec<ActuatorFlag>,
    pub last_reading: Option<ReadingState>,
    pub thresholds: ThresholdState,
    pub feedback: ReporterStats,
    pub telemetry: TelemetryStats,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct ReadingState {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub reading: SensorReading,
}

#[derive(Clone, Serialize)]
pub struct ThresholdState {
    pub current: ThresholdSet,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_refreshed: Option<OffsetDateTime>,
    pub consecutive_failures: u32,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Actuation,
    Command,
    Thresholds,
    Link,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub zone_id: String,
    pub mode: OperationMode,
    pub mqtt: LinkState,
    pub actuators: Vec<ActuatorFlag>,
    pub last_reading: Option<ReadingState>,
    pub thresholds: ThresholdState,
    pub feedback: ReporterStats,
    pub telemetry: TelemetryStats,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(zone_id: &str, mode: OperationMode, defaults: ThresholdSet) -> Self {
        Self {
            started_at: Instant::now(),
            zone_id: zone_id.to_string(),
            mode,
            link: LinkState::Connecting,
            actuators: ActuatorId::ALL
                .iter()
                .map(|&actuator| ActuatorFlag { actuator, on: false })
                .collect(),
            last_reading: None,
            thresholds: ThresholdState {
                current: defaults,
                last_refreshed: None,
                consecutive_failures: 0,
            },
            feedback: ReporterStats::default(),
            telemetry: TelemetryStats::default(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn record_reading(&mut self, reading: SensorReading) {
        self.last_reading = Some(ReadingState {
            at: OffsetDateTime::now_utc(),
            reading,
        });
    }

    /// Record an executed transition.
    pub fn record_actuation(&mut self, detail: String) {
        self.push_event(EventKind::Actuation, detail);
    }

    pub fn record_command(&mut self, detail: String) {
        self.push_event(EventKind::Command, detail);
    }

    pub fn record_refresh(&mut self, current: ThresholdSet, at: Option<OffsetDateTime>) {
        self.thresholds.current = current;
        self.thresholds.last_refreshed = at;
        self.thresholds.consecutive_failures = 0;
        self.push_event(EventKind::Thresholds, "thresholds refreshed".to_string());
    }

    pub fn record_refresh_failure(&mut self, detail: String) {
        self.thresholds.consecutive_failures += 1;
        self.push_event(EventKind::Error, detail);
    }

    /// Record a link state change. Repeats of the same state are ignored.
    pub fn record_link(&mut self, link: LinkState, detail: String) {
        if self.link == link {
            return;
        }
        self.link = link;
        self.push_event(EventKind::Link, detail);
    }

    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            zone_id: self.zone_id.clone(),
            mode: self.mode,
            mqtt: self.link,
            actuators: self.actuators.clone(),
            last_reading: self.last_reading.clone(),
            thresholds: self.thresholds.clone(),
            feedback: self.feedback,
            telemetry: self.telemetry,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
