//! Decision core of the irrigation edge device.
//!
//! Converts sensor readings plus remotely fetched thresholds into pump, fan
//! and light transitions, suppresses redundant writes, and emits one audit
//! event per executed transition. All I/O goes through the traits in
//! [`ports`]; this crate has no transport code.

pub mod actuators;
pub mod commands;
pub mod decision;
pub mod error;
pub mod feedback;
pub mod model;
pub mod plants;
pub mod ports;
pub mod telemetry;
pub mod thresholds;

#[cfg(test)]
mod testing;

pub use actuators::{ActuatorFlag, ActuatorState, TransitionOutcome};
pub use commands::CommandDispatcher;
pub use decision::{CycleReport, DecisionEngine, OperationMode, RuleOutcome, SkipReason};
pub use error::{CapacityError, DecodeError, DriveError, FetchError, PublishError};
pub use feedback::{FeedbackReporter, ReportStatus, ReporterStats};
pub use model::{ActuationEvent, ActuatorId, Command, SensorReading, ThresholdSet, Thresholds};
pub use plants::{PlantProfile, PlantSet, MAX_PLANTS};
pub use telemetry::{TelemetryPayload, TelemetryReporter, TelemetryStats, TelemetryStatus};
pub use thresholds::{RemotePlant, ThresholdPayload, ThresholdStore};
