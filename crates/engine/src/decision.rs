//! Threshold-driven actuation: turns a sensor snapshot plus the stored bands
//! into actuator transitions, and applies explicit commands.
//!
//! ## Autonomous rules
//!
//! ```text
//! fan   ON  iff  temperature > zone.temperature.max
//! light ON  iff  light_level < zone.light.min
//! pump  ON  iff  no plant above its moisture max
//!                AND at least one plant below its moisture min
//! ```
//!
//! Each rule is evaluated on its own. A rule whose input is unavailable is
//! skipped for the cycle and its actuator is left where it is. In
//! [`OperationMode::Monitor`] the rules are evaluated and logged but never
//! actuate; commands still apply.
//!
//! Every transition that reaches the driver (applied or failed) produces
//! exactly one [`ActuationEvent`]. No-ops produce nothing.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::actuators::{ActuatorState, TransitionOutcome};
use crate::commands::CommandDispatcher;
use crate::error::DecodeError;
use crate::feedback::FeedbackReporter;
use crate::model::{
    on_off, ActuationEvent, ActuatorId, Command, Outcome, Quantity, SensorReading, Thresholds,
    Trigger,
};
use crate::plants::MAX_PLANTS;
use crate::ports::{ActuatorDriver, CommandChannel, FeedbackChannel, RawMessage};
use crate::thresholds::ThresholdStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Rules actuate.
    #[default]
    Auto,
    /// Rules are evaluated and logged only.
    Monitor,
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Why a rule did not run this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    TemperatureUnavailable,
    LightUnavailable,
    MoistureUnavailable { slot: usize },
}

/// Pump decision over `(moisture, band)` samples, one per plant.
///
/// Never waters when any plant is above its max, and only waters when at
/// least one plant is below its min. An empty set never waters.
pub fn should_water(samples: &[(f32, Thresholds)]) -> bool {
    let none_saturated = samples.iter().all(|(m, t)| *m <= t.max);
    let any_dry = samples.iter().any(|(m, t)| *m < t.min);
    none_saturated && any_dry
}

pub fn fan_rule(temperature_c: f32, band: Thresholds) -> bool {
    temperature_c > band.max
}

pub fn light_rule(light_level: f32, band: Thresholds) -> bool {
    light_level < band.min
}

fn pump_desired(reading: &SensorReading, store: &ThresholdStore) -> Result<bool, SkipReason> {
    let mut samples: heapless::Vec<(f32, Thresholds), MAX_PLANTS> = heapless::Vec::new();
    for (slot, _) in store.plants().iter() {
        let moisture = reading
            .moisture(slot)
            .ok_or(SkipReason::MoistureUnavailable { slot })?;
        // One sample per roster slot; the roster has the same capacity.
        let _ = samples.push((moisture, store.plant_moisture(slot)));
    }
    Ok(should_water(&samples))
}

/// Desired state per actuator for one reading, in [`ActuatorId::ALL`] order.
pub fn evaluate(
    reading: &SensorReading,
    store: &ThresholdStore,
) -> [(ActuatorId, Result<bool, SkipReason>); 3] {
    let fan = reading
        .temperature_c
        .map(|t| fan_rule(t, store.get(Quantity::Temperature)))
        .ok_or(SkipReason::TemperatureUnavailable);
    let light = reading
        .light_level
        .map(|l| light_rule(l, store.get(Quantity::Light)))
        .ok_or(SkipReason::LightUnavailable);
    [
        (ActuatorId::Pump, pump_desired(reading, store)),
        (ActuatorId::Fan, fan),
        (ActuatorId::Light, light),
    ]
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Skipped(SkipReason),
    /// Monitor mode: what the rule wanted, not applied.
    Held { desired: bool },
    Transition(TransitionOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub outcomes: [(ActuatorId, RuleOutcome); 3],
    pub air_quality_alert: bool,
}

impl CycleReport {
    pub fn outcome(&self, id: ActuatorId) -> &RuleOutcome {
        &self.outcomes[id.index()].1
    }

    /// Transitions that reached the driver this cycle.
    pub fn executed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RuleOutcome::Transition(t) if t.is_executed()))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct DecisionEngine<D, F> {
    zone_id: String,
    mode: OperationMode,
    actuators: ActuatorState<D>,
    feedback: FeedbackReporter<F>,
    dispatcher: CommandDispatcher,
}

impl<D: ActuatorDriver, F: FeedbackChannel> DecisionEngine<D, F> {
    pub fn new(
        zone_id: impl Into<String>,
        mode: OperationMode,
        actuators: ActuatorState<D>,
        feedback: FeedbackReporter<F>,
        dispatcher: CommandDispatcher,
    ) -> Self {
        Self {
            zone_id: zone_id.into(),
            mode,
            actuators,
            feedback,
            dispatcher,
        }
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    pub fn actuators(&self) -> &ActuatorState<D> {
        &self.actuators
    }

    pub fn feedback(&self) -> &FeedbackReporter<F> {
        &self.feedback
    }

    /// Evaluate every autonomous rule against one reading.
    pub async fn run_cycle(&mut self, reading: &SensorReading, store: &ThresholdStore) -> CycleReport {
        let air_quality_alert = match reading.air_quality_ppm {
            Some(ppm) if ppm > store.get(Quantity::AirQuality).max => {
                warn!(
                    zone = %self.zone_id,
                    ppm,
                    max = store.get(Quantity::AirQuality).max,
                    "air quality above threshold"
                );
                true
            }
            _ => false,
        };

        let [pump, fan, light] = evaluate(reading, store);
        let outcomes = [
            (pump.0, self.apply_rule(pump.0, pump.1).await),
            (fan.0, self.apply_rule(fan.0, fan.1).await),
            (light.0, self.apply_rule(light.0, light.1).await),
        ];

        CycleReport {
            outcomes,
            air_quality_alert,
        }
    }

    async fn apply_rule(&mut self, id: ActuatorId, decision: Result<bool, SkipReason>) -> RuleOutcome {
        match decision {
            Err(reason) => {
                debug!(actuator = %id, ?reason, "rule skipped");
                RuleOutcome::Skipped(reason)
            }
            Ok(desired) if self.mode == OperationMode::Monitor => {
                if desired != self.actuators.current_state(id) {
                    info!(
                        actuator = %id,
                        desired = on_off(desired),
                        "rule would switch output (monitor mode)"
                    );
                }
                RuleOutcome::Held { desired }
            }
            Ok(desired) => RuleOutcome::Transition(self.execute(id, desired, Trigger::System).await),
        }
    }

    /// Apply an explicit command verbatim.
    pub async fn apply_command(&mut self, command: Command) -> TransitionOutcome {
        info!(
            actuator = %command.actuator,
            desired = on_off(command.desired),
            "manual command"
        );
        self.execute(command.actuator, command.desired, Trigger::User).await
    }

    /// Decode one inbound message and apply its commands in order.
    pub async fn handle_message(
        &mut self,
        msg: &RawMessage,
    ) -> Result<Vec<(ActuatorId, TransitionOutcome)>, DecodeError> {
        let commands = self.dispatcher.dispatch(msg)?;
        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            let outcome = self.apply_command(command).await;
            results.push((command.actuator, outcome));
        }
        Ok(results)
    }

    /// Apply every pending message. Returns how many messages were consumed.
    pub async fn drain_commands<C: CommandChannel>(&mut self, channel: &mut C) -> usize {
        let mut consumed = 0;
        while let Some(msg) = channel.next_message() {
            consumed += 1;
            if let Err(e) = self.handle_message(&msg).await {
                warn!(topic = %msg.topic, error = %e, "command rejected");
            }
        }
        consumed
    }

    async fn execute(&mut self, id: ActuatorId, desired: bool, trigger: Trigger) -> TransitionOutcome {
        let outcome = self.actuators.transition(id, desired);
        let result = match &outcome {
            TransitionOutcome::Applied => Outcome::Success,
            TransitionOutcome::Failed(_) => Outcome::Fail,
            TransitionOutcome::NoOp => return outcome,
        };
        let event = ActuationEvent::new(id, desired, trigger, &self.zone_id, result);
        self.feedback.report(event).await;
        outcome
    }
}

// ===========================================================================
// Tests
// ===========================================================================
