//! Controller task: the single consumer that owns the decision engine, the
//! threshold store and the telemetry reporter.
//!
//! ```text
//!  mqtt task ──mpsc──▶ ┌────────────┐ ──▶ relays
//!  cycle tick ───────▶ │ Controller │ ──▶ feedback (mqtt + action log)
//!  refresh tick ─────▶ │            │ ──▶ telemetry (rest)
//!  telemetry tick ───▶ └────────────┘ ──▶ SharedState (status page)
//! ```
//!
//! Every step runs to completion before the next one starts. The status
//! snapshot is written after a step, never held across a network call.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use irrigation_engine::model::on_off;
use irrigation_engine::ports::{
    ActuatorDriver, FeedbackChannel, RawMessage, RemoteConfigProvider, SensorSource, TelemetrySink,
};
use irrigation_engine::{
    ActuatorId, CycleReport, DecisionEngine, RuleOutcome, SensorReading, TelemetryReporter,
    TelemetryStatus, ThresholdStore, TransitionOutcome,
};

use crate::mqtt::QueuedCommands;
use crate::state::SharedState;

/// Ticker periods for the controller loop.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub cycle: Duration,
    pub refresh: Duration,
    pub telemetry: Duration,
}

pub struct Controller<S, D, F, R> {
    engine: DecisionEngine<D, F>,
    store: ThresholdStore,
    telemetry: TelemetryReporter,
    sensors: S,
    remote: R,
    shared: SharedState,
    last_reading: Option<SensorReading>,
    air_alert: bool,
}

impl<S, D, F, R> Controller<S, D, F, R>
where
    S: SensorSource,
    D: ActuatorDriver,
    F: FeedbackChannel,
    R: RemoteConfigProvider + TelemetrySink,
{
    pub fn new(
        engine: DecisionEngine<D, F>,
        store: ThresholdStore,
        telemetry: TelemetryReporter,
        sensors: S,
        remote: R,
        shared: SharedState,
    ) -> Self {
        Self {
            engine,
            store,
            telemetry,
            sensors,
            remote,
            shared,
            last_reading: None,
            air_alert: false,
        }
    }

    #[cfg(test)]
    fn engine(&self) -> &DecisionEngine<D, F> {
        &self.engine
    }

    #[cfg(test)]
    fn store(&self) -> &ThresholdStore {
        &self.store
    }

    /// Drive the controller forever. The first tick of every ticker fires
    /// immediately, so thresholds are fetched before the first cycle.
    pub async fn run(&mut self, rx: &mut mpsc::Receiver<RawMessage>, timing: Timing) {
        let mut refresh = interval(timing.refresh);
        let mut cycle = interval(timing.cycle);
        let mut telemetry = interval(timing.telemetry);
        for ticker in [&mut refresh, &mut cycle, &mut telemetry] {
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        info!(
            zone = %self.store.zone_id(),
            mode = ?self.engine.mode(),
            plants = self.store.plants().len(),
            cycle_secs = timing.cycle.as_secs_f32(),
            refresh_secs = timing.refresh.as_secs_f32(),
            telemetry_secs = timing.telemetry.as_secs_f32(),
            "controller started"
        );
        {
            let mut st = self.shared.write().await;
            st.record_system(format!("controller started (mode: {:?})", self.engine.mode()));
        }

        loop {
            tokio::select! {
                biased;

                _ = refresh.tick() => {
                    self.refresh_thresholds().await;
                }
                Some(msg) = rx.recv() => {
                    self.handle_command(msg).await;
                }
                _ = cycle.tick() => {
                    self.drain_pending(rx).await;
                    self.cycle().await;
                }
                _ = telemetry.tick() => {
                    self.send_telemetry().await;
                }
            }
        }
    }

    /// Fetch fresh thresholds. On failure the previous values stay active.
    pub async fn refresh_thresholds(&mut self) -> bool {
        match self.store.refresh(&self.remote).await {
            Ok(()) => {
                let mut st = self.shared.write().await;
                st.record_refresh(*self.store.current(), self.store.last_refreshed());
                true
            }
            Err(e) => {
                warn!(zone = %self.store.zone_id(), error = %e, "threshold refresh failed — keeping previous values");
                let mut st = self.shared.write().await;
                st.record_refresh_failure(format!("threshold refresh failed: {e}"));
                false
            }
        }
    }

    /// Apply one inbound command message.
    pub async fn handle_command(&mut self, msg: RawMessage) {
        match self.engine.handle_message(&msg).await {
            Ok(results) => {
                self.sensors.observe(&self.engine.actuators().snapshot());
                let mut st = self.shared.write().await;
                for (id, outcome) in &results {
                    let on = self.engine.actuators().current_state(*id);
                    if let Some(detail) = describe(*id, outcome, on, "manual") {
                        st.record_command(detail);
                    }
                }
                self.publish_counters(&mut st);
            }
            Err(e) => {
                warn!(topic = %msg.topic, error = %e, "command rejected");
                let mut st = self.shared.write().await;
                st.record_error(format!("command rejected: {e}"));
            }
        }
    }

    /// Apply commands that queued up while the previous step ran.
    async fn drain_pending(&mut self, rx: &mut mpsc::Receiver<RawMessage>) {
        let consumed = self.engine.drain_commands(&mut QueuedCommands(rx)).await;
        if consumed > 0 {
            debug!(consumed, "drained pending commands before cycle");
            self.sensors.observe(&self.engine.actuators().snapshot());
            let mut st = self.shared.write().await;
            st.record_command(format!("applied {consumed} queued command message(s)"));
            self.publish_counters(&mut st);
        }
    }

    /// Read sensors and run every autonomous rule once.
    pub async fn cycle(&mut self) -> CycleReport {
        let reading = self.sensors.read(self.store.plants());
        let report = self.engine.run_cycle(&reading, &self.store).await;
        self.sensors.observe(&self.engine.actuators().snapshot());

        debug!(executed = report.executed(), "cycle complete");

        let mut st = self.shared.write().await;
        st.record_reading(reading.clone());
        for (id, outcome) in &report.outcomes {
            if let RuleOutcome::Transition(t) = outcome {
                let on = self.engine.actuators().current_state(*id);
                if let Some(detail) = describe(*id, t, on, "auto") {
                    if matches!(t, TransitionOutcome::Failed(_)) {
                        st.record_error(detail);
                    } else {
                        st.record_actuation(detail);
                    }
                }
            }
        }
        if report.air_quality_alert && !self.air_alert {
            st.record_error("air quality above threshold".to_string());
        }
        self.air_alert = report.air_quality_alert;
        self.publish_counters(&mut st);
        drop(st);

        self.last_reading = Some(reading);
        report
    }

    /// Post one telemetry document per plant using the latest reading.
    pub async fn send_telemetry(&mut self) -> TelemetryStatus {
        let reading = match &self.last_reading {
            Some(r) => r.clone(),
            None => self.sensors.read(self.store.plants()),
        };
        let flags = self.engine.actuators().snapshot();
        let status = self
            .telemetry
            .report(&reading, &self.store, &flags, &self.remote)
            .await;

        if status.failed > 0 {
            warn!(sent = status.sent, failed = status.failed, "telemetry partially failed");
        }
        let mut st = self.shared.write().await;
        self.publish_counters(&mut st);
        status
    }

    fn publish_counters(&self, st: &mut crate::state::SystemState) {
        st.actuators = self.engine.actuators().snapshot().to_vec();
        st.feedback = self.engine.feedback().stats();
        st.telemetry = self.telemetry.stats();
    }
}

/// Event text for an executed transition; `None` for a no-op. `on` is the
/// flag after the transition.
fn describe(id: ActuatorId, outcome: &TransitionOutcome, on: bool, source: &str) -> Option<String> {
    match outcome {
        TransitionOutcome::NoOp => None,
        TransitionOutcome::Applied => Some(format!("{id} {} ({source})", on_off(on))),
        TransitionOutcome::Failed(e) => Some(format!("{id} switch failed ({source}): {e}")),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    use irrigation_engine::{
        ActuationEvent, ActuatorFlag, ActuatorState, CommandDispatcher, DriveError, FeedbackReporter,
        FetchError, OperationMode, PlantProfile, PlantSet, PublishError, TelemetryPayload,
        ThresholdPayload, ThresholdSet, Thresholds,
    };

    use crate::state::{EventKind, SystemState};

    fn defaults() -> ThresholdSet {
        ThresholdSet {
            moisture: Thresholds::new(30.0, 80.0),
            temperature: Thresholds::new(10.0, 28.0),
            light: Thresholds::new(300.0, 2500.0),
            air_quality: Thresholds::new(0.0, 400.0),
        }
    }

    const REMOTE_BODY: &str = r#"{"plants": [
        {"plantId": "basil", "moisturePin": 34, "thresholds": {
            "moisture": {"min": 40, "max": 70},
            "temperature": {"min": 10, "max": 26},
            "light": {"min": 200, "max": 2000},
            "airQuality": {"min": 0, "max": 400}
        }},
        {"plantId": "mint", "moisturePin": 35, "thresholds": {
            "moisture": {"min": 45, "max": 80},
            "temperature": {"min": 10, "max": 26},
            "light": {"min": 200, "max": 2000},
            "airQuality": {"min": 0, "max": 400}
        }}
    ]}"#;

    // -- fakes --------------------------------------------------------------

    struct FixedSensors {
        reading: SensorReading,
        observed: Vec<[ActuatorFlag; 3]>,
    }

    impl SensorSource for FixedSensors {
        fn read(&mut self, _plants: &PlantSet) -> SensorReading {
            self.reading
        }

        fn observe(&mut self, outputs: &[ActuatorFlag]) {
            if let Ok(flags) = outputs.try_into() {
                self.observed.push(flags);
            }
        }
    }

    #[derive(Default)]
    struct Relays {
        fail: Option<ActuatorId>,
    }

    impl ActuatorDriver for Relays {
        fn drive(&mut self, actuator: ActuatorId, _on: bool) -> Result<(), DriveError> {
            if self.fail == Some(actuator) {
                return Err(DriveError::Hardware {
                    actuator,
                    message: "relay stuck".into(),
                });
            }
            Ok(())
        }
    }

    struct NullFeedback;

    impl FeedbackChannel for NullFeedback {
        async fn publish(&self, _event: &ActuationEvent) -> Result<(), PublishError> {
            Ok(())
        }
    }

    /// Plant service stand-in. `body: None` makes every fetch fail.
    struct FakeRemote {
        body: Option<&'static str>,
        posts: RefCell<Vec<TelemetryPayload>>,
    }

    impl RemoteConfigProvider for FakeRemote {
        async fn fetch_thresholds(&self, _zone_id: &str) -> Result<ThresholdPayload, FetchError> {
            match self.body {
                Some(body) => ThresholdPayload::parse(body.as_bytes()),
                None => Err(FetchError::Transport("connection refused".into())),
            }
        }
    }

    impl TelemetrySink for FakeRemote {
        async fn publish(&self, payload: &TelemetryPayload) -> Result<(), PublishError> {
            self.posts.borrow_mut().push(payload.clone());
            Ok(())
        }
    }

    type TestController = Controller<FixedSensors, Relays, NullFeedback, FakeRemote>;

    /// Two plants with dry soil, mild air, bright light.
    fn dry_reading() -> SensorReading {
        SensorReading::from_raw([20.0, 25.0, f32::NAN, f32::NAN], 20.0, 55.0, 1000.0, 150.0)
    }

    fn controller_with(reading: SensorReading, body: Option<&'static str>, relays: Relays) -> TestController {
        let mut plants = PlantSet::new();
        plants.insert(PlantProfile::new("basil", 0)).unwrap();
        plants.insert(PlantProfile::new("mint", 1)).unwrap();

        let engine = DecisionEngine::new(
            "zone1",
            OperationMode::Auto,
            ActuatorState::new(relays),
            FeedbackReporter::new(NullFeedback),
            CommandDispatcher::new(None),
        );
        let shared = Arc::new(RwLock::new(SystemState::new("zone1", OperationMode::Auto, defaults())));

        Controller::new(
            engine,
            ThresholdStore::new("zone1", defaults(), plants),
            TelemetryReporter::new("user-1"),
            FixedSensors {
                reading,
                observed: Vec::new(),
            },
            FakeRemote {
                body,
                posts: RefCell::new(Vec::new()),
            },
            shared,
        )
    }

    fn controller() -> TestController {
        controller_with(dry_reading(), Some(REMOTE_BODY), Relays::default())
    }

    fn details(st: &SystemState, kind: EventKind) -> Vec<String> {
        st.events
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.detail.clone())
            .collect()
    }

    // -- cycle --------------------------------------------------------------

    #[tokio::test]
    async fn dry_soil_cycle_waters_and_updates_status() {
        let mut ctl = controller();
        let report = ctl.cycle().await;

        assert_eq!(report.executed(), 1);
        assert!(ctl.engine().actuators().current_state(ActuatorId::Pump));

        let st = ctl.shared.read().await;
        assert!(st.actuators.iter().any(|f| f.actuator == ActuatorId::Pump && f.on));
        assert!(st.last_reading.is_some());
        assert_eq!(details(&st, EventKind::Actuation), vec!["pump ON (auto)"]);
        assert_eq!(st.feedback.published, 1);
    }

    #[tokio::test]
    async fn cycle_tells_sensors_about_outputs() {
        let mut ctl = controller();
        ctl.cycle().await;
        let last = ctl.sensors.observed.last().expect("observe called");
        assert!(last.iter().any(|f| f.actuator == ActuatorId::Pump && f.on));
    }

    #[tokio::test]
    async fn failed_relay_is_recorded_as_error() {
        let mut ctl = controller_with(
            dry_reading(),
            Some(REMOTE_BODY),
            Relays {
                fail: Some(ActuatorId::Pump),
            },
        );
        ctl.cycle().await;

        assert!(!ctl.engine().actuators().current_state(ActuatorId::Pump));
        let st = ctl.shared.read().await;
        let errors = details(&st, EventKind::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("pump switch failed (auto)"));
    }

    #[tokio::test]
    async fn air_quality_alert_is_recorded_once() {
        let mut reading = dry_reading();
        reading.air_quality_ppm = Some(900.0);
        let mut ctl = controller_with(reading, Some(REMOTE_BODY), Relays::default());

        ctl.cycle().await;
        ctl.cycle().await;

        let st = ctl.shared.read().await;
        assert_eq!(details(&st, EventKind::Error), vec!["air quality above threshold"]);
    }

    // -- refresh ------------------------------------------------------------

    #[tokio::test]
    async fn refresh_publishes_new_thresholds() {
        let mut ctl = controller();
        assert!(ctl.refresh_thresholds().await);

        let st = ctl.shared.read().await;
        assert_eq!(st.thresholds.current.temperature.max, 26.0);
        assert!(st.thresholds.last_refreshed.is_some());
        assert_eq!(ctl.store().plant_moisture(0), Thresholds::new(40.0, 70.0));
        assert_eq!(ctl.store().plant_moisture(1), Thresholds::new(45.0, 80.0));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_defaults() {
        let mut ctl = controller_with(dry_reading(), None, Relays::default());
        assert!(!ctl.refresh_thresholds().await);
        assert!(!ctl.refresh_thresholds().await);

        assert_eq!(*ctl.store().current(), defaults());
        let st = ctl.shared.read().await;
        assert_eq!(st.thresholds.consecutive_failures, 2);
        assert!(st.thresholds.last_refreshed.is_none());
    }

    // -- commands -----------------------------------------------------------

    #[tokio::test]
    async fn manual_command_is_recorded() {
        let mut ctl = controller();
        ctl.handle_command(RawMessage::new("greenhouse/zone1/command", br#"{"fan":"ON"}"#.to_vec()))
            .await;

        assert!(ctl.engine().actuators().current_state(ActuatorId::Fan));
        assert!(!ctl.engine().actuators().current_state(ActuatorId::Pump));
        let st = ctl.shared.read().await;
        assert_eq!(details(&st, EventKind::Command), vec!["fan ON (manual)"]);
    }

    #[tokio::test]
    async fn malformed_command_is_recorded_as_error() {
        let mut ctl = controller();
        ctl.handle_command(RawMessage::new("t", b"not json".to_vec())).await;

        let st = ctl.shared.read().await;
        assert_eq!(details(&st, EventKind::Error).len(), 1);
        assert!(st.actuators.iter().all(|f| !f.on));
    }

    #[tokio::test]
    async fn queued_commands_drain_before_cycle() {
        let mut ctl = controller();
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(RawMessage::new("t", br#"{"light":"ON"}"#.to_vec())).await.unwrap();

        ctl.drain_pending(&mut rx).await;
        assert!(ctl.engine().actuators().current_state(ActuatorId::Light));
        assert!(rx.try_recv().is_err());
    }

    // -- telemetry ----------------------------------------------------------

    #[tokio::test]
    async fn telemetry_posts_one_document_per_plant() {
        let mut ctl = controller();
        ctl.cycle().await;
        let status = ctl.send_telemetry().await;

        assert_eq!(status.sent, 2);
        let posts = ctl.remote.posts.borrow();
        assert_eq!(posts[0].plant_id, "basil");
        assert_eq!(posts[1].plant_id, "mint");
        assert!(posts[0].automation.water_on);
        drop(posts);

        let st = ctl.shared.read().await;
        assert_eq!(st.telemetry.published, 2);
    }

    // -- run loop -----------------------------------------------------------

    #[tokio::test]
    async fn run_refreshes_then_serves_commands_and_cycles() {
        let mut ctl = controller();
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(RawMessage::new("t", br#"{"fan":"ON"}"#.to_vec())).await.unwrap();

        let timing = Timing {
            cycle: Duration::from_millis(20),
            refresh: Duration::from_secs(3600),
            telemetry: Duration::from_secs(3600),
        };
        let stopped = tokio::time::timeout(Duration::from_millis(120), ctl.run(&mut rx, timing)).await;
        assert!(stopped.is_err(), "run loop never returns");

        assert!(ctl.store().is_fresh());
        assert!(ctl.engine().actuators().current_state(ActuatorId::Pump));
        let st = ctl.shared.read().await;
        assert!(details(&st, EventKind::Command).contains(&"fan ON (manual)".to_string()));
        assert!(!details(&st, EventKind::System).is_empty());
    }
}
