mod board;
mod config;
mod http;
mod mqtt;
mod runtime;
#[cfg(feature = "sim")]
mod sim;
mod state;
mod web;

use anyhow::Result;
use rumqttc::{AsyncClient, MqttOptions};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use irrigation_engine::ports::SensorSource;
use irrigation_engine::{
    ActuatorState, CommandDispatcher, DecisionEngine, FeedbackReporter, TelemetryReporter,
    ThresholdStore,
};

use board::{ActuatorBoard, PinMap};
use config::Config;
use http::{RestActionLog, RestClient};
use mqtt::{LinkMonitor, MqttFeedback};
use runtime::{Controller, Timing};
use state::SystemState;

/// Capacity of the queue between the MQTT task and the controller.
const COMMAND_QUEUE: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    // ── Config file ─────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    let zone_id = cfg.device.zone_id.clone();

    // ── Relay board ─────────────────────────────────────────────────
    let board = ActuatorBoard::new(&pin_map(&cfg), cfg.actuators.active_low)?;

    // ── Shared state (ephemeral, for the status endpoint) ───────────
    let shared = Arc::new(RwLock::new(SystemState::new(
        &zone_id,
        cfg.device.mode,
        cfg.defaults,
    )));
    {
        let mut st = shared.write().await;
        st.record_system("edge started".to_string());
    }

    // ── Web server ──────────────────────────────────────────────────
    let web_state = Arc::clone(&shared);
    let web_port = cfg.web.port;
    tokio::spawn(async move {
        if let Err(e) = web::serve(web_state, web_port).await {
            error!("status endpoint stopped: {e:#}");
        }
    });

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new(&cfg.mqtt.client_id, &cfg.mqtt.host, cfg.mqtt.port);
    mqttoptions.set_keep_alive(Duration::from_secs(cfg.mqtt.keep_alive_secs));
    let (client, eventloop) = AsyncClient::new(mqttoptions, 20);

    let command_topic = mqtt::command_topic(&cfg.mqtt.topic_prefix, &zone_id);
    let feedback_topic = mqtt::feedback_topic(&cfg.mqtt.topic_prefix, &zone_id);
    let monitor = LinkMonitor::new(
        cfg.mqtt.max_connect_attempts,
        Duration::from_secs(cfg.mqtt.retry_backoff_secs),
        Duration::from_secs(cfg.mqtt.degraded_backoff_secs),
    );

    let (tx, mut rx) = mpsc::channel(COMMAND_QUEUE);
    tokio::spawn(mqtt::run_event_loop(
        eventloop,
        client.clone(),
        command_topic.clone(),
        tx,
        Arc::clone(&shared),
        monitor,
    ));
    info!(host = %cfg.mqtt.host, port = cfg.mqtt.port, topic = %command_topic, "mqtt task started");

    // ── REST ────────────────────────────────────────────────────────
    let rest = RestClient::new(
        &cfg.api.base_url,
        Duration::from_secs(cfg.api.http_timeout_secs),
    )?;
    let action_log = cfg.api.action_log.then(|| {
        // The action log is keyed by plant; a zone without plants logs
        // against the zone id.
        let plant_id = cfg
            .plants
            .first()
            .map(|p| p.plant_id.clone())
            .unwrap_or_else(|| zone_id.clone());
        RestActionLog::new(rest.clone(), plant_id)
    });

    // ── Decision engine ─────────────────────────────────────────────
    let feedback = (MqttFeedback::new(client, feedback_topic), action_log);
    let engine = DecisionEngine::new(
        zone_id.clone(),
        cfg.device.mode,
        ActuatorState::new(board),
        FeedbackReporter::new(feedback),
        CommandDispatcher::new(Some(command_topic)),
    );
    let store = ThresholdStore::new(zone_id.clone(), cfg.defaults, cfg.plant_set()?);
    let timing = Timing {
        cycle: cfg.cycle_interval(),
        refresh: cfg.refresh_interval(),
        telemetry: cfg.telemetry_interval(),
    };

    let mut controller = Controller::new(
        engine,
        store,
        TelemetryReporter::new(cfg.device.user_id.clone()),
        sensors(&cfg),
        rest,
        Arc::clone(&shared),
    );

    tokio::select! {
        _ = controller.run(&mut rx, timing) => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("failed to listen for shutdown signal: {e}");
            }
            info!("shutdown requested");
        }
    }

    Ok(())
}

fn pin_map(cfg: &Config) -> PinMap {
    // Ranges were checked by validation.
    PinMap {
        pump: cfg.actuators.pump_pin as u8,
        fans: cfg.actuators.fan_pins.iter().map(|&p| p as u8).collect(),
        light: cfg.actuators.light_pin as u8,
    }
}

#[cfg(feature = "sim")]
fn sensors(cfg: &Config) -> impl SensorSource {
    sim::SensorSim::new(
        sim::Scenario::from_str_lossy(&cfg.sim.scenario),
        cfg.sim.diurnal_period_secs,
    )
}

/// Builds without the simulator have no probe driver yet, so every reading
/// is unavailable and the rules skip.
#[cfg(not(feature = "sim"))]
fn sensors(_cfg: &Config) -> impl SensorSource {
    struct NoProbes;

    impl SensorSource for NoProbes {
        fn read(&mut self, _plants: &irrigation_engine::PlantSet) -> irrigation_engine::SensorReading {
            irrigation_engine::SensorReading::default()
        }
    }

    warn!("built without the sim feature and no probe driver — all readings unavailable");
    NoProbes
}
