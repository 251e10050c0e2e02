//! TOML config file loading, validation, and environment overrides.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::time::Duration;

use irrigation_engine::{OperationMode, PlantProfile, PlantSet, ThresholdSet, MAX_PLANTS};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    pub device: DeviceSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub web: WebSection,
    #[serde(default)]
    pub sim: SimSection,
    pub actuators: ActuatorSection,
    #[serde(default)]
    pub plants: Vec<PlantEntry>,
    /// Bands used until the first successful refresh.
    pub defaults: ThresholdSet,
}

#[derive(Debug, Deserialize)]
pub struct DeviceSection {
    pub zone_id: String,
    pub user_id: String,
    #[serde(default)]
    pub mode: OperationMode,
    #[serde(default = "default_cycle_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_refresh_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_telemetry_secs")]
    pub telemetry_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
    pub keep_alive_secs: u64,
    /// Consecutive failed connects before the link is reported degraded.
    pub max_connect_attempts: u32,
    pub retry_backoff_secs: u64,
    pub degraded_backoff_secs: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            client_id: "irrigation-edge".into(),
            topic_prefix: "greenhouse".into(),
            keep_alive_secs: 30,
            max_connect_attempts: 5,
            retry_backoff_secs: 2,
            degraded_backoff_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    pub http_timeout_secs: u64,
    /// Also post every actuation to the REST action log.
    pub action_log: bool,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".into(),
            http_timeout_secs: 10,
            action_log: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimSection {
    pub scenario: String,
    /// Day/night cycle length. 600 for fast iteration, 86400 for real time.
    pub diurnal_period_secs: f64,
}

impl Default for SimSection {
    fn default() -> Self {
        Self {
            scenario: "drying".into(),
            diurnal_period_secs: 600.0,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ActuatorSection {
    pub pump_pin: i64,
    /// One or two fan relays, switched together.
    pub fan_pins: Vec<i64>,
    pub light_pin: i64,
    /// Many common relay boards are active-low.
    #[serde(default = "default_true")]
    pub active_low: bool,
}

#[derive(Debug, Deserialize)]
pub struct PlantEntry {
    pub plant_id: String,
    /// Soil probe ADC channel.
    pub sensor_pin: i64,
}

fn default_cycle_secs() -> u64 {
    10
}

fn default_refresh_secs() -> u64 {
    300
}

fn default_telemetry_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Pin whitelists
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

/// Soil probe channels on the four-input ADC.
const ADC_CHANNELS: std::ops::RangeInclusive<i64> = 0..=3;

const MAX_FAN_PINS: usize = 2;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_device(&mut errors);
        self.validate_links(&mut errors);
        self.validate_actuators(&mut errors);
        self.validate_plants(&mut errors);

        if let Some(band) = self.defaults.first_invalid() {
            errors.push(format!("defaults.{band}: min must not exceed max"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_device(&self, errors: &mut Vec<String>) {
        let d = &self.device;
        if d.zone_id.trim().is_empty() {
            errors.push("device: zone_id is empty".into());
        }
        if d.user_id.trim().is_empty() {
            errors.push("device: user_id is empty".into());
        }
        for (name, value) in [
            ("cycle_interval_secs", d.cycle_interval_secs),
            ("refresh_interval_secs", d.refresh_interval_secs),
            ("telemetry_interval_secs", d.telemetry_interval_secs),
        ] {
            if value == 0 {
                errors.push(format!("device: {name} must be positive"));
            }
        }

        let period = self.sim.diurnal_period_secs;
        if !(period.is_finite() && period > 0.0) {
            errors.push(format!(
                "sim: diurnal_period_secs must be positive and finite, got {period}"
            ));
        }
    }

    fn validate_links(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;
        if m.host.trim().is_empty() {
            errors.push("mqtt: host is empty".into());
        }
        if m.port == 0 {
            errors.push("mqtt: port must be positive".into());
        }
        if m.client_id.trim().is_empty() {
            errors.push("mqtt: client_id is empty".into());
        }
        if m.topic_prefix.trim().is_empty() {
            errors.push("mqtt: topic_prefix is empty".into());
        } else if m.topic_prefix.contains(['+', '#']) {
            errors.push(format!(
                "mqtt: topic_prefix '{}' must not contain wildcards",
                m.topic_prefix
            ));
        }
        if m.max_connect_attempts == 0 {
            errors.push("mqtt: max_connect_attempts must be positive".into());
        }
        if m.retry_backoff_secs == 0 || m.degraded_backoff_secs == 0 {
            errors.push("mqtt: backoff intervals must be positive".into());
        }

        let a = &self.api;
        if !(a.base_url.starts_with("http://") || a.base_url.starts_with("https://")) {
            errors.push(format!(
                "api: base_url '{}' must start with http:// or https://",
                a.base_url
            ));
        }
        if a.http_timeout_secs == 0 {
            errors.push("api: http_timeout_secs must be positive".into());
        }
    }

    fn validate_actuators(&self, errors: &mut Vec<String>) {
        let a = &self.actuators;
        let mut seen_pins: HashSet<i64> = HashSet::new();

        if a.fan_pins.is_empty() || a.fan_pins.len() > MAX_FAN_PINS {
            errors.push(format!(
                "actuators: fan_pins must list 1 to {MAX_FAN_PINS} pins, got {}",
                a.fan_pins.len()
            ));
        }

        let named = std::iter::once(("pump_pin", a.pump_pin))
            .chain(a.fan_pins.iter().map(|&p| ("fan_pins", p)))
            .chain(std::iter::once(("light_pin", a.light_pin)));

        // ── GPIO pin whitelist ──────────────────────────────
        for (name, pin) in named {
            if !VALID_GPIO_PINS.contains(&pin) {
                errors.push(format!(
                    "actuators: {name} {pin} is not a valid BCM GPIO pin (allowed: 2-27)"
                ));
            } else if !seen_pins.insert(pin) {
                errors.push(format!(
                    "actuators: {name} {pin} is already used by another output"
                ));
            }
        }
    }

    fn validate_plants(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut seen_channels: HashSet<i64> = HashSet::new();

        if self.plants.len() > MAX_PLANTS {
            errors.push(format!(
                "plants: {} entries exceed the {MAX_PLANTS} soil probe channels",
                self.plants.len()
            ));
        }

        for (i, p) in self.plants.iter().enumerate() {
            let ctx = || {
                if p.plant_id.is_empty() {
                    format!("plants[{i}]")
                } else {
                    format!("plant '{}'", p.plant_id)
                }
            };

            // ── Identity ────────────────────────────────────────
            if p.plant_id.trim().is_empty() {
                errors.push(format!("{}: plant_id is empty", ctx()));
            } else if !seen_ids.insert(&p.plant_id) {
                errors.push(format!("{}: duplicate plant_id", ctx()));
            }

            // ── ADC channel ─────────────────────────────────────
            if !ADC_CHANNELS.contains(&p.sensor_pin) {
                errors.push(format!(
                    "{}: sensor_pin {} out of ADC channel range [0, 3]",
                    ctx(),
                    p.sensor_pin
                ));
            } else if !seen_channels.insert(p.sensor_pin) {
                errors.push(format!(
                    "{}: sensor_pin {} is already used by another plant",
                    ctx(),
                    p.sensor_pin
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Derived values
// ---------------------------------------------------------------------------

impl Config {
    /// Build the plant roster. Only valid after [`Config::validate`].
    pub fn plant_set(&self) -> Result<PlantSet> {
        let mut set = PlantSet::new();
        for p in &self.plants {
            set.insert(PlantProfile::new(p.plant_id.clone(), p.sensor_pin as u8))
                .with_context(|| format!("failed to register plant '{}'", p.plant_id))?;
        }
        Ok(set)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.device.cycle_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.device.refresh_interval_secs)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.device.telemetry_interval_secs)
    }

    /// Apply `MQTT_HOST`, `MQTT_PORT`, `API_URL`, `WEB_PORT`,
    /// `RELAY_ACTIVE_LOW` and `SIM_SCENARIO` from `lookup`. Unparseable
    /// values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        self.mqtt.port = lookup("MQTT_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.mqtt.port);
        if let Some(url) = lookup("API_URL") {
            self.api.base_url = url;
        }
        self.web.port = lookup("WEB_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.web.port);
        self.actuators.active_low = lookup("RELAY_ACTIVE_LOW")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(self.actuators.active_low);
        if let Some(scenario) = lookup("SIM_SCENARIO") {
            self.sim.scenario = scenario;
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file, apply environment overrides, then
/// validate the result.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config = from_toml(&contents, |key| env::var(key).ok())
        .with_context(|| format!("invalid config: {path}"))?;

    tracing::info!(
        zone = %config.device.zone_id,
        plants = config.plants.len(),
        mode = ?config.device.mode,
        "config loaded"
    );
    Ok(config)
}

/// Overrides land before validation so an override gets the same checks as
/// a file value.
fn from_toml(contents: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let mut config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.apply_overrides(lookup);
    config.validate()?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
