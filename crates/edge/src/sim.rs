//! Stateful greenhouse sensor simulator for development without probes.
//!
//! Models realistic sensor behaviour:
//! - Soil moisture as 12-bit capacitive ADC counts with a random walk,
//!   drying drift, per-probe offsets and occasional spikes
//! - Diurnal (day/night) temperature and light
//! - Closed-loop response: soil wets while the pump runs, air cools while
//!   the fan runs

use std::fmt;

use irrigation_engine::ports::SensorSource;
use irrigation_engine::{ActuatorFlag, ActuatorId, PlantSet, SensorReading, MAX_PLANTS};

/// ADC count of a probe in dry air.
pub const RAW_DRY: f64 = 3900.0;
/// ADC count of a probe in water.
pub const RAW_WET: f64 = 1200.0;

/// Linear map from probe counts to percent, clamped to `[0, 100]`.
pub fn moisture_percent(raw: f64) -> f32 {
    let pct = (raw - RAW_DRY) * 100.0 / (RAW_WET - RAW_DRY);
    pct.clamp(0.0, 100.0) as f32
}

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Soil starts mid-range and dries steadily; warm afternoons.
    Drying,
    /// Soil hovers in band, mild climate. Nothing should switch.
    Stable,
    /// High noise and frequent spikes.
    Flaky,
    /// Soil starts near saturation; the pump must stay off.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-probe state
// ---------------------------------------------------------------------------

struct Probe {
    /// Current "true" soil moisture in ADC counts.
    base: f64,
    /// Permanent calibration offset.
    offset: f64,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct SensorSim {
    scenario: Scenario,
    probes: Vec<Probe>,

    drift_per_sample: f64,
    walk_sigma: f64,
    noise_sigma: f64,
    spike_prob: f32,
    spike_sigma: f64,

    /// Air temperature offset accumulated by the fan.
    cooling: f64,
    diurnal_period_s: f64,

    watering: bool,
    venting: bool,
}

impl SensorSim {
    pub fn new(scenario: Scenario, diurnal_period_s: f64) -> Self {
        let range = RAW_DRY - RAW_WET;

        // start_frac: 0.0 = at RAW_WET (wettest), 1.0 = at RAW_DRY (driest)
        let (drift, walk_sigma, noise_sigma, spike_prob, spike_sigma, start_frac) = match scenario {
            Scenario::Drying => (4.0, 30.0, 15.0, 0.03_f32, 400.0, 0.5),
            Scenario::Stable => (0.5, 10.0, 8.0, 0.005, 200.0, 0.45),
            Scenario::Flaky => (3.0, 50.0, 40.0, 0.10, 600.0, 0.5),
            Scenario::Wet => (1.0, 15.0, 10.0, 0.02, 300.0, 0.1),
        };

        let start = RAW_WET + start_frac * range;
        let probes = (0..MAX_PLANTS)
            .map(|_| Probe {
                base: (start + gaussian(0.0, range * 0.03)).clamp(RAW_WET, RAW_DRY),
                offset: gaussian(0.0, range * 0.02),
            })
            .collect();

        tracing::info!(%scenario, diurnal_period_s, "sensor simulator ready");

        Self {
            scenario,
            probes,
            drift_per_sample: drift,
            walk_sigma,
            noise_sigma,
            spike_prob,
            spike_sigma,
            cooling: 0.0,
            diurnal_period_s,
            watering: false,
            venting: false,
        }
    }

    /// Next probe reading in ADC counts for `channel`.
    pub fn sample_raw(&mut self, channel: usize) -> Option<f64> {
        let watering = self.watering;
        let probe = self.probes.get_mut(channel)?;

        let wet = if watering { -60.0 } else { 0.0 };
        probe.base = (probe.base + self.drift_per_sample + gaussian(0.0, self.walk_sigma) + wet)
            .clamp(RAW_WET - 100.0, RAW_DRY + 100.0);

        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };

        let reading = probe.base + probe.offset + gaussian(0.0, self.noise_sigma) + spike;
        // 12-bit ADC
        Some(reading.round().clamp(0.0, 4095.0))
    }

    /// Position in the day/night cycle: -1 at midnight, 1 mid-afternoon.
    fn daylight(&self) -> f64 {
        let now_s = time::OffsetDateTime::now_utc().unix_timestamp() as f64;
        (2.0 * std::f64::consts::PI * now_s / self.diurnal_period_s).sin()
    }

    fn climate(&self) -> (f64, f64) {
        match self.scenario {
            Scenario::Drying => (27.0, 4.0),
            Scenario::Flaky => (25.0, 5.0),
            Scenario::Stable | Scenario::Wet => (22.0, 2.0),
        }
    }
}

impl SensorSource for SensorSim {
    fn read(&mut self, plants: &PlantSet) -> SensorReading {
        let mut moisture = [f32::NAN; MAX_PLANTS];
        for (slot, plant) in plants.iter() {
            if let Some(raw) = self.sample_raw(plant.sensor_pin as usize) {
                moisture[slot] = moisture_percent(raw);
            }
        }

        let day = self.daylight();
        let (mean_temp, swing) = self.climate();

        if self.venting {
            self.cooling = (self.cooling + 0.5).min(6.0);
        } else {
            self.cooling = (self.cooling - 0.2).max(0.0);
        }

        let temperature = mean_temp + swing * day - self.cooling + gaussian(0.0, 0.2);
        let humidity = (60.0 - 10.0 * day + gaussian(0.0, 1.0)).clamp(0.0, 100.0);
        let light = (1800.0 * day.max(0.0) + 50.0 + gaussian(0.0, 20.0)).max(0.0);
        let air_quality = (180.0 + 40.0 * day + gaussian(0.0, 10.0)).max(0.0);

        SensorReading::from_raw(
            moisture,
            temperature as f32,
            humidity as f32,
            light as f32,
            air_quality as f32,
        )
    }

    fn observe(&mut self, outputs: &[ActuatorFlag]) {
        for flag in outputs {
            match flag.actuator {
                ActuatorId::Pump => self.watering = flag.on,
                ActuatorId::Fan => self.venting = flag.on,
                ActuatorId::Light => {}
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
