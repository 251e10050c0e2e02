//! Relay outputs via GPIO. The `gpio` feature gates the real rppal driver;
//! without it, a mock implementation records levels and logs them.

use anyhow::Result;
use std::collections::HashMap;
use tracing::info;

use irrigation_engine::model::on_off;
use irrigation_engine::ports::ActuatorDriver;
use irrigation_engine::{ActuatorId, DriveError};

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

/// BCM pins per actuator. The fan may be wired to two relays that switch
/// together.
#[derive(Debug, Clone)]
pub struct PinMap {
    pub pump: u8,
    pub fans: Vec<u8>,
    pub light: u8,
}

impl PinMap {
    pub fn pins(&self, actuator: ActuatorId) -> &[u8] {
        match actuator {
            ActuatorId::Pump => std::slice::from_ref(&self.pump),
            ActuatorId::Fan => &self.fans,
            ActuatorId::Light => std::slice::from_ref(&self.light),
        }
    }
}

/// Electrical level for a logical state: `true` means drive the pin high.
pub fn pin_level(on: bool, active_low: bool) -> bool {
    on != active_low
}

// ---------------------------------------------------------------------------
// Real GPIO relay board (production: rppal on Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct ActuatorBoard {
    pins: HashMap<ActuatorId, Vec<OutputPin>>,
    active_low: bool,
}

#[cfg(feature = "gpio")]
impl ActuatorBoard {
    pub fn new(map: &PinMap, active_low: bool) -> Result<Self> {
        use anyhow::Context;

        let gpio = Gpio::new().context("failed to open GPIO")?;
        let mut pins = HashMap::new();

        for id in ActuatorId::ALL {
            let mut outputs = Vec::new();
            for &num in map.pins(id) {
                let mut pin = gpio
                    .get(num)
                    .with_context(|| format!("failed to claim gpio {num} for {id}"))?
                    .into_output();
                // Fail-safe: relay OFF before anything else runs.
                set_pin(&mut pin, pin_level(false, active_low));
                outputs.push(pin);
            }
            info!(actuator = %id, pins = ?map.pins(id), active_low, "relay output ready");
            pins.insert(id, outputs);
        }

        Ok(Self { pins, active_low })
    }
}

#[cfg(feature = "gpio")]
fn set_pin(pin: &mut OutputPin, high: bool) {
    if high {
        pin.set_high()
    } else {
        pin.set_low()
    }
}

#[cfg(feature = "gpio")]
impl ActuatorDriver for ActuatorBoard {
    fn drive(&mut self, actuator: ActuatorId, on: bool) -> Result<(), DriveError> {
        let outputs = self
            .pins
            .get_mut(&actuator)
            .filter(|p| !p.is_empty())
            .ok_or(DriveError::Unmapped(actuator))?;
        let level = pin_level(on, self.active_low);
        for pin in outputs.iter_mut() {
            set_pin(pin, level);
        }
        info!(actuator = %actuator, state = on_off(on), "relay set");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mock relay board (development: no hardware, logs state)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct ActuatorBoard {
    /// Electrical level per pin, as real hardware would see it.
    pub(super) levels: HashMap<u8, bool>,
    map: PinMap,
    active_low: bool,
}

#[cfg(not(feature = "gpio"))]
impl ActuatorBoard {
    pub fn new(map: &PinMap, active_low: bool) -> Result<Self> {
        let mut levels = HashMap::new();
        for id in ActuatorId::ALL {
            for &num in map.pins(id) {
                levels.insert(num, pin_level(false, active_low));
            }
            info!(actuator = %id, pins = ?map.pins(id), "[mock-gpio] registered (not wired)");
        }
        info!("[mock-gpio] relay board initialised (no hardware)");
        Ok(Self {
            levels,
            map: map.clone(),
            active_low,
        })
    }

    /// Logical state of an actuator, derived from its first pin.
    #[cfg(test)]
    pub(super) fn is_on(&self, actuator: ActuatorId) -> bool {
        self.map
            .pins(actuator)
            .first()
            .and_then(|n| self.levels.get(n))
            .map(|&high| high != self.active_low)
            .unwrap_or(false)
    }
}

#[cfg(not(feature = "gpio"))]
impl ActuatorDriver for ActuatorBoard {
    fn drive(&mut self, actuator: ActuatorId, on: bool) -> Result<(), DriveError> {
        let pins = self.map.pins(actuator);
        if pins.is_empty() {
            return Err(DriveError::Unmapped(actuator));
        }
        let level = pin_level(on, self.active_low);
        for num in pins {
            self.levels.insert(*num, level);
        }
        info!(actuator = %actuator, state = on_off(on), "[mock-gpio] relay set");
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
