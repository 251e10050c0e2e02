//! In-memory actuator flags: the single source of truth for what each
//! output is doing.
//!
//! A flag changes only together with a successful driver write, and a write
//! is issued only when the flag would change. Pins are never read back.

use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::DriveError;
use crate::model::{on_off, ActuatorId};
use crate::ports::ActuatorDriver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// One write issued; flag updated.
    Applied,
    /// Already in the desired state; nothing written.
    NoOp,
    /// The write failed; flag unchanged.
    Failed(DriveError),
}

impl TransitionOutcome {
    /// Whether the transition produces an audit event.
    pub fn is_executed(&self) -> bool {
        !matches!(self, Self::NoOp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActuatorFlag {
    pub actuator: ActuatorId,
    pub on: bool,
}

pub struct ActuatorState<D> {
    driver: D,
    flags: [bool; 3],
    writes: u64,
}

impl<D: ActuatorDriver> ActuatorState<D> {
    /// Take ownership of the driver and force every output OFF so flags and
    /// pins agree from the start.
    pub fn new(mut driver: D) -> Self {
        for id in ActuatorId::ALL {
            if let Err(e) = driver.drive(id, false) {
                error!(actuator = %id, error = %e, "failed to force output off at startup");
            }
        }
        Self {
            driver,
            flags: [false; 3],
            writes: 0,
        }
    }

    pub fn current_state(&self, id: ActuatorId) -> bool {
        self.flags[id.index()]
    }

    pub fn transition(&mut self, id: ActuatorId, desired: bool) -> TransitionOutcome {
        if self.current_state(id) == desired {
            debug!(actuator = %id, state = on_off(desired), "already in desired state — no action");
            return TransitionOutcome::NoOp;
        }

        self.writes += 1;
        match self.driver.drive(id, desired) {
            Ok(()) => {
                self.flags[id.index()] = desired;
                info!(actuator = %id, state = on_off(desired), "output switched");
                TransitionOutcome::Applied
            }
            Err(e) => {
                error!(actuator = %id, state = on_off(desired), error = %e, "output write failed");
                TransitionOutcome::Failed(e)
            }
        }
    }

    pub fn snapshot(&self) -> [ActuatorFlag; 3] {
        ActuatorId::ALL.map(|actuator| ActuatorFlag {
            actuator,
            on: self.current_state(actuator),
        })
    }

    /// Physical writes attempted since construction, excluding the startup
    /// reset.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}

// ===========================================================================
// Tests
// ===========================================================================
