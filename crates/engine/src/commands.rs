//! Inbound command decoding.
//!
//! Payload: `{"light": "ON"|"OFF", "fan": "ON"|"OFF", "pump": "ON"|"OFF"}`,
//! every key optional. Absent (or `null`) keys leave that actuator alone.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::model::{ActuatorId, Command};
use crate::ports::RawMessage;

/// Recognised keys, in the order commands are applied.
const FIELDS: [(&str, ActuatorId); 3] = [
    ("light", ActuatorId::Light),
    ("fan", ActuatorId::Fan),
    ("pump", ActuatorId::Pump),
];

/// Parse an "ON"/"OFF" value into a bool (case-insensitive, trims whitespace).
pub fn parse_switch(value: &str) -> Result<bool, String> {
    let s = value.trim().to_uppercase();
    match s.as_str() {
        "ON" => Ok(true),
        "OFF" => Ok(false),
        _ => Err(format!("unknown switch value '{s}'")),
    }
}

pub struct CommandDispatcher {
    topic: Option<String>,
}

impl CommandDispatcher {
    /// Accept messages from `topic` only; `None` accepts every topic.
    pub fn new(topic: Option<String>) -> Self {
        Self { topic }
    }

    pub fn accepts(&self, msg: &RawMessage) -> bool {
        self.topic.as_deref().map_or(true, |t| t == msg.topic)
    }

    /// Decode a message into zero or more commands. Messages for other
    /// topics decode to nothing.
    pub fn dispatch(&self, msg: &RawMessage) -> Result<Vec<Command>, DecodeError> {
        if !self.accepts(msg) {
            debug!(topic = %msg.topic, "ignoring message on foreign topic");
            return Ok(Vec::new());
        }
        decode(&msg.payload)
    }
}

/// Decode a command payload. A schema violation rejects the whole payload;
/// an unrecognised switch value drops only that field.
pub fn decode(payload: &[u8]) -> Result<Vec<Command>, DecodeError> {
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(DecodeError::Malformed("expected a JSON object".into()));
    };

    let mut commands = Vec::with_capacity(FIELDS.len());
    for (key, actuator) in FIELDS {
        match fields.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => match parse_switch(s) {
                Ok(desired) => commands.push(Command { actuator, desired }),
                Err(msg) => warn!(field = key, "{msg} (use ON/OFF) — field skipped"),
            },
            Some(_) => return Err(DecodeError::Schema { field: key }),
        }
    }
    Ok(commands)
}

// ===========================================================================
// Tests
// ===========================================================================
