//! MQTT side of the device: command intake, feedback publishing, and link
//! health.
//!
//! The event loop runs in its own task and only forwards command payloads
//! into a bounded queue; the runtime is the single consumer. Connection
//! failures never block the control loop. After `max_connect_attempts`
//! consecutive failures the link is reported degraded and retries continue
//! on a longer backoff.

use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use irrigation_engine::feedback::encode;
use irrigation_engine::ports::{CommandChannel, FeedbackChannel, RawMessage};
use irrigation_engine::{ActuationEvent, PublishError};

use crate::state::SharedState;

// ---------------------------------------------------------------------------
// Topic helpers
// ---------------------------------------------------------------------------

/// `<prefix>/<zone_id>/command`
pub fn command_topic(prefix: &str, zone_id: &str) -> String {
    format!("{prefix}/{zone_id}/command")
}

/// `<prefix>/<zone_id>/feedback`
pub fn feedback_topic(prefix: &str, zone_id: &str) -> String {
    format!("{prefix}/{zone_id}/feedback")
}

// ---------------------------------------------------------------------------
// Link health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Connecting,
    Connected,
    /// Retry budget exhausted; still retrying on the long backoff.
    Degraded,
}

/// Tracks consecutive connection failures and picks the next backoff.
#[derive(Debug)]
pub struct LinkMonitor {
    max_attempts: u32,
    retry_backoff: Duration,
    degraded_backoff: Duration,
    failures: u32,
    state: LinkState,
}

impl LinkMonitor {
    pub fn new(max_attempts: u32, retry_backoff: Duration, degraded_backoff: Duration) -> Self {
        Self {
            max_attempts,
            retry_backoff,
            degraded_backoff,
            failures: 0,
            state: LinkState::Connecting,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn on_connected(&mut self) {
        self.failures = 0;
        self.state = LinkState::Connected;
    }

    /// Register a failure and return how long to wait before the next try.
    pub fn on_error(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.max_attempts {
            self.state = LinkState::Degraded;
            self.degraded_backoff
        } else {
            self.state = LinkState::Connecting;
            self.retry_backoff
        }
    }
}

// ---------------------------------------------------------------------------
// Feedback channel
// ---------------------------------------------------------------------------

/// Publishes feedback JSON to `<prefix>/<zone_id>/feedback`.
#[derive(Clone)]
pub struct MqttFeedback {
    client: AsyncClient,
    topic: String,
}

impl MqttFeedback {
    pub fn new(client: AsyncClient, topic: String) -> Self {
        Self { client, topic }
    }
}

impl FeedbackChannel for MqttFeedback {
    async fn publish(&self, event: &ActuationEvent) -> Result<(), PublishError> {
        let payload = encode(event)?;
        // Non-blocking: fails when the request queue is full.
        self.client
            .try_publish(&self.topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Command intake
// ---------------------------------------------------------------------------

/// Non-blocking view over the command queue for [`CommandChannel`].
pub struct QueuedCommands<'a>(pub &'a mut mpsc::Receiver<RawMessage>);

impl CommandChannel for QueuedCommands<'_> {
    fn next_message(&mut self) -> Option<RawMessage> {
        match self.0.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// Queue an inbound command without blocking the event loop. A full queue
/// drops the message so keep-alives keep flowing; returns `false` only once
/// the consumer is gone.
fn forward_command(tx: &mpsc::Sender<RawMessage>, msg: RawMessage) -> bool {
    match tx.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(msg)) => {
            warn!(topic = %msg.topic, "command queue full; dropping message");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Drive the MQTT event loop forever, forwarding command publishes to `tx`.
/// Intended to be `tokio::spawn`-ed from main.
pub async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    command_topic: String,
    tx: mpsc::Sender<RawMessage>,
    shared: SharedState,
    mut monitor: LinkMonitor,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                debug!(topic = %p.topic, bytes = p.payload.len(), "mqtt publish received");
                let msg = RawMessage::new(p.topic.clone(), p.payload.to_vec());
                if !forward_command(&tx, msg) {
                    warn!("command queue closed; stopping mqtt loop");
                    return;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                monitor.on_connected();
                info!(topic = %command_topic, "mqtt connected");
                // Subscribe on every ConnAck so a clean-session reconnect
                // gets the subscription back.
                if let Err(e) = client.subscribe(&command_topic, QoS::AtLeastOnce).await {
                    error!(error = %e, "mqtt subscribe failed");
                }
                let mut st = shared.write().await;
                st.record_link(monitor.state(), "mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.record_link(LinkState::Connecting, "mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                let delay = monitor.on_error();
                let state = monitor.state();
                if state == LinkState::Degraded {
                    error!(
                        error = %e,
                        failures = monitor.failures(),
                        retry_in_secs = delay.as_secs(),
                        "mqtt link degraded — retrying on long backoff"
                    );
                } else {
                    warn!(error = %e, failures = monitor.failures(), "mqtt error; reconnecting");
                }

                {
                    let mut st = shared.write().await;
                    st.record_link(state, format!("mqtt error: {e}"));
                }

                sleep(delay).await;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
