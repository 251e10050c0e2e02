//! REST adapter for the remote plant service: threshold fetches, telemetry
//! posts, and the action log.
//!
//! Timeouts live on the shared `reqwest::Client`, so a dead server costs at
//! most `http_timeout_secs` per call.

use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use irrigation_engine::model::{iso8601, on_off, Outcome, Trigger};
use irrigation_engine::ports::{FeedbackChannel, RemoteConfigProvider, TelemetrySink};
use irrigation_engine::{
    ActuationEvent, FetchError, PublishError, TelemetryPayload, ThresholdPayload,
};

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("irrigation-edge/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn zone_plants_url(&self, zone_id: &str) -> String {
        format!("{}/api/v1/zones/{zone_id}/plants", self.base_url)
    }

    pub fn telemetry_url(&self) -> String {
        format!("{}/api/v1/sensor-data", self.base_url)
    }

    pub fn action_log_url(&self, actuator: &str) -> String {
        format!("{}/api/v1/logs/action/{actuator}", self.base_url)
    }

    async fn post_json<T: Serialize>(&self, url: &str, body: &T) -> Result<(), PublishError> {
        debug!("POST {url}");
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(PublishError::Rejected(status.as_u16()))
        }
    }
}

impl RemoteConfigProvider for RestClient {
    async fn fetch_thresholds(&self, zone_id: &str) -> Result<ThresholdPayload, FetchError> {
        let url = self.zone_plants_url(zone_id);
        debug!("GET {url}");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        ThresholdPayload::parse(&body)
    }
}

impl TelemetrySink for RestClient {
    async fn publish(&self, payload: &TelemetryPayload) -> Result<(), PublishError> {
        self.post_json(&self.telemetry_url(), payload).await
    }
}

// ---------------------------------------------------------------------------
// Action log
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/logs/action/{actuator}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLogEntry {
    pub action: &'static str,
    pub actuator_id: String,
    pub plant_id: String,
    pub trigger: &'static str,
    pub zone: String,
    pub trigger_by: &'static str,
    pub timestamp: String,
}

impl ActionLogEntry {
    pub fn new(event: &ActuationEvent, plant_id: &str) -> Self {
        Self {
            action: on_off(event.new_state),
            actuator_id: event.actuator.to_string(),
            plant_id: plant_id.to_string(),
            trigger: event.source.as_str(),
            zone: event.zone.clone(),
            trigger_by: match event.trigger {
                Trigger::System => "SYSTEM",
                Trigger::User => "USER",
            },
            timestamp: iso8601(event.timestamp),
        }
    }
}

/// Mirrors successful actuations into the remote action log. Failed
/// attempts only go to MQTT feedback.
pub struct RestActionLog {
    client: RestClient,
    plant_id: String,
}

impl RestActionLog {
    pub fn new(client: RestClient, plant_id: impl Into<String>) -> Self {
        Self {
            client,
            plant_id: plant_id.into(),
        }
    }
}

impl FeedbackChannel for RestActionLog {
    async fn publish(&self, event: &ActuationEvent) -> Result<(), PublishError> {
        if event.outcome == Outcome::Fail {
            return Ok(());
        }
        let entry = ActionLogEntry::new(event, &self.plant_id);
        let url = self.client.action_log_url(event.actuator.as_str());
        self.client.post_json(&url, &entry).await
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use irrigation_engine::ActuatorId;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    type Posted = Arc<Mutex<Vec<(String, serde_json::Value)>>>;

    const ZONE_PLANTS_BODY: &str = r#"{
        "plants": [
            {
                "plantId": "basil",
                "moisturePin": 34,
                "thresholds": {
                    "moisture": {"min": 35, "max": 75},
                    "temperature": {"min": 12, "max": 27},
                    "light": {"min": 250, "max": 2200},
                    "airQuality": {"min": 0, "max": 350}
                }
            },
            {
                "plantId": "mint",
                "moisturePin": 35,
                "thresholds": {
                    "moisture": {"min": 40, "max": 85},
                    "temperature": {"min": 12, "max": 27},
                    "light": {"min": 250, "max": 2200},
                    "airQuality": {"min": 0, "max": 350}
                }
            }
        ]
    }"#;

    /// Serve a tiny stand-in for the plant service on an ephemeral port.
    async fn spawn_server() -> (String, Posted) {
        let posted: Posted = Arc::default();

        async fn record(
            State(posted): State<Posted>,
            uri: axum::http::Uri,
            Json(body): Json<serde_json::Value>,
        ) -> StatusCode {
            posted.lock().await.push((uri.path().to_string(), body));
            StatusCode::CREATED
        }

        let app = Router::new()
            .route("/api/v1/zones/zone1/plants", get(|| async { ZONE_PLANTS_BODY }))
            .route("/api/v1/zones/broken/plants", get(|| async { "{not json" }))
            .route("/api/v1/sensor-data", post(record))
            .route("/api/v1/logs/action/{actuator}", post(record))
            .with_state(posted.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), posted)
    }

    fn client(base: &str) -> RestClient {
        RestClient::new(base, Duration::from_secs(2)).unwrap()
    }

    fn event(outcome: Outcome) -> ActuationEvent {
        ActuationEvent::new(ActuatorId::Pump, true, Trigger::System, "zone1", outcome)
    }

    // -- URLs ---------------------------------------------------------------

    #[test]
    fn urls_strip_trailing_slash() {
        let c = client("http://api.local:3000/");
        assert_eq!(
            c.zone_plants_url("zone1"),
            "http://api.local:3000/api/v1/zones/zone1/plants"
        );
        assert_eq!(c.telemetry_url(), "http://api.local:3000/api/v1/sensor-data");
        assert_eq!(
            c.action_log_url("fan"),
            "http://api.local:3000/api/v1/logs/action/fan"
        );
    }

    // -- ActionLogEntry -----------------------------------------------------

    #[test]
    fn action_log_entry_shape() {
        let mut ev = event(Outcome::Success);
        ev.trigger = Trigger::User;
        ev.source = Trigger::User.source();
        let json = serde_json::to_value(ActionLogEntry::new(&ev, "basil")).unwrap();

        assert_eq!(json["action"], "ON");
        assert_eq!(json["actuatorId"], "pump");
        assert_eq!(json["plantId"], "basil");
        assert_eq!(json["trigger"], "manual");
        assert_eq!(json["triggerBy"], "USER");
        assert_eq!(json["zone"], "zone1");
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    // -- RemoteConfigProvider -----------------------------------------------

    #[tokio::test]
    async fn fetches_zone_plant_list() {
        let (base, _) = spawn_server().await;
        let payload = client(&base).fetch_thresholds("zone1").await.unwrap();
        assert_eq!(payload.plants.len(), 2);
        let mint = payload.plant("mint").unwrap();
        assert_eq!(mint.moisture_pin, Some(35));
        assert_eq!(mint.thresholds.moisture.max, 85.0);
        assert_eq!(payload.plants[0].thresholds.air_quality.max, 350.0);
    }

    #[tokio::test]
    async fn unknown_zone_maps_to_status() {
        let (base, _) = spawn_server().await;
        let err = client(&base)
            .fetch_thresholds("ghost")
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Status(404));
    }

    #[tokio::test]
    async fn malformed_body_maps_to_parse() {
        let (base, _) = spawn_server().await;
        let err = client(&base)
            .fetch_thresholds("broken")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
    }

    #[tokio::test]
    async fn unreachable_server_maps_to_transport() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}"))
            .fetch_thresholds("zone1")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }

    // -- TelemetrySink / action log -----------------------------------------

    #[tokio::test]
    async fn telemetry_posts_json() {
        let (base, posted) = spawn_server().await;
        let payload = TelemetryPayload {
            sensor_record_id: "basil@2024-05-01T08:30:00Z".into(),
            last_updated: "2024-05-01T08:30:00Z".into(),
            plant_id: "basil".into(),
            sensors: Default::default(),
            automation: Default::default(),
            user_id: "u1".into(),
        };
        TelemetrySink::publish(&client(&base), &payload).await.unwrap();

        let posted = posted.lock().await;
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0, "/api/v1/sensor-data");
        assert_eq!(posted[0].1["plantId"], "basil");
    }

    #[tokio::test]
    async fn rejected_post_maps_to_status() {
        let (base, _) = spawn_server().await;
        let log = RestActionLog::new(client(&format!("{base}/missing")), "basil");
        assert_eq!(
            log.publish(&event(Outcome::Success)).await,
            Err(PublishError::Rejected(404))
        );
    }

    #[tokio::test]
    async fn action_log_skips_failed_attempts() {
        let (base, posted) = spawn_server().await;
        let log = RestActionLog::new(client(&base), "basil");

        log.publish(&event(Outcome::Fail)).await.unwrap();
        log.publish(&event(Outcome::Success)).await.unwrap();

        let posted = posted.lock().await;
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0, "/api/v1/logs/action/pump");
        assert_eq!(posted[0].1["action"], "ON");
    }
}
