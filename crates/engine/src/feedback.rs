//! Audit feedback for executed transitions.
//!
//! Reporting is fire-and-forget: the physical transition has already
//! happened, so a delivery failure is counted and logged but never undoes
//! anything.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::PublishError;
use crate::model::{iso8601, ActuationEvent, Outcome, Source, Trigger};
use crate::ports::FeedbackChannel;

// ---------------------------------------------------------------------------
// Wire message
// ---------------------------------------------------------------------------

/// `{"action", "triggeredBy", "source", "zone", "timestamp", "result"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackMsg {
    pub action: String,
    pub triggered_by: Trigger,
    pub source: Source,
    pub zone: String,
    pub timestamp: String,
    pub result: Outcome,
}

impl From<&ActuationEvent> for FeedbackMsg {
    fn from(e: &ActuationEvent) -> Self {
        Self {
            action: e.action(),
            triggered_by: e.trigger,
            source: e.source,
            zone: e.zone.clone(),
            timestamp: iso8601(e.timestamp),
            result: e.outcome,
        }
    }
}

/// Serialise an event into the feedback topic payload.
pub fn encode(event: &ActuationEvent) -> Result<Vec<u8>, PublishError> {
    serde_json::to_vec(&FeedbackMsg::from(event)).map_err(|e| PublishError::Encode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Published,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReporterStats {
    pub published: u64,
    pub failed: u64,
}

pub struct FeedbackReporter<F> {
    channel: F,
    stats: ReporterStats,
}

impl<F: FeedbackChannel> FeedbackReporter<F> {
    pub fn new(channel: F) -> Self {
        Self {
            channel,
            stats: ReporterStats::default(),
        }
    }

    pub async fn report(&mut self, event: ActuationEvent) -> ReportStatus {
        match self.channel.publish(&event).await {
            Ok(()) => {
                self.stats.published += 1;
                debug!(action = %event.action(), source = event.source.as_str(), "feedback published");
                ReportStatus::Published
            }
            Err(e) => {
                self.stats.failed += 1;
                warn!(
                    action = %event.action(),
                    error = %e,
                    failed_total = self.stats.failed,
                    "failed to publish actuator feedback"
                );
                ReportStatus::Failed
            }
        }
    }

    pub fn stats(&self) -> ReporterStats {
        self.stats
    }

    pub fn channel(&self) -> &F {
        &self.channel
    }
}

// ---------------------------------------------------------------------------
// Channel combinators
// ---------------------------------------------------------------------------

/// Publish to both channels; the first error wins but both are attempted.
impl<A: FeedbackChannel, B: FeedbackChannel> FeedbackChannel for (A, B) {
    async fn publish(&self, event: &ActuationEvent) -> Result<(), PublishError> {
        let first = self.0.publish(event).await;
        let second = self.1.publish(event).await;
        first.and(second)
    }
}

/// An absent channel accepts everything.
impl<F: FeedbackChannel> FeedbackChannel for Option<F> {
    async fn publish(&self, event: &ActuationEvent) -> Result<(), PublishError> {
        match self {
            Some(channel) => channel.publish(event).await,
            None => Ok(()),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActuatorId;
    use crate::testing::RecordingFeedback;
    use time::macros::datetime;

    fn event(outcome: Outcome) -> ActuationEvent {
        ActuationEvent {
            timestamp: datetime!(2024-05-01 08:30:00 UTC),
            ..ActuationEvent::new(ActuatorId::Pump, true, Trigger::System, "zone1", outcome)
        }
    }

    #[test]
    fn wire_message_is_field_exact() {
        let json: serde_json::Value = serde_json::from_slice(&encode(&event(Outcome::Success)).unwrap()).unwrap();
        assert_eq!(json["action"], "pump ON");
        assert_eq!(json["triggeredBy"], "SYSTEM");
        assert_eq!(json["source"], "auto");
        assert_eq!(json["zone"], "zone1");
        assert_eq!(json["timestamp"], "2024-05-01T08:30:00Z");
        assert_eq!(json["result"], "success");
        assert_eq!(json.as_object().unwrap().len(), 6);
    }

    #[test]
    fn manual_fail_event_wire_values() {
        let e = ActuationEvent::new(ActuatorId::Light, false, Trigger::User, "zone1", Outcome::Fail);
        let msg = FeedbackMsg::from(&e);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["action"], "light OFF");
        assert_eq!(json["triggeredBy"], "USER");
        assert_eq!(json["source"], "manual");
        assert_eq!(json["result"], "fail");
    }

    #[tokio::test]
    async fn report_counts_published() {
        let mut reporter = FeedbackReporter::new(RecordingFeedback::default());
        assert_eq!(reporter.report(event(Outcome::Success)).await, ReportStatus::Published);
        assert_eq!(reporter.stats(), ReporterStats { published: 1, failed: 0 });
        assert_eq!(reporter.channel().events().len(), 1);
    }

    #[tokio::test]
    async fn report_failure_is_counted_not_raised() {
        let mut reporter = FeedbackReporter::new(RecordingFeedback::failing());
        assert_eq!(reporter.report(event(Outcome::Success)).await, ReportStatus::Failed);
        assert_eq!(reporter.report(event(Outcome::Success)).await, ReportStatus::Failed);
        assert_eq!(reporter.stats(), ReporterStats { published: 0, failed: 2 });
    }

    #[tokio::test]
    async fn pair_publishes_to_both_and_reports_first_error() {
        let pair = (RecordingFeedback::failing(), RecordingFeedback::default());
        let result = pair.publish(&event(Outcome::Success)).await;
        assert!(result.is_err());
        assert_eq!(pair.1.events().len(), 1);
    }

    #[tokio::test]
    async fn absent_channel_is_success() {
        let none: Option<RecordingFeedback> = None;
        assert!(none.publish(&event(Outcome::Success)).await.is_ok());
    }
}
