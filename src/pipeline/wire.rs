use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::SessionContext;
use crate::pipeline::model::{EventPayload, TelemetryEvent};

/// Identity headers sent redundantly with every POST so the collector can
/// correlate without parsing the body.
pub const HEADER_SESSION: &str = "X-Session";
pub const HEADER_USER: &str = "X-User";
pub const HEADER_DEVICE: &str = "X-Device";

/// The JSON body of one flush cycle. Keystroke and screenshot events are
/// kept in their own arrays by collector convention; either may be empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorPayload {
    pub user_id: String,
    pub session_id: String,
    pub device_id: String,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub events: Vec<TelemetryEvent>,
    pub keystrokes: Vec<TelemetryEvent>,
    pub screenshots: Vec<TelemetryEvent>,
}

impl CollectorPayload {
    pub fn from_batch(
        ctx: &SessionContext,
        sent_at: DateTime<Utc>,
        batch: Vec<TelemetryEvent>,
    ) -> Self {
        let mut events = Vec::with_capacity(batch.len());
        let mut keystrokes = Vec::new();
        let mut screenshots = Vec::new();
        for event in batch {
            match event.payload {
                EventPayload::Keystrokes { .. } => keystrokes.push(event),
                EventPayload::ScreenshotCaptured { .. } => screenshots.push(event),
                _ => events.push(event),
            }
        }
        Self {
            user_id: ctx.user_id.clone(),
            session_id: ctx.session_id.clone(),
            device_id: ctx.device_id.clone(),
            timestamp: sent_at,
            events,
            keystrokes,
            screenshots,
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.len() + self.keystrokes.len() + self.screenshots.len()
    }

    /// Recover the batched events, e.g. to park them in the backlog after a
    /// failed send. Order across the three arrays is not preserved; the
    /// collector treats events independently.
    pub fn into_events(self) -> Vec<TelemetryEvent> {
        let mut all = self.events;
        all.extend(self.keystrokes);
        all.extend(self.screenshots);
        all
    }
}
