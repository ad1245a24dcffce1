use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::SessionContext;

/// One sampled keystroke inside a coalesced `keystrokes` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySample {
    pub key: String,
    pub code: String,
    pub target: Option<String>,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// One sampled pointer position inside a coalesced `mouse_movements` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointerSample {
    pub x: i32,
    pub y: i32,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// One sampled scroll offset inside a coalesced `scroll_activity` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrollSample {
    #[serde(rename = "scrollY")]
    pub scroll_y: i64,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub load_time_ms: u32,
    pub dom_ready_ms: u32,
}

/// Type-specific event data. The tag doubles as the wire `eventType`, so
/// every payload shape is statically known from its kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    SessionStart {
        initial_url: String,
    },
    SessionEnd {
        duration_ms: i64,
        final_url: String,
    },
    MouseClick {
        x: i32,
        y: i32,
        target: Option<String>,
    },
    MouseMovements {
        movements: Vec<PointerSample>,
    },
    Keystrokes {
        keys: Vec<KeySample>,
    },
    ScrollActivity {
        scrolls: Vec<ScrollSample>,
    },
    TabVisibility {
        visible: bool,
    },
    WindowFocus {
        focused: bool,
    },
    Navigation {
        url: String,
    },
    PerformanceMetrics {
        sample: PerformanceSample,
    },
    Heartbeat {
        active: bool,
    },
    UserIdle {},
    ScreenshotCaptured {
        image_base64: String,
        format: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::SessionStart { .. } => "session_start",
            EventPayload::SessionEnd { .. } => "session_end",
            EventPayload::MouseClick { .. } => "mouse_click",
            EventPayload::MouseMovements { .. } => "mouse_movements",
            EventPayload::Keystrokes { .. } => "keystrokes",
            EventPayload::ScrollActivity { .. } => "scroll_activity",
            EventPayload::TabVisibility { .. } => "tab_visibility",
            EventPayload::WindowFocus { .. } => "window_focus",
            EventPayload::Navigation { .. } => "navigation",
            EventPayload::PerformanceMetrics { .. } => "performance_metrics",
            EventPayload::Heartbeat { .. } => "heartbeat",
            EventPayload::UserIdle {} => "user_idle",
            EventPayload::ScreenshotCaptured { .. } => "screenshot_captured",
        }
    }
}

/// One normalized observation. Every event carries the full identity triple
/// plus the observation time and page location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub session_id: String,
    pub user_id: String,
    pub device_id: String,
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub url: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl TelemetryEvent {
    pub fn new(
        ctx: &SessionContext,
        timestamp: DateTime<Utc>,
        url: String,
        payload: EventPayload,
    ) -> Self {
        Self {
            session_id: ctx.session_id.clone(),
            user_id: ctx.user_id.clone(),
            device_id: ctx.device_id.clone(),
            timestamp,
            url,
            payload,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SessionContext;

    fn ctx() -> SessionContext {
        SessionContext::new(
            "session_a".into(),
            "user_b".into(),
            "device_c".into(),
            Utc::now(),
        )
    }

    #[test]
    fn test_event_serializes_with_camel_case_identity_and_ms_timestamp() {
        let ts = Utc::now();
        let ev = TelemetryEvent::new(
            &ctx(),
            ts,
            "https://example.test/watch".into(),
            EventPayload::MouseClick {
                x: 10,
                y: 20,
                target: Some("BUTTON".into()),
            },
        );
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["sessionId"], "session_a");
        assert_eq!(v["userId"], "user_b");
        assert_eq!(v["deviceId"], "device_c");
        assert_eq!(v["timestamp"], serde_json::json!(ts.timestamp_millis()));
        assert_eq!(v["eventType"], "mouse_click");
        assert_eq!(v["data"]["x"], 10);
    }

    #[test]
    fn test_payload_kind_matches_wire_tag() {
        let payloads = vec![
            EventPayload::Heartbeat { active: true },
            EventPayload::UserIdle {},
            EventPayload::Keystrokes { keys: vec![] },
        ];
        for p in payloads {
            let v = serde_json::to_value(&p).unwrap();
            assert_eq!(v["eventType"], p.kind());
        }
    }

    #[test]
    fn test_event_round_trips_through_json() {
        let ev = TelemetryEvent::new(
            &ctx(),
            Utc::now(),
            "https://example.test/".into(),
            EventPayload::ScrollActivity {
                scrolls: vec![ScrollSample {
                    scroll_y: 420,
                    timestamp: Utc::now(),
                }],
            },
        );
        let text = serde_json::to_string(&ev).unwrap();
        let back: TelemetryEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back.kind(), "scroll_activity");
        assert_eq!(back.session_id, ev.session_id);
    }
}
