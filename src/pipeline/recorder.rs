use chrono::{DateTime, Duration, Utc};

use crate::identity::SessionContext;
use crate::pipeline::model::{
    EventPayload, KeySample, PointerSample, ScrollSample, TelemetryEvent,
};
use crate::pipeline::signals::RawSignal;
use crate::util::logging::trace;

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub keystroke_coalesce: usize,
    pub pointer_coalesce: usize,
    pub scroll_coalesce: usize,
    pub idle_threshold_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub residue_flush_secs: u64,
}

/// Normalizes raw interaction signals into telemetry events.
///
/// High-frequency sources (keystrokes, pointer movement, scroll) are
/// buffered and emitted as one coalesced event per threshold; everything
/// else passes through one-to-one. Also owns idle detection and the
/// heartbeat cadence. Nothing here returns an error to the signal source;
/// all time comes in as an argument so tests never sleep.
pub struct EventRecorder {
    ctx: SessionContext,
    config: RecorderConfig,
    current_url: String,
    keys: Vec<KeySample>,
    pointer: Vec<PointerSample>,
    scrolls: Vec<ScrollSample>,
    is_active: bool,
    last_interaction: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
    last_residue_flush: DateTime<Utc>,
}

impl EventRecorder {
    pub fn new(ctx: SessionContext, config: RecorderConfig, now: DateTime<Utc>) -> Self {
        Self {
            ctx,
            config,
            current_url: "about:blank".to_string(),
            keys: Vec::new(),
            pointer: Vec::new(),
            scrolls: Vec::new(),
            is_active: true,
            last_interaction: now,
            last_heartbeat: now,
            last_residue_flush: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn current_url(&self) -> &str {
        &self.current_url
    }

    fn event(&self, now: DateTime<Utc>, payload: EventPayload) -> TelemetryEvent {
        TelemetryEvent::new(&self.ctx, now, self.current_url.clone(), payload)
    }

    /// The `session_start` marker, emitted once when the pipeline comes up.
    pub fn start(&mut self, now: DateTime<Utc>) -> TelemetryEvent {
        self.event(
            now,
            EventPayload::SessionStart {
                initial_url: self.current_url.clone(),
            },
        )
    }

    /// Convert one raw signal into zero or more events. Coalesced sources
    /// produce nothing until their buffer reaches its threshold.
    pub fn observe(&mut self, signal: RawSignal, now: DateTime<Utc>) -> Vec<TelemetryEvent> {
        if signal.is_interaction() {
            self.last_interaction = now;
            self.is_active = true;
        }

        match signal {
            RawSignal::KeyDown { key, code, target } => {
                self.keys.push(KeySample {
                    key,
                    code,
                    target,
                    timestamp: now,
                });
                if self.keys.len() >= self.config.keystroke_coalesce {
                    return self.flush_keys(now).into_iter().collect();
                }
                Vec::new()
            }
            RawSignal::PointerMove { x, y } => {
                self.pointer.push(PointerSample {
                    x,
                    y,
                    timestamp: now,
                });
                if self.pointer.len() >= self.config.pointer_coalesce {
                    return self.flush_pointer(now).into_iter().collect();
                }
                Vec::new()
            }
            RawSignal::Scroll { y } => {
                self.scrolls.push(ScrollSample {
                    scroll_y: y,
                    timestamp: now,
                });
                if self.scrolls.len() >= self.config.scroll_coalesce {
                    return self.flush_scrolls(now).into_iter().collect();
                }
                Vec::new()
            }
            RawSignal::Click { x, y, target } => {
                vec![self.event(now, EventPayload::MouseClick { x, y, target })]
            }
            RawSignal::Visibility { visible } => {
                vec![self.event(now, EventPayload::TabVisibility { visible })]
            }
            RawSignal::Focus { focused } => {
                self.is_active = focused;
                if focused {
                    self.last_interaction = now;
                }
                vec![self.event(now, EventPayload::WindowFocus { focused })]
            }
            RawSignal::Navigation { url } => {
                self.current_url = url.clone();
                vec![self.event(now, EventPayload::Navigation { url })]
            }
            RawSignal::PerfSample { sample } => {
                vec![self.event(now, EventPayload::PerformanceMetrics { sample })]
            }
            RawSignal::Screenshot {
                image_base64,
                format,
            } => vec![self.event(
                now,
                EventPayload::ScreenshotCaptured {
                    image_base64,
                    format,
                },
            )],
        }
    }

    /// Periodic work: one `user_idle` per quiet period, heartbeats, and a
    /// residue flush for below-threshold coalescing buffers.
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Vec<TelemetryEvent> {
        let mut out = Vec::new();

        let quiet = now - self.last_interaction;
        if self.is_active && quiet >= Duration::seconds(self.config.idle_threshold_secs as i64) {
            trace!("No interaction for {}s, marking idle", quiet.num_seconds());
            self.is_active = false;
            out.push(self.event(now, EventPayload::UserIdle {}));
        }

        if now - self.last_heartbeat
            >= Duration::seconds(self.config.heartbeat_interval_secs as i64)
        {
            self.last_heartbeat = now;
            out.push(self.event(
                now,
                EventPayload::Heartbeat {
                    active: self.is_active,
                },
            ));
        }

        if now - self.last_residue_flush
            >= Duration::seconds(self.config.residue_flush_secs as i64)
        {
            self.last_residue_flush = now;
            out.extend(self.flush_buffers(now));
        }

        out
    }

    /// Flush whatever the coalescing buffers hold, regardless of threshold.
    pub fn flush_buffers(&mut self, now: DateTime<Utc>) -> Vec<TelemetryEvent> {
        let mut out = Vec::new();
        out.extend(self.flush_keys(now));
        out.extend(self.flush_pointer(now));
        out.extend(self.flush_scrolls(now));
        out
    }

    /// Final flush plus the `session_end` marker.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> Vec<TelemetryEvent> {
        let mut out = self.flush_buffers(now);
        out.push(self.event(
            now,
            EventPayload::SessionEnd {
                duration_ms: (now - self.ctx.started_at).num_milliseconds(),
                final_url: self.current_url.clone(),
            },
        ));
        out
    }

    fn flush_keys(&mut self, now: DateTime<Utc>) -> Option<TelemetryEvent> {
        if self.keys.is_empty() {
            return None;
        }
        let keys = std::mem::take(&mut self.keys);
        Some(self.event(now, EventPayload::Keystrokes { keys }))
    }

    fn flush_pointer(&mut self, now: DateTime<Utc>) -> Option<TelemetryEvent> {
        if self.pointer.is_empty() {
            return None;
        }
        let movements = std::mem::take(&mut self.pointer);
        Some(self.event(now, EventPayload::MouseMovements { movements }))
    }

    fn flush_scrolls(&mut self, now: DateTime<Utc>) -> Option<TelemetryEvent> {
        if self.scrolls.is_empty() {
            return None;
        }
        let scrolls = std::mem::take(&mut self.scrolls);
        Some(self.event(now, EventPayload::ScrollActivity { scrolls }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(started_at: DateTime<Utc>) -> SessionContext {
        SessionContext::new(
            "session_a".into(),
            "user_b".into(),
            "device_c".into(),
            started_at,
        )
    }

    fn config() -> RecorderConfig {
        RecorderConfig {
            keystroke_coalesce: 50,
            pointer_coalesce: 100,
            scroll_coalesce: 50,
            idle_threshold_secs: 30,
            heartbeat_interval_secs: 5,
            residue_flush_secs: 30,
        }
    }

    fn recorder(t0: DateTime<Utc>) -> EventRecorder {
        EventRecorder::new(ctx(t0), config(), t0)
    }

    fn key(n: u32) -> RawSignal {
        RawSignal::KeyDown {
            key: format!("{}", n % 10),
            code: format!("Digit{}", n % 10),
            target: Some("INPUT".into()),
        }
    }

    #[test]
    fn test_keystrokes_coalesce_at_threshold() {
        let t0 = Utc::now();
        let mut rec = recorder(t0);

        for i in 0..49 {
            assert!(rec.observe(key(i), t0).is_empty());
        }
        let out = rec.observe(key(49), t0);
        assert_eq!(out.len(), 1);
        match &out[0].payload {
            EventPayload::Keystrokes { keys } => assert_eq!(keys.len(), 50),
            other => panic!("expected keystrokes payload, got {:?}", other.kind()),
        }
        // Buffer starts fresh after the flush.
        assert!(rec.observe(key(50), t0).is_empty());
    }

    #[test]
    fn test_pointer_and_scroll_coalesce_at_their_thresholds() {
        let t0 = Utc::now();
        let mut rec = recorder(t0);

        for i in 0..99 {
            assert!(rec.observe(RawSignal::PointerMove { x: i, y: i }, t0).is_empty());
        }
        let out = rec.observe(RawSignal::PointerMove { x: 99, y: 99 }, t0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind(), "mouse_movements");

        for i in 0..49 {
            assert!(rec.observe(RawSignal::Scroll { y: i }, t0).is_empty());
        }
        let out = rec.observe(RawSignal::Scroll { y: 49 }, t0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind(), "scroll_activity");
    }

    #[test]
    fn test_clicks_pass_through_one_to_one() {
        let t0 = Utc::now();
        let mut rec = recorder(t0);
        let mut produced = 0;
        for i in 0..12 {
            produced += rec
                .observe(
                    RawSignal::Click {
                        x: i,
                        y: i,
                        target: None,
                    },
                    t0,
                )
                .len();
        }
        assert_eq!(produced, 12);
    }

    #[test]
    fn test_idle_emitted_once_and_rearmed_by_interaction() {
        let t0 = Utc::now();
        let mut rec = recorder(t0);

        // Quiet for 31s: exactly one user_idle, not one per tick.
        let t1 = t0 + Duration::seconds(31);
        let out = rec.on_tick(t1);
        assert_eq!(
            out.iter().filter(|e| e.kind() == "user_idle").count(),
            1
        );
        assert!(!rec.is_active());

        let t2 = t1 + Duration::seconds(1);
        let out = rec.on_tick(t2);
        assert_eq!(out.iter().filter(|e| e.kind() == "user_idle").count(), 0);

        // Interaction re-arms idle detection.
        rec.observe(RawSignal::Click { x: 0, y: 0, target: None }, t2);
        assert!(rec.is_active());
        let t3 = t2 + Duration::seconds(31);
        let out = rec.on_tick(t3);
        assert_eq!(out.iter().filter(|e| e.kind() == "user_idle").count(), 1);
    }

    #[test]
    fn test_heartbeat_cadence_reports_active_flag() {
        let t0 = Utc::now();
        let mut rec = recorder(t0);

        assert!(rec.on_tick(t0 + Duration::seconds(4)).is_empty());
        let out = rec.on_tick(t0 + Duration::seconds(5));
        assert_eq!(out.len(), 1);
        match out[0].payload {
            EventPayload::Heartbeat { active } => assert!(active),
            _ => panic!("expected heartbeat"),
        }

        // After going idle, heartbeats report inactive.
        let t1 = t0 + Duration::seconds(40);
        let out = rec.on_tick(t1);
        let hb = out
            .iter()
            .find(|e| e.kind() == "heartbeat")
            .expect("heartbeat due");
        match hb.payload {
            EventPayload::Heartbeat { active } => assert!(!active),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_residue_flush_emits_below_threshold_buffers() {
        let t0 = Utc::now();
        let mut rec = recorder(t0);
        rec.observe(key(0), t0);
        rec.observe(RawSignal::Scroll { y: 1 }, t0);

        let out = rec.on_tick(t0 + Duration::seconds(30));
        let kinds: Vec<&str> = out.iter().map(|e| e.kind()).collect();
        assert!(kinds.contains(&"keystrokes"));
        assert!(kinds.contains(&"scroll_activity"));
        // Nothing left to flush on the next residue window.
        let out = rec.on_tick(t0 + Duration::seconds(60));
        assert!(!out.iter().any(|e| e.kind() == "keystrokes"));
    }

    #[test]
    fn test_navigation_updates_url_stamped_on_later_events() {
        let t0 = Utc::now();
        let mut rec = recorder(t0);
        let out = rec.observe(
            RawSignal::Navigation {
                url: "https://example.test/watch?v=abc".into(),
            },
            t0,
        );
        assert_eq!(out[0].kind(), "navigation");

        let out = rec.observe(RawSignal::Click { x: 1, y: 1, target: None }, t0);
        assert_eq!(out[0].url, "https://example.test/watch?v=abc");
    }

    #[test]
    fn test_finalize_flushes_buffers_and_ends_session() {
        let t0 = Utc::now();
        let mut rec = recorder(t0);
        rec.observe(key(0), t0);

        let out = rec.finalize(t0 + Duration::seconds(90));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].kind(), "keystrokes");
        match &out[1].payload {
            EventPayload::SessionEnd { duration_ms, .. } => {
                assert_eq!(*duration_ms, 90_000);
            }
            _ => panic!("expected session_end last"),
        }
    }
}
