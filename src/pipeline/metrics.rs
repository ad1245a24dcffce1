use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

// Unified dispatch metrics (single dispatcher per process)
static BATCHES_SENT: AtomicU64 = AtomicU64::new(0);
static BATCHES_FAILED: AtomicU64 = AtomicU64::new(0);
static EVENTS_DELIVERED: AtomicU64 = AtomicU64::new(0);
static BACKLOG_DEPTH: AtomicU64 = AtomicU64::new(0);
// Epoch seconds of last successful flush; 0 means None
static LAST_FLUSH_AT_EPOCH: AtomicI64 = AtomicI64::new(0);

pub fn record_sent(event_count: usize, at: DateTime<Utc>) {
    let _ = BATCHES_SENT.fetch_add(1, Ordering::Relaxed);
    let _ = EVENTS_DELIVERED.fetch_add(event_count as u64, Ordering::Relaxed);
    LAST_FLUSH_AT_EPOCH.store(at.timestamp(), Ordering::Relaxed);
    publish();
}

pub fn record_failed() {
    let _ = BATCHES_FAILED.fetch_add(1, Ordering::Relaxed);
    publish();
}

pub fn set_backlog_depth(depth: usize) {
    BACKLOG_DEPTH.store(depth as u64, Ordering::Relaxed);
    publish();
}

#[derive(Clone, Debug, Default)]
pub struct DispatchMetrics {
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub events_delivered: u64,
    pub backlog_depth: u64,
    pub last_flush_at: Option<DateTime<Utc>>,
}

pub fn dispatch_metrics() -> DispatchMetrics {
    let secs = LAST_FLUSH_AT_EPOCH.load(Ordering::Relaxed);
    let last = if secs > 0 {
        Utc.timestamp_opt(secs, 0).single()
    } else {
        None
    };
    DispatchMetrics {
        batches_sent: BATCHES_SENT.load(Ordering::Relaxed),
        batches_failed: BATCHES_FAILED.load(Ordering::Relaxed),
        events_delivered: EVENTS_DELIVERED.load(Ordering::Relaxed),
        backlog_depth: BACKLOG_DEPTH.load(Ordering::Relaxed),
        last_flush_at: last,
    }
}

static METRICS_WATCH: Lazy<(
    tokio::sync::watch::Sender<DispatchMetrics>,
    tokio::sync::watch::Receiver<DispatchMetrics>,
)> = Lazy::new(|| tokio::sync::watch::channel(DispatchMetrics::default()));

fn publish() {
    let _ = METRICS_WATCH.0.send(dispatch_metrics());
}

/// Watch handle for observers; the pipeline thread reads it for its
/// periodic status log.
pub fn dispatch_metrics_watch() -> tokio::sync::watch::Receiver<DispatchMetrics> {
    METRICS_WATCH.1.clone()
}
