use chrono::{DateTime, Duration, Utc};

use crate::identity::SessionContext;
use crate::pipeline::metrics;
use crate::pipeline::model::TelemetryEvent;
use crate::pipeline::wire::CollectorPayload;
use crate::storage::{BacklogStore, PendingBatch};
use crate::transport::CollectorClient;
use crate::util::logging::{debug, error, info, warn};

const BACKLOG_ENDPOINT: &str = "events";

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub batch_size: usize,
    pub flush_interval_secs: u64,
    pub backlog_cap: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Timer,
    Shutdown,
}

/// Owns the outgoing queue and the durable backlog.
///
/// A flush swaps the queue out before any network I/O, sends it as one
/// payload, and parks it in the backlog on failure. Any cycle that does
/// not itself fail also retries the whole backlog. Delivery is
/// at-least-once; a send that times out after reaching the collector will
/// be replayed with identical session/timestamp pairs, and dedup is left
/// to the collector.
pub struct BatchDispatcher {
    ctx: SessionContext,
    config: DispatchConfig,
    client: Box<dyn CollectorClient>,
    store: Box<dyn BacklogStore>,
    queue: Vec<TelemetryEvent>,
    backlog: Vec<PendingBatch>,
    last_flush: DateTime<Utc>,
}

impl BatchDispatcher {
    pub fn new(
        ctx: SessionContext,
        config: DispatchConfig,
        client: Box<dyn CollectorClient>,
        mut store: Box<dyn BacklogStore>,
        now: DateTime<Utc>,
    ) -> Self {
        // Hydrate batches a previous run failed to deliver.
        let backlog = match store.load() {
            Ok(batches) => {
                if !batches.is_empty() {
                    info!("Hydrated {} pending batches from backlog", batches.len());
                }
                batches
            }
            Err(e) => {
                error!("Failed to hydrate backlog, starting empty: {}", e);
                Vec::new()
            }
        };
        metrics::set_backlog_depth(backlog.len());

        Self {
            ctx,
            config,
            client,
            store,
            queue: Vec::new(),
            backlog,
            last_flush: now,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Append events to the queue, flushing when the size threshold is hit.
    /// An event whose payload cannot be serialized is dropped on its own;
    /// the rest proceed.
    pub fn enqueue(&mut self, events: Vec<TelemetryEvent>, now: DateTime<Utc>) {
        for event in events {
            if let Err(e) = serde_json::to_value(&event) {
                warn!("Dropping unserializable {} event: {}", event.kind(), e);
                continue;
            }
            self.queue.push(event);
            if self.queue.len() >= self.config.batch_size {
                self.flush(now, FlushReason::Size);
            }
        }
    }

    /// Timer trigger: flush once the interval has elapsed since the last
    /// flush, whether or not the queue is full. Empty cycles still retry
    /// the backlog, which is what drains it after an outage.
    pub fn on_tick(&mut self, now: DateTime<Utc>) {
        if now - self.last_flush >= Duration::seconds(self.config.flush_interval_secs as i64) {
            self.flush(now, FlushReason::Timer);
        }
    }

    /// Best-effort final flush at teardown; a failure parks the batch in
    /// the backlog exactly like any other failed send.
    pub fn shutdown(&mut self, now: DateTime<Utc>) {
        self.flush(now, FlushReason::Shutdown);
    }

    fn flush(&mut self, now: DateTime<Utc>, reason: FlushReason) {
        self.last_flush = now;

        if self.queue.is_empty() {
            self.retry_backlog(now);
            return;
        }

        // Swap before any I/O: events arriving later go into a fresh
        // queue, never into the in-flight batch.
        let batch = std::mem::take(&mut self.queue);
        let count = batch.len();
        let payload = CollectorPayload::from_batch(&self.ctx, now, batch);

        match self.client.send(&payload) {
            Ok(()) => {
                debug!("Flushed {} events ({:?})", count, reason);
                metrics::record_sent(count, now);
                self.retry_backlog(now);
            }
            Err(e) => {
                warn!("Delivery of {} events failed ({:?}): {}", count, reason, e);
                metrics::record_failed();
                self.park(payload.into_events(), now);
                // The network just failed; leave the backlog for the next
                // cycle instead of burning retries now.
            }
        }
    }

    fn park(&mut self, events: Vec<TelemetryEvent>, now: DateTime<Utc>) {
        let mut next = self.backlog.clone();
        next.push(PendingBatch {
            endpoint: BACKLOG_ENDPOINT.to_string(),
            events,
            failed_at: now,
        });
        while next.len() > self.config.backlog_cap {
            let evicted = next.remove(0);
            warn!(
                "Backlog at cap {}, evicting oldest batch ({} events from {})",
                self.config.backlog_cap,
                evicted.events.len(),
                evicted.failed_at
            );
        }

        match self.store.save(&next) {
            Ok(()) => {
                self.backlog = next;
                metrics::set_backlog_depth(self.backlog.len());
            }
            Err(e) => {
                // Least-bad outcome: keep running, accept the loss.
                error!("Failed to persist backlog, dropping batch: {}", e);
            }
        }
    }

    fn retry_backlog(&mut self, now: DateTime<Utc>) {
        if self.backlog.is_empty() {
            return;
        }

        let pending = std::mem::take(&mut self.backlog);
        let total = pending.len();
        let mut remaining: Vec<PendingBatch> = Vec::new();

        for batch in pending {
            let endpoint = batch.endpoint.clone();
            let failed_at = batch.failed_at;
            let count = batch.events.len();
            let payload = CollectorPayload::from_batch(&self.ctx, now, batch.events);
            match self.client.send(&payload) {
                Ok(()) => {
                    metrics::record_sent(count, now);
                }
                Err(e) => {
                    debug!("Backlog batch from {} still undeliverable: {}", failed_at, e);
                    remaining.push(PendingBatch {
                        endpoint,
                        events: payload.into_events(),
                        failed_at,
                    });
                }
            }
        }

        let delivered = total - remaining.len();
        if delivered > 0 {
            info!("Resent {}/{} backlog batches", delivered, total);
        }

        let result = if remaining.is_empty() {
            self.store.clear()
        } else {
            self.store.save(&remaining)
        };
        if let Err(e) = result {
            error!("Failed to update persisted backlog: {}", e);
        }
        self.backlog = remaining;
        metrics::set_backlog_depth(self.backlog.len());
    }
}
