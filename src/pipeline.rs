use anyhow::Result;
use chrono::Utc;
use crossbeam_channel::Receiver;
use std::time::Duration;

use crate::identity::SessionContext;
use crate::pipeline::dispatcher::{BatchDispatcher, DispatchConfig};
use crate::pipeline::recorder::{EventRecorder, RecorderConfig};
use crate::pipeline::runtime::{ThreadHandle, ThreadRegistry};
use crate::pipeline::signals::RawSignal;
use crate::storage::BacklogStore;
use crate::transport::CollectorClient;
use crate::util::config::AppConfig;
use crate::util::logging::{debug, info};

pub mod dispatcher;
pub mod metrics;
pub mod model;
pub mod recorder;
pub mod runtime;
pub mod signals;
pub mod wire;

const TICK_INTERVAL: Duration = Duration::from_millis(250);
const STATUS_LOG_INTERVAL_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub flush_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub idle_threshold_secs: u64,
    pub residue_flush_secs: u64,
    pub keystroke_coalesce: usize,
    pub pointer_coalesce: usize,
    pub scroll_coalesce: usize,
    pub backlog_cap: usize,
}

impl PipelineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            flush_interval_secs: config.flush_interval_secs,
            heartbeat_interval_secs: config.heartbeat_interval_secs,
            idle_threshold_secs: config.idle_threshold_secs,
            residue_flush_secs: config.residue_flush_secs,
            keystroke_coalesce: config.keystroke_coalesce,
            pointer_coalesce: config.pointer_coalesce,
            scroll_coalesce: config.scroll_coalesce,
            backlog_cap: config.backlog_cap,
        }
    }

    fn recorder(&self) -> RecorderConfig {
        RecorderConfig {
            keystroke_coalesce: self.keystroke_coalesce,
            pointer_coalesce: self.pointer_coalesce,
            scroll_coalesce: self.scroll_coalesce,
            idle_threshold_secs: self.idle_threshold_secs,
            heartbeat_interval_secs: self.heartbeat_interval_secs,
            residue_flush_secs: self.residue_flush_secs,
        }
    }

    fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            batch_size: self.batch_size,
            flush_interval_secs: self.flush_interval_secs,
            backlog_cap: self.backlog_cap,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PipelineCommand {
    Signal(RawSignal),
    Shutdown,
}

pub struct PipelineResources {
    pub ctx: SessionContext,
    pub client: Box<dyn CollectorClient>,
    pub store: Box<dyn BacklogStore>,
    pub command_rx: Receiver<PipelineCommand>,
}

/// Run recorder and dispatcher on one thread: all queue mutation is
/// synchronous there, so the queue swap in a flush cannot race with
/// arriving signals. The network send is the only slow point, bounded by
/// the client timeout.
pub fn spawn_pipeline(
    threads: &ThreadRegistry,
    config: PipelineConfig,
    resources: PipelineResources,
) -> Result<ThreadHandle> {
    let PipelineResources {
        ctx,
        client,
        store,
        command_rx,
    } = resources;

    let recorder_config = config.recorder();
    let dispatch_config = config.dispatch();

    threads.spawn("telemetry-pipeline", move || {
        info!("Telemetry pipeline thread started");
        let now = Utc::now();
        let mut recorder = EventRecorder::new(ctx.clone(), recorder_config, now);
        let mut dispatcher = BatchDispatcher::new(ctx, dispatch_config, client, store, now);

        dispatcher.enqueue(vec![recorder.start(now)], now);

        let ticker = crossbeam_channel::tick(TICK_INTERVAL);
        let mut signal_count = 0u64;
        let mut metrics_rx = metrics::dispatch_metrics_watch();
        let mut last_status = now;

        loop {
            crossbeam_channel::select! {
                recv(command_rx) -> msg => {
                    match msg {
                        Ok(PipelineCommand::Signal(signal)) => {
                            signal_count += 1;
                            debug!("Pipeline received signal #{}: {}", signal_count, signal.kind());
                            let now = Utc::now();
                            let events = recorder.observe(signal, now);
                            dispatcher.enqueue(events, now);
                        }
                        Ok(PipelineCommand::Shutdown) => {
                            info!("Pipeline received shutdown, finalizing session");
                            break;
                        }
                        Err(_) => {
                            info!("Signal source disconnected, finalizing session");
                            break;
                        }
                    }
                }
                recv(ticker) -> _ => {
                    let now = Utc::now();
                    let events = recorder.on_tick(now);
                    dispatcher.enqueue(events, now);
                    dispatcher.on_tick(now);
                    if now.signed_duration_since(last_status)
                        >= chrono::Duration::seconds(STATUS_LOG_INTERVAL_SECS)
                    {
                        last_status = now;
                        if metrics_rx.has_changed().unwrap_or(false) {
                            let m = metrics_rx.borrow_and_update().clone();
                            info!(
                                "Dispatch status: {} batches sent ({} events), {} failed, backlog depth {}",
                                m.batches_sent, m.events_delivered, m.batches_failed, m.backlog_depth
                            );
                        }
                    }
                }
            }
        }

        let now = Utc::now();
        let events = recorder.finalize(now);
        dispatcher.enqueue(events, now);
        dispatcher.shutdown(now);
        info!("Telemetry pipeline thread exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::wire::CollectorPayload;
    use crate::storage::memory::MemoryBacklog;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct CapturingClient {
        sent: Arc<Mutex<Vec<CollectorPayload>>>,
    }

    impl CollectorClient for CapturingClient {
        fn send(&mut self, payload: &CollectorPayload) -> Result<()> {
            self.sent.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    #[test]
    fn test_pipeline_flushes_on_size_and_finalizes_on_shutdown() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let ctx = SessionContext::new(
            "session_a".into(),
            "user_b".into(),
            "device_c".into(),
            Utc::now(),
        );
        let config = PipelineConfig {
            batch_size: 10,
            flush_interval_secs: 10,
            heartbeat_interval_secs: 3600,
            idle_threshold_secs: 3600,
            residue_flush_secs: 3600,
            keystroke_coalesce: 50,
            pointer_coalesce: 100,
            scroll_coalesce: 50,
            backlog_cap: 100,
        };
        let threads = ThreadRegistry::new();
        let handle = spawn_pipeline(
            &threads,
            config,
            PipelineResources {
                ctx,
                client: Box::new(CapturingClient { sent: sent.clone() }),
                store: Box::new(MemoryBacklog::new()),
                command_rx: rx,
            },
        )
        .unwrap();
        assert_eq!(threads.spawned_names(), vec!["telemetry-pipeline"]);

        // session_start plus 9 clicks hits the size threshold of 10.
        for i in 0..9 {
            tx.send(PipelineCommand::Signal(RawSignal::Click {
                x: i,
                y: 0,
                target: None,
            }))
            .unwrap();
        }
        tx.send(PipelineCommand::Shutdown).unwrap();
        handle.join();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].event_count(), 10);
        assert_eq!(sent[0].events[0].kind(), "session_start");
        // The shutdown flush carries the session_end marker.
        let last = &sent[1];
        assert_eq!(
            last.events.last().unwrap().kind(),
            "session_end"
        );
    }
}
