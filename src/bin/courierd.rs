use clap::Parser;
use courier::identity::{FileIdentity, SessionContext};
use courier::pipeline::metrics::dispatch_metrics;
use courier::pipeline::runtime::ThreadRegistry;
use courier::pipeline::signals::RawSignal;
use courier::pipeline::{spawn_pipeline, PipelineCommand, PipelineConfig, PipelineResources};
use courier::storage::memory::MemoryBacklog;
use courier::storage::sqlite3::SqliteBacklog;
use courier::storage::BacklogStore;
use courier::transport::{CollectorClient, ReqwestCollector};
use courier::util::config::{AppConfig, BacklogBackendConfig};
use courier::util::{logging, paths};
use crossbeam_channel::Sender;
use log::{error, info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "courierd",
    about = "Telemetry pipeline daemon: reads raw interaction signals as JSON lines and ships batched events to a collector"
)]
struct Cli {
    /// Read signals from this JSON-lines file instead of stdin
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Override the configured collector URL
    #[arg(long)]
    collector: Option<String>,
}

fn ensure_workspace_dir(workspace_dir: &PathBuf) {
    if !workspace_dir.exists() {
        std::fs::create_dir_all(workspace_dir).unwrap_or_else(|e| {
            eprintln!("Failed to create workspace directory: {}", e);
            std::process::exit(1);
        });
    }
}

fn is_process_running(pid: u32) -> bool {
    std::process::Command::new("ps")
        .args(["-p", &pid.to_string()])
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn write_pid_file(pid_file: &PathBuf) {
    if pid_file.exists() {
        match std::fs::read_to_string(pid_file) {
            Ok(content) => {
                if let Ok(existing_pid) = content.trim().parse::<u32>() {
                    if is_process_running(existing_pid) {
                        eprintln!("courierd is already running (PID: {})", existing_pid);
                        std::process::exit(1);
                    } else {
                        info!(
                            "Removing stale PID file (process {} no longer exists)",
                            existing_pid
                        );
                        let _ = std::fs::remove_file(pid_file);
                    }
                }
            }
            Err(_) => {
                info!("Removing unreadable PID file");
                let _ = std::fs::remove_file(pid_file);
            }
        }
    }

    let current_pid = std::process::id();
    std::fs::write(pid_file, current_pid.to_string()).unwrap_or_else(|e| {
        eprintln!("Failed to write PID file: {}", e);
        std::process::exit(1);
    });
}

fn cleanup_pid_file(pid_file: &PathBuf) {
    let current_pid = std::process::id();
    match std::fs::read_to_string(pid_file) {
        Ok(content) => match content.trim().parse::<u32>() {
            Ok(file_pid) if file_pid == current_pid => {
                if let Err(e) = std::fs::remove_file(pid_file) {
                    error!("Failed to remove PID file: {}", e);
                }
            }
            Ok(file_pid) => {
                error!(
                    "PID file contains different PID ({}) than current process ({}). Not removing it!",
                    file_pid, current_pid
                );
            }
            Err(e) => {
                error!("PID file contains invalid PID: {}. Error: {}", content, e);
            }
        },
        Err(e) => {
            error!("Failed to read PID file for cleanup: {}", e);
        }
    }
}

fn setup_file_logging(log_dir: &PathBuf) {
    std::fs::create_dir_all(log_dir).unwrap_or_else(|e| {
        eprintln!("Failed to create log directory: {}", e);
        std::process::exit(1);
    });

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("courierd")
        .filename_suffix("log")
        .max_log_files(7)
        .build(log_dir)
        .unwrap_or_else(|e| {
            eprintln!("Failed to create log appender: {}", e);
            std::process::exit(1);
        });

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false),
        )
        .with(env_filter)
        .init();
}

fn load_app_config() -> AppConfig {
    match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn create_backlog_store(config: &AppConfig) -> Box<dyn BacklogStore> {
    match config.backlog_backend {
        BacklogBackendConfig::Sqlite3 => {
            let db_path = paths::backlog_db(&config.workspace_dir);
            SqliteBacklog::new(&db_path)
                .map(|s| Box::new(s) as Box<dyn BacklogStore>)
                .unwrap_or_else(|e| {
                    error!("Failed to open backlog database: {}", e);
                    std::process::exit(1);
                })
        }
        BacklogBackendConfig::Memory => Box::new(MemoryBacklog::new()),
    }
}

/// Feed raw signals from a reader into the pipeline, one JSON object per
/// line. Malformed lines are dropped with a warning; the source never sees
/// an error. EOF triggers a clean shutdown with a final flush.
fn feed_signals<R: BufRead>(reader: R, tx: &Sender<PipelineCommand>) {
    let mut malformed = 0u64;
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("Signal input closed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawSignal>(&line) {
            Ok(signal) => {
                if tx.send(PipelineCommand::Signal(signal)).is_err() {
                    break;
                }
            }
            Err(e) => {
                malformed += 1;
                warn!("Dropping malformed signal line: {}", e);
            }
        }
    }
    if malformed > 0 {
        warn!("Dropped {} malformed signal lines in total", malformed);
    }
}

fn main() {
    let cli = Cli::parse();
    let mut config = load_app_config();
    if let Some(url) = cli.collector {
        config.collector_url = url;
    }
    ensure_workspace_dir(&config.workspace_dir);

    let log_dir = config.workspace_dir.join("logs");
    setup_file_logging(&log_dir);

    let pid_file = paths::pid_file(&config.workspace_dir);
    write_pid_file(&pid_file);

    let mut identity = FileIdentity::new(paths::identity_file(&config.workspace_dir));
    let ctx = match SessionContext::establish(&mut identity, chrono::Utc::now()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Failed to establish identity: {}", e);
            cleanup_pid_file(&pid_file);
            std::process::exit(1);
        }
    };
    logging::bind_session(ctx.session_id.clone());
    info!(
        "Starting courierd (session {}, collector {})",
        ctx.session_id, config.collector_url
    );

    let client = ReqwestCollector::new(
        config.collector_url.clone(),
        Duration::from_secs(config.send_timeout_secs),
    )
    .unwrap_or_else(|e| {
        eprintln!("Failed to build collector client: {}", e);
        std::process::exit(1);
    });
    let store = create_backlog_store(&config);

    let (tx, rx) = crossbeam_channel::unbounded();
    let threads = ThreadRegistry::new();
    let pipeline = spawn_pipeline(
        &threads,
        PipelineConfig::from_app_config(&config),
        PipelineResources {
            ctx,
            client: Box::new(client) as Box<dyn CollectorClient>,
            store,
            command_rx: rx,
        },
    )
    .unwrap_or_else(|e| {
        error!("Failed to start pipeline: {}", e);
        cleanup_pid_file(&pid_file);
        std::process::exit(1);
    });

    let ctrlc_tx = tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(PipelineCommand::Shutdown);
    }) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    // The feeder runs on its own thread: a blocked stdin read must not
    // keep main from joining the pipeline after Ctrl-C. The thread is
    // abandoned at process exit if its reader never returns.
    let feeder_tx = tx.clone();
    let replay = cli.replay.clone();
    if let Err(e) = threads.spawn("signal-feeder", move || {
        match replay {
            Some(path) => match std::fs::File::open(&path) {
                Ok(file) => feed_signals(std::io::BufReader::new(file), &feeder_tx),
                Err(e) => error!("Failed to open replay file {:?}: {}", path, e),
            },
            None => feed_signals(std::io::stdin().lock(), &feeder_tx),
        }
        let _ = feeder_tx.send(PipelineCommand::Shutdown);
    }) {
        error!("Failed to start signal feeder: {}", e);
        let _ = tx.send(PipelineCommand::Shutdown);
    }

    pipeline.join();
    cleanup_pid_file(&pid_file);

    let m = dispatch_metrics();
    info!(
        "courierd exiting: {} batches sent ({} events), {} failed, backlog depth {}",
        m.batches_sent, m.events_delivered, m.batches_failed, m.backlog_depth
    );
}
