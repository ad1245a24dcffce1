use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BacklogBackendConfig {
    Sqlite3,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub workspace_dir: PathBuf,
    pub collector_url: String,
    pub backlog_backend: BacklogBackendConfig,
    pub send_timeout_secs: u64,
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

impl Default for AppConfig {
    fn default() -> Self {
        // Be resilient in environments without HOME by falling back to CWD.
        let base_dir = dirs::home_dir()
            .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let workspace_dir = base_dir.join(".courier");

        Self {
            workspace_dir,
            collector_url: "http://127.0.0.1:8080/api/analytics".to_string(),
            backlog_backend: BacklogBackendConfig::Sqlite3,
            send_timeout_secs: 10,
            batch_size: 10,
            flush_interval_secs: 10,
            heartbeat_interval_secs: 5,
            idle_threshold_secs: 30,
            residue_flush_secs: 30,
            keystroke_coalesce: 50,
            pointer_coalesce: 100,
            scroll_coalesce: 50,
            backlog_cap: 100,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let defaults = Self::default();
        let config_path = defaults.workspace_dir.join("config.toml");

        let mut builder = Config::builder()
            // Avoid panics on non-UTF8 paths by using lossy conversion.
            .set_default(
                "workspace_dir",
                defaults.workspace_dir.to_string_lossy().as_ref(),
            )?
            .set_default("collector_url", defaults.collector_url.as_str())?
            .set_default("backlog_backend", "sqlite3")?
            .set_default("send_timeout_secs", 10)?
            .set_default("batch_size", 10)?
            .set_default("flush_interval_secs", 10)?
            .set_default("heartbeat_interval_secs", 5)?
            .set_default("idle_threshold_secs", 30)?
            .set_default("residue_flush_secs", 30)?
            .set_default("keystroke_coalesce", 50)?
            .set_default("pointer_coalesce", 100)?
            .set_default("scroll_coalesce", 50)?
            .set_default("backlog_cap", 100)?;

        // Load config file if it exists
        if config_path.exists() {
            builder = builder.add_source(File::from(config_path));
        }

        // Allow environment variables to override config
        builder = builder.add_source(Environment::with_prefix("COURIER"));

        let config = builder.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }
}
