use chrono::serde::ts_milliseconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::model::TelemetryEvent;
use anyhow::Result;

/// A batch that failed delivery, parked for a later retry cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingBatch {
    pub endpoint: String,
    pub events: Vec<TelemetryEvent>,
    #[serde(with = "ts_milliseconds")]
    pub failed_at: DateTime<Utc>,
}

/// Durable storage for the delivery backlog. Only the dispatcher touches
/// it, so implementations do not need internal locking. `save` replaces
/// the stored list wholesale, mirroring a key/value set.
pub trait BacklogStore: Send {
    fn load(&mut self) -> Result<Vec<PendingBatch>>;
    fn save(&mut self, batches: &[PendingBatch]) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
}

pub mod memory;
pub mod sqlite3;
