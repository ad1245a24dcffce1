use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::util::ids;

/// Supplies the stable identity pair. Implementations must return the same
/// values for the lifetime of a device; the pipeline treats them as opaque.
pub trait IdentityProvider {
    fn user_id(&mut self) -> Result<String>;
    fn device_id(&mut self) -> Result<String>;
}

/// Process-wide identity and session context, constructed once at startup
/// and shared by the recorder and dispatcher.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: String,
    pub device_id: String,
    pub started_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(
        session_id: String,
        user_id: String,
        device_id: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            user_id,
            device_id,
            started_at,
        }
    }

    /// Mint a fresh session id and resolve the persistent identity pair.
    pub fn establish(provider: &mut dyn IdentityProvider, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            session_id: ids::mint_id("session"),
            user_id: provider.user_id()?,
            device_id: provider.device_id()?,
            started_at: now,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedIdentity {
    user_id: String,
    device_id: String,
}

/// Identity persisted as JSON in the workspace. Ids are generated on first
/// use and reused for every later session on the same device.
pub struct FileIdentity {
    path: PathBuf,
    cached: Option<PersistedIdentity>,
}

impl FileIdentity {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cached: None,
        }
    }

    fn load_or_create(&mut self) -> Result<&PersistedIdentity> {
        if self.cached.is_none() {
            let identity = match std::fs::read_to_string(&self.path) {
                Ok(text) => serde_json::from_str(&text)
                    .with_context(|| format!("corrupt identity file {:?}", self.path))?,
                Err(_) => {
                    let fresh = PersistedIdentity {
                        user_id: ids::mint_id("user"),
                        device_id: ids::mint_id("device"),
                    };
                    if let Some(parent) = self.path.parent() {
                        std::fs::create_dir_all(parent)
                            .with_context(|| format!("failed to create directory {:?}", parent))?;
                    }
                    std::fs::write(&self.path, serde_json::to_string_pretty(&fresh)?)
                        .with_context(|| format!("failed to write identity file {:?}", self.path))?;
                    fresh
                }
            };
            self.cached = Some(identity);
        }
        Ok(self.cached.as_ref().unwrap())
    }
}

impl IdentityProvider for FileIdentity {
    fn user_id(&mut self) -> Result<String> {
        Ok(self.load_or_create()?.user_id.clone())
    }

    fn device_id(&mut self) -> Result<String> {
        Ok(self.load_or_create()?.device_id.clone())
    }
}
