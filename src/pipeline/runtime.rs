use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::util::logging::warn;

/// Spawns named worker threads and remembers their names so shutdown
/// problems are attributable in logs.
#[derive(Clone, Default)]
pub struct ThreadRegistry {
    names: Arc<Mutex<Vec<String>>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, name: &str, f: F) -> Result<ThreadHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .with_context(|| format!("Failed to spawn thread '{}'", name))?;
        self.names.lock().unwrap().push(name.to_string());
        Ok(ThreadHandle {
            name: name.to_string(),
            handle,
        })
    }

    pub fn spawned_names(&self) -> Vec<String> {
        self.names.lock().unwrap().clone()
    }
}

pub struct ThreadHandle {
    name: String,
    handle: JoinHandle<()>,
}

impl ThreadHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!("Thread '{}' panicked before join", self.name);
        }
    }
}
