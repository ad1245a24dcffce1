use anyhow::{bail, Result};

use crate::storage::{BacklogStore, PendingBatch};

/// Non-durable backlog, used in tests and as an explicit opt-out of disk
/// persistence.
#[derive(Default)]
pub struct MemoryBacklog {
    batches: Vec<PendingBatch>,
    fail_writes: bool,
}

impl MemoryBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save/clear fail, to exercise the dispatcher's
    /// storage-failure path.
    #[cfg(test)]
    pub fn poison_writes(&mut self) {
        self.fail_writes = true;
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

impl BacklogStore for MemoryBacklog {
    fn load(&mut self) -> Result<Vec<PendingBatch>> {
        Ok(self.batches.clone())
    }

    fn save(&mut self, batches: &[PendingBatch]) -> Result<()> {
        if self.fail_writes {
            bail!("backlog writes poisoned");
        }
        self.batches = batches.to_vec();
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        if self.fail_writes {
            bail!("backlog writes poisoned");
        }
        self.batches.clear();
        Ok(())
    }
}
