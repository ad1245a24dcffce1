use anyhow::{anyhow, Context, Result};
use std::time::Duration;

use crate::pipeline::wire::{CollectorPayload, HEADER_DEVICE, HEADER_SESSION, HEADER_USER};
use crate::util::logging::debug;

/// The network seam of the dispatcher. A send either fully succeeds or
/// fails; connection errors, timeouts, and non-2xx responses are all the
/// same "delivery failed" to the caller.
pub trait CollectorClient: Send {
    fn send(&mut self, payload: &CollectorPayload) -> Result<()>;
}

/// Blocking HTTP client posting one JSON body per flush cycle.
pub struct ReqwestCollector {
    client: reqwest::blocking::Client,
    url: String,
}

impl ReqwestCollector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build collector HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl CollectorClient for ReqwestCollector {
    fn send(&mut self, payload: &CollectorPayload) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(HEADER_SESSION, &payload.session_id)
            .header(HEADER_USER, &payload.user_id)
            .header(HEADER_DEVICE, &payload.device_id)
            .json(payload)
            .send()
            .with_context(|| format!("POST {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("collector returned {} for {}", status, self.url));
        }
        debug!(
            "Delivered {} events to {} ({})",
            payload.event_count(),
            self.url,
            status
        );
        Ok(())
    }
}
