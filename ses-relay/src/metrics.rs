use anyhow::{anyhow, Result};
use std::sync::Arc;

pub const AUTH_OK: &str = "auth.ok";
pub const AUTH_FAILED: &str = "auth.failed";
pub const FORWARD_OK: &str = "forward.ok";
pub const FORWARD_REJECTED: &str = "forward.rejected";
pub const FORWARD_TEMPORARY: &str = "forward.temporary";

const PREFIX: &str = "ses_relay";

/// Statsd counters, a no-op when no statsd server is configured
#[derive(Clone, Default)]
pub struct Metrics {
    client: Option<Arc<statsd::Client>>,
}

impl Metrics {
    pub fn new(addr: Option<&str>) -> Result<Self> {
        let client = match addr {
            Some(addr) => {
                let client = statsd::Client::new(addr, PREFIX)
                    .map_err(|err| anyhow!("Cannot create statsd client for {}: {}", addr, err))?;
                Some(Arc::new(client))
            }
            None => None,
        };
        Ok(Self { client })
    }

    pub fn incr(&self, counter: &str) {
        if let Some(client) = &self.client {
            client.incr(counter);
        }
    }
}
