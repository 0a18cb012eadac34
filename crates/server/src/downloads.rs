//! Per-client cap on concurrently open download streams.

use crate::clients::{AtCapacity, ClientRegistry};
use std::fmt;
use std::time::Instant;

/// Reason a download slot was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardRejection {
    /// The client already has `max_downloads_per_ip` streams open.
    ConcurrencyLimited,
    /// The registry cannot track another client.
    AtCapacity,
}

/// Hands out download permits against a per-client ceiling.
#[derive(Clone, Debug)]
pub struct DownloadGuard {
    registry: ClientRegistry,
    max_per_client: u32,
}

impl DownloadGuard {
    /// `max_per_client == 0` means no ceiling; slots are still counted.
    pub fn new(registry: ClientRegistry, max_per_client: u32) -> Self {
        Self {
            registry,
            max_per_client,
        }
    }

    /// Reserve a download slot for `client`.
    pub fn try_acquire(&self, client: &str) -> Result<DownloadPermit, GuardRejection> {
        let max = self.max_per_client;
        let acquired = self
            .registry
            .with_client(client, Instant::now(), |state| {
                if max == 0 || state.active_downloads < max {
                    state.active_downloads += 1;
                    true
                } else {
                    false
                }
            })
            .map_err(|AtCapacity| GuardRejection::AtCapacity)?;

        if !acquired {
            tracing::debug!(client = %client, max = max, "download rejected, too many concurrent streams");
            return Err(GuardRejection::ConcurrencyLimited);
        }

        crate::metrics::ACTIVE_DOWNLOADS.inc();
        Ok(DownloadPermit {
            registry: self.registry.clone(),
            client: client.to_string(),
        })
    }

    /// Streams currently open for `client`.
    pub fn active(&self, client: &str) -> u32 {
        self.registry
            .get(client)
            .map_or(0, |state| state.active_downloads)
    }
}

/// A reserved download slot, returned to the guard exactly once when dropped.
///
/// Holding the permit inside the task that streams the artifact ties the
/// slot to every way that task can end: completion, client disconnect,
/// write or read failure, cancellation, or a panic unwinding through it.
#[must_use = "dropping the permit releases the download slot immediately"]
pub struct DownloadPermit {
    registry: ClientRegistry,
    client: String,
}

impl DownloadPermit {
    pub fn client(&self) -> &str {
        &self.client
    }

    /// Return the slot now.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for DownloadPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadPermit")
            .field("client", &self.client)
            .finish()
    }
}

impl Drop for DownloadPermit {
    fn drop(&mut self) {
        // Entries with downloads in flight are never evicted, so the state is
        // still present here.
        let released = self.registry.with_existing(&self.client, |state| {
            state.active_downloads = state.active_downloads.saturating_sub(1);
        });
        if released.is_none() {
            tracing::error!(client = %self.client, "download permit released for untracked client");
        }
        crate::metrics::ACTIVE_DOWNLOADS.dec();
    }
}
