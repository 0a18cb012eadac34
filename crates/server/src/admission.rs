//! Tumbling-window request admission with a block period.
//!
//! Each client gets `max_requests` admissions per window of `window_ms`,
//! measured from the first request of the window. The request that would
//! exceed the limit blocks the client until the later of the window end and
//! `now + block_duration_ms`; the first request after the block ends starts a
//! fresh window.

use crate::clients::{AtCapacity, ClientRegistry, ClientState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tulpar_core::ServerLimits;

/// Smallest block applied, so `blocked_until` is always strictly after the
/// instant that set it.
const MIN_BLOCK: Duration = Duration::from_millis(1);

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Reject {
        retry_after: Duration,
        reason: RejectReason,
    },
}

/// Reason for an admission rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The client is blocked or just exceeded its request limit.
    RateLimited,
    /// The registry cannot track another client.
    AtCapacity,
}

/// Applies the request limits to clients in a [`ClientRegistry`].
#[derive(Clone, Debug)]
pub struct AdmissionController {
    registry: ClientRegistry,
    limits: Arc<ServerLimits>,
    at_capacity_retry: Duration,
}

impl AdmissionController {
    /// `at_capacity_retry` is suggested to clients turned away because the
    /// registry is full, typically the cleanup interval.
    pub fn new(
        registry: ClientRegistry,
        limits: Arc<ServerLimits>,
        at_capacity_retry: Duration,
    ) -> Self {
        Self {
            registry,
            limits,
            at_capacity_retry,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limits.max_requests > 0
    }

    pub fn check_and_record(&self, client: &str) -> Admission {
        self.check_and_record_at(client, Instant::now())
    }

    /// Record a request from `client` at `now` and decide whether to admit it.
    pub fn check_and_record_at(&self, client: &str, now: Instant) -> Admission {
        if !self.is_enabled() {
            return Admission::Admit;
        }

        let limits = &self.limits;
        let decision = self
            .registry
            .with_client(client, now, |state| record(state, limits, now));

        match decision {
            Ok(Admission::Admit) => {
                crate::metrics::REQUESTS_ADMITTED.inc();
                Admission::Admit
            }
            Ok(reject @ Admission::Reject { retry_after, .. }) => {
                crate::metrics::REQUESTS_REJECTED
                    .with_label_values(&["rate_limited"])
                    .inc();
                tracing::debug!(
                    client = %client,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "request rejected by admission control"
                );
                reject
            }
            Err(AtCapacity) => {
                crate::metrics::REQUESTS_REJECTED
                    .with_label_values(&["at_capacity"])
                    .inc();
                Admission::Reject {
                    retry_after: self.at_capacity_retry,
                    reason: RejectReason::AtCapacity,
                }
            }
        }
    }

    /// Block `client` for the configured block duration starting at `now`.
    pub fn block_at(&self, client: &str, now: Instant) -> Result<Instant, AtCapacity> {
        let until = now + self.limits.block_duration().max(MIN_BLOCK);
        self.registry.with_client(client, now, |state| {
            state.blocked_until = Some(until);
        })?;
        tracing::warn!(client = %client, "client blocked by administrator");
        Ok(until)
    }

    /// Lift a block. Returns false if the client is not currently blocked.
    pub fn unblock_at(&self, client: &str, now: Instant) -> bool {
        let unblocked = self
            .registry
            .with_existing(client, |state| {
                let was_blocked = state.is_blocked_at(now);
                state.blocked_until = None;
                state.request_count = 0;
                state.window_start = now;
                was_blocked
            })
            .unwrap_or(false);
        if unblocked {
            tracing::info!(client = %client, "client unblocked by administrator");
        }
        unblocked
    }
}

/// Apply one request to `state`. Runs under the client's entry lock.
fn record(state: &mut ClientState, limits: &ServerLimits, now: Instant) -> Admission {
    if let Some(until) = state.blocked_until {
        if now < until {
            return Admission::Reject {
                retry_after: until - now,
                reason: RejectReason::RateLimited,
            };
        }
        state.blocked_until = None;
        state.window_start = now;
        state.request_count = 1;
        return Admission::Admit;
    }

    let window_end = state.window_start + limits.window();
    if now > window_end {
        state.window_start = now;
        state.request_count = 1;
        return Admission::Admit;
    }

    if state.request_count < limits.max_requests {
        state.request_count += 1;
        return Admission::Admit;
    }

    let until = window_end
        .max(now + limits.block_duration())
        .max(now + MIN_BLOCK);
    state.blocked_until = Some(until);
    tracing::warn!(
        request_count = state.request_count,
        blocked_ms = (until - now).as_millis() as u64,
        "client exceeded request limit, blocking"
    );
    Admission::Reject {
        retry_after: until - now,
        reason: RejectReason::RateLimited,
    }
}
