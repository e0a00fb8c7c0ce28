//! Per-server bookkeeping: registration, failure backoff, suspension,
//! and idle detection.
//!
//! The poller owns a [`ServerConnection`] per configured server and is
//! the only mutator; every method takes an explicit `now` so the state
//! machine is testable without sleeping.

use std::time::{Duration, Instant};

use crate::api::ServerApi;
use crate::backoff::{self, BackoffConfig};

/// State for one task server in the rotation.
pub struct ServerConnection {
    api: ServerApi,
    backoff: BackoffConfig,
    registered: bool,
    consecutive_failures: u32,
    consecutive_empty_polls: u32,
    tasks_claimed: u64,
    /// Delay the next failure will impose.
    retry_delay: Duration,
    /// Earliest moment this server may be contacted again.
    next_attempt_at: Instant,
    suspended_until: Option<Instant>,
}

impl ServerConnection {
    pub fn new(api: ServerApi, backoff: BackoffConfig, now: Instant) -> Self {
        let retry_delay = backoff.base_delay;
        Self {
            api,
            backoff,
            registered: false,
            consecutive_failures: 0,
            consecutive_empty_polls: 0,
            tasks_claimed: 0,
            retry_delay,
            next_attempt_at: now,
            suspended_until: None,
        }
    }

    pub fn api(&self) -> &ServerApi {
        &self.api
    }

    pub fn base_url(&self) -> &str {
        self.api.base_url()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn mark_registered(&mut self) {
        self.registered = true;
    }

    /// Force a fresh registration before the next protocol call. Used when
    /// the server answers 404 for our client id (it restarted).
    pub fn mark_unregistered(&mut self) {
        self.registered = false;
    }

    pub fn is_suspended(&self, now: Instant) -> bool {
        matches!(self.suspended_until, Some(until) if until > now)
    }

    /// Whether the poller may contact this server right now.
    pub fn is_ready(&self, now: Instant) -> bool {
        !self.is_suspended(now) && self.next_attempt_at <= now
    }

    /// Whether this server has been empty long enough to slow down for.
    pub fn is_idle(&self, threshold: u32) -> bool {
        self.consecutive_empty_polls >= threshold
    }

    pub fn failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Total tasks ever claimed from this server.
    pub fn tasks_claimed(&self) -> u64 {
        self.tasks_claimed
    }

    pub fn empty_polls(&self) -> u32 {
        self.consecutive_empty_polls
    }

    /// A poll came back with a task. Resets every failure and idle signal.
    pub fn record_claim(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_empty_polls = 0;
        self.tasks_claimed += 1;
        self.retry_delay = self.backoff.base_delay;
    }

    /// A poll came back empty. The server is healthy, just quiet.
    pub fn record_empty(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_empty_polls = self.consecutive_empty_polls.saturating_add(1);
        self.retry_delay = self.backoff.base_delay;
    }

    /// A call failed. Backs the server off with jitter, drops the
    /// registration (re-registering is idempotent and covers restarts),
    /// and suspends the server once the failure threshold is reached.
    ///
    /// Returns true if this failure triggered a suspension.
    pub fn record_failure(&mut self, now: Instant, threshold: u32, cooldown: Duration) -> bool {
        self.consecutive_failures += 1;
        self.registered = false;
        self.next_attempt_at = now + backoff::with_jitter(self.retry_delay);
        self.retry_delay = backoff::next_delay(self.retry_delay, &self.backoff);

        if self.consecutive_failures >= threshold {
            // Fresh slate once the cooldown ends.
            self.consecutive_failures = 0;
            self.retry_delay = self.backoff.base_delay;
            self.suspended_until = Some(now + cooldown);
            return true;
        }
        false
    }

    /// Lift a suspension early (a health probe succeeded). The server
    /// still needs to be re-registered before polling.
    pub fn revive(&mut self, now: Instant) {
        self.suspended_until = None;
        self.next_attempt_at = now;
        self.registered = false;
    }
}
