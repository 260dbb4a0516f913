//! Global atomic counters for Council observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of an investigation).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free atomic counters.
pub struct Metrics {
    investigations_started: AtomicU64,
    workers_dispatched: AtomicU64,
    worker_failures: AtomicU64,
    worker_timeouts: AtomicU64,
    debate_rounds: AtomicU64,
    synthesis_retries: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            investigations_started: AtomicU64::new(0),
            workers_dispatched: AtomicU64::new(0),
            worker_failures: AtomicU64::new(0),
            worker_timeouts: AtomicU64::new(0),
            debate_rounds: AtomicU64::new(0),
            synthesis_retries: AtomicU64::new(0),
        }
    }

    pub fn inc_investigations(&self) {
        self.investigations_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "investigations_started", "counter incremented");
    }

    /// Add `n` dispatched worker calls.
    pub fn add_workers_dispatched(&self, n: u64) {
        self.workers_dispatched.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "workers_dispatched", n, "counter incremented");
    }

    pub fn inc_worker_failures(&self) {
        self.worker_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "worker_failures", "counter incremented");
    }

    pub fn inc_worker_timeouts(&self) {
        self.worker_timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "worker_timeouts", "counter incremented");
    }

    pub fn inc_debate_rounds(&self) {
        self.debate_rounds.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "debate_rounds", "counter incremented");
    }

    pub fn inc_synthesis_retries(&self) {
        self.synthesis_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "synthesis_retries", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            investigations_started = self.investigations_started(),
            workers_dispatched = self.workers_dispatched(),
            worker_failures = self.worker_failures(),
            worker_timeouts = self.worker_timeouts(),
            debate_rounds = self.debate_rounds(),
            synthesis_retries = self.synthesis_retries(),
        );
    }

    pub fn investigations_started(&self) -> u64 {
        self.investigations_started.load(Ordering::Relaxed)
    }

    pub fn workers_dispatched(&self) -> u64 {
        self.workers_dispatched.load(Ordering::Relaxed)
    }

    pub fn worker_failures(&self) -> u64 {
        self.worker_failures.load(Ordering::Relaxed)
    }

    pub fn worker_timeouts(&self) -> u64 {
        self.worker_timeouts.load(Ordering::Relaxed)
    }

    pub fn debate_rounds(&self) -> u64 {
        self.debate_rounds.load(Ordering::Relaxed)
    }

    pub fn synthesis_retries(&self) -> u64 {
        self.synthesis_retries.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.investigations_started.store(0, Ordering::Relaxed);
        self.workers_dispatched.store(0, Ordering::Relaxed);
        self.worker_failures.store(0, Ordering::Relaxed);
        self.worker_timeouts.store(0, Ordering::Relaxed);
        self.debate_rounds.store(0, Ordering::Relaxed);
        self.synthesis_retries.store(0, Ordering::Relaxed);
    }
}
