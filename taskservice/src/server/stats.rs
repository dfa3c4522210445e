//! Per-server counters for observability

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of a server's counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub enqueued: u64,
    pub processed: u64,
    pub handler_errors: u64,
    pub panics: u64,
    pub coalesced: u64,
    pub abandoned_replies: u64,
    pub job_runs: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    enqueued: AtomicU64,
    processed: AtomicU64,
    handler_errors: AtomicU64,
    panics: AtomicU64,
    coalesced: AtomicU64,
    abandoned_replies: AtomicU64,
    job_runs: AtomicU64,
}

impl StatsCounters {
    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned_reply(&self) {
        self.abandoned_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_run(&self) {
        self.job_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            abandoned_replies: self.abandoned_replies.load(Ordering::Relaxed),
            job_runs: self.job_runs.load(Ordering::Relaxed),
        }
    }
}
