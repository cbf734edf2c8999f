use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared by the ingestion path and every analysis slot
#[derive(Default)]
pub struct SessionMetrics {
    records_decoded: AtomicU64,
    samples_ingested: AtomicU64,
    framing_resets: AtomicU64,
    analyses_dispatched: AtomicU64,
    analyses_coalesced: AtomicU64,
    analyses_completed: AtomicU64,
    analyses_failed: AtomicU64,
    analyses_rejected: AtomicU64,
    total_latency_us: AtomicU64,
    latency_samples: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub records_decoded: u64,
    pub samples_ingested: u64,
    pub framing_resets: u64,
    pub analyses_dispatched: u64,
    pub analyses_coalesced: u64,
    pub analyses_completed: u64,
    pub analyses_failed: u64,
    pub analyses_rejected: u64,
    pub avg_analysis_latency_us: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_decoded(&self) {
        self.records_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_samples(&self, count: usize) {
        self.samples_ingested.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_framing_resets(&self, count: u64) {
        self.framing_resets.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.analyses_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.analyses_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.analyses_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.analyses_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.analyses_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn start_analysis(&self) -> Instant {
        Instant::now()
    }

    pub fn finish_analysis(&self, start: Instant) {
        let latency_us = start.elapsed().as_micros() as u64;
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_decoded(&self) -> u64 {
        self.records_decoded.load(Ordering::Relaxed)
    }

    pub fn samples_ingested(&self) -> u64 {
        self.samples_ingested.load(Ordering::Relaxed)
    }

    pub fn framing_resets(&self) -> u64 {
        self.framing_resets.load(Ordering::Relaxed)
    }

    pub fn analyses_dispatched(&self) -> u64 {
        self.analyses_dispatched.load(Ordering::Relaxed)
    }

    pub fn analyses_coalesced(&self) -> u64 {
        self.analyses_coalesced.load(Ordering::Relaxed)
    }

    pub fn analyses_completed(&self) -> u64 {
        self.analyses_completed.load(Ordering::Relaxed)
    }

    pub fn analyses_failed(&self) -> u64 {
        self.analyses_failed.load(Ordering::Relaxed)
    }

    pub fn analyses_rejected(&self) -> u64 {
        self.analyses_rejected.load(Ordering::Relaxed)
    }

    pub fn avg_analysis_latency_us(&self) -> u64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0;
        }
        self.total_latency_us.load(Ordering::Relaxed) / samples
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_decoded: self.records_decoded(),
            samples_ingested: self.samples_ingested(),
            framing_resets: self.framing_resets(),
            analyses_dispatched: self.analyses_dispatched(),
            analyses_coalesced: self.analyses_coalesced(),
            analyses_completed: self.analyses_completed(),
            analyses_failed: self.analyses_failed(),
            analyses_rejected: self.analyses_rejected(),
            avg_analysis_latency_us: self.avg_analysis_latency_us(),
        }
    }

    pub fn generate_report(&self) -> String {
        let s = self.snapshot();
        format!(
            "=== Session Metrics ===\n  Records: {} decoded, {} samples ingested\n  Framing resets: {}\n  Analyses: {} dispatched, {} coalesced, {} completed, {} failed, {} rejected\n  Avg Latency: {}μs\n",
            s.records_decoded,
            s.samples_ingested,
            s.framing_resets,
            s.analyses_dispatched,
            s.analyses_coalesced,
            s.analyses_completed,
            s.analyses_failed,
            s.analyses_rejected,
            s.avg_analysis_latency_us
        )
    }
}
