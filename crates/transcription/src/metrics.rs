use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::mode::Mode;
use crate::transcript::{StageTimings, TranscriptResult};

/// Request counters and stage latencies for the metrics endpoint.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    requests_total: AtomicU64,
    pooled_requests: AtomicU64,
    single_requests: AtomicU64,
    fallback_count: AtomicU64,
    failed_requests: AtomicU64,
    degraded_segments_total: AtomicU64,
    stage_totals: Mutex<StageTimings>,
    last_request: Mutex<StageTimings>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub pooled_requests: u64,
    pub single_requests: u64,
    pub fallback_count: u64,
    pub failed_requests: u64,
    pub degraded_segments_total: u64,
    pub active_sessions: usize,
    pub queue_depth: usize,
    /// Cumulative time per stage over all finished requests.
    pub stage_totals_ms: StageTimings,
    pub last_request_ms: StageTimings,
}

impl ServiceMetrics {
    pub fn request_started(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fallback_taken(&self) {
        self.fallback_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, result: &TranscriptResult) {
        match result.mode {
            Mode::Pooled => self.pooled_requests.fetch_add(1, Ordering::Relaxed),
            Mode::Single => self.single_requests.fetch_add(1, Ordering::Relaxed),
        };
        self.degraded_segments_total
            .fetch_add(result.degraded_segment_count as u64, Ordering::Relaxed);
        self.record_timings(&result.timings);
    }

    pub fn record_failure(&self, timings: &StageTimings) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        self.record_timings(timings);
    }

    pub fn snapshot(&self, active_sessions: usize, queue_depth: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            pooled_requests: self.pooled_requests.load(Ordering::Relaxed),
            single_requests: self.single_requests.load(Ordering::Relaxed),
            fallback_count: self.fallback_count.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            degraded_segments_total: self.degraded_segments_total.load(Ordering::Relaxed),
            active_sessions,
            queue_depth,
            stage_totals_ms: *self.stage_totals.lock(),
            last_request_ms: *self.last_request.lock(),
        }
    }

    fn record_timings(&self, timings: &StageTimings) {
        let mut totals = self.stage_totals.lock();
        totals.acquire_ms += timings.acquire_ms;
        totals.convert_ms += timings.convert_ms;
        totals.chunk_ms += timings.chunk_ms;
        totals.dispatch_ms += timings.dispatch_ms;
        totals.collect_ms += timings.collect_ms;
        totals.merge_ms += timings.merge_ms;
        totals.single_ms += timings.single_ms;
        totals.total_ms += timings.total_ms;
        drop(totals);
        *self.last_request.lock() = *timings;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_accumulates_timings() {
        let metrics = ServiceMetrics::default();
        metrics.request_started();
        metrics.request_started();
        let timings = StageTimings {
            acquire_ms: 5,
            total_ms: 7,
            ..StageTimings::default()
        };
        metrics.record_failure(&timings);
        metrics.record_failure(&timings);

        let snapshot = metrics.snapshot(3, 1);
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.failed_requests, 2);
        assert_eq!(snapshot.stage_totals_ms.acquire_ms, 10);
        assert_eq!(snapshot.last_request_ms.total_ms, 7);
        assert_eq!(snapshot.active_sessions, 3);
    }
}
