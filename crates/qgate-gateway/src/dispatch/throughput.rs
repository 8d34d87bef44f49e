use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Handled-envelope count per service since the last report.
///
/// Counters are reset in place with `swap(0)` and never removed, so an
/// increment racing a report is counted in the next interval.
#[derive(Debug, Default)]
pub struct ThroughputCounter {
    counts: DashMap<String, AtomicU64>,
}

impl ThroughputCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, service: &str) {
        if let Some(c) = self.counts.get(service) {
            c.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.counts
            .entry(service.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, service: &str) -> u64 {
        self.counts
            .get(service)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Read and reset every counter; only nonzero ones are returned, sorted.
    pub fn take_all(&self) -> Vec<(String, u64)> {
        let mut out: Vec<(String, u64)> = self
            .counts
            .iter()
            .filter_map(|e| {
                let n = e.value().swap(0, Ordering::Relaxed);
                (n > 0).then(|| (e.key().clone(), n))
            })
            .collect();
        out.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// One log line per service with traffic since the last report.
    pub fn report(&self) -> Vec<(String, u64)> {
        let taken = self.take_all();
        for (service, handled) in &taken {
            tracing::info!(service = %service, handled, "service throughput");
        }
        taken
    }
}
