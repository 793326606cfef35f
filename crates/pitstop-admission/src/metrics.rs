//! Lightweight Prometheus-compatible admission metrics using atomic counters.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Final outcome of one admission decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Admitted,
    Rejected,
    InputError,
    StoreError,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::Rejected => "rejected",
            Self::InputError => "input_error",
            Self::StoreError => "store_error",
        }
    }
}

const ALL_OUTCOMES: [Outcome; 4] = [
    Outcome::Admitted,
    Outcome::Rejected,
    Outcome::InputError,
    Outcome::StoreError,
];

/// Admission counters, shared by every request.
pub struct AdmissionMetrics {
    admitted: AtomicU64,
    rejected: AtomicU64,
    input_errors: AtomicU64,
    store_errors: AtomicU64,
    expiry_failures: AtomicU64,
    /// Rejections keyed by tier label.
    rejected_by_tier: DashMap<&'static str, AtomicU64>,
}

impl Default for AdmissionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionMetrics {
    pub fn new() -> Self {
        Self {
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            input_errors: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            expiry_failures: AtomicU64::new(0),
            rejected_by_tier: DashMap::new(),
        }
    }

    fn counter(&self, outcome: Outcome) -> &AtomicU64 {
        match outcome {
            Outcome::Admitted => &self.admitted,
            Outcome::Rejected => &self.rejected,
            Outcome::InputError => &self.input_errors,
            Outcome::StoreError => &self.store_errors,
        }
    }

    pub fn record(&self, outcome: Outcome) {
        self.counter(outcome).fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejection against `tier`.
    pub fn record_rejection(&self, tier: &'static str) {
        self.record(Outcome::Rejected);
        self.rejected_by_tier
            .entry(tier)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiry_failure(&self) {
        self.expiry_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, outcome: Outcome) -> u64 {
        self.counter(outcome).load(Ordering::Relaxed)
    }

    pub fn expiry_failures(&self) -> u64 {
        self.expiry_failures.load(Ordering::Relaxed)
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self, uptime_seconds: u64) -> String {
        let mut out = String::with_capacity(1024);

        gauge(
            &mut out,
            "pitstop_uptime_seconds",
            "Server uptime in seconds",
            uptime_seconds,
        );

        writeln!(
            out,
            "# HELP pitstop_admission_decisions_total Admission decisions by outcome."
        )
        .unwrap();
        writeln!(out, "# TYPE pitstop_admission_decisions_total counter").unwrap();
        for outcome in &ALL_OUTCOMES {
            let label = outcome.label();
            let total = self.count(*outcome);
            writeln!(
                out,
                "pitstop_admission_decisions_total{{outcome=\"{label}\"}} {total}"
            )
            .unwrap();
        }

        writeln!(
            out,
            "# HELP pitstop_rejected_total Requests rejected, by violated tier."
        )
        .unwrap();
        writeln!(out, "# TYPE pitstop_rejected_total counter").unwrap();
        let mut tiers: Vec<(&'static str, u64)> = self
            .rejected_by_tier
            .iter()
            .map(|e| (*e.key(), e.value().load(Ordering::Relaxed)))
            .collect();
        tiers.sort_unstable();
        for (tier, total) in tiers {
            writeln!(out, "pitstop_rejected_total{{tier=\"{tier}\"}} {total}").unwrap();
        }

        writeln!(
            out,
            "# HELP pitstop_expiry_failures_total Counters created without a TTL."
        )
        .unwrap();
        writeln!(out, "# TYPE pitstop_expiry_failures_total counter").unwrap();
        writeln!(
            out,
            "pitstop_expiry_failures_total {}",
            self.expiry_failures()
        )
        .unwrap();

        out
    }
}

fn gauge(out: &mut String, name: &str, help: &str, value: impl std::fmt::Display) {
    writeln!(out, "# HELP {name} {help}").unwrap();
    writeln!(out, "# TYPE {name} gauge").unwrap();
    writeln!(out, "{name} {value}").unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_every_outcome() {
        let metrics = AdmissionMetrics::new();
        metrics.record(Outcome::Admitted);
        metrics.record(Outcome::Admitted);
        metrics.record_rejection("authenticated rate limit by user");
        metrics.record_expiry_failure();

        let text = metrics.render(42);
        assert!(text.contains("pitstop_uptime_seconds 42"));
        assert!(text.contains("pitstop_admission_decisions_total{outcome=\"admitted\"} 2"));
        assert!(text.contains("pitstop_admission_decisions_total{outcome=\"rejected\"} 1"));
        assert!(text.contains("pitstop_admission_decisions_total{outcome=\"store_error\"} 0"));
        assert!(
            text.contains("pitstop_rejected_total{tier=\"authenticated rate limit by user\"} 1")
        );
        assert!(text.contains("pitstop_expiry_failures_total 1"));
    }
}
