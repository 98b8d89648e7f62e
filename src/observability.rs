use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Coordination counters for the whole process
#[derive(Debug, Default)]
pub struct FieldMetrics {
    pub senses: AtomicU64,
    pub claims: AtomicU64,
    pub claim_conflicts: AtomicU64,
    pub resolves: AtomicU64,
    pub releases: AtomicU64,
    pub reclaims: AtomicU64,
    pub deposits: AtomicU64,
    pub audit_failures: AtomicU64,
}

impl FieldMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sense(&self) {
        self.senses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claim(&self) {
        self.claims.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claim_conflict(&self) {
        self.claim_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolve(&self) {
        self.resolves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reclaim(&self) {
        self.reclaims.fetch_add(1, Ordering::Relaxed);
        warn!("Claim reclaimed from a dead agent");
    }

    pub fn record_deposit(&self, nodes: u64) {
        self.deposits.fetch_add(nodes, Ordering::Relaxed);
    }

    pub fn record_audit_failure(&self) {
        self.audit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> FieldStats {
        FieldStats {
            senses: self.senses.load(Ordering::Relaxed),
            claims: self.claims.load(Ordering::Relaxed),
            claim_conflicts: self.claim_conflicts.load(Ordering::Relaxed),
            resolves: self.resolves.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            reclaims: self.reclaims.load(Ordering::Relaxed),
            deposits: self.deposits.load(Ordering::Relaxed),
            audit_failures: self.audit_failures.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            senses = stats.senses,
            claims = stats.claims,
            claim_conflicts = stats.claim_conflicts,
            resolves = stats.resolves,
            releases = stats.releases,
            reclaims = stats.reclaims,
            deposits = stats.deposits,
            audit_failures = stats.audit_failures,
            "Field coordination metrics"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldStats {
    pub senses: u64,
    pub claims: u64,
    pub claim_conflicts: u64,
    pub resolves: u64,
    pub releases: u64,
    pub reclaims: u64,
    pub deposits: u64,
    pub audit_failures: u64,
}

/// Global metrics instance
static FIELD_METRICS: std::sync::LazyLock<FieldMetrics> = std::sync::LazyLock::new(FieldMetrics::new);

pub fn field_metrics() -> &'static FieldMetrics {
    &FIELD_METRICS
}

/// Time an operation and log its duration
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {}
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        tracing::debug!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}

#[macro_export]
macro_rules! time_operation {
    ($operation:expr) => {
        let _timer = $crate::observability::OperationTimer::new($operation);
    };
}
