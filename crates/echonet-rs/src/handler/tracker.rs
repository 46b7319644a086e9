// crates/echonet-rs/src/handler/tracker.rs
//! Tracks long-running operations and warns (never cancels) when one
//! exceeds its time budget.

use crate::log::dev_warn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// The operation categories and their warning budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Discover,
    UpdateProperties,
    Get,
    Set,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::UpdateProperties => "update_properties",
            Self::Get => "get",
            Self::Set => "set",
        }
    }

    /// How long the operation may run before a warning is logged.
    pub fn budget(&self) -> Duration {
        match self {
            Self::Discover => Duration::from_secs(30),
            Self::UpdateProperties => Duration::from_secs(60),
            Self::Get | Self::Set => Duration::from_secs(10),
        }
    }
}

struct TrackedOperation {
    kind: OperationKind,
    label: String,
    started: Instant,
    warned: bool,
}

#[derive(Default)]
pub struct OperationTracker {
    next_id: AtomicU64,
    operations: Mutex<HashMap<u64, TrackedOperation>>,
}

/// Ends its operation on drop.
pub struct OperationGuard<'a> {
    tracker: &'a OperationTracker,
    id: u64,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.tracker.operations.lock().unwrap().remove(&self.id);
    }
}

impl OperationTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Begins tracking an operation; keep the guard alive for its duration.
    pub fn start(&self, kind: OperationKind, label: String) -> OperationGuard<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.operations.lock().unwrap().insert(
            id,
            TrackedOperation {
                kind,
                label,
                started: Instant::now(),
                warned: false,
            },
        );
        OperationGuard { tracker: self, id }
    }

    pub fn active_count(&self) -> usize {
        self.operations.lock().unwrap().len()
    }

    /// Logs one warning per operation that has exceeded its budget.
    /// Returns what was flagged, for observability and tests.
    pub fn warn_overdue(&self) -> Vec<(OperationKind, String, Duration)> {
        let mut flagged = Vec::new();
        let mut operations = self.operations.lock().unwrap();
        for operation in operations.values_mut() {
            let elapsed = operation.started.elapsed();
            if !operation.warned && elapsed > operation.kind.budget() {
                operation.warned = true;
                dev_warn!(
                    "operation {} ({}) running for {:?}, budget {:?}",
                    operation.kind.name(),
                    operation.label,
                    elapsed,
                    operation.kind.budget()
                );
                flagged.push((operation.kind, operation.label.clone(), elapsed));
            }
        }
        flagged
    }

    /// Periodically flags overdue operations until cancelled.
    pub async fn run_monitor(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.warn_overdue();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_ends_operation_on_drop() {
        let tracker = OperationTracker::new();
        let guard = tracker.start(OperationKind::Get, "192.168.1.10 0130:1".into());
        assert_eq!(tracker.active_count(), 1);
        drop(guard);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_overdue_operation_is_flagged_once() {
        let tracker = OperationTracker::new();
        let _guard = tracker.start(OperationKind::Get, "x".into());
        // Backdate the start so the budget is exceeded.
        {
            let mut operations = tracker.operations.lock().unwrap();
            for operation in operations.values_mut() {
                operation.started = Instant::now() - Duration::from_secs(11);
            }
        }
        let flagged = tracker.warn_overdue();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].0, OperationKind::Get);
        // Already warned; not flagged again.
        assert!(tracker.warn_overdue().is_empty());
        // But still running: the tracker never cancels.
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_within_budget_not_flagged() {
        let tracker = OperationTracker::new();
        let _guard = tracker.start(OperationKind::UpdateProperties, "all".into());
        assert!(tracker.warn_overdue().is_empty());
    }
}
