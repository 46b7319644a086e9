// crates/echonet-rs/src/update/active.rs
//! The active-update registry: at most one in-flight update per device,
//! preemptable with `force`, with a background reaper for entries whose
//! owner died without releasing.

use crate::log::dev_warn;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

struct ActiveEntry {
    started: Instant,
    cancel: CancellationToken,
}

/// Map `"IP CCCC:I"` -> in-flight update. Its lock is always the innermost
/// one: nothing here calls back into the registry or session.
#[derive(Default)]
pub struct ActiveUpdates {
    entries: Mutex<HashMap<String, ActiveEntry>>,
}

impl ActiveUpdates {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks `key` active unless an update is already running for it.
    pub fn try_mark(&self, key: &str, cancel: CancellationToken) -> bool {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(
            key.to_string(),
            ActiveEntry {
                started: Instant::now(),
                cancel,
            },
        );
        true
    }

    /// Cancels and removes any running update for `key`, making room for a
    /// forced one.
    pub fn preempt(&self, key: &str) {
        if let Some(entry) = self.entries.lock().unwrap().remove(key) {
            entry.cancel.cancel();
        }
    }

    pub fn release(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Cancels and evicts entries older than `max_age`. Returns how many
    /// were evicted.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.started.elapsed() > max_age)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            if let Some(entry) = entries.remove(key) {
                dev_warn!("evicting stale update for {} after {:?}", key, max_age);
                entry.cancel.cancel();
            }
        }
        stale.len()
    }

    /// Runs the reaper every `max_age / 2` until cancelled.
    pub async fn run_reaper(self: Arc<Self>, max_age: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(max_age / 2);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.evict_older_than(max_age);
                }
            }
        }
    }
}
