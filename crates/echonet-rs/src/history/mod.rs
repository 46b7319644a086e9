// crates/echonet-rs/src/history/mod.rs
//! Bounded per-device log of property changes and online/offline events.
//!
//! Each device keeps two rings: one for settable EPCs (user-visible state
//! someone may have commanded) and one for non-settable EPCs (sensor-style
//! readings). The split lets the noisy sensor stream age out without
//! pushing command history off the end.

pub mod persist;

use crate::types::{Epc, IpAndEoj};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Where a history entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryOrigin {
    /// The device announced the change (INF/INFC) or a Get observed it.
    Notification,
    /// We commanded the change.
    Set,
    /// The device came back online.
    Online,
    /// The device stopped responding.
    Offline,
}

/// A recorded value: raw bytes, a decoded human-readable alias, or a number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryValue {
    Edt(Vec<u8>),
    Text(String),
    Number(i64),
}

/// One history record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub timestamp: SystemTime,
    pub device: IpAndEoj,
    pub epc: Epc,
    pub value: HistoryValue,
    pub origin: HistoryOrigin,
    pub settable: bool,
}

/// Tunables for the history store.
#[derive(Debug, Clone)]
pub struct HistoryOptions {
    /// Ring capacity for settable EPC entries.
    pub settable_cap: usize,
    /// Ring capacity for non-settable EPC entries.
    pub non_settable_cap: usize,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self {
            settable_cap: 200,
            non_settable_cap: 100,
        }
    }
}

/// The two rings of one device, each oldest-first.
#[derive(Debug, Default)]
struct DeviceHistory {
    settable: VecDeque<HistoryEntry>,
    non_settable: VecDeque<HistoryEntry>,
}

pub struct HistoryStore {
    options: HistoryOptions,
    state: Mutex<HashMap<String, DeviceHistory>>,
    path: Option<PathBuf>,
}

impl HistoryStore {
    pub fn new(options: HistoryOptions, path: Option<PathBuf>) -> Self {
        Self {
            options,
            state: Mutex::new(HashMap::new()),
            path,
        }
    }

    pub fn options(&self) -> &HistoryOptions {
        &self.options
    }

    /// Appends one entry, evicting the oldest entry of the same ring when
    /// the cap is reached.
    pub fn record(&self, entry: HistoryEntry) {
        let mut state = self.state.lock().unwrap();
        let history = state.entry(entry.device.key()).or_default();
        let (ring, cap) = if entry.settable {
            (&mut history.settable, self.options.settable_cap)
        } else {
            (&mut history.non_settable, self.options.non_settable_cap)
        };
        ring.push_back(entry);
        while ring.len() > cap {
            ring.pop_front();
        }
    }

    /// Records an online/offline transition. These carry EPC 0 and live in
    /// the non-settable ring.
    pub fn record_availability(&self, device: IpAndEoj, online: bool, timestamp: SystemTime) {
        self.record(HistoryEntry {
            timestamp,
            device,
            epc: Epc(0),
            value: HistoryValue::Number(if online { 1 } else { 0 }),
            origin: if online {
                HistoryOrigin::Online
            } else {
                HistoryOrigin::Offline
            },
            settable: false,
        });
    }

    /// Both rings of `device` merged by timestamp, newest first.
    pub fn device_history(&self, device: &IpAndEoj) -> Vec<HistoryEntry> {
        let state = self.state.lock().unwrap();
        let Some(history) = state.get(&device.key()) else {
            return Vec::new();
        };
        let mut merged: Vec<HistoryEntry> = history
            .settable
            .iter()
            .chain(history.non_settable.iter())
            .cloned()
            .collect();
        merged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        merged
    }

    /// Devices with recorded history, by canonical key.
    pub fn device_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// True when a `Set` entry for the same device, EPC and value was
    /// recorded within `within` of `now`. Used to drop notifications that
    /// merely echo our own Set back at us.
    pub fn is_duplicate_notification(
        &self,
        device: &IpAndEoj,
        epc: Epc,
        value: &HistoryValue,
        within: Duration,
        now: SystemTime,
    ) -> bool {
        let state = self.state.lock().unwrap();
        let Some(history) = state.get(&device.key()) else {
            return false;
        };
        // Set entries only ever land in the settable ring; scan it
        // newest-first and stop at the window edge.
        history.settable.iter().rev().any(|entry| {
            entry.origin == HistoryOrigin::Set
                && entry.epc == epc
                && entry.value == *value
                && now
                    .duration_since(entry.timestamp)
                    .map_or(false, |age| age <= within)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Eoj;

    fn device() -> IpAndEoj {
        IpAndEoj::new("192.168.1.10".parse().unwrap(), Eoj::new(0x0130, 1))
    }

    fn entry_at(t: SystemTime, epc: u8, origin: HistoryOrigin, settable: bool) -> HistoryEntry {
        HistoryEntry {
            timestamp: t,
            device: device(),
            epc: Epc(epc),
            value: HistoryValue::Edt(vec![0x30]),
            origin,
            settable,
        }
    }

    #[test]
    fn test_rings_are_capped_independently() {
        let store = HistoryStore::new(
            HistoryOptions {
                settable_cap: 2,
                non_settable_cap: 3,
            },
            None,
        );
        let base = SystemTime::UNIX_EPOCH;
        for i in 0..5 {
            let t = base + Duration::from_secs(i);
            store.record(entry_at(t, 0x80, HistoryOrigin::Set, true));
            store.record(entry_at(t, 0xBB, HistoryOrigin::Notification, false));
        }
        let merged = store.device_history(&device());
        let settable = merged.iter().filter(|e| e.settable).count();
        let non_settable = merged.iter().filter(|e| !e.settable).count();
        assert_eq!(settable, 2);
        assert_eq!(non_settable, 3);
        // The newest entries survive.
        assert_eq!(merged[0].timestamp, base + Duration::from_secs(4));
    }

    #[test]
    fn test_merged_read_is_newest_first() {
        let store = HistoryStore::new(HistoryOptions::default(), None);
        let base = SystemTime::UNIX_EPOCH;
        store.record(entry_at(base + Duration::from_secs(1), 0x80, HistoryOrigin::Set, true));
        store.record(entry_at(
            base + Duration::from_secs(3),
            0xBB,
            HistoryOrigin::Notification,
            false,
        ));
        store.record(entry_at(base + Duration::from_secs(2), 0x80, HistoryOrigin::Set, true));

        let merged = store.device_history(&device());
        let times: Vec<SystemTime> = merged.iter().map(|e| e.timestamp).collect();
        assert_eq!(
            times,
            vec![
                base + Duration::from_secs(3),
                base + Duration::from_secs(2),
                base + Duration::from_secs(1),
            ]
        );
    }

    #[test]
    fn test_set_echo_dedup_window() {
        let store = HistoryStore::new(HistoryOptions::default(), None);
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        store.record(HistoryEntry {
            timestamp: t0,
            device: device(),
            epc: Epc(0x80),
            value: HistoryValue::Edt(vec![0x30]),
            origin: HistoryOrigin::Set,
            settable: true,
        });

        let value = HistoryValue::Edt(vec![0x30]);
        // One second later: inside the 2s window.
        assert!(store.is_duplicate_notification(
            &device(),
            Epc(0x80),
            &value,
            Duration::from_secs(2),
            t0 + Duration::from_secs(1),
        ));
        // Three seconds later: outside.
        assert!(!store.is_duplicate_notification(
            &device(),
            Epc(0x80),
            &value,
            Duration::from_secs(2),
            t0 + Duration::from_secs(3),
        ));
        // Different value never matches.
        assert!(!store.is_duplicate_notification(
            &device(),
            Epc(0x80),
            &HistoryValue::Edt(vec![0x31]),
            Duration::from_secs(2),
            t0 + Duration::from_secs(1),
        ));
    }

    #[test]
    fn test_notification_origin_is_not_a_duplicate_source() {
        let store = HistoryStore::new(HistoryOptions::default(), None);
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        store.record(entry_at(t0, 0x80, HistoryOrigin::Notification, true));
        assert!(!store.is_duplicate_notification(
            &device(),
            Epc(0x80),
            &HistoryValue::Edt(vec![0x30]),
            Duration::from_secs(2),
            t0 + Duration::from_secs(1),
        ));
    }

    #[test]
    fn test_availability_entries_carry_epc_zero() {
        let store = HistoryStore::new(HistoryOptions::default(), None);
        store.record_availability(device(), false, SystemTime::now());
        let merged = store.device_history(&device());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].epc, Epc(0));
        assert_eq!(merged[0].origin, HistoryOrigin::Offline);
    }
}
