// crates/echonet-rs/src/history/persist.rs
//! JSON persistence of the history store:
//! `{"version": 1, "data": {"<device-key>": [entry, ...]}}` with entries
//! sorted oldest-first. Loading re-applies the per-device caps, keeping the
//! newest entries.

use crate::error::EchonetError;
use crate::history::{HistoryEntry, HistoryOrigin, HistoryStore, HistoryValue};
use crate::storage;
use crate::types::{Epc, IpAndEoj};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct HistoryFile {
    version: u32,
    data: BTreeMap<String, Vec<StoredEntry>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    /// Milliseconds since the Unix epoch.
    timestamp: u64,
    device: String,
    epc: u8,
    value: StoredValue,
    origin: HistoryOrigin,
    settable: bool,
}

/// The value sum type in its JSON shape: exactly one field set.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    edt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    number: Option<i64>,
}

impl HistoryStore {
    /// Saves every ring to the configured path. No-op without a path.
    pub fn save(&self) -> Result<(), EchonetError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut data: BTreeMap<String, Vec<StoredEntry>> = BTreeMap::new();
        {
            let state = self.state.lock().unwrap();
            for (key, history) in state.iter() {
                let mut entries: Vec<&HistoryEntry> = history
                    .settable
                    .iter()
                    .chain(history.non_settable.iter())
                    .collect();
                entries.sort_by_key(|entry| entry.timestamp);
                data.insert(key.clone(), entries.into_iter().map(encode_entry).collect());
            }
        }
        storage::save_json(
            path,
            &HistoryFile {
                version: CURRENT_VERSION,
                data,
            },
        )
    }

    /// Loads the configured path, replacing in-memory history. Entries
    /// beyond a ring's cap are dropped oldest-first.
    pub fn load(&self) -> Result<(), EchonetError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let Some(file): Option<HistoryFile> = storage::load_json(path)? else {
            return Ok(());
        };
        if file.version != CURRENT_VERSION {
            return Err(EchonetError::Persistence(format!(
                "unsupported history file version {}",
                file.version
            )));
        }

        let mut state = self.state.lock().unwrap();
        state.clear();
        drop(state);
        for (_, entries) in file.data {
            let mut decoded: Vec<HistoryEntry> = entries
                .into_iter()
                .filter_map(|stored| decode_entry(stored).ok())
                .collect();
            decoded.sort_by_key(|entry| entry.timestamp);
            // record() enforces the caps, evicting oldest-first.
            for entry in decoded {
                self.record(entry);
            }
        }
        Ok(())
    }
}

fn encode_entry(entry: &HistoryEntry) -> StoredEntry {
    let value = match &entry.value {
        HistoryValue::Edt(edt) => StoredValue {
            edt: Some(BASE64.encode(edt)),
            ..Default::default()
        },
        HistoryValue::Text(text) => StoredValue {
            string: Some(text.clone()),
            ..Default::default()
        },
        HistoryValue::Number(number) => StoredValue {
            number: Some(*number),
            ..Default::default()
        },
    };
    StoredEntry {
        timestamp: entry
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64,
        device: entry.device.key(),
        epc: entry.epc.0,
        value,
        origin: entry.origin,
        settable: entry.settable,
    }
}

fn decode_entry(stored: StoredEntry) -> Result<HistoryEntry, EchonetError> {
    let device = IpAndEoj::from_key(&stored.device)
        .ok_or_else(|| EchonetError::Persistence(format!("bad device key: {}", stored.device)))?;
    let value = if let Some(edt) = stored.value.edt {
        HistoryValue::Edt(BASE64.decode(edt)?)
    } else if let Some(text) = stored.value.string {
        HistoryValue::Text(text)
    } else if let Some(number) = stored.value.number {
        HistoryValue::Number(number)
    } else {
        return Err(EchonetError::Persistence("history value with no field".into()));
    };
    Ok(HistoryEntry {
        timestamp: SystemTime::UNIX_EPOCH + Duration::from_millis(stored.timestamp),
        device,
        epc: Epc(stored.epc),
        value,
        origin: stored.origin,
        settable: stored.settable,
    })
}
