// crates/echonet-rs/src/registry/persist.rs
//! Versioned JSON persistence of the device registry.
//!
//! Current format (v1):
//! ```json
//! {"version": 1, "data": {"<ip>": {"<CCCC:I>": {"0x<epc>": "<base64 EDT>"}}}}
//! ```
//! Legacy format (no `version` key) nests each property as
//! `{"EPC": <decimal>, "EDT": "<base64>"}` keyed by the decimal EPC. The
//! loader detects the format by key shape and accepts both. Timestamps and
//! offline state are never persisted.

use crate::error::EchonetError;
use crate::frame::Property;
use crate::log::dev_debug;
use crate::object::DeviceProperties;
use crate::registry::{DeviceRegistry, RegistryState};
use crate::storage;
use crate::types::{Eoj, Epc};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFileV1 {
    version: u32,
    data: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
}

#[derive(Debug, Deserialize)]
struct LegacyProperty {
    #[serde(rename = "EPC")]
    epc: u8,
    #[serde(rename = "EDT")]
    edt: Option<String>,
}

type LegacyFile = BTreeMap<String, BTreeMap<String, BTreeMap<String, LegacyProperty>>>;

impl DeviceRegistry {
    /// Saves the registry (properties only) to its configured path.
    ///
    /// The save mutex serializes whole-file writes; the registry read lock
    /// is held while the snapshot is serialized. No-op without a path.
    pub fn save(&self) -> Result<(), EchonetError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.save_mutex.lock().unwrap();
        let file = {
            let state = self.state.read().unwrap();
            serialize_state(&state)
        };
        storage::save_json(path, &file)?;
        dev_debug!("registry saved to {}", path.display());
        Ok(())
    }

    /// Loads the registry from its configured path, replacing all cached
    /// properties. Timestamps and offline flags start empty.
    ///
    /// A missing file leaves the registry empty. A file without a
    /// `version` key is parsed as the legacy format.
    pub fn load(&self) -> Result<(), EchonetError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let Some(content) = storage::load_text(path)? else {
            return Ok(());
        };
        let data = parse_registry_json(&content)?;
        let mut state = self.state.write().unwrap();
        state.data = data;
        state.timestamps.clear();
        state.offline.clear();
        Ok(())
    }
}

fn serialize_state(state: &RegistryState) -> RegistryFileV1 {
    let mut data = BTreeMap::new();
    for (ip, properties) in &state.data {
        let mut objects = BTreeMap::new();
        for eoj in properties.eojs() {
            let mut epcs = BTreeMap::new();
            for property in properties.properties_of(eoj) {
                epcs.insert(
                    format!("0x{:02x}", property.epc.0),
                    BASE64.encode(&property.edt),
                );
            }
            objects.insert(eoj.to_string(), epcs);
        }
        data.insert(ip.to_string(), objects);
    }
    RegistryFileV1 {
        version: CURRENT_VERSION,
        data,
    }
}

/// Parses either format, detected by the presence of a top-level
/// `version` key. An empty object is treated as (empty) v1 data.
fn parse_registry_json(content: &str) -> Result<HashMap<IpAddr, DeviceProperties>, EchonetError> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let is_v1 = value
        .as_object()
        .is_some_and(|object| object.contains_key("version"));
    if is_v1 {
        let file: RegistryFileV1 = serde_json::from_value(value)?;
        if file.version != CURRENT_VERSION {
            return Err(EchonetError::Persistence(format!(
                "unsupported registry file version {}",
                file.version
            )));
        }
        parse_v1(file)
    } else {
        let file: LegacyFile = serde_json::from_value(value)?;
        parse_legacy(file)
    }
}

fn parse_v1(file: RegistryFileV1) -> Result<HashMap<IpAddr, DeviceProperties>, EchonetError> {
    let mut data = HashMap::new();
    for (ip_text, objects) in file.data {
        let ip = parse_ip(&ip_text)?;
        let properties: &mut DeviceProperties = data.entry(ip).or_default();
        for (eoj_text, epcs) in objects {
            let eoj = parse_eoj(&eoj_text)?;
            for (epc_text, edt_base64) in epcs {
                let epc = parse_hex_epc(&epc_text)?;
                let edt = BASE64.decode(edt_base64)?;
                properties.set(eoj, Property::new(epc, edt));
            }
        }
    }
    Ok(data)
}

fn parse_legacy(file: LegacyFile) -> Result<HashMap<IpAddr, DeviceProperties>, EchonetError> {
    let mut data = HashMap::new();
    for (ip_text, objects) in file {
        let ip = parse_ip(&ip_text)?;
        let properties: &mut DeviceProperties = data.entry(ip).or_default();
        for (eoj_text, epcs) in objects {
            let eoj = parse_eoj(&eoj_text)?;
            for (_, legacy) in epcs {
                let edt = match legacy.edt {
                    Some(text) => BASE64.decode(text)?,
                    None => Vec::new(),
                };
                properties.set(eoj, Property::new(Epc(legacy.epc), edt));
            }
        }
    }
    Ok(data)
}

fn parse_ip(text: &str) -> Result<IpAddr, EchonetError> {
    text.parse()
        .map_err(|_| EchonetError::Persistence(format!("bad IP key: {}", text)))
}

fn parse_eoj(text: &str) -> Result<Eoj, EchonetError> {
    text.parse()
        .map_err(|_| EchonetError::Persistence(format!("bad EOJ key: {}", text)))
}

fn parse_hex_epc(text: &str) -> Result<Epc, EchonetError> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .ok_or_else(|| EchonetError::Persistence(format!("bad EPC key: {}", text)))?;
    u8::from_str_radix(digits, 16)
        .map(Epc)
        .map_err(|_| EchonetError::Persistence(format!("bad EPC key: {}", text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRegistry;
    use crate::types::IpAndEoj;
    use std::time::SystemTime;

    #[test]
    fn test_save_load_roundtrip_preserves_properties_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");

        let (registry, _rx) = DeviceRegistry::new(Some(path.clone()));
        let device = IpAndEoj::new("192.168.1.10".parse().unwrap(), Eoj::new(0x0130, 1));
        registry.register_properties(
            device,
            vec![
                Property::new(Epc(0x80), vec![0x30]),
                Property::new(Epc(0x9F), vec![1, 0x80]),
            ],
            SystemTime::now(),
        );
        registry.set_offline(device, true);
        registry.save().unwrap();

        let (restored, _rx2) = DeviceRegistry::new(Some(path));
        restored.load().unwrap();
        assert!(restored.has_device(&device));
        assert_eq!(
            restored.get_property(&device, Epc(0x80)).unwrap().edt,
            vec![0x30]
        );
        // Timestamps and offline state are not persisted.
        assert!(restored.last_update_time(&device).is_none());
        assert!(!restored.is_offline(&device));
    }

    #[test]
    fn test_legacy_format_load() {
        let content = r#"{"192.168.1.200":{"0130:1":{"128":{"EPC":128,"EDT":"MQ=="}}}}"#;
        let data = parse_registry_json(content).unwrap();
        let ip: IpAddr = "192.168.1.200".parse().unwrap();
        let properties = data.get(&ip).unwrap();
        let property = properties.get(Eoj::new(0x0130, 1), Epc(0x80)).unwrap();
        assert_eq!(property.edt, vec![0x31]);
    }

    #[test]
    fn test_legacy_and_v1_yield_identical_properties() {
        let legacy = r#"{"192.168.1.200":{"0130:1":{"128":{"EPC":128,"EDT":"MQ=="}}}}"#;
        let v1 = r#"{"version":1,"data":{"192.168.1.200":{"0130:1":{"0x80":"MQ=="}}}}"#;
        assert_eq!(
            parse_registry_json(legacy).unwrap(),
            parse_registry_json(v1).unwrap()
        );
    }

    #[test]
    fn test_empty_object_is_treated_as_v1() {
        // No version key and no data either; the current code reads it as
        // an (empty) legacy file, which yields the same empty registry.
        let data = parse_registry_json("{}").unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let content = r#"{"version":99,"data":{}}"#;
        assert!(matches!(
            parse_registry_json(content),
            Err(EchonetError::Persistence(_))
        ));
    }

    #[test]
    fn test_wildcard_eoj_key_accepted() {
        let v1 = r#"{"version":1,"data":{"192.168.1.5":{"0EF0":{"0x80":"MA=="}}}}"#;
        let data = parse_registry_json(v1).unwrap();
        let ip: IpAddr = "192.168.1.5".parse().unwrap();
        assert!(data.get(&ip).unwrap().contains(Eoj::new(0x0EF0, 0)));
    }

    #[test]
    fn test_load_missing_file_leaves_registry_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, _rx) = DeviceRegistry::new(Some(dir.path().join("absent.json")));
        registry.load().unwrap();
        assert!(registry.devices().is_empty());
    }
}
