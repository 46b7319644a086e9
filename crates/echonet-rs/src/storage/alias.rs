// crates/echonet-rs/src/storage/alias.rs
//! User-defined device aliases: `{alias -> id-string}`.

use crate::error::EchonetError;
use crate::identity::DeviceIdentifier;
use crate::storage;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Maps human names ("kitchen-aircon") to stable device identifiers.
pub struct AliasStore {
    aliases: Mutex<BTreeMap<String, DeviceIdentifier>>,
    path: Option<PathBuf>,
}

/// Checks an alias against the naming rules: non-empty, not an even-length
/// pure-hex string (ambiguous with raw bytes), and not starting with a
/// symbol.
pub fn validate_alias(alias: &str) -> Result<(), EchonetError> {
    if alias.is_empty() {
        return Err(EchonetError::InvalidName("alias must not be empty".into()));
    }
    let all_hex = alias.chars().all(|c| c.is_ascii_hexdigit());
    if all_hex && alias.len() % 2 == 0 {
        return Err(EchonetError::InvalidName(format!(
            "alias '{}' looks like raw hex bytes",
            alias
        )));
    }
    let first = alias.chars().next().unwrap();
    if !first.is_alphanumeric() {
        return Err(EchonetError::InvalidName(format!(
            "alias '{}' must not start with a symbol",
            alias
        )));
    }
    Ok(())
}

impl AliasStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            aliases: Mutex::new(BTreeMap::new()),
            path,
        }
    }

    /// Creates or replaces an alias.
    pub fn set(&self, alias: &str, identifier: DeviceIdentifier) -> Result<(), EchonetError> {
        validate_alias(alias)?;
        self.aliases
            .lock()
            .unwrap()
            .insert(alias.to_string(), identifier);
        self.save()
    }

    pub fn remove(&self, alias: &str) -> Result<(), EchonetError> {
        let removed = self.aliases.lock().unwrap().remove(alias).is_some();
        if !removed {
            return Err(EchonetError::InvalidName(format!(
                "no such alias: {}",
                alias
            )));
        }
        self.save()
    }

    pub fn get(&self, alias: &str) -> Option<DeviceIdentifier> {
        self.aliases.lock().unwrap().get(alias).copied()
    }

    /// The first alias (in name order) pointing at `identifier`.
    pub fn alias_for(&self, identifier: &DeviceIdentifier) -> Option<String> {
        self.aliases
            .lock()
            .unwrap()
            .iter()
            .find(|(_, id)| *id == identifier)
            .map(|(alias, _)| alias.clone())
    }

    pub fn list(&self) -> BTreeMap<String, DeviceIdentifier> {
        self.aliases.lock().unwrap().clone()
    }

    pub fn save(&self) -> Result<(), EchonetError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text: BTreeMap<String, String> = self
            .aliases
            .lock()
            .unwrap()
            .iter()
            .map(|(alias, id)| (alias.clone(), id.to_string()))
            .collect();
        storage::save_json(path, &text)
    }

    pub fn load(&self) -> Result<(), EchonetError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let Some(text): Option<BTreeMap<String, String>> = storage::load_json(path)? else {
            return Ok(());
        };
        let mut parsed = BTreeMap::new();
        for (alias, id_string) in text {
            let identifier = id_string.parse::<DeviceIdentifier>()?;
            parsed.insert(alias, identifier);
        }
        *self.aliases.lock().unwrap() = parsed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentificationNumber;
    use crate::types::Eoj;

    fn identifier() -> DeviceIdentifier {
        DeviceIdentifier::new(
            Eoj::new(0x0130, 1),
            IdentificationNumber::new([0, 0, 0x77], [0x09; 13]),
        )
    }

    #[test]
    fn test_validation_rules() {
        assert!(validate_alias("kitchen-aircon").is_ok());
        assert!(validate_alias("1f").is_err()); // even-length pure hex
        assert!(validate_alias("1fa").is_ok()); // odd length is unambiguous
        assert!(validate_alias("abcd").is_err()); // even-length pure hex
        assert!(validate_alias("").is_err());
        assert!(validate_alias("-kitchen").is_err()); // leading symbol
        assert!(validate_alias("@group").is_err());
    }

    #[test]
    fn test_set_get_remove() {
        let store = AliasStore::new(None);
        store.set("kitchen", identifier()).unwrap();
        assert_eq!(store.get("kitchen"), Some(identifier()));
        assert_eq!(store.alias_for(&identifier()), Some("kitchen".to_string()));
        store.remove("kitchen").unwrap();
        assert!(store.get("kitchen").is_none());
        assert!(store.remove("kitchen").is_err());
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aliases.json");
        let store = AliasStore::new(Some(path.clone()));
        store.set("kitchen", identifier()).unwrap();

        let restored = AliasStore::new(Some(path));
        restored.load().unwrap();
        assert_eq!(restored.get("kitchen"), Some(identifier()));
    }
}
