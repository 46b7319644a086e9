// crates/echonet-rs/src/storage/location.rs
//! Human-readable labels for installation-location values (EPC 0x81), plus
//! a user-chosen display order:
//! `{"aliases": {"#name": "<raw>"}, "order": ["<raw>", ...]}`.

use crate::error::EchonetError;
use crate::storage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Characters that would make a location alias unusable (or dangerous) in a
/// shell-adjacent front-end.
const FORBIDDEN_CHARS: &str = "$`|;&<>\"',/\\[]{}()!@*?=^~%";

/// Maximum alias length, leading `#` included.
const MAX_ALIAS_LEN: usize = 32;

/// Checks a location alias: it must start with `#`, contain no further
/// `#`, no whitespace, none of the shell metacharacters, and fit in 32
/// characters.
pub fn validate_location_alias(alias: &str) -> Result<(), EchonetError> {
    let Some(rest) = alias.strip_prefix('#') else {
        return Err(EchonetError::InvalidName(format!(
            "location alias '{}' must start with '#'",
            alias
        )));
    };
    if rest.is_empty() {
        return Err(EchonetError::InvalidName(
            "location alias must not be bare '#'".into(),
        ));
    }
    if rest.contains('#') {
        return Err(EchonetError::InvalidName(format!(
            "location alias '{}' must not repeat '#'",
            alias
        )));
    }
    if rest.chars().any(char::is_whitespace) {
        return Err(EchonetError::InvalidName(format!(
            "location alias '{}' must not contain whitespace",
            alias
        )));
    }
    if let Some(bad) = rest.chars().find(|c| FORBIDDEN_CHARS.contains(*c)) {
        return Err(EchonetError::InvalidName(format!(
            "location alias '{}' contains forbidden character '{}'",
            alias, bad
        )));
    }
    if alias.chars().count() > MAX_ALIAS_LEN {
        return Err(EchonetError::InvalidName(format!(
            "location alias '{}' exceeds {} characters",
            alias, MAX_ALIAS_LEN
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct LocationFile {
    aliases: BTreeMap<String, String>,
    order: Vec<String>,
}

pub struct LocationSettings {
    state: Mutex<LocationFile>,
    path: Option<PathBuf>,
}

impl LocationSettings {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            state: Mutex::new(LocationFile::default()),
            path,
        }
    }

    /// Labels a raw location value with `alias` (e.g. `#kitchen`).
    pub fn set_alias(&self, alias: &str, raw_value: &str) -> Result<(), EchonetError> {
        validate_location_alias(alias)?;
        self.state
            .lock()
            .unwrap()
            .aliases
            .insert(alias.to_string(), raw_value.to_string());
        self.save()
    }

    pub fn remove_alias(&self, alias: &str) -> Result<(), EchonetError> {
        let removed = self.state.lock().unwrap().aliases.remove(alias).is_some();
        if !removed {
            return Err(EchonetError::InvalidName(format!(
                "no such location alias: {}",
                alias
            )));
        }
        self.save()
    }

    /// The alias labelling `raw_value`, if any.
    pub fn alias_for(&self, raw_value: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .aliases
            .iter()
            .find(|(_, raw)| raw.as_str() == raw_value)
            .map(|(alias, _)| alias.clone())
    }

    pub fn aliases(&self) -> BTreeMap<String, String> {
        self.state.lock().unwrap().aliases.clone()
    }

    /// Replaces the preferred display order of raw location values.
    pub fn set_order(&self, order: Vec<String>) -> Result<(), EchonetError> {
        self.state.lock().unwrap().order = order;
        self.save()
    }

    pub fn order(&self) -> Vec<String> {
        self.state.lock().unwrap().order.clone()
    }

    pub fn save(&self) -> Result<(), EchonetError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = self.state.lock().unwrap().clone();
        storage::save_json(path, &snapshot)
    }

    pub fn load(&self) -> Result<(), EchonetError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let Some(file): Option<LocationFile> = storage::load_json(path)? else {
            return Ok(());
        };
        for alias in file.aliases.keys() {
            validate_location_alias(alias)?;
        }
        *self.state.lock().unwrap() = file;
        Ok(())
    }
}
