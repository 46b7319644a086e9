// crates/echonet-rs/src/storage/group.rs
//! Named device groups: `{@group -> [id-string, ...]}`.

use crate::error::EchonetError;
use crate::identity::DeviceIdentifier;
use crate::storage;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Group names start with `@` to keep them distinguishable from aliases
/// anywhere both are accepted.
pub fn validate_group_name(name: &str) -> Result<(), EchonetError> {
    let Some(rest) = name.strip_prefix('@') else {
        return Err(EchonetError::InvalidName(format!(
            "group name '{}' must start with '@'",
            name
        )));
    };
    if rest.is_empty() {
        return Err(EchonetError::InvalidName("group name must not be bare '@'".into()));
    }
    if rest.chars().any(char::is_whitespace) {
        return Err(EchonetError::InvalidName(format!(
            "group name '{}' must not contain whitespace",
            name
        )));
    }
    Ok(())
}

pub struct GroupStore {
    groups: Mutex<BTreeMap<String, Vec<DeviceIdentifier>>>,
    path: Option<PathBuf>,
}

impl GroupStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            groups: Mutex::new(BTreeMap::new()),
            path,
        }
    }

    /// Creates or replaces a group with the given members.
    pub fn set(&self, name: &str, members: Vec<DeviceIdentifier>) -> Result<(), EchonetError> {
        validate_group_name(name)?;
        self.groups.lock().unwrap().insert(name.to_string(), members);
        self.save()
    }

    /// Adds members to an existing or new group, skipping duplicates.
    pub fn add_members(
        &self,
        name: &str,
        members: &[DeviceIdentifier],
    ) -> Result<(), EchonetError> {
        validate_group_name(name)?;
        {
            let mut groups = self.groups.lock().unwrap();
            let group = groups.entry(name.to_string()).or_default();
            for member in members {
                if !group.contains(member) {
                    group.push(*member);
                }
            }
        }
        self.save()
    }

    /// Removes members from a group; the group itself stays, even empty.
    pub fn remove_members(
        &self,
        name: &str,
        members: &[DeviceIdentifier],
    ) -> Result<(), EchonetError> {
        {
            let mut groups = self.groups.lock().unwrap();
            let Some(group) = groups.get_mut(name) else {
                return Err(EchonetError::InvalidName(format!("no such group: {}", name)));
            };
            group.retain(|member| !members.contains(member));
        }
        self.save()
    }

    pub fn remove(&self, name: &str) -> Result<(), EchonetError> {
        let removed = self.groups.lock().unwrap().remove(name).is_some();
        if !removed {
            return Err(EchonetError::InvalidName(format!("no such group: {}", name)));
        }
        self.save()
    }

    pub fn get(&self, name: &str) -> Option<Vec<DeviceIdentifier>> {
        self.groups.lock().unwrap().get(name).cloned()
    }

    pub fn list(&self) -> BTreeMap<String, Vec<DeviceIdentifier>> {
        self.groups.lock().unwrap().clone()
    }

    pub fn save(&self) -> Result<(), EchonetError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let text: BTreeMap<String, Vec<String>> = self
            .groups
            .lock()
            .unwrap()
            .iter()
            .map(|(name, members)| {
                (
                    name.clone(),
                    members.iter().map(|member| member.to_string()).collect(),
                )
            })
            .collect();
        storage::save_json(path, &text)
    }

    pub fn load(&self) -> Result<(), EchonetError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let Some(text): Option<BTreeMap<String, Vec<String>>> = storage::load_json(path)? else {
            return Ok(());
        };
        let mut parsed = BTreeMap::new();
        for (name, members) in text {
            let members = members
                .iter()
                .map(|id_string| id_string.parse::<DeviceIdentifier>())
                .collect::<Result<Vec<_>, _>>()?;
            parsed.insert(name, members);
        }
        *self.groups.lock().unwrap() = parsed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentificationNumber;
    use crate::types::Eoj;

    fn member(n: u8) -> DeviceIdentifier {
        DeviceIdentifier::new(
            Eoj::new(0x0130, 1),
            IdentificationNumber::new([0, 0, 0x77], [n; 13]),
        )
    }

    #[test]
    fn test_group_name_validation() {
        assert!(validate_group_name("@living").is_ok());
        assert!(validate_group_name("living").is_err());
        assert!(validate_group_name("@").is_err());
        assert!(validate_group_name("@a b").is_err());
    }

    #[test]
    fn test_membership_operations() {
        let store = GroupStore::new(None);
        store.add_members("@floor1", &[member(1), member(2)]).unwrap();
        // Duplicates are skipped.
        store.add_members("@floor1", &[member(2), member(3)]).unwrap();
        assert_eq!(
            store.get("@floor1").unwrap(),
            vec![member(1), member(2), member(3)]
        );

        store.remove_members("@floor1", &[member(2)]).unwrap();
        assert_eq!(store.get("@floor1").unwrap(), vec![member(1), member(3)]);

        store.remove("@floor1").unwrap();
        assert!(store.get("@floor1").is_none());
        assert!(store.remove("@floor1").is_err());
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groups.json");
        let store = GroupStore::new(Some(path.clone()));
        store.set("@floor1", vec![member(1)]).unwrap();

        let restored = GroupStore::new(Some(path));
        restored.load().unwrap();
        assert_eq!(restored.get("@floor1").unwrap(), vec![member(1)]);
    }
}
