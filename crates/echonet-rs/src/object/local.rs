// crates/echonet-rs/src/object/local.rs
//! The controller's own ECHONET objects: what we answer to peers'
//! Get/Set/INF_REQ requests with.

use crate::error::EchonetError;
use crate::frame::{Property, PropertyMap};
use crate::identity::IdentificationNumber;
use crate::object::profile::{
    EPC_ANNOUNCEMENT_MAP, EPC_GET_MAP, EPC_ID_NUMBER, EPC_INSTANCE_LIST_NOTIFICATION,
    EPC_MANUFACTURER, EPC_OPERATION_STATUS, EPC_SELF_NODE_CLASS_LIST_S, EPC_SELF_NODE_CLASSES,
    EPC_SELF_NODE_INSTANCE_LIST_S, EPC_SELF_NODE_INSTANCES, EPC_SET_MAP, EPC_VERSION,
    encode_class_list, encode_instance_list,
};
use crate::object::DeviceProperties;
use crate::types::{CONTROLLER_OBJECT, ClassCode, Edt, Eoj, Epc, NODE_PROFILE_OBJECT};
use std::collections::BTreeSet;

/// EPCs that are never writable on local objects, regardless of presence in
/// the stored property set. The three property maps and the node-profile
/// composition properties are system-managed and computed on read.
const READ_ONLY_EPCS: &[Epc] = &[
    EPC_VERSION,
    EPC_ID_NUMBER,
    EPC_MANUFACTURER,
    EPC_ANNOUNCEMENT_MAP,
    EPC_SET_MAP,
    EPC_GET_MAP,
    EPC_SELF_NODE_INSTANCES,
    EPC_SELF_NODE_CLASSES,
    EPC_INSTANCE_LIST_NOTIFICATION,
    EPC_SELF_NODE_INSTANCE_LIST_S,
    EPC_SELF_NODE_CLASS_LIST_S,
];

/// EPCs whose changes are spontaneously announced with ESV INF.
const ANNOUNCED_EPCS: &[Epc] = &[EPC_OPERATION_STATUS, EPC_INSTANCE_LIST_NOTIFICATION];

/// Node-profile-only EPCs that exist computed rather than stored.
const NODE_PROFILE_COMPUTED: &[Epc] = &[
    EPC_SELF_NODE_INSTANCES,
    EPC_SELF_NODE_CLASSES,
    EPC_INSTANCE_LIST_NOTIFICATION,
    EPC_SELF_NODE_INSTANCE_LIST_S,
    EPC_SELF_NODE_CLASS_LIST_S,
];

/// ECHONET Lite version advertised by the node profile (release 1, format 1).
const NODE_PROFILE_VERSION: [u8; 4] = [0x01, 0x0D, 0x01, 0x00];

/// The controller's local object store.
///
/// Property maps and node-profile composition lists are never stored; they
/// are derived from the actual property set on every read so they cannot go
/// stale and cannot be written directly.
#[derive(Debug, Clone)]
pub struct LocalObjects {
    properties: DeviceProperties,
}

impl LocalObjects {
    /// Builds the default controller node: a Node Profile Object plus one
    /// controller object, identified by `id`.
    pub fn new(id: IdentificationNumber) -> Self {
        let mut properties = DeviceProperties::new();

        properties.set_all(
            NODE_PROFILE_OBJECT,
            [
                Property::new(EPC_OPERATION_STATUS, vec![0x30]),
                Property::new(EPC_VERSION, NODE_PROFILE_VERSION.to_vec()),
                Property::new(EPC_ID_NUMBER, id.to_edt()),
                Property::new(EPC_MANUFACTURER, id.manufacturer.to_vec()),
            ],
        );
        properties.set_all(
            CONTROLLER_OBJECT,
            [
                Property::new(EPC_OPERATION_STATUS, vec![0x30]),
                Property::new(EPC_MANUFACTURER, id.manufacturer.to_vec()),
            ],
        );

        Self { properties }
    }

    /// All local EOJs.
    pub fn eojs(&self) -> Vec<Eoj> {
        self.properties.eojs()
    }

    /// Local device EOJs, node profile excluded.
    pub fn device_eojs(&self) -> Vec<Eoj> {
        self.properties
            .eojs()
            .into_iter()
            .filter(|&eoj| eoj != NODE_PROFILE_OBJECT)
            .collect()
    }

    /// The first local instance addressed by `deoj` (wildcard aware).
    pub fn first_match(&self, deoj: Eoj) -> Option<Eoj> {
        self.properties.first_match(deoj)
    }

    /// Registers an additional local object with its initial properties.
    pub fn add_object(&mut self, eoj: Eoj, initial: Vec<Property>) {
        self.properties.ensure_object(eoj);
        self.properties.set_all(eoj, initial);
    }

    /// Reads the current value of an EPC, computing the system-managed
    /// properties on the fly.
    pub fn read(&self, eoj: Eoj, epc: Epc) -> Option<Edt> {
        if !self.properties.contains(eoj) {
            return None;
        }
        if epc == EPC_GET_MAP {
            return self.get_map(eoj).to_edt().ok();
        }
        if epc == EPC_SET_MAP {
            return self.set_map(eoj).to_edt().ok();
        }
        if epc == EPC_ANNOUNCEMENT_MAP {
            return self.announcement_map(eoj).to_edt().ok();
        }
        if eoj == NODE_PROFILE_OBJECT {
            if let Some(edt) = self.read_node_profile_computed(epc) {
                return Some(edt);
            }
        }
        self.properties.get(eoj, epc).map(|p| p.edt.clone())
    }

    /// Writes an EPC if it is writable, returning whether the stored value
    /// actually changed.
    pub fn write(&mut self, eoj: Eoj, epc: Epc, edt: Edt) -> Result<bool, EchonetError> {
        if !self.properties.contains(eoj) {
            return Err(EchonetError::Internal("write to unknown local object"));
        }
        if !self.set_map(eoj).contains(epc) {
            // The caller renders this as a per-EPC failure in the reply.
            return Err(EchonetError::Internal("EPC not writable"));
        }
        let changed = self.properties.get(eoj, epc).map(|p| &p.edt) != Some(&edt);
        self.properties.set(eoj, Property::new(epc, edt));
        Ok(changed)
    }

    /// The Get map: every stored EPC plus the computed ones.
    pub fn get_map(&self, eoj: Eoj) -> PropertyMap {
        let mut epcs: BTreeSet<Epc> = self.properties.epcs_of(eoj).into_iter().collect();
        epcs.extend([EPC_ANNOUNCEMENT_MAP, EPC_SET_MAP, EPC_GET_MAP]);
        if eoj == NODE_PROFILE_OBJECT {
            epcs.extend(NODE_PROFILE_COMPUTED.iter().copied());
        }
        epcs.into_iter().collect()
    }

    /// The Set map: every stored EPC minus the read-only blacklist.
    pub fn set_map(&self, eoj: Eoj) -> PropertyMap {
        self.properties
            .epcs_of(eoj)
            .into_iter()
            .filter(|epc| !READ_ONLY_EPCS.contains(epc))
            .collect()
    }

    /// The announcement map: announced EPCs actually present on the object.
    pub fn announcement_map(&self, eoj: Eoj) -> PropertyMap {
        let mut map = PropertyMap::new();
        for &epc in ANNOUNCED_EPCS {
            let present = self.properties.get(eoj, epc).is_some()
                || (eoj == NODE_PROFILE_OBJECT && NODE_PROFILE_COMPUTED.contains(&epc));
            if present {
                map.insert(epc);
            }
        }
        map
    }

    /// The instance-list EDT announced at startup and on composition change.
    pub fn instance_list_edt(&self) -> Edt {
        encode_instance_list(&self.device_eojs())
    }

    fn read_node_profile_computed(&self, epc: Epc) -> Option<Edt> {
        let devices = self.device_eojs();
        if epc == EPC_SELF_NODE_INSTANCES {
            let count = devices.len() as u32;
            return Some(count.to_be_bytes()[1..4].to_vec());
        }
        if epc == EPC_SELF_NODE_CLASSES {
            // Distinct device classes plus the node profile class itself.
            let count = self.device_classes().len() as u16 + 1;
            return Some(count.to_be_bytes().to_vec());
        }
        if epc == EPC_INSTANCE_LIST_NOTIFICATION || epc == EPC_SELF_NODE_INSTANCE_LIST_S {
            return Some(encode_instance_list(&devices));
        }
        if epc == EPC_SELF_NODE_CLASS_LIST_S {
            return Some(encode_class_list(&self.device_classes()));
        }
        None
    }

    fn device_classes(&self) -> Vec<ClassCode> {
        let classes: BTreeSet<ClassCode> = self
            .device_eojs()
            .iter()
            .map(|eoj| eoj.class_code)
            .collect();
        classes.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_objects() -> LocalObjects {
        LocalObjects::new(IdentificationNumber::new(
            [0x00, 0x00, 0x77],
            [0xAA; 13],
        ))
    }

    #[test]
    fn test_default_node_composition() {
        let local = test_objects();
        assert_eq!(local.eojs(), vec![CONTROLLER_OBJECT, NODE_PROFILE_OBJECT]);
        assert_eq!(local.device_eojs(), vec![CONTROLLER_OBJECT]);
    }

    #[test]
    fn test_computed_instance_list() {
        let local = test_objects();
        let edt = local.read(NODE_PROFILE_OBJECT, EPC_SELF_NODE_INSTANCE_LIST_S);
        assert_eq!(edt.unwrap(), vec![1, 0x05, 0xFF, 0x01]);
        // 3-byte instance count, node profile excluded.
        assert_eq!(
            local.read(NODE_PROFILE_OBJECT, EPC_SELF_NODE_INSTANCES).unwrap(),
            vec![0, 0, 1]
        );
        // Class count includes the node profile class.
        assert_eq!(
            local.read(NODE_PROFILE_OBJECT, EPC_SELF_NODE_CLASSES).unwrap(),
            vec![0, 2]
        );
    }

    #[test]
    fn test_property_maps_are_computed_not_stored() {
        let local = test_objects();
        let get_map = local.get_map(NODE_PROFILE_OBJECT);
        assert!(get_map.contains(EPC_GET_MAP));
        assert!(get_map.contains(EPC_ID_NUMBER));
        assert!(get_map.contains(EPC_SELF_NODE_INSTANCE_LIST_S));

        let set_map = local.set_map(NODE_PROFILE_OBJECT);
        assert!(set_map.contains(EPC_OPERATION_STATUS));
        assert!(!set_map.contains(EPC_ID_NUMBER));
        assert!(!set_map.contains(EPC_GET_MAP));
    }

    #[test]
    fn test_write_rejects_system_managed_epcs() {
        let mut local = test_objects();
        assert!(local.write(NODE_PROFILE_OBJECT, EPC_GET_MAP, vec![0]).is_err());
        assert!(local.write(NODE_PROFILE_OBJECT, EPC_ID_NUMBER, vec![0]).is_err());
    }

    #[test]
    fn test_write_reports_change() {
        let mut local = test_objects();
        // 0x30 -> 0x31 is a change, writing 0x31 again is not.
        assert!(local
            .write(CONTROLLER_OBJECT, EPC_OPERATION_STATUS, vec![0x31])
            .unwrap());
        assert!(!local
            .write(CONTROLLER_OBJECT, EPC_OPERATION_STATUS, vec![0x31])
            .unwrap());
    }

    #[test]
    fn test_announcement_map() {
        let local = test_objects();
        let map = local.announcement_map(NODE_PROFILE_OBJECT);
        assert!(map.contains(EPC_OPERATION_STATUS));
        assert!(map.contains(EPC_INSTANCE_LIST_NOTIFICATION));
        let controller_map = local.announcement_map(CONTROLLER_OBJECT);
        assert!(controller_map.contains(EPC_OPERATION_STATUS));
        assert!(!controller_map.contains(EPC_INSTANCE_LIST_NOTIFICATION));
    }
}
