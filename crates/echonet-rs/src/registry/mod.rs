// crates/echonet-rs/src/registry/mod.rs
//! The device registry: every known remote object, its cached properties,
//! update timestamps and online/offline state, with change events published
//! on a bounded channel.

pub mod filter;
pub mod persist;

pub use filter::{FilterCriteria, FilteredDevice};

use crate::frame::{Property, PropertyMap};
use crate::identity::{DeviceIdentifier, IdentificationNumber};
use crate::log::{dev_info, dev_warn};
use crate::object::DeviceProperties;
use crate::object::profile::EPC_ID_NUMBER;
use crate::types::{Eoj, Epc, IpAndEoj, NODE_PROFILE_OBJECT};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Capacity of the device event channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// What happened to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventType {
    /// An `(IP, EOJ)` pair was seen for the first time.
    Added,
    /// An explicit or reconciliation-driven removal succeeded.
    Removed,
    /// The offline flag transitioned false -> true.
    Offline,
    /// The offline flag transitioned true -> false.
    Online,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceEvent {
    pub device: IpAndEoj,
    pub event_type: DeviceEventType,
}

/// Everything the registry lock protects: properties, timestamps and the
/// offline set change as one unit.
struct RegistryState {
    data: HashMap<IpAddr, DeviceProperties>,
    timestamps: HashMap<IpAndEoj, SystemTime>,
    offline: HashSet<IpAndEoj>,
}

pub struct DeviceRegistry {
    state: RwLock<RegistryState>,
    event_tx: mpsc::Sender<DeviceEvent>,
    /// Serializes whole-file writes; held across the read lock during save.
    save_mutex: Mutex<()>,
    path: Option<PathBuf>,
}

impl DeviceRegistry {
    /// Creates a registry persisting to `path` (None for in-memory only)
    /// and the receiver for its device events.
    pub fn new(path: Option<PathBuf>) -> (Arc<Self>, mpsc::Receiver<DeviceEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Arc::new(Self {
            state: RwLock::new(RegistryState {
                data: HashMap::new(),
                timestamps: HashMap::new(),
                offline: HashSet::new(),
            }),
            event_tx,
            save_mutex: Mutex::new(()),
            path,
        });
        (registry, event_rx)
    }

    // --- Mutations ---

    /// Caches `properties` for `device` and stamps its last-update time.
    ///
    /// First sightings of the `(IP, EOJ)` pair emit `Added`; the Node
    /// Profile Object is implicitly materialized on any IP that gains its
    /// first device.
    pub fn register_properties(
        &self,
        device: IpAndEoj,
        properties: Vec<Property>,
        timestamp: SystemTime,
    ) {
        let mut state = self.state.write().unwrap();
        self.ensure_device_locked(&mut state, IpAndEoj::new(device.ip, NODE_PROFILE_OBJECT));
        self.ensure_device_locked(&mut state, device);
        state
            .data
            .get_mut(&device.ip)
            .expect("ensure_device_locked populates the IP entry")
            .set_all(device.eoj, properties);
        state.timestamps.insert(device, timestamp);
    }

    /// Makes `device` known without caching any property values.
    pub fn ensure_device(&self, device: IpAndEoj) {
        let mut state = self.state.write().unwrap();
        self.ensure_device_locked(&mut state, IpAndEoj::new(device.ip, NODE_PROFILE_OBJECT));
        self.ensure_device_locked(&mut state, device);
    }

    /// Flags `device` on/offline. Emits an event only on an actual
    /// transition; setting the stored value again is a no-op. Unknown
    /// devices are ignored so the offline set can never outgrow the
    /// properties map.
    pub fn set_offline(&self, device: IpAndEoj, offline: bool) {
        let mut state = self.state.write().unwrap();
        let known = state
            .data
            .get(&device.ip)
            .is_some_and(|props| props.contains(device.eoj));
        if !known {
            dev_warn!(device, "offline flag for unknown device ignored");
            return;
        }
        let changed = if offline {
            state.offline.insert(device)
        } else {
            state.offline.remove(&device)
        };
        if changed {
            let event_type = if offline {
                DeviceEventType::Offline
            } else {
                DeviceEventType::Online
            };
            self.emit_locked(DeviceEvent { device, event_type });
        }
    }

    /// Removes one device: properties, timestamp and offline flag go
    /// atomically. Emits `Removed` when the device existed.
    pub fn remove_device(&self, device: IpAndEoj) -> bool {
        let mut state = self.state.write().unwrap();
        self.remove_device_locked(&mut state, device)
    }

    /// Removes every device at `ip`, the Node Profile Object included.
    /// Returns the removed devices.
    pub fn remove_all_devices_by_ip(&self, ip: IpAddr) -> Vec<IpAndEoj> {
        let mut state = self.state.write().unwrap();
        let eojs = state.data.get(&ip).map(|p| p.eojs()).unwrap_or_default();
        let mut removed = Vec::with_capacity(eojs.len());
        for eoj in eojs {
            let device = IpAndEoj::new(ip, eoj);
            if self.remove_device_locked(&mut state, device) {
                removed.push(device);
            }
        }
        removed
    }

    /// Reconciles the device list at `ip` against a freshly announced
    /// instance list: devices absent from the list are removed (the Node
    /// Profile Object never is), listed devices are added if unknown, and
    /// offline listed devices are brought back online.
    ///
    /// Returns the devices that were newly added.
    pub fn reconcile_instance_list(&self, ip: IpAddr, instances: &[Eoj]) -> Vec<IpAndEoj> {
        let mut state = self.state.write().unwrap();

        let existing = state.data.get(&ip).map(|p| p.eojs()).unwrap_or_default();
        for eoj in existing {
            if eoj != NODE_PROFILE_OBJECT && !instances.contains(&eoj) {
                let device = IpAndEoj::new(ip, eoj);
                dev_info!(device, "absent from instance list, removing");
                self.remove_device_locked(&mut state, device);
            }
        }

        self.ensure_device_locked(&mut state, IpAndEoj::new(ip, NODE_PROFILE_OBJECT));
        let mut added = Vec::new();
        for &eoj in instances {
            let device = IpAndEoj::new(ip, eoj);
            if self.ensure_device_locked(&mut state, device) {
                added.push(device);
            }
        }

        // Anything the node reports as present is reachable again.
        for &eoj in instances {
            let device = IpAndEoj::new(ip, eoj);
            if state.offline.remove(&device) {
                self.emit_locked(DeviceEvent {
                    device,
                    event_type: DeviceEventType::Online,
                });
            }
        }
        added
    }

    // --- Queries ---

    pub fn has_ip(&self, ip: &IpAddr) -> bool {
        self.state.read().unwrap().data.contains_key(ip)
    }

    pub fn has_device(&self, device: &IpAndEoj) -> bool {
        self.state
            .read()
            .unwrap()
            .data
            .get(&device.ip)
            .is_some_and(|props| props.contains(device.eoj))
    }

    pub fn is_offline(&self, device: &IpAndEoj) -> bool {
        self.state.read().unwrap().offline.contains(device)
    }

    pub fn last_update_time(&self, device: &IpAndEoj) -> Option<SystemTime> {
        self.state.read().unwrap().timestamps.get(device).copied()
    }

    /// Every known device, in no particular order.
    pub fn devices(&self) -> Vec<IpAndEoj> {
        let state = self.state.read().unwrap();
        state
            .data
            .iter()
            .flat_map(|(&ip, props)| props.eojs().into_iter().map(move |eoj| IpAndEoj::new(ip, eoj)))
            .collect()
    }

    pub fn ips(&self) -> Vec<IpAddr> {
        self.state.read().unwrap().data.keys().copied().collect()
    }

    pub fn get_property(&self, device: &IpAndEoj, epc: Epc) -> Option<Property> {
        self.state
            .read()
            .unwrap()
            .data
            .get(&device.ip)?
            .get(device.eoj, epc)
            .cloned()
    }

    pub fn properties_of(&self, device: &IpAndEoj) -> Vec<Property> {
        self.state
            .read()
            .unwrap()
            .data
            .get(&device.ip)
            .map(|props| props.properties_of(device.eoj))
            .unwrap_or_default()
    }

    /// The cached property map at `map_epc` (0x9D/0x9E/0x9F), if present
    /// and decodable.
    pub fn property_map(&self, device: &IpAndEoj, map_epc: Epc) -> Option<PropertyMap> {
        self.state
            .read()
            .unwrap()
            .data
            .get(&device.ip)?
            .property_map(device.eoj, map_epc)
    }

    /// Linear scan for devices matching an identifier: the Node Profile
    /// Object at the device's IP must hold the identifier's identification
    /// number, and the device's EOJ must equal the identifier's.
    pub fn find_by_id_string(&self, identifier: &DeviceIdentifier) -> Vec<IpAndEoj> {
        let state = self.state.read().unwrap();
        let wanted_edt = identifier.id.to_edt();
        state
            .data
            .iter()
            .filter(|(_, props)| {
                props
                    .get(NODE_PROFILE_OBJECT, EPC_ID_NUMBER)
                    .is_some_and(|p| p.edt == wanted_edt)
            })
            .flat_map(|(&ip, props)| {
                props
                    .eojs()
                    .into_iter()
                    .filter(|&eoj| eoj == identifier.eoj)
                    .map(move |eoj| IpAndEoj::new(ip, eoj))
            })
            .collect()
    }

    /// Every IP (other than `exclude_ip`) whose Node Profile Object holds
    /// identification number `edt`. An empty `edt` matches nothing.
    pub fn find_ips_with_same_node_profile_id(
        &self,
        edt: &[u8],
        exclude_ip: &IpAddr,
    ) -> Vec<IpAddr> {
        if edt.is_empty() {
            return Vec::new();
        }
        let state = self.state.read().unwrap();
        state
            .data
            .iter()
            .filter(|&(ip, props)| {
                ip != exclude_ip
                    && props
                        .get(NODE_PROFILE_OBJECT, EPC_ID_NUMBER)
                        .is_some_and(|p| p.edt == edt)
            })
            .map(|(&ip, _)| ip)
            .collect()
    }

    /// The identification number cached on `ip`'s Node Profile Object.
    pub fn node_profile_id(&self, ip: &IpAddr) -> Option<IdentificationNumber> {
        let property = self.get_property(
            &IpAndEoj::new(*ip, NODE_PROFILE_OBJECT),
            EPC_ID_NUMBER,
        )?;
        IdentificationNumber::from_edt(&property.edt).ok()
    }

    // --- Locked helpers ---
    //
    // `_locked` methods require the write lock to already be held and never
    // take it themselves; they exist so event emission stays inside the
    // lock with non-blocking semantics.

    /// Adds `device` if absent. Returns true when it was newly created.
    fn ensure_device_locked(&self, state: &mut RegistryState, device: IpAndEoj) -> bool {
        let props = state.data.entry(device.ip).or_default();
        if props.contains(device.eoj) {
            return false;
        }
        props.ensure_object(device.eoj);
        self.emit_locked(DeviceEvent {
            device,
            event_type: DeviceEventType::Added,
        });
        true
    }

    fn remove_device_locked(&self, state: &mut RegistryState, device: IpAndEoj) -> bool {
        let Some(props) = state.data.get_mut(&device.ip) else {
            return false;
        };
        if !props.remove(device.eoj) {
            return false;
        }
        if props.is_empty() {
            state.data.remove(&device.ip);
        }
        state.timestamps.remove(&device);
        state.offline.remove(&device);
        self.emit_locked(DeviceEvent {
            device,
            event_type: DeviceEventType::Removed,
        });
        true
    }

    /// Non-blocking event publication: a full channel drops the event with
    /// a warning, the state change stands either way.
    fn emit_locked(&self, event: DeviceEvent) {
        if self.event_tx.try_send(event).is_err() {
            dev_warn!(event.device, "device event channel full, {:?} dropped", event.event_type);
        }
    }

    #[cfg(test)]
    fn timestamp_and_offline_keys(&self) -> (Vec<IpAndEoj>, Vec<IpAndEoj>) {
        let state = self.state.read().unwrap();
        (
            state.timestamps.keys().copied().collect(),
            state.offline.iter().copied().collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (Arc<DeviceRegistry>, mpsc::Receiver<DeviceEvent>) {
        DeviceRegistry::new(None)
    }

    fn device(ip: &str, class: u16, instance: u8) -> IpAndEoj {
        IpAndEoj::new(ip.parse().unwrap(), Eoj::new(class, instance))
    }

    fn drain(rx: &mut mpsc::Receiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_first_sighting_emits_added_and_materializes_node_profile() {
        let (registry, mut rx) = registry();
        let d = device("192.168.1.10", 0x0130, 1);
        registry.register_properties(d, vec![Property::new(Epc(0x80), vec![0x30])], SystemTime::now());

        let events = drain(&mut rx);
        let added: Vec<IpAndEoj> = events
            .iter()
            .filter(|e| e.event_type == DeviceEventType::Added)
            .map(|e| e.device)
            .collect();
        assert!(added.contains(&d));
        assert!(added.contains(&device("192.168.1.10", 0x0EF0, 1)));

        // Re-registering emits nothing new.
        registry.register_properties(d, vec![], SystemTime::now());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_register_sets_last_update_time() {
        let (registry, _rx) = registry();
        let d = device("192.168.1.10", 0x0130, 1);
        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        registry.register_properties(d, vec![], t);
        assert_eq!(registry.last_update_time(&d), Some(t));
    }

    #[test]
    fn test_offline_transitions_emit_once() {
        let (registry, mut rx) = registry();
        let d = device("192.168.1.10", 0x0130, 1);
        registry.register_properties(d, vec![], SystemTime::now());
        drain(&mut rx);

        registry.set_offline(d, true);
        registry.set_offline(d, true);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, DeviceEventType::Offline);

        registry.set_offline(d, false);
        registry.set_offline(d, false);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, DeviceEventType::Online);
    }

    #[test]
    fn test_offline_for_unknown_device_is_ignored() {
        let (registry, mut rx) = registry();
        registry.set_offline(device("192.168.1.99", 0x0130, 1), true);
        assert!(drain(&mut rx).is_empty());
        let (timestamps, offline) = registry.timestamp_and_offline_keys();
        assert!(timestamps.is_empty());
        assert!(offline.is_empty());
    }

    #[test]
    fn test_remove_clears_all_three_maps() {
        let (registry, mut rx) = registry();
        let d = device("192.168.1.10", 0x0130, 1);
        registry.register_properties(d, vec![], SystemTime::now());
        registry.set_offline(d, true);
        drain(&mut rx);

        assert!(registry.remove_device(d));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, DeviceEventType::Removed);

        let (timestamps, offline) = registry.timestamp_and_offline_keys();
        assert!(!timestamps.contains(&d));
        assert!(!offline.contains(&d));
        assert!(!registry.has_device(&d));
        // Second removal is a no-op.
        assert!(!registry.remove_device(d));
    }

    #[test]
    fn test_reconcile_removes_unlisted_keeps_node_profile() {
        let (registry, mut rx) = registry();
        let ip: IpAddr = "192.168.1.10".parse().unwrap();
        let stale = device("192.168.1.10", 0x0290, 1);
        let kept = device("192.168.1.10", 0x0130, 1);
        registry.register_properties(stale, vec![], SystemTime::now());
        registry.register_properties(kept, vec![], SystemTime::now());
        drain(&mut rx);

        let added = registry.reconcile_instance_list(ip, &[kept.eoj, Eoj::new(0x0130, 2)]);
        assert_eq!(added, vec![device("192.168.1.10", 0x0130, 2)]);
        assert!(!registry.has_device(&stale));
        assert!(registry.has_device(&kept));
        // The Node Profile Object survives even though the list omits it.
        assert!(registry.has_device(&device("192.168.1.10", 0x0EF0, 1)));
    }

    #[test]
    fn test_reconcile_brings_listed_devices_online() {
        let (registry, mut rx) = registry();
        let ip: IpAddr = "192.168.1.10".parse().unwrap();
        let d = device("192.168.1.10", 0x0130, 1);
        registry.register_properties(d, vec![], SystemTime::now());
        registry.set_offline(d, true);
        drain(&mut rx);

        registry.reconcile_instance_list(ip, &[d.eoj]);
        assert!(!registry.is_offline(&d));
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| e.device == d && e.event_type == DeviceEventType::Online));
    }

    #[test]
    fn test_find_ips_with_same_node_profile_id() {
        let (registry, _rx) = registry();
        let id_edt = IdentificationNumber::new([0, 0, 0x77], [0x05; 13]).to_edt();
        let npo_old = device("192.168.0.91", 0x0EF0, 1);
        let npo_new = device("192.168.0.140", 0x0EF0, 1);
        registry.register_properties(
            npo_old,
            vec![Property::new(EPC_ID_NUMBER, id_edt.clone())],
            SystemTime::now(),
        );
        registry.register_properties(
            npo_new,
            vec![Property::new(EPC_ID_NUMBER, id_edt.clone())],
            SystemTime::now(),
        );

        let exclude: IpAddr = "192.168.0.140".parse().unwrap();
        let ips = registry.find_ips_with_same_node_profile_id(&id_edt, &exclude);
        assert_eq!(ips, vec!["192.168.0.91".parse::<IpAddr>().unwrap()]);
        assert!(registry
            .find_ips_with_same_node_profile_id(&[], &exclude)
            .is_empty());
    }

    #[test]
    fn test_find_by_id_string() {
        let (registry, _rx) = registry();
        let id = IdentificationNumber::new([0, 0, 0x77], [0x06; 13]);
        let npo = device("192.168.1.10", 0x0EF0, 1);
        let heater = device("192.168.1.10", 0x027B, 1);
        registry.register_properties(
            npo,
            vec![Property::new(EPC_ID_NUMBER, id.to_edt())],
            SystemTime::now(),
        );
        registry.register_properties(heater, vec![], SystemTime::now());

        let identifier = DeviceIdentifier::new(heater.eoj, id);
        assert_eq!(registry.find_by_id_string(&identifier), vec![heater]);

        let other = DeviceIdentifier::new(
            heater.eoj,
            IdentificationNumber::new([0, 0, 0x77], [0x07; 13]),
        );
        assert!(registry.find_by_id_string(&other).is_empty());
    }
}
