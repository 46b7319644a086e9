// crates/echonet-rs/src/controller.rs
//! Assembles the full controller: transport, session, registries, handler,
//! orchestrator and stores, plus the background loops that keep them fed.

use crate::error::EchonetError;
use crate::frame::{Property, PropertyResult};
use crate::handler::core::{relay_events, NotificationHub};
use crate::handler::{
    CommunicationHandler, DeviceNotification, OperationTracker, PropertyChange,
};
use crate::history::{HistoryOptions, HistoryStore};
use crate::identity::IdentificationNumber;
use crate::log::{dev_debug, dev_info, dev_warn};
use crate::object::LocalObjects;
use crate::registry::{DeviceRegistry, FilterCriteria, FilteredDevice};
use crate::session::{Session, SessionConfig};
use crate::storage::{AliasStore, GroupStore, LocationSettings};
use crate::transport::{PacketTransport, UdpTransport};
use crate::types::{Epc, IpAndEoj};
use crate::update::{UpdateConfig, UpdateOrchestrator};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The experimental manufacturer code, used until a real one is assigned.
const EXPERIMENTAL_MANUFACTURER: [u8; 3] = [0xFF, 0xFF, 0xFF];

/// Interval of the operation-budget monitor.
const TRACKER_MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Interval of the resource sampling loop.
const RESOURCE_MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Everything tunable about a controller instance.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub session: SessionConfig,
    pub update: UpdateConfig,
    pub history: HistoryOptions,
    /// Registry persistence path; None keeps the registry in memory.
    pub devices_path: Option<PathBuf>,
    pub history_path: Option<PathBuf>,
    pub aliases_path: Option<PathBuf>,
    pub groups_path: Option<PathBuf>,
    pub locations_path: Option<PathBuf>,
    /// Additional local addresses (multi-homed hosts).
    pub extra_local_ips: Vec<IpAddr>,
    pub manufacturer_code: [u8; 3],
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            update: UpdateConfig::default(),
            history: HistoryOptions::default(),
            devices_path: None,
            history_path: None,
            aliases_path: None,
            groups_path: None,
            locations_path: None,
            extra_local_ips: Vec::new(),
            manufacturer_code: EXPERIMENTAL_MANUFACTURER,
        }
    }
}

/// A running ECHONET Lite controller node.
pub struct Controller {
    handler: Arc<CommunicationHandler>,
    orchestrator: Arc<UpdateOrchestrator>,
    aliases: AliasStore,
    groups: GroupStore,
    locations: LocationSettings,
    property_changes: Mutex<Option<mpsc::Receiver<PropertyChange>>>,
    cancel: CancellationToken,
}

impl Controller {
    /// Binds the UDP transport, loads persisted state (a corrupt registry
    /// or history file aborts startup), spawns every background loop, and
    /// announces our instance list to the network.
    pub async fn start(config: ControllerConfig) -> Result<Self, EchonetError> {
        let cancel = CancellationToken::new();
        let (transport, inbound_rx) =
            UdpTransport::bind(&config.extra_local_ips, cancel.child_token())?;
        Self::assemble(config, transport, inbound_rx, cancel)
    }

    /// Wires a controller over an already-constructed transport. Split out
    /// of [`Controller::start`] so tests and embedders can supply their
    /// own.
    pub fn assemble(
        config: ControllerConfig,
        transport: Arc<dyn PacketTransport>,
        inbound_rx: mpsc::Receiver<crate::transport::InboundDatagram>,
        cancel: CancellationToken,
    ) -> Result<Self, EchonetError> {
        let (session, timeout_rx) = Session::new(transport.clone(), config.session.clone());

        let (registry, device_rx) = DeviceRegistry::new(config.devices_path.clone());
        registry.load()?;
        let history = Arc::new(HistoryStore::new(
            config.history.clone(),
            config.history_path.clone(),
        ));
        history.load()?;

        let (hub, property_rx) = NotificationHub::new();
        {
            let registry = registry.clone();
            hub.set_offline_checker(Box::new(move |device| registry.is_offline(device)));
        }

        let tracker = OperationTracker::new();
        let local = LocalObjects::new(IdentificationNumber::generate(config.manufacturer_code));

        let handler = CommunicationHandler::new(
            transport,
            session,
            registry,
            local,
            history.clone(),
            hub.clone(),
            tracker.clone(),
            cancel.clone(),
        );

        tokio::spawn(relay_events(
            hub.clone(),
            device_rx,
            timeout_rx,
            Some(history),
        ));
        tokio::spawn(handler.clone().run(inbound_rx));
        tokio::spawn(
            tracker
                .clone()
                .run_monitor(TRACKER_MONITOR_INTERVAL, cancel.child_token()),
        );

        let orchestrator =
            UpdateOrchestrator::new(handler.clone(), config.update.clone(), cancel.child_token());
        tokio::spawn(resource_monitor(
            handler.clone(),
            orchestrator.clone(),
            cancel.child_token(),
        ));

        let aliases = AliasStore::new(config.aliases_path.clone());
        aliases.load()?;
        let groups = GroupStore::new(config.groups_path.clone());
        groups.load()?;
        let locations = LocationSettings::new(config.locations_path.clone());
        locations.load()?;

        if let Err(e) = handler.announce_instance_list() {
            dev_warn!("startup instance list announcement failed: {}", e);
        }
        dev_info!("controller started");

        Ok(Self {
            handler,
            orchestrator,
            aliases,
            groups,
            locations,
            property_changes: Mutex::new(Some(property_rx)),
            cancel,
        })
    }

    // --- Event subscriptions ---

    /// Subscribes to device notifications. The channel is closed if the
    /// subscriber stops draining it.
    pub fn subscribe_notifications(&self, buffer_size: usize) -> mpsc::Receiver<DeviceNotification> {
        self.handler.hub().subscribe(buffer_size)
    }

    /// The single-consumer property change stream. Returns None after the
    /// first call.
    pub fn take_property_changes(&self) -> Option<mpsc::Receiver<PropertyChange>> {
        self.property_changes.lock().unwrap().take()
    }

    // --- Imperative API ---

    pub fn discover(&self) -> Result<(), EchonetError> {
        self.handler.discover()
    }

    pub async fn get_properties(
        &self,
        device: IpAndEoj,
        epcs: &[Epc],
        skip_validation: bool,
    ) -> Result<Vec<PropertyResult>, EchonetError> {
        let cancel = self.cancel.child_token();
        self.handler
            .get_properties(device, epcs, skip_validation, &cancel)
            .await
    }

    pub async fn set_properties(
        &self,
        device: IpAndEoj,
        properties: Vec<Property>,
    ) -> Result<Vec<PropertyResult>, EchonetError> {
        let cancel = self.cancel.child_token();
        self.handler.set_properties(device, properties, &cancel).await
    }

    pub async fn update_properties(
        &self,
        criteria: &FilterCriteria,
        force: bool,
    ) -> Result<(), EchonetError> {
        self.orchestrator.update_properties(criteria, force).await
    }

    pub fn list_devices(&self, criteria: &FilterCriteria) -> Vec<FilteredDevice> {
        self.handler.list_devices(criteria)
    }

    pub fn remove_device(&self, device: IpAndEoj) -> Result<(), EchonetError> {
        self.handler.remove_device(device)
    }

    // --- Component access ---

    pub fn handler(&self) -> &Arc<CommunicationHandler> {
        &self.handler
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        self.handler.registry()
    }

    pub fn aliases(&self) -> &AliasStore {
        &self.aliases
    }

    pub fn groups(&self) -> &GroupStore {
        &self.groups
    }

    pub fn locations(&self) -> &LocationSettings {
        &self.locations
    }

    /// Stops every background loop and persists what can be persisted.
    /// Save failures at shutdown are logged, never raised.
    pub fn shutdown(&self) {
        dev_info!("controller shutting down");
        self.cancel.cancel();
        if let Err(e) = self.handler.registry().save() {
            dev_warn!("registry save on shutdown failed: {}", e);
        }
        if let Err(e) = self.handler.history().save() {
            dev_warn!("history save on shutdown failed: {}", e);
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Periodically samples task and registry pressure so capacity problems
/// show up in logs before they show up as drops.
async fn resource_monitor(
    handler: Arc<CommunicationHandler>,
    orchestrator: Arc<UpdateOrchestrator>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(RESOURCE_MONITOR_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let tasks = tokio::runtime::Handle::current().metrics().num_alive_tasks();
                dev_debug!(
                    "resources: {} devices, {} active updates, {} alive tasks",
                    handler.registry().devices().len(),
                    orchestrator.active_updates().active_count(),
                    tasks
                );
            }
        }
    }
}
