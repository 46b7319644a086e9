// crates/echonet-rs/src/update/mod.rs
//! The property update orchestrator: batches per-IP requests with jittered
//! delays, folds same-class instances into protocol-level broadcasts, and
//! deduplicates in-flight updates.

pub mod active;

pub use active::ActiveUpdates;

use crate::error::EchonetError;
use crate::frame::{PropertyMap, PropertyResult};
use crate::handler::CommunicationHandler;
use crate::handler::tracker::OperationKind;
use crate::log::{dev_debug, dev_warn};
use crate::object::profile::EPC_GET_MAP;
use crate::registry::FilterCriteria;
use crate::session::retry::jittered;
use crate::types::{ClassCode, CONTROLLER_OBJECT, Eoj, IpAndEoj, NODE_PROFILE_OBJECT};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Devices refreshed more recently than this are skipped (unless
    /// forced).
    pub interval_threshold: Duration,
    /// Active-update entries older than this are presumed leaked and
    /// cancelled by the reaper.
    pub max_update_age: Duration,
    /// Per-IP fanout delay unit.
    pub base_delay: Duration,
    /// Cap on the fanout delay multiplier.
    pub max_delay_multiplier: u32,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            interval_threshold: Duration::from_secs(60),
            max_update_age: Duration::from_secs(600),
            base_delay: Duration::from_millis(50),
            max_delay_multiplier: 5,
        }
    }
}

pub struct UpdateOrchestrator {
    handler: Arc<CommunicationHandler>,
    active: Arc<ActiveUpdates>,
    config: UpdateConfig,
    rng: Mutex<StdRng>,
    cancel: CancellationToken,
    /// Self-handle for spawning per-group and per-device workers.
    me: Weak<Self>,
}

impl UpdateOrchestrator {
    /// Creates the orchestrator and spawns its stale-entry reaper.
    pub fn new(
        handler: Arc<CommunicationHandler>,
        config: UpdateConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let active = ActiveUpdates::new();
        tokio::spawn(
            active
                .clone()
                .run_reaper(config.max_update_age, cancel.clone()),
        );
        Arc::new_cyclic(|me| Self {
            handler,
            active,
            config,
            rng: Mutex::new(StdRng::from_os_rng()),
            cancel,
            me: me.clone(),
        })
    }

    pub fn active_updates(&self) -> &Arc<ActiveUpdates> {
        &self.active
    }

    /// Refreshes the cached properties of every device matching `criteria`.
    ///
    /// Same-class instances sharing an IP are fetched with one wildcard
    /// Get; the rest go out individually with a jittered per-IP delay.
    /// `force` preempts in-flight updates and ignores the staleness and
    /// offline filters. The first error is returned, the rest are logged.
    pub async fn update_properties(
        &self,
        criteria: &FilterCriteria,
        force: bool,
    ) -> Result<(), EchonetError> {
        let Some(orchestrator) = self.me.upgrade() else {
            return Err(EchonetError::Cancelled);
        };
        let _operation = self
            .handler
            .tracker
            .start(OperationKind::UpdateProperties, format!("{:?}", criteria));

        let mut groups: HashMap<(IpAddr, ClassCode), Vec<Eoj>> = HashMap::new();
        for matched in self.handler.list_devices(criteria) {
            groups
                .entry((matched.device.ip, matched.device.eoj.class_code))
                .or_default()
                .push(matched.device.eoj);
        }

        let mut individuals: Vec<IpAndEoj> = Vec::new();
        let mut tasks = JoinSet::new();
        for ((ip, _class), mut instances) in groups {
            instances.sort();
            if instances.len() >= 2 {
                let orchestrator = orchestrator.clone();
                tasks.spawn(async move {
                    orchestrator.run_broadcast_group(ip, instances, force).await
                });
            } else {
                individuals.push(IpAndEoj::new(ip, instances[0]));
            }
        }

        // Stagger individual requests per IP so a node with many objects is
        // not hit with a burst.
        individuals.sort_by_key(|device| (device.ip, device.eoj));
        let mut per_ip_count: HashMap<IpAddr, u32> = HashMap::new();
        for device in individuals {
            let index = per_ip_count.entry(device.ip).or_insert(0);
            *index += 1;
            let delay = self.fanout_delay(*index);
            let orchestrator = orchestrator.clone();
            tasks.spawn(async move { orchestrator.run_individual(device, delay, force).await });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Err(e)) = joined {
                if first_error.is_none() {
                    first_error = Some(e);
                } else {
                    dev_warn!("additional update error: {}", e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The delay before the `index`-th request to one IP:
    /// `jitter(base * min(index - 1, cap))`, zero for the first.
    fn fanout_delay(&self, index: u32) -> Duration {
        let multiplier = index.saturating_sub(1).min(self.config.max_delay_multiplier);
        if multiplier == 0 {
            return Duration::ZERO;
        }
        let base = self.config.base_delay * multiplier;
        let mut rng = self.rng.lock().unwrap();
        jittered(base, &mut rng)
    }

    async fn run_broadcast_group(
        self: Arc<Self>,
        ip: IpAddr,
        instances: Vec<Eoj>,
        force: bool,
    ) -> Result<(), EchonetError> {
        let keys: Vec<String> = instances
            .iter()
            .map(|&eoj| IpAndEoj::new(ip, eoj).key())
            .collect();
        if force {
            for key in &keys {
                self.active.preempt(key);
            }
        } else if keys.iter().any(|key| self.active.is_active(key)) {
            dev_debug!(ip, "broadcast group already updating, skipped");
            return Ok(());
        }
        // The whole group shares one cancellable context.
        let group_cancel = self.cancel.child_token();
        for key in &keys {
            self.active.try_mark(key, group_cancel.clone());
        }

        let result = self
            .broadcast_group_inner(ip, &instances, force, &group_cancel)
            .await;

        for key in &keys {
            self.active.release(key);
        }
        result
    }

    async fn broadcast_group_inner(
        &self,
        ip: IpAddr,
        instances: &[Eoj],
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<(), EchonetError> {
        let representative = IpAndEoj::new(ip, instances[0]);
        let Some(map) = self.try_get_property_map(representative, cancel).await else {
            return Err(EchonetError::PropertyMapUnavailable(representative));
        };

        let eligible: Vec<Eoj> = instances
            .iter()
            .copied()
            .filter(|&eoj| force || self.needs_update(IpAndEoj::new(ip, eoj)))
            .collect();
        if eligible.is_empty() {
            return Ok(());
        }

        let results = self
            .handler
            .session()
            .get_properties_broadcast(ip, &eligible, CONTROLLER_OBJECT, &map.epcs(), cancel)
            .await;

        let mut first_error = None;
        for (device, result) in results {
            match result {
                Ok(frame) => {
                    let parsed = PropertyResult::from_response_list(frame.esv, &frame.properties);
                    self.handler.apply_get_results(device, &parsed);
                }
                Err(e) => {
                    if matches!(e, EchonetError::MaxRetriesReached { .. }) {
                        self.handler.registry().set_offline(device, true);
                    }
                    dev_warn!(device, "broadcast update failed: {}", e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_individual(
        self: Arc<Self>,
        device: IpAndEoj,
        delay: Duration,
        force: bool,
    ) -> Result<(), EchonetError> {
        let key = device.key();
        if force {
            self.active.preempt(&key);
        }
        let device_cancel = self.cancel.child_token();
        if !self.active.try_mark(&key, device_cancel.clone()) {
            dev_debug!(device, "update already in flight, skipped");
            return Ok(());
        }

        let result = self
            .run_individual_inner(device, delay, force, &device_cancel)
            .await;
        self.active.release(&key);
        result
    }

    async fn run_individual_inner(
        &self,
        device: IpAndEoj,
        delay: Duration,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<(), EchonetError> {
        if !force && !self.needs_update(device) {
            return Ok(());
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let Some(map) = self.try_get_property_map(device, cancel).await else {
            return Err(EchonetError::PropertyMapUnavailable(device));
        };
        self.handler
            .get_properties(device, &map.epcs(), true, cancel)
            .await?;
        Ok(())
    }

    /// False for devices refreshed within the staleness threshold, and for
    /// offline devices whose whole node (Node Profile Object) is offline.
    fn needs_update(&self, device: IpAndEoj) -> bool {
        if let Some(updated_at) = self.handler.registry().last_update_time(&device) {
            let age = updated_at.elapsed().unwrap_or_default();
            if age < self.config.interval_threshold {
                return false;
            }
        }
        if self.handler.registry().is_offline(&device) {
            let node_profile = IpAndEoj::new(device.ip, NODE_PROFILE_OBJECT);
            if self.handler.registry().is_offline(&node_profile) {
                return false;
            }
        }
        true
    }

    /// The device's Get map, from cache if possible, otherwise via a
    /// one-shot Get of 0x9F. Failure to obtain one marks the device
    /// offline.
    pub(crate) async fn try_get_property_map(
        &self,
        device: IpAndEoj,
        cancel: &CancellationToken,
    ) -> Option<PropertyMap> {
        if let Some(map) = self.handler.registry().property_map(&device, EPC_GET_MAP) {
            return Some(map);
        }
        match self
            .handler
            .get_properties(device, &[EPC_GET_MAP], true, cancel)
            .await
        {
            Ok(_) => self.handler.registry().property_map(&device, EPC_GET_MAP),
            Err(e) => {
                dev_debug!(device, "get map fetch failed: {}", e);
                self.handler.registry().set_offline(device, true);
                None
            }
        }
    }
}
