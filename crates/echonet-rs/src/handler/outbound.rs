// crates/echonet-rs/src/handler/outbound.rs
//! The imperative API: discovery, Get, Set, listing and removal.

use crate::error::EchonetError;
use crate::frame::{Esv, Property, PropertyOutcome, PropertyResult};
use crate::handler::CommunicationHandler;
use crate::handler::core::PropertyChange;
use crate::handler::tracker::OperationKind;
use crate::history::{HistoryEntry, HistoryOrigin};
use crate::log::{dev_debug, dev_info};
use crate::object::profile::{EPC_GET_MAP, EPC_INSTANCE_LIST_NOTIFICATION, EPC_SET_MAP};
use crate::registry::{FilterCriteria, FilteredDevice};
use crate::types::{C_MULTICAST_ADDR, CONTROLLER_OBJECT, Epc, IpAndEoj, NODE_PROFILE_OBJECT};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

impl CommunicationHandler {
    /// Starts discovery: a multicast INF_REQ for the instance list. Nodes
    /// answer with INF broadcasts that flow through the ordinary
    /// notification path, so no response correlation is needed here.
    pub fn discover(&self) -> Result<(), EchonetError> {
        let _operation = self.tracker.start(OperationKind::Discover, "multicast".into());
        dev_info!("starting discovery");
        self.session.send_no_wait(
            IpAddr::V4(C_MULTICAST_ADDR),
            NODE_PROFILE_OBJECT,
            NODE_PROFILE_OBJECT,
            Esv::InfReq,
            vec![Property::empty(EPC_INSTANCE_LIST_NOTIFICATION)],
        )?;
        Ok(())
    }

    /// Reads `epcs` from a remote device.
    ///
    /// Unless `skip_validation`, every EPC must be in the device's cached
    /// Get map. Partial successes are applied to the cache even when other
    /// EPCs fail; failed EPCs feed the failed-EPC bookkeeping. A retry
    /// exhaustion marks the device offline.
    pub async fn get_properties(
        &self,
        device: IpAndEoj,
        epcs: &[Epc],
        skip_validation: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<PropertyResult>, EchonetError> {
        if device.eoj.is_wildcard() {
            return Err(EchonetError::WildcardInstance(device.eoj));
        }
        let _operation = self.tracker.start(OperationKind::Get, device.key());
        if !skip_validation {
            let map = self
                .registry
                .property_map(&device, EPC_GET_MAP)
                .ok_or(EchonetError::PropertyMapUnavailable(device))?;
            for &epc in epcs {
                if !map.contains(epc) {
                    return Err(EchonetError::NotReadable { device, epc });
                }
            }
        }

        let properties = epcs.iter().map(|&epc| Property::empty(epc)).collect();
        let response = match self
            .session
            .send_request(device, CONTROLLER_OBJECT, Esv::Get, properties, vec![], cancel)
            .await
        {
            Ok(response) => response,
            Err(e @ EchonetError::MaxRetriesReached { .. }) => {
                self.registry.set_offline(device, true);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let results = PropertyResult::from_response_list(response.esv, &response.properties);
        let successes = self.apply_get_results(device, &results);
        // Hooks pick up instance lists and identity changes learned via Get.
        self.process_property_update_hooks(device, &successes);
        Ok(results)
    }

    /// Writes `properties` to a remote device with SetC.
    ///
    /// Every EPC must be in the device's cached Set map. Accepted EPCs are
    /// written back to the cache with the values we sent (the response
    /// carries only empty success markers).
    pub async fn set_properties(
        &self,
        device: IpAndEoj,
        properties: Vec<Property>,
        cancel: &CancellationToken,
    ) -> Result<Vec<PropertyResult>, EchonetError> {
        if device.eoj.is_wildcard() {
            return Err(EchonetError::WildcardInstance(device.eoj));
        }
        let _operation = self.tracker.start(OperationKind::Set, device.key());
        let map = self
            .registry
            .property_map(&device, EPC_SET_MAP)
            .ok_or(EchonetError::PropertyMapUnavailable(device))?;
        for property in &properties {
            if !map.contains(property.epc) {
                return Err(EchonetError::NotWritable {
                    device,
                    epc: property.epc,
                });
            }
        }

        let requested: HashMap<Epc, Property> = properties
            .iter()
            .map(|p| (p.epc, p.clone()))
            .collect();
        let response = match self
            .session
            .send_request(device, CONTROLLER_OBJECT, Esv::SetC, properties, vec![], cancel)
            .await
        {
            Ok(response) => response,
            Err(e @ EchonetError::MaxRetriesReached { .. }) => {
                self.registry.set_offline(device, true);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let results = PropertyResult::from_response_list(response.esv, &response.properties);
        let accepted: Vec<Property> = results
            .iter()
            .filter(|result| matches!(result.outcome, PropertyOutcome::Accepted))
            .filter_map(|result| requested.get(&result.epc).cloned())
            .collect();

        self.registry
            .register_properties(device, accepted.clone(), SystemTime::now());
        self.registry.set_offline(device, false);
        self.save_registry_best_effort();

        let now = SystemTime::now();
        for property in &accepted {
            self.hub.publish_property_change(PropertyChange {
                device,
                property: property.clone(),
            });
            self.history.record(HistoryEntry {
                timestamp: now,
                device,
                epc: property.epc,
                value: self.history_value(&device, property.epc, &property.edt),
                origin: HistoryOrigin::Set,
                settable: true,
            });
        }
        Ok(results)
    }

    /// Combined write-then-read in one SetGet transaction.
    ///
    /// Validation follows the per-half rules (Set map for the writes, Get
    /// map for the reads). The response's first list is interpreted with
    /// Set semantics and its second with Get semantics, which resolves the
    /// empty-EDT overload per half.
    pub async fn set_get_properties(
        &self,
        device: IpAndEoj,
        set_properties: Vec<Property>,
        get_epcs: &[Epc],
        cancel: &CancellationToken,
    ) -> Result<(Vec<PropertyResult>, Vec<PropertyResult>), EchonetError> {
        if device.eoj.is_wildcard() {
            return Err(EchonetError::WildcardInstance(device.eoj));
        }
        let _operation = self.tracker.start(OperationKind::Set, device.key());
        let set_map = self
            .registry
            .property_map(&device, EPC_SET_MAP)
            .ok_or(EchonetError::PropertyMapUnavailable(device))?;
        for property in &set_properties {
            if !set_map.contains(property.epc) {
                return Err(EchonetError::NotWritable {
                    device,
                    epc: property.epc,
                });
            }
        }
        let get_map = self
            .registry
            .property_map(&device, EPC_GET_MAP)
            .ok_or(EchonetError::PropertyMapUnavailable(device))?;
        for &epc in get_epcs {
            if !get_map.contains(epc) {
                return Err(EchonetError::NotReadable { device, epc });
            }
        }

        let requested: HashMap<Epc, Property> = set_properties
            .iter()
            .map(|p| (p.epc, p.clone()))
            .collect();
        let get_list = get_epcs.iter().map(|&epc| Property::empty(epc)).collect();
        let response = match self
            .session
            .send_request(
                device,
                CONTROLLER_OBJECT,
                Esv::SetGet,
                set_properties,
                get_list,
                cancel,
            )
            .await
        {
            Ok(response) => response,
            Err(e @ EchonetError::MaxRetriesReached { .. }) => {
                self.registry.set_offline(device, true);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let set_results = PropertyResult::from_response_list(Esv::SetRes, &response.properties);
        let get_results =
            PropertyResult::from_response_list(Esv::GetRes, &response.second_properties);

        let accepted: Vec<Property> = set_results
            .iter()
            .filter(|result| matches!(result.outcome, PropertyOutcome::Accepted))
            .filter_map(|result| requested.get(&result.epc).cloned())
            .collect();
        self.registry
            .register_properties(device, accepted.clone(), SystemTime::now());
        let now = SystemTime::now();
        for property in &accepted {
            self.hub.publish_property_change(PropertyChange {
                device,
                property: property.clone(),
            });
            self.history.record(HistoryEntry {
                timestamp: now,
                device,
                epc: property.epc,
                value: self.history_value(&device, property.epc, &property.edt),
                origin: HistoryOrigin::Set,
                settable: true,
            });
        }
        self.apply_get_results(device, &get_results);
        Ok((set_results, get_results))
    }

    /// Asks a device to announce `epcs` with a unicast INF_REQ. The
    /// answers arrive as INF broadcasts through the notification path, so
    /// this is fire-and-forget like discovery.
    pub fn request_notifications(
        &self,
        device: IpAndEoj,
        epcs: &[Epc],
    ) -> Result<(), EchonetError> {
        if device.eoj.is_wildcard() {
            return Err(EchonetError::WildcardInstance(device.eoj));
        }
        let properties = epcs.iter().map(|&epc| Property::empty(epc)).collect();
        self.session.send_no_wait(
            device.ip,
            CONTROLLER_OBJECT,
            device.eoj,
            Esv::InfReq,
            properties,
        )?;
        Ok(())
    }

    /// Updates one of our OWN object properties (what we answer to peers'
    /// Gets with), multicasting an INF if the EPC is announced and the
    /// value actually changed.
    pub fn set_local_property(
        &self,
        eoj: crate::types::Eoj,
        epc: Epc,
        edt: Vec<u8>,
    ) -> Result<(), EchonetError> {
        let changed = self
            .local
            .write()
            .unwrap()
            .write(eoj, epc, edt)
            .map_err(|_| EchonetError::NotWritable {
                device: IpAndEoj::new(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), eoj),
                epc,
            })?;
        if changed {
            self.announce_changes(eoj, &[epc]);
        }
        Ok(())
    }

    /// Devices matching `criteria`, each with its full cached property set.
    pub fn list_devices(&self, criteria: &FilterCriteria) -> Vec<FilteredDevice> {
        self.registry.filter(criteria)
    }

    /// Forgets a device entirely.
    pub fn remove_device(&self, device: IpAndEoj) -> Result<(), EchonetError> {
        if !self.registry.remove_device(device) {
            return Err(EchonetError::DeviceNotFound(device));
        }
        self.save_registry_best_effort();
        Ok(())
    }

    /// Applies a Get response to the cache: successes are registered (and
    /// the device is back online), failures update the failed-EPC set.
    /// Returns the successful properties.
    pub(crate) fn apply_get_results(
        &self,
        device: IpAndEoj,
        results: &[PropertyResult],
    ) -> Vec<Property> {
        let mut successes = Vec::new();
        let mut failed = Vec::new();
        for result in results {
            match &result.outcome {
                PropertyOutcome::Value(edt) => {
                    successes.push(Property::new(result.epc, edt.clone()))
                }
                PropertyOutcome::Failed(_) => failed.push(result.epc),
                PropertyOutcome::Accepted => {}
            }
        }

        self.registry
            .register_properties(device, successes.clone(), SystemTime::now());
        self.registry.set_offline(device, false);
        self.save_registry_best_effort();

        let success_epcs: Vec<Epc> = successes.iter().map(|p| p.epc).collect();
        let newly_failed = self.session.update_failed_epcs(device, &success_epcs, &failed);
        if !newly_failed.is_empty() {
            dev_debug!(device, "EPCs newly failing Get: {:?}", newly_failed);
        }

        self.record_and_publish(device, &successes, HistoryOrigin::Notification);
        successes
    }
}
