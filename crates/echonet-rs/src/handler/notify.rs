// crates/echonet-rs/src/handler/notify.rs
//! Processing of unsolicited notifications (INF/INFC) from peers: device
//! creation, instance-list reconciliation, cache updates, and the
//! post-update hooks.

use crate::frame::{EchonetFrame, Esv, Property};
use crate::handler::CommunicationHandler;
use crate::handler::core::PropertyChange;
use crate::history::{HistoryEntry, HistoryOrigin};
use crate::log::{dev_debug, dev_trace, dev_warn};
use crate::object::profile::{
    EPC_ANNOUNCEMENT_MAP, EPC_GET_MAP, EPC_ID_NUMBER, EPC_SELF_NODE_INSTANCE_LIST_S, EPC_SET_MAP,
    decode_instance_list, is_instance_list_epc,
};
use crate::types::{Eoj, IpAndEoj, NODE_PROFILE_OBJECT};
use std::net::IpAddr;
use std::time::SystemTime;

impl CommunicationHandler {
    /// Handles an inbound INF/INFC.
    ///
    /// Self-multicast echoes are dropped. INFC is acknowledged with an
    /// INFC_Res carrying empty EDTs. Node-profile notifications may carry
    /// instance lists that reconcile the registry; ordinary notifications
    /// refresh the property cache. Either way the device is marked alive
    /// and online, and the post-update hooks run afterwards with no lock
    /// held.
    pub(crate) async fn process_notification(&self, frame: EchonetFrame, source_ip: IpAddr) {
        if self.transport.is_local_ip(source_ip) {
            dev_trace!(source_ip, "self-multicast echo dropped");
            return;
        }
        let device = IpAndEoj::new(source_ip, frame.seoj);

        if frame.esv == Esv::InfC {
            self.reply_infc(&frame, source_ip);
        }

        if frame.seoj == NODE_PROFILE_OBJECT {
            self.process_node_profile_notification(device, &frame.properties)
                .await;
        } else {
            self.process_device_notification(device, &frame.properties)
                .await;
        }
    }

    async fn process_node_profile_notification(
        &self,
        device: IpAndEoj,
        properties: &[Property],
    ) {
        // Reconcile any announced instance list, fetching property maps
        // for devices we have never seen.
        for property in properties {
            if !is_instance_list_epc(property.epc) {
                continue;
            }
            match decode_instance_list(&property.edt) {
                Ok(instances) => {
                    dev_debug!(device, "instance list with {} entries", instances.len());
                    self.on_instance_list(device.ip, &instances, true);
                }
                Err(e) => dev_warn!(device, "undecodable instance list: {}", e),
            }
        }

        let valued: Vec<Property> = properties
            .iter()
            .filter(|p| !p.edt.is_empty())
            .cloned()
            .collect();
        self.registry
            .register_properties(device, valued.clone(), SystemTime::now());
        self.registry.set_offline(device, false);
        self.save_registry_best_effort();
        self.record_and_publish(device, &valued, HistoryOrigin::Notification);

        // Hooks run outside the registry lock and the property mutex.
        self.process_property_update_hooks(device, &valued);
    }

    async fn process_device_notification(
        &self,
        device: IpAndEoj,
        properties: &[Property],
    ) {
        // An unknown IP means we missed the node's startup announcement;
        // ask for its instance list to learn the full composition.
        if !self.registry.has_ip(&device.ip) {
            self.spawn_instance_list_fetch(device.ip);
        }
        if !self.registry.has_device(&device) {
            self.spawn_property_map_fetch(device);
        }

        let valued: Vec<Property> = properties
            .iter()
            .filter(|p| !p.edt.is_empty())
            .cloned()
            .collect();
        self.registry
            .register_properties(device, valued.clone(), SystemTime::now());
        self.registry.set_offline(device, false);
        self.save_registry_best_effort();
        self.record_and_publish(device, &valued, HistoryOrigin::Notification);

        self.process_property_update_hooks(device, &valued);
    }

    /// Reconciles the registry against a fresh instance list for `ip`.
    /// With `fetch_maps`, newly discovered devices get a property-map Get.
    pub(crate) fn on_instance_list(&self, ip: IpAddr, instances: &[Eoj], fetch_maps: bool) {
        let added = self.registry.reconcile_instance_list(ip, instances);
        self.save_registry_best_effort();
        if fetch_maps {
            for device in added {
                self.spawn_property_map_fetch(device);
            }
        }
    }

    /// Post-update hooks, run WITHOUT the property mutex held (taking it
    /// here would deadlock against in-flight request servicing).
    ///
    /// Node Profile updates trigger:
    /// - instance lists: reconciliation without property-map fetches
    ///   (fetching here would recurse through the Get path forever);
    /// - identification numbers: the IP-migration check.
    pub(crate) fn process_property_update_hooks(
        &self,
        device: IpAndEoj,
        properties: &[Property],
    ) {
        if device.eoj != NODE_PROFILE_OBJECT {
            return;
        }
        for property in properties {
            if is_instance_list_epc(property.epc) {
                if let Ok(instances) = decode_instance_list(&property.edt) {
                    self.on_instance_list(device.ip, &instances, false);
                }
            } else if property.epc == EPC_ID_NUMBER {
                self.handle_ip_migration(device, &property.edt);
            }
        }
    }

    /// Publishes property changes and records history, skipping entries
    /// that merely echo one of our own recent Sets back at us.
    pub(crate) fn record_and_publish(
        &self,
        device: IpAndEoj,
        properties: &[Property],
        origin: HistoryOrigin,
    ) {
        let now = SystemTime::now();
        let set_map = self.registry.property_map(&device, EPC_SET_MAP);
        for property in properties {
            self.hub.publish_property_change(PropertyChange {
                device,
                property: property.clone(),
            });

            let value = self.history_value(&device, property.epc, &property.edt);
            if origin == HistoryOrigin::Notification
                && self.history.is_duplicate_notification(
                    &device,
                    property.epc,
                    &value,
                    self.set_echo_window,
                    now,
                )
            {
                dev_trace!(device, "{} echoes our recent Set, not re-recorded", property.epc);
                continue;
            }
            let settable = match origin {
                HistoryOrigin::Set => true,
                _ => set_map.as_ref().is_some_and(|map| map.contains(property.epc)),
            };
            self.history.record(HistoryEntry {
                timestamp: now,
                device,
                epc: property.epc,
                value,
                origin,
                settable,
            });
        }
    }

    /// Fetches the property maps (and identity, for node profiles) of a
    /// newly discovered device in the background.
    pub(crate) fn spawn_property_map_fetch(&self, device: IpAndEoj) {
        let Some(handler) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let mut epcs = vec![EPC_GET_MAP, EPC_SET_MAP, EPC_ANNOUNCEMENT_MAP];
            if device.eoj == NODE_PROFILE_OBJECT {
                epcs.push(EPC_ID_NUMBER);
            }
            let cancel = handler.cancel.clone();
            if let Err(e) = handler.get_properties(device, &epcs, true, &cancel).await {
                dev_debug!(device, "property map fetch failed: {}", e);
            }
        });
    }

    fn spawn_instance_list_fetch(&self, ip: IpAddr) {
        let Some(handler) = self.me.upgrade() else {
            return;
        };
        let device = IpAndEoj::new(ip, NODE_PROFILE_OBJECT);
        tokio::spawn(async move {
            let cancel = handler.cancel.clone();
            if let Err(e) = handler
                .get_properties(device, &[EPC_SELF_NODE_INSTANCE_LIST_S], true, &cancel)
                .await
            {
                dev_debug!(device, "instance list fetch failed: {}", e);
            }
        });
    }

    fn reply_infc(&self, frame: &EchonetFrame, source_ip: IpAddr) {
        let seoj = self
            .local
            .read()
            .unwrap()
            .first_match(frame.deoj)
            .unwrap_or(NODE_PROFILE_OBJECT);
        let acks: Vec<Property> = frame.properties.iter().map(|p| Property::empty(p.epc)).collect();
        let reply = EchonetFrame::new(frame.tid, seoj, frame.seoj, Esv::InfCRes, acks);
        if let Err(e) = self.session.send_reply(source_ip, &reply) {
            dev_warn!(source_ip, "INFC_Res failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::deserialize_frame;
    use crate::handler::testutil::{TestNode, wait_until};
    use crate::object::profile::{EPC_INSTANCE_LIST_NOTIFICATION, encode_instance_list};
    use crate::types::Epc;

    fn inf(seoj: Eoj, properties: Vec<Property>) -> EchonetFrame {
        EchonetFrame::new(0x2000, seoj, NODE_PROFILE_OBJECT, Esv::Inf, properties)
    }

    #[tokio::test]
    async fn test_instance_list_notification_discovers_devices() {
        let node = TestNode::start().await;
        let instances = vec![Eoj::new(0x0130, 1), NODE_PROFILE_OBJECT];
        let frame = inf(
            NODE_PROFILE_OBJECT,
            vec![Property::new(
                EPC_INSTANCE_LIST_NOTIFICATION,
                encode_instance_list(&instances),
            )],
        );
        node.inject_frame("192.168.1.10", &frame).await;

        let registry = node.handler.registry().clone();
        wait_until(|| {
            registry.has_device(&IpAndEoj::new(
                "192.168.1.10".parse().unwrap(),
                Eoj::new(0x0130, 1),
            ))
        })
        .await;
        assert!(registry.has_device(&IpAndEoj::new(
            "192.168.1.10".parse().unwrap(),
            NODE_PROFILE_OBJECT,
        )));

        // Follow-up property map fetches go out for the listed devices.
        node.transport.wait_for_sent(2).await;
        let gets: Vec<EchonetFrame> = node
            .transport
            .sent()
            .iter()
            .map(|d| deserialize_frame(&d.payload).unwrap())
            .filter(|f| f.esv == Esv::Get)
            .collect();
        assert_eq!(gets.len(), 2);
        assert!(gets.iter().all(|f| f.epcs().contains(&EPC_GET_MAP)));
    }

    #[tokio::test]
    async fn test_reconciliation_removes_devices_absent_from_list() {
        let node = TestNode::start().await;
        let ip: IpAddr = "192.168.1.10".parse().unwrap();
        let stale = IpAndEoj::new(ip, Eoj::new(0x0290, 1));
        node.handler
            .registry()
            .register_properties(stale, vec![], SystemTime::now());

        let frame = inf(
            NODE_PROFILE_OBJECT,
            vec![Property::new(
                EPC_INSTANCE_LIST_NOTIFICATION,
                encode_instance_list(&[Eoj::new(0x0130, 1)]),
            )],
        );
        node.inject_frame("192.168.1.10", &frame).await;

        let registry = node.handler.registry().clone();
        wait_until(move || !registry.has_device(&stale)).await;
        // The Node Profile Object survives reconciliation.
        assert!(node
            .handler
            .registry()
            .has_device(&IpAndEoj::new(ip, NODE_PROFILE_OBJECT)));
    }

    #[tokio::test]
    async fn test_ordinary_notification_registers_properties_and_clears_offline() {
        let node = TestNode::start().await;
        let device = IpAndEoj::new("192.168.1.10".parse().unwrap(), Eoj::new(0x0130, 1));
        node.handler
            .registry()
            .register_properties(device, vec![], SystemTime::now());
        node.handler.registry().set_offline(device, true);

        let frame = inf(device.eoj, vec![Property::new(Epc(0x80), vec![0x31])]);
        node.inject_frame("192.168.1.10", &frame).await;

        let registry = node.handler.registry().clone();
        wait_until(move || !registry.is_offline(&device)).await;
        assert_eq!(
            node.handler.registry().get_property(&device, Epc(0x80)).unwrap().edt,
            vec![0x31]
        );
    }

    #[tokio::test]
    async fn test_self_multicast_echo_is_dropped() {
        let node = TestNode::start().await;
        let frame = inf(
            NODE_PROFILE_OBJECT,
            vec![Property::new(
                EPC_INSTANCE_LIST_NOTIFICATION,
                encode_instance_list(&[Eoj::new(0x0130, 1)]),
            )],
        );
        // The test node's own IP.
        node.inject_frame(TestNode::LOCAL_IP, &frame).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(node.handler.registry().devices().is_empty());
    }

    #[tokio::test]
    async fn test_infc_is_acknowledged_with_empty_edts() {
        let node = TestNode::start().await;
        let mut frame = inf(
            Eoj::new(0x0130, 1),
            vec![Property::new(Epc(0x80), vec![0x31])],
        );
        frame.esv = Esv::InfC;
        node.inject_frame("192.168.1.10", &frame).await;

        node.transport.wait_for_sent(1).await;
        let replies: Vec<EchonetFrame> = node
            .transport
            .sent()
            .iter()
            .map(|d| deserialize_frame(&d.payload).unwrap())
            .filter(|f| f.esv == Esv::InfCRes)
            .collect();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].tid, 0x2000);
        assert!(replies[0].properties[0].edt.is_empty());
    }

    #[tokio::test]
    async fn test_notification_from_unknown_ip_requests_instance_list() {
        let node = TestNode::start().await;
        let frame = inf(
            Eoj::new(0x0130, 1),
            vec![Property::new(Epc(0x80), vec![0x31])],
        );
        node.inject_frame("192.168.1.77", &frame).await;

        node.transport.wait_for_sent(1).await;
        let requests: Vec<EchonetFrame> = node
            .transport
            .sent()
            .iter()
            .map(|d| deserialize_frame(&d.payload).unwrap())
            .filter(|f| f.esv == Esv::Get)
            .collect();
        assert!(requests
            .iter()
            .any(|f| f.epcs().contains(&EPC_SELF_NODE_INSTANCE_LIST_S)));
    }
}
