// crates/echonet-rs/src/handler/inbound.rs
//! Servicing of inbound requests addressed to our local objects.

use crate::frame::{EchonetFrame, Esv, Property};
use crate::handler::CommunicationHandler;
use crate::log::{dev_trace, dev_warn};
use crate::object::profile::EPC_INSTANCE_LIST_NOTIFICATION;
use crate::types::{C_MULTICAST_ADDR, Eoj, Epc, IpAndEoj, NODE_PROFILE_OBJECT};
use std::net::IpAddr;

impl CommunicationHandler {
    /// Handles a frame the session did not consume: a notification, a
    /// request against our local objects, or noise.
    pub(crate) async fn handle_frame(&self, frame: EchonetFrame, source_ip: IpAddr) {
        if frame.esv.is_notification() {
            self.process_notification(frame, source_ip).await;
            return;
        }
        if frame.esv.is_request() {
            self.handle_request(&frame, source_ip);
            return;
        }
        dev_trace!(source_ip, "ignoring uncorrelated {}", frame.esv);
    }

    /// Dispatches a request by ESV. Requests whose DEOJ matches no local
    /// object (instance 0 is a wildcard) are silently ignored.
    fn handle_request(&self, frame: &EchonetFrame, source_ip: IpAddr) {
        let target = self.local.read().unwrap().first_match(frame.deoj);
        let Some(target) = target else {
            dev_trace!(source_ip, "request for unknown local object {}", frame.deoj);
            return;
        };
        match frame.esv {
            Esv::Get => self.serve_get(frame, target, source_ip),
            Esv::SetC | Esv::SetI => self.serve_set(frame, target, source_ip),
            Esv::SetGet => self.serve_set_get(frame, target, source_ip),
            Esv::InfReq => self.serve_inf_req(frame, target, source_ip),
            _ => {}
        }
    }

    /// Get: every requested EPC is answered; unreadable EPCs carry an empty
    /// EDT and downgrade the reply to Get_SNA.
    fn serve_get(&self, frame: &EchonetFrame, target: Eoj, source_ip: IpAddr) {
        let (results, all_present) = {
            let local = self.local.read().unwrap();
            let mut all_present = true;
            let results: Vec<Property> = frame
                .properties
                .iter()
                .map(|p| match local.read(target, p.epc) {
                    Some(edt) => Property::new(p.epc, edt),
                    None => {
                        all_present = false;
                        Property::empty(p.epc)
                    }
                })
                .collect();
            (results, all_present)
        };
        let esv = if all_present { Esv::GetRes } else { Esv::GetSna };
        self.reply(frame, target, esv, results, Vec::new(), source_ip);
    }

    /// SetC/SetI: writable EPCs are stored and echoed with an empty EDT
    /// (success marker); rejected EPCs echo the original EDT. SetI answers
    /// only on failure. Changed announced EPCs go out as a multicast INF.
    fn serve_set(&self, frame: &EchonetFrame, target: Eoj, source_ip: IpAddr) {
        let (results, changed, all_ok) = self.apply_set(target, &frame.properties);

        match frame.esv {
            Esv::SetC => {
                let esv = if all_ok { Esv::SetRes } else { Esv::SetCSna };
                self.reply(frame, target, esv, results, Vec::new(), source_ip);
            }
            Esv::SetI if !all_ok => {
                self.reply(frame, target, Esv::SetISna, results, Vec::new(), source_ip);
            }
            _ => {}
        }

        self.announce_changes(target, &changed);
    }

    /// SetGet: the Set portion is applied, the Get portion answered;
    /// success requires both halves to succeed in full.
    fn serve_set_get(&self, frame: &EchonetFrame, target: Eoj, source_ip: IpAddr) {
        let (set_results, changed, set_ok) = self.apply_set(target, &frame.properties);
        let (get_results, get_ok) = {
            let local = self.local.read().unwrap();
            let mut all_present = true;
            let results: Vec<Property> = frame
                .second_properties
                .iter()
                .map(|p| match local.read(target, p.epc) {
                    Some(edt) => Property::new(p.epc, edt),
                    None => {
                        all_present = false;
                        Property::empty(p.epc)
                    }
                })
                .collect();
            (results, all_present)
        };

        let esv = if set_ok && get_ok {
            Esv::SetGetRes
        } else {
            Esv::SetGetSna
        };
        self.reply(frame, target, esv, set_results, get_results, source_ip);
        self.announce_changes(target, &changed);
    }

    /// INF_REQ: if every requested EPC is readable the values go out as a
    /// multicast INF; otherwise the requester gets a unicast INF_REQ_SNA.
    fn serve_inf_req(&self, frame: &EchonetFrame, target: Eoj, source_ip: IpAddr) {
        let (results, all_present) = {
            let local = self.local.read().unwrap();
            let mut all_present = true;
            let results: Vec<Property> = frame
                .properties
                .iter()
                .map(|p| match local.read(target, p.epc) {
                    Some(edt) => Property::new(p.epc, edt),
                    None => {
                        all_present = false;
                        Property::empty(p.epc)
                    }
                })
                .collect();
            (results, all_present)
        };

        if all_present {
            if let Err(e) = self.session.send_no_wait(
                IpAddr::V4(C_MULTICAST_ADDR),
                target,
                NODE_PROFILE_OBJECT,
                Esv::Inf,
                results,
            ) {
                dev_warn!(source_ip, "INF broadcast failed: {}", e);
            }
        } else {
            self.reply(frame, target, Esv::InfReqSna, results, Vec::new(), source_ip);
        }
    }

    /// Applies a Set property list to `target`. Returns the reply
    /// properties, the changed properties, and whether every write
    /// succeeded.
    fn apply_set(&self, target: Eoj, properties: &[Property]) -> (Vec<Property>, Vec<Epc>, bool) {
        let mut local = self.local.write().unwrap();
        let mut results = Vec::with_capacity(properties.len());
        let mut changed = Vec::new();
        let mut all_ok = true;
        for property in properties {
            match local.write(target, property.epc, property.edt.clone()) {
                Ok(value_changed) => {
                    results.push(Property::empty(property.epc));
                    if value_changed {
                        changed.push(property.epc);
                    }
                }
                Err(_) => {
                    all_ok = false;
                    results.push(property.clone());
                }
            }
        }
        (results, changed, all_ok)
    }

    /// Multicasts an INF carrying the current values of the changed EPCs
    /// that are in the target's announcement map.
    pub(crate) fn announce_changes(&self, target: Eoj, changed: &[Epc]) {
        let announce: Vec<Property> = {
            let local = self.local.read().unwrap();
            let map = local.announcement_map(target);
            changed
                .iter()
                .filter(|&&epc| map.contains(epc))
                .filter_map(|&epc| local.read(target, epc).map(|edt| Property::new(epc, edt)))
                .collect()
        };
        if announce.is_empty() {
            return;
        }
        if let Err(e) = self.session.send_no_wait(
            IpAddr::V4(C_MULTICAST_ADDR),
            target,
            NODE_PROFILE_OBJECT,
            Esv::Inf,
            announce,
        ) {
            dev_warn!("status change INF failed: {}", e);
        }
    }

    /// Announces our own instance list, as nodes do at startup and on
    /// composition changes.
    pub fn announce_instance_list(&self) -> Result<(), crate::error::EchonetError> {
        let edt = self.local.read().unwrap().instance_list_edt();
        let local_npo = NODE_PROFILE_OBJECT;
        self.session.send_no_wait(
            IpAddr::V4(C_MULTICAST_ADDR),
            local_npo,
            NODE_PROFILE_OBJECT,
            Esv::Inf,
            vec![Property::new(EPC_INSTANCE_LIST_NOTIFICATION, edt)],
        )?;
        Ok(())
    }

    fn reply(
        &self,
        request: &EchonetFrame,
        target: Eoj,
        esv: Esv,
        properties: Vec<Property>,
        second_properties: Vec<Property>,
        source_ip: IpAddr,
    ) {
        let mut reply = EchonetFrame::new(request.tid, target, request.seoj, esv, properties);
        reply.second_properties = second_properties;
        if let Err(e) = self.session.send_reply(source_ip, &reply) {
            dev_warn!(
                IpAndEoj::new(source_ip, request.seoj),
                "reply {} failed: {}",
                esv,
                e
            );
        }
    }
}
