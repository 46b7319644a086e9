// crates/echonet-rs/src/session/broadcast.rs
//! Broadcast fan-in: one wildcard-instance datagram, one waiter per
//! instance sharing the TID.

use crate::error::EchonetError;
use crate::frame::{EchonetFrame, Esv};
use crate::session::{PendingRequest, ResponseRoute, Session};
use crate::types::{Eoj, Epc, IpAndEoj};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

impl Session {
    /// Sends ONE Get datagram addressed to instance 0 of the shared class
    /// and fans responses out to one logical waiter per instance, routed by
    /// the responder's SEOJ.
    ///
    /// Every waiter runs its own retry timer and resends the shared
    /// wildcard datagram independently; every responded instance gets its
    /// frame, every silent instance a [`EchonetError::MaxRetriesReached`].
    ///
    /// All `instances` must share `ip` and a class code.
    pub async fn get_properties_broadcast(
        &self,
        ip: IpAddr,
        instances: &[Eoj],
        seoj: Eoj,
        epcs: &[Epc],
        cancel: &CancellationToken,
    ) -> Vec<(IpAndEoj, Result<EchonetFrame, EchonetError>)> {
        let Some(first) = instances.first() else {
            return Vec::new();
        };
        let Some(session) = self.me.upgrade() else {
            return Vec::new();
        };
        let deoj = first.with_instance(0);

        let mut receivers = Vec::with_capacity(instances.len());
        let tid = {
            let mut state = self.state.lock().unwrap();
            let tid = Self::alloc_tid(&mut state);
            let mut waiters = HashMap::with_capacity(instances.len());
            for &instance in instances {
                let (tx, rx) = mpsc::unbounded_channel();
                waiters.insert(instance, tx);
                receivers.push((instance, rx));
            }
            state.pending.insert(
                tid,
                PendingRequest {
                    expected: Esv::Get.valid_responses(),
                    route: ResponseRoute::Broadcast(waiters),
                },
            );
            tid
        };

        let frame = EchonetFrame::request_for_epcs(tid, seoj, deoj, Esv::Get, epcs);
        let payload = match frame.to_vec() {
            Ok(payload) => payload,
            Err(e) => {
                self.unregister_broadcast(tid);
                return instances
                    .iter()
                    .map(|&eoj| (IpAndEoj::new(ip, eoj), Err(e.clone())))
                    .collect();
            }
        };
        if let Err(e) = self.transport.send_to(ip, &payload) {
            self.unregister_broadcast(tid);
            return instances
                .iter()
                .map(|&eoj| (IpAndEoj::new(ip, eoj), Err(e.clone())))
                .collect();
        }

        let mut waiters = JoinSet::new();
        for (instance, rx) in receivers {
            let session = session.clone();
            let payload = payload.clone();
            let cancel = cancel.clone();
            let device = IpAndEoj::new(ip, instance);
            waiters.spawn(async move {
                session.broadcast_waiter(tid, device, rx, payload, cancel).await
            });
        }

        let mut results = Vec::with_capacity(instances.len());
        while let Some(joined) = waiters.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(_) => { /* waiter panicked or was aborted; nothing to record */ }
            }
        }
        results
    }

    async fn broadcast_waiter(
        self: Arc<Self>,
        tid: u16,
        device: IpAndEoj,
        mut rx: mpsc::UnboundedReceiver<EchonetFrame>,
        payload: Vec<u8>,
        cancel: CancellationToken,
    ) -> (IpAndEoj, Result<EchonetFrame, EchonetError>) {
        let started = Instant::now();
        let mut retry = 0u32;
        loop {
            let interval = self.next_interval(retry);
            tokio::select! {
                maybe = rx.recv() => {
                    return (device, maybe.ok_or(EchonetError::ChannelClosed));
                }
                _ = cancel.cancelled() => {
                    self.unregister_instance(tid, device.eoj);
                    return (device, Err(EchonetError::Cancelled));
                }
                _ = tokio::time::sleep(interval) => {
                    retry += 1;
                    if retry >= self.config.max_retries {
                        self.unregister_instance(tid, device.eoj);
                        return (device, Err(self.report_timeout(device, started)));
                    }
                    if let Err(e) = self.transport.send_to(device.ip, &payload) {
                        self.unregister_instance(tid, device.eoj);
                        return (device, Err(e));
                    }
                }
            }
        }
    }

    /// Drops one instance's waiter; the dispatch entry goes away with the
    /// last one.
    fn unregister_instance(&self, tid: u16, eoj: Eoj) {
        let mut state = self.state.lock().unwrap();
        let now_empty = match state.pending.get_mut(&tid) {
            Some(pending) => match &mut pending.route {
                ResponseRoute::Broadcast(waiters) => {
                    waiters.remove(&eoj);
                    waiters.is_empty()
                }
                ResponseRoute::Single(_) => false,
            },
            None => false,
        };
        if now_empty {
            state.pending.remove(&tid);
        }
    }

    fn unregister_broadcast(&self, tid: u16) {
        self.state.lock().unwrap().pending.remove(&tid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Property, deserialize_frame};
    use crate::session::SessionConfig;
    use crate::transport::MemoryTransport;
    use crate::types::CONTROLLER_OBJECT;

    #[tokio::test]
    async fn test_single_datagram_fans_out_to_all_instances() {
        let (transport, _rx) = MemoryTransport::new(vec![]);
        let (session, _timeouts) = Session::new(transport.clone(), SessionConfig::default());
        let ip: IpAddr = "192.168.1.50".parse().unwrap();
        let instances = [Eoj::new(0x0130, 1), Eoj::new(0x0130, 2), Eoj::new(0x0130, 3)];
        let cancel = CancellationToken::new();

        let broadcast = tokio::spawn({
            let session = session.clone();
            let cancel = cancel.clone();
            async move {
                session
                    .get_properties_broadcast(
                        ip,
                        &instances,
                        CONTROLLER_OBJECT,
                        &[Epc(0x80)],
                        &cancel,
                    )
                    .await
            }
        });

        transport.wait_for_sent(1).await;
        let sent = deserialize_frame(&transport.sent()[0].payload).unwrap();
        // One datagram addressed to the class wildcard.
        assert_eq!(sent.deoj, Eoj::new(0x0130, 0));

        for (i, &instance) in instances.iter().enumerate() {
            let response = EchonetFrame::new(
                sent.tid,
                instance,
                CONTROLLER_OBJECT,
                Esv::GetRes,
                vec![Property::new(Epc(0x80), vec![0x30 + i as u8])],
            );
            assert!(session.dispatch_inbound(&response, ip));
        }

        let mut results = broadcast.await.unwrap();
        assert_eq!(results.len(), 3);
        results.sort_by_key(|(device, _)| device.eoj);
        for (i, (device, result)) in results.iter().enumerate() {
            assert_eq!(device.eoj.instance, i as u8 + 1);
            // Each result carries the EDT of its own instance.
            let frame = result.as_ref().unwrap();
            assert_eq!(frame.properties[0].edt, vec![0x30 + i as u8]);
        }
        // Exactly one datagram went out.
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_instance_times_out_others_resolve() {
        let (transport, _rx) = MemoryTransport::new(vec![]);
        let (session, mut timeouts) = Session::new(transport.clone(), SessionConfig::default());
        let ip: IpAddr = "192.168.1.51".parse().unwrap();
        let instances = [Eoj::new(0x0130, 1), Eoj::new(0x0130, 2)];
        let cancel = CancellationToken::new();

        let broadcast = tokio::spawn({
            let session = session.clone();
            let cancel = cancel.clone();
            async move {
                session
                    .get_properties_broadcast(
                        ip,
                        &instances,
                        CONTROLLER_OBJECT,
                        &[Epc(0x80)],
                        &cancel,
                    )
                    .await
            }
        });

        transport.wait_for_sent(1).await;
        let sent = deserialize_frame(&transport.sent()[0].payload).unwrap();
        let response = EchonetFrame::new(
            sent.tid,
            instances[0],
            CONTROLLER_OBJECT,
            Esv::GetRes,
            vec![Property::new(Epc(0x80), vec![0x30])],
        );
        assert!(session.dispatch_inbound(&response, ip));

        let results = broadcast.await.unwrap();
        let ok = results
            .iter()
            .find(|(d, _)| d.eoj == instances[0])
            .unwrap();
        assert!(ok.1.is_ok());
        let timed_out = results
            .iter()
            .find(|(d, _)| d.eoj == instances[1])
            .unwrap();
        assert!(matches!(
            timed_out.1,
            Err(EchonetError::MaxRetriesReached { .. })
        ));
        let event = timeouts.recv().await.unwrap();
        assert_eq!(event.device.eoj, instances[1]);
    }
}
