// crates/echonet-rs/src/session/mod.rs
//! The UDP transaction engine: allocates transaction ids, correlates
//! requests with responses, applies the retry schedule, and emits timeout
//! events.

pub mod broadcast;
pub mod failed;
pub mod retry;

pub use retry::{SessionConfig, SessionTimeoutEvent};

use crate::error::EchonetError;
use crate::frame::{Codec, EchonetFrame, Esv, Property};
use crate::log::{dev_debug, dev_trace, dev_warn};
use crate::transport::PacketTransport;
use crate::types::{Eoj, Epc, IpAndEoj};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the timeout event channel; events are dropped with a warning
/// when the consumer lags.
const TIMEOUT_CHANNEL_CAPACITY: usize = 100;

/// Where a matched response is delivered.
enum ResponseRoute {
    /// Ordinary request: one waiter.
    Single(mpsc::UnboundedSender<EchonetFrame>),
    /// Broadcast fan-in: one waiter per instance, routed by SEOJ.
    Broadcast(HashMap<Eoj, mpsc::UnboundedSender<EchonetFrame>>),
}

struct PendingRequest {
    expected: &'static [Esv],
    route: ResponseRoute,
}

struct SessionState {
    next_tid: u16,
    pending: HashMap<u16, PendingRequest>,
    failed_epcs: HashMap<IpAndEoj, BTreeSet<Epc>>,
    last_alive: HashMap<IpAndEoj, Instant>,
    rng: StdRng,
}

/// The session layer. One instance per transport socket.
///
/// All mutable state (dispatch table, TID counter, failed-EPC map,
/// alive-time map, jitter RNG) lives under a single mutex that is never held
/// across an await point.
pub struct Session {
    transport: Arc<dyn PacketTransport>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    timeout_tx: mpsc::Sender<SessionTimeoutEvent>,
    /// Self-handle for spawning broadcast waiters from `&self` methods.
    me: Weak<Self>,
}

impl Session {
    /// Creates the session and the receiver for its timeout events.
    pub fn new(
        transport: Arc<dyn PacketTransport>,
        config: SessionConfig,
    ) -> (Arc<Self>, mpsc::Receiver<SessionTimeoutEvent>) {
        let (timeout_tx, timeout_rx) = mpsc::channel(TIMEOUT_CHANNEL_CAPACITY);
        let session = Arc::new_cyclic(|me| Self {
            transport,
            config,
            state: Mutex::new(SessionState {
                next_tid: 0,
                pending: HashMap::new(),
                failed_epcs: HashMap::new(),
                last_alive: HashMap::new(),
                rng: StdRng::from_os_rng(),
            }),
            timeout_tx,
            me: me.clone(),
        });
        (session, timeout_rx)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Offers an inbound frame to the dispatch table.
    ///
    /// Records device-alive for the sender, then delivers the frame to the
    /// waiter registered under its TID if the ESV is one the request
    /// expects. Returns true when the frame was consumed; unconsumed frames
    /// (notifications, requests, stale responses) belong to the
    /// communication handler.
    pub fn dispatch_inbound(&self, frame: &EchonetFrame, source: IpAddr) -> bool {
        self.signal_alive(IpAndEoj::new(source, frame.seoj));

        let mut state = self.state.lock().unwrap();
        let Some(pending) = state.pending.get_mut(&frame.tid) else {
            return false;
        };
        if !pending.expected.contains(&frame.esv) {
            dev_trace!(
                "TID {:#06x}: {} is not an expected response, ignoring",
                frame.tid,
                frame.esv
            );
            return false;
        }
        let mut remove_entry = false;
        let consumed = match &mut pending.route {
            ResponseRoute::Single(tx) => {
                let _ = tx.send(frame.clone());
                remove_entry = true;
                true
            }
            ResponseRoute::Broadcast(waiters) => {
                // Responses from instances nobody is waiting on (duplicates)
                // leave the entry in place for the remaining waiters.
                match waiters.remove(&frame.seoj) {
                    Some(tx) => {
                        let _ = tx.send(frame.clone());
                        remove_entry = waiters.is_empty();
                        true
                    }
                    None => false,
                }
            }
        };
        if remove_entry {
            state.pending.remove(&frame.tid);
        }
        consumed
    }

    /// Sends a request and awaits its response, applying the retry schedule.
    ///
    /// Resends reuse the original TID (the retry is the same transaction).
    /// On exhaustion a [`SessionTimeoutEvent`] is queued and
    /// [`EchonetError::MaxRetriesReached`] returned. Cancellation
    /// unregisters the waiter and returns [`EchonetError::Cancelled`].
    pub async fn send_request(
        &self,
        device: IpAndEoj,
        seoj: Eoj,
        esv: Esv,
        properties: Vec<Property>,
        second_properties: Vec<Property>,
        cancel: &CancellationToken,
    ) -> Result<EchonetFrame, EchonetError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tid = {
            let mut state = self.state.lock().unwrap();
            let tid = Self::alloc_tid(&mut state);
            state.pending.insert(
                tid,
                PendingRequest {
                    expected: esv.valid_responses(),
                    route: ResponseRoute::Single(tx),
                },
            );
            tid
        };

        let mut frame = EchonetFrame::new(tid, seoj, device.eoj, esv, properties);
        frame.second_properties = second_properties;
        let payload = match frame.to_vec() {
            Ok(payload) => payload,
            Err(e) => {
                self.unregister(tid);
                return Err(e);
            }
        };

        let started = Instant::now();
        if let Err(e) = self.transport.send_to(device.ip, &payload) {
            self.unregister(tid);
            return Err(e);
        }
        dev_trace!(device, "sent {} TID {:#06x}", esv, tid);

        let mut retry = 0u32;
        loop {
            let interval = self.next_interval(retry);
            tokio::select! {
                maybe = rx.recv() => {
                    return maybe.ok_or(EchonetError::ChannelClosed);
                }
                _ = cancel.cancelled() => {
                    self.unregister(tid);
                    return Err(EchonetError::Cancelled);
                }
                _ = tokio::time::sleep(interval) => {
                    retry += 1;
                    if retry >= self.config.max_retries {
                        self.unregister(tid);
                        return Err(self.report_timeout(device, started));
                    }
                    dev_debug!(device, "retry {} for {} TID {:#06x}", retry, esv, tid);
                    if let Err(e) = self.transport.send_to(device.ip, &payload) {
                        self.unregister(tid);
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Sends a frame that expects no correlated response (INF, INF_REQ
    /// relays, SetI). A TID is still allocated so peers see distinct
    /// transactions. Returns the TID used.
    pub fn send_no_wait(
        &self,
        ip: IpAddr,
        seoj: Eoj,
        deoj: Eoj,
        esv: Esv,
        properties: Vec<Property>,
    ) -> Result<u16, EchonetError> {
        let tid = {
            let mut state = self.state.lock().unwrap();
            Self::alloc_tid(&mut state)
        };
        let frame = EchonetFrame::new(tid, seoj, deoj, esv, properties);
        self.transport.send_to(ip, &frame.to_vec()?)?;
        Ok(tid)
    }

    /// Sends a pre-built reply frame (the TID must echo the request's).
    pub fn send_reply(&self, ip: IpAddr, frame: &EchonetFrame) -> Result<(), EchonetError> {
        let mut buffer = [0u8; crate::types::C_MAX_FRAME_SIZE];
        let written = frame.serialize(&mut buffer)?;
        self.transport.send_to(ip, &buffer[..written])?;
        Ok(())
    }

    // --- Device-alive signalling ---

    /// Records that a frame was just received from `device`.
    pub fn signal_alive(&self, device: IpAndEoj) {
        let mut state = self.state.lock().unwrap();
        state.last_alive.insert(device, Instant::now());
    }

    /// The instant `device` was last heard from, if ever.
    pub fn last_alive(&self, device: &IpAndEoj) -> Option<Instant> {
        self.state.lock().unwrap().last_alive.get(device).copied()
    }

    /// True when `device` was heard from within `window`. Retry logic may
    /// consult this to skip a resend to a device that just spoke.
    pub fn heard_from_within(&self, device: &IpAndEoj, window: Duration) -> bool {
        self.last_alive(device)
            .is_some_and(|at| at.elapsed() <= window)
    }

    // --- Internals shared with the broadcast path ---

    /// Allocates the next TID, skipping 0 and TIDs still in the dispatch
    /// table. The 16-bit counter wraps silently; skipping live entries keeps
    /// a wrapped TID from cross-delivering to a stale waiter.
    fn alloc_tid(state: &mut SessionState) -> u16 {
        loop {
            state.next_tid = state.next_tid.wrapping_add(1);
            if state.next_tid != 0 && !state.pending.contains_key(&state.next_tid) {
                return state.next_tid;
            }
        }
    }

    fn next_interval(&self, retry: u32) -> Duration {
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        self.config.interval(retry, &mut state.rng)
    }

    fn unregister(&self, tid: u16) {
        self.state.lock().unwrap().pending.remove(&tid);
    }

    fn report_timeout(&self, device: IpAndEoj, started: Instant) -> EchonetError {
        let event = SessionTimeoutEvent {
            device,
            max_retries: self.config.max_retries,
            total_duration: started.elapsed(),
            retry_interval: self.config.retry_interval,
        };
        if self.timeout_tx.try_send(event).is_err() {
            dev_warn!(device, "timeout event channel full, event dropped");
        }
        EchonetError::MaxRetriesReached {
            device,
            max_retries: self.config.max_retries,
            total_duration: started.elapsed(),
            retry_interval: self.config.retry_interval,
        }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::deserialize_frame;
    use crate::transport::MemoryTransport;
    use crate::types::{CONTROLLER_OBJECT, NODE_PROFILE_OBJECT};

    fn test_session() -> (Arc<Session>, Arc<MemoryTransport>, mpsc::Receiver<SessionTimeoutEvent>) {
        let (transport, _rx) = MemoryTransport::new(vec![]);
        let (session, timeout_rx) = Session::new(transport.clone(), SessionConfig::default());
        (session, transport, timeout_rx)
    }

    fn device(ip: &str) -> IpAndEoj {
        IpAndEoj::new(ip.parse().unwrap(), Eoj::new(0x0130, 1))
    }

    #[tokio::test]
    async fn test_request_resolves_on_matching_response() {
        let (session, transport, _timeouts) = test_session();
        let target = device("192.168.1.10");
        let cancel = CancellationToken::new();

        let request = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .send_request(
                        target,
                        CONTROLLER_OBJECT,
                        Esv::Get,
                        vec![Property::empty(Epc(0x80))],
                        vec![],
                        &cancel,
                    )
                    .await
            }
        });

        transport.wait_for_sent(1).await;
        let sent = deserialize_frame(&transport.sent()[0].payload).unwrap();
        assert_eq!(sent.esv, Esv::Get);

        let response = EchonetFrame::new(
            sent.tid,
            target.eoj,
            CONTROLLER_OBJECT,
            Esv::GetRes,
            vec![Property::new(Epc(0x80), vec![0x30])],
        );
        assert!(session.dispatch_inbound(&response, target.ip));

        let result = request.await.unwrap().unwrap();
        assert_eq!(result.esv, Esv::GetRes);
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_response_with_unexpected_esv_is_not_consumed() {
        let (session, transport, _timeouts) = test_session();
        let target = device("192.168.1.10");
        let cancel = CancellationToken::new();

        let _request = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .send_request(
                        target,
                        CONTROLLER_OBJECT,
                        Esv::Get,
                        vec![Property::empty(Epc(0x80))],
                        vec![],
                        &cancel,
                    )
                    .await
            }
        });
        transport.wait_for_sent(1).await;
        let tid = deserialize_frame(&transport.sent()[0].payload).unwrap().tid;

        // A Set_Res is not a valid answer to a Get.
        let response = EchonetFrame::new(tid, target.eoj, CONTROLLER_OBJECT, Esv::SetRes, vec![]);
        assert!(!session.dispatch_inbound(&response, target.ip));
        assert_eq!(session.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_black_hole_sends_max_retries_datagrams() {
        let (session, transport, mut timeouts) = test_session();
        let target = device("192.168.1.20");
        let cancel = CancellationToken::new();

        let result = session
            .send_request(
                target,
                CONTROLLER_OBJECT,
                Esv::Get,
                vec![Property::empty(Epc(0x80))],
                vec![],
                &cancel,
            )
            .await;

        assert!(matches!(
            result,
            Err(EchonetError::MaxRetriesReached { max_retries: 7, .. })
        ));
        // Initial datagram plus six retries, all sharing one TID.
        let sent = transport.sent();
        assert_eq!(sent.len(), 7);
        let tids: BTreeSet<u16> = sent
            .iter()
            .map(|d| deserialize_frame(&d.payload).unwrap().tid)
            .collect();
        assert_eq!(tids.len(), 1);

        let event = timeouts.recv().await.unwrap();
        assert_eq!(event.device, target);
        assert_eq!(event.max_retries, 7);
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_unregisters_waiter() {
        let (session, transport, _timeouts) = test_session();
        let target = device("192.168.1.30");
        let cancel = CancellationToken::new();

        let request = tokio::spawn({
            let session = session.clone();
            let cancel = cancel.clone();
            async move {
                session
                    .send_request(
                        target,
                        CONTROLLER_OBJECT,
                        Esv::Get,
                        vec![Property::empty(Epc(0x80))],
                        vec![],
                        &cancel,
                    )
                    .await
            }
        });

        transport.wait_for_sent(1).await;
        cancel.cancel();
        assert!(matches!(
            request.await.unwrap(),
            Err(EchonetError::Cancelled)
        ));
        assert_eq!(session.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_tid_allocation_skips_live_entries() {
        let (session, _transport, _timeouts) = test_session();
        let mut state = session.state.lock().unwrap();
        let first = Session::alloc_tid(&mut state);
        let (tx, _rx) = mpsc::unbounded_channel();
        state.pending.insert(
            first + 1,
            PendingRequest {
                expected: &[Esv::GetRes],
                route: ResponseRoute::Single(tx),
            },
        );
        let second = Session::alloc_tid(&mut state);
        assert_eq!(second, first + 2);
    }

    #[tokio::test]
    async fn test_tid_wraps_and_skips_zero() {
        let (session, _transport, _timeouts) = test_session();
        let mut state = session.state.lock().unwrap();
        state.next_tid = u16::MAX;
        assert_eq!(Session::alloc_tid(&mut state), 1);
    }

    #[tokio::test]
    async fn test_inbound_frame_updates_alive_time() {
        let (session, _transport, _timeouts) = test_session();
        let source = IpAndEoj::new("192.168.1.40".parse().unwrap(), NODE_PROFILE_OBJECT);
        let frame = EchonetFrame::new(
            99,
            NODE_PROFILE_OBJECT,
            CONTROLLER_OBJECT,
            Esv::Inf,
            vec![],
        );
        assert!(session.last_alive(&source).is_none());
        session.dispatch_inbound(&frame, source.ip);
        assert!(session.last_alive(&source).is_some());
        assert!(session.heard_from_within(&source, Duration::from_secs(1)));
    }
}
