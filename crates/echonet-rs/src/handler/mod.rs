// crates/echonet-rs/src/handler/mod.rs
//! The communication handler: inbound ESV dispatch, notification
//! processing, discovery, and the imperative Get/Set API.

pub mod core;
pub mod inbound;
pub mod migrate;
pub mod notify;
pub mod outbound;
pub mod tracker;

pub use self::core::{
    DeviceNotification, NotificationHub, NotificationType, OfflineChecker, PropertyChange,
};
pub use tracker::{OperationKind, OperationTracker};

use crate::decoder::{DecodedValue, DecoderRegistry};
use crate::frame::deserialize_frame;
use crate::history::{HistoryStore, HistoryValue};
use crate::log::{dev_trace, dev_warn};
use crate::object::LocalObjects;
use crate::registry::DeviceRegistry;
use crate::session::Session;
use crate::transport::{InboundDatagram, PacketTransport};
use crate::types::{Epc, IpAndEoj};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Window within which an inbound notification matching one of our own
/// recent Sets is treated as an echo and not re-recorded.
pub const DEFAULT_SET_ECHO_WINDOW: Duration = Duration::from_secs(2);

/// Protocol state machine and API surface for one ECHONET Lite node.
///
/// Lock order: the registry lock is always taken before the local-objects
/// lock (the property mutex), never the other way around. Post-update hooks
/// run with neither held.
pub struct CommunicationHandler {
    pub(crate) transport: Arc<dyn PacketTransport>,
    pub(crate) session: Arc<Session>,
    pub(crate) registry: Arc<DeviceRegistry>,
    pub(crate) local: RwLock<LocalObjects>,
    pub(crate) history: Arc<HistoryStore>,
    pub(crate) hub: Arc<NotificationHub>,
    pub(crate) tracker: Arc<OperationTracker>,
    pub(crate) decoders: Arc<DecoderRegistry>,
    pub(crate) set_echo_window: Duration,
    pub(crate) cancel: CancellationToken,
    /// Self-handle for spawning background work from `&self` methods.
    pub(crate) me: Weak<Self>,
}

impl CommunicationHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn PacketTransport>,
        session: Arc<Session>,
        registry: Arc<DeviceRegistry>,
        local: LocalObjects,
        history: Arc<HistoryStore>,
        hub: Arc<NotificationHub>,
        tracker: Arc<OperationTracker>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            transport,
            session,
            registry,
            local: RwLock::new(local),
            history,
            hub,
            tracker,
            decoders: DecoderRegistry::with_defaults(),
            set_echo_window: DEFAULT_SET_ECHO_WINDOW,
            cancel,
            me: me.clone(),
        })
    }

    pub fn decoders(&self) -> &Arc<DecoderRegistry> {
        &self.decoders
    }

    /// The history-store shape of a property value: decoded to text or a
    /// number when a decoder covers it, raw bytes otherwise. Both the Set
    /// path and the notification path go through here so a notification
    /// echoing our own Set compares equal in the duplicate check.
    pub(crate) fn history_value(&self, device: &IpAndEoj, epc: Epc, edt: &[u8]) -> HistoryValue {
        match self.decoders.decode(device.eoj.class_code, epc, edt) {
            Some(DecodedValue::Text(text)) => HistoryValue::Text(text),
            Some(DecodedValue::Number(number)) => HistoryValue::Number(number),
            None => HistoryValue::Edt(edt.to_vec()),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// Consumes inbound datagrams until the transport closes.
    ///
    /// Each datagram is decoded (malformed ones are logged and dropped),
    /// offered to the session's dispatch table, and otherwise handled as a
    /// request or notification. The channel closing means the socket is
    /// gone, so the loop simply returns.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundDatagram>) {
        while let Some(datagram) = inbound.recv().await {
            let source_ip = datagram.source.ip();
            let frame = match deserialize_frame(&datagram.payload) {
                Ok(frame) => frame,
                Err(e) => {
                    dev_warn!(source_ip, "dropping undecodable datagram: {}", e);
                    continue;
                }
            };
            dev_trace!(source_ip, "received {} TID {:#06x}", frame.esv, frame.tid);
            if self.session.dispatch_inbound(&frame, source_ip) {
                continue;
            }
            self.handle_frame(frame, source_ip).await;
        }
        dev_trace!("inbound channel closed, receive loop exiting");
    }

    /// Saves the registry, logging instead of failing; used on paths where
    /// persistence must not break protocol handling (and on shutdown).
    pub(crate) fn save_registry_best_effort(&self) {
        if let Err(e) = self.registry.save() {
            dev_warn!("registry save failed: {}", e);
        }
    }
}
