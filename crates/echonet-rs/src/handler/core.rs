// crates/echonet-rs/src/handler/core.rs
//! Event fan-out: one internal notification channel feeding any number of
//! subscribers, plus the single-consumer property-change channel.

use crate::error::EchonetError;
use crate::frame::Property;
use crate::log::{dev_debug, dev_info, dev_warn};
use crate::registry::{DeviceEvent, DeviceEventType};
use crate::session::SessionTimeoutEvent;
use crate::types::IpAndEoj;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// What a device notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    Added,
    Removed,
    Online,
    Offline,
    Timeout,
}

/// The event surface exposed to external collaborators (CLI, WebSocket).
#[derive(Debug, Clone)]
pub struct DeviceNotification {
    pub device: IpAndEoj,
    pub notification_type: NotificationType,
    pub error: Option<EchonetError>,
}

/// One observed property value change.
#[derive(Debug, Clone)]
pub struct PropertyChange {
    pub device: IpAndEoj,
    pub property: Property,
}

/// Decides whether a device is already known-dead, so timeout notifications
/// for it can be suppressed instead of spamming every subscriber.
pub type OfflineChecker = Box<dyn Fn(&IpAndEoj) -> bool + Send + Sync>;

/// Capacity of the internal notification channel.
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 100;
/// Capacity of the property-change channel.
pub const PROPERTY_CHANGE_CHANNEL_CAPACITY: usize = 2000;

struct Subscriber {
    tx: mpsc::Sender<DeviceNotification>,
}

struct HubState {
    subscribers: Vec<Subscriber>,
    offline_checker: Option<OfflineChecker>,
}

/// Fans incoming notifications out to every subscriber.
///
/// Sends are non-blocking: a subscriber whose buffer is full is
/// disconnected (its channel closed and removed) rather than allowed to
/// stall the hub. This is the backpressure policy, not an error path.
pub struct NotificationHub {
    state: Mutex<HubState>,
    notification_tx: mpsc::Sender<DeviceNotification>,
    property_change_tx: mpsc::Sender<PropertyChange>,
}

impl NotificationHub {
    /// Creates the hub and spawns its fan-out task. Returns the hub and the
    /// single-consumer property-change receiver.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<PropertyChange>) {
        let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let (property_change_tx, property_change_rx) =
            mpsc::channel(PROPERTY_CHANGE_CHANNEL_CAPACITY);
        let hub = Arc::new(Self {
            state: Mutex::new(HubState {
                subscribers: Vec::new(),
                offline_checker: None,
            }),
            notification_tx,
            property_change_tx,
        });
        tokio::spawn(fan_out_loop(hub.clone(), notification_rx));
        (hub, property_change_rx)
    }

    /// Registers a subscriber with its own buffer. The returned channel is
    /// closed if the subscriber falls behind.
    pub fn subscribe(&self, buffer_size: usize) -> mpsc::Receiver<DeviceNotification> {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        self.state.lock().unwrap().subscribers.push(Subscriber { tx });
        rx
    }

    /// Installs the offline checker consulted before forwarding timeout
    /// notifications.
    pub fn set_offline_checker(&self, checker: OfflineChecker) {
        self.state.lock().unwrap().offline_checker = Some(checker);
    }

    /// Queues a notification for fan-out. Non-blocking; a full internal
    /// channel drops the notification with a warning.
    pub fn publish(&self, notification: DeviceNotification) {
        if self.notification_tx.try_send(notification).is_err() {
            dev_warn!("notification channel full, event dropped");
        }
    }

    /// Queues a property change for the single consumer. Non-blocking.
    pub fn publish_property_change(&self, change: PropertyChange) {
        let device = change.device;
        if self.property_change_tx.try_send(change).is_err() {
            dev_warn!(device, "property change channel full, change dropped");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().unwrap().subscribers.len()
    }

    /// Forwards one notification to every subscriber, disconnecting the
    /// ones whose buffers are full.
    fn fan_out(&self, notification: &DeviceNotification) {
        let mut state = self.state.lock().unwrap();

        if notification.notification_type == NotificationType::Timeout {
            if let Some(checker) = &state.offline_checker {
                if checker(&notification.device) {
                    dev_debug!(
                        notification.device,
                        "timeout for known-offline device suppressed"
                    );
                    return;
                }
            }
        }

        state.subscribers.retain(|subscriber| {
            match subscriber.tx.try_send(notification.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Dropping the sender closes the subscriber's channel.
                    dev_info!("slow notification subscriber disconnected");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

async fn fan_out_loop(hub: Arc<NotificationHub>, mut rx: mpsc::Receiver<DeviceNotification>) {
    while let Some(notification) = rx.recv().await {
        hub.fan_out(&notification);
    }
}

/// Translates registry events and session timeouts into device
/// notifications until both sources close. Online/offline transitions are
/// also recorded into the history store when one is supplied.
pub async fn relay_events(
    hub: Arc<NotificationHub>,
    mut device_events: mpsc::Receiver<DeviceEvent>,
    mut timeouts: mpsc::Receiver<SessionTimeoutEvent>,
    history: Option<Arc<crate::history::HistoryStore>>,
) {
    loop {
        tokio::select! {
            event = device_events.recv() => {
                let Some(event) = event else { return };
                let notification_type = match event.event_type {
                    DeviceEventType::Added => NotificationType::Added,
                    DeviceEventType::Removed => NotificationType::Removed,
                    DeviceEventType::Online => NotificationType::Online,
                    DeviceEventType::Offline => NotificationType::Offline,
                };
                if let Some(history) = &history {
                    match notification_type {
                        NotificationType::Online => history.record_availability(
                            event.device, true, std::time::SystemTime::now()),
                        NotificationType::Offline => history.record_availability(
                            event.device, false, std::time::SystemTime::now()),
                        _ => {}
                    }
                }
                hub.publish(DeviceNotification {
                    device: event.device,
                    notification_type,
                    error: None,
                });
            }
            timeout = timeouts.recv() => {
                let Some(timeout) = timeout else { return };
                hub.publish(DeviceNotification {
                    device: timeout.device,
                    notification_type: NotificationType::Timeout,
                    error: Some(EchonetError::MaxRetriesReached {
                        device: timeout.device,
                        max_retries: timeout.max_retries,
                        total_duration: timeout.total_duration,
                        retry_interval: timeout.retry_interval,
                    }),
                });
            }
        }
    }
}
