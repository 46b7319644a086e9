// crates/echonet-rs-monitor/src/model.rs
//! Defines the data structures pushed to monitoring clients.
//!
//! These structs are built from the controller's registry and notification
//! stream and serialized to JSON for the web frontend.

use echonet_rs::registry::DeviceRegistry;
use echonet_rs::{DeviceNotification, NotificationType};
use serde::Serialize;
use std::sync::Arc;

/// One known device as shown in the monitor.
#[derive(Serialize, Clone, Debug)]
pub struct DeviceSummary {
    /// Canonical `"IP CCCC:I"` key.
    pub device: String,
    pub online: bool,
    /// Number of cached properties.
    pub property_count: usize,
}

/// A serializable snapshot of the controller's view of the network,
/// rebuilt on every notification.
#[derive(Serialize, Clone, Debug)]
pub struct MonitorSnapshot {
    pub device_count: usize,
    pub devices: Vec<DeviceSummary>,
    /// The notification that triggered this snapshot.
    pub last_event: Option<String>,
}

impl MonitorSnapshot {
    /// Builds a snapshot of `registry`, attributing it to `trigger`.
    pub fn capture(registry: &Arc<DeviceRegistry>, trigger: Option<&DeviceNotification>) -> Self {
        let mut devices: Vec<DeviceSummary> = registry
            .devices()
            .into_iter()
            .map(|device| DeviceSummary {
                online: !registry.is_offline(&device),
                property_count: registry.properties_of(&device).len(),
                device: device.key(),
            })
            .collect();
        devices.sort_by(|a, b| a.device.cmp(&b.device));

        Self {
            device_count: devices.len(),
            devices,
            last_event: trigger.map(describe),
        }
    }
}

fn describe(notification: &DeviceNotification) -> String {
    let kind = match notification.notification_type {
        NotificationType::Added => "added",
        NotificationType::Removed => "removed",
        NotificationType::Online => "online",
        NotificationType::Offline => "offline",
        NotificationType::Timeout => "timeout",
    };
    format!("{} {}", notification.device, kind)
}
