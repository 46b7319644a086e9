// crates/echonet-rs-monitor/src/lib.rs

// Module for the core data models
pub mod model;
// Module for the web server and WebSocket logic
mod server;

use crate::model::MonitorSnapshot;
use echonet_rs::DeviceNotification;
use echonet_rs::registry::DeviceRegistry;
use log::info;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// The default port for the web monitor.
const DEFAULT_MONITOR_PORT: u16 = 3000;
/// The capacity of the broadcast channel for WebSocket clients.
const BROADCAST_CHANNEL_CAPACITY: usize = 32;

/// Starts the web monitor for a running controller.
///
/// * `registry`: the controller's device registry, snapshotted on every
///   notification.
/// * `notifications`: a subscription obtained from
///   `Controller::subscribe_notifications`. Size its buffer generously; the
///   controller disconnects subscribers that stop draining.
/// * `port`: TCP port for the web server (default 3000).
///
/// This future runs until the web server exits; spawn it alongside the
/// controller.
pub async fn start_monitor(
    registry: Arc<DeviceRegistry>,
    mut notifications: mpsc::Receiver<DeviceNotification>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    // 1. Define the web server address.
    let addr = SocketAddr::new(
        IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
        port.unwrap_or(DEFAULT_MONITOR_PORT),
    );

    // 2. Create the tokio broadcast channel that distributes snapshots from
    // the bridge task to all connected WebSocket clients.
    let (snapshot_tx, _) = broadcast::channel::<MonitorSnapshot>(BROADCAST_CHANNEL_CAPACITY);

    // 3. Bridge controller notifications into snapshots. A send error just
    // means no client is connected right now, which is fine.
    let bridge_tx = snapshot_tx.clone();
    let bridge_registry = registry.clone();
    tokio::spawn(async move {
        info!("Starting notification-to-snapshot bridge task.");
        while let Some(notification) = notifications.recv().await {
            let snapshot = MonitorSnapshot::capture(&bridge_registry, Some(&notification));
            let _ = bridge_tx.send(snapshot);
        }
        info!("Notification bridge task shut down.");
    });

    // 4. Start the web server. This runs indefinitely, serving the root
    // page and WebSocket connections.
    server::start_web_server(addr, snapshot_tx).await;

    Ok(())
}
