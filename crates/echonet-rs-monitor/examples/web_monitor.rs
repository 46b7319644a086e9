// crates/echonet-rs-monitor/examples/web_monitor.rs
//! Runs a controller with the web monitor attached: browse to
//! http://localhost:3000 and watch devices come and go.
//!
//! Run with: `RUST_LOG=info cargo run --example web_monitor`

use echonet_rs::{Controller, ControllerConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let controller = Controller::start(ControllerConfig::default()).await?;
    let notifications = controller.subscribe_notifications(256);
    let registry = controller.registry().clone();

    // Kick off discovery and keep the cache warm in the background.
    controller.discover()?;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let _ = controller
                .update_properties(&echonet_rs::FilterCriteria::all(), false)
                .await;
        }
    });

    echonet_rs_monitor::start_monitor(registry, notifications, None).await
}
