// crates/echonet-rs/examples/discover.rs
//! Discovers the ECHONET Lite devices on the local network and prints what
//! they reported.
//!
//! Run with: `RUST_LOG=info cargo run --example discover`

use echonet_rs::object::classes::class_name;
use echonet_rs::{Controller, ControllerConfig, FilterCriteria, NotificationType};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let controller = Controller::start(ControllerConfig::default()).await?;
    let mut notifications = controller.subscribe_notifications(64);

    controller.discover()?;
    println!("discovering for 5 seconds...");

    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(notification) = notifications.recv() => {
                if notification.notification_type == NotificationType::Added {
                    println!("found {}", notification.device);
                }
            }
        }
    }

    println!();
    for entry in controller.list_devices(&FilterCriteria::all()) {
        let name = class_name(entry.device.eoj.class_code).unwrap_or("Unknown class");
        println!(
            "{:<28} {} ({} cached properties)",
            entry.device.key(),
            name,
            entry.properties.len()
        );
    }

    controller.shutdown();
    Ok(())
}
