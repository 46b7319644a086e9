// crates/echonet-rs/tests/persistence.rs
//! Controller restarts: what survives on disk and what intentionally does
//! not.

use echonet_rs::frame::{EchonetFrame, Esv, Property};
use echonet_rs::history::{HistoryEntry, HistoryOrigin, HistoryValue};
use echonet_rs::object::profile::EPC_INSTANCE_LIST_NOTIFICATION;
use echonet_rs::object::profile::encode_instance_list;
use echonet_rs::transport::MemoryTransport;
use echonet_rs::types::{Eoj, Epc, IpAndEoj, NODE_PROFILE_OBJECT};
use echonet_rs::{Controller, ControllerConfig};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

fn config(dir: &tempfile::TempDir) -> ControllerConfig {
    ControllerConfig {
        devices_path: Some(dir.path().join("devices.json")),
        history_path: Some(dir.path().join("history.json")),
        aliases_path: Some(dir.path().join("aliases.json")),
        ..Default::default()
    }
}

fn start(dir: &tempfile::TempDir) -> Controller {
    let (transport, inbound_rx) = MemoryTransport::new(vec!["192.168.1.1".parse().unwrap()]);
    Controller::assemble(config(dir), transport, inbound_rx, CancellationToken::new()).unwrap()
}

async fn start_with_transport(
    dir: &tempfile::TempDir,
) -> (Controller, std::sync::Arc<MemoryTransport>) {
    let (transport, inbound_rx) = MemoryTransport::new(vec!["192.168.1.1".parse().unwrap()]);
    let controller =
        Controller::assemble(config(dir), transport.clone(), inbound_rx, CancellationToken::new())
            .unwrap();
    transport.take_sent();
    (controller, transport)
}

#[tokio::test]
async fn devices_survive_a_restart_state_flags_do_not() {
    let dir = tempfile::tempdir().unwrap();
    let device = IpAndEoj::new("192.168.1.10".parse().unwrap(), Eoj::new(0x0130, 1));

    {
        let (controller, transport) = start_with_transport(&dir).await;
        // Learn a node via its announcement.
        let announcement = EchonetFrame::new(
            1,
            NODE_PROFILE_OBJECT,
            NODE_PROFILE_OBJECT,
            Esv::Inf,
            vec![Property::new(
                EPC_INSTANCE_LIST_NOTIFICATION,
                encode_instance_list(&[device.eoj]),
            )],
        );
        transport
            .inject(device.ip, announcement.to_vec().unwrap())
            .await;

        let registry = controller.registry().clone();
        for _ in 0..500 {
            if registry.has_device(&device) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(registry.has_device(&device));
        registry.register_properties(
            device,
            vec![Property::new(Epc(0x80), vec![0x30])],
            SystemTime::now(),
        );
        registry.set_offline(device, true);
        controller.shutdown();
    }

    // A fresh controller over the same files sees the same devices...
    let controller = start(&dir);
    let registry = controller.registry();
    assert!(registry.has_device(&device));
    assert_eq!(
        registry.get_property(&device, Epc(0x80)).unwrap().edt,
        vec![0x30]
    );
    // ...but neither the offline flag nor the update timestamp.
    assert!(!registry.is_offline(&device));
    assert!(registry.last_update_time(&device).is_none());
}

#[tokio::test]
async fn history_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let device = IpAndEoj::new("192.168.1.10".parse().unwrap(), Eoj::new(0x0130, 1));

    {
        let controller = start(&dir);
        controller.handler().history().record(HistoryEntry {
            timestamp: SystemTime::now(),
            device,
            epc: Epc(0x80),
            value: HistoryValue::Text("on".into()),
            origin: HistoryOrigin::Set,
            settable: true,
        });
        controller.shutdown();
    }

    let controller = start(&dir);
    let history = controller.handler().history().device_history(&device);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].value, HistoryValue::Text("on".into()));
    assert_eq!(history[0].origin, HistoryOrigin::Set);
}

#[tokio::test]
async fn corrupt_registry_file_aborts_startup() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("devices.json"), "{broken").unwrap();

    let (transport, inbound_rx) = MemoryTransport::new(vec![]);
    let result = Controller::assemble(config(&dir), transport, inbound_rx, CancellationToken::new());
    assert!(result.is_err());
}

#[tokio::test]
async fn registry_writes_are_atomic_no_tmp_left_behind() {
    let dir = tempfile::tempdir().unwrap();
    let controller = start(&dir);
    let device = IpAndEoj::new("192.168.1.10".parse().unwrap(), Eoj::new(0x0130, 1));
    controller.registry().register_properties(device, vec![], SystemTime::now());
    controller.registry().save().unwrap();

    let devices_path: PathBuf = dir.path().join("devices.json");
    assert!(devices_path.exists());
    assert!(!dir.path().join("devices.json.tmp").exists());
}
