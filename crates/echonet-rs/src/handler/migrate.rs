// crates/echonet-rs/src/handler/migrate.rs
//! IP-migration: when a known identification number shows up on a new IP
//! while its old home is offline, the device has moved (DHCP renewal,
//! router swap). The stale registration is removed; the next Get cycle
//! refills the cache under the new IP.

use crate::handler::CommunicationHandler;
use crate::log::{dev_info, dev_warn};
use crate::types::{IpAndEoj, NODE_PROFILE_OBJECT};

impl CommunicationHandler {
    /// Invoked from the post-update hook whenever a Node Profile Object
    /// reports an identification number.
    ///
    /// `device` is the Node Profile Object at the NEW address, `edt` the
    /// identification number it reported. Old IPs with the same identity
    /// are removed only when their Node Profile Object is offline; an
    /// online duplicate means two live nodes share an identity (unusual,
    /// but not ours to resolve), so it is left alone.
    pub(crate) fn handle_ip_migration(&self, device: IpAndEoj, edt: &[u8]) {
        let candidates = self
            .registry
            .find_ips_with_same_node_profile_id(edt, &device.ip);
        if candidates.is_empty() {
            return;
        }

        let mut migrated = false;
        for old_ip in candidates {
            let old_profile = IpAndEoj::new(old_ip, NODE_PROFILE_OBJECT);
            if !self.registry.is_offline(&old_profile) {
                dev_warn!(
                    old_profile,
                    "same identification number as {} but still online, leaving in place",
                    device.ip
                );
                continue;
            }
            let removed = self.registry.remove_all_devices_by_ip(old_ip);
            dev_info!(
                device,
                "device moved from {} ({} stale registrations removed)",
                old_ip,
                removed.len()
            );
            migrated = true;
        }
        if migrated {
            self.save_registry_best_effort();
        }
    }
}
