// crates/echonet-rs/src/session/failed.rs
//! Per-device bookkeeping of EPCs that most recently failed a Get.

use crate::session::Session;
use crate::types::{Epc, IpAndEoj};
use std::collections::BTreeSet;

impl Session {
    /// Reconciles the failed-EPC set for `device` after a Get result.
    ///
    /// `succeeded` are the EPCs that returned a value this round, `failed`
    /// the EPCs that came back empty. Returns only the EPCs that were not
    /// already known to be failing, so callers can log new failures without
    /// repeating old ones. The stored set becomes
    /// `(previous \ succeeded) ∪ failed`; an empty set is dropped entirely.
    pub fn update_failed_epcs(
        &self,
        device: IpAndEoj,
        succeeded: &[Epc],
        failed: &[Epc],
    ) -> Vec<Epc> {
        let mut state = self.state.lock().unwrap();
        let previous = state.failed_epcs.remove(&device).unwrap_or_default();

        let newly_failed: Vec<Epc> = failed
            .iter()
            .filter(|epc| !previous.contains(epc))
            .copied()
            .collect();

        let mut next: BTreeSet<Epc> = previous
            .into_iter()
            .filter(|epc| !succeeded.contains(epc))
            .collect();
        next.extend(failed.iter().copied());

        if !next.is_empty() {
            state.failed_epcs.insert(device, next);
        }
        newly_failed
    }

    /// The EPCs currently known to fail Gets on `device`, in ascending
    /// order. Empty when the device has no failing EPCs on record.
    pub fn failed_epcs(&self, device: &IpAndEoj) -> Vec<Epc> {
        self.state
            .lock()
            .unwrap()
            .failed_epcs
            .get(device)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn has_failed_epc_entry(&self, device: &IpAndEoj) -> bool {
        self.state.lock().unwrap().failed_epcs.contains_key(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::transport::MemoryTransport;
    use crate::types::Eoj;
    use std::sync::Arc;

    fn test_session() -> Arc<Session> {
        let (transport, _rx) = MemoryTransport::new(vec![]);
        Session::new(transport, SessionConfig::default()).0
    }

    fn device() -> IpAndEoj {
        IpAndEoj::new("192.168.1.60".parse().unwrap(), Eoj::new(0x0130, 1))
    }

    #[test]
    fn test_returns_only_newly_failed() {
        let session = test_session();
        let d = device();

        let first = session.update_failed_epcs(d, &[], &[Epc(0x80), Epc(0x81)]);
        assert_eq!(first, vec![Epc(0x80), Epc(0x81)]);

        // 0x80 is already known; only 0x82 is new.
        let second = session.update_failed_epcs(d, &[], &[Epc(0x80), Epc(0x82)]);
        assert_eq!(second, vec![Epc(0x82)]);
        assert_eq!(
            session.failed_epcs(&d),
            vec![Epc(0x80), Epc(0x81), Epc(0x82)]
        );
    }

    #[test]
    fn test_success_clears_and_state_follows_set_algebra() {
        let session = test_session();
        let d = device();

        session.update_failed_epcs(d, &[], &[Epc(0x80), Epc(0x81), Epc(0x82)]);
        // 0x80 recovers, 0x83 starts failing.
        let newly = session.update_failed_epcs(d, &[Epc(0x80)], &[Epc(0x83)]);
        assert_eq!(newly, vec![Epc(0x83)]);
        assert_eq!(
            session.failed_epcs(&d),
            vec![Epc(0x81), Epc(0x82), Epc(0x83)]
        );
    }

    #[test]
    fn test_entry_dropped_when_empty() {
        let session = test_session();
        let d = device();

        session.update_failed_epcs(d, &[], &[Epc(0x80)]);
        assert!(session.has_failed_epc_entry(&d));
        session.update_failed_epcs(d, &[Epc(0x80)], &[]);
        assert!(!session.has_failed_epc_entry(&d));
        assert!(session.failed_epcs(&d).is_empty());
    }

    #[test]
    fn test_refailing_epc_is_not_reported_again() {
        let session = test_session();
        let d = device();

        session.update_failed_epcs(d, &[], &[Epc(0x80)]);
        let again = session.update_failed_epcs(d, &[], &[Epc(0x80)]);
        assert!(again.is_empty());
    }
}
