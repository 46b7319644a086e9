// crates/echonet-rs/src/registry/filter.rs
//! Criteria-based device selection.

use crate::frame::Property;
use crate::registry::DeviceRegistry;
use crate::types::{ClassCode, IpAndEoj};
use std::net::IpAddr;

/// Selection criteria for registry queries. All present fields must match;
/// the property predicates use OR semantics (any single match counts).
#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    pub ip: Option<IpAddr>,
    pub class_code: Option<ClassCode>,
    pub instance: Option<u8>,
    /// `{EPC, EDT}` equality predicates; a device matches when ANY one of
    /// its cached properties equals one of these.
    pub property_values: Vec<Property>,
    pub exclude_offline: bool,
}

impl FilterCriteria {
    /// Criteria that select every known device.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_ip(ip: IpAddr) -> Self {
        Self {
            ip: Some(ip),
            ..Self::default()
        }
    }

    pub fn for_class(class_code: ClassCode) -> Self {
        Self {
            class_code: Some(class_code),
            ..Self::default()
        }
    }
}

/// One matched device together with all of its cached properties.
#[derive(Debug, Clone)]
pub struct FilteredDevice {
    pub device: IpAndEoj,
    pub properties: Vec<Property>,
}

impl DeviceRegistry {
    /// Returns the subview of devices selected by `criteria`; every matched
    /// device carries its full cached property set.
    pub fn filter(&self, criteria: &FilterCriteria) -> Vec<FilteredDevice> {
        self.devices()
            .into_iter()
            .filter(|device| self.matches(device, criteria))
            .map(|device| FilteredDevice {
                properties: self.properties_of(&device),
                device,
            })
            .collect()
    }

    fn matches(&self, device: &IpAndEoj, criteria: &FilterCriteria) -> bool {
        if criteria.ip.is_some_and(|ip| ip != device.ip) {
            return false;
        }
        if criteria
            .class_code
            .is_some_and(|class| class != device.eoj.class_code)
        {
            return false;
        }
        if criteria
            .instance
            .is_some_and(|instance| instance != device.eoj.instance)
        {
            return false;
        }
        if criteria.exclude_offline && self.is_offline(device) {
            return false;
        }
        if !criteria.property_values.is_empty() {
            let properties = self.properties_of(device);
            let any_match = criteria
                .property_values
                .iter()
                .any(|wanted| properties.iter().any(|p| p == wanted));
            if !any_match {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Eoj, Epc};
    use std::time::SystemTime;

    fn populated() -> std::sync::Arc<DeviceRegistry> {
        let (registry, _rx) = DeviceRegistry::new(None);
        let aircon = IpAndEoj::new("192.168.1.10".parse().unwrap(), Eoj::new(0x0130, 1));
        let light = IpAndEoj::new("192.168.1.11".parse().unwrap(), Eoj::new(0x0290, 1));
        registry.register_properties(
            aircon,
            vec![Property::new(Epc(0x80), vec![0x30])],
            SystemTime::now(),
        );
        registry.register_properties(
            light,
            vec![Property::new(Epc(0x80), vec![0x31])],
            SystemTime::now(),
        );
        registry
    }

    #[test]
    fn test_filter_by_class() {
        let registry = populated();
        let matched = registry.filter(&FilterCriteria::for_class(ClassCode(0x0130)));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].device.eoj, Eoj::new(0x0130, 1));
        assert!(!matched[0].properties.is_empty());
    }

    #[test]
    fn test_filter_by_ip_includes_node_profile() {
        let registry = populated();
        let matched = registry.filter(&FilterCriteria::for_ip("192.168.1.10".parse().unwrap()));
        // The air conditioner plus the implicit Node Profile Object.
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn test_property_predicates_use_or_semantics() {
        let registry = populated();
        let criteria = FilterCriteria {
            property_values: vec![
                Property::new(Epc(0x80), vec![0x30]),
                Property::new(Epc(0x80), vec![0x99]),
            ],
            ..Default::default()
        };
        // 0x99 matches nothing, but 0x30 matches the air conditioner.
        let matched = registry.filter(&criteria);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].device.eoj, Eoj::new(0x0130, 1));
    }

    #[test]
    fn test_exclude_offline() {
        let registry = populated();
        let aircon = IpAndEoj::new("192.168.1.10".parse().unwrap(), Eoj::new(0x0130, 1));
        registry.set_offline(aircon, true);
        let criteria = FilterCriteria {
            class_code: Some(ClassCode(0x0130)),
            exclude_offline: true,
            ..Default::default()
        };
        assert!(registry.filter(&criteria).is_empty());
    }
}
