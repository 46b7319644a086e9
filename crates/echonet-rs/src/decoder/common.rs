// crates/echonet-rs/src/decoder/common.rs
//! Decoders for the device object superclass and the Node Profile class.

use crate::decoder::{DecodedValue, PropertyDecoder};
use crate::object::profile::{
    EPC_ANNOUNCEMENT_MAP, EPC_GET_MAP, EPC_SET_MAP, decode_instance_list,
};
use crate::frame::PropertyMap;
use crate::types::{ClassCode, Epc};

/// Installation-location place codes (EPC 0x81, bits 7..3).
const LOCATION_NAMES: [&str; 15] = [
    "living room",
    "dining room",
    "kitchen",
    "bathroom",
    "lavatory",
    "washroom",
    "passageway",
    "room",
    "stairway",
    "front door",
    "storeroom",
    "garden",
    "garage",
    "balcony",
    "others",
];

/// Properties shared by every device object (the superclass).
pub struct SuperclassDecoder;

impl PropertyDecoder for SuperclassDecoder {
    fn class(&self) -> Option<ClassCode> {
        None
    }

    fn decode(&self, epc: Epc, edt: &[u8]) -> Option<DecodedValue> {
        match epc.0 {
            // Operation status: 0x30 on, 0x31 off.
            0x80 => match edt {
                [0x30] => Some(DecodedValue::text("on")),
                [0x31] => Some(DecodedValue::text("off")),
                _ => None,
            },
            0x81 => decode_installation_location(edt),
            // Fault status: 0x41 fault, 0x42 no fault.
            0x88 => match edt {
                [0x41] => Some(DecodedValue::text("fault")),
                [0x42] => Some(DecodedValue::text("no fault")),
                _ => None,
            },
            // Manufacturer code: three raw bytes, shown as hex.
            0x8A => match edt {
                [a, b, c] => Some(DecodedValue::Text(format!("{:02X}{:02X}{:02X}", a, b, c))),
                _ => None,
            },
            // Instantaneous power consumption in W.
            0x84 => match edt {
                [hi, lo] => Some(DecodedValue::Number(i64::from(u16::from_be_bytes([*hi, *lo])))),
                _ => None,
            },
            // Cumulative power consumption in units of 0.001 kWh.
            0x85 => match edt {
                [a, b, c, d] => Some(DecodedValue::Number(i64::from(u32::from_be_bytes([
                    *a, *b, *c, *d,
                ])))),
                _ => None,
            },
            0x9D | 0x9E | 0x9F => decode_property_map(edt),
            _ => None,
        }
    }

    fn epc_name(&self, epc: Epc) -> Option<&'static str> {
        match epc.0 {
            0x80 => Some("Operation status"),
            0x81 => Some("Installation location"),
            0x82 => Some("Standard version information"),
            0x83 => Some("Identification number"),
            0x84 => Some("Instantaneous power consumption"),
            0x85 => Some("Cumulative power consumption"),
            0x88 => Some("Fault status"),
            0x8A => Some("Manufacturer code"),
            0x97 => Some("Current time setting"),
            0x98 => Some("Current date setting"),
            _ if epc == EPC_ANNOUNCEMENT_MAP => Some("Status change announcement property map"),
            _ if epc == EPC_SET_MAP => Some("Set property map"),
            _ if epc == EPC_GET_MAP => Some("Get property map"),
            _ => None,
        }
    }
}

/// Node Profile properties: composition counts and instance lists.
pub struct NodeProfileDecoder;

impl PropertyDecoder for NodeProfileDecoder {
    fn class(&self) -> Option<ClassCode> {
        Some(crate::types::NODE_PROFILE_CLASS)
    }

    fn decode(&self, epc: Epc, edt: &[u8]) -> Option<DecodedValue> {
        match epc.0 {
            // Self-node instance count, 3 bytes big-endian.
            0xD3 => match edt {
                [a, b, c] => Some(DecodedValue::Number(i64::from(u32::from_be_bytes([
                    0, *a, *b, *c,
                ])))),
                _ => None,
            },
            // Self-node class count, 2 bytes big-endian.
            0xD4 => match edt {
                [hi, lo] => Some(DecodedValue::Number(i64::from(u16::from_be_bytes([*hi, *lo])))),
                _ => None,
            },
            // Instance lists become a comma-separated EOJ list.
            0xD5 | 0xD6 => {
                let instances = decode_instance_list(edt).ok()?;
                let rendered: Vec<String> =
                    instances.iter().map(|eoj| eoj.to_string()).collect();
                Some(DecodedValue::Text(rendered.join(",")))
            }
            _ => None,
        }
    }

    fn epc_name(&self, epc: Epc) -> Option<&'static str> {
        match epc.0 {
            0xD3 => Some("Self-node instances"),
            0xD4 => Some("Self-node classes"),
            0xD5 => Some("Instance list notification"),
            0xD6 => Some("Self-node instance list S"),
            0xD7 => Some("Self-node class list S"),
            _ => None,
        }
    }
}

fn decode_installation_location(edt: &[u8]) -> Option<DecodedValue> {
    let &[byte] = edt else { return None };
    if byte == 0x00 {
        return Some(DecodedValue::text("not set"));
    }
    let place = (byte >> 3) as usize;
    let number = byte & 0x07;
    let name = *LOCATION_NAMES.get(place.checked_sub(1)?)?;
    if number == 0 {
        Some(DecodedValue::text(name))
    } else {
        Some(DecodedValue::Text(format!("{} {}", name, number)))
    }
}

fn decode_property_map(edt: &[u8]) -> Option<DecodedValue> {
    let map = PropertyMap::from_edt(edt).ok()?;
    let rendered: Vec<String> = map.epcs().iter().map(|epc| epc.to_string()).collect();
    Some(DecodedValue::Text(rendered.join(",")))
}
