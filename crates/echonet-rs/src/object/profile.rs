// crates/echonet-rs/src/object/profile.rs
//! Node Profile Object property codes and instance-list codecs.
//! (Reference: ECHONET Lite Specification Part 2, Section 6.11)

use crate::error::EchonetError;
use crate::types::{ClassCode, Edt, Eoj, Epc};

// --- Common device property codes ---

/// Operation status (0x30 = on, 0x31 = off).
pub const EPC_OPERATION_STATUS: Epc = Epc(0x80);
/// Standard version information.
pub const EPC_VERSION: Epc = Epc(0x82);
/// Identification number (17 bytes, stable across IP changes).
pub const EPC_ID_NUMBER: Epc = Epc(0x83);
/// Manufacturer code (3 bytes).
pub const EPC_MANUFACTURER: Epc = Epc(0x8A);
/// Status-change announcement property map.
pub const EPC_ANNOUNCEMENT_MAP: Epc = Epc(0x9D);
/// Set property map.
pub const EPC_SET_MAP: Epc = Epc(0x9E);
/// Get property map.
pub const EPC_GET_MAP: Epc = Epc(0x9F);

// --- Node Profile class property codes ---

/// Number of self-node instances (3-byte count, node profile excluded).
pub const EPC_SELF_NODE_INSTANCES: Epc = Epc(0xD3);
/// Number of self-node classes (2-byte count, node profile class included).
pub const EPC_SELF_NODE_CLASSES: Epc = Epc(0xD4);
/// Instance list notification, announced via INF on composition changes.
pub const EPC_INSTANCE_LIST_NOTIFICATION: Epc = Epc(0xD5);
/// Self-node instance list S, polled via Get.
pub const EPC_SELF_NODE_INSTANCE_LIST_S: Epc = Epc(0xD6);
/// Self-node class list S.
pub const EPC_SELF_NODE_CLASS_LIST_S: Epc = Epc(0xD7);

/// Maximum number of EOJs an instance-list EDT can carry.
const MAX_LISTED_INSTANCES: usize = 84;

/// True when the EPC is one of the two self-node instance-list codes.
/// Both carry the same payload and both drive registry reconciliation.
pub fn is_instance_list_epc(epc: Epc) -> bool {
    epc == EPC_INSTANCE_LIST_NOTIFICATION || epc == EPC_SELF_NODE_INSTANCE_LIST_S
}

/// Decodes an instance-list EDT: a count byte followed by 3-byte EOJs.
pub fn decode_instance_list(edt: &[u8]) -> Result<Vec<Eoj>, EchonetError> {
    let count = *edt.first().ok_or(EchonetError::InvalidPropertyMap)? as usize;
    if count > MAX_LISTED_INSTANCES || edt.len() < 1 + count * 3 {
        return Err(EchonetError::InvalidPropertyMap);
    }
    Ok((0..count)
        .map(|i| {
            let base = 1 + i * 3;
            Eoj::from_bytes([edt[base], edt[base + 1], edt[base + 2]])
        })
        .collect())
}

/// Encodes an instance list as a count byte followed by 3-byte EOJs.
pub fn encode_instance_list(eojs: &[Eoj]) -> Edt {
    let mut edt = Vec::with_capacity(1 + eojs.len() * 3);
    edt.push(eojs.len().min(MAX_LISTED_INSTANCES) as u8);
    for eoj in eojs.iter().take(MAX_LISTED_INSTANCES) {
        edt.extend_from_slice(&eoj.to_bytes());
    }
    edt
}

/// Encodes a class list (0xD7): a count byte followed by 2-byte class codes.
pub fn encode_class_list(classes: &[ClassCode]) -> Edt {
    let mut edt = Vec::with_capacity(1 + classes.len() * 2);
    edt.push(classes.len() as u8);
    for class in classes {
        edt.extend_from_slice(&class.0.to_be_bytes());
    }
    edt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_list_roundtrip() {
        let eojs = vec![Eoj::new(0x0130, 1), Eoj::new(0x0EF0, 1)];
        let edt = encode_instance_list(&eojs);
        assert_eq!(edt, vec![2, 0x01, 0x30, 0x01, 0x0E, 0xF0, 0x01]);
        assert_eq!(decode_instance_list(&edt).unwrap(), eojs);
    }

    #[test]
    fn test_instance_list_rejects_truncated() {
        // Count declares two EOJs but only one follows.
        let edt = vec![2, 0x01, 0x30, 0x01];
        assert!(matches!(
            decode_instance_list(&edt),
            Err(EchonetError::InvalidPropertyMap)
        ));
        assert!(decode_instance_list(&[]).is_err());
    }

    #[test]
    fn test_empty_instance_list() {
        assert_eq!(decode_instance_list(&[0]).unwrap(), Vec::<Eoj>::new());
    }

    #[test]
    fn test_class_list_encoding() {
        let edt = encode_class_list(&[ClassCode(0x0EF0), ClassCode(0x0130)]);
        assert_eq!(edt, vec![2, 0x0E, 0xF0, 0x01, 0x30]);
    }
}
