// crates/echonet-rs/src/decoder/lighting.rs
//! General lighting (0x0290) property decoding.

use crate::decoder::{DecodedValue, PropertyDecoder};
use crate::object::classes::CLASS_GENERAL_LIGHTING;
use crate::types::{ClassCode, Epc};

pub struct LightingDecoder;

impl PropertyDecoder for LightingDecoder {
    fn class(&self) -> Option<ClassCode> {
        Some(CLASS_GENERAL_LIGHTING)
    }

    fn decode(&self, epc: Epc, edt: &[u8]) -> Option<DecodedValue> {
        match epc.0 {
            // Illuminance level in percent.
            0xB0 => match edt {
                [level] if *level <= 100 => Some(DecodedValue::Number(i64::from(*level))),
                _ => None,
            },
            // Lighting mode setting.
            0xB6 => match edt {
                [0x41] => Some(DecodedValue::text("auto")),
                [0x42] => Some(DecodedValue::text("main")),
                [0x43] => Some(DecodedValue::text("night")),
                [0x45] => Some(DecodedValue::text("color")),
                _ => None,
            },
            _ => None,
        }
    }

    fn epc_name(&self, epc: Epc) -> Option<&'static str> {
        match epc.0 {
            0xB0 => Some("Illuminance level"),
            0xB6 => Some("Lighting mode setting"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illuminance_level() {
        let decoder = LightingDecoder;
        assert_eq!(
            decoder.decode(Epc(0xB0), &[75]),
            Some(DecodedValue::Number(75))
        );
        // Out-of-range percentage stays raw.
        assert_eq!(decoder.decode(Epc(0xB0), &[101]), None);
    }

    #[test]
    fn test_lighting_mode() {
        let decoder = LightingDecoder;
        assert_eq!(
            decoder.decode(Epc(0xB6), &[0x43]),
            Some(DecodedValue::text("night"))
        );
    }
}
