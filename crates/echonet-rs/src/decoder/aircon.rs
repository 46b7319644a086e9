// crates/echonet-rs/src/decoder/aircon.rs
//! Home air conditioner (0x0130) property decoding.

use crate::decoder::{DecodedValue, PropertyDecoder};
use crate::object::classes::CLASS_HOME_AIR_CONDITIONER;
use crate::types::{ClassCode, Epc};

pub struct AirConditionerDecoder;

impl PropertyDecoder for AirConditionerDecoder {
    fn class(&self) -> Option<ClassCode> {
        Some(CLASS_HOME_AIR_CONDITIONER)
    }

    fn decode(&self, epc: Epc, edt: &[u8]) -> Option<DecodedValue> {
        match epc.0 {
            // Operation mode setting.
            0xB0 => match edt {
                [0x40] => Some(DecodedValue::text("other")),
                [0x41] => Some(DecodedValue::text("auto")),
                [0x42] => Some(DecodedValue::text("cooling")),
                [0x43] => Some(DecodedValue::text("heating")),
                [0x44] => Some(DecodedValue::text("dehumidification")),
                [0x45] => Some(DecodedValue::text("air circulation")),
                _ => None,
            },
            // Set temperature in whole degrees C; 0xFD means undetermined.
            0xB3 => match edt {
                [0xFD] => Some(DecodedValue::text("undetermined")),
                [value] if *value <= 50 => Some(DecodedValue::Number(i64::from(*value))),
                _ => None,
            },
            // Measured room / outdoor temperature, signed degrees C;
            // 0x7E flags an unmeasurable state.
            0xBB | 0xBE => match edt {
                [0x7E] => Some(DecodedValue::text("unmeasurable")),
                [value] => Some(DecodedValue::Number(i64::from(*value as i8))),
                _ => None,
            },
            // Air flow rate: 0x41 auto, 0x31..0x38 levels 1..8.
            0xA0 => match edt {
                [0x41] => Some(DecodedValue::text("auto")),
                [level @ 0x31..=0x38] => Some(DecodedValue::Number(i64::from(level - 0x30))),
                _ => None,
            },
            _ => None,
        }
    }

    fn epc_name(&self, epc: Epc) -> Option<&'static str> {
        match epc.0 {
            0xA0 => Some("Air flow rate setting"),
            0xB0 => Some("Operation mode setting"),
            0xB3 => Some("Set temperature value"),
            0xB7 => Some("Set temperature value in heating mode"),
            0xBB => Some("Measured room temperature"),
            0xBE => Some("Measured outdoor temperature"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_mode() {
        let decoder = AirConditionerDecoder;
        assert_eq!(
            decoder.decode(Epc(0xB0), &[0x43]),
            Some(DecodedValue::text("heating"))
        );
        assert_eq!(decoder.decode(Epc(0xB0), &[0x50]), None);
    }

    #[test]
    fn test_temperatures() {
        let decoder = AirConditionerDecoder;
        assert_eq!(
            decoder.decode(Epc(0xB3), &[26]),
            Some(DecodedValue::Number(26))
        );
        assert_eq!(
            decoder.decode(Epc(0xB3), &[0xFD]),
            Some(DecodedValue::text("undetermined"))
        );
        // Negative outdoor temperature: -5 as two's complement.
        assert_eq!(
            decoder.decode(Epc(0xBE), &[0xFB]),
            Some(DecodedValue::Number(-5))
        );
        assert_eq!(
            decoder.decode(Epc(0xBB), &[0x7E]),
            Some(DecodedValue::text("unmeasurable"))
        );
    }

    #[test]
    fn test_air_flow() {
        let decoder = AirConditionerDecoder;
        assert_eq!(
            decoder.decode(Epc(0xA0), &[0x41]),
            Some(DecodedValue::text("auto"))
        );
        assert_eq!(
            decoder.decode(Epc(0xA0), &[0x33]),
            Some(DecodedValue::Number(3))
        );
    }
}
