// crates/echonet-rs/src/decoder/housing.rs
//! Decoders for the housing/facility classes: floor heater, electric water
//! heater, storage battery, solar power and refrigerator.

use crate::decoder::{DecodedValue, PropertyDecoder};
use crate::object::classes::{
    CLASS_ELECTRIC_WATER_HEATER, CLASS_FLOOR_HEATER, CLASS_REFRIGERATOR, CLASS_SOLAR_POWER,
    CLASS_STORAGE_BATTERY,
};
use crate::types::{ClassCode, Epc};

pub struct FloorHeaterDecoder;

impl PropertyDecoder for FloorHeaterDecoder {
    fn class(&self) -> Option<ClassCode> {
        Some(CLASS_FLOOR_HEATER)
    }

    fn decode(&self, epc: Epc, edt: &[u8]) -> Option<DecodedValue> {
        match epc.0 {
            // Temperature setting: levels 0x31..0x3F, or 0x41 automatic.
            0xE0 => match edt {
                [0x41] => Some(DecodedValue::text("auto")),
                [level @ 0x31..=0x3F] => Some(DecodedValue::Number(i64::from(level - 0x30))),
                _ => None,
            },
            // Measured room temperature, signed degrees C.
            0xE2 => match edt {
                [0x7E] => Some(DecodedValue::text("unmeasurable")),
                [value] => Some(DecodedValue::Number(i64::from(*value as i8))),
                _ => None,
            },
            _ => None,
        }
    }

    fn epc_name(&self, epc: Epc) -> Option<&'static str> {
        match epc.0 {
            0xE0 => Some("Temperature setting"),
            0xE2 => Some("Measured room temperature"),
            _ => None,
        }
    }
}

pub struct WaterHeaterDecoder;

impl PropertyDecoder for WaterHeaterDecoder {
    fn class(&self) -> Option<ClassCode> {
        Some(CLASS_ELECTRIC_WATER_HEATER)
    }

    fn decode(&self, epc: Epc, edt: &[u8]) -> Option<DecodedValue> {
        match epc.0 {
            // Automatic water heating: 0x41 auto, 0x42 manual, 0x43 stop.
            0xB0 => match edt {
                [0x41] => Some(DecodedValue::text("auto")),
                [0x42] => Some(DecodedValue::text("manual")),
                [0x43] => Some(DecodedValue::text("stopped")),
                _ => None,
            },
            // Measured tank water temperature in degrees C.
            0xC1 => match edt {
                [value] if *value <= 100 => Some(DecodedValue::Number(i64::from(*value))),
                _ => None,
            },
            // Remaining hot water amount in liters (2 bytes).
            0xE1 => match edt {
                [hi, lo] => Some(DecodedValue::Number(i64::from(u16::from_be_bytes([*hi, *lo])))),
                _ => None,
            },
            _ => None,
        }
    }

    fn epc_name(&self, epc: Epc) -> Option<&'static str> {
        match epc.0 {
            0xB0 => Some("Automatic water heating"),
            0xC1 => Some("Measured tank water temperature"),
            0xE1 => Some("Remaining hot water amount"),
            _ => None,
        }
    }
}

pub struct StorageBatteryDecoder;

impl PropertyDecoder for StorageBatteryDecoder {
    fn class(&self) -> Option<ClassCode> {
        Some(CLASS_STORAGE_BATTERY)
    }

    fn decode(&self, epc: Epc, edt: &[u8]) -> Option<DecodedValue> {
        match epc.0 {
            // Working operation status.
            0xCF => match edt {
                [0x41] => Some(DecodedValue::text("charging")),
                [0x42] => Some(DecodedValue::text("discharging")),
                [0x43] => Some(DecodedValue::text("standby")),
                [0x44] => Some(DecodedValue::text("test")),
                _ => None,
            },
            // Remaining capacity as a percentage.
            0xE4 => match edt {
                [level] if *level <= 100 => Some(DecodedValue::Number(i64::from(*level))),
                _ => None,
            },
            _ => None,
        }
    }

    fn epc_name(&self, epc: Epc) -> Option<&'static str> {
        match epc.0 {
            0xCF => Some("Working operation status"),
            0xE4 => Some("Remaining stored electricity"),
            _ => None,
        }
    }
}

pub struct SolarPowerDecoder;

impl PropertyDecoder for SolarPowerDecoder {
    fn class(&self) -> Option<ClassCode> {
        Some(CLASS_SOLAR_POWER)
    }

    fn decode(&self, epc: Epc, edt: &[u8]) -> Option<DecodedValue> {
        match epc.0 {
            // Instantaneous generation in W (2 bytes).
            0xE0 => match edt {
                [hi, lo] => Some(DecodedValue::Number(i64::from(u16::from_be_bytes([*hi, *lo])))),
                _ => None,
            },
            // Cumulative generation in units of 0.001 kWh (4 bytes).
            0xE1 => match edt {
                [a, b, c, d] => Some(DecodedValue::Number(i64::from(u32::from_be_bytes([
                    *a, *b, *c, *d,
                ])))),
                _ => None,
            },
            _ => None,
        }
    }

    fn epc_name(&self, epc: Epc) -> Option<&'static str> {
        match epc.0 {
            0xE0 => Some("Instantaneous generation"),
            0xE1 => Some("Cumulative generation"),
            _ => None,
        }
    }
}

pub struct RefrigeratorDecoder;

impl PropertyDecoder for RefrigeratorDecoder {
    fn class(&self) -> Option<ClassCode> {
        Some(CLASS_REFRIGERATOR)
    }

    fn decode(&self, epc: Epc, edt: &[u8]) -> Option<DecodedValue> {
        match epc.0 {
            // Door open/close status: 0x41 open, 0x42 closed.
            0xB0 => match edt {
                [0x41] => Some(DecodedValue::text("open")),
                [0x42] => Some(DecodedValue::text("closed")),
                _ => None,
            },
            _ => None,
        }
    }

    fn epc_name(&self, epc: Epc) -> Option<&'static str> {
        match epc.0 {
            0xB0 => Some("Door open/close status"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_heater_levels() {
        let decoder = FloorHeaterDecoder;
        assert_eq!(
            decoder.decode(Epc(0xE0), &[0x35]),
            Some(DecodedValue::Number(5))
        );
        assert_eq!(
            decoder.decode(Epc(0xE0), &[0x41]),
            Some(DecodedValue::text("auto"))
        );
        assert_eq!(
            decoder.decode(Epc(0xE2), &[0xF6]),
            Some(DecodedValue::Number(-10))
        );
    }

    #[test]
    fn test_water_heater() {
        let decoder = WaterHeaterDecoder;
        assert_eq!(
            decoder.decode(Epc(0xB0), &[0x41]),
            Some(DecodedValue::text("auto"))
        );
        assert_eq!(
            decoder.decode(Epc(0xE1), &[0x01, 0x2C]),
            Some(DecodedValue::Number(300))
        );
    }

    #[test]
    fn test_storage_battery() {
        let decoder = StorageBatteryDecoder;
        assert_eq!(
            decoder.decode(Epc(0xCF), &[0x42]),
            Some(DecodedValue::text("discharging"))
        );
        assert_eq!(
            decoder.decode(Epc(0xE4), &[87]),
            Some(DecodedValue::Number(87))
        );
        assert_eq!(decoder.decode(Epc(0xE4), &[101]), None);
    }

    #[test]
    fn test_solar_power() {
        let decoder = SolarPowerDecoder;
        assert_eq!(
            decoder.decode(Epc(0xE0), &[0x0B, 0xB8]),
            Some(DecodedValue::Number(3000))
        );
    }

    #[test]
    fn test_refrigerator_door() {
        let decoder = RefrigeratorDecoder;
        assert_eq!(
            decoder.decode(Epc(0xB0), &[0x41]),
            Some(DecodedValue::text("open"))
        );
    }
}
