// crates/echonet-rs/src/decoder/meter.rs
//! Low-voltage smart electric energy meter (0x0288) property decoding.

use crate::decoder::{DecodedValue, PropertyDecoder};
use crate::object::classes::CLASS_LOW_VOLTAGE_SMART_METER;
use crate::types::{ClassCode, Epc};

pub struct SmartMeterDecoder;

impl PropertyDecoder for SmartMeterDecoder {
    fn class(&self) -> Option<ClassCode> {
        Some(CLASS_LOW_VOLTAGE_SMART_METER)
    }

    fn decode(&self, epc: Epc, edt: &[u8]) -> Option<DecodedValue> {
        match epc.0 {
            // Cumulative energy (normal direction), raw meter units.
            0xE0 => match edt {
                [a, b, c, d] => Some(DecodedValue::Number(i64::from(u32::from_be_bytes([
                    *a, *b, *c, *d,
                ])))),
                _ => None,
            },
            // Instantaneous power in W, signed (reverse flow is negative).
            0xE7 => match edt {
                [a, b, c, d] => Some(DecodedValue::Number(i64::from(i32::from_be_bytes([
                    *a, *b, *c, *d,
                ])))),
                _ => None,
            },
            // Instantaneous currents: R and T phase in 0.1 A units.
            0xE8 => match edt {
                [r_hi, r_lo, t_hi, t_lo] => {
                    let r = i16::from_be_bytes([*r_hi, *r_lo]);
                    let t = i16::from_be_bytes([*t_hi, *t_lo]);
                    Some(DecodedValue::Text(format!(
                        "R {:.1}A / T {:.1}A",
                        f64::from(r) / 10.0,
                        f64::from(t) / 10.0
                    )))
                }
                _ => None,
            },
            _ => None,
        }
    }

    fn epc_name(&self, epc: Epc) -> Option<&'static str> {
        match epc.0 {
            0xE0 => Some("Cumulative energy (normal direction)"),
            0xE7 => Some("Instantaneous power"),
            0xE8 => Some("Instantaneous currents"),
            _ => None,
        }
    }
}
