// crates/echonet-rs/src/object/classes.rs
//! Well-known ECHONET object class codes and their display names.
//! (Reference: APPENDIX Detailed Requirements for ECHONET Device Objects)

use crate::types::ClassCode;

// --- Class group 0x01: air-conditioning ---
pub const CLASS_HOME_AIR_CONDITIONER: ClassCode = ClassCode(0x0130);
pub const CLASS_AIR_CLEANER: ClassCode = ClassCode(0x0135);

// --- Class group 0x02: housing and facility ---
pub const CLASS_ELECTRIC_WATER_HEATER: ClassCode = ClassCode(0x026B);
pub const CLASS_ELECTRIC_SHUTTER: ClassCode = ClassCode(0x0263);
pub const CLASS_FLOOR_HEATER: ClassCode = ClassCode(0x027B);
pub const CLASS_LOW_VOLTAGE_SMART_METER: ClassCode = ClassCode(0x0288);
pub const CLASS_SOLAR_POWER: ClassCode = ClassCode(0x0279);
pub const CLASS_STORAGE_BATTERY: ClassCode = ClassCode(0x027D);
pub const CLASS_GENERAL_LIGHTING: ClassCode = ClassCode(0x0290);
pub const CLASS_SINGLE_FUNCTION_LIGHTING: ClassCode = ClassCode(0x0291);

// --- Class group 0x03: cooking and household ---
pub const CLASS_REFRIGERATOR: ClassCode = ClassCode(0x03B7);
pub const CLASS_RICE_COOKER: ClassCode = ClassCode(0x03BB);

// --- Class group 0x05: management and operation ---
pub const CLASS_CONTROLLER: ClassCode = ClassCode(0x05FF);

// --- Class group 0x0E: profile ---
pub const CLASS_NODE_PROFILE: ClassCode = ClassCode(0x0EF0);

/// Display name for a well-known class code, None for codes this stack has
/// no table entry for.
pub fn class_name(class: ClassCode) -> Option<&'static str> {
    match class {
        CLASS_HOME_AIR_CONDITIONER => Some("Home Air Conditioner"),
        CLASS_AIR_CLEANER => Some("Air Cleaner"),
        CLASS_ELECTRIC_WATER_HEATER => Some("Electric Water Heater"),
        CLASS_ELECTRIC_SHUTTER => Some("Electric Shutter"),
        CLASS_FLOOR_HEATER => Some("Floor Heater"),
        CLASS_LOW_VOLTAGE_SMART_METER => Some("Low Voltage Smart Meter"),
        CLASS_SOLAR_POWER => Some("Solar Power Generation"),
        CLASS_STORAGE_BATTERY => Some("Storage Battery"),
        CLASS_GENERAL_LIGHTING => Some("General Lighting"),
        CLASS_SINGLE_FUNCTION_LIGHTING => Some("Single Function Lighting"),
        CLASS_REFRIGERATOR => Some("Refrigerator"),
        CLASS_RICE_COOKER => Some("Rice Cooker"),
        CLASS_CONTROLLER => Some("Controller"),
        CLASS_NODE_PROFILE => Some("Node Profile"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_class_names() {
        assert_eq!(class_name(ClassCode(0x0130)), Some("Home Air Conditioner"));
        assert_eq!(class_name(ClassCode(0x0EF0)), Some("Node Profile"));
        assert_eq!(class_name(ClassCode(0x1234)), None);
    }
}
