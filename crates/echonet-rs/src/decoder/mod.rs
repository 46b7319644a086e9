// crates/echonet-rs/src/decoder/mod.rs
//! Human-readable decoding of property values.
//!
//! The protocol core treats every EDT as opaque bytes; this registry is
//! consulted at the edges (history store, monitors, front-ends) to turn
//! the well-known ones into text or numbers. Decoders are per-class, with
//! a superclass decoder covering the properties every device object
//! shares; unknown EPCs simply stay raw.

pub mod aircon;
pub mod common;
pub mod housing;
pub mod lighting;
pub mod meter;

use crate::types::{ClassCode, Epc};
use std::sync::Arc;

/// A decoded property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedValue {
    Text(String),
    Number(i64),
}

impl DecodedValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

/// Decodes the properties of one object class (or, with `class() == None`,
/// the superclass properties shared by every device object).
pub trait PropertyDecoder: Send + Sync {
    /// The class this decoder covers; None for the device superclass.
    fn class(&self) -> Option<ClassCode>;

    /// Decodes one EDT, None when the EPC (or its payload shape) is not
    /// covered.
    fn decode(&self, epc: Epc, edt: &[u8]) -> Option<DecodedValue>;

    /// Display name of an EPC, None when not covered.
    fn epc_name(&self, epc: Epc) -> Option<&'static str>;
}

/// The set of decoders consulted for a `(class, EPC, EDT)` triple.
/// Class-specific decoders win over the superclass decoder.
pub struct DecoderRegistry {
    decoders: Vec<Box<dyn PropertyDecoder>>,
}

impl DecoderRegistry {
    /// An empty registry: everything stays raw.
    pub fn empty() -> Self {
        Self {
            decoders: Vec::new(),
        }
    }

    /// The default decoder set: device superclass, node profile, and the
    /// common appliance classes.
    pub fn with_defaults() -> Arc<Self> {
        let mut registry = Self::empty();
        registry.register(Box::new(common::SuperclassDecoder));
        registry.register(Box::new(common::NodeProfileDecoder));
        registry.register(Box::new(aircon::AirConditionerDecoder));
        registry.register(Box::new(lighting::LightingDecoder));
        registry.register(Box::new(meter::SmartMeterDecoder));
        registry.register(Box::new(housing::FloorHeaterDecoder));
        registry.register(Box::new(housing::WaterHeaterDecoder));
        registry.register(Box::new(housing::StorageBatteryDecoder));
        registry.register(Box::new(housing::SolarPowerDecoder));
        registry.register(Box::new(housing::RefrigeratorDecoder));
        Arc::new(registry)
    }

    pub fn register(&mut self, decoder: Box<dyn PropertyDecoder>) {
        self.decoders.push(decoder);
    }

    /// Decodes a property, preferring the decoder registered for `class`.
    pub fn decode(&self, class: ClassCode, epc: Epc, edt: &[u8]) -> Option<DecodedValue> {
        if let Some(value) = self
            .class_decoders(Some(class))
            .find_map(|decoder| decoder.decode(epc, edt))
        {
            return Some(value);
        }
        self.class_decoders(None)
            .find_map(|decoder| decoder.decode(epc, edt))
    }

    /// Display name of an EPC on `class`, falling back to the superclass
    /// table.
    pub fn epc_name(&self, class: ClassCode, epc: Epc) -> Option<&'static str> {
        if let Some(name) = self
            .class_decoders(Some(class))
            .find_map(|decoder| decoder.epc_name(epc))
        {
            return Some(name);
        }
        self.class_decoders(None)
            .find_map(|decoder| decoder.epc_name(epc))
    }

    fn class_decoders(
        &self,
        class: Option<ClassCode>,
    ) -> impl Iterator<Item = &Box<dyn PropertyDecoder>> {
        self.decoders
            .iter()
            .filter(move |decoder| decoder.class() == class)
    }
}
