// crates/echonet-rs/src/frame/codec.rs

use crate::error::EchonetError;
use crate::frame::{EchonetFrame, Esv, Property};
use crate::types::{C_EHD1, C_EHD2, Eoj};

/// A trait for objects that can be serialized into and deserialized from a
/// byte buffer.
pub trait Codec: Sized {
    /// Serializes the object into the provided buffer.
    ///
    /// Returns the number of bytes written.
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, EchonetError>;

    /// Deserializes an object from the provided buffer.
    fn deserialize(buffer: &[u8]) -> Result<Self, EchonetError>;
}

/// Fixed part of the frame: EHD1 EHD2 TID SEOJ DEOJ ESV OPC.
const FRAME_HEADER_SIZE: usize = 12;

impl Codec for EchonetFrame {
    fn serialize(&self, buffer: &mut [u8]) -> Result<usize, EchonetError> {
        if buffer.len() < FRAME_HEADER_SIZE {
            return Err(EchonetError::BufferTooShort);
        }
        if self.properties.len() > u8::MAX as usize
            || self.second_properties.len() > u8::MAX as usize
        {
            return Err(EchonetError::FrameTooLarge);
        }

        buffer[0] = C_EHD1;
        buffer[1] = C_EHD2;
        buffer[2..4].copy_from_slice(&self.tid.to_be_bytes());
        buffer[4..7].copy_from_slice(&self.seoj.to_bytes());
        buffer[7..10].copy_from_slice(&self.deoj.to_bytes());
        buffer[10] = self.esv as u8;
        buffer[11] = self.properties.len() as u8;

        let mut offset = FRAME_HEADER_SIZE;
        for property in &self.properties {
            offset += property.serialize(&mut buffer[offset..])?;
        }

        if self.esv.has_second_property_list() {
            if buffer.len() < offset + 1 {
                return Err(EchonetError::BufferTooShort);
            }
            buffer[offset] = self.second_properties.len() as u8;
            offset += 1;
            for property in &self.second_properties {
                offset += property.serialize(&mut buffer[offset..])?;
            }
        }

        Ok(offset)
    }

    fn deserialize(buffer: &[u8]) -> Result<Self, EchonetError> {
        if buffer.len() < FRAME_HEADER_SIZE {
            return Err(EchonetError::TruncatedFrame);
        }
        if buffer[0] != C_EHD1 || buffer[1] != C_EHD2 {
            return Err(EchonetError::InvalidFrameHeader);
        }

        let tid = u16::from_be_bytes([buffer[2], buffer[3]]);
        let seoj = Eoj::from_bytes([buffer[4], buffer[5], buffer[6]]);
        let deoj = Eoj::from_bytes([buffer[7], buffer[8], buffer[9]]);
        let esv = Esv::try_from(buffer[10])?;

        let opc = buffer[11] as usize;
        let mut offset = FRAME_HEADER_SIZE;
        let mut properties = Vec::with_capacity(opc);
        for _ in 0..opc {
            let (property, consumed) = Property::deserialize(&buffer[offset..])?;
            properties.push(property);
            offset += consumed;
        }

        let mut second_properties = Vec::new();
        if esv.has_second_property_list() {
            let opc2 = *buffer.get(offset).ok_or(EchonetError::TruncatedFrame)? as usize;
            offset += 1;
            second_properties.reserve(opc2);
            for _ in 0..opc2 {
                let (property, consumed) = Property::deserialize(&buffer[offset..])?;
                second_properties.push(property);
                offset += consumed;
            }
        }

        Ok(Self {
            tid,
            seoj,
            deoj,
            esv,
            properties,
            second_properties,
        })
    }
}

/// Parses a raw datagram payload into an [`EchonetFrame`].
///
/// This is the primary entry point for the receive path; decode failures are
/// reported (not panicked) so the receive loop can log and drop the datagram.
pub fn deserialize_frame(buffer: &[u8]) -> Result<EchonetFrame, EchonetError> {
    EchonetFrame::deserialize(buffer)
}
