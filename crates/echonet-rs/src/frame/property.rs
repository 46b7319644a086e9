// crates/echonet-rs/src/frame/property.rs
//! A single EPC/EDT pair and the codec-boundary interpretation of the
//! overloaded empty EDT.

use crate::error::EchonetError;
use crate::frame::Esv;
use crate::types::{Edt, Epc};

/// One property as carried on the wire: an EPC plus its opaque EDT bytes.
///
/// The meaning of an empty EDT depends on the ESV of the surrounding frame:
/// in a Get-family response it marks a failed/unsupported EPC, in a
/// Set-family response it marks a successful write. Use
/// [`PropertyResult::from_response`] to resolve the overload once instead of
/// re-checking the ESV at every call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub epc: Epc,
    pub edt: Edt,
}

impl Property {
    pub fn new(epc: Epc, edt: Edt) -> Self {
        Self { epc, edt }
    }

    /// A property with no EDT, as used in Get/INF_REQ requests.
    pub fn empty(epc: Epc) -> Self {
        Self {
            epc,
            edt: Vec::new(),
        }
    }

    /// Serialized size on the wire: EPC(1) + PDC(1) + EDT.
    pub fn wire_len(&self) -> usize {
        2 + self.edt.len()
    }

    /// Writes EPC, PDC and EDT into the buffer, returning the bytes written.
    pub fn serialize(&self, buffer: &mut [u8]) -> Result<usize, EchonetError> {
        if self.edt.len() > u8::MAX as usize {
            return Err(EchonetError::FrameTooLarge);
        }
        if buffer.len() < self.wire_len() {
            return Err(EchonetError::BufferTooShort);
        }
        buffer[0] = self.epc.0;
        buffer[1] = self.edt.len() as u8;
        buffer[2..2 + self.edt.len()].copy_from_slice(&self.edt);
        Ok(self.wire_len())
    }

    /// Reads one EPC/PDC/EDT triple from the buffer, returning the property
    /// and the bytes consumed.
    pub fn deserialize(buffer: &[u8]) -> Result<(Self, usize), EchonetError> {
        if buffer.len() < 2 {
            return Err(EchonetError::TruncatedFrame);
        }
        let epc = Epc(buffer[0]);
        let pdc = buffer[1] as usize;
        if buffer.len() < 2 + pdc {
            return Err(EchonetError::TruncatedFrame);
        }
        Ok((
            Self {
                epc,
                edt: buffer[2..2 + pdc].to_vec(),
            },
            2 + pdc,
        ))
    }
}

/// Per-EPC outcome after resolving the empty-EDT overload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyOutcome {
    /// A Get-family response carried this value.
    Value(Edt),
    /// A Set-family response acknowledged the write (empty EDT).
    Accepted,
    /// The EPC failed: empty EDT in a Get-family response, or an echoed
    /// original EDT in a Set-family error response.
    Failed(Edt),
}

/// The interpreted form of one response property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyResult {
    pub epc: Epc,
    pub outcome: PropertyOutcome,
}

impl PropertyResult {
    /// Interprets a response property according to the frame's ESV.
    ///
    /// Callers must not pass request verbs; a request's empty EDT carries no
    /// outcome at all.
    pub fn from_response(esv: Esv, property: &Property) -> Self {
        let outcome = if esv.is_set_response() {
            if property.edt.is_empty() {
                PropertyOutcome::Accepted
            } else {
                PropertyOutcome::Failed(property.edt.clone())
            }
        } else if property.edt.is_empty() {
            PropertyOutcome::Failed(Vec::new())
        } else {
            PropertyOutcome::Value(property.edt.clone())
        };
        Self {
            epc: property.epc,
            outcome,
        }
    }

    /// Interprets every property of a response list.
    pub fn from_response_list(esv: Esv, properties: &[Property]) -> Vec<Self> {
        properties
            .iter()
            .map(|p| Self::from_response(esv, p))
            .collect()
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, PropertyOutcome::Failed(_))
    }
}
