// crates/echonet-rs/src/error.rs

use crate::types::{Eoj, Epc, IpAndEoj};
use core::fmt;
use std::time::Duration;

/// Defines a descriptive Error type for the whole ECHONET Lite stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchonetError {
    /// The provided buffer is too small for the operation.
    BufferTooShort,
    /// A received datagram is fundamentally invalid (wrong EHD bytes).
    InvalidFrameHeader,
    /// A received frame is truncated (too short for the declared properties).
    TruncatedFrame,
    /// A value in the frame is not a valid ESV.
    InvalidEsv(u8),
    /// A property map EDT could not be decoded.
    InvalidPropertyMap,
    /// The frame size exceeds the maximum supported datagram size.
    FrameTooLarge,
    /// An underlying I/O error occurred (message carries the OS detail).
    Io(String),
    /// The transport socket has been closed; receive loops must exit.
    TransportClosed,
    /// All retries for a request were exhausted without a response.
    MaxRetriesReached {
        device: IpAndEoj,
        max_retries: u32,
        total_duration: Duration,
        retry_interval: Duration,
    },
    /// The operation was cancelled before completion.
    Cancelled,
    /// An internal channel was closed while a result was still expected.
    ChannelClosed,
    /// The EPC is not listed in the target object's Get property map.
    NotReadable { device: IpAndEoj, epc: Epc },
    /// The EPC is not listed in the target object's Set property map.
    NotWritable { device: IpAndEoj, epc: Epc },
    /// A Get/Set target used the wildcard instance code 0.
    WildcardInstance(Eoj),
    /// The requested device is not present in the registry.
    DeviceNotFound(IpAndEoj),
    /// The device's Get property map could not be obtained.
    PropertyMapUnavailable(IpAndEoj),
    /// The remote device answered a Set with per-EPC failures.
    SetRejected { device: IpAndEoj, failed: Vec<Epc> },
    /// The remote device answered a Get with per-EPC failures.
    GetRejected { device: IpAndEoj, failed: Vec<Epc> },
    /// A persisted file could not be read or decoded.
    Persistence(String),
    /// A user-supplied name (alias, group, location) failed validation.
    InvalidName(String),
    /// Internal logic error.
    Internal(&'static str),
}

impl fmt::Display for EchonetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooShort => write!(f, "Buffer is too short"),
            Self::InvalidFrameHeader => write!(f, "Invalid ECHONET Lite header (EHD1/EHD2)"),
            Self::TruncatedFrame => write!(f, "Frame truncated before declared property list"),
            Self::InvalidEsv(v) => write!(f, "Invalid ESV: {:#04x}", v),
            Self::InvalidPropertyMap => write!(f, "Malformed property map EDT"),
            Self::FrameTooLarge => write!(f, "Frame size exceeds maximum datagram size"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
            Self::TransportClosed => write!(f, "Transport closed"),
            Self::MaxRetriesReached {
                device,
                max_retries,
                total_duration,
                retry_interval,
            } => write!(
                f,
                "Max retries ({}) reached for {} after {:?} (base interval {:?})",
                max_retries, device, total_duration, retry_interval
            ),
            Self::Cancelled => write!(f, "Operation cancelled"),
            Self::ChannelClosed => write!(f, "Internal channel closed"),
            Self::NotReadable { device, epc } => {
                write!(f, "EPC {} is not readable on {}", epc, device)
            }
            Self::NotWritable { device, epc } => {
                write!(f, "EPC {} is not writable on {}", epc, device)
            }
            Self::WildcardInstance(eoj) => {
                write!(f, "Instance code 0 is not a valid request target: {}", eoj)
            }
            Self::DeviceNotFound(device) => write!(f, "Unknown device: {}", device),
            Self::PropertyMapUnavailable(device) => {
                write!(f, "Get property map not available for {}", device)
            }
            Self::SetRejected { device, failed } => {
                write!(f, "Set rejected by {} for EPCs {:?}", device, failed)
            }
            Self::GetRejected { device, failed } => {
                write!(f, "Get rejected by {} for EPCs {:?}", device, failed)
            }
            Self::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            Self::InvalidName(msg) => write!(f, "Invalid name: {}", msg),
            Self::Internal(s) => write!(f, "Internal error: {}", s),
        }
    }
}

impl std::error::Error for EchonetError {}

// --- From Implementations for Error Conversion ---

impl From<std::io::Error> for EchonetError {
    fn from(err: std::io::Error) -> Self {
        // A closed socket must terminate receive loops cleanly rather than
        // surface as a generic I/O failure.
        if err.kind() == std::io::ErrorKind::NotConnected {
            EchonetError::TransportClosed
        } else {
            EchonetError::Io(err.to_string())
        }
    }
}

impl From<serde_json::Error> for EchonetError {
    fn from(err: serde_json::Error) -> Self {
        EchonetError::Persistence(err.to_string())
    }
}

impl From<base64::DecodeError> for EchonetError {
    fn from(err: base64::DecodeError) -> Self {
        EchonetError::Persistence(err.to_string())
    }
}

impl From<&'static str> for EchonetError {
    fn from(s: &'static str) -> Self {
        EchonetError::Internal(s)
    }
}
