// crates/echonet-rs/src/lib.rs

// --- Foundation Modules ---
pub mod error;
pub mod log;
pub mod types;

// --- Protocol Layers ---
pub mod decoder;
pub mod frame;
pub mod identity;
pub mod object;
pub mod transport;

// --- Session and State ---
pub mod history;
pub mod registry;
pub mod session;

// --- Higher Layers ---
pub mod controller;
pub mod handler;
pub mod storage;
pub mod update;

// --- Top-level Exports ---
pub use controller::{Controller, ControllerConfig};
pub use decoder::{DecodedValue, DecoderRegistry, PropertyDecoder};
pub use error::EchonetError;
pub use frame::{Codec, EchonetFrame, Esv, Property, PropertyMap, PropertyResult, deserialize_frame};
pub use handler::{CommunicationHandler, DeviceNotification, NotificationType, PropertyChange};
pub use identity::{DeviceIdentifier, IdentificationNumber};
pub use registry::{DeviceEvent, DeviceEventType, DeviceRegistry, FilterCriteria, FilteredDevice};
pub use session::{Session, SessionConfig, SessionTimeoutEvent};
pub use types::{ClassCode, Eoj, Epc, IpAndEoj, NODE_PROFILE_OBJECT};
pub use update::{UpdateConfig, UpdateOrchestrator};
