// crates/echonet-rs/src/identity.rs
//! The stable device identity carried at EPC 0x83 on the Node Profile
//! Object, and its text form used by aliases and groups.

use crate::error::EchonetError;
use crate::types::Eoj;
use core::fmt;
use core::str::FromStr;
use rand::RngCore;

/// Leading byte of every identification number EDT.
const ID_PREFIX: u8 = 0xFE;

/// The 17-byte identification number:
/// `0xFE || manufacturer code (3) || unique identifier (13)`.
///
/// This value survives IP changes and is the basis for aliasing and the
/// IP-migration procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentificationNumber {
    pub manufacturer: [u8; 3],
    pub unique_id: [u8; 13],
}

impl IdentificationNumber {
    pub fn new(manufacturer: [u8; 3], unique_id: [u8; 13]) -> Self {
        Self {
            manufacturer,
            unique_id,
        }
    }

    /// Generates an identity with a random unique part, for the local node.
    pub fn generate(manufacturer: [u8; 3]) -> Self {
        let mut unique_id = [0u8; 13];
        rand::rng().fill_bytes(&mut unique_id);
        Self {
            manufacturer,
            unique_id,
        }
    }

    /// Parses the 17-byte EDT. Anything without the 0xFE prefix or with a
    /// different length is rejected.
    pub fn from_edt(edt: &[u8]) -> Result<Self, EchonetError> {
        if edt.len() != 17 || edt[0] != ID_PREFIX {
            return Err(EchonetError::Persistence(format!(
                "invalid identification number EDT ({} bytes)",
                edt.len()
            )));
        }
        let mut manufacturer = [0u8; 3];
        manufacturer.copy_from_slice(&edt[1..4]);
        let mut unique_id = [0u8; 13];
        unique_id.copy_from_slice(&edt[4..17]);
        Ok(Self {
            manufacturer,
            unique_id,
        })
    }

    pub fn to_edt(&self) -> Vec<u8> {
        let mut edt = Vec::with_capacity(17);
        edt.push(ID_PREFIX);
        edt.extend_from_slice(&self.manufacturer);
        edt.extend_from_slice(&self.unique_id);
        edt
    }
}

impl fmt::Display for IdentificationNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.manufacturer {
            write!(f, "{:02X}", b)?;
        }
        write!(f, ":")?;
        for b in self.unique_id {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

/// A device identifier as used in alias and group files:
/// `"<eoj-short>:<manufacturer-hex-6>:<unique-hex-26>"`, e.g.
/// `"0130:1:000077:AABB..."`.
///
/// The EOJ short form keeps its own colon for non-wildcard instances, so the
/// string is parsed from the right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentifier {
    pub eoj: Eoj,
    pub id: IdentificationNumber,
}

impl DeviceIdentifier {
    pub fn new(eoj: Eoj, id: IdentificationNumber) -> Self {
        Self { eoj, id }
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.eoj, self.id)
    }
}

impl FromStr for DeviceIdentifier {
    type Err = EchonetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, unique_hex) = s
            .rsplit_once(':')
            .ok_or_else(|| EchonetError::InvalidName(format!("malformed id string: {}", s)))?;
        let (eoj_part, manufacturer_hex) = rest
            .rsplit_once(':')
            .ok_or_else(|| EchonetError::InvalidName(format!("malformed id string: {}", s)))?;
        // The EOJ short form may itself contain one colon ("CCCC:I").
        let eoj = eoj_part
            .parse::<Eoj>()
            .map_err(|e| EchonetError::InvalidName(format!("bad EOJ in id string: {}", e)))?;
        let manufacturer: [u8; 3] = decode_hex(manufacturer_hex)?
            .try_into()
            .map_err(|_| EchonetError::InvalidName("manufacturer code must be 3 bytes".into()))?;
        let unique_id: [u8; 13] = decode_hex(unique_hex)?
            .try_into()
            .map_err(|_| EchonetError::InvalidName("unique id must be 13 bytes".into()))?;
        Ok(Self {
            eoj,
            id: IdentificationNumber::new(manufacturer, unique_id),
        })
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, EchonetError> {
    if s.len() % 2 != 0 {
        return Err(EchonetError::InvalidName(format!("odd-length hex: {}", s)));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| EchonetError::InvalidName(format!("bad hex: {}", s)))
        })
        .collect()
}
