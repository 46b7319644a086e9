// crates/echonet-rs/src/frame/esv.rs
//! The ECHONET Lite service verbs (ESV) and their request/response pairing.
//! (Reference: ECHONET Lite Specification Part 2, Table 3-9)

use crate::error::EchonetError;
use core::fmt;

/// ECHONET Lite service verb.
///
/// The high nibble encodes the direction: 0x6_ requests, 0x7_ responses and
/// notifications, 0x5_ error responses ("service not available", SNA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Esv {
    // Requests
    SetI = 0x60,
    SetC = 0x61,
    Get = 0x62,
    InfReq = 0x63,
    SetGet = 0x6E,
    // Responses and notifications
    SetRes = 0x71,
    GetRes = 0x72,
    Inf = 0x73,
    InfC = 0x74,
    InfCRes = 0x7A,
    SetGetRes = 0x7E,
    // Error responses
    SetISna = 0x50,
    SetCSna = 0x51,
    GetSna = 0x52,
    InfReqSna = 0x53,
    SetGetSna = 0x5E,
}

impl TryFrom<u8> for Esv {
    type Error = EchonetError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x60 => Ok(Self::SetI),
            0x61 => Ok(Self::SetC),
            0x62 => Ok(Self::Get),
            0x63 => Ok(Self::InfReq),
            0x6E => Ok(Self::SetGet),
            0x71 => Ok(Self::SetRes),
            0x72 => Ok(Self::GetRes),
            0x73 => Ok(Self::Inf),
            0x74 => Ok(Self::InfC),
            0x7A => Ok(Self::InfCRes),
            0x7E => Ok(Self::SetGetRes),
            0x50 => Ok(Self::SetISna),
            0x51 => Ok(Self::SetCSna),
            0x52 => Ok(Self::GetSna),
            0x53 => Ok(Self::InfReqSna),
            0x5E => Ok(Self::SetGetSna),
            other => Err(EchonetError::InvalidEsv(other)),
        }
    }
}

impl fmt::Display for Esv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SetI => "SetI",
            Self::SetC => "SetC",
            Self::Get => "Get",
            Self::InfReq => "INF_REQ",
            Self::SetGet => "SetGet",
            Self::SetRes => "Set_Res",
            Self::GetRes => "Get_Res",
            Self::Inf => "INF",
            Self::InfC => "INFC",
            Self::InfCRes => "INFC_Res",
            Self::SetGetRes => "SetGet_Res",
            Self::SetISna => "SetI_SNA",
            Self::SetCSna => "SetC_SNA",
            Self::GetSna => "Get_SNA",
            Self::InfReqSna => "INF_REQ_SNA",
            Self::SetGetSna => "SetGet_SNA",
        };
        write!(f, "{}", name)
    }
}

impl Esv {
    /// The set of ESVs that are valid responses to this request verb.
    /// Empty for verbs that are not requests (or expect no response).
    pub fn valid_responses(&self) -> &'static [Esv] {
        match self {
            Self::Get => &[Esv::GetRes, Esv::GetSna],
            Self::SetC => &[Esv::SetRes, Esv::SetCSna],
            // SetI is answered only on failure.
            Self::SetI => &[Esv::SetISna],
            Self::InfReq => &[Esv::Inf, Esv::InfReqSna],
            Self::SetGet => &[Esv::SetGetRes, Esv::SetGetSna],
            Self::InfC => &[Esv::InfCRes],
            _ => &[],
        }
    }

    /// True for the error-response (SNA) group.
    pub fn is_sna(&self) -> bool {
        (*self as u8) & 0xF0 == 0x50
    }

    /// True for verbs whose frames carry a second property list
    /// (the SetGet family).
    pub fn has_second_property_list(&self) -> bool {
        matches!(self, Self::SetGet | Self::SetGetRes | Self::SetGetSna)
    }

    /// True for unsolicited notifications.
    pub fn is_notification(&self) -> bool {
        matches!(self, Self::Inf | Self::InfC)
    }

    /// True for request verbs a remote node may address to our local objects.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::SetI | Self::SetC | Self::Get | Self::InfReq | Self::SetGet
        )
    }

    /// True for the Set family of responses (empty EDT marks per-EPC success).
    pub fn is_set_response(&self) -> bool {
        matches!(self, Self::SetRes | Self::SetCSna | Self::SetISna)
    }

    /// True for the Get family of responses and notifications (empty EDT
    /// marks per-EPC failure).
    pub fn is_get_response(&self) -> bool {
        matches!(
            self,
            Self::GetRes | Self::GetSna | Self::Inf | Self::InfC | Self::InfReqSna
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_esv_byte_roundtrip() {
        for value in [
            0x60, 0x61, 0x62, 0x63, 0x6E, 0x71, 0x72, 0x73, 0x74, 0x7A, 0x7E, 0x50, 0x51, 0x52,
            0x53, 0x5E,
        ] {
            let esv = Esv::try_from(value).unwrap();
            assert_eq!(esv as u8, value);
        }
        assert!(matches!(
            Esv::try_from(0x70),
            Err(EchonetError::InvalidEsv(0x70))
        ));
    }

    #[test]
    fn test_valid_responses() {
        assert_eq!(Esv::Get.valid_responses(), &[Esv::GetRes, Esv::GetSna]);
        assert_eq!(Esv::SetC.valid_responses(), &[Esv::SetRes, Esv::SetCSna]);
        assert_eq!(Esv::SetI.valid_responses(), &[Esv::SetISna]);
        assert_eq!(Esv::InfReq.valid_responses(), &[Esv::Inf, Esv::InfReqSna]);
        assert_eq!(
            Esv::SetGet.valid_responses(),
            &[Esv::SetGetRes, Esv::SetGetSna]
        );
        assert!(Esv::GetRes.valid_responses().is_empty());
    }

    #[test]
    fn test_sna_classification() {
        assert!(Esv::GetSna.is_sna());
        assert!(Esv::SetGetSna.is_sna());
        assert!(!Esv::GetRes.is_sna());
    }
}
