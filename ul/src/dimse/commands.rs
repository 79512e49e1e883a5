//! DIMSE command field values and status codes (PS3.7 section 9 and annex C).

/// The value of the Command Field (0000,0100) attribute.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum CommandField {
    CStoreRq,
    CStoreRsp,
    CGetRq,
    CGetRsp,
    CFindRq,
    CFindRsp,
    CMoveRq,
    CMoveRsp,
    CEchoRq,
    CEchoRsp,
    NEventReportRq,
    NEventReportRsp,
    NGetRq,
    NGetRsp,
    NSetRq,
    NSetRsp,
    NActionRq,
    NActionRsp,
    NCreateRq,
    NCreateRsp,
    NDeleteRq,
    NDeleteRsp,
    CCancelRq,
}

impl CommandField {
    pub fn from_code(code: u16) -> Option<Self> {
        use CommandField::*;
        Some(match code {
            0x0001 => CStoreRq,
            0x8001 => CStoreRsp,
            0x0010 => CGetRq,
            0x8010 => CGetRsp,
            0x0020 => CFindRq,
            0x8020 => CFindRsp,
            0x0021 => CMoveRq,
            0x8021 => CMoveRsp,
            0x0030 => CEchoRq,
            0x8030 => CEchoRsp,
            0x0100 => NEventReportRq,
            0x8100 => NEventReportRsp,
            0x0110 => NGetRq,
            0x8110 => NGetRsp,
            0x0120 => NSetRq,
            0x8120 => NSetRsp,
            0x0130 => NActionRq,
            0x8130 => NActionRsp,
            0x0140 => NCreateRq,
            0x8140 => NCreateRsp,
            0x0150 => NDeleteRq,
            0x8150 => NDeleteRsp,
            0x0FFF => CCancelRq,
            _ => return None,
        })
    }

    pub fn code(self) -> u16 {
        use CommandField::*;
        match self {
            CStoreRq => 0x0001,
            CStoreRsp => 0x8001,
            CGetRq => 0x0010,
            CGetRsp => 0x8010,
            CFindRq => 0x0020,
            CFindRsp => 0x8020,
            CMoveRq => 0x0021,
            CMoveRsp => 0x8021,
            CEchoRq => 0x0030,
            CEchoRsp => 0x8030,
            NEventReportRq => 0x0100,
            NEventReportRsp => 0x8100,
            NGetRq => 0x0110,
            NGetRsp => 0x8110,
            NSetRq => 0x0120,
            NSetRsp => 0x8120,
            NActionRq => 0x0130,
            NActionRsp => 0x8130,
            NCreateRq => 0x0140,
            NCreateRsp => 0x8140,
            NDeleteRq => 0x0150,
            NDeleteRsp => 0x8150,
            CCancelRq => 0x0FFF,
        }
    }

    /// Whether this is a response command.
    pub fn is_response(self) -> bool {
        self.code() & 0x8000 != 0
    }

    /// Whether this is a request which expects a response.
    /// C-CANCEL is a request which does not.
    pub fn is_request(self) -> bool {
        !self.is_response() && self != CommandField::CCancelRq
    }

    /// The command field of the response to this request.
    pub fn response(self) -> Option<Self> {
        if self.is_request() {
            Self::from_code(self.code() | 0x8000)
        } else {
            None
        }
    }
}

/// The value of the Priority (0000,0700) attribute.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn code(self) -> u16 {
        match self {
            Priority::Medium => 0x0000,
            Priority::High => 0x0001,
            Priority::Low => 0x0002,
        }
    }
}

/// Command Data Set Type (0000,0800) value when no data set follows.
pub const NO_DATA_SET: u16 = 0x0101;

/// A Command Data Set Type (0000,0800) value announcing a data set.
pub const DATA_SET_PRESENT: u16 = 0x0001;

/// Status (0000,0900) codes common to all services.
pub mod status {
    pub const SUCCESS: u16 = 0x0000;
    pub const CANCEL: u16 = 0xFE00;
    pub const PENDING: u16 = 0xFF00;
    pub const PENDING_WITH_WARNINGS: u16 = 0xFF01;
    pub const PROCESSING_FAILURE: u16 = 0x0110;
    pub const NO_SUCH_SOP_CLASS: u16 = 0x0118;
    pub const UNRECOGNIZED_OPERATION: u16 = 0x0211;

    /// Whether a response with this status will be followed by more responses.
    pub fn is_pending(status: u16) -> bool {
        status == PENDING || status == PENDING_WITH_WARNINGS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_field_codes_round_trip() {
        for code in [0x0001, 0x8001, 0x0030, 0x8030, 0x0150, 0x8150, 0x0FFF] {
            assert_eq!(CommandField::from_code(code).map(CommandField::code), Some(code));
        }
        assert_eq!(CommandField::from_code(0x0031), None);
    }

    #[test]
    fn requests_and_responses() {
        assert!(CommandField::CEchoRq.is_request());
        assert_eq!(
            CommandField::CEchoRq.response(),
            Some(CommandField::CEchoRsp)
        );
        assert!(CommandField::CFindRsp.is_response());
        assert!(!CommandField::CCancelRq.is_request());
        assert!(!CommandField::CCancelRq.is_response());
        assert_eq!(CommandField::CCancelRq.response(), None);
    }

    #[test]
    fn pending_statuses() {
        assert!(status::is_pending(0xFF00));
        assert!(status::is_pending(0xFF01));
        assert!(!status::is_pending(status::SUCCESS));
        assert!(!status::is_pending(0xA700));
    }
}
