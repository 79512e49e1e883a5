//! Protocol Data Unit module
//!
//! This module comprises the data structures representing
//! the protocol data units (PDUs) of the DICOM upper layer
//! and their nested items,
//! as well as readers and writers of PDUs from arbitrary byte streams.
//!
//! PDUs are decoded into and encoded from the generic field container
//! in the [`item`] module.
pub mod item;
pub mod reader;
pub mod writer;

use snafu::{ensure, Backtrace, Snafu};
use std::borrow::Cow;
use std::convert::TryFrom;
use std::fmt::Display;
use std::str::FromStr;

pub use reader::{read_pdu, DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE, MINIMUM_PDU_SIZE, PDU_HEADER_SIZE};
pub use writer::write_pdu;

/// The number of bytes taken by a presentation data value header
/// within a P-DATA-TF PDU:
/// item length (4 bytes), presentation context ID and message control header.
pub const PDV_HEADER_SIZE: u32 = 6;

/// An error raised when constructing or modifying a PDU value
/// with values outside of their admitted range.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ValueError {
    #[snafu(display("Invalid AE title {:?}: {}", value, problem))]
    InvalidAeTitle {
        value: String,
        problem: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid A-ABORT source {}", code))]
    InvalidAbortSource { code: u8, backtrace: Backtrace },

    #[snafu(display("Invalid A-ABORT reason {} for source {}", reason, code))]
    InvalidAbortReason {
        code: u8,
        reason: u8,
        backtrace: Backtrace,
    },
}

/// An application entity title.
///
/// Holds between 1 and 16 characters of the ISO 646 basic G0 set,
/// without control characters or backslashes.
/// Leading and trailing spaces are not significant,
/// and a title made only of spaces is not admitted.
/// On the wire, titles are always 16 bytes long, padded with spaces.
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct AeTitle(String);

impl AeTitle {
    /// The encoded length of an AE title.
    pub const LENGTH: usize = 16;

    pub fn new(value: impl Into<String>) -> Result<Self, ValueError> {
        let value = value.into();
        ensure!(
            value.len() <= Self::LENGTH,
            InvalidAeTitleSnafu {
                value,
                problem: "longer than 16 characters",
            }
        );
        ensure!(
            value
                .chars()
                .all(|c| (c.is_ascii_graphic() || c == ' ') && c != '\\'),
            InvalidAeTitleSnafu {
                value,
                problem: "contains characters outside the basic G0 set",
            }
        );
        ensure!(
            !value.trim().is_empty(),
            InvalidAeTitleSnafu {
                value,
                problem: "empty or blank",
            }
        );
        Ok(AeTitle(value.trim().to_string()))
    }

    /// Decode an AE title from its 16-byte wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ValueError> {
        Self::new(String::from_utf8_lossy(bytes).into_owned())
    }

    /// The 16-byte wire form, right-padded with spaces.
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [b' '; 16];
        out[..self.0.len()].copy_from_slice(self.0.as_bytes());
        out
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for AeTitle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AeTitle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for AeTitle {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for AeTitle {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl FromStr for AeTitle {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AeTitle::new(s)
    }
}

impl TryFrom<&str> for AeTitle {
    type Error = ValueError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        AeTitle::new(value)
    }
}

impl TryFrom<String> for AeTitle {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AeTitle::new(value)
    }
}

/// Remove the trailing padding (null or space) of a UID.
pub fn trim_uid(uid: Cow<'_, str>) -> Cow<'_, str> {
    if uid.ends_with(|c| c == '\0' || c == ' ') {
        Cow::Owned(uid.trim_end_matches(|c| c == '\0' || c == ' ').to_string())
    } else {
        uid
    }
}

/// One presentation context of an A-ASSOCIATE-RQ (item 0x20).
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct PresentationContextProposed {
    /// odd, from 1 to 255
    pub id: u8,
    pub abstract_syntax: String,
    /// in order of preference
    pub transfer_syntaxes: Vec<String>,
}

/// One presentation context of an A-ASSOCIATE-AC (item 0x21).
///
/// `transfer_syntax` is `None` unless the context was accepted.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct PresentationContextResult {
    pub id: u8,
    pub reason: PresentationContextResultReason,
    pub transfer_syntax: Option<String>,
}

impl PresentationContextResult {
    pub fn accepted(id: u8, transfer_syntax: impl Into<String>) -> Self {
        PresentationContextResult {
            id,
            reason: PresentationContextResultReason::Acceptance,
            transfer_syntax: Some(transfer_syntax.into()),
        }
    }

    pub fn rejected(id: u8, reason: PresentationContextResultReason) -> Self {
        PresentationContextResult {
            id,
            reason,
            transfer_syntax: None,
        }
    }
}

/// A presentation context as negotiated between both nodes,
/// joining the proposal with its outcome.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct PresentationContextNegotiated {
    pub id: u8,
    pub reason: PresentationContextResultReason,
    pub abstract_syntax: String,
    /// the accepted transfer syntax, only if accepted
    pub transfer_syntax: Option<String>,
}

impl PresentationContextNegotiated {
    pub fn is_accepted(&self) -> bool {
        self.reason == PresentationContextResultReason::Acceptance
    }
}

/// The result byte of one presentation context in an A-ASSOCIATE-AC.
///
/// Only `Acceptance` comes with a transfer syntax.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum PresentationContextResultReason {
    Acceptance = 0,
    UserRejection = 1,
    NoReason = 2,
    AbstractSyntaxNotSupported = 3,
    TransferSyntaxesNotSupported = 4,
}

impl PresentationContextResultReason {
    pub fn from_code(reason: u8) -> Option<PresentationContextResultReason> {
        use PresentationContextResultReason::*;
        [
            Acceptance,
            UserRejection,
            NoReason,
            AbstractSyntaxNotSupported,
            TransferSyntaxesNotSupported,
        ]
        .into_iter()
        .find(|candidate| *candidate as u8 == reason)
    }
}

impl Display for PresentationContextResultReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PresentationContextResultReason::Acceptance => "accepted",
            PresentationContextResultReason::UserRejection => "refused by the acceptor",
            PresentationContextResultReason::NoReason => "refused by the provider",
            PresentationContextResultReason::AbstractSyntaxNotSupported => {
                "unsupported abstract syntax"
            }
            PresentationContextResultReason::TransferSyntaxesNotSupported => {
                "none of the transfer syntaxes is supported"
            }
        })
    }
}

/// Whether retrying the association later may succeed.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJResult {
    Permanent = 1,
    Transient = 2,
}

impl AssociationRJResult {
    fn from_code(value: u8) -> Option<AssociationRJResult> {
        match value {
            1 => Some(AssociationRJResult::Permanent),
            2 => Some(AssociationRJResult::Transient),
            _ => None,
        }
    }
}

/// Who refused the association, along with their reason.
///
/// The source byte of an A-ASSOCIATE-RJ selects the variant
/// (1, 2 or 3), and the reason byte is read against that variant's table.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJSource {
    ServiceUser(AssociationRJServiceUserReason),
    ServiceProviderASCE(AssociationRJServiceProviderASCEReason),
    ServiceProviderPresentation(AssociationRJServiceProviderPresentationReason),
}

impl AssociationRJSource {
    fn from_codes(source: u8, reason: u8) -> Option<AssociationRJSource> {
        match source {
            1 => AssociationRJServiceUserReason::from_code(reason).map(Self::ServiceUser),
            2 => AssociationRJServiceProviderASCEReason::from_code(reason)
                .map(Self::ServiceProviderASCE),
            3 => AssociationRJServiceProviderPresentationReason::from_code(reason)
                .map(Self::ServiceProviderPresentation),
            _ => None,
        }
    }

    /// The source and reason codes as written on the wire.
    fn codes(&self) -> (u8, u8) {
        match self {
            AssociationRJSource::ServiceUser(reason) => (1, reason.code()),
            AssociationRJSource::ServiceProviderASCE(reason) => (2, reason.code()),
            AssociationRJSource::ServiceProviderPresentation(reason) => (3, reason.code()),
        }
    }
}

impl Display for AssociationRJSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssociationRJSource::ServiceUser(reason) => write!(f, "{} (by the acceptor)", reason),
            AssociationRJSource::ServiceProviderASCE(reason) => {
                write!(f, "{} (by the ACSE provider)", reason)
            }
            AssociationRJSource::ServiceProviderPresentation(reason) => {
                write!(f, "{} (by the presentation provider)", reason)
            }
        }
    }
}

/// Reasons given by the accepting application.
///
/// Codes 4 to 6 and 8 to 10 are kept as `Reserved`.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJServiceUserReason {
    NoReasonGiven,
    ApplicationContextNameNotSupported,
    CallingAETitleNotRecognized,
    CalledAETitleNotRecognized,
    Reserved(u8),
}

impl AssociationRJServiceUserReason {
    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::NoReasonGiven,
            2 => Self::ApplicationContextNameNotSupported,
            3 => Self::CallingAETitleNotRecognized,
            7 => Self::CalledAETitleNotRecognized,
            4..=6 | 8..=10 => Self::Reserved(code),
            _ => return None,
        })
    }

    fn code(&self) -> u8 {
        match self {
            Self::NoReasonGiven => 1,
            Self::ApplicationContextNameNotSupported => 2,
            Self::CallingAETitleNotRecognized => 3,
            Self::CalledAETitleNotRecognized => 7,
            Self::Reserved(code) => *code,
        }
    }
}

impl Display for AssociationRJServiceUserReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoReasonGiven => f.write_str("refused without a reason"),
            Self::ApplicationContextNameNotSupported => {
                f.write_str("unsupported application context")
            }
            Self::CallingAETitleNotRecognized => f.write_str("unknown calling AE title"),
            Self::CalledAETitleNotRecognized => f.write_str("unknown called AE title"),
            Self::Reserved(code) => write!(f, "refused with reserved reason {}", code),
        }
    }
}

/// Reasons given by the association control service element.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJServiceProviderASCEReason {
    NoReasonGiven,
    ProtocolVersionNotSupported,
}

impl AssociationRJServiceProviderASCEReason {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::NoReasonGiven),
            2 => Some(Self::ProtocolVersionNotSupported),
            _ => None,
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::NoReasonGiven => 1,
            Self::ProtocolVersionNotSupported => 2,
        }
    }
}

impl Display for AssociationRJServiceProviderASCEReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NoReasonGiven => "refused without a reason",
            Self::ProtocolVersionNotSupported => "unsupported protocol version",
        })
    }
}

/// Reasons given by the presentation layer.
///
/// Codes 0 and 3 to 7 are kept as `Reserved`.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AssociationRJServiceProviderPresentationReason {
    TemporaryCongestion,
    LocalLimitExceeded,
    Reserved(u8),
}

impl AssociationRJServiceProviderPresentationReason {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::TemporaryCongestion),
            2 => Some(Self::LocalLimitExceeded),
            0 | 3..=7 => Some(Self::Reserved(code)),
            _ => None,
        }
    }

    fn code(&self) -> u8 {
        match self {
            Self::TemporaryCongestion => 1,
            Self::LocalLimitExceeded => 2,
            Self::Reserved(code) => *code,
        }
    }
}

impl Display for AssociationRJServiceProviderPresentationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TemporaryCongestion => f.write_str("too busy for now"),
            Self::LocalLimitExceeded => f.write_str("too many associations"),
            Self::Reserved(code) => write!(f, "refused with reserved reason {}", code),
        }
    }
}

/// A fragment of a DIMSE message inside a P-DATA-TF PDU.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct PDataValue {
    pub presentation_context_id: u8,
    pub value_type: PDataValueType,
    pub is_last: bool,
    pub data: Vec<u8>,
}

impl PDataValue {
    /// The message control header byte:
    /// bit 0 for command fragments, bit 1 for the last fragment.
    pub fn control_header(&self) -> u8 {
        let mut header = 0x00;
        if self.value_type == PDataValueType::Command {
            header |= 0x01;
        }
        if self.is_last {
            header |= 0x02;
        }
        header
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum PDataValueType {
    Command,
    Data,
}

/// The contents of an A-ABORT PDU.
///
/// The source is one of
/// 0 (service user), 1 (reserved) or 2 (service provider).
/// The reason is only significant for the service provider,
/// where it takes one of the values 0, 1, 2, 4, 5 or 6.
/// Invalid combinations are refused as soon as they are set.
#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Hash)]
pub struct AbortRQ {
    source: u8,
    reason: u8,
}

fn check_abort(source: u8, reason: u8) -> Result<(), ValueError> {
    ensure!(source <= 2, InvalidAbortSourceSnafu { code: source });
    ensure!(
        reason <= 6 && !(source == 2 && reason == 3),
        InvalidAbortReasonSnafu {
            code: source,
            reason
        }
    );
    Ok(())
}

impl AbortRQ {
    pub fn new(source: u8, reason: u8) -> Result<Self, ValueError> {
        check_abort(source, reason)?;
        Ok(AbortRQ { source, reason })
    }

    /// An abort initiated by the upper layer service user.
    pub fn service_user() -> Self {
        AbortRQ {
            source: 0,
            reason: 0,
        }
    }

    /// An abort initiated by the upper layer service provider.
    pub fn service_provider(reason: AbortRQServiceProviderReason) -> Self {
        AbortRQ {
            source: 2,
            reason: reason.code(),
        }
    }

    pub fn source(&self) -> u8 {
        self.source
    }

    pub fn reason(&self) -> u8 {
        self.reason
    }

    pub fn set_source(&mut self, source: u8) -> Result<(), ValueError> {
        check_abort(source, self.reason)?;
        self.source = source;
        Ok(())
    }

    pub fn set_reason(&mut self, reason: u8) -> Result<(), ValueError> {
        check_abort(self.source, reason)?;
        self.reason = reason;
        Ok(())
    }

    /// Interpret the source and reason codes.
    pub fn kind(&self) -> AbortRQSource {
        use AbortRQServiceProviderReason::*;
        match (self.source, self.reason) {
            (0, _) => AbortRQSource::ServiceUser,
            (1, _) => AbortRQSource::Reserved,
            (_, 1) => AbortRQSource::ServiceProvider(UnrecognizedPdu),
            (_, 2) => AbortRQSource::ServiceProvider(UnexpectedPdu),
            (_, 4) => AbortRQSource::ServiceProvider(UnrecognizedPduParameter),
            (_, 5) => AbortRQSource::ServiceProvider(UnexpectedPduParameter),
            (_, 6) => AbortRQSource::ServiceProvider(InvalidPduParameter),
            _ => AbortRQSource::ServiceProvider(ReasonNotSpecified),
        }
    }
}

impl Display for AbortRQ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            AbortRQSource::ServiceUser => f.write_str("aborted by service user"),
            AbortRQSource::Reserved => write!(f, "aborted (reserved source, reason {})", self.reason),
            AbortRQSource::ServiceProvider(reason) => {
                write!(f, "aborted by service provider: {}", reason)
            }
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AbortRQSource {
    ServiceUser,
    ServiceProvider(AbortRQServiceProviderReason),
    Reserved,
}

/// Why the upper layer provider aborted an association.
///
/// Code 3 is reserved and has no variant.
/// The state machine picks the reason from the kind of fault:
/// an unknown PDU type, a PDU not allowed in the current state,
/// a PDV breaking the message rules, or a PDU that could not be decoded.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum AbortRQServiceProviderReason {
    ReasonNotSpecified = 0,
    UnrecognizedPdu = 1,
    UnexpectedPdu = 2,
    UnrecognizedPduParameter = 4,
    UnexpectedPduParameter = 5,
    InvalidPduParameter = 6,
}

impl AbortRQServiceProviderReason {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl Display for AbortRQServiceProviderReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use AbortRQServiceProviderReason::*;
        f.write_str(match self {
            ReasonNotSpecified => "no reason given",
            UnrecognizedPdu => "PDU type not recognized",
            UnexpectedPdu => "PDU not expected in this state",
            UnrecognizedPduParameter => "PDU item not recognized",
            UnexpectedPduParameter => "PDU item not expected",
            InvalidPduParameter => "PDU item could not be decoded",
        })
    }
}

/// A sub-item of the user information item.
///
/// Sub-items of unknown type are skipped when reading.
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub enum UserVariableItem {
    /// Maximum Length (51H)
    MaxLength(u32),
    /// Implementation Class UID (52H)
    ImplementationClassUID(String),
    /// Asynchronous Operations Window (53H)
    AsyncOperationsWindow {
        max_operations_invoked: u16,
        max_operations_performed: u16,
    },
    /// SCP/SCU Role Selection (54H)
    RoleSelection {
        sop_class_uid: String,
        scu_role: bool,
        scp_role: bool,
    },
    /// Implementation Version Name (55H)
    ImplementationVersionName(String),
    /// SOP Class Extended Negotiation (56H)
    SopClassExtendedNegotiationSubItem(String, Vec<u8>),
    /// User Identity Negotiation request (58H)
    UserIdentityItem(UserIdentity),
    /// User Identity Negotiation response (59H),
    /// holding the server response
    UserIdentityResponse(Vec<u8>),
}

impl UserVariableItem {
    pub fn item_type(&self) -> u8 {
        match self {
            UserVariableItem::MaxLength(_) => 0x51,
            UserVariableItem::ImplementationClassUID(_) => 0x52,
            UserVariableItem::AsyncOperationsWindow { .. } => 0x53,
            UserVariableItem::RoleSelection { .. } => 0x54,
            UserVariableItem::ImplementationVersionName(_) => 0x55,
            UserVariableItem::SopClassExtendedNegotiationSubItem(..) => 0x56,
            UserVariableItem::UserIdentityItem(_) => 0x58,
            UserVariableItem::UserIdentityResponse(_) => 0x59,
        }
    }
}

/// The user identity negotiation request (sub-item 0x58).
///
/// The secondary field is only meaningful
/// for [`UserIdentityType::UsernamePassword`].
#[derive(Clone, Eq, PartialEq, PartialOrd, Hash, Debug)]
pub struct UserIdentity {
    positive_response_requested: bool,
    identity_type: UserIdentityType,
    primary_field: Vec<u8>,
    secondary_field: Vec<u8>,
}

impl UserIdentity {
    pub fn new(
        positive_response_requested: bool,
        identity_type: UserIdentityType,
        primary_field: Vec<u8>,
        secondary_field: Vec<u8>,
    ) -> Self {
        UserIdentity {
            positive_response_requested,
            identity_type,
            primary_field,
            secondary_field,
        }
    }

    pub fn positive_response_requested(&self) -> bool {
        self.positive_response_requested
    }

    pub fn identity_type(&self) -> UserIdentityType {
        self.identity_type
    }

    pub fn primary_field(&self) -> &[u8] {
        &self.primary_field
    }

    pub fn secondary_field(&self) -> &[u8] {
        &self.secondary_field
    }
}

#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Hash, Debug)]
#[non_exhaustive]
pub enum UserIdentityType {
    Username = 1,
    UsernamePassword = 2,
    KerberosServiceTicket = 3,
    SamlAssertion = 4,
    Jwt = 5,
}

impl UserIdentityType {
    fn from_code(code: u8) -> Option<Self> {
        [
            Self::Username,
            Self::UsernamePassword,
            Self::KerberosServiceTicket,
            Self::SamlAssertion,
            Self::Jwt,
        ]
        .into_iter()
        .find(|kind| kind.code() == code)
    }

    fn code(self) -> u8 {
        self as u8
    }
}

/// A decoded protocol data unit, one variant per PDU type (0x01 to 0x07).
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Hash)]
pub enum Pdu {
    /// 0x01
    AssociationRQ(AssociationRQ),
    /// 0x02
    AssociationAC(AssociationAC),
    /// 0x03
    AssociationRJ(AssociationRJ),
    /// 0x04, one or more fragments of DIMSE messages
    PData { data: Vec<PDataValue> },
    /// 0x05
    ReleaseRQ,
    /// 0x06
    ReleaseRP,
    /// 0x07, also known as A-ABORT
    AbortRQ(AbortRQ),
}

impl Pdu {
    /// The PDU type code.
    pub fn pdu_type(&self) -> u8 {
        match self {
            Pdu::AssociationRQ(_) => 0x01,
            Pdu::AssociationAC(_) => 0x02,
            Pdu::AssociationRJ(_) => 0x03,
            Pdu::PData { .. } => 0x04,
            Pdu::ReleaseRQ => 0x05,
            Pdu::ReleaseRP => 0x06,
            Pdu::AbortRQ(_) => 0x07,
        }
    }

    /// Provide a short description of the PDU.
    pub fn short_description(&self) -> impl std::fmt::Display + '_ {
        PduShortDescription(self)
    }
}

struct PduShortDescription<'a>(&'a Pdu);

impl std::fmt::Display for PduShortDescription<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Pdu::AssociationRQ(rq) => write!(
                f,
                "AssociationRQ {{ {} -> {}, {} presentation contexts }}",
                rq.calling_ae_title,
                rq.called_ae_title,
                rq.presentation_contexts.len()
            ),
            Pdu::AssociationAC(ac) => write!(
                f,
                "AssociationAC {{ {} presentation contexts }}",
                ac.presentation_contexts.len()
            ),
            Pdu::AssociationRJ(_) | Pdu::ReleaseRQ | Pdu::ReleaseRP | Pdu::AbortRQ(_) => {
                std::fmt::Debug::fmt(self.0, f)
            }
            Pdu::PData { data } => {
                if data.len() == 1 {
                    write!(
                        f,
                        "PData [({:?}, {} bytes)]",
                        data[0].value_type,
                        data[0].data.len()
                    )
                } else if data.len() == 2 {
                    write!(
                        f,
                        "PData [({:?}, {} bytes), ({:?}, {} bytes)]",
                        data[0].value_type,
                        data[0].data.len(),
                        data[1].value_type,
                        data[1].data.len(),
                    )
                } else {
                    write!(f, "PData [{} p-data values]", data.len())
                }
            }
        }
    }
}

/// An in-memory representation of an association request
#[derive(Debug, Clone, Eq, Hash, PartialEq, PartialOrd)]
pub struct AssociationRQ {
    pub protocol_version: u16,
    pub calling_ae_title: AeTitle,
    pub called_ae_title: AeTitle,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextProposed>,
    pub user_variables: Vec<UserVariableItem>,
}

impl From<AssociationRQ> for Pdu {
    fn from(value: AssociationRQ) -> Self {
        Pdu::AssociationRQ(value)
    }
}

/// An in-memory representation of an association acknowledgement.
///
/// The AE title fields are meant to echo those of the request,
/// but are not tested when received.
#[derive(Debug, Clone, Eq, Hash, PartialEq, PartialOrd)]
pub struct AssociationAC {
    pub protocol_version: u16,
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub application_context_name: String,
    pub presentation_contexts: Vec<PresentationContextResult>,
    pub user_variables: Vec<UserVariableItem>,
}

impl From<AssociationAC> for Pdu {
    fn from(value: AssociationAC) -> Self {
        Pdu::AssociationAC(value)
    }
}

/// An in-memory representation of an association rejection.
#[derive(Debug, Clone, Eq, Hash, PartialEq, PartialOrd)]
pub struct AssociationRJ {
    pub result: AssociationRJResult,
    pub source: AssociationRJSource,
}

impl From<AssociationRJ> for Pdu {
    fn from(value: AssociationRJ) -> Self {
        Pdu::AssociationRJ(value)
    }
}

impl From<AbortRQ> for Pdu {
    fn from(value: AbortRQ) -> Self {
        Pdu::AbortRQ(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::matches;
    use rstest::rstest;

    #[test]
    fn pdu_short_description() {
        let pdu = Pdu::AbortRQ(AbortRQ::service_user());
        assert_eq!(
            &pdu.short_description().to_string(),
            "AbortRQ(AbortRQ { source: 0, reason: 0 })",
        );

        let pdu = Pdu::PData {
            data: vec![PDataValue {
                is_last: true,
                presentation_context_id: 3,
                value_type: PDataValueType::Data,
                data: vec![0x55; 384],
            }],
        };
        assert_eq!(
            &pdu.short_description().to_string(),
            "PData [(Data, 384 bytes)]",
        );
    }

    #[test]
    fn ae_title_is_padded_with_spaces() {
        let title = AeTitle::new("foo").unwrap();
        assert_eq!(&title.to_bytes(), b"foo             ");
        assert_eq!(title, "foo");

        let full = AeTitle::new("ABCDEFGHIJKLMNOP").unwrap();
        assert_eq!(&full.to_bytes(), b"ABCDEFGHIJKLMNOP");
        assert_eq!(AeTitle::from_bytes(&full.to_bytes()).unwrap(), full);
    }

    #[rstest]
    #[case("")]
    #[case("                ")]
    #[case("ABCDEFGHIJKLMNOPQ")]
    #[case("BACK\\SLASH")]
    #[case("TAB\tTITLE")]
    fn invalid_ae_titles_are_refused(#[case] value: &str) {
        assert!(matches!(
            AeTitle::new(value),
            Err(ValueError::InvalidAeTitle { .. })
        ));
    }

    #[test]
    fn abort_source_and_reason_are_validated() {
        let mut abort = AbortRQ::new(1, 2).unwrap();
        assert_eq!(abort.source(), 1);
        assert_eq!(abort.reason(), 2);

        assert!(matches!(
            abort.set_source(3),
            Err(ValueError::InvalidAbortSource { code: 3, .. })
        ));
        assert!(matches!(
            abort.set_reason(9),
            Err(ValueError::InvalidAbortReason { reason: 9, .. })
        ));
        // the failed calls leave the value untouched
        assert_eq!(abort, AbortRQ::new(1, 2).unwrap());

        abort.set_reason(3).unwrap();
        assert!(abort.set_source(2).is_err());
        assert!(AbortRQ::new(2, 3).is_err());
        assert_eq!(
            AbortRQ::new(2, 6).unwrap().kind(),
            AbortRQSource::ServiceProvider(AbortRQServiceProviderReason::InvalidPduParameter)
        );
    }

    #[rstest]
    #[case(1, 7, "unknown called AE title (by the acceptor)")]
    #[case(1, 9, "refused with reserved reason 9 (by the acceptor)")]
    #[case(2, 2, "unsupported protocol version (by the ACSE provider)")]
    #[case(3, 2, "too many associations (by the presentation provider)")]
    #[case(3, 0, "refused with reserved reason 0 (by the presentation provider)")]
    fn reject_codes_are_interpreted(#[case] source: u8, #[case] reason: u8, #[case] text: &str) {
        let rj = AssociationRJSource::from_codes(source, reason).unwrap();
        assert_eq!(rj.to_string(), text);
        assert_eq!(rj.codes(), (source, reason));
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 0)]
    #[case(1, 11)]
    #[case(2, 3)]
    #[case(3, 8)]
    #[case(4, 1)]
    fn unknown_reject_codes_are_refused(#[case] source: u8, #[case] reason: u8) {
        assert_eq!(AssociationRJSource::from_codes(source, reason), None);
    }

    #[test]
    fn presentation_context_result_codes() {
        assert_eq!(
            PresentationContextResultReason::from_code(3),
            Some(PresentationContextResultReason::AbstractSyntaxNotSupported)
        );
        assert_eq!(PresentationContextResultReason::from_code(5), None);
    }

    #[test]
    fn uid_padding_is_trimmed() {
        assert_eq!(trim_uid(Cow::from("1.2.3.4")), "1.2.3.4");
        assert_eq!(trim_uid(Cow::from("1.2.3\0")), "1.2.3");
        assert_eq!(trim_uid(Cow::from("1.2.3 ")), "1.2.3");
    }
}
