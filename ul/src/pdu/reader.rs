//! PDU reader module
//!
//! A PDU is read in two steps:
//! the 6-byte header and the full body are taken from the stream,
//! then the body is decoded item by item,
//! with every declared length checked against the bytes available.
use crate::pdu::item::{FieldKind, Item};
use crate::pdu::*;
use dicom_encoding::text::{DefaultCharacterSetCodec, TextCodec};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::io::{Cursor, ErrorKind, Read};
use tracing::{debug, warn};

/// The default maximum PDU size
pub const DEFAULT_MAX_PDU: u32 = 16_384;

/// The minimum PDU size,
/// as specified by the standard
pub const MINIMUM_PDU_SIZE: u32 = 4_096;

/// The maximum PDU size,
/// as specified by the standard
pub const MAXIMUM_PDU_SIZE: u32 = 131_072;

/// The length of the PDU header in bytes,
/// comprising the PDU type (1 byte),
/// reserved byte (1 byte),
/// and PDU length (4 bytes).
pub const PDU_HEADER_SIZE: u32 = 6;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Invalid max PDU length {}", max_pdu_length))]
    InvalidMaxPdu {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("No PDU available"))]
    NoPduAvailable { backtrace: Backtrace },

    #[snafu(display("Could not read PDU"))]
    ReadPdu {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Stream ended before the end of the PDU"))]
    TruncatedPdu {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Incoming pdu was too large: length {}, maximum is {}",
        pdu_length,
        max_pdu_length
    ))]
    PduTooLarge {
        pdu_length: u32,
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("Unknown PDU type {:#04x}", pdu_type))]
    UnknownPduType { pdu_type: u8, backtrace: Backtrace },

    #[snafu(display("Invalid length {} for PDU of type {:#04x}", length, pdu_type))]
    InvalidPduLength {
        pdu_type: u8,
        length: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not decode PDU item"))]
    DecodeItem {
        #[snafu(backtrace)]
        source: item::Error,
    },

    #[snafu(display("Could not decode text field `{}`", field))]
    DecodeText {
        field: &'static str,
        #[snafu(backtrace)]
        source: dicom_encoding::text::DecodeTextError,
    },

    #[snafu(display("PDU contained an invalid value"))]
    InvalidValue {
        #[snafu(backtrace)]
        source: ValueError,
    },

    #[snafu(display("Unexpected item of type {:#04x} in {}", item_type, within))]
    UnexpectedItem {
        item_type: u8,
        within: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Declared length of {} ({} bytes) does not match its content ({} bytes)",
        name,
        declared,
        consumed
    ))]
    LengthMismatch {
        name: &'static str,
        declared: usize,
        consumed: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("P-DATA-TF carries no presentation data value"))]
    EmptyPData { backtrace: Backtrace },

    #[snafu(display("Invalid item length {} (must be >=2)", length))]
    InvalidItemLength { length: u32, backtrace: Backtrace },

    #[snafu(display("Missing application context name"))]
    MissingApplicationContextName { backtrace: Backtrace },

    #[snafu(display("Missing presentation context"))]
    MissingPresentationContexts { backtrace: Backtrace },

    #[snafu(display("Missing user information"))]
    MissingUserInformation { backtrace: Backtrace },

    #[snafu(display("Missing abstract syntax"))]
    MissingAbstractSyntax { backtrace: Backtrace },

    #[snafu(display("Missing transfer syntax"))]
    MissingTransferSyntax { backtrace: Backtrace },

    #[snafu(display("Multiple abstract syntaxes were proposed"))]
    MultipleAbstractSyntaxes { backtrace: Backtrace },

    #[snafu(display("Multiple transfer syntaxes were accepted"))]
    MultipleTransferSyntaxesAccepted { backtrace: Backtrace },

    #[snafu(display("Invalid reject source or reason"))]
    InvalidRejectSourceOrReason { backtrace: Backtrace },

    #[snafu(display("Invalid abort source or reason"))]
    InvalidAbortSourceOrReason {
        #[snafu(backtrace)]
        source: ValueError,
    },

    #[snafu(display("Invalid presentation context result reason {}", reason))]
    InvalidPresentationContextResultReason { reason: u8, backtrace: Backtrace },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the error stems from the content of the PDU
    /// rather than from the underlying stream.
    pub fn is_malformed(&self) -> bool {
        !matches!(
            self,
            Error::NoPduAvailable { .. } | Error::ReadPdu { .. } | Error::InvalidMaxPdu { .. }
        )
    }

    /// Whether the PDU type itself was not recognized.
    pub fn is_unrecognized_pdu(&self) -> bool {
        matches!(self, Error::UnknownPduType { .. })
    }

    /// The I/O error kind, if the error came from the underlying stream.
    pub fn io_error_kind(&self) -> Option<ErrorKind> {
        match self {
            Error::ReadPdu { source, .. } | Error::TruncatedPdu { source, .. } => {
                Some(source.kind())
            }
            _ => None,
        }
    }
}

/// Read one full PDU from the given stream.
///
/// In strict mode, PDUs longer than `max_pdu_length` are refused,
/// and so are P-DATA-TF PDUs without any presentation data value.
/// Otherwise, they are admitted with a warning
/// up to the maximum PDU size of the standard.
pub fn read_pdu<R>(reader: &mut R, max_pdu_length: u32, strict: bool) -> Result<Pdu>
where
    R: ?Sized + Read,
{
    ensure!(
        (MINIMUM_PDU_SIZE..=MAXIMUM_PDU_SIZE).contains(&max_pdu_length),
        InvalidMaxPduSnafu { max_pdu_length }
    );

    // A stream which ends before the first byte has no PDU to offer,
    // which is different from one which ends in the middle of a PDU.
    let mut header = [0; PDU_HEADER_SIZE as usize];
    if let Err(e) = reader.read_exact(&mut header[..1]) {
        ensure!(e.kind() != ErrorKind::UnexpectedEof, NoPduAvailableSnafu);
        return Err(e).context(ReadPduSnafu);
    }
    read_exact_or_truncated(reader, &mut header[1..])?;

    let mut head = Item::new();
    let mut cursor = Cursor::new(&header[..]);
    head.read(&mut cursor, "pdu-type", FieldKind::U8)
        .context(DecodeItemSnafu)?;
    head.read(&mut cursor, "reserved", FieldKind::U8)
        .context(DecodeItemSnafu)?;
    head.read(&mut cursor, "pdu-length", FieldKind::U32)
        .context(DecodeItemSnafu)?;
    let pdu_type = head.as_u8("pdu-type").context(DecodeItemSnafu)?;
    let pdu_length = head.as_u32("pdu-length").context(DecodeItemSnafu)?;

    ensure!(
        (0x01..=0x07).contains(&pdu_type),
        UnknownPduTypeSnafu { pdu_type }
    );

    if strict {
        ensure!(
            pdu_length <= max_pdu_length,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length
            }
        );
    } else if pdu_length > max_pdu_length {
        ensure!(
            pdu_length <= MAXIMUM_PDU_SIZE,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length: MAXIMUM_PDU_SIZE
            }
        );
        warn!(
            "Incoming pdu was too large: length {}, maximum is {}",
            pdu_length, max_pdu_length
        );
    }

    let mut body = vec![0; pdu_length as usize];
    read_exact_or_truncated(reader, &mut body)?;

    let pdu = decode_pdu(pdu_type, &body)?;
    if strict {
        ensure!(
            !matches!(&pdu, Pdu::PData { data } if data.is_empty()),
            EmptyPDataSnafu
        );
    }
    Ok(pdu)
}

fn read_exact_or_truncated<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: ?Sized + Read,
{
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(e).context(TruncatedPduSnafu),
        Err(e) => Err(e).context(ReadPduSnafu),
    }
}

/// Decode the body of a PDU of the given type.
pub fn decode_pdu(pdu_type: u8, body: &[u8]) -> Result<Pdu> {
    match pdu_type {
        0x01 => decode_association_rq(body).map(Pdu::AssociationRQ),
        0x02 => decode_association_ac(body).map(Pdu::AssociationAC),
        0x03 => {
            let fields = read_fixed(
                "A-ASSOCIATE-RJ",
                body,
                &[
                    ("reserved", FieldKind::U8),
                    ("result", FieldKind::U8),
                    ("source", FieldKind::U8),
                    ("reason", FieldKind::U8),
                ],
            )?;
            let result = AssociationRJResult::from_code(field_u8(&fields, "result")?)
                .context(InvalidRejectSourceOrReasonSnafu)?;
            let source = AssociationRJSource::from_codes(
                field_u8(&fields, "source")?,
                field_u8(&fields, "reason")?,
            )
            .context(InvalidRejectSourceOrReasonSnafu)?;
            Ok(Pdu::AssociationRJ(AssociationRJ { result, source }))
        }
        0x04 => decode_pdata(body),
        0x05 | 0x06 => {
            read_fixed("A-RELEASE", body, &[("reserved", FieldKind::U32)])?;
            Ok(if pdu_type == 0x05 {
                Pdu::ReleaseRQ
            } else {
                Pdu::ReleaseRP
            })
        }
        0x07 => {
            let fields = read_fixed(
                "A-ABORT",
                body,
                &[
                    ("reserved", FieldKind::U8),
                    ("reserved", FieldKind::U8),
                    ("source", FieldKind::U8),
                    ("reason", FieldKind::U8),
                ],
            )?;
            let abort = AbortRQ::new(field_u8(&fields, "source")?, field_u8(&fields, "reason")?)
                .context(InvalidAbortSourceOrReasonSnafu)?;
            Ok(Pdu::AbortRQ(abort))
        }
        pdu_type => UnknownPduTypeSnafu { pdu_type }.fail(),
    }
}

fn field_u8(item: &Item, name: &'static str) -> Result<u8> {
    item.as_u8(name).context(DecodeItemSnafu)
}

fn field_u16(item: &Item, name: &'static str) -> Result<u16> {
    item.as_u16(name).context(DecodeItemSnafu)
}

/// Read a fixed sequence of fields which must span the whole payload.
fn read_fixed(name: &'static str, payload: &[u8], kinds: &[(&'static str, FieldKind)]) -> Result<Item> {
    let mut cursor = Cursor::new(payload);
    let item = read_fields(&mut cursor, kinds)?;
    ensure!(
        cursor.position() as usize == payload.len(),
        LengthMismatchSnafu {
            name,
            declared: payload.len(),
            consumed: cursor.position() as usize,
        }
    );
    Ok(item)
}

fn read_fields(cursor: &mut Cursor<&[u8]>, kinds: &[(&'static str, FieldKind)]) -> Result<Item> {
    let mut item = Item::new();
    for &(name, kind) in kinds {
        item.read(cursor, name, kind).context(DecodeItemSnafu)?;
    }
    Ok(item)
}

/// Read a length-prefixed byte string.
fn read_prefixed(
    cursor: &mut Cursor<&[u8]>,
    length_name: &'static str,
    name: &'static str,
) -> Result<Vec<u8>> {
    let mut item = Item::new();
    item.read(cursor, length_name, FieldKind::U16)
        .context(DecodeItemSnafu)?;
    let len = field_u16(&item, length_name)?;
    item.read(cursor, name, FieldKind::String(len as usize))
        .context(DecodeItemSnafu)?;
    Ok(item.as_bytes(name).context(DecodeItemSnafu)?.to_vec())
}

/// Read a sequence of `{type u8, reserved u8, length u16, payload}` items
/// spanning the whole input.
fn read_items(bytes: &[u8]) -> Result<Vec<Item>> {
    let mut cursor = Cursor::new(bytes);
    let mut items = vec![];
    while (cursor.position() as usize) < bytes.len() {
        let mut item = read_fields(
            &mut cursor,
            &[
                ("item-type", FieldKind::U8),
                ("reserved", FieldKind::U8),
                ("item-length", FieldKind::U16),
            ],
        )?;
        let length = field_u16(&item, "item-length")?;
        item.read(&mut cursor, "payload", FieldKind::String(length as usize))
            .context(DecodeItemSnafu)?;
        items.push(item);
    }
    Ok(items)
}

fn item_type(item: &Item) -> Result<u8> {
    field_u8(item, "item-type")
}

fn payload(item: &Item) -> Result<&[u8]> {
    item.as_bytes("payload").context(DecodeItemSnafu)
}

fn decode_text(field: &'static str, bytes: &[u8]) -> Result<String> {
    Ok(DefaultCharacterSetCodec
        .decode(bytes)
        .context(DecodeTextSnafu { field })?
        .trim()
        .to_string())
}

fn decode_uid(field: &'static str, bytes: &[u8]) -> Result<String> {
    let text = DefaultCharacterSetCodec
        .decode(bytes)
        .context(DecodeTextSnafu { field })?;
    Ok(trim_uid(text.into()).trim_start().to_string())
}

struct AssociationParts {
    protocol_version: u16,
    called_ae_title: Vec<u8>,
    calling_ae_title: Vec<u8>,
    items: Vec<Item>,
}

fn decode_association_parts(body: &[u8]) -> Result<AssociationParts> {
    let mut cursor = Cursor::new(body);
    let fields = read_fields(
        &mut cursor,
        &[
            ("protocol-version", FieldKind::U16),
            ("reserved", FieldKind::U16),
            ("called-ae-title", FieldKind::String(16)),
            ("calling-ae-title", FieldKind::String(16)),
            ("reserved", FieldKind::String(32)),
        ],
    )?;
    let items = read_items(&body[cursor.position() as usize..])?;
    Ok(AssociationParts {
        protocol_version: field_u16(&fields, "protocol-version")?,
        called_ae_title: fields
            .as_bytes("called-ae-title")
            .context(DecodeItemSnafu)?
            .to_vec(),
        calling_ae_title: fields
            .as_bytes("calling-ae-title")
            .context(DecodeItemSnafu)?
            .to_vec(),
        items,
    })
}

fn decode_association_rq(body: &[u8]) -> Result<AssociationRQ> {
    let parts = decode_association_parts(body)?;

    let mut application_context_name = None;
    let mut presentation_contexts = vec![];
    let mut user_variables = None;
    for item in &parts.items {
        match item_type(item)? {
            0x10 => {
                application_context_name =
                    Some(decode_uid("application-context-name", payload(item)?)?)
            }
            0x20 => presentation_contexts.push(decode_presentation_context_proposed(payload(
                item,
            )?)?),
            0x50 => user_variables = Some(decode_user_variables(payload(item)?)?),
            item_type => {
                return UnexpectedItemSnafu {
                    item_type,
                    within: "A-ASSOCIATE-RQ",
                }
                .fail()
            }
        }
    }

    ensure!(
        !presentation_contexts.is_empty(),
        MissingPresentationContextsSnafu
    );

    Ok(AssociationRQ {
        protocol_version: parts.protocol_version,
        called_ae_title: AeTitle::from_bytes(&parts.called_ae_title).context(InvalidValueSnafu)?,
        calling_ae_title: AeTitle::from_bytes(&parts.calling_ae_title)
            .context(InvalidValueSnafu)?,
        application_context_name: application_context_name
            .context(MissingApplicationContextNameSnafu)?,
        presentation_contexts,
        user_variables: user_variables.context(MissingUserInformationSnafu)?,
    })
}

fn decode_association_ac(body: &[u8]) -> Result<AssociationAC> {
    let parts = decode_association_parts(body)?;

    let mut application_context_name = None;
    let mut presentation_contexts = vec![];
    let mut user_variables = vec![];
    for item in &parts.items {
        match item_type(item)? {
            0x10 => {
                application_context_name =
                    Some(decode_uid("application-context-name", payload(item)?)?)
            }
            0x21 => {
                presentation_contexts.push(decode_presentation_context_result(payload(item)?)?)
            }
            0x50 => user_variables = decode_user_variables(payload(item)?)?,
            item_type => {
                return UnexpectedItemSnafu {
                    item_type,
                    within: "A-ASSOCIATE-AC",
                }
                .fail()
            }
        }
    }

    Ok(AssociationAC {
        protocol_version: parts.protocol_version,
        called_ae_title: decode_text("called-ae-title", &parts.called_ae_title)?,
        calling_ae_title: decode_text("calling-ae-title", &parts.calling_ae_title)?,
        application_context_name: application_context_name
            .context(MissingApplicationContextNameSnafu)?,
        presentation_contexts,
        user_variables,
    })
}

fn decode_presentation_context_proposed(bytes: &[u8]) -> Result<PresentationContextProposed> {
    let mut cursor = Cursor::new(bytes);
    let fields = read_fields(
        &mut cursor,
        &[
            ("presentation-context-id", FieldKind::U8),
            ("reserved", FieldKind::U8),
            ("reserved", FieldKind::U8),
            ("reserved", FieldKind::U8),
        ],
    )?;

    let mut abstract_syntax = None;
    let mut transfer_syntaxes = vec![];
    for item in read_items(&bytes[cursor.position() as usize..])? {
        match item_type(&item)? {
            0x30 => {
                ensure!(abstract_syntax.is_none(), MultipleAbstractSyntaxesSnafu);
                abstract_syntax = Some(decode_uid("abstract-syntax-name", payload(&item)?)?);
            }
            0x40 => transfer_syntaxes.push(decode_uid("transfer-syntax-name", payload(&item)?)?),
            item_type => {
                return UnexpectedItemSnafu {
                    item_type,
                    within: "presentation context",
                }
                .fail()
            }
        }
    }

    ensure!(!transfer_syntaxes.is_empty(), MissingTransferSyntaxSnafu);

    Ok(PresentationContextProposed {
        id: field_u8(&fields, "presentation-context-id")?,
        abstract_syntax: abstract_syntax.context(MissingAbstractSyntaxSnafu)?,
        transfer_syntaxes,
    })
}

fn decode_presentation_context_result(bytes: &[u8]) -> Result<PresentationContextResult> {
    let mut cursor = Cursor::new(bytes);
    let fields = read_fields(
        &mut cursor,
        &[
            ("presentation-context-id", FieldKind::U8),
            ("reserved", FieldKind::U8),
            ("result-reason", FieldKind::U8),
            ("reserved", FieldKind::U8),
        ],
    )?;
    let reason = field_u8(&fields, "result-reason")?;
    let reason = PresentationContextResultReason::from_code(reason)
        .context(InvalidPresentationContextResultReasonSnafu { reason })?;

    let mut transfer_syntax = None;
    for item in read_items(&bytes[cursor.position() as usize..])? {
        match item_type(&item)? {
            0x40 => {
                ensure!(
                    transfer_syntax.is_none(),
                    MultipleTransferSyntaxesAcceptedSnafu
                );
                transfer_syntax = Some(decode_uid("transfer-syntax-name", payload(&item)?)?);
            }
            item_type => {
                return UnexpectedItemSnafu {
                    item_type,
                    within: "presentation context result",
                }
                .fail()
            }
        }
    }

    // the transfer syntax is not significant unless accepted
    let transfer_syntax = if reason == PresentationContextResultReason::Acceptance {
        Some(transfer_syntax.context(MissingTransferSyntaxSnafu)?)
    } else {
        None
    };

    Ok(PresentationContextResult {
        id: field_u8(&fields, "presentation-context-id")?,
        reason,
        transfer_syntax,
    })
}

fn ensure_consumed(name: &'static str, cursor: &Cursor<&[u8]>) -> Result<()> {
    let declared = cursor.get_ref().len();
    let consumed = cursor.position() as usize;
    ensure!(
        consumed == declared,
        LengthMismatchSnafu {
            name,
            declared,
            consumed
        }
    );
    Ok(())
}

fn decode_user_variables(bytes: &[u8]) -> Result<Vec<UserVariableItem>> {
    let mut user_variables = vec![];
    for item in read_items(bytes)? {
        let content = payload(&item)?;
        let mut cursor = Cursor::new(content);
        let var = match item_type(&item)? {
            0x51 => {
                let fields = read_fixed(
                    "maximum length sub-item",
                    content,
                    &[("maximum-length-received", FieldKind::U32)],
                )?;
                UserVariableItem::MaxLength(
                    fields
                        .as_u32("maximum-length-received")
                        .context(DecodeItemSnafu)?,
                )
            }
            0x52 => {
                UserVariableItem::ImplementationClassUID(decode_uid("implementation-class-uid", content)?)
            }
            0x53 => {
                let fields = read_fixed(
                    "asynchronous operations window sub-item",
                    content,
                    &[
                        ("maximum-number-operations-invoked", FieldKind::U16),
                        ("maximum-number-operations-performed", FieldKind::U16),
                    ],
                )?;
                UserVariableItem::AsyncOperationsWindow {
                    max_operations_invoked: field_u16(&fields, "maximum-number-operations-invoked")?,
                    max_operations_performed: field_u16(
                        &fields,
                        "maximum-number-operations-performed",
                    )?,
                }
            }
            0x54 => {
                let uid = read_prefixed(&mut cursor, "uid-length", "sop-class-uid")?;
                let roles = read_fields(
                    &mut cursor,
                    &[("scu-role", FieldKind::U8), ("scp-role", FieldKind::U8)],
                )?;
                ensure_consumed("role selection sub-item", &cursor)?;
                UserVariableItem::RoleSelection {
                    sop_class_uid: decode_uid("sop-class-uid", &uid)?,
                    scu_role: field_u8(&roles, "scu-role")? != 0,
                    scp_role: field_u8(&roles, "scp-role")? != 0,
                }
            }
            0x55 => UserVariableItem::ImplementationVersionName(decode_text(
                "implementation-version-name",
                content,
            )?),
            0x56 => {
                let uid = read_prefixed(&mut cursor, "sop-class-uid-length", "sop-class-uid")?;
                let info = content[cursor.position() as usize..].to_vec();
                UserVariableItem::SopClassExtendedNegotiationSubItem(
                    decode_uid("sop-class-uid", &uid)?,
                    info,
                )
            }
            0x58 => {
                let head = read_fields(
                    &mut cursor,
                    &[
                        ("user-identity-type", FieldKind::U8),
                        ("positive-response-requested", FieldKind::U8),
                    ],
                )?;
                let primary_field =
                    read_prefixed(&mut cursor, "primary-field-length", "primary-field")?;
                let secondary_field =
                    read_prefixed(&mut cursor, "secondary-field-length", "secondary-field")?;
                ensure_consumed("user identity sub-item", &cursor)?;

                let user_identity_type = field_u8(&head, "user-identity-type")?;
                match UserIdentityType::from_code(user_identity_type) {
                    Some(identity_type) => UserVariableItem::UserIdentityItem(UserIdentity::new(
                        field_u8(&head, "positive-response-requested")? == 1,
                        identity_type,
                        primary_field,
                        secondary_field,
                    )),
                    None => {
                        warn!("Unknown User Identity Type code {}", user_identity_type);
                        continue;
                    }
                }
            }
            0x59 => {
                let response =
                    read_prefixed(&mut cursor, "server-response-length", "server-response")?;
                ensure_consumed("user identity response sub-item", &cursor)?;
                UserVariableItem::UserIdentityResponse(response)
            }
            item_type => {
                debug!(
                    "Skipping unknown user information sub-item {:#04x} ({} bytes)",
                    item_type,
                    content.len()
                );
                continue;
            }
        };
        user_variables.push(var);
    }
    Ok(user_variables)
}

fn decode_pdata(body: &[u8]) -> Result<Pdu> {
    let mut cursor = Cursor::new(body);
    let mut values = vec![];
    while (cursor.position() as usize) < body.len() {
        let fields = read_fields(
            &mut cursor,
            &[
                ("item-length", FieldKind::U32),
                ("presentation-context-id", FieldKind::U8),
                ("message-control-header", FieldKind::U8),
            ],
        )?;
        let item_length = fields.as_u32("item-length").context(DecodeItemSnafu)?;
        ensure!(
            item_length >= 2,
            InvalidItemLengthSnafu {
                length: item_length
            }
        );

        let start = cursor.position() as usize;
        let end = start + (item_length as usize - 2);
        ensure!(
            end <= body.len(),
            LengthMismatchSnafu {
                name: "presentation data value",
                declared: item_length as usize - 2,
                consumed: body.len() - start,
            }
        );
        cursor.set_position(end as u64);

        let header = field_u8(&fields, "message-control-header")?;
        values.push(PDataValue {
            presentation_context_id: field_u8(&fields, "presentation-context-id")?,
            value_type: if header & 0x01 > 0 {
                PDataValueType::Command
            } else {
                PDataValueType::Data
            },
            is_last: header & 0x02 > 0,
            data: body[start..end].to_vec(),
        });
    }

    Ok(Pdu::PData { data: values })
}
