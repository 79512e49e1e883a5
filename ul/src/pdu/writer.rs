//! PDU writer module
//!
//! PDUs are first turned into a tree of [`Item`]s,
//! whose length fields are computed from the encoded payloads,
//! and then written in one go.
use crate::pdu::item::{Field, Item};
use crate::pdu::*;
use dicom_encoding::text::{DefaultCharacterSetCodec, TextCodec};
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not encode text field `{}`", field))]
    EncodeText {
        field: &'static str,
        #[snafu(backtrace)]
        source: dicom_encoding::text::EncodeTextError,
    },

    #[snafu(display("Could not build {} item", name))]
    BuildItem {
        name: &'static str,
        #[snafu(backtrace)]
        source: item::Error,
    },

    #[snafu(display("Could not write PDU"))]
    WriteItem {
        #[snafu(backtrace)]
        source: item::Error,
    },

    #[snafu(display("Accepted presentation context {} has no transfer syntax", id))]
    MissingTransferSyntax { id: u8, backtrace: Backtrace },

    #[snafu(display("Field `{}` is too long ({} bytes)", field, length))]
    FieldTooLong {
        field: &'static str,
        length: usize,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Encode and write a full PDU.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: ?Sized + Write,
{
    encode_pdu(pdu)?.write(writer).context(WriteItemSnafu)
}

/// Build the field container of a full PDU, header included.
pub fn encode_pdu(pdu: &Pdu) -> Result<Item> {
    let (name, body) = match pdu {
        Pdu::AssociationRQ(rq) => ("A-ASSOCIATE-RQ", encode_association_rq(rq)?),
        Pdu::AssociationAC(ac) => ("A-ASSOCIATE-AC", encode_association_ac(ac)?),
        Pdu::AssociationRJ(AssociationRJ { result, source }) => {
            let (source, reason) = source.codes();
            (
                "A-ASSOCIATE-RJ",
                Item::new()
                    .with("reserved", Field::U8(0))
                    .with("result", Field::U8(*result as u8))
                    .with("source", Field::U8(source))
                    .with("reason", Field::U8(reason)),
            )
        }
        Pdu::PData { data } => {
            let values = data
                .iter()
                .map(|pdv| {
                    Ok(Item::new()
                        .with("item-length", Field::U32(pdv_item_length(pdv.data.len())?))
                        .with(
                            "presentation-context-id",
                            Field::U8(pdv.presentation_context_id),
                        )
                        .with("message-control-header", Field::U8(pdv.control_header()))
                        .with("presentation-data-value", Field::String(pdv.data.clone())))
                })
                .collect::<Result<Vec<_>>>()?;
            (
                "P-DATA-TF",
                Item::new().with("presentation-data-value-items", Field::Items(values)),
            )
        }
        Pdu::ReleaseRQ => ("A-RELEASE-RQ", Item::new().with("reserved", Field::U32(0))),
        Pdu::ReleaseRP => ("A-RELEASE-RP", Item::new().with("reserved", Field::U32(0))),
        Pdu::AbortRQ(abort) => (
            "A-ABORT",
            Item::new()
                .with("reserved", Field::U8(0))
                .with("reserved", Field::U8(0))
                .with("source", Field::U8(abort.source()))
                .with("reason", Field::U8(abort.reason())),
        ),
    };

    Item::framed_u32(pdu.pdu_type(), body).context(BuildItemSnafu { name })
}

fn encode_text(field: &'static str, text: &str) -> Result<Vec<u8>> {
    DefaultCharacterSetCodec
        .encode(text)
        .context(EncodeTextSnafu { field })
}

/// Encode a UID, padding odd lengths with a trailing null byte.
fn encode_uid(field: &'static str, uid: &str) -> Result<Vec<u8>> {
    let mut bytes = encode_text(field, uid)?;
    if bytes.len() % 2 == 1 {
        bytes.push(0);
    }
    Ok(bytes)
}

fn length_u16(field: &'static str, bytes: &[u8]) -> Result<Field> {
    u16::try_from(bytes.len())
        .ok()
        .map(Field::U16)
        .context(FieldTooLongSnafu {
            field,
            length: bytes.len(),
        })
}

/// The PDV item length counts the context id and the control header.
fn pdv_item_length(data_length: usize) -> Result<u32> {
    u32::try_from(data_length)
        .ok()
        .and_then(|length| length.checked_add(2))
        .context(FieldTooLongSnafu {
            field: "presentation-data-value",
            length: data_length,
        })
}

fn framed(name: &'static str, item_type: u8, payload: Item) -> Result<Item> {
    Item::framed_u16(item_type, payload).context(BuildItemSnafu { name })
}

fn uid_item(name: &'static str, item_type: u8, uid: &str) -> Result<Item> {
    let bytes = encode_uid(name, uid)?;
    framed(name, item_type, Item::new().with(name, Field::String(bytes)))
}

fn association_header(
    protocol_version: u16,
    called_ae_title: [u8; 16],
    calling_ae_title: [u8; 16],
) -> Item {
    Item::new()
        .with("protocol-version", Field::U16(protocol_version))
        .with("reserved", Field::U16(0))
        .with("called-ae-title", Field::String(called_ae_title.to_vec()))
        .with("calling-ae-title", Field::String(calling_ae_title.to_vec()))
        .with("reserved", Field::String(vec![0; 32]))
}

fn encode_association_rq(rq: &AssociationRQ) -> Result<Item> {
    let mut items = vec![uid_item(
        "application-context-name",
        0x10,
        &rq.application_context_name,
    )?];

    for pc in &rq.presentation_contexts {
        let mut sub_items = vec![uid_item("abstract-syntax-name", 0x30, &pc.abstract_syntax)?];
        for ts in &pc.transfer_syntaxes {
            sub_items.push(uid_item("transfer-syntax-name", 0x40, ts)?);
        }
        let payload = Item::new()
            .with("presentation-context-id", Field::U8(pc.id))
            .with("reserved", Field::U8(0))
            .with("reserved", Field::U8(0))
            .with("reserved", Field::U8(0))
            .with("sub-items", Field::Items(sub_items));
        items.push(framed("presentation context", 0x20, payload)?);
    }

    items.push(encode_user_variables(&rq.user_variables)?);

    Ok(association_header(
        rq.protocol_version,
        rq.called_ae_title.to_bytes(),
        rq.calling_ae_title.to_bytes(),
    )
    .with("variable-items", Field::Items(items)))
}

/// AE titles in the acknowledgement are echoed back as they were,
/// padded or cut to 16 bytes.
fn reserved_ae_title(field: &'static str, value: &str) -> Result<[u8; 16]> {
    let bytes = encode_text(field, value)?;
    let mut out = [b' '; 16];
    let len = bytes.len().min(16);
    out[..len].copy_from_slice(&bytes[..len]);
    Ok(out)
}

fn encode_association_ac(ac: &AssociationAC) -> Result<Item> {
    let mut items = vec![uid_item(
        "application-context-name",
        0x10,
        &ac.application_context_name,
    )?];

    for pc in &ac.presentation_contexts {
        let mut sub_items = vec![];
        if pc.reason == PresentationContextResultReason::Acceptance {
            let ts = pc
                .transfer_syntax
                .as_deref()
                .context(MissingTransferSyntaxSnafu { id: pc.id })?;
            sub_items.push(uid_item("transfer-syntax-name", 0x40, ts)?);
        }
        let payload = Item::new()
            .with("presentation-context-id", Field::U8(pc.id))
            .with("reserved", Field::U8(0))
            .with("result-reason", Field::U8(pc.reason as u8))
            .with("reserved", Field::U8(0))
            .with("sub-items", Field::Items(sub_items));
        items.push(framed("presentation context result", 0x21, payload)?);
    }

    items.push(encode_user_variables(&ac.user_variables)?);

    Ok(association_header(
        ac.protocol_version,
        reserved_ae_title("called-ae-title", &ac.called_ae_title)?,
        reserved_ae_title("calling-ae-title", &ac.calling_ae_title)?,
    )
    .with("variable-items", Field::Items(items)))
}

fn encode_user_variables(user_variables: &[UserVariableItem]) -> Result<Item> {
    let mut sub_items = Vec::with_capacity(user_variables.len());
    for var in user_variables {
        let payload = match var {
            UserVariableItem::MaxLength(len) => {
                Item::new().with("maximum-length-received", Field::U32(*len))
            }
            UserVariableItem::ImplementationClassUID(uid) => Item::new().with(
                "implementation-class-uid",
                Field::String(encode_uid("implementation-class-uid", uid)?),
            ),
            UserVariableItem::AsyncOperationsWindow {
                max_operations_invoked,
                max_operations_performed,
            } => Item::new()
                .with(
                    "maximum-number-operations-invoked",
                    Field::U16(*max_operations_invoked),
                )
                .with(
                    "maximum-number-operations-performed",
                    Field::U16(*max_operations_performed),
                ),
            UserVariableItem::RoleSelection {
                sop_class_uid,
                scu_role,
                scp_role,
            } => {
                let uid = encode_uid("sop-class-uid", sop_class_uid)?;
                Item::new()
                    .with("uid-length", length_u16("sop-class-uid", &uid)?)
                    .with("sop-class-uid", Field::String(uid))
                    .with("scu-role", Field::U8(*scu_role as u8))
                    .with("scp-role", Field::U8(*scp_role as u8))
            }
            UserVariableItem::ImplementationVersionName(name) => Item::new().with(
                "implementation-version-name",
                Field::String(encode_text("implementation-version-name", name)?),
            ),
            UserVariableItem::SopClassExtendedNegotiationSubItem(sop_class_uid, info) => {
                let uid = encode_uid("sop-class-uid", sop_class_uid)?;
                Item::new()
                    .with("sop-class-uid-length", length_u16("sop-class-uid", &uid)?)
                    .with("sop-class-uid", Field::String(uid))
                    .with(
                        "service-class-application-information",
                        Field::String(info.clone()),
                    )
            }
            UserVariableItem::UserIdentityItem(identity) => Item::new()
                .with("user-identity-type", Field::U8(identity.identity_type().code()))
                .with(
                    "positive-response-requested",
                    Field::U8(identity.positive_response_requested() as u8),
                )
                .with(
                    "primary-field-length",
                    length_u16("primary-field", identity.primary_field())?,
                )
                .with(
                    "primary-field",
                    Field::String(identity.primary_field().to_vec()),
                )
                .with(
                    "secondary-field-length",
                    length_u16("secondary-field", identity.secondary_field())?,
                )
                .with(
                    "secondary-field",
                    Field::String(identity.secondary_field().to_vec()),
                ),
            UserVariableItem::UserIdentityResponse(response) => Item::new()
                .with(
                    "server-response-length",
                    length_u16("server-response", response)?,
                )
                .with("server-response", Field::String(response.clone())),
        };
        sub_items.push(framed("user information sub-item", var.item_type(), payload)?);
    }

    framed(
        "user information",
        0x50,
        Item::new().with("user-data", Field::Items(sub_items)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_uids_are_padded_with_null() {
        let item = uid_item("transfer-syntax-name", 0x40, "1.2.840.10008.1.2").unwrap();
        let mut out = Vec::new();
        item.write(&mut out).unwrap();
        assert_eq!(&out[..4], &[0x40, 0x00, 0x00, 18]);
        assert_eq!(&out[4..], b"1.2.840.10008.1.2\0");

        let item = uid_item("transfer-syntax-name", 0x40, "1.2.840.10008.1.2.1").unwrap();
        let mut out = Vec::new();
        item.write(&mut out).unwrap();
        assert_eq!(out.len(), 4 + 20);
        assert_eq!(*out.last().unwrap(), 0);

        let item = uid_item("abstract-syntax-name", 0x30, "1.2.3.45").unwrap();
        assert_eq!(item.as_u16("item-length").unwrap(), 8);
    }

    #[test]
    fn async_operations_window_layout() {
        let item = encode_user_variables(&[UserVariableItem::AsyncOperationsWindow {
            max_operations_invoked: 0x1234,
            max_operations_performed: 0x5678,
        }])
        .unwrap();
        let mut out = Vec::new();
        item.write(&mut out).unwrap();
        assert_eq!(
            out,
            [0x50, 0x00, 0x00, 0x08, 0x53, 0x00, 0x00, 0x04, 0x12, 0x34, 0x56, 0x78]
        );
    }

    #[test]
    fn pdv_length_must_fit_the_item_header() {
        assert_eq!(pdv_item_length(0).unwrap(), 2);
        assert_eq!(pdv_item_length(16_372).unwrap(), 16_374);
        assert!(matches!(
            pdv_item_length(u32::MAX as usize - 1),
            Err(Error::FieldTooLong {
                field: "presentation-data-value",
                ..
            })
        ));
        assert!(matches!(
            pdv_item_length(usize::MAX),
            Err(Error::FieldTooLong { .. })
        ));
    }

    #[test]
    fn accepted_context_needs_transfer_syntax() {
        let ac = AssociationAC {
            protocol_version: 1,
            calling_ae_title: "SCU".to_string(),
            called_ae_title: "SCP".to_string(),
            application_context_name: "1.2.840.10008.3.1.1.1".to_string(),
            presentation_contexts: vec![PresentationContextResult {
                id: 1,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: None,
            }],
            user_variables: vec![],
        };
        let mut out = Vec::new();
        let err = write_pdu(&mut out, &ac.into()).unwrap_err();
        assert!(matches!(err, Error::MissingTransferSyntax { id: 1, .. }));
        assert!(out.is_empty());
    }
}
