//! Serialization of command sets and data sets.
//!
//! Command sets are always encoded in _Implicit VR Little Endian_.
//! Data sets follow the transfer syntax of their presentation context,
//! which is resolved through the transfer syntax registry.
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_encoding::TransferSyntax;
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::{entries, TransferSyntaxRegistry};
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};

use crate::pdu::trim_uid;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Unsupported transfer syntax {}", uid))]
    UnsupportedTransferSyntax { uid: String, backtrace: Backtrace },

    #[snafu(display("Could not serialize data set"))]
    Serialize {
        #[snafu(source(from(dicom_object::WriteError, Box::new)))]
        source: Box<dicom_object::WriteError>,
    },

    #[snafu(display("Could not deserialize data set"))]
    Deserialize {
        #[snafu(source(from(dicom_object::ReadError, Box::new)))]
        source: Box<dicom_object::ReadError>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Conversion between data sets and their encoded form
/// in a given transfer syntax.
pub trait DataSetCodec {
    /// The in-memory data set type.
    type DataSet;

    fn serialize(&self, data_set: &Self::DataSet, transfer_syntax_uid: &str) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8], transfer_syntax_uid: &str) -> Result<Self::DataSet>;
}

/// A data set codec for in-memory DICOM objects,
/// backed by the main transfer syntax registry.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DicomObjectCodec;

fn with_transfer_syntax<T>(
    transfer_syntax_uid: &str,
    f: impl FnOnce(&TransferSyntax) -> Result<T>,
) -> Result<T> {
    let uid = trim_uid(transfer_syntax_uid.into());
    let registry = TransferSyntaxRegistry;
    let ts = registry
        .get(&uid)
        .filter(|ts| !ts.is_unsupported())
        .context(UnsupportedTransferSyntaxSnafu {
            uid: uid.to_string(),
        })?;
    f(ts)
}

impl DataSetCodec for DicomObjectCodec {
    type DataSet = InMemDicomObject;

    fn serialize(&self, data_set: &InMemDicomObject, transfer_syntax_uid: &str) -> Result<Vec<u8>> {
        with_transfer_syntax(transfer_syntax_uid, |ts| {
            let mut bytes = Vec::new();
            data_set
                .write_dataset_with_ts(&mut bytes, ts)
                .context(SerializeSnafu)?;
            Ok(bytes)
        })
    }

    fn deserialize(&self, bytes: &[u8], transfer_syntax_uid: &str) -> Result<InMemDicomObject> {
        with_transfer_syntax(transfer_syntax_uid, |ts| {
            InMemDicomObject::read_dataset_with_ts(bytes, ts).context(DeserializeSnafu)
        })
    }
}

/// Encode a command set in _Implicit VR Little Endian_.
pub fn write_command(command: &InMemDicomObject) -> Result<Vec<u8>> {
    let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
    let mut bytes = Vec::new();
    command
        .write_dataset_with_ts(&mut bytes, &ts)
        .context(SerializeSnafu)?;
    Ok(bytes)
}

/// Decode a command set in _Implicit VR Little Endian_.
pub fn read_command(bytes: &[u8]) -> Result<InMemDicomObject> {
    let ts = entries::IMPLICIT_VR_LITTLE_ENDIAN.erased();
    InMemDicomObject::read_dataset_with_ts(bytes, &ts).context(DeserializeSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::{dicom_value, DataElement, VR};
    use dicom_dictionary_std::{tags, uids};
    use matches::matches;

    #[test]
    fn command_round_trip() {
        let command = InMemDicomObject::command_from_element_iter([
            DataElement::new(
                tags::AFFECTED_SOP_CLASS_UID,
                VR::UI,
                dicom_value!(Str, uids::VERIFICATION),
            ),
            DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [0x0030])),
            DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [7])),
            DataElement::new(
                tags::COMMAND_DATA_SET_TYPE,
                VR::US,
                dicom_value!(U16, [0x0101]),
            ),
        ]);
        let bytes = write_command(&command).unwrap();
        let decoded = read_command(&bytes).unwrap();
        assert_eq!(
            decoded
                .element(tags::MESSAGE_ID)
                .unwrap()
                .to_int::<u16>()
                .unwrap(),
            7
        );
        assert_eq!(
            decoded
                .element(tags::COMMAND_FIELD)
                .unwrap()
                .to_int::<u16>()
                .unwrap(),
            0x0030
        );
    }

    #[test]
    fn data_set_in_explicit_vr() {
        let obj = InMemDicomObject::from_element_iter([DataElement::new(
            tags::PATIENT_NAME,
            VR::PN,
            dicom_value!(Str, "Doe^John"),
        )]);
        let codec = DicomObjectCodec;
        // padded UIDs are admitted
        let bytes = codec.serialize(&obj, "1.2.840.10008.1.2.1\0").unwrap();
        let decoded = codec.deserialize(&bytes, "1.2.840.10008.1.2.1").unwrap();
        assert_eq!(
            decoded
                .element(tags::PATIENT_NAME)
                .unwrap()
                .to_str()
                .unwrap(),
            "Doe^John"
        );
    }

    #[test]
    fn unknown_transfer_syntax_is_refused() {
        let codec = DicomObjectCodec;
        assert!(matches!(
            codec.serialize(&InMemDicomObject::new_empty(), "1.2.3.4.5"),
            Err(Error::UnsupportedTransferSyntax { .. })
        ));
    }
}
