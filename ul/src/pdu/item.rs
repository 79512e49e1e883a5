//! Generic field container.
//!
//! Every PDU and PDU item is read into and written out of an [`Item`]:
//! an ordered sequence of named [`Field`]s.
//! The names exist only for structured access by the PDU codec,
//! the wire order is the insertion order.
//! All multi-byte integers are in network byte order (big endian).
use byteordered::byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use dicom_encoding::text::{DefaultCharacterSetCodec, TextCodec};
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use std::io::{Read, Write};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not read field `{}`", name))]
    ReadField {
        name: &'static str,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not write field `{}`", name))]
    WriteField {
        name: &'static str,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Field holds a {} value, but a {} was requested", actual, requested))]
    TypeMismatch {
        requested: &'static str,
        actual: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display("No such field `{}`", name))]
    MissingField {
        name: &'static str,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not decode text of field `{}`", name))]
    DecodeText {
        name: &'static str,
        #[snafu(backtrace)]
        source: dicom_encoding::text::DecodeTextError,
    },

    #[snafu(display("Item payload of {} bytes does not fit in a {}-bit length", size, bits))]
    PayloadTooLong {
        size: usize,
        bits: u8,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The kind of field to read from a stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    /// A byte string of exactly this many bytes
    String(usize),
}

/// A single unit of wire data.
///
/// The variant is fixed once the field is constructed.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Field {
    U8(u8),
    U16(u16),
    U32(u32),
    /// A fixed-length byte string, written as is
    String(Vec<u8>),
    /// A list of nested items, written in order
    Items(Vec<Item>),
}

impl Field {
    fn type_name(&self) -> &'static str {
        match self {
            Field::U8(_) => "u8",
            Field::U16(_) => "u16",
            Field::U32(_) => "u32",
            Field::String(_) => "string",
            Field::Items(_) => "item list",
        }
    }

    fn mismatch(&self, requested: &'static str) -> Error {
        TypeMismatchSnafu {
            requested,
            actual: self.type_name(),
        }
        .build()
    }

    pub fn as_u8(&self) -> Result<u8> {
        match self {
            Field::U8(v) => Ok(*v),
            other => Err(other.mismatch("u8")),
        }
    }

    pub fn as_u16(&self) -> Result<u16> {
        match self {
            Field::U16(v) => Ok(*v),
            other => Err(other.mismatch("u16")),
        }
    }

    pub fn as_u32(&self) -> Result<u32> {
        match self {
            Field::U32(v) => Ok(*v),
            other => Err(other.mismatch("u32")),
        }
    }

    /// Obtain the raw bytes of a string field.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Field::String(v) => Ok(v),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_items(&self) -> Result<&[Item]> {
        match self {
            Field::Items(v) => Ok(v),
            other => Err(other.mismatch("item list")),
        }
    }

    /// The number of bytes this field takes on the wire.
    pub fn size(&self) -> usize {
        match self {
            Field::U8(_) => 1,
            Field::U16(_) => 2,
            Field::U32(_) => 4,
            Field::String(v) => v.len(),
            Field::Items(items) => items.iter().map(Item::size).sum(),
        }
    }

    fn write_to<W>(&self, writer: &mut W, name: &'static str) -> Result<()>
    where
        W: ?Sized + Write,
    {
        match self {
            Field::U8(v) => writer.write_u8(*v).context(WriteFieldSnafu { name }),
            Field::U16(v) => writer
                .write_u16::<BigEndian>(*v)
                .context(WriteFieldSnafu { name }),
            Field::U32(v) => writer
                .write_u32::<BigEndian>(*v)
                .context(WriteFieldSnafu { name }),
            Field::String(v) => writer.write_all(v).context(WriteFieldSnafu { name }),
            Field::Items(items) => {
                for item in items {
                    item.write(writer)?;
                }
                Ok(())
            }
        }
    }
}

/// An ordered sequence of named fields.
///
/// Fields can only be appended.
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash)]
pub struct Item {
    fields: Vec<(&'static str, Field)>,
}

impl Item {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, builder style.
    pub fn with(mut self, name: &'static str, field: Field) -> Self {
        self.push(name, field);
        self
    }

    /// Append a field.
    pub fn push(&mut self, name: &'static str, field: Field) {
        self.fields.push((name, field));
    }

    /// Read one field of the given kind from the stream and append it.
    ///
    /// Fails if the stream ends before the field is complete.
    pub fn read<R>(&mut self, reader: &mut R, name: &'static str, kind: FieldKind) -> Result<()>
    where
        R: ?Sized + Read,
    {
        let field = match kind {
            FieldKind::U8 => Field::U8(reader.read_u8().context(ReadFieldSnafu { name })?),
            FieldKind::U16 => Field::U16(
                reader
                    .read_u16::<BigEndian>()
                    .context(ReadFieldSnafu { name })?,
            ),
            FieldKind::U32 => Field::U32(
                reader
                    .read_u32::<BigEndian>()
                    .context(ReadFieldSnafu { name })?,
            ),
            FieldKind::String(len) => {
                let mut buf = vec![0; len];
                reader
                    .read_exact(&mut buf)
                    .context(ReadFieldSnafu { name })?;
                Field::String(buf)
            }
        };
        self.fields.push((name, field));
        Ok(())
    }

    /// Write all fields in insertion order.
    pub fn write<W>(&self, writer: &mut W) -> Result<()>
    where
        W: ?Sized + Write,
    {
        for (name, field) in &self.fields {
            field.write_to(writer, name)?;
        }
        Ok(())
    }

    /// The exact number of bytes written by [`write`](Self::write).
    pub fn size(&self) -> usize {
        self.fields.iter().map(|(_, f)| f.size()).sum()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &Field)> {
        self.fields.iter().map(|(name, field)| (*name, field))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Retrieve the first field with the given name.
    pub fn get(&self, name: &'static str) -> Result<&Field> {
        self.fields
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, f)| f)
            .context(MissingFieldSnafu { name })
    }

    pub fn as_u8(&self, name: &'static str) -> Result<u8> {
        self.get(name)?.as_u8()
    }

    pub fn as_u16(&self, name: &'static str) -> Result<u16> {
        self.get(name)?.as_u16()
    }

    pub fn as_u32(&self, name: &'static str) -> Result<u32> {
        self.get(name)?.as_u32()
    }

    pub fn as_bytes(&self, name: &'static str) -> Result<&[u8]> {
        self.get(name)?.as_bytes()
    }

    /// Decode a string field as ISO 646 text.
    pub fn as_string(&self, name: &'static str) -> Result<String> {
        let bytes = self.as_bytes(name)?;
        DefaultCharacterSetCodec
            .decode(bytes)
            .context(DecodeTextSnafu { name })
    }

    pub fn as_items(&self, name: &'static str) -> Result<&[Item]> {
        self.get(name)?.as_items()
    }

    /// Wrap a payload into an item with a 16-bit length header:
    /// `{type u8, reserved u8, length u16, payload}`.
    pub fn framed_u16(item_type: u8, payload: Item) -> Result<Item> {
        let size = payload.size();
        let length = u16::try_from(size)
            .ok()
            .context(PayloadTooLongSnafu { size, bits: 16_u8 })?;
        Ok(Item::new()
            .with("item-type", Field::U8(item_type))
            .with("reserved", Field::U8(0))
            .with("item-length", Field::U16(length))
            .with("payload", Field::Items(vec![payload])))
    }

    /// Wrap a payload into a PDU with a 32-bit length header:
    /// `{type u8, reserved u8, length u32, payload}`.
    pub fn framed_u32(pdu_type: u8, payload: Item) -> Result<Item> {
        let size = payload.size();
        let length = u32::try_from(size)
            .ok()
            .context(PayloadTooLongSnafu { size, bits: 32_u8 })?;
        Ok(Item::new()
            .with("pdu-type", Field::U8(pdu_type))
            .with("reserved", Field::U8(0))
            .with("pdu-length", Field::U32(length))
            .with("payload", Field::Items(vec![payload])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::matches;
    use std::io::Cursor;

    #[test]
    fn reads_integers_in_network_order() {
        let mut cursor = Cursor::new(vec![0x01, 0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF, b'a', b'b']);
        let mut item = Item::new();
        item.read(&mut cursor, "a", FieldKind::U8).unwrap();
        item.read(&mut cursor, "b", FieldKind::U16).unwrap();
        item.read(&mut cursor, "c", FieldKind::U32).unwrap();
        item.read(&mut cursor, "d", FieldKind::String(2)).unwrap();

        assert_eq!(item.as_u8("a").unwrap(), 0x01);
        assert_eq!(item.as_u16("b").unwrap(), 0x1234);
        assert_eq!(item.as_u32("c").unwrap(), 0xDEAD_BEEF);
        assert_eq!(item.as_string("d").unwrap(), "ab");
        assert_eq!(item.size(), 9);

        let mut out = Vec::new();
        item.write(&mut out).unwrap();
        assert_eq!(out, cursor.into_inner());
    }

    #[test]
    fn exhausted_stream_is_an_error() {
        let mut cursor = Cursor::new(vec![0x00, 0x01, 0x02]);
        let mut item = Item::new();
        let err = item.read(&mut cursor, "length", FieldKind::U32).unwrap_err();
        assert!(matches!(err, Error::ReadField { name: "length", .. }));
        assert!(item.is_empty());

        let mut cursor = Cursor::new(b"short".to_vec());
        assert!(item
            .read(&mut cursor, "title", FieldKind::String(16))
            .is_err());
    }

    #[test]
    fn wrong_accessor_is_a_type_mismatch() {
        let item = Item::new()
            .with("type", Field::U8(7))
            .with("name", Field::String(b"x".to_vec()));

        assert!(matches!(
            item.as_u16("type"),
            Err(Error::TypeMismatch {
                requested: "u16",
                actual: "u8",
                ..
            })
        ));
        assert!(matches!(
            item.as_items("name"),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            item.as_u8("nope"),
            Err(Error::MissingField { name: "nope", .. })
        ));
    }

    #[test]
    fn framed_items_carry_payload_length() {
        let payload = Item::new()
            .with("uid", Field::String(b"1.2.840.10008.1.2\0".to_vec()))
            .with("flag", Field::U8(1));
        let framed = Item::framed_u16(0x40, payload).unwrap();
        assert_eq!(framed.as_u16("item-length").unwrap(), 19);
        assert_eq!(framed.size(), 23);

        let mut out = Vec::new();
        framed.write(&mut out).unwrap();
        assert_eq!(&out[..4], &[0x40, 0x00, 0x00, 19]);
        assert_eq!(out.len(), 23);

        let too_long = Item::new().with("blob", Field::String(vec![0; 70_000]));
        assert!(matches!(
            Item::framed_u16(0x10, too_long),
            Err(Error::PayloadTooLong { bits: 16, .. })
        ));
    }
}
