use geobuf_error::{GeobufResult, geobuf_bail, geobuf_err};
use geobuf_flat::WireScalar;

use crate::column::{Column, ColumnType};

/// A typed attribute value destined for the header's opaque payload.
///
/// Variable-size kinds borrow from the caller on encode and from the payload
/// on decode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeValue<'a> {
    /// Signed 8-bit integer.
    Byte(i8),
    /// Unsigned 8-bit integer.
    UByte(u8),
    /// Boolean.
    Bool(bool),
    /// Signed 16-bit integer.
    Short(i16),
    /// Unsigned 16-bit integer.
    UShort(u16),
    /// Signed 32-bit integer.
    Int(i32),
    /// Unsigned 32-bit integer.
    UInt(u32),
    /// Signed 64-bit integer.
    Long(i64),
    /// Unsigned 64-bit integer.
    ULong(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 text.
    String(&'a str),
    /// Structured text, uninterpreted.
    Json(&'a str),
    /// A date or timestamp, as text.
    DateTime(&'a str),
    /// Raw bytes.
    Binary(&'a [u8]),
}

impl AttributeValue<'_> {
    /// The column type this value encodes as.
    pub fn column_type(&self) -> ColumnType {
        match self {
            AttributeValue::Byte(_) => ColumnType::Byte,
            AttributeValue::UByte(_) => ColumnType::UByte,
            AttributeValue::Bool(_) => ColumnType::Bool,
            AttributeValue::Short(_) => ColumnType::Short,
            AttributeValue::UShort(_) => ColumnType::UShort,
            AttributeValue::Int(_) => ColumnType::Int,
            AttributeValue::UInt(_) => ColumnType::UInt,
            AttributeValue::Long(_) => ColumnType::Long,
            AttributeValue::ULong(_) => ColumnType::ULong,
            AttributeValue::Float(_) => ColumnType::Float,
            AttributeValue::Double(_) => ColumnType::Double,
            AttributeValue::String(_) => ColumnType::String,
            AttributeValue::Json(_) => ColumnType::Json,
            AttributeValue::DateTime(_) => ColumnType::DateTime,
            AttributeValue::Binary(_) => ColumnType::Binary,
        }
    }
}

/// Packs attribute values back to back against a column schema.
///
/// Each entry is the little-endian `u16` index of its column followed by the
/// value at the column's declared width; the variable-size kinds carry a
/// `u32` byte length instead. The resulting payload travels as the header's
/// opaque `attributes` vector and is meaningless without the column list it
/// was packed against.
pub struct AttributeEncoder<'c> {
    columns: &'c [Column],
    out: Vec<u8>,
}

impl<'c> AttributeEncoder<'c> {
    /// An encoder packing against `columns`.
    pub fn new(columns: &'c [Column]) -> Self {
        Self {
            columns,
            out: Vec::new(),
        }
    }

    /// Append one value for the column at `column`.
    pub fn append(&mut self, column: usize, value: AttributeValue<'_>) -> GeobufResult<()> {
        let descriptor = self
            .columns
            .get(column)
            .ok_or_else(|| geobuf_err!(OutOfBounds: column, 0, self.columns.len()))?;
        if value.column_type() != descriptor.ty {
            geobuf_bail!(
                SchemaViolation: "column {} holds {:?} values, got {:?}",
                descriptor.name,
                descriptor.ty,
                value.column_type()
            );
        }
        let index = u16::try_from(column)
            .map_err(|_| geobuf_err!(CapacityExceeded: "column index {} exceeds the u16 range", column))?;
        self.out.extend_from_slice(&index.to_le_bytes());
        match value {
            AttributeValue::Byte(v) => self.out.extend_from_slice(&v.to_le_bytes()),
            AttributeValue::UByte(v) => self.out.push(v),
            AttributeValue::Bool(v) => self.out.push(u8::from(v)),
            AttributeValue::Short(v) => self.out.extend_from_slice(&v.to_le_bytes()),
            AttributeValue::UShort(v) => self.out.extend_from_slice(&v.to_le_bytes()),
            AttributeValue::Int(v) => self.out.extend_from_slice(&v.to_le_bytes()),
            AttributeValue::UInt(v) => self.out.extend_from_slice(&v.to_le_bytes()),
            AttributeValue::Long(v) => self.out.extend_from_slice(&v.to_le_bytes()),
            AttributeValue::ULong(v) => self.out.extend_from_slice(&v.to_le_bytes()),
            AttributeValue::Float(v) => self.out.extend_from_slice(&v.to_le_bytes()),
            AttributeValue::Double(v) => self.out.extend_from_slice(&v.to_le_bytes()),
            AttributeValue::String(v) | AttributeValue::Json(v) | AttributeValue::DateTime(v) => {
                self.append_var(v.as_bytes())?;
            }
            AttributeValue::Binary(v) => self.append_var(v)?,
        }
        Ok(())
    }

    fn append_var(&mut self, bytes: &[u8]) -> GeobufResult<()> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| geobuf_err!(CapacityExceeded: "attribute value exceeds the u32 range"))?;
        self.out.extend_from_slice(&len.to_le_bytes());
        self.out.extend_from_slice(bytes);
        Ok(())
    }

    /// The packed payload.
    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}

/// Iterates `(column index, value)` pairs out of a packed payload.
///
/// Damage fails closed: the first truncated entry or dangling column index
/// yields a `Format` error and the iterator fuses.
pub struct AttributeDecoder<'a> {
    columns: &'a [Column],
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> AttributeDecoder<'a> {
    /// A decoder over `bytes`, interpreted against `columns`.
    pub fn new(columns: &'a [Column], bytes: &'a [u8]) -> Self {
        Self {
            columns,
            bytes,
            pos: 0,
        }
    }

    fn take(&mut self, len: usize) -> GeobufResult<&'a [u8]> {
        let taken = self
            .pos
            .checked_add(len)
            .and_then(|end| self.bytes.get(self.pos..end))
            .ok_or_else(
                || geobuf_err!(Format: "attribute payload truncated at byte {}", self.pos),
            )?;
        self.pos += len;
        Ok(taken)
    }

    fn take_var(&mut self) -> GeobufResult<&'a [u8]> {
        let len = u32::read_le(self.take(4)?);
        let len = usize::try_from(len)
            .map_err(|_| geobuf_err!(Format: "attribute length {} exceeds the address range", len))?;
        self.take(len)
    }

    fn take_str(&mut self) -> GeobufResult<&'a str> {
        Ok(std::str::from_utf8(self.take_var()?)?)
    }

    fn next_entry(&mut self) -> GeobufResult<(u16, AttributeValue<'a>)> {
        let index = u16::read_le(self.take(2)?);
        let column = self.columns.get(usize::from(index)).ok_or_else(
            || geobuf_err!(Format: "attribute column index {} has no column", index),
        )?;
        let value = match column.ty {
            ColumnType::Byte => AttributeValue::Byte(i8::read_le(self.take(1)?)),
            ColumnType::UByte => AttributeValue::UByte(u8::read_le(self.take(1)?)),
            ColumnType::Bool => AttributeValue::Bool(bool::read_le(self.take(1)?)),
            ColumnType::Short => AttributeValue::Short(i16::read_le(self.take(2)?)),
            ColumnType::UShort => AttributeValue::UShort(u16::read_le(self.take(2)?)),
            ColumnType::Int => AttributeValue::Int(i32::read_le(self.take(4)?)),
            ColumnType::UInt => AttributeValue::UInt(u32::read_le(self.take(4)?)),
            ColumnType::Long => AttributeValue::Long(i64::read_le(self.take(8)?)),
            ColumnType::ULong => AttributeValue::ULong(u64::read_le(self.take(8)?)),
            ColumnType::Float => AttributeValue::Float(f32::read_le(self.take(4)?)),
            ColumnType::Double => AttributeValue::Double(f64::read_le(self.take(8)?)),
            ColumnType::String => AttributeValue::String(self.take_str()?),
            ColumnType::Json => AttributeValue::Json(self.take_str()?),
            ColumnType::DateTime => AttributeValue::DateTime(self.take_str()?),
            ColumnType::Binary => AttributeValue::Binary(self.take_var()?),
        };
        Ok((index, value))
    }
}

impl<'a> Iterator for AttributeDecoder<'a> {
    type Item = GeobufResult<(u16, AttributeValue<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let entry = self.next_entry();
        if entry.is_err() {
            self.pos = self.bytes.len();
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use geobuf_error::GeobufError;

    use super::*;

    fn schema() -> Vec<Column> {
        vec![
            Column::new("height", ColumnType::Double),
            Column::new("storeys", ColumnType::UByte),
            Column::new("owner", ColumnType::String),
            Column::new("listed", ColumnType::Bool),
            Column::new("tags", ColumnType::Json),
            Column::new("fingerprint", ColumnType::Binary),
            Column::new("built", ColumnType::DateTime),
            Column::new("delta", ColumnType::Short),
            Column::new("population", ColumnType::ULong),
            Column::new("ratio", ColumnType::Float),
        ]
    }

    #[test]
    fn every_kind_round_trips() {
        let columns = schema();
        let mut encoder = AttributeEncoder::new(&columns);
        encoder.append(0, AttributeValue::Double(13.7)).unwrap();
        encoder.append(1, AttributeValue::UByte(4)).unwrap();
        encoder
            .append(2, AttributeValue::String("municipality"))
            .unwrap();
        encoder.append(3, AttributeValue::Bool(true)).unwrap();
        encoder
            .append(4, AttributeValue::Json("{\"roof\": \"flat\"}"))
            .unwrap();
        encoder
            .append(5, AttributeValue::Binary(&[0xde, 0xad]))
            .unwrap();
        encoder
            .append(6, AttributeValue::DateTime("1931-05-01"))
            .unwrap();
        encoder.append(7, AttributeValue::Short(-12)).unwrap();
        encoder
            .append(8, AttributeValue::ULong(8_900_000_000))
            .unwrap();
        encoder.append(9, AttributeValue::Float(0.5)).unwrap();
        let payload = encoder.finish();

        let decoded: Vec<_> = AttributeDecoder::new(&columns, &payload)
            .collect::<GeobufResult<_>>()
            .unwrap();
        assert_eq!(
            decoded,
            vec![
                (0, AttributeValue::Double(13.7)),
                (1, AttributeValue::UByte(4)),
                (2, AttributeValue::String("municipality")),
                (3, AttributeValue::Bool(true)),
                (4, AttributeValue::Json("{\"roof\": \"flat\"}")),
                (5, AttributeValue::Binary(&[0xde, 0xad])),
                (6, AttributeValue::DateTime("1931-05-01")),
                (7, AttributeValue::Short(-12)),
                (8, AttributeValue::ULong(8_900_000_000)),
                (9, AttributeValue::Float(0.5)),
            ]
        );
    }

    #[test]
    fn type_mismatch_is_a_schema_violation() {
        let columns = schema();
        let mut encoder = AttributeEncoder::new(&columns);
        let err = encoder.append(0, AttributeValue::Int(3)).unwrap_err();
        assert!(matches!(err, GeobufError::SchemaViolation(_, _)));
    }

    #[test]
    fn unknown_column_is_out_of_bounds() {
        let columns = schema();
        let mut encoder = AttributeEncoder::new(&columns);
        let err = encoder.append(99, AttributeValue::Int(3)).unwrap_err();
        assert!(matches!(err, GeobufError::OutOfBounds(99, _, _, _)));
    }

    #[test]
    fn truncated_payload_fails_closed() {
        let columns = schema();
        let mut encoder = AttributeEncoder::new(&columns);
        encoder.append(0, AttributeValue::Double(2.5)).unwrap();
        let mut payload = encoder.finish();
        payload.truncate(payload.len() - 3);

        let mut decoder = AttributeDecoder::new(&columns, &payload);
        assert!(matches!(
            decoder.next(),
            Some(Err(GeobufError::Format(_, _)))
        ));
        // The decoder fuses after damage.
        assert!(decoder.next().is_none());
    }

    #[test]
    fn dangling_column_index_is_rejected() {
        let columns = schema();
        // Hand-pack an entry for a column index past the schema.
        let mut payload = Vec::new();
        payload.extend_from_slice(&42u16.to_le_bytes());
        payload.push(1);

        let mut decoder = AttributeDecoder::new(&columns, &payload);
        assert!(matches!(
            decoder.next(),
            Some(Err(GeobufError::Format(_, _)))
        ));
    }
}
