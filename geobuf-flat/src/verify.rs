use geobuf_error::{GeobufResult, geobuf_bail, geobuf_err};

use crate::reader::{follow_offset, offset_back, read_bytes, read_scalar};
use crate::schema::{FieldType, TableSchema};

/// Bounds on a verification walk.
///
/// The walk is schema-driven, so a hostile buffer cannot invent structure
/// the schema does not declare; the limits cap what self-referential offsets
/// and oversized vectors can still cost.
#[derive(Debug, Clone)]
pub struct VerifierOptions {
    /// Maximum table nesting depth.
    pub max_depth: usize,
    /// Maximum number of tables visited.
    pub max_tables: usize,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            max_depth: 64,
            max_tables: 1_000_000,
        }
    }
}

/// Validates a buffer against a schema before any reader touches it.
///
/// Structural damage surfaces as a `Format` error and the buffer must not be
/// read afterwards; a missing required field surfaces as `SchemaViolation`.
/// Verification is mandatory for buffers of unknown provenance;
/// self-produced buffers may skip it.
pub struct Verifier<'a> {
    buf: &'a [u8],
    opts: VerifierOptions,
    tables_visited: usize,
}

impl<'a> Verifier<'a> {
    /// A verifier with default limits.
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_options(buf, VerifierOptions::default())
    }

    /// A verifier with caller-tuned limits.
    pub fn with_options(buf: &'a [u8], opts: VerifierOptions) -> Self {
        Self {
            buf,
            opts,
            tables_visited: 0,
        }
    }

    /// Verify that the buffer's root table conforms to `schema`.
    pub fn verify_root(&mut self, schema: &TableSchema) -> GeobufResult<()> {
        let result = self.verify_root_inner(schema);
        if let Err(err) = &result {
            log::debug!("rejected {} byte buffer: {err}", self.buf.len());
        }
        result
    }

    fn verify_root_inner(&mut self, schema: &TableSchema) -> GeobufResult<()> {
        let root = read_scalar::<i32>(self.buf, 0)?;
        let pos = usize::try_from(root)
            .map_err(|_| geobuf_err!(Format: "root offset {} is negative", root))?;
        if pos < 4 || pos >= self.buf.len() {
            geobuf_bail!(
                Format: "root offset {} escapes buffer of {} bytes",
                pos,
                self.buf.len()
            );
        }
        self.verify_table(schema, pos, 0)
    }

    fn verify_table(&mut self, schema: &TableSchema, pos: usize, depth: usize) -> GeobufResult<()> {
        if depth > self.opts.max_depth {
            geobuf_bail!(Format: "table nesting exceeds depth {}", self.opts.max_depth);
        }
        self.tables_visited += 1;
        if self.tables_visited > self.opts.max_tables {
            geobuf_bail!(Format: "buffer references more than {} tables", self.opts.max_tables);
        }

        let soffset = read_scalar::<i32>(self.buf, pos)?;
        let vt_pos = offset_back(pos, soffset).ok_or_else(
            || geobuf_err!(Format: "vtable pointer at {} escapes buffer of {} bytes", pos, self.buf.len()),
        )?;
        let vt_len = read_scalar::<u16>(self.buf, vt_pos)?;
        if vt_len < 4 || vt_len % 2 != 0 {
            geobuf_bail!(Format: "vtable at {} has malformed length {}", vt_pos, vt_len);
        }
        read_bytes(self.buf, vt_pos, usize::from(vt_len))?;
        let table_size = read_scalar::<u16>(self.buf, vt_pos + 2)?;
        if table_size < 4 {
            geobuf_bail!(
                Format: "table at {} is smaller than its vtable pointer",
                pos
            );
        }
        read_bytes(self.buf, pos, usize::from(table_size))?;

        for field in schema.fields() {
            let slot = 4 + 2 * usize::from(field.id);
            let offset = if slot + 2 <= usize::from(vt_len) {
                read_scalar::<u16>(self.buf, vt_pos + slot)?
            } else {
                // The buffer was written before this field existed; readers
                // will fall back to the schema default.
                0
            };
            if offset == 0 {
                if field.required {
                    geobuf_bail!(
                        SchemaViolation: "required field {}.{} is missing",
                        schema.name(),
                        field.name
                    );
                }
                continue;
            }

            let offset = usize::from(offset);
            if offset < 4 || offset + field.ty.inline_size() > usize::from(table_size) {
                geobuf_bail!(
                    Format: "field {}.{} at offset {} escapes its table",
                    schema.name(),
                    field.name,
                    offset
                );
            }
            let field_pos = pos + offset;

            match &field.ty {
                FieldType::Enum { max } => {
                    let value = read_scalar::<u8>(self.buf, field_pos)?;
                    if value > *max {
                        geobuf_bail!(
                            Format: "enum byte {} for field {}.{} is outside 0..={}",
                            value,
                            schema.name(),
                            field.name,
                            max
                        );
                    }
                }
                FieldType::String => {
                    let target = follow_offset(self.buf, field_pos)?;
                    self.verify_string(target)?;
                }
                FieldType::Table(nested) => {
                    let target = follow_offset(self.buf, field_pos)?;
                    self.verify_table(nested, target, depth + 1)?;
                }
                FieldType::ScalarVector { width } => {
                    let target = follow_offset(self.buf, field_pos)?;
                    self.verify_scalar_vector(target, *width)?;
                }
                FieldType::StringVector => {
                    let target = follow_offset(self.buf, field_pos)?;
                    let (count, elements) = self.verify_vector_elements(target)?;
                    for index in 0..count {
                        let string = follow_offset(self.buf, elements + index * 4)?;
                        self.verify_string(string)?;
                    }
                }
                FieldType::TableVector(nested) => {
                    let target = follow_offset(self.buf, field_pos)?;
                    let (count, elements) = self.verify_vector_elements(target)?;
                    for index in 0..count {
                        let table = follow_offset(self.buf, elements + index * 4)?;
                        self.verify_table(nested, table, depth + 1)?;
                    }
                }
                // Scalars, bools, and inline structs are fully covered by
                // the table-region bounds check above.
                _ => {}
            }
        }
        Ok(())
    }

    fn verify_string(&self, pos: usize) -> GeobufResult<()> {
        let len = self.vector_len(pos)?;
        let payload = read_bytes(self.buf, pos + 4, len)?;
        let terminator = read_bytes(self.buf, pos + 4 + len, 1)?;
        if terminator[0] != 0 {
            geobuf_bail!(Format: "string at {} is missing its terminator", pos);
        }
        std::str::from_utf8(payload)?;
        Ok(())
    }

    fn verify_scalar_vector(&self, pos: usize, width: usize) -> GeobufResult<()> {
        let count = self.vector_len(pos)?;
        let payload_len = count.checked_mul(width).ok_or_else(
            || geobuf_err!(Format: "vector at {} overflows the address range", pos),
        )?;
        read_bytes(self.buf, pos + 4, payload_len)?;
        Ok(())
    }

    /// Bounds-check an offset vector's element region and return
    /// `(count, first element position)`.
    fn verify_vector_elements(&self, pos: usize) -> GeobufResult<(usize, usize)> {
        let count = self.vector_len(pos)?;
        let elements_len = count.checked_mul(4).ok_or_else(
            || geobuf_err!(Format: "vector at {} overflows the address range", pos),
        )?;
        read_bytes(self.buf, pos + 4, elements_len)?;
        Ok((count, pos + 4))
    }

    fn vector_len(&self, pos: usize) -> GeobufResult<usize> {
        let len = read_scalar::<u32>(self.buf, pos)?;
        usize::try_from(len)
            .map_err(|_| geobuf_err!(Format: "length {} at {} exceeds the address range", len, pos))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use geobuf_error::GeobufError;
    use rstest::rstest;

    use super::*;
    use crate::builder::FlatBuilder;
    use crate::schema::{DefaultValue, FieldDescriptor, SchemaRef};

    fn station_schema() -> SchemaRef {
        Arc::new(TableSchema::new(
            "station",
            vec![
                FieldDescriptor::new("name", 0, FieldType::String).required(),
                FieldDescriptor::new("kind", 1, FieldType::Enum { max: 2 })
                    .with_default(DefaultValue::UInt(0)),
                FieldDescriptor::new("elevation", 2, FieldType::F64)
                    .with_default(DefaultValue::Float(0.0)),
            ],
        ))
    }

    fn build_station(kind: u8) -> Vec<u8> {
        let mut fbb = FlatBuilder::new();
        let name = fbb.create_string("alpine").unwrap();
        fbb.start_table(station_schema());
        fbb.add_offset(0, name).unwrap();
        fbb.add_enum(1, kind).unwrap();
        fbb.add_scalar(2, 1042.5f64).unwrap();
        let root = fbb.end_table().unwrap();
        fbb.finish(root).unwrap().as_slice().to_vec()
    }

    #[test]
    fn well_formed_buffer_passes() {
        let bytes = build_station(2);
        Verifier::new(&bytes).verify_root(&station_schema()).unwrap();
    }

    #[test]
    fn root_beyond_buffer_is_rejected() {
        let mut bytes = build_station(1);
        let far = u32::try_from(bytes.len() + 8).unwrap();
        bytes[..4].copy_from_slice(&far.to_le_bytes());
        let err = Verifier::new(&bytes)
            .verify_root(&station_schema())
            .unwrap_err();
        assert!(matches!(err, GeobufError::Format(_, _)));
    }

    #[test]
    fn enum_byte_out_of_range_is_rejected() {
        let schema = station_schema();
        let mut bytes = build_station(2);
        // Verification locates the enum byte; corrupt it in place.
        let verified = Verifier::new(&bytes).verify_root(&schema);
        assert!(verified.is_ok());
        let enum_pos = locate_enum_byte(&bytes);
        bytes[enum_pos] = 15;
        let err = Verifier::new(&bytes).verify_root(&schema).unwrap_err();
        assert!(matches!(err, GeobufError::Format(_, _)));
    }

    fn locate_enum_byte(bytes: &[u8]) -> usize {
        let root =
            usize::try_from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])).unwrap();
        let soffset = i32::from_le_bytes([
            bytes[root],
            bytes[root + 1],
            bytes[root + 2],
            bytes[root + 3],
        ]);
        let vt = usize::try_from(i64::try_from(root).unwrap() - i64::from(soffset)).unwrap();
        // Slot for field id 1.
        let offset = u16::from_le_bytes([bytes[vt + 6], bytes[vt + 7]]);
        root + usize::from(offset)
    }

    #[test]
    fn vtable_slot_past_buffer_end_is_rejected() {
        let schema = station_schema();
        let mut bytes = build_station(0);
        let root =
            usize::try_from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])).unwrap();
        let soffset = i32::from_le_bytes([
            bytes[root],
            bytes[root + 1],
            bytes[root + 2],
            bytes[root + 3],
        ]);
        let vt = usize::try_from(i64::try_from(root).unwrap() - i64::from(soffset)).unwrap();
        // Claim the name field sits far past the table's end.
        bytes[vt + 4..vt + 6].copy_from_slice(&u16::MAX.to_le_bytes());
        let err = Verifier::new(&bytes).verify_root(&schema).unwrap_err();
        assert!(matches!(err, GeobufError::Format(_, _)));
    }

    #[test]
    fn missing_required_field_is_a_schema_violation() {
        // Build against a schema where nothing is required, then verify
        // against one that requires the absent string.
        let relaxed = Arc::new(TableSchema::new(
            "station",
            vec![
                FieldDescriptor::new("name", 0, FieldType::String),
                FieldDescriptor::new("kind", 1, FieldType::Enum { max: 2 })
                    .with_default(DefaultValue::UInt(0)),
            ],
        ));
        let mut fbb = FlatBuilder::new();
        fbb.start_table(relaxed);
        fbb.add_enum(1, 1).unwrap();
        let root = fbb.end_table().unwrap();
        let buffer = fbb.finish(root).unwrap();

        let err = Verifier::new(buffer.as_slice())
            .verify_root(&station_schema())
            .unwrap_err();
        assert!(matches!(err, GeobufError::SchemaViolation(_, _)));
    }

    #[rstest]
    #[case(&[])]
    #[case(&[0, 0])]
    #[case(&[0, 0, 0, 0])]
    #[case(&[255, 255, 255, 255])]
    #[case(&[4, 0, 0, 0, 0, 0, 0, 0])]
    fn degenerate_buffers_are_rejected(#[case] bytes: &[u8]) {
        let err = Verifier::new(bytes)
            .verify_root(&station_schema())
            .unwrap_err();
        assert!(matches!(err, GeobufError::Format(_, _)));
    }

    #[test]
    fn deep_nesting_hits_the_depth_limit() {
        let leaf = Arc::new(TableSchema::new(
            "leaf",
            vec![
                FieldDescriptor::new("value", 0, FieldType::I32)
                    .with_default(DefaultValue::Int(0)),
            ],
        ));
        let middle = Arc::new(TableSchema::new(
            "middle",
            vec![FieldDescriptor::new(
                "child",
                0,
                FieldType::Table(Arc::clone(&leaf)),
            )],
        ));
        let outer = Arc::new(TableSchema::new(
            "outer",
            vec![FieldDescriptor::new(
                "child",
                0,
                FieldType::Table(Arc::clone(&middle)),
            )],
        ));

        let mut fbb = FlatBuilder::new();
        fbb.start_table(leaf);
        fbb.add_scalar(0, 7i32).unwrap();
        let leaf_table = fbb.end_table().unwrap();
        fbb.start_table(middle);
        fbb.add_offset(0, leaf_table).unwrap();
        let middle_table = fbb.end_table().unwrap();
        fbb.start_table(Arc::clone(&outer));
        fbb.add_offset(0, middle_table).unwrap();
        let root = fbb.end_table().unwrap();
        let buffer = fbb.finish(root).unwrap();

        // The chain is three tables deep, which default limits accept.
        Verifier::new(buffer.as_slice()).verify_root(&outer).unwrap();

        let tight = VerifierOptions {
            max_depth: 1,
            ..VerifierOptions::default()
        };
        let err = Verifier::with_options(buffer.as_slice(), tight)
            .verify_root(&outer)
            .unwrap_err();
        assert!(matches!(err, GeobufError::Format(_, _)));
    }

    #[test]
    fn runaway_table_count_hits_the_table_limit() {
        let leaf = Arc::new(TableSchema::new(
            "leaf",
            vec![
                FieldDescriptor::new("value", 0, FieldType::I32)
                    .with_default(DefaultValue::Int(0)),
            ],
        ));
        let outer = Arc::new(TableSchema::new(
            "outer",
            vec![FieldDescriptor::new(
                "children",
                0,
                FieldType::TableVector(Arc::clone(&leaf)),
            )],
        ));

        let mut fbb = FlatBuilder::new();
        let mut children = Vec::new();
        for value in 0..8i32 {
            fbb.start_table(Arc::clone(&leaf));
            fbb.add_scalar(0, value).unwrap();
            children.push(fbb.end_table().unwrap());
        }
        let children = fbb.create_offset_vector(&children).unwrap();
        fbb.start_table(Arc::clone(&outer));
        fbb.add_offset(0, children).unwrap();
        let root = fbb.end_table().unwrap();
        let buffer = fbb.finish(root).unwrap();

        Verifier::new(buffer.as_slice()).verify_root(&outer).unwrap();

        let tight = VerifierOptions {
            max_tables: 4,
            ..VerifierOptions::default()
        };
        let err = Verifier::with_options(buffer.as_slice(), tight)
            .verify_root(&outer)
            .unwrap_err();
        assert!(matches!(err, GeobufError::Format(_, _)));
    }
}
