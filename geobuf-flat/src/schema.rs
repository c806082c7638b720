use std::sync::Arc;

use geobuf_error::geobuf_panic;

/// Shared handle to an immutable table schema.
pub type SchemaRef = Arc<TableSchema>;

/// Fixed size and alignment of an inline struct field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructLayout {
    /// Total byte size, members laid out in schema order at natural
    /// alignment with no extra padding.
    pub size: usize,
    /// Start alignment: the widest member width.
    pub align: usize,
}

/// Wire-level type of a table field.
#[derive(Debug, Clone)]
pub enum FieldType {
    /// Signed 8-bit scalar.
    I8,
    /// Unsigned 8-bit scalar.
    U8,
    /// Single byte, zero or one.
    Bool,
    /// Signed 16-bit scalar.
    I16,
    /// Unsigned 16-bit scalar.
    U16,
    /// Signed 32-bit scalar.
    I32,
    /// Unsigned 32-bit scalar.
    U32,
    /// Signed 64-bit scalar.
    I64,
    /// Unsigned 64-bit scalar.
    U64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Single byte constrained to `0..=max`.
    Enum {
        /// Highest legal discriminant.
        max: u8,
    },
    /// Fixed-layout value stored inline in the table.
    Struct(StructLayout),
    /// Offset to a length-prefixed, NUL-terminated UTF-8 string.
    String,
    /// Offset to a nested table.
    Table(SchemaRef),
    /// Offset to a vector of fixed-width scalars of the given byte width.
    ScalarVector {
        /// Element width in bytes.
        width: usize,
    },
    /// Offset to a vector of string offsets.
    StringVector,
    /// Offset to a vector of table offsets.
    TableVector(SchemaRef),
}

impl FieldType {
    /// Bytes the field occupies inline in its table.
    pub fn inline_size(&self) -> usize {
        match self {
            FieldType::I8 | FieldType::U8 | FieldType::Bool | FieldType::Enum { .. } => 1,
            FieldType::I16 | FieldType::U16 => 2,
            FieldType::I32 | FieldType::U32 | FieldType::F32 => 4,
            FieldType::I64 | FieldType::U64 | FieldType::F64 => 8,
            FieldType::Struct(layout) => layout.size,
            // Out-of-line data is referenced through a 32-bit offset.
            FieldType::String
            | FieldType::Table(_)
            | FieldType::ScalarVector { .. }
            | FieldType::StringVector
            | FieldType::TableVector(_) => 4,
        }
    }

    /// Natural alignment of the inline portion.
    pub fn inline_align(&self) -> usize {
        match self {
            FieldType::Struct(layout) => layout.align,
            other => other.inline_size(),
        }
    }

    /// Whether the field is stored as an offset to out-of-line data.
    pub fn is_offset(&self) -> bool {
        matches!(
            self,
            FieldType::String
                | FieldType::Table(_)
                | FieldType::ScalarVector { .. }
                | FieldType::StringVector
                | FieldType::TableVector(_)
        )
    }

    /// Whether the field is a plain fixed-width scalar (bool included).
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            FieldType::I8
                | FieldType::U8
                | FieldType::Bool
                | FieldType::I16
                | FieldType::U16
                | FieldType::I32
                | FieldType::U32
                | FieldType::I64
                | FieldType::U64
                | FieldType::F32
                | FieldType::F64
        )
    }
}

/// Value an absent field reads as.
///
/// Offsets and structs have no scalar default; their absence reads as `None`
/// at the accessor level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    /// Default for signed integer fields.
    Int(i64),
    /// Default for unsigned integer and enum fields.
    UInt(u64),
    /// Default for float fields.
    Float(f64),
    /// Default for bool fields.
    Bool(bool),
    /// No inline default; the field simply reads as absent.
    Absent,
}

/// One field of a table: stable id, wire type, default, required flag.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Field name, for diagnostics.
    pub name: &'static str,
    /// Stable slot index. Ids are dense per table and, once published, are
    /// never renumbered or repurposed with a different type.
    pub id: u16,
    /// Wire type.
    pub ty: FieldType,
    /// Value the field reads as when absent; values equal to it are never
    /// persisted.
    pub default: DefaultValue,
    /// Whether a writer must set the field.
    pub required: bool,
}

impl FieldDescriptor {
    /// An optional field with an absent default.
    pub fn new(name: &'static str, id: u16, ty: FieldType) -> Self {
        Self {
            name,
            id,
            ty,
            default: DefaultValue::Absent,
            required: false,
        }
    }

    /// Attach an inline default.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = default;
        self
    }

    /// Mark the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// An immutable, ordered description of a table's fields.
#[derive(Debug)]
pub struct TableSchema {
    name: &'static str,
    fields: Arc<[FieldDescriptor]>,
}

impl TableSchema {
    /// Build a schema from fields with dense ids `0..n`.
    ///
    /// ## Panics
    ///
    /// Panics if ids are not dense and monotonically assigned; schemas are
    /// defined once at startup and a gap is a programming error.
    pub fn new(name: &'static str, fields: Vec<FieldDescriptor>) -> Self {
        for (index, field) in fields.iter().enumerate() {
            if usize::from(field.id) != index {
                geobuf_panic!(
                    "schema {}: field {} has id {}, expected dense id {}",
                    name,
                    field.name,
                    field.id,
                    index
                );
            }
        }
        Self {
            name,
            fields: fields.into(),
        }
    }

    /// The schema's name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The declared fields, in id order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up a field by id.
    pub fn field(&self, id: u16) -> Option<&FieldDescriptor> {
        self.fields.get(usize::from(id))
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema declares no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_ids_accepted() {
        let schema = TableSchema::new(
            "point",
            vec![
                FieldDescriptor::new("x", 0, FieldType::F64),
                FieldDescriptor::new("y", 1, FieldType::F64),
            ],
        );
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.field(1).unwrap().name, "y");
        assert!(schema.field(2).is_none());
    }

    #[test]
    #[should_panic(expected = "expected dense id")]
    fn gap_in_ids_panics() {
        TableSchema::new(
            "broken",
            vec![
                FieldDescriptor::new("a", 0, FieldType::I32),
                FieldDescriptor::new("b", 2, FieldType::I32),
            ],
        );
    }

    #[test]
    fn inline_sizes() {
        assert_eq!(FieldType::Bool.inline_size(), 1);
        assert_eq!(FieldType::U16.inline_size(), 2);
        assert_eq!(FieldType::String.inline_size(), 4);
        assert_eq!(FieldType::F64.inline_size(), 8);
        let layout = StructLayout { size: 24, align: 8 };
        assert_eq!(FieldType::Struct(layout).inline_size(), 24);
        assert_eq!(FieldType::Struct(layout).inline_align(), 8);
        assert!(FieldType::String.is_offset());
        assert!(!FieldType::Struct(layout).is_offset());
    }
}
