use std::sync::{Arc, LazyLock};

use num_enum::{IntoPrimitive, TryFromPrimitive};

use geobuf_error::{GeobufResult, geobuf_err};
use geobuf_flat::{
    DefaultValue, FieldDescriptor, FieldType, FlatBuilder, Offset, ReadFlat, SchemaRef,
    TableRef, TableSchema, TableVectorRef, WriteFlat,
};

/// Value type of an attribute column.
///
/// The discriminants are the wire encoding; anything outside `0..=14` is
/// invalid on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ColumnType {
    /// Signed 8-bit integer.
    Byte,
    /// Unsigned 8-bit integer.
    UByte,
    /// Boolean.
    Bool,
    /// Signed 16-bit integer.
    Short,
    /// Unsigned 16-bit integer.
    UShort,
    /// Signed 32-bit integer.
    Int,
    /// Unsigned 32-bit integer.
    UInt,
    /// Signed 64-bit integer.
    Long,
    /// Unsigned 64-bit integer.
    ULong,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// UTF-8 text.
    String,
    /// Structured text, stored uninterpreted.
    Json,
    /// A date or timestamp, stored as text.
    DateTime,
    /// Raw bytes.
    Binary,
}

impl ColumnType {
    /// Highest legal wire discriminant.
    pub const MAX: u8 = ColumnType::Binary as u8;

    /// The value's fixed byte width, or `None` for the variable-size kinds.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            ColumnType::Byte | ColumnType::UByte | ColumnType::Bool => Some(1),
            ColumnType::Short | ColumnType::UShort => Some(2),
            ColumnType::Int | ColumnType::UInt | ColumnType::Float => Some(4),
            ColumnType::Long | ColumnType::ULong | ColumnType::Double => Some(8),
            ColumnType::String | ColumnType::Json | ColumnType::DateTime | ColumnType::Binary => {
                None
            }
        }
    }
}

mod fid {
    pub const NAME: u16 = 0;
    pub const TYPE: u16 = 1;
    pub const TITLE: u16 = 2;
    pub const DESCRIPTION: u16 = 3;
    pub const PRECISION: u16 = 4;
    pub const SCALE: u16 = 5;
    pub const NULLABLE: u16 = 6;
    pub const UNIQUE: u16 = 7;
    pub const PRIMARY_KEY: u16 = 8;
    pub const METADATA: u16 = 9;
}

static COLUMN_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(TableSchema::new(
        "Column",
        vec![
            FieldDescriptor::new("name", fid::NAME, FieldType::String).required(),
            FieldDescriptor::new(
                "type",
                fid::TYPE,
                FieldType::Enum {
                    max: ColumnType::MAX,
                },
            )
            .with_default(DefaultValue::UInt(0)),
            FieldDescriptor::new("title", fid::TITLE, FieldType::String),
            FieldDescriptor::new("description", fid::DESCRIPTION, FieldType::String),
            FieldDescriptor::new("precision", fid::PRECISION, FieldType::I32)
                .with_default(DefaultValue::Int(-1)),
            FieldDescriptor::new("scale", fid::SCALE, FieldType::I32)
                .with_default(DefaultValue::Int(-1)),
            FieldDescriptor::new("nullable", fid::NULLABLE, FieldType::Bool)
                .with_default(DefaultValue::Bool(true)),
            FieldDescriptor::new("unique", fid::UNIQUE, FieldType::Bool)
                .with_default(DefaultValue::Bool(false)),
            FieldDescriptor::new("primary_key", fid::PRIMARY_KEY, FieldType::Bool)
                .with_default(DefaultValue::Bool(false)),
            FieldDescriptor::new("metadata", fid::METADATA, FieldType::String),
        ],
    ))
});

/// Process-wide schema for [`Column`] tables.
pub fn column_schema() -> SchemaRef {
    Arc::clone(&COLUMN_SCHEMA)
}

/// One attribute column of a dataset.
///
/// `precision` and `scale` use `-1` as a sentinel for "unknown"; that value
/// travels the wire by not travelling at all, since it equals the schema
/// default.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Column {
    /// Column name. The only required field.
    pub name: String,
    /// Value type of the column.
    pub ty: ColumnType,
    /// Human-readable title.
    pub title: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Decimal precision, `-1` when unknown.
    pub precision: i32,
    /// Decimal scale, `-1` when unknown.
    pub scale: i32,
    /// Whether values may be null.
    pub nullable: bool,
    /// Whether values are unique.
    pub unique: bool,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
    /// Free-form metadata.
    pub metadata: Option<String>,
}

impl Column {
    /// A column with the given name and type; everything else starts at its
    /// schema default.
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            title: None,
            description: None,
            precision: -1,
            scale: -1,
            nullable: true,
            unique: false,
            primary_key: false,
            metadata: None,
        }
    }
}

impl WriteFlat for Column {
    fn write_flat(&self, fbb: &mut FlatBuilder) -> GeobufResult<Offset> {
        let name = fbb.create_string(&self.name)?;
        let title = self
            .title
            .as_deref()
            .map(|value| fbb.create_string(value))
            .transpose()?;
        let description = self
            .description
            .as_deref()
            .map(|value| fbb.create_string(value))
            .transpose()?;
        let metadata = self
            .metadata
            .as_deref()
            .map(|value| fbb.create_string(value))
            .transpose()?;

        fbb.start_table(column_schema());
        fbb.add_offset(fid::NAME, name)?;
        fbb.add_enum(fid::TYPE, self.ty.into())?;
        if let Some(title) = title {
            fbb.add_offset(fid::TITLE, title)?;
        }
        if let Some(description) = description {
            fbb.add_offset(fid::DESCRIPTION, description)?;
        }
        fbb.add_scalar(fid::PRECISION, self.precision)?;
        fbb.add_scalar(fid::SCALE, self.scale)?;
        fbb.add_scalar(fid::NULLABLE, self.nullable)?;
        fbb.add_scalar(fid::UNIQUE, self.unique)?;
        fbb.add_scalar(fid::PRIMARY_KEY, self.primary_key)?;
        if let Some(metadata) = metadata {
            fbb.add_offset(fid::METADATA, metadata)?;
        }
        fbb.end_table()
    }
}

impl ReadFlat for Column {
    fn schema() -> SchemaRef {
        column_schema()
    }

    fn read_flat(table: &TableRef<'_>) -> GeobufResult<Self> {
        let view = ColumnRef::new(*table);
        Ok(Self {
            name: view.name()?.to_owned(),
            ty: view.ty()?,
            title: view.title()?.map(str::to_owned),
            description: view.description()?.map(str::to_owned),
            precision: view.precision()?,
            scale: view.scale()?,
            nullable: view.nullable()?,
            unique: view.unique()?,
            primary_key: view.primary_key()?,
            metadata: view.metadata()?.map(str::to_owned),
        })
    }
}

/// Zero-copy view of a column table.
#[derive(Debug, Clone, Copy)]
pub struct ColumnRef<'a> {
    table: TableRef<'a>,
}

impl<'a> ColumnRef<'a> {
    /// Wrap a table view known to hold a column.
    pub fn new(table: TableRef<'a>) -> Self {
        Self { table }
    }

    /// The underlying table view.
    pub fn as_table(&self) -> &TableRef<'a> {
        &self.table
    }

    /// The column name.
    pub fn name(&self) -> GeobufResult<&'a str> {
        self.table.string(fid::NAME)?.ok_or_else(
            || geobuf_err!(SchemaViolation: "required field Column.name is missing"),
        )
    }

    /// The column's value type.
    pub fn ty(&self) -> GeobufResult<ColumnType> {
        let raw = self.table.scalar::<u8>(fid::TYPE, 0)?;
        ColumnType::try_from(raw)
            .map_err(|_| geobuf_err!(Format: "column type byte {} is outside 0..={}", raw, ColumnType::MAX))
    }

    /// The human-readable title, if any.
    pub fn title(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::TITLE)
    }

    /// The human-readable description, if any.
    pub fn description(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::DESCRIPTION)
    }

    /// Decimal precision, `-1` when unknown.
    pub fn precision(&self) -> GeobufResult<i32> {
        self.table.scalar(fid::PRECISION, -1)
    }

    /// Decimal scale, `-1` when unknown.
    pub fn scale(&self) -> GeobufResult<i32> {
        self.table.scalar(fid::SCALE, -1)
    }

    /// Whether values may be null.
    pub fn nullable(&self) -> GeobufResult<bool> {
        self.table.scalar(fid::NULLABLE, true)
    }

    /// Whether values are unique.
    pub fn unique(&self) -> GeobufResult<bool> {
        self.table.scalar(fid::UNIQUE, false)
    }

    /// Whether the column is part of the primary key.
    pub fn primary_key(&self) -> GeobufResult<bool> {
        self.table.scalar(fid::PRIMARY_KEY, false)
    }

    /// Free-form metadata, if any.
    pub fn metadata(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::METADATA)
    }
}

/// Zero-copy view of a vector of columns.
#[derive(Debug, Clone, Copy)]
pub struct ColumnVecRef<'a> {
    tables: TableVectorRef<'a>,
}

impl<'a> ColumnVecRef<'a> {
    pub(crate) fn new(tables: TableVectorRef<'a>) -> Self {
        Self { tables }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether there are no columns.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// View one column.
    pub fn get(&self, index: usize) -> GeobufResult<ColumnRef<'a>> {
        self.tables.get(index).map(ColumnRef::new)
    }

    /// Iterate the columns in place.
    pub fn iter(&self) -> impl Iterator<Item = GeobufResult<ColumnRef<'a>>> {
        self.tables.iter().map(|table| table.map(ColumnRef::new))
    }
}

#[cfg(test)]
mod tests {
    use geobuf_flat::ReadFlat;

    use super::*;

    #[test]
    fn column_type_wire_values() {
        assert_eq!(u8::from(ColumnType::Byte), 0);
        assert_eq!(u8::from(ColumnType::Double), 10);
        assert_eq!(u8::from(ColumnType::Binary), 14);
        assert_eq!(ColumnType::try_from(11).unwrap(), ColumnType::String);
        assert!(ColumnType::try_from(15).is_err());
    }

    #[test]
    fn fixed_widths() {
        assert_eq!(ColumnType::Bool.fixed_width(), Some(1));
        assert_eq!(ColumnType::UShort.fixed_width(), Some(2));
        assert_eq!(ColumnType::Float.fixed_width(), Some(4));
        assert_eq!(ColumnType::ULong.fixed_width(), Some(8));
        assert_eq!(ColumnType::Json.fixed_width(), None);
    }

    #[test]
    fn schema_ids_are_dense_and_stable() {
        let schema = column_schema();
        assert_eq!(schema.len(), 10);
        assert_eq!(schema.field(fid::NAME).unwrap().name, "name");
        assert!(schema.field(fid::NAME).unwrap().required);
        assert_eq!(schema.field(fid::METADATA).unwrap().name, "metadata");
    }

    #[test]
    fn new_column_starts_at_schema_defaults() {
        let column = Column::new("height", ColumnType::Float);
        assert_eq!(column.precision, -1);
        assert_eq!(column.scale, -1);
        assert!(column.nullable);
        assert!(!column.unique);
        assert!(!column.primary_key);
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let mut column = Column::new("owner", ColumnType::String);
        column.title = Some("Owner".to_owned());
        column.description = Some("Registered owner of the parcel".to_owned());
        column.precision = 12;
        column.nullable = false;
        column.unique = true;
        column.metadata = Some("{\"source\": \"cadastre\"}".to_owned());

        let mut fbb = FlatBuilder::new();
        let root = column.write_flat(&mut fbb).unwrap();
        let buffer = fbb.finish(root).unwrap();

        let decoded = Column::read_flat_bytes(buffer.as_slice()).unwrap();
        assert_eq!(decoded, column);
    }
}
