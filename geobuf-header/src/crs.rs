use std::sync::{Arc, LazyLock};

use geobuf_error::GeobufResult;
use geobuf_flat::{
    DefaultValue, FieldDescriptor, FieldType, FlatBuilder, Offset, ReadFlat, SchemaRef,
    TableRef, TableSchema, WriteFlat,
};

mod fid {
    pub const AUTHORITY: u16 = 0;
    pub const VERSION: u16 = 1;
    pub const CODE: u16 = 2;
    pub const CODE_STRING: u16 = 3;
}

static REFERENCE_SYSTEM_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(TableSchema::new(
        "ReferenceSystem",
        vec![
            FieldDescriptor::new("authority", fid::AUTHORITY, FieldType::String),
            FieldDescriptor::new("version", fid::VERSION, FieldType::I32)
                .with_default(DefaultValue::Int(0)),
            FieldDescriptor::new("code", fid::CODE, FieldType::I32)
                .with_default(DefaultValue::Int(0)),
            FieldDescriptor::new("code_string", fid::CODE_STRING, FieldType::String),
        ],
    ))
});

/// Process-wide schema for [`ReferenceSystem`] tables.
pub fn reference_system_schema() -> SchemaRef {
    Arc::clone(&REFERENCE_SYSTEM_SCHEMA)
}

/// The coordinate reference system of a dataset, e.g. `EPSG/0/28992`.
///
/// `version` and `code` use `0` as a sentinel for "not defined" and
/// "unknown" respectively; the codec stores the identification only and does
/// no CRS math.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReferenceSystem {
    /// Issuing authority, e.g. `EPSG`.
    pub authority: Option<String>,
    /// Authority-specific version, `0` when not defined.
    pub version: i32,
    /// Numeric code within the authority, `0` when unknown.
    pub code: i32,
    /// Textual code for authorities without numeric ones.
    pub code_string: Option<String>,
}

impl ReferenceSystem {
    /// A reference system from an authority and numeric code.
    pub fn new(authority: impl Into<String>, version: i32, code: i32) -> Self {
        Self {
            authority: Some(authority.into()),
            version,
            code,
            code_string: None,
        }
    }
}

impl WriteFlat for ReferenceSystem {
    fn write_flat(&self, fbb: &mut FlatBuilder) -> GeobufResult<Offset> {
        let authority = self
            .authority
            .as_deref()
            .map(|value| fbb.create_string(value))
            .transpose()?;
        let code_string = self
            .code_string
            .as_deref()
            .map(|value| fbb.create_string(value))
            .transpose()?;

        fbb.start_table(reference_system_schema());
        if let Some(authority) = authority {
            fbb.add_offset(fid::AUTHORITY, authority)?;
        }
        fbb.add_scalar(fid::VERSION, self.version)?;
        fbb.add_scalar(fid::CODE, self.code)?;
        if let Some(code_string) = code_string {
            fbb.add_offset(fid::CODE_STRING, code_string)?;
        }
        fbb.end_table()
    }
}

impl ReadFlat for ReferenceSystem {
    fn schema() -> SchemaRef {
        reference_system_schema()
    }

    fn read_flat(table: &TableRef<'_>) -> GeobufResult<Self> {
        let view = ReferenceSystemRef::new(*table);
        Ok(Self {
            authority: view.authority()?.map(str::to_owned),
            version: view.version()?,
            code: view.code()?,
            code_string: view.code_string()?.map(str::to_owned),
        })
    }
}

/// Zero-copy view of a reference system table.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceSystemRef<'a> {
    table: TableRef<'a>,
}

impl<'a> ReferenceSystemRef<'a> {
    /// Wrap a table view known to hold a reference system.
    pub fn new(table: TableRef<'a>) -> Self {
        Self { table }
    }

    /// The underlying table view.
    pub fn as_table(&self) -> &TableRef<'a> {
        &self.table
    }

    /// The issuing authority, if any.
    pub fn authority(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::AUTHORITY)
    }

    /// The authority-specific version, `0` when not defined.
    pub fn version(&self) -> GeobufResult<i32> {
        self.table.scalar(fid::VERSION, 0)
    }

    /// The numeric code, `0` when unknown.
    pub fn code(&self) -> GeobufResult<i32> {
        self.table.scalar(fid::CODE, 0)
    }

    /// The textual code, if any.
    pub fn code_string(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::CODE_STRING)
    }
}

#[cfg(test)]
mod tests {
    use geobuf_flat::ReadFlat;

    use super::*;

    #[test]
    fn round_trip() {
        let crs = ReferenceSystem::new("EPSG", 0, 28992);

        let mut fbb = FlatBuilder::new();
        let root = crs.write_flat(&mut fbb).unwrap();
        let buffer = fbb.finish(root).unwrap();

        let decoded = ReferenceSystem::read_flat_bytes(buffer.as_slice()).unwrap();
        assert_eq!(decoded, crs);
    }

    #[test]
    fn sentinels_survive_an_empty_table() {
        let mut fbb = FlatBuilder::new();
        fbb.start_table(reference_system_schema());
        let root = fbb.end_table().unwrap();
        let buffer = fbb.finish(root).unwrap();

        let decoded = ReferenceSystem::read_flat_bytes(buffer.as_slice()).unwrap();
        assert_eq!(decoded.authority, None);
        // 0 means "not defined"/"unknown", not a literal version or code.
        assert_eq!(decoded.version, 0);
        assert_eq!(decoded.code, 0);
    }
}
