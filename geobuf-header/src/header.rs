use std::sync::{Arc, LazyLock};

use itertools::Itertools;

use geobuf_error::GeobufResult;
use geobuf_flat::{
    DefaultValue, FieldDescriptor, FieldType, FlatBuffer, FlatBuilder, FlatRoot, Offset, ReadFlat,
    SchemaRef, StructLayout, TableRef, TableSchema, WireStruct, WriteFlat,
};

use crate::column::{Column, ColumnVecRef, column_schema};
use crate::crs::{ReferenceSystem, ReferenceSystemRef, reference_system_schema};
use crate::geometry::{GeographicalExtent, Transform};

mod fid {
    pub const TRANSFORM: u16 = 0;
    pub const COLUMNS: u16 = 1;
    pub const FEATURES_COUNT: u16 = 2;
    pub const GEOGRAPHICAL_EXTENT: u16 = 3;
    pub const REFERENCE_SYSTEM: u16 = 4;
    pub const IDENTIFIER: u16 = 5;
    pub const REFERENCE_DATE: u16 = 6;
    pub const TITLE: u16 = 7;
    pub const POC_CONTACT_NAME: u16 = 8;
    pub const POC_CONTACT_TYPE: u16 = 9;
    pub const POC_ROLE: u16 = 10;
    pub const POC_PHONE: u16 = 11;
    pub const POC_EMAIL: u16 = 12;
    pub const POC_WEBSITE: u16 = 13;
    pub const POC_ADDRESS_THOROUGHFARE_NUMBER: u16 = 14;
    pub const POC_ADDRESS_THOROUGHFARE_NAME: u16 = 15;
    pub const POC_ADDRESS_LOCALITY: u16 = 16;
    pub const POC_ADDRESS_POSTCODE: u16 = 17;
    pub const POC_ADDRESS_CITY: u16 = 18;
    pub const POC_ADDRESS_STATE: u16 = 19;
    pub const POC_ADDRESS_COUNTRY: u16 = 20;
    pub const ATTRIBUTES: u16 = 21;
}

static HEADER_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    let string_fields = [
        ("identifier", fid::IDENTIFIER),
        ("reference_date", fid::REFERENCE_DATE),
        ("title", fid::TITLE),
        ("poc_contact_name", fid::POC_CONTACT_NAME),
        ("poc_contact_type", fid::POC_CONTACT_TYPE),
        ("poc_role", fid::POC_ROLE),
        ("poc_phone", fid::POC_PHONE),
        ("poc_email", fid::POC_EMAIL),
        ("poc_website", fid::POC_WEBSITE),
        (
            "poc_address_thoroughfare_number",
            fid::POC_ADDRESS_THOROUGHFARE_NUMBER,
        ),
        (
            "poc_address_thoroughfare_name",
            fid::POC_ADDRESS_THOROUGHFARE_NAME,
        ),
        ("poc_address_locality", fid::POC_ADDRESS_LOCALITY),
        ("poc_address_postcode", fid::POC_ADDRESS_POSTCODE),
        ("poc_address_city", fid::POC_ADDRESS_CITY),
        ("poc_address_state", fid::POC_ADDRESS_STATE),
        ("poc_address_country", fid::POC_ADDRESS_COUNTRY),
    ];

    let mut fields = vec![
        FieldDescriptor::new(
            "transform",
            fid::TRANSFORM,
            FieldType::Struct(StructLayout {
                size: Transform::SIZE,
                align: Transform::ALIGN,
            }),
        ),
        FieldDescriptor::new(
            "columns",
            fid::COLUMNS,
            FieldType::TableVector(column_schema()),
        ),
        FieldDescriptor::new("features_count", fid::FEATURES_COUNT, FieldType::U64)
            .with_default(DefaultValue::UInt(0)),
        FieldDescriptor::new(
            "geographical_extent",
            fid::GEOGRAPHICAL_EXTENT,
            FieldType::Struct(StructLayout {
                size: GeographicalExtent::SIZE,
                align: GeographicalExtent::ALIGN,
            }),
        ),
        FieldDescriptor::new(
            "reference_system",
            fid::REFERENCE_SYSTEM,
            FieldType::Table(reference_system_schema()),
        ),
    ];
    fields.extend(
        string_fields
            .into_iter()
            .map(|(name, id)| FieldDescriptor::new(name, id, FieldType::String)),
    );
    fields.push(FieldDescriptor::new(
        "attributes",
        fid::ATTRIBUTES,
        FieldType::ScalarVector { width: 1 },
    ));

    Arc::new(TableSchema::new("Header", fields))
});

/// Process-wide schema for [`Header`] tables.
pub fn header_schema() -> SchemaRef {
    Arc::clone(&HEADER_SCHEMA)
}

/// The self-describing header of a columnar feature dataset: the coordinate
/// transform and reference system, the attribute column schema, dataset
/// provenance text, and an opaque attribute payload.
///
/// `features_count` of `0` means the count is unknown, not an empty dataset;
/// see [`HeaderRef::known_features_count`].
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Header {
    /// Mapping from stored to world coordinates.
    pub transform: Option<Transform>,
    /// The attribute column schema.
    pub columns: Vec<Column>,
    /// Number of features in the dataset, `0` when unknown.
    pub features_count: u64,
    /// Bounding box of the dataset in world coordinates.
    pub geographical_extent: Option<GeographicalExtent>,
    /// Coordinate reference system identification.
    pub reference_system: Option<ReferenceSystem>,
    /// Dataset identifier.
    pub identifier: Option<String>,
    /// Reference date of the data.
    pub reference_date: Option<String>,
    /// Dataset title.
    pub title: Option<String>,
    /// Point-of-contact name.
    pub poc_contact_name: Option<String>,
    /// Point-of-contact type.
    pub poc_contact_type: Option<String>,
    /// Point-of-contact role.
    pub poc_role: Option<String>,
    /// Point-of-contact phone number.
    pub poc_phone: Option<String>,
    /// Point-of-contact email address.
    pub poc_email: Option<String>,
    /// Point-of-contact website.
    pub poc_website: Option<String>,
    /// Street number of the point of contact.
    pub poc_address_thoroughfare_number: Option<String>,
    /// Street name of the point of contact.
    pub poc_address_thoroughfare_name: Option<String>,
    /// Locality of the point of contact.
    pub poc_address_locality: Option<String>,
    /// Postcode of the point of contact.
    pub poc_address_postcode: Option<String>,
    /// City of the point of contact.
    pub poc_address_city: Option<String>,
    /// State or province of the point of contact.
    pub poc_address_state: Option<String>,
    /// Country of the point of contact.
    pub poc_address_country: Option<String>,
    /// Application-specific attribute payload, uninterpreted by the codec.
    pub attributes: Option<Vec<u8>>,
}

impl FlatRoot for Header {}

impl WriteFlat for Header {
    fn write_flat(&self, fbb: &mut FlatBuilder) -> GeobufResult<Offset> {
        let columns = if self.columns.is_empty() {
            None
        } else {
            let offsets: Vec<Offset> = self
                .columns
                .iter()
                .map(|column| column.write_flat(fbb))
                .try_collect()?;
            Some(fbb.create_offset_vector(&offsets)?)
        };
        let reference_system = self
            .reference_system
            .as_ref()
            .map(|crs| crs.write_flat(fbb))
            .transpose()?;

        let strings: Vec<(u16, Option<Offset>)> = self
            .string_fields()
            .into_iter()
            .map(|(id, value)| {
                value
                    .map(|value| fbb.create_string(value))
                    .transpose()
                    .map(|offset| (id, offset))
            })
            .try_collect()?;

        let attributes = self
            .attributes
            .as_deref()
            .map(|payload| fbb.create_byte_vector(payload))
            .transpose()?;

        fbb.start_table(header_schema());
        if let Some(transform) = &self.transform {
            fbb.add_struct(fid::TRANSFORM, transform)?;
        }
        if let Some(columns) = columns {
            fbb.add_offset(fid::COLUMNS, columns)?;
        }
        fbb.add_scalar(fid::FEATURES_COUNT, self.features_count)?;
        if let Some(extent) = &self.geographical_extent {
            fbb.add_struct(fid::GEOGRAPHICAL_EXTENT, extent)?;
        }
        if let Some(reference_system) = reference_system {
            fbb.add_offset(fid::REFERENCE_SYSTEM, reference_system)?;
        }
        for (id, offset) in strings {
            if let Some(offset) = offset {
                fbb.add_offset(id, offset)?;
            }
        }
        if let Some(attributes) = attributes {
            fbb.add_offset(fid::ATTRIBUTES, attributes)?;
        }
        fbb.end_table()
    }
}

impl Header {
    fn string_fields(&self) -> [(u16, Option<&str>); 16] {
        [
            (fid::IDENTIFIER, self.identifier.as_deref()),
            (fid::REFERENCE_DATE, self.reference_date.as_deref()),
            (fid::TITLE, self.title.as_deref()),
            (fid::POC_CONTACT_NAME, self.poc_contact_name.as_deref()),
            (fid::POC_CONTACT_TYPE, self.poc_contact_type.as_deref()),
            (fid::POC_ROLE, self.poc_role.as_deref()),
            (fid::POC_PHONE, self.poc_phone.as_deref()),
            (fid::POC_EMAIL, self.poc_email.as_deref()),
            (fid::POC_WEBSITE, self.poc_website.as_deref()),
            (
                fid::POC_ADDRESS_THOROUGHFARE_NUMBER,
                self.poc_address_thoroughfare_number.as_deref(),
            ),
            (
                fid::POC_ADDRESS_THOROUGHFARE_NAME,
                self.poc_address_thoroughfare_name.as_deref(),
            ),
            (
                fid::POC_ADDRESS_LOCALITY,
                self.poc_address_locality.as_deref(),
            ),
            (
                fid::POC_ADDRESS_POSTCODE,
                self.poc_address_postcode.as_deref(),
            ),
            (fid::POC_ADDRESS_CITY, self.poc_address_city.as_deref()),
            (fid::POC_ADDRESS_STATE, self.poc_address_state.as_deref()),
            (
                fid::POC_ADDRESS_COUNTRY,
                self.poc_address_country.as_deref(),
            ),
        ]
    }
}

impl ReadFlat for Header {
    fn schema() -> SchemaRef {
        header_schema()
    }

    fn read_flat(table: &TableRef<'_>) -> GeobufResult<Self> {
        let view = HeaderRef::new(*table);
        let columns = match view.columns()? {
            None => Vec::new(),
            Some(columns) => columns
                .iter()
                .map(|column| column.and_then(|c| Column::read_flat(c.as_table())))
                .try_collect()?,
        };
        Ok(Self {
            transform: view.transform()?,
            columns,
            features_count: view.features_count()?,
            geographical_extent: view.geographical_extent()?,
            reference_system: view
                .reference_system()?
                .map(|crs| ReferenceSystem::read_flat(crs.as_table()))
                .transpose()?,
            identifier: view.identifier()?.map(str::to_owned),
            reference_date: view.reference_date()?.map(str::to_owned),
            title: view.title()?.map(str::to_owned),
            poc_contact_name: view.poc_contact_name()?.map(str::to_owned),
            poc_contact_type: view.poc_contact_type()?.map(str::to_owned),
            poc_role: view.poc_role()?.map(str::to_owned),
            poc_phone: view.poc_phone()?.map(str::to_owned),
            poc_email: view.poc_email()?.map(str::to_owned),
            poc_website: view.poc_website()?.map(str::to_owned),
            poc_address_thoroughfare_number: view
                .poc_address_thoroughfare_number()?
                .map(str::to_owned),
            poc_address_thoroughfare_name: view
                .poc_address_thoroughfare_name()?
                .map(str::to_owned),
            poc_address_locality: view.poc_address_locality()?.map(str::to_owned),
            poc_address_postcode: view.poc_address_postcode()?.map(str::to_owned),
            poc_address_city: view.poc_address_city()?.map(str::to_owned),
            poc_address_state: view.poc_address_state()?.map(str::to_owned),
            poc_address_country: view.poc_address_country()?.map(str::to_owned),
            attributes: view.attributes()?.map(<[u8]>::to_vec),
        })
    }
}

/// Zero-copy view of a header table.
#[derive(Debug, Clone, Copy)]
pub struct HeaderRef<'a> {
    table: TableRef<'a>,
}

impl<'a> HeaderRef<'a> {
    /// Wrap a table view known to hold a header.
    pub fn new(table: TableRef<'a>) -> Self {
        Self { table }
    }

    /// View the root header of a finished buffer.
    ///
    /// Run a [`geobuf_flat::Verifier`] against [`header_schema`] first on
    /// bytes of unknown provenance.
    pub fn root(buffer: &'a FlatBuffer) -> GeobufResult<Self> {
        buffer.root_table().map(Self::new)
    }

    /// The coordinate transform, if any.
    pub fn transform(&self) -> GeobufResult<Option<Transform>> {
        self.table.read_struct(fid::TRANSFORM)
    }

    /// The attribute column schema, if any columns were written.
    pub fn columns(&self) -> GeobufResult<Option<ColumnVecRef<'a>>> {
        Ok(self.table.table_vector(fid::COLUMNS)?.map(ColumnVecRef::new))
    }

    /// The raw feature count, `0` when unknown.
    pub fn features_count(&self) -> GeobufResult<u64> {
        self.table.scalar(fid::FEATURES_COUNT, 0)
    }

    /// The feature count with the sentinel made explicit: `None` means the
    /// producer did not know the count, not that the dataset is empty.
    pub fn known_features_count(&self) -> GeobufResult<Option<u64>> {
        let count = self.features_count()?;
        Ok((count != 0).then_some(count))
    }

    /// The dataset's bounding box, if any.
    pub fn geographical_extent(&self) -> GeobufResult<Option<GeographicalExtent>> {
        self.table.read_struct(fid::GEOGRAPHICAL_EXTENT)
    }

    /// The coordinate reference system, if any.
    pub fn reference_system(&self) -> GeobufResult<Option<ReferenceSystemRef<'a>>> {
        Ok(self
            .table
            .table(fid::REFERENCE_SYSTEM)?
            .map(ReferenceSystemRef::new))
    }

    /// The dataset identifier, if any.
    pub fn identifier(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::IDENTIFIER)
    }

    /// The reference date, if any.
    pub fn reference_date(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::REFERENCE_DATE)
    }

    /// The dataset title, if any.
    pub fn title(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::TITLE)
    }

    /// The point-of-contact name, if any.
    pub fn poc_contact_name(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::POC_CONTACT_NAME)
    }

    /// The point-of-contact type, if any.
    pub fn poc_contact_type(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::POC_CONTACT_TYPE)
    }

    /// The point-of-contact role, if any.
    pub fn poc_role(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::POC_ROLE)
    }

    /// The point-of-contact phone number, if any.
    pub fn poc_phone(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::POC_PHONE)
    }

    /// The point-of-contact email address, if any.
    pub fn poc_email(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::POC_EMAIL)
    }

    /// The point-of-contact website, if any.
    pub fn poc_website(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::POC_WEBSITE)
    }

    /// The point-of-contact street number, if any.
    pub fn poc_address_thoroughfare_number(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::POC_ADDRESS_THOROUGHFARE_NUMBER)
    }

    /// The point-of-contact street name, if any.
    pub fn poc_address_thoroughfare_name(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::POC_ADDRESS_THOROUGHFARE_NAME)
    }

    /// The point-of-contact locality, if any.
    pub fn poc_address_locality(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::POC_ADDRESS_LOCALITY)
    }

    /// The point-of-contact postcode, if any.
    pub fn poc_address_postcode(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::POC_ADDRESS_POSTCODE)
    }

    /// The point-of-contact city, if any.
    pub fn poc_address_city(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::POC_ADDRESS_CITY)
    }

    /// The point-of-contact state or province, if any.
    pub fn poc_address_state(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::POC_ADDRESS_STATE)
    }

    /// The point-of-contact country, if any.
    pub fn poc_address_country(&self) -> GeobufResult<Option<&'a str>> {
        self.table.string(fid::POC_ADDRESS_COUNTRY)
    }

    /// The opaque attribute payload, if any.
    pub fn attributes(&self) -> GeobufResult<Option<&'a [u8]>> {
        self.table.byte_vector(fid::ATTRIBUTES)
    }
}
