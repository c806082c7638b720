#![cfg(test)]

use geobuf_error::GeobufError;
use geobuf_flat::{FlatBuilder, ReadFlat, Verifier, WriteFlat, WriteFlatExt};
use geobuf_header::{
    AttributeDecoder, AttributeEncoder, AttributeValue, Column, ColumnType, GeographicalExtent,
    Header, HeaderRef, ReferenceSystem, Transform, Vector, header_schema,
};

fn sample_header() -> Header {
    Header {
        transform: Some(Transform::new(
            Vector::new(0.001, 0.001, 0.01),
            Vector::new(85000.0, 446000.0, 0.0),
        )),
        columns: vec![
            Column::new("height", ColumnType::Double),
            Column::new("owner", ColumnType::String),
            Column::new("storeys", ColumnType::UByte),
        ],
        features_count: 2941,
        geographical_extent: Some(GeographicalExtent::new(
            Vector::new(84000.0, 445000.0, -10.0),
            Vector::new(86000.0, 447000.0, 120.0),
        )),
        reference_system: Some(ReferenceSystem::new("EPSG", 0, 7415)),
        identifier: Some("nl-3dbag-demo".to_owned()),
        reference_date: Some("2024-03-01".to_owned()),
        title: Some("3D buildings, demo tile".to_owned()),
        poc_contact_name: Some("Data desk".to_owned()),
        poc_email: Some("data@example.org".to_owned()),
        poc_address_city: Some("Delft".to_owned()),
        poc_address_country: Some("NL".to_owned()),
        ..Header::default()
    }
}

#[test]
fn header_round_trips_field_for_field() {
    let header = sample_header();
    let buffer = header.write_flat_bytes().unwrap();
    let decoded = Header::read_flat_bytes(buffer.as_slice()).unwrap();
    assert_eq!(decoded, header);
}

#[test]
fn empty_header_reads_as_documented_defaults() {
    let buffer = Header::default().write_flat_bytes().unwrap();
    let decoded = Header::read_flat_bytes(buffer.as_slice()).unwrap();

    assert_eq!(decoded.features_count, 0);
    assert!(decoded.columns.is_empty());
    assert_eq!(decoded.transform, None);
    assert_eq!(decoded.reference_system, None);
    assert_eq!(decoded.title, None);
    assert_eq!(decoded.attributes, None);
}

#[test]
fn zero_features_count_means_unknown() {
    let buffer = Header::default().write_flat_bytes().unwrap();
    let view = HeaderRef::root(&buffer).unwrap();
    assert_eq!(view.features_count().unwrap(), 0);
    assert_eq!(view.known_features_count().unwrap(), None);

    let header = Header {
        features_count: 17,
        ..Header::default()
    };
    let buffer = header.write_flat_bytes().unwrap();
    let view = HeaderRef::root(&buffer).unwrap();
    assert_eq!(view.known_features_count().unwrap(), Some(17));
}

#[test]
fn zero_copy_view_matches_owned_decode() {
    let header = sample_header();
    let buffer = header.write_flat_bytes().unwrap();
    Verifier::new(buffer.as_slice())
        .verify_root(&header_schema())
        .unwrap();

    let view = HeaderRef::root(&buffer).unwrap();
    assert_eq!(view.title().unwrap(), Some("3D buildings, demo tile"));
    assert_eq!(view.features_count().unwrap(), 2941);
    assert_eq!(view.transform().unwrap(), header.transform);
    assert_eq!(
        view.geographical_extent().unwrap(),
        header.geographical_extent
    );

    let columns = view.columns().unwrap().unwrap();
    assert_eq!(columns.len(), 3);
    let first = columns.get(0).unwrap();
    assert_eq!(first.name().unwrap(), "height");
    assert_eq!(first.ty().unwrap(), ColumnType::Double);

    let crs = view.reference_system().unwrap().unwrap();
    assert_eq!(crs.authority().unwrap(), Some("EPSG"));
    assert_eq!(crs.code().unwrap(), 7415);
}

/// The wire-level contract for a column that only departs from its defaults
/// in `name`, `type`, and `nullable`: the elided fields leave no trace in
/// the buffer, and the vtable slots for them stay zero.
#[test]
fn elevation_column_elides_its_default_fields() {
    let mut column = Column::new("elevation", ColumnType::Double);
    column.nullable = false;

    let mut fbb = FlatBuilder::new();
    let root = column.write_flat(&mut fbb).unwrap();
    let buffer = fbb.finish(root).unwrap();

    let decoded = Column::read_flat_bytes(buffer.as_slice()).unwrap();
    assert_eq!(decoded.name, "elevation");
    assert_eq!(decoded.ty, ColumnType::Double);
    assert!(!decoded.nullable);
    assert_eq!(decoded.precision, -1);
    assert_eq!(decoded.scale, -1);
    assert!(!decoded.unique);
    assert!(!decoded.primary_key);

    // Walk the raw vtable: precision (4), scale (5), unique (7), and
    // primary_key (8) must have empty slots.
    let bytes = buffer.as_slice();
    let root = u32::from_le_bytes(bytes[..4].try_into().unwrap()) as usize;
    let soffset = i32::from_le_bytes(bytes[root..root + 4].try_into().unwrap());
    let vt = usize::try_from(i64::try_from(root).unwrap() - i64::from(soffset)).unwrap();
    for id in [4usize, 5, 7, 8] {
        let slot = vt + 4 + 2 * id;
        assert_eq!(
            u16::from_le_bytes(bytes[slot..slot + 2].try_into().unwrap()),
            0,
            "field id {id} should be elided"
        );
    }

    // Setting the same fields to their defaults explicitly produces the
    // byte-identical buffer.
    let explicit = {
        let mut column = Column::new("elevation", ColumnType::Double);
        column.nullable = false;
        column.precision = -1;
        column.scale = -1;
        column.unique = false;
        column.primary_key = false;
        let mut fbb = FlatBuilder::new();
        let root = column.write_flat(&mut fbb).unwrap();
        fbb.finish(root).unwrap()
    };
    assert_eq!(explicit.as_slice(), buffer.as_slice());
}

#[test]
fn same_shape_columns_share_one_vtable() {
    let columns: Vec<Column> = (0..6)
        .map(|index| {
            let mut column = Column::new(format!("col_{index}"), ColumnType::Int);
            column.nullable = false;
            column
        })
        .collect();

    let mut fbb = FlatBuilder::new();
    for column in &columns {
        column.write_flat(&mut fbb).unwrap();
    }
    assert_eq!(fbb.vtable_count(), 1);
}

#[test]
fn verifier_gates_damaged_header_bytes() {
    let buffer = sample_header().write_flat_bytes().unwrap();
    let mut bytes = buffer.as_slice().to_vec();
    // Point the root past the end of the buffer.
    let far = u32::try_from(bytes.len() + 16).unwrap();
    bytes[..4].copy_from_slice(&far.to_le_bytes());

    let err = Header::read_flat_bytes(&bytes).unwrap_err();
    assert!(matches!(err, GeobufError::Format(_, _)));
}

#[test]
fn attributes_travel_opaquely_and_unpack_against_the_columns() {
    let mut header = sample_header();
    let mut encoder = AttributeEncoder::new(&header.columns);
    encoder.append(0, AttributeValue::Double(21.5)).unwrap();
    encoder
        .append(1, AttributeValue::String("municipality"))
        .unwrap();
    encoder.append(2, AttributeValue::UByte(7)).unwrap();
    header.attributes = Some(encoder.finish());

    let buffer = header.write_flat_bytes().unwrap();
    let decoded = Header::read_flat_bytes(buffer.as_slice()).unwrap();
    assert_eq!(decoded.attributes, header.attributes);

    let values: Vec<_> = AttributeDecoder::new(
        &decoded.columns,
        decoded.attributes.as_deref().unwrap(),
    )
    .collect::<Result<_, _>>()
    .unwrap();
    assert_eq!(
        values,
        vec![
            (0, AttributeValue::Double(21.5)),
            (1, AttributeValue::String("municipality")),
            (2, AttributeValue::UByte(7)),
        ]
    );
}

#[test]
fn shared_strings_are_stored_once() {
    // The same text used by two fields resolves to one stored string.
    let header = Header {
        title: Some("Delft".to_owned()),
        poc_address_city: Some("Delft".to_owned()),
        ..Header::default()
    };
    let deduplicated = header.write_flat_bytes().unwrap();

    let header = Header {
        title: Some("Delft".to_owned()),
        poc_address_city: Some("Rotterdam".to_owned()),
        ..Header::default()
    };
    let distinct = header.write_flat_bytes().unwrap();

    assert!(deduplicated.len() < distinct.len());

    let decoded = Header::read_flat_bytes(deduplicated.as_slice()).unwrap();
    assert_eq!(decoded.title.as_deref(), Some("Delft"));
    assert_eq!(decoded.poc_address_city.as_deref(), Some("Delft"));
}
