use bytes::Bytes;
use geobuf_error::{GeobufResult, geobuf_bail, geobuf_err, geobuf_panic};
use hashbrown::HashMap;

use crate::buffer::FlatBuffer;
use crate::scalar::{WireScalar, WireStruct};
use crate::schema::{DefaultValue, FieldDescriptor, FieldType, SchemaRef};

/// Offsets are expressed in a signed 32-bit range; a buffer can never grow
/// past it.
pub const MAX_BUFFER_SIZE: usize = i32::MAX as usize;

/// Position of a finished out-of-line object (string, vector, or table)
/// within one builder session, measured backwards from the buffer end.
///
/// Offsets are only meaningful within the session that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Offset(u32);

struct TableInProgress {
    schema: SchemaRef,
    /// Write position when the table started; everything pushed since
    /// belongs to the table's inline region.
    start: usize,
    /// Per field id, the end-relative position of the written value.
    slots: Vec<Option<usize>>,
}

/// Builds a buffer back to front: children first, parents after.
///
/// Every value is padded so its final address is a multiple of its own size,
/// and the running maximum alignment pads the finished buffer. Strings,
/// vectors, and vtables are deduplicated within the session; a value equal
/// to its field's declared default is never persisted at all.
///
/// A session is single-threaded and append-only. [`FlatBuilder::finish`]
/// freezes the bytes into an immutable [`FlatBuffer`] and resets the builder
/// for a fresh session.
pub struct FlatBuilder {
    /// Buffer bytes in reverse order; `rev[0]` is the final byte.
    rev: Vec<u8>,
    max_align: usize,
    /// Interned vtables, keyed by their exact bytes.
    vtables: HashMap<Vec<u8>, usize>,
    strings: HashMap<Vec<u8>, Offset>,
    /// Scalar vectors keyed by element width and payload bytes.
    scalar_vectors: HashMap<(usize, Vec<u8>), Offset>,
    /// Offset vectors keyed by their logical targets; the stored relative
    /// offsets differ per call site but resolve to the same objects.
    offset_vectors: HashMap<Vec<Offset>, Offset>,
    table: Option<TableInProgress>,
}

impl Default for FlatBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatBuilder {
    /// A fresh builder session.
    pub fn new() -> Self {
        Self {
            rev: Vec::new(),
            max_align: 1,
            vtables: HashMap::new(),
            strings: HashMap::new(),
            scalar_vectors: HashMap::new(),
            offset_vectors: HashMap::new(),
            table: None,
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.rev.len()
    }

    /// Whether anything has been written yet.
    pub fn is_empty(&self) -> bool {
        self.rev.is_empty()
    }

    /// Number of distinct vtables interned so far in this session.
    pub fn vtable_count(&self) -> usize {
        self.vtables.len()
    }

    fn head(&self) -> usize {
        self.rev.len()
    }

    /// Append bytes given in wire order; the reversed store flips them.
    fn push_bytes(&mut self, bytes: &[u8]) {
        self.rev.extend(bytes.iter().rev().copied());
    }

    fn push_scalar<T: WireScalar>(&mut self, value: T) {
        let mut raw = [0u8; 8];
        value.write_le(&mut raw);
        self.push_bytes(&raw[..T::WIDTH]);
    }

    /// Pad so the next `additional` bytes end exactly on an `align`
    /// boundary measured from the buffer end; with the finished size padded
    /// to the running maximum alignment, that boundary is also an absolute
    /// address boundary.
    fn prep(&mut self, align: usize, additional: usize) -> GeobufResult<()> {
        self.max_align = self.max_align.max(align);
        let pad = (align - (self.head() + additional) % align) % align;
        if self.head() + pad + additional > MAX_BUFFER_SIZE {
            geobuf_bail!(
                CapacityExceeded: "buffer would exceed the {} byte offset range",
                MAX_BUFFER_SIZE
            );
        }
        self.rev.resize(self.head() + pad, 0);
        Ok(())
    }

    fn offset_here(&self) -> GeobufResult<Offset> {
        u32::try_from(self.head())
            .map(Offset)
            .map_err(|_| geobuf_err!(CapacityExceeded: "offset out of range"))
    }

    /// Relative offset from a `width`-byte reference about to be pushed to
    /// an already-written target.
    fn relative_to_next(&self, width: usize, target: Offset) -> GeobufResult<u32> {
        let reference = self.head() + width;
        let target = usize::try_from(target.0)
            .map_err(|_| geobuf_err!(CapacityExceeded: "offset out of range"))?;
        if target > reference {
            geobuf_bail!(InvalidArgument: "offset does not belong to this builder session");
        }
        u32::try_from(reference - target)
            .map_err(|_| geobuf_err!(CapacityExceeded: "relative offset out of range"))
    }

    fn patch_i32(&mut self, at: usize, value: i32) {
        for (index, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.rev[at - 1 - index] = byte;
        }
    }

    fn assert_no_table(&self, what: &str) {
        if self.table.is_some() {
            geobuf_panic!(
                "cannot create a {} while a table is under construction",
                what
            );
        }
    }

    /// Write a length-prefixed, NUL-terminated string, reusing the offset of
    /// an identical string already emitted this session.
    pub fn create_string(&mut self, value: &str) -> GeobufResult<Offset> {
        self.assert_no_table("string");
        if let Some(existing) = self.strings.get(value.as_bytes()) {
            return Ok(*existing);
        }
        let len = u32::try_from(value.len())
            .map_err(|_| geobuf_err!(CapacityExceeded: "string length exceeds u32 range"))?;
        self.prep(4, value.len() + 1 + 4)?;
        self.push_bytes(&[0]);
        self.push_bytes(value.as_bytes());
        self.push_scalar(len);
        let offset = self.offset_here()?;
        self.strings.insert(value.as_bytes().to_vec(), offset);
        Ok(offset)
    }

    /// Write a length-prefixed vector of fixed-width scalars, reusing the
    /// offset of an identical vector already emitted this session.
    pub fn create_scalar_vector<T: WireScalar>(&mut self, values: &[T]) -> GeobufResult<Offset> {
        self.assert_no_table("vector");
        let mut payload = Vec::with_capacity(values.len() * T::WIDTH);
        for value in values {
            let mut raw = [0u8; 8];
            value.write_le(&mut raw);
            payload.extend_from_slice(&raw[..T::WIDTH]);
        }
        if let Some(existing) = self.scalar_vectors.get(&(T::WIDTH, payload.clone())) {
            return Ok(*existing);
        }
        let count = u32::try_from(values.len())
            .map_err(|_| geobuf_err!(CapacityExceeded: "vector length exceeds u32 range"))?;
        if T::WIDTH >= 4 {
            // Element region on its own boundary puts the prefix at a
            // 4-aligned address just below it.
            self.prep(T::WIDTH, payload.len())?;
        } else {
            self.prep(4, payload.len() + 4)?;
        }
        self.push_bytes(&payload);
        self.push_scalar(count);
        let offset = self.offset_here()?;
        self.scalar_vectors.insert((T::WIDTH, payload), offset);
        Ok(offset)
    }

    /// Write a length-prefixed vector of bytes.
    pub fn create_byte_vector(&mut self, values: &[u8]) -> GeobufResult<Offset> {
        self.create_scalar_vector(values)
    }

    /// Write a length-prefixed vector of offsets to tables or strings,
    /// reusing the offset of a vector with identical targets.
    pub fn create_offset_vector(&mut self, targets: &[Offset]) -> GeobufResult<Offset> {
        self.assert_no_table("vector");
        if let Some(existing) = self.offset_vectors.get(targets) {
            return Ok(*existing);
        }
        let count = u32::try_from(targets.len())
            .map_err(|_| geobuf_err!(CapacityExceeded: "vector length exceeds u32 range"))?;
        self.prep(4, targets.len() * 4 + 4)?;
        // Pushed back to front, so the last element goes down first.
        for target in targets.iter().rev() {
            let relative = self.relative_to_next(4, *target)?;
            self.push_scalar(relative);
        }
        self.push_scalar(count);
        let offset = self.offset_here()?;
        self.offset_vectors.insert(targets.to_vec(), offset);
        Ok(offset)
    }

    /// Open a table scope; field values may be added until
    /// [`FlatBuilder::end_table`].
    ///
    /// ## Panics
    ///
    /// Panics if a table is already under construction; table scopes never
    /// nest, nested tables are written first and referenced by offset.
    pub fn start_table(&mut self, schema: SchemaRef) {
        if self.table.is_some() {
            geobuf_panic!("table construction cannot be nested");
        }
        let slots = vec![None; schema.len()];
        self.table = Some(TableInProgress {
            schema,
            start: self.head(),
            slots,
        });
    }

    fn descriptor(&self, id: u16) -> GeobufResult<FieldDescriptor> {
        let Some(table) = &self.table else {
            geobuf_panic!("no table under construction");
        };
        table.schema.field(id).cloned().ok_or_else(
            || geobuf_err!(SchemaViolation: "table {} has no field id {}", table.schema.name(), id),
        )
    }

    fn set_slot(&mut self, id: u16) {
        let head = self.head();
        if let Some(table) = &mut self.table {
            table.slots[usize::from(id)] = Some(head);
        }
    }

    /// Record a scalar field. A value equal to the field's declared default
    /// is elided: nothing is stored and readers recover the default from the
    /// schema.
    pub fn add_scalar<T: WireScalar>(&mut self, id: u16, value: T) -> GeobufResult<()> {
        let desc = self.descriptor(id)?;
        if !desc.ty.is_scalar() || desc.ty.inline_size() != T::WIDTH {
            geobuf_bail!(
                SchemaViolation: "field {} is not a {}-byte scalar",
                desc.name,
                T::WIDTH
            );
        }
        if T::from_default(desc.default).is_some_and(|default| default == value) {
            return Ok(());
        }
        self.prep(T::WIDTH, T::WIDTH)?;
        self.push_scalar(value);
        self.set_slot(id);
        Ok(())
    }

    /// Record an enum field, validating the discriminant against the
    /// field's declared range.
    pub fn add_enum(&mut self, id: u16, value: u8) -> GeobufResult<()> {
        let desc = self.descriptor(id)?;
        let FieldType::Enum { max } = desc.ty else {
            geobuf_bail!(SchemaViolation: "field {} is not an enum", desc.name);
        };
        if value > max {
            geobuf_bail!(
                SchemaViolation: "enum value {} for field {} is outside 0..={}",
                value,
                desc.name,
                max
            );
        }
        if desc.default == DefaultValue::UInt(u64::from(value)) {
            return Ok(());
        }
        self.prep(1, 1)?;
        self.push_bytes(&[value]);
        self.set_slot(id);
        Ok(())
    }

    /// Record an inline struct field at the struct's required alignment.
    pub fn add_struct<S: WireStruct>(&mut self, id: u16, value: &S) -> GeobufResult<()> {
        let desc = self.descriptor(id)?;
        let FieldType::Struct(layout) = desc.ty else {
            geobuf_bail!(SchemaViolation: "field {} is not a struct", desc.name);
        };
        if layout.size != S::SIZE || layout.align != S::ALIGN {
            geobuf_bail!(
                SchemaViolation: "field {} expects a {}-byte struct, got {}",
                desc.name,
                layout.size,
                S::SIZE
            );
        }
        self.prep(S::ALIGN, S::SIZE)?;
        let mut raw = Vec::with_capacity(S::SIZE);
        value.write(&mut raw);
        debug_assert_eq!(raw.len(), S::SIZE);
        self.push_bytes(&raw);
        self.set_slot(id);
        Ok(())
    }

    /// Record a reference to an out-of-line string, vector, or table created
    /// earlier in this session.
    pub fn add_offset(&mut self, id: u16, target: Offset) -> GeobufResult<()> {
        let desc = self.descriptor(id)?;
        if !desc.ty.is_offset() {
            geobuf_bail!(SchemaViolation: "field {} is not an offset field", desc.name);
        }
        self.prep(4, 4)?;
        let relative = self.relative_to_next(4, target)?;
        self.push_scalar(relative);
        self.set_slot(id);
        Ok(())
    }

    /// Close the table scope: enforce required fields, intern the vtable,
    /// and write the table's vtable pointer.
    pub fn end_table(&mut self) -> GeobufResult<Offset> {
        let Some(table) = self.table.take() else {
            geobuf_panic!("no table under construction");
        };
        for field in table.schema.fields() {
            if field.required && table.slots[usize::from(field.id)].is_none() {
                geobuf_bail!(
                    SchemaViolation: "required field {}.{} was never set",
                    table.schema.name(),
                    field.name
                );
            }
        }

        // The table leads with a signed 32-bit offset back to its vtable,
        // patched in once the vtable's position is known.
        self.prep(4, 4)?;
        self.rev.resize(self.head() + 4, 0);
        let table_end = self.head();

        let table_size = u16::try_from(table_end - table.start).map_err(
            |_| geobuf_err!(CapacityExceeded: "table {} exceeds the 64 KiB inline limit", table.schema.name()),
        )?;
        let vtable_len = u16::try_from(4 + 2 * table.schema.len()).map_err(
            |_| geobuf_err!(CapacityExceeded: "table {} declares too many fields", table.schema.name()),
        )?;

        let mut vtable = Vec::with_capacity(usize::from(vtable_len));
        vtable.extend_from_slice(&vtable_len.to_le_bytes());
        vtable.extend_from_slice(&table_size.to_le_bytes());
        for slot in &table.slots {
            let entry = match slot {
                Some(field_end) => u16::try_from(table_end - field_end).map_err(
                    |_| geobuf_err!(CapacityExceeded: "field offset exceeds the vtable range"),
                )?,
                None => 0,
            };
            vtable.extend_from_slice(&entry.to_le_bytes());
        }

        let vtable_end = match self.vtables.get(vtable.as_slice()) {
            Some(existing) => {
                log::debug!(
                    "reusing interned vtable for a {} instance",
                    table.schema.name()
                );
                *existing
            }
            None => {
                self.prep(2, vtable.len())?;
                self.push_bytes(&vtable);
                let end = self.head();
                self.vtables.insert(vtable, end);
                end
            }
        };

        // Interned vtables may sit on either side of the table, so the
        // pointer is signed.
        let soffset = if vtable_end >= table_end {
            i32::try_from(vtable_end - table_end)
        } else {
            i32::try_from(table_end - vtable_end).map(|back| -back)
        }
        .map_err(|_| geobuf_err!(CapacityExceeded: "vtable offset out of range"))?;
        self.patch_i32(table_end, soffset);

        u32::try_from(table_end)
            .map(Offset)
            .map_err(|_| geobuf_err!(CapacityExceeded: "offset out of range"))
    }

    /// Write the root pointer, pad the buffer to its maximum alignment, and
    /// freeze it. The builder resets to a fresh session.
    ///
    /// ## Panics
    ///
    /// Panics if a table is still under construction.
    pub fn finish(&mut self, root: Offset) -> GeobufResult<FlatBuffer> {
        if self.table.is_some() {
            geobuf_panic!("cannot finish while a table is under construction");
        }
        let align = self.max_align.max(4);
        self.prep(align, 4)?;
        let relative = self.relative_to_next(4, root)?;
        let root_offset = i32::try_from(relative)
            .map_err(|_| geobuf_err!(CapacityExceeded: "root offset out of range"))?;
        self.push_scalar(root_offset);

        let mut bytes = std::mem::take(&mut self.rev);
        bytes.reverse();

        self.max_align = 1;
        self.vtables.clear();
        self.strings.clear();
        self.scalar_vectors.clear();
        self.offset_vectors.clear();

        Ok(FlatBuffer::new(Bytes::from(bytes)))
    }
}
