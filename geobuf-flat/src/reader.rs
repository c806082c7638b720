use std::marker::PhantomData;

use geobuf_error::{GeobufResult, geobuf_bail, geobuf_err};

use crate::scalar::{WireScalar, WireStruct};

pub(crate) fn read_bytes<'a>(buf: &'a [u8], pos: usize, len: usize) -> GeobufResult<&'a [u8]> {
    pos.checked_add(len)
        .and_then(|end| buf.get(pos..end))
        .ok_or_else(
            || geobuf_err!(Format: "read of {} bytes at {} escapes buffer of {} bytes", len, pos, buf.len()),
        )
}

pub(crate) fn read_scalar<T: WireScalar>(buf: &[u8], pos: usize) -> GeobufResult<T> {
    Ok(T::read_le(read_bytes(buf, pos, T::WIDTH)?))
}

/// Resolve a forward reference: a `u32` relative offset stored at `pos`,
/// measured from `pos` itself.
pub(crate) fn follow_offset(buf: &[u8], pos: usize) -> GeobufResult<usize> {
    let relative = read_scalar::<u32>(buf, pos)?;
    usize::try_from(relative)
        .ok()
        .and_then(|relative| pos.checked_add(relative))
        .filter(|target| *target < buf.len())
        .ok_or_else(
            || geobuf_err!(Format: "offset at {} escapes buffer of {} bytes", pos, buf.len()),
        )
}

pub(crate) fn read_string_at(buf: &[u8], pos: usize) -> GeobufResult<&str> {
    let len = read_scalar::<u32>(buf, pos)?;
    let len = usize::try_from(len)
        .map_err(|_| geobuf_err!(Format: "string length {} exceeds the address range", len))?;
    let payload = read_bytes(buf, pos + 4, len)?;
    Ok(std::str::from_utf8(payload)?)
}

/// Resolve the root table of a finished buffer.
///
/// Only the root slot itself is bounds-checked here; run a
/// [`crate::Verifier`] first on bytes of unknown provenance.
pub fn root_table(buf: &[u8]) -> GeobufResult<TableRef<'_>> {
    let root = read_scalar::<i32>(buf, 0)?;
    let pos = usize::try_from(root)
        .map_err(|_| geobuf_err!(Format: "root offset {} is negative", root))?;
    if pos < 4 || pos >= buf.len() {
        geobuf_bail!(Format: "root offset {} escapes buffer of {} bytes", pos, buf.len());
    }
    Ok(TableRef::new(buf, pos))
}

/// Step backwards from a table to its vtable; the pointer is signed because
/// interned vtables may sit on either side of the table.
pub(crate) fn offset_back(pos: usize, soffset: i32) -> Option<usize> {
    let magnitude = usize::try_from(soffset.unsigned_abs()).ok()?;
    if soffset >= 0 {
        pos.checked_sub(magnitude)
    } else {
        pos.checked_add(magnitude)
    }
}

pub(crate) struct VTableRef<'a> {
    buf: &'a [u8],
    pos: usize,
    len: u16,
}

impl<'a> VTableRef<'a> {
    pub(crate) fn parse(buf: &'a [u8], pos: usize) -> GeobufResult<Self> {
        let len = read_scalar::<u16>(buf, pos)?;
        if len < 4 {
            geobuf_bail!(Format: "vtable at {} is shorter than its header", pos);
        }
        read_bytes(buf, pos, usize::from(len))?;
        Ok(Self { buf, pos, len })
    }

    /// The table-relative offset for a field id, with 0 meaning absent.
    ///
    /// A vtable too short for the id also reads as absent: the buffer was
    /// written before the field existed.
    pub(crate) fn field_offset(&self, id: u16) -> GeobufResult<u16> {
        let slot = 4 + 2 * usize::from(id);
        if slot + 2 > usize::from(self.len) {
            return Ok(0);
        }
        read_scalar::<u16>(self.buf, self.pos + slot)
    }
}

/// Zero-copy view of one table inside a buffer.
///
/// Field access resolves the table's vtable; an absent slot falls back to
/// the supplied default. That fallback is the whole schema-evolution story:
/// a reader built against a newer schema sees defaults on an older buffer,
/// and a reader built against an older schema never looks at a newer
/// buffer's trailing ids.
#[derive(Debug, Clone, Copy)]
pub struct TableRef<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TableRef<'a> {
    pub(crate) fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    /// The table's byte position within the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn vtable(&self) -> GeobufResult<VTableRef<'a>> {
        let soffset = read_scalar::<i32>(self.buf, self.pos)?;
        let vt_pos = offset_back(self.pos, soffset).ok_or_else(
            || geobuf_err!(Format: "vtable pointer at {} escapes buffer of {} bytes", self.pos, self.buf.len()),
        )?;
        VTableRef::parse(self.buf, vt_pos)
    }

    /// Position of a present field's inline value.
    fn field_pos(&self, id: u16) -> GeobufResult<Option<usize>> {
        let offset = self.vtable()?.field_offset(id)?;
        Ok((offset != 0).then(|| self.pos + usize::from(offset)))
    }

    fn follow_field(&self, id: u16) -> GeobufResult<Option<usize>> {
        match self.field_pos(id)? {
            None => Ok(None),
            Some(field_pos) => follow_offset(self.buf, field_pos).map(Some),
        }
    }

    /// Read a scalar field, or `default` if the field is absent.
    pub fn scalar<T: WireScalar>(&self, id: u16, default: T) -> GeobufResult<T> {
        match self.field_pos(id)? {
            None => Ok(default),
            Some(pos) => read_scalar(self.buf, pos),
        }
    }

    /// Borrow a string field.
    pub fn string(&self, id: u16) -> GeobufResult<Option<&'a str>> {
        match self.follow_field(id)? {
            None => Ok(None),
            Some(pos) => read_string_at(self.buf, pos).map(Some),
        }
    }

    /// View a nested table field.
    pub fn table(&self, id: u16) -> GeobufResult<Option<TableRef<'a>>> {
        Ok(self.follow_field(id)?.map(|pos| TableRef::new(self.buf, pos)))
    }

    /// Read an inline struct field.
    pub fn read_struct<S: WireStruct>(&self, id: u16) -> GeobufResult<Option<S>> {
        match self.field_pos(id)? {
            None => Ok(None),
            Some(pos) => Ok(Some(S::read(read_bytes(self.buf, pos, S::SIZE)?))),
        }
    }

    /// Borrow a byte-vector field.
    pub fn byte_vector(&self, id: u16) -> GeobufResult<Option<&'a [u8]>> {
        match self.follow_field(id)? {
            None => Ok(None),
            Some(pos) => {
                let len = vector_len(self.buf, pos)?;
                read_bytes(self.buf, pos + 4, len).map(Some)
            }
        }
    }

    /// View a vector of fixed-width scalars.
    pub fn scalar_vector<T: WireScalar>(
        &self,
        id: u16,
    ) -> GeobufResult<Option<ScalarVectorRef<'a, T>>> {
        match self.follow_field(id)? {
            None => Ok(None),
            Some(pos) => {
                let len = vector_len(self.buf, pos)?;
                let payload_len = len.checked_mul(T::WIDTH).ok_or_else(
                    || geobuf_err!(Format: "vector at {} overflows the address range", pos),
                )?;
                let payload = read_bytes(self.buf, pos + 4, payload_len)?;
                Ok(Some(ScalarVectorRef {
                    payload,
                    len,
                    _marker: PhantomData,
                }))
            }
        }
    }

    /// View a vector of strings.
    pub fn string_vector(&self, id: u16) -> GeobufResult<Option<StringVectorRef<'a>>> {
        match self.follow_field(id)? {
            None => Ok(None),
            Some(pos) => {
                let len = vector_len(self.buf, pos)?;
                read_bytes(self.buf, pos + 4, elements_len(len, pos)?)?;
                Ok(Some(StringVectorRef {
                    buf: self.buf,
                    pos: pos + 4,
                    len,
                }))
            }
        }
    }

    /// View a vector of nested tables.
    pub fn table_vector(&self, id: u16) -> GeobufResult<Option<TableVectorRef<'a>>> {
        match self.follow_field(id)? {
            None => Ok(None),
            Some(pos) => {
                let len = vector_len(self.buf, pos)?;
                read_bytes(self.buf, pos + 4, elements_len(len, pos)?)?;
                Ok(Some(TableVectorRef {
                    buf: self.buf,
                    pos: pos + 4,
                    len,
                }))
            }
        }
    }
}

fn vector_len(buf: &[u8], pos: usize) -> GeobufResult<usize> {
    let len = read_scalar::<u32>(buf, pos)?;
    usize::try_from(len)
        .map_err(|_| geobuf_err!(Format: "vector length {} exceeds the address range", len))
}

fn elements_len(len: usize, pos: usize) -> GeobufResult<usize> {
    len.checked_mul(4)
        .ok_or_else(|| geobuf_err!(Format: "vector at {} overflows the address range", pos))
}

/// Borrowed view of a vector of fixed-width scalars.
#[derive(Debug, Clone, Copy)]
pub struct ScalarVectorRef<'a, T> {
    payload: &'a [u8],
    len: usize,
    _marker: PhantomData<T>,
}

impl<'a, T: WireScalar> ScalarVectorRef<'a, T> {
    /// Element count.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the vector has no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read one element.
    pub fn get(&self, index: usize) -> GeobufResult<T> {
        if index >= self.len {
            return Err(geobuf_err!(OutOfBounds: index, 0, self.len));
        }
        Ok(T::read_le(&self.payload[index * T::WIDTH..]))
    }

    /// Iterate the elements in place.
    pub fn iter(&self) -> impl Iterator<Item = T> {
        let payload = self.payload;
        (0..self.len).map(move |index| T::read_le(&payload[index * T::WIDTH..]))
    }

    /// Copy the elements out.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }
}

/// Borrowed view of a vector of string offsets.
#[derive(Debug, Clone, Copy)]
pub struct StringVectorRef<'a> {
    buf: &'a [u8],
    /// Position of the first element, just past the length prefix.
    pos: usize,
    len: usize,
}

impl<'a> StringVectorRef<'a> {
    /// Element count.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the vector has no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow one string.
    pub fn get(&self, index: usize) -> GeobufResult<&'a str> {
        if index >= self.len {
            return Err(geobuf_err!(OutOfBounds: index, 0, self.len));
        }
        let target = follow_offset(self.buf, self.pos + index * 4)?;
        read_string_at(self.buf, target)
    }

    /// Iterate the strings in place.
    pub fn iter(&self) -> impl Iterator<Item = GeobufResult<&'a str>> {
        let this = *self;
        (0..self.len).map(move |index| this.get(index))
    }
}

/// Borrowed view of a vector of table offsets.
#[derive(Debug, Clone, Copy)]
pub struct TableVectorRef<'a> {
    buf: &'a [u8],
    /// Position of the first element, just past the length prefix.
    pos: usize,
    len: usize,
}

impl<'a> TableVectorRef<'a> {
    /// Element count.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the vector has no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View one table.
    pub fn get(&self, index: usize) -> GeobufResult<TableRef<'a>> {
        if index >= self.len {
            return Err(geobuf_err!(OutOfBounds: index, 0, self.len));
        }
        let target = follow_offset(self.buf, self.pos + index * 4)?;
        Ok(TableRef::new(self.buf, target))
    }

    /// Iterate the tables in place.
    pub fn iter(&self) -> impl Iterator<Item = GeobufResult<TableRef<'a>>> {
        let this = *self;
        (0..self.len).map(move |index| this.get(index))
    }
}
