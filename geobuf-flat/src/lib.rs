#![deny(missing_docs)]

//! An offset-table binary codec for self-describing buffers.
//!
//! Buffers hold a graph of tables connected by relative offsets inside one
//! contiguous arena. Each table leads with a signed pointer to a vtable that
//! maps stable field ids to inline positions, with 0 meaning "absent, read
//! the schema default". That indirection is what buys optional fields,
//! default elision, and forward/backward schema evolution; fixed-layout
//! structs, strings, and vectors are stored inline or length-prefixed with
//! no indirection of their own.
//!
//! Writing goes through [`FlatBuilder`], which lays the buffer out back to
//! front, deduplicating strings, vectors, and vtables within a session.
//! Reading goes through zero-copy views ([`TableRef`] and friends) over a
//! frozen [`FlatBuffer`]; [`Verifier`] walks untrusted bytes against a
//! [`TableSchema`] before any view is handed out.

mod buffer;
mod builder;
mod reader;
mod scalar;
mod schema;
mod verify;

pub use buffer::*;
pub use builder::*;
pub use reader::*;
pub use scalar::*;
pub use schema::*;
pub use verify::*;

use geobuf_error::GeobufResult;

/// Marker for entities that may sit at a buffer's root.
pub trait FlatRoot {}

/// Encode an entity into a builder session.
pub trait WriteFlat {
    /// Write `self` and its children, returning the finished table's offset.
    fn write_flat(&self, fbb: &mut FlatBuilder) -> GeobufResult<Offset>;
}

/// One-shot encoding of a root entity into a finished buffer.
pub trait WriteFlatExt: WriteFlat + FlatRoot {
    /// Build a buffer with `self` at the root.
    fn write_flat_bytes(&self) -> GeobufResult<FlatBuffer> {
        let mut fbb = FlatBuilder::new();
        let root = self.write_flat(&mut fbb)?;
        fbb.finish(root)
    }
}

impl<T: WriteFlat + FlatRoot> WriteFlatExt for T {}

/// Decode an owned entity from a table view.
pub trait ReadFlat: Sized {
    /// The schema the source table conforms to.
    fn schema() -> SchemaRef;

    /// Read an owned value out of `table`.
    fn read_flat(table: &TableRef<'_>) -> GeobufResult<Self>;

    /// Verify `bytes` and read the root entity.
    fn read_flat_bytes(bytes: &[u8]) -> GeobufResult<Self> {
        Verifier::new(bytes).verify_root(&Self::schema())?;
        Self::read_flat_bytes_unverified(bytes)
    }

    /// Read the root entity without verification.
    ///
    /// Appropriate only for buffers this process produced itself; on damaged
    /// input every structural read still fails closed with a `Format` error,
    /// but no stronger guarantee is made.
    fn read_flat_bytes_unverified(bytes: &[u8]) -> GeobufResult<Self> {
        let table = root_table(bytes)?;
        Self::read_flat(&table)
    }
}
