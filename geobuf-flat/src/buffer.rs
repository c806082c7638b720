use std::ops::Deref;

use bytes::Bytes;

use geobuf_error::GeobufResult;

use crate::reader::{TableRef, root_table};

/// A finished, immutable buffer.
///
/// Cloning is cheap and shares the underlying bytes, so any number of
/// readers can work over one buffer concurrently; reads never mutate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatBuffer {
    bytes: Bytes,
}

impl FlatBuffer {
    /// Wrap already-built bytes.
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    /// The raw bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Unwrap the shared bytes.
    pub fn into_inner(self) -> Bytes {
        self.bytes
    }

    /// Resolve the root table.
    ///
    /// Only the root slot itself is bounds-checked here; run a
    /// [`crate::Verifier`] first on bytes of unknown provenance.
    pub fn root_table(&self) -> GeobufResult<TableRef<'_>> {
        root_table(self.as_slice())
    }
}

impl Deref for FlatBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl AsRef<[u8]> for FlatBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl From<Bytes> for FlatBuffer {
    fn from(bytes: Bytes) -> Self {
        Self::new(bytes)
    }
}

impl From<Vec<u8>> for FlatBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(Bytes::from(bytes))
    }
}
