use crate::schema::DefaultValue;

mod sealed {
    pub trait Sealed {}
}

/// A fixed-width value that crosses the wire little-endian at its natural
/// alignment.
pub trait WireScalar: Copy + PartialEq + sealed::Sealed {
    /// Byte width, which is also the natural alignment.
    const WIDTH: usize;

    /// Serialize into the first [`Self::WIDTH`] bytes of `out`.
    fn write_le(self, out: &mut [u8]);

    /// Deserialize from the first [`Self::WIDTH`] bytes of `bytes`.
    ///
    /// Callers bounds-check before slicing; shorter input is a bug and
    /// panics.
    fn read_le(bytes: &[u8]) -> Self;

    /// The typed form of a schema default, when it is representable.
    fn from_default(default: DefaultValue) -> Option<Self>;
}

macro_rules! signed_scalar {
    ($t:ty) => {
        impl sealed::Sealed for $t {}

        impl WireScalar for $t {
            const WIDTH: usize = size_of::<$t>();

            fn write_le(self, out: &mut [u8]) {
                out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                Self::from_le_bytes(raw)
            }

            fn from_default(default: DefaultValue) -> Option<Self> {
                match default {
                    DefaultValue::Int(value) => Self::try_from(value).ok(),
                    _ => None,
                }
            }
        }
    };
}

macro_rules! unsigned_scalar {
    ($t:ty) => {
        impl sealed::Sealed for $t {}

        impl WireScalar for $t {
            const WIDTH: usize = size_of::<$t>();

            fn write_le(self, out: &mut [u8]) {
                out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; size_of::<$t>()];
                raw.copy_from_slice(&bytes[..Self::WIDTH]);
                Self::from_le_bytes(raw)
            }

            fn from_default(default: DefaultValue) -> Option<Self> {
                match default {
                    DefaultValue::UInt(value) => Self::try_from(value).ok(),
                    _ => None,
                }
            }
        }
    };
}

signed_scalar!(i8);
signed_scalar!(i16);
signed_scalar!(i32);
signed_scalar!(i64);
unsigned_scalar!(u8);
unsigned_scalar!(u16);
unsigned_scalar!(u32);
unsigned_scalar!(u64);

impl sealed::Sealed for f32 {}

impl WireScalar for f32 {
    const WIDTH: usize = 4;

    fn write_le(self, out: &mut [u8]) {
        out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[..Self::WIDTH]);
        Self::from_le_bytes(raw)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn from_default(default: DefaultValue) -> Option<Self> {
        match default {
            DefaultValue::Float(value) => Some(value as f32),
            _ => None,
        }
    }
}

impl sealed::Sealed for f64 {}

impl WireScalar for f64 {
    const WIDTH: usize = 8;

    fn write_le(self, out: &mut [u8]) {
        out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..Self::WIDTH]);
        Self::from_le_bytes(raw)
    }

    fn from_default(default: DefaultValue) -> Option<Self> {
        match default {
            DefaultValue::Float(value) => Some(value),
            _ => None,
        }
    }
}

impl sealed::Sealed for bool {}

impl WireScalar for bool {
    const WIDTH: usize = 1;

    fn write_le(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn from_default(default: DefaultValue) -> Option<Self> {
        match default {
            DefaultValue::Bool(value) => Some(value),
            _ => None,
        }
    }
}

/// A fixed-layout inline value.
///
/// Member order and widths are frozen by the schema; structs carry no vtable,
/// so there is nothing to recover from if the layout ever drifts.
pub trait WireStruct: Sized {
    /// Total serialized size in bytes.
    const SIZE: usize;
    /// Start alignment: the widest member width.
    const ALIGN: usize;

    /// Append exactly [`Self::SIZE`] bytes to `out`.
    fn write(&self, out: &mut Vec<u8>);

    /// Read from the first [`Self::SIZE`] bytes of `bytes`.
    ///
    /// Callers bounds-check before slicing; shorter input is a bug and
    /// panics.
    fn read(bytes: &[u8]) -> Self;
}
