#![feature(error_generic_member_access)]
#![deny(missing_docs)]

//! Error handling for the geobuf crates.
//!
//! The taxonomy is small and deliberate: [`GeobufError::Format`] means the
//! bytes themselves are damaged and must not be read any further,
//! [`GeobufError::SchemaViolation`] means the caller handed us something the
//! schema forbids (and may correct and retry), and
//! [`GeobufError::CapacityExceeded`] means the addressable offset range ran
//! out and the dataset has to be split.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;

/// A (possibly borrowed) error message.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ErrString(Cow<'static, str>);

impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    fn from(msg: T) -> Self {
        ErrString(msg.into())
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The top-level error type for geobuf operations.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum GeobufError {
    /// The buffer is structurally invalid. Fatal: callers must not touch the
    /// reader again after seeing this.
    #[error("format error: {0}")]
    Format(ErrString, Backtrace),
    /// A schema-declared requirement was violated, e.g. a required field was
    /// never set or an enum byte is outside its declared range. The caller
    /// may correct the input and retry.
    #[error("schema violation: {0}")]
    SchemaViolation(ErrString, Backtrace),
    /// The addressable offset range was exhausted while building a buffer.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(ErrString, Backtrace),
    /// An argument does not make sense for the requested operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(ErrString, Backtrace),
    /// An index escaped its valid range.
    #[error("index {0} out of bounds from {1} to {2}")]
    OutOfBounds(usize, usize, usize, Backtrace),
}

impl Debug for GeobufError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{self}")?;
        let backtrace = match self {
            GeobufError::Format(_, bt)
            | GeobufError::SchemaViolation(_, bt)
            | GeobufError::CapacityExceeded(_, bt)
            | GeobufError::InvalidArgument(_, bt)
            | GeobufError::OutOfBounds(_, _, _, bt) => bt,
        };
        Debug::fmt(backtrace, f)
    }
}

impl From<std::str::Utf8Error> for GeobufError {
    fn from(err: std::str::Utf8Error) -> Self {
        GeobufError::Format(err.to_string().into(), Backtrace::capture())
    }
}

/// The result type for geobuf operations.
pub type GeobufResult<T> = Result<T, GeobufError>;

/// Construct a [`GeobufError`], capturing a backtrace at the call site.
///
/// The first form selects a variant (`geobuf_err!(Format: "bad root {}", x)`),
/// the bare form defaults to [`GeobufError::InvalidArgument`], and
/// `OutOfBounds` takes its index and range directly.
#[macro_export]
macro_rules! geobuf_err {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {
        $crate::GeobufError::OutOfBounds(
            $idx, $start, $stop,
            std::backtrace::Backtrace::capture(),
        )
    };
    ($variant:ident: $fmt:literal) => {
        $crate::GeobufError::$variant(
            $fmt.into(),
            std::backtrace::Backtrace::capture(),
        )
    };
    ($variant:ident: $fmt:literal, $($arg:expr),* $(,)?) => {
        $crate::GeobufError::$variant(
            format!($fmt, $($arg),*).into(),
            std::backtrace::Backtrace::capture(),
        )
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::geobuf_err!(InvalidArgument: $fmt $(, $arg)*)
    };
}

/// Return early with a [`GeobufError`]; accepts the same forms as
/// [`geobuf_err!`].
#[macro_export]
macro_rules! geobuf_bail {
    ($($tt:tt)+) => {
        return Err($crate::geobuf_err!($($tt)+))
    };
}

/// Panic with a [`GeobufError`]. Reserved for unrecoverable programmer
/// errors, e.g. misuse of a builder session.
#[macro_export]
macro_rules! geobuf_panic {
    (OutOfBounds: $idx:expr, $start:expr, $stop:expr) => {
        $crate::geobuf_panic!($crate::geobuf_err!(OutOfBounds: $idx, $start, $stop))
    };
    ($variant:ident: $fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::geobuf_panic!($crate::geobuf_err!($variant: $fmt $(, $arg)*))
    };
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::geobuf_panic!($crate::geobuf_err!($fmt $(, $arg)*))
    };
    ($err:expr) => {{
        let err: $crate::GeobufError = $err;
        std::panic!("{}", err)
    }};
}

/// Panic with context when an error or absence is a programming bug rather
/// than a recoverable condition.
pub trait GeobufExpect {
    /// The unwrapped value.
    type Output;

    /// Unwrap or panic with `msg` and the underlying error.
    fn geobuf_expect(self, msg: &str) -> Self::Output;
}

impl<T> GeobufExpect for GeobufResult<T> {
    type Output = T;

    #[allow(clippy::panic)]
    fn geobuf_expect(self, msg: &str) -> Self::Output {
        match self {
            Ok(value) => value,
            Err(err) => panic!("{msg}: {err}"),
        }
    }
}

impl<T> GeobufExpect for Option<T> {
    type Output = T;

    #[allow(clippy::panic)]
    fn geobuf_expect(self, msg: &str) -> Self::Output {
        match self {
            Some(value) => value,
            None => panic!("{msg}"),
        }
    }
}

/// Like [`GeobufExpect`] but without a message, for results whose failure is
/// impossible by construction.
pub trait GeobufUnwrap {
    /// The unwrapped value.
    type Output;

    /// Unwrap or panic with the underlying error.
    fn geobuf_unwrap(self) -> Self::Output;
}

impl<T> GeobufUnwrap for GeobufResult<T> {
    type Output = T;

    #[allow(clippy::panic)]
    fn geobuf_unwrap(self) -> Self::Output {
        match self {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fails(which: u8) -> GeobufResult<()> {
        match which {
            0 => geobuf_bail!(Format: "truncated at byte {}", 12),
            1 => geobuf_bail!(SchemaViolation: "missing name"),
            _ => Err(geobuf_err!(OutOfBounds: 9, 0, 4)),
        }
    }

    #[test]
    fn display_includes_taxonomy() {
        assert_eq!(
            fails(0).unwrap_err().to_string(),
            "format error: truncated at byte 12"
        );
        assert_eq!(
            fails(1).unwrap_err().to_string(),
            "schema violation: missing name"
        );
        assert_eq!(
            fails(2).unwrap_err().to_string(),
            "index 9 out of bounds from 0 to 4"
        );
    }

    #[test]
    fn bare_form_is_invalid_argument() {
        let err = geobuf_err!("no such field {}", "title");
        assert!(matches!(err, GeobufError::InvalidArgument(_, _)));
    }
}
