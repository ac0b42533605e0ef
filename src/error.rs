use std::error::Error;
use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::ir::ExternKind;

/// Errors raised while a module is being assembled or serialized.
///
/// Any of these aborts the build attempt; the builder is not meant to be reused
/// afterwards.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Unresolved type reference: type index {index} is referenced but never defined")]
    UnresolvedTypeReference { index: u32 },

    #[error(
        "Missing table initializer: table of type {ty} needs {expected} initializers, got {actual}"
    )]
    MissingTableInitializer {
        ty: String,
        expected: u32,
        actual: u32,
    },

    #[error("Duplicate export name '{0}'")]
    DuplicateExportName(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Import order: imported {0} declared after a defined {0}")]
    ImportOrder(ExternKind),
}

pub type BuildResult<T> = Result<T, BuildError>;

macro_rules! encoding_error {
    ($($format:tt)*) => {
        $crate::error::BuildError::Encoding(format!($($format)*))
    };
}

pub(crate) use encoding_error;

/// An error surfaced by the host while consuming a built module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub kind: HostErrorKind,
    pub msg: String,
}

impl Error for HostError {}

impl Display for HostError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{kind}: {msg}", kind = self.kind, msg = self.msg)
    }
}

pub type HostResult<T> = Result<T, HostError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostErrorKind {
    Validation,
    Link,
    Type,
    Range,
    Runtime,
}

impl Display for HostErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HostErrorKind::Validation => write!(f, "ValidationError"),
            HostErrorKind::Link => write!(f, "LinkError"),
            HostErrorKind::Type => write!(f, "TypeError"),
            HostErrorKind::Range => write!(f, "RangeError"),
            HostErrorKind::Runtime => write!(f, "RuntimeError"),
        }
    }
}

macro_rules! host_error {
    ($kind:ident, $($format:tt)*) => {
        $crate::error::HostError {
            kind: $crate::error::HostErrorKind::$kind,
            msg: format!($($format)*),
        }
    };
}

pub(crate) use host_error;
