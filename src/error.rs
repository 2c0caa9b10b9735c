//! Error types returned by the engine.
//!
//! Every failure carries an [`ErrorKind`], so callers can branch on what went wrong (retry on
//! I/O, ask for elevated access, ...) without parsing messages.

use std::{collections::TryReserveError, io, path::PathBuf};

use thiserror::Error;

use crate::{gpt::GptError, mbr::MbrError};

/// Result type used throughout this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Coarse classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Wrong shape or value of an input.
    InvalidArgument,

    /// An allocation failed.
    OutOfMemory,

    /// The operation is not meaningful for the active label or format.
    Unsupported,

    /// A lookup did not match anything.
    NotFound,

    /// A write was attempted on a read-only context.
    ReadOnly,

    /// The underlying device failed to read or write.
    Io,

    /// The device could not be opened with the requested access.
    PermissionDenied,

    /// The operation requires a device or a label that is not there.
    InvalidState,
}

/// Reason why a partition could not be added to a label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("partition number is not set")]
    MissingPartno,

    #[error("start sector is not set")]
    MissingStart,

    #[error("size is not set")]
    MissingSize,

    #[error("partition number {0} is out of range")]
    PartnoOutOfRange(usize),

    #[error("partition number {0} is already used")]
    PartnoInUse(usize),

    #[error("partition {0} does not exist")]
    NoSuchPartition(usize),

    #[error("the partition table is full")]
    TableFull,

    #[error("partition lies outside of the usable area")]
    OutOfBounds,

    #[error("partition overlaps partition {0}")]
    Overlap(usize),

    #[error("start sector {0} is not aligned to a physical sector")]
    Misaligned(u64),

    #[error("no free space left on the device")]
    NoFreeSpace,

    #[error("partition size cannot be zero")]
    ZeroSize,

    #[error("partition exceeds the addressing limits of the label")]
    TooLarge,

    #[error("partition type does not belong to this label")]
    IncompatibleType,
}

/// Error type for every operation of this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("out of memory")]
    OutOfMemory(#[from] TryReserveError),

    #[error("no device assigned")]
    NoDevice,

    #[error("no disk label")]
    NoLabel,

    #[error("context is read-only")]
    ReadOnly,

    #[error("cannot open {}", .path.display())]
    DeviceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("permission denied: {}", .path.display())]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("device is too small for a {0} label")]
    DeviceTooSmall(&'static str),

    #[error("unsupported disk label format '{0}'")]
    UnsupportedFormat(String),

    #[error("{op} is not supported by {label} labels")]
    UnsupportedOperation {
        label: &'static str,
        op: &'static str,
    },

    #[error("invalid partition: {0}")]
    InvalidPartition(#[from] PartitionError),

    #[error("unknown field tag {0}")]
    UnknownField(u32),

    #[error("partition type '{0}' not found")]
    TypeNotFound(String),

    #[error(transparent)]
    Mbr(#[from] MbrError),

    #[error(transparent)]
    Gpt(#[from] GptError),

    #[error("I/O error")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_)
            | Self::DeviceTooSmall(_)
            | Self::InvalidPartition(_)
            | Self::UnknownField(_)
            | Self::Mbr(_)
            | Self::Gpt(_) => ErrorKind::InvalidArgument,
            Self::OutOfMemory(_) => ErrorKind::OutOfMemory,
            Self::NoDevice | Self::NoLabel => ErrorKind::InvalidState,
            Self::ReadOnly => ErrorKind::ReadOnly,
            Self::DeviceUnavailable { .. } | Self::Io(_) => ErrorKind::Io,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::UnsupportedFormat(_) | Self::UnsupportedOperation { .. } => {
                ErrorKind::Unsupported
            }
            Self::TypeNotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Returns the OS error code behind this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::DeviceUnavailable { source, .. } | Self::PermissionDenied { source, .. } => {
                source.raw_os_error()
            }
            Self::Io(err) => err.raw_os_error(),
            _ => None,
        }
    }
}
