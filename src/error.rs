use thiserror::Error;

/// Storage for the table could not be obtained.
///
/// Whenever an operation returns this error the table is still valid at the
/// capacity it had before the call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfMemory {
    /// The global allocator returned null.
    #[error("memory allocation failed: requested {size} bytes")]
    AllocFailed {
        /// Number of bytes requested
        size: usize,
    },

    /// The requested slot count does not fit in the address space.
    #[error("hash table capacity overflow")]
    CapacityOverflow,

    /// Every slot is either live or a tombstone, so there is nowhere to probe
    /// to.
    #[error("every slot is occupied or tombstoned")]
    TableFull,
}

/// The key passed to `erase` is not present.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[error("no such key")]
pub struct NoSuchKey;

/// A [`TypeDescriptor`](crate::TypeDescriptor) that cannot describe a table.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidType {
    /// No hash function was supplied.
    #[error("type descriptor has no hash function")]
    MissingHash,

    /// `key_size` is zero.
    #[error("type descriptor has a zero-sized key")]
    ZeroKeySize,

    /// `value_size` is zero.
    #[error("type descriptor has a zero-sized value")]
    ZeroValueSize,
}

/// Failure to create an [`ErasedMap`](crate::ErasedMap).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateError {
    /// The descriptor was rejected.
    #[error(transparent)]
    InvalidType(#[from] InvalidType),

    /// The initial storage could not be allocated.
    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemory),
}

/// Any error produced by this crate.
///
/// Useful for callers that drive several kinds of operation and want a single
/// error type to propagate with `?`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// See [`InvalidType`].
    #[error(transparent)]
    InvalidType(#[from] InvalidType),

    /// See [`OutOfMemory`].
    #[error(transparent)]
    OutOfMemory(#[from] OutOfMemory),

    /// See [`NoSuchKey`].
    #[error(transparent)]
    NoSuchKey(#[from] NoSuchKey),
}

impl From<CreateError> for Error {
    fn from(err: CreateError) -> Self {
        match err {
            CreateError::InvalidType(err) => Error::InvalidType(err),
            CreateError::OutOfMemory(err) => Error::OutOfMemory(err),
        }
    }
}
