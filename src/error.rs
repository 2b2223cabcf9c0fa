//! Error taxonomy for the on-disk FAT engine.
//!
//! Every fallible public operation returns [`Result<T>`], an alias over
//! [`FatError`]. Internal components may raise narrower errors where that
//! keeps call sites honest, but they all convert into `FatError` at the
//! boundary the public API crosses.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, FatError>;

/// Every error the engine can report, per the taxonomy the core commits to.
#[derive(Debug, Error)]
pub enum FatError {
    #[error("device i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("short read: expected {expected} bytes at offset {offset}, got {got}")]
    ShortRead {
        offset: u64,
        expected: usize,
        got: usize,
    },

    #[error("boot sector signature 0x55AA missing at offset 510")]
    BadSignature,

    #[error("boot sector geometry is inconsistent: {0}")]
    BadGeometry(&'static str),

    #[error("FAT variant is not supported here: {0}")]
    UnsupportedVariant(&'static str),

    #[error("cluster chain starting at {first_cluster} is corrupt: {reason}")]
    CorruptChain {
        first_cluster: u32,
        reason: &'static str,
    },

    #[error("no free cluster available")]
    NoSpace,

    #[error("fixed FAT12/16 root directory is full")]
    RootDirFull,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("name too long: {0} UTF-16 code units (max 255)")]
    NameTooLong(usize),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("could not synthesize a unique 8.3 alias for {0:?}")]
    ShortNameExhausted(String),

    #[error("file is read-only: {0}")]
    ReadOnlyAttribute(String),
}
