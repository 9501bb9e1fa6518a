use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WindowError>;

/// Errors returned by [`MemoryWindow`](crate::MemoryWindow) construction and accesses.
///
/// Only [`WindowError::OutOfRange`] can be produced by a data-path call; every other variant is an
/// initialization failure and means no window was created.
#[derive(Debug, Error)]
pub enum WindowError {
    /// The requested `offset`/`len` pair is outside the window, or `offset + len` overflows.
    #[error("window access out of range: offset=0x{offset:x} len=0x{len:x} size=0x{size:x}")]
    OutOfRange { offset: u64, len: u64, size: u64 },

    #[error("memory window must not be empty")]
    EmptyRegion,

    /// The requested size cannot be represented by the current platform's `usize`.
    #[error("memory window size 0x{size:x} does not fit in the host address space")]
    SizeTooLarge { size: u64 },

    /// `base + size` wraps the host address space.
    #[error("memory window base 0x{base:x} with size 0x{size:x} overflows the address space")]
    AddressOverflow { base: usize, size: u64 },

    #[error("failed to map {path:?} at offset 0x{offset:x} (size 0x{size:x}): {source}")]
    Map {
        path: PathBuf,
        offset: u64,
        size: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("file-backed windows are not supported on this platform")]
    MapUnsupported,
}
