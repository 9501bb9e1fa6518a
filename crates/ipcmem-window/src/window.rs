use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::path::Path;

use crate::error::{Result, WindowError};
use crate::transport::{CallerSink, CallerSource, SliceSink, SliceSource};

/// Bytes staged on the stack per transport call.
const CHUNK_BYTES: usize = 256;

/// Outcome of a data-path request.
///
/// `transferred < requested` means the caller-side transport faulted part-way; the bytes that did
/// cross are already in place and no further bytes were touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    pub requested: u64,
    pub transferred: u64,
}

impl Transfer {
    pub fn bytes(&self) -> u64 {
        self.transferred
    }

    pub fn is_partial(&self) -> bool {
        self.transferred < self.requested
    }
}

/// How the bytes behind a [`MemoryWindow`] are provided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    /// Zeroed heap allocation owned by the window.
    Anonymous,
    /// Region mapped by someone else and adopted via [`MemoryWindow::from_raw_parts`].
    Foreign,
    /// `mmap` of a file or device node owned by the window.
    File,
}

/// Owner of the bytes behind the window's base pointer; held only to be dropped with it.
enum Backing {
    Anonymous { _cells: Box<[AtomicU8]> },
    Foreign,
    #[cfg(unix)]
    File { _mapping: crate::mapping::FileMapping },
}

/// Bounds-checked view over a fixed-size memory region.
///
/// The extent (`base`, `size`) is fixed at construction and never changes. Every data-path call
/// validates `offset + len` against `size` with overflow-checked arithmetic before any pointer is
/// formed, so a rejected request touches no memory at all.
///
/// # Concurrency
/// The window is reentrant but not synchronized. Any number of threads may call into a shared
/// window; all region accesses are byte-granular relaxed atomic loads/stores, so racing accesses
/// are defined behaviour, but nothing orders them. Concurrent writes to overlapping bytes (or a
/// read overlapping a write) may observe any interleaving of the involved bytes. Callers that need
/// consistent multi-byte snapshots must serialize externally.
///
/// The region is never exposed as `&[u8]`/`&mut [u8]`: the other side of the region (hardware or
/// a peer process) may mutate it at any time, which would violate the aliasing guarantees Rust
/// attaches to slice references.
pub struct MemoryWindow {
    base: *const AtomicU8,
    size: u64,
    control_requests: AtomicU64,
    backing: Backing,
}

// Safety: all accesses through `base` go through `AtomicU8`, and the backing outlives `base`.
unsafe impl Send for MemoryWindow {}
unsafe impl Sync for MemoryWindow {}

impl MemoryWindow {
    /// Creates a window over a fresh, zero-filled heap region of `size` bytes.
    pub fn anonymous(size: u64) -> Result<Self> {
        let len = Self::checked_len(size)?;
        let bytes = vec![0u8; len].into_boxed_slice();
        // Safety: `AtomicU8` has the same size, alignment and bit validity as `u8`, so the slice
        // layout (and the allocation it came from) is unchanged.
        let cells = unsafe { Box::from_raw(Box::into_raw(bytes) as *mut [AtomicU8]) };
        let base = cells.as_ptr();
        Ok(Self::with_backing(base, size, Backing::Anonymous { _cells: cells }))
    }

    /// Adopts an already-mapped region.
    ///
    /// # Safety
    /// The caller must ensure:
    /// - `base` points to `size` bytes that are valid for reads and writes for the lifetime of the
    ///   returned window.
    /// - Every other access to the region from this process is atomic or otherwise free of Rust
    ///   data races (accesses by hardware or other processes are fine).
    pub unsafe fn from_raw_parts(base: *mut u8, size: u64) -> Result<Self> {
        let len = Self::checked_len(size)?;
        let base_addr = base as usize;
        if base.is_null() || base_addr.checked_add(len).is_none() {
            return Err(WindowError::AddressOverflow {
                base: base_addr,
                size,
            });
        }
        Ok(Self::with_backing(
            base as *const AtomicU8,
            size,
            Backing::Foreign,
        ))
    }

    /// Maps `size` bytes of `path` starting at `file_offset` (e.g. `/dev/mem` at a physical
    /// address) and creates a window over the mapping. The mapping is released when the window
    /// is dropped.
    #[cfg(unix)]
    pub fn map_file(path: impl AsRef<Path>, file_offset: u64, size: u64) -> Result<Self> {
        let path = path.as_ref();
        let len = Self::checked_len(size)?;
        let mapping =
            crate::mapping::FileMapping::new(path, file_offset, len).map_err(|source| {
                WindowError::Map {
                    path: path.to_path_buf(),
                    offset: file_offset,
                    size,
                    source,
                }
            })?;
        let base = mapping.data() as *const AtomicU8;
        tracing::debug!(
            "mapped {} at 0x{file_offset:x} (0x{size:x} bytes)",
            path.display()
        );
        Ok(Self::with_backing(base, size, Backing::File { _mapping: mapping }))
    }

    #[cfg(not(unix))]
    pub fn map_file(_path: impl AsRef<Path>, _file_offset: u64, _size: u64) -> Result<Self> {
        Err(WindowError::MapUnsupported)
    }

    fn checked_len(size: u64) -> Result<usize> {
        if size == 0 {
            return Err(WindowError::EmptyRegion);
        }
        usize::try_from(size).map_err(|_| WindowError::SizeTooLarge { size })
    }

    fn with_backing(base: *const AtomicU8, size: u64, backing: Backing) -> Self {
        Self {
            base,
            size,
            control_requests: AtomicU64::new(0),
            backing,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn backing(&self) -> BackingKind {
        match self.backing {
            Backing::Anonymous { .. } => BackingKind::Anonymous,
            Backing::Foreign => BackingKind::Foreign,
            #[cfg(unix)]
            Backing::File { .. } => BackingKind::File,
        }
    }

    /// Number of [`MemoryWindow::control`] requests seen so far.
    pub fn control_requests(&self) -> u64 {
        self.control_requests.load(Ordering::Relaxed)
    }

    /// Returns whether `[offset, offset + len)` lies inside the window.
    ///
    /// A zero-length access is in range for every `offset <= size`, including `offset == size`.
    #[inline]
    pub fn validate(&self, offset: u64, len: u64) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.size)
    }

    #[inline]
    fn checked_start(&self, op: &str, offset: u64, len: u64) -> Result<usize> {
        if !self.validate(offset, len) {
            tracing::warn!(
                "{op}: rejected offset=0x{offset:x} len=0x{len:x} (window size 0x{:x})",
                self.size
            );
            return Err(WindowError::OutOfRange {
                offset,
                len,
                size: self.size,
            });
        }
        // `offset <= size` and `size` fits in usize (checked at construction).
        Ok(offset as usize)
    }

    #[inline]
    fn cell(&self, index: usize) -> &AtomicU8 {
        debug_assert!((index as u64) < self.size);
        // Safety: callers only pass indices below `size`, validated by `checked_start`.
        unsafe { &*self.base.add(index) }
    }

    /// Copies `len` bytes starting at `offset` into `sink`.
    ///
    /// Returns [`WindowError::OutOfRange`] without touching anything when the range is invalid.
    /// If the sink stops accepting bytes the returned [`Transfer`] is partial.
    pub fn read<S: CallerSink + ?Sized>(
        &self,
        offset: u64,
        len: u64,
        sink: &mut S,
    ) -> Result<Transfer> {
        let start = self.checked_start("read", offset, len)?;
        let mut chunk = [0u8; CHUNK_BYTES];
        let mut moved = 0u64;

        while moved < len {
            let take = (len - moved).min(CHUNK_BYTES as u64) as usize;
            let at = start + moved as usize;
            for (i, slot) in chunk[..take].iter_mut().enumerate() {
                *slot = self.cell(at + i).load(Ordering::Relaxed);
            }
            let accepted = sink.accept(&chunk[..take]).min(take);
            moved += accepted as u64;
            if accepted < take {
                break;
            }
        }

        let transfer = Transfer {
            requested: len,
            transferred: moved,
        };
        self.log_transfer("read", offset, transfer);
        Ok(transfer)
    }

    /// Copies up to `len` bytes from `source` into the window starting at `offset`.
    ///
    /// Returns [`WindowError::OutOfRange`] without touching anything when the range is invalid.
    /// If the source runs dry only the supplied prefix is written and the transfer is partial.
    pub fn write<S: CallerSource + ?Sized>(
        &self,
        offset: u64,
        len: u64,
        source: &mut S,
    ) -> Result<Transfer> {
        let start = self.checked_start("write", offset, len)?;
        let mut chunk = [0u8; CHUNK_BYTES];
        let mut moved = 0u64;

        while moved < len {
            let take = (len - moved).min(CHUNK_BYTES as u64) as usize;
            let supplied = source.supply(&mut chunk[..take]).min(take);
            let at = start + moved as usize;
            for (i, byte) in chunk[..supplied].iter().copied().enumerate() {
                self.cell(at + i).store(byte, Ordering::Relaxed);
            }
            moved += supplied as u64;
            if supplied < take {
                break;
            }
        }

        let transfer = Transfer {
            requested: len,
            transferred: moved,
        };
        self.log_transfer("write", offset, transfer);
        Ok(transfer)
    }

    /// Out-of-band request hook. No command is interpreted; the request is counted and traced and
    /// always succeeds with an empty transfer.
    pub fn control(&self, command: u32, arg: u64) -> Result<Transfer> {
        let seen = self.control_requests.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!("control: cmd={command} arg=0x{arg:x} (request #{seen}, ignored)");
        Ok(Transfer::default())
    }

    fn log_transfer(&self, op: &str, offset: u64, transfer: Transfer) {
        if transfer.is_partial() {
            tracing::warn!(
                "{op}: transport fault at offset=0x{offset:x}, moved 0x{:x} of 0x{:x} bytes",
                transfer.transferred,
                transfer.requested
            );
        } else {
            tracing::trace!("{op}: offset=0x{offset:x} len=0x{:x}", transfer.transferred);
        }
    }

    /// Reads `dst.len()` bytes at `offset`.
    pub fn read_bytes(&self, offset: u64, dst: &mut [u8]) -> Result<usize> {
        let len = dst.len() as u64;
        let transfer = self.read(offset, len, &mut SliceSink::new(dst))?;
        Ok(transfer.transferred as usize)
    }

    /// Writes all of `src` at `offset`.
    pub fn write_bytes(&self, offset: u64, src: &[u8]) -> Result<usize> {
        let len = src.len() as u64;
        let transfer = self.write(offset, len, &mut SliceSource::new(src))?;
        Ok(transfer.transferred as usize)
    }

    pub fn read_u8(&self, offset: u64) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_bytes(offset, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16_le(&self, offset: u64) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_bytes(offset, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32_le(&self, offset: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64_le(&self, offset: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_bytes(offset, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn write_u8(&self, offset: u64, value: u8) -> Result<()> {
        self.write_bytes(offset, &[value]).map(|_| ())
    }

    pub fn write_u16_le(&self, offset: u64, value: u16) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes()).map(|_| ())
    }

    pub fn write_u32_le(&self, offset: u64, value: u32) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes()).map(|_| ())
    }

    pub fn write_u64_le(&self, offset: u64, value: u64) -> Result<()> {
        self.write_bytes(offset, &value.to_le_bytes()).map(|_| ())
    }
}

impl fmt::Debug for MemoryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryWindow")
            .field("base", &self.base)
            .field("size", &format_args!("0x{:x}", self.size))
            .field("backing", &self.backing())
            .finish()
    }
}

impl Drop for MemoryWindow {
    fn drop(&mut self) {
        tracing::debug!(
            "releasing {:?} memory window (0x{:x} bytes)",
            self.backing(),
            self.size
        );
    }
}
