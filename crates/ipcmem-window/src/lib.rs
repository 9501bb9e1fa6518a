//! Bounds-checked, offset-addressed window onto a fixed-size memory region.
//!
//! [`MemoryWindow`] owns the extent of one mapped region and is the single authority on whether an
//! access is in range. Data moves between the region and caller-owned buffers through the
//! [`transport`] traits, which may stop short; the window then reports the partial byte count
//! instead of failing the request.
//!
//! Regions come from three places:
//! - [`MemoryWindow::anonymous`]: a zeroed heap allocation (host runs, tests).
//! - [`MemoryWindow::map_file`]: a shared `mmap` of a file or device node such as `/dev/mem`.
//! - [`MemoryWindow::from_raw_parts`]: a region mapped by somebody else.

mod error;
#[cfg(unix)]
mod mapping;
pub mod transport;
mod window;

pub use error::{Result, WindowError};
pub use transport::{CallerSink, CallerSource, Faulting, SliceSink, SliceSource};
pub use window::{BackingKind, MemoryWindow, Transfer};
