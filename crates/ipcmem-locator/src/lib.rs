//! Resolution of the shared memory region a window is built over.
//!
//! The region's physical base and size are described by platform data. On devicetree platforms
//! that is a node such as
//!
//! ```text
//! ipcmemory@40000000 {
//!     compatible = "IPCMemory";
//!     reg = <0x0 0x40000000 0x0 0x10000000>;
//! };
//! ```
//!
//! [`DeviceTreeLocator`] reads it from a flattened blob; [`FixedRegion`] supplies a pair known
//! ahead of time (configuration overrides, tests).

use core::fmt;

pub mod blob;
mod devicetree;
mod error;

pub use devicetree::{DeviceTreeLocator, DEFAULT_COMPATIBLE};
pub use error::{LocateError, Result};

/// A resolved physical memory region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionDescriptor {
    /// Name of the node (or other source) that described the region.
    pub node: String,
    pub base: u64,
    pub size: u64,
}

impl fmt::Display for RegionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: 0x{:x}..0x{:x} (0x{:x} bytes)",
            self.node,
            self.base,
            self.base.saturating_add(self.size),
            self.size
        )
    }
}

/// Source of the one region a window is created for.
pub trait RegionLocator {
    fn locate(&self) -> Result<RegionDescriptor>;
}

impl<T: RegionLocator + ?Sized> RegionLocator for &T {
    fn locate(&self) -> Result<RegionDescriptor> {
        (**self).locate()
    }
}

impl<T: RegionLocator + ?Sized> RegionLocator for Box<T> {
    fn locate(&self) -> Result<RegionDescriptor> {
        (**self).locate()
    }
}

/// A region given directly as `(base, size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRegion {
    pub base: u64,
    pub size: u64,
}

impl RegionLocator for FixedRegion {
    fn locate(&self) -> Result<RegionDescriptor> {
        let node = "fixed".to_string();
        if self.size == 0 {
            return Err(LocateError::EmptyRegion { node });
        }
        if self.base.checked_add(self.size).is_none() {
            return Err(LocateError::RegionOverflow {
                node,
                base: self.base,
                size: self.size,
            });
        }
        Ok(RegionDescriptor {
            node,
            base: self.base,
            size: self.size,
        })
    }
}
