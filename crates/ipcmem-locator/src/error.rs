use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LocateError>;

/// Reasons a memory region could not be resolved.
#[derive(Debug, Error)]
pub enum LocateError {
    #[error("failed to read devicetree blob {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed devicetree blob: {0}")]
    Malformed(String),

    #[error("no devicetree node is compatible with {compatible:?}")]
    NoCompatibleNode { compatible: String },

    #[error("devicetree node {node:?} is disabled (status {status:?})")]
    Disabled { node: String, status: String },

    #[error("devicetree node {node:?} has no \"reg\" property")]
    MissingReg { node: String },

    #[error("\"reg\" of {node:?} is {len} bytes, expected at least {needed}")]
    ShortReg {
        node: String,
        len: usize,
        needed: usize,
    },

    #[error("unsupported cell layout: #address-cells={address_cells} #size-cells={size_cells}")]
    UnsupportedCells { address_cells: u32, size_cells: u32 },

    #[error("devicetree node {node:?} describes an empty region")]
    EmptyRegion { node: String },

    #[error("region of {node:?} overflows the address space: base=0x{base:x} size=0x{size:x}")]
    RegionOverflow { node: String, base: u64, size: u64 },
}

pub(crate) fn malformed(err: fdt_rs::error::DevTreeError) -> LocateError {
    LocateError::Malformed(format!("{err:?}"))
}
