use std::path::Path;

use fdt_rs::base::DevTree;
use fdt_rs::prelude::FallibleIterator;

use crate::error::{malformed, LocateError, Result};
use crate::{RegionDescriptor, RegionLocator};

/// Compatible string of the shared memory node on the reference boards.
pub const DEFAULT_COMPATIBLE: &str = "IPCMemory";

const FDT_MAGIC: u32 = 0xd00d_feed;
const FDT_HEADER_LEN: usize = 40;

const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_NOP: u32 = 0x4;
const FDT_END: u32 = 0x9;

// Values a node gets when its parent omits the properties.
const DEFAULT_ADDRESS_CELLS: u32 = 2;
const DEFAULT_SIZE_CELLS: u32 = 1;

/// Finds the memory region of the first enabled node whose `compatible` list contains a given
/// string, and reads its first `reg` entry.
///
/// Matches with a `status` other than `okay` are skipped; if every match is disabled the first
/// one is reported. `reg` is decoded with the `#address-cells`/`#size-cells` of the matched
/// node's parent.
#[derive(Debug, Clone)]
pub struct DeviceTreeLocator {
    // Backed by u32 words so the blob handed to the parser is 4-byte aligned.
    words: Vec<u32>,
    len: usize,
    compatible: String,
}

impl DeviceTreeLocator {
    pub fn from_bytes(blob: &[u8], compatible: impl Into<String>) -> Result<Self> {
        if blob.len() < FDT_HEADER_LEN {
            return Err(LocateError::Malformed(format!(
                "blob is {} bytes, shorter than the header",
                blob.len()
            )));
        }
        let magic = be_u32(&blob[0..4]);
        if magic != FDT_MAGIC {
            return Err(LocateError::Malformed(format!("bad magic 0x{magic:08x}")));
        }
        let total = be_u32(&blob[4..8]) as usize;
        if total < FDT_HEADER_LEN || total > blob.len() {
            return Err(LocateError::Malformed(format!(
                "header totalsize {total} does not fit the {} byte blob",
                blob.len()
            )));
        }

        let mut words = vec![0u32; total.div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut words)[..total].copy_from_slice(&blob[..total]);

        Ok(Self {
            words,
            len: total,
            compatible: compatible.into(),
        })
    }

    pub fn from_path(path: impl AsRef<Path>, compatible: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        let blob = std::fs::read(path).map_err(|source| LocateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(&blob, compatible)
    }

    pub fn compatible(&self) -> &str {
        &self.compatible
    }

    fn blob(&self) -> &[u8] {
        &bytemuck::cast_slice::<u32, u8>(&self.words)[..self.len]
    }
}

impl RegionLocator for DeviceTreeLocator {
    fn locate(&self) -> Result<RegionDescriptor> {
        let blob = self.blob();
        // Safety: the buffer is 4-byte aligned, exactly `totalsize` long, and carries a checked
        // magic; the parser validates the remaining header fields and reports errors.
        let devtree = unsafe { DevTree::new(blob) }.map_err(malformed)?;
        if devtree.nodes().next().map_err(malformed)?.is_none() {
            return Err(LocateError::Malformed("no root node".to_string()));
        }

        let compatible = self.compatible.as_str();
        let matches = matching_nodes(blob, compatible)?;

        let mut first_disabled = None;
        for found in matches {
            match found.resolve() {
                Err(err @ LocateError::Disabled { .. }) => {
                    tracing::debug!("skipping {err}");
                    first_disabled.get_or_insert(err);
                }
                Ok(region) => {
                    tracing::debug!(
                        "devicetree node {:?} ({compatible}): base=0x{:x} size=0x{:x}",
                        region.node,
                        region.base,
                        region.size
                    );
                    return Ok(region);
                }
                Err(err) => return Err(err),
            }
        }
        Err(first_disabled.unwrap_or_else(|| LocateError::NoCompatibleNode {
            compatible: compatible.to_string(),
        }))
    }
}

/// A node whose `compatible` list matched, with what is needed to decode its `reg`.
struct MatchedNode<'a> {
    name: &'a str,
    status: Option<String>,
    reg: Option<&'a [u8]>,
    address_cells: u32,
    size_cells: u32,
}

impl MatchedNode<'_> {
    fn resolve(self) -> Result<RegionDescriptor> {
        let name = self.name.to_string();
        if let Some(status) = self.status {
            if status != "okay" && status != "ok" {
                return Err(LocateError::Disabled { node: name, status });
            }
        }

        let (address_cells, size_cells) = (self.address_cells, self.size_cells);
        if !(1..=2).contains(&address_cells) || !(1..=2).contains(&size_cells) {
            return Err(LocateError::UnsupportedCells {
                address_cells,
                size_cells,
            });
        }

        let reg = self
            .reg
            .ok_or_else(|| LocateError::MissingReg { node: name.clone() })?;
        let needed = ((address_cells + size_cells) * 4) as usize;
        if reg.len() < needed {
            return Err(LocateError::ShortReg {
                node: name,
                len: reg.len(),
                needed,
            });
        }

        let split = (address_cells * 4) as usize;
        let base = read_cells(&reg[..split]);
        let size = read_cells(&reg[split..needed]);
        if size == 0 {
            return Err(LocateError::EmptyRegion { node: name });
        }
        if base.checked_add(size).is_none() {
            return Err(LocateError::RegionOverflow {
                node: name,
                base,
                size,
            });
        }
        Ok(RegionDescriptor {
            node: name,
            base,
            size,
        })
    }
}

/// Per-node state while walking the structure block.
#[derive(Default)]
struct Frame<'a> {
    name: &'a str,
    ordinal: usize,
    address_cells: Option<u32>,
    size_cells: Option<u32>,
    compatible: bool,
    status: Option<String>,
    reg: Option<&'a [u8]>,
}

/// Walks the structure block and returns every node whose `compatible` list contains
/// `compatible`, in document order.
///
/// The walk keeps a stack of open nodes so each match is paired with its parent's cell widths,
/// which the parser's flat node iterator does not expose.
fn matching_nodes<'a>(blob: &'a [u8], compatible: &str) -> Result<Vec<MatchedNode<'a>>> {
    let header = |index: usize| be_u32(&blob[index * 4..index * 4 + 4]) as usize;
    let (off_struct, off_strings) = (header(2), header(3));
    let (size_strings, size_struct) = (header(8), header(9));
    let structure = section(blob, off_struct, size_struct, "structure")?;
    let strings = section(blob, off_strings, size_strings, "strings")?;

    let mut cursor = Cursor {
        buf: structure,
        pos: 0,
    };
    let mut stack: Vec<Frame<'a>> = Vec::new();
    let mut ordinal = 0;
    let mut found = Vec::new();

    loop {
        match cursor.u32()? {
            FDT_BEGIN_NODE => {
                let name = cursor.cstr()?;
                stack.push(Frame {
                    name,
                    ordinal,
                    ..Frame::default()
                });
                ordinal += 1;
            }
            FDT_PROP => {
                let len = cursor.u32()? as usize;
                let name_off = cursor.u32()? as usize;
                let value = cursor.bytes(len)?;
                let name = string_at(strings, name_off)?;
                let frame = stack
                    .last_mut()
                    .ok_or_else(|| LocateError::Malformed("property outside a node".to_string()))?;
                match name {
                    "#address-cells" => frame.address_cells = Some(cell_count(value)?),
                    "#size-cells" => frame.size_cells = Some(cell_count(value)?),
                    "compatible" => frame.compatible = has_string(value, compatible),
                    "status" => frame.status = Some(first_string(value)),
                    "reg" => frame.reg = Some(value),
                    _ => {}
                }
            }
            FDT_END_NODE => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| LocateError::Malformed("unbalanced end of node".to_string()))?;
                if frame.compatible {
                    let parent = stack.last();
                    found.push((
                        frame.ordinal,
                        MatchedNode {
                            name: frame.name,
                            status: frame.status,
                            reg: frame.reg,
                            address_cells: parent
                                .and_then(|p| p.address_cells)
                                .unwrap_or(DEFAULT_ADDRESS_CELLS),
                            size_cells: parent
                                .and_then(|p| p.size_cells)
                                .unwrap_or(DEFAULT_SIZE_CELLS),
                        },
                    ));
                }
            }
            FDT_NOP => {}
            FDT_END => break,
            token => {
                return Err(LocateError::Malformed(format!(
                    "unknown structure token 0x{token:x}"
                )))
            }
        }
    }
    if !stack.is_empty() {
        return Err(LocateError::Malformed("unterminated node".to_string()));
    }

    // Nodes are pushed when they close; report them in the order they open.
    found.sort_by_key(|(ordinal, _)| *ordinal);
    Ok(found.into_iter().map(|(_, node)| node).collect())
}

fn section<'a>(blob: &'a [u8], off: usize, len: usize, what: &str) -> Result<&'a [u8]> {
    off.checked_add(len)
        .and_then(|end| blob.get(off..end))
        .ok_or_else(|| LocateError::Malformed(format!("{what} block lies outside the blob")))
}

fn string_at(strings: &[u8], off: usize) -> Result<&str> {
    let tail = strings
        .get(off..)
        .ok_or_else(|| LocateError::Malformed(format!("string offset {off} out of range")))?;
    let end = tail
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| LocateError::Malformed("unterminated property name".to_string()))?;
    std::str::from_utf8(&tail[..end])
        .map_err(|_| LocateError::Malformed("property name is not UTF-8".to_string()))
}

fn cell_count(value: &[u8]) -> Result<u32> {
    if value.len() != 4 {
        return Err(LocateError::Malformed(format!(
            "cell count property is {} bytes",
            value.len()
        )));
    }
    Ok(be_u32(value))
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let out = self
            .pos
            .checked_add(len)
            .and_then(|end| self.buf.get(self.pos..end))
            .ok_or_else(|| LocateError::Malformed("structure block is truncated".to_string()))?;
        // Tokens are 4-byte aligned.
        self.pos = (self.pos + len).next_multiple_of(4);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        self.bytes(4).map(be_u32)
    }

    fn cstr(&mut self) -> Result<&'a str> {
        let tail = self.buf.get(self.pos..).unwrap_or_default();
        let len = tail
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| LocateError::Malformed("unterminated node name".to_string()))?;
        let name = self.bytes(len + 1)?;
        std::str::from_utf8(&name[..len])
            .map_err(|_| LocateError::Malformed("node name is not UTF-8".to_string()))
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_cells(bytes: &[u8]) -> u64 {
    bytes
        .chunks_exact(4)
        .fold(0u64, |acc, cell| (acc << 32) | u64::from(be_u32(cell)))
}

/// Whether a NUL-separated string list property contains `needle`.
fn has_string(propbuf: &[u8], needle: &str) -> bool {
    propbuf
        .split(|b| *b == 0)
        .any(|s| !s.is_empty() && s == needle.as_bytes())
}

fn first_string(propbuf: &[u8]) -> String {
    let end = propbuf.iter().position(|b| *b == 0).unwrap_or(propbuf.len());
    String::from_utf8_lossy(&propbuf[..end]).into_owned()
}
