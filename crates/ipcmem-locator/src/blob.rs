//! Minimal flattened devicetree (FDT v17) writer.
//!
//! Enough to describe a shared memory node for host runs and tests; it has no support for
//! memory reservations, phandles or overlays.

use thiserror::Error;

const FDT_MAGIC: u32 = 0xd00d_feed;
const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_END: u32 = 0x9;

const HEADER_LEN: usize = 40;
// One all-zero terminator entry.
const RSVMAP_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    #[error("end_node without a matching begin_node")]
    UnbalancedEndNode,

    #[error("{what} does not fit in a 32-bit devicetree field")]
    TooLarge { what: &'static str },
}

/// Builds a blob node by node. Misuse is recorded and reported by [`FdtBuilder::finish`].
#[derive(Debug, Default, Clone)]
pub struct FdtBuilder {
    structure: Vec<u8>,
    strings: Vec<u8>,
    depth: usize,
    error: Option<BlobError>,
}

impl FdtBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a node. The root node has an empty name.
    pub fn begin_node(&mut self, name: &str) -> &mut Self {
        push_u32(&mut self.structure, FDT_BEGIN_NODE);
        self.structure.extend_from_slice(name.as_bytes());
        self.structure.push(0);
        pad4(&mut self.structure);
        self.depth += 1;
        self
    }

    pub fn end_node(&mut self) -> &mut Self {
        if self.depth == 0 {
            self.fail(BlobError::UnbalancedEndNode);
            return self;
        }
        push_u32(&mut self.structure, FDT_END_NODE);
        self.depth -= 1;
        self
    }

    pub fn prop(&mut self, name: &str, value: &[u8]) -> &mut Self {
        let (Ok(len), Some(name_off)) = (u32::try_from(value.len()), self.string_offset(name))
        else {
            self.fail(BlobError::TooLarge {
                what: "property",
            });
            return self;
        };
        push_u32(&mut self.structure, FDT_PROP);
        push_u32(&mut self.structure, len);
        push_u32(&mut self.structure, name_off);
        self.structure.extend_from_slice(value);
        pad4(&mut self.structure);
        self
    }

    pub fn prop_u32(&mut self, name: &str, value: u32) -> &mut Self {
        self.prop(name, &value.to_be_bytes())
    }

    pub fn prop_cells(&mut self, name: &str, cells: &[u32]) -> &mut Self {
        let bytes: Vec<u8> = cells.iter().flat_map(|c| c.to_be_bytes()).collect();
        self.prop(name, &bytes)
    }

    /// Writes a string-list property (each entry NUL terminated).
    pub fn prop_strings(&mut self, name: &str, values: &[&str]) -> &mut Self {
        let mut bytes = Vec::new();
        for v in values {
            bytes.extend_from_slice(v.as_bytes());
            bytes.push(0);
        }
        self.prop(name, &bytes)
    }

    pub fn prop_str(&mut self, name: &str, value: &str) -> &mut Self {
        self.prop_strings(name, &[value])
    }

    fn fail(&mut self, err: BlobError) {
        self.error.get_or_insert(err);
    }

    fn string_offset(&mut self, name: &str) -> Option<u32> {
        let needle = name.as_bytes();
        let mut off = 0;
        for entry in self.strings.split(|b| *b == 0) {
            if entry == needle && off < self.strings.len() {
                return u32::try_from(off).ok();
            }
            off += entry.len() + 1;
        }
        let off = u32::try_from(self.strings.len()).ok()?;
        self.strings.extend_from_slice(needle);
        self.strings.push(0);
        Some(off)
    }

    /// Closes any open nodes and serializes the blob.
    pub fn finish(&self) -> Result<Vec<u8>, BlobError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        let mut structure = self.structure.clone();
        for _ in 0..self.depth {
            push_u32(&mut structure, FDT_END_NODE);
        }
        push_u32(&mut structure, FDT_END);

        let off_rsvmap = HEADER_LEN;
        let off_struct = off_rsvmap + RSVMAP_LEN;
        let off_strings = off_struct + structure.len();
        let total = off_strings + self.strings.len();

        let field = |v: usize, what: &'static str| {
            u32::try_from(v).map_err(|_| BlobError::TooLarge { what })
        };
        let header = [
            FDT_MAGIC,
            field(total, "blob")?,
            field(off_struct, "structure offset")?,
            field(off_strings, "strings offset")?,
            field(off_rsvmap, "reservation map offset")?,
            17, // version
            16, // last_comp_version
            0,  // boot_cpuid_phys
            field(self.strings.len(), "strings block")?,
            field(structure.len(), "structure block")?,
        ];

        let mut out = Vec::with_capacity(total);
        for word in header {
            push_u32(&mut out, word);
        }
        out.resize(off_struct, 0);
        out.extend_from_slice(&structure);
        out.extend_from_slice(&self.strings);
        Ok(out)
    }
}

/// Blob with a root node (`#address-cells = <2>`, `#size-cells = <2>`) and one enabled child
/// node describing `[base, base + size)`.
pub fn memory_window_blob(compatible: &str, base: u64, size: u64) -> Result<Vec<u8>, BlobError> {
    let [base_hi, base_lo] = split_u64(base);
    let [size_hi, size_lo] = split_u64(size);

    let mut b = FdtBuilder::new();
    b.begin_node("")
        .prop_u32("#address-cells", 2)
        .prop_u32("#size-cells", 2)
        .begin_node(&format!("ipcmemory@{base:x}"))
        .prop_str("compatible", compatible)
        .prop_cells("reg", &[base_hi, base_lo, size_hi, size_lo])
        .prop_str("status", "okay")
        .end_node()
        .end_node();
    b.finish()
}

fn split_u64(v: u64) -> [u32; 2] {
    [(v >> 32) as u32, v as u32]
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn pad4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}
