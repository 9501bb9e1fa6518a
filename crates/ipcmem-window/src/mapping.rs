//! `mmap(2)` of a device or regular file, unmapped exactly once on drop.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

pub(crate) struct FileMapping {
    map_ptr: *mut libc::c_void,
    map_len: usize,
    data: *mut u8,
}

impl FileMapping {
    /// Maps `len` bytes of `path` starting at byte `offset` with `MAP_SHARED`.
    ///
    /// `offset` need not be page aligned; the mapping is widened down to the page boundary and
    /// [`FileMapping::data`] points at the requested byte.
    pub(crate) fn new(path: &Path, offset: u64, len: usize) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        // Touching pages past EOF of a regular file raises SIGBUS, so refuse up front. Device
        // files (e.g. `/dev/mem`) report a length of 0 and are trusted.
        let meta = file.metadata()?;
        let file_type = meta.file_type();
        if !file_type.is_char_device() && !file_type.is_block_device() {
            let end = offset.checked_add(len as u64);
            if end.map_or(true, |end| end > meta.len()) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "file is 0x{:x} bytes, region needs 0x{offset:x}..+0x{len:x}",
                        meta.len()
                    ),
                ));
            }
        }

        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page_size <= 0 {
            return Err(io::Error::last_os_error());
        }
        let page_size = page_size as u64;
        let page_offset = offset % page_size;
        let map_offset = libc::off_t::try_from(offset - page_offset).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "mapping offset exceeds off_t")
        })?;
        // `page_offset < page_size`, which always fits in usize.
        let page_offset = page_offset as usize;
        let map_len = page_offset.checked_add(len).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "mapping length overflows usize")
        })?;

        let map_ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                map_offset,
            )
        };
        if map_ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // Safety: `page_offset < map_len`, so the adjusted pointer stays inside the mapping.
        let data = unsafe { (map_ptr as *mut u8).add(page_offset) };

        Ok(Self {
            map_ptr,
            map_len,
            data,
        })
    }

    pub(crate) fn data(&self) -> *mut u8 {
        self.data
    }
}

impl Drop for FileMapping {
    fn drop(&mut self) {
        // Safety: `map_ptr`/`map_len` are exactly what `mmap` returned and nothing else unmaps
        // them.
        let rc = unsafe { libc::munmap(self.map_ptr, self.map_len) };
        if rc != 0 {
            tracing::warn!(
                "munmap of 0x{:x} bytes failed: {}",
                self.map_len,
                io::Error::last_os_error()
            );
        }
    }
}
