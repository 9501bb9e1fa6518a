//! Caller-side buffers that bytes cross on their way into or out of a window.
//!
//! A transport may stop short: a sink can refuse bytes and a source can run dry. The window
//! reports exactly how many bytes made it across instead of failing the whole request, which is
//! the contract byte-stream callers expect from `read(2)`/`write(2)` style interfaces.

/// Destination for bytes read out of a window.
pub trait CallerSink {
    /// Accepts a prefix of `bytes` and returns its length.
    ///
    /// Returning less than `bytes.len()` signals a transfer fault; the window stops copying.
    fn accept(&mut self, bytes: &[u8]) -> usize;
}

/// Origin of bytes written into a window.
pub trait CallerSource {
    /// Fills a prefix of `buf` and returns its length.
    ///
    /// Returning less than `buf.len()` signals a transfer fault; the window writes only the
    /// supplied prefix and stops.
    fn supply(&mut self, buf: &mut [u8]) -> usize;
}

impl<T: CallerSink + ?Sized> CallerSink for &mut T {
    fn accept(&mut self, bytes: &[u8]) -> usize {
        (**self).accept(bytes)
    }
}

impl<T: CallerSource + ?Sized> CallerSource for &mut T {
    fn supply(&mut self, buf: &mut [u8]) -> usize {
        (**self).supply(buf)
    }
}

/// Growable sink; never faults.
impl CallerSink for Vec<u8> {
    fn accept(&mut self, bytes: &[u8]) -> usize {
        self.extend_from_slice(bytes);
        bytes.len()
    }
}

/// Sink over a fixed caller buffer. Accepts bytes until the buffer is full.
#[derive(Debug)]
pub struct SliceSink<'a> {
    buf: &'a mut [u8],
    filled: usize,
}

impl<'a> SliceSink<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, filled: 0 }
    }

    pub fn filled(&self) -> usize {
        self.filled
    }
}

impl CallerSink for SliceSink<'_> {
    fn accept(&mut self, bytes: &[u8]) -> usize {
        let room = &mut self.buf[self.filled..];
        let take = room.len().min(bytes.len());
        room[..take].copy_from_slice(&bytes[..take]);
        self.filled += take;
        take
    }
}

/// Source over a fixed caller buffer. Supplies bytes until the buffer is drained.
#[derive(Debug)]
pub struct SliceSource<'a> {
    buf: &'a [u8],
    consumed: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, consumed: 0 }
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

impl CallerSource for SliceSource<'_> {
    fn supply(&mut self, buf: &mut [u8]) -> usize {
        let rest = &self.buf[self.consumed..];
        let take = rest.len().min(buf.len());
        buf[..take].copy_from_slice(&rest[..take]);
        self.consumed += take;
        take
    }
}

/// Wraps a transport and faults after `limit` bytes have crossed it.
///
/// Models a caller buffer that becomes inaccessible part-way through a copy (for example an
/// unmapped page in the middle of a user buffer).
#[derive(Debug)]
pub struct Faulting<T> {
    inner: T,
    remaining: usize,
}

impl<T> Faulting<T> {
    pub fn new(inner: T, limit: usize) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: CallerSink> CallerSink for Faulting<T> {
    fn accept(&mut self, bytes: &[u8]) -> usize {
        let take = self.remaining.min(bytes.len());
        let n = self.inner.accept(&bytes[..take]);
        self.remaining -= n;
        n
    }
}

impl<T: CallerSource> CallerSource for Faulting<T> {
    fn supply(&mut self, buf: &mut [u8]) -> usize {
        let take = self.remaining.min(buf.len());
        let n = self.inner.supply(&mut buf[..take]);
        self.remaining -= n;
        n
    }
}
