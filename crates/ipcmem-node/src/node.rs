use std::io::{self, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ipcmem_window::{CallerSink, CallerSource, MemoryWindow, SliceSink, SliceSource, Transfer};

use crate::error::{NodeError, Result};

/// Handler for out-of-band `control` requests on a node.
pub trait ControlHook: Send + Sync {
    fn control(&self, window: &MemoryWindow, command: u32, arg: u64) -> Result<Transfer>;
}

/// Default hook: hands the request to [`MemoryWindow::control`], which interprets nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowControl;

impl ControlHook for WindowControl {
    fn control(&self, window: &MemoryWindow, command: u32, arg: u64) -> Result<Transfer> {
        Ok(window.control(command, arg)?)
    }
}

/// Counters kept per node.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeStats {
    pub opens: u64,
    pub closes: u64,
    pub controls: u64,
}

/// A named, file-like endpoint over a [`MemoryWindow`].
///
/// Opening and closing never affect the window; they only hand out and retire [`NodeHandle`]s,
/// each with its own file position.
pub struct WindowNode {
    name: String,
    window: Arc<MemoryWindow>,
    hook: Box<dyn ControlHook>,
    opens: AtomicU64,
    closes: AtomicU64,
    controls: AtomicU64,
}

impl WindowNode {
    pub fn new(name: impl Into<String>, window: Arc<MemoryWindow>) -> Self {
        Self {
            name: name.into(),
            window,
            hook: Box::new(WindowControl),
            opens: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            controls: AtomicU64::new(0),
        }
    }

    /// Replaces the control handler.
    pub fn with_control_hook(mut self, hook: impl ControlHook + 'static) -> Self {
        self.hook = Box::new(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> &Arc<MemoryWindow> {
        &self.window
    }

    pub fn size(&self) -> u64 {
        self.window.size()
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            opens: self.opens.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
            controls: self.controls.load(Ordering::Relaxed),
        }
    }

    /// Opens the node. Always succeeds.
    pub fn open(&self) -> NodeHandle<'_> {
        self.opens.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("{}: open", self.name);
        NodeHandle {
            node: self,
            pos: 0,
            closed: false,
        }
    }

    fn control(&self, command: u32, arg: u64) -> Result<Transfer> {
        self.controls.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("{}: control cmd={command} arg={arg}", self.name);
        self.hook.control(&self.window, command, arg)
    }
}

impl std::fmt::Debug for WindowNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowNode")
            .field("name", &self.name)
            .field("window", &self.window)
            .field("stats", &self.stats())
            .finish()
    }
}

/// An open node, with a file position that reads and writes advance.
///
/// Closing happens explicitly through [`NodeHandle::close`] or implicitly on drop.
#[derive(Debug)]
pub struct NodeHandle<'a> {
    node: &'a WindowNode,
    pos: u64,
    closed: bool,
}

impl NodeHandle<'_> {
    pub fn node(&self) -> &WindowNode {
        self.node
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Reads `len` bytes at the current position into `sink` and advances the position by the
    /// number of bytes actually delivered.
    pub fn read_into<S: CallerSink + ?Sized>(
        &mut self,
        len: u64,
        sink: &mut S,
    ) -> Result<Transfer> {
        let transfer = self.read_at(self.pos, len, sink)?;
        self.pos += transfer.transferred;
        Ok(transfer)
    }

    /// Writes up to `len` bytes from `source` at the current position and advances the position
    /// by the number of bytes actually written.
    pub fn write_from<S: CallerSource + ?Sized>(
        &mut self,
        len: u64,
        source: &mut S,
    ) -> Result<Transfer> {
        let transfer = self.write_at(self.pos, len, source)?;
        self.pos += transfer.transferred;
        Ok(transfer)
    }

    /// Positional read; leaves the file position alone.
    pub fn read_at<S: CallerSink + ?Sized>(
        &self,
        offset: u64,
        len: u64,
        sink: &mut S,
    ) -> Result<Transfer> {
        Ok(self.node.window.read(offset, len, sink)?)
    }

    /// Positional write; leaves the file position alone.
    pub fn write_at<S: CallerSource + ?Sized>(
        &self,
        offset: u64,
        len: u64,
        source: &mut S,
    ) -> Result<Transfer> {
        Ok(self.node.window.write(offset, len, source)?)
    }

    pub fn control(&self, command: u32, arg: u64) -> Result<Transfer> {
        self.node.control(command, arg)
    }

    /// Moves the file position. Positions past the end are allowed (like a regular file); data
    /// access from there fails or returns nothing.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(delta) => self.node.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        self.pos = target.ok_or(NodeError::InvalidSeek {
            from: self.pos,
            to: pos,
        })?;
        Ok(self.pos)
    }

    /// Closes the handle. Always succeeds.
    pub fn close(mut self) {
        self.mark_closed();
    }

    fn mark_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            self.node.closes.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("{}: close", self.node.name);
        }
    }

    fn remaining(&self) -> u64 {
        self.node.size().saturating_sub(self.pos)
    }
}

impl Drop for NodeHandle<'_> {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

/// Stream reads behave like a fixed-size file: requests are clamped to the bytes left before the
/// end of the window, and reading at (or past) the end returns 0.
impl io::Read for NodeHandle<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = (buf.len() as u64).min(self.remaining());
        if len == 0 {
            return Ok(0);
        }
        let transfer = self.read_into(len, &mut SliceSink::new(buf))?;
        Ok(transfer.transferred as usize)
    }
}

/// Stream writes are clamped like reads; writing at the end accepts nothing, which surfaces as
/// [`io::ErrorKind::WriteZero`] from `write_all`.
impl io::Write for NodeHandle<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = (buf.len() as u64).min(self.remaining());
        if len == 0 {
            return Ok(0);
        }
        let transfer = self.write_from(len, &mut SliceSource::new(buf))?;
        Ok(transfer.transferred as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for NodeHandle<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(NodeHandle::seek(self, pos)?)
    }
}
