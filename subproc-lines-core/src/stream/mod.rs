use std::{
    fmt::Display,
    fs::File,
    io,
    os::fd::{AsRawFd, OwnedFd, RawFd},
};

/// Ordinal of a registered stream, assigned in registration order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId {
    pub inner: usize,
}

impl StreamId {
    pub const fn new(inner: usize) -> Self {
        StreamId { inner }
    }

    pub const fn index(self) -> usize {
        self.inner
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

/// A registered stream owned by a `ChunkReader`.
#[derive(Debug)]
pub(crate) struct StreamSlot {
    pub file: File,
    pub open: bool,
    // returned data on the last read, so it may still have more without a new
    // readiness notification
    pub hot: bool,
}

impl StreamSlot {
    pub(crate) fn from_fd(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(StreamSlot {
            file: File::from(fd),
            open: true,
            hot: false,
        })
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
