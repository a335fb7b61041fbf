use std::{io, os::fd::RawFd};

use super::Readiness;
use crate::StreamId;

const READY_MASK: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

/// Level-triggered readiness through `poll(2)`.
pub struct PollSelector {
    fds: Vec<libc::pollfd>,
    streams: Vec<StreamId>,
}

impl PollSelector {
    pub fn new() -> Self {
        Self {
            fds: Vec::new(),
            streams: Vec::new(),
        }
    }
}

impl Default for PollSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PollSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollSelector")
            .field("streams", &self.streams)
            .finish()
    }
}

impl Readiness for PollSelector {
    fn register(&mut self, stream: StreamId, fd: RawFd) -> io::Result<()> {
        self.fds.push(libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        });
        self.streams.push(stream);
        Ok(())
    }

    fn deregister(&mut self, stream: StreamId, _fd: RawFd) -> io::Result<()> {
        if let Some(pos) = self.streams.iter().position(|s| *s == stream) {
            // keep registration order, it is the delivery order
            self.streams.remove(pos);
            self.fds.remove(pos);
        }
        Ok(())
    }

    fn wait(&mut self, ready: &mut Vec<StreamId>, block: bool) -> io::Result<()> {
        ready.clear();
        if self.fds.is_empty() {
            return Ok(());
        }
        let timeout = if block { -1 } else { 0 };
        let n = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        for (pfd, stream) in self.fds.iter().zip(&self.streams) {
            if pfd.revents & READY_MASK != 0 {
                ready.push(*stream);
            }
        }
        Ok(())
    }
}
