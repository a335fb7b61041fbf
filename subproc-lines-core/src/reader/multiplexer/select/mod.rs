use std::{
    io::{self, ErrorKind},
    mem::MaybeUninit,
    os::fd::RawFd,
    ptr,
};

use super::Readiness;
use crate::StreamId;

/// Level-triggered readiness through `select(2)`, the last resort.
#[derive(Debug, Default)]
pub struct SelectSelector {
    fds: Vec<(StreamId, RawFd)>,
}

impl SelectSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Readiness for SelectSelector {
    fn register(&mut self, stream: StreamId, fd: RawFd) -> io::Result<()> {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("descriptor {fd} does not fit in an fd_set"),
            ));
        }
        self.fds.push((stream, fd));
        Ok(())
    }

    fn deregister(&mut self, stream: StreamId, _fd: RawFd) -> io::Result<()> {
        self.fds.retain(|(s, _)| *s != stream);
        Ok(())
    }

    fn wait(&mut self, ready: &mut Vec<StreamId>, block: bool) -> io::Result<()> {
        ready.clear();
        if self.fds.is_empty() {
            return Ok(());
        }
        let mut set = unsafe {
            let mut set = MaybeUninit::<libc::fd_set>::uninit();
            libc::FD_ZERO(set.as_mut_ptr());
            set.assume_init()
        };
        let mut max_fd = 0;
        for &(_, fd) in &self.fds {
            unsafe { libc::FD_SET(fd, &mut set) };
            max_fd = max_fd.max(fd);
        }
        let mut zero = libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        let timeout: *mut libc::timeval = if block { ptr::null_mut() } else { &mut zero };
        let n = unsafe {
            libc::select(
                max_fd + 1,
                &mut set,
                ptr::null_mut(),
                ptr::null_mut(),
                timeout,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        for &(stream, fd) in &self.fds {
            if unsafe { libc::FD_ISSET(fd, &set) } {
                ready.push(stream);
            }
        }
        Ok(())
    }
}
