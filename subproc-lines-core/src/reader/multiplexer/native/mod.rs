use std::{io, os::fd::RawFd, time::Duration};

use mio::{unix::SourceFd, Events, Interest, Poll, Token};

use super::Readiness;
use crate::StreamId;

/// Readiness through `mio::Poll`. Notifications are edge-triggered, so a
/// stream must be read until it would block before it is reported again.
#[derive(Debug)]
pub struct NativeSelector {
    poll: Poll,
    events: Events,
}

impl NativeSelector {
    pub fn new() -> io::Result<Self> {
        let res = Self {
            poll: Poll::new()?,
            events: Events::with_capacity(64),
        };
        Ok(res)
    }
}

impl Readiness for NativeSelector {
    fn register(&mut self, stream: StreamId, fd: RawFd) -> io::Result<()> {
        self.poll.registry().register(
            &mut SourceFd(&fd),
            Token(stream.index()),
            Interest::READABLE,
        )
    }

    fn deregister(&mut self, _stream: StreamId, fd: RawFd) -> io::Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&fd))
    }

    fn wait(&mut self, ready: &mut Vec<StreamId>, block: bool) -> io::Result<()> {
        ready.clear();
        let timeout = if block { None } else { Some(Duration::ZERO) };
        self.poll.poll(&mut self.events, timeout)?;
        for ev in self.events.iter() {
            if ev.is_readable() || ev.is_read_closed() || ev.is_error() {
                ready.push(StreamId::new(ev.token().0));
            }
        }
        Ok(())
    }
}
