//! Readiness notification over a set of registered streams.
//!
//! Three backends satisfy the same contract: register a descriptor for read
//! readiness, then block until some registered streams are readable or hung
//! up. Which one is used is decided once per process by [`Backend::detect`],
//! unless the caller asks for a specific one.
mod native;
mod poll;
mod select;

use std::{fmt::Display, io, os::fd::RawFd, str::FromStr};

use once_cell::sync::OnceCell;
use thiserror::Error;

pub use self::native::NativeSelector;
pub use self::poll::PollSelector;
pub use self::select::SelectSelector;
use crate::StreamId;

pub trait Readiness {
    fn register(&mut self, stream: StreamId, fd: RawFd) -> io::Result<()>;

    fn deregister(&mut self, stream: StreamId, fd: RawFd) -> io::Result<()>;

    /// Clear `ready` and fill it with the streams that can be read without
    /// blocking, in the order the backend reported them.
    ///
    /// With `block` set this waits until at least one stream is ready;
    /// otherwise it only checks. A hang-up counts as ready: the following read
    /// returns zero bytes.
    fn wait(&mut self, ready: &mut Vec<StreamId>, block: bool) -> io::Result<()>;
}

/// The available readiness facilities, most scalable first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// `mio`'s selector: epoll on Linux, kqueue on BSD and macOS.
    Native,
    /// `poll(2)`
    Poll,
    /// `select(2)`, limited to descriptors below `FD_SETSIZE`.
    Select,
}

static DETECTED: OnceCell<Backend> = OnceCell::new();

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Native, Backend::Poll, Backend::Select];

    /// The best backend this platform supports. Probed on first call only.
    pub fn detect() -> Backend {
        *DETECTED.get_or_init(|| {
            let backend = Backend::ALL
                .into_iter()
                .find(|backend| backend.probe())
                .unwrap_or(Backend::Select);
            log::debug!("selected readiness backend: {backend}");
            backend
        })
    }

    fn probe(self) -> bool {
        match self {
            Backend::Native => mio::Poll::new().is_ok(),
            Backend::Poll => (unsafe { libc::poll(std::ptr::null_mut(), 0, 0) }) >= 0,
            Backend::Select => true,
        }
    }

    pub fn open(self) -> io::Result<Multiplexer> {
        let mux = match self {
            Backend::Native => Multiplexer::Native(NativeSelector::new()?),
            Backend::Poll => Multiplexer::Poll(PollSelector::new()),
            Backend::Select => Multiplexer::Select(SelectSelector::new()),
        };
        Ok(mux)
    }

    pub fn name(self) -> &'static str {
        match self {
            Backend::Native => "native",
            Backend::Poll => "poll",
            Backend::Select => "select",
        }
    }
}

impl Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown readiness backend {0:?}, expected one of native, poll, select")]
pub struct UnknownBackend(pub String);

impl FromStr for Backend {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Backend::ALL
            .into_iter()
            .find(|backend| backend.name() == s)
            .ok_or_else(|| UnknownBackend(s.to_owned()))
    }
}

/// An open readiness backend.
#[derive(Debug)]
pub enum Multiplexer {
    Native(NativeSelector),
    Poll(PollSelector),
    Select(SelectSelector),
}

impl Multiplexer {
    pub fn backend(&self) -> Backend {
        match self {
            Multiplexer::Native(_) => Backend::Native,
            Multiplexer::Poll(_) => Backend::Poll,
            Multiplexer::Select(_) => Backend::Select,
        }
    }
}

impl Readiness for Multiplexer {
    fn register(&mut self, stream: StreamId, fd: RawFd) -> io::Result<()> {
        match self {
            Multiplexer::Native(x) => x.register(stream, fd),
            Multiplexer::Poll(x) => x.register(stream, fd),
            Multiplexer::Select(x) => x.register(stream, fd),
        }
    }

    fn deregister(&mut self, stream: StreamId, fd: RawFd) -> io::Result<()> {
        match self {
            Multiplexer::Native(x) => x.deregister(stream, fd),
            Multiplexer::Poll(x) => x.deregister(stream, fd),
            Multiplexer::Select(x) => x.deregister(stream, fd),
        }
    }

    fn wait(&mut self, ready: &mut Vec<StreamId>, block: bool) -> io::Result<()> {
        match self {
            Multiplexer::Native(x) => x.wait(ready, block),
            Multiplexer::Poll(x) => x.wait(ready, block),
            Multiplexer::Select(x) => x.wait(ready, block),
        }
    }
}
