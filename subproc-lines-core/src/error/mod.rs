use std::io;

use thiserror::Error;

use crate::StreamId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid read buffer size {0}, must be at least 1")]
    InvalidBufferSize(usize),
    #[error("could not open readiness backend: {0}")]
    Backend(#[source] io::Error),
    #[error("could not set up stream {stream}: {source}")]
    Setup {
        stream: StreamId,
        #[source]
        source: io::Error,
    },
    #[error("read failed on stream {stream}: {source}")]
    Read {
        stream: StreamId,
        #[source]
        source: io::Error,
    },
    #[error("waiting for readiness failed: {0}")]
    Wait(#[source] io::Error),
}

impl Error {
    /// The underlying OS error, if any.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            Error::InvalidBufferSize(_) => None,
            Error::Backend(e) | Error::Wait(e) => Some(e),
            Error::Setup { source, .. } | Error::Read { source, .. } => Some(source),
        }
    }
}
