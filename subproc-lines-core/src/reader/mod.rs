pub(crate) mod multiplexer;

use std::{
    collections::VecDeque,
    io::{ErrorKind, Read},
    mem,
    os::fd::OwnedFd,
};

use slab::Slab;

use self::multiplexer::{Backend, Multiplexer, Readiness};
use crate::stream::StreamSlot;
use crate::{Error, Result, StreamId};

pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Options for a `ChunkReader`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Upper bound on the size of a single read, and so of a single chunk.
    pub buffer_size: usize,
    /// Readiness facility to use; `None` picks `Backend::detect()`.
    pub backend: Option<Backend>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            backend: None,
        }
    }
}

impl ReaderConfig {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < 1 {
            return Err(Error::InvalidBufferSize(self.buffer_size));
        }
        Ok(())
    }
}

/// The bytes returned by one read on one stream. Never empty when produced by
/// a `ChunkReader`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub stream: StreamId,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn new(stream: StreamId, data: impl Into<Vec<u8>>) -> Self {
        Self {
            stream,
            data: data.into(),
        }
    }

    /// An empty chunk, which marks the end of `stream` for a `LineAssembler`.
    pub fn end_of_stream(stream: StreamId) -> Self {
        Self {
            stream,
            data: Vec::new(),
        }
    }
}

/// Everything a `ChunkReader` observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    Chunk(Chunk),
    /// A read returned zero bytes; the stream will produce nothing more.
    Closed(StreamId),
}

impl From<Chunk> for ReadEvent {
    fn from(chunk: Chunk) -> Self {
        if chunk.data.is_empty() {
            ReadEvent::Closed(chunk.stream)
        } else {
            ReadEvent::Chunk(chunk)
        }
    }
}

#[derive(Debug)]
enum State {
    /// Reading the streams of the current round, front first.
    Reading,
    Done,
}

/// Reads several streams at once, yielding chunks from whichever stream has
/// data.
///
/// Each round waits for readiness and then performs one bounded read per ready
/// stream. A stream whose last read returned data is read again in the next
/// round without waiting for a new notification, so one busy stream cannot
/// starve the others and edge-triggered backends never miss data. The
/// sequence ends once every stream has returned a zero byte read, or after
/// the first error.
#[derive(Debug)]
pub struct ChunkReader {
    mux: Multiplexer,
    streams: Slab<StreamSlot>,
    open: usize,
    buf: Vec<u8>,
    round: VecDeque<StreamId>,
    ready: Vec<StreamId>,
    state: State,
}

impl ChunkReader {
    /// Register `streams` for reading. Identities are assigned in iteration
    /// order starting at zero.
    pub fn new<I, S>(streams: I, config: &ReaderConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OwnedFd>,
    {
        config.validate()?;
        let backend = config.backend.unwrap_or_else(Backend::detect);
        let mux = backend.open().map_err(Error::Backend)?;
        let mut res = Self {
            mux,
            streams: Slab::new(),
            open: 0,
            buf: vec![0; config.buffer_size],
            round: VecDeque::new(),
            ready: Vec::new(),
            state: State::Reading,
        };

        for stream in streams {
            let entry = res.streams.vacant_entry();
            let id = StreamId::new(entry.key());
            let slot = StreamSlot::from_fd(stream.into())
                .map_err(|source| Error::Setup { stream: id, source })?;
            res.mux
                .register(id, slot.raw_fd())
                .map_err(|source| Error::Setup { stream: id, source })?;
            entry.insert(slot);
            res.open += 1;
        }
        log::debug!(
            "reading {} streams with the {} backend, {} byte reads",
            res.open,
            backend,
            config.buffer_size
        );
        Ok(res)
    }

    pub fn backend(&self) -> Backend {
        self.mux.backend()
    }

    /// Number of registered streams that have not reached end of stream.
    pub fn open_streams(&self) -> usize {
        self.open
    }

    /// Stop reading: deregister and close every stream. The sequence ends
    /// and nothing more is read, whatever the streams still hold.
    pub fn close(&mut self) {
        for (key, slot) in self.streams.iter() {
            if slot.open {
                let _ = self.mux.deregister(StreamId::new(key), slot.raw_fd());
            }
        }
        self.streams.clear();
        self.round.clear();
        self.open = 0;
        self.state = State::Done;
    }

    /// The chunk sequence together with end-of-stream notifications.
    pub fn events(&mut self) -> Events<'_> {
        Events { reader: self }
    }

    fn next_event(&mut self) -> Option<Result<ReadEvent>> {
        loop {
            match self.state {
                State::Done => return None,
                State::Reading => {
                    if let Some(id) = self.round.pop_front() {
                        match self.read(id) {
                            Ok(Some(event)) => return Some(Ok(event)),
                            Ok(None) => continue,
                            Err(e) => {
                                self.state = State::Done;
                                return Some(Err(e));
                            }
                        }
                    }
                    if self.open == 0 {
                        log::debug!("all streams reached end of stream");
                        self.state = State::Done;
                        return None;
                    }
                    if let Err(e) = self.next_round() {
                        self.state = State::Done;
                        return Some(Err(e));
                    }
                }
            }
        }
    }

    /// Collect the streams to read next: the ready ones in delivery order,
    /// then any stream still hot from the previous round.
    fn next_round(&mut self) -> Result<()> {
        let block = !self.streams.iter().any(|(_, slot)| slot.hot);
        loop {
            match self.mux.wait(&mut self.ready, block) {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Wait(e)),
            }
        }
        let mut round = mem::take(&mut self.round);
        for id in self.ready.drain(..) {
            if self.streams.get(id.index()).is_some_and(|slot| slot.open) && !round.contains(&id)
            {
                round.push_back(id);
            }
        }
        for (key, slot) in self.streams.iter() {
            let id = StreamId::new(key);
            if slot.hot && slot.open && !round.contains(&id) {
                round.push_back(id);
            }
        }
        self.round = round;
        Ok(())
    }

    /// One non-blocking read. `Ok(None)` when the stream had nothing after all.
    fn read(&mut self, id: StreamId) -> Result<Option<ReadEvent>> {
        let slot = &mut self.streams[id.index()];
        let n = loop {
            match slot.file.read(&mut self.buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    slot.hot = false;
                    return Ok(None);
                }
                Err(source) => return Err(Error::Read { stream: id, source }),
            }
        };

        if n == 0 {
            slot.hot = false;
            slot.open = false;
            let fd = slot.raw_fd();
            self.open -= 1;
            self.mux
                .deregister(id, fd)
                .map_err(|source| Error::Read { stream: id, source })?;
            log::debug!("stream {id} reached end of stream");
            return Ok(Some(ReadEvent::Closed(id)));
        }

        slot.hot = true;
        log::trace!("read {n} bytes from stream {id}");
        Ok(Some(ReadEvent::Chunk(Chunk::new(id, &self.buf[..n]))))
    }
}

impl Iterator for ChunkReader {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.next_event()? {
                Ok(ReadEvent::Chunk(chunk)) => return Some(Ok(chunk)),
                Ok(ReadEvent::Closed(_)) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Iterator over a `ChunkReader`'s chunks and end-of-stream notifications.
#[derive(Debug)]
pub struct Events<'a> {
    reader: &'a mut ChunkReader,
}

impl Iterator for Events<'_> {
    type Item = Result<ReadEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_event()
    }
}
