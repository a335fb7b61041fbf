use std::{collections::VecDeque, mem};

use crate::{Chunk, ReadEvent, StreamId};

/// A complete line from one stream, including its trailing `\n`. The last
/// line of a stream may lack the newline if the stream ended without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub stream: StreamId,
    pub data: Vec<u8>,
}

impl Line {
    pub fn new(stream: StreamId, data: impl Into<Vec<u8>>) -> Self {
        Self {
            stream,
            data: data.into(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.data.last() == Some(&b'\n')
    }

    /// The line without its trailing newline.
    pub fn content(&self) -> &[u8] {
        self.data.strip_suffix(b"\n").unwrap_or(&self.data)
    }
}

/// Splits per-stream chunks into lines.
///
/// Holds the unterminated tail of every stream, indexed by stream identity.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<Vec<u8>>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// An assembler pre-sized for `streams` identities.
    pub fn with_streams(streams: usize) -> Self {
        Self {
            pending: vec![Vec::new(); streams],
        }
    }

    /// Bytes of `stream` read but not yet emitted.
    pub fn pending(&self, stream: StreamId) -> &[u8] {
        self.pending
            .get(stream.index())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn buffer(&mut self, stream: StreamId) -> &mut Vec<u8> {
        let idx = stream.index();
        if idx >= self.pending.len() {
            self.pending.resize_with(idx + 1, Vec::new);
        }
        &mut self.pending[idx]
    }

    /// Feed one chunk of `stream`, appending every line it completes to
    /// `out`. An empty chunk ends the stream, see [`LineAssembler::close`].
    pub fn push(&mut self, stream: StreamId, chunk: &[u8], out: &mut VecDeque<Line>) {
        if chunk.is_empty() {
            self.close(stream, out);
            return;
        }

        let buf = self.buffer(stream);
        let mut start = 0;
        while let Some(pos) = chunk[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos + 1;
            // only the first line of a chunk can continue buffered bytes
            let data = if buf.is_empty() {
                chunk[start..end].to_vec()
            } else {
                let mut line = mem::take(buf);
                line.extend_from_slice(&chunk[start..end]);
                line
            };
            out.push_back(Line { stream, data });
            start = end;
        }
        buf.extend_from_slice(&chunk[start..]);
    }

    /// `stream` has ended: emit whatever is buffered for it as a final,
    /// unterminated line.
    pub fn close(&mut self, stream: StreamId, out: &mut VecDeque<Line>) {
        if let Some(buf) = self.pending.get_mut(stream.index()) {
            if !buf.is_empty() {
                out.push_back(Line {
                    stream,
                    data: mem::take(buf),
                });
            }
        }
    }

    /// Flush every stream's remainder, in identity order.
    pub fn finish(&mut self, out: &mut VecDeque<Line>) {
        for (idx, buf) in self.pending.iter_mut().enumerate() {
            if !buf.is_empty() {
                out.push_back(Line {
                    stream: StreamId::new(idx),
                    data: mem::take(buf),
                });
            }
        }
    }
}

/// Lazily turns a sequence of chunks (or `ReadEvent`s) into lines.
///
/// Lines of one stream come out in stream order. A stream's remainder is
/// flushed when a `Closed` event (or empty chunk) arrives for it, and all
/// remainders are flushed once the source is exhausted. An error from the
/// source is passed through and ends the sequence; buffered bytes are dropped.
#[derive(Debug)]
pub struct Lines<I> {
    source: I,
    assembler: LineAssembler,
    queue: VecDeque<Line>,
    finished: bool,
}

impl<I> Lines<I> {
    pub fn new(source: I) -> Self {
        Self::with_assembler(source, LineAssembler::new())
    }

    pub fn with_assembler(source: I, assembler: LineAssembler) -> Self {
        Self {
            source,
            assembler,
            queue: VecDeque::new(),
            finished: false,
        }
    }

    pub fn into_inner(self) -> I {
        self.source
    }
}

impl<I, E, X> Iterator for Lines<I>
where
    I: Iterator<Item = Result<E, X>>,
    E: Into<ReadEvent>,
{
    type Item = Result<Line, X>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.queue.pop_front() {
                return Some(Ok(line));
            }
            if self.finished {
                return None;
            }
            match self.source.next() {
                Some(Ok(event)) => match event.into() {
                    ReadEvent::Chunk(Chunk { stream, data }) => {
                        self.assembler.push(stream, &data, &mut self.queue)
                    }
                    ReadEvent::Closed(stream) => self.assembler.close(stream, &mut self.queue),
                },
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    self.assembler.finish(&mut self.queue);
                }
            }
        }
    }
}
