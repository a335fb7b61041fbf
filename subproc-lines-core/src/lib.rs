pub(crate) mod error;
pub(crate) mod lines;
pub(crate) mod reader;
pub(crate) mod stream;

pub use error::{Error, Result};
pub use lines::{Line, LineAssembler, Lines};
pub use reader::multiplexer::{
    Backend, Multiplexer, NativeSelector, PollSelector, Readiness, SelectSelector, UnknownBackend,
};
pub use reader::{Chunk, ChunkReader, Events, ReadEvent, ReaderConfig, DEFAULT_BUFFER_SIZE};
pub use stream::StreamId;
