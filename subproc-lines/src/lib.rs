use std::{
    fmt::Display,
    io::{self, stderr, stdout, LineWriter, Write},
    os::fd::OwnedFd,
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
};

use console::Style;
pub use subproc_lines_core::Error as ReadError;
pub use subproc_lines_core::{
    Backend, Chunk, ChunkReader, Events, Line, LineAssembler, Lines, ReadEvent, ReaderConfig,
    StreamId, DEFAULT_BUFFER_SIZE,
};
use thiserror::Error;

/// Stream identity of the child's standard output.
pub const STDOUT: StreamId = StreamId::new(0);
/// Stream identity of the child's standard error.
pub const STDERR: StreamId = StreamId::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdTag {
    Stdout,
    Stderr,
}

impl FdTag {
    pub fn stream(self) -> StreamId {
        match self {
            FdTag::Stdout => STDOUT,
            FdTag::Stderr => STDERR,
        }
    }

    pub fn of(stream: StreamId) -> Option<FdTag> {
        match stream {
            STDOUT => Some(FdTag::Stdout),
            STDERR => Some(FdTag::Stderr),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FdTag::Stdout => "stdout",
            FdTag::Stderr => "stderr",
        }
    }
}

impl Display for FdTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("could not spawn {}: {source}", .prog_path.display())]
    Spawn {
        prog_path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("child process has no {0} pipe")]
    MissingPipe(FdTag),
    #[error("waiting for child process failed: {0}")]
    Reap(#[source] io::Error),
    #[error("could not write output: {0}")]
    Output(#[source] io::Error),
}

pub type Result<A> = std::result::Result<A, Error>;

/// A Process identifier
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid {
    pub inner: u32,
}

impl Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

/// A child process whose stdout and stderr are read through a `ChunkReader`,
/// as streams `STDOUT` and `STDERR`.
///
/// Dropping a `Subprocess` that was not waited on closes its pipes, kills the
/// child and reaps it.
#[derive(Debug)]
pub struct Subprocess {
    child: Child,
    prog_path: PathBuf,
    reader: ChunkReader,
    exit_status: Option<ExitStatus>,
}

impl Subprocess {
    pub fn spawn(cmd: Command) -> Result<Self> {
        Self::spawn_with(cmd, &ReaderConfig::default())
    }

    pub fn spawn_with(mut cmd: Command, config: &ReaderConfig) -> Result<Self> {
        config.validate()?;
        let prog_path = PathBuf::from(cmd.get_program());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            prog_path: prog_path.clone(),
            source,
        })?;
        match Self::reader(&mut child, config) {
            Ok(reader) => {
                log::debug!("spawned {} as pid {}", prog_path.display(), child.id());
                Ok(Subprocess {
                    child,
                    prog_path,
                    reader,
                    exit_status: None,
                })
            }
            Err(e) => {
                // don't leave a child behind that nobody reads or reaps
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    fn reader(child: &mut Child, config: &ReaderConfig) -> Result<ChunkReader> {
        let stdout = child.stdout.take().ok_or(Error::MissingPipe(FdTag::Stdout))?;
        let stderr = child.stderr.take().ok_or(Error::MissingPipe(FdTag::Stderr))?;
        let reader = ChunkReader::new([OwnedFd::from(stdout), OwnedFd::from(stderr)], config)?;
        Ok(reader)
    }

    pub fn pid(&self) -> Pid {
        Pid {
            inner: self.child.id(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.prog_path
    }

    /// Raw chunks from both streams.
    pub fn chunks(&mut self) -> &mut ChunkReader {
        &mut self.reader
    }

    /// Chunks plus a `Closed` event as each stream ends.
    pub fn events(&mut self) -> Events<'_> {
        self.reader.events()
    }

    /// Lines from both streams. A stream's unterminated last line is emitted
    /// as soon as that stream closes.
    pub fn lines(&mut self) -> Lines<Events<'_>> {
        Lines::with_assembler(self.reader.events(), LineAssembler::with_streams(2))
    }

    /// Close the output pipes and wait for the child to exit. Output not yet
    /// read is discarded.
    pub fn wait(mut self) -> Result<ExitStatus> {
        self.reader.close();
        let status = self.child.wait().map_err(Error::Reap)?;
        self.exit_status = Some(status);
        log::debug!("{} exited with {status}", self.prog_path.display());
        Ok(status)
    }
}

impl Drop for Subprocess {
    fn drop(&mut self) {
        if self.exit_status.is_some() {
            return;
        }
        self.reader.close();
        if let Ok(None) = self.child.try_wait() {
            log::debug!("killing {} (pid {})", self.prog_path.display(), self.child.id());
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

/// Writes lines to the writer matching their stream, prefixed with the
/// program name.
pub struct PrintLines<Stdout: Write, Stderr: Write> {
    pub stdout: Stdout,
    pub stderr: Stderr,
    pub info_style: Style,
    pub stdout_style: Style,
    pub stderr_style: Style,
}

impl PrintLines<LineWriter<io::Stdout>, LineWriter<io::Stderr>> {
    pub fn new() -> Self {
        Self {
            stdout: LineWriter::new(stdout()),
            stderr: LineWriter::new(stderr()),
            info_style: Style::new().green(),
            stdout_style: Style::new().white(),
            stderr_style: Style::new().red(),
        }
    }
}

impl Default for PrintLines<LineWriter<io::Stdout>, LineWriter<io::Stderr>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Stdout: Write, Stderr: Write> PrintLines<Stdout, Stderr> {
    pub fn before_spawn(&mut self, cmd: &Command) -> io::Result<()> {
        let prog_path: &Path = Path::new(cmd.get_program());
        writeln!(
            &mut self.stdout,
            "{} {}{}",
            self.info_style.apply_to("[Running"),
            self.info_style.apply_to(prog_path.display()),
            self.info_style.apply_to("]")
        )
    }

    pub fn line(&mut self, prog_path: &Path, line: &Line) -> io::Result<()> {
        let tag = FdTag::of(line.stream).unwrap_or(FdTag::Stdout);
        let forward_style = match tag {
            FdTag::Stdout => &self.stdout_style,
            FdTag::Stderr => &self.stderr_style,
        };
        let output: &mut dyn Write = match tag {
            FdTag::Stdout => &mut self.stdout,
            FdTag::Stderr => &mut self.stderr,
        };
        let text = String::from_utf8_lossy(line.content());
        writeln!(
            output,
            "{}{}{} {}",
            self.info_style.apply_to("["),
            self.info_style.apply_to(prog_path.display()),
            self.info_style.apply_to("]"),
            forward_style.apply_to(text),
        )
    }

    pub fn chunk(&mut self, prog_path: &Path, chunk: &Chunk) -> io::Result<()> {
        let handle = FdTag::of(chunk.stream).map_or("?", FdTag::name);
        writeln!(
            &mut self.stdout,
            "{}{} {} {}{} {:?}",
            self.info_style.apply_to("["),
            self.info_style.apply_to(prog_path.display()),
            self.info_style.apply_to(handle),
            self.info_style.apply_to(chunk.data.len()),
            self.info_style.apply_to(" bytes]"),
            String::from_utf8_lossy(&chunk.data),
        )
    }

    /// Print every line of `child` until its output ends. Stops at the first
    /// failed write.
    pub fn forward_lines(&mut self, child: &mut Subprocess) -> Result<()> {
        let prog_path = child.program().to_path_buf();
        for line in child.lines() {
            self.line(&prog_path, &line?).map_err(Error::Output)?;
        }
        Ok(())
    }

    /// Like `forward_lines`, for raw chunks.
    pub fn forward_chunks(&mut self, child: &mut Subprocess) -> Result<()> {
        let prog_path = child.program().to_path_buf();
        for chunk in child.chunks() {
            self.chunk(&prog_path, &chunk?).map_err(Error::Output)?;
        }
        Ok(())
    }

    pub fn terminated(&mut self, prog_path: &Path, exit_status: ExitStatus) -> io::Result<()> {
        writeln!(
            &mut self.stdout,
            "{}{} {} {}{}",
            self.info_style.apply_to("["),
            self.info_style.apply_to(prog_path.display()),
            self.info_style.apply_to("terminated with"),
            self.info_style.apply_to(exit_status),
            self.info_style.apply_to("]"),
        )
    }
}
