use std::{ffi::OsString, os::unix::process::ExitStatusExt, process::Command};

use clap::Parser;
use subproc_lines::{Backend, Error, PrintLines, ReaderConfig, Subprocess, DEFAULT_BUFFER_SIZE};

/// Run a program and print its stdout and stderr line by line, as they arrive.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Maximum number of bytes per read
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Readiness backend: native, poll or select. Detected when omitted.
    #[arg(long)]
    backend: Option<Backend>,

    /// Print raw chunks instead of lines
    #[arg(long)]
    raw: bool,

    /// Program to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<OsString>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("subproc-lines: {e}");
            std::process::exit(127);
        }
    }
}

fn run(args: Args) -> subproc_lines::Result<i32> {
    let mut config = ReaderConfig::default().with_buffer_size(args.buffer_size);
    if let Some(backend) = args.backend {
        config = config.with_backend(backend);
    }

    let mut cmd = Command::new(&args.command[0]);
    cmd.args(&args.command[1..]);

    let mut print = PrintLines::new();
    print.before_spawn(&cmd).map_err(Error::Output)?;
    let mut child = Subprocess::spawn_with(cmd, &config)?;
    let prog_path = child.program().to_path_buf();

    if args.raw {
        print.forward_chunks(&mut child)?;
    } else {
        print.forward_lines(&mut child)?;
    }

    let status = child.wait()?;
    print
        .terminated(&prog_path, status)
        .map_err(Error::Output)?;
    Ok(status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1))
}
