use std::io::Write;
use std::os::unix::net::UnixStream;
use std::thread;

use rstest::rstest;
use subproc_lines_core::{
    Backend, Chunk, ChunkReader, Error, Line, Lines, ReadEvent, ReaderConfig, StreamId,
};

const OUT: StreamId = StreamId::new(0);
const ERR: StreamId = StreamId::new(1);

fn config(backend: Backend) -> ReaderConfig {
    ReaderConfig::default().with_backend(backend)
}

fn collect(chunks: &[Chunk], stream: StreamId) -> Vec<u8> {
    chunks
        .iter()
        .filter(|chunk| chunk.stream == stream)
        .flat_map(|chunk| chunk.data.iter().copied())
        .collect()
}

#[rstest]
#[case(Backend::Native)]
#[case(Backend::Poll)]
#[case(Backend::Select)]
fn reads_both_streams_until_closed(#[case] backend: Backend) {
    let (out, mut out_peer) = UnixStream::pair().unwrap();
    let (err, mut err_peer) = UnixStream::pair().unwrap();
    let reader = ChunkReader::new([out, err], &config(backend)).unwrap();
    assert_eq!(reader.backend(), backend);
    assert_eq!(reader.open_streams(), 2);

    out_peer.write_all(b"hello ").unwrap();
    err_peer.write_all(b"oops\n").unwrap();
    out_peer.write_all(b"world\n").unwrap();
    drop(out_peer);
    drop(err_peer);

    let chunks: Vec<Chunk> = reader.map(Result::unwrap).collect();
    assert!(chunks.iter().all(|chunk| !chunk.data.is_empty()));
    assert_eq!(collect(&chunks, OUT), b"hello world\n");
    assert_eq!(collect(&chunks, ERR), b"oops\n");
}

#[rstest]
#[case(Backend::Native)]
#[case(Backend::Poll)]
#[case(Backend::Select)]
fn idle_stream_does_not_hold_back_others(#[case] backend: Backend) {
    let (idle, idle_peer) = UnixStream::pair().unwrap();
    let (busy, mut busy_peer) = UnixStream::pair().unwrap();
    let mut reader = ChunkReader::new([idle, busy], &config(backend)).unwrap();

    busy_peer.write_all(b"first\n").unwrap();
    let chunk = reader.next().unwrap().unwrap();
    assert_eq!(chunk, Chunk::new(ERR, b"first\n".to_vec()));

    // the busy stream closing must not end the session while the idle one is open
    drop(busy_peer);
    let mut events = reader.events();
    assert_eq!(events.next().unwrap().unwrap(), ReadEvent::Closed(ERR));

    let mut idle_peer = idle_peer;
    idle_peer.write_all(b"late").unwrap();
    drop(idle_peer);
    assert_eq!(
        events.next().unwrap().unwrap(),
        ReadEvent::Chunk(Chunk::new(OUT, b"late".to_vec()))
    );
    assert_eq!(events.next().unwrap().unwrap(), ReadEvent::Closed(OUT));
    assert!(events.next().is_none());
    assert!(reader.next().is_none());
    assert_eq!(reader.open_streams(), 0);
}

#[rstest]
#[case(Backend::Native)]
#[case(Backend::Poll)]
#[case(Backend::Select)]
fn chunks_are_bounded_by_buffer_size(#[case] backend: Backend) {
    let (stream, mut peer) = UnixStream::pair().unwrap();
    let config = config(backend).with_buffer_size(3);
    let reader = ChunkReader::new([stream], &config).unwrap();

    peer.write_all(b"abcdefgh\n").unwrap();
    drop(peer);

    let chunks: Vec<Chunk> = reader.map(Result::unwrap).collect();
    assert!(chunks.iter().all(|chunk| chunk.data.len() <= 3));
    assert_eq!(collect(&chunks, OUT), b"abcdefgh\n");
}

#[rstest]
#[case(Backend::Native)]
#[case(Backend::Poll)]
#[case(Backend::Select)]
fn large_concurrent_output_is_conserved(#[case] backend: Backend) {
    let (out, mut out_peer) = UnixStream::pair().unwrap();
    let (err, mut err_peer) = UnixStream::pair().unwrap();
    let reader = ChunkReader::new([out, err], &config(backend).with_buffer_size(1000)).unwrap();

    let expected_out: Vec<u8> = (0..5000)
        .flat_map(|i| format!("out line {i}\n").into_bytes())
        .collect();
    let expected_err: Vec<u8> = (0..3000)
        .flat_map(|i| format!("err {i} ").into_bytes())
        .collect();

    let out_data = expected_out.clone();
    let err_data = expected_err.clone();
    let writer = thread::spawn(move || {
        let mut out_chunks = out_data.chunks(777);
        let mut err_chunks = err_data.chunks(555);
        loop {
            match (out_chunks.next(), err_chunks.next()) {
                (None, None) => break,
                (a, b) => {
                    if let Some(a) = a {
                        out_peer.write_all(a).unwrap();
                    }
                    if let Some(b) = b {
                        err_peer.write_all(b).unwrap();
                    }
                }
            }
        }
    });

    let lines: Vec<Line> = Lines::new(reader).map(Result::unwrap).collect();
    writer.join().unwrap();

    let joined = |stream: StreamId| -> Vec<u8> {
        lines
            .iter()
            .filter(|line| line.stream == stream)
            .flat_map(|line| line.data.iter().copied())
            .collect()
    };
    assert_eq!(joined(OUT), expected_out);
    assert_eq!(joined(ERR), expected_err);
    assert_eq!(lines.iter().filter(|line| line.stream == OUT).count(), 5000);
    assert!(lines
        .iter()
        .filter(|line| line.stream == OUT)
        .all(Line::is_terminated));
}

#[rstest]
#[case(Backend::Native)]
#[case(Backend::Poll)]
#[case(Backend::Select)]
fn lines_from_multi_line_reads(#[case] backend: Backend) {
    let (out, mut out_peer) = UnixStream::pair().unwrap();
    let (err, mut err_peer) = UnixStream::pair().unwrap();
    let mut reader = ChunkReader::new([out, err], &config(backend)).unwrap();

    out_peer.write_all(b"a\nb\nc").unwrap();
    err_peer.write_all(b"x\ny\n").unwrap();
    drop(out_peer);
    drop(err_peer);

    let lines: Vec<Line> = Lines::new(reader.events()).map(Result::unwrap).collect();
    let of = |stream: StreamId| -> Vec<Line> {
        lines
            .iter()
            .filter(|line| line.stream == stream)
            .cloned()
            .collect()
    };
    assert_eq!(
        of(OUT),
        vec![
            Line::new(OUT, b"a\n".to_vec()),
            Line::new(OUT, b"b\n".to_vec()),
            Line::new(OUT, b"c".to_vec()),
        ]
    );
    assert_eq!(
        of(ERR),
        vec![Line::new(ERR, b"x\n".to_vec()), Line::new(ERR, b"y\n".to_vec())]
    );
}

#[test]
fn no_streams_ends_immediately() {
    let mut reader = ChunkReader::new(Vec::<UnixStream>::new(), &ReaderConfig::default()).unwrap();
    assert!(reader.next().is_none());
}

#[test]
fn zero_buffer_size_fails_construction() {
    let (stream, _peer) = UnixStream::pair().unwrap();
    let config = ReaderConfig::default().with_buffer_size(0);
    let err = ChunkReader::new([stream], &config).unwrap_err();
    assert!(matches!(err, Error::InvalidBufferSize(0)));
}

#[rstest]
#[case(Backend::Poll)]
#[case(Backend::Select)]
fn always_readable_empty_file_closes_at_once(#[case] backend: Backend) {
    let null = std::fs::File::open("/dev/null").unwrap();
    let mut reader = ChunkReader::new([null], &config(backend)).unwrap();
    let mut events = reader.events();
    assert_eq!(events.next().unwrap().unwrap(), ReadEvent::Closed(OUT));
    assert!(events.next().is_none());
}

#[cfg(target_os = "linux")]
#[test]
fn unpollable_stream_is_a_setup_error() {
    let (ok, _peer) = UnixStream::pair().unwrap();
    let null: std::os::fd::OwnedFd = std::fs::File::open("/dev/null").unwrap().into();
    let err = ChunkReader::new([ok.into(), null], &config(Backend::Native)).unwrap_err();
    match err {
        Error::Setup { stream, .. } => assert_eq!(stream, ERR),
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
#[case(Backend::Poll)]
#[case(Backend::Select)]
fn read_error_ends_the_session(#[case] backend: Backend) {
    // directories poll as readable but fail every read
    let dir = std::fs::File::open("/tmp").unwrap();
    let (other, _other_peer) = UnixStream::pair().unwrap();
    let mut reader =
        ChunkReader::new([dir.into(), std::os::fd::OwnedFd::from(other)], &config(backend))
            .unwrap();

    match reader.next() {
        Some(Err(Error::Read { stream, source })) => {
            assert_eq!(stream, OUT);
            assert!(source.kind() != std::io::ErrorKind::WouldBlock);
        }
        other => panic!("expected a read error, got {other:?}"),
    }
    assert!(reader.next().is_none());
    assert!(reader.events().next().is_none());
}

#[rstest]
#[case(Backend::Poll)]
#[case(Backend::Select)]
fn read_error_drops_buffered_partial_lines(#[case] backend: Backend) {
    let (out, mut out_peer) = UnixStream::pair().unwrap();
    let dir = std::fs::File::open("/tmp").unwrap();
    let mut reader =
        ChunkReader::new([std::os::fd::OwnedFd::from(out), dir.into()], &config(backend))
            .unwrap();
    out_peer.write_all(b"done\npart").unwrap();

    let got: Vec<_> = Lines::new(reader.events()).collect();
    let error_at = got.iter().position(Result::is_err).unwrap();
    assert_eq!(error_at, got.len() - 1);
    assert!(matches!(
        got[error_at],
        Err(Error::Read { stream, .. }) if stream == ERR
    ));
    assert!(got
        .iter()
        .filter_map(|line| line.as_ref().ok())
        .all(|line| line.data != b"part"));
}

#[rstest]
#[case(Backend::Native)]
#[case(Backend::Poll)]
#[case(Backend::Select)]
fn close_stops_reading(#[case] backend: Backend) {
    let (out, mut out_peer) = UnixStream::pair().unwrap();
    let mut reader = ChunkReader::new([out], &config(backend)).unwrap();
    out_peer.write_all(b"unread\n").unwrap();

    reader.close();
    assert_eq!(reader.open_streams(), 0);
    assert!(reader.next().is_none());
    // our end is gone, so the peer sees a broken pipe
    let err = out_peer.write_all(b"more").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
}
