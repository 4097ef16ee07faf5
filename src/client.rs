//! Bridge client: stdin/stdout to the framed wire protocol.
//!
//! Outbound, stdin is chunked into frame payloads: lines split on LF (the LF
//! itself is never transmitted) with a hard cap of [`MAX_FRAME_LEN`] bytes per
//! frame. Inbound, frames from the server are printed as newline-terminated
//! lines on stdout. stdout carries protocol output only; logging goes to
//! stderr.
//!
//! Both directions run in one poll loop: stdin is registered as a raw fd
//! source next to the uplink socket, so a quiet stdin never delays inbound
//! frames and vice versa.

use crate::conn::ConnectionBuffer;
use crate::frame::{encode_frame, FrameEvent, MAX_FRAME_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use mio::net::TcpStream;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::os::unix::io::RawFd;
use tracing::{debug, info};

const STDIN_TOKEN: Token = Token(0);
const UPLINK_TOKEN: Token = Token(1);

const STDIN_FD: RawFd = libc::STDIN_FILENO;

/// Read scratch size per syscall.
const READ_CHUNK: usize = 4096;

/// How the bridge finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Local EOF with everything flushed, or the server closed the uplink.
    /// Maps to exit status 0.
    Clean,
    /// The server declared a frame longer than [`MAX_FRAME_LEN`].
    /// Maps to exit status 100.
    OversizedFrame { declared: u16 },
}

/// Splits stdin bytes into frame payloads.
///
/// A line feed flushes the accumulated bytes (possibly none) as one payload.
/// A full buffer is flushed just before the byte that would overflow it, so
/// an exactly-[`MAX_FRAME_LEN`]-byte line still becomes a single frame.
#[derive(Debug, Default)]
pub struct LineChunker {
    buf: BytesMut,
}

impl LineChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume input bytes, returning the payloads they complete.
    pub fn feed(&mut self, input: &[u8]) -> Vec<Bytes> {
        let mut out = Vec::new();
        for &byte in input {
            if byte == b'\n' {
                out.push(self.buf.split().freeze());
            } else {
                if self.buf.len() == MAX_FRAME_LEN {
                    out.push(self.buf.split().freeze());
                }
                self.buf.put_u8(byte);
            }
        }
        out
    }

    /// Flush whatever is buffered at end of input.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }
}

/// State of the uplink after an inbound pump.
#[derive(Debug, PartialEq, Eq)]
enum InboundStatus {
    Open,
    Eof,
    Oversized(u16),
}

/// Run the bridge against `host:port` until one side finishes.
pub fn run(host: &str, port: u16) -> io::Result<BridgeOutcome> {
    let std_stream = StdTcpStream::connect((host, port))?;
    std_stream.set_nonblocking(true)?;
    let mut uplink_stream = TcpStream::from_std(std_stream);

    info!(host, port, "connected to relay server");

    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(64);

    set_nonblocking(STDIN_FD)?;
    poll.registry()
        .register(&mut SourceFd(&STDIN_FD), STDIN_TOKEN, Interest::READABLE)?;
    poll.registry()
        .register(&mut uplink_stream, UPLINK_TOKEN, Interest::READABLE)?;

    let mut uplink = ConnectionBuffer::new();
    let mut chunker = LineChunker::new();
    let mut stdin_open = true;
    let mut uplink_interest = Interest::READABLE;

    let stdout = io::stdout();

    loop {
        match poll.poll(&mut events, None) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        for event in events.iter() {
            match event.token() {
                STDIN_TOKEN => {
                    if !stdin_open {
                        continue;
                    }
                    if !drain_stdin(&mut chunker, &mut uplink)? {
                        stdin_open = false;
                        poll.registry().deregister(&mut SourceFd(&STDIN_FD))?;
                        debug!(
                            pending = uplink.pending_write_len(),
                            "stdin finished"
                        );
                    }
                    uplink.drain_writable(&mut uplink_stream)?;
                }
                UPLINK_TOKEN => {
                    if event.is_readable() {
                        let mut out = stdout.lock();
                        let status = pump_inbound(&mut uplink_stream, &mut uplink, &mut out)?;
                        out.flush()?;
                        match status {
                            InboundStatus::Open => {}
                            InboundStatus::Eof => {
                                debug!("server closed the uplink");
                                return Ok(BridgeOutcome::Clean);
                            }
                            InboundStatus::Oversized(declared) => {
                                return Ok(BridgeOutcome::OversizedFrame { declared });
                            }
                        }
                    }
                    if event.is_writable() {
                        uplink.drain_writable(&mut uplink_stream)?;
                    }
                }
                _ => {}
            }
        }

        // Keep WRITABLE interest registered exactly while bytes are queued
        // (the poll backend is edge-triggered).
        let wanted = if uplink.has_pending_writes() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        if wanted != uplink_interest {
            poll.registry()
                .reregister(&mut uplink_stream, UPLINK_TOKEN, wanted)?;
            uplink_interest = wanted;
        }

        if !stdin_open && !uplink.has_pending_writes() {
            // Print anything the server already delivered before leaving.
            let mut out = stdout.lock();
            let status = pump_inbound(&mut uplink_stream, &mut uplink, &mut out)?;
            out.flush()?;
            return match status {
                InboundStatus::Oversized(declared) => {
                    Ok(BridgeOutcome::OversizedFrame { declared })
                }
                _ => {
                    debug!("stdin finished and uplink flushed");
                    Ok(BridgeOutcome::Clean)
                }
            };
        }
    }
}

/// Read stdin until it would block or hits EOF, framing every payload the
/// chunker completes. Returns whether stdin is still open.
fn drain_stdin(chunker: &mut LineChunker, uplink: &mut ConnectionBuffer) -> io::Result<bool> {
    let mut scratch = [0u8; READ_CHUNK];
    loop {
        match read_fd(STDIN_FD, &mut scratch) {
            Ok(0) => {
                if let Some(payload) = chunker.finish() {
                    uplink.enqueue(&encode_frame(&payload));
                }
                return Ok(false);
            }
            Ok(n) => {
                for payload in chunker.feed(&scratch[..n]) {
                    uplink.enqueue(&encode_frame(&payload));
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Read the uplink until it would block, printing each completed frame as a
/// newline-terminated line.
fn pump_inbound<R: Read, W: Write>(
    src: &mut R,
    uplink: &mut ConnectionBuffer,
    out: &mut W,
) -> io::Result<InboundStatus> {
    let mut scratch = [0u8; READ_CHUNK];
    loop {
        match src.read(&mut scratch) {
            Ok(0) => return Ok(InboundStatus::Eof),
            Ok(n) => {
                for event in uplink.feed(&scratch[..n]) {
                    match event {
                        FrameEvent::Frame(payload) => {
                            out.write_all(&payload)?;
                            out.write_all(b"\n")?;
                        }
                        FrameEvent::TooLong(declared) => {
                            return Ok(InboundStatus::Oversized(declared));
                        }
                        // The uplink decoder is lenient; forbidden bytes are
                        // the server's concern.
                        FrameEvent::ForbiddenByte => {}
                    }
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(InboundStatus::Open),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn payloads(chunks: Vec<Bytes>) -> Vec<Vec<u8>> {
        chunks.into_iter().map(|b| b.to_vec()).collect()
    }

    #[test]
    fn test_chunker_splits_on_line_feed() {
        let mut chunker = LineChunker::new();
        let out = chunker.feed(b"abc\ndef\n");
        assert_eq!(payloads(out), vec![b"abc".to_vec(), b"def".to_vec()]);
        assert!(chunker.finish().is_none());
    }

    #[test]
    fn test_chunker_empty_line_is_empty_payload() {
        let mut chunker = LineChunker::new();
        let out = chunker.feed(b"\n");
        assert_eq!(payloads(out), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_chunker_buffers_across_feeds() {
        let mut chunker = LineChunker::new();
        assert!(chunker.feed(b"hel").is_empty());
        let out = chunker.feed(b"lo\n");
        assert_eq!(payloads(out), vec![b"hello".to_vec()]);
    }

    #[test]
    fn test_chunker_finish_flushes_residue() {
        let mut chunker = LineChunker::new();
        assert!(chunker.feed(b"no newline").is_empty());
        assert_eq!(chunker.finish().unwrap(), Bytes::from_static(b"no newline"));
        assert!(chunker.finish().is_none());
    }

    #[test]
    fn test_chunker_splits_oversized_line() {
        // 1001 bytes with no line feed: one full frame plus a 1-byte frame.
        let mut chunker = LineChunker::new();
        let out = chunker.feed(&vec![b'a'; MAX_FRAME_LEN + 1]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), MAX_FRAME_LEN);
        assert_eq!(chunker.finish().unwrap().len(), 1);
    }

    #[test]
    fn test_chunker_max_line_is_a_single_frame() {
        // Exactly 1000 bytes followed by a line feed must not produce an
        // extra empty frame.
        let mut chunker = LineChunker::new();
        let mut input = vec![b'a'; MAX_FRAME_LEN];
        input.push(b'\n');
        let out = chunker.feed(&input);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), MAX_FRAME_LEN);
        assert!(chunker.finish().is_none());
    }

    #[test]
    fn test_chunker_keeps_carriage_returns() {
        let mut chunker = LineChunker::new();
        let out = chunker.feed(b"dos line\r\n");
        assert_eq!(payloads(out), vec![b"dos line\r".to_vec()]);
    }

    #[test]
    fn test_inbound_frames_become_lines() {
        let mut wire = encode_frame(b"blahblah").to_vec();
        wire.extend_from_slice(&encode_frame(b""));

        let mut src = Cursor::new(wire);
        let mut uplink = ConnectionBuffer::new();
        let mut out = Vec::new();

        // Cursor reports EOF once the wire bytes run out.
        let status = pump_inbound(&mut src, &mut uplink, &mut out).unwrap();
        assert_eq!(status, InboundStatus::Eof);
        assert_eq!(out, b"blahblah\n\n");
    }

    #[test]
    fn test_inbound_empty_frame_is_a_lone_line_feed() {
        let mut src = Cursor::new(encode_frame(b"").to_vec());
        let mut uplink = ConnectionBuffer::new();
        let mut out = Vec::new();

        pump_inbound(&mut src, &mut uplink, &mut out).unwrap();
        assert_eq!(out, b"\n");
    }

    #[test]
    fn test_inbound_oversized_header_is_fatal() {
        let mut src = Cursor::new(vec![0x03, 0xe9]); // declares 1001
        let mut uplink = ConnectionBuffer::new();
        let mut out = Vec::new();

        let status = pump_inbound(&mut src, &mut uplink, &mut out).unwrap();
        assert_eq!(status, InboundStatus::Oversized(1001));
        assert!(out.is_empty());
    }

    #[test]
    fn test_inbound_forbidden_bytes_pass_through() {
        // The client prints whatever the server relayed; policing payload
        // bytes happens on the server side.
        let mut src = Cursor::new(encode_frame(b"a\0b").to_vec());
        let mut uplink = ConnectionBuffer::new();
        let mut out = Vec::new();

        pump_inbound(&mut src, &mut uplink, &mut out).unwrap();
        assert_eq!(out, b"a\0b\n");
    }
}
