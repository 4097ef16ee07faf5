//! Per-connection incremental assembly and write queueing.
//!
//! A [`ConnectionBuffer`] pairs a frame decoder with an outbound byte queue.
//! The server keeps one per accepted peer; the client keeps one for its
//! uplink. Reads feed the decoder, writes drain the queue as far as the
//! transport accepts, and partial writes leave the remainder queued for the
//! next writable opportunity.

use crate::frame::{FrameDecoder, FrameEvent};
use bytes::{Buf, BytesMut};
use std::io::{self, Write};

/// Decoder plus outbound queue for one socket.
#[derive(Debug)]
pub struct ConnectionBuffer {
    decoder: FrameDecoder,
    outbound: BytesMut,
}

impl ConnectionBuffer {
    /// Buffer with a lenient decoder (client uplink).
    pub fn new() -> Self {
        Self {
            decoder: FrameDecoder::new(),
            outbound: BytesMut::new(),
        }
    }

    /// Buffer with a strict decoder that rejects LF/NUL payloads
    /// (server-side peers).
    pub fn strict() -> Self {
        Self {
            decoder: FrameDecoder::strict(),
            outbound: BytesMut::new(),
        }
    }

    /// Run newly read bytes through the decoder.
    pub fn feed(&mut self, input: &[u8]) -> Vec<FrameEvent> {
        self.decoder.feed(input)
    }

    /// Append already-framed bytes to the outbound queue.
    pub fn enqueue(&mut self, bytes: &[u8]) {
        self.outbound.extend_from_slice(bytes);
    }

    /// Whether queued bytes are waiting to be written.
    pub fn has_pending_writes(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Number of queued outbound bytes.
    pub fn pending_write_len(&self) -> usize {
        self.outbound.len()
    }

    /// Whether the decoder holds bytes of an unfinished inbound frame.
    pub fn has_partial_frame(&self) -> bool {
        self.decoder.has_partial_frame()
    }

    /// Write as much of the queue as the transport accepts.
    ///
    /// `WouldBlock` stops draining and is not an error; the remainder stays
    /// queued. Returns the number of bytes written.
    pub fn drain_writable<W: Write>(&mut self, transport: &mut W) -> io::Result<usize> {
        let mut written = 0;
        while !self.outbound.is_empty() {
            match transport.write(&self.outbound) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted zero bytes",
                    ));
                }
                Ok(n) => {
                    self.outbound.advance(n);
                    written += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }
}

impl Default for ConnectionBuffer {
    fn default() -> Self {
        Self::new()
    }
}
