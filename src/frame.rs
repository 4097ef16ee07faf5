//! Wire frame codec.
//!
//! A frame is a 2-byte big-endian length prefix followed by exactly that many
//! payload bytes. Frames are concatenated back-to-back on the stream with no
//! other delimiter. The decoder is incremental: it accepts whatever bytes are
//! currently available and parks in an explicit state until more arrive.

use bytes::{BufMut, Bytes, BytesMut};

/// Maximum payload length a frame may declare.
pub const MAX_FRAME_LEN: usize = 1000;

/// Length of the frame header (big-endian u16).
pub const HEADER_LEN: usize = 2;

/// Encode a payload into a complete frame (header + payload).
///
/// # Panics
/// Debug-asserts that `payload.len() <= MAX_FRAME_LEN`; callers chunk their
/// input before framing.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    debug_assert!(payload.len() <= MAX_FRAME_LEN, "payload exceeds frame limit");
    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u16(payload.len() as u16);
    frame.put_slice(payload);
    frame.freeze()
}

/// Parse state of an incremental decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// Fewer than 2 header bytes buffered.
    AwaitingHeader,
    /// Header parsed; waiting for the rest of the body.
    AwaitingBody {
        /// Declared payload length.
        len: usize,
    },
    /// A violation was reported; no further events will be produced.
    Poisoned,
}

/// Event produced by feeding bytes to a [`FrameDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete frame's payload.
    Frame(Bytes),
    /// Declared length exceeds [`MAX_FRAME_LEN`]. Detected from the header
    /// alone; the body need not arrive.
    TooLong(u16),
    /// Completed payload contains a line feed or NUL byte.
    /// Only produced by strict (server-side) decoders.
    ForbiddenByte,
}

/// Incremental frame parser.
///
/// Feed it raw stream bytes as they arrive; complete frames and violations
/// come out as [`FrameEvent`]s. Leftover bytes after a complete frame are
/// retained for the next one. After a violation the decoder is poisoned and
/// ignores all further input.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    state: DecodeState,
    strict: bool,
}

impl FrameDecoder {
    /// Decoder that surfaces payloads as-is (client side).
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            state: DecodeState::AwaitingHeader,
            strict: false,
        }
    }

    /// Decoder that additionally rejects payloads containing LF or NUL
    /// (server side).
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::new()
        }
    }

    /// Current parse state.
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Whether any bytes of an unfinished frame are buffered.
    pub fn has_partial_frame(&self) -> bool {
        !self.buf.is_empty() || matches!(self.state, DecodeState::AwaitingBody { .. })
    }

    /// Feed newly arrived bytes, returning all events they complete.
    ///
    /// A single feed may complete several frames; they are returned in wire
    /// order. A violation is always the last event returned.
    pub fn feed(&mut self, input: &[u8]) -> Vec<FrameEvent> {
        let mut events = Vec::new();

        if matches!(self.state, DecodeState::Poisoned) {
            return events;
        }

        self.buf.extend_from_slice(input);

        loop {
            match self.state {
                DecodeState::AwaitingHeader => {
                    if self.buf.len() < HEADER_LEN {
                        break;
                    }
                    let header = self.buf.split_to(HEADER_LEN);
                    let declared = u16::from_be_bytes([header[0], header[1]]);
                    if declared as usize > MAX_FRAME_LEN {
                        self.state = DecodeState::Poisoned;
                        events.push(FrameEvent::TooLong(declared));
                        break;
                    }
                    self.state = DecodeState::AwaitingBody {
                        len: declared as usize,
                    };
                }
                DecodeState::AwaitingBody { len } => {
                    if self.buf.len() < len {
                        break;
                    }
                    let payload = self.buf.split_to(len).freeze();
                    self.state = DecodeState::AwaitingHeader;
                    if self.strict && contains_forbidden_byte(&payload) {
                        self.state = DecodeState::Poisoned;
                        events.push(FrameEvent::ForbiddenByte);
                        break;
                    }
                    events.push(FrameEvent::Frame(payload));
                }
                DecodeState::Poisoned => break,
            }
        }

        events
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_forbidden_byte(payload: &[u8]) -> bool {
    payload.iter().any(|&b| b == b'\n' || b == 0)
}
