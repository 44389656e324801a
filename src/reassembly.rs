//! Frame reassembly from arbitrarily split transport chunks.
//!
//! State machine:
//! - `AwaitingHeader`: need `HEADER_SIZE` bytes
//! - `AccumulatingPayload`: header parsed, need `payload_size` more bytes
//! - `AwaitingTrailer`: byte-stream framing only, matching `<EOF>` right
//!   after the payload (stray CR/LF allowed before it)
//! - `Discard`: skipping the declared payload of an aborted frame
//! - `Resync`: byte-stream framing only, dropping bytes after an aborted
//!   frame until the next `<EOF>`
//!
//! A completed frame is handed back to the caller before any byte that
//! follows it is looked at.

use tracing::{debug, warn};

use crate::error::{LinkError, Result};
use crate::{Frame, FrameHeader, HEADER_SIZE};

const SENTINEL: &[u8] = b"<EOF>";
const WINDOW: usize = 7;

/// Sliding window over the last `WINDOW` bytes.
#[derive(Debug, Clone, Default)]
struct SentinelWindow {
    bytes: [u8; WINDOW],
    len: usize,
}

impl SentinelWindow {
    /// Push one byte; true once the window ends with the sentinel.
    fn push(&mut self, byte: u8) -> bool {
        if self.len == WINDOW {
            self.bytes.copy_within(1.., 0);
            self.bytes[WINDOW - 1] = byte;
        } else {
            self.bytes[self.len] = byte;
            self.len += 1;
        }
        self.bytes[..self.len].ends_with(SENTINEL)
    }
}

#[derive(Debug, Clone)]
enum State {
    AwaitingHeader,
    AccumulatingPayload { header: FrameHeader },
    AwaitingTrailer { header: FrameHeader, matched: usize },
    Discard { remaining: usize },
    Resync { window: SentinelWindow },
}

/// Accumulates chunks into a bounded buffer and yields complete frames.
pub struct FrameAssembler {
    /// Bytes of the frame in progress, header included.
    buffer: Vec<u8>,
    capacity: usize,
    trailer: bool,
    state: State,
}

impl FrameAssembler {
    /// `capacity` bounds header plus payload; `trailer` selects byte-stream
    /// framing closed by `<EOF>`.
    pub fn new(capacity: usize, trailer: bool) -> Self {
        Self {
            buffer: Vec::new(),
            capacity,
            trailer,
            state: State::AwaitingHeader,
        }
    }

    /// Feed one chunk of any non-zero length.
    ///
    /// Returns one entry per frame completed or aborted in this chunk, in
    /// stream order. Aborts are `CapacityExceeded` or `MissingTrailer`
    /// errors; the assembler recovers on its own afterwards.
    pub fn ingest(&mut self, chunk: &[u8]) -> Vec<Result<Frame>> {
        let mut events = Vec::new();
        let mut rest = chunk;

        while !rest.is_empty() {
            let (consumed, event) = self.step(rest);
            rest = &rest[consumed..];
            events.extend(event);
        }

        debug_assert!(self.buffer.len() <= self.capacity);
        events
    }

    /// Consume a prefix of `data`, possibly completing or aborting a frame.
    fn step(&mut self, data: &[u8]) -> (usize, Option<Result<Frame>>) {
        match &mut self.state {
            State::AwaitingHeader => {
                if self.trailer && self.buffer.is_empty() {
                    // stray line endings after a sentinel
                    let stray = data.iter().take_while(|b| matches!(b, b'\r' | b'\n')).count();
                    if stray > 0 {
                        return (stray, None);
                    }
                }

                let take = (HEADER_SIZE - self.buffer.len()).min(data.len());
                self.buffer.extend_from_slice(&data[..take]);
                if self.buffer.len() < HEADER_SIZE {
                    return (take, None);
                }

                let header = match FrameHeader::decode(&self.buffer) {
                    Ok(header) => header,
                    Err(e) => {
                        self.buffer.clear();
                        return (take, Some(Err(e)));
                    }
                };
                let declared = header.payload_size as usize;
                let limit = self.capacity.saturating_sub(HEADER_SIZE);
                if declared >= limit {
                    warn!(
                        tag = %header.tag_text(),
                        declared,
                        capacity = limit,
                        "frame exceeds receive buffer, aborting"
                    );
                    self.buffer.clear();
                    self.state = State::Discard { remaining: declared };
                    return (
                        take,
                        Some(Err(LinkError::CapacityExceeded {
                            declared,
                            capacity: limit,
                        })),
                    );
                }

                debug!(tag = %header.tag_text(), size = declared, "frame header");
                self.state = State::AccumulatingPayload { header };
                if declared == 0 {
                    return (take, self.payload_done(header));
                }
                (take, None)
            }

            State::AccumulatingPayload { header } => {
                let header = *header;
                let total = HEADER_SIZE + header.payload_size as usize;
                let take = (total - self.buffer.len()).min(data.len());
                self.buffer.extend_from_slice(&data[..take]);
                if self.buffer.len() < total {
                    return (take, None);
                }
                (take, self.payload_done(header))
            }

            State::AwaitingTrailer { header, matched } => {
                let header = *header;
                for (i, &b) in data.iter().enumerate() {
                    if *matched == 0 && matches!(b, b'\r' | b'\n') {
                        continue;
                    }
                    if b == SENTINEL[*matched] {
                        *matched += 1;
                        if *matched == SENTINEL.len() {
                            return (i + 1, Some(Ok(self.finish(header))));
                        }
                        continue;
                    }

                    // `b` is left for the next header
                    let tag = header.tag_text();
                    warn!(tag = %tag, offending = b, "frame trailer missing, frame dropped");
                    self.buffer.clear();
                    self.state = State::AwaitingHeader;
                    return (i, Some(Err(LinkError::MissingTrailer { tag })));
                }
                (data.len(), None)
            }

            State::Discard { remaining } => {
                let skip = (*remaining).min(data.len());
                *remaining -= skip;
                if *remaining == 0 {
                    debug!("oversized payload skipped");
                    self.state = if self.trailer {
                        State::Resync {
                            window: SentinelWindow::default(),
                        }
                    } else {
                        State::AwaitingHeader
                    };
                }
                (skip, None)
            }

            State::Resync { window } => {
                for (i, &b) in data.iter().enumerate() {
                    if window.push(b) {
                        debug!("resynchronized on sentinel");
                        self.state = State::AwaitingHeader;
                        return (i + 1, None);
                    }
                }
                (data.len(), None)
            }
        }
    }

    fn payload_done(&mut self, header: FrameHeader) -> Option<Result<Frame>> {
        if self.trailer {
            self.state = State::AwaitingTrailer { header, matched: 0 };
            None
        } else {
            Some(Ok(self.finish(header)))
        }
    }

    fn finish(&mut self, header: FrameHeader) -> Frame {
        let payload = self.buffer.split_off(HEADER_SIZE);
        self.buffer.clear();
        self.state = State::AwaitingHeader;
        debug!(tag = %header.tag_text(), size = payload.len(), "frame complete");
        Frame { header, payload }
    }

    /// Drop any partial frame; returns how many bytes were discarded.
    pub fn abort(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.state = State::AwaitingHeader;
        dropped
    }

    /// True when no frame is in progress.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::AwaitingHeader) && self.buffer.is_empty()
    }

    /// Number of buffered bytes of the frame in progress.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::AwaitingHeader => "AwaitingHeader",
            State::AccumulatingPayload { .. } => "AccumulatingPayload",
            State::AwaitingTrailer { .. } => "AwaitingTrailer",
            State::Discard { .. } => "Discard",
            State::Resync { .. } => "Resync",
        }
    }
}
