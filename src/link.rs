//! Transport glue: chunks in, frames dispatched to the session.
//!
//! Reading happens at this boundary only. The transport is expected to be
//! a blocking reader with a read timeout (`set_read_timeout` on a socket or
//! serial port); a timeout in the middle of a frame drops that frame.

use std::io::{self, ErrorKind, Read};
use tracing::{debug, warn};

use crate::config::EsnConfig;
use crate::control::Command;
use crate::error::{LinkError, Result};
use crate::reassembly::FrameAssembler;
use crate::session::{Applied, RunReport, Session};

/// Read size used by `serve`.
pub const READ_CHUNK: usize = 4096;

/// Outcome of one frame, or of one aborted frame.
#[derive(Debug)]
pub struct Dispatched {
    /// Trimmed tag text; empty for aborts that carry no tag.
    pub tag: String,
    pub result: Result<Applied>,
}

/// What a read timeout means for the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Idle {
    /// Keep reading; the peer may still send.
    Wait,
    /// Treat the timeout as the end of the stream.
    Close,
}

/// Dispatches produced by one read, and whether to keep reading.
#[derive(Debug)]
pub struct ReadStep {
    pub dispatched: Vec<Dispatched>,
    pub open: bool,
}

/// Frame assembler and session wired together.
pub struct Link {
    assembler: FrameAssembler,
    session: Session,
}

impl Link {
    pub fn new(config: EsnConfig) -> Result<Self> {
        let assembler = FrameAssembler::new(config.max_frame_size, config.trailer);
        let session = Session::new(config)?;
        Ok(Self { assembler, session })
    }

    /// Ingest one chunk and apply every frame it completes, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Dispatched> {
        self.assembler
            .ingest(chunk)
            .into_iter()
            .map(|event| match event {
                Ok(frame) => Dispatched {
                    tag: frame.header.tag_text(),
                    result: self.session.handle_frame(&frame),
                },
                Err(e) => Dispatched {
                    tag: match &e {
                        LinkError::MissingTrailer { tag } => tag.clone(),
                        _ => String::new(),
                    },
                    result: Err(e),
                },
            })
            .collect()
    }

    /// Apply a raw control message. Unknown keywords are logged and ignored.
    pub fn command(&mut self, raw: &[u8]) -> Result<Option<RunReport>> {
        match Command::from_bytes(raw) {
            Some(cmd) => self.session.execute(cmd),
            None => {
                warn!(command = %String::from_utf8_lossy(raw).trim(), "unknown command");
                Ok(None)
            }
        }
    }

    /// Read from `reader` until end of stream, dispatching every frame to
    /// `on_dispatch`. Returns the number of dispatch outcomes.
    ///
    /// A read timeout with a partial frame buffered drops the frame and is
    /// reported as `Timeout`; an idle timeout just keeps waiting.
    pub fn serve<R, F>(&mut self, reader: &mut R, mut on_dispatch: F) -> Result<usize>
    where
        R: Read,
        F: FnMut(&Dispatched),
    {
        let mut buf = vec![0u8; READ_CHUNK];
        let mut count = 0;

        loop {
            let read = reader.read(&mut buf);
            let step = self.on_read(read, &buf, Idle::Wait)?;
            for dispatched in &step.dispatched {
                on_dispatch(dispatched);
            }
            count += step.dispatched.len();
            if !step.open {
                debug!(dispatched = count, "stream closed");
                return Ok(count);
            }
        }
    }

    /// Apply the outcome of one transport read into `buf`.
    ///
    /// Callers that share the link between threads read without holding
    /// the lock and call this per chunk. End of stream and, with
    /// `Idle::Close`, any timeout close the stream; a timeout mid-frame
    /// always drops that frame.
    pub fn on_read(&mut self, read: io::Result<usize>, buf: &[u8], idle: Idle) -> Result<ReadStep> {
        match read {
            Ok(0) => Ok(ReadStep {
                dispatched: self.drop_partial().into_iter().collect(),
                open: false,
            }),
            Ok(n) => Ok(ReadStep {
                dispatched: self.feed(&buf[..n]),
                open: true,
            }),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(ReadStep {
                    dispatched: self.drop_partial().into_iter().collect(),
                    open: idle == Idle::Wait,
                })
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(ReadStep {
                dispatched: Vec::new(),
                open: true,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop a partially received frame after the transport went quiet.
    pub fn drop_partial(&mut self) -> Option<Dispatched> {
        if self.assembler.is_idle() {
            return None;
        }
        let buffered = self.assembler.abort();
        warn!(buffered, "transport stalled mid-frame, frame dropped");
        Some(Dispatched {
            tag: String::new(),
            result: Err(LinkError::Timeout { buffered }),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn assembler(&self) -> &FrameAssembler {
        &self.assembler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode_frame;
    use std::io::{self, Cursor};

    /// Reader that times out once after yielding a prefix.
    struct Stalling {
        data: Vec<u8>,
        stall_at: usize,
        pos: usize,
        stalled: bool,
    }

    impl Read for Stalling {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos == self.stall_at && !self.stalled {
                self.stalled = true;
                return Err(io::Error::new(ErrorKind::TimedOut, "stall"));
            }
            let end = if self.pos < self.stall_at {
                self.stall_at
            } else {
                self.data.len()
            };
            let n = (end - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn link() -> Link {
        Link::new(EsnConfig::new(1, 1, 1)).unwrap()
    }

    #[test]
    fn test_feed_dispatches_in_order() {
        let mut link = link();
        let mut bytes = encode_frame(b"WIN_____", b"1", false).unwrap();
        bytes.extend(encode_frame(b"BOGUS___", b"1", false).unwrap());

        let out = link.feed(&bytes);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tag, "WIN_____");
        assert!(out[0].result.is_ok());
        assert!(matches!(out[1].result, Err(LinkError::UnrecognizedTag(_))));
    }

    #[test]
    fn test_serve_until_eof() {
        let mut link = link();
        let mut bytes = encode_frame(b"WIN_____", b"0.5", false).unwrap();
        bytes.extend(encode_frame(b"WX______", b"0.5", false).unwrap());

        let mut tags = Vec::new();
        let n = link
            .serve(&mut Cursor::new(bytes), |d| tags.push(d.tag.clone()))
            .unwrap();

        assert_eq!(n, 2);
        assert_eq!(tags, ["WIN_____", "WX______"]);
    }

    #[test]
    fn test_timeout_mid_frame_drops_it() {
        let mut bytes = encode_frame(b"WIN_____", b"0.5", false).unwrap();
        let stall_at = bytes.len() - 1;
        bytes.truncate(stall_at);
        bytes.extend(encode_frame(b"WX______", b"0.25", false).unwrap());

        let mut reader = Stalling {
            data: bytes,
            stall_at,
            pos: 0,
            stalled: false,
        };
        let mut link = link();
        let mut results = Vec::new();
        link.serve(&mut reader, |d| results.push(d.result.is_ok())).unwrap();

        assert_eq!(results, [false, true]);
        assert_eq!(link.session().w_x().as_slice(), &[0.25]);
        assert_eq!(link.session().w_in().as_slice(), &[0.0]);
    }

    #[test]
    fn test_idle_policy_on_timeout() {
        let mut link = link();
        let timeout = || Err(io::Error::new(ErrorKind::WouldBlock, "idle"));

        let step = link.on_read(timeout(), &[], Idle::Wait).unwrap();
        assert!(step.open);
        assert!(step.dispatched.is_empty());

        let step = link.on_read(timeout(), &[], Idle::Close).unwrap();
        assert!(!step.open);
        assert!(step.dispatched.is_empty());
    }

    #[test]
    fn test_on_read_close_drops_partial() {
        let mut link = link();
        let bytes = encode_frame(b"WIN_____", b"0.5", false).unwrap();
        let n = bytes.len() - 1;

        let step = link.on_read(Ok(n), &bytes, Idle::Close).unwrap();
        assert!(step.open && step.dispatched.is_empty());

        let step = link
            .on_read(Err(io::Error::new(ErrorKind::TimedOut, "t")), &[], Idle::Close)
            .unwrap();
        assert!(!step.open);
        assert!(matches!(
            step.dispatched[0].result,
            Err(LinkError::Timeout { buffered }) if buffered == n
        ));
        assert!(link.assembler().is_idle());
    }

    #[test]
    fn test_on_read_hard_error() {
        let mut link = link();
        let err = link
            .on_read(Err(io::Error::new(ErrorKind::ConnectionReset, "gone")), &[], Idle::Wait)
            .unwrap_err();
        assert!(matches!(err, LinkError::Io(_)));
    }

    #[test]
    fn test_missing_trailer_reported_with_tag() {
        let mut config = EsnConfig::new(1, 1, 1);
        config.trailer = true;
        let mut link = Link::new(config).unwrap();
        let mut bytes = encode_frame(b"WIN_____", b"0.5", false).unwrap();
        bytes.extend(encode_frame(b"WX______", b"0.25", true).unwrap());

        let out = link.feed(&bytes);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tag, "WIN_____");
        assert!(matches!(out[0].result, Err(LinkError::MissingTrailer { .. })));
        assert!(out[1].result.is_ok());
        assert_eq!(link.session().ready(), crate::session::Ready::W_X);
    }

    #[test]
    fn test_command_path() {
        let mut link = link();
        assert!(link.command(b"TRN_ON\n").unwrap().is_none());
        assert!(link.session().training_enabled());
        assert!(link.command(b"HELLO").unwrap().is_none());
    }
}
