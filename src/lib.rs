//! # esn-link
//!
//! Receives model parameters and input samples as framed ASCII "files" over
//! a packet or byte-stream link, drives an echo state network (reservoir +
//! linear readout) and adapts the readout online with recursive least
//! squares as ground-truth targets arrive.
//!
//! ```text
//! chunks -> FrameAssembler -> Frame -> Session -> reservoir -> RlsTrainer
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

pub mod config;
pub mod control;
pub mod error;
pub mod link;
pub mod matrix;
pub mod parse;
pub mod reassembly;
pub mod reservoir;
pub mod rls;
pub mod session;
pub mod tag;

pub use config::EsnConfig;
pub use control::Command;
pub use error::{LinkError, Result};
pub use link::{Dispatched, Idle, Link, ReadStep};
pub use matrix::Matrix;
pub use reassembly::FrameAssembler;
pub use rls::RlsTrainer;
pub use session::{Applied, Ready, RunReport, Session, SessionStats};
pub use tag::FrameTag;

/// Header size in bytes: 8 tag + 4 length + 4 reserved.
pub const HEADER_SIZE: usize = 16;

/// Default receive buffer capacity.
pub const MAX_FRAME_SIZE: usize = 3072 * 3072;

/// Sentinel that closes a frame on byte-stream transports.
pub const EOF_MARKER: &[u8] = b"<EOF>\n";

/// Fixed 16-byte frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub tag: [u8; 8],
    pub payload_size: u32,
    pub reserved: [u8; 4],
}

impl FrameHeader {
    /// Header for `tag` with `_` padding and zeroed reserved bytes.
    pub fn new(tag: &[u8], payload_size: u32) -> Self {
        let mut padded = [b'_'; 8];
        let n = tag.len().min(8);
        padded[..n].copy_from_slice(&tag[..n]);
        Self {
            tag: padded,
            payload_size,
            reserved: [0; 4],
        }
    }

    /// Encode header to bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&self.tag);
        buf.write_u32::<LittleEndian>(self.payload_size)?;
        buf.extend_from_slice(&self.reserved);
        Ok(buf)
    }

    /// Decode header from the first `HEADER_SIZE` bytes of `data`
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let mut tag = [0u8; 8];
        cursor.read_exact(&mut tag)?;
        let payload_size = cursor.read_u32::<LittleEndian>()?;
        let mut reserved = [0u8; 4];
        cursor.read_exact(&mut reserved)?;

        Ok(FrameHeader {
            tag,
            payload_size,
            reserved,
        })
    }

    /// Recognized tag, if any.
    pub fn kind(&self) -> Option<FrameTag> {
        FrameTag::from_raw(&self.tag)
    }

    /// Tag as printable text with transport noise trimmed.
    pub fn tag_text(&self) -> String {
        String::from_utf8_lossy(tag::trim_tag(&self.tag)).into_owned()
    }
}

/// One reassembled frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn kind(&self) -> Option<FrameTag> {
        self.header.kind()
    }
}

/// Build the wire bytes of one frame, optionally closed by `EOF_MARKER`.
pub fn encode_frame(tag: &[u8], payload: &[u8], trailer: bool) -> Result<Vec<u8>> {
    let size = u32::try_from(payload.len()).map_err(|_| LinkError::CapacityExceeded {
        declared: payload.len(),
        capacity: u32::MAX as usize,
    })?;
    let mut buf = FrameHeader::new(tag, size).encode()?;
    buf.extend_from_slice(payload);
    if trailer {
        buf.extend_from_slice(EOF_MARKER);
    }
    Ok(buf)
}
