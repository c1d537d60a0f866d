//! Framed Reading Type and Wire Codec
//!
//! ## Overview
//!
//! Every measurement travels the pipeline as a self-describing record: a
//! source tag, a length, and an opaque payload the owning source knows how to
//! marshal. The same encoding is used in the ring buffer accounting and on
//! disk, so a spill file is nothing more than frames laid back to back:
//!
//! ```text
//! ┌──────────┬────────────────┬─────────────────────┐
//! │ u8 index │ u32-le length  │ length payload bytes│
//! └──────────┴────────────────┴─────────────────────┘
//!   1 byte       4 bytes           0..=507 bytes
//! ```
//!
//! No header, no footer, no checksum: the length prefix is the only framing,
//! which is why the 512-byte ceiling is enforced as a hard invariant. A
//! declared length that would push a frame past [`MAX_FRAME_BYTES`] cannot be
//! skipped over safely - the stream offset is gone - so decoding treats it as
//! corruption and the pipeline aborts.
//!
//! ## Why `heapless::Vec`?
//!
//! The payload is a `heapless::Vec<u8, MAX_PAYLOAD_BYTES>`: the ceiling is
//! part of the type, so an oversized payload cannot be constructed in the
//! first place and a frame is a fixed-footprint value that moves through the
//! ring without touching the heap.

use std::io::Read;

use heapless::Vec as BoundedVec;

use crate::errors::{TelemetryError, TelemetryResult};

/// Hard ceiling on the total encoded size of one frame
pub const MAX_FRAME_BYTES: usize = 512;

/// Encoded header: source index byte plus u32 length prefix
pub const FRAME_HEADER_BYTES: usize = 5;

/// Largest payload that still fits under [`MAX_FRAME_BYTES`]
pub const MAX_PAYLOAD_BYTES: usize = MAX_FRAME_BYTES - FRAME_HEADER_BYTES;

/// Payload storage for one reading
pub type Payload = BoundedVec<u8, MAX_PAYLOAD_BYTES>;

/// One sensor measurement, framed for the ring buffer and spill files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramedReading {
    /// Registration index of the producing source
    pub source_idx: u8,
    /// Opaque payload bytes, interpreted only by the owning source
    pub payload: Payload,
}

impl FramedReading {
    /// Frame a payload produced by the source at `source_idx`
    pub fn new(source_idx: u8, payload: Payload) -> Self {
        Self {
            source_idx,
            payload,
        }
    }

    /// Frame a raw byte slice, failing if it exceeds the payload ceiling
    pub fn from_bytes(source_idx: u8, bytes: &[u8]) -> TelemetryResult<Self> {
        let payload = Payload::from_slice(bytes).map_err(|_| TelemetryError::FrameTooLarge {
            declared: FRAME_HEADER_BYTES + bytes.len(),
            max: MAX_FRAME_BYTES,
        })?;
        Ok(Self::new(source_idx, payload))
    }

    /// Total encoded size, header included
    ///
    /// This is the unit of ring-buffer occupancy and of the spill byte
    /// budget.
    pub fn stored_size(&self) -> usize {
        FRAME_HEADER_BYTES + self.payload.len()
    }

    /// Append the wire encoding to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.source_idx);
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
    }

    /// Decode one frame from a reader
    ///
    /// Returns `Ok(None)` on a clean end of stream (zero bytes before the
    /// header). A stream that ends mid-record, or a length prefix that fails
    /// the [`MAX_FRAME_BYTES`] sanity check, is corruption: the caller gets a
    /// fatal error, never a partial frame.
    pub fn decode_from<R: Read>(reader: &mut R, origin: &str) -> TelemetryResult<Option<Self>> {
        let mut header = [0u8; FRAME_HEADER_BYTES];
        match read_exact_or_eof(reader, &mut header) {
            HeaderRead::Eof => return Ok(None),
            HeaderRead::Partial => {
                return Err(TelemetryError::TruncatedFrame {
                    file: origin.to_owned(),
                    detail: "stream ended inside frame header",
                })
            }
            HeaderRead::Full => {}
            HeaderRead::Failed(e) => {
                return Err(TelemetryError::Storage {
                    path: origin.to_owned(),
                    source: e,
                })
            }
        }

        let source_idx = header[0];
        let declared = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if FRAME_HEADER_BYTES + declared > MAX_FRAME_BYTES {
            return Err(TelemetryError::FrameTooLarge {
                declared: FRAME_HEADER_BYTES + declared,
                max: MAX_FRAME_BYTES,
            });
        }

        let mut payload = Payload::new();
        payload
            .resize_default(declared)
            .unwrap_or_else(|_| unreachable!("declared length already bounds-checked"));
        reader.read_exact(&mut payload[..]).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TelemetryError::TruncatedFrame {
                    file: origin.to_owned(),
                    detail: "stream ended inside frame payload",
                }
            } else {
                TelemetryError::Storage {
                    path: origin.to_owned(),
                    source: e,
                }
            }
        })?;

        Ok(Some(Self {
            source_idx,
            payload,
        }))
    }
}

enum HeaderRead {
    /// All header bytes read
    Full,
    /// Zero bytes available - clean end of stream
    Eof,
    /// Some but not all header bytes - torn record
    Partial,
    /// Underlying I/O failure
    Failed(std::io::Error),
}

/// Distinguish clean EOF from a torn header
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> HeaderRead {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return HeaderRead::Eof,
            Ok(0) => return HeaderRead::Partial,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return HeaderRead::Failed(e),
        }
    }
    HeaderRead::Full
}
