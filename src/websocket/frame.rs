//! RFC6455 frame codec.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! # Design Decisions
//! - The decoder is a resumable state machine fed with raw socket reads
//! - Only one message is in flight per connection
//! - Server frames are never masked; client frames must be
//! - Ping/pong are not part of the supported opcode set

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest possible frame header: 2 + 8 (length) + 4 (mask).
const MAX_HEADER_LEN: usize = 14;

/// Largest payload length the 16-bit encoding can express.
pub const MAX_ENCODED_PAYLOAD: usize = u16::MAX as usize;

/// Default slice size for outgoing messages.
pub const DEFAULT_CHUNK_SIZE: usize = 60_000;

const FIN: u8 = 0x80;
const MASK_BIT: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
        }
    }
}

/// How messages larger than the chunk size are put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fragmentation {
    /// First slice carries the opcode with FIN clear, the rest are
    /// continuation frames, the last one has FIN set.
    #[default]
    Continuation,
    /// Every slice is a complete FIN frame with the data opcode. The peer
    /// must reassemble at the application layer.
    Independent,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("client frame is not masked")]
    Unmasked,
    #[error("unsupported opcode {0:#x}")]
    UnsupportedOpcode(u8),
    #[error("message of {length} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { length: u64, limit: u64 },
    #[error("payload of {0} bytes does not fit a 16-bit frame length")]
    PayloadTooLarge(usize),
    #[error("continuation frame out of sequence")]
    FragmentSequence,
}

/// A complete data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn is_text(&self) -> bool {
        self.opcode == Opcode::Text
    }

    /// The payload as UTF-8, if it is valid.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Result of feeding bytes to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Message(Message),
    /// The peer sent a close frame; its payload is not delivered.
    Close,
}

/// Per-connection frame parse state.
#[derive(Debug)]
pub struct FrameDecoder {
    opcode: Opcode,
    fin: bool,
    expected_length: u64,
    mask: [u8; 4],
    payload_offset: usize,
    digest: Vec<u8>,
    digest_index: u64,
    starting_new_frame: bool,
    /// Header bytes of a frame whose header spans socket reads.
    header: Vec<u8>,
    /// Opcode and data of a message split with FIN=0 frames.
    fragments: Option<(Opcode, Vec<u8>)>,
    max_message_bytes: u64,
}

impl FrameDecoder {
    pub fn new(max_message_bytes: u64) -> Self {
        Self {
            opcode: Opcode::Continuation,
            fin: true,
            expected_length: 0,
            mask: [0; 4],
            payload_offset: 0,
            digest: Vec::new(),
            digest_index: 0,
            starting_new_frame: true,
            header: Vec::with_capacity(MAX_HEADER_LEN),
            fragments: None,
            max_message_bytes,
        }
    }

    /// Whether the decoder sits between frames, holding no partial data.
    pub fn is_idle(&self) -> bool {
        self.starting_new_frame && self.header.is_empty() && self.fragments.is_none()
    }

    /// Offset of the payload within the header of the current frame.
    pub fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    /// Feed one socket read. Returns every message completed by these bytes.
    ///
    /// A `Decoded::Close` is always the last element; bytes after it are ignored.
    pub fn feed(&mut self, mut input: &[u8]) -> Result<Vec<Decoded>, FrameError> {
        let mut decoded = Vec::new();

        loop {
            if self.starting_new_frame {
                if input.is_empty() {
                    break;
                }
                match self.read_header(input)? {
                    Some(consumed) => input = &input[consumed..],
                    None => break,
                }
                if self.opcode == Opcode::Close {
                    self.starting_new_frame = true;
                    decoded.push(Decoded::Close);
                    return Ok(decoded);
                }
            }

            let remaining = (self.expected_length - self.digest_index) as usize;
            let take = remaining.min(input.len());
            let start = self.digest_index as usize;
            let mask = self.mask;
            self.digest.extend(
                input[..take]
                    .iter()
                    .enumerate()
                    .map(|(i, byte)| byte ^ mask[(start + i) % 4]),
            );
            self.digest_index += take as u64;
            input = &input[take..];

            if self.digest_index == self.expected_length {
                self.complete_frame(&mut decoded)?;
            } else {
                break;
            }
        }

        Ok(decoded)
    }

    /// Returns the number of `input` bytes consumed once the header is
    /// complete, or `None` when every byte was buffered and more are needed.
    fn read_header(&mut self, input: &[u8]) -> Result<Option<usize>, FrameError> {
        let buffered = self.header.len();
        let wanted = (MAX_HEADER_LEN - buffered).min(input.len());
        self.header.extend_from_slice(&input[..wanted]);

        let header = &self.header;
        if header.len() < 2 {
            return Ok(None);
        }
        if header[1] & MASK_BIT == 0 {
            return Err(FrameError::Unmasked);
        }

        let (length, mask_offset) = match header[1] & 0x7F {
            126 => {
                if header.len() < 4 {
                    return Ok(None);
                }
                (((header[2] as u64) << 8) | header[3] as u64, 4)
            }
            127 => {
                if header.len() < 10 {
                    return Ok(None);
                }
                let length = header[2..10]
                    .iter()
                    .fold(0u64, |acc, byte| (acc << 8) | *byte as u64);
                (length & (u64::MAX >> 1), 10)
            }
            short => (short as u64, 2),
        };

        let payload_offset = mask_offset + 4;
        if header.len() < payload_offset {
            return Ok(None);
        }

        let opcode = header[0] & 0x0F;
        let opcode = Opcode::from_u8(opcode).ok_or(FrameError::UnsupportedOpcode(opcode))?;
        let buffered_message = self.fragments.as_ref().map_or(0, |(_, data)| data.len() as u64);
        let total = length.saturating_add(buffered_message);
        if total > self.max_message_bytes {
            return Err(FrameError::MessageTooLarge {
                length: total,
                limit: self.max_message_bytes,
            });
        }

        self.fin = header[0] & FIN != 0;
        self.opcode = opcode;
        self.mask.copy_from_slice(&header[mask_offset..payload_offset]);
        self.payload_offset = payload_offset;
        self.expected_length = length;
        self.digest = Vec::with_capacity(length as usize);
        self.digest_index = 0;
        self.starting_new_frame = false;
        self.header.clear();

        Ok(Some(payload_offset - buffered))
    }

    fn complete_frame(&mut self, decoded: &mut Vec<Decoded>) -> Result<(), FrameError> {
        self.starting_new_frame = true;
        let payload = std::mem::take(&mut self.digest);

        match (self.opcode, self.fragments.take()) {
            (Opcode::Text | Opcode::Binary, None) if self.fin => {
                decoded.push(Decoded::Message(Message {
                    opcode: self.opcode,
                    payload,
                }));
            }
            (Opcode::Text | Opcode::Binary, None) => {
                self.fragments = Some((self.opcode, payload));
            }
            (Opcode::Continuation, Some((opcode, mut data))) => {
                data.extend_from_slice(&payload);
                if self.fin {
                    decoded.push(Decoded::Message(Message { opcode, payload: data }));
                } else {
                    self.fragments = Some((opcode, data));
                }
            }
            _ => return Err(FrameError::FragmentSequence),
        }
        Ok(())
    }
}

/// Encode a single unmasked server frame.
pub fn encode_frame(opcode: Opcode, fin: bool, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_ENCODED_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(payload.len() + 4);
    let fin_bit = if fin { FIN } else { 0 };
    frame.push(fin_bit | opcode.as_u8());
    if payload.len() <= 125 {
        frame.push(payload.len() as u8);
    } else {
        frame.push(0x7E);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    }
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Encode a data message, slicing it into `chunk_size` pieces when larger.
pub fn encode_message(
    opcode: Opcode,
    payload: &[u8],
    chunk_size: usize,
    mode: Fragmentation,
) -> Result<Vec<u8>, FrameError> {
    if payload.len() <= chunk_size {
        return encode_frame(opcode, true, payload);
    }

    let chunks = payload.chunks(chunk_size.max(1));
    let last = chunks.len() - 1;
    let mut bytes = Vec::with_capacity(payload.len() + (last + 1) * 4);
    for (index, chunk) in chunks.enumerate() {
        let frame = match mode {
            Fragmentation::Independent => encode_frame(opcode, true, chunk)?,
            Fragmentation::Continuation => {
                let frame_opcode = if index == 0 { opcode } else { Opcode::Continuation };
                encode_frame(frame_opcode, index == last, chunk)?
            }
        };
        bytes.extend_from_slice(&frame);
    }
    Ok(bytes)
}

/// An empty close frame.
pub fn encode_close() -> Vec<u8> {
    vec![FIN | Opcode::Close.as_u8(), 0x00]
}
