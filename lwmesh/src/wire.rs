//! Wire format serialization and deserialization.
//!
//! Every frame has a fixed size determined by its header type alone. Paths
//! and payloads are zero padded, never length prefixed.
//!
//! ## Header (6 bytes)
//!
//! ```text
//! type (1) || length (1) || source (1) || destination (1)
//! || message_id (1) || checksum (1)
//! ```
//!
//! `length` is the full frame size. `source` and `destination` are the
//! link-level hop addresses, rewritten at every relay.
//!
//! ## Route payload (12 bytes)
//!
//! ```text
//! origin (1) || target (1) || unique_id (1) || kind (1) || path (8)
//! ```
//!
//! Used by RouteRequest, RouteReply, RouteError and Ack (18-byte frames).
//! `origin`/`target` are end-to-end and never rewritten.
//!
//! ## SendTo (50 bytes)
//!
//! ```text
//! header (6) || route payload (12) || payload (32)
//! ```
//!
//! ## Checksum
//!
//! CRC-8, reflected polynomial 0x8C, seed 0 (CRC-8/MAXIM-DOW), computed over
//! the full frame with the checksum byte replaced by [`CHECKSUM_SENTINEL`].

use core::fmt;

use crc::{Crc, CRC_8_MAXIM_DOW};

use crate::types::{
    Address, MessageType, Path, Payload, MAX_PACKET_SIZE, MAX_PATH_LEN, MAX_PAYLOAD_LEN,
};

pub const HEADER_SIZE: usize = 6;
pub const ROUTE_BODY_SIZE: usize = 4 + MAX_PATH_LEN;
pub const ROUTE_FRAME_SIZE: usize = HEADER_SIZE + ROUTE_BODY_SIZE;
pub const SEND_TO_FRAME_SIZE: usize = ROUTE_FRAME_SIZE + MAX_PAYLOAD_LEN;
pub const MAX_FRAME_SIZE: usize = SEND_TO_FRAME_SIZE;

pub const CHECKSUM_OFFSET: usize = 5;
pub const MESSAGE_ID_OFFSET: usize = 4;
pub const CHECKSUM_SENTINEL: u8 = 0xAA;

const FRAME_CRC: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of buffer.
    UnexpectedEof,
    /// Buffer or declared length disagrees with the frame type, or trailing bytes.
    InvalidLength,
    /// Unknown type byte, or a type that never appears as a frame.
    InvalidMessageType,
    /// Field value out of range (e.g. broadcast inside a path).
    InvalidValue,
}

/// Fixed frame size for a header type, `None` for user-message kinds.
pub const fn frame_size(kind: MessageType) -> Option<usize> {
    match kind {
        MessageType::RouteRequest
        | MessageType::RouteReply
        | MessageType::RouteError
        | MessageType::Ack => Some(ROUTE_FRAME_SIZE),
        MessageType::SendTo => Some(SEND_TO_FRAME_SIZE),
        MessageType::Registration | MessageType::UserData => None,
    }
}

fn compute_checksum(buf: &[u8]) -> u8 {
    let mut digest = FRAME_CRC.digest();
    if buf.len() > CHECKSUM_OFFSET {
        digest.update(&buf[..CHECKSUM_OFFSET]);
        digest.update(&[CHECKSUM_SENTINEL]);
        digest.update(&buf[CHECKSUM_OFFSET + 1..]);
    } else {
        digest.update(buf);
    }
    digest.finalize()
}

/// Compute the frame checksum and store it in the checksum field.
pub fn encode_checksum(buf: &mut [u8]) -> u8 {
    let checksum = compute_checksum(buf);
    if let Some(slot) = buf.get_mut(CHECKSUM_OFFSET) {
        *slot = checksum;
    }
    checksum
}

/// Recompute the checksum and compare it with the stored one.
pub fn verify_checksum(buf: &[u8]) -> bool {
    match buf.get(CHECKSUM_OFFSET) {
        Some(&stored) => compute_checksum(buf) == stored,
        None => false,
    }
}

/// Validate the frame shape from the type byte and sizes alone.
///
/// Runs before the checksum so nothing of a malformed buffer is parsed.
pub fn check_shape(data: &[u8]) -> Result<MessageType, DecodeError> {
    let raw_kind = *data.first().ok_or(DecodeError::UnexpectedEof)?;
    let kind = MessageType::from_u8(raw_kind).ok_or(DecodeError::InvalidMessageType)?;
    let size = frame_size(kind).ok_or(DecodeError::InvalidMessageType)?;
    if data.len() != size || data.get(1).copied() != Some(size as u8) {
        return Err(DecodeError::InvalidLength);
    }
    Ok(kind)
}

/// Fixed-capacity byte buffer holding one frame.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FrameBuf {
    bytes: [u8; MAX_PACKET_SIZE],
    len: u8,
}

impl FrameBuf {
    /// Empty buffer.
    pub const fn new() -> Self {
        Self {
            bytes: [0u8; MAX_PACKET_SIZE],
            len: 0,
        }
    }

    /// Copy a received packet, `None` if it exceeds [`MAX_PACKET_SIZE`].
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() > MAX_PACKET_SIZE {
            return None;
        }
        let mut buf = Self::new();
        buf.bytes[..data.len()].copy_from_slice(data);
        buf.len = data.len() as u8;
        Some(buf)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn push(&mut self, byte: u8) {
        let len = self.len as usize;
        debug_assert!(len < MAX_PACKET_SIZE, "frame buffer overflow");
        if len < MAX_PACKET_SIZE {
            self.bytes[len] = byte;
            self.len += 1;
        }
    }
}

impl Default for FrameBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<[u8]> for FrameBuf {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for FrameBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameBuf({:02x?})", self.as_slice())
    }
}

/// Cursor over a received byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a new reader over a byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of bytes remaining.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Returns true if there are no more bytes to read.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the current position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let v = *self.buf.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(v)
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a u32 in big-endian format.
    pub fn read_u32_be(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_address(&mut self) -> Result<Address, DecodeError> {
        self.read_u8().map(Address)
    }

    pub fn read_message_type(&mut self) -> Result<MessageType, DecodeError> {
        MessageType::from_u8(self.read_u8()?).ok_or(DecodeError::InvalidMessageType)
    }

    /// Read a zero-padded path.
    ///
    /// Hops must be unicast and contiguous: nothing but padding may follow
    /// the first zero byte.
    pub fn read_path(&mut self) -> Result<Path, DecodeError> {
        let raw = self.read_bytes(MAX_PATH_LEN)?;
        let len = raw.iter().position(|&b| b == 0).unwrap_or(MAX_PATH_LEN);
        if raw[len..].iter().any(|&b| b != 0) {
            return Err(DecodeError::InvalidValue);
        }
        Path::from_bytes(&raw[..len]).map_err(|_| DecodeError::InvalidValue)
    }

    pub fn read_payload(&mut self) -> Result<Payload, DecodeError> {
        let raw = self.read_bytes(MAX_PAYLOAD_LEN)?;
        let mut bytes = [0u8; MAX_PAYLOAD_LEN];
        bytes.copy_from_slice(raw);
        Ok(Payload::from_raw(bytes))
    }
}

/// Frame builder over a fixed buffer.
pub struct Writer {
    buf: FrameBuf,
}

impl Writer {
    /// Create a new empty writer.
    pub fn new() -> Self {
        Self {
            buf: FrameBuf::new(),
        }
    }

    /// Returns the current length of written data.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if no data has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Write a slice of bytes.
    pub fn write_bytes(&mut self, v: &[u8]) {
        for &b in v {
            self.buf.push(b);
        }
    }

    /// Write a u32 in big-endian format.
    pub fn write_u32_be(&mut self, v: u32) {
        self.write_bytes(&v.to_be_bytes());
    }

    pub fn write_address(&mut self, addr: Address) {
        self.write_u8(addr.as_u8());
    }

    /// Write a path padded with zeros to [`MAX_PATH_LEN`].
    pub fn write_path(&mut self, path: &Path) {
        for hop in path.as_slice() {
            self.write_address(*hop);
        }
        for _ in path.len()..MAX_PATH_LEN {
            self.write_u8(0);
        }
    }

    pub fn write_payload(&mut self, payload: &Payload) {
        self.write_bytes(payload.raw());
    }

    /// Consume the writer and return the bytes.
    pub fn finish(self) -> FrameBuf {
        self.buf
    }

    /// Get a reference to the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for types that can be encoded to wire format.
pub trait Encode {
    /// Encode this value to the writer.
    fn encode(&self, w: &mut Writer);

    /// Encode into a fresh buffer.
    fn encode_to_buf(&self) -> FrameBuf {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }
}

/// Trait for types that can be decoded from wire format.
pub trait Decode: Sized {
    /// Decode a value from the reader.
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode from a byte slice (strict: rejects trailing bytes).
    fn decode_from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let result = Self::decode(&mut r)?;
        if !r.is_empty() {
            return Err(DecodeError::InvalidLength);
        }
        Ok(result)
    }
}

/// Common frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub kind: MessageType,
    /// Transmitting hop.
    pub source: Address,
    /// Receiving hop, or broadcast.
    pub destination: Address,
    pub message_id: u8,
    /// Checksum as received. Ignored when encoding.
    pub checksum: u8,
}

impl Header {
    pub fn new(kind: MessageType, source: Address, destination: Address, message_id: u8) -> Self {
        Self {
            kind,
            source,
            destination,
            message_id,
            checksum: 0,
        }
    }
}

impl Encode for Header {
    fn encode(&self, w: &mut Writer) {
        w.write_u8(self.kind.as_u8());
        w.write_u8(frame_size(self.kind).unwrap_or(0) as u8);
        w.write_address(self.source);
        w.write_address(self.destination);
        w.write_u8(self.message_id);
        w.write_u8(CHECKSUM_SENTINEL);
    }
}

impl Decode for Header {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let kind = r.read_message_type()?;
        let size = frame_size(kind).ok_or(DecodeError::InvalidMessageType)?;
        if r.read_u8()? as usize != size {
            return Err(DecodeError::InvalidLength);
        }
        Ok(Self {
            kind,
            source: r.read_address()?,
            destination: r.read_address()?,
            message_id: r.read_u8()?,
            checksum: r.read_u8()?,
        })
    }
}

/// End-to-end part shared by discovery, reply, ack and data frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteBody {
    /// Node that started the exchange.
    pub origin: Address,
    /// Node the exchange is aimed at.
    pub target: Address,
    pub unique_id: u8,
    /// Request/reply kind, or the user-message kind echoed by an Ack.
    pub kind: MessageType,
    pub path: Path,
}

impl Encode for RouteBody {
    fn encode(&self, w: &mut Writer) {
        w.write_address(self.origin);
        w.write_address(self.target);
        w.write_u8(self.unique_id);
        w.write_u8(self.kind.as_u8());
        w.write_path(&self.path);
    }
}

impl Decode for RouteBody {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            origin: r.read_address()?,
            target: r.read_address()?,
            unique_id: r.read_u8()?,
            kind: r.read_message_type()?,
            path: r.read_path()?,
        })
    }
}

/// RouteRequest, RouteReply, RouteError or Ack, told apart by `header.kind`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteFrame {
    pub header: Header,
    pub body: RouteBody,
}

/// Application data frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendToFrame {
    pub header: Header,
    pub body: RouteBody,
    pub payload: Payload,
}

/// A decoded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frame {
    Route(RouteFrame),
    SendTo(SendToFrame),
}

impl Frame {
    pub fn header(&self) -> &Header {
        match self {
            Frame::Route(f) => &f.header,
            Frame::SendTo(f) => &f.header,
        }
    }

    pub fn body(&self) -> &RouteBody {
        match self {
            Frame::Route(f) => &f.body,
            Frame::SendTo(f) => &f.body,
        }
    }

    pub fn kind(&self) -> MessageType {
        self.header().kind
    }

    /// Encode and seal with the checksum, ready for the transport.
    pub fn to_wire(&self) -> FrameBuf {
        let mut buf = self.encode_to_buf();
        encode_checksum(buf.as_mut_slice());
        buf
    }
}

impl Encode for Frame {
    fn encode(&self, w: &mut Writer) {
        match self {
            Frame::Route(f) => {
                f.header.encode(w);
                f.body.encode(w);
            }
            Frame::SendTo(f) => {
                f.header.encode(w);
                f.body.encode(w);
                w.write_payload(&f.payload);
            }
        }
    }
}

impl Decode for Frame {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let header = Header::decode(r)?;
        let body = RouteBody::decode(r)?;
        match header.kind {
            MessageType::SendTo => Ok(Frame::SendTo(SendToFrame {
                header,
                body,
                payload: r.read_payload()?,
            })),
            MessageType::RouteRequest
            | MessageType::RouteReply
            | MessageType::RouteError
            | MessageType::Ack => Ok(Frame::Route(RouteFrame { header, body })),
            MessageType::Registration | MessageType::UserData => {
                Err(DecodeError::InvalidMessageType)
            }
        }
    }
}
