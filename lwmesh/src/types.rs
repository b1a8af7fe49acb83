//! Core types and constants for the mesh engine.

use core::fmt;

// Frame geometry
pub const MAX_PATH_LEN: usize = 8;
pub const MAX_PAYLOAD_LEN: usize = 32;
pub const LINK_ID_LEN: usize = 6;
pub const MAX_PACKET_SIZE: usize = 255; // largest radio packet a transport may hand us
pub const MAX_BLOCKED_NODES: usize = 8;

// Timing defaults (milliseconds)
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_MAX_RETRIES: u8 = 8;
pub const PENDING_REQUEST_TIMEOUT_MS: u64 = 6_000;
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 30_000;
pub const ROUTE_RESET_INTERVAL_MS: u64 = 120_000;
pub const MAX_TX_JITTER_MS: u64 = 5;

// Queues
pub const RESULT_QUEUE_SIZE: usize = 8;

// Leading payload byte of control messages
pub const TAG_REGISTRATION: u8 = 0x01;
pub const TAG_CONFIGURATION: u8 = 0x03;

/// One-byte node address.
///
/// `0` means unset, `0xFF` is the broadcast address. Addresses are usually
/// printable characters (`'A'`, `'B'`, ...), which is how `Debug` shows them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub u8);

impl Address {
    /// Unset / invalid address. Also the padding byte inside paths.
    pub const UNSET: Address = Address(0);

    /// Broadcast address.
    pub const BROADCAST: Address = Address(0xFF);

    #[inline]
    pub const fn new(raw: u8) -> Self {
        Address(raw)
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_broadcast(self) -> bool {
        self.0 == 0xFF
    }

    /// True for an address that names exactly one node.
    #[inline]
    pub const fn is_unicast(self) -> bool {
        !self.is_unset() && !self.is_broadcast()
    }
}

impl From<u8> for Address {
    fn from(raw: u8) -> Self {
        Address(raw)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => f.write_str("unset"),
            0xFF => f.write_str("broadcast"),
            b if b.is_ascii_graphic() => write!(f, "{}", b as char),
            b => write!(f, "0x{:02x}", b),
        }
    }
}

/// Ordered hop sequence, at most [`MAX_PATH_LEN`] unicast addresses.
///
/// Paths are carried whole inside discovery, reply, ack and data frames. A
/// route path starts at the originator and ends at the destination.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Path {
    hops: [Address; MAX_PATH_LEN],
    len: u8,
}

impl Path {
    /// Path with no hops.
    pub const EMPTY: Path = Path {
        hops: [Address::UNSET; MAX_PATH_LEN],
        len: 0,
    };

    /// Path consisting of a single node.
    pub fn single(addr: Address) -> Self {
        let mut path = Self::EMPTY;
        path.hops[0] = addr;
        path.len = 1;
        path
    }

    /// Build a path from a hop slice.
    ///
    /// Fails with [`Error::InvalidPath`] when the slice is too long or names
    /// a non-unicast address.
    pub fn from_slice(hops: &[Address]) -> Result<Self, Error> {
        if hops.len() > MAX_PATH_LEN || hops.iter().any(|a| !a.is_unicast()) {
            return Err(Error::InvalidPath);
        }
        let mut path = Self::EMPTY;
        path.hops[..hops.len()].copy_from_slice(hops);
        path.len = hops.len() as u8;
        Ok(path)
    }

    /// Build a path from raw address bytes, e.g. `Path::from_bytes(b"ABD")`.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, Error> {
        if raw.len() > MAX_PATH_LEN {
            return Err(Error::InvalidPath);
        }
        let mut hops = [Address::UNSET; MAX_PATH_LEN];
        for (slot, &b) in hops.iter_mut().zip(raw) {
            *slot = Address(b);
        }
        Self::from_slice(&hops[..raw.len()])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == MAX_PATH_LEN
    }

    #[inline]
    pub fn as_slice(&self) -> &[Address] {
        &self.hops[..self.len()]
    }

    pub fn first(&self) -> Option<Address> {
        self.as_slice().first().copied()
    }

    pub fn last(&self) -> Option<Address> {
        self.as_slice().last().copied()
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.as_slice().contains(&addr)
    }

    pub fn position(&self, addr: Address) -> Option<usize> {
        self.as_slice().iter().position(|&a| a == addr)
    }

    /// The hop following `addr`, i.e. the next node toward the path's end.
    pub fn hop_after(&self, addr: Address) -> Option<Address> {
        let pos = self.position(addr)?;
        self.as_slice().get(pos + 1).copied()
    }

    /// The hop preceding `addr`, i.e. the next node back toward the start.
    pub fn hop_before(&self, addr: Address) -> Option<Address> {
        let pos = self.position(addr)?;
        pos.checked_sub(1).map(|p| self.hops[p])
    }

    /// A copy of this path with `addr` appended, `None` if already full.
    pub fn with_appended(&self, addr: Address) -> Option<Path> {
        if self.is_full() {
            return None;
        }
        let mut path = *self;
        path.hops[self.len()] = addr;
        path.len += 1;
        Some(path)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Path[")?;
        for (i, hop) in self.as_slice().iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", hop)?;
        }
        f.write_str("]")
    }
}

/// Fixed 32-byte user payload, zero padded on the air.
///
/// Application text is built with [`Payload::new`], which refuses embedded
/// zero bytes because the receiver treats the first zero as the end of the
/// message. Control payloads (registration, configuration) are binary and
/// are built by their own constructors.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Payload {
    bytes: [u8; MAX_PAYLOAD_LEN],
}

impl Payload {
    /// All-zero payload.
    pub const EMPTY: Payload = Payload {
        bytes: [0u8; MAX_PAYLOAD_LEN],
    };

    /// Wrap application bytes.
    pub fn new(data: &[u8]) -> Result<Self, Error> {
        if data.len() > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLong);
        }
        if data.contains(&0) {
            return Err(Error::PayloadContainsZero);
        }
        let mut bytes = [0u8; MAX_PAYLOAD_LEN];
        bytes[..data.len()].copy_from_slice(data);
        Ok(Payload { bytes })
    }

    /// Wrap a full raw buffer as received or as built by a control encoder.
    #[inline]
    pub const fn from_raw(bytes: [u8; MAX_PAYLOAD_LEN]) -> Self {
        Payload { bytes }
    }

    /// The message bytes, up to the first zero.
    pub fn as_bytes(&self) -> &[u8] {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_PAYLOAD_LEN);
        &self.bytes[..end]
    }

    /// The full 32-byte buffer including padding.
    #[inline]
    pub fn raw(&self) -> &[u8; MAX_PAYLOAD_LEN] {
        &self.bytes
    }

    /// Leading byte, which selects control-message handling.
    #[inline]
    pub fn tag(&self) -> u8 {
        self.bytes[0]
    }

    pub fn is_empty(&self) -> bool {
        self.bytes[0] == 0
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.as_bytes();
        match core::str::from_utf8(text) {
            Ok(s) if text.iter().all(|b| b.is_ascii_graphic() || *b == b' ') => {
                write!(f, "Payload({:?})", s)
            }
            _ => write!(f, "Payload({:02x?})", text),
        }
    }
}

/// Frame and user-message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MessageType {
    Registration = 1,
    UserData = 2,
    RouteRequest = 4,
    RouteReply = 8,
    RouteError = 16,
    SendTo = 32,
    Ack = 64,
}

impl MessageType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(MessageType::Registration),
            2 => Some(MessageType::UserData),
            4 => Some(MessageType::RouteRequest),
            8 => Some(MessageType::RouteReply),
            16 => Some(MessageType::RouteError),
            32 => Some(MessageType::SendTo),
            64 => Some(MessageType::Ack),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Closed set of status codes reported to the application.
///
/// Positive codes are outcomes, negative codes are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Delivered,
    Received,
    Timeout,
    ChecksumError,
    RouteReturned,
    MessageReachedDestination,
    AckReceived,
    RegistrationDone,
    RoutingTableFull,
    DropTableFull,
    PendingRequestTableFull,
    MessageQueueFull,
    DirectoryFull,
    NoMessage,
    NotForMe,
    DropByFilter,
    DuplicateRequest,
    DropByRouting,
    CannotSendToSelf,
    CannotRouteToSelf,
}

impl Status {
    /// Numeric code as used by existing deployments.
    pub const fn code(self) -> i8 {
        match self {
            Status::Ok => 1,
            Status::Delivered => 2,
            Status::Received => 4,
            Status::Timeout => 8,
            Status::ChecksumError => 16,
            Status::RouteReturned => 32,
            Status::MessageReachedDestination => 40,
            Status::AckReceived => 41,
            Status::RegistrationDone => 42,
            Status::RoutingTableFull => -50,
            Status::DropTableFull => -51,
            Status::PendingRequestTableFull => -52,
            Status::MessageQueueFull => -53,
            Status::DirectoryFull => -54,
            Status::NoMessage => -70,
            Status::NotForMe => -71,
            Status::DropByFilter => -72,
            Status::DuplicateRequest => -73,
            Status::DropByRouting => -74,
            Status::CannotSendToSelf => -100,
            Status::CannotRouteToSelf => -101,
        }
    }

    pub fn from_code(code: i8) -> Option<Self> {
        const ALL: [Status; 21] = [
            Status::Ok,
            Status::Delivered,
            Status::Received,
            Status::Timeout,
            Status::ChecksumError,
            Status::RouteReturned,
            Status::MessageReachedDestination,
            Status::AckReceived,
            Status::RegistrationDone,
            Status::RoutingTableFull,
            Status::DropTableFull,
            Status::PendingRequestTableFull,
            Status::MessageQueueFull,
            Status::DirectoryFull,
            Status::NoMessage,
            Status::NotForMe,
            Status::DropByFilter,
            Status::DuplicateRequest,
            Status::DropByRouting,
            Status::CannotSendToSelf,
            Status::CannotRouteToSelf,
        ];
        ALL.into_iter().find(|s| s.code() == code)
    }

    pub const fn is_success(self) -> bool {
        self.code() > 0
    }

    /// Human-readable description, for diagnostics only.
    pub const fn description(self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Delivered => "message delivered",
            Status::Received => "message received",
            Status::Timeout => "message timed out",
            Status::ChecksumError => "checksum error",
            Status::RouteReturned => "route returned",
            Status::MessageReachedDestination => "message reached destination",
            Status::AckReceived => "ack received",
            Status::RegistrationDone => "registration done",
            Status::RoutingTableFull => "routing table full",
            Status::DropTableFull => "drop table full",
            Status::PendingRequestTableFull => "pending request table full",
            Status::MessageQueueFull => "message queue full",
            Status::DirectoryFull => "network directory full",
            Status::NoMessage => "no message",
            Status::NotForMe => "message not for this node",
            Status::DropByFilter => "dropped by filter rules",
            Status::DuplicateRequest => "duplicate route request",
            Status::DropByRouting => "dropped by routing",
            Status::CannotSendToSelf => "cannot send to self",
            Status::CannotRouteToSelf => "cannot route to self",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Error type for node operations and frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Frame checksum did not verify.
    ChecksumMismatch,
    /// No free routing slot.
    RoutingTableFull,
    /// No free blocklist slot.
    DropTableFull,
    /// No free pending-request slot.
    PendingRequestTableFull,
    /// No free pending-message slot.
    MessageQueueFull,
    /// No free directory slot.
    DirectoryFull,
    /// Empty, oversize or malformed frame.
    NoMessage,
    /// Frame addressed to another node.
    NotForMe,
    /// Route request already seen.
    DuplicateRequest,
    /// Route request already passed through this node.
    RoutingLoop,
    /// Frame cannot be forwarded from here.
    DropByRouting,
    /// Frame source is blocklisted.
    DropByFilter,
    CannotSendToSelf,
    CannotRouteToSelf,
    /// Destination is not a unicast address.
    InvalidAddress,
    /// Path does not lead from this node to the destination.
    InvalidPath,
    PayloadTooLong,
    PayloadContainsZero,
}

impl Error {
    /// The status code this error is reported as.
    pub const fn status(self) -> Status {
        match self {
            Error::ChecksumMismatch => Status::ChecksumError,
            Error::RoutingTableFull => Status::RoutingTableFull,
            Error::DropTableFull => Status::DropTableFull,
            Error::PendingRequestTableFull => Status::PendingRequestTableFull,
            Error::MessageQueueFull => Status::MessageQueueFull,
            Error::DirectoryFull => Status::DirectoryFull,
            Error::NoMessage | Error::PayloadTooLong | Error::PayloadContainsZero => {
                Status::NoMessage
            }
            Error::NotForMe => Status::NotForMe,
            Error::DuplicateRequest | Error::RoutingLoop => Status::DuplicateRequest,
            Error::DropByRouting | Error::InvalidAddress | Error::InvalidPath => {
                Status::DropByRouting
            }
            Error::DropByFilter => Status::DropByFilter,
            Error::CannotSendToSelf => Status::CannotSendToSelf,
            Error::CannotRouteToSelf => Status::CannotRouteToSelf,
        }
    }

    /// Capacity errors are transient: retrying later may succeed.
    pub const fn is_capacity(self) -> bool {
        matches!(
            self,
            Error::RoutingTableFull
                | Error::DropTableFull
                | Error::PendingRequestTableFull
                | Error::MessageQueueFull
                | Error::DirectoryFull
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ChecksumMismatch => write!(f, "checksum mismatch"),
            Error::RoutingTableFull => write!(f, "routing table full"),
            Error::DropTableFull => write!(f, "drop table full"),
            Error::PendingRequestTableFull => write!(f, "pending request table full"),
            Error::MessageQueueFull => write!(f, "message queue full"),
            Error::DirectoryFull => write!(f, "network directory full"),
            Error::NoMessage => write!(f, "no valid message"),
            Error::NotForMe => write!(f, "message not for this node"),
            Error::DuplicateRequest => write!(f, "duplicate route request"),
            Error::RoutingLoop => write!(f, "route request loops through this node"),
            Error::DropByRouting => write!(f, "no next hop"),
            Error::DropByFilter => write!(f, "source blocked by filter"),
            Error::CannotSendToSelf => write!(f, "cannot send to self"),
            Error::CannotRouteToSelf => write!(f, "cannot route to self"),
            Error::InvalidAddress => write!(f, "invalid destination address"),
            Error::InvalidPath => write!(f, "invalid path"),
            Error::PayloadTooLong => write!(f, "payload too long"),
            Error::PayloadContainsZero => write!(f, "payload contains a zero byte"),
        }
    }
}

/// Successful outcome of processing one received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// A route this node asked for came back and was installed.
    RouteReturned,
    /// A data message addressed to this node was accepted and acked.
    MessageReachedDestination,
    /// An ack for one of our messages arrived.
    AckReceived,
    /// The frame was passed on toward its destination.
    Relayed,
    /// This node answered a route request for itself.
    Replied,
    /// Valid frame with nothing to do.
    Ignored,
}

impl Handled {
    pub const fn status(self) -> Status {
        match self {
            Handled::RouteReturned => Status::RouteReturned,
            Handled::MessageReachedDestination => Status::MessageReachedDestination,
            Handled::AckReceived => Status::AckReceived,
            Handled::Relayed | Handled::Replied | Handled::Ignored => Status::Ok,
        }
    }
}

/// Data attached to an [`InboundResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultBody {
    Empty,
    /// Received message, or the undelivered message on timeout.
    Payload(Payload),
    /// Discovered route.
    Path(Path),
}

/// Completed or failed operation, queued for the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundResult {
    /// Message or request id the result refers to.
    pub message_id: u8,
    pub status: Status,
    /// Remote side: sender for received messages, destination otherwise.
    pub peer: Address,
    pub body: ResultBody,
}

impl InboundResult {
    pub fn new(message_id: u8, status: Status, peer: Address, body: ResultBody) -> Self {
        Self {
            message_id,
            status,
            peer,
            body,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.body {
            ResultBody::Payload(p) => Some(p),
            _ => None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.body {
            ResultBody::Path(p) => Some(p),
            _ => None,
        }
    }
}

/// Counters kept by every node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    /// Frames accepted by the transport queue.
    pub frames_sent: u32,
    /// Frames the transport queue refused or that exceeded the MTU.
    pub frames_dropped: u32,
    /// Frames handed to the engine.
    pub frames_received: u32,
    /// Frames rejected for any reason, checksum failures included.
    pub frames_rejected: u32,
    pub checksum_errors: u32,
    /// Retransmissions of pending messages.
    pub retries: u32,
    pub timeouts: u32,
    /// Results lost because the result queue was full.
    pub results_dropped: u32,
}
