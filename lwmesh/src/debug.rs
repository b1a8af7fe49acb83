//! Debug events for protocol tracing.
//!
//! With the `debug` feature the node pushes these onto a bounded channel
//! that a simulator or test harness drains. Without it, `emit_debug!`
//! still type-checks the event but never builds it.

use embassy_sync::channel::Channel;

use crate::time::Timestamp;
use crate::traits::ChannelMutex;
use crate::types::{Address, Error, MessageType, Path};

/// Queue size for the debug event channel. Events beyond it are dropped.
pub const DEBUG_QUEUE_SIZE: usize = 64;

pub type DebugChannel = Channel<ChannelMutex, DebugEvent, DEBUG_QUEUE_SIZE>;

/// Debug events emitted by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugEvent {
    /// A frame passed the checksum and was decoded.
    FrameReceived {
        timestamp: Timestamp,
        kind: MessageType,
        from: Address,
        rssi: Option<i16>,
    },
    /// A frame was refused before or during dispatch.
    FrameRejected { timestamp: Timestamp, reason: Error },
    /// This node flooded a request of its own.
    DiscoveryStarted {
        timestamp: Timestamp,
        target: Address,
        request_id: u8,
    },
    /// A foreign request was re-broadcast.
    RequestRelayed {
        origin: Address,
        target: Address,
        unique_id: u8,
        hops: u8,
    },
    /// This node answered a request aimed at it.
    ReplySent {
        origin: Address,
        next_hop: Address,
        path: Path,
    },
    /// A reply or ack was passed one hop back.
    Forwarded {
        kind: MessageType,
        origin: Address,
        next_hop: Address,
    },
    RouteInstalled { destination: Address, path: Path },
    /// A data frame went out, first attempt or retry.
    MessageSent {
        message_id: u8,
        destination: Address,
        /// `BROADCAST` when no path was known.
        next_hop: Address,
        attempt: u8,
    },
    MessageTimedOut {
        timestamp: Timestamp,
        message_id: u8,
        destination: Address,
    },
    /// The periodic reset freed dynamic routes.
    RoutesReset { timestamp: Timestamp, freed: usize },
    /// A frame was parked for the next tick.
    FrameDeferred { kind: MessageType },
    /// The transport refused a frame or it exceeded the MTU.
    TransmitDropped { kind: MessageType, len: usize },
}

/// Emit a debug event from inside a `Node` method.
///
/// `emit_debug!(self, DebugEvent::...)`. Dead code without the `debug`
/// feature.
#[cfg(feature = "debug")]
macro_rules! emit_debug {
    ($node:expr, $event:expr) => {
        $node.emit_debug_event($event)
    };
}

#[cfg(not(feature = "debug"))]
macro_rules! emit_debug {
    ($node:expr, $event:expr) => {
        if false {
            let _ = &$node;
            let _ = $event;
        }
    };
}
