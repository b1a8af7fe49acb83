#![forbid(unsafe_code)]
//! lwmesh - multi-hop mesh routing for LoRa and peer-to-peer WiFi links
//!
//! A small-footprint engine that finds routes across a radio mesh on demand
//! and delivers application messages along them with end-to-end acks.
//!
//! This crate is `no_std` but **requires the `alloc` crate**. Every table is a
//! fixed array of slots sized at construction from a [`NodeConfig`]; nothing
//! grows afterwards.
//!
//! # Key Properties
//!
//! - Single-byte addresses, `0xFF` broadcast, `0x00` unset
//! - AODV-style discovery: requests flood, each relay appends itself, the
//!   target answers along the accumulated path
//! - Full source routes (up to 8 hops) carried in every data frame
//! - Stop-and-wait delivery: retransmit every retry interval, one `Timeout`
//!   result when attempts run out
//! - Routes are soft state, wiped on a coarse timer; Static routes survive
//! - A master node keeps a directory of registered nodes, refreshed by
//!   keepalives
//!
//! # Example (basic usage)
//!
//! ```
//! use lwmesh::{Address, Node, Settings, DefaultConfig};
//! use lwmesh::traits::test_impls::{MockTransport, MockRandom, MockClock};
//!
//! let settings = Settings::new(Address(b'A'));
//! let mut node = Node::<_, _, _, DefaultConfig>::new(
//!     settings,
//!     MockTransport::new(),
//!     MockRandom::new(),
//!     MockClock::new(),
//! );
//!
//! // No route yet: the message is broadcast and discovery is armed.
//! let id = node.send_msg(Address(b'D'), b"hello", None).unwrap();
//! assert_eq!(node.pending_messages().count(), 1);
//!
//! // The next tick floods a route request for D.
//! node.tick();
//! assert!(node.poll().is_none());
//! # let _ = id;
//! ```
//!
//! # Example (integration pattern)
//!
//! ```text
//! use lwmesh::{Node, Settings, Transport, Random, Clock};
//!
//! // Implement Transport, Random and Clock for your platform...
//!
//! // let mut node = Node::new(settings, transport, random, clock);
//!
//! // A radio TX task drains node.transport().outgoing().receive().await
//! // and the RX path pushes frames into node.transport().incoming().
//!
//! // spawn(async move {
//! //     node.run().await;
//! // });
//!
//! // let result = node.results().receive().await;
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Addresses, paths, payloads, status codes and errors
//! - [`wire`] - Frame layout, checksum and serialization
//! - [`traits`] - Transport, Random and Clock traits
//! - [`node`] - Main Node struct, frame intake and public API
//! - [`discovery`] - Route requests and replies
//! - [`delivery`] - Acknowledged message delivery
//! - [`maintenance`] - Periodic tick: retries, keepalive, route reset
//! - [`routing`] - Routing table
//! - [`directory`] - Registered-node directory kept by the master
//! - [`filter`] - Source and broadcast blocklists
//! - [`settings`] - Node settings and over-the-air updates
//! - [`table`] - Fixed-capacity slot table
//! - [`time`] - Timestamp and Duration types
//! - [`config`] - Compile-time table capacities

#![no_std]

// Prevent test/debug features from being used in release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It includes mock transport, clock and random implementations."
);

#[cfg(all(feature = "debug", not(test), not(debug_assertions)))]
compile_error!(
    "The `debug` feature must not be enabled in release builds. \
     It adds protocol tracing overhead intended only for development and simulation."
);

extern crate alloc;

pub mod config;
#[macro_use]
pub mod debug;
pub mod delivery;
pub mod directory;
pub mod discovery;
pub mod filter;
pub mod maintenance;
pub mod node;
pub mod routing;
pub mod settings;
pub mod table;
pub mod time;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use config::{DefaultConfig, NodeConfig, SmallConfig};
pub use debug::DebugEvent;
pub use delivery::PendingMessage;
pub use directory::{Directory, DirectoryEntry, LinkId, Registration};
pub use node::Node;
pub use routing::{RouteKind, RouteState, RoutingTable};
pub use settings::{ConfigUpdate, NodeRole, Protocol, Settings};
pub use time::{Duration, Timestamp};
pub use traits::{Clock, Priority, PriorityQueue, Random, Received, Transmission, Transport};
pub use types::{
    Address, Error, Handled, InboundResult, MessageType, Metrics, Path, Payload, ResultBody,
    Status,
};
pub use wire::{Decode, DecodeError, Encode, Frame, FrameBuf};

// Re-export constants
pub use types::{
    MAX_PACKET_SIZE, MAX_PATH_LEN, MAX_PAYLOAD_LEN, RESULT_QUEUE_SIZE, TAG_CONFIGURATION,
    TAG_REGISTRATION,
};
