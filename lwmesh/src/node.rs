//! Node implementation - the mesh engine's context object.
//!
//! A `Node` owns every table (routes, pending requests, pending messages,
//! directory, blocklist) and its injected collaborators. All mutation happens
//! inside two entry points, frame processing and `tick`, each running to
//! completion before the next begins. Inbound frames reach the node through
//! the transport's single-consumer `incoming()` channel, so a push-style
//! receive path never touches the tables directly.
//!
//! # Usage
//!
//! ```ignore
//! let mut node = Node::<_, _, _, DefaultConfig>::new(settings, transport, random, clock);
//!
//! // Either drive it from an async task...
//! spawn(async move { node.run().await });
//!
//! // ...or poll it cooperatively.
//! loop {
//!     node.process_incoming();
//!     node.tick();
//!     while let Some(result) = node.poll() {
//!         handle(result);
//!     }
//! }
//! ```

use core::marker::PhantomData;

use embassy_sync::channel::Channel;
use log::{info, trace, warn};

use crate::config::{DefaultConfig, NodeConfig};
use crate::delivery::PendingMessage;
use crate::directory::{Directory, LinkId};
use crate::discovery::PendingRequest;
use crate::filter::Blocklist;
use crate::routing::{RouteKind, RoutingTable};
use crate::settings::{Protocol, Settings};
use crate::table::SlotTable;
use crate::time::{Duration, Timestamp};
use crate::traits::{ChannelMutex, Clock, Priority, Random, Received, Transmission, Transport};
use crate::types::{
    Address, Error, Handled, InboundResult, MessageType, Metrics, Path, ResultBody, Status,
    MAX_TX_JITTER_MS, RESULT_QUEUE_SIZE,
};
use crate::wire::{check_shape, verify_checksum, Decode, Frame, MESSAGE_ID_OFFSET};

#[cfg(feature = "debug")]
use crate::debug::DebugChannel;
use crate::debug::DebugEvent;

/// Queue of results waiting for the application.
pub type ResultChannel = Channel<ChannelMutex, InboundResult, RESULT_QUEUE_SIZE>;

/// The mesh engine.
///
/// Generic over:
/// - `T`: Transport implementation
/// - `R`: Random number generator
/// - `Clk`: Clock/timer implementation
/// - `Cfg`: table capacities
pub struct Node<T, R, Clk, Cfg = DefaultConfig> {
    // Dependencies (injected)
    pub(crate) transport: T,
    pub(crate) random: R,
    pub(crate) clock: Clk,

    pub(crate) settings: Settings,

    // Tables
    pub(crate) routes: RoutingTable,
    pub(crate) pending_requests: SlotTable<PendingRequest>,
    pub(crate) outbox: SlotTable<PendingMessage>,
    pub(crate) directory: Directory,
    pub(crate) blocklist: Blocklist,

    pub(crate) results: ResultChannel,

    // Counters and schedule
    pub(crate) next_message_id: u8,
    pub(crate) next_request_id: u8,
    pub(crate) last_keepalive: Timestamp,
    pub(crate) last_reset: Timestamp,
    pub(crate) metrics: Metrics,

    #[cfg(feature = "debug")]
    debug_events: DebugChannel,

    _config: PhantomData<Cfg>,
}

impl<T, R, Clk, Cfg> Node<T, R, Clk, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Create a node and apply `settings`.
    ///
    /// A non-empty `path_to_master` becomes a Static route and both
    /// blocklists are loaded.
    pub fn new(settings: Settings, transport: T, random: R, clock: Clk) -> Self {
        let now = clock.now();
        let mut node = Self {
            transport,
            random,
            clock,
            settings,
            routes: RoutingTable::new(Cfg::MAX_ROUTES),
            pending_requests: SlotTable::with_capacity(Cfg::MAX_PENDING_REQUESTS),
            outbox: SlotTable::with_capacity(Cfg::MAX_PENDING_MESSAGES),
            directory: Directory::new(Cfg::MAX_DIRECTORY_NODES),
            blocklist: Blocklist::new(Cfg::MAX_FILTERS),
            results: Channel::new(),
            next_message_id: 1,
            next_request_id: 1,
            last_keepalive: now,
            last_reset: now,
            metrics: Metrics::default(),
            #[cfg(feature = "debug")]
            debug_events: Channel::new(),
            _config: PhantomData,
        };
        node.apply_settings();
        node
    }

    // Accessors

    /// This node's address, `UNSET` until registered.
    pub fn address(&self) -> Address {
        self.settings.local_address
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn clock(&self) -> &Clk {
        &self.clock
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.blocklist
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Messages still waiting for their ack.
    pub fn pending_messages(&self) -> impl Iterator<Item = &PendingMessage> {
        self.outbox.iter()
    }

    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.len()
    }

    /// Result queue, for consumers that want to `receive().await`.
    pub fn results(&self) -> &ResultChannel {
        &self.results
    }

    /// Oldest queued result, if any.
    pub fn poll(&self) -> Option<InboundResult> {
        self.results.try_receive().ok()
    }

    #[cfg(feature = "debug")]
    pub fn debug_events(&self) -> &DebugChannel {
        &self.debug_events
    }

    // Configuration

    /// Replace the settings.
    ///
    /// Changing the local address drops all dynamic state first.
    pub fn set_settings(&mut self, settings: Settings) {
        if settings.local_address != self.settings.local_address {
            self.clear_dynamic_state(settings.local_address);
        }
        if settings.master != self.settings.master {
            self.forget_master_route(self.settings.master);
        }
        self.settings = settings;
        self.apply_settings();
    }

    fn apply_settings(&mut self) {
        if !self.settings.path_to_master.is_empty() {
            let (master, path) = (self.settings.master, self.settings.path_to_master);
            if let Err(e) = self.add_static_route(master, path) {
                warn!("path to master {:?} not installed: {}", path, e);
            }
        }

        self.blocklist.clear();
        let sources = self.settings.blocked_sources;
        for source in sources.into_iter().filter(|a| a.is_unicast()) {
            if let Err(e) = self.blocklist.drop_source_node(source) {
                warn!("cannot block {}: {}", source, e);
            }
        }
        let broadcasters = self.settings.blocked_broadcast;
        for source in broadcasters.into_iter().filter(|a| a.is_unicast()) {
            if let Err(e) = self.blocklist.drop_broadcast_node(source, Address::BROADCAST) {
                warn!("cannot block broadcasts of {}: {}", source, e);
            }
        }
    }

    /// Drop everything tied to the old address before taking `address`.
    fn clear_dynamic_state(&mut self, address: Address) {
        self.routes.reset_all();
        self.routes.drop_foreign(address);
        self.pending_requests.clear();
        self.outbox.clear();
    }

    /// Remove the Static route to a master that is no longer ours.
    pub(crate) fn forget_master_route(&mut self, old_master: Address) {
        let pinned = self
            .routes
            .entry(old_master)
            .is_some_and(|e| e.kind == RouteKind::Static);
        if pinned {
            self.routes.remove(old_master);
            info!("{}: static route to old master {} removed", self.address(), old_master);
        }
    }

    /// Install a Static route.
    ///
    /// `path` must run from this node to `dest`.
    pub fn add_static_route(&mut self, dest: Address, path: Path) -> Result<(), Error> {
        let local = self.address();
        if dest == local {
            return Err(Error::CannotRouteToSelf);
        }
        if !dest.is_unicast() {
            return Err(Error::InvalidAddress);
        }
        Self::check_path(&path, local, dest)?;
        let now = self.clock.now();
        self.routes.install(dest, path, RouteKind::Static, now)?;
        Ok(())
    }

    /// A path usable from `local` to `dest`: at least one hop, starting here.
    pub(crate) fn check_path(path: &Path, local: Address, dest: Address) -> Result<(), Error> {
        if path.len() < 2 || path.first() != Some(local) || path.last() != Some(dest) {
            return Err(Error::InvalidPath);
        }
        Ok(())
    }

    /// Block every frame transmitted by `source`.
    pub fn drop_source_node(&mut self, source: Address) -> Result<(), Error> {
        self.blocklist.drop_source_node(source)
    }

    /// Block frames from `source` addressed to `destination`.
    pub fn drop_broadcast_node(
        &mut self,
        source: Address,
        destination: Address,
    ) -> Result<(), Error> {
        self.blocklist.drop_broadcast_node(source, destination)
    }

    /// Take `address` as this node's identity and announce it to the master.
    ///
    /// A changed address drops dynamic routes, Static routes that start at
    /// the old address, pending requests and pending messages. The master records itself in its own directory;
    /// other nodes send a registration when a route to the master is known
    /// and flood a route request for it otherwise.
    pub fn register_local_node(&mut self, address: Address, link_id: LinkId) -> Result<(), Error> {
        if !address.is_unicast() {
            return Err(Error::InvalidAddress);
        }
        if address != self.settings.local_address {
            self.clear_dynamic_state(address);
            info!("node address now {}", address);
        }
        self.settings.local_address = address;
        self.settings.link_id = link_id;

        let now = self.clock.now();
        self.last_keepalive = now;
        self.announce(now)
    }

    // Frame processing

    /// Process one raw frame.
    pub fn process_frame(&mut self, data: &[u8]) -> Result<Handled, Error> {
        self.handle_rx(data, None)
    }

    /// Process one frame taken from the transport.
    pub fn process_received(&mut self, rx: &Received) -> Result<Handled, Error> {
        self.handle_rx(rx.data.as_slice(), rx.rssi)
    }

    /// Drain the transport's inbound channel. Returns how many frames were
    /// processed.
    pub fn process_incoming(&mut self) -> usize {
        let mut processed = 0;
        loop {
            let Ok(rx) = self.transport.incoming().try_receive() else {
                break;
            };
            if let Err(e) = self.process_received(&rx) {
                trace!("{}: inbound frame dropped: {}", self.address(), e);
            }
            processed += 1;
        }
        processed
    }

    fn handle_rx(&mut self, data: &[u8], rssi: Option<i16>) -> Result<Handled, Error> {
        self.metrics.frames_received = self.metrics.frames_received.saturating_add(1);
        let now = self.clock.now();
        let result = self.admit(data, rssi, now);
        match result {
            Ok(handled) => trace!("{}: frame handled: {:?}", self.address(), handled),
            Err(e) => {
                self.metrics.frames_rejected = self.metrics.frames_rejected.saturating_add(1);
                trace!("{}: frame rejected: {}", self.address(), e);
                emit_debug!(
                    self,
                    DebugEvent::FrameRejected {
                        timestamp: now,
                        reason: e,
                    }
                );
            }
        }
        result
    }

    /// Shape, checksum, decode, addressing, blocklist, then dispatch.
    fn admit(&mut self, data: &[u8], rssi: Option<i16>, now: Timestamp) -> Result<Handled, Error> {
        check_shape(data).map_err(|_| Error::NoMessage)?;

        if !verify_checksum(data) {
            self.metrics.checksum_errors = self.metrics.checksum_errors.saturating_add(1);
            let message_id = data[MESSAGE_ID_OFFSET];
            let source = Address(data[2]);
            warn!("checksum mismatch on frame {} from {}", message_id, source);
            self.push_result(InboundResult::new(
                message_id,
                Status::ChecksumError,
                source,
                ResultBody::Empty,
            ));
            return Err(Error::ChecksumMismatch);
        }

        let frame = Frame::decode_from_slice(data).map_err(|_| Error::NoMessage)?;
        let header = *frame.header();

        let local = self.address();
        if local.is_unset() || (header.destination != local && !header.destination.is_broadcast())
        {
            return Err(Error::NotForMe);
        }
        if self.blocklist.blocks(header.source, header.destination) {
            return Err(Error::DropByFilter);
        }

        emit_debug!(
            self,
            DebugEvent::FrameReceived {
                timestamp: now,
                kind: header.kind,
                from: header.source,
                rssi,
            }
        );

        match frame {
            Frame::Route(f) => match f.header.kind {
                MessageType::RouteRequest => self.handle_route_request(&f, now),
                MessageType::RouteReply => self.handle_route_reply(&f, now),
                MessageType::Ack => self.handle_ack(&f, now),
                _ => Ok(Handled::Ignored),
            },
            Frame::SendTo(f) => self.handle_send_to(&f, rssi, now),
        }
    }

    // Timers

    /// Run one maintenance cycle at the clock's current time.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        self.handle_tick(now);
    }

    /// Run the node forever.
    ///
    /// Waits for either an inbound frame or the next maintenance deadline.
    /// Call this from an async task/executor.
    pub async fn run(&mut self) -> ! {
        use embassy_futures::select::{select, Either};

        loop {
            let wake = self.next_deadline(self.clock.now());

            let result = select(
                self.transport.incoming().receive(),
                self.clock.sleep_until(wake),
            )
            .await;

            match result {
                Either::First(rx) => {
                    if let Err(e) = self.process_received(&rx) {
                        trace!("{}: inbound frame dropped: {}", self.address(), e);
                    }
                }
                Either::Second(()) => self.tick(),
            }
        }
    }

    // Output

    /// Seal `frame` and queue it on the transport.
    ///
    /// Returns false if the frame was dropped (over MTU or queue full).
    pub(crate) fn transmit(&mut self, frame: &Frame) -> bool {
        let buf = frame.to_wire();
        let kind = frame.kind();

        if buf.len() > self.transport.mtu() {
            self.metrics.frames_dropped = self.metrics.frames_dropped.saturating_add(1);
            warn!("{:?} frame of {} bytes exceeds MTU", kind, buf.len());
            emit_debug!(self, DebugEvent::TransmitDropped { kind, len: buf.len() });
            return false;
        }

        let jitter = match self.settings.protocol {
            Protocol::Wifi => Duration::from_millis(self.random.gen_range(1, MAX_TX_JITTER_MS + 1)),
            Protocol::LoRa => Duration::ZERO,
        };
        let tx = Transmission { frame: buf, jitter };

        if self.transport.outgoing().try_send(priority_for(kind), tx) {
            self.metrics.frames_sent = self.metrics.frames_sent.saturating_add(1);
            trace!(
                "{}: sent {:?} to {}",
                self.address(),
                kind,
                frame.header().destination
            );
            true
        } else {
            self.metrics.frames_dropped = self.metrics.frames_dropped.saturating_add(1);
            warn!("transport queue full, {:?} frame dropped", kind);
            emit_debug!(self, DebugEvent::TransmitDropped { kind, len: buf.len() });
            false
        }
    }

    /// Queue a result for the application. Dropped and counted when full.
    pub(crate) fn push_result(&mut self, result: InboundResult) {
        if self.results.try_send(result).is_err() {
            self.metrics.results_dropped = self.metrics.results_dropped.saturating_add(1);
            warn!("result queue full, {:?} dropped", result.status);
        }
    }

    #[cfg(feature = "debug")]
    pub(crate) fn emit_debug_event(&self, event: DebugEvent) {
        let _ = self.debug_events.try_send(event);
    }
}

/// Transmit order: control before discovery before data.
pub(crate) fn priority_for(kind: MessageType) -> Priority {
    match kind {
        MessageType::RouteRequest => Priority::Discovery,
        MessageType::SendTo | MessageType::Registration | MessageType::UserData => {
            Priority::Data
        }
        MessageType::RouteReply | MessageType::RouteError | MessageType::Ack => Priority::Control,
    }
}


#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::testing::*;
    use super::*;
    use crate::settings::NodeRole;
    use crate::traits::test_impls::{MockClock, MockRandom, MockTransport};
    use crate::types::{Payload, MAX_BLOCKED_NODES};
    use crate::wire::{encode_checksum, FrameBuf, CHECKSUM_OFFSET};

    #[test]
    fn test_new_node_applies_settings() {
        let mut blocked = [Address::UNSET; MAX_BLOCKED_NODES];
        blocked[0] = a(b'X');
        let mut settings = settings(b'A').with_path_to_master(path(b"ABD"));
        settings.blocked_sources = blocked;
        settings.blocked_broadcast[3] = a(b'Y');

        let node = make_node_with(settings);
        assert_eq!(node.address(), a(b'A'));
        assert_eq!(node.routes().lookup(a(b'D')), Some(&path(b"ABD")));
        assert_eq!(
            node.routes().entry(a(b'D')).unwrap().kind,
            RouteKind::Static
        );
        assert!(node.blocklist().blocks(a(b'X'), a(b'A')));
        assert!(node.blocklist().blocks(a(b'Y'), Address::BROADCAST));
        assert!(!node.blocklist().blocks(a(b'Y'), a(b'A')));
    }

    #[test]
    fn test_bad_path_to_master_is_skipped() {
        let node = make_node_with(settings(b'A').with_path_to_master(path(b"BD")));
        assert!(node.routes().is_empty());
    }

    #[test]
    fn test_add_static_route_validates() {
        let mut node = make_node(b'A');
        assert_eq!(
            node.add_static_route(a(b'A'), path(b"AA")),
            Err(Error::CannotRouteToSelf)
        );
        assert_eq!(
            node.add_static_route(Address::BROADCAST, path(b"AB")),
            Err(Error::InvalidAddress)
        );
        assert_eq!(
            node.add_static_route(a(b'C'), path(b"ABD")),
            Err(Error::InvalidPath)
        );
        assert_eq!(node.add_static_route(a(b'C'), path(b"ABC")), Ok(()));
    }

    #[test]
    fn test_static_routes_fill_table() {
        let mut node: Node<MockTransport, MockRandom, MockClock, crate::SmallConfig> = Node::new(
            settings(b'A'),
            MockTransport::new(),
            MockRandom::new(),
            MockClock::new(),
        );
        for dest in b'B'..b'F' {
            node.add_static_route(a(dest), path(&[b'A', dest])).unwrap();
        }
        assert_eq!(
            node.add_static_route(a(b'F'), path(b"AF")),
            Err(Error::RoutingTableFull)
        );
        for dest in b'B'..b'F' {
            assert_eq!(node.routes().lookup(a(dest)), Some(&path(&[b'A', dest])));
        }
    }

    #[test]
    fn test_checksum_error_yields_result() {
        let mut node = make_node(b'B');
        let mut frame = request(b'A', b'A', b'C', 7, b"A");
        let bytes = frame.as_mut_slice();
        bytes[CHECKSUM_OFFSET] ^= 0x01;

        assert_eq!(
            node.process_frame(frame.as_slice()),
            Err(Error::ChecksumMismatch)
        );
        assert_eq!(node.metrics().checksum_errors, 1);
        assert_eq!(node.pending_request_count(), 0, "No state may change");
        let result = node.poll().unwrap();
        assert_eq!(result.status, Status::ChecksumError);
        assert_eq!(result.message_id, 7);
        assert!(node.transport().take_sent().is_empty());
    }

    #[test]
    fn test_malformed_frames_rejected() {
        let mut node = make_node(b'B');
        assert_eq!(node.process_frame(&[]), Err(Error::NoMessage));
        assert_eq!(node.process_frame(&[0x04, 18, b'A']), Err(Error::NoMessage));

        // Declared length disagrees with the type.
        let good = request(b'A', b'A', b'C', 1, b"A");
        let mut bytes = FrameBuf::from_slice(good.as_slice()).unwrap();
        bytes.as_mut_slice()[1] = 50;
        encode_checksum(bytes.as_mut_slice());
        assert_eq!(node.process_frame(bytes.as_slice()), Err(Error::NoMessage));

        assert_eq!(node.metrics().frames_rejected, 3);
        assert_eq!(node.metrics().checksum_errors, 0);
    }

    #[test]
    fn test_frame_for_other_node() {
        let mut node = make_node(b'B');
        let frame = ack(b'C', b'Z', b'A', b'C', 1, b"AC");
        assert_eq!(node.process_frame(frame.as_slice()), Err(Error::NotForMe));
    }

    #[test]
    fn test_blocklisted_source_dropped() {
        let mut node = make_node(b'B');
        node.drop_source_node(a(b'A')).unwrap();
        let frame = request(b'A', b'A', b'C', 1, b"A");
        assert_eq!(node.process_frame(frame.as_slice()), Err(Error::DropByFilter));
        assert_eq!(node.pending_request_count(), 0);
    }

    #[test]
    fn test_broadcast_block_keeps_unicast() {
        let mut node = make_node(b'B');
        node.drop_broadcast_node(a(b'C'), Address::BROADCAST).unwrap();
        let flood = request(b'C', b'C', b'E', 1, b"C");
        assert_eq!(node.process_frame(flood.as_slice()), Err(Error::DropByFilter));

        let msg = send_to(b'C', a(b'B'), b'C', b'B', 2, b"CB", Payload::new(b"x").unwrap());
        assert_eq!(
            node.process_frame(msg.as_slice()),
            Ok(Handled::MessageReachedDestination)
        );
    }

    #[test]
    fn test_unregistered_node_accepts_nothing() {
        let mut node = make_node_with(Settings::default());
        let frame = request(b'A', b'A', b'C', 1, b"A");
        assert_eq!(node.process_frame(frame.as_slice()), Err(Error::NotForMe));
    }

    #[test]
    fn test_process_incoming_drains_channel() {
        let mut node = make_node(b'B');
        node.transport()
            .inject_rx(request(b'A', b'A', b'C', 1, b"A").as_slice(), Some(-60));
        node.transport()
            .inject_rx(request(b'A', b'A', b'C', 1, b"A").as_slice(), Some(-60));
        assert_eq!(node.process_incoming(), 2);
        assert_eq!(node.metrics().frames_received, 2);
        assert_eq!(node.metrics().frames_rejected, 1, "Second copy is a duplicate");
        assert_eq!(node.process_incoming(), 0);

        // A rejected frame does not stop the drain.
        node.transport().inject_rx(&[0u8; 3], None);
        node.transport()
            .inject_rx(request(b'A', b'A', b'D', 2, b"A").as_slice(), None);
        assert_eq!(node.process_incoming(), 2);
        assert_eq!(node.metrics().frames_rejected, 2);
        assert_eq!(node.transport().take_sent().len(), 2, "Both requests relayed");
    }

    #[test]
    fn test_mtu_drop_counted() {
        let mut node: TestNode = Node::new(
            settings(b'A'),
            MockTransport::with_mtu(20),
            MockRandom::new(),
            MockClock::new(),
        );
        node.add_static_route(a(b'B'), path(b"AB")).unwrap();
        node.send_msg(a(b'B'), b"hello", None).unwrap();
        assert!(node.transport().take_sent().is_empty());
        assert_eq!(node.metrics().frames_dropped, 1);

        node.get_route_request(a(b'C')).unwrap();
        assert_eq!(node.transport().take_sent().len(), 1, "Route frames fit");
    }

    #[test]
    fn test_wifi_adds_jitter() {
        let mut node = make_node_with(settings(b'A').with_protocol(Protocol::Wifi));
        for _ in 0..10 {
            node.get_route_request(a(b'C')).unwrap();
        }
        for tx in node.transport().take_transmissions() {
            let ms = tx.jitter.as_millis();
            assert!((1..=MAX_TX_JITTER_MS).contains(&ms), "jitter {} out of range", ms);
        }

        let mut lora = make_node(b'A');
        lora.get_route_request(a(b'C')).unwrap();
        assert_eq!(
            lora.transport().take_transmissions()[0].jitter,
            Duration::ZERO
        );
    }

    #[test]
    fn test_control_frames_jump_the_queue() {
        let mut node = make_node(b'C');
        node.add_static_route(a(b'E'), path(b"CE")).unwrap();
        node.send_msg(a(b'E'), b"data", None).unwrap();
        node.process_frame(request(b'B', b'A', b'D', 1, b"AB").as_slice())
            .unwrap();
        node.process_frame(request(b'B', b'A', b'C', 2, b"AB").as_slice())
            .unwrap();

        let kinds: Vec<MessageType> = sent(&node).iter().map(|f| f.kind()).collect();
        assert_eq!(
            kinds,
            [
                MessageType::RouteReply,
                MessageType::RouteRequest,
                MessageType::SendTo
            ]
        );
    }

    #[test]
    fn test_result_queue_overflow_counted() {
        let mut node = make_node(b'B');
        for id in 0..(RESULT_QUEUE_SIZE as u8 + 2) {
            let msg = send_to(b'A', a(b'B'), b'A', b'B', id, b"AB", Payload::new(b"m").unwrap());
            node.process_frame(msg.as_slice()).unwrap();
        }
        assert_eq!(node.metrics().results_dropped, 2);
        let first = node.poll().unwrap();
        assert_eq!(first.message_id, 0, "Oldest result comes first");
    }

    #[test]
    fn test_set_settings_readdress_clears_state() {
        let mut node = make_node(b'A');
        node.add_static_route(a(b'M'), path(b"AM")).unwrap();
        node.send_msg(a(b'C'), b"hi", None).unwrap();
        assert_eq!(node.pending_messages().count(), 1);

        let role_only = node.settings().clone().with_role(NodeRole::EndNode);
        node.set_settings(role_only);
        assert_eq!(node.pending_messages().count(), 1);

        node.add_static_route(a(b'N'), path(b"AN")).unwrap();
        node.set_settings(settings(b'Z').with_path_to_master(path(b"ZBD")));
        assert_eq!(node.pending_messages().count(), 0);
        assert!(node.routes().entry(a(b'C')).is_none());
        assert!(node.routes().entry(a(b'M')).is_none(), "Route from old address dropped");
        assert!(node.routes().entry(a(b'N')).is_none());
        assert_eq!(node.routes().lookup(a(b'D')), Some(&path(b"ZBD")));
    }

    #[test]
    fn test_readdressed_node_rediscovers() {
        let mut node = make_node(b'A');
        node.add_static_route(a(b'M'), path(b"AM")).unwrap();
        node.register_local_node(a(b'Z'), [0; 6]).unwrap();
        node.transport().take_sent();
        assert!(node.routes().entry(a(b'M')).is_none());

        node.send_msg(a(b'M'), b"hi", None).unwrap();
        let frames = sent(&node);
        assert_eq!(frames[0].header().destination, Address::BROADCAST);

        node.tick();
        let frames = sent(&node);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind(), MessageType::RouteRequest);
        assert_eq!(frames[0].body().origin, a(b'Z'));
        assert_eq!(frames[0].body().target, a(b'M'));
    }

    #[test]
    fn test_master_change_forgets_old_master_route() {
        let mut node = make_node_with(settings(b'A').with_path_to_master(path(b"ABD")));
        assert!(node.routes().lookup(a(b'D')).is_some());

        let moved = node
            .settings()
            .clone()
            .with_master(a(b'M'))
            .with_path_to_master(path(b"ACM"));
        node.set_settings(moved);
        assert!(node.routes().entry(a(b'D')).is_none());
        assert_eq!(node.routes().lookup(a(b'M')), Some(&path(b"ACM")));

        // A dynamic route to the old master is left alone.
        let mut node = make_node(b'A');
        node.routes.install(a(b'D'), path(b"ABD"), RouteKind::Dynamic, Timestamp::ZERO)
            .unwrap();
        node.set_settings(settings(b'A').with_master(a(b'M')));
        assert!(node.routes().lookup(a(b'D')).is_some());
    }

    #[test]
    fn test_register_master_records_itself() {
        let mut node = make_node_with(settings(b'D').with_role(NodeRole::Master));
        node.register_local_node(a(b'D'), [1, 2, 3, 4, 5, 6]).unwrap();
        let entry = node.directory().get(a(b'D')).unwrap();
        assert_eq!(entry.link_id, [1, 2, 3, 4, 5, 6]);
        assert!(node.transport().take_sent().is_empty());
    }

    #[test]
    fn test_register_without_route_floods_request() {
        let mut node = make_node_with(Settings::default());
        node.register_local_node(a(b'A'), [9; 6]).unwrap();
        assert_eq!(node.address(), a(b'A'));

        let frames = sent(&node);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind(), MessageType::RouteRequest);
        assert_eq!(frames[0].body().target, a(b'D'));
    }

    #[test]
    fn test_register_with_route_sends_registration() {
        let mut node = make_node_with(settings(b'A').with_path_to_master(path(b"ABD")));
        node.register_local_node(a(b'A'), [9; 6]).unwrap();

        let frames = sent(&node);
        assert_eq!(frames.len(), 1);
        let Frame::SendTo(f) = frames[0] else {
            panic!("expected SendTo, got {:?}", frames[0]);
        };
        assert_eq!(f.header.destination, a(b'B'));
        assert_eq!(f.body.kind, MessageType::Registration);
        assert_eq!(f.payload.raw()[..8], [0x01, b'A', 9, 9, 9, 9, 9, 9]);
    }

    #[test]
    fn test_register_rejects_broadcast() {
        let mut node = make_node(b'A');
        assert_eq!(
            node.register_local_node(Address::BROADCAST, [0; 6]),
            Err(Error::InvalidAddress)
        );
    }
}
