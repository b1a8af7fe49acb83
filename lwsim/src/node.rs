//! SimNode wrapper for simulated lwmesh nodes.

use std::cell::Cell;
use std::future::{ready, Ready};

use embassy_sync::channel::Channel;
use lwmesh::config::DefaultConfig;
use lwmesh::traits::{
    Clock, PriorityQueue, Random, Received, Transmission, Transport, TransportInChannel,
};
use lwmesh::{
    Address, DebugEvent, Duration, Error, FrameBuf, Handled, InboundResult, Node, Settings, Status,
    Timestamp,
};

/// Outgoing queue depth of a simulated radio.
pub const SIM_QUEUE_SIZE: usize = 32;

/// Transport for simulation.
///
/// The simulator drains the outgoing queue after every event and schedules
/// the frames on the topology.
pub struct SimTransport {
    mtu: usize,
    outgoing: PriorityQueue,
    incoming: TransportInChannel,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            mtu: 255,
            outgoing: PriorityQueue::new(SIM_QUEUE_SIZE),
            incoming: Channel::new(),
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Take all queued transmissions in priority order.
    pub fn take_transmissions(&self) -> Vec<Transmission> {
        std::iter::from_fn(|| self.outgoing.try_receive()).collect()
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn outgoing(&self) -> &PriorityQueue {
        &self.outgoing
    }

    fn incoming(&self) -> &TransportInChannel {
        &self.incoming
    }
}

/// Clock for simulation.
///
/// Time is controlled externally by the simulator.
pub struct SimClock {
    current: Cell<Timestamp>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::at(Timestamp::ZERO)
    }

    pub fn at(time: Timestamp) -> Self {
        Self {
            current: Cell::new(time),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }

    pub fn advance(&self, duration: Duration) {
        self.current.set(self.current.get() + duration);
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    type SleepFuture<'a> = Ready<()>;

    fn now(&self) -> Timestamp {
        self.current.get()
    }

    fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
        ready(())
    }
}

/// Random for simulation (deterministic LCG).
pub struct SimRandom {
    state: u64,
}

impl SimRandom {
    pub fn new() -> Self {
        Self { state: 12345 }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Default for SimRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let range = max.saturating_sub(min);
        if range == 0 {
            return min;
        }
        min + (self.state % range)
    }
}

pub type SimNodeInner = Node<SimTransport, SimRandom, SimClock, DefaultConfig>;

/// An lwmesh node plus everything it has reported so far.
pub struct SimNode {
    inner: SimNodeInner,
    results: Vec<InboundResult>,
    debug_events: Vec<DebugEvent>,
    pub created_at: Timestamp,
}

impl SimNode {
    pub fn new(settings: Settings, seed: u64, created_at: Timestamp) -> Self {
        let inner = Node::new(
            settings,
            SimTransport::new(),
            SimRandom::with_seed(seed),
            SimClock::at(created_at),
        );
        Self {
            inner,
            results: Vec::new(),
            debug_events: Vec::new(),
            created_at,
        }
    }

    pub fn address(&self) -> Address {
        self.inner.address()
    }

    pub fn inner(&self) -> &SimNodeInner {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut SimNodeInner {
        &mut self.inner
    }

    /// Hand a frame from the air to the node.
    pub fn handle_frame(
        &mut self,
        data: FrameBuf,
        rssi: Option<i16>,
        now: Timestamp,
    ) -> Result<Handled, Error> {
        self.inner.clock().set(now);
        let outcome = self.inner.process_received(&Received { data, rssi });
        self.collect();
        outcome
    }

    pub fn tick(&mut self, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.tick();
        self.collect();
    }

    /// Send application data. Returns the message id.
    pub fn send(&mut self, to: Address, payload: &[u8], now: Timestamp) -> Result<u8, Error> {
        self.inner.clock().set(now);
        let outcome = self.inner.send_msg(to, payload, None);
        self.collect();
        outcome
    }

    /// Start discovery of a route to `target`. Returns the request id.
    pub fn route_request(&mut self, target: Address, now: Timestamp) -> Result<u8, Error> {
        self.inner.clock().set(now);
        let outcome = self.inner.get_route_request(target);
        self.collect();
        outcome
    }

    pub fn take_transmissions(&self) -> Vec<Transmission> {
        self.inner.transport().take_transmissions()
    }

    /// Every result the node has queued so far, oldest first.
    pub fn results(&self) -> &[InboundResult] {
        &self.results
    }

    pub fn take_results(&mut self) -> Vec<InboundResult> {
        std::mem::take(&mut self.results)
    }

    pub fn results_with(&self, status: Status) -> impl Iterator<Item = &InboundResult> {
        self.results.iter().filter(move |r| r.status == status)
    }

    pub fn debug_events(&self) -> &[DebugEvent] {
        &self.debug_events
    }

    pub fn take_debug_events(&mut self) -> Vec<DebugEvent> {
        std::mem::take(&mut self.debug_events)
    }

    /// Move queued results and debug events out of the node's channels, so
    /// their bounded queues never overflow during a long run.
    fn collect(&mut self) {
        while let Some(result) = self.inner.poll() {
            self.results.push(result);
        }
        while let Ok(event) = self.inner.debug_events().try_receive() {
            self.debug_events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use lwmesh::{Decode, Frame, MessageType};

    use super::*;

    fn settings(addr: u8) -> Settings {
        Settings::new(Address(addr)).with_keepalive(false, Duration::from_secs(30))
    }

    #[test]
    fn test_simnode_creation() {
        let node = SimNode::new(settings(b'A'), 42, Timestamp::ZERO);
        assert_eq!(node.address(), Address(b'A'));
        assert!(node.results().is_empty());
        assert!(node.take_transmissions().is_empty());
    }

    #[test]
    fn test_route_request_transmits_and_traces() {
        let mut node = SimNode::new(settings(b'A'), 42, Timestamp::ZERO);
        node.route_request(Address(b'C'), Timestamp::from_millis(50))
            .unwrap();

        assert_eq!(node.take_transmissions().len(), 1);
        assert!(node
            .debug_events()
            .iter()
            .any(|e| matches!(e, DebugEvent::DiscoveryStarted { target, .. } if *target == Address(b'C'))));
    }

    #[test]
    fn test_frames_reach_results() {
        let mut a = SimNode::new(settings(b'A'), 1, Timestamp::ZERO);
        let mut b = SimNode::new(settings(b'B'), 2, Timestamp::ZERO);

        a.send(Address(b'B'), b"hey", Timestamp::ZERO).unwrap();
        for tx in a.take_transmissions() {
            let _ = b.handle_frame(tx.frame, Some(-60), Timestamp::from_millis(1));
        }
        let received: Vec<_> = b.results_with(Status::Received).collect();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].peer, Address(b'A'));

        let acks = b.take_transmissions();
        assert_eq!(acks.len(), 1);
        let frame = Frame::decode_from_slice(acks[0].frame.as_slice()).unwrap();
        assert_eq!(frame.kind(), MessageType::Ack);
    }

    #[test]
    fn test_sim_random_deterministic() {
        let mut r1 = SimRandom::with_seed(7);
        let mut r2 = SimRandom::with_seed(7);
        for _ in 0..10 {
            assert_eq!(r1.gen_range(1, 6), r2.gen_range(1, 6));
        }
        assert_eq!(r1.gen_range(3, 3), 3);
    }
}
