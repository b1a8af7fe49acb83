//! Discrete event simulator for lwmesh networks.

use std::collections::BinaryHeap;

use hashbrown::HashMap;
use log::{debug, trace, warn};
use lwmesh::traits::Transmission;
use lwmesh::{Address, Duration, FrameBuf, Settings, Timestamp};

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{RouteSnapshot, SimMetrics, SimulationResult};
use crate::node::SimNode;
use crate::topology::Topology;

/// Default interval between maintenance ticks of each node.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Discrete event simulator for lwmesh networks.
pub struct Simulator {
    nodes: HashMap<Address, SimNode>,
    topology: Topology,
    current_time: Timestamp,
    event_queue: BinaryHeap<ScheduledEvent>,
    metrics: SimMetrics,
    next_seq: u64,
    /// RNG state for frame loss and node seeds.
    rng_state: u64,
    tick_interval: Duration,
    snapshot_interval: Option<Duration>,
    next_snapshot: Option<Timestamp>,
}

impl Simulator {
    /// Create a new simulator with given RNG seed.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            rng_state: seed,
            tick_interval: DEFAULT_TICK_INTERVAL,
            snapshot_interval: None,
            next_snapshot: None,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Record a route snapshot every `interval`.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    /// Add a node and start its tick timer. Returns its address.
    pub fn add_node(&mut self, settings: Settings) -> Address {
        let address = settings.local_address;
        let seed = self.rng_state ^ u64::from(address.as_u8());
        let node = SimNode::new(settings, seed, self.current_time);
        if self.nodes.insert(address, node).is_some() {
            warn!("node {} replaced", address);
        }
        self.schedule(self.current_time, Event::Tick { node: address });
        address
    }

    pub fn node(&self, address: Address) -> Option<&SimNode> {
        self.nodes.get(&address)
    }

    pub fn node_mut(&mut self, address: Address) -> Option<&mut SimNode> {
        self.nodes.get_mut(&address)
    }

    /// All node addresses, sorted.
    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.nodes.keys().copied().collect();
        addresses.sort();
        addresses
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    pub fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::ScenarioAction(action));
    }

    /// Have `from` send `payload` to `to` at `time`.
    pub fn schedule_send(&mut self, time: Timestamp, from: Address, to: Address, payload: &[u8]) {
        self.schedule(
            time,
            Event::AppSend {
                from,
                to,
                payload: payload.to_vec(),
            },
        );
    }

    /// Have `from` flood a route request for `target` at `time`.
    pub fn schedule_route_request(&mut self, time: Timestamp, from: Address, target: Address) {
        self.schedule(time, Event::RouteRequest { from, target });
    }

    /// Run simulation until specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while let Some(event) = self.event_queue.pop() {
            if event.time > end_time {
                self.event_queue.push(event);
                break;
            }
            self.advance_time(event.time);
            self.process_event(event.event);
            self.maybe_take_snapshot();
        }

        self.advance_time(end_time);
        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    /// Process at most `max_events` events.
    pub fn run_events(&mut self, max_events: usize) -> SimulationResult {
        for _ in 0..max_events {
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
            self.maybe_take_snapshot();
        }

        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::FrameDelivery {
                to,
                from: _,
                data,
                rssi,
            } => self.deliver_frame(to, data, rssi),
            Event::Tick { node } => self.fire_tick(node),
            Event::AppSend { from, to, payload } => self.app_send(from, to, &payload),
            Event::RouteRequest { from, target } => self.route_request(from, target),
            Event::ScenarioAction(action) => self.execute_action(action),
        }
    }

    fn deliver_frame(&mut self, to: Address, data: FrameBuf, rssi: Option<i16>) {
        let now = self.current_time;
        let Some(node) = self.nodes.get_mut(&to) else {
            return;
        };
        self.metrics.frames_delivered += 1;
        if let Err(e) = node.handle_frame(data, rssi, now) {
            self.metrics.frames_rejected += 1;
            trace!("{} @{}ms: {}", to, now.as_millis(), e);
        }
        self.collect_outgoing(to);
    }

    fn fire_tick(&mut self, address: Address) {
        let now = self.current_time;
        let Some(node) = self.nodes.get_mut(&address) else {
            return;
        };
        node.tick(now);
        self.collect_outgoing(address);
        self.schedule(now + self.tick_interval, Event::Tick { node: address });
    }

    fn app_send(&mut self, from: Address, to: Address, payload: &[u8]) {
        let now = self.current_time;
        let Some(node) = self.nodes.get_mut(&from) else {
            warn!("send from unknown node {}", from);
            return;
        };
        match node.send(to, payload, now) {
            Ok(id) => debug!("{} @{}ms: message {} to {}", from, now.as_millis(), id, to),
            Err(e) => warn!("{} @{}ms: send to {} failed: {}", from, now.as_millis(), to, e),
        }
        self.collect_outgoing(from);
    }

    fn route_request(&mut self, from: Address, target: Address) {
        let now = self.current_time;
        let Some(node) = self.nodes.get_mut(&from) else {
            warn!("route request from unknown node {}", from);
            return;
        };
        if let Err(e) = node.route_request(target, now) {
            warn!("{}: route request for {} failed: {}", from, target, e);
        }
        self.collect_outgoing(from);
    }

    /// Put a node's queued frames on the air.
    fn collect_outgoing(&mut self, sender: Address) {
        let transmissions = match self.nodes.get(&sender) {
            Some(node) => node.take_transmissions(),
            None => return,
        };
        for tx in transmissions {
            self.broadcast(sender, tx);
        }
    }

    /// Deliver a frame to every active neighbour of `sender`.
    ///
    /// Radio is a shared medium: unicast frames reach every neighbour too,
    /// and receivers filter on the header destination.
    fn broadcast(&mut self, sender: Address, tx: Transmission) {
        self.metrics.frames_sent += 1;
        let now = self.current_time;

        for neighbor in self.topology.neighbors(sender) {
            let Some(link) = self.topology.get_link(sender, neighbor) else {
                continue;
            };
            let (loss_rate, delay, rssi) = (link.loss_rate, link.delay, link.rssi);

            if loss_rate > 0.0 && self.random_f64() < loss_rate {
                self.metrics.frames_dropped += 1;
                continue;
            }

            self.schedule(
                now + delay + tx.jitter,
                Event::FrameDelivery {
                    to: neighbor,
                    from: sender,
                    data: tx.frame,
                    rssi: Some(rssi),
                },
            );
        }
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        debug!("@{}ms: {:?}", self.current_time.as_millis(), action);
        match action {
            ScenarioAction::Partition { groups } => self.topology.partition(&groups),
            ScenarioAction::HealPartition => self.topology.heal(),
            ScenarioAction::DisableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { from, to, rate } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
            ScenarioAction::TakeSnapshot => self.take_snapshot(),
        }
    }

    fn maybe_take_snapshot(&mut self) {
        let (Some(next), Some(interval)) = (self.next_snapshot, self.snapshot_interval) else {
            return;
        };
        if self.current_time >= next {
            self.take_snapshot();
            self.next_snapshot = Some(next + interval);
        }
    }

    /// Record every node's route count and directory size.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = RouteSnapshot::new(self.current_time);
        for (&address, node) in &self.nodes {
            snapshot.record_node(
                address,
                node.inner().routes().active_count(),
                node.inner().directory().len(),
            );
        }
        self.metrics.add_snapshot(snapshot);
    }

    /// Random f64 in [0, 1).
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        (self.rng_state >> 11) as f64 / (1u64 << 53) as f64
    }
}
