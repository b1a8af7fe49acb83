//! Event types and priority queue for discrete event simulation.

use std::cmp::Ordering;

use lwmesh::{Address, FrameBuf, Timestamp};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Partition the network into isolated groups.
    Partition { groups: Vec<Vec<Address>> },
    /// Re-enable every link.
    HealPartition,
    DisableLink { from: Address, to: Address },
    EnableLink { from: Address, to: Address },
    SetLossRate { from: Address, to: Address, rate: f64 },
    /// Record a route snapshot for metrics.
    TakeSnapshot,
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// A frame reaches a node's radio.
    FrameDelivery {
        to: Address,
        from: Address,
        data: FrameBuf,
        rssi: Option<i16>,
    },
    /// Maintenance tick for a node.
    Tick { node: Address },
    /// Application sends data from one node to another.
    AppSend {
        from: Address,
        to: Address,
        payload: Vec<u8>,
    },
    /// Application asks a node to discover a route.
    RouteRequest { from: Address, target: Address },
    ScenarioAction(ScenarioAction),
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: Timestamp,
    /// Orders events scheduled for the same time.
    pub seq: SequenceNumber,
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// Min-heap ordering: BinaryHeap is a max-heap, so compare in reverse.
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}
