//! Metrics collection for simulation analysis.

use hashbrown::HashMap;
use lwmesh::{Address, Timestamp};

/// Routing state of every node at a point in time.
#[derive(Debug, Clone)]
pub struct RouteSnapshot {
    pub time: Timestamp,
    /// Active routes held by each node.
    pub routes: HashMap<Address, usize>,
    /// Directory size of each node; non-zero only on the master.
    pub directory_sizes: HashMap<Address, usize>,
}

impl RouteSnapshot {
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            routes: HashMap::new(),
            directory_sizes: HashMap::new(),
        }
    }

    pub fn record_node(&mut self, address: Address, routes: usize, directory_size: usize) {
        self.routes.insert(address, routes);
        self.directory_sizes.insert(address, directory_size);
    }

    pub fn routes_of(&self, address: Address) -> usize {
        self.routes.get(&address).copied().unwrap_or(0)
    }

    pub fn directory_size_of(&self, address: Address) -> usize {
        self.directory_sizes.get(&address).copied().unwrap_or(0)
    }

    pub fn total_routes(&self) -> usize {
        self.routes.values().sum()
    }
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Frames put on the air.
    pub frames_sent: u64,
    /// Per-receiver copies lost to the link loss rate.
    pub frames_dropped: u64,
    /// Per-receiver copies handed to a node.
    pub frames_delivered: u64,
    /// Delivered copies the receiving node rejected (not addressed to it,
    /// duplicate, filtered, ...).
    pub frames_rejected: u64,
    pub snapshots: Vec<RouteSnapshot>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, snapshot: RouteSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn latest_snapshot(&self) -> Option<&RouteSnapshot> {
        self.snapshots.last()
    }

    /// First snapshot in which `address` held at least `routes` routes.
    pub fn first_time_with_routes(&self, address: Address, routes: usize) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|s| s.routes_of(address) >= routes)
            .map(|s| s.time)
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub end_time: Timestamp,
    pub metrics: SimMetrics,
    /// Whether the run ended because no events were left.
    pub queue_exhausted: bool,
}

impl SimulationResult {
    pub fn final_snapshot(&self) -> Option<&RouteSnapshot> {
        self.metrics.latest_snapshot()
    }

    /// Active routes summed over all nodes at the end of the run.
    pub fn final_route_count(&self) -> usize {
        self.final_snapshot().map(|s| s.total_routes()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_totals() {
        let mut snapshot = RouteSnapshot::new(Timestamp::ZERO);
        snapshot.record_node(Address(b'A'), 2, 0);
        snapshot.record_node(Address(b'B'), 1, 3);

        assert_eq!(snapshot.total_routes(), 3);
        assert_eq!(snapshot.routes_of(Address(b'A')), 2);
        assert_eq!(snapshot.directory_size_of(Address(b'B')), 3);
        assert_eq!(snapshot.routes_of(Address(b'Z')), 0);
    }

    #[test]
    fn test_first_time_with_routes() {
        let mut metrics = SimMetrics::new();

        let mut s1 = RouteSnapshot::new(Timestamp::from_secs(10));
        s1.record_node(Address(b'A'), 0, 0);
        metrics.add_snapshot(s1);

        let mut s2 = RouteSnapshot::new(Timestamp::from_secs(20));
        s2.record_node(Address(b'A'), 1, 0);
        metrics.add_snapshot(s2);

        assert_eq!(
            metrics.first_time_with_routes(Address(b'A'), 1),
            Some(Timestamp::from_secs(20))
        );
        assert_eq!(metrics.first_time_with_routes(Address(b'A'), 2), None);
    }
}
