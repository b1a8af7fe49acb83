//! Scenario builder for setting up and running simulations.

use lwmesh::{Address, Duration, Settings, Timestamp};

use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::sim::{Simulator, DEFAULT_TICK_INTERVAL};
use crate::topology::Topology;

/// Type of topology to generate.
#[derive(Debug, Clone)]
enum TopologyType {
    FullyConnected,
    /// Each node connected only to its neighbours.
    Chain,
    /// First node is the hub.
    Star,
    Custom(Topology),
}

/// Address of the `index`-th scenario node: `'A'`, `'B'`, ...
pub fn address_of(index: usize) -> Address {
    Address(b'A'.wrapping_add(index as u8))
}

/// Builder for simulation scenarios.
pub struct ScenarioBuilder {
    num_nodes: usize,
    /// RNG seed for determinism.
    seed: u64,
    /// Must be explicitly specified.
    topology_type: Option<TopologyType>,
    /// Global frame loss rate.
    loss_rate: f64,
    delay: Duration,
    tick_interval: Duration,
    /// Settings for the node at each address.
    settings: fn(Address) -> Settings,
    actions: Vec<(Timestamp, ScenarioAction)>,
    /// (time, from index, to index, payload)
    sends: Vec<(Timestamp, usize, usize, Vec<u8>)>,
    /// (time, from index, target index)
    route_requests: Vec<(Timestamp, usize, usize)>,
    snapshot_interval: Option<Duration>,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ScenarioBuilder {
    /// Create a new scenario with the specified number of nodes.
    ///
    /// Note: You MUST specify a topology before calling build().
    /// Use `.fully_connected()`, `.chain_topology()`, `.star_topology()`,
    /// or `.topology(custom_topology)`.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            seed: 42,
            topology_type: None,
            loss_rate: 0.0,
            delay: Duration::from_millis(1),
            tick_interval: DEFAULT_TICK_INTERVAL,
            settings: Settings::new,
            actions: Vec::new(),
            sends: Vec::new(),
            route_requests: Vec::new(),
            snapshot_interval: None,
        }
    }

    /// Set the RNG seed for deterministic simulation.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set a custom network topology over [`address_of`] addresses.
    pub fn topology(mut self, topo: Topology) -> Self {
        self.topology_type = Some(TopologyType::Custom(topo));
        self
    }

    pub fn fully_connected(mut self) -> Self {
        self.topology_type = Some(TopologyType::FullyConnected);
        self
    }

    pub fn chain_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Chain);
        self
    }

    pub fn star_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Star);
        self
    }

    /// Set global frame loss rate.
    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Set link delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Per-node settings, called once per address.
    pub fn with_settings(mut self, settings: fn(Address) -> Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Set snapshot interval for metrics collection.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    /// Schedule a network partition. Groups hold node indices.
    pub fn partition_at(mut self, time: Timestamp, groups: Vec<Vec<usize>>) -> Self {
        let groups = groups
            .into_iter()
            .map(|g| g.into_iter().map(address_of).collect())
            .collect();
        self.actions
            .push((time, ScenarioAction::Partition { groups }));
        self
    }

    pub fn heal_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, ScenarioAction::HealPartition));
        self
    }

    pub fn snapshot_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, ScenarioAction::TakeSnapshot));
        self
    }

    /// Schedule an application send between node indices.
    pub fn send_at(mut self, time: Timestamp, from: usize, to: usize, payload: &[u8]) -> Self {
        self.sends.push((time, from, to, payload.to_vec()));
        self
    }

    /// Schedule route discovery between node indices.
    pub fn route_request_at(mut self, time: Timestamp, from: usize, target: usize) -> Self {
        self.route_requests.push((time, from, target));
        self
    }

    /// Build the simulator with all nodes and topology.
    pub fn build(self) -> (Simulator, Vec<Address>) {
        let addresses: Vec<Address> = (0..self.num_nodes).map(address_of).collect();

        let mut topo = match self.topology_type {
            Some(TopologyType::FullyConnected) => Topology::fully_connected(&addresses),
            Some(TopologyType::Chain) => Topology::chain(&addresses),
            Some(TopologyType::Star) => Topology::star(&addresses),
            Some(TopologyType::Custom(t)) => t,
            None => panic!(
                "Topology must be explicitly specified. \
                Use .fully_connected(), .chain_topology(), .star_topology(), or .topology()"
            ),
        };

        if self.loss_rate > 0.0 {
            topo.set_global_loss_rate(self.loss_rate);
        }
        topo.set_global_delay(self.delay);

        let mut sim = Simulator::new(self.seed)
            .with_topology(topo)
            .with_tick_interval(self.tick_interval);
        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }

        for &address in &addresses {
            sim.add_node((self.settings)(address));
        }

        for (time, action) in self.actions {
            sim.schedule_action(time, action);
        }
        for (time, from, to, payload) in self.sends {
            sim.schedule_send(time, address_of(from), address_of(to), &payload);
        }
        for (time, from, target) in self.route_requests {
            sim.schedule_route_request(time, address_of(from), address_of(target));
        }

        (sim, addresses)
    }

    /// Build and run the simulation for the specified duration.
    pub fn run_for(self, duration: Duration) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_for(duration)
    }

    /// Build and run until the specified time.
    pub fn run_until(self, time: Timestamp) -> SimulationResult {
        let (mut sim, _) = self.build();
        sim.run_until(time)
    }
}

/// Convenience function to create a simple N-node fully connected scenario.
pub fn simple_scenario(num_nodes: usize) -> ScenarioBuilder {
    ScenarioBuilder::new(num_nodes).fully_connected()
}
