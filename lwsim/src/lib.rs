//! lwsim - Discrete event network simulator for lwmesh testing.
//!
//! This crate provides a deterministic, discrete-event simulator for running
//! lwmesh networks without real-time delays.
//!
//! # Features
//!
//! - **Discrete event simulation**: No real-time delays, deterministic ordering
//! - **Multiple nodes in single process**: Simulate entire networks efficiently
//! - **Configurable topology**: Fully connected, chain, star, diamond or custom
//! - **Link properties**: RSSI, frame loss and delay per link
//! - **Scenario builder**: Scheduled sends, route requests, partitions and healing
//! - **Metrics collection**: Route snapshots and frame counts
//!
//! # Example
//!
//! ```
//! use lwsim::{Duration, ScenarioBuilder, Status, Timestamp};
//!
//! // Two neighbours; 'A' sends to 'B' a moment after start-up.
//! let (mut sim, nodes) = ScenarioBuilder::new(2)
//!     .fully_connected()
//!     .send_at(Timestamp::from_millis(10), 0, 1, b"ping")
//!     .build();
//! sim.run_for(Duration::from_secs(1));
//!
//! let receiver = sim.node(nodes[1]).unwrap();
//! assert_eq!(receiver.results_with(Status::Received).count(), 1);
//! ```
//!
//! # Architecture
//!
//! The simulator uses a priority queue of events ordered by (time, sequence_number).
//! The main loop:
//! 1. Pop next event from queue
//! 2. Advance simulation time
//! 3. Process event (call node handlers)
//! 4. Collect outgoing frames
//! 5. Route through topology, schedule deliveries
//!
//! Node handlers (`process_received`, `tick`) are called directly instead of
//! through the async `Node::run` loop.

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use lwmesh::{Address, DebugEvent, Duration, Settings, Status, Timestamp};
pub use metrics::{RouteSnapshot, SimMetrics, SimulationResult};
pub use node::SimNode;
pub use scenario::{address_of, simple_scenario, ScenarioBuilder};
pub use sim::Simulator;
pub use topology::{Link, Topology};

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn quiet(address: Address) -> Settings {
        Settings::new(address).with_keepalive(false, Duration::from_secs(30))
    }

    fn relay_count(node: &SimNode) -> usize {
        node.debug_events()
            .iter()
            .filter(|e| matches!(e, DebugEvent::RequestRelayed { .. }))
            .count()
    }

    #[test]
    fn test_message_crosses_chain() {
        init_logging();
        let (mut sim, nodes) = ScenarioBuilder::new(4)
            .chain_topology()
            .with_settings(quiet)
            .send_at(Timestamp::ZERO, 0, 3, b"hi")
            .build();
        let (a, d) = (nodes[0], nodes[3]);

        // First copy is a pathless broadcast nobody can use; the retry after
        // 10 s rides the discovered route.
        sim.run_for(Duration::from_secs(15));

        let origin = sim.node(a).unwrap();
        let delivered: Vec<_> = origin.results_with(Status::Delivered).collect();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].peer, d);

        let received: Vec<_> = sim
            .node(d)
            .unwrap()
            .results_with(Status::Received)
            .collect();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].peer, a);
        assert_eq!(received[0].payload().unwrap().as_bytes(), b"hi");

        let route = origin.inner().routes().lookup(d).unwrap();
        assert_eq!(route.as_slice(), &nodes[..]);
    }

    #[test]
    fn test_partition_times_out_then_heals() {
        init_logging();
        let (mut sim, nodes) = ScenarioBuilder::new(2)
            .fully_connected()
            .with_settings(|address| quiet(address).with_retries(3, Duration::from_secs(1)))
            .partition_at(Timestamp::ZERO, vec![vec![0], vec![1]])
            .send_at(Timestamp::ZERO, 0, 1, b"lost")
            .heal_at(Timestamp::from_secs(20))
            .send_at(Timestamp::from_secs(21), 0, 1, b"found")
            .build();
        let (a, b) = (nodes[0], nodes[1]);

        sim.run_until(Timestamp::from_secs(20));
        let timeouts: Vec<_> = sim
            .node(a)
            .unwrap()
            .results_with(Status::Timeout)
            .collect();
        assert_eq!(timeouts.len(), 1);
        assert_eq!(timeouts[0].peer, b);
        assert_eq!(timeouts[0].payload().unwrap().as_bytes(), b"lost");
        assert_eq!(sim.node(b).unwrap().results_with(Status::Received).count(), 0);

        sim.run_until(Timestamp::from_secs(25));
        let received: Vec<_> = sim
            .node(b)
            .unwrap()
            .results_with(Status::Received)
            .collect();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload().unwrap().as_bytes(), b"found");
        assert_eq!(sim.node(a).unwrap().results_with(Status::Delivered).count(), 1);
        assert_eq!(sim.node(a).unwrap().results_with(Status::Timeout).count(), 1);
    }

    #[test]
    fn test_diamond_target_answers_once() {
        init_logging();
        let [a, b, c, d] = [0, 1, 2, 3].map(address_of);
        let (mut sim, _) = ScenarioBuilder::new(4)
            .topology(Topology::diamond(a, b, c, d))
            .with_settings(quiet)
            .route_request_at(Timestamp::ZERO, 0, 3)
            .build();

        sim.run_for(Duration::from_secs(2));

        let replies = sim
            .node(d)
            .unwrap()
            .debug_events()
            .iter()
            .filter(|e| matches!(e, DebugEvent::ReplySent { .. }))
            .count();
        assert_eq!(replies, 1);

        let returned: Vec<_> = sim
            .node(a)
            .unwrap()
            .results_with(Status::RouteReturned)
            .collect();
        assert_eq!(returned.len(), 1);
        assert_eq!(returned[0].peer, d);
        let path = returned[0].path().unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.first(), Some(a));
        assert_eq!(path.last(), Some(d));
    }

    #[test]
    fn test_flood_relayed_once_per_node() {
        init_logging();
        let (mut sim, nodes) = simple_scenario(5)
            .with_settings(quiet)
            .route_request_at(Timestamp::ZERO, 0, 4)
            .build();

        sim.run_for(Duration::from_secs(2));

        for &address in &nodes {
            assert!(relay_count(sim.node(address).unwrap()) <= 1, "{} relayed twice", address);
        }
        assert_eq!(relay_count(sim.node(nodes[4]).unwrap()), 0, "Target never relays");

        let route = sim.node(nodes[0]).unwrap().inner().routes().lookup(nodes[4]);
        assert_eq!(route.map(|p| p.as_slice()), Some(&[nodes[0], nodes[4]][..]));
    }

    #[test]
    fn test_spokes_register_with_hub() {
        init_logging();
        let (mut sim, nodes) = ScenarioBuilder::new(5)
            .star_topology()
            .with_settings(|address| {
                Settings::new(address)
                    .with_master(address_of(0))
                    .with_keepalive(true, Duration::from_secs(30))
            })
            .build();

        let result = sim.run_for(Duration::from_secs(65));

        let hub = sim.node(nodes[0]).unwrap();
        for &spoke in &nodes[1..] {
            assert!(hub.inner().directory().get(spoke).is_some(), "{} missing", spoke);
            assert_eq!(
                sim.node(spoke)
                    .unwrap()
                    .results_with(Status::RegistrationDone)
                    .count(),
                1
            );
        }
        let snapshot = result.final_snapshot().unwrap();
        assert_eq!(snapshot.directory_size_of(nodes[0]), 4);
        assert!(hub.results_with(Status::Received).next().is_none());
    }
}
