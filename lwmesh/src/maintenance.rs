//! Periodic maintenance.
//!
//! One `tick` runs every timer-driven duty in a fixed order:
//!
//! 1. expire old pending-request records
//! 2. re-arm stalled discoveries, then flood a request for each `Missing` route
//! 3. keepalive registration toward the master
//! 4. retransmit or time out pending messages
//! 5. periodic reset of dynamic routes
//! 6. send frames parked by deferred replies
//!
//! Ticking more often than needed is harmless; every duty compares against
//! its own timestamp. [`next_deadline`](Node::next_deadline) tells an async
//! driver how long it may sleep.

use log::{debug, info, warn};

use crate::config::NodeConfig;
use crate::debug::DebugEvent;
use crate::directory::Registration;
use crate::discovery::Deferred;
use crate::node::Node;
use crate::routing::RouteState;
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, Random, Transport};
use crate::types::{Error, MessageType, Path};

/// Slack added to deadlines so the strict "older than" checks have passed.
const DEADLINE_SLACK: Duration = Duration::from_millis(1);

impl<T, R, Clk, Cfg> Node<T, R, Clk, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    pub(crate) fn handle_tick(&mut self, now: Timestamp) {
        self.expire_pending_requests(now);

        let rearmed = self
            .routes
            .sweep_expired(now, self.settings.pending_request_timeout);
        if rearmed > 0 {
            debug!("{}: {} discoveries unanswered, retrying", self.address(), rearmed);
        }
        while let Some(dest) = self.routes.take_missing(now) {
            if let Err(e) = self.get_route_request(dest) {
                warn!("{}: discovery for {} failed: {}", self.address(), dest, e);
            }
        }

        self.keepalive(now);
        self.retry_due_messages(now);

        if now.elapsed_since(self.last_reset) >= self.settings.route_reset_interval {
            self.last_reset = now;
            let freed = self.routes.reset_all();
            if freed > 0 {
                info!("{}: route reset freed {} entries", self.address(), freed);
            }
            emit_debug!(
                self,
                DebugEvent::RoutesReset {
                    timestamp: now,
                    freed,
                }
            );
        }

        self.flush_deferred();
    }

    /// Re-register with the master once per keepalive interval.
    fn keepalive(&mut self, now: Timestamp) {
        let settings = &self.settings;
        if !settings.keepalive || settings.is_master() || settings.local_address.is_unset() {
            return;
        }
        if now.elapsed_since(self.last_keepalive) < settings.keepalive_interval {
            return;
        }
        self.last_keepalive = now;

        let master = self.settings.master;
        if self.routes.lookup(master).is_none() {
            if let Err(e) = self.routes.mark_missing(master, now) {
                warn!("{}: cannot look for master {}: {}", self.address(), master, e);
            }
            return;
        }

        let registering = self
            .outbox
            .iter()
            .any(|m| m.destination == master && m.kind() == MessageType::Registration);
        if registering {
            return;
        }
        if let Err(e) = self.announce(now) {
            warn!("{}: keepalive to {} failed: {}", self.address(), master, e);
        }
    }

    /// Make this node known to the master.
    pub(crate) fn announce(&mut self, now: Timestamp) -> Result<(), Error> {
        let local = self.address();
        let master = self.settings.master;
        let link_id = self.settings.link_id;

        if self.settings.is_master() {
            return self
                .directory
                .register(local, Path::single(local), link_id, None, now);
        }

        if self.routes.lookup(master).is_some() {
            let payload = Registration {
                address: local,
                link_id,
            }
            .to_payload();
            self.enqueue_message(master, payload, None, now)?;
            debug!("{}: registering with {}", local, master);
        } else {
            self.get_route_request(master)?;
        }
        Ok(())
    }

    /// Earliest time at which `tick` has work to do.
    pub fn next_deadline(&self, now: Timestamp) -> Timestamp {
        let settings = &self.settings;
        let mut deadline = self.last_reset + settings.route_reset_interval;

        if settings.keepalive && !settings.is_master() && !settings.local_address.is_unset() {
            deadline = deadline.min(self.last_keepalive + settings.keepalive_interval);
        }

        for message in self.outbox.iter() {
            deadline = deadline.min(message.sent_at + settings.retry_interval + DEADLINE_SLACK);
        }

        for entry in self.pending_requests.iter() {
            if matches!(entry.delivery, Deferred::ToBeSent(_)) {
                return now;
            }
            deadline = deadline
                .min(entry.seen_at + settings.pending_request_timeout + DEADLINE_SLACK);
        }

        for route in self.routes.iter() {
            match route.state {
                RouteState::Missing => return now,
                RouteState::AwaitingReply => {
                    deadline = deadline
                        .min(route.updated_at + settings.pending_request_timeout + DEADLINE_SLACK);
                }
                RouteState::Active => {}
            }
        }

        deadline.max(now)
    }
}

#[cfg(test)]
mod tests {
    use crate::node::testing::*;
    use crate::routing::{RouteKind, RouteState};
    use crate::settings::{NodeRole, Settings};
    use crate::time::{Duration, Timestamp};
    use crate::traits::Clock;
    use crate::types::{Address, MessageType};
    use crate::wire::Frame;

    #[test]
    fn test_tick_starts_discovery_for_missing_route() {
        let mut node = make_node(b'A');
        node.send_msg(a(b'D'), b"hi", None).unwrap();
        node.transport().take_sent();

        node.tick();
        let frames = sent(&node);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind(), MessageType::RouteRequest);
        assert_eq!(frames[0].body().target, a(b'D'));
        assert_eq!(
            node.routes().entry(a(b'D')).unwrap().state,
            RouteState::AwaitingReply
        );

        node.tick();
        assert!(node.transport().take_sent().is_empty(), "One flood per discovery");
    }

    #[test]
    fn test_unanswered_discovery_is_retried() {
        let mut node = make_node(b'A');
        node.send_msg(a(b'D'), b"hi", None).unwrap();
        node.tick();
        node.transport().take_sent();

        node.clock().advance(Duration::from_millis(6_001));
        node.tick();
        let requests = sent(&node)
            .iter()
            .filter(|f| f.kind() == MessageType::RouteRequest)
            .count();
        assert_eq!(requests, 1);
    }

    #[test]
    fn test_route_reset_keeps_static() {
        let mut node = make_node(b'A');
        node.add_static_route(a(b'B'), path(b"AB")).unwrap();
        node.routes
            .install(a(b'C'), path(b"ABC"), RouteKind::Dynamic, Timestamp::ZERO)
            .unwrap();

        node.clock().advance(Duration::from_secs(119));
        node.tick();
        assert!(node.routes().lookup(a(b'C')).is_some());

        node.clock().advance(Duration::from_secs(1));
        node.tick();
        assert!(node.routes().lookup(a(b'C')).is_none());
        assert!(node.routes().lookup(a(b'B')).is_some());
    }

    #[test]
    fn test_keepalive_registers_with_master() {
        let settings = Settings::new(a(b'A'))
            .with_keepalive(true, Duration::from_secs(30))
            .with_path_to_master(path(b"ABD"));
        let mut node = make_node_with(settings);

        node.clock().advance(Duration::from_secs(29));
        node.tick();
        assert!(node.transport().take_sent().is_empty());

        node.clock().advance(Duration::from_secs(1));
        node.tick();
        let frames = sent(&node);
        assert_eq!(frames.len(), 1);
        let Frame::SendTo(f) = frames[0] else {
            panic!("expected registration, got {:?}", frames[0]);
        };
        assert_eq!(f.body.kind, MessageType::Registration);
        assert_eq!(f.body.target, a(b'D'));
        assert_eq!(f.header.destination, a(b'B'));

        // Still unacked at the next interval: no second registration.
        node.clock().advance(Duration::from_secs(30));
        node.tick();
        let registrations = node
            .pending_messages()
            .filter(|m| m.kind() == MessageType::Registration)
            .count();
        assert_eq!(registrations, 1);
    }

    #[test]
    fn test_keepalive_without_route_looks_for_master() {
        let settings = Settings::new(a(b'A')).with_keepalive(true, Duration::from_secs(30));
        let mut node = make_node_with(settings);
        node.clock().advance(Duration::from_secs(30));
        node.tick();
        assert_eq!(
            node.routes().entry(a(b'D')).unwrap().state,
            RouteState::Missing
        );
        assert_eq!(node.next_deadline(node.clock().now()), node.clock().now());

        node.tick();
        let frames = sent(&node);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind(), MessageType::RouteRequest);
        assert_eq!(frames[0].body().target, a(b'D'));
    }

    #[test]
    fn test_master_sends_no_keepalive() {
        let settings = Settings::new(a(b'D'))
            .with_role(NodeRole::Master)
            .with_keepalive(true, Duration::from_secs(30));
        let mut node = make_node_with(settings);
        node.clock().advance(Duration::from_secs(60));
        node.tick();
        assert!(node.transport().take_sent().is_empty());
    }

    #[test]
    fn test_next_deadline() {
        let mut node = make_node(b'A');
        assert_eq!(
            node.next_deadline(Timestamp::ZERO),
            Timestamp::from_millis(120_000)
        );

        node.add_static_route(a(b'B'), path(b"AB")).unwrap();
        node.send_msg(a(b'B'), b"hi", None).unwrap();
        assert_eq!(
            node.next_deadline(Timestamp::ZERO),
            Timestamp::from_millis(10_001)
        );

        node.send_msg(a(b'C'), b"hi", None).unwrap();
        assert_eq!(
            node.next_deadline(Timestamp::from_millis(5)),
            Timestamp::from_millis(5),
            "A missing route needs an immediate tick"
        );
    }

    #[test]
    fn test_unregistered_node_stays_quiet() {
        let mut node = make_node_with(Settings::default());
        node.clock().advance(Duration::from_secs(60));
        node.tick();
        assert!(node.transport().take_sent().is_empty());
        assert_eq!(node.address(), Address::UNSET);
    }
}
