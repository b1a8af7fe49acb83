//! On-demand route discovery.
//!
//! A request floods outward from its origin. Each relay appends itself to the
//! embedded path and re-broadcasts under its own address, so every receiver
//! knows its upstream neighbour. The target appends itself and answers; the
//! reply walks the finished path backward hop by hop. Replies are not
//! retried: a lost reply leaves the route `AwaitingReply` until the sweep
//! re-arms it.
//!
//! Each node relays a given request at most once. Requests are recorded by
//! `(origin, unique_id)` in the pending-request table until they expire.

use log::{debug, info, trace, warn};

use crate::config::NodeConfig;
use crate::debug::DebugEvent;
use crate::node::Node;
use crate::routing::RouteKind;
use crate::table::Keyed;
use crate::time::Timestamp;
use crate::traits::{Clock, Random, Transport};
use crate::types::{
    Address, Error, Handled, InboundResult, MessageType, Path, ResultBody, Status,
};
use crate::wire::{Frame, Header, RouteBody, RouteFrame};

/// Identifies a recorded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestKey {
    pub origin: Address,
    pub unique_id: u8,
    /// Frame type the record was made for.
    pub kind: MessageType,
}

/// Transmission state of a recorded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferred {
    /// Nothing parked.
    Idle,
    /// Goes out at the end of the next tick.
    ToBeSent(Frame),
    Sent,
}

/// A request this node has seen, or a reply waiting to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub key: RequestKey,
    pub seen_at: Timestamp,
    pub delivery: Deferred,
}

impl Keyed for PendingRequest {
    type Key = RequestKey;

    fn key(&self) -> RequestKey {
        self.key
    }
}

impl<T, R, Clk, Cfg> Node<T, R, Clk, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Flood a route request for `dest`. Returns the request id.
    pub fn get_route_request(&mut self, dest: Address) -> Result<u8, Error> {
        let local = self.address();
        if dest == local {
            return Err(Error::CannotRouteToSelf);
        }
        if !dest.is_unicast() || local.is_unset() {
            return Err(Error::InvalidAddress);
        }

        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);

        let frame = Frame::Route(RouteFrame {
            header: Header::new(MessageType::RouteRequest, local, Address::BROADCAST, id),
            body: RouteBody {
                origin: local,
                target: dest,
                unique_id: id,
                kind: MessageType::RouteRequest,
                path: Path::single(local),
            },
        });
        self.transmit(&frame);

        debug!("{}: route request {} for {}", local, id, dest);
        emit_debug!(
            self,
            DebugEvent::DiscoveryStarted {
                timestamp: self.clock.now(),
                target: dest,
                request_id: id,
            }
        );
        Ok(id)
    }

    pub(crate) fn handle_route_request(
        &mut self,
        frame: &RouteFrame,
        now: Timestamp,
    ) -> Result<Handled, Error> {
        let local = self.address();
        let body = frame.body;

        if body.origin == local || body.path.contains(local) {
            return Err(Error::RoutingLoop);
        }

        let key = RequestKey {
            origin: body.origin,
            unique_id: body.unique_id,
            kind: MessageType::RouteRequest,
        };
        if self.pending_requests.contains(key) {
            return Err(Error::DuplicateRequest);
        }
        self.pending_requests
            .insert(PendingRequest {
                key,
                seen_at: now,
                delivery: Deferred::Idle,
            })
            .map_err(|_| {
                warn!("pending request table full, request from {} dropped", body.origin);
                Error::PendingRequestTableFull
            })?;
        debug!(
            "{}: recorded request {} from {} for {}",
            local, body.unique_id, body.origin, body.target
        );

        let path = body.path.with_appended(local).ok_or(Error::DropByRouting)?;

        if body.target == local {
            let next_hop = frame.header.source;
            let reply = Frame::Route(RouteFrame {
                header: Header::new(MessageType::RouteReply, local, next_hop, body.unique_id),
                body: RouteBody {
                    kind: MessageType::RouteReply,
                    path,
                    ..body
                },
            });
            self.send_or_defer(key, reply, now);
            info!("{}: answering {} with {:?}", local, body.origin, path);
            emit_debug!(
                self,
                DebugEvent::ReplySent {
                    origin: body.origin,
                    next_hop,
                    path,
                }
            );
            return Ok(Handled::Replied);
        }

        if !self.settings.role.relays() {
            trace!("{}: end node, request not relayed", local);
            return Ok(Handled::Ignored);
        }

        let relay = Frame::Route(RouteFrame {
            header: Header::new(
                MessageType::RouteRequest,
                local,
                Address::BROADCAST,
                frame.header.message_id,
            ),
            body: RouteBody { path, ..body },
        });
        self.send_or_defer(key, relay, now);
        emit_debug!(
            self,
            DebugEvent::RequestRelayed {
                origin: body.origin,
                target: body.target,
                unique_id: body.unique_id,
                hops: path.len() as u8,
            }
        );
        Ok(Handled::Relayed)
    }

    pub(crate) fn handle_route_reply(
        &mut self,
        frame: &RouteFrame,
        now: Timestamp,
    ) -> Result<Handled, Error> {
        let local = self.address();
        let body = frame.body;

        if body.origin != local {
            let next_hop = body.path.hop_before(local).ok_or(Error::DropByRouting)?;
            let forward = Frame::Route(RouteFrame {
                header: Header::new(
                    MessageType::RouteReply,
                    local,
                    next_hop,
                    frame.header.message_id,
                ),
                body,
            });
            let key = RequestKey {
                origin: body.origin,
                unique_id: body.unique_id,
                kind: MessageType::RouteReply,
            };
            self.send_or_defer(key, forward, now);
            emit_debug!(
                self,
                DebugEvent::Forwarded {
                    kind: MessageType::RouteReply,
                    origin: body.origin,
                    next_hop,
                }
            );
            return Ok(Handled::Relayed);
        }

        let dest = body.target;
        Self::check_path(&body.path, local, dest).map_err(|_| Error::DropByRouting)?;

        // The reply is reported whether or not it beats the stored route.
        match self.routes.install(dest, body.path, RouteKind::Dynamic, now) {
            Ok(false) => trace!("{}: reply for {} brings no better route", local, dest),
            Ok(true) => {
                emit_debug!(
                    self,
                    DebugEvent::RouteInstalled {
                        destination: dest,
                        path: body.path,
                    }
                );
            }
            // The path is still handed to the application, which may use it
            // explicitly.
            Err(e) => warn!("route to {} not stored: {}", dest, e),
        }

        info!("{}: route to {} is {:?}", local, dest, body.path);
        self.push_result(InboundResult::new(
            body.unique_id,
            Status::RouteReturned,
            dest,
            ResultBody::Path(body.path),
        ));
        Ok(Handled::RouteReturned)
    }

    /// Transmit now, or park on the pending-request entry for the next tick.
    ///
    /// Falls back to sending now when no entry can be claimed.
    pub(crate) fn send_or_defer(&mut self, key: RequestKey, frame: Frame, now: Timestamp) {
        if self.settings.deferred_replies {
            let parked = self.pending_requests.upsert(
                key,
                |entry| entry.delivery = Deferred::ToBeSent(frame),
                || PendingRequest {
                    key,
                    seen_at: now,
                    delivery: Deferred::ToBeSent(frame),
                },
            );
            if parked.is_ok() {
                emit_debug!(self, DebugEvent::FrameDeferred { kind: frame.kind() });
                return;
            }
            debug!("no slot to park {:?}, sending now", frame.kind());
        }
        self.transmit(&frame);
    }

    /// Send every parked frame.
    pub(crate) fn flush_deferred(&mut self) {
        for index in 0..self.pending_requests.capacity() {
            let Some(entry) = self.pending_requests.slot_mut(index) else {
                continue;
            };
            if let Deferred::ToBeSent(frame) = entry.delivery {
                entry.delivery = Deferred::Sent;
                self.transmit(&frame);
            }
        }
    }

    /// Free request records older than the pending-request timeout.
    ///
    /// Parked frames are kept until they are sent.
    pub(crate) fn expire_pending_requests(&mut self, now: Timestamp) -> usize {
        let timeout = self.settings.pending_request_timeout;
        let freed = self.pending_requests.retain(|entry| {
            matches!(entry.delivery, Deferred::ToBeSent(_))
                || !entry.seen_at.is_older_than(timeout, now)
        });
        if freed > 0 {
            trace!("{}: expired {} pending requests", self.address(), freed);
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::*;
    use crate::routing::RouteState;
    use crate::settings::NodeRole;
    use crate::time::Duration;

    #[test]
    fn test_get_route_request_floods() {
        let mut node = make_node(b'A');
        let id = node.get_route_request(a(b'D')).unwrap();

        let frames = sent(&node);
        assert_eq!(frames.len(), 1);
        let header = frames[0].header();
        assert_eq!(header.kind, MessageType::RouteRequest);
        assert_eq!(header.destination, Address::BROADCAST);
        let body = frames[0].body();
        assert_eq!(body.origin, a(b'A'));
        assert_eq!(body.target, a(b'D'));
        assert_eq!(body.unique_id, id);
        assert_eq!(body.path, path(b"A"));

        let next = node.get_route_request(a(b'D')).unwrap();
        assert_ne!(id, next);
    }

    #[test]
    fn test_route_request_to_self_rejected() {
        let mut node = make_node(b'A');
        assert_eq!(node.get_route_request(a(b'A')), Err(Error::CannotRouteToSelf));
        assert_eq!(
            node.get_route_request(Address::BROADCAST),
            Err(Error::InvalidAddress)
        );
        assert!(node.transport().take_sent().is_empty());
    }

    #[test]
    fn test_relay_appends_and_rebroadcasts() {
        let mut node = make_node(b'C');
        let rx = request(b'B', b'A', b'D', 5, b"AB");
        assert_eq!(node.process_frame(rx.as_slice()), Ok(Handled::Relayed));

        let frames = sent(&node);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header().source, a(b'C'));
        assert_eq!(frames[0].header().destination, Address::BROADCAST);
        assert_eq!(frames[0].body().origin, a(b'A'));
        assert_eq!(frames[0].body().path, path(b"ABC"));
    }

    #[test]
    fn test_loop_never_rebroadcast() {
        let mut node = make_node(b'B');
        let looped = request(b'C', b'A', b'D', 5, b"ABC");
        assert_eq!(node.process_frame(looped.as_slice()), Err(Error::RoutingLoop));

        let own = request(b'C', b'B', b'D', 1, b"BC");
        assert_eq!(node.process_frame(own.as_slice()), Err(Error::RoutingLoop));
        assert!(node.transport().take_sent().is_empty());
    }

    #[test]
    fn test_duplicate_request_suppressed() {
        let mut node = make_node(b'C');
        let first = request(b'B', b'A', b'D', 9, b"AB");
        let second = request(b'E', b'A', b'D', 9, b"AE");
        assert_eq!(node.process_frame(first.as_slice()), Ok(Handled::Relayed));
        assert_eq!(
            node.process_frame(second.as_slice()),
            Err(Error::DuplicateRequest)
        );
        assert_eq!(sent(&node).len(), 1, "Exactly one re-broadcast");

        // Same counter from another origin is a different request.
        let other = request(b'B', b'F', b'D', 9, b"FB");
        assert_eq!(node.process_frame(other.as_slice()), Ok(Handled::Relayed));
    }

    #[test]
    fn test_target_replies_once() {
        let mut node = make_node(b'D');
        let via_b = request(b'C', b'A', b'D', 3, b"ABC");
        let via_e = request(b'E', b'A', b'D', 3, b"AE");
        assert_eq!(node.process_frame(via_b.as_slice()), Ok(Handled::Replied));
        assert_eq!(
            node.process_frame(via_e.as_slice()),
            Err(Error::DuplicateRequest)
        );

        let frames = sent(&node);
        assert_eq!(frames.len(), 1);
        let header = frames[0].header();
        assert_eq!(header.kind, MessageType::RouteReply);
        assert_eq!(header.destination, a(b'C'));
        assert_eq!(frames[0].body().path, path(b"ABCD"));
        assert_eq!(frames[0].body().origin, a(b'A'));
        assert_eq!(frames[0].body().target, a(b'D'));
    }

    #[test]
    fn test_full_path_dropped() {
        let mut node = make_node(b'Z');
        let rx = request(b'H', b'A', b'Y', 1, b"ABCDEFGH");
        assert_eq!(node.process_frame(rx.as_slice()), Err(Error::DropByRouting));
        assert!(node.transport().take_sent().is_empty());
    }

    #[test]
    fn test_end_node_does_not_relay() {
        let mut node = make_node_with(settings(b'C').with_role(NodeRole::EndNode));
        let rx = request(b'B', b'A', b'D', 1, b"AB");
        assert_eq!(node.process_frame(rx.as_slice()), Ok(Handled::Ignored));
        assert!(node.transport().take_sent().is_empty());

        let for_me = request(b'B', b'A', b'C', 2, b"AB");
        assert_eq!(node.process_frame(for_me.as_slice()), Ok(Handled::Replied));
    }

    #[test]
    fn test_pending_request_table_full() {
        let mut node = make_node(b'C');
        for id in 0..8 {
            let rx = request(b'B', b'A', b'D', id, b"AB");
            node.process_frame(rx.as_slice()).unwrap();
        }
        let rx = request(b'B', b'A', b'D', 8, b"AB");
        assert_eq!(
            node.process_frame(rx.as_slice()),
            Err(Error::PendingRequestTableFull)
        );
    }

    #[test]
    fn test_reply_forwarded_backward() {
        let mut node = make_node(b'B');
        let rx = route_frame(
            MessageType::RouteReply,
            b'C',
            a(b'B'),
            b'A',
            b'D',
            3,
            b"ABCD",
        );
        assert_eq!(node.process_frame(rx.as_slice()), Ok(Handled::Relayed));

        let frames = sent(&node);
        assert_eq!(frames[0].header().kind, MessageType::RouteReply);
        assert_eq!(frames[0].header().source, a(b'B'));
        assert_eq!(frames[0].header().destination, a(b'A'));
        assert!(node.routes().is_empty());
    }

    #[test]
    fn test_reply_at_origin_installs_route() {
        let mut node = make_node(b'A');
        node.send_msg(a(b'D'), b"hi", None).unwrap();
        node.transport().take_sent();
        node.tick();
        assert_eq!(
            node.routes().entry(a(b'D')).unwrap().state,
            RouteState::AwaitingReply
        );

        let rx = route_frame(
            MessageType::RouteReply,
            b'B',
            a(b'A'),
            b'A',
            b'D',
            1,
            b"ABCD",
        );
        assert_eq!(node.process_frame(rx.as_slice()), Ok(Handled::RouteReturned));
        assert_eq!(node.routes().lookup(a(b'D')), Some(&path(b"ABCD")));

        let result = node.poll().unwrap();
        assert_eq!(result.status, Status::RouteReturned);
        assert_eq!(result.peer, a(b'D'));
        assert_eq!(result.path(), Some(&path(b"ABCD")));

        // A longer path arriving later is reported but not stored.
        let longer = route_frame(
            MessageType::RouteReply,
            b'E',
            a(b'A'),
            b'A',
            b'D',
            1,
            b"AEFGD",
        );
        assert_eq!(node.process_frame(longer.as_slice()), Ok(Handled::RouteReturned));
        assert_eq!(node.routes().lookup(a(b'D')), Some(&path(b"ABCD")));
        let result = node.poll().unwrap();
        assert_eq!(result.status, Status::RouteReturned);
        assert_eq!(result.path(), Some(&path(b"AEFGD")));
    }

    #[test]
    fn test_manual_request_answered_despite_static_route() {
        let mut node = make_node(b'A');
        node.add_static_route(a(b'D'), path(b"ABCD")).unwrap();
        let id = node.get_route_request(a(b'D')).unwrap();
        node.transport().take_sent();

        let rx = route_frame(MessageType::RouteReply, b'B', a(b'A'), b'A', b'D', id, b"ABD");
        assert_eq!(node.process_frame(rx.as_slice()), Ok(Handled::RouteReturned));

        let result = node.poll().unwrap();
        assert_eq!(result.status, Status::RouteReturned);
        assert_eq!(result.message_id, id);
        assert_eq!(result.path(), Some(&path(b"ABD")));
        let entry = node.routes().entry(a(b'D')).unwrap();
        assert_eq!(entry.kind, RouteKind::Static);
        assert_eq!(entry.path, path(b"ABCD"));
    }

    #[test]
    fn test_deferred_reply_goes_out_on_tick() {
        let mut node = make_node_with(settings(b'D').with_deferred_replies(true));
        let rx = request(b'C', b'A', b'D', 3, b"ABC");
        assert_eq!(node.process_frame(rx.as_slice()), Ok(Handled::Replied));
        assert!(node.transport().take_sent().is_empty());

        node.tick();
        let frames = sent(&node);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind(), MessageType::RouteReply);

        node.tick();
        assert!(node.transport().take_sent().is_empty(), "Sent only once");
    }

    #[test]
    fn test_pending_requests_expire() {
        let mut node = make_node(b'C');
        let rx = request(b'B', b'A', b'D', 1, b"AB");
        node.process_frame(rx.as_slice()).unwrap();
        assert_eq!(node.pending_request_count(), 1);

        node.clock().advance(Duration::from_secs(6));
        node.tick();
        assert_eq!(node.pending_request_count(), 1);

        node.clock().advance(Duration::from_millis(1));
        node.tick();
        assert_eq!(node.pending_request_count(), 0);

        // Once expired the same request is relayed again.
        assert_eq!(node.process_frame(rx.as_slice()), Ok(Handled::Relayed));
    }
}
