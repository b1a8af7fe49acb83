//! Acknowledged message delivery.
//!
//! Every application message stays in the outbox until its ack arrives.
//! The retry sweep retransmits it in place every retry interval, using
//! whatever path is known at that moment, and gives up with a single
//! `Timeout` result once it has been transmitted `max_retries` times.
//!
//! Messages travel with their full path. Without one the frame is broadcast
//! and only the destination, if it is a direct neighbour, accepts it.

use log::{debug, info, trace, warn};

use crate::config::NodeConfig;
use crate::debug::DebugEvent;
use crate::directory::Registration;
use crate::discovery::RequestKey;
use crate::node::Node;
use crate::settings::ConfigUpdate;
use crate::table::Keyed;
use crate::time::Timestamp;
use crate::traits::{Clock, Random, Transport};
use crate::types::{
    Address, Error, Handled, InboundResult, MessageType, Path, Payload, ResultBody, Status,
    TAG_CONFIGURATION, TAG_REGISTRATION,
};
use crate::wire::{Frame, Header, RouteBody, RouteFrame, SendToFrame};

/// A message waiting for its ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingMessage {
    pub unique_id: u8,
    pub destination: Address,
    pub payload: Payload,
    /// Path supplied by the sender. Otherwise the routing table decides on
    /// every transmission.
    pub path: Option<Path>,
    /// Transmissions so far.
    pub retries: u8,
    pub sent_at: Timestamp,
}

impl PendingMessage {
    /// User-message kind, echoed back by the ack.
    pub fn kind(&self) -> MessageType {
        message_kind(&self.payload)
    }
}

impl Keyed for PendingMessage {
    type Key = u8;

    fn key(&self) -> u8 {
        self.unique_id
    }
}

fn message_kind(payload: &Payload) -> MessageType {
    if payload.tag() == TAG_REGISTRATION {
        MessageType::Registration
    } else {
        MessageType::UserData
    }
}

impl<T, R, Clk, Cfg> Node<T, R, Clk, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Send `data` to `dest`. Returns the message id.
    ///
    /// With no `path` the routing table is consulted; an unknown destination
    /// arms discovery and the message is broadcast meanwhile. Completion is
    /// reported through [`poll`](Self::poll).
    pub fn send_msg(&mut self, dest: Address, data: &[u8], path: Option<Path>) -> Result<u8, Error> {
        let payload = Payload::new(data)?;
        self.send_payload(dest, payload, path)
    }

    /// Send a prepared payload, e.g. a [`ConfigUpdate`].
    pub fn send_payload(
        &mut self,
        dest: Address,
        payload: Payload,
        path: Option<Path>,
    ) -> Result<u8, Error> {
        let local = self.address();
        if dest == local {
            return Err(Error::CannotSendToSelf);
        }
        if !dest.is_unicast() || local.is_unset() {
            return Err(Error::InvalidAddress);
        }
        if let Some(path) = &path {
            Self::check_path(path, local, dest)?;
        }
        let now = self.clock.now();
        self.enqueue_message(dest, payload, path, now)
    }

    pub(crate) fn enqueue_message(
        &mut self,
        dest: Address,
        payload: Payload,
        path: Option<Path>,
        now: Timestamp,
    ) -> Result<u8, Error> {
        if self.outbox.is_full() {
            warn!("{}: message queue full, send to {} refused", self.address(), dest);
            return Err(Error::MessageQueueFull);
        }
        let message = PendingMessage {
            unique_id: self.allocate_message_id(),
            destination: dest,
            payload,
            path,
            retries: 1,
            sent_at: now,
        };
        self.outbox
            .insert(message)
            .map_err(|_| Error::MessageQueueFull)?;
        self.transmit_message(&message, now);
        Ok(message.unique_id)
    }

    /// Next 8-bit id not held by a pending message.
    fn allocate_message_id(&mut self) -> u8 {
        let mut id = self.next_message_id;
        for _ in 0..=u8::MAX {
            id = self.next_message_id;
            self.next_message_id = self.next_message_id.wrapping_add(1);
            if !self.outbox.contains(id) {
                break;
            }
        }
        id
    }

    fn transmit_message(&mut self, message: &PendingMessage, now: Timestamp) {
        let local = self.address();
        let dest = message.destination;

        let route = message
            .path
            .or_else(|| self.route_from_here(dest))
            .and_then(|path| path.hop_after(local).map(|hop| (hop, path)));

        let (next_hop, path) = match route {
            Some(route) => route,
            None => {
                if let Err(e) = self.routes.mark_missing(dest, now) {
                    warn!("cannot arm discovery for {}: {}", dest, e);
                }
                (Address::BROADCAST, Path::EMPTY)
            }
        };

        let frame = Frame::SendTo(SendToFrame {
            header: Header::new(MessageType::SendTo, local, next_hop, message.unique_id),
            body: RouteBody {
                origin: local,
                target: dest,
                unique_id: message.unique_id,
                kind: message.kind(),
                path,
            },
            payload: message.payload,
        });
        self.transmit(&frame);
        trace!(
            "{}: message {} to {} via {} (attempt {})",
            local,
            message.unique_id,
            dest,
            next_hop,
            message.retries
        );
        emit_debug!(
            self,
            DebugEvent::MessageSent {
                message_id: message.unique_id,
                destination: dest,
                next_hop,
                attempt: message.retries,
            }
        );
    }

    /// Stored route to `dest`, if it starts at this node.
    ///
    /// A route that does not is unusable; it is removed so the caller's
    /// `mark_missing` arms discovery.
    fn route_from_here(&mut self, dest: Address) -> Option<Path> {
        let local = self.address();
        let path = *self.routes.lookup(dest)?;
        if path.first() == Some(local) {
            return Some(path);
        }
        warn!("{}: route {:?} to {} does not start here, dropped", local, path, dest);
        self.routes.remove(dest);
        None
    }

    /// Retransmit due messages; time out those out of attempts.
    pub(crate) fn retry_due_messages(&mut self, now: Timestamp) {
        let interval = self.settings.retry_interval;
        let max_retries = self.settings.max_retries;

        for index in 0..self.outbox.capacity() {
            let Some(message) = self.outbox.slot_mut(index) else {
                continue;
            };
            if !message.sent_at.is_older_than(interval, now) {
                continue;
            }

            if message.retries < max_retries {
                message.retries += 1;
                message.sent_at = now;
                let message = *message;
                self.metrics.retries = self.metrics.retries.saturating_add(1);
                self.transmit_message(&message, now);
                continue;
            }

            let message = *message;
            self.outbox.take_slot(index);
            self.metrics.timeouts = self.metrics.timeouts.saturating_add(1);
            warn!(
                "{}: message {} to {} timed out after {} attempts",
                self.address(),
                message.unique_id,
                message.destination,
                message.retries
            );
            emit_debug!(
                self,
                DebugEvent::MessageTimedOut {
                    timestamp: now,
                    message_id: message.unique_id,
                    destination: message.destination,
                }
            );
            self.push_result(InboundResult::new(
                message.unique_id,
                Status::Timeout,
                message.destination,
                ResultBody::Payload(message.payload),
            ));
        }
    }

    pub(crate) fn handle_ack(&mut self, frame: &RouteFrame, now: Timestamp) -> Result<Handled, Error> {
        let local = self.address();
        let body = frame.body;

        if body.origin != local {
            let next_hop = body.path.hop_before(local).ok_or(Error::DropByRouting)?;
            let forward = Frame::Route(RouteFrame {
                header: Header::new(MessageType::Ack, local, next_hop, frame.header.message_id),
                body,
            });
            let key = RequestKey {
                origin: body.origin,
                unique_id: body.unique_id,
                kind: MessageType::Ack,
            };
            self.send_or_defer(key, forward, now);
            emit_debug!(
                self,
                DebugEvent::Forwarded {
                    kind: MessageType::Ack,
                    origin: body.origin,
                    next_hop,
                }
            );
            return Ok(Handled::Relayed);
        }

        let acked = self
            .outbox
            .get(body.unique_id)
            .is_some_and(|m| m.destination == body.target);
        if !acked {
            trace!("{}: stale ack {} from {}", local, body.unique_id, body.target);
            return Ok(Handled::Ignored);
        }
        self.outbox.remove(body.unique_id);

        let status = if body.kind == MessageType::Registration {
            Status::RegistrationDone
        } else {
            Status::Delivered
        };
        info!("{}: message {} {}", local, body.unique_id, status);
        self.push_result(InboundResult::new(
            body.unique_id,
            status,
            body.target,
            ResultBody::Empty,
        ));
        Ok(Handled::AckReceived)
    }

    pub(crate) fn handle_send_to(
        &mut self,
        frame: &SendToFrame,
        rssi: Option<i16>,
        now: Timestamp,
    ) -> Result<Handled, Error> {
        let local = self.address();
        let body = frame.body;

        let ack_path = if body.path.is_empty() {
            if body.target != local {
                return Err(Error::NotForMe);
            }
            if frame.header.source != body.origin {
                return Err(Error::DropByRouting);
            }
            Path::from_slice(&[body.origin, local])?
        } else if body.path.last() == Some(local) && body.target == local {
            body.path
        } else {
            return self.relay_send_to(frame);
        };

        self.dispatch_user_message(frame, &ack_path, rssi, now)?;

        let next_hop = ack_path.hop_before(local).ok_or(Error::DropByRouting)?;
        let ack = Frame::Route(RouteFrame {
            header: Header::new(MessageType::Ack, local, next_hop, body.unique_id),
            body: RouteBody {
                origin: body.origin,
                target: local,
                unique_id: body.unique_id,
                kind: body.kind,
                path: ack_path,
            },
        });
        let key = RequestKey {
            origin: body.origin,
            unique_id: body.unique_id,
            kind: MessageType::Ack,
        };
        self.send_or_defer(key, ack, now);
        Ok(Handled::MessageReachedDestination)
    }

    /// Pass a data frame one hop further along its path.
    fn relay_send_to(&mut self, frame: &SendToFrame) -> Result<Handled, Error> {
        let local = self.address();
        if !self.settings.role.relays() {
            return Err(Error::DropByRouting);
        }
        let next_hop = frame
            .body
            .path
            .hop_after(local)
            .ok_or(Error::DropByRouting)?;
        let forward = Frame::SendTo(SendToFrame {
            header: Header::new(MessageType::SendTo, local, next_hop, frame.header.message_id),
            ..*frame
        });
        self.transmit(&forward);
        emit_debug!(
            self,
            DebugEvent::Forwarded {
                kind: MessageType::SendTo,
                origin: frame.body.origin,
                next_hop,
            }
        );
        Ok(Handled::Relayed)
    }

    /// Act on a message addressed to this node.
    ///
    /// Registrations go to the directory, configuration updates to the
    /// settings; everything else (configuration included) is queued for the
    /// application.
    fn dispatch_user_message(
        &mut self,
        frame: &SendToFrame,
        path: &Path,
        rssi: Option<i16>,
        now: Timestamp,
    ) -> Result<(), Error> {
        let body = frame.body;
        let payload = frame.payload;

        match payload.tag() {
            TAG_REGISTRATION => {
                if let Some(reg) = Registration::from_payload(&payload) {
                    self.directory
                        .register(reg.address, *path, reg.link_id, rssi, now)
                        .map_err(|e| {
                            warn!("{}: cannot register {}: {}", self.address(), reg.address, e);
                            e
                        })?;
                    info!("{}: registered {} via {:?}", self.address(), reg.address, path);
                    return Ok(());
                }
                debug!("malformed registration from {}", body.origin);
            }
            TAG_CONFIGURATION => match ConfigUpdate::from_payload(&payload) {
                Ok(update) => {
                    let old_master = self.settings.master;
                    self.settings.apply(&update);
                    if self.settings.master != old_master {
                        self.forget_master_route(old_master);
                    }
                    info!("{}: settings updated by {}", self.address(), body.origin);
                }
                Err(e) => debug!("malformed configuration from {}: {:?}", body.origin, e),
            },
            _ => {}
        }

        info!(
            "{}: message {} from {}: {:?}",
            self.address(),
            body.unique_id,
            body.origin,
            payload
        );
        self.push_result(InboundResult::new(
            body.unique_id,
            Status::Received,
            body.origin,
            ResultBody::Payload(payload),
        ));
        Ok(())
    }
}
