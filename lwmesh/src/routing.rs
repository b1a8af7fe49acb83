//! Routing table: destination to full path.
//!
//! Routes are soft state. Dynamic entries come from route replies and are
//! wiped on a coarse timer so stale paths are never trusted indefinitely.
//! Static entries are installed by the application and survive resets.
//!
//! An entry moves `Missing -> AwaitingReply -> Active`: a send without a
//! route marks the destination `Missing`, the next maintenance tick floods a
//! request and moves it to `AwaitingReply`, and the reply installs the path.

use log::debug;

use crate::table::{Keyed, SlotTable};
use crate::time::{Duration, Timestamp};
use crate::types::{Address, Error, Path};

/// Where a route came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Installed by the application. Never replaced by a discovered route.
    Static,
    /// Learned from a route reply.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    /// Path known and usable.
    Active,
    /// Route wanted, discovery not yet started.
    Missing,
    /// Route request sent, waiting for the reply.
    AwaitingReply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingEntry {
    pub destination: Address,
    /// Full path from this node to `destination`. Empty unless `Active`.
    pub path: Path,
    pub kind: RouteKind,
    pub state: RouteState,
    pub updated_at: Timestamp,
}

impl Keyed for RoutingEntry {
    type Key = Address;

    fn key(&self) -> Address {
        self.destination
    }
}

/// Fixed-capacity routing table.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    entries: SlotTable<RoutingEntry>,
}

impl RoutingTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: SlotTable::with_capacity(capacity),
        }
    }

    /// Path to `dest`, if an active route exists.
    pub fn lookup(&self, dest: Address) -> Option<&Path> {
        self.entries
            .get(dest)
            .filter(|e| e.state == RouteState::Active)
            .map(|e| &e.path)
    }

    pub fn entry(&self, dest: Address) -> Option<&RoutingEntry> {
        self.entries.get(dest)
    }

    /// Install or improve the route to `dest`.
    ///
    /// An active route is only replaced by a strictly shorter path, and an
    /// active Static route never by a Dynamic one. Returns whether the
    /// table changed.
    pub fn install(
        &mut self,
        dest: Address,
        path: Path,
        kind: RouteKind,
        now: Timestamp,
    ) -> Result<bool, Error> {
        if path.is_empty() {
            return Err(Error::InvalidPath);
        }

        if let Some(entry) = self.entries.get_mut(dest) {
            let replace = match (entry.state, entry.kind, kind) {
                (RouteState::Active, RouteKind::Static, RouteKind::Dynamic) => false,
                (RouteState::Active, _, RouteKind::Static) => true,
                (RouteState::Active, RouteKind::Dynamic, RouteKind::Dynamic) => {
                    path.len() < entry.path.len()
                }
                (RouteState::Missing | RouteState::AwaitingReply, _, _) => true,
            };
            if replace {
                entry.path = path;
                entry.kind = kind;
                entry.state = RouteState::Active;
                entry.updated_at = now;
                debug!("route to {} now {:?} ({:?})", dest, path, kind);
            }
            return Ok(replace);
        }

        self.entries
            .insert(RoutingEntry {
                destination: dest,
                path,
                kind,
                state: RouteState::Active,
                updated_at: now,
            })
            .map_err(|_| Error::RoutingTableFull)?;
        debug!("route to {} installed {:?} ({:?})", dest, path, kind);
        Ok(true)
    }

    /// Ask for discovery of `dest`.
    ///
    /// No-op when the destination already has an entry in any state, so
    /// repeated sends never start a second flood. Returns whether a new
    /// entry was armed.
    pub fn mark_missing(&mut self, dest: Address, now: Timestamp) -> Result<bool, Error> {
        if self.entries.contains(dest) {
            return Ok(false);
        }
        self.entries
            .insert(RoutingEntry {
                destination: dest,
                path: Path::EMPTY,
                kind: RouteKind::Dynamic,
                state: RouteState::Missing,
                updated_at: now,
            })
            .map_err(|_| Error::RoutingTableFull)?;
        debug!("route to {} missing, discovery armed", dest);
        Ok(true)
    }

    /// Move one `Missing` entry to `AwaitingReply` and return its destination.
    pub fn take_missing(&mut self, now: Timestamp) -> Option<Address> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.state == RouteState::Missing)?;
        entry.state = RouteState::AwaitingReply;
        entry.updated_at = now;
        Some(entry.destination)
    }

    /// Re-arm discoveries whose reply never came.
    ///
    /// `AwaitingReply` entries older than `timeout` go back to `Missing`.
    pub fn sweep_expired(&mut self, now: Timestamp, timeout: Duration) -> usize {
        let mut rearmed = 0;
        for entry in self.entries.iter_mut() {
            if entry.state == RouteState::AwaitingReply
                && entry.updated_at.is_older_than(timeout, now)
            {
                entry.state = RouteState::Missing;
                entry.updated_at = now;
                rearmed += 1;
            }
        }
        rearmed
    }

    /// Free every non-Static entry. Returns how many were freed.
    pub fn reset_all(&mut self) -> usize {
        let freed = self.entries.retain(|e| e.kind == RouteKind::Static);
        if freed > 0 {
            debug!("routing reset freed {} entries", freed);
        }
        freed
    }

    /// Free Static routes that do not start at `local`. They are left over
    /// from a previous address and can never be followed. Returns how many
    /// were freed.
    pub fn drop_foreign(&mut self, local: Address) -> usize {
        let freed = self
            .entries
            .retain(|e| e.kind != RouteKind::Static || e.path.first() == Some(local));
        if freed > 0 {
            debug!("dropped {} static routes not starting at {}", freed, local);
        }
        freed
    }

    pub fn remove(&mut self, dest: Address) -> Option<RoutingEntry> {
        self.entries.remove(dest)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoutingEntry> {
        self.entries.iter()
    }

    /// Number of active routes.
    pub fn active_count(&self) -> usize {
        self.iter().filter(|e| e.state == RouteState::Active).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }
}
