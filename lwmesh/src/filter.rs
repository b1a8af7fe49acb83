//! Per-source blocklist consulted before a frame is processed.
//!
//! An entry either blocks everything a source transmits, or only what it
//! sends to one destination (typically broadcast, to silence a chatty
//! node's floods while still talking to it directly).

use crate::table::{Keyed, SlotTable};
use crate::types::{Address, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rule {
    source: Address,
    /// `UNSET` matches every destination.
    destination: Address,
}

impl Keyed for Rule {
    type Key = (Address, Address);

    fn key(&self) -> (Address, Address) {
        (self.source, self.destination)
    }
}

#[derive(Debug, Clone)]
pub struct Blocklist {
    rules: SlotTable<Rule>,
}

impl Blocklist {
    pub fn new(capacity: usize) -> Self {
        Self {
            rules: SlotTable::with_capacity(capacity),
        }
    }

    /// Block every frame transmitted by `source`.
    pub fn drop_source_node(&mut self, source: Address) -> Result<(), Error> {
        self.drop_broadcast_node(source, Address::UNSET)
    }

    /// Block frames from `source` addressed to `destination`.
    pub fn drop_broadcast_node(
        &mut self,
        source: Address,
        destination: Address,
    ) -> Result<(), Error> {
        if !source.is_unicast() {
            return Err(Error::InvalidAddress);
        }
        self.rules
            .insert(Rule {
                source,
                destination,
            })
            .map(|_| ())
            .map_err(|_| Error::DropTableFull)
    }

    /// Remove every rule naming `source`.
    pub fn allow(&mut self, source: Address) -> usize {
        self.rules.retain(|r| r.source != source)
    }

    /// Whether a frame from `source` to `destination` must be dropped.
    pub fn blocks(&self, source: Address, destination: Address) -> bool {
        self.rules.iter().any(|r| {
            r.source == source && (r.destination.is_unset() || r.destination == destination)
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn clear(&mut self) {
        self.rules.clear();
    }
}
