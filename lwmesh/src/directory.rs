//! Network directory kept by the master node.
//!
//! Nodes announce themselves with a registration message (at start-up and on
//! every keepalive). The directory records how each one was reached. Entries
//! never expire here; liveness is for the caller to judge from
//! `last_keepalive`.

use crate::table::{Keyed, SlotTable};
use crate::time::Timestamp;
use crate::types::{Address, Error, Path, Payload, LINK_ID_LEN, MAX_PAYLOAD_LEN, TAG_REGISTRATION};

/// Link-layer identifier a node advertises (a MAC address on WiFi).
pub type LinkId = [u8; LINK_ID_LEN];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Seen once.
    Registered,
    /// Registered again since, via keepalive.
    Alive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub address: Address,
    /// Path the latest registration travelled, origin first.
    pub path: Path,
    pub link_id: LinkId,
    pub last_keepalive: Timestamp,
    /// RSSI of the frame that carried the latest registration.
    pub signal_hint: Option<i16>,
    pub state: NodeState,
}

impl Keyed for DirectoryEntry {
    type Key = Address;

    fn key(&self) -> Address {
        self.address
    }
}

/// Registration message body: `[0x01, address, link_id[6]]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub address: Address,
    pub link_id: LinkId,
}

impl Registration {
    pub fn to_payload(&self) -> Payload {
        let mut raw = [0u8; MAX_PAYLOAD_LEN];
        raw[0] = TAG_REGISTRATION;
        raw[1] = self.address.as_u8();
        raw[2..2 + LINK_ID_LEN].copy_from_slice(&self.link_id);
        Payload::from_raw(raw)
    }

    /// Parse a registration, `None` if the payload is something else.
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        let raw = payload.raw();
        if raw[0] != TAG_REGISTRATION {
            return None;
        }
        let address = Address(raw[1]);
        if !address.is_unicast() {
            return None;
        }
        let mut link_id = [0u8; LINK_ID_LEN];
        link_id.copy_from_slice(&raw[2..2 + LINK_ID_LEN]);
        Some(Self { address, link_id })
    }
}

/// Fixed-capacity registry of known nodes.
#[derive(Debug, Clone)]
pub struct Directory {
    entries: SlotTable<DirectoryEntry>,
}

impl Directory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: SlotTable::with_capacity(capacity),
        }
    }

    /// Record or refresh a node.
    pub fn register(
        &mut self,
        address: Address,
        path: Path,
        link_id: LinkId,
        signal_hint: Option<i16>,
        now: Timestamp,
    ) -> Result<(), Error> {
        self.entries
            .upsert(
                address,
                |entry| {
                    entry.path = path;
                    entry.link_id = link_id;
                    entry.signal_hint = signal_hint;
                    entry.last_keepalive = now;
                    entry.state = NodeState::Alive;
                },
                || DirectoryEntry {
                    address,
                    path,
                    link_id,
                    last_keepalive: now,
                    signal_hint,
                    state: NodeState::Registered,
                },
            )
            .map(|_| ())
            .map_err(|_| Error::DirectoryFull)
    }

    pub fn get(&self, address: Address) -> Option<&DirectoryEntry> {
        self.entries.get(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: LinkId = [0xDE, 0xAD, 0x00, 0x00, 0xBE, 0xEF];

    #[test]
    fn test_register_then_refresh() {
        let mut dir = Directory::new(2);
        let path = Path::from_bytes(b"BM").unwrap();
        dir.register(Address(b'B'), path, MAC, Some(-70), Timestamp::from_secs(1))
            .unwrap();
        assert_eq!(dir.get(Address(b'B')).unwrap().state, NodeState::Registered);

        let shorter = Path::from_bytes(b"BCM").unwrap();
        dir.register(Address(b'B'), shorter, MAC, Some(-80), Timestamp::from_secs(31))
            .unwrap();
        let entry = dir.get(Address(b'B')).unwrap();
        assert_eq!(entry.state, NodeState::Alive);
        assert_eq!(entry.path, shorter);
        assert_eq!(entry.last_keepalive, Timestamp::from_secs(31));
        assert_eq!(entry.signal_hint, Some(-80));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_directory_full() {
        let mut dir = Directory::new(1);
        let now = Timestamp::ZERO;
        dir.register(Address(b'B'), Path::EMPTY, MAC, None, now).unwrap();
        assert_eq!(
            dir.register(Address(b'C'), Path::EMPTY, MAC, None, now),
            Err(Error::DirectoryFull)
        );
        assert!(dir.get(Address(b'B')).is_some());
    }

    #[test]
    fn test_registration_payload_keeps_zero_bytes() {
        let reg = Registration {
            address: Address(b'C'),
            link_id: MAC,
        };
        let payload = reg.to_payload();
        assert_eq!(payload.tag(), TAG_REGISTRATION);
        assert_eq!(Registration::from_payload(&payload), Some(reg));

        assert_eq!(Registration::from_payload(&Payload::new(b"hello").unwrap()), None);
    }
}
