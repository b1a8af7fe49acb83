//! Runtime node settings.
//!
//! Capacities are fixed at compile time by [`NodeConfig`](crate::NodeConfig);
//! everything here can change while the node runs, either through
//! [`Node::set_settings`](crate::Node::set_settings) or over the air with a
//! [`ConfigUpdate`] payload.

use log::LevelFilter;

use crate::directory::LinkId;
use crate::time::Duration;
use crate::types::{
    Address, Path, Payload, DEFAULT_KEEPALIVE_INTERVAL_MS, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_INTERVAL_MS, LINK_ID_LEN, MAX_BLOCKED_NODES, MAX_PAYLOAD_LEN,
    PENDING_REQUEST_TIMEOUT_MS, ROUTE_RESET_INTERVAL_MS, TAG_CONFIGURATION,
};
use crate::wire::{DecodeError, Reader, Writer};

/// Default master (directory) node address, `'D'`.
pub const DEFAULT_MASTER: Address = Address(0x44);

/// Default LoRa band.
pub const DEFAULT_BAND_HZ: u32 = 433_000_000;

/// What a node does for the rest of the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeRole {
    /// Keeps the network directory.
    Master = 1,
    Generic = 2,
    /// Leaf node, never relays.
    EndNode = 4,
}

impl NodeRole {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(NodeRole::Master),
            2 => Some(NodeRole::Generic),
            4 => Some(NodeRole::EndNode),
            _ => None,
        }
    }

    /// Whether this node re-broadcasts requests and forwards data for others.
    pub const fn relays(self) -> bool {
        !matches!(self, NodeRole::EndNode)
    }
}

/// Link technology under the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    LoRa = 1,
    /// Peer-to-peer WiFi. Shared medium without carrier sense, so frames get
    /// a small random transmit delay.
    Wifi = 2,
}

impl Protocol {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Protocol::LoRa),
            2 => Some(Protocol::Wifi),
            _ => None,
        }
    }
}

/// Node settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub local_address: Address,
    pub master: Address,
    pub role: NodeRole,
    pub protocol: Protocol,
    pub band_hz: u32,
    /// Transmissions of a message before it times out.
    pub max_retries: u8,
    pub retry_interval: Duration,
    pub keepalive: bool,
    pub keepalive_interval: Duration,
    /// 0 off, 1 trace, 2 debug, 3 info, 4 and up warn.
    pub debug_level: u8,
    pub link_id: LinkId,
    /// Sources whose frames are dropped. `UNSET` entries are ignored.
    pub blocked_sources: [Address; MAX_BLOCKED_NODES],
    /// Sources whose broadcasts are dropped.
    pub blocked_broadcast: [Address; MAX_BLOCKED_NODES],
    /// Static route to the master, from this node. Empty for none.
    pub path_to_master: Path,
    pub pending_request_timeout: Duration,
    pub route_reset_interval: Duration,
    /// Park replies and relayed frames until the next tick.
    pub deferred_replies: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            local_address: Address::UNSET,
            master: DEFAULT_MASTER,
            role: NodeRole::Generic,
            protocol: Protocol::LoRa,
            band_hz: DEFAULT_BAND_HZ,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            keepalive: true,
            keepalive_interval: Duration::from_millis(DEFAULT_KEEPALIVE_INTERVAL_MS),
            debug_level: 0,
            link_id: [0u8; LINK_ID_LEN],
            blocked_sources: [Address::UNSET; MAX_BLOCKED_NODES],
            blocked_broadcast: [Address::UNSET; MAX_BLOCKED_NODES],
            path_to_master: Path::EMPTY,
            pending_request_timeout: Duration::from_millis(PENDING_REQUEST_TIMEOUT_MS),
            route_reset_interval: Duration::from_millis(ROUTE_RESET_INTERVAL_MS),
            deferred_replies: false,
        }
    }
}

impl Settings {
    /// Default settings for the node at `address`.
    pub fn new(address: Address) -> Self {
        Self {
            local_address: address,
            ..Self::default()
        }
    }

    pub fn with_master(mut self, master: Address) -> Self {
        self.master = master;
        self
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_retries(mut self, max_retries: u8, interval: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_interval = interval;
        self
    }

    pub fn with_keepalive(mut self, enabled: bool, interval: Duration) -> Self {
        self.keepalive = enabled;
        self.keepalive_interval = interval;
        self
    }

    pub fn with_debug_level(mut self, level: u8) -> Self {
        self.debug_level = level;
        self
    }

    pub fn with_link_id(mut self, link_id: LinkId) -> Self {
        self.link_id = link_id;
        self
    }

    pub fn with_path_to_master(mut self, path: Path) -> Self {
        self.path_to_master = path;
        self
    }

    pub fn with_route_reset_interval(mut self, interval: Duration) -> Self {
        self.route_reset_interval = interval;
        self
    }

    pub fn with_pending_request_timeout(mut self, timeout: Duration) -> Self {
        self.pending_request_timeout = timeout;
        self
    }

    pub fn with_deferred_replies(mut self, deferred: bool) -> Self {
        self.deferred_replies = deferred;
        self
    }

    /// Add `source` to the first free slot of the source blocklist.
    ///
    /// Returns false when all slots are taken.
    pub fn block_source(&mut self, source: Address) -> bool {
        Self::claim(&mut self.blocked_sources, source)
    }

    /// Add `source` to the first free slot of the broadcast blocklist.
    pub fn block_broadcast(&mut self, source: Address) -> bool {
        Self::claim(&mut self.blocked_broadcast, source)
    }

    fn claim(list: &mut [Address; MAX_BLOCKED_NODES], source: Address) -> bool {
        if list.contains(&source) {
            return true;
        }
        match list.iter_mut().find(|a| a.is_unset()) {
            Some(slot) => {
                *slot = source;
                true
            }
            None => false,
        }
    }

    pub fn is_master(&self) -> bool {
        self.local_address == self.master
    }

    /// Log filter for `debug_level`.
    pub fn log_level(&self) -> LevelFilter {
        match self.debug_level {
            0 => LevelFilter::Off,
            1 => LevelFilter::Trace,
            2 => LevelFilter::Debug,
            3 => LevelFilter::Info,
            _ => LevelFilter::Warn,
        }
    }

    /// Overwrite the fields carried by an over-the-air update.
    pub fn apply(&mut self, update: &ConfigUpdate) {
        self.master = update.master;
        self.role = update.role;
        self.protocol = update.protocol;
        self.band_hz = update.band_hz;
        self.max_retries = update.max_retries;
        self.retry_interval = update.retry_interval;
        self.keepalive = update.keepalive;
        self.keepalive_interval = update.keepalive_interval;
        self.debug_level = update.debug_level;
    }
}

/// Over-the-air settings change, carried in a SendTo payload.
///
/// ```text
/// 0      1       2     3         4..8      8        9..13        13         14..18          18
/// +------+-------+-----+---------+---------+--------+------------+----------+---------------+-------+
/// | 0x03 | master| role| protocol| band_hz | retries| retry (ms) | keepalive| keepalive (ms)| debug |
/// +------+-------+-----+---------+---------+--------+------------+----------+---------------+-------+
/// ```
///
/// Multi-byte fields are big-endian. The rest of the payload is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub master: Address,
    pub role: NodeRole,
    pub protocol: Protocol,
    pub band_hz: u32,
    pub max_retries: u8,
    pub retry_interval: Duration,
    pub keepalive: bool,
    pub keepalive_interval: Duration,
    pub debug_level: u8,
}

impl ConfigUpdate {
    pub const ENCODED_LEN: usize = 19;

    /// Update that carries the current values of `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            master: settings.master,
            role: settings.role,
            protocol: settings.protocol,
            band_hz: settings.band_hz,
            max_retries: settings.max_retries,
            retry_interval: settings.retry_interval,
            keepalive: settings.keepalive,
            keepalive_interval: settings.keepalive_interval,
            debug_level: settings.debug_level,
        }
    }

    pub fn to_payload(&self) -> Payload {
        let mut w = Writer::new();
        w.write_u8(TAG_CONFIGURATION);
        w.write_address(self.master);
        w.write_u8(self.role as u8);
        w.write_u8(self.protocol as u8);
        w.write_u32_be(self.band_hz);
        w.write_u8(self.max_retries);
        w.write_u32_be(self.retry_interval.as_millis_u32());
        w.write_u8(self.keepalive as u8);
        w.write_u32_be(self.keepalive_interval.as_millis_u32());
        w.write_u8(self.debug_level);

        let mut raw = [0u8; MAX_PAYLOAD_LEN];
        raw[..w.len()].copy_from_slice(w.as_slice());
        Payload::from_raw(raw)
    }

    pub fn from_payload(payload: &Payload) -> Result<Self, DecodeError> {
        let mut r = Reader::new(&payload.raw()[..Self::ENCODED_LEN]);
        if r.read_u8()? != TAG_CONFIGURATION {
            return Err(DecodeError::InvalidValue);
        }
        let master = r.read_address()?;
        if !master.is_unicast() {
            return Err(DecodeError::InvalidValue);
        }
        let role = NodeRole::from_u8(r.read_u8()?).ok_or(DecodeError::InvalidValue)?;
        let protocol = Protocol::from_u8(r.read_u8()?).ok_or(DecodeError::InvalidValue)?;
        Ok(Self {
            master,
            role,
            protocol,
            band_hz: r.read_u32_be()?,
            max_retries: r.read_u8()?,
            retry_interval: Duration::from_millis(r.read_u32_be()? as u64),
            keepalive: r.read_u8()? != 0,
            keepalive_interval: Duration::from_millis(r.read_u32_be()? as u64),
            debug_level: r.read_u8()?,
        })
    }
}
