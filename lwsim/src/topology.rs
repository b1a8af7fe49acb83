//! Network topology and link properties.

use hashbrown::HashMap;
use lwmesh::{Address, Duration};

/// Properties of a radio link between two nodes.
#[derive(Debug, Clone)]
pub struct Link {
    /// Signal strength in dBm, reported to the receiver.
    pub rssi: i16,
    /// Frame loss rate (0.0 to 1.0).
    pub loss_rate: f64,
    /// Air time plus propagation.
    pub delay: Duration,
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            rssi: -70,
            loss_rate: 0.0,
            delay: Duration::from_millis(1),
            active: true,
        }
    }
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Which nodes hear each other. Links are bidirectional.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    links: HashMap<(Address, Address), Link>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every node hears every other node.
    pub fn fully_connected(nodes: &[Address]) -> Self {
        let mut topo = Self::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                topo.add_link(a, b, Link::default());
            }
        }
        topo
    }

    /// Each node hears only its predecessor and successor.
    pub fn chain(nodes: &[Address]) -> Self {
        let mut topo = Self::new();
        for window in nodes.windows(2) {
            topo.add_link(window[0], window[1], Link::default());
        }
        topo
    }

    /// First node is the hub, every other node hears only the hub.
    pub fn star(nodes: &[Address]) -> Self {
        let mut topo = Self::new();
        let Some((&hub, spokes)) = nodes.split_first() else {
            return topo;
        };
        for &spoke in spokes {
            topo.add_link(hub, spoke, Link::default());
        }
        topo
    }

    /// Two equal-length paths from `source` to `sink`, via `left` and `right`.
    pub fn diamond(source: Address, left: Address, right: Address, sink: Address) -> Self {
        let mut topo = Self::new();
        topo.add_link(source, left, Link::default());
        topo.add_link(source, right, Link::default());
        topo.add_link(left, sink, Link::default());
        topo.add_link(right, sink, Link::default());
        topo
    }

    pub fn add_link(&mut self, a: Address, b: Address, link: Link) {
        self.links.insert(Self::canonical_pair(a, b), link);
    }

    pub fn remove_link(&mut self, a: Address, b: Address) -> Option<Link> {
        self.links.remove(&Self::canonical_pair(a, b))
    }

    pub fn get_link(&self, a: Address, b: Address) -> Option<&Link> {
        self.links.get(&Self::canonical_pair(a, b))
    }

    pub fn get_link_mut(&mut self, a: Address, b: Address) -> Option<&mut Link> {
        self.links.get_mut(&Self::canonical_pair(a, b))
    }

    /// Link exists and is active.
    pub fn is_connected(&self, a: Address, b: Address) -> bool {
        self.get_link(a, b).is_some_and(|link| link.active)
    }

    /// Nodes reachable over active links, in address order.
    pub fn neighbors(&self, node: Address) -> Vec<Address> {
        let mut result: Vec<Address> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| match node {
                n if n == a => Some(b),
                n if n == b => Some(a),
                _ => None,
            })
            .collect();
        // HashMap order is random; delivery order must not be.
        result.sort();
        result
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Disable every link crossing between groups.
    pub fn partition(&mut self, groups: &[Vec<Address>]) {
        for (&(a, b), link) in self.links.iter_mut() {
            let a_group = groups.iter().position(|g| g.contains(&a));
            let b_group = groups.iter().position(|g| g.contains(&b));
            if a_group != b_group {
                link.active = false;
            }
        }
    }

    /// Re-enable every link.
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }

    pub fn set_global_loss_rate(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for link in self.links.values_mut() {
            link.loss_rate = rate;
        }
    }

    pub fn set_global_delay(&mut self, delay: Duration) {
        for link in self.links.values_mut() {
            link.delay = delay;
        }
    }

    fn canonical_pair(a: Address, b: Address) -> (Address, Address) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }
}
