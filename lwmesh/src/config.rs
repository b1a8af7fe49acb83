//! Compile-time capacity configuration.
//!
//! Every table the engine keeps is a fixed array of slots sized once, at
//! construction, from a `NodeConfig`. Nothing grows afterwards: a full table
//! surfaces as a capacity error instead.
//!
//! # Memory Footprint
//!
//! | Config | Routes | Requests | Messages | Directory | Filters | Suitable MCUs |
//! |--------|-------:|---------:|---------:|----------:|--------:|---------------|
//! | `DefaultConfig` | 32 | 8 | 8 | 32 | 32 | ESP32, ESP8266, RP2040 |
//! | `SmallConfig` | 4 | 2 | 2 | 4 | 4 | ATmega328 class |
//!
//! Rough per-slot cost:
//! - route: ~24 bytes (destination, path, state, timestamp)
//! - pending request: ~80 bytes when it carries a deferred frame
//! - pending message: ~56 bytes (payload, path, retry bookkeeping)
//! - directory entry: ~32 bytes
//!
//! # Example
//!
//! ```ignore
//! use lwmesh::{Node, NodeConfig, Settings, SmallConfig};
//!
//! let node = Node::<_, _, _, SmallConfig>::new(settings, transport, random, clock);
//!
//! struct GatewayConfig;
//! impl NodeConfig for GatewayConfig {
//!     const MAX_ROUTES: usize = 64;
//!     // ... other constants
//! }
//! ```

/// Configuration trait for compile-time table sizing.
///
/// All bounds must be non-zero.
pub trait NodeConfig {
    /// Routing table slots (one per known destination).
    const MAX_ROUTES: usize;

    /// Route requests remembered for duplicate suppression and deferred send.
    const MAX_PENDING_REQUESTS: usize;

    /// Application messages in flight awaiting an Ack.
    const MAX_PENDING_MESSAGES: usize;

    /// Nodes the directory can hold.
    const MAX_DIRECTORY_NODES: usize;

    /// Blocklist entries.
    const MAX_FILTERS: usize;
}

/// Default configuration, matching the full-size build of the protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl NodeConfig for DefaultConfig {
    const MAX_ROUTES: usize = 32;
    const MAX_PENDING_REQUESTS: usize = 8;
    const MAX_PENDING_MESSAGES: usize = 8;
    const MAX_DIRECTORY_NODES: usize = 32;
    const MAX_FILTERS: usize = 32;
}

/// Small configuration for 2KB-RAM class microcontrollers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmallConfig;

impl NodeConfig for SmallConfig {
    const MAX_ROUTES: usize = 4;
    const MAX_PENDING_REQUESTS: usize = 2;
    const MAX_PENDING_MESSAGES: usize = 2;
    const MAX_DIRECTORY_NODES: usize = 4;
    const MAX_FILTERS: usize = 4;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        assert_eq!(DefaultConfig::MAX_ROUTES, 32);
        assert_eq!(DefaultConfig::MAX_PENDING_REQUESTS, 8);
        assert_eq!(DefaultConfig::MAX_PENDING_MESSAGES, 8);
        assert_eq!(DefaultConfig::MAX_DIRECTORY_NODES, 32);
        assert_eq!(DefaultConfig::MAX_FILTERS, 32);
    }

    #[test]
    fn test_small_config_smaller_than_default() {
        assert!(SmallConfig::MAX_ROUTES < DefaultConfig::MAX_ROUTES);
        assert!(SmallConfig::MAX_PENDING_REQUESTS < DefaultConfig::MAX_PENDING_REQUESTS);
        assert!(SmallConfig::MAX_PENDING_MESSAGES < DefaultConfig::MAX_PENDING_MESSAGES);
        assert!(SmallConfig::MAX_DIRECTORY_NODES < DefaultConfig::MAX_DIRECTORY_NODES);
        assert!(SmallConfig::MAX_FILTERS < DefaultConfig::MAX_FILTERS);
    }

    #[test]
    fn test_configs_are_nonzero() {
        assert!(DefaultConfig::MAX_ROUTES > 0);
        assert!(DefaultConfig::MAX_PENDING_REQUESTS > 0);
        assert!(DefaultConfig::MAX_PENDING_MESSAGES > 0);
        assert!(DefaultConfig::MAX_DIRECTORY_NODES > 0);
        assert!(DefaultConfig::MAX_FILTERS > 0);

        assert!(SmallConfig::MAX_ROUTES > 0);
        assert!(SmallConfig::MAX_PENDING_REQUESTS > 0);
        assert!(SmallConfig::MAX_PENDING_MESSAGES > 0);
        assert!(SmallConfig::MAX_DIRECTORY_NODES > 0);
        assert!(SmallConfig::MAX_FILTERS > 0);
    }
}
