//! Configuration for XSDB
//!
//! Centralized configuration with sensible defaults.
//!
//! Every limit the engine enforces lives here. The defaults mirror the
//! quotas of the protocol this database emulates; privileged callers are
//! exempt from the per-domain quotas but not from the wire-level size caps.

use crate::wire::codec::MAX_PAYLOAD;

/// Main configuration for an XSDB store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Per-domain Quotas
    // -------------------------------------------------------------------------
    /// Max nodes owned by a single unprivileged domain
    pub max_domain_nodes: usize,

    /// Max simultaneously registered watches per unprivileged domain
    pub max_domain_watches: usize,

    /// Max simultaneously open transactions per unprivileged domain
    pub max_domain_transactions: usize,

    // -------------------------------------------------------------------------
    // Size Limits
    // -------------------------------------------------------------------------
    /// Max node content size (bytes)
    pub max_node_size: usize,

    /// Max wire message payload (bytes); a declared length above this is a
    /// fatal channel error
    pub max_payload: usize,

    /// Max absolute path length (bytes)
    pub max_abs_path: usize,

    /// Max relative path length (bytes), before resolution against the
    /// caller's home path
    pub max_rel_path: usize,

    // -------------------------------------------------------------------------
    // Transport Configuration
    // -------------------------------------------------------------------------
    /// Capacity of each direction of the bundled loopback ring channel
    pub ring_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_domain_nodes: 1000,
            max_domain_watches: 128,
            max_domain_transactions: 10,
            max_node_size: 2048,
            max_payload: MAX_PAYLOAD,
            max_abs_path: 3072,
            max_rel_path: 2048,
            ring_capacity: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the per-domain node quota
    pub fn max_domain_nodes(mut self, count: usize) -> Self {
        self.config.max_domain_nodes = count;
        self
    }

    /// Set the per-domain watch quota
    pub fn max_domain_watches(mut self, count: usize) -> Self {
        self.config.max_domain_watches = count;
        self
    }

    /// Set the per-domain transaction quota
    pub fn max_domain_transactions(mut self, count: usize) -> Self {
        self.config.max_domain_transactions = count;
        self
    }

    /// Set the max node content size (in bytes)
    pub fn max_node_size(mut self, size: usize) -> Self {
        self.config.max_node_size = size;
        self
    }

    /// Set the max wire payload size (in bytes)
    pub fn max_payload(mut self, size: usize) -> Self {
        self.config.max_payload = size;
        self
    }

    /// Set the max absolute path length (in bytes)
    pub fn max_abs_path(mut self, len: usize) -> Self {
        self.config.max_abs_path = len;
        self
    }

    /// Set the max relative path length (in bytes)
    pub fn max_rel_path(mut self, len: usize) -> Self {
        self.config.max_rel_path = len;
        self
    }

    /// Set the loopback ring capacity (in bytes, per direction)
    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.config.ring_capacity = capacity;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_payload_cap_matches_the_protocol_constant() {
        assert_eq!(Config::default().max_payload, MAX_PAYLOAD);
    }

    #[test]
    fn builder_overrides_only_what_it_sets() {
        let config = Config::builder().max_node_size(16).build();
        assert_eq!(config.max_node_size, 16);
        assert_eq!(config.max_payload, MAX_PAYLOAD);
    }
}
