//! Tuning knobs for a [`crate::tree::Tree`].

use serde::{Deserialize, Serialize};

/// The node-size threshold and flush tuning used by the node engine.
///
/// `max_node_size` bounds how many pivots+messages a node may hold before a
/// split is triggered; `min_flush_size` gates how large a buffered slice
/// must be before an internal node bothers recursing a flush into a child
/// (see the node engine's largest-slice selection in `flush`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    pub max_node_size: usize,
    pub min_flush_size: usize,
    pub default_value: u64,
    pub cache_size: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            max_node_size: 1 << 12,
            min_flush_size: 1 << 8,
            default_value: 0,
            cache_size: 1 << 16,
        }
    }
}

impl TreeConfig {
    pub fn builder() -> TreeConfigBuilder {
        TreeConfigBuilder::default()
    }
}

/// A builder mirroring the defaults in [`TreeConfig::default`].
#[derive(Debug, Clone, Default)]
pub struct TreeConfigBuilder {
    config: OptionalConfig,
}

#[derive(Debug, Clone, Default)]
struct OptionalConfig {
    max_node_size: Option<usize>,
    min_flush_size: Option<usize>,
    default_value: Option<u64>,
    cache_size: Option<usize>,
}

impl TreeConfigBuilder {
    pub fn max_node_size(mut self, v: usize) -> Self {
        self.config.max_node_size = Some(v);
        self
    }

    pub fn min_flush_size(mut self, v: usize) -> Self {
        self.config.min_flush_size = Some(v);
        self
    }

    pub fn default_value(mut self, v: u64) -> Self {
        self.config.default_value = Some(v);
        self
    }

    pub fn cache_size(mut self, v: usize) -> Self {
        self.config.cache_size = Some(v);
        self
    }

    pub fn build(self) -> TreeConfig {
        let defaults = TreeConfig::default();
        TreeConfig {
            max_node_size: self.config.max_node_size.unwrap_or(defaults.max_node_size),
            min_flush_size: self
                .config
                .min_flush_size
                .unwrap_or(defaults.min_flush_size),
            default_value: self.config.default_value.unwrap_or(defaults.default_value),
            cache_size: self.config.cache_size.unwrap_or(defaults.cache_size),
        }
    }
}
