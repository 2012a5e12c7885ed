//! A write-optimized, ordered key-value index over fixed-width `u64` keys
//! and values, built on a buffered B^ε-tree.
//!
//! Three subsystems compose to form a [`Tree`]:
//!
//! - the node engine ([`node`]), which buffers writes in internal nodes and
//!   lazily flushes them toward the leaves, amortizing I/O across many
//!   writes;
//! - the swap space ([`swap_space`]), a reference-counted, LRU-managed
//!   object cache that pages nodes to and from a pluggable
//!   [`backing_store::BackingStore`];
//! - a reader-writer lock ([`lock`]) with one reader counter per thread
//!   slot, so concurrent queries never contend on a shared atomic.
//!
//! ```no_run
//! use betree_kv::{BackingStore, MemBackingStore, Tree, TreeConfig};
//!
//! let tree = Tree::new(MemBackingStore::new(), TreeConfig::default());
//! tree.insert(1, 100);
//! tree.update(1, 5);
//! assert_eq!(tree.query(1), Some(105));
//! tree.erase(1);
//! assert_eq!(tree.query(1), None);
//! ```

pub mod backing_store;
pub mod config;
pub mod error;
mod iter;
mod lock;
mod message;
mod node;
mod swap_space;
mod tree;

pub use backing_store::{BackingStore, FileBackingStore, MemBackingStore};
pub use config::{TreeConfig, TreeConfigBuilder};
pub use error::{Error, ErrorKind};
pub use iter::Iter;
pub use message::{Key, MessageKey, MessageValue};
pub use tree::Tree;

#[cfg(feature = "internal-api")]
pub use swap_space::Stats as CacheStats;

#[cfg(all(feature = "init_env_logger", not(test)))]
/// Initializes `env_logger` from the environment. Harmless to call more
/// than once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
