//! The message algebra: ordered (key, timestamp) keys and the tagged
//! INSERT/DELETE/UPDATE payload that every buffered write carries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound::Included;

pub type Key = u64;

/// Orders primarily by `key`, then by `timestamp`, matching field
/// declaration order so the derived `Ord` is correct without a manual impl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    pub key: Key,
    pub timestamp: u64,
}

impl MessageKey {
    pub fn new(key: Key, timestamp: u64) -> Self {
        MessageKey { key, timestamp }
    }

    /// The smallest possible `MessageKey` for `key`.
    pub fn min_for(key: Key) -> Self {
        MessageKey { key, timestamp: 0 }
    }

    /// The largest possible `MessageKey` for `key`.
    pub fn max_for(key: Key) -> Self {
        MessageKey {
            key,
            timestamp: u64::MAX,
        }
    }
}

/// A tagged message payload. Deliberately an exhaustive enum rather than an
/// opcode-plus-payload pair, so a caller can't construct an UPDATE carrying
/// garbage left over from a DELETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageValue {
    Insert(u64),
    Delete,
    Update(u64),
}

/// Folds `incoming` into a node's buffered `messages`, collapsing according
/// to the message algebra:
///
/// - INSERT: replaces any prior message for the key outright.
/// - DELETE: clears any prior message for the key. At an internal node the
///   clear is recorded as a tombstone so a flush later erases the key from
///   descendants too; at a leaf there is nothing left to shadow, so nothing
///   is installed and a subsequent query for the key simply finds no message.
/// - UPDATE: if the prior message for the key is an INSERT, collapses into a
///   single INSERT carrying the wrapped sum. If the prior message is itself
///   an UPDATE and this node is a leaf, the two UPDATEs collapse into one. If
///   there is no prior message and this node is a leaf, UPDATE is applied
///   against the configured default value and stored as an INSERT. If this
///   is an internal node and the prior message is UPDATE or DELETE (or there
///   is none), the UPDATE is installed verbatim, preserving arrival order so
///   the boundary-message replay in `query`/iteration can reconstruct it.
pub(crate) fn apply_message(
    messages: &mut BTreeMap<MessageKey, MessageValue>,
    is_leaf: bool,
    default_value: u64,
    mkey: MessageKey,
    mval: MessageValue,
) {
    match mval {
        MessageValue::Insert(_) => {
            clear_key(messages, mkey.key);
            messages.insert(mkey, mval);
        }
        MessageValue::Delete => {
            clear_key(messages, mkey.key);
            if !is_leaf {
                messages.insert(mkey, mval);
            }
        }
        MessageValue::Update(delta) => {
            let prev = prior_for_key(messages, mkey.key);
            match prev {
                Some((prev_key, MessageValue::Insert(v))) => {
                    let prev_key = *prev_key;
                    let v = v.wrapping_add(delta);
                    messages.remove(&prev_key);
                    messages.insert(mkey, MessageValue::Insert(v));
                }
                Some((prev_key, MessageValue::Update(prev_delta))) if is_leaf => {
                    let prev_key = *prev_key;
                    let v = prev_delta.wrapping_add(delta);
                    messages.remove(&prev_key);
                    messages.insert(mkey, MessageValue::Update(v));
                }
                None if is_leaf => {
                    messages.insert(mkey, MessageValue::Insert(default_value.wrapping_add(delta)));
                }
                _ => {
                    messages.insert(mkey, MessageValue::Update(delta));
                }
            }
        }
    }
}

fn clear_key(messages: &mut BTreeMap<MessageKey, MessageValue>, key: Key) {
    let range = (
        Included(MessageKey::min_for(key)),
        Included(MessageKey::max_for(key)),
    );
    let stale: Vec<MessageKey> = messages.range(range).map(|(k, _)| *k).collect();
    for k in stale {
        messages.remove(&k);
    }
}

fn prior_for_key(
    messages: &BTreeMap<MessageKey, MessageValue>,
    key: Key,
) -> Option<(&MessageKey, &MessageValue)> {
    let range = (
        Included(MessageKey::min_for(key)),
        Included(MessageKey::max_for(key)),
    );
    messages.range(range).next_back()
}
