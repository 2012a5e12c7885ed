//! The user-facing ordered iterator: replays the raw message stream
//! produced by [`crate::node::Node::next_message`] into resolved
//! (key, value) pairs, transparently collapsing INSERT/UPDATE/DELETE
//! chains and skipping keys that resolve to "not present".

use crate::backing_store::BackingStore;
use crate::message::MessageKey;
use crate::message::MessageValue;
use crate::tree::Tree;

pub struct Iter<'t, B: BackingStore> {
    tree: &'t Tree<B>,
    position: Option<(MessageKey, MessageValue)>,
    ready: Option<(u64, u64)>,
}

impl<'t, B: BackingStore> Iter<'t, B> {
    pub(crate) fn new(tree: &'t Tree<B>, start: Option<MessageKey>) -> Self {
        let position = tree.next_raw_message(start);
        let mut it = Iter {
            tree,
            position,
            ready: None,
        };
        it.advance();
        it
    }

    pub(crate) fn empty(tree: &'t Tree<B>) -> Self {
        Iter {
            tree,
            position: None,
            ready: None,
        }
    }

    fn apply_one(&mut self, mk: MessageKey, mv: MessageValue) {
        match mv {
            MessageValue::Insert(v) => self.ready = Some((mk.key, v)),
            MessageValue::Update(delta) => {
                let base = self
                    .ready
                    .map(|(_, v)| v)
                    .unwrap_or(self.tree.config().default_value);
                self.ready = Some((mk.key, base.wrapping_add(delta)));
            }
            MessageValue::Delete => self.ready = None,
        }
    }

    /// Consumes raw messages, collapsing every message for the current key
    /// (and transparently skipping ahead through keys that resolve to
    /// "deleted"), until either a resolved live key is ready or the raw
    /// stream is exhausted.
    fn advance(&mut self) {
        self.ready = None;
        loop {
            let Some((mk, mv)) = self.position else {
                break;
            };
            if let Some((k, _)) = self.ready {
                if mk.key != k {
                    break;
                }
            }
            self.apply_one(mk, mv);
            self.position = self.tree.next_raw_message(Some(mk));
        }
    }
}

impl<'t, B: BackingStore> Iterator for Iter<'t, B> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.ready.take()?;
        self.advance();
        Some(item)
    }
}
