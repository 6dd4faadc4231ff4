use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A value held by the trie: type-erased so one trie can map different
/// keys to different types, `Send + Sync` so tries travel across threads.
type TrieValue = Arc<dyn Any + Send + Sync>;

/// A single trie node, keyed by one byte of the key per level.
///
/// Nodes are immutable once published. `put` and `remove` clone only the
/// nodes on the root-to-key path; everything off the path is shared with
/// the source trie.
#[derive(Clone)]
enum TrieNode {
    Interior {
        children: HashMap<u8, Arc<TrieNode>>,
    },
    Value {
        children: HashMap<u8, Arc<TrieNode>>,
        value: TrieValue,
    },
}

impl TrieNode {
    fn children(&self) -> &HashMap<u8, Arc<TrieNode>> {
        match self {
            TrieNode::Interior { children } => children,
            TrieNode::Value { children, .. } => children,
        }
    }

    fn value(&self) -> Option<&TrieValue> {
        match self {
            TrieNode::Interior { .. } => None,
            TrieNode::Value { value, .. } => Some(value),
        }
    }

    fn is_value_node(&self) -> bool {
        matches!(self, TrieNode::Value { .. })
    }
}

/// An immutable copy-on-write map from byte-string keys to typed values.
///
/// Updates return new tries and leave the receiver untouched, so any
/// number of threads may read any number of tries concurrently without
/// synchronization. Cloning a trie is cheap: it shares the root.
#[derive(Clone, Default)]
pub struct Trie {
    root: Option<Arc<TrieNode>>,
}

impl Trie {
    /// An empty trie: no root at all.
    pub fn new() -> Trie {
        Trie { root: None }
    }

    /// Walks the trie along `key` and returns the value at the terminal
    /// node, provided it exists and has dynamic type `T`. The empty key
    /// addresses the root.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        let node = self.lookup(key)?;
        node.value()?.downcast_ref::<T>()
    }

    /// Returns a new trie in which `key` maps to `value`. The terminal
    /// node becomes a value node (keeping any children it had); missing
    /// path nodes are created.
    pub fn put<T: Any + Send + Sync>(&self, key: &str, value: T) -> Trie {
        let value: TrieValue = Arc::new(value);
        let root = Self::put_node(self.root.as_deref(), key.as_bytes(), value);
        Trie {
            root: Some(Arc::new(root)),
        }
    }

    /// Returns a new trie with `key` no longer mapped. A terminal node
    /// left childless is omitted, and the omission propagates upward
    /// through ancestors that become childless non-value nodes. Removing
    /// an absent key returns a trie equal to the receiver.
    pub fn remove(&self, key: &str) -> Trie {
        let terminal_has_value = self.lookup(key).is_some_and(TrieNode::is_value_node);
        if !terminal_has_value {
            return self.clone();
        }
        let root = self.root.as_deref().expect("lookup succeeded");
        Trie {
            root: Self::remove_node(root, key.as_bytes()).map(Arc::new),
        }
    }

    fn lookup(&self, key: &str) -> Option<&TrieNode> {
        let mut node = self.root.as_deref()?;
        for byte in key.bytes() {
            node = node.children().get(&byte)?;
        }
        Some(node)
    }

    fn put_node(node: Option<&TrieNode>, key: &[u8], value: TrieValue) -> TrieNode {
        let mut children = node.map(|n| n.children().clone()).unwrap_or_default();
        match key.split_first() {
            // Terminal: this node now carries the value, children intact.
            None => TrieNode::Value { children, value },
            Some((&byte, rest)) => {
                let new_child = Self::put_node(children.get(&byte).map(|c| &**c), rest, value);
                children.insert(byte, Arc::new(new_child));
                match node.and_then(TrieNode::value) {
                    Some(v) => TrieNode::Value {
                        children,
                        value: Arc::clone(v),
                    },
                    None => TrieNode::Interior { children },
                }
            }
        }
    }

    /// Returns the replacement for `node` after removing `key` beneath it,
    /// or `None` if the node should be omitted from its parent.
    fn remove_node(node: &TrieNode, key: &[u8]) -> Option<TrieNode> {
        match key.split_first() {
            None => {
                // Terminal: drop the value; survive only if children remain.
                let children = node.children().clone();
                if children.is_empty() {
                    None
                } else {
                    Some(TrieNode::Interior { children })
                }
            }
            Some((&byte, rest)) => {
                let mut children = node.children().clone();
                let pruned = {
                    let child = children.get(&byte).expect("caller verified the key path");
                    Self::remove_node(child, rest)
                };
                match pruned {
                    Some(new_child) => {
                        children.insert(byte, Arc::new(new_child));
                    }
                    None => {
                        children.remove(&byte);
                    }
                }
                match node.value() {
                    Some(v) => Some(TrieNode::Value {
                        children,
                        value: Arc::clone(v),
                    }),
                    None if children.is_empty() => None,
                    None => Some(TrieNode::Interior { children }),
                }
            }
        }
    }
}
