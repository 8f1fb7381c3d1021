//! Opaque per-node handles for tree views. Tokens are allocated on first use,
//! released when a node disappears and never handed out again.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PositionToken(u64);

impl PositionToken {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PositionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a token points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    Tag(String),
    /// Grouping node for the top-level tags of one linked notebook.
    LinkedNotebook(String),
}

#[derive(Debug)]
pub struct PositionBridge {
    next: u64,
    by_token: BTreeMap<PositionToken, NodeKey>,
    by_node: HashMap<NodeKey, PositionToken>,
}

impl Default for PositionBridge {
    fn default() -> Self {
        Self { next: 1, by_token: BTreeMap::new(), by_node: HashMap::new() }
    }
}

impl PositionBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Token for a node, allocating one the first time it is asked for.
    pub fn token_for(&mut self, node: NodeKey) -> PositionToken {
        if let Some(token) = self.by_node.get(&node) {
            return *token;
        }
        let token = PositionToken(self.next);
        self.next += 1;
        self.by_token.insert(token, node.clone());
        self.by_node.insert(node, token);
        token
    }

    pub fn token_for_tag(&mut self, local_id: &str) -> PositionToken {
        self.token_for(NodeKey::Tag(local_id.to_string()))
    }

    /// Token already issued for a node, without allocating.
    pub fn existing(&self, node: &NodeKey) -> Option<PositionToken> {
        self.by_node.get(node).copied()
    }

    pub fn node_for(&self, token: PositionToken) -> Option<&NodeKey> {
        self.by_token.get(&token)
    }

    /// Local id behind a token; `None` for freed tokens and group nodes.
    pub fn id_for(&self, token: PositionToken) -> Option<&str> {
        match self.by_token.get(&token)? {
            NodeKey::Tag(id) => Some(id),
            NodeKey::LinkedNotebook(_) => None,
        }
    }

    pub fn release(&mut self, node: &NodeKey) -> Option<PositionToken> {
        let token = self.by_node.remove(node)?;
        self.by_token.remove(&token);
        Some(token)
    }

    /// Forget every mapping. The counter keeps going so old tokens stay dead.
    pub fn clear(&mut self) {
        self.by_token.clear();
        self.by_node.clear();
    }
}
