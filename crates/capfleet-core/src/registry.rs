//! In-memory agent registry.
//!
//! Membership is append-only for the coordinator's lifetime: agents register
//! themselves and are never removed. Duplicate registration is a no-op.

use serde::{Deserialize, Serialize};

/// Opaque agent identity, unique and immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(identity: &str) -> Self {
        Self::new(identity)
    }
}

/// Insertion-ordered set of registered agents.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: Vec<AgentId>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity if absent. Returns true iff it was newly added.
    ///
    /// The return value exists for observability only; duplicate
    /// registration is not an error.
    pub fn register(&mut self, id: AgentId) -> bool {
        if self.agents.contains(&id) {
            return false;
        }
        self.agents.push(id);
        true
    }

    /// Snapshot of the current membership in registration order.
    pub fn list(&self) -> Vec<AgentId> {
        self.agents.clone()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
