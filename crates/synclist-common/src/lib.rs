//! Shared identifier and scope types for the synclist replication core.
//!
//! Everything that travels between the CRDT layer, the local store and the
//! sync protocol refers to actors, resources and scopes by the types defined
//! here, so the crates above agree on what an id means.

use serde::{Deserialize, Serialize};

/// Resource id under which the lists registry is stored and synchronised.
///
/// There is exactly one registry per user, so its resource id is a constant
/// rather than a generated id.
pub const REGISTRY_RESOURCE_ID: &str = "registry";

/// Stable identifier for one replicating installation (browser profile,
/// device, test harness instance).
///
/// Actor ids participate in last-writer-wins tie-breaking and in fractional
/// positions, so they must be stable across restarts and unique across all
/// replicas of one user's data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    /// Create a new ActorId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        ActorId(id.into())
    }

    /// Generate a fresh random actor id.
    pub fn random() -> Self {
        ActorId(uuid::Uuid::new_v4().to_string())
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id is the empty string, which is never a valid emitter.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ActorId {
    fn from(s: String) -> Self {
        ActorId(s)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        ActorId(s.to_string())
    }
}

/// Which CRDT an operation addresses.
///
/// `Registry` operations target the single per-user lists registry;
/// `List` operations target one task list identified by its resource id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scope {
    Registry,
    List,
}

impl Scope {
    /// Stable string form used in storage columns and URLs.
    pub fn as_str(&self) -> &str {
        match self {
            Scope::Registry => "registry",
            Scope::List => "list",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registry" => Ok(Scope::Registry),
            "list" => Ok(Scope::List),
            other => Err(format!("unknown scope: {other}")),
        }
    }
}

/// Generate a fresh random id for items, lists and clients.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
